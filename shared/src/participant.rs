//! The try/cancel/confirm protocol every participant implements.
//!
//! A participant owns one kind of resource row (an account balance or an item
//! stock). `try_reserve` moves the reserved quantity into a per-`biz_id` scratch
//! row, `cancel` moves it back, and `confirm` drops the scratch row. A
//! participant event keyed by `biz_id` makes all three operations idempotent and
//! lets a cancel that arrives first block any later try.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::db::PoolRunError;
use crate::status::{ParticipantStatus, UnknownStatus};
use crate::{BizData, BizId};

/// Units of stock taken from an item by one purchase.
pub const ITEM_UNITS_PER_PURCHASE: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Account,
    Item,
}

/// What a try takes from which resource row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub resource_id: i64,
    pub amount: i64,
}

impl ResourceKind {
    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::Account => "account",
            ResourceKind::Item => "item",
        }
    }

    pub fn reservation(self, biz: &BizData) -> Reservation {
        match self {
            ResourceKind::Account => Reservation {
                resource_id: biz.user_id,
                amount: biz.price,
            },
            ResourceKind::Item => Reservation {
                resource_id: biz.item_id,
                amount: ITEM_UNITS_PER_PURCHASE,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryOutcome {
    Reserved,
    /// An event for this `biz_id` already exists (a replayed try, or a cancel
    /// that got there first). Nothing was changed.
    AlreadyRecorded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// A tried reservation was returned to the resource row.
    Released,
    /// No try had been seen; a canceled event now blocks any later try.
    Preempted,
    Unchanged(ParticipantStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Committed,
    /// Nothing to confirm: no event, or the event is already terminal.
    Unchanged(Option<ParticipantStatus>),
}

#[derive(Debug, Error)]
pub enum ParticipantError {
    #[error("insufficient resource {resource_id}: requested {requested}")]
    Insufficient { resource_id: i64, requested: i64 },

    #[error("concurrent operation on biz_id {0}, retry")]
    Contended(BizId),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error(transparent)]
    InvalidStatus(#[from] UnknownStatus),
}

impl From<PoolRunError> for ParticipantError {
    fn from(err: PoolRunError) -> Self {
        ParticipantError::Pool(err.to_string())
    }
}

#[async_trait]
pub trait ParticipantStore: Send + Sync + 'static {
    fn kind(&self) -> ResourceKind;

    async fn try_reserve(&self, biz: &BizData) -> Result<TryOutcome, ParticipantError>;

    async fn cancel(&self, biz: &BizData) -> Result<CancelOutcome, ParticipantError>;

    async fn confirm(&self, biz: &BizData) -> Result<ConfirmOutcome, ParticipantError>;
}

#[async_trait]
impl<S: ParticipantStore + ?Sized> ParticipantStore for Arc<S> {
    fn kind(&self) -> ResourceKind {
        (**self).kind()
    }

    async fn try_reserve(&self, biz: &BizData) -> Result<TryOutcome, ParticipantError> {
        (**self).try_reserve(biz).await
    }

    async fn cancel(&self, biz: &BizData) -> Result<CancelOutcome, ParticipantError> {
        (**self).cancel(biz).await
    }

    async fn confirm(&self, biz: &BizData) -> Result<ConfirmOutcome, ParticipantError> {
        (**self).confirm(biz).await
    }
}

#[derive(Debug, Default)]
struct Ledger {
    resources: HashMap<i64, i64>,
    scratch: HashMap<BizId, i64>,
    events: HashMap<BizId, ParticipantStatus>,
}

/// Participant backed by process memory.
///
/// A single lock around the whole ledger stands in for the transaction plus
/// row lock a database-backed participant uses, so every operation is atomic
/// and operations on one `biz_id` are serialized.
#[derive(Debug, Clone)]
pub struct InMemoryParticipant {
    kind: ResourceKind,
    ledger: Arc<Mutex<Ledger>>,
}

impl InMemoryParticipant {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            ledger: Arc::new(Mutex::new(Ledger::default())),
        }
    }

    pub async fn set_resource(&self, resource_id: i64, amount: i64) {
        self.ledger.lock().await.resources.insert(resource_id, amount);
    }

    pub async fn resource(&self, resource_id: i64) -> Option<i64> {
        self.ledger.lock().await.resources.get(&resource_id).copied()
    }

    pub async fn scratch(&self, biz_id: BizId) -> Option<i64> {
        self.ledger.lock().await.scratch.get(&biz_id).copied()
    }

    pub async fn status(&self, biz_id: BizId) -> Option<ParticipantStatus> {
        self.ledger.lock().await.events.get(&biz_id).copied()
    }

    pub async fn event_count(&self) -> usize {
        self.ledger.lock().await.events.len()
    }
}

#[async_trait]
impl ParticipantStore for InMemoryParticipant {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn try_reserve(&self, biz: &BizData) -> Result<TryOutcome, ParticipantError> {
        let reservation = self.kind.reservation(biz);
        let mut ledger = self.ledger.lock().await;

        if ledger.events.contains_key(&biz.biz_id()) {
            return Ok(TryOutcome::AlreadyRecorded);
        }

        match ledger.resources.get_mut(&reservation.resource_id) {
            Some(balance) if *balance >= reservation.amount => *balance -= reservation.amount,
            _ => {
                return Err(ParticipantError::Insufficient {
                    resource_id: reservation.resource_id,
                    requested: reservation.amount,
                })
            }
        }

        ledger.scratch.insert(biz.biz_id(), reservation.amount);
        ledger.events.insert(biz.biz_id(), ParticipantStatus::Tried);
        Ok(TryOutcome::Reserved)
    }

    async fn cancel(&self, biz: &BizData) -> Result<CancelOutcome, ParticipantError> {
        let reservation = self.kind.reservation(biz);
        let mut ledger = self.ledger.lock().await;

        match ledger.events.get(&biz.biz_id()).copied() {
            None => {
                ledger.events.insert(biz.biz_id(), ParticipantStatus::Canceled);
                Ok(CancelOutcome::Preempted)
            }
            Some(ParticipantStatus::Tried) => {
                let amount = ledger.scratch.remove(&biz.biz_id()).unwrap_or(0);
                *ledger.resources.entry(reservation.resource_id).or_insert(0) += amount;
                ledger.events.insert(biz.biz_id(), ParticipantStatus::Canceled);
                Ok(CancelOutcome::Released)
            }
            Some(status) => Ok(CancelOutcome::Unchanged(status)),
        }
    }

    async fn confirm(&self, biz: &BizData) -> Result<ConfirmOutcome, ParticipantError> {
        let mut ledger = self.ledger.lock().await;

        match ledger.events.get(&biz.biz_id()).copied() {
            Some(ParticipantStatus::Tried) => {
                ledger.scratch.remove(&biz.biz_id());
                ledger.events.insert(biz.biz_id(), ParticipantStatus::Confirmed);
                Ok(ConfirmOutcome::Committed)
            }
            other => Ok(ConfirmOutcome::Unchanged(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn biz(order_id: i64) -> BizData {
        BizData { order_id, user_id: 1, item_id: 1, price: 10 }
    }

    async fn account_with(balance: i64) -> InMemoryParticipant {
        let account = InMemoryParticipant::new(ResourceKind::Account);
        account.set_resource(1, balance).await;
        account
    }

    #[test]
    fn reservation_depends_on_resource_kind() {
        let b = BizData { order_id: 5, user_id: 2, item_id: 3, price: 40 };
        assert_eq!(
            ResourceKind::Account.reservation(&b),
            Reservation { resource_id: 2, amount: 40 }
        );
        assert_eq!(
            ResourceKind::Item.reservation(&b),
            Reservation { resource_id: 3, amount: ITEM_UNITS_PER_PURCHASE }
        );
    }

    #[tokio::test]
    async fn try_then_cancel_restores_the_resource() {
        let account = account_with(25).await;

        assert_eq!(account.try_reserve(&biz(1)).await.unwrap(), TryOutcome::Reserved);
        assert_eq!(account.resource(1).await, Some(15));
        assert_eq!(account.scratch(1).await, Some(10));

        assert_eq!(account.cancel(&biz(1)).await.unwrap(), CancelOutcome::Released);
        assert_eq!(account.resource(1).await, Some(25));
        assert_eq!(account.scratch(1).await, None);
        assert_eq!(account.status(1).await, Some(ParticipantStatus::Canceled));
    }

    #[tokio::test]
    async fn try_then_confirm_keeps_the_deduction() {
        let item = InMemoryParticipant::new(ResourceKind::Item);
        item.set_resource(1, 1).await;

        item.try_reserve(&biz(1)).await.unwrap();
        assert_eq!(item.confirm(&biz(1)).await.unwrap(), ConfirmOutcome::Committed);

        assert_eq!(item.resource(1).await, Some(0));
        assert_eq!(item.scratch(1).await, None);
        assert_eq!(item.status(1).await, Some(ParticipantStatus::Confirmed));
    }

    #[tokio::test]
    async fn replayed_try_does_not_deduct_twice() {
        let account = account_with(30).await;

        account.try_reserve(&biz(1)).await.unwrap();
        assert_eq!(
            account.try_reserve(&biz(1)).await.unwrap(),
            TryOutcome::AlreadyRecorded
        );
        assert_eq!(account.resource(1).await, Some(20));
        assert_eq!(account.event_count().await, 1);
    }

    #[tokio::test]
    async fn insufficient_resource_leaves_no_trace() {
        let account = account_with(5).await;

        let err = account.try_reserve(&biz(1)).await.unwrap_err();
        assert!(matches!(
            err,
            ParticipantError::Insufficient { resource_id: 1, requested: 10 }
        ));
        assert_eq!(account.resource(1).await, Some(5));
        assert_eq!(account.status(1).await, None);
        assert_eq!(account.scratch(1).await, None);
    }

    #[tokio::test]
    async fn missing_resource_row_is_insufficient() {
        let item = InMemoryParticipant::new(ResourceKind::Item);
        assert!(matches!(
            item.try_reserve(&biz(1)).await,
            Err(ParticipantError::Insufficient { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_before_try_blocks_the_try() {
        let account = account_with(10).await;

        assert_eq!(account.cancel(&biz(1)).await.unwrap(), CancelOutcome::Preempted);
        assert_eq!(
            account.try_reserve(&biz(1)).await.unwrap(),
            TryOutcome::AlreadyRecorded
        );

        assert_eq!(account.resource(1).await, Some(10));
        assert_eq!(account.scratch(1).await, None);
        assert_eq!(account.status(1).await, Some(ParticipantStatus::Canceled));
    }

    #[tokio::test]
    async fn confirm_without_try_is_silent() {
        let account = account_with(10).await;

        assert_eq!(
            account.confirm(&biz(1)).await.unwrap(),
            ConfirmOutcome::Unchanged(None)
        );
        assert_eq!(account.status(1).await, None);
    }

    #[tokio::test]
    async fn terminal_states_ignore_further_operations() {
        let account = account_with(10).await;
        account.try_reserve(&biz(1)).await.unwrap();
        account.confirm(&biz(1)).await.unwrap();

        assert_eq!(
            account.cancel(&biz(1)).await.unwrap(),
            CancelOutcome::Unchanged(ParticipantStatus::Confirmed)
        );
        assert_eq!(
            account.confirm(&biz(1)).await.unwrap(),
            ConfirmOutcome::Unchanged(Some(ParticipantStatus::Confirmed))
        );
        assert_eq!(account.resource(1).await, Some(0));
    }

    #[tokio::test]
    async fn racing_cancel_and_confirm_settle_like_a_serial_order() {
        for _ in 0..20 {
            let account = account_with(10).await;
            account.try_reserve(&biz(1)).await.unwrap();

            let (a, b) = (account.clone(), account.clone());
            let cancel = tokio::spawn(async move { a.cancel(&biz(1)).await.unwrap() });
            let confirm = tokio::spawn(async move { b.confirm(&biz(1)).await.unwrap() });
            let (cancel, confirm) = (cancel.await.unwrap(), confirm.await.unwrap());

            match account.status(1).await {
                Some(ParticipantStatus::Canceled) => {
                    assert_eq!(cancel, CancelOutcome::Released);
                    assert_eq!(
                        confirm,
                        ConfirmOutcome::Unchanged(Some(ParticipantStatus::Canceled))
                    );
                    assert_eq!(account.resource(1).await, Some(10));
                }
                Some(ParticipantStatus::Confirmed) => {
                    assert_eq!(confirm, ConfirmOutcome::Committed);
                    assert_eq!(
                        cancel,
                        CancelOutcome::Unchanged(ParticipantStatus::Confirmed)
                    );
                    assert_eq!(account.resource(1).await, Some(0));
                }
                other => panic!("unexpected terminal status {other:?}"),
            }
            assert_eq!(account.scratch(1).await, None);
        }
    }

    #[tokio::test]
    async fn distinct_biz_ids_reserve_independently() {
        let account = account_with(25).await;
        let tasks: Vec<_> = (1..=3)
            .map(|id| {
                let account = account.clone();
                tokio::spawn(async move { account.try_reserve(&biz(id)).await })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let reserved = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(TryOutcome::Reserved))))
            .count();

        assert_eq!(reserved, 2);
        assert_eq!(account.resource(1).await, Some(5));
    }
}
