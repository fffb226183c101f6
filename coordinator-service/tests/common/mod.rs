#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coordinator_service::{
    CallError, Coordinator, InMemoryEventLog, LocalParticipant, Participant, Phase,
};
use shared::{BizData, BizId, EventStatus, InMemoryParticipant, ResourceKind, RetryPolicy};

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(10))
}

pub fn purchase(order_id: i64) -> BizData {
    BizData {
        order_id,
        user_id: 1,
        item_id: 1,
        price: 10,
    }
}

/// Fails the next `count` calls of one phase, then delegates.
pub struct Flaky {
    inner: Arc<dyn Participant>,
    phase: Phase,
    remaining: AtomicUsize,
}

impl Flaky {
    pub fn new(inner: Arc<dyn Participant>, phase: Phase, count: usize) -> Self {
        Self {
            inner,
            phase,
            remaining: AtomicUsize::new(count),
        }
    }
}

#[async_trait]
impl Participant for Flaky {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send(&self, phase: Phase, biz: &BizData) -> Result<(), CallError> {
        let failing = phase == self.phase
            && self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if failing {
            return Err(CallError::Status {
                participant: self.name().to_string(),
                phase,
                status: 503,
            });
        }
        self.inner.send(phase, biz).await
    }
}

pub struct Harness {
    pub log: InMemoryEventLog,
    pub account: InMemoryParticipant,
    pub item: InMemoryParticipant,
    pub coordinator: Coordinator,
}

impl Harness {
    /// Account 1 holds `balance`, item 1 holds `stock`.
    pub async fn new(balance: i64, stock: i64) -> Self {
        Self::with_wrappers(balance, stock, |p| p, |p| p).await
    }

    pub async fn with_wrappers(
        balance: i64,
        stock: i64,
        wrap_account: impl FnOnce(Arc<dyn Participant>) -> Arc<dyn Participant>,
        wrap_item: impl FnOnce(Arc<dyn Participant>) -> Arc<dyn Participant>,
    ) -> Self {
        let log = InMemoryEventLog::new();
        let account = InMemoryParticipant::new(ResourceKind::Account);
        let item = InMemoryParticipant::new(ResourceKind::Item);
        account.set_resource(1, balance).await;
        item.set_resource(1, stock).await;

        let coordinator = Coordinator::new(
            Arc::new(log.clone()),
            wrap_account(Arc::new(LocalParticipant::new(account.clone()))),
            wrap_item(Arc::new(LocalParticipant::new(item.clone()))),
            fast_retry(),
        );

        Self {
            log,
            account,
            item,
            coordinator,
        }
    }

    /// Polls until the event for `biz_id` reaches `expected`.
    pub async fn wait_for(&self, biz_id: BizId, expected: EventStatus) {
        let reached = tokio::time::timeout(Duration::from_secs(5), async {
            while self.log.status_of(biz_id).await != Some(expected) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(
            reached.is_ok(),
            "event {} stuck at {:?}, expected {}",
            biz_id,
            self.log.status_of(biz_id).await,
            expected
        );
    }
}
