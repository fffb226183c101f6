//! Forward path of a purchase and the background work that finishes it.
//!
//! A purchase is logged in `init`, tried on the account then the item, marked
//! `tried`, confirmed on the account then the item, and marked `confirmed`. The
//! first failure ends the request; a spawned task then drives the event to a
//! terminal status on its own, retrying each step until it lands. Those tasks
//! hold no state beyond the event id and payload, so losing one to a crash
//! only delays completion until recovery reaches the event.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shared::{retry_until_ok, BizData, EventStatus, RetryPolicy};
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};

use crate::client::{Participant, Phase};
use crate::event_log::{EventId, EventLog, EventLogError, InsertOutcome, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOutcome {
    Confirmed,
    Canceled,
    /// The `biz_id` was already logged and is not terminal yet; whoever
    /// logged it finishes it.
    InProgress,
    /// A background task owns the rest of the workflow.
    Deferred,
}

impl PurchaseOutcome {
    fn observed(status: EventStatus) -> Self {
        match status {
            EventStatus::Confirmed => PurchaseOutcome::Confirmed,
            EventStatus::Canceled => PurchaseOutcome::Canceled,
            EventStatus::Init | EventStatus::Tried => PurchaseOutcome::InProgress,
        }
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("failed to log purchase intent: {0}")]
    LogIntent(#[source] EventLogError),
}

/// Retries an event log operation until it succeeds or fails in a way
/// retrying cannot fix.
pub(crate) async fn retry_log<T, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, EventLogError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EventLogError>>,
{
    retry_until_ok(policy, what, || {
        let attempt = op();
        async move {
            match attempt.await {
                Ok(value) => Ok(Ok(value)),
                Err(e) if e.is_fatal() => Ok(Err(e)),
                Err(e) => Err(e),
            }
        }
    })
    .await
}

#[derive(Clone)]
pub struct Coordinator {
    log: Arc<dyn EventLog>,
    account: Arc<dyn Participant>,
    item: Arc<dyn Participant>,
    retry: RetryPolicy,
}

impl Coordinator {
    pub fn new(
        log: Arc<dyn EventLog>,
        account: Arc<dyn Participant>,
        item: Arc<dyn Participant>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            log,
            account,
            item,
            retry,
        }
    }

    pub fn event_log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Participants in the fixed order every phase walks them.
    fn participants(&self) -> [&Arc<dyn Participant>; 2] {
        [&self.account, &self.item]
    }

    #[tracing::instrument(skip(self, biz), fields(biz_id = biz.biz_id()))]
    pub async fn purchase(&self, biz: BizData) -> Result<PurchaseOutcome, CoordinatorError> {
        let id = match self.log.insert(&biz).await.map_err(CoordinatorError::LogIntent)? {
            InsertOutcome::Inserted(id) => id,
            InsertOutcome::Duplicate => return Ok(self.replayed(&biz).await),
        };

        for (attempted, participant) in self.participants().into_iter().enumerate() {
            if let Err(e) = participant.send(Phase::Try, &biz).await {
                warn!(event_id = id, "Try failed, canceling: {}", e);
                let this = self.clone();
                self.spawn_background("cancel", biz, async move {
                    if let Err(e) = this.finish_cancel(id, &biz, attempted + 1).await {
                        error!(event_id = id, "Cancel could not be recorded: {}", e);
                    }
                });
                return Ok(PurchaseOutcome::Deferred);
            }
        }

        match self.log.transition(id, EventStatus::Tried).await {
            Ok(Transition::Applied | Transition::AlreadyAt) => {}
            Ok(Transition::Rejected { current }) => {
                warn!(event_id = id, %current, "Event left init while trying, not confirming");
                return Ok(PurchaseOutcome::observed(current));
            }
            Err(e) => {
                warn!(event_id = id, "Marking tried failed, confirming in background: {}", e);
                let this = self.clone();
                self.spawn_background("mark tried", biz, async move {
                    this.finish_tried(id, &biz).await;
                });
                return Ok(PurchaseOutcome::Deferred);
            }
        }

        for participant in self.participants() {
            if let Err(e) = participant.send(Phase::Confirm, &biz).await {
                warn!(event_id = id, "Confirm failed, retrying in background: {}", e);
                let this = self.clone();
                self.spawn_background("confirm", biz, async move {
                    if let Err(e) = this.finish_confirm(id, &biz).await {
                        error!(event_id = id, "Confirm could not be recorded: {}", e);
                    }
                });
                return Ok(PurchaseOutcome::Deferred);
            }
        }

        match self.log.transition(id, EventStatus::Confirmed).await {
            Ok(Transition::Applied | Transition::AlreadyAt) => {
                info!(event_id = id, "Purchase confirmed");
                Ok(PurchaseOutcome::Confirmed)
            }
            Ok(Transition::Rejected { current }) => {
                error!(event_id = id, %current, "Confirmed participants but event is not tried");
                Ok(PurchaseOutcome::observed(current))
            }
            Err(e) => {
                warn!(event_id = id, "Marking confirmed failed, retrying in background: {}", e);
                let this = self.clone();
                self.spawn_background("mark confirmed", biz, async move {
                    if let Err(e) = this.settle(id, EventStatus::Confirmed).await {
                        error!(event_id = id, "Confirm could not be recorded: {}", e);
                    }
                });
                Ok(PurchaseOutcome::Deferred)
            }
        }
    }

    /// Reports where an already logged purchase stands without touching it.
    async fn replayed(&self, biz: &BizData) -> PurchaseOutcome {
        match self.log.find_by_biz_id(biz.biz_id()).await {
            Ok(Some(event)) => {
                info!(event_id = event.id, status = %event.status, "Purchase already logged");
                PurchaseOutcome::observed(event.status)
            }
            Ok(None) => PurchaseOutcome::InProgress,
            Err(e) => {
                warn!("Could not read back logged purchase: {}", e);
                PurchaseOutcome::InProgress
            }
        }
    }

    /// Cancels the first `attempted` participants, then marks the event canceled.
    pub async fn finish_cancel(
        &self,
        id: EventId,
        biz: &BizData,
        attempted: usize,
    ) -> Result<Transition, EventLogError> {
        for participant in self.participants().into_iter().take(attempted) {
            self.call_until_ok(participant, Phase::Cancel, biz).await;
        }
        self.settle(id, EventStatus::Canceled).await
    }

    pub async fn cancel_everywhere(
        &self,
        id: EventId,
        biz: &BizData,
    ) -> Result<Transition, EventLogError> {
        self.finish_cancel(id, biz, self.participants().len()).await
    }

    /// Confirms every participant, then marks the event confirmed.
    pub async fn finish_confirm(
        &self,
        id: EventId,
        biz: &BizData,
    ) -> Result<Transition, EventLogError> {
        for participant in self.participants() {
            self.call_until_ok(participant, Phase::Confirm, biz).await;
        }
        self.settle(id, EventStatus::Confirmed).await
    }

    /// Records `tried` before any confirm goes out, then confirms.
    async fn finish_tried(&self, id: EventId, biz: &BizData) {
        match self.settle(id, EventStatus::Tried).await {
            Ok(Transition::Applied | Transition::AlreadyAt) => {
                if let Err(e) = self.finish_confirm(id, biz).await {
                    error!(event_id = id, "Confirm could not be recorded: {}", e);
                }
            }
            Ok(Transition::Rejected { current }) => {
                info!(event_id = id, %current, "Event already moved on, nothing to confirm");
            }
            Err(e) => error!(event_id = id, "Tried could not be recorded: {}", e),
        }
    }

    pub(crate) async fn settle(
        &self,
        id: EventId,
        to: EventStatus,
    ) -> Result<Transition, EventLogError> {
        let transition = retry_log(self.retry, "event status update", || {
            self.log.transition(id, to)
        })
        .await?;
        if let Transition::Rejected { current } = transition {
            warn!(event_id = id, %current, %to, "Status update rejected");
        }
        Ok(transition)
    }

    async fn call_until_ok(&self, participant: &Arc<dyn Participant>, phase: Phase, biz: &BizData) {
        let what = format!("{} {}", participant.name(), phase);
        retry_until_ok(self.retry, &what, || participant.send(phase, biz)).await
    }

    fn spawn_background<F>(&self, task: &'static str, biz: BizData, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = info_span!("background", task, biz_id = biz.biz_id());
        tokio::spawn(work.instrument(span));
    }
}
