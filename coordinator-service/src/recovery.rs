//! Background scan that drives orphaned events to a terminal status.
//!
//! Events are read in id order after a persisted offset. An event still in
//! `init` never had its tries committed, so it is canceled everywhere; an
//! event in `tried` was committed forward, so it is confirmed everywhere.
//! The offset moves only once every event of the batch is terminal.

use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::coordinator::{retry_log, Coordinator};
use crate::event_log::{EventId, EventLogError, EventRecord, Transition};
use shared::EventStatus;

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub batch_size: i64,
    /// Events younger than this are left to the request that created them.
    pub grace: Duration,
    pub idle_min: Duration,
    pub idle_max: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            grace: Duration::from_secs(30),
            idle_min: Duration::from_millis(200),
            idle_max: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("event log invariant violated: {0}")]
    EventLog(#[from] EventLogError),

    #[error("event {id} carries an undecodable payload: {source}")]
    CorruptPayload {
        id: EventId,
        #[source]
        source: serde_json::Error,
    },
}

pub struct Recovery {
    coordinator: Coordinator,
    config: RecoveryConfig,
}

impl Recovery {
    pub fn new(coordinator: Coordinator, config: RecoveryConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Scans forever. Returns only when the log holds something recovery must
    /// not skip over.
    pub async fn run(&self) -> Result<(), RecoveryError> {
        info!(batch_size = self.config.batch_size, "Recovery loop started");
        let mut idle = self.config.idle_min;
        loop {
            if self.recover_once().await? > 0 {
                idle = self.config.idle_min;
                continue;
            }
            debug!("Nothing to recover, sleeping {:?}", idle);
            tokio::time::sleep(idle).await;
            idle = idle.saturating_mul(2).min(self.config.idle_max);
        }
    }

    /// Drives one batch to terminal status and advances the offset past it.
    /// Returns the number of events handled.
    pub async fn recover_once(&self) -> Result<usize, RecoveryError> {
        let log = self.coordinator.event_log();
        let policy = self.coordinator.retry_policy();

        let offset = retry_log(policy, "load scan offset", || log.load_offset()).await?;
        let batch = retry_log(policy, "scan events", || {
            log.scan_after(offset, self.config.batch_size)
        })
        .await?;

        let grace = chrono::Duration::from_std(self.config.grace)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = Utc::now() - grace;
        let eligible: Vec<EventRecord> = batch
            .into_iter()
            .take_while(|event| event.created_at <= cutoff)
            .collect();

        let Some(last) = eligible.last().map(|event| event.id) else {
            return Ok(0);
        };

        for event in &eligible {
            self.drive(event).await?;
        }

        retry_log(policy, "store scan offset", || log.store_offset(last)).await?;
        info!(offset = last, handled = eligible.len(), "Recovery batch complete");
        Ok(eligible.len())
    }

    async fn drive(&self, event: &EventRecord) -> Result<(), RecoveryError> {
        let decision = match event.status {
            EventStatus::Init => EventStatus::Canceled,
            EventStatus::Tried => EventStatus::Confirmed,
            EventStatus::Canceled | EventStatus::Confirmed => return Ok(()),
        };

        let biz = event
            .payload()
            .map_err(|source| RecoveryError::CorruptPayload {
                id: event.id,
                source,
            })?;

        info!(event_id = event.id, biz_id = event.biz_id, status = %event.status, %decision, "Recovering event");
        let transition = match decision {
            EventStatus::Canceled => self.coordinator.cancel_everywhere(event.id, &biz).await?,
            _ => self.coordinator.finish_confirm(event.id, &biz).await?,
        };
        if let Transition::Rejected { current } = transition {
            // A request outlived the grace period and moved the event after the scan read it.
            warn!(event_id = event.id, %current, %decision, "Event moved during recovery");
        }
        debug!(event_id = event.id, ?transition, "Recovered event");
        Ok(())
    }
}
