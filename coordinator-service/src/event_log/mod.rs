//! The coordinator's durable record of every purchase it has accepted.
//!
//! One event per `biz_id`, created in `init` and moved along the legal status
//! edges until it is `confirmed` or `canceled`. Status writes are guarded by
//! the set of legal predecessors, so a writer that lost a race observes the
//! winner's status instead of overwriting it.

mod memory;
mod postgres;

pub use memory::InMemoryEventLog;
pub use postgres::PgEventLog;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::db::PoolRunError;
use shared::{BizData, BizId, EventStatus, UnknownStatus};
use thiserror::Error;

pub type EventId = i64;

/// Primary key of the single scan offset row.
pub const OFFSET_ROW_ID: i32 = 1;

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("event {id} has {source}")]
    UnknownStatus {
        id: EventId,
        #[source]
        source: UnknownStatus,
    },

    #[error("event {0} not found")]
    NotFound(EventId),
}

impl EventLogError {
    /// Errors that retrying cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EventLogError::UnknownStatus { .. } | EventLogError::NotFound(_)
        )
    }
}

impl From<PoolRunError> for EventLogError {
    fn from(err: PoolRunError) -> Self {
        EventLogError::Pool(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EventLogError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub id: EventId,
    pub biz_id: BizId,
    pub biz_data: String,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn payload(&self) -> std::result::Result<BizData, serde_json::Error> {
        serde_json::from_str(&self.biz_data)
    }
}

pub(crate) fn decode_status(id: EventId, code: i32) -> Result<EventStatus> {
    EventStatus::try_from(code).map_err(|source| EventLogError::UnknownStatus { id, source })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(EventId),
    /// An event for this `biz_id` already exists.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    AlreadyAt,
    /// The event is in a status from which the requested one is not reachable.
    Rejected { current: EventStatus },
}

pub(crate) fn classify(id: EventId, current: EventStatus, to: EventStatus) -> Transition {
    if current == to {
        Transition::AlreadyAt
    } else {
        tracing::debug!(id, %current, %to, "status transition rejected");
        Transition::Rejected { current }
    }
}

#[async_trait]
pub trait EventLog: Send + Sync + 'static {
    /// Records a new purchase in `init`.
    async fn insert(&self, biz: &BizData) -> Result<InsertOutcome>;

    /// Moves event `id` to `to` if its current status allows it.
    async fn transition(&self, id: EventId, to: EventStatus) -> Result<Transition>;

    async fn find_by_biz_id(&self, biz_id: BizId) -> Result<Option<EventRecord>>;

    /// Up to `limit` events with `id > offset`, in id order.
    async fn scan_after(&self, offset: EventId, limit: i64) -> Result<Vec<EventRecord>>;

    /// Highest event id recovery has finished with; 0 before the first batch.
    async fn load_offset(&self) -> Result<EventId>;

    async fn store_offset(&self, offset: EventId) -> Result<()>;
}
