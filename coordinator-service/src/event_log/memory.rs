use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{BizData, BizId, EventStatus};
use tokio::sync::Mutex;

use super::{
    classify, decode_status, EventId, EventLog, EventLogError, EventRecord, InsertOutcome,
    Result, Transition,
};

#[derive(Debug, Clone)]
struct StoredEvent {
    biz_id: BizId,
    biz_data: String,
    status: i32,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    events: BTreeMap<EventId, StoredEvent>,
    last_id: EventId,
    offset: Option<EventId>,
    failing_inserts: usize,
    failing_transitions: usize,
}

impl State {
    fn record(&self, id: EventId) -> Result<EventRecord> {
        let stored = self.events.get(&id).ok_or(EventLogError::NotFound(id))?;
        Ok(EventRecord {
            id,
            biz_id: stored.biz_id,
            biz_data: stored.biz_data.clone(),
            status: decode_status(id, stored.status)?,
            created_at: stored.created_at,
        })
    }

    fn push(&mut self, biz_id: BizId, biz_data: String, status: i32) -> EventId {
        self.last_id += 1;
        self.events.insert(
            self.last_id,
            StoredEvent {
                biz_id,
                biz_data,
                status,
                created_at: Utc::now(),
            },
        );
        self.last_id
    }
}

fn injected(op: &str) -> EventLogError {
    EventLogError::Pool(format!("injected {op} failure"))
}

/// Event log held in process memory, for tests.
///
/// Rows keep raw status codes so tests can plant the states a crashed
/// coordinator leaves behind, including corrupt ones.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventLog {
    state: Arc<Mutex<State>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a row as-is, bypassing the `init`-only insert path.
    pub async fn seed(&self, biz: &BizData, status_code: i32) -> EventId {
        let biz_data = serde_json::to_string(biz).unwrap_or_default();
        self.seed_raw(biz.biz_id(), biz_data, status_code).await
    }

    pub async fn seed_raw(&self, biz_id: BizId, biz_data: String, status_code: i32) -> EventId {
        self.state.lock().await.push(biz_id, biz_data, status_code)
    }

    pub async fn backdate(&self, id: EventId, created_at: DateTime<Utc>) {
        if let Some(stored) = self.state.lock().await.events.get_mut(&id) {
            stored.created_at = created_at;
        }
    }

    /// Makes the next `count` inserts fail as if the database were unreachable.
    pub async fn fail_next_inserts(&self, count: usize) {
        self.state.lock().await.failing_inserts = count;
    }

    /// Makes the next `count` status transitions fail as if the database were unreachable.
    pub async fn fail_next_transitions(&self, count: usize) {
        self.state.lock().await.failing_transitions = count;
    }

    pub async fn status_of(&self, biz_id: BizId) -> Option<EventStatus> {
        let state = self.state.lock().await;
        state
            .events
            .values()
            .find(|e| e.biz_id == biz_id)
            .and_then(|e| EventStatus::try_from(e.status).ok())
    }

    pub async fn event_count(&self) -> usize {
        self.state.lock().await.events.len()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn insert(&self, biz: &BizData) -> Result<InsertOutcome> {
        let biz_data = serde_json::to_string(biz)?;
        let mut state = self.state.lock().await;

        if state.failing_inserts > 0 {
            state.failing_inserts -= 1;
            return Err(injected("insert"));
        }
        if state.events.values().any(|e| e.biz_id == biz.biz_id()) {
            return Ok(InsertOutcome::Duplicate);
        }

        let id = state.push(biz.biz_id(), biz_data, EventStatus::Init.code());
        Ok(InsertOutcome::Inserted(id))
    }

    async fn transition(&self, id: EventId, to: EventStatus) -> Result<Transition> {
        let mut state = self.state.lock().await;

        if state.failing_transitions > 0 {
            state.failing_transitions -= 1;
            return Err(injected("transition"));
        }

        let current = state.record(id)?.status;
        if !current.can_transition_to(to) {
            return Ok(classify(id, current, to));
        }
        if let Some(stored) = state.events.get_mut(&id) {
            stored.status = to.code();
        }
        Ok(Transition::Applied)
    }

    async fn find_by_biz_id(&self, biz_id: BizId) -> Result<Option<EventRecord>> {
        let state = self.state.lock().await;
        let id = state
            .events
            .iter()
            .find(|(_, e)| e.biz_id == biz_id)
            .map(|(id, _)| *id);
        id.map(|id| state.record(id)).transpose()
    }

    async fn scan_after(&self, offset: EventId, limit: i64) -> Result<Vec<EventRecord>> {
        let state = self.state.lock().await;
        let limit = usize::try_from(limit).unwrap_or(0);
        state
            .events
            .range(offset + 1..)
            .take(limit)
            .map(|(id, _)| state.record(*id))
            .collect()
    }

    async fn load_offset(&self) -> Result<EventId> {
        Ok(self.state.lock().await.offset.unwrap_or(0))
    }

    async fn store_offset(&self, offset: EventId) -> Result<()> {
        self.state.lock().await.offset = Some(offset);
        Ok(())
    }
}
