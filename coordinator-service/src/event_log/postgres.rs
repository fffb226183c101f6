use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use shared::db::{is_duplicate, DbPool};
use shared::{BizData, BizId, EventStatus};

use super::{
    classify, decode_status, EventId, EventLog, EventLogError, EventRecord, InsertOutcome,
    Result, Transition, OFFSET_ROW_ID,
};
use crate::models::*;
use crate::schema::*;

#[derive(Clone)]
pub struct PgEventLog {
    pool: DbPool,
}

impl PgEventLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl TryFrom<EventRow> for EventRecord {
    type Error = EventLogError;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(Self {
            status: decode_status(row.id, row.status)?,
            id: row.id,
            biz_id: row.biz_id,
            biz_data: row.biz_data,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    async fn insert(&self, biz: &BizData) -> Result<InsertOutcome> {
        let mut conn = self.pool.get().await?;
        let new_event = NewEvent {
            biz_id: biz.biz_id(),
            biz_data: serde_json::to_string(biz)?,
            status: EventStatus::Init.code(),
        };

        let inserted = diesel::insert_into(event::table)
            .values(&new_event)
            .returning(event::id)
            .get_result::<i64>(&mut conn)
            .await;

        match inserted {
            Ok(id) => Ok(InsertOutcome::Inserted(id)),
            Err(e) if is_duplicate(&e) => Ok(InsertOutcome::Duplicate),
            Err(e) => Err(e.into()),
        }
    }

    async fn transition(&self, id: EventId, to: EventStatus) -> Result<Transition> {
        let mut conn = self.pool.get().await?;

        let updated = diesel::update(
            event::table
                .filter(event::id.eq(id))
                .filter(event::status.eq_any(EventStatus::predecessor_codes(to))),
        )
        .set(event::status.eq(to.code()))
        .execute(&mut conn)
        .await?;
        if updated > 0 {
            return Ok(Transition::Applied);
        }

        let code = event::table
            .filter(event::id.eq(id))
            .select(event::status)
            .first::<i32>(&mut conn)
            .await
            .optional()?
            .ok_or(EventLogError::NotFound(id))?;
        Ok(classify(id, decode_status(id, code)?, to))
    }

    async fn find_by_biz_id(&self, biz_id: BizId) -> Result<Option<EventRecord>> {
        let mut conn = self.pool.get().await?;
        event::table
            .select(EventRow::as_select())
            .filter(event::biz_id.eq(biz_id))
            .first::<EventRow>(&mut conn)
            .await
            .optional()?
            .map(EventRecord::try_from)
            .transpose()
    }

    async fn scan_after(&self, offset: EventId, limit: i64) -> Result<Vec<EventRecord>> {
        let mut conn = self.pool.get().await?;
        let rows = event::table
            .select(EventRow::as_select())
            .filter(event::id.gt(offset))
            .order(event::id.asc())
            .limit(limit)
            .load::<EventRow>(&mut conn)
            .await?;

        rows.into_iter().map(EventRecord::try_from).collect()
    }

    async fn load_offset(&self) -> Result<EventId> {
        let mut conn = self.pool.get().await?;
        let offset = event_scan_offset::table
            .filter(event_scan_offset::id.eq(OFFSET_ROW_ID))
            .select(event_scan_offset::scan_offset)
            .first::<i64>(&mut conn)
            .await
            .optional()?;
        Ok(offset.unwrap_or(0))
    }

    async fn store_offset(&self, offset: EventId) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let row = ScanOffset {
            id: OFFSET_ROW_ID,
            scan_offset: offset,
        };

        diesel::insert_into(event_scan_offset::table)
            .values(&row)
            .on_conflict(event_scan_offset::id)
            .do_update()
            .set(&row)
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}
