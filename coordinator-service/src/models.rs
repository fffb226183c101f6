use chrono::{DateTime, Utc};
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::event)]
pub struct EventRow {
    pub id: i64,
    pub biz_id: i64,
    pub biz_data: String,
    pub status: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::event)]
pub struct NewEvent {
    pub biz_id: i64,
    pub biz_data: String,
    pub status: i32,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::event_scan_offset)]
pub struct ScanOffset {
    pub id: i32,
    pub scan_offset: i64,
}
