use shared::ResourceKind;

use crate::schema::*;

shared::pg_participant_store! {
    /// Item stock reserved one unit per purchase, backed by Postgres.
    pub struct PgItemStore {
        kind: ResourceKind::Item,
        resource: item(id, amount),
        scratch: item_tmp,
        event: event,
    }
}
