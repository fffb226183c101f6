use shared::ResourceKind;

use crate::schema::*;

shared::pg_participant_store! {
    /// Account balances reserved per purchase, backed by Postgres.
    pub struct PgAccountStore {
        kind: ResourceKind::Account,
        resource: account(user_id, balance),
        scratch: account_tmp,
        event: event,
    }
}
