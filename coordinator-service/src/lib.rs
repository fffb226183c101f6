pub mod api;
pub mod client;
pub mod coordinator;
pub mod event_log;
pub mod recovery;

mod models;
mod schema;

use diesel_migrations::{embed_migrations, EmbeddedMigrations};

pub use client::{CallError, HttpParticipant, LocalParticipant, Participant, Phase};
pub use coordinator::{Coordinator, CoordinatorError, PurchaseOutcome};
pub use event_log::{EventLog, EventLogError, InMemoryEventLog, PgEventLog};
pub use recovery::{Recovery, RecoveryConfig, RecoveryError};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
