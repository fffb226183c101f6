pub mod schema;
pub mod store;

use diesel_migrations::{embed_migrations, EmbeddedMigrations};

pub use store::PgAccountStore;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
