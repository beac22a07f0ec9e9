//! Persistence layer (SQLite)
//!
//! Stores that mint new rows (`posts`, `users`, `curation`) number them through
//! [`crate::id_claim::IdAllocator`].

pub mod curation;
pub mod init;
pub mod models;
pub mod posts;
pub mod topics;
pub mod users;

pub use curation::CurationModeStore;
pub use init::{init_database, init_memory_database, init_schema};
pub use models::*;
pub use posts::PostStore;
pub use topics::TopicStore;
pub use users::UserStore;

use crate::id_claim::InsertOutcome;
use crate::{Error, Result};

/// Sort an insert failure into "ID collision" (retryable) or a real error
///
/// SQLite reports a collision as `UNIQUE constraint failed: <table>.<column>`;
/// only a collision on `id_column` is retryable. A collision on any other
/// unique column means the row itself already exists.
pub(crate) fn classify_insert_error(
    err: sqlx::Error,
    table: &str,
    id_column: &str,
) -> Result<InsertOutcome> {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let id_target = format!("{}.{}", table, id_column);
            if db_err.message().contains(&id_target) {
                return Ok(InsertOutcome::UniqueConflict);
            }
            return Err(Error::Duplicate(db_err.message().to_string()));
        }
    }
    Err(Error::Database(err))
}

/// Current UNIX time in seconds
pub(crate) fn now_utc() -> i64 {
    chrono::Utc::now().timestamp()
}
