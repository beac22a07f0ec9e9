//! Claim-then-retry unique ID allocation
//!
//! Each logical table gets one [`IdAllocator`], built at startup from the
//! persisted maximum and shared by every writer in the process.
//!
//! **Algorithm:**
//! 1. Under the allocator lock, take `next_id` as the candidate and increment it
//! 2. Release the lock and insert the row with the candidate as its ID
//! 3. On success, return the candidate
//! 4. On a uniqueness conflict, re-read the persisted maximum, set
//!    `next_id = max + 1` and go back to step 1
//!
//! The lock only keeps local claimants from reserving the same candidate. Two
//! processes can still race on one candidate; the table's uniqueness
//! constraint plus the retry loop is what keeps committed IDs unique.

use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};

/// Retry bound for a single claim
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Result of one insert attempt with a claimed ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another writer already committed a row with this ID
    UniqueConflict,
}

/// Storage operations the claim protocol needs from a table
#[async_trait]
pub trait ClaimTable: Send + Sync {
    type Row: Send + Sync;

    /// Name used in logs and errors
    fn table_name(&self) -> &str;

    /// Highest committed ID, or `None` for an empty table
    async fn read_max_id(&self) -> Result<Option<i64>>;

    /// Insert `row` under `id`
    ///
    /// Must report a collision on the ID column as `UniqueConflict`; any other
    /// failure is returned as an error and is not retried.
    async fn insert_with_id(&self, id: i64, row: &Self::Row) -> Result<InsertOutcome>;
}

/// Per-table ID counter
#[derive(Debug)]
pub struct IdAllocator {
    table: String,
    next_id: Mutex<i64>,
    max_attempts: u32,
}

impl IdAllocator {
    /// Create an allocator from a known persisted maximum (`None` = empty table)
    pub fn new(table: impl Into<String>, persisted_max: Option<i64>, max_attempts: u32) -> Self {
        Self {
            table: table.into(),
            next_id: Mutex::new(persisted_max.unwrap_or(-1) + 1),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Create an allocator synchronized with the table's current maximum
    pub async fn load<T: ClaimTable>(table: &T, max_attempts: u32) -> Result<Self> {
        let persisted_max = table.read_max_id().await?;
        tracing::debug!(
            table = table.table_name(),
            persisted_max = ?persisted_max,
            "Initialized ID allocator"
        );
        Ok(Self::new(table.table_name(), persisted_max, max_attempts))
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// The candidate the next claim would reserve
    pub fn peek_next(&self) -> i64 {
        *self.next_id.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reserve(&self) -> i64 {
        let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
        let candidate = *next;
        *next += 1;
        candidate
    }

    fn resync(&self, persisted_max: Option<i64>) {
        let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
        *next = persisted_max.unwrap_or(-1) + 1;
    }

    /// Insert `row` under a freshly claimed ID and return that ID
    ///
    /// # Errors
    /// - `Error::ClaimExhausted` after `max_attempts` conflicting inserts
    /// - any non-conflict error from the table, unchanged
    pub async fn claim_insert<T: ClaimTable>(&self, table: &T, row: &T::Row) -> Result<i64> {
        for attempt in 1..=self.max_attempts {
            let candidate = self.reserve();

            match table.insert_with_id(candidate, row).await? {
                InsertOutcome::Inserted => {
                    if attempt > 1 {
                        tracing::debug!(
                            table = %self.table,
                            id = candidate,
                            attempt,
                            "Claimed ID after retry"
                        );
                    }
                    return Ok(candidate);
                }
                InsertOutcome::UniqueConflict => {
                    let persisted_max = table.read_max_id().await?;
                    tracing::warn!(
                        table = %self.table,
                        candidate,
                        attempt,
                        persisted_max = ?persisted_max,
                        "ID conflict, resynchronizing counter"
                    );
                    self.resync(persisted_max);
                }
            }
        }

        tracing::error!(
            table = %self.table,
            attempts = self.max_attempts,
            "ID claim failed: retry bound exceeded"
        );
        Err(Error::ClaimExhausted {
            table: self.table.clone(),
            attempts: self.max_attempts,
        })
    }
}
