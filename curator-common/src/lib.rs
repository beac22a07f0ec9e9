//! # Curator Common Library
//!
//! Shared code for the curator front-end and scoring worker:
//! - Length-prefixed framing for the worker connection
//! - Dispatcher ↔ worker wire schema
//! - Claim-then-retry unique ID allocation
//! - SQLite persistence (posts, users, curation modes, topic filters)
//! - Configuration loading

pub mod config;
pub mod db;
pub mod error;
pub mod framing;
pub mod id_claim;
pub mod wire;

pub use error::{Error, Result};
pub use id_claim::{ClaimTable, IdAllocator, InsertOutcome};
pub use wire::{CorrelationKey, ReplyBody, ScoreReply, ScoreRequest};
