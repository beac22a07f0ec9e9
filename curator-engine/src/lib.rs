//! # Curator Engine Library
//!
//! Scoring core embedded in each curator front-end process.
//!
//! **Purpose:** Multiplex concurrent scoring requests onto the single scoring
//! worker connection, and combine the worker's classifier score with the
//! rule-based trending filters into one decision per post.
//!
//! **Architecture:** one [`ScoreDispatcher`] per worker connection (Reply
//! Router task + serialized frame writes), one [`EnsembleScorer`] per process.

pub mod dispatcher;
pub mod ensemble;
pub mod filters;

pub use dispatcher::{ReplyHandle, ScoreDispatcher};
pub use ensemble::{
    ClassifierSignal, CurationSettings, EnsembleResult, EnsembleScorer, FilterSource, PostScore,
    PostSource, FAILED_SCORE,
};
