//! # Curator Scoring Worker Library (curator-sw)
//!
//! **Purpose:** Serve classifier scores to one dispatcher over a framed TCP
//! connection, strictly one request at a time.
//!
//! **Architecture:** [`worker::ScoringWorker`] owns both halves of the
//! connection and calls a [`classifier::Classifier`] for each request. The
//! shipped classifier is a set of per-profile dense heads over hashed
//! text/image features.

pub mod classifier;
pub mod worker;

pub use classifier::{Classifier, ClassifierInput, HeadClassifier, ImageInput};
pub use worker::{serve_one, ScoringWorker, WorkerStats};
