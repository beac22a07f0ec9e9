//! Ensemble Scorer
//!
//! Combines three independent signals for one post under one curation mode:
//! 1. Classifier score from the scoring worker (via the dispatcher)
//! 2. N-gram trending filter hit
//! 3. Regex trending filter hit
//!
//! The signals run concurrently and are joined before combination; either
//! filter hit forces the final score to 1.0, otherwise the classifier score
//! is used. A classifier failure counts as score 0.

use crate::filters::{contains_all, matches_at_start, ngram_set, normalize_for_regex, MAX_NGRAM};
use async_trait::async_trait;
use curator_common::db::{CurationMode, PostStore, TopicStore};
use curator_common::wire::{CorrelationKey, PostMedia, ScoreRequest};
use curator_common::{Error, Result};
use futures::future::join_all;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dispatcher::ScoreDispatcher;

/// Score reported for a post whose ensemble failed
pub const FAILED_SCORE: f32 = -1e9;

/// Profile that scores every post 0 without contacting the worker
pub const PROFILE_ALL: &str = "all";

/// Profile that scores every post uniformly at random without contacting the worker
pub const PROFILE_HALF: &str = "half";

/// Source of learned classifier scores
#[async_trait]
pub trait ClassifierSignal: Send + Sync {
    async fn classifier_score(&self, profile: &str, post_id: &str, media: &PostMedia) -> Result<f32>;
}

/// Source of post text and media
#[async_trait]
pub trait PostSource: Send + Sync {
    async fn post_content(&self, post_id: &str) -> Result<PostMedia>;
}

/// Source of trending-filter rules by topic key
#[async_trait]
pub trait FilterSource: Send + Sync {
    /// Required n-grams of a topic (empty means the topic has no n-gram rule)
    async fn ngram_terms(&self, topic: &str) -> Result<Vec<String>>;

    /// Compiled regex of a topic
    async fn regex(&self, topic: &str) -> Result<Regex>;
}

#[async_trait]
impl ClassifierSignal for ScoreDispatcher {
    async fn classifier_score(&self, profile: &str, post_id: &str, media: &PostMedia) -> Result<f32> {
        // Request id is unique even if the same post is scored twice at once
        let key = CorrelationKey::new(profile, format!("{}#{}", post_id, Uuid::new_v4().simple()));
        let request = ScoreRequest::from_post(key, profile, media);
        self.score_with_default_timeout(request).await
    }
}

#[async_trait]
impl PostSource for PostStore {
    async fn post_content(&self, post_id: &str) -> Result<PostMedia> {
        self.media(post_id).await
    }
}

#[async_trait]
impl FilterSource for TopicStore {
    async fn ngram_terms(&self, topic: &str) -> Result<Vec<String>> {
        TopicStore::ngram_terms(self, topic).await
    }

    async fn regex(&self, topic: &str) -> Result<Regex> {
        TopicStore::regex(self, topic).await
    }
}

/// Curation mode plus the trending topics whose filters apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurationSettings {
    pub curation_mode: CurationMode,
    pub trending_filters: Vec<CurationMode>,
}

impl CurationSettings {
    pub fn new(curation_mode: CurationMode) -> Self {
        Self {
            curation_mode,
            trending_filters: Vec::new(),
        }
    }

    pub fn with_trending_filters(mut self, filters: Vec<CurationMode>) -> Self {
        self.trending_filters = filters;
        self
    }
}

/// Per-signal outcome and combined score for one post
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnsembleResult {
    /// Classifier score in [0, 1]; 0 if the classifier failed
    pub classifier_score: f32,
    pub ngram_hit: bool,
    pub regex_hit: bool,
    pub final_score: f32,
}

impl EnsembleResult {
    /// Apply the short-circuit policy: any filter hit → 1.0
    pub fn combine(classifier_score: f32, ngram_hit: bool, regex_hit: bool) -> Self {
        let final_score = if ngram_hit || regex_hit {
            1.0
        } else {
            classifier_score
        };

        Self {
            classifier_score,
            ngram_hit,
            regex_hit,
            final_score,
        }
    }
}

/// Batch scoring outcome for one post
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostScore {
    pub post_id: String,
    pub success: bool,
    pub score: f32,
}

/// Runs the three scoring signals for posts under a curation mode
#[derive(Clone)]
pub struct EnsembleScorer {
    classifier: Arc<dyn ClassifierSignal>,
    posts: Arc<dyn PostSource>,
    filters: Arc<dyn FilterSource>,
}

impl EnsembleScorer {
    pub fn new(
        classifier: Arc<dyn ClassifierSignal>,
        posts: Arc<dyn PostSource>,
        filters: Arc<dyn FilterSource>,
    ) -> Self {
        Self {
            classifier,
            posts,
            filters,
        }
    }

    /// Score one post
    ///
    /// # Errors
    /// Only post lookup failures; signal failures degrade to "no hit" / 0.
    pub async fn score(&self, post_id: &str, settings: &CurationSettings) -> Result<EnsembleResult> {
        let media = self.posts.post_content(post_id).await?;

        let (classifier_score, ngram_hit, regex_hit) = tokio::join!(
            self.classifier_signal(post_id, &settings.curation_mode, &media),
            self.ngram_signal(&media.text, &settings.trending_filters),
            self.regex_signal(&media.text, &settings.trending_filters),
        );

        let result = EnsembleResult::combine(classifier_score, ngram_hit, regex_hit);
        debug!(
            post_id,
            mode = %settings.curation_mode.key,
            classifier_score,
            ngram_hit,
            regex_hit,
            final_score = result.final_score,
            "Ensemble scored post"
        );
        Ok(result)
    }

    /// Score many posts concurrently; results keep the input order
    pub async fn score_many(&self, post_ids: &[String], settings: &CurationSettings) -> Vec<PostScore> {
        let tasks = post_ids.iter().map(|post_id| async move {
            match self.score(post_id, settings).await {
                Ok(result) => PostScore {
                    post_id: post_id.clone(),
                    success: true,
                    score: result.final_score,
                },
                Err(e) => {
                    warn!(post_id = %post_id, error = %e, "Failed to score post");
                    PostScore {
                        post_id: post_id.clone(),
                        success: false,
                        score: FAILED_SCORE,
                    }
                }
            }
        });

        join_all(tasks).await
    }

    async fn classifier_signal(&self, post_id: &str, mode: &CurationMode, media: &PostMedia) -> f32 {
        let raw = match mode.key.as_str() {
            PROFILE_ALL => return 0.0,
            PROFILE_HALF => return rand::random::<f32>(),
            profile => self.classifier.classifier_score(profile, post_id, media).await,
        };

        match raw {
            Ok(score) if score.is_nan() => {
                warn!(post_id, mode = %mode.key, "Classifier returned NaN, using 0");
                0.0
            }
            Ok(score) => score.clamp(0.0, 1.0),
            Err(e) => {
                warn!(post_id, mode = %mode.key, error = %e, "Classifier signal failed, using 0");
                0.0
            }
        }
    }

    async fn ngram_signal(&self, text: &str, topics: &[CurationMode]) -> bool {
        if topics.is_empty() {
            return false;
        }

        let grams = ngram_set(text, MAX_NGRAM);
        for topic in topics {
            match self.filters.ngram_terms(&topic.key).await {
                Ok(terms) if contains_all(&grams, &terms) => {
                    debug!(topic = %topic.key, "N-gram filter hit");
                    return true;
                }
                Ok(_) => {}
                Err(e) => warn!(topic = %topic.key, error = %e, "Skipping topic n-gram filter"),
            }
        }
        false
    }

    async fn regex_signal(&self, text: &str, topics: &[CurationMode]) -> bool {
        if topics.is_empty() {
            return false;
        }

        let normalized = normalize_for_regex(text);
        for topic in topics {
            match self.filters.regex(&topic.key).await {
                Ok(pattern) if matches_at_start(&pattern, &normalized) => {
                    debug!(topic = %topic.key, "Regex filter hit");
                    return true;
                }
                Ok(_) | Err(Error::NotFound(_)) => {}
                Err(e) => warn!(topic = %topic.key, error = %e, "Skipping topic regex filter"),
            }
        }
        false
    }
}
