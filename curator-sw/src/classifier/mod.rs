//! Classifier invoked by the scoring worker
//!
//! The worker only depends on the [`Classifier`] trait. The shipped
//! implementation, [`HeadClassifier`], keeps one [`ClassifierHead`] per
//! curation profile and feeds it vectors from a [`FeatureExtractor`].

pub mod features;
pub mod head;

pub use features::{FeatureExtractor, HashingFeatureExtractor};
pub use head::ClassifierHead;

use curator_common::db::CurationModeStore;
use curator_common::wire::ScoreRequest;
use curator_common::{Error, Result};
use std::collections::HashMap;
use tracing::{info, warn};

/// Side length of the placeholder image used for text-only posts
pub const BLANK_IMAGE_SIZE: u32 = 1000;

/// Image half of a classifier input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageInput {
    /// Encoded image file bytes as attached to the post
    Encoded(Vec<u8>),
    /// Placeholder for posts without media
    Blank { width: u32, height: u32 },
}

impl ImageInput {
    pub fn blank() -> Self {
        ImageInput::Blank {
            width: BLANK_IMAGE_SIZE,
            height: BLANK_IMAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierInput {
    pub image: ImageInput,
    pub text: String,
    pub has_image: bool,
}

impl ClassifierInput {
    /// Split a request into its profile and the classifier input
    pub fn from_request(request: ScoreRequest) -> (String, Self) {
        let (image, has_image) = match request.image {
            Some(bytes) => (ImageInput::Encoded(bytes), true),
            None => (ImageInput::blank(), false),
        };

        (
            request.profile,
            Self {
                image,
                text: request.text,
                has_image,
            },
        )
    }
}

/// Scores one post for one curation profile
pub trait Classifier: Send + Sync {
    /// Score in [0, 1]
    fn classify(&self, profile: &str, input: &ClassifierInput) -> Result<f32>;
}

/// Per-profile classifier heads over a shared feature extractor
pub struct HeadClassifier<E> {
    extractor: E,
    heads: HashMap<String, ClassifierHead>,
}

impl<E: FeatureExtractor> HeadClassifier<E> {
    pub fn new(extractor: E) -> Self {
        Self {
            extractor,
            heads: HashMap::new(),
        }
    }

    /// Load every stored head whose input size matches the extractor
    ///
    /// Heads that fail validation are skipped with a warning so one bad
    /// profile does not take the worker down.
    pub async fn load(extractor: E, modes: &CurationModeStore) -> Result<Self> {
        let mut classifier = Self::new(extractor);

        for (profile, params) in modes.all_heads().await? {
            let head = match ClassifierHead::from_params(&params) {
                Ok(head) => head,
                Err(e) => {
                    warn!(profile = %profile, error = %e, "Skipping invalid classifier head");
                    continue;
                }
            };
            if let Err(e) = classifier.insert_head(profile.clone(), head) {
                warn!(profile = %profile, error = %e, "Skipping classifier head");
            }
        }

        info!(heads = classifier.heads.len(), "Loaded classifier heads");
        Ok(classifier)
    }

    /// Install (or replace) the head for a profile
    pub fn insert_head(&mut self, profile: impl Into<String>, head: ClassifierHead) -> Result<()> {
        if head.input_dim() != self.extractor.dim() {
            return Err(Error::InvalidInput(format!(
                "head input_dim {} does not match feature dimension {}",
                head.input_dim(),
                self.extractor.dim()
            )));
        }
        self.heads.insert(profile.into(), head);
        Ok(())
    }

    pub fn profiles(&self) -> impl Iterator<Item = &str> {
        self.heads.keys().map(String::as_str)
    }
}

impl<E: FeatureExtractor> Classifier for HeadClassifier<E> {
    fn classify(&self, profile: &str, input: &ClassifierInput) -> Result<f32> {
        let head = self
            .heads
            .get(profile)
            .ok_or_else(|| Error::NotFound(format!("classifier head for profile {}", profile)))?;

        let features = self.extractor.extract(input)?;
        head.score(&features)
    }
}
