//! Database models

use crate::wire::PostMedia;
use serde::{Deserialize, Serialize};

/// A stored post (without media)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub internal_id: i64,
    /// External (social platform) identifier
    pub post_id: String,
    pub embed_html: String,
    pub text: String,
    pub create_utc: i64,
}

/// A post about to be inserted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub post_id: String,
    pub embed_html: String,
    pub create_utc: i64,
    pub media: PostMedia,
}

impl NewPost {
    pub fn text_only(post_id: impl Into<String>, text: impl Into<String>, create_utc: i64) -> Self {
        Self {
            post_id: post_id.into(),
            embed_html: String::new(),
            create_utc,
            media: PostMedia::text_only(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: i64,
    pub email: String,
    pub create_utc: i64,
}

/// A named curation profile (also used for trending-filter topics)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurationMode {
    pub key: String,
    pub name: String,
}

impl CurationMode {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergingTopic {
    pub key: String,
    pub name: String,
    pub create_utc: i64,
}

/// Shape of a classifier head: `input_dim → hidden_dims… → 2`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadConfig {
    pub input_dim: usize,
    pub hidden_dims: Vec<usize>,
    /// Trained with dropout after each hidden layer (identity at inference)
    #[serde(default)]
    pub dropout: bool,
}

/// One dense layer, `weights[out][in]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerParams {
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}

/// Stored parameters of one curation mode's classifier head
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadParams {
    pub config: HeadConfig,
    pub layers: Vec<LayerParams>,
}
