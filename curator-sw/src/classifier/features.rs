//! Feature extraction for classifier heads

use super::{ClassifierInput, ImageInput};
use curator_common::{Error, Result};
use sha2::{Digest, Sha256};

/// Bytes of encoded image hashed into one feature
const IMAGE_CHUNK_SIZE: usize = 4096;

/// Turns a post (text + image) into a fixed-length feature vector
pub trait FeatureExtractor: Send + Sync {
    /// Length of every vector returned by [`FeatureExtractor::extract`]
    fn dim(&self) -> usize;

    fn extract(&self, input: &ClassifierInput) -> Result<Vec<f32>>;
}

/// Signed feature hashing over text tokens and image chunks
///
/// Each token (and each image chunk) is hashed with SHA-256; the digest picks
/// a bucket and a sign. The vector is L2-normalized so post length does not
/// dominate the head's inputs.
#[derive(Debug, Clone)]
pub struct HashingFeatureExtractor {
    dim: usize,
}

impl HashingFeatureExtractor {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn add(&self, features: &mut [f32], namespace: &[u8], item: &[u8]) {
        let digest = Sha256::new()
            .chain_update(namespace)
            .chain_update(item)
            .finalize();

        let mut index = [0u8; 8];
        index.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(index) % self.dim as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };

        features[bucket] += sign;
    }
}

impl FeatureExtractor for HashingFeatureExtractor {
    fn dim(&self) -> usize {
        self.dim
    }

    fn extract(&self, input: &ClassifierInput) -> Result<Vec<f32>> {
        let mut features = vec![0.0f32; self.dim];

        let text = input.text.to_lowercase();
        for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            self.add(&mut features, b"text", token.as_bytes());
        }

        match &input.image {
            ImageInput::Encoded(bytes) => {
                if !infer::is_image(bytes) {
                    return Err(Error::InvalidInput(
                        "image bytes are not a recognized image format".to_string(),
                    ));
                }
                for chunk in bytes.chunks(IMAGE_CHUNK_SIZE) {
                    self.add(&mut features, b"image", chunk);
                }
            }
            ImageInput::Blank { width, height } => {
                let blank = format!("{}x{}", width, height);
                self.add(&mut features, b"blank", blank.as_bytes());
            }
        }

        let norm = features.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut features {
                *v /= norm;
            }
        }
        Ok(features)
    }
}
