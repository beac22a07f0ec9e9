//! Dispatcher ↔ worker message schema
//!
//! Frame payloads are JSON documents with an explicit schema so the wire format
//! does not depend on any one runtime's object serialization. Image bytes are
//! carried base64-encoded.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies which waiting caller a reply belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationKey {
    /// Caller identity (e.g. user or curation profile key)
    pub caller: String,
    /// Request identity, unique among the caller's in-flight requests
    pub request: String,
}

impl CorrelationKey {
    pub fn new(caller: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
            request: request.into(),
        }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.caller, self.request)
    }
}

/// One media attachment on a post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    /// Free-form format tag (e.g. "png", "mp4")
    pub data_format: String,
    pub content: Vec<u8>,
}

/// Text and media of a post as submitted for scoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostMedia {
    pub text: String,
    pub images: Vec<Media>,
    pub video: Vec<Media>,
}

impl PostMedia {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// The attachment handed to the classifier: last image, else last video frame
    pub fn representative_image(&self) -> Option<&[u8]> {
        self.images
            .last()
            .or_else(|| self.video.last())
            .map(|m| m.content.as_slice())
    }
}

/// Request frame sent from dispatcher to worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequest {
    #[serde(flatten)]
    pub key: CorrelationKey,
    /// Curation profile whose classifier head should score the post
    pub profile: String,
    pub text: String,
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Option::is_none")]
    pub image: Option<Vec<u8>>,
    pub has_image: bool,
}

impl ScoreRequest {
    pub fn new(
        key: CorrelationKey,
        profile: impl Into<String>,
        text: impl Into<String>,
        image: Option<Vec<u8>>,
    ) -> Self {
        let has_image = image.is_some();
        Self {
            key,
            profile: profile.into(),
            text: text.into(),
            image,
            has_image,
        }
    }

    /// Build a request from a post's media, picking the representative image
    pub fn from_post(key: CorrelationKey, profile: impl Into<String>, media: &PostMedia) -> Self {
        Self::new(
            key,
            profile,
            media.text.clone(),
            media.representative_image().map(<[u8]>::to_vec),
        )
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Protocol(format!("undecodable score request: {}", e)))
    }
}

/// Outcome carried by a reply frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyBody {
    Score(f32),
    Error(String),
}

/// Reply frame sent from worker to dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReply {
    #[serde(flatten)]
    pub key: CorrelationKey,
    pub body: ReplyBody,
}

impl ScoreReply {
    pub fn score(key: CorrelationKey, score: f32) -> Self {
        Self {
            key,
            body: ReplyBody::Score(score),
        }
    }

    pub fn error(key: CorrelationKey, message: impl Into<String>) -> Self {
        Self {
            key,
            body: ReplyBody::Error(message.into()),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Protocol(format!("undecodable score reply: {}", e)))
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_fields() {
        let request = ScoreRequest::new(
            CorrelationKey::new("user-1", "post-9"),
            "cats",
            "hello world",
            Some(vec![1, 2, 3]),
        );
        let json: serde_json::Value = serde_json::from_slice(&request.encode().unwrap()).unwrap();

        assert_eq!(json["caller"], "user-1");
        assert_eq!(json["request"], "post-9");
        assert_eq!(json["profile"], "cats");
        assert_eq!(json["text"], "hello world");
        assert_eq!(json["image"], "AQID");
        assert_eq!(json["has_image"], true);

        assert_eq!(ScoreRequest::decode(&request.encode().unwrap()).unwrap(), request);
    }

    #[test]
    fn test_request_without_image_omits_field() {
        let request = ScoreRequest::new(CorrelationKey::new("u", "r"), "p", "t", None);
        let json: serde_json::Value = serde_json::from_slice(&request.encode().unwrap()).unwrap();

        assert!(json.get("image").is_none());
        assert_eq!(json["has_image"], false);
        assert_eq!(ScoreRequest::decode(&request.encode().unwrap()).unwrap().image, None);
    }

    #[test]
    fn test_reply_bodies() {
        let ok = ScoreReply::score(CorrelationKey::new("u", "r"), 0.25);
        let json: serde_json::Value = serde_json::from_slice(&ok.encode().unwrap()).unwrap();
        assert_eq!(json["body"]["score"], 0.25);

        let err = ScoreReply::error(CorrelationKey::new("u", "r"), "bad image");
        let decoded = ScoreReply::decode(&err.encode().unwrap()).unwrap();
        assert_eq!(decoded.body, ReplyBody::Error("bad image".to_string()));
    }

    #[test]
    fn test_garbage_is_protocol_error() {
        assert!(matches!(ScoreReply::decode(b"\x00\x01not json"), Err(Error::Protocol(_))));
        assert!(matches!(ScoreRequest::decode(b"{}"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_representative_image_prefers_last_image_then_video() {
        let media = |b: u8| Media {
            data_format: "png".to_string(),
            content: vec![b],
        };

        let mut post = PostMedia::text_only("t");
        assert_eq!(post.representative_image(), None);

        post.video = vec![media(7), media(8)];
        assert_eq!(post.representative_image(), Some(&[8u8][..]));

        post.images = vec![media(1), media(2)];
        assert_eq!(post.representative_image(), Some(&[2u8][..]));
    }
}
