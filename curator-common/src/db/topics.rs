//! Emerging-topic filter storage
//!
//! A topic can carry a list of required n-grams and/or one regex. Both are
//! read by the ensemble's filter signals.

use super::models::EmergingTopic;
use crate::{Error, Result};
use regex::Regex;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

#[derive(Clone)]
pub struct TopicStore {
    pool: SqlitePool,
    /// Compiled patterns by topic key; patterns never change once stored
    regex_cache: Arc<RwLock<HashMap<String, Regex>>>,
}

impl TopicStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            regex_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a topic with its n-gram terms and optional regex
    pub async fn create_topic(
        &self,
        key: &str,
        name: &str,
        create_utc: i64,
        ngrams: &[&str],
        regex: Option<&str>,
    ) -> Result<EmergingTopic> {
        if let Some(pattern) = regex {
            Regex::new(pattern)
                .map_err(|e| Error::InvalidInput(format!("invalid topic regex: {}", e)))?;
        }

        let mut tx = self.pool.begin().await?;

        let topic_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO emerging_topic (topic_key, topic_name, create_utc)
            VALUES (?, ?, ?)
            RETURNING topic_id
            "#,
        )
        .bind(key)
        .bind(name)
        .bind(create_utc)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            let duplicate = matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation());
            if duplicate {
                Error::Duplicate(format!("topic {}", key))
            } else {
                Error::Database(e)
            }
        })?;

        for ngram in ngrams {
            sqlx::query("INSERT OR IGNORE INTO emerging_topic_ngram (topic_id, ngram) VALUES (?, ?)")
                .bind(topic_id)
                .bind(*ngram)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(pattern) = regex {
            sqlx::query("INSERT INTO emerging_topic_regex (topic_id, regex) VALUES (?, ?)")
                .bind(topic_id)
                .bind(pattern)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!(key, ngrams = ngrams.len(), has_regex = regex.is_some(), "Created emerging topic");

        Ok(EmergingTopic {
            key: key.to_string(),
            name: name.to_string(),
            create_utc,
        })
    }

    /// Required n-grams for a topic (empty if none are stored)
    pub async fn ngram_terms(&self, key: &str) -> Result<Vec<String>> {
        let terms: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT n.ngram
            FROM emerging_topic t
            JOIN emerging_topic_ngram n ON n.topic_id = t.topic_id
            WHERE t.topic_key = ?
            "#,
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await?;
        Ok(terms)
    }

    /// Compiled regex for a topic
    ///
    /// # Errors
    /// `Error::NotFound` if the topic has no regex.
    pub async fn regex(&self, key: &str) -> Result<Regex> {
        let cached = self
            .regex_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        if let Some(regex) = cached {
            return Ok(regex);
        }

        let pattern: String = sqlx::query_scalar(
            r#"
            SELECT r.regex
            FROM emerging_topic t
            JOIN emerging_topic_regex r ON r.topic_id = t.topic_id
            WHERE t.topic_key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("regex for topic {}", key)))?;

        let compiled = Regex::new(&pattern)
            .map_err(|e| Error::Internal(format!("stored regex for {} is invalid: {}", key, e)))?;
        debug!(key, "Compiled topic regex");

        self.regex_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), compiled.clone());
        Ok(compiled)
    }

    /// Topics created in `[from_utc, to_utc)`
    pub async fn emerging_topics(&self, from_utc: i64, to_utc: i64) -> Result<Vec<EmergingTopic>> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            r#"
            SELECT topic_key, topic_name, create_utc
            FROM emerging_topic
            WHERE create_utc >= ? AND create_utc < ?
            ORDER BY create_utc
            "#,
        )
        .bind(from_utc)
        .bind(to_utc)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(key, name, create_utc)| EmergingTopic {
                key,
                name,
                create_utc,
            })
            .collect())
    }
}
