//! Post storage
//!
//! `internal_id` is minted by the claim protocol; `post_id` is the platform's
//! own identifier and is unique on its own.

use super::classify_insert_error;
use super::models::{NewPost, PostRecord};
use crate::id_claim::{ClaimTable, IdAllocator, InsertOutcome};
use crate::wire::{Media, PostMedia};
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};

const TABLE: &str = "social_post_data";

/// Claim-protocol view of `social_post_data`
struct PostTable {
    pool: SqlitePool,
}

#[async_trait]
impl ClaimTable for PostTable {
    type Row = NewPost;

    fn table_name(&self) -> &str {
        TABLE
    }

    async fn read_max_id(&self) -> Result<Option<i64>> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(internal_id) FROM social_post_data")
            .fetch_one(&self.pool)
            .await?;
        Ok(max)
    }

    async fn insert_with_id(&self, id: i64, post: &NewPost) -> Result<InsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO social_post_data (internal_id, post_id, embed_html, text, create_utc)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(&post.post_id)
        .bind(&post.embed_html)
        .bind(&post.media.text)
        .bind(post.create_utc)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            // Dropping `tx` rolls back
            return classify_insert_error(e, TABLE, "internal_id");
        }

        for (kind, items) in [("image", &post.media.images), ("video", &post.media.video)] {
            for (position, media) in items.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO post_media (internal_id, kind, position, data_format, content)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(id)
                .bind(kind)
                .bind(position as i64)
                .bind(&media.data_format)
                .bind(&media.content)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(InsertOutcome::Inserted)
    }
}

/// Post store with its process-wide ID allocator
#[derive(Clone)]
pub struct PostStore {
    table: Arc<PostTable>,
    ids: Arc<IdAllocator>,
}

impl PostStore {
    /// Open the store, synchronizing a new allocator with the persisted maximum
    pub async fn open(pool: SqlitePool, max_attempts: u32) -> Result<Self> {
        let table = PostTable { pool };
        let ids = IdAllocator::load(&table, max_attempts).await?;
        Ok(Self {
            table: Arc::new(table),
            ids: Arc::new(ids),
        })
    }

    /// Open the store sharing an existing allocator
    pub fn with_allocator(pool: SqlitePool, ids: Arc<IdAllocator>) -> Self {
        Self {
            table: Arc::new(PostTable { pool }),
            ids,
        }
    }

    pub fn allocator(&self) -> Arc<IdAllocator> {
        Arc::clone(&self.ids)
    }

    fn pool(&self) -> &SqlitePool {
        &self.table.pool
    }

    /// Insert a post and its media, returning the stored record
    ///
    /// # Errors
    /// - `Error::Duplicate` if a post with the same `post_id` exists
    /// - `Error::ClaimExhausted` if ID conflicts persist
    pub async fn insert_post(&self, post: &NewPost) -> Result<PostRecord> {
        let internal_id = self.ids.claim_insert(self.table.as_ref(), post).await?;
        info!(post_id = %post.post_id, internal_id, "Inserted post");

        Ok(PostRecord {
            internal_id,
            post_id: post.post_id.clone(),
            embed_html: post.embed_html.clone(),
            text: post.media.text.clone(),
            create_utc: post.create_utc,
        })
    }

    pub async fn contains(&self, post_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM social_post_data WHERE post_id = ?)",
        )
        .bind(post_id)
        .fetch_one(self.pool())
        .await?;
        Ok(exists)
    }

    /// Look up a post by its platform identifier
    pub async fn get(&self, post_id: &str) -> Result<PostRecord> {
        let row = sqlx::query_as::<_, (i64, String, String, String, i64)>(
            r#"
            SELECT internal_id, post_id, embed_html, text, create_utc
            FROM social_post_data
            WHERE post_id = ?
            "#,
        )
        .bind(post_id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::NotFound(format!("post {}", post_id)))?;

        Ok(record_from_row(row))
    }

    /// Text plus stored media for a post
    pub async fn media(&self, post_id: &str) -> Result<PostMedia> {
        let record = self.get(post_id).await?;

        let rows = sqlx::query_as::<_, (String, String, Vec<u8>)>(
            r#"
            SELECT kind, data_format, content
            FROM post_media
            WHERE internal_id = ?
            ORDER BY kind, position
            "#,
        )
        .bind(record.internal_id)
        .fetch_all(self.pool())
        .await?;

        let mut media = PostMedia::text_only(record.text);
        for (kind, data_format, content) in rows {
            let item = Media {
                data_format,
                content,
            };
            match kind.as_str() {
                "image" => media.images.push(item),
                _ => media.video.push(item),
            }
        }

        debug!(
            post_id,
            images = media.images.len(),
            video = media.video.len(),
            "Loaded post media"
        );
        Ok(media)
    }

    /// Newest posts created strictly before `before`
    pub async fn recent_posts(&self, before: i64, count: u32) -> Result<Vec<PostRecord>> {
        let rows = sqlx::query_as::<_, (i64, String, String, String, i64)>(
            r#"
            SELECT internal_id, post_id, embed_html, text, create_utc
            FROM social_post_data
            WHERE create_utc < ?
            ORDER BY create_utc DESC, internal_id DESC
            LIMIT ?
            "#,
        )
        .bind(before)
        .bind(count as i64)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(record_from_row).collect())
    }
}

fn record_from_row(row: (i64, String, String, String, i64)) -> PostRecord {
    PostRecord {
        internal_id: row.0,
        post_id: row.1,
        embed_html: row.2,
        text: row.3,
        create_utc: row.4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;
    use crate::id_claim::DEFAULT_MAX_ATTEMPTS;

    async fn store() -> PostStore {
        let pool = init_memory_database().await.unwrap();
        PostStore::open(pool, DEFAULT_MAX_ATTEMPTS).await.unwrap()
    }

    #[tokio::test]
    async fn test_first_post_gets_id_zero() {
        let posts = store().await;
        let record = posts
            .insert_post(&NewPost::text_only("reddit/abc", "hello world", 100))
            .await
            .unwrap();

        assert_eq!(record.internal_id, 0);
        assert!(posts.contains("reddit/abc").await.unwrap());
        assert_eq!(posts.get("reddit/abc").await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_duplicate_post_id_is_not_retried() {
        let posts = store().await;
        posts
            .insert_post(&NewPost::text_only("p1", "a", 1))
            .await
            .unwrap();

        let result = posts.insert_post(&NewPost::text_only("p1", "b", 2)).await;
        assert!(matches!(result, Err(Error::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_stale_allocator_resyncs_against_other_writer() {
        let pool = init_memory_database().await.unwrap();
        let first = PostStore::open(pool.clone(), DEFAULT_MAX_ATTEMPTS).await.unwrap();
        // Second store loaded at the same time models a second process
        let second = PostStore::open(pool, DEFAULT_MAX_ATTEMPTS).await.unwrap();

        let a = first.insert_post(&NewPost::text_only("a", "a", 1)).await.unwrap();
        let b = second.insert_post(&NewPost::text_only("b", "b", 2)).await.unwrap();
        let c = first.insert_post(&NewPost::text_only("c", "c", 3)).await.unwrap();

        assert_eq!(a.internal_id, 0);
        assert_eq!(b.internal_id, 1);
        assert_eq!(c.internal_id, 2);
    }

    #[tokio::test]
    async fn test_media_roundtrip() {
        let posts = store().await;
        let mut post = NewPost::text_only("m", "with pictures", 5);
        post.media.images.push(Media {
            data_format: "png".to_string(),
            content: vec![1, 2, 3],
        });
        post.media.video.push(Media {
            data_format: "mp4".to_string(),
            content: vec![9],
        });
        posts.insert_post(&post).await.unwrap();

        let media = posts.media("m").await.unwrap();
        assert_eq!(media, post.media);
    }

    #[tokio::test]
    async fn test_missing_post_is_not_found() {
        let posts = store().await;
        assert!(matches!(posts.get("nope").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_recent_posts_before_timestamp() {
        let posts = store().await;
        for (id, t) in [("a", 10), ("b", 20), ("c", 30), ("d", 40)] {
            posts.insert_post(&NewPost::text_only(id, id, t)).await.unwrap();
        }

        let recent = posts.recent_posts(35, 2).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|p| p.post_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }
}
