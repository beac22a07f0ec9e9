//! Curation mode storage
//!
//! A curation mode is a user-owned profile identified publicly by a random
//! `curation_key`; its classifier head parameters live in `curation_heads`.

use super::models::{CurationMode, HeadParams};
use super::{classify_insert_error, now_utc};
use crate::id_claim::{ClaimTable, IdAllocator, InsertOutcome};
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

struct CurationTable {
    pool: SqlitePool,
}

struct NewMode {
    key: String,
    name: String,
    owner_uid: Option<i64>,
    create_utc: i64,
}

#[async_trait]
impl ClaimTable for CurationTable {
    type Row = NewMode;

    fn table_name(&self) -> &str {
        "curation_modes"
    }

    async fn read_max_id(&self) -> Result<Option<i64>> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(curation_id) FROM curation_modes")
            .fetch_one(&self.pool)
            .await?;
        Ok(max)
    }

    async fn insert_with_id(&self, id: i64, mode: &NewMode) -> Result<InsertOutcome> {
        sqlx::query(
            r#"
            INSERT INTO curation_modes (curation_id, curation_key, mode_name, owner_uid, create_utc)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(&mode.key)
        .bind(&mode.name)
        .bind(mode.owner_uid)
        .bind(mode.create_utc)
        .execute(&self.pool)
        .await
        .map(|_| InsertOutcome::Inserted)
        .or_else(|e| classify_insert_error(e, "curation_modes", "curation_id"))
    }
}

#[derive(Clone)]
pub struct CurationModeStore {
    table: Arc<CurationTable>,
    ids: Arc<IdAllocator>,
}

impl CurationModeStore {
    pub async fn open(pool: SqlitePool, max_attempts: u32) -> Result<Self> {
        let table = CurationTable { pool };
        let ids = IdAllocator::load(&table, max_attempts).await?;
        Ok(Self {
            table: Arc::new(table),
            ids: Arc::new(ids),
        })
    }

    fn pool(&self) -> &SqlitePool {
        &self.table.pool
    }

    /// Create a curation mode with a fresh random key
    pub async fn create_mode(&self, owner_uid: Option<i64>, name: &str) -> Result<CurationMode> {
        let row = NewMode {
            key: Uuid::new_v4().simple().to_string(),
            name: name.to_string(),
            owner_uid,
            create_utc: now_utc(),
        };

        let curation_id = self.ids.claim_insert(self.table.as_ref(), &row).await?;
        info!(curation_id, key = %row.key, "Created curation mode");

        Ok(CurationMode {
            key: row.key,
            name: row.name,
        })
    }

    /// Delete a mode and (by cascade) its head
    pub async fn delete_mode(&self, key: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM curation_modes WHERE curation_key = ?")
            .bind(key)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("curation mode {}", key)));
        }
        info!(key, "Deleted curation mode");
        Ok(())
    }

    pub async fn get_mode(&self, key: &str) -> Result<CurationMode> {
        let (key, name) = sqlx::query_as::<_, (String, String)>(
            "SELECT curation_key, mode_name FROM curation_modes WHERE curation_key = ?",
        )
        .bind(key)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::NotFound(format!("curation mode {}", key)))?;

        Ok(CurationMode { key, name })
    }

    pub async fn modes_for_owner(&self, owner_uid: i64) -> Result<Vec<CurationMode>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT curation_key, mode_name FROM curation_modes
            WHERE owner_uid = ?
            ORDER BY curation_id
            "#,
        )
        .bind(owner_uid)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(key, name)| CurationMode { key, name })
            .collect())
    }

    /// Store (replace) the classifier head for a mode
    pub async fn set_head_params(&self, key: &str, params: &HeadParams) -> Result<()> {
        let json = serde_json::to_string(params)?;

        let result = sqlx::query(
            r#"
            INSERT INTO curation_heads (curation_id, params)
            SELECT curation_id, ? FROM curation_modes WHERE curation_key = ?
            ON CONFLICT(curation_id) DO UPDATE SET
                params = excluded.params,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(json)
        .bind(key)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("curation mode {}", key)));
        }
        Ok(())
    }

    pub async fn head_params(&self, key: &str) -> Result<Option<HeadParams>> {
        let json: Option<String> = sqlx::query_scalar(
            r#"
            SELECT h.params
            FROM curation_heads h
            JOIN curation_modes m ON m.curation_id = h.curation_id
            WHERE m.curation_key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(self.pool())
        .await?;

        json.map(|j| serde_json::from_str(&j).map_err(Error::from))
            .transpose()
    }

    /// Every stored head, keyed by curation key
    pub async fn all_heads(&self) -> Result<Vec<(String, HeadParams)>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT m.curation_key, h.params
            FROM curation_heads h
            JOIN curation_modes m ON m.curation_id = h.curation_id
            ORDER BY m.curation_id
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|(key, json)| -> Result<(String, HeadParams)> {
                Ok((key, serde_json::from_str(&json)?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;
    use crate::db::models::{HeadConfig, LayerParams};

    fn tiny_head() -> HeadParams {
        HeadParams {
            config: HeadConfig {
                input_dim: 2,
                hidden_dims: vec![],
                dropout: false,
            },
            layers: vec![LayerParams {
                weights: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
                bias: vec![0.0, 0.0],
            }],
        }
    }

    #[tokio::test]
    async fn test_create_and_delete_mode() {
        let modes = CurationModeStore::open(init_memory_database().await.unwrap(), 10)
            .await
            .unwrap();

        let cats = modes.create_mode(None, "cats").await.unwrap();
        let dogs = modes.create_mode(None, "dogs").await.unwrap();
        assert_ne!(cats.key, dogs.key);
        assert_eq!(modes.get_mode(&cats.key).await.unwrap(), cats);

        modes.delete_mode(&cats.key).await.unwrap();
        assert!(matches!(modes.get_mode(&cats.key).await, Err(Error::NotFound(_))));
        assert!(matches!(modes.delete_mode(&cats.key).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_head_params_upsert() {
        let modes = CurationModeStore::open(init_memory_database().await.unwrap(), 10)
            .await
            .unwrap();
        let mode = modes.create_mode(None, "cats").await.unwrap();

        assert_eq!(modes.head_params(&mode.key).await.unwrap(), None);

        let mut head = tiny_head();
        modes.set_head_params(&mode.key, &head).await.unwrap();
        head.layers[0].bias = vec![0.5, -0.5];
        modes.set_head_params(&mode.key, &head).await.unwrap();

        assert_eq!(modes.head_params(&mode.key).await.unwrap(), Some(head.clone()));
        assert_eq!(modes.all_heads().await.unwrap(), vec![(mode.key.clone(), head)]);
    }

    #[tokio::test]
    async fn test_head_for_unknown_mode_is_not_found() {
        let modes = CurationModeStore::open(init_memory_database().await.unwrap(), 10)
            .await
            .unwrap();
        assert!(matches!(
            modes.set_head_params("missing", &tiny_head()).await,
            Err(Error::NotFound(_))
        ));
    }
}
