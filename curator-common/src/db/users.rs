//! User storage

use super::models::User;
use super::{classify_insert_error, now_utc};
use crate::id_claim::{ClaimTable, IdAllocator, InsertOutcome};
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

struct UserTable {
    pool: SqlitePool,
}

struct NewUser {
    email: String,
    create_utc: i64,
}

#[async_trait]
impl ClaimTable for UserTable {
    type Row = NewUser;

    fn table_name(&self) -> &str {
        "users"
    }

    async fn read_max_id(&self) -> Result<Option<i64>> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(uid) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(max)
    }

    async fn insert_with_id(&self, id: i64, user: &NewUser) -> Result<InsertOutcome> {
        sqlx::query("INSERT INTO users (uid, email, create_utc) VALUES (?, ?, ?)")
            .bind(id)
            .bind(&user.email)
            .bind(user.create_utc)
            .execute(&self.pool)
            .await
            .map(|_| InsertOutcome::Inserted)
            .or_else(|e| classify_insert_error(e, "users", "uid"))
    }
}

#[derive(Clone)]
pub struct UserStore {
    table: Arc<UserTable>,
    ids: Arc<IdAllocator>,
}

impl UserStore {
    pub async fn open(pool: SqlitePool, max_attempts: u32) -> Result<Self> {
        let table = UserTable { pool };
        let ids = IdAllocator::load(&table, max_attempts).await?;
        Ok(Self {
            table: Arc::new(table),
            ids: Arc::new(ids),
        })
    }

    /// Register a new user
    ///
    /// # Errors
    /// `Error::Duplicate` if the email is already registered.
    pub async fn sign_up(&self, email: &str) -> Result<User> {
        let email = email.trim();
        if email.is_empty() {
            return Err(Error::InvalidInput("email must not be empty".to_string()));
        }

        let row = NewUser {
            email: email.to_string(),
            create_utc: now_utc(),
        };
        let uid = self.ids.claim_insert(self.table.as_ref(), &row).await?;
        info!(uid, "Signed up user");

        Ok(User {
            uid,
            email: row.email,
            create_utc: row.create_utc,
        })
    }

    pub async fn get_by_email(&self, email: &str) -> Result<User> {
        let row = sqlx::query_as::<_, (i64, String, i64)>(
            "SELECT uid, email, create_utc FROM users WHERE email = ?",
        )
        .bind(email.trim())
        .fetch_optional(&self.table.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {}", email)))?;

        Ok(User {
            uid: row.0,
            email: row.1,
            create_utc: row.2,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;

    #[tokio::test]
    async fn test_sign_up_assigns_sequential_uids() {
        let users = UserStore::open(init_memory_database().await.unwrap(), 10)
            .await
            .unwrap();

        let a = users.sign_up("a@example.com").await.unwrap();
        let b = users.sign_up("b@example.com").await.unwrap();
        assert_eq!((a.uid, b.uid), (0, 1));
        assert_eq!(users.get_by_email("b@example.com").await.unwrap(), b);
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let users = UserStore::open(init_memory_database().await.unwrap(), 10)
            .await
            .unwrap();

        users.sign_up("a@example.com").await.unwrap();
        assert!(matches!(
            users.sign_up("a@example.com").await,
            Err(Error::Duplicate(_))
        ));
        assert!(matches!(users.sign_up("  ").await, Err(Error::InvalidInput(_))));
    }
}
