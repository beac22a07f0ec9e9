//! Database initialization
//!
//! Creates the database file and every table on first run. All statements are
//! `CREATE TABLE IF NOT EXISTS`, so initialization is safe to repeat.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open (creating if needed) the database at `db_path` and ensure the schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets the scoring path read while writers insert posts
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database with the full schema
///
/// Limited to one connection: every SQLite `:memory:` connection is its own
/// database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables on an already-open pool
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    create_social_post_data_table(pool).await?;
    create_post_media_table(pool).await?;
    create_users_table(pool).await?;
    create_curation_modes_table(pool).await?;
    create_curation_heads_table(pool).await?;
    create_emerging_topic_tables(pool).await?;

    Ok(())
}

/// Scraped posts; `internal_id` is assigned by the ID claim protocol
async fn create_social_post_data_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS social_post_data (
            internal_id INTEGER PRIMARY KEY,
            post_id TEXT NOT NULL UNIQUE,
            embed_html TEXT NOT NULL DEFAULT '',
            text TEXT NOT NULL,
            create_utc INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_social_post_data_create_utc ON social_post_data(create_utc)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_post_media_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS post_media (
            internal_id INTEGER NOT NULL REFERENCES social_post_data(internal_id) ON DELETE CASCADE,
            kind TEXT NOT NULL CHECK (kind IN ('image', 'video')),
            position INTEGER NOT NULL,
            data_format TEXT NOT NULL,
            content BLOB NOT NULL,
            PRIMARY KEY (internal_id, kind, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            uid INTEGER PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            create_utc INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_curation_modes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS curation_modes (
            curation_id INTEGER PRIMARY KEY,
            curation_key TEXT NOT NULL UNIQUE,
            mode_name TEXT NOT NULL,
            owner_uid INTEGER REFERENCES users(uid) ON DELETE SET NULL,
            create_utc INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Classifier head parameters per curation mode, stored as JSON
async fn create_curation_heads_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS curation_heads (
            curation_id INTEGER PRIMARY KEY REFERENCES curation_modes(curation_id) ON DELETE CASCADE,
            params TEXT NOT NULL,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_emerging_topic_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS emerging_topic (
            topic_id INTEGER PRIMARY KEY AUTOINCREMENT,
            topic_key TEXT NOT NULL UNIQUE,
            topic_name TEXT NOT NULL,
            create_utc INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS emerging_topic_ngram (
            topic_id INTEGER NOT NULL REFERENCES emerging_topic(topic_id) ON DELETE CASCADE,
            ngram TEXT NOT NULL,
            PRIMARY KEY (topic_id, ngram)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS emerging_topic_regex (
            topic_id INTEGER PRIMARY KEY REFERENCES emerging_topic(topic_id) ON DELETE CASCADE,
            regex TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
