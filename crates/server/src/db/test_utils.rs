#![allow(dead_code)]

use std::path::PathBuf;

use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::{
    config::Config,
    db::Database,
    middleware::auth::{AuthUser, RequestContext},
};

pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

// Every connection to `sqlite::memory:` opens a fresh database, so the pool is
// pinned to a single connection that never expires.
pub(crate) async fn setup_test_db() -> anyhow::Result<Database> {
    init_test_tracing();

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    let db = Database { pool };
    db.run_migrations().await?;
    Ok(db)
}

/// A file-backed database opened through [`Database::connect`], so tests see
/// the production pool of several connections contending for SQLite's write
/// lock. The directory is removed on drop.
pub(crate) struct FileDb {
    pub db: Database,
    dir: PathBuf,
}

impl Drop for FileDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

pub(crate) async fn setup_file_db() -> anyhow::Result<FileDb> {
    init_test_tracing();

    let dir = std::env::temp_dir().join(format!("crowdhub-db-{}", Uuid::new_v4()));
    let url = format!("sqlite:{}?mode=rwc", dir.join("test.db").display());

    let db = Database::connect(&url).await?;
    db.run_migrations().await?;
    Ok(FileDb { db, dir })
}

pub(crate) fn test_config(upload_path: &str) -> Config {
    Config {
        port: 0,
        database_url: "sqlite::memory:".to_string(),
        upload_path: upload_path.to_string(),
        static_dir: "./static".to_string(),
        jwt_secret: "test-secret".to_string(),
        reply_max_depth: 16,
        min_description_words: 50,
    }
}

pub(crate) fn ctx(user: &AuthUser) -> RequestContext {
    RequestContext::for_user(user.clone())
}

pub(crate) async fn seed_user(pool: &SqlitePool, username: &str) -> anyhow::Result<AuthUser> {
    let id = Uuid::new_v4().to_string();
    let full_name = format!("{username} Tester");

    sqlx::query(
        "INSERT INTO users (id, username, email, full_name, college, password_hash, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(username)
    .bind(format!("{username}@example.com"))
    .bind(&full_name)
    .bind("Test College")
    .bind("not-a-real-hash")
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(AuthUser {
        id,
        username: username.to_string(),
        full_name,
    })
}

pub(crate) async fn seed_project(
    pool: &SqlitePool,
    owner_id: &str,
    title: &str,
) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO projects (id, title, description, category, funding_goal, status, owner_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, 'active', ?, ?, ?)",
    )
    .bind(&id)
    .bind(title)
    .bind("A project used by tests")
    .bind("technology")
    .bind(1000.0)
    .bind(owner_id)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(id)
}

pub(crate) async fn seed_comment(
    pool: &SqlitePool,
    project_id: &str,
    author_id: &str,
) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO comments (id, project_id, author_id, content, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(project_id)
    .bind(author_id)
    .bind("Nice work")
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(id)
}

pub(crate) async fn seed_discussion(
    pool: &SqlitePool,
    author_id: &str,
    title: &str,
) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO discussions (id, title, content, category, tags, author_id, created_at, updated_at) VALUES (?, ?, ?, ?, '', ?, ?, ?)",
    )
    .bind(&id)
    .bind(title)
    .bind("Let's talk about it")
    .bind("general")
    .bind(author_id)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(id)
}

pub(crate) async fn seed_reply(
    pool: &SqlitePool,
    discussion_id: &str,
    parent_reply_id: Option<&str>,
    author_id: &str,
) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO discussion_replies (id, discussion_id, parent_reply_id, author_id, content, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(discussion_id)
    .bind(parent_reply_id)
    .bind(author_id)
    .bind("A reply")
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(id)
}

pub(crate) async fn notification_count(
    pool: &SqlitePool,
    recipient: &str,
    kind: &str,
) -> anyhow::Result<i64> {
    Ok(sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND kind = ?",
    )
    .bind(recipient)
    .bind(kind)
    .fetch_one(pool)
    .await?)
}
