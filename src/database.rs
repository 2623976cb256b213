//! Database operations
//!
//! Two collaborator roles live here: the message store (durable
//! append-only chat log) and the identity provider (account existence
//! and coarse online/offline status). Account CRUD itself belongs to
//! the REST side of the backend; `create_user` is the provisioning seam.

use anyhow::Result;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, FromRow, Pool, Sqlite};
use tracing::info;

/// One record of the chat log. Exactly one of `receiver` / `team_id` is
/// set by the router; the store itself does not enforce that shape.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct StoredMessage {
    pub id: i64,
    pub sender: String,
    pub receiver: Option<String>,
    pub team_id: Option<String>,
    pub body: String,
    pub created_at: i64,
}

/// Initialize the database connection pool
pub async fn init(database_url: &str) -> Result<Pool<Sqlite>> {
    // Create database file if it doesn't exist
    if !sqlx::Sqlite::database_exists(database_url).await.unwrap_or(false) {
        info!("Creating database at {}", database_url);
        sqlx::Sqlite::create_database(database_url).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    info!("Running database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            username TEXT PRIMARY KEY,
            display_name TEXT,
            status TEXT NOT NULL DEFAULT 'offline',
            last_seen INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sender TEXT NOT NULL,
            receiver TEXT,
            team_id TEXT,
            body TEXT NOT NULL,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            FOREIGN KEY (sender) REFERENCES users(username)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_messages_receiver_time
        ON messages(receiver, created_at);
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_messages_team_time
        ON messages(team_id, created_at);
        "#,
    )
    .execute(pool)
    .await?;

    info!("Migrations completed successfully");
    Ok(())
}

// ---------------------------------------------------------------------------
// Message store
// ---------------------------------------------------------------------------

/// Append one message to the log. The store assigns id and timestamp.
pub async fn append_message(
    pool: &Pool<Sqlite>,
    sender: &str,
    receiver: Option<&str>,
    team_id: Option<&str>,
    body: &str,
) -> Result<StoredMessage> {
    let message = sqlx::query_as::<_, StoredMessage>(
        r#"
        INSERT INTO messages (sender, receiver, team_id, body)
        VALUES (?1, ?2, ?3, ?4)
        RETURNING id, sender, receiver, team_id, body, created_at
        "#,
    )
    .bind(sender)
    .bind(receiver)
    .bind(team_id)
    .bind(body)
    .fetch_one(pool)
    .await?;

    Ok(message)
}

/// Full chat log in store order (timestamp, then insertion order).
/// Consumed by the REST history surface and by tests, not by the router.
pub async fn all_messages(pool: &Pool<Sqlite>) -> Result<Vec<StoredMessage>> {
    let messages = sqlx::query_as::<_, StoredMessage>(
        r#"
        SELECT id, sender, receiver, team_id, body, created_at
        FROM messages
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(messages)
}

// ---------------------------------------------------------------------------
// Identity provider
// ---------------------------------------------------------------------------

/// Provision an account. Idempotent; existing accounts are left as-is.
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    display_name: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO users (username, display_name)
        VALUES (?1, ?2)
        ON CONFLICT(username) DO NOTHING
        "#,
    )
    .bind(username)
    .bind(display_name)
    .execute(pool)
    .await?;

    Ok(())
}

/// Does an account exist for this username?
pub async fn user_exists(pool: &Pool<Sqlite>, username: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?1")
        .bind(username)
        .fetch_one(pool)
        .await?;

    Ok(count > 0)
}

/// Flag an identity as online.
pub async fn mark_online(pool: &Pool<Sqlite>, username: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE users SET status = 'online', last_seen = strftime('%s', 'now')
        WHERE username = ?1
        "#,
    )
    .bind(username)
    .execute(pool)
    .await?;

    Ok(())
}

/// Flag an identity as offline.
pub async fn mark_offline(pool: &Pool<Sqlite>, username: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE users SET status = 'offline', last_seen = strftime('%s', 'now')
        WHERE username = ?1
        "#,
    )
    .bind(username)
    .execute(pool)
    .await?;

    Ok(())
}

/// Current status flag for an identity, if the account exists.
pub async fn user_status(pool: &Pool<Sqlite>, username: &str) -> Result<Option<String>> {
    let status: Option<(String,)> =
        sqlx::query_as("SELECT status FROM users WHERE username = ?1")
            .bind(username)
            .fetch_optional(pool)
            .await?;

    Ok(status.map(|(s,)| s))
}
