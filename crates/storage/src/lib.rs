use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use shared::{
    domain::{Jid, MessageId},
    protocol::{MessageContent, WireMessage},
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::warn;

const MEMORY_DATABASE_URL: &str = "sqlite::memory:";

/// Persistent record of inbound messages, consulted when the network reports a removal.
#[async_trait]
pub trait MessageHistory: Send + Sync {
    /// Stores a message. Redeliveries of a known id are ignored.
    async fn record_message(&self, message: &WireMessage) -> Result<()>;
    async fn load_message(&self, message_id: &MessageId) -> Result<Option<StoredMessage>>;
    /// Returns false when the message was never recorded.
    async fn mark_deleted(&self, message_id: &MessageId) -> Result<bool>;
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub chat: Jid,
    pub sender: Jid,
    pub push_name: Option<String>,
    pub from_me: bool,
    pub content: Option<MessageContent>,
    pub sent_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every in-memory connection is its own database.
        let max_connections = if database_url == MEMORY_DATABASE_URL {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open history database '{database_url}'"))?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn count_messages(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Drops history older than `cutoff`; returns the number of removed rows.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM messages WHERE sent_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MessageHistory for Storage {
    async fn record_message(&self, message: &WireMessage) -> Result<()> {
        let content_json = message
            .content
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("failed to encode message content")?;
        let sent_at = message
            .timestamp
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now);

        sqlx::query(
            "INSERT INTO messages (message_id, chat_jid, sender_jid, push_name, from_me, kind, content_json, sent_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(message_id) DO NOTHING",
        )
        .bind(message.key.id.as_str())
        .bind(message.key.remote_jid.as_str())
        .bind(message.key.sender().as_str())
        .bind(message.push_name.as_deref())
        .bind(message.key.from_me)
        .bind(message.content.as_ref().map(MessageContent::kind))
        .bind(content_json)
        .bind(sent_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to record message {}", message.key.id))?;
        Ok(())
    }

    async fn load_message(&self, message_id: &MessageId) -> Result<Option<StoredMessage>> {
        let row = sqlx::query(
            "SELECT message_id, chat_jid, sender_jid, push_name, from_me, content_json, sent_at, deleted_at
             FROM messages WHERE message_id = ?",
        )
        .bind(message_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let content = match row.try_get::<Option<String>, _>("content_json")? {
            Some(raw) => match serde_json::from_str::<MessageContent>(&raw) {
                Ok(content) => Some(content),
                Err(error) => {
                    warn!(%message_id, %error, "stored message content is unreadable");
                    None
                }
            },
            None => None,
        };

        Ok(Some(StoredMessage {
            message_id: MessageId(row.try_get("message_id")?),
            chat: Jid(row.try_get("chat_jid")?),
            sender: Jid(row.try_get("sender_jid")?),
            push_name: row.try_get("push_name")?,
            from_me: row.try_get("from_me")?,
            content,
            sent_at: row.try_get("sent_at")?,
            deleted_at: row.try_get("deleted_at")?,
        }))
    }

    async fn mark_deleted(&self, message_id: &MessageId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE messages SET deleted_at = COALESCE(deleted_at, ?) WHERE message_id = ?",
        )
        .bind(Utc::now())
        .bind(message_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == MEMORY_DATABASE_URL || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
