//! Append-only record of inbound messages.

use {anyhow::Result, async_trait::async_trait, sqlx::SqlitePool, wamux_whatsapp::InboundMessage};

#[async_trait]
pub trait ChatHistory: Send + Sync {
    async fn append(&self, account_id: &str, message: &InboundMessage) -> Result<()>;
}

pub struct SqliteChatHistory {
    pool: SqlitePool,
}

impl SqliteChatHistory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_messages (
                account_id  TEXT NOT NULL,
                message_id  TEXT NOT NULL,
                chat_jid    TEXT NOT NULL,
                sender_jid  TEXT NOT NULL,
                sender_name TEXT,
                is_group    INTEGER NOT NULL,
                body        TEXT NOT NULL,
                media_type  TEXT,
                timestamp   REAL NOT NULL,
                PRIMARY KEY (account_id, message_id)
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn count(&self, account_id: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM chat_messages WHERE account_id = ?")
                .bind(account_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[async_trait]
impl ChatHistory for SqliteChatHistory {
    async fn append(&self, account_id: &str, message: &InboundMessage) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO chat_messages
                (account_id, message_id, chat_jid, sender_jid, sender_name,
                 is_group, body, media_type, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(account_id)
        .bind(&message.message_id)
        .bind(&message.chat_jid)
        .bind(&message.sender_jid)
        .bind(&message.sender_name)
        .bind(message.is_group)
        .bind(&message.body)
        .bind(&message.media_type)
        .bind(message.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
