//! Durable account records and webhook configuration.

use std::{
    collections::HashMap,
    path::Path,
    sync::RwLock,
};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    secrecy::{ExposeSecret, Secret},
    sqlx::{
        Row, SqlitePool,
        sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    },
};

use crate::model::{Account, AccountStatus, WebhookConfig};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("account {0} not found")]
    NotFound(String),

    #[error("account {0} already exists")]
    Duplicate(String),

    #[error("corrupt account row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Persistence for account records. Implementations are internally
/// thread-safe; callers do read-modify-write with last write winning.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fails with [`StoreError::Duplicate`] when the id is taken.
    async fn create(&self, account: &Account) -> Result<(), StoreError>;
    async fn get(&self, id: &str) -> Result<Account, StoreError>;
    async fn update(&self, account: &Account) -> Result<(), StoreError>;
    /// Also drops the account's webhook.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
    /// Newest first.
    async fn list(&self) -> Result<Vec<Account>, StoreError>;
    async fn set_webhook(&self, account_id: &str, webhook: &WebhookConfig)
    -> Result<(), StoreError>;
    async fn get_webhook(&self, account_id: &str) -> Result<Option<WebhookConfig>, StoreError>;
}

// ── SQLite ───────────────────────────────────────────────────────────

pub struct SqliteAccountStore {
    pool: SqlitePool,
}

impl SqliteAccountStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file and its tables.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Database(sqlx::Error::Io(e)))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::init(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn init(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS accounts (
                id             TEXT PRIMARY KEY,
                status         TEXT NOT NULL DEFAULT 'disconnected',
                phone_number   TEXT,
                device_id      TEXT,
                created_at     INTEGER NOT NULL,
                last_connected INTEGER
            )",
        )
        .execute(pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS account_webhooks (
                account_id TEXT PRIMARY KEY REFERENCES accounts(id) ON DELETE CASCADE,
                url        TEXT NOT NULL,
                secret     TEXT
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {ms}")))
}

fn account_from_row(row: &SqliteRow) -> Result<Account, StoreError> {
    let status: String = row.try_get("status")?;
    let last_connected: Option<i64> = row.try_get("last_connected")?;
    Ok(Account {
        id: row.try_get("id")?,
        status: status.parse::<AccountStatus>().map_err(StoreError::Corrupt)?,
        phone_number: row.try_get("phone_number")?,
        device_id: row.try_get("device_id")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        last_connected: last_connected.map(from_millis).transpose()?,
    })
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn create(&self, account: &Account) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO accounts (id, status, phone_number, device_id, created_at, last_connected)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&account.id)
        .bind(account.status.as_str())
        .bind(&account.phone_number)
        .bind(&account.device_id)
        .bind(to_millis(account.created_at))
        .bind(account.last_connected.map(to_millis))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Duplicate(account.id.clone()))
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &str) -> Result<Account, StoreError> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        account_from_row(&row)
    }

    async fn update(&self, account: &Account) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE accounts
             SET status = ?, phone_number = ?, device_id = ?, last_connected = ?
             WHERE id = ?",
        )
        .bind(account.status.as_str())
        .bind(&account.phone_number)
        .bind(&account.device_id)
        .bind(account.last_connected.map(to_millis))
        .bind(&account.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(account.id.clone()));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM account_webhooks WHERE account_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query("SELECT * FROM accounts ORDER BY created_at DESC, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(account_from_row).collect()
    }

    async fn set_webhook(
        &self,
        account_id: &str,
        webhook: &WebhookConfig,
    ) -> Result<(), StoreError> {
        let exists = sqlx::query("SELECT 1 FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if !exists {
            return Err(StoreError::NotFound(account_id.to_string()));
        }

        let secret = webhook.secret.as_ref().map(|s| s.expose_secret().clone());
        sqlx::query(
            "INSERT INTO account_webhooks (account_id, url, secret) VALUES (?, ?, ?)
             ON CONFLICT(account_id) DO UPDATE SET url = excluded.url, secret = excluded.secret",
        )
        .bind(account_id)
        .bind(&webhook.url)
        .bind(secret)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_webhook(&self, account_id: &str) -> Result<Option<WebhookConfig>, StoreError> {
        let row = sqlx::query("SELECT url, secret FROM account_webhooks WHERE account_id = ?")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let secret: Option<String> = row.try_get("secret")?;
        Ok(Some(WebhookConfig {
            url: row.try_get("url")?,
            secret: secret.map(Secret::new),
        }))
    }
}

// ── In-memory ────────────────────────────────────────────────────────

/// Process-local store, for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<String, Account>>,
    webhooks: RwLock<HashMap<String, WebhookConfig>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn create(&self, account: &Account) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
        if accounts.contains_key(&account.id) {
            return Err(StoreError::Duplicate(account.id.clone()));
        }
        accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Account, StoreError> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update(&self, account: &Account) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
        match accounts.get_mut(&account.id) {
            Some(existing) => {
                *existing = account.clone();
                Ok(())
            },
            None => Err(StoreError::NotFound(account.id.clone())),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let removed = self
            .accounts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        self.webhooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        removed
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Account>, StoreError> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<Account> = accounts.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn set_webhook(
        &self,
        account_id: &str,
        webhook: &WebhookConfig,
    ) -> Result<(), StoreError> {
        if !self
            .accounts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(account_id)
        {
            return Err(StoreError::NotFound(account_id.to_string()));
        }
        self.webhooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(account_id.to_string(), webhook.clone());
        Ok(())
    }

    async fn get_webhook(&self, account_id: &str) -> Result<Option<WebhookConfig>, StoreError> {
        let webhooks = self.webhooks.read().unwrap_or_else(|e| e.into_inner());
        Ok(webhooks.get(account_id).cloned())
    }
}
