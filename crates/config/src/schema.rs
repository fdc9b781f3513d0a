//! Configuration schema types.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WamuxConfig {
    pub storage: StorageConfig,
    pub device: DeviceConfig,
    pub sidecar: SidecarConfig,
    pub login: LoginConfig,
    pub webhook: WebhookConfig,
    pub chat_history: ChatHistoryConfig,
}

/// Where durable state is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for the accounts database and per-account credential stores.
    pub data_dir: PathBuf,
    /// Directory for rendered QR code images.
    pub qr_dir: PathBuf,
    /// Provision a secondary "keys" credential store per account.
    pub keys_store: bool,
}

impl StorageConfig {
    /// Path to the accounts SQLite database.
    pub fn accounts_db(&self) -> PathBuf {
        self.data_dir.join("accounts.db")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("storages"),
            qr_dir: PathBuf::from("statics/qrcode"),
            keys_store: false,
        }
    }
}

/// Device metadata shown on the phone's "linked devices" screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub os: String,
    pub version: String,
    pub platform: String,
}

impl DeviceConfig {
    /// Display name combining os and version, e.g. `"Wamux 0.1.0"`.
    pub fn os_name(&self) -> String {
        format!("{} {}", self.os, self.version)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            os: "Wamux".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            platform: "chrome".into(),
        }
    }
}

/// Connection to the WhatsApp Web sidecar process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    pub host: String,
    pub port: u16,
    pub connect_retries: u32,
    /// First retry delay; later retries double it.
    pub retry_backoff_ms: u64,
}

impl SidecarConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9876,
            connect_retries: 5,
            retry_backoff_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// How long a QR login waits for the first pairing event.
    pub qr_timeout_secs: u64,
}

impl LoginConfig {
    pub fn qr_timeout(&self) -> Duration {
        Duration::from_secs(self.qr_timeout_secs)
    }
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            qr_timeout_secs: 60,
        }
    }
}

/// Outbound webhook delivery pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub timeout_secs: u64,
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatHistoryConfig {
    pub enabled: bool,
}

impl Default for ChatHistoryConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
