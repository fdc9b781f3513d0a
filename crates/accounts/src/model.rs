//! Durable account records and the views handed back to callers.

use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use {
    chrono::{DateTime, Utc},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize, Serializer},
};

/// Last known network state of an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Disconnected,
    Connected,
    LoggedIn,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::LoggedIn => "logged_in",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(Self::Disconnected),
            "connected" => Ok(Self::Connected),
            "logged_in" => Ok(Self::LoggedIn),
            other => Err(format!("unknown account status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub status: AccountStatus,
    /// Set once pairing succeeds, cleared on logout.
    pub phone_number: Option<String>,
    /// JID of the paired device, cleared on logout.
    pub device_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_connected: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: AccountStatus::Disconnected,
            phone_number: None,
            device_id: None,
            created_at: Utc::now(),
            last_connected: None,
        }
    }

    /// Record a completed pairing.
    pub fn mark_logged_in(&mut self, device_id: String, phone_number: String) {
        self.status = AccountStatus::LoggedIn;
        self.device_id = Some(device_id);
        self.phone_number = Some(phone_number);
        self.last_connected = Some(Utc::now());
    }

    pub fn mark_connected(&mut self) {
        self.status = AccountStatus::Connected;
        self.last_connected = Some(Utc::now());
    }

    /// Drop the paired identity. Device id and phone number go together.
    pub fn mark_logged_out(&mut self) {
        self.status = AccountStatus::Disconnected;
        self.device_id = None;
        self.phone_number = None;
    }

    pub fn has_device(&self) -> bool {
        self.device_id.as_deref().is_some_and(|d| !d.is_empty())
    }
}

/// Where inbound messages for an account are forwarded.
#[derive(Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// HMAC key used to sign deliveries.
    #[serde(default, serialize_with = "serialize_secret")]
    pub secret: Option<Secret<String>>,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secret: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(Secret::new(secret.into()));
        self
    }
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("url", &self.url)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn serialize_secret<S: Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

/// An account as seen by callers: durable fields plus live session state.
#[derive(Debug, Clone, Serialize)]
pub struct AccountInfo {
    #[serde(flatten)]
    pub account: Account,
    pub is_connected: bool,
    pub is_logged_in: bool,
    pub webhook_url: Option<String>,
}

/// Result of a login attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginResponse {
    /// QR payload, pairing code, or one of the marker constants.
    pub code: String,
    /// Rendered QR image, for QR logins.
    pub image_path: Option<PathBuf>,
    /// How long the code stays valid.
    #[serde(with = "duration_secs")]
    pub expires_in: Duration,
}

impl LoginResponse {
    /// Returned when the device was already paired on connect.
    pub const ALREADY_LOGGED_IN: &'static str = "ALREADY_LOGGED_IN";
    /// Returned when pairing completed while waiting.
    pub const SUCCESS: &'static str = "SUCCESS";

    pub(crate) fn marker(code: &str) -> Self {
        Self {
            code: code.to_string(),
            image_path: None,
            expires_in: Duration::ZERO,
        }
    }

    pub fn is_already_logged_in(&self) -> bool {
        self.code == Self::ALREADY_LOGGED_IN
    }

    pub fn is_success(&self) -> bool {
        self.code == Self::SUCCESS
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}
