//! Events delivered by a WhatsApp client.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::jid::Jid;

/// Pairing progress reported on the authentication channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A QR payload to scan, valid for `timeout`.
    Code { code: String, timeout: Duration },
    /// Pairing completed.
    Success,
    /// Anything else (timeout, rejection, unexpected state).
    Other(String),
}

impl AuthEvent {
    pub fn kind(&self) -> &str {
        match self {
            Self::Code { .. } => "code",
            Self::Success => "success",
            Self::Other(kind) => kind,
        }
    }
}

/// Out-of-band notification pushed to registered event handlers.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected,
    LoggedOut { reason: Option<String> },
    PairSuccess { id: Jid },
    Message(InboundMessage),
}

/// A message received by an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: String,
    pub chat_jid: String,
    pub sender_jid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub is_group: bool,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Unix timestamp in seconds.
    pub timestamp: f64,
}

/// Device metadata shown on the phone's linked-devices list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProps {
    pub os: String,
    pub platform: String,
}

impl Default for DeviceProps {
    fn default() -> Self {
        Self {
            os: "Wamux".into(),
            platform: "chrome".into(),
        }
    }
}
