//! Types for communication with the WhatsApp Web sidecar.

use serde::{Deserialize, Serialize};

use crate::events::InboundMessage;

/// Device description sent with a connect request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceDescriptor {
    #[serde(rename = "registrationId")]
    pub registration_id: u32,
    #[serde(rename = "identityId")]
    pub identity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jid: Option<String>,
    pub os: String,
    pub platform: String,
}

/// Messages sent from Rust to the sidecar.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    Connect {
        #[serde(rename = "accountId")]
        account_id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "authDir")]
        auth_dir: String,
        #[serde(rename = "keysDir", skip_serializing_if = "Option::is_none")]
        keys_dir: Option<String>,
        device: DeviceDescriptor,
    },
    Disconnect {
        #[serde(rename = "accountId")]
        account_id: String,
    },
    Logout {
        #[serde(rename = "accountId")]
        account_id: String,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    PairPhone {
        #[serde(rename = "accountId")]
        account_id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "phoneNumber")]
        phone_number: String,
        #[serde(rename = "clientDisplayName")]
        client_display_name: String,
    },
}

/// Messages received from the sidecar.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    Qr {
        #[serde(rename = "accountId")]
        account_id: String,
        code: String,
        #[serde(rename = "timeoutMs")]
        timeout_ms: u64,
    },
    PairSuccess {
        #[serde(rename = "accountId")]
        account_id: String,
        jid: String,
    },
    PairError {
        #[serde(rename = "accountId")]
        account_id: String,
        error: String,
    },
    Connected {
        #[serde(rename = "accountId")]
        account_id: String,
    },
    Disconnected {
        #[serde(rename = "accountId")]
        account_id: String,
        reason: String,
    },
    LoggedOut {
        #[serde(rename = "accountId")]
        account_id: String,
        reason: Option<String>,
    },
    InboundMessage {
        #[serde(rename = "accountId")]
        account_id: String,
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "chatJid")]
        chat_jid: String,
        #[serde(rename = "senderJid")]
        sender_jid: String,
        #[serde(rename = "senderName")]
        sender_name: Option<String>,
        #[serde(rename = "isGroup")]
        is_group: bool,
        body: String,
        #[serde(rename = "mediaType")]
        media_type: Option<String>,
        timestamp: f64,
    },
    Reply(Reply),
    Error {
        #[serde(rename = "accountId")]
        account_id: Option<String>,
        error: String,
    },
}

/// Response to a request carrying a `requestId`.
#[derive(Debug, Clone, Deserialize)]
pub struct Reply {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub success: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    pub error: Option<String>,
}

/// Payload of a successful connect reply.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectReply {
    #[serde(rename = "loggedIn", default)]
    pub logged_in: bool,
    pub jid: Option<String>,
}

/// Payload of a successful pair-phone reply.
#[derive(Debug, Clone, Deserialize)]
pub struct PairPhoneReply {
    pub code: String,
}

impl SidecarMessage {
    /// Account the message is addressed to, if any.
    pub fn account_id(&self) -> Option<&str> {
        match self {
            Self::Qr { account_id, .. }
            | Self::PairSuccess { account_id, .. }
            | Self::PairError { account_id, .. }
            | Self::Connected { account_id }
            | Self::Disconnected { account_id, .. }
            | Self::LoggedOut { account_id, .. }
            | Self::InboundMessage { account_id, .. } => Some(account_id),
            Self::Error { account_id, .. } => account_id.as_deref(),
            Self::Reply(_) => None,
        }
    }

    /// Split an `inbound_message` frame into the account id and message.
    pub fn into_inbound(self) -> Option<(String, InboundMessage)> {
        match self {
            Self::InboundMessage {
                account_id,
                message_id,
                chat_jid,
                sender_jid,
                sender_name,
                is_group,
                body,
                media_type,
                timestamp,
            } => Some((account_id, InboundMessage {
                message_id,
                chat_jid,
                sender_jid,
                sender_name,
                is_group,
                body,
                media_type,
                timestamp,
            })),
            _ => None,
        }
    }
}
