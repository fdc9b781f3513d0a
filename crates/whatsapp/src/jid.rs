//! WhatsApp JIDs (`user[:device]@server`).

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default server for user JIDs.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";

/// A WhatsApp address, e.g. `15551234567:12@s.whatsapp.net`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    pub user: String,
    pub device: Option<u16>,
    pub server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            device: None,
            server: server.into(),
        }
    }

    pub fn with_device(mut self, device: u16) -> Self {
        self.device = Some(device);
        self
    }

    /// The phone number this JID belongs to.
    pub fn phone_number(&self) -> &str {
        &self.user
    }
}

impl FromStr for Jid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (left, server) = s
            .split_once('@')
            .ok_or_else(|| Error::InvalidJid(s.to_string()))?;
        if server.is_empty() {
            return Err(Error::InvalidJid(s.to_string()));
        }
        let (user, device) = match left.split_once(':') {
            Some((user, device)) => {
                let device = device
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidJid(s.to_string()))?;
                (user, Some(device))
            },
            None => (left, None),
        };
        if user.is_empty() {
            return Err(Error::InvalidJid(s.to_string()));
        }
        Ok(Self {
            user: user.to_string(),
            device,
            server: server.to_string(),
        })
    }
}

impl TryFrom<String> for Jid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.to_string()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device {
            Some(device) => write!(f, "{}:{}@{}", self.user, device, self.server),
            None => write!(f, "{}@{}", self.user, self.server),
        }
    }
}
