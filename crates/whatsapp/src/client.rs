//! Client capability consumed by the account orchestrator.

use std::{path::PathBuf, sync::Arc};

use {async_trait::async_trait, tokio::sync::mpsc};

use crate::{
    error::Result,
    events::{AuthEvent, ClientEvent, DeviceProps},
    jid::Jid,
    store::{DeviceIdentity, DeviceStore},
};

/// Callback invoked for every [`ClientEvent`], on the client's delivery task.
///
/// Handlers must not block; hand work off to a channel or task.
pub type EventHandler = Arc<dyn Fn(ClientEvent) + Send + Sync>;

/// Receiving half of the authentication channel.
pub type AuthEventReceiver = mpsc::Receiver<AuthEvent>;

/// A live connection for one account.
#[async_trait]
pub trait WhatsAppClient: Send + Sync {
    fn account_id(&self) -> &str;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn is_logged_in(&self) -> bool;

    /// JID of the paired device, if any.
    fn device_jid(&self) -> Option<Jid>;

    /// Open the pairing event channel. Must be called before [`connect`](Self::connect),
    /// otherwise the first event may be lost.
    async fn auth_events(&self) -> Result<AuthEventReceiver>;

    /// Request a numeric pairing code for `phone_number`. Requires a connection.
    async fn pair_phone(&self, phone_number: &str) -> Result<String>;

    async fn logout(&self) -> Result<()>;

    fn register_event_handler(&self, handler: EventHandler);
}

/// Everything needed to build a client for one account.
pub struct ClientOptions {
    pub account_id: String,
    pub device: DeviceIdentity,
    pub store: Arc<DeviceStore>,
    /// Location of the secondary keys store, when provisioned.
    pub keys_dir: Option<PathBuf>,
    pub props: DeviceProps,
}

/// Builds clients bound to a device identity.
#[async_trait]
pub trait WhatsAppConnector: Send + Sync {
    async fn client(&self, options: ClientOptions) -> Result<Arc<dyn WhatsAppClient>>;
}
