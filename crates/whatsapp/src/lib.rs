//! WhatsApp Web client layer for wamux.
//!
//! Each account gets a [`WhatsAppClient`] backed by a sled device store. The
//! protocol itself runs in a Node.js sidecar (Baileys) reached over a local
//! WebSocket; [`SidecarHub`] multiplexes all accounts over that one socket.

pub mod client;
pub mod error;
pub mod events;
pub mod hub;
pub mod jid;
pub mod sidecar;
pub mod store;
pub mod types;

pub use {
    client::{AuthEventReceiver, ClientOptions, EventHandler, WhatsAppClient, WhatsAppConnector},
    error::{Error, Result},
    events::{AuthEvent, ClientEvent, DeviceProps, InboundMessage},
    hub::{REQUEST_TIMEOUT, SidecarHub},
    jid::{DEFAULT_USER_SERVER, Jid},
    sidecar::{DEFAULT_SIDECAR_PORT, SidecarEndpoint},
    store::{DeviceIdentity, DeviceStore},
};
