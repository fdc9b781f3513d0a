//! Multi-tenant WhatsApp account orchestration.
//!
//! Accounts are durable records ([`AccountStore`]); each may own one live
//! [`Session`] in the [`SessionRegistry`]. [`AccountService`] drives the
//! login, logout, reconnect and delete flows and applies client events,
//! forwarding inbound messages to chat history and webhooks.

pub mod credentials;
pub mod error;
pub mod history;
pub mod model;
pub mod qr;
pub mod registry;
pub mod service;
pub mod store;
pub mod validate;
pub mod webhook;

pub use {
    credentials::{CredentialProvisioner, Provisioned},
    error::{Error, ErrorKind, Result},
    history::{ChatHistory, SqliteChatHistory},
    model::{Account, AccountInfo, AccountStatus, LoginResponse, WebhookConfig},
    qr::{QrRenderer, render_terminal},
    registry::{Session, SessionRegistry},
    service::{AccountService, ServiceSettings},
    store::{AccountStore, MemoryAccountStore, SqliteAccountStore, StoreError},
    webhook::{SIGNATURE_HEADER, WebhookDispatcher, WebhookEvent, WebhookSettings},
};
