//! Account lifecycle orchestration.
//!
//! [`AccountService`] ties the durable [`AccountStore`], the in-memory
//! [`SessionRegistry`] and a [`WhatsAppConnector`] together. Lifecycle calls
//! for one account are serialised by a per-account lock; client events are
//! funnelled through a single channel and applied by [`AccountService::run_events`].

mod events;
mod lifecycle;

use std::{
    future::Future,
    io,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    dashmap::DashMap,
    tokio::sync::{OwnedMutexGuard, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    wamux_config::WamuxConfig,
    wamux_whatsapp::{ClientEvent, DeviceProps, WhatsAppClient, WhatsAppConnector},
};

use crate::{
    credentials::{CredentialProvisioner, Provisioned},
    error::{Error, Result},
    history::ChatHistory,
    model::{Account, AccountInfo, WebhookConfig},
    qr::QrRenderer,
    registry::SessionRegistry,
    store::AccountStore,
    validate::validate_account_id,
    webhook::WebhookDispatcher,
};

/// A client event tagged with the session that produced it.
struct EventEnvelope {
    account_id: String,
    generation: u64,
    event: ClientEvent,
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// How long a QR login waits for the first pairing event.
    pub qr_timeout: Duration,
    pub device: DeviceProps,
}

impl ServiceSettings {
    pub fn from_config(config: &WamuxConfig) -> Self {
        Self {
            qr_timeout: config.login.qr_timeout(),
            device: DeviceProps {
                os: config.device.os_name(),
                platform: config.device.platform.clone(),
            },
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from_config(&WamuxConfig::default())
    }
}

pub struct AccountService {
    store: Arc<dyn AccountStore>,
    registry: Arc<SessionRegistry>,
    connector: Arc<dyn WhatsAppConnector>,
    credentials: CredentialProvisioner,
    qr: QrRenderer,
    webhooks: WebhookDispatcher,
    history: Option<Arc<dyn ChatHistory>>,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    events_tx: mpsc::UnboundedSender<EventEnvelope>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<EventEnvelope>>>,
    shutdown: CancellationToken,
    settings: ServiceSettings,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn AccountStore>,
        registry: Arc<SessionRegistry>,
        connector: Arc<dyn WhatsAppConnector>,
        credentials: CredentialProvisioner,
        qr: QrRenderer,
        webhooks: WebhookDispatcher,
        settings: ServiceSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            store,
            registry,
            connector,
            credentials,
            qr,
            webhooks,
            history: None,
            locks: DashMap::new(),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            shutdown: CancellationToken::new(),
            settings,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn ChatHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    pub async fn create(&self, account_id: &str) -> Result<Account> {
        validate_account_id(account_id)?;
        let account = Account::new(account_id);
        self.store.create(&account).await?;
        info!(account_id, "account created");
        Ok(account)
    }

    pub async fn get(&self, account_id: &str) -> Result<AccountInfo> {
        let account = self.store.get(account_id).await?;
        Ok(self.describe(account).await)
    }

    pub async fn list(&self) -> Result<Vec<AccountInfo>> {
        let accounts = self.store.list().await?;
        let mut infos = Vec::with_capacity(accounts.len());
        for account in accounts {
            infos.push(self.describe(account).await);
        }
        Ok(infos)
    }

    pub async fn set_webhook(&self, account_id: &str, webhook: WebhookConfig) -> Result<()> {
        let url = reqwest::Url::parse(&webhook.url)
            .map_err(|e| Error::InvalidInput(format!("webhook url: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidInput(format!(
                "webhook url must be http or https, got {}",
                url.scheme()
            )));
        }
        self.store.get(account_id).await?;
        self.store.set_webhook(account_id, &webhook).await?;
        info!(account_id, url = %webhook.url, "webhook configured");
        Ok(())
    }

    pub async fn get_webhook(&self, account_id: &str) -> Result<Option<WebhookConfig>> {
        self.store.get(account_id).await?;
        Ok(self.store.get_webhook(account_id).await?)
    }

    /// Durable fields plus live flags from the registry. Never writes.
    async fn describe(&self, account: Account) -> AccountInfo {
        let (is_connected, is_logged_in) = match self.registry.get(&account.id) {
            Some(session) => (session.client.is_connected(), session.client.is_logged_in()),
            None => (false, false),
        };
        let webhook_url = match self.store.get_webhook(&account.id).await {
            Ok(hook) => hook.map(|h| h.url),
            Err(e) => {
                warn!(account_id = %account.id, error = %e, "failed to read webhook");
                None
            },
        };
        AccountInfo {
            account,
            is_connected,
            is_logged_in,
            webhook_url,
        }
    }

    async fn lock_account(&self, account_id: &str) -> OwnedMutexGuard<()> {
        self.account_lock(account_id).lock_owned().await
    }

    fn try_lock_account(&self, account_id: &str) -> Option<OwnedMutexGuard<()>> {
        self.account_lock(account_id).try_lock_owned().ok()
    }

    fn account_lock(&self, account_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&*self.locks.entry(account_id.to_string()).or_default())
    }

    /// Read-modify-write of one account record. Last write wins.
    async fn update_account(
        &self,
        account_id: &str,
        apply: impl FnOnce(&mut Account),
    ) -> Result<Account> {
        let mut account = self.store.get(account_id).await?;
        apply(&mut account);
        self.store.update(&account).await?;
        Ok(account)
    }

    /// PNG encoding and file writes run on the blocking pool.
    async fn render_qr(&self, account_id: &str, code: &str) -> Result<PathBuf> {
        let qr = self.qr.clone();
        let (account_id, code) = (account_id.to_string(), code.to_string());
        tokio::task::spawn_blocking(move || qr.render(&account_id, &code))
            .await
            .map_err(|e| Error::Render(format!("render task failed: {e}")))?
    }

    async fn cleanup_qr(&self, account_id: &str) -> io::Result<usize> {
        let qr = self.qr.clone();
        let account_id = account_id.to_string();
        tokio::task::spawn_blocking(move || qr.cleanup(&account_id))
            .await
            .map_err(io::Error::other)?
    }

    /// Directory creation and the sled opens run on the blocking pool.
    async fn provision(&self, account_id: &str) -> Result<Provisioned> {
        let credentials = self.credentials.clone();
        let account_id = account_id.to_string();
        tokio::task::spawn_blocking(move || credentials.provision(&account_id))
            .await
            .map_err(|e| Error::Credentials(format!("provision task failed: {e}")))?
    }

    /// Release the session and delete its credential storage, logging failures.
    async fn teardown(&self, account_id: &str) {
        self.registry.remove(account_id).await;
        if let Err(e) = self.credentials.remove(account_id).await {
            warn!(account_id, error = %e, "failed to remove credential storage");
        }
    }

    /// Stop the event loop and webhook workers, then release every session.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.webhooks.shutdown().await;
        self.registry.clear().await;
        info!("account service stopped");
    }
}

/// Persist the live state of a freshly connected client.
///
/// `logged_in` is only recorded together with the device JID.
fn apply_connected(account: &mut Account, client: &dyn WhatsAppClient) {
    match client.device_jid().filter(|_| client.is_logged_in()) {
        Some(jid) => account.mark_logged_in(jid.to_string(), jid.phone_number().to_string()),
        None => {
            if client.is_logged_in() {
                warn!(account_id = %account.id, "client logged in without a device jid");
            }
            account.mark_connected();
        },
    }
}

async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        out = fut => Ok(out),
    }
}
