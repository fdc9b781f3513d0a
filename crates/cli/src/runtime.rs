//! Wiring of stores, connector and service from configuration.

use std::sync::Arc;

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
    wamux_accounts::{
        AccountService, AccountStore, ChatHistory, CredentialProvisioner, QrRenderer,
        ServiceSettings, SessionRegistry, SqliteAccountStore, SqliteChatHistory,
        WebhookDispatcher, WebhookSettings,
    },
    wamux_config::WamuxConfig,
    wamux_whatsapp::{
        ClientOptions, SidecarEndpoint, SidecarHub, WhatsAppClient, WhatsAppConnector,
    },
};

/// Connector for admin commands that never open a session.
struct Offline;

#[async_trait]
impl WhatsAppConnector for Offline {
    async fn client(
        &self,
        options: ClientOptions,
    ) -> wamux_whatsapp::Result<Arc<dyn WhatsAppClient>> {
        Err(wamux_whatsapp::Error::Connection(format!(
            "no sidecar attached, cannot open a session for {}",
            options.account_id
        )))
    }
}

async fn build(
    config: &WamuxConfig,
    connector: Arc<dyn WhatsAppConnector>,
) -> Result<AccountService> {
    let db_path = config.storage.accounts_db();
    let store = SqliteAccountStore::open(&db_path)
        .await
        .with_context(|| format!("failed to open {}", db_path.display()))?;

    let history: Option<Arc<dyn ChatHistory>> = if config.chat_history.enabled {
        SqliteChatHistory::init(store.pool())
            .await
            .context("failed to prepare chat history")?;
        Some(Arc::new(SqliteChatHistory::new(store.pool().clone())))
    } else {
        None
    };

    let store: Arc<dyn AccountStore> = Arc::new(store);
    let webhooks = WebhookDispatcher::start(
        WebhookSettings::from(&config.webhook),
        CancellationToken::new(),
    );
    let service = AccountService::new(
        store,
        Arc::new(SessionRegistry::new()),
        connector,
        CredentialProvisioner::new(&config.storage.data_dir, config.storage.keys_store),
        QrRenderer::new(&config.storage.qr_dir),
        webhooks,
        ServiceSettings::from_config(config),
    );
    Ok(match history {
        Some(history) => service.with_history(history),
        None => service,
    })
}

/// Service for commands that only touch durable state.
pub async fn offline(config: &WamuxConfig) -> Result<AccountService> {
    build(config, Arc::new(Offline)).await
}

/// A service attached to the sidecar with its event loop running.
pub struct Online {
    pub service: Arc<AccountService>,
    events: JoinHandle<()>,
}

pub async fn online(config: &WamuxConfig) -> Result<Online> {
    let endpoint = SidecarEndpoint {
        host: config.sidecar.host.clone(),
        port: config.sidecar.port,
        attempts: config.sidecar.connect_retries.max(1),
        backoff: config.sidecar.retry_backoff(),
    };
    let hub = SidecarHub::connect(&endpoint)
        .await
        .with_context(|| format!("failed to reach sidecar at {}", endpoint.url()))?;
    debug!(url = %endpoint.url(), "sidecar attached");

    let service = Arc::new(build(config, Arc::new(hub)).await?);
    let events = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.run_events().await }
    });
    Ok(Online { service, events })
}

impl Online {
    /// Shut the service down and wait for the event loop.
    pub async fn stop(self) {
        self.service.shutdown().await;
        if let Err(e) = self.events.await {
            warn!(error = %e, "event loop task failed");
        }
    }
}
