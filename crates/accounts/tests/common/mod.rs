#![allow(dead_code, clippy::unwrap_used)]

use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    wamux_accounts::{
        AccountService, AccountStore, ChatHistory, CredentialProvisioner, MemoryAccountStore,
        QrRenderer, ServiceSettings, SessionRegistry, WebhookDispatcher, WebhookSettings,
    },
    wamux_whatsapp::{
        AuthEvent, AuthEventReceiver, ClientEvent, ClientOptions, DeviceProps, Error as WaError,
        EventHandler, Jid, Result as WaResult, WhatsAppClient, WhatsAppConnector,
    },
};

pub const PAIRED_JID: &str = "15551234567:1@s.whatsapp.net";

/// How fake clients behave.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Report logged-in right after connect.
    pub logged_in_on_connect: bool,
    /// Events pushed to the auth channel during connect.
    pub auth_on_connect: Vec<AuthEvent>,
    /// Complete pairing this long after connect.
    pub pair_after: Option<Duration>,
    pub fail_connect: bool,
    pub fail_logout: bool,
    /// Hold connect open this long.
    pub connect_delay: Option<Duration>,
}

#[derive(Default)]
pub struct Inner {
    pub account_id: String,
    pub connected: AtomicBool,
    pub logged_in: AtomicBool,
    pub jid: Mutex<Option<Jid>>,
    auth_tx: Mutex<Option<mpsc::Sender<AuthEvent>>>,
    handlers: Mutex<Vec<EventHandler>>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub logouts: AtomicUsize,
    script: Mutex<Script>,
}

impl Inner {
    pub fn new(account_id: &str) -> Arc<Self> {
        Arc::new(Self {
            account_id: account_id.into(),
            ..Default::default()
        })
    }

    fn pair(&self) {
        let jid: Jid = PAIRED_JID.parse().unwrap();
        *self.jid.lock().unwrap() = Some(jid);
        self.logged_in.store(true, Ordering::SeqCst);
    }

    /// Deliver an event to registered handlers, like the library would.
    pub fn emit(&self, event: ClientEvent) {
        let handlers = self.handlers.lock().unwrap().clone();
        for handler in handlers {
            handler(event.clone());
        }
    }
}

pub struct FakeClient(pub Arc<Inner>);

#[async_trait]
impl WhatsAppClient for FakeClient {
    fn account_id(&self) -> &str {
        &self.0.account_id
    }

    async fn connect(&self) -> WaResult<()> {
        let script = self.0.script.lock().unwrap().clone();
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = script.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if script.fail_connect {
            return Err(WaError::Connection("refused".into()));
        }
        self.0.connected.store(true, Ordering::SeqCst);
        if script.logged_in_on_connect {
            self.0.pair();
        }

        let tx = self.0.auth_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            for event in script.auth_on_connect {
                let _ = tx.try_send(event);
            }
            if let Some(delay) = script.pair_after {
                let inner = Arc::clone(&self.0);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.pair();
                    let _ = tx.send(AuthEvent::Success).await;
                });
            }
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.0.disconnects.fetch_add(1, Ordering::SeqCst);
        self.0.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.0.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.0.logged_in.load(Ordering::SeqCst)
    }

    fn device_jid(&self) -> Option<Jid> {
        self.0.jid.lock().unwrap().clone()
    }

    async fn auth_events(&self) -> WaResult<AuthEventReceiver> {
        if self.is_connected() {
            return Err(WaError::AlreadyConnected);
        }
        if self.device_jid().is_some() {
            return Err(WaError::AlreadyPaired);
        }
        let (tx, rx) = mpsc::channel(8);
        *self.0.auth_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn pair_phone(&self, _phone_number: &str) -> WaResult<String> {
        if !self.is_connected() {
            return Err(WaError::NotConnected);
        }
        Ok("ABCD-1234".into())
    }

    async fn logout(&self) -> WaResult<()> {
        if self.0.script.lock().unwrap().fail_logout {
            return Err(WaError::Rejected("logout refused".into()));
        }
        self.0.logouts.fetch_add(1, Ordering::SeqCst);
        self.0.logged_in.store(false, Ordering::SeqCst);
        self.0.connected.store(false, Ordering::SeqCst);
        *self.0.jid.lock().unwrap() = None;
        Ok(())
    }

    fn register_event_handler(&self, handler: EventHandler) {
        self.0.handlers.lock().unwrap().push(handler);
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub script: Mutex<Script>,
    pub built: Mutex<Vec<Arc<Inner>>>,
    pub last_props: Mutex<Option<DeviceProps>>,
}

impl FakeConnector {
    pub fn new(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            ..Default::default()
        }
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script.clone();
        for inner in self.built.lock().unwrap().iter() {
            *inner.script.lock().unwrap() = script.clone();
        }
    }

    pub fn built_count(&self) -> usize {
        self.built.lock().unwrap().len()
    }

    pub fn last(&self) -> Arc<Inner> {
        Arc::clone(self.built.lock().unwrap().last().unwrap())
    }
}

#[async_trait]
impl WhatsAppConnector for FakeConnector {
    async fn client(&self, options: ClientOptions) -> WaResult<Arc<dyn WhatsAppClient>> {
        let inner = Arc::new(Inner {
            account_id: options.account_id,
            jid: Mutex::new(options.device.jid),
            script: Mutex::new(self.script.lock().unwrap().clone()),
            ..Default::default()
        });
        *self.last_props.lock().unwrap() = Some(options.props);
        self.built.lock().unwrap().push(Arc::clone(&inner));
        Ok(Arc::new(FakeClient(inner)))
    }
}

pub struct Harness {
    pub service: Arc<AccountService>,
    pub connector: Arc<FakeConnector>,
    pub store: Arc<MemoryAccountStore>,
    pub registry: Arc<SessionRegistry>,
    pub credentials: CredentialProvisioner,
    pub qr_dir: PathBuf,
    _tmp: tempfile::TempDir,
}

pub fn settings() -> ServiceSettings {
    ServiceSettings {
        qr_timeout: Duration::from_millis(150),
        ..ServiceSettings::default()
    }
}

pub async fn harness(script: Script) -> Harness {
    harness_with_history(script, None).await
}

pub async fn harness_with_history(
    script: Script,
    history: Option<Arc<dyn ChatHistory>>,
) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryAccountStore::new());
    let registry = Arc::new(SessionRegistry::new());
    let connector = Arc::new(FakeConnector::new(script));
    let credentials = CredentialProvisioner::new(tmp.path().join("storages"), false);
    let qr_dir = tmp.path().join("qrcode");
    let webhooks = WebhookDispatcher::start(
        WebhookSettings {
            workers: 2,
            queue_capacity: 16,
            timeout: Duration::from_secs(2),
        },
        CancellationToken::new(),
    );
    let account_store: Arc<dyn AccountStore> = Arc::clone(&store) as Arc<dyn AccountStore>;
    let client_connector: Arc<dyn WhatsAppConnector> =
        Arc::clone(&connector) as Arc<dyn WhatsAppConnector>;
    let service = AccountService::new(
        account_store,
        Arc::clone(&registry),
        client_connector,
        credentials.clone(),
        QrRenderer::new(&qr_dir),
        webhooks,
        settings(),
    );
    let service = match history {
        Some(history) => service.with_history(history),
        None => service,
    };
    Harness {
        service: Arc::new(service),
        connector,
        store,
        registry,
        credentials,
        qr_dir,
        _tmp: tmp,
    }
}

pub fn code_event(code: &str) -> AuthEvent {
    AuthEvent::Code {
        code: code.into(),
        timeout: Duration::from_secs(20),
    }
}

/// Poll until `check` holds or give up after ~2s.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
