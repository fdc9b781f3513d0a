//! Per-account clients multiplexed over one sidecar connection.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::sync::{mpsc, oneshot},
    tracing::{debug, info, warn},
};

use crate::{
    client::{AuthEventReceiver, ClientOptions, EventHandler, WhatsAppClient, WhatsAppConnector},
    error::{Error, Result},
    events::{AuthEvent, ClientEvent, DeviceProps},
    jid::Jid,
    sidecar::{FrameSink, SidecarEndpoint, SidecarHandle, connect_with_retry},
    store::{DeviceIdentity, DeviceStore},
    types::{
        ConnectReply, DeviceDescriptor, GatewayMessage, PairPhoneReply, Reply, SidecarMessage,
    },
};

/// How long a request waits for its `reply` frame.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const AUTH_CHANNEL_CAPACITY: usize = 8;
const PAIR_CLIENT_DISPLAY_NAME: &str = "Chrome (Linux)";

/// Routes sidecar frames to the client they belong to.
#[derive(Default)]
struct Router {
    clients: RwLock<HashMap<String, Arc<ClientShared>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
}

impl Router {
    fn route(&self, msg: SidecarMessage) {
        if let SidecarMessage::Reply(reply) = msg {
            let waiter = self
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&reply.request_id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(reply);
                },
                None => debug!(request_id = %reply.request_id, "reply for unknown request"),
            }
            return;
        }

        let client = match msg.account_id() {
            Some(account_id) => {
                let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
                clients.get(account_id).cloned()
            },
            None => {
                if let SidecarMessage::Error { error, .. } = &msg {
                    warn!(error = %error, "sidecar error");
                }
                return;
            },
        };

        match client {
            Some(client) => client.handle(msg),
            None => debug!(account_id = ?msg.account_id(), "message for unknown account"),
        }
    }

    /// The socket is gone: fail every waiter and mark all clients offline.
    fn connection_lost(&self) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        for client in clients.values() {
            client.connected.store(false, Ordering::SeqCst);
        }
    }
}

/// State shared between a [`SidecarClient`] and the router.
struct ClientShared {
    account_id: String,
    connected: AtomicBool,
    logged_in: AtomicBool,
    jid: RwLock<Option<Jid>>,
    auth_tx: Mutex<Option<mpsc::Sender<AuthEvent>>>,
    handlers: RwLock<Vec<EventHandler>>,
    store: Arc<DeviceStore>,
}

impl ClientShared {
    fn handle(&self, msg: SidecarMessage) {
        let account_id = self.account_id.as_str();

        if matches!(msg, SidecarMessage::InboundMessage { .. }) {
            if let Some((_, message)) = msg.into_inbound() {
                debug!(account_id, sender = %message.sender_jid, "inbound message");
                self.emit(ClientEvent::Message(message));
            }
            return;
        }

        match msg {
            SidecarMessage::Qr {
                code, timeout_ms, ..
            } => {
                debug!(account_id, "received QR code from sidecar");
                self.send_auth(AuthEvent::Code {
                    code,
                    timeout: Duration::from_millis(timeout_ms),
                });
            },
            SidecarMessage::PairSuccess { jid, .. } => match jid.parse::<Jid>() {
                Ok(jid) => {
                    info!(account_id, jid = %jid, "device paired");
                    if let Err(e) = self.store.set_jid(Some(&jid)) {
                        warn!(account_id, error = %e, "failed to persist paired jid");
                    }
                    *self.jid.write().unwrap_or_else(|e| e.into_inner()) = Some(jid.clone());
                    self.logged_in.store(true, Ordering::SeqCst);
                    self.send_auth(AuthEvent::Success);
                    self.emit(ClientEvent::PairSuccess { id: jid });
                },
                Err(e) => {
                    warn!(account_id, error = %e, "pair success with unparseable jid");
                    self.send_auth(AuthEvent::Other("err-invalid-jid".into()));
                },
            },
            SidecarMessage::PairError { error, .. } => {
                warn!(account_id, error = %error, "pairing failed");
                self.send_auth(AuthEvent::Other(error));
            },
            SidecarMessage::Connected { .. } => {
                info!(account_id, "whatsapp web connected");
                self.connected.store(true, Ordering::SeqCst);
                self.emit(ClientEvent::Connected);
            },
            SidecarMessage::Disconnected { reason, .. } => {
                warn!(account_id, reason = %reason, "whatsapp web disconnected");
                self.connected.store(false, Ordering::SeqCst);
            },
            SidecarMessage::LoggedOut { reason, .. } => {
                info!(account_id, ?reason, "whatsapp web logged out");
                self.mark_logged_out();
                self.emit(ClientEvent::LoggedOut { reason });
            },
            SidecarMessage::Error { error, .. } => {
                warn!(account_id, error = %error, "sidecar error");
            },
            SidecarMessage::InboundMessage { .. } | SidecarMessage::Reply(_) => {},
        }
    }

    fn mark_logged_out(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.logged_in.store(false, Ordering::SeqCst);
        *self.jid.write().unwrap_or_else(|e| e.into_inner()) = None;
        if !self.store.is_closed()
            && let Err(e) = self.store.set_jid(None)
        {
            warn!(account_id = %self.account_id, error = %e, "failed to clear paired jid");
        }
    }

    fn send_auth(&self, event: AuthEvent) {
        let tx = self
            .auth_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match tx {
            Some(tx) => {
                if tx.try_send(event).is_err() {
                    debug!(account_id = %self.account_id, "auth listener gone, dropping event");
                }
            },
            None => debug!(account_id = %self.account_id, "no auth listener"),
        }
    }

    fn emit(&self, event: ClientEvent) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for handler in handlers {
            handler(event.clone());
        }
    }
}

/// Connector that drives every account through one sidecar process.
pub struct SidecarHub {
    router: Arc<Router>,
    handle: SidecarHandle,
    request_timeout: Duration,
}

impl SidecarHub {
    /// Dial the sidecar and start routing its frames.
    pub async fn connect(endpoint: &SidecarEndpoint) -> Result<Self> {
        let router = Arc::new(Router::default());
        let routing = Arc::clone(&router);
        let sink: FrameSink = Arc::new(move |msg| routing.route(msg));

        let (handle, disconnect_rx) = connect_with_retry(endpoint, sink).await?;

        let watcher = Arc::clone(&router);
        tokio::spawn(async move {
            let _ = disconnect_rx.await;
            warn!("sidecar connection lost");
            watcher.connection_lost();
        });

        Ok(Self {
            router,
            handle,
            request_timeout: REQUEST_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    /// Account ids with a client attached.
    pub fn account_ids(&self) -> Vec<String> {
        let clients = self.router.clients.read().unwrap_or_else(|e| e.into_inner());
        clients.keys().cloned().collect()
    }
}

#[async_trait]
impl WhatsAppConnector for SidecarHub {
    async fn client(&self, options: ClientOptions) -> Result<Arc<dyn WhatsAppClient>> {
        let ClientOptions {
            account_id,
            device,
            store,
            keys_dir,
            props,
        } = options;

        let shared = Arc::new(ClientShared {
            account_id: account_id.clone(),
            connected: AtomicBool::new(false),
            logged_in: AtomicBool::new(false),
            jid: RwLock::new(device.jid.clone()),
            auth_tx: Mutex::new(None),
            handlers: RwLock::new(Vec::new()),
            store,
        });

        let replaced = self
            .router
            .clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(account_id.clone(), Arc::clone(&shared));
        if replaced.is_some() {
            debug!(account_id, "replaced existing sidecar client");
        }

        Ok(Arc::new(SidecarClient {
            shared,
            router: Arc::clone(&self.router),
            handle: self.handle.clone(),
            device,
            keys_dir,
            props,
            request_timeout: self.request_timeout,
        }))
    }
}

/// A [`WhatsAppClient`] whose session lives in the sidecar.
pub struct SidecarClient {
    shared: Arc<ClientShared>,
    router: Arc<Router>,
    handle: SidecarHandle,
    device: DeviceIdentity,
    keys_dir: Option<PathBuf>,
    props: DeviceProps,
    request_timeout: Duration,
}

impl SidecarClient {
    async fn request(&self, request_id: String, msg: GatewayMessage) -> Result<serde_json::Value> {
        let (tx, rx) = oneshot::channel();
        self.router
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id.clone(), tx);

        if let Err(e) = self.handle.send(msg).await {
            self.forget(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) if reply.success => Ok(reply.data),
            Ok(Ok(reply)) => Err(Error::Rejected(
                reply.error.unwrap_or_else(|| "unknown error".into()),
            )),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                self.forget(&request_id);
                Err(Error::RequestTimeout(request_id))
            },
        }
    }

    fn forget(&self, request_id: &str) {
        self.router
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id);
    }

    fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor {
            registration_id: self.device.registration_id,
            identity_id: self.device.identity_id.clone(),
            jid: self.device_jid().map(|jid| jid.to_string()),
            os: self.props.os.clone(),
            platform: self.props.platform.clone(),
        }
    }
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[async_trait]
impl WhatsAppClient for SidecarClient {
    fn account_id(&self) -> &str {
        &self.shared.account_id
    }

    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        let request_id = new_request_id();
        let data = self
            .request(request_id.clone(), GatewayMessage::Connect {
                account_id: self.shared.account_id.clone(),
                request_id,
                auth_dir: self.shared.store.path().display().to_string(),
                keys_dir: self.keys_dir.as_ref().map(|p| p.display().to_string()),
                device: self.descriptor(),
            })
            .await?;

        let reply: ConnectReply = if data.is_null() {
            ConnectReply::default()
        } else {
            serde_json::from_value(data).map_err(|e| Error::Protocol(e.to_string()))?
        };

        self.shared.connected.store(true, Ordering::SeqCst);
        if reply.logged_in {
            let jid = match reply.jid {
                Some(raw) => Some(raw.parse::<Jid>()?),
                None => self.device_jid(),
            };
            *self.shared.jid.write().unwrap_or_else(|e| e.into_inner()) = jid;
            self.shared.logged_in.store(true, Ordering::SeqCst);
        }
        debug!(account_id = %self.shared.account_id, logged_in = reply.logged_in, "connected");
        Ok(())
    }

    async fn disconnect(&self) {
        if !self.shared.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self
            .handle
            .send(GatewayMessage::Disconnect {
                account_id: self.shared.account_id.clone(),
            })
            .await
        {
            warn!(account_id = %self.shared.account_id, error = %e, "failed to send disconnect");
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.shared.logged_in.load(Ordering::SeqCst)
    }

    fn device_jid(&self) -> Option<Jid> {
        self.shared
            .jid
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn auth_events(&self) -> Result<AuthEventReceiver> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }
        if self.device_jid().is_some() {
            return Err(Error::AlreadyPaired);
        }
        let (tx, rx) = mpsc::channel(AUTH_CHANNEL_CAPACITY);
        *self
            .shared
            .auth_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(tx);
        Ok(rx)
    }

    async fn pair_phone(&self, phone_number: &str) -> Result<String> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let request_id = new_request_id();
        let data = self
            .request(request_id.clone(), GatewayMessage::PairPhone {
                account_id: self.shared.account_id.clone(),
                request_id,
                phone_number: phone_number.to_string(),
                client_display_name: PAIR_CLIENT_DISPLAY_NAME.into(),
            })
            .await?;
        let reply: PairPhoneReply =
            serde_json::from_value(data).map_err(|e| Error::Protocol(e.to_string()))?;
        Ok(reply.code)
    }

    async fn logout(&self) -> Result<()> {
        if !self.is_logged_in() {
            return Err(Error::NotLoggedIn);
        }
        let request_id = new_request_id();
        self.request(request_id.clone(), GatewayMessage::Logout {
            account_id: self.shared.account_id.clone(),
            request_id,
        })
        .await?;
        self.shared.mark_logged_out();
        Ok(())
    }

    fn register_event_handler(&self, handler: EventHandler) {
        self.shared
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(handler);
    }
}

impl Drop for SidecarClient {
    fn drop(&mut self) {
        let mut clients = self
            .router
            .clients
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if clients
            .get(&self.shared.account_id)
            .is_some_and(|current| Arc::ptr_eq(current, &self.shared))
        {
            clients.remove(&self.shared.account_id);
        }
    }
}
