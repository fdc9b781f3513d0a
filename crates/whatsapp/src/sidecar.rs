//! WebSocket transport to the WhatsApp Web sidecar.
//!
//! One socket carries frames for every account. Outbound frames are queued on
//! a bounded channel and written by a dedicated task; inbound text frames are
//! decoded and handed to a [`FrameSink`] on the reader task.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    futures::{Sink, SinkExt, Stream, StreamExt},
    tokio::sync::{mpsc, oneshot},
    tokio_tungstenite::{
        connect_async,
        tungstenite::{self, Message},
    },
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    types::{GatewayMessage, SidecarMessage},
};

/// Default sidecar WebSocket port.
pub const DEFAULT_SIDECAR_PORT: u16 = 9876;

const OUTBOUND_QUEUE: usize = 64;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Callback receiving every decoded frame from the sidecar.
pub type FrameSink = Arc<dyn Fn(SidecarMessage) + Send + Sync>;

/// Where the sidecar listens and how hard to try reaching it.
#[derive(Debug, Clone)]
pub struct SidecarEndpoint {
    pub host: String,
    pub port: u16,
    /// Dial attempts before giving up, at least one.
    pub attempts: u32,
    /// Delay after the first failed attempt; doubles up to 30s.
    pub backoff: Duration,
}

impl SidecarEndpoint {
    pub fn local(port: u16) -> Self {
        Self {
            host: "127.0.0.1".into(),
            port,
            attempts: 1,
            backoff: Duration::from_secs(2),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl Default for SidecarEndpoint {
    fn default() -> Self {
        Self::local(DEFAULT_SIDECAR_PORT)
    }
}

/// Sending half of the sidecar link. Cheap to clone.
#[derive(Clone)]
pub struct SidecarHandle {
    tx: mpsc::Sender<GatewayMessage>,
    connected: Arc<AtomicBool>,
}

impl SidecarHandle {
    /// Handle backed by a plain channel, with no socket behind it.
    pub(crate) fn from_sender(tx: mpsc::Sender<GatewayMessage>) -> Self {
        Self {
            tx,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Queue a frame for the writer task.
    pub async fn send(&self, msg: GatewayMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Closed);
        }
        self.tx.send(msg).await.map_err(|_| Error::Closed)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// What the reader does with one WebSocket message.
#[derive(Debug)]
enum Inbound {
    Frame(SidecarMessage),
    Skip,
    Close,
}

fn decode(message: Message) -> Inbound {
    match message {
        Message::Text(text) => match serde_json::from_str::<SidecarMessage>(&text) {
            Ok(frame) => Inbound::Frame(frame),
            Err(e) => {
                warn!(error = %e, text = %text, "unparseable sidecar frame");
                Inbound::Skip
            },
        },
        Message::Close(_) => Inbound::Close,
        _ => Inbound::Skip,
    }
}

async fn read_frames<S>(mut read: S, sink: FrameSink)
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = read.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "sidecar read failed");
                return;
            },
        };
        match decode(message) {
            Inbound::Frame(frame) => {
                debug!(account_id = ?frame.account_id(), "sidecar frame");
                sink(frame);
            },
            Inbound::Skip => {},
            Inbound::Close => {
                info!("sidecar closed the connection");
                return;
            },
        }
    }
}

async fn write_frames<S>(mut write: S, mut rx: mpsc::Receiver<GatewayMessage>)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    while let Some(frame) = rx.recv().await {
        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to encode gateway frame");
                continue;
            },
        };
        if let Err(e) = write.send(Message::Text(json.into())).await {
            warn!(error = %e, "sidecar write failed");
            return;
        }
    }
    let _ = write.close().await;
}

/// Dial the sidecar once and spawn the reader and writer tasks.
///
/// The returned receiver resolves when the socket is gone.
pub async fn connect_to_sidecar(
    endpoint: &SidecarEndpoint,
    sink: FrameSink,
) -> Result<(SidecarHandle, oneshot::Receiver<()>)> {
    let url = endpoint.url();
    let (socket, _) = connect_async(url.as_str())
        .await
        .map_err(|e| Error::Connection(format!("{url}: {e}")))?;
    info!(url = %url, "connected to WhatsApp sidecar");

    let (write, read) = socket.split();
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    let (closed_tx, closed_rx) = oneshot::channel();
    let connected = Arc::new(AtomicBool::new(true));

    let reader_state = Arc::clone(&connected);
    tokio::spawn(async move {
        read_frames(read, sink).await;
        reader_state.store(false, Ordering::SeqCst);
        let _ = closed_tx.send(());
    });

    let writer_state = Arc::clone(&connected);
    tokio::spawn(async move {
        write_frames(write, rx).await;
        writer_state.store(false, Ordering::SeqCst);
    });

    Ok((SidecarHandle { tx, connected }, closed_rx))
}

/// Dial with exponential backoff until the endpoint's attempts run out.
pub async fn connect_with_retry(
    endpoint: &SidecarEndpoint,
    sink: FrameSink,
) -> Result<(SidecarHandle, oneshot::Receiver<()>)> {
    let attempts = endpoint.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match connect_to_sidecar(endpoint, Arc::clone(&sink)).await {
            Ok(link) => return Ok(link),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                let delay = endpoint.delay_after(attempt);
                warn!(
                    attempt,
                    attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "sidecar unreachable"
                );
                tokio::time::sleep(delay).await;
            },
        }
    }
}
