//! Bounded worker pool forwarding inbound messages to account webhooks.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    hmac::{Hmac, Mac},
    secrecy::ExposeSecret,
    serde::Serialize,
    sha2::Sha256,
    tokio::{sync::mpsc, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
    wamux_whatsapp::InboundMessage,
};

use crate::model::WebhookConfig;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub timeout: Duration,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self::from(&wamux_config::WebhookConfig::default())
    }
}

impl From<&wamux_config::WebhookConfig> for WebhookSettings {
    fn from(cfg: &wamux_config::WebhookConfig) -> Self {
        Self {
            workers: cfg.workers.max(1),
            queue_capacity: cfg.queue_capacity.max(1),
            timeout: cfg.timeout(),
        }
    }
}

/// JSON body POSTed to the webhook.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub account_id: String,
    pub event: &'static str,
    pub message: InboundMessage,
}

struct Job {
    webhook: WebhookConfig,
    event: WebhookEvent,
}

/// Fire-and-forget delivery: at most once, never retried, dropped when the
/// queue is full.
pub struct WebhookDispatcher {
    tx: mpsc::Sender<Job>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WebhookDispatcher {
    /// Spawn the worker pool. Must be called inside a tokio runtime.
    pub fn start(settings: WebhookSettings, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let http = reqwest::Client::new();

        let workers = (0..settings.workers)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let http = http.clone();
                let cancel = cancel.clone();
                let timeout = settings.timeout;
                tokio::spawn(async move {
                    loop {
                        let job = tokio::select! {
                            _ = cancel.cancelled() => break,
                            job = async { rx.lock().await.recv().await } => job,
                        };
                        let Some(job) = job else {
                            break;
                        };
                        deliver(&http, job, timeout).await;
                    }
                    debug!(worker, "webhook worker stopped");
                })
            })
            .collect();

        Self {
            tx,
            cancel,
            workers: Mutex::new(workers),
        }
    }

    /// Queue a delivery. Returns false when it was dropped.
    pub fn dispatch(
        &self,
        account_id: &str,
        webhook: WebhookConfig,
        message: InboundMessage,
    ) -> bool {
        let job = Job {
            webhook,
            event: WebhookEvent {
                account_id: account_id.to_string(),
                event: "message",
                message,
            },
        };
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(account_id, "webhook queue full, dropping delivery");
                false
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(account_id, "webhook pool stopped, dropping delivery");
                false
            },
        }
    }

    /// Stop the workers and wait for in-flight deliveries to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in workers {
            let _ = handle.await;
        }
    }
}

/// `sha256=<hex>` HMAC of `body` keyed by `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

async fn deliver(http: &reqwest::Client, job: Job, timeout: Duration) {
    let account_id = job.event.account_id.as_str();
    let body = match serde_json::to_vec(&job.event) {
        Ok(body) => body,
        Err(e) => {
            warn!(account_id, error = %e, "failed to encode webhook payload");
            return;
        },
    };

    let mut request = http
        .post(&job.webhook.url)
        .timeout(timeout)
        .header(reqwest::header::CONTENT_TYPE, "application/json");
    if let Some(secret) = &job.webhook.secret {
        request = request.header(SIGNATURE_HEADER, sign(secret.expose_secret(), &body));
    }

    match request
        .body(body)
        .send()
        .await
        .and_then(|r| r.error_for_status())
    {
        Ok(resp) => debug!(account_id, status = %resp.status(), "webhook delivered"),
        Err(e) => warn!(account_id, url = %job.webhook.url, error = %e, "webhook delivery failed"),
    }
}
