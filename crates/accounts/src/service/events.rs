use std::sync::Arc;

use {
    tracing::{debug, info, warn},
    wamux_whatsapp::{ClientEvent, EventHandler, InboundMessage},
};

use super::{AccountService, EventEnvelope};

impl AccountService {
    /// Handler given to every client: forwards events to the service's queue,
    /// tagged with the session generation the client was registered under.
    pub(super) fn event_handler(&self, account_id: &str, generation: u64) -> EventHandler {
        let tx = self.events_tx.clone();
        let account_id = account_id.to_string();
        Arc::new(move |event| {
            let envelope = EventEnvelope {
                account_id: account_id.clone(),
                generation,
                event,
            };
            if tx.send(envelope).is_err() {
                debug!(account_id = %account_id, "event loop stopped, dropping client event");
            }
        })
    }

    /// Drain client events until [`shutdown`](Self::shutdown). Only one loop
    /// can run per service.
    pub async fn run_events(&self) {
        let rx = self
            .events_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(mut rx) = rx else {
            warn!("event loop already running");
            return;
        };

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(envelope) => self.handle_session_event(envelope).await,
                    None => break,
                },
            }
        }
        debug!("event loop stopped");
    }

    /// Apply an event queued by a client. State events from a session that
    /// is no longer registered are dropped; messages are still forwarded.
    async fn handle_session_event(&self, envelope: EventEnvelope) {
        let EventEnvelope {
            account_id,
            generation,
            event,
        } = envelope;
        let account_id = account_id.as_str();

        if !matches!(event, ClientEvent::Message(_))
            && self.registry.generation(account_id) != Some(generation)
        {
            debug!(account_id, generation, "dropping event from released session");
            return;
        }
        self.apply_event(account_id, Some(generation), event).await;
    }

    /// Apply one client event for the currently registered session.
    /// Failures are logged.
    pub async fn handle_event(&self, account_id: &str, event: ClientEvent) {
        self.apply_event(account_id, None, event).await;
    }

    async fn apply_event(&self, account_id: &str, generation: Option<u64>, event: ClientEvent) {
        match event {
            ClientEvent::Connected => {
                info!(account_id, "connected");
                if let Err(e) = self.update_account(account_id, |a| a.mark_connected()).await {
                    warn!(account_id, error = %e, "failed to record connection");
                }
            },
            ClientEvent::LoggedOut { reason } => {
                info!(account_id, ?reason, "logged out by server");
                if let Err(e) = self
                    .update_account(account_id, |a| a.mark_logged_out())
                    .await
                {
                    warn!(account_id, error = %e, "failed to record logout");
                }
                match generation {
                    Some(generation) => self.teardown_generation(account_id, generation).await,
                    None => self.teardown(account_id).await,
                }
            },
            ClientEvent::PairSuccess { id } => {
                info!(account_id, jid = %id, "paired");
                let device_id = id.to_string();
                let phone = id.phone_number().to_string();
                if let Err(e) = self
                    .update_account(account_id, |a| a.mark_logged_in(device_id, phone))
                    .await
                {
                    warn!(account_id, error = %e, "failed to record pairing");
                }
            },
            ClientEvent::Message(message) => self.forward_message(account_id, message).await,
        }
    }

    /// Server-side logout of one specific session. Credential storage is
    /// left alone while a lifecycle operation holds the account, since that
    /// operation owns the directory now.
    async fn teardown_generation(&self, account_id: &str, generation: u64) {
        if !self.registry.remove_generation(account_id, generation).await {
            debug!(account_id, generation, "session already replaced");
            return;
        }
        let Some(_guard) = self.try_lock_account(account_id) else {
            debug!(account_id, "account busy, keeping credential storage");
            return;
        };
        if let Err(e) = self.credentials.remove(account_id).await {
            warn!(account_id, error = %e, "failed to remove credential storage");
        }
    }

    async fn forward_message(&self, account_id: &str, message: InboundMessage) {
        if let Some(history) = &self.history
            && let Err(e) = history.append(account_id, &message).await
        {
            warn!(
                account_id,
                message_id = %message.message_id,
                error = %e,
                "failed to store message"
            );
        }

        match self.store.get_webhook(account_id).await {
            Ok(Some(webhook)) if !webhook.url.is_empty() => {
                self.webhooks.dispatch(account_id, webhook, message);
            },
            Ok(_) => {},
            Err(e) => warn!(account_id, error = %e, "failed to read webhook"),
        }
    }
}
