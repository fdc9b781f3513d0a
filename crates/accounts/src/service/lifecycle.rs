use std::sync::Arc;

use {
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    wamux_whatsapp::{AuthEvent, ClientOptions, WhatsAppClient},
};

use super::{AccountService, apply_connected, cancellable};
use crate::{
    credentials::Provisioned,
    error::{Error, Result},
    model::{AccountStatus, LoginResponse},
    validate::normalize_phone,
};

impl AccountService {
    /// QR login. Returns the code to scan, or a marker when the device is
    /// already paired or pairing completes during the wait.
    ///
    /// On timeout or cancellation the session stays registered so the
    /// handshake can be driven again.
    pub async fn login(
        &self,
        account_id: &str,
        cancel: &CancellationToken,
    ) -> Result<LoginResponse> {
        let _guard = self.lock_account(account_id).await;
        self.store.get(account_id).await?;

        let client = self.prepare_session(account_id).await?;

        // The listener has to exist before connect or the first code is lost.
        let auth = match client.auth_events().await {
            Ok(rx) => Some(rx),
            Err(wamux_whatsapp::Error::AlreadyPaired) => None,
            Err(e) => return Err(e.into()),
        };

        cancellable(cancel, client.connect()).await??;

        if client.is_logged_in() {
            self.update_account(account_id, |a| apply_connected(a, client.as_ref()))
                .await?;
            info!(account_id, "account already logged in");
            return Ok(LoginResponse::marker(LoginResponse::ALREADY_LOGGED_IN));
        }

        let Some(mut auth) = auth else {
            return Err(Error::Auth(
                "device is paired but the session is not logged in, logout and retry".into(),
            ));
        };

        let timeout = self.settings.qr_timeout;
        let event = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(timeout) => {
                warn!(account_id, ?timeout, "no pairing event received");
                return Err(Error::Timeout(timeout));
            },
            event = auth.recv() => event,
        };

        match event {
            Some(AuthEvent::Code { code, timeout }) => {
                let image_path = self.render_qr(account_id, &code).await?;
                debug!(account_id, expires_in = ?timeout, "qr code issued");
                Ok(LoginResponse {
                    code,
                    image_path: Some(image_path),
                    expires_in: timeout,
                })
            },
            Some(AuthEvent::Success) => {
                self.update_account(account_id, |a| apply_connected(a, client.as_ref()))
                    .await?;
                info!(account_id, "pairing completed");
                Ok(LoginResponse::marker(LoginResponse::SUCCESS))
            },
            Some(AuthEvent::Other(kind)) => {
                Err(Error::Auth(format!("unexpected pairing event: {kind}")))
            },
            None => Err(Error::Auth("pairing channel closed".into())),
        }
    }

    /// Pairing-code login for `phone`. The connection stays registered when
    /// no code can be obtained.
    pub async fn login_with_code(
        &self,
        account_id: &str,
        phone: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let phone = normalize_phone(phone)?;
        let _guard = self.lock_account(account_id).await;
        self.store.get(account_id).await?;

        let client = self.prepare_session(account_id).await?;
        cancellable(cancel, client.connect()).await??;

        if client.is_logged_in() {
            self.update_account(account_id, |a| apply_connected(a, client.as_ref()))
                .await?;
            return Err(Error::AlreadyLoggedIn(account_id.to_string()));
        }

        let code = cancellable(cancel, client.pair_phone(&phone)).await??;
        self.update_account(account_id, |a| a.phone_number = Some(phone))
            .await?;
        info!(account_id, "pairing code issued");
        Ok(code)
    }

    /// Log out on the network, then clear the record and tear down local state.
    ///
    /// Nothing is torn down unless the network logout succeeded.
    pub async fn logout(&self, account_id: &str, cancel: &CancellationToken) -> Result<()> {
        let _guard = self.lock_account(account_id).await;
        let client = self
            .registry
            .get(account_id)
            .map(|s| s.client)
            .ok_or_else(|| Error::NotConnected(account_id.to_string()))?;

        cancellable(cancel, client.logout()).await??;
        drop(client);

        let persisted = self.update_account(account_id, |a| a.mark_logged_out()).await;
        self.teardown(account_id).await;
        info!(account_id, "account logged out");
        persisted.map(|_| ())
    }

    /// Drop and re-establish the connection of an existing session.
    pub async fn reconnect(
        &self,
        account_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AccountStatus> {
        let _guard = self.lock_account(account_id).await;
        let client = self
            .registry
            .get(account_id)
            .map(|s| s.client)
            .ok_or_else(|| Error::NotConnected(account_id.to_string()))?;

        if client.is_connected() {
            client.disconnect().await;
        }
        cancellable(cancel, client.connect()).await??;

        let account = self
            .update_account(account_id, |a| apply_connected(a, client.as_ref()))
            .await?;
        info!(account_id, status = %account.status, "account reconnected");
        Ok(account.status)
    }

    /// Remove the account, its session, credential storage and QR files.
    /// Cleanup failures are logged; only a failing record delete is an error.
    pub async fn delete(&self, account_id: &str) -> Result<()> {
        self.store.get(account_id).await?;
        let guard = self.lock_account(account_id).await;

        if self.registry.contains(account_id) {
            self.teardown(account_id).await;
        }
        self.store.delete(account_id).await?;

        match self.cleanup_qr(account_id).await {
            Ok(0) => {},
            Ok(removed) => debug!(account_id, removed, "qr files removed"),
            Err(e) => warn!(account_id, error = %e, "failed to clean qr files"),
        }

        drop(guard);
        self.locks.remove(account_id);
        info!(account_id, "account deleted");
        Ok(())
    }

    /// Re-attach every paired account. Returns how many came back.
    pub async fn restore_sessions(&self) -> Result<usize> {
        let accounts = self.store.list().await?;
        let mut restored = 0;
        for account in accounts.into_iter().filter(|a| a.has_device()) {
            let account_id = account.id.as_str();
            let _guard = self.lock_account(account_id).await;
            if self.registry.contains(account_id) {
                continue;
            }
            match self.restore_one(account_id).await {
                Ok(status) => {
                    info!(account_id, %status, "session restored");
                    restored += 1;
                },
                Err(e) => warn!(account_id, error = %e, "failed to restore session"),
            }
        }
        Ok(restored)
    }

    async fn restore_one(&self, account_id: &str) -> Result<AccountStatus> {
        let client = self.prepare_session(account_id).await?;
        client.connect().await?;
        let account = self
            .update_account(account_id, |a| apply_connected(a, client.as_ref()))
            .await?;
        Ok(account.status)
    }

    /// Reuse the registered session (dropping its connection) or build and
    /// register a new one.
    async fn prepare_session(&self, account_id: &str) -> Result<Arc<dyn WhatsAppClient>> {
        if let Some(session) = self.registry.get(account_id) {
            if session.client.is_logged_in() {
                return Err(Error::AlreadyLoggedIn(account_id.to_string()));
            }
            if session.client.is_connected() {
                session.client.disconnect().await;
            }
            debug!(account_id, "reusing registered session");
            return Ok(session.client);
        }

        let Provisioned { device, keys } = self.provision(account_id).await?;
        let release = || {
            for store in std::iter::once(&device).chain(keys.as_ref()) {
                if let Err(e) = store.close() {
                    warn!(account_id, error = %e, "failed to close credential store");
                }
            }
        };

        let identity = match device.first_device() {
            Ok(identity) => identity,
            Err(e) => {
                release();
                return Err(Error::Credentials(format!("read device identity: {e}")));
            },
        };
        let options = ClientOptions {
            account_id: account_id.to_string(),
            device: identity,
            store: Arc::clone(&device),
            keys_dir: keys.as_ref().map(|_| self.credentials.keys_dir(account_id)),
            props: self.settings.device.clone(),
        };
        let client = match self.connector.client(options).await {
            Ok(client) => client,
            Err(e) => {
                release();
                return Err(e.into());
            },
        };

        let generation = self.registry.put(account_id, Arc::clone(&client), device);
        client.register_event_handler(self.event_handler(account_id, generation));
        if let Some(keys) = keys {
            self.registry.set_keys_store(account_id, keys);
        }
        debug!(account_id, generation, "session registered");
        Ok(client)
    }
}
