//! Live sessions keyed by account id.

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    tracing::{debug, warn},
    wamux_whatsapp::{DeviceStore, WhatsAppClient},
};

/// Connection plus credential-store handles for one account.
#[derive(Clone)]
pub struct Session {
    /// Distinguishes this session from earlier ones registered for the same
    /// account.
    pub generation: u64,
    pub client: Arc<dyn WhatsAppClient>,
    pub store: Arc<DeviceStore>,
    pub keys_store: Option<Arc<DeviceStore>>,
}

impl Session {
    /// Disconnect and close both stores, logging failures.
    async fn release(self, account_id: &str) {
        self.client.disconnect().await;
        if let Err(e) = self.store.close() {
            warn!(account_id, error = %e, "failed to close device store");
        }
        if let Some(keys) = self.keys_store
            && let Err(e) = keys.close()
        {
            warn!(account_id, error = %e, "failed to close keys store");
        }
    }
}

/// Concurrent table of live sessions. Owns the handles once registered.
///
/// The lock is only held for map operations; disconnects and store closes
/// run after the entry has been evicted.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account_id: &str) -> Option<Session> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(account_id).cloned()
    }

    /// Generation of the registered session, if any.
    pub fn generation(&self, account_id: &str) -> Option<u64> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(account_id).map(|s| s.generation)
    }

    pub fn contains(&self, account_id: &str) -> bool {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.contains_key(account_id)
    }

    /// Register a session, silently replacing any existing entry. Callers
    /// release the old one with [`remove`](Self::remove) first.
    ///
    /// Returns the generation assigned to the new session.
    pub fn put(
        &self,
        account_id: &str,
        client: Arc<dyn WhatsAppClient>,
        store: Arc<DeviceStore>,
    ) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(account_id.to_string(), Session {
            generation,
            client,
            store,
            keys_store: None,
        });
        generation
    }

    /// Attach the secondary store. Returns false if no session exists.
    pub fn set_keys_store(&self, account_id: &str, store: Arc<DeviceStore>) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        match sessions.get_mut(account_id) {
            Some(session) => {
                session.keys_store = Some(store);
                true
            },
            None => false,
        }
    }

    /// Evict and release the session. Idempotent; returns whether one existed.
    pub async fn remove(&self, account_id: &str) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(account_id);
        match removed {
            Some(session) => {
                session.release(account_id).await;
                debug!(account_id, "session removed");
                true
            },
            None => false,
        }
    }

    /// Like [`remove`](Self::remove), but only when the registered session
    /// is still `generation`.
    pub async fn remove_generation(&self, account_id: &str, generation: u64) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            match sessions.get(account_id) {
                Some(session) if session.generation == generation => sessions.remove(account_id),
                _ => None,
            }
        };
        match removed {
            Some(session) => {
                session.release(account_id).await;
                debug!(account_id, generation, "session removed");
                true
            },
            None => false,
        }
    }

    /// Snapshot of account id to client.
    pub fn list(&self) -> HashMap<String, Arc<dyn WhatsAppClient>> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions
            .iter()
            .map(|(id, session)| (id.clone(), Arc::clone(&session.client)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every session.
    pub async fn clear(&self) {
        let drained: Vec<(String, Session)> = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (account_id, session) in drained {
            session.release(&account_id).await;
        }
    }
}
