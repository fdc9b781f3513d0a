//! Per-account credential storage layout.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    tracing::{debug, warn},
    wamux_whatsapp::DeviceStore,
};

use crate::{
    error::{Error, Result},
    validate::validate_account_id,
};

const ACCOUNTS_DIR: &str = "accounts";
const DEVICE_DIR: &str = "device";
const KEYS_DIR: &str = "keys";

/// Store handles opened for one account.
pub struct Provisioned {
    pub device: Arc<DeviceStore>,
    /// Secondary keys store, when enabled and it opened cleanly.
    pub keys: Option<Arc<DeviceStore>>,
}

/// Lays out `<data_dir>/accounts/<id>/{device,keys}` and opens the stores.
#[derive(Debug, Clone)]
pub struct CredentialProvisioner {
    data_dir: PathBuf,
    keys_store: bool,
}

impl CredentialProvisioner {
    pub fn new(data_dir: impl Into<PathBuf>, keys_store: bool) -> Self {
        Self {
            data_dir: data_dir.into(),
            keys_store,
        }
    }

    pub fn account_dir(&self, account_id: &str) -> PathBuf {
        self.data_dir.join(ACCOUNTS_DIR).join(account_id)
    }

    pub fn keys_dir(&self, account_id: &str) -> PathBuf {
        self.account_dir(account_id).join(KEYS_DIR)
    }

    pub fn provision(&self, account_id: &str) -> Result<Provisioned> {
        validate_account_id(account_id)?;
        let dir = self.account_dir(account_id);
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Credentials(format!("create {}: {e}", dir.display())))?;

        let device = DeviceStore::open(dir.join(DEVICE_DIR))
            .map_err(|e| Error::Credentials(format!("open device store: {e}")))?;

        let keys = if self.keys_store {
            match DeviceStore::open(dir.join(KEYS_DIR)) {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    warn!(account_id, error = %e, "keys store unavailable, continuing without it");
                    None
                },
            }
        } else {
            None
        };

        debug!(account_id, path = %dir.display(), "credential storage provisioned");
        Ok(Provisioned {
            device: Arc::new(device),
            keys,
        })
    }

    /// Delete the account's storage directory. A missing directory is fine.
    pub async fn remove(&self, account_id: &str) -> io::Result<()> {
        validate_account_id(account_id).map_err(|e| io::Error::other(e.to_string()))?;
        remove_dir(&self.account_dir(account_id)).await
    }
}

async fn remove_dir(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
