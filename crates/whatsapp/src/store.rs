//! Per-account device credential storage backed by sled.

use std::{
    path::{Path, PathBuf},
    sync::RwLock,
};

use {
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    jid::Jid,
};

const DEVICE_KEY: &[u8] = b"device";

/// Identity of this companion device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub registration_id: u32,
    pub identity_id: String,
    /// Set once the device has been paired with a phone.
    pub jid: Option<Jid>,
}

impl DeviceIdentity {
    fn generate() -> Self {
        Self {
            registration_id: rand::random::<u32>() & 0x3fff,
            identity_id: uuid::Uuid::new_v4().to_string(),
            jid: None,
        }
    }
}

/// Durable credential store for one account.
///
/// The database is released by [`DeviceStore::close`]; every later call
/// fails with [`Error::StoreClosed`].
pub struct DeviceStore {
    path: PathBuf,
    db: RwLock<Option<sled::Db>>,
}

impl DeviceStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path)?;
        debug!(path = %path.display(), "opened device store");
        Ok(Self {
            path,
            db: RwLock::new(Some(db)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.db.read().unwrap_or_else(|e| e.into_inner()).is_none()
    }

    fn with_db<T>(&self, f: impl FnOnce(&sled::Db) -> Result<T>) -> Result<T> {
        let guard = self.db.read().unwrap_or_else(|e| e.into_inner());
        let db = guard.as_ref().ok_or(Error::StoreClosed)?;
        f(db)
    }

    /// Return the stored device, creating and persisting a fresh one if none exists.
    pub fn first_device(&self) -> Result<DeviceIdentity> {
        self.with_db(|db| {
            if let Some(raw) = db.get(DEVICE_KEY)? {
                return Ok(serde_json::from_slice(&raw)?);
            }
            let device = DeviceIdentity::generate();
            db.insert(DEVICE_KEY, serde_json::to_vec(&device)?)?;
            db.flush()?;
            debug!(registration_id = device.registration_id, "created device identity");
            Ok(device)
        })
    }

    /// Record (or clear) the paired JID.
    pub fn set_jid(&self, jid: Option<&Jid>) -> Result<()> {
        let mut device = self.first_device()?;
        device.jid = jid.cloned();
        self.with_db(|db| {
            db.insert(DEVICE_KEY, serde_json::to_vec(&device)?)?;
            db.flush()?;
            Ok(())
        })
    }

    /// Flush and release the database. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let db = self.db.write().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(db) = db {
            db.flush()?;
            debug!(path = %self.path.display(), "closed device store");
        }
        Ok(())
    }
}
