//! Process-wide authentication state.
//!
//! [`AuthStore`] is an explicitly owned, cloneable handle. Subscribers get a
//! `watch` receiver and observe `set`/`clear` as soon as they return. The
//! credential is persisted under two independent keys; the store treats the
//! pair as one value and restores a half-written pair as "signed out".

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use shared::protocol::{IDENTITY_KEY, TOKEN_KEY};
use shared::Credential;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// Key/value persistence for the two credential halves.
pub trait CredentialStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn write(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory storage; forgets everything when the process exits.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a key, e.g. to simulate what a previous run left behind.
    pub fn with_value(self, key: &str, value: &str) -> Self {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
        self
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self
            .values
            .lock()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(values.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        values.remove(key);
        Ok(())
    }
}

struct Inner {
    state: watch::Sender<Option<Credential>>,
    storage: Box<dyn CredentialStore>,
}

/// Holder of the current credential
#[derive(Clone)]
pub struct AuthStore {
    inner: Arc<Inner>,
}

impl AuthStore {
    /// Create the store, restoring whatever credential `storage` holds.
    pub fn restore(storage: impl CredentialStore + 'static) -> Self {
        let identity = read_key(&storage, IDENTITY_KEY);
        let token = read_key(&storage, TOKEN_KEY);
        let partial = identity.is_some() != token.is_some();

        let credential = Credential::from_parts(identity, token);
        match &credential {
            Some(cred) => info!("Restored credential for {}", cred.identity()),
            None if partial => warn!("Ignoring partially stored credential"),
            None => debug!("No stored credential"),
        }

        let (state, _) = watch::channel(credential);
        Self {
            inner: Arc::new(Inner {
                state,
                storage: Box::new(storage),
            }),
        }
    }

    /// A store that starts signed out and persists nothing.
    pub fn ephemeral() -> Self {
        Self::restore(MemoryCredentialStore::new())
    }

    pub fn current(&self) -> Option<Credential> {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.inner.state.subscribe()
    }

    /// Replace the current credential. Setting the same credential twice does
    /// not notify subscribers again.
    pub fn set(&self, credential: Credential) {
        if let Err(e) = self.persist(&credential) {
            warn!("Failed to persist credential: {}", e);
            self.forget();
        }

        let identity = credential.identity().to_string();
        let changed = self.inner.state.send_if_modified(|current| {
            if current.as_ref() == Some(&credential) {
                false
            } else {
                *current = Some(credential);
                true
            }
        });
        if changed {
            info!("Signed in as {}", identity);
        }
    }

    /// Sign out. Clearing an empty store is a no-op.
    pub fn clear(&self) {
        self.forget();
        let changed = self.inner.state.send_if_modified(|current| current.take().is_some());
        if changed {
            info!("Signed out");
        }
    }

    fn persist(&self, credential: &Credential) -> Result<(), StoreError> {
        self.inner.storage.write(TOKEN_KEY, credential.token())?;
        self.inner.storage.write(IDENTITY_KEY, credential.identity())?;
        Ok(())
    }

    fn forget(&self) {
        for key in [TOKEN_KEY, IDENTITY_KEY] {
            if let Err(e) = self.inner.storage.remove(key) {
                warn!("Failed to remove stored {}: {}", key, e);
            }
        }
    }
}

fn read_key(storage: &dyn CredentialStore, key: &str) -> Option<String> {
    match storage.read(key) {
        Ok(value) => value.filter(|v| !v.trim().is_empty()),
        Err(e) => {
            warn!("Failed to read stored {}: {}", key, e);
            None
        }
    }
}
