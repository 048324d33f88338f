//! Credential store: persisted username/password, OAuth tokens and known LAN
//! device addresses.
//!
//! Every setter applies its mutation and writes the result to the backend
//! while holding the same lock, so concurrent writers (discovery, pairing,
//! LAN token invalidation, credential edits) can never lose each other's
//! updates. Watchers are notified only when the relevant part changed.

mod backend;
mod state;

pub use backend::{default_backend, FileBackend, MemoryBackend, StateBackend};
#[cfg(feature = "keyring-storage")]
pub use backend::KeyringBackend;
pub use state::{Credentials, DeviceAddress, Login, StoredState};

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<StoredState>,
    backend: Box<dyn StateBackend>,
    login_tx: watch::Sender<Login>,
    devices_tx: watch::Sender<Vec<DeviceAddress>>,
}

impl CredentialStore {
    /// Load state from `backend`. Unreadable state is logged and replaced by
    /// an empty one rather than failing startup.
    pub fn open(backend: Box<dyn StateBackend>) -> Self {
        let state = match backend.load() {
            Ok(Some(state)) => {
                tracing::info!(
                    "Loaded state: {} known printers, cloud login {}",
                    state.devices.len(),
                    if state.credentials.has_login() { "present" } else { "absent" }
                );
                state
            }
            Ok(None) => {
                tracing::debug!("No stored state, starting fresh");
                StoredState::default()
            }
            Err(e) => {
                tracing::warn!("Failed to load stored state: {:#}", e);
                StoredState::default()
            }
        };

        let (login_tx, _) = watch::channel(state.credentials.login());
        let (devices_tx, _) = watch::channel(state.device_addresses());

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                backend,
                login_tx,
                devices_tx,
            }),
        }
    }

    pub fn in_memory() -> Self {
        Self::open(Box::new(MemoryBackend::default()))
    }

    pub fn with_state(state: StoredState) -> Self {
        Self::open(Box::new(MemoryBackend::with_state(state)))
    }

    pub fn storage_info(&self) -> String {
        self.inner.backend.describe()
    }

    fn lock(&self) -> MutexGuard<'_, StoredState> {
        // A panic while holding the lock cannot leave the state half-written
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut StoredState) -> R) -> R {
        let mut state = self.lock();
        let before = state.clone();
        let result = f(&mut state);

        if *state != before {
            if let Err(e) = self.inner.backend.save(&state) {
                tracing::warn!("Failed to persist state: {:#}", e);
            }

            let login = state.credentials.login();
            self.inner.login_tx.send_if_modified(|current| {
                if *current != login {
                    *current = login;
                    true
                } else {
                    false
                }
            });

            if state.devices != before.devices {
                self.inner.devices_tx.send_replace(state.device_addresses());
            }
        }

        result
    }

    pub fn snapshot(&self) -> StoredState {
        self.lock().clone()
    }

    // ------------------------------------------------------------------
    // Cloud credentials
    // ------------------------------------------------------------------

    pub fn credentials(&self) -> Credentials {
        self.lock().credentials.clone()
    }

    /// Record a username/password edit coming from the UI boundary.
    pub fn set_login(&self, username: &str, password: &str) {
        self.mutate(|s| {
            s.credentials.username = username.to_string();
            s.credentials.password = password.to_string();
        });
    }

    /// Replace the OAuth session in one write.
    pub fn set_tokens(&self, access_token: &str, refresh_token: &str, expiry: DateTime<Utc>) {
        self.mutate(|s| {
            s.credentials.access_token = access_token.to_string();
            s.credentials.refresh_token = refresh_token.to_string();
            s.credentials.token_expiry = Some(expiry);
        });
    }

    pub fn clear_access_token(&self) {
        self.mutate(|s| s.credentials.access_token.clear());
    }

    pub fn clear_tokens(&self) {
        self.mutate(|s| {
            s.credentials.access_token.clear();
            s.credentials.refresh_token.clear();
            s.credentials.token_expiry = None;
        });
    }

    pub fn clear_credentials(&self) {
        self.mutate(|s| s.credentials = Credentials::default());
    }

    pub fn subscribe_login(&self) -> watch::Receiver<Login> {
        self.inner.login_tx.subscribe()
    }

    // ------------------------------------------------------------------
    // LAN devices
    // ------------------------------------------------------------------

    pub fn devices(&self) -> Vec<DeviceAddress> {
        self.lock().device_addresses()
    }

    pub fn device(&self, key: &str) -> Option<DeviceAddress> {
        let key = DeviceAddress::parse(key).key();
        self.lock()
            .device_addresses()
            .into_iter()
            .find(|d| d.key() == key)
    }

    /// Insert an unpaired address. Returns `false` if it was already known.
    pub fn insert_device(&self, address: &DeviceAddress) -> bool {
        let key = address.key();
        self.mutate(|s| {
            if s.devices.contains_key(&key) {
                false
            } else {
                s.devices.insert(key, String::new());
                true
            }
        })
    }

    /// Assign or clear the pairing token, inserting the address if unknown.
    pub fn set_device_token(&self, key: &str, token: Option<&str>) {
        let key = DeviceAddress::parse(key).key();
        self.mutate(|s| {
            s.devices.insert(key, token.unwrap_or_default().to_string());
        });
    }

    /// Blank the pairing token only if it still equals `expected`. Returns
    /// whether it was cleared; a token replaced in the meantime is kept.
    pub fn clear_device_token_if(&self, key: &str, expected: &str) -> bool {
        let key = DeviceAddress::parse(key).key();
        self.mutate(|s| match s.devices.get_mut(&key) {
            Some(token) if token == expected => {
                token.clear();
                true
            }
            _ => false,
        })
    }

    pub fn subscribe_devices(&self) -> watch::Receiver<Vec<DeviceAddress>> {
        self.inner.devices_tx.subscribe()
    }

    /// Forget everything and remove it from the backend.
    pub fn reset(&self) -> anyhow::Result<()> {
        self.mutate(|s| *s = StoredState::default());
        self.inner.backend.clear()
    }
}
