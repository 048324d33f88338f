//! Persistence backends for the agent state.
//!
//! Storage priority:
//! 1. Platform keyring (if `keyring-storage` feature enabled and available)
//! 2. File-based storage in the printinator config directory

use super::state::StoredState;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

#[cfg(feature = "keyring-storage")]
use keyring::Entry;

/// Service name used for keyring storage
#[cfg(feature = "keyring-storage")]
const KEYRING_SERVICE: &str = "printinator";
/// Username used for keyring entry
#[cfg(feature = "keyring-storage")]
const KEYRING_USER: &str = "state";

const STATE_FILE: &str = ".state";

/// Where the persisted state lives.
pub trait StateBackend: Send + Sync {
    fn load(&self) -> Result<Option<StoredState>>;
    fn save(&self, state: &StoredState) -> Result<()>;
    fn clear(&self) -> Result<()>;
    /// Human-readable storage location, for `status` and `config` output
    fn describe(&self) -> String;
}

/// Pick the default backend for this build.
pub fn default_backend() -> Result<Box<dyn StateBackend>> {
    let file = FileBackend::default_location()?;

    #[cfg(feature = "keyring-storage")]
    {
        Ok(Box::new(KeyringBackend::new(file)))
    }

    #[cfg(not(feature = "keyring-storage"))]
    {
        Ok(Box::new(file))
    }
}

// ============================================================================
// File-based storage (always available)
// ============================================================================

#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.config/printinator/.state`
    pub fn default_location() -> Result<Self> {
        let dir = crate::config::get_config_dir().context("Failed to find config directory")?;
        Ok(Self::new(dir.join(STATE_FILE)))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl StateBackend for FileBackend {
    fn load(&self) -> Result<Option<StoredState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).context("Failed to read state file")?;
        let state: StoredState =
            serde_json::from_str(&content).context("Failed to parse state file")?;
        tracing::debug!("State loaded from file: {:?}", self.path);
        Ok(Some(state))
    }

    fn save(&self, state: &StoredState) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir).context("Failed to create config directory")?;
            }
        }
        let json = serde_json::to_string(state).context("Failed to serialize state")?;

        // Tokens and the password live in here
        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.path)
                .context("Failed to create state file")?;
            let mut file = std::io::BufWriter::new(file);
            file.write_all(json.as_bytes())
                .context("Failed to write state file")?;
            file.flush().context("Failed to write state file")?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&self.path, &json).context("Failed to write state file")?;
        }

        tracing::trace!("State saved to file: {:?}", self.path);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).context("Failed to delete state file")?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("File-based storage: {}", self.path.display())
    }
}

// ============================================================================
// Keyring-based storage (optional, platform-specific)
// ============================================================================

#[cfg(feature = "keyring-storage")]
pub struct KeyringBackend {
    fallback: FileBackend,
}

#[cfg(feature = "keyring-storage")]
impl KeyringBackend {
    pub fn new(fallback: FileBackend) -> Self {
        Self { fallback }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(KEYRING_SERVICE, KEYRING_USER)
            .map_err(|e| anyhow::anyhow!("Failed to create keyring entry: {}", e))
    }
}

#[cfg(feature = "keyring-storage")]
impl StateBackend for KeyringBackend {
    fn load(&self) -> Result<Option<StoredState>> {
        let entry = match self.entry() {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("{}, trying file fallback", e);
                return self.fallback.load();
            }
        };

        match entry.get_password() {
            Ok(json) => {
                tracing::debug!("State loaded from keyring");
                let state: StoredState =
                    serde_json::from_str(&json).context("Failed to parse state from keyring")?;
                Ok(Some(state))
            }
            Err(keyring::Error::NoEntry) => {
                tracing::debug!("No state in keyring, trying file fallback");
                self.fallback.load()
            }
            Err(e) => {
                tracing::warn!("Failed to load state from keyring: {}, trying file fallback", e);
                self.fallback.load()
            }
        }
    }

    fn save(&self, state: &StoredState) -> Result<()> {
        let entry = match self.entry() {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("{}, using file storage", e);
                return self.fallback.save(state);
            }
        };

        let json = serde_json::to_string(state).context("Failed to serialize state")?;
        if let Err(e) = entry.set_password(&json) {
            tracing::warn!("Failed to save state to keyring: {}, using file storage", e);
            return self.fallback.save(state);
        }

        // Keep a file copy for when the keyring is locked on next start
        if let Err(e) = self.fallback.save(state) {
            tracing::debug!("Failed to save backup state to file: {}", e);
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.fallback.clear()?;

        let entry = self.entry()?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("Failed to delete state from keyring: {}", e)),
        }
    }

    fn describe(&self) -> String {
        #[cfg(target_os = "windows")]
        let location = "Windows Credential Manager";
        #[cfg(target_os = "macos")]
        let location = "macOS Keychain";
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        let location = "Linux Secret Service (GNOME Keyring/KWallet)";

        format!("{} (with file fallback: {})", location, self.fallback.path.display())
    }
}

// ============================================================================
// In-memory storage
// ============================================================================

/// Keeps state for the lifetime of the process only.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<Option<StoredState>>,
}

impl MemoryBackend {
    pub fn with_state(state: StoredState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }
}

impl StateBackend for MemoryBackend {
    fn load(&self) -> Result<Option<StoredState>> {
        let guard = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("memory backend poisoned"))?;
        Ok(guard.clone())
    }

    fn save(&self, state: &StoredState) -> Result<()> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("memory backend poisoned"))?;
        *guard = Some(state.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("memory backend poisoned"))?;
        *guard = None;
        Ok(())
    }

    fn describe(&self) -> String {
        "In-memory storage".to_string()
    }
}
