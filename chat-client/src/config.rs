use anyhow::{Context, Result};
use chat_session::{CredentialStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientConfig {
    /// Persisted credential halves, keyed by `access_token` / `user_id`
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,

    #[serde(default)]
    pub preferences: Preferences,

    /// Last time this file was written (RFC 3339)
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Preferences {
    #[serde(default)]
    pub backend_url: Option<String>,

    /// Re-dial the live channel after it drops
    #[serde(default)]
    pub reconnect: bool,
}

/// PID lock file guarding read-modify-write of the config
pub struct ConfigLock {
    lock_path: PathBuf,
    _file: File,
}

impl ConfigLock {
    const MAX_ATTEMPTS: u32 = 50;
    const RETRY_DELAY: Duration = Duration::from_millis(100);

    pub fn acquire(config_path: &Path) -> Result<Self> {
        let lock_path = config_path.with_extension("lock");
        let mut attempts = 0;

        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    file.flush()?;
                    return Ok(ConfigLock {
                        lock_path,
                        _file: file,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if holder_is_gone(&lock_path) {
                        let _ = fs::remove_file(&lock_path);
                        continue;
                    }

                    attempts += 1;
                    if attempts >= Self::MAX_ATTEMPTS {
                        anyhow::bail!(
                            "Failed to acquire config lock after {} attempts",
                            Self::MAX_ATTEMPTS
                        );
                    }
                    std::thread::sleep(Self::RETRY_DELAY);
                }
                Err(e) => return Err(e).context("Failed to create lock file"),
            }
        }
    }
}

impl Drop for ConfigLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

/// True when the lock file names a process that no longer exists.
fn holder_is_gone(lock_path: &Path) -> bool {
    let mut pid = String::new();
    let readable = File::open(lock_path)
        .and_then(|mut f| f.read_to_string(&mut pid))
        .is_ok();
    if !readable {
        return false;
    }
    let Ok(pid) = pid.trim().parse::<i32>() else {
        return false;
    };

    #[cfg(unix)]
    {
        // Signal 0 only probes for existence.
        unsafe { libc::kill(pid, 0) != 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

impl ClientConfig {
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = directories::ProjectDirs::from("com", "chat-client", "chat-client")
            .context("Failed to determine config directory")?
            .config_dir()
            .to_path_buf();

        Ok(config_dir.join("config.json"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).context("Failed to read config file")?;
        serde_json::from_str(&contents).context("Failed to parse config file")
    }

    /// Load with the lock held, for read-modify-write.
    pub fn load_locked(path: &Path) -> Result<(Self, ConfigLock)> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let lock = ConfigLock::acquire(path)?;
        let config = Self::load_from(path)?;
        Ok((config, lock))
    }

    /// Write through a temp file and rename, while holding the lock.
    pub fn save_with_lock(&mut self, path: &Path, _lock: &ConfigLock) -> Result<()> {
        self.updated_at = Some(chrono::Utc::now().to_rfc3339());

        let temp_path = path.with_extension("tmp");
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&temp_path, &contents).context("Failed to write temp config file")?;
        fs::rename(&temp_path, path).context("Failed to rename config file")?;
        Ok(())
    }

    /// Apply `change` to the file on disk under the lock.
    pub fn update(path: &Path, change: impl FnOnce(&mut Self)) -> Result<Self> {
        let (mut config, lock) = Self::load_locked(path)?;
        change(&mut config);
        config.save_with_lock(path, &lock)?;
        Ok(config)
    }
}

/// Credential storage in the client config file
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialStore for FileCredentialStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let config = off_worker(|| ClientConfig::load_from(&self.path)).map_err(store_error)?;
        Ok(config.credentials.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        off_worker(|| {
            ClientConfig::update(&self.path, |config| {
                config.credentials.insert(key.to_string(), value.to_string());
            })
        })
        .map(|_| ())
        .map_err(store_error)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        if !self.path.exists() {
            return Ok(());
        }
        off_worker(|| {
            ClientConfig::update(&self.path, |config| {
                config.credentials.remove(key);
            })
        })
        .map(|_| ())
        .map_err(store_error)
    }
}

/// Run file I/O that may wait on the config lock. On a multi-threaded
/// runtime the worker hands its other tasks off first.
fn off_worker<T>(work: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

fn store_error(err: anyhow::Error) -> StoreError {
    let message = format!("{:#}", err);
    match err.downcast::<std::io::Error>() {
        Ok(io) => StoreError::Io(io),
        Err(_) => StoreError::Corrupt(message),
    }
}
