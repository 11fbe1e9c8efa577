use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};

/// Environment override for the persisted credential string.
pub const CREDENTIALS_ENV: &str = "TRAZO_API_KEYS";

/// Ordered pool of API credentials with a rotation cursor.
///
/// The ring is replaced wholesale by [`KeyRing::load`]; [`KeyRing::rotate`]
/// is the only other mutation. The cursor is always a valid index while the
/// ring is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRing {
    credentials: Vec<String>,
    cursor: usize,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the credential list from a raw comma-separated string.
    ///
    /// Entries are trimmed, blanks dropped, and duplicates removed while
    /// preserving first-seen order. The cursor resets to 0.
    pub fn load(&mut self, raw: &str) {
        let mut credentials: Vec<String> = Vec::new();
        for piece in raw.split(',') {
            let trimmed = piece.trim();
            if trimmed.is_empty() {
                continue;
            }
            if credentials.iter().any(|existing| existing == trimmed) {
                continue;
            }
            credentials.push(trimmed.to_string());
        }
        self.credentials = credentials;
        self.cursor = 0;
    }

    /// The credential at the cursor, or `None` when the ring is empty.
    pub fn current(&self) -> Option<&str> {
        self.credentials.get(self.cursor).map(String::as_str)
    }

    /// Advances the cursor one position, wrapping past the end, and returns
    /// the new current credential. No-op on an empty ring.
    pub fn rotate(&mut self) -> Option<&str> {
        if self.credentials.is_empty() {
            return None;
        }
        self.cursor = (self.cursor + 1) % self.credentials.len();
        self.current()
    }

    pub fn count(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

/// Cheaply clonable handle to a [`KeyRing`] shared across pipeline tasks.
///
/// Rotation interleaving between concurrent tasks is accepted behavior: the
/// retry protocol only needs *some* credential to be current at call time.
/// The lock protects memory, not fairness.
#[derive(Debug, Clone, Default)]
pub struct SharedKeyRing {
    inner: Arc<Mutex<KeyRing>>,
}

impl SharedKeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_raw(raw: &str) -> Self {
        let ring = Self::new();
        ring.load(raw);
        ring
    }

    pub fn load(&self, raw: &str) {
        self.lock().load(raw);
    }

    pub fn current(&self) -> Option<String> {
        self.lock().current().map(str::to_string)
    }

    pub fn rotate(&self) -> Option<String> {
        self.lock().rotate().map(str::to_string)
    }

    pub fn count(&self) -> usize {
        self.lock().count()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, KeyRing> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Where the raw credential string is persisted between sessions.
pub fn credentials_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("trazo").join("credentials"))
}

/// Persists the raw comma-separated credential string verbatim.
pub fn persist_credentials(raw: &str) -> Result<()> {
    let path = credentials_path().context("no config directory available")?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, raw).with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}

/// Reloads credentials at startup: environment override first, then the
/// persisted file. Returns `None` when neither is present.
pub fn stored_credentials() -> Option<String> {
    if let Ok(raw) = std::env::var(CREDENTIALS_ENV) {
        if !raw.trim().is_empty() {
            return Some(raw);
        }
    }
    let path = credentials_path()?;
    let raw = fs::read_to_string(path).ok()?;
    if raw.trim().is_empty() {
        return None;
    }
    Some(raw)
}
