//! Token persistence.
//!
//! The session reads and writes its [`TokenPair`] through the [`TokenStore`] seam so the same
//! session logic works with an in-memory store (tests, one-shot commands) and with a file that
//! survives between CLI invocations.

use crate::token::TokenPair;
use crate::{ApiError, ApiResult};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Persistent slot for the current token pair.
///
/// Implementations must be cheap enough to call on every request.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> ApiResult<Option<TokenPair>>;

    fn save(&self, tokens: &TokenPair) -> ApiResult<()>;

    /// Remove any stored tokens. Clearing an empty store is not an error.
    fn clear(&self) -> ApiResult<()>;
}

/// Process-local token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: Mutex::new(Some(tokens)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> ApiResult<Option<TokenPair>> {
        Ok(self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, tokens: &TokenPair) -> ApiResult<()> {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> ApiResult<()> {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// JSON file token store.
///
/// Writes go to a sibling `.tmp` file which is then renamed over the target, so a crash mid-write
/// never leaves a truncated token file. On unix the file is created with mode `0600`.
///
/// A missing file loads as `None`. A file that exists but does not parse is logged and also
/// loads as `None`; the next `save` overwrites it.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "tokens".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> ApiResult<Option<TokenPair>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ApiError::TokenStore(e)),
        };

        match serde_json::from_str::<TokenPair>(&raw) {
            Ok(tokens) => Ok(Some(tokens)),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "ignoring unreadable token file"
                );
                Ok(None)
            }
        }
    }

    fn save(&self, tokens: &TokenPair) -> ApiResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(ApiError::TokenStore)?;
        }

        let body = serde_json::to_vec(tokens).map_err(ApiError::Serialization)?;
        let temp = self.temp_path();
        write_private(&temp, &body).map_err(ApiError::TokenStore)?;
        fs::rename(&temp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp);
            ApiError::TokenStore(e)
        })?;

        tracing::debug!(path = %self.path.display(), "saved tokens");
        Ok(())
    }

    fn clear(&self) -> ApiResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ApiError::TokenStore(e)),
        }
    }
}

#[cfg(unix)]
fn write_private(path: &Path, body: &[u8]) -> io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(body)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, body: &[u8]) -> io::Result<()> {
    fs::write(path, body)
}
