//! The controller's remembered credentials.
//!
//! After a successful pairing the controller keeps two things: the token it
//! was given, and the address it reached the host at.  Both live in a small
//! TOML file so the next run can reconnect without pairing again.
//!
//! ```toml
//! token = "1a2b3c4d"
//! server = "ws://192.168.1.20:3001"
//! ```
//!
//! A token the host rejects is discarded, never retried.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error accessing credential cache at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse credential cache TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize credential cache: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// On-disk shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Address of the last successful direct connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

/// Remembered credentials, optionally backed by a file.
#[derive(Debug, Default)]
pub struct CredentialCache {
    path: Option<PathBuf>,
    stored: StoredCredentials,
}

impl CredentialCache {
    /// A cache that is never written to disk.
    pub fn in_memory(stored: StoredCredentials) -> Self {
        Self { path: None, stored }
    }

    /// Loads the cache at `path`; a missing file is an empty cache.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] for file-system errors other than "not
    /// found", and [`CacheError::Parse`] if the TOML is malformed.
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        let stored = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredCredentials::default(),
            Err(source) => {
                return Err(CacheError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            stored,
        })
    }

    /// Writes the cache back to its file.  A no-op for in-memory caches.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] for file-system failures or
    /// [`CacheError::Serialize`] if serialization fails.
    pub fn save(&self) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| CacheError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(&self.stored)?;
        std::fs::write(path, content).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("credential cache saved to {}", path.display());
        Ok(())
    }

    pub fn token(&self) -> Option<&str> {
        self.stored.token.as_deref()
    }

    pub fn server(&self) -> Option<&str> {
        self.stored.server.as_deref()
    }

    /// Replaces the token, e.g. after scanning a new pairing QR code.
    pub fn set_token(&mut self, token: impl Into<String>) {
        self.stored.token = Some(token.into());
    }

    pub fn remember_server(&mut self, server: impl Into<String>) {
        self.stored.server = Some(server.into());
    }

    /// Forgets the token after the host rejected it.  The address is kept.
    pub fn discard_token(&mut self) {
        self.stored.token = None;
    }

    pub fn stored(&self) -> &StoredCredentials {
        &self.stored
    }
}
