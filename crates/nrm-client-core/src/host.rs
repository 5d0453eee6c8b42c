//! Contract between the field shell and the native host that embeds it.
//!
//! The host is the only party that performs real authentication. It hands
//! credentials over through a small set of optional capabilities; a host that
//! implements none of them is valid and simply never yields a credential.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::auth::{CredentialBundle, HostCredential, UserRecord};
use crate::handshake::CredentialSource;
use crate::request::{HttpResponse, RequestConfig};

/// Lifecycle events the host forwards while the handshake is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostSignal {
    VisibilityChanged,
    DomReady,
    WindowLoaded,
    CredentialInjected,
}

impl HostSignal {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VisibilityChanged => "visibility_changed",
            Self::DomReady => "dom_ready",
            Self::WindowLoaded => "window_loaded",
            Self::CredentialInjected => "credential_injected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostBridgeError {
    #[error("host does not provide {0}")]
    Unsupported(&'static str),
    #[error("host refresh failed: {0}")]
    Refresh(String),
    #[error("host request failed: {0}")]
    Request(String),
}

/// The synchronous capabilities are probed on every poll tick and listener
/// wake, and the first probe runs while the resolver holds its credential
/// lock. Implementations must answer from memory or another cheap source and
/// must not block.
#[async_trait]
pub trait HostBridge: Send + Sync {
    /// Credential object the host has already injected, if any.
    fn credential_object(&self) -> Option<HostCredential> {
        None
    }

    fn token(&self) -> Option<String> {
        None
    }

    fn user(&self) -> Option<UserRecord> {
        None
    }

    fn supports_refresh(&self) -> bool {
        false
    }

    async fn refresh(&self) -> Result<Option<HostCredential>, HostBridgeError> {
        Err(HostBridgeError::Unsupported("refresh"))
    }

    fn supports_request(&self) -> bool {
        false
    }

    async fn request(
        &self,
        _url: &str,
        _request: &RequestConfig,
    ) -> Result<HttpResponse, HostBridgeError> {
        Err(HostBridgeError::Unsupported("request"))
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<HostSignal>> {
        None
    }
}

/// Host with no capabilities. Used outside the native shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedHost;

impl HostBridge for DetachedHost {}

/// Checks the synchronous host capabilities in priority order: injected
/// object first, then the token accessor paired with the user accessor.
pub fn probe_host(
    host: &dyn HostBridge,
    now: DateTime<Utc>,
) -> Option<(CredentialBundle, CredentialSource)> {
    if let Some(object) = host.credential_object() {
        match CredentialBundle::from_host(object, now) {
            Ok(bundle) => return Some((bundle, CredentialSource::HostObject)),
            Err(error) => tracing::debug!(%error, "ignoring host credential object"),
        }
    }

    let token = host.token().filter(|token| !token.trim().is_empty())?;
    CredentialBundle::new(token, None, host.user(), now)
        .ok()
        .map(|bundle| (bundle, CredentialSource::HostTokenFunction))
}

/// Host bridge backed by a JSON file the native harness writes.
///
/// The file is re-read only when its modification time or length changes;
/// an unchanged file costs one `stat` per probe.
#[derive(Debug)]
pub struct FileHostBridge {
    path: PathBuf,
    last_read: Mutex<Option<FileRead>>,
}

#[derive(Debug)]
struct FileRead {
    stamp: FileStamp,
    credential: Option<HostCredential>,
}

type FileStamp = (Option<SystemTime>, u64);

impl FileHostBridge {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_read: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, raw: &str) -> Option<HostCredential> {
        match serde_json::from_str::<HostCredential>(raw) {
            Ok(credential) => Some(credential),
            Err(error) => {
                tracing::debug!(path = %self.path.display(), %error, "host credential file is not valid json");
                None
            }
        }
    }
}

#[async_trait]
impl HostBridge for FileHostBridge {
    fn credential_object(&self) -> Option<HostCredential> {
        let metadata = std::fs::metadata(&self.path).ok()?;
        let stamp: FileStamp = (metadata.modified().ok(), metadata.len());
        {
            let last_read = self.last_read.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(read) = last_read.as_ref().filter(|read| read.stamp == stamp) {
                return read.credential.clone();
            }
        }

        let raw = std::fs::read_to_string(&self.path).ok()?;
        let credential = self.parse(&raw);
        *self.last_read.lock().unwrap_or_else(PoisonError::into_inner) = Some(FileRead {
            stamp,
            credential: credential.clone(),
        });
        credential
    }

    fn user(&self) -> Option<UserRecord> {
        self.credential_object().and_then(|credential| credential.user)
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    async fn refresh(&self) -> Result<Option<HostCredential>, HostBridgeError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|error| HostBridgeError::Refresh(error.to_string()))?;
        Ok(self.parse(&raw))
    }
}
