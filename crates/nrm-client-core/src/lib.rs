//! Client core for the NRM field shell: host credential handshake,
//! development overrides, and authenticated requests.

pub mod auth;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod handshake;
pub mod host;
pub mod request;

pub use auth::{
    AuthInputError, CredentialBundle, CredentialError, HostCredential, ProjectDetail, UserRecord,
    normalize_base_url, normalize_email,
};
pub use cache::{
    CacheError, CredentialCache, DEV_CREDENTIAL_CACHE_KEY, FileCredentialCache,
    MemoryCredentialCache,
};
pub use config::{AuthConfig, AuthMode, ConfigError};
pub use context::AuthContext;
pub use error::AuthError;
pub use handshake::{AuthResolver, CredentialSource, HandshakeOutcome, HandshakeState};
pub use host::{DetachedHost, FileHostBridge, HostBridge, HostBridgeError, HostSignal, probe_host};
pub use request::{
    AuthenticatedClient, HttpMethod, HttpResponse, HttpStatusError, HttpTransport,
    ReqwestTransport, RequestBody, RequestConfig, TransportError,
};
