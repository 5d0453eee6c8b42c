use std::sync::Arc;

use crate::cache::{CredentialCache, FileCredentialCache};
use crate::config::AuthConfig;
use crate::handshake::AuthResolver;
use crate::host::HostBridge;
use crate::request::{AuthenticatedClient, HttpTransport, ReqwestTransport};

/// Auth state for one running shell: built once at startup and handed to
/// every consumer instead of living in a global.
#[derive(Debug, Clone)]
pub struct AuthContext {
    resolver: AuthResolver,
    client: AuthenticatedClient,
}

impl AuthContext {
    #[must_use]
    pub fn new(host: Arc<dyn HostBridge>, config: AuthConfig) -> Self {
        Self::with_transport(host, config, Arc::new(ReqwestTransport::default()))
    }

    /// The development cache is only attached when the config runs in
    /// development mode and names a cache path.
    #[must_use]
    pub fn with_transport(
        host: Arc<dyn HostBridge>,
        config: AuthConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let cache = config
            .dev_cache_path
            .clone()
            .filter(|_| config.is_development())
            .map(|path| Arc::new(FileCredentialCache::new(path)) as Arc<dyn CredentialCache>);
        let resolver = AuthResolver::with_cache(host, config, cache);
        let client = AuthenticatedClient::with_transport(resolver.clone(), transport);
        Self { resolver, client }
    }

    #[must_use]
    pub fn resolver(&self) -> &AuthResolver {
        &self.resolver
    }

    #[must_use]
    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }
}
