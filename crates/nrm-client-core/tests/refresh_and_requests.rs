mod support;

use std::sync::Arc;

use nrm_client_core::{
    AuthConfig, AuthError, AuthResolver, AuthenticatedClient, CredentialCache, CredentialSource,
    HostBridgeError, HostCredential, HttpResponse, MemoryCredentialCache, RequestConfig,
};

use support::{RecordingTransport, ScriptedHost, bundle, host_credential};

async fn resolved_with(host: Arc<ScriptedHost>, config: AuthConfig) -> AuthResolver {
    let resolver = AuthResolver::new(host, config);
    resolver.resolve().await.expect("initial bundle");
    resolver
}

#[tokio::test]
async fn refresh_replaces_bundle_wholesale() {
    let host = ScriptedHost::with_credential(host_credential("first"));
    let resolver = resolved_with(host.clone(), AuthConfig::production()).await;
    host.push_refresh(Ok(Some(HostCredential {
        access_token: Some("second".to_string()),
        ..HostCredential::default()
    })));

    let refreshed = resolver.refresh().await.expect("refresh");

    assert_eq!(refreshed.access_token(), "second");
    assert_eq!(resolver.access_token().as_deref(), Some("second"));
    assert!(resolver.user().is_none(), "old user must not leak into the new bundle");
    assert_eq!(
        resolver.last_outcome().map(|outcome| outcome.source),
        Some(CredentialSource::HostRefresh)
    );
}

#[tokio::test]
async fn failed_refresh_keeps_previous_bundle() {
    let host = ScriptedHost::with_credential(host_credential("first"));
    let resolver = resolved_with(host.clone(), AuthConfig::production()).await;
    let before = resolver.snapshot();

    host.push_refresh(Err(HostBridgeError::Refresh("session revoked".to_string())));
    let error = resolver.refresh().await.expect_err("rejected refresh");
    assert!(matches!(error, AuthError::RefreshFailed(ref message) if message.contains("session revoked")));
    assert_eq!(resolver.snapshot(), before);

    host.push_refresh(Ok(None));
    assert!(matches!(
        resolver.refresh().await,
        Err(AuthError::RefreshFailed(_))
    ));
    assert_eq!(resolver.snapshot(), before);

    host.push_refresh(Ok(Some(HostCredential::default())));
    assert!(matches!(
        resolver.refresh().await,
        Err(AuthError::RefreshFailed(_))
    ));
    assert_eq!(resolver.snapshot(), before);
}

#[tokio::test]
async fn refresh_without_host_support_fails_in_production() {
    let host = ScriptedHost::with_credential(host_credential("first"));
    let resolver = resolved_with(host, AuthConfig::production()).await;

    assert_eq!(resolver.refresh().await, Err(AuthError::RefreshUnsupported));
    assert_eq!(resolver.access_token().as_deref(), Some("first"));
}

#[tokio::test]
async fn development_refresh_reissues_cached_or_mock_identity() {
    let cache = Arc::new(MemoryCredentialCache::new());
    let resolver = AuthResolver::with_cache(
        ScriptedHost::new(),
        AuthConfig::development(),
        Some(cache.clone()),
    );

    let mock = resolver.refresh().await.expect("mock refresh");
    assert!(mock.is_superadmin());
    assert_eq!(
        resolver.last_outcome().map(|outcome| outcome.source),
        Some(CredentialSource::DevMock)
    );

    cache.persist(&bundle("cached")).expect("seed cache");
    let reissued = resolver.refresh().await.expect("cache refresh");
    assert_eq!(reissued.access_token(), "cached");
    assert_eq!(
        resolver.last_outcome().map(|outcome| outcome.source),
        Some(CredentialSource::DevCache)
    );
}

#[tokio::test]
async fn development_refresh_persists_the_reissued_identity() {
    let cache = Arc::new(MemoryCredentialCache::new());
    let resolver = AuthResolver::with_cache(
        ScriptedHost::new(),
        AuthConfig::development(),
        Some(cache.clone()),
    );

    let mock = resolver.refresh().await.expect("mock refresh");

    let cached = cache.load().expect("load").expect("persisted bundle");
    assert_eq!(cached.access_token(), mock.access_token());
    assert!(cached.is_superadmin());

    let restarted = AuthResolver::with_cache(
        ScriptedHost::new(),
        AuthConfig::development(),
        Some(cache.clone()),
    );
    assert_eq!(restarted.access_token().as_deref(), Some(mock.access_token()));
    assert_eq!(
        restarted.last_outcome().map(|outcome| outcome.source),
        Some(CredentialSource::DevCache)
    );
}

#[tokio::test]
async fn handshake_timeout_mock_is_not_persisted() {
    let cache = Arc::new(MemoryCredentialCache::new());
    let resolver = AuthResolver::with_cache(
        ScriptedHost::new(),
        AuthConfig {
            poll_interval: std::time::Duration::from_millis(1),
            max_poll_attempts: 1,
            ..AuthConfig::development()
        },
        Some(cache.clone()),
    );

    let outcome = resolver.resolve_outcome().await;

    assert_eq!(outcome.source, CredentialSource::DevMock);
    assert!(cache.load().expect("load").is_none());
}

#[tokio::test]
async fn development_refresh_without_mock_is_unsupported() {
    let config = AuthConfig {
        mock_fallback: false,
        ..AuthConfig::development()
    };
    let resolver = AuthResolver::new(ScriptedHost::new(), config);
    assert_eq!(resolver.refresh().await, Err(AuthError::RefreshUnsupported));
}

#[tokio::test]
async fn request_without_token_never_reaches_the_network() {
    let host = ScriptedHost::new();
    host.serve_requests(Ok(HttpResponse::new(200, Vec::new())));
    let transport = RecordingTransport::responding(HttpResponse::new(200, Vec::new()));
    let resolver = AuthResolver::new(host.clone(), AuthConfig::development());
    resolver.clear_override().expect("clear");
    let client = AuthenticatedClient::with_transport(resolver, transport.clone());

    let error = client
        .send("https://api.example.org/api/v1/plans", RequestConfig::get())
        .await
        .expect_err("no credential");

    assert_eq!(error, AuthError::NoCredential);
    assert!(transport.sent().is_empty());
    assert!(host.requests().is_empty());
}

#[tokio::test]
async fn direct_requests_carry_bearer_token() {
    let host = ScriptedHost::with_credential(host_credential("bearer-me"));
    let transport =
        RecordingTransport::responding(HttpResponse::new(200, br#"{"ok": true}"#.to_vec()));
    let resolver = resolved_with(host, AuthConfig::production()).await;
    let client = AuthenticatedClient::with_transport(resolver, transport.clone());

    let response = client
        .send(
            "https://api.example.org/api/v1/plans",
            RequestConfig::get().with_header("Authorization", "Bearer stale"),
        )
        .await
        .expect("response");

    assert!(response.is_success());
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    let (url, request) = &sent[0];
    assert_eq!(url, "https://api.example.org/api/v1/plans");
    assert_eq!(request.header("authorization"), Some("Bearer bearer-me"));
}

#[tokio::test]
async fn host_delegation_is_preferred() {
    let host = ScriptedHost::with_credential(host_credential("host-token"));
    host.serve_requests(Ok(HttpResponse::new(202, b"from host".to_vec())));
    let transport = RecordingTransport::responding(HttpResponse::new(200, Vec::new()));
    let resolver = resolved_with(host.clone(), AuthConfig::production()).await;
    let client = AuthenticatedClient::with_transport(resolver, transport.clone());

    let response = client
        .send("https://api.example.org/x", RequestConfig::get())
        .await
        .expect("response");

    assert_eq!(response.status, 202);
    assert_eq!(response.text(), "from host");
    assert_eq!(host.requests().len(), 1);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn failed_host_delegation_falls_back_to_direct() {
    let host = ScriptedHost::with_credential(host_credential("host-token"));
    host.serve_requests(Err(HostBridgeError::Request("bridge offline".to_string())));
    let transport = RecordingTransport::responding(HttpResponse::new(200, Vec::new()));
    let resolver = resolved_with(host.clone(), AuthConfig::production()).await;
    let client = AuthenticatedClient::with_transport(resolver, transport.clone());

    client
        .send("https://api.example.org/x", RequestConfig::get())
        .await
        .expect("fallback response");

    assert_eq!(host.requests().len(), 1);
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.header("authorization"), Some("Bearer host-token"));
}

#[tokio::test]
async fn transport_failures_surface_as_request_errors() {
    let host = ScriptedHost::with_credential(host_credential("t"));
    let resolver = resolved_with(host, AuthConfig::production()).await;
    let client =
        AuthenticatedClient::with_transport(resolver, RecordingTransport::failing("connection refused"));

    let error = client
        .send("https://api.example.org/x", RequestConfig::get())
        .await
        .expect_err("transport failure");

    assert_eq!(error, AuthError::Request("connection refused".to_string()));
}
