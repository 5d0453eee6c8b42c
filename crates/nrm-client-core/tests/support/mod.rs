use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use nrm_client_core::{
    AuthConfig, CredentialBundle, HostBridge, HostBridgeError, HostCredential, HostSignal,
    HttpResponse, HttpTransport, ProjectDetail, RequestConfig, TransportError, UserRecord,
};
use tokio::sync::broadcast;

pub fn host_credential(token: &str) -> HostCredential {
    HostCredential {
        access_token: Some(token.to_string()),
        refresh_token: Some(format!("{token}-refresh")),
        user: Some(UserRecord {
            id: "42".to_string(),
            first_name: "Meera".to_string(),
            last_name: "Iyer".to_string(),
            email: "meera@example.org".to_string(),
            organization_name: "Catchment Collective".to_string(),
            is_superadmin: false,
            project_details: vec![ProjectDetail {
                project_id: "p-1".to_string(),
                project_name: "Ridge Restoration".to_string(),
            }],
        }),
        timestamp: None,
    }
}

pub fn bundle(token: &str) -> CredentialBundle {
    CredentialBundle::from_host(host_credential(token), Utc::now()).expect("bundle")
}

/// Handshake config with a poll interval long enough that only host
/// signals can settle the handshake early.
pub fn listener_only_config(base: AuthConfig) -> AuthConfig {
    AuthConfig {
        poll_interval: Duration::from_secs(10),
        max_poll_attempts: 3,
        ..base
    }
}

#[derive(Default)]
struct HostScript {
    credential: Option<HostCredential>,
    token: Option<String>,
    refresh_supported: bool,
    refreshes: VecDeque<Result<Option<HostCredential>, HostBridgeError>>,
    request_result: Option<Result<HttpResponse, HostBridgeError>>,
    requests: Vec<(String, RequestConfig)>,
}

pub struct ScriptedHost {
    script: Mutex<HostScript>,
    probes: AtomicUsize,
    subscriptions: AtomicUsize,
    signals: broadcast::Sender<HostSignal>,
}

impl ScriptedHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(HostScript::default()))
    }

    pub fn with_credential(credential: HostCredential) -> Arc<Self> {
        Arc::new(Self::build(HostScript {
            credential: Some(credential),
            ..HostScript::default()
        }))
    }

    pub fn with_token(token: &str) -> Arc<Self> {
        Arc::new(Self::build(HostScript {
            token: Some(token.to_string()),
            ..HostScript::default()
        }))
    }

    fn build(script: HostScript) -> Self {
        let (signals, _) = broadcast::channel(16);
        Self {
            script: Mutex::new(script),
            probes: AtomicUsize::new(0),
            subscriptions: AtomicUsize::new(0),
            signals,
        }
    }

    pub fn set_credential(&self, credential: Option<HostCredential>) {
        self.script.lock().expect("script").credential = credential;
    }

    pub fn emit(&self, signal: HostSignal) {
        let _ = self.signals.send(signal);
    }

    pub fn push_refresh(&self, result: Result<Option<HostCredential>, HostBridgeError>) {
        let mut script = self.script.lock().expect("script");
        script.refresh_supported = true;
        script.refreshes.push_back(result);
    }

    pub fn serve_requests(&self, result: Result<HttpResponse, HostBridgeError>) {
        self.script.lock().expect("script").request_result = Some(result);
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(String, RequestConfig)> {
        self.script.lock().expect("script").requests.clone()
    }
}

#[async_trait]
impl HostBridge for ScriptedHost {
    fn credential_object(&self) -> Option<HostCredential> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.script.lock().expect("script").credential.clone()
    }

    fn token(&self) -> Option<String> {
        self.script.lock().expect("script").token.clone()
    }

    fn supports_refresh(&self) -> bool {
        self.script.lock().expect("script").refresh_supported
    }

    async fn refresh(&self) -> Result<Option<HostCredential>, HostBridgeError> {
        self.script
            .lock()
            .expect("script")
            .refreshes
            .pop_front()
            .unwrap_or(Err(HostBridgeError::Refresh("script exhausted".to_string())))
    }

    fn supports_request(&self) -> bool {
        self.script.lock().expect("script").request_result.is_some()
    }

    async fn request(
        &self,
        url: &str,
        request: &RequestConfig,
    ) -> Result<HttpResponse, HostBridgeError> {
        let mut script = self.script.lock().expect("script");
        script.requests.push((url.to_string(), request.clone()));
        script
            .request_result
            .clone()
            .unwrap_or(Err(HostBridgeError::Unsupported("request")))
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<HostSignal>> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Some(self.signals.subscribe())
    }
}

pub struct RecordingTransport {
    result: Result<HttpResponse, TransportError>,
    sent: Mutex<Vec<(String, RequestConfig)>>,
}

impl RecordingTransport {
    pub fn responding(response: HttpResponse) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(response),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Err(TransportError::new(message)),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<(String, RequestConfig)> {
        self.sent.lock().expect("sent").clone()
    }
}

#[async_trait]
impl HttpTransport for RecordingTransport {
    async fn send(
        &self,
        url: &str,
        request: &RequestConfig,
    ) -> Result<HttpResponse, TransportError> {
        self.sent
            .lock()
            .expect("sent")
            .push((url.to_string(), request.clone()));
        self.result.clone()
    }
}
