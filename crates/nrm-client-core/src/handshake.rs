//! Credential handshake between the field shell and its native host.
//!
//! The host may inject credentials synchronously, after a delay, or never.
//! [`AuthResolver`] owns the single current-credential slot and settles it
//! exactly once per handshake:
//!
//! 1. probe the host immediately (injected object, then token accessor);
//! 2. otherwise poll every `poll_interval` up to `max_poll_attempts` times,
//!    while host lifecycle signals trigger extra probes;
//! 3. on exhaustion fall back to the development mock identity, or to no
//!    credential at all.
//!
//! Overrides and refreshes replace the slot wholesale and supersede any
//! handshake still in flight.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::auth::{CredentialBundle, UserRecord, development_mock_bundle};
use crate::cache::CredentialCache;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::host::{HostBridge, HostSignal, probe_host};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialSource {
    HostObject,
    HostTokenFunction,
    HostRefresh,
    DevCache,
    DevOverride,
    DevMock,
    Absent,
}

impl CredentialSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostObject => "host_object",
            Self::HostTokenFunction => "host_token_function",
            Self::HostRefresh => "host_refresh",
            Self::DevCache => "dev_cache",
            Self::DevOverride => "dev_override",
            Self::DevMock => "dev_mock",
            Self::Absent => "absent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Unresolved,
    Resolving,
    Resolved,
    TimedOut,
}

impl HandshakeState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Resolving => "resolving",
            Self::Resolved => "resolved",
            Self::TimedOut => "timed_out",
        }
    }

    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Resolved | Self::TimedOut)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOutcome {
    pub bundle: Option<CredentialBundle>,
    pub source: CredentialSource,
    pub poll_attempts: u32,
    pub timed_out: bool,
}

impl HandshakeOutcome {
    fn settled(bundle: Option<CredentialBundle>, source: CredentialSource) -> Self {
        Self {
            bundle,
            source,
            poll_attempts: 0,
            timed_out: false,
        }
    }
}

type SharedHandshake = Shared<BoxFuture<'static, HandshakeOutcome>>;

enum Phase {
    Unresolved,
    Resolving {
        handshake: SharedHandshake,
        task: AbortHandle,
    },
    Settled(HandshakeOutcome),
}

struct Slot {
    generation: u64,
    phase: Phase,
}

fn lock_slot(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Settles the slot unless an override or refresh replaced it meanwhile.
fn settle_if_current(slot: &Mutex<Slot>, generation: u64, outcome: &HandshakeOutcome) {
    let mut slot = lock_slot(slot);
    if slot.generation == generation && matches!(slot.phase, Phase::Resolving { .. }) {
        slot.phase = Phase::Settled(outcome.clone());
    }
}

struct ResolverInner {
    host: Arc<dyn HostBridge>,
    config: AuthConfig,
    cache: Option<Arc<dyn CredentialCache>>,
    slot: Arc<Mutex<Slot>>,
}

/// Owner of the current credential. Cheap to clone; clones share the slot.
#[derive(Clone)]
pub struct AuthResolver {
    inner: Arc<ResolverInner>,
}

impl std::fmt::Debug for AuthResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthResolver")
            .field("mode", &self.inner.config.mode)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AuthResolver {
    #[must_use]
    pub fn new(host: Arc<dyn HostBridge>, config: AuthConfig) -> Self {
        Self::with_cache(host, config, None)
    }

    /// In development mode a bundle already in `cache` settles the resolver
    /// immediately, without contacting the host.
    #[must_use]
    pub fn with_cache(
        host: Arc<dyn HostBridge>,
        config: AuthConfig,
        cache: Option<Arc<dyn CredentialCache>>,
    ) -> Self {
        let config = config.sanitized();
        let mut phase = Phase::Unresolved;
        if config.is_development() {
            if let Some(cache) = cache.as_ref() {
                match cache.load() {
                    Ok(Some(bundle)) => {
                        tracing::info!(
                            source = CredentialSource::DevCache.as_str(),
                            "restored development credential"
                        );
                        phase = Phase::Settled(HandshakeOutcome::settled(
                            Some(bundle),
                            CredentialSource::DevCache,
                        ));
                    }
                    Ok(None) => {}
                    Err(error) => {
                        tracing::warn!(%error, "ignoring unreadable development credential cache");
                    }
                }
            }
        }

        Self {
            inner: Arc::new(ResolverInner {
                host,
                config,
                cache,
                slot: Arc::new(Mutex::new(Slot {
                    generation: 0,
                    phase,
                })),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn host(&self) -> Arc<dyn HostBridge> {
        Arc::clone(&self.inner.host)
    }

    #[must_use]
    pub fn state(&self) -> HandshakeState {
        match &lock_slot(&self.inner.slot).phase {
            Phase::Unresolved => HandshakeState::Unresolved,
            Phase::Resolving { .. } => HandshakeState::Resolving,
            Phase::Settled(outcome) if outcome.timed_out => HandshakeState::TimedOut,
            Phase::Settled(_) => HandshakeState::Resolved,
        }
    }

    #[must_use]
    pub fn last_outcome(&self) -> Option<HandshakeOutcome> {
        match &lock_slot(&self.inner.slot).phase {
            Phase::Settled(outcome) => Some(outcome.clone()),
            Phase::Unresolved | Phase::Resolving { .. } => None,
        }
    }

    /// Current bundle without waiting for a handshake in flight.
    #[must_use]
    pub fn snapshot(&self) -> Option<CredentialBundle> {
        self.last_outcome().and_then(|outcome| outcome.bundle)
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.snapshot()
            .map(|bundle| bundle.access_token().to_string())
    }

    #[must_use]
    pub fn user(&self) -> Option<UserRecord> {
        self.snapshot().and_then(|bundle| bundle.user().cloned())
    }

    #[must_use]
    pub fn organization_name(&self) -> Option<String> {
        self.snapshot()
            .and_then(|bundle| bundle.organization_name().map(str::to_string))
    }

    #[must_use]
    pub fn is_superadmin(&self) -> bool {
        self.snapshot()
            .is_some_and(|bundle| bundle.is_superadmin())
    }

    /// Starts the handshake in the background if it has not started yet.
    /// Must be called from within a Tokio runtime.
    pub fn begin(&self) {
        let _ = self.handshake();
    }

    pub async fn resolve(&self) -> Option<CredentialBundle> {
        self.resolve_outcome().await.bundle
    }

    /// Waits for the handshake to settle. Concurrent callers share one
    /// handshake; settled results are returned from the slot.
    pub async fn resolve_outcome(&self) -> HandshakeOutcome {
        let handshake = match self.handshake() {
            Ok(outcome) => return outcome,
            Err(handshake) => handshake,
        };
        let outcome = handshake.await;
        self.last_outcome().unwrap_or(outcome)
    }

    fn handshake(&self) -> Result<HandshakeOutcome, SharedHandshake> {
        let mut slot = lock_slot(&self.inner.slot);
        match &slot.phase {
            Phase::Settled(outcome) => return Ok(outcome.clone()),
            Phase::Resolving { handshake, .. } => return Err(handshake.clone()),
            Phase::Unresolved => {}
        }

        if let Some((bundle, source)) = probe_host(self.inner.host.as_ref(), Utc::now()) {
            tracing::debug!(source = source.as_str(), "host credential available immediately");
            let outcome = resolved(bundle, source, 0);
            slot.phase = Phase::Settled(outcome.clone());
            return Ok(outcome);
        }

        let generation = slot.generation;
        let host = Arc::clone(&self.inner.host);
        let config = self.inner.config.clone();
        let shared_slot = Arc::clone(&self.inner.slot);
        let task = tokio::spawn(async move {
            let outcome = await_host(host, &config).await;
            settle_if_current(&shared_slot, generation, &outcome);
            outcome
        });
        let abort = task.abort_handle();
        let fallback_slot: Weak<Mutex<Slot>> = Arc::downgrade(&self.inner.slot);
        let fallback_config = self.inner.config.clone();
        let handshake = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(error) if error.is_cancelled() => {
                    tracing::debug!("credential handshake superseded");
                    HandshakeOutcome::settled(None, CredentialSource::Absent)
                }
                Err(error) => {
                    tracing::error!(%error, "credential handshake task failed");
                    let outcome = timed_out(&fallback_config, 0);
                    if let Some(slot) = fallback_slot.upgrade() {
                        settle_if_current(&slot, generation, &outcome);
                    }
                    outcome
                }
            }
        }
        .boxed()
        .shared();
        slot.phase = Phase::Resolving {
            handshake: handshake.clone(),
            task: abort,
        };
        Err(handshake)
    }

    /// Replaces the slot wholesale and stops any handshake still polling.
    fn install(&self, bundle: Option<CredentialBundle>, source: CredentialSource) {
        let mut slot = lock_slot(&self.inner.slot);
        slot.generation += 1;
        let previous = std::mem::replace(
            &mut slot.phase,
            Phase::Settled(HandshakeOutcome::settled(bundle, source)),
        );
        if let Phase::Resolving { task, .. } = previous {
            task.abort();
        }
    }

    fn persist_development(&self, bundle: Option<&CredentialBundle>) {
        let Some(cache) = self.inner.cache.as_ref() else {
            return;
        };
        let result = match bundle {
            Some(bundle) => cache.persist(bundle),
            None => cache.clear(),
        };
        if let Err(error) = result {
            tracing::warn!(%error, "failed to update development credential cache");
        }
    }

    fn require_development(&self) -> Result<(), AuthError> {
        if self.inner.config.is_development() {
            Ok(())
        } else {
            Err(AuthError::OverridesDisabled)
        }
    }

    /// Asks the host for a fresh bundle. On failure the current bundle stays.
    pub async fn refresh(&self) -> Result<CredentialBundle, AuthError> {
        if self.inner.host.supports_refresh() {
            let refreshed = self.inner.host.refresh().await.map_err(|error| {
                tracing::warn!(%error, "host credential refresh failed");
                AuthError::RefreshFailed(error.to_string())
            })?;
            let host_credential = refreshed.ok_or_else(|| {
                AuthError::RefreshFailed("host returned no credential".to_string())
            })?;
            let bundle = CredentialBundle::from_host(host_credential, Utc::now())
                .map_err(|error| AuthError::RefreshFailed(error.to_string()))?;
            if self.inner.config.is_development() {
                self.persist_development(Some(&bundle));
            }
            self.install(Some(bundle.clone()), CredentialSource::HostRefresh);
            tracing::info!(
                source = CredentialSource::HostRefresh.as_str(),
                "credential refreshed"
            );
            return Ok(bundle);
        }

        if !self.inner.config.is_development() {
            return Err(AuthError::RefreshUnsupported);
        }

        let cached = self.inner.cache.as_ref().and_then(|cache| {
            cache.load().unwrap_or_else(|error| {
                tracing::warn!(%error, "ignoring unreadable development credential cache");
                None
            })
        });
        let (bundle, source) = match cached {
            Some(bundle) => (bundle, CredentialSource::DevCache),
            None if self.inner.config.allows_mock_fallback() => (
                development_mock_bundle(Utc::now()),
                CredentialSource::DevMock,
            ),
            None => return Err(AuthError::RefreshUnsupported),
        };
        self.persist_development(Some(&bundle));
        self.install(Some(bundle.clone()), source);
        tracing::info!(source = source.as_str(), "development credential reissued");
        Ok(bundle)
    }

    pub fn set_override(&self, bundle: CredentialBundle) -> Result<(), AuthError> {
        self.require_development()?;
        self.persist_development(Some(&bundle));
        self.install(Some(bundle), CredentialSource::DevOverride);
        tracing::info!(
            source = CredentialSource::DevOverride.as_str(),
            "development credential override set"
        );
        Ok(())
    }

    /// Parses a manually entered bundle. Malformed input leaves state unchanged.
    pub fn set_override_json(&self, raw: &str) -> Result<CredentialBundle, AuthError> {
        self.require_development()?;
        let bundle = CredentialBundle::from_json(raw)
            .map_err(|error| AuthError::MalformedOverride(error.to_string()))?;
        self.set_override(bundle.clone())?;
        Ok(bundle)
    }

    pub fn clear_override(&self) -> Result<(), AuthError> {
        self.require_development()?;
        self.persist_development(None);
        self.install(None, CredentialSource::Absent);
        tracing::info!("development credential override cleared");
        Ok(())
    }
}

/// Polls the host and listens for its lifecycle signals until a credential
/// appears or the attempt ceiling is reached. Returning drops the interval,
/// the signal subscription and every deferred probe.
async fn await_host(host: Arc<dyn HostBridge>, config: &AuthConfig) -> HandshakeOutcome {
    let mut signals = host.subscribe();
    let mut deferred: FuturesUnordered<BoxFuture<'static, HostSignal>> = FuturesUnordered::new();
    let period = config.poll_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempts: u32 = 0;

    loop {
        let wake = tokio::select! {
            Some(signal) = deferred.next() => Wake::Probe(signal),
            signal = next_signal(&mut signals) => Wake::Signal(signal),
            _ = ticker.tick() => Wake::Tick,
        };

        match wake {
            Wake::Signal(signal) => {
                let delay = config.listener_delay(signal);
                if !delay.is_zero() {
                    tracing::trace!(signal = signal.as_str(), ?delay, "deferring host probe");
                    deferred.push(
                        async move {
                            tokio::time::sleep(delay).await;
                            signal
                        }
                        .boxed(),
                    );
                    continue;
                }
                if let Some((bundle, source)) = probe_host(host.as_ref(), Utc::now()) {
                    tracing::debug!(
                        signal = signal.as_str(),
                        source = source.as_str(),
                        attempts,
                        "host credential arrived"
                    );
                    return resolved(bundle, source, attempts);
                }
            }
            Wake::Probe(signal) => {
                if let Some((bundle, source)) = probe_host(host.as_ref(), Utc::now()) {
                    tracing::debug!(
                        signal = signal.as_str(),
                        source = source.as_str(),
                        attempts,
                        "host credential arrived"
                    );
                    return resolved(bundle, source, attempts);
                }
            }
            Wake::Tick => {
                attempts += 1;
                if let Some((bundle, source)) = probe_host(host.as_ref(), Utc::now()) {
                    tracing::debug!(
                        source = source.as_str(),
                        attempts,
                        "host credential found by polling"
                    );
                    return resolved(bundle, source, attempts);
                }
                if attempts >= config.max_poll_attempts {
                    return timed_out(config, attempts);
                }
            }
        }
    }
}

enum Wake {
    Signal(HostSignal),
    Probe(HostSignal),
    Tick,
}

async fn next_signal(signals: &mut Option<broadcast::Receiver<HostSignal>>) -> HostSignal {
    loop {
        let Some(receiver) = signals.as_mut() else {
            return std::future::pending().await;
        };
        match receiver.recv().await {
            Ok(signal) => return signal,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "host signal receiver lagged");
            }
            Err(RecvError::Closed) => *signals = None,
        }
    }
}

fn resolved(bundle: CredentialBundle, source: CredentialSource, attempts: u32) -> HandshakeOutcome {
    HandshakeOutcome {
        bundle: Some(bundle),
        source,
        poll_attempts: attempts,
        timed_out: false,
    }
}

fn timed_out(config: &AuthConfig, attempts: u32) -> HandshakeOutcome {
    if config.allows_mock_fallback() {
        tracing::info!(attempts, "host sent no credential; using development identity");
        return HandshakeOutcome {
            bundle: Some(development_mock_bundle(Utc::now())),
            source: CredentialSource::DevMock,
            poll_attempts: attempts,
            timed_out: true,
        };
    }
    tracing::warn!(
        attempts,
        mode = config.mode.as_str(),
        "host sent no credential; continuing unauthenticated"
    );
    HandshakeOutcome {
        bundle: None,
        source: CredentialSource::Absent,
        poll_attempts: attempts,
        timed_out: true,
    }
}
