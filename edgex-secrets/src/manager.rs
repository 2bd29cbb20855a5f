//! Token lifecycle manager
//!
//! Bootstraps a secret-store session from the token file, derives an identity
//! token from it, keeps both renewed, and serves message-bus credentials.
//! Failures are logged and degrade to empty tokens or credentials; nothing
//! here ever takes the process down.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use edgex_bus::BusCredentials;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Mutex as AsyncMutex};

use crate::client::SecretStoreClient;
use crate::config::SecretStoreConfig;
use crate::error::{CredentialError, Result};
use crate::jwt::identity_renewal_delay;
use crate::renewal::RenewalScheduler;
use crate::token::{SessionTokenRecord, DEFAULT_SESSION_RENEWAL};

/// Where the manager is in its lifecycle.
///
/// Moves forward `Uninitialized → Bootstrapping → Validated → IdentityIssued
/// → Steady`, or ends in `Degraded` when bootstrapping fails. A re-bootstrap
/// starts over from `Bootstrapping`. With the secret store disabled the
/// manager stops at `Validated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Uninitialized,
    Bootstrapping,
    Validated,
    IdentityIssued,
    Steady,
    Degraded,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Bootstrapping => "bootstrapping",
            Self::Validated => "validated",
            Self::IdentityIssued => "identity-issued",
            Self::Steady => "steady",
            Self::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

pub(crate) struct ManagerInner {
    config: SecretStoreConfig,
    client: SecretStoreClient,
    session: RwLock<Option<SessionTokenRecord>>,
    identity: RwLock<String>,
    phase_tx: watch::Sender<LifecyclePhase>,
    /// Serializes bootstrap attempts
    bootstrap_lock: AsyncMutex<()>,
    renewals: Mutex<Option<RenewalScheduler>>,
}

/// Owner of the session token, the identity token and their renewals.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TokenLifecycleManager {
    inner: Arc<ManagerInner>,
}

impl TokenLifecycleManager {
    /// Create a manager without bootstrapping it.
    ///
    /// The first getter call bootstraps lazily; [`start`](Self::start)
    /// bootstraps eagerly instead.
    pub fn new(config: SecretStoreConfig) -> Result<Self> {
        let client = SecretStoreClient::new(&config)?;
        let (phase_tx, _) = watch::channel(LifecyclePhase::Uninitialized);

        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                client,
                session: RwLock::new(None),
                identity: RwLock::new(String::new()),
                phase_tx,
                bootstrap_lock: AsyncMutex::new(()),
                renewals: Mutex::new(None),
            }),
        })
    }

    /// Create a manager and start bootstrapping it in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: SecretStoreConfig) -> Result<Self> {
        let manager = Self::new(config)?;
        let background = manager.clone();
        tokio::spawn(async move {
            background
                .bootstrap_when(|phase| phase == LifecyclePhase::Uninitialized)
                .await;
        });
        Ok(manager)
    }

    pub(crate) fn from_inner(inner: Arc<ManagerInner>) -> Self {
        Self { inner }
    }

    fn downgrade(&self) -> Weak<ManagerInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn config(&self) -> &SecretStoreConfig {
        &self.inner.config
    }

    /// Current phase.
    pub fn phase(&self) -> LifecyclePhase {
        *self.inner.phase_tx.borrow()
    }

    /// Receiver observing every phase change.
    pub fn watch_phase(&self) -> watch::Receiver<LifecyclePhase> {
        self.inner.phase_tx.subscribe()
    }

    /// Current session token, if one has been loaded.
    pub fn session_token(&self) -> Option<String> {
        self.inner
            .session
            .read()
            .as_ref()
            .and_then(|record| record.token().map(str::to_string))
    }

    /// Run a full bootstrap now, replacing any running renewals.
    ///
    /// Waits for an in-flight bootstrap first.
    pub async fn bootstrap(&self) -> Result<()> {
        let _guard = self.inner.bootstrap_lock.lock().await;
        self.run_bootstrap().await
    }

    /// Current identity token.
    ///
    /// If the manager never started or is degraded, one re-bootstrap is
    /// attempted first; if that fails too the result is empty. An in-flight
    /// bootstrap is waited for.
    pub async fn get_identity_token(&self) -> String {
        let phase = self
            .bootstrap_when(|phase| {
                matches!(phase, LifecyclePhase::Uninitialized | LifecyclePhase::Degraded)
            })
            .await;

        if phase == LifecyclePhase::Degraded {
            return String::new();
        }
        self.inner.identity.read().clone()
    }

    /// Message-bus credentials for this service.
    ///
    /// Empty when the secret store is disabled or the manager is degraded.
    /// A failed fetch triggers one re-bootstrap and one more fetch before
    /// giving up with empty credentials.
    pub async fn get_message_bus_credentials(&self) -> BusCredentials {
        let phase = self
            .bootstrap_when(|phase| phase == LifecyclePhase::Uninitialized)
            .await;

        if !self.inner.config.enabled || phase == LifecyclePhase::Degraded {
            return BusCredentials::empty();
        }
        let Some(token) = self.session_token() else {
            return BusCredentials::empty();
        };

        let error = match self.inner.client.message_bus_credentials(&token).await {
            Ok(credentials) => return credentials,
            Err(e) => e,
        };
        tracing::warn!("Failed to fetch message bus credentials, re-bootstrapping: {}", error);

        if self.bootstrap().await.is_err() {
            return BusCredentials::empty();
        }
        let Some(token) = self.session_token() else {
            return BusCredentials::empty();
        };

        match self.inner.client.message_bus_credentials(&token).await {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::error!("Message bus credentials unavailable: {}", e);
                BusCredentials::empty()
            }
        }
    }

    /// Stop the renewal timers.
    pub async fn shutdown(&self) {
        let _guard = self.inner.bootstrap_lock.lock().await;
        if self.stop_renewals() {
            tracing::info!("Token renewals stopped");
        }
    }

    /// Whether renewal timers are running.
    pub fn renewals_active(&self) -> bool {
        self.inner.renewals.lock().is_some()
    }

    /// Renew the session token; returns the delay until the next renewal.
    pub(crate) async fn renew_session(&self) -> Duration {
        let current = self.inner.session.read().clone();
        let current_interval = current
            .as_ref()
            .map_or(DEFAULT_SESSION_RENEWAL, SessionTokenRecord::renewal_interval);

        let Some(token) = current.as_ref().and_then(|record| record.token()) else {
            tracing::warn!("Session token renewal skipped: no token loaded");
            return current_interval;
        };

        match self.inner.client.renew_self(token).await {
            Ok(record) if record.token().is_some() => {
                let interval = record.renewal_interval();
                *self.inner.session.write() = Some(record);
                tracing::info!("Session token renewed");
                interval
            }
            Ok(_) => {
                tracing::warn!("Session token renewal returned no token, keeping the current one");
                current_interval
            }
            Err(e) => {
                tracing::warn!("Session token renewal failed: {}", e);
                current_interval
            }
        }
    }

    /// Fetch a new identity token; returns the delay until the next renewal.
    pub(crate) async fn renew_identity(&self) -> Duration {
        match self.session_token() {
            Some(token) => match self.inner.client.identity_token(&token).await {
                Ok(jwt) => {
                    *self.inner.identity.write() = jwt;
                    tracing::info!("Identity token renewed");
                }
                Err(e) => tracing::warn!("Identity token renewal failed: {}", e),
            },
            None => tracing::warn!("Identity token renewal skipped: no session token"),
        }

        let jwt = self.inner.identity.read().clone();
        identity_renewal_delay(&jwt, Utc::now().timestamp())
    }

    /// Bootstrap if `needed` holds for the phase seen once any in-flight
    /// bootstrap has finished. Returns the resulting phase.
    async fn bootstrap_when<F>(&self, needed: F) -> LifecyclePhase
    where
        F: Fn(LifecyclePhase) -> bool,
    {
        let _guard = self.inner.bootstrap_lock.lock().await;
        if needed(self.phase()) {
            // Errors are logged inside and reflected in the phase.
            let _ = self.run_bootstrap().await;
        }
        self.phase()
    }

    /// Caller must hold `bootstrap_lock`.
    async fn run_bootstrap(&self) -> Result<()> {
        self.stop_renewals();
        self.set_phase(LifecyclePhase::Bootstrapping);

        if !self.inner.config.enabled {
            *self.inner.session.write() = None;
            self.inner.identity.write().clear();
            tracing::info!("Secret store disabled, serving empty credentials");
            self.set_phase(LifecyclePhase::Validated);
            return Ok(());
        }

        match self.establish().await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!("Secret store bootstrap failed: {}", e);
                self.set_phase(LifecyclePhase::Degraded);
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<()> {
        let record = self.load_session().await?;
        let token = record
            .token()
            .ok_or(CredentialError::MissingToken)?
            .to_string();
        let session_delay = record.renewal_interval();
        *self.inner.session.write() = Some(record);
        self.set_phase(LifecyclePhase::Validated);

        let jwt = self.inner.client.identity_token(&token).await?;
        let identity_delay = identity_renewal_delay(&jwt, Utc::now().timestamp());
        *self.inner.identity.write() = jwt;
        self.set_phase(LifecyclePhase::IdentityIssued);
        tracing::info!("Obtained identity token for {}", self.inner.config.service_key);

        let scheduler = RenewalScheduler::start(self.downgrade(), session_delay, identity_delay);
        *self.inner.renewals.lock() = Some(scheduler);
        self.set_phase(LifecyclePhase::Steady);
        Ok(())
    }

    /// Read and validate the session token, retrying under the configured
    /// budget with a fixed delay.
    async fn load_session(&self) -> Result<SessionTokenRecord> {
        let limit = self.inner.config.retry_limit.max(1);
        let mut last_error = CredentialError::MissingToken;

        for attempt in 1..=limit {
            match self.validate_session().await {
                Ok(record) => return Ok(record),
                Err(e) => {
                    tracing::warn!("Session token attempt {}/{} failed: {}", attempt, limit, e);
                    last_error = e;
                }
            }
            if attempt < limit {
                tokio::time::sleep(self.inner.config.retry_delay).await;
            }
        }

        Err(CredentialError::RetryLimitExceeded {
            attempts: limit,
            last_error: last_error.to_string(),
        })
    }

    async fn validate_session(&self) -> Result<SessionTokenRecord> {
        let path = &self.inner.config.token_file;
        let record = SessionTokenRecord::read_from(path).await?;
        let token = record.token().ok_or(CredentialError::MissingToken)?;

        match self.inner.client.lookup_self(token).await {
            Ok(()) => Ok(record),
            Err(denied @ CredentialError::AccessDenied { .. }) => {
                let Some(entity_id) = record.entity_id() else {
                    return Err(denied);
                };

                tracing::info!("Session token rejected, regenerating for entity {}", entity_id);
                self.inner
                    .client
                    .regenerate_token(entity_id)
                    .await
                    .map_err(|e| CredentialError::Regeneration(e.to_string()))?;

                let refreshed = SessionTokenRecord::read_from(path).await?;
                let token = refreshed.token().ok_or(CredentialError::MissingToken)?;
                self.inner.client.lookup_self(token).await?;
                tracing::info!("Session token regenerated");
                Ok(refreshed)
            }
            Err(e) => Err(e),
        }
    }

    fn stop_renewals(&self) -> bool {
        match self.inner.renewals.lock().take() {
            Some(scheduler) => {
                scheduler.stop();
                true
            }
            None => false,
        }
    }

    fn set_phase(&self, phase: LifecyclePhase) {
        let previous = self.inner.phase_tx.send_replace(phase);
        if previous != phase {
            tracing::debug!("Token lifecycle: {} -> {}", previous, phase);
        }
    }
}

impl fmt::Debug for TokenLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenLifecycleManager")
            .field("phase", &self.phase())
            .field("enabled", &self.inner.config.enabled)
            .finish_non_exhaustive()
    }
}
