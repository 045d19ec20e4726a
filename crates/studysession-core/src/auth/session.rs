use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ApiRequest, ApiResponse, ApiTransport, RequestGateway};
use crate::models::{LoginRequest, LoginResponse, MessageResponse, Profile, RegisterRequest};
use crate::notify::{Notice, Notifier};

use super::lock;
use super::refresher::TokenRefresher;
use super::store::{PersistedRecord, PersistedStore};

pub const LOGIN_PATH: &str = "/auth/login";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const REGISTER_PATH: &str = "/users/register";

const SESSION_EXPIRED_NOTICE: &str = "Your session has expired. Please log in again.";

type SharedRefresh = Shared<BoxFuture<'static, Result<String, ApiError>>>;
type SharedBootstrap = Shared<BoxFuture<'static, SessionPhase>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Unauthenticated,
    Bootstrapping,
    Authenticated,
    LoggingOut,
}

/// In-memory session.
///
/// `authenticated` is only ever true while an access token is present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    access_token: Option<String>,
    refresh_token: Option<String>,
    user: Option<Profile>,
    authenticated: bool,
}

impl Session {
    fn from_record(record: PersistedRecord) -> Self {
        Self {
            access_token: record.access_token,
            refresh_token: record.refresh_token,
            user: record.user,
            authenticated: false,
        }
    }

    fn established(access_token: String, refresh_token: Option<String>, user: Profile) -> Self {
        Self {
            access_token: Some(access_token),
            refresh_token,
            user: Some(user),
            authenticated: true,
        }
    }

    fn record(&self) -> PersistedRecord {
        PersistedRecord {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            user: self.user.clone(),
        }
    }

    fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.user.is_none()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn user(&self) -> Option<&Profile> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated && self.access_token.is_some()
    }
}

/// Owns the process's session and every transition of it.
///
/// Create one per process with [`SessionManager::new`] and share the `Arc`
/// with the gateway and the heartbeat scheduler.
pub struct SessionManager {
    transport: Arc<dyn ApiTransport>,
    store: Arc<dyn PersistedStore>,
    notifier: Arc<dyn Notifier>,
    refresher: TokenRefresher,
    session: Mutex<Session>,
    phase: watch::Sender<SessionPhase>,
    refresh_flight: Mutex<Option<SharedRefresh>>,
    bootstrap_flight: Mutex<Option<SharedBootstrap>>,
}

impl SessionManager {
    /// Reconstruct the session from the persisted record. No network calls happen here.
    pub fn new(
        transport: Arc<dyn ApiTransport>,
        store: Arc<dyn PersistedStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Arc<Self>, ApiError> {
        let record = PersistedRecord::load(store.as_ref())?;
        debug!(
            has_access_token = record.access_token.is_some(),
            has_user = record.user.is_some(),
            "Loaded persisted session record"
        );

        let (phase, _) = watch::channel(SessionPhase::Unauthenticated);
        Ok(Arc::new(Self {
            refresher: TokenRefresher::new(Arc::clone(&transport)),
            transport,
            store,
            notifier,
            session: Mutex::new(Session::from_record(record)),
            phase,
            refresh_flight: Mutex::new(None),
            bootstrap_flight: Mutex::new(None),
        }))
    }

    pub fn transport(&self) -> &Arc<dyn ApiTransport> {
        &self.transport
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Phase changes, including forced logout, for the UI to follow.
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    pub fn snapshot(&self) -> Session {
        lock(&self.session).clone()
    }

    pub fn access_token(&self) -> Option<String> {
        lock(&self.session).access_token.clone()
    }

    pub fn user(&self) -> Option<Profile> {
        lock(&self.session).user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        lock(&self.session).is_authenticated()
    }

    /// True while a refresh credential is held.
    pub fn can_refresh(&self) -> bool {
        lock(&self.session).refresh_token.is_some()
    }

    fn set_phase(&self, phase: SessionPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!(from = ?previous, to = ?phase, "Session phase changed");
        }
    }

    /// Drop credentials from memory and storage. Storage failures are logged, not returned.
    fn clear_local(&self) {
        *lock(&self.session) = Session::default();
        if let Err(e) = PersistedRecord::clear(self.store.as_ref()) {
            warn!(error = %e, "Failed to clear persisted session");
        }
    }

    // ===== Login / Register =====

    pub async fn login(&self, email: &str, password: &str) -> Result<Profile, ApiError> {
        match self.try_login(email, password).await {
            Ok(user) => {
                info!(user = %user.display_name(), "Logged in");
                self.notifier.notify(Notice::success("Login successful!"));
                Ok(user)
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                self.notifier
                    .notify(Notice::error("Login failed. Please check your credentials."));
                Err(e)
            }
        }
    }

    async fn try_login(&self, email: &str, password: &str) -> Result<Profile, ApiError> {
        let email = normalize_email(email)?;
        if password.is_empty() {
            return Err(ApiError::InvalidInput("password must not be empty".to_string()));
        }

        let request = ApiRequest::post_json(
            LOGIN_PATH,
            &LoginRequest {
                email,
                password: password.to_string(),
            },
        )?;
        let response = self.transport.send(&request, None).await?;
        if !response.is_success() {
            return Err(login_rejection(&response));
        }

        let login: LoginResponse = response.json()?;
        if login.access_token.is_empty() {
            return Err(ApiError::InvalidResponse("login returned an empty token".to_string()));
        }

        let session = Session::established(login.access_token, login.refresh_token, login.user);
        if let Err(e) = session.record().save(self.store.as_ref()) {
            if let Err(clear_err) = PersistedRecord::clear(self.store.as_ref()) {
                warn!(error = %clear_err, "Failed to clear partially written session");
            }
            return Err(e.into());
        }

        let user = session.user.clone().unwrap_or_default();
        *lock(&self.session) = session;
        self.set_phase(SessionPhase::Authenticated);
        Ok(user)
    }

    /// Create an account. The session is left untouched; the caller logs in afterwards.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<String, ApiError> {
        match self.try_register(name, email, password).await {
            Ok(message) => {
                self.notifier
                    .notify(Notice::success("Registration successful! Please login."));
                Ok(message)
            }
            Err(e) => {
                warn!(error = %e, "Registration failed");
                self.notifier
                    .notify(Notice::error("Registration failed. Please try again."));
                Err(e)
            }
        }
    }

    async fn try_register(&self, name: &str, email: &str, password: &str) -> Result<String, ApiError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::InvalidInput("name must not be empty".to_string()));
        }
        if password.is_empty() {
            return Err(ApiError::InvalidInput("password must not be empty".to_string()));
        }
        let request = ApiRequest::post_json(
            REGISTER_PATH,
            &RegisterRequest {
                name: name.to_string(),
                email: normalize_email(email)?,
                password: password.to_string(),
            },
        )?;

        let response = self.transport.send(&request, None).await?;
        if !response.is_success() {
            return Err(ApiError::Server {
                status: response.status,
                message: ApiError::message_from_body(&response.body),
            });
        }
        let ack: MessageResponse = response.json().unwrap_or_default();
        Ok(ack
            .message
            .unwrap_or_else(|| "User registered successfully!".to_string()))
    }

    // ===== Logout =====

    /// Best-effort remote logout followed by unconditional local erasure. Never fails.
    pub async fn logout(&self) {
        let (token, had_session) = {
            let session = lock(&self.session);
            (session.access_token.clone(), !session.is_empty())
        };

        if let Some(token) = token {
            self.set_phase(SessionPhase::LoggingOut);
            let request = ApiRequest::post(LOGOUT_PATH, serde_json::json!({}));
            match self.transport.send(&request, Some(&token)).await {
                Ok(response) if response.is_success() => debug!("Remote logout acknowledged"),
                Ok(response) => warn!(status = response.status, "Remote logout rejected, ignoring"),
                Err(e) => warn!(error = %e, "Remote logout failed, ignoring"),
            }
        }

        self.clear_local();
        self.set_phase(SessionPhase::Unauthenticated);
        if had_session {
            info!("Logged out");
            self.notifier.notify(Notice::success("Logged out successfully"));
        }
    }

    /// Tear the session down after an unrecoverable authorization failure.
    pub fn force_logout(&self, reason: &str) {
        warn!(reason = reason, "Ending session");
        self.clear_local();
        self.set_phase(SessionPhase::Unauthenticated);
        self.notifier.notify(Notice::error(SESSION_EXPIRED_NOTICE));
    }

    // ===== Bootstrap =====

    /// Restore the persisted session, fetching the profile if only tokens were kept.
    ///
    /// Concurrent callers share one in-flight bootstrap and see the same outcome.
    pub async fn bootstrap(self: &Arc<Self>) -> SessionPhase {
        let flight = {
            let mut slot = lock(&self.bootstrap_flight);
            match slot.as_ref() {
                Some(flight) => flight.clone(),
                None => {
                    if self.is_authenticated() {
                        return SessionPhase::Authenticated;
                    }
                    let manager = Arc::clone(self);
                    let flight = async move {
                        let phase = manager.run_bootstrap().await;
                        *lock(&manager.bootstrap_flight) = None;
                        phase
                    }
                    .boxed()
                    .shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    async fn run_bootstrap(self: &Arc<Self>) -> SessionPhase {
        let (has_token, cached_user, has_leftovers) = {
            let session = lock(&self.session);
            (
                session.access_token.is_some(),
                session.user.is_some(),
                !session.is_empty(),
            )
        };

        if !has_token {
            if has_leftovers {
                debug!("Discarding persisted session without an access token");
                self.clear_local();
            }
            self.set_phase(SessionPhase::Unauthenticated);
            return SessionPhase::Unauthenticated;
        }

        self.set_phase(SessionPhase::Bootstrapping);
        if cached_user {
            lock(&self.session).authenticated = true;
            self.set_phase(SessionPhase::Authenticated);
            info!("Session restored from storage");
            return SessionPhase::Authenticated;
        }

        let gateway = RequestGateway::new(Arc::clone(self));
        match gateway.fetch_profile().await {
            Ok(user) => {
                let record = {
                    let mut session = lock(&self.session);
                    if session.access_token.is_none() {
                        // Torn down while the profile was in flight
                        return SessionPhase::Unauthenticated;
                    }
                    session.user = Some(user);
                    session.authenticated = true;
                    session.record()
                };
                if let Err(e) = record.save(self.store.as_ref()) {
                    warn!(error = %e, "Failed to persist fetched profile");
                }
                self.set_phase(SessionPhase::Authenticated);
                info!("Session restored from profile");
                SessionPhase::Authenticated
            }
            Err(e) => {
                warn!(error = %e, "Profile bootstrap failed, logging out");
                self.logout().await;
                SessionPhase::Unauthenticated
            }
        }
    }

    // ===== Refresh =====

    /// Obtain a fresh access token after `stale` was rejected.
    ///
    /// Concurrent callers share a single refresh. If the session already holds a
    /// different token than `stale`, that token is returned without refreshing.
    /// On failure the session is torn down before the error is returned.
    pub async fn renew_access_token(self: &Arc<Self>, stale: Option<&str>) -> Result<String, ApiError> {
        let flight = {
            let mut slot = lock(&self.refresh_flight);
            match slot.as_ref() {
                Some(flight) => flight.clone(),
                None => {
                    let (current, refresh_token) = {
                        let session = lock(&self.session);
                        (session.access_token.clone(), session.refresh_token.clone())
                    };

                    match current {
                        Some(current) if Some(current.as_str()) != stale => {
                            debug!("Access token already renewed");
                            return Ok(current);
                        }
                        None if stale.is_some() => {
                            return Err(ApiError::RefreshDenied("session has ended".to_string()));
                        }
                        _ => {}
                    }

                    let Some(refresh_token) = refresh_token else {
                        drop(slot);
                        self.force_logout("no refresh token available");
                        return Err(ApiError::RefreshDenied(
                            "no refresh credential available".to_string(),
                        ));
                    };

                    let manager = Arc::clone(self);
                    let flight = async move {
                        let outcome = manager.run_refresh(refresh_token).await;
                        *lock(&manager.refresh_flight) = None;
                        outcome
                    }
                    .boxed()
                    .shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    async fn run_refresh(&self, refresh_token: String) -> Result<String, ApiError> {
        info!("Refreshing access token");
        let renewed = match self.refresher.refresh(&refresh_token).await {
            Ok(renewed) => renewed,
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                self.force_logout("token refresh failed");
                return Err(e);
            }
        };

        let record = {
            let mut session = lock(&self.session);
            if session.refresh_token.as_deref() != Some(refresh_token.as_str()) {
                // Logged out or logged in again while the refresh was in flight
                return session
                    .access_token
                    .clone()
                    .ok_or_else(|| ApiError::RefreshDenied("session has ended".to_string()));
            }
            session.access_token = Some(renewed.access_token.clone());
            if let Some(rotated) = renewed.refresh_token {
                session.refresh_token = Some(rotated);
            }
            session.record()
        };

        if let Err(e) = record.save(self.store.as_ref()) {
            warn!(error = %e, "Failed to persist renewed token");
            self.force_logout("renewed token could not be persisted");
            return Err(e.into());
        }
        Ok(renewed.access_token)
    }
}

fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let normalized = raw.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(ApiError::InvalidInput("email must not be empty".to_string()));
    }
    Ok(normalized)
}

/// The backend answers a bad login with 401 (wrong password) or 404 (unknown user).
fn login_rejection(response: &ApiResponse) -> ApiError {
    let message = ApiError::message_from_body(&response.body);
    match response.status {
        400 | 401 | 403 | 404 => ApiError::InvalidCredentials(message),
        status => ApiError::Server { status, message },
    }
}
