use std::time::Duration;

use chrono::Utc;
use reqwest::header::LOCATION;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::protocol::{
    authorization_code_form, code_from_redirect, legacy_authorize_form, refresh_form,
    session_query, start_query, Endpoints, LoginResponse, SuccessResponse, TokenResponse,
    DEFAULT_AUTH_TIMEOUT,
};
use crate::types::*;
use crate::{Error, Result};

/// What authorizes a request: legacy session ids or a bearer token.
#[derive(Debug, Clone, PartialEq)]
pub enum Grant {
    Session(ClientSession),
    Bearer(Token),
    ApiToken(String),
}

impl Grant {
    pub fn bearer(&self) -> Option<&str> {
        match self {
            Grant::Bearer(token) => Some(&token.access_token),
            Grant::ApiToken(token) => Some(token),
            Grant::Session(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct AuthState {
    grant: Option<Grant>,
    /// Legacy session that failed a request and still needs a logout.
    stale: Option<ClientSession>,
    agreement: Option<Agreement>,
}

/// Owns credential acquisition and renewal.
///
/// Every operation runs under one async mutex: callers arriving while a
/// login or refresh is in flight wait for it and reuse its result instead of
/// issuing their own.
pub struct AuthSession {
    http: reqwest::Client,
    endpoints: Endpoints,
    credentials: Credentials,
    timeout: Duration,
    state: Mutex<AuthState>,
}

impl AuthSession {
    pub fn new(http: reqwest::Client, endpoints: Endpoints, credentials: Credentials) -> Self {
        Self {
            http,
            endpoints,
            credentials,
            timeout: DEFAULT_AUTH_TIMEOUT,
            state: Mutex::new(AuthState::default()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn mode(&self) -> AuthMode {
        self.credentials.mode()
    }

    /// Full login handshake for the configured mode. Replaces any current grant.
    pub async fn initialize(&self) -> Result<Grant> {
        let mut state = self.state.lock().await;
        self.login(&mut state).await
    }

    /// Current grant, logging in if there is none and refreshing a stale token.
    pub async fn authorization(&self) -> Result<Grant> {
        let mut state = self.state.lock().await;
        match state.grant.clone() {
            None => self.login(&mut state).await,
            Some(Grant::Bearer(token)) => self
                .ensure_valid_locked(&mut state, token)
                .await
                .map(Grant::Bearer),
            Some(grant) => Ok(grant),
        }
    }

    /// Returns `token` untouched while it is fresh, otherwise refreshes it.
    /// A failed refresh drops the grant so the next call logs in again.
    pub async fn ensure_valid(&self, token: Token) -> Result<Token> {
        let mut state = self.state.lock().await;
        self.ensure_valid_locked(&mut state, token).await
    }

    /// Called after a request made with `failed` was refused. Session mode
    /// logs out and back in on the next acquire; token mode fetches a new
    /// token; a pre-issued token cannot be renewed and is kept.
    ///
    /// No-op when the current grant is no longer `failed`: someone already
    /// renewed it.
    pub async fn invalidate(&self, failed: &Grant) {
        let mut state = self.state.lock().await;
        if state.grant.as_ref() != Some(failed) {
            debug!("grant already renewed, not invalidating");
            return;
        }
        match state.grant.take() {
            Some(Grant::Session(session)) => {
                debug!("legacy session marked unauthenticated");
                state.stale = Some(session);
            }
            Some(Grant::Bearer(_)) => debug!("dropped access token"),
            Some(grant @ Grant::ApiToken(_)) => state.grant = Some(grant),
            None => {}
        }
    }

    /// Record the selected agreement. Session mode also starts the session
    /// for it, and every later re-login repeats that step.
    pub async fn bind_agreement(&self, agreement: &Agreement) -> Result<()> {
        let mut state = self.state.lock().await;
        state.agreement = Some(agreement.clone());
        let Some(Grant::Session(session)) = state.grant.clone() else {
            return Ok(());
        };
        if let Err(e) = self.start(&session, agreement).await {
            state.grant = None;
            state.stale = Some(session);
            return Err(e);
        }
        Ok(())
    }

    /// Best-effort end of a legacy session. Never fails.
    pub async fn logout(&self) {
        let mut state = self.state.lock().await;
        let session = match state.grant.take() {
            Some(Grant::Session(session)) => Some(session),
            other => {
                state.grant = other;
                None
            }
        };
        if let Some(session) = session.or_else(|| state.stale.take()) {
            self.logout_session(&session).await;
        }
    }

    async fn login(&self, state: &mut AuthState) -> Result<Grant> {
        debug!(mode = ?self.mode(), "authenticating");
        let grant = match &self.credentials {
            Credentials::Session { username, password } => {
                let previous = match state.grant.take() {
                    Some(Grant::Session(session)) => Some(session),
                    _ => None,
                };
                if let Some(previous) = previous.or_else(|| state.stale.take()) {
                    self.logout_session(&previous).await;
                }
                info!("retrieving client data from Toon op Afstand");
                let session = self.legacy_login(username, password).await?;
                if let Some(agreement) = &state.agreement
                    && let Err(e) = self.start(&session, agreement).await
                {
                    state.stale = Some(session);
                    return Err(e);
                }
                Grant::Session(session)
            }
            Credentials::OAuth {
                username,
                password,
                consumer_key,
                consumer_secret,
            } => {
                let code = self.authorize(username, password, consumer_key).await?;
                let token = self
                    .token_request(&authorization_code_form(consumer_key, consumer_secret, &code))
                    .await?;
                Grant::Bearer(token)
            }
            Credentials::ApiToken(token) => Grant::ApiToken(token.clone()),
        };
        info!(mode = ?self.mode(), "authenticated with Toon");
        state.grant = Some(grant.clone());
        Ok(grant)
    }

    async fn ensure_valid_locked(&self, state: &mut AuthState, token: Token) -> Result<Token> {
        if !token.is_expired() {
            return Ok(token);
        }
        // Another caller may have refreshed while we waited for the lock.
        if let Some(Grant::Bearer(current)) = &state.grant
            && !current.is_expired()
        {
            return Ok(current.clone());
        }

        debug!(issued_at = %token.issued_at, "access token expired, refreshing");
        match self.refresh(&token.refresh_token).await {
            Ok(fresh) => {
                info!("refreshed Toon access token");
                state.grant = Some(Grant::Bearer(fresh.clone()));
                Ok(fresh)
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed, re-authentication required");
                state.grant = None;
                Err(e)
            }
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Token> {
        match &self.credentials {
            Credentials::OAuth {
                consumer_key,
                consumer_secret,
                ..
            } => {
                self.token_request(&refresh_form(consumer_key, consumer_secret, refresh_token))
                    .await
            }
            _ => Err(Error::Auth(
                "token refresh requires consumer credentials".to_string(),
            )),
        }
    }

    async fn legacy_login(&self, username: &str, password: &str) -> Result<ClientSession> {
        let resp = self
            .http
            .post(self.endpoints.legacy("login"))
            .form(&[("username", username), ("password", password)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(auth_error("login request failed"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Auth(format!("login returned HTTP {status}")));
        }
        let body: LoginResponse = resp
            .json()
            .await
            .map_err(auth_error("malformed login response"))?;
        body.into_session()
    }

    async fn start(&self, session: &ClientSession, agreement: &Agreement) -> Result<()> {
        debug!(agreement_id = %agreement.agreement_id, "starting legacy session");
        let resp = self
            .http
            .get(self.endpoints.legacy("auth/start"))
            .query(&start_query(session, agreement))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(auth_error("session start failed"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Auth(format!("session start returned HTTP {status}")));
        }
        let body: SuccessResponse = resp
            .json()
            .await
            .map_err(auth_error("malformed session start response"))?;
        if !body.success {
            return Err(Error::Auth("session start rejected by Toon".to_string()));
        }
        Ok(())
    }

    async fn logout_session(&self, session: &ClientSession) {
        let result = self
            .http
            .get(self.endpoints.legacy("auth/logout"))
            .query(&session_query(session))
            .timeout(self.timeout)
            .send()
            .await;
        match result {
            Ok(resp) => debug!(status = %resp.status(), "logged out legacy session"),
            Err(e) => debug!(error = %e, "logout failed, ignoring"),
        }
    }

    async fn authorize(&self, username: &str, password: &str, consumer_key: &str) -> Result<String> {
        let resp = self
            .http
            .post(self.endpoints.authorize_legacy())
            .form(&legacy_authorize_form(username, password, consumer_key))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(auth_error("authorize request failed"))?;
        let status = resp.status();
        if !status.is_redirection() {
            return Err(Error::Auth(format!("authorize returned HTTP {status}")));
        }
        resp.headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(code_from_redirect)
            .ok_or_else(|| Error::Auth("authorize redirect carried no code".to_string()))
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<Token> {
        let resp = self
            .http
            .post(self.endpoints.token())
            .form(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(auth_error("token request failed"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Auth(format!("token endpoint returned HTTP {status}")));
        }
        let body: TokenResponse = resp
            .json()
            .await
            .map_err(auth_error("malformed token response"))?;
        Ok(body.into_token(Utc::now()))
    }
}

fn auth_error(context: &'static str) -> impl FnOnce(reqwest::Error) -> Error {
    move |e| Error::Auth(format!("{context}: {e}"))
}

/// HTTP client shared by the session and the connection. Redirects stay
/// unfollowed so the authorize step can read its `Location`.
pub fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?)
}
