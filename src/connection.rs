use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use reqwest::header::ACCEPT;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::auth::{http_client, AuthSession, Grant};
use crate::config::Config;
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{
    session_query, setpoint_payload, Endpoints, StatusResponse, SuccessResponse,
    API_POLL_INTERVAL, DEFAULT_AUTH_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, LEGACY_POLL_INTERVAL,
};
use crate::types::*;
use crate::{Error, Result};

type UpdateCallback = Box<dyn Fn(&ThermostatStatus) + Send + Sync>;

pub struct ThermostatConnectionBuilder {
    credentials: Credentials,
    endpoints: Endpoints,
    agreement_index: usize,
    poll_interval: Option<Duration>,
    request_timeout: Duration,
    auth_timeout: Duration,
    update_callbacks: Vec<UpdateCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl ThermostatConnectionBuilder {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            endpoints: Endpoints::default(),
            agreement_index: 0,
            poll_interval: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            update_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let mut builder = Self::new(config.credentials()?).agreement_index(config.agreement_index);
        if let Some(interval) = config.poll_interval() {
            builder = builder.poll_interval(interval);
        }
        if let Some(timeout) = config.request_timeout() {
            builder = builder.request_timeout(timeout);
        }
        Ok(builder)
    }

    pub fn endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Point both backends at one host, see [`Endpoints::local`].
    pub fn base_url(self, base: impl Into<String>) -> Self {
        self.endpoints(Endpoints::local(base))
    }

    pub fn agreement_index(mut self, index: usize) -> Self {
        self.agreement_index = index;
        self
    }

    /// Defaults to 10 s for the legacy backend and 30 s for api.toon.eu.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn on_update(mut self, f: impl Fn(&ThermostatStatus) + Send + Sync + 'static) -> Self {
        self.update_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ThermostatConnection> {
        let poll_interval = self.poll_interval.unwrap_or(match self.credentials.mode() {
            AuthMode::Session => LEGACY_POLL_INTERVAL,
            AuthMode::OAuth | AuthMode::ApiToken => API_POLL_INTERVAL,
        });
        if poll_interval.is_zero() {
            return Err(Error::Configuration("poll interval must be non-zero".to_string()));
        }

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(MessageLogger::new(mode, &path)?)),
            _ => None,
        };

        let http = http_client()?;
        let auth = AuthSession::new(http.clone(), self.endpoints.clone(), self.credentials)
            .with_timeout(self.auth_timeout);

        Ok(ThermostatConnection {
            http,
            endpoints: self.endpoints,
            auth,
            agreement_index: self.agreement_index,
            poll_interval,
            request_timeout: self.request_timeout,
            agreement: OnceLock::new(),
            slot: Mutex::new(StatusSlot::default()),
            write_guard: tokio::sync::Mutex::new(()),
            polling: AtomicBool::new(false),
            update_callbacks: self.update_callbacks,
            logger,
        })
    }
}

/// Last known status. `generation` increases on every commit so a poll that
/// started before a write cannot overwrite the write's result.
#[derive(Default)]
struct StatusSlot {
    status: Option<ThermostatStatus>,
    generation: u64,
}

pub struct ThermostatConnection {
    http: reqwest::Client,
    endpoints: Endpoints,
    auth: AuthSession,
    agreement_index: usize,
    poll_interval: Duration,
    request_timeout: Duration,
    agreement: OnceLock<Agreement>,
    slot: Mutex<StatusSlot>,
    write_guard: tokio::sync::Mutex<()>,
    polling: AtomicBool,
    update_callbacks: Vec<UpdateCallback>,
    logger: Option<Mutex<MessageLogger>>,
}

impl ThermostatConnection {
    pub fn builder(credentials: Credentials) -> ThermostatConnectionBuilder {
        ThermostatConnectionBuilder::new(credentials)
    }

    pub fn auth(&self) -> &AuthSession {
        &self.auth
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Log in, list the account's agreements and select the configured one.
    pub async fn initialize(&self) -> Result<()> {
        let grant = self.auth.initialize().await?;
        let agreements = match &grant {
            Grant::Session(session) => session.agreements.clone(),
            _ => self.fetch_agreements(&grant).await?,
        };

        for (index, agreement) in agreements.iter().enumerate() {
            info!(index, %agreement, "available agreement");
        }
        let Some(agreement) = agreements.get(self.agreement_index) else {
            return Err(Error::Configuration(format!(
                "agreement index {} out of range, account has {} agreement(s)",
                self.agreement_index,
                agreements.len()
            )));
        };
        info!(index = self.agreement_index, "selected agreement");

        self.auth.bind_agreement(agreement).await?;
        if self.agreement.set(agreement.clone()).is_err() {
            debug!("agreement already selected, keeping it");
        }
        Ok(())
    }

    /// Spawn the polling task. Ticks run at a fixed rate; failures are logged
    /// and never end the task. A connection runs at most one polling task.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        if self.agreement.get().is_none() {
            return Err(Error::NotInitialized);
        }
        if self.polling.swap(true, Ordering::SeqCst) {
            return Err(Error::Configuration("polling already started".to_string()));
        }
        let connection = Arc::clone(self);
        Ok(tokio::spawn(async move { connection.run().await }))
    }

    async fn run(&self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        info!(interval = ?self.poll_interval, "polling Toon");
        loop {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(Some(status)) => debug!(
                    temperature = %status.temperature(),
                    setpoint = %status.setpoint(),
                    burner = ?status.burner,
                    "thermostat updated"
                ),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "poll failed, keeping last known status"),
            }
        }
    }

    /// One authorized status fetch. `Ok(None)` means Toon had no thermostat
    /// data this time, which is not an error.
    pub async fn poll_once(&self) -> Result<Option<ThermostatStatus>> {
        let agreement = self.agreement.get().ok_or(Error::NotInitialized)?;
        let generation = self.lock_slot().generation;
        let grant = self.auth.authorization().await?;

        let response = match self.fetch_status(&grant, agreement).await {
            Ok(response) => response,
            Err(e) => {
                self.handle_request_failure(&grant, &e).await;
                return Err(e);
            }
        };

        let Some(info) = response.thermostat_info else {
            trace!("poll returned no thermostat info");
            return Ok(None);
        };
        let status = ThermostatStatus::try_from(&info)?;
        if !self.commit(status.clone(), Some(generation)) {
            debug!("discarding poll result superseded by a write");
            return Ok(None);
        }
        self.emit(&status);
        Ok(Some(status))
    }

    /// Set the target temperature. Returns the status Toon confirmed.
    pub async fn set_temperature(&self, celsius: f64) -> Result<ThermostatStatus> {
        if !celsius.is_finite() {
            return Err(Error::Write(format!("invalid target temperature {celsius}")));
        }
        let _write = self.write_guard.lock().await;

        let agreement = self
            .agreement
            .get()
            .ok_or_else(|| Error::Write("no agreement selected yet".to_string()))?;
        let Some(current) = self.status() else {
            return Err(Error::Write("no thermostat status received yet".to_string()));
        };

        let setpoint = Temperature::from_celsius(celsius).to_toon_setpoint();
        info!(celsius, setpoint, "setting Toon temperature");
        let grant = self.auth.authorization().await?;

        let result = match &grant {
            Grant::Session(_) => self
                .write_legacy(&grant, agreement, setpoint)
                .await
                .map(|()| self.patch_setpoint(current, setpoint)),
            _ => self
                .write_thermostat(&grant, agreement, setpoint)
                .await
                .map(|confirmed| {
                    self.commit(confirmed.clone(), None);
                    confirmed
                }),
        };

        match result {
            Ok(status) => {
                info!(setpoint = status.target_setpoint, "Toon confirmed setpoint");
                self.emit(&status);
                Ok(status)
            }
            Err(e) => {
                warn!(error = %e, "setting temperature failed");
                self.handle_request_failure(&grant, &e).await;
                Err(e)
            }
        }
    }

    pub fn status(&self) -> Option<ThermostatStatus> {
        self.lock_slot().status.clone()
    }

    /// Degrees Celsius; `None` until the first successful poll.
    pub fn current_temperature(&self) -> Option<f64> {
        self.status().map(|s| s.temperature().celsius())
    }

    pub fn current_setpoint(&self) -> Option<f64> {
        self.status().map(|s| s.setpoint().celsius())
    }

    pub fn burner(&self) -> Option<BurnerState> {
        self.status().map(|s| s.burner)
    }

    pub fn burner_active(&self) -> Option<bool> {
        self.status().map(|s| s.burner_active())
    }

    pub fn agreement(&self) -> Option<&Agreement> {
        self.agreement.get()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.agreement().map(|a| a.display_common_name.as_str())
    }

    pub fn hardware_version(&self) -> Option<&str> {
        self.agreement().map(|a| a.display_hardware_version.as_str())
    }

    pub fn software_version(&self) -> Option<&str> {
        self.agreement().map(|a| a.display_software_version.as_str())
    }

    // -- Requests --

    fn request(
        &self,
        method: Method,
        url: &str,
        grant: &Grant,
        agreement: Option<&Agreement>,
    ) -> RequestBuilder {
        self.log_request(method.as_str(), url);
        let req = self.http.request(method, url).timeout(self.request_timeout);
        match grant {
            Grant::Session(session) => req.query(&session_query(session)),
            Grant::Bearer(_) | Grant::ApiToken(_) => {
                let mut req = req.header(ACCEPT, "application/json");
                if let Some(token) = grant.bearer() {
                    req = req.bearer_auth(token);
                }
                if let Some(agreement) = agreement {
                    req = req
                        .header("X-Common-Name", agreement.display_common_name.as_str())
                        .header("X-Agreement-ID", agreement.agreement_id.as_str());
                }
                req
            }
        }
    }

    async fn fetch_agreements(&self, grant: &Grant) -> Result<Vec<Agreement>> {
        let url = self.endpoints.agreements();
        let resp = self
            .request(Method::GET, &url, grant, None)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn fetch_status(&self, grant: &Grant, agreement: &Agreement) -> Result<StatusResponse> {
        let url = match grant {
            Grant::Session(_) => self.endpoints.legacy("auth/retrieveToonState"),
            _ => self.endpoints.status(&agreement.agreement_id),
        };
        let resp = self
            .request(Method::GET, &url, grant, Some(agreement))
            .send()
            .await?
            .error_for_status()?;
        let code = resp.status().as_u16();
        let body: Value = resp.json().await?;
        self.log_poll(code, &body);

        let response: StatusResponse = serde_json::from_value(body)?;
        if response.success == Some(false) {
            return Err(Error::Protocol("Toon rejected the status request".to_string()));
        }
        Ok(response)
    }

    /// Read the full record, merge the new setpoint in and write it back.
    async fn write_thermostat(
        &self,
        grant: &Grant,
        agreement: &Agreement,
        setpoint: i64,
    ) -> Result<ThermostatStatus> {
        let url = self.endpoints.thermostat(&agreement.agreement_id);
        let current: ThermostatInfo = self
            .request(Method::GET, &url, grant, Some(agreement))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let payload = serde_json::to_value(setpoint_payload(&current, setpoint))?;
        self.log_write(setpoint, Some(&payload));
        let resp = self
            .request(Method::PUT, &url, grant, Some(agreement))
            .json(&payload)
            .send()
            .await?;
        let resp = accept_write(resp, setpoint).await?;

        let confirmed: ThermostatInfo = resp.json().await?;
        ThermostatStatus::try_from(&confirmed)
    }

    async fn write_legacy(&self, grant: &Grant, agreement: &Agreement, setpoint: i64) -> Result<()> {
        let url = self.endpoints.legacy("auth/setPoint");
        self.log_write(setpoint, None);
        let resp = self
            .request(Method::GET, &url, grant, Some(agreement))
            .query(&[("value", setpoint)])
            .send()
            .await?;
        let body: SuccessResponse = accept_write(resp, setpoint).await?.json().await?;
        if !body.success {
            return Err(Error::Write(format!("Toon rejected setpoint {setpoint}")));
        }
        Ok(())
    }

    async fn handle_request_failure(&self, grant: &Grant, error: &Error) {
        match grant {
            // The legacy backend gives no reliable expiry signal; any failure
            // means log in again.
            Grant::Session(_) => self.auth.invalidate(grant).await,
            _ if error.is_unauthorized() => self.auth.invalidate(grant).await,
            _ => {}
        }
    }

    // -- Cached status --

    fn lock_slot(&self) -> MutexGuard<'_, StatusSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `status` unless a commit happened since `expected_generation`.
    fn commit(&self, status: ThermostatStatus, expected_generation: Option<u64>) -> bool {
        let mut slot = self.lock_slot();
        if expected_generation.is_some_and(|g| g != slot.generation) {
            return false;
        }
        slot.status = Some(status);
        slot.generation += 1;
        true
    }

    fn patch_setpoint(&self, fallback: ThermostatStatus, setpoint: i64) -> ThermostatStatus {
        let mut slot = self.lock_slot();
        let mut status = slot.status.clone().unwrap_or(fallback);
        status.target_setpoint = setpoint;
        slot.status = Some(status.clone());
        slot.generation += 1;
        status
    }

    fn emit(&self, status: &ThermostatStatus) {
        for cb in &self.update_callbacks {
            cb(status);
        }
    }

    // -- Message log --

    fn log_request(&self, method: &str, url: &str) {
        if let Some(logger) = &self.logger {
            logger
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .log_request(method, url);
        }
    }

    fn log_poll(&self, status: u16, body: &Value) {
        if let Some(logger) = &self.logger {
            logger
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .log_poll(status, body);
        }
    }

    fn log_write(&self, setpoint: i64, body: Option<&Value>) {
        if let Some(logger) = &self.logger {
            logger
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .log_write(setpoint, body);
        }
    }
}

/// 401 stays a transport error so the session gets renewed; any other
/// refusal is a rejected write.
async fn accept_write(resp: reqwest::Response, setpoint: i64) -> Result<reqwest::Response> {
    let status = resp.status();
    let resp = if status == StatusCode::UNAUTHORIZED {
        resp.error_for_status()?
    } else {
        resp
    };
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Write(format!(
            "Toon rejected setpoint {setpoint}: HTTP {status} {body}"
        )));
    }
    Ok(resp)
}
