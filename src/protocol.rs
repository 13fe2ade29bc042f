use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use uuid::Uuid;

use crate::types::*;
use crate::{Error, Result};

pub const LEGACY_BASE_URL: &str = "https://toonopafstand.eneco.nl/toonMobileBackendWeb";
pub const API_BASE_URL: &str = "https://api.toon.eu";

const TENANT_ID: &str = "eneco";
const REDIRECT_URI: &str = "http://127.0.0.1";

/// `activeState` value that detaches the thermostat from its presets.
pub const ACTIVE_STATE_NONE: i64 = -1;
/// `programState` for a manual setpoint (program paused until the next switch).
pub const PROGRAM_STATE_MANUAL: i64 = 2;

pub const LEGACY_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const API_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Base URLs of both vendor backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub legacy_base: String,
    pub api_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            legacy_base: LEGACY_BASE_URL.to_string(),
            api_base: API_BASE_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// Serve both backends from one host, e.g. a local mock server.
    pub fn local(base: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self {
            legacy_base: format!("{base}/toonMobileBackendWeb"),
            api_base: base,
        }
    }

    pub(crate) fn legacy(&self, path: &str) -> String {
        format!("{}/client/{path}", self.legacy_base)
    }

    pub(crate) fn authorize_legacy(&self) -> String {
        format!("{}/authorize/legacy", self.api_base)
    }

    pub(crate) fn token(&self) -> String {
        format!("{}/token", self.api_base)
    }

    pub(crate) fn agreements(&self) -> String {
        format!("{}/toon/v3/agreements", self.api_base)
    }

    pub(crate) fn status(&self, agreement_id: &str) -> String {
        format!("{}/toon/v3/{agreement_id}/status", self.api_base)
    }

    pub(crate) fn thermostat(&self, agreement_id: &str) -> String {
        format!("{}/toon/v3/{agreement_id}/thermostat", self.api_base)
    }
}

/// Query parameters identifying a legacy session. Each request gets a fresh
/// `random` nonce.
pub(crate) fn session_query(session: &ClientSession) -> Vec<(&'static str, String)> {
    vec![
        ("clientId", session.client_id.clone()),
        ("clientIdChecksum", session.client_id_checksum.clone()),
        ("random", Uuid::new_v4().to_string()),
    ]
}

pub(crate) fn start_query(
    session: &ClientSession,
    agreement: &Agreement,
) -> Vec<(&'static str, String)> {
    let mut query = session_query(session);
    query.push(("agreementId", agreement.agreement_id.clone()));
    query.push(("agreementIdChecksum", agreement.agreement_id_checksum.clone()));
    query
}

pub(crate) fn legacy_authorize_form<'a>(
    username: &'a str,
    password: &'a str,
    consumer_key: &'a str,
) -> [(&'static str, &'a str); 7] {
    [
        ("username", username),
        ("password", password),
        ("tenant_id", TENANT_ID),
        ("response_type", "code"),
        ("client_id", consumer_key),
        ("state", ""),
        ("scope", ""),
    ]
}

pub(crate) fn authorization_code_form<'a>(
    consumer_key: &'a str,
    consumer_secret: &'a str,
    code: &'a str,
) -> [(&'static str, &'a str); 5] {
    [
        ("client_id", consumer_key),
        ("client_secret", consumer_secret),
        ("grant_type", "authorization_code"),
        ("redirect_uri", REDIRECT_URI),
        ("code", code),
    ]
}

pub(crate) fn refresh_form<'a>(
    consumer_key: &'a str,
    consumer_secret: &'a str,
    refresh_token: &'a str,
) -> [(&'static str, &'a str); 4] {
    [
        ("client_id", consumer_key),
        ("client_secret", consumer_secret),
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
    ]
}

/// Pull the authorization `code` out of a redirect `Location`, absolute or relative.
pub(crate) fn code_from_redirect(location: &str) -> Option<String> {
    let url = Url::parse(REDIRECT_URI).ok()?.join(location).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .filter(|code| !code.is_empty())
}

/// Full record for a setpoint write: the current record with the new
/// setpoint and manual program state.
pub(crate) fn setpoint_payload(current: &ThermostatInfo, setpoint: i64) -> ThermostatInfo {
    let mut payload = current.clone();
    payload.current_setpoint = Some(setpoint);
    payload.active_state = Some(ACTIVE_STATE_NONE);
    payload.program_state = Some(PROGRAM_STATE_MANUAL);
    payload
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_id_checksum: Option<String>,
    #[serde(default)]
    agreements: Vec<Agreement>,
}

impl LoginResponse {
    pub(crate) fn into_session(self) -> Result<ClientSession> {
        if !self.success {
            return Err(Error::Auth("login rejected by Toon".to_string()));
        }
        match (self.client_id, self.client_id_checksum) {
            (Some(client_id), Some(client_id_checksum)) => Ok(ClientSession {
                client_id,
                client_id_checksum,
                agreements: self.agreements,
            }),
            _ => Err(Error::Auth("login response is missing client ids".to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SuccessResponse {
    #[serde(default)]
    pub success: bool,
}

/// Status payload of both backends. The legacy one carries `success`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatusResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub thermostat_info: Option<ThermostatInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(deserialize_with = "u64_or_string")]
    expires_in: u64,
}

impl TokenResponse {
    pub(crate) fn into_token(self, issued_at: DateTime<Utc>) -> Token {
        Token {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            issued_at,
            expires_in: self.expires_in,
        }
    }
}

fn u64_or_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    match Value::deserialize(d)? {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom(format!("invalid expires_in: {n}"))),
        Value::String(s) => s
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid expires_in: {s}"))),
        other => Err(D::Error::custom(format!("invalid expires_in: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> ClientSession {
        ClientSession {
            client_id: "cid".into(),
            client_id_checksum: "sum".into(),
            agreements: vec![],
        }
    }

    #[test]
    fn local_endpoints_layout() {
        let e = Endpoints::local("http://127.0.0.1:9000/");
        assert_eq!(e.legacy("login"), "http://127.0.0.1:9000/toonMobileBackendWeb/client/login");
        assert_eq!(e.token(), "http://127.0.0.1:9000/token");
        assert_eq!(e.status("42"), "http://127.0.0.1:9000/toon/v3/42/status");
        assert_eq!(e.thermostat("42"), "http://127.0.0.1:9000/toon/v3/42/thermostat");
    }

    #[test]
    fn session_query_uses_fresh_nonce() {
        let s = session();
        let a = session_query(&s);
        let b = session_query(&s);
        assert_eq!(a[0], ("clientId", "cid".to_string()));
        assert_eq!(a[2].0, "random");
        assert_ne!(a[2].1, b[2].1);
    }

    #[test]
    fn code_from_absolute_and_relative_redirects() {
        assert_eq!(
            code_from_redirect("http://127.0.0.1/?code=abc123&state=").as_deref(),
            Some("abc123")
        );
        assert_eq!(code_from_redirect("/?code=xyz").as_deref(), Some("xyz"));
        assert_eq!(code_from_redirect("http://127.0.0.1/?error=denied"), None);
        assert_eq!(code_from_redirect("http://127.0.0.1/?code="), None);
    }

    #[test]
    fn setpoint_payload_merges_into_full_record() {
        let current: ThermostatInfo = serde_json::from_value(json!({
            "currentDisplayTemp": 1950,
            "currentSetpoint": 1800,
            "programState": 1,
            "activeState": 3,
            "burnerInfo": "0",
            "nextProgram": 1,
            "nextSetpoint": 2000
        }))
        .unwrap();
        let payload = serde_json::to_value(setpoint_payload(&current, 2150)).unwrap();
        assert_eq!(payload["currentSetpoint"], 2150);
        assert_eq!(payload["activeState"], -1);
        assert_eq!(payload["programState"], 2);
        assert_eq!(payload["nextSetpoint"], 2000);
        assert_eq!(payload["currentDisplayTemp"], 1950);
    }

    #[test]
    fn login_response_without_success_is_auth_error() {
        let resp: LoginResponse = serde_json::from_value(json!({"success": false})).unwrap();
        assert!(matches!(resp.into_session(), Err(Error::Auth(_))));
    }

    #[test]
    fn token_response_accepts_string_expiry() {
        let resp: TokenResponse = serde_json::from_value(json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": "1799",
            "refresh_token_expires_in": "0"
        }))
        .unwrap();
        let now = Utc::now();
        let token = resp.into_token(now);
        assert_eq!(token.expires_in, 1799);
        assert_eq!(token.issued_at, now);
    }

    #[test]
    fn status_response_without_thermostat_info() {
        let resp: StatusResponse = serde_json::from_value(json!({"success": true})).unwrap();
        assert_eq!(resp.success, Some(true));
        assert!(resp.thermostat_info.is_none());
    }
}
