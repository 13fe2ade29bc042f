use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::types::Credentials;
use crate::{Error, Result};

const DEFAULT_NAME: &str = "Toon Thermostaat";

/// Accessory block of the bridge `config.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_name")]
    pub name: String,
    /// Selects the address when an account has several agreements.
    #[serde(default)]
    pub agreement_index: usize,
    /// Pre-issued token from `https://api.toon.eu/toonapi-accesstoken`.
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub consumer_key: Option<String>,
    #[serde(default)]
    pub consumer_secret: Option<String>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// API token wins, then the OAuth quadruple, then plain username/password.
    pub fn credentials(&self) -> Result<Credentials> {
        if let Some(token) = non_empty(&self.api_token) {
            return Ok(Credentials::ApiToken(token.to_string()));
        }

        let username = non_empty(&self.username);
        let password = non_empty(&self.password);
        match (
            username,
            password,
            non_empty(&self.consumer_key),
            non_empty(&self.consumer_secret),
        ) {
            (Some(u), Some(p), Some(key), Some(secret)) => Ok(Credentials::OAuth {
                username: u.to_string(),
                password: p.to_string(),
                consumer_key: key.to_string(),
                consumer_secret: secret.to_string(),
            }),
            (Some(u), Some(p), None, None) => Ok(Credentials::Session {
                username: u.to_string(),
                password: p.to_string(),
            }),
            (Some(_), Some(_), _, _) => Err(Error::Configuration(
                "consumerKey and consumerSecret must be given together".to_string(),
            )),
            _ => Err(Error::Configuration(
                "no credentials: set apiToken or username/password".to_string(),
            )),
        }
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AuthMode;

    #[test]
    fn api_token_takes_precedence() {
        let config = Config::from_json(
            r#"{"accessory": "Toon", "apiToken": "tok", "username": "u", "password": "p"}"#,
        )
        .unwrap();
        assert_eq!(config.name, "Toon Thermostaat");
        assert_eq!(config.agreement_index, 0);
        assert_eq!(config.credentials().unwrap().mode(), AuthMode::ApiToken);
    }

    #[test]
    fn oauth_needs_all_four_fields() {
        let config = Config::from_json(
            r#"{"name": "Woonkamer", "agreementIndex": 1, "username": "u", "password": "p",
                "consumerKey": "k", "consumerSecret": "s", "pollIntervalSecs": 15}"#,
        )
        .unwrap();
        assert_eq!(config.agreement_index, 1);
        assert_eq!(config.poll_interval(), Some(Duration::from_secs(15)));
        assert_eq!(config.credentials().unwrap().mode(), AuthMode::OAuth);

        let half = Config::from_json(r#"{"username": "u", "password": "p", "consumerKey": "k"}"#)
            .unwrap();
        assert!(matches!(half.credentials(), Err(Error::Configuration(_))));
    }

    #[test]
    fn username_password_selects_session_mode() {
        let config = Config::from_json(r#"{"username": "u", "password": "p", "apiToken": " "}"#)
            .unwrap();
        assert_eq!(config.credentials().unwrap().mode(), AuthMode::Session);
    }

    #[test]
    fn missing_credentials_is_configuration_error() {
        let config = Config::from_json(r#"{"name": "Toon"}"#).unwrap();
        assert!(matches!(config.credentials(), Err(Error::Configuration(_))));
    }
}
