use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::Error;

/// Temperature stored as Celsius.
/// Toon reports and accepts hundredths of a degree; setpoints snap to 0.5 increments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperature(f64);

impl Temperature {
    pub fn from_celsius(c: f64) -> Self {
        Self(c)
    }

    /// Construct from the vendor scale (hundredths of a degree).
    pub fn from_toon(hundredths: i64) -> Self {
        Self(hundredths as f64 / 100.0)
    }

    pub fn celsius(&self) -> f64 {
        self.0
    }

    /// Snap to the nearest 0.5 degree (halves round away from zero), then
    /// convert to hundredths: 21.3 -> 2150, 21.24 -> 2100, 21.25 -> 2150.
    pub fn to_toon_setpoint(&self) -> i64 {
        let snapped = (self.0 * 2.0).round() / 2.0;
        (snapped * 100.0).round() as i64
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}\u{00b0}C", self.0)
    }
}

/// Vendor `burnerInfo` code.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BurnerState {
    #[default]
    Off,
    Heating,
    HotWater,
    PreHeating,
    Unknown(String),
}

impl BurnerState {
    pub fn from_toon_str(s: &str) -> Self {
        match s {
            "0" => BurnerState::Off,
            "1" => BurnerState::Heating,
            "2" => BurnerState::HotWater,
            "3" => BurnerState::PreHeating,
            other => BurnerState::Unknown(other.to_string()),
        }
    }

    pub fn as_toon_str(&self) -> &str {
        match self {
            BurnerState::Off => "0",
            BurnerState::Heating => "1",
            BurnerState::HotWater => "2",
            BurnerState::PreHeating => "3",
            BurnerState::Unknown(code) => code,
        }
    }

    /// Only central heating counts as "active"; hot water does not heat the room.
    pub fn is_heating(&self) -> bool {
        matches!(self, BurnerState::Heating)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Session,
    OAuth,
    ApiToken,
}

#[derive(Clone)]
pub enum Credentials {
    /// Legacy toonopafstand backend: username/password, session ids.
    Session { username: String, password: String },
    /// api.toon.eu: legacy authorize flow plus token refresh.
    OAuth {
        username: String,
        password: String,
        consumer_key: String,
        consumer_secret: String,
    },
    /// Pre-issued api.toon.eu access token. Never refreshed.
    ApiToken(String),
}

impl Credentials {
    pub fn mode(&self) -> AuthMode {
        match self {
            Credentials::Session { .. } => AuthMode::Session,
            Credentials::OAuth { .. } => AuthMode::OAuth,
            Credentials::ApiToken(_) => AuthMode::ApiToken,
        }
    }
}

// Secrets stay out of Debug output so credentials can be logged safely.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Session { username, .. } => f
                .debug_struct("Session")
                .field("username", username)
                .finish_non_exhaustive(),
            Credentials::OAuth {
                username,
                consumer_key,
                ..
            } => f
                .debug_struct("OAuth")
                .field("username", username)
                .field("consumer_key", consumer_key)
                .finish_non_exhaustive(),
            Credentials::ApiToken(_) => f.write_str("ApiToken(..)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_in: u64,
}

impl Token {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let lifetime_ms = i64::try_from(self.expires_in)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        (now - self.issued_at).num_milliseconds() >= lifetime_ms
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// One installation/address under an account.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Agreement {
    #[serde(deserialize_with = "string_or_number")]
    pub agreement_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub agreement_id_checksum: String,
    pub street: String,
    #[serde(deserialize_with = "string_or_number")]
    pub house_number: String,
    pub postal_code: String,
    pub city: String,
    pub heating_type: String,
    pub display_common_name: String,
    pub display_hardware_version: String,
    pub display_software_version: String,
}

impl fmt::Display for Agreement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.street, self.house_number, self.postal_code, self.city, self.heating_type
        )
    }
}

/// Legacy backend session ids plus the agreements returned at login.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSession {
    pub client_id: String,
    pub client_id_checksum: String,
    pub agreements: Vec<Agreement>,
}

/// Raw thermostat record. Unknown vendor fields are kept in `other` so the
/// record can be written back whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThermostatInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_display_temp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_temp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_setpoint: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program_state: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_state: Option<i64>,
    #[serde(
        deserialize_with = "opt_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub burner_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_modulation_level: Option<i64>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThermostatStatus {
    /// Hundredths of a degree.
    pub current_temperature: i64,
    /// Hundredths of a degree.
    pub target_setpoint: i64,
    pub burner: BurnerState,
    pub program_state: Option<i64>,
    pub active_state: Option<i64>,
    pub modulation_level: Option<i64>,
}

impl ThermostatStatus {
    pub fn temperature(&self) -> Temperature {
        Temperature::from_toon(self.current_temperature)
    }

    pub fn setpoint(&self) -> Temperature {
        Temperature::from_toon(self.target_setpoint)
    }

    pub fn burner_active(&self) -> bool {
        self.burner.is_heating()
    }
}

impl TryFrom<&ThermostatInfo> for ThermostatStatus {
    type Error = Error;

    fn try_from(info: &ThermostatInfo) -> Result<Self, Self::Error> {
        let current_temperature = info
            .current_display_temp
            .or(info.current_temp)
            .ok_or_else(|| Error::Protocol("thermostat record has no temperature".to_string()))?;
        let target_setpoint = info
            .current_setpoint
            .ok_or_else(|| Error::Protocol("thermostat record has no setpoint".to_string()))?;
        Ok(Self {
            current_temperature,
            target_setpoint,
            burner: info
                .burner_info
                .as_deref()
                .map(BurnerState::from_toon_str)
                .unwrap_or_default(),
            program_state: info.program_state,
            active_state: info.active_state,
            modulation_level: info.current_modulation_level,
        })
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(D::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn opt_string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn token_expiry_boundary() {
        let issued = Utc::now();
        let token = Token {
            access_token: "a".into(),
            refresh_token: "r".into(),
            issued_at: issued,
            expires_in: 60,
        };
        assert!(!token.is_expired_at(issued + Duration::milliseconds(59_999)));
        assert!(token.is_expired_at(issued + Duration::seconds(60)));
    }

    #[test]
    fn agreement_accepts_numeric_ids() {
        let a: Agreement = serde_json::from_value(json!({
            "agreementId": 12345,
            "agreementIdChecksum": "abc",
            "street": "Dorpsstraat",
            "houseNumber": 7,
            "postalCode": "1234AB",
            "city": "Utrecht",
            "heatingType": "GAS",
            "displayCommonName": "eneco-001-123456"
        }))
        .unwrap();
        assert_eq!(a.agreement_id, "12345");
        assert_eq!(a.house_number, "7");
        assert_eq!(a.display_software_version, "");
        assert_eq!(a.to_string(), "Dorpsstraat 7 1234AB Utrecht GAS");
    }

    #[test]
    fn thermostat_info_keeps_unknown_fields() {
        let raw = json!({
            "currentDisplayTemp": 2050,
            "currentSetpoint": 2100,
            "burnerInfo": "1",
            "nextSetpoint": 1800,
            "otCommError": "0"
        });
        let info: ThermostatInfo = serde_json::from_value(raw).unwrap();
        assert_eq!(info.other["nextSetpoint"], 1800);
        let back = serde_json::to_value(&info).unwrap();
        assert_eq!(back["otCommError"], "0");
        assert_eq!(back["currentSetpoint"], 2100);
        assert!(back.get("currentTemp").is_none());
    }

    #[test]
    fn status_from_legacy_record() {
        let info: ThermostatInfo = serde_json::from_value(json!({
            "currentTemp": 1995,
            "currentSetpoint": 2000,
            "burnerInfo": 0
        }))
        .unwrap();
        let status = ThermostatStatus::try_from(&info).unwrap();
        assert_eq!(status.current_temperature, 1995);
        assert_eq!(status.burner, BurnerState::Off);
        assert!(!status.burner_active());
    }

    #[test]
    fn status_requires_setpoint() {
        let info = ThermostatInfo {
            current_display_temp: Some(2000),
            ..Default::default()
        };
        assert!(matches!(
            ThermostatStatus::try_from(&info),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let c = Credentials::OAuth {
            username: "jan".into(),
            password: "hunter2".into(),
            consumer_key: "key".into(),
            consumer_secret: "shh".into(),
        };
        let s = format!("{c:?}");
        assert!(s.contains("jan"));
        assert!(!s.contains("hunter2"));
        assert!(!s.contains("shh"));
    }
}
