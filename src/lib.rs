mod accessory;
mod auth;
mod config;
mod connection;
mod error;
mod logger;
mod protocol;
mod types;

pub use accessory::{
    forward_to, heating_cooling_state, status_characteristics, Characteristic,
    CharacteristicSink, HeatingCoolingState, TemperatureDisplayUnits, ThermostatAccessory,
};
pub use auth::{http_client, AuthSession, Grant};
pub use config::Config;
pub use connection::{ThermostatConnection, ThermostatConnectionBuilder};
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use protocol::{
    Endpoints, ACTIVE_STATE_NONE, API_BASE_URL, API_POLL_INTERVAL, LEGACY_BASE_URL,
    LEGACY_POLL_INTERVAL, PROGRAM_STATE_MANUAL,
};
pub use types::*;
