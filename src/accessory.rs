//! Maps thermostat state onto bridge characteristics.
//!
//! The bridge is reached only through the [`CharacteristicSink`] handed to
//! the accessory; nothing here holds global platform state.

use std::sync::Arc;

use tracing::debug;

use crate::connection::ThermostatConnection;
use crate::types::ThermostatStatus;
use crate::{Error, Result};

pub const MANUFACTURER: &str = "Eneco";
pub const MODEL: &str = "Toon";
const UNKNOWN: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeatingCoolingState {
    Off,
    Heat,
    Cool,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureDisplayUnits {
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Characteristic {
    CurrentTemperature(f64),
    TargetTemperature(f64),
    CurrentHeatingCoolingState(HeatingCoolingState),
    TargetHeatingCoolingState(HeatingCoolingState),
    TemperatureDisplayUnits(TemperatureDisplayUnits),
    Name(String),
    Manufacturer(String),
    Model(String),
    SerialNumber(String),
    FirmwareRevision(String),
    HardwareRevision(String),
}

/// Bridge-side receiver of characteristic values.
pub trait CharacteristicSink: Send + Sync {
    fn update(&self, characteristic: Characteristic);
}

/// Toon can only heat, so the burner maps to Heat or Off.
pub fn heating_cooling_state(status: &ThermostatStatus) -> HeatingCoolingState {
    if status.burner_active() {
        HeatingCoolingState::Heat
    } else {
        HeatingCoolingState::Off
    }
}

pub fn status_characteristics(status: &ThermostatStatus) -> Vec<Characteristic> {
    vec![
        Characteristic::CurrentTemperature(status.temperature().celsius()),
        Characteristic::TargetTemperature(status.setpoint().celsius()),
        Characteristic::CurrentHeatingCoolingState(heating_cooling_state(status)),
    ]
}

/// Update callback for [`crate::ThermostatConnectionBuilder::on_update`].
pub fn forward_to<S>(sink: Arc<S>) -> impl Fn(&ThermostatStatus) + Send + Sync + 'static
where
    S: CharacteristicSink + ?Sized + 'static,
{
    move |status| {
        for characteristic in status_characteristics(status) {
            sink.update(characteristic);
        }
    }
}

pub struct ThermostatAccessory<S: CharacteristicSink + ?Sized> {
    name: String,
    connection: Arc<ThermostatConnection>,
    sink: Arc<S>,
}

impl<S: CharacteristicSink + ?Sized> ThermostatAccessory<S> {
    pub fn new(name: impl Into<String>, connection: Arc<ThermostatConnection>, sink: Arc<S>) -> Self {
        Self {
            name: name.into(),
            connection,
            sink,
        }
    }

    pub fn connection(&self) -> &Arc<ThermostatConnection> {
        &self.connection
    }

    /// Push the accessory information service. Versions read `-` until an
    /// agreement has been selected.
    pub fn publish_information(&self) {
        let c = &self.connection;
        let info = [
            Characteristic::Name(self.name.clone()),
            Characteristic::Manufacturer(MANUFACTURER.to_string()),
            Characteristic::Model(MODEL.to_string()),
            Characteristic::SerialNumber(c.display_name().unwrap_or(UNKNOWN).to_string()),
            Characteristic::FirmwareRevision(c.software_version().unwrap_or(UNKNOWN).to_string()),
            Characteristic::HardwareRevision(c.hardware_version().unwrap_or(UNKNOWN).to_string()),
            Characteristic::TargetHeatingCoolingState(HeatingCoolingState::Auto),
            Characteristic::TemperatureDisplayUnits(TemperatureDisplayUnits::Celsius),
        ];
        for characteristic in info {
            self.sink.update(characteristic);
        }
    }

    pub fn current_heating_cooling_state(&self) -> Result<HeatingCoolingState> {
        self.connection
            .status()
            .map(|s| heating_cooling_state(&s))
            .ok_or_else(|| Error::Unavailable("heating state".to_string()))
    }

    pub fn target_heating_cooling_state(&self) -> HeatingCoolingState {
        HeatingCoolingState::Auto
    }

    /// The thermostat runs its own program; any requested mode reads back as Auto.
    pub fn set_target_heating_cooling_state(&self, _requested: HeatingCoolingState) -> HeatingCoolingState {
        HeatingCoolingState::Auto
    }

    pub fn current_temperature(&self) -> Option<f64> {
        let temp = self.connection.current_temperature();
        debug!(?temp, "current temperature");
        temp
    }

    pub fn target_temperature(&self) -> Option<f64> {
        let setpoint = self.connection.current_setpoint();
        debug!(?setpoint, "current target temperature");
        setpoint
    }

    /// Skips the write when `value` already is the setpoint.
    pub async fn set_target_temperature(&self, value: f64) -> Result<()> {
        if self.connection.current_setpoint() == Some(value) {
            return Ok(());
        }
        self.connection.set_temperature(value).await.map(|_| ())
    }

    pub fn temperature_display_units(&self) -> TemperatureDisplayUnits {
        TemperatureDisplayUnits::Celsius
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BurnerState, Credentials};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<Characteristic>>);

    impl CharacteristicSink for RecordingSink {
        fn update(&self, characteristic: Characteristic) {
            self.0.lock().unwrap().push(characteristic);
        }
    }

    fn status(burner: BurnerState) -> ThermostatStatus {
        ThermostatStatus {
            current_temperature: 1987,
            target_setpoint: 2050,
            burner,
            program_state: Some(1),
            active_state: Some(0),
            modulation_level: None,
        }
    }

    #[test]
    fn burner_maps_to_heating_state() {
        assert_eq!(heating_cooling_state(&status(BurnerState::Heating)), HeatingCoolingState::Heat);
        assert_eq!(heating_cooling_state(&status(BurnerState::HotWater)), HeatingCoolingState::Off);
        assert_eq!(heating_cooling_state(&status(BurnerState::Off)), HeatingCoolingState::Off);
    }

    #[test]
    fn forward_to_pushes_status_characteristics() {
        let sink = Arc::new(RecordingSink::default());
        let forward = forward_to(sink.clone());
        forward(&status(BurnerState::Heating));

        let seen = sink.0.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                Characteristic::CurrentTemperature(19.87),
                Characteristic::TargetTemperature(20.5),
                Characteristic::CurrentHeatingCoolingState(HeatingCoolingState::Heat),
            ]
        );
    }

    #[test]
    fn information_uses_placeholders_before_initialize() {
        let connection = ThermostatConnection::builder(Credentials::ApiToken("t".into()))
            .build()
            .unwrap();
        let sink = Arc::new(RecordingSink::default());
        let accessory = ThermostatAccessory::new("Woonkamer", Arc::new(connection), sink.clone());
        accessory.publish_information();

        let seen = sink.0.lock().unwrap();
        assert!(seen.contains(&Characteristic::Name("Woonkamer".into())));
        assert!(seen.contains(&Characteristic::Manufacturer("Eneco".into())));
        assert!(seen.contains(&Characteristic::SerialNumber("-".into())));
        assert!(matches!(
            accessory.current_heating_cooling_state(),
            Err(Error::Unavailable(_))
        ));
        assert_eq!(accessory.current_temperature(), None);
    }
}
