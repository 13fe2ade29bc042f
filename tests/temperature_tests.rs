use toon_thermostat::{BurnerState, Temperature};

#[test]
fn from_toon_hundredths() {
    let t = Temperature::from_toon(2034);
    assert!((t.celsius() - 20.34).abs() < 1e-9);
    assert_eq!(Temperature::from_toon(0).celsius(), 0.0);
}

#[test]
fn setpoint_snaps_to_half_degrees() {
    assert_eq!(Temperature::from_celsius(21.3).to_toon_setpoint(), 2150);
    assert_eq!(Temperature::from_celsius(21.24).to_toon_setpoint(), 2100);
    assert_eq!(Temperature::from_celsius(21.25).to_toon_setpoint(), 2150);
    assert_eq!(Temperature::from_celsius(21.75).to_toon_setpoint(), 2200);
    assert_eq!(Temperature::from_celsius(19.0).to_toon_setpoint(), 1900);
}

#[test]
fn setpoint_is_always_a_multiple_of_fifty() {
    for tenths in 50..300 {
        let setpoint = Temperature::from_celsius(tenths as f64 / 10.0).to_toon_setpoint();
        assert_eq!(setpoint % 50, 0, "{tenths} tenths gave {setpoint}");
    }
}

#[test]
fn display() {
    assert_eq!(format!("{}", Temperature::from_celsius(21.5)), "21.5\u{00b0}C");
    assert_eq!(format!("{}", Temperature::from_toon(1987)), "19.9\u{00b0}C");
}

#[test]
fn burner_codes() {
    assert_eq!(BurnerState::from_toon_str("0"), BurnerState::Off);
    assert_eq!(BurnerState::from_toon_str("1"), BurnerState::Heating);
    assert_eq!(BurnerState::from_toon_str("2"), BurnerState::HotWater);
    assert_eq!(BurnerState::from_toon_str("3"), BurnerState::PreHeating);
    assert_eq!(
        BurnerState::from_toon_str("9"),
        BurnerState::Unknown("9".into())
    );
    assert!(BurnerState::Heating.is_heating());
    assert!(!BurnerState::HotWater.is_heating());
}
