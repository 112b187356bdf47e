use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;

use hvac_common::{
    config::{PresetConfig, PresetValue},
    CallbackKind, EngineAction, EntityId, EntityStates, HvacActionReason, HvacMode, MemoryStates,
    SensorKind, TemperatureRequest, Thermostat, ThermostatConfig,
};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn on(entity: &str) -> EngineAction {
    EngineAction::TurnOn(entity.into())
}

fn off(entity: &str) -> EngineAction {
    EngineAction::TurnOff(entity.into())
}

/// Thermostat plus the host-side state store it reads, with every command
/// applied the way the host applies it.
struct Rig {
    thermostat: Thermostat,
    states: MemoryStates,
}

impl Rig {
    fn start(config: ThermostatConfig, initial: &[(&str, &str)]) -> (Self, Vec<EngineAction>) {
        let mut states = MemoryStates::new();
        for (entity, state) in initial {
            states.set(&EntityId::from(*entity), state, at(0));
        }
        let mut thermostat = Thermostat::new(config).unwrap();
        let actions = thermostat.startup(&states, at(0));
        states.apply(&actions, at(0));
        (Self { thermostat, states }, actions)
    }

    fn temperature(&mut self, value: f64, secs: i64) -> Vec<EngineAction> {
        let actions = self.thermostat.push_reading(
            SensorKind::Temperature,
            value.into(),
            &self.states,
            at(secs),
        );
        self.states.apply(&actions, at(secs));
        actions
    }

    fn floor(&mut self, value: f64, secs: i64) -> Vec<EngineAction> {
        let actions = self.thermostat.push_reading(
            SensorKind::FloorTemperature,
            value.into(),
            &self.states,
            at(secs),
        );
        self.states.apply(&actions, at(secs));
        actions
    }

    fn callback(&mut self, kind: CallbackKind, secs: i64) -> Vec<EngineAction> {
        let actions = self
            .thermostat
            .handle_callback(&kind, &self.states, at(secs));
        self.states.apply(&actions, at(secs));
        actions
    }

    fn entity(&mut self, entity: &str, state: &str, secs: i64) -> Vec<EngineAction> {
        let entity = EntityId::from(entity);
        self.states.set(&entity, state, at(secs));
        let actions = self
            .thermostat
            .entity_changed(&entity, &self.states, at(secs));
        self.states.apply(&actions, at(secs));
        actions
    }

    fn is_on(&self, entity: &str) -> bool {
        self.states
            .state(&EntityId::from(entity))
            .is_some_and(|state| state.is_active())
    }
}

fn heater(target: f64) -> ThermostatConfig {
    ThermostatConfig {
        heater: vec!["switch.heater".into()],
        target_sensor: "sensor.temp".into(),
        target_temp: Some(target),
        cold_tolerance: 0.3,
        hot_tolerance: 0.3,
        initial_hvac_mode: Some(HvacMode::Heat),
        ..ThermostatConfig::default()
    }
}

fn cooler(target: f64, hot_tolerance: f64) -> ThermostatConfig {
    ThermostatConfig {
        ac_mode: true,
        hot_tolerance,
        initial_hvac_mode: Some(HvacMode::Cool),
        ..heater(target)
    }
}

fn heat_cool() -> ThermostatConfig {
    ThermostatConfig {
        cooler: vec!["switch.ac".into()],
        heat_cool_mode: Some(true),
        target_temp: None,
        target_temp_low: Some(20.0),
        target_temp_high: Some(24.0),
        initial_hvac_mode: Some(HvacMode::HeatCool),
        ..heater(20.0)
    }
}

#[test]
fn heater_engages_at_inclusive_cold_boundary() {
    let (_, actions) = Rig::start(heater(20.0), &[("sensor.temp", "19.7")]);
    assert_eq!(actions, vec![on("switch.heater")]);

    let (rig, actions) = Rig::start(heater(20.0), &[("sensor.temp", "19.71")]);
    assert!(actions.is_empty());
    assert!(!rig.is_on("switch.heater"));
}

#[test]
fn cooler_engages_at_inclusive_hot_boundary() {
    let (_, actions) = Rig::start(cooler(24.0, 0.3), &[("sensor.temp", "24.3")]);
    assert_eq!(actions, vec![on("switch.heater")]);

    let (rig, actions) = Rig::start(cooler(24.0, 0.3), &[("sensor.temp", "24.29")]);
    assert!(actions.is_empty());
    assert!(!rig.is_on("switch.heater"));
}

#[test]
fn heat_cool_sweep_uses_dead_band() {
    let (mut rig, actions) = Rig::start(heat_cool(), &[]);
    assert!(actions.is_empty());

    assert_eq!(rig.temperature(19.6, 10), vec![on("switch.heater")]);
    assert_eq!(rig.temperature(19.8, 20), vec![off("switch.heater")]);
    for (step, cur) in [20.5, 22.0, 23.9].into_iter().enumerate() {
        assert!(rig.temperature(cur, 25 + step as i64).is_empty(), "reading {cur}");
    }
    assert!(rig.temperature(24.2, 30).is_empty());
    assert_eq!(rig.temperature(24.4, 40), vec![on("switch.ac")]);
    assert!(!rig.is_on("switch.heater"));

    assert_eq!(rig.temperature(24.2, 50), vec![off("switch.ac")]);
}

#[test]
fn heat_cool_dead_band_from_idle_fires_nothing() {
    for cur in [19.8, 22.0, 24.2] {
        let reading = cur.to_string();
        let (rig, actions) = Rig::start(heat_cool(), &[("sensor.temp", reading.as_str())]);
        assert!(actions.is_empty(), "reading {cur}");
        assert!(!rig.is_on("switch.heater") && !rig.is_on("switch.ac"));
    }
}

#[test]
fn floor_limits_override_ambient() {
    let config = ThermostatConfig {
        floor_sensor: Some("sensor.floor".into()),
        min_floor_temp: Some(5.0),
        max_floor_temp: Some(28.0),
        ..heater(20.0)
    };
    let (mut rig, actions) = Rig::start(config, &[("sensor.temp", "21"), ("sensor.floor", "4")]);
    assert_eq!(actions, vec![on("switch.heater")]);
    assert_eq!(rig.thermostat.action_reason(), HvacActionReason::Limit);

    assert_eq!(rig.floor(29.0, 10), vec![off("switch.heater")]);
    assert_eq!(rig.thermostat.action_reason(), HvacActionReason::Overheat);

    assert!(rig.temperature(15.0, 20).is_empty());
    assert!(!rig.is_on("switch.heater"));
    assert_eq!(rig.thermostat.action_reason(), HvacActionReason::Overheat);
}

#[test]
fn aux_heater_engages_once_per_day() {
    let config = ThermostatConfig {
        aux_heater: vec!["switch.strip".into()],
        aux_heater_timeout_ms: Some(10_000),
        ..heater(20.0)
    };
    let (mut rig, actions) = Rig::start(config, &[("sensor.temp", "18")]);
    assert_eq!(
        actions,
        vec![
            on("switch.heater"),
            EngineAction::ScheduleCallback {
                kind: CallbackKind::AuxHeaterTimeout,
                delay: std::time::Duration::from_secs(10),
            },
        ]
    );

    let actions = rig.callback(CallbackKind::AuxHeaterTimeout, 10);
    assert_eq!(actions, vec![on("switch.strip"), off("switch.heater")]);
    assert_eq!(rig.thermostat.action_reason(), HvacActionReason::AuxHeating);

    assert_eq!(rig.temperature(21.0, 100), vec![off("switch.strip")]);

    let actions = rig.temperature(19.0, 200);
    assert_eq!(actions[0], on("switch.heater"));
    assert!(rig.callback(CallbackKind::AuxHeaterTimeout, 210).is_empty());
    assert!(!rig.is_on("switch.strip"));

    let actions = rig.callback(CallbackKind::AuxHeaterTimeout, 86_400);
    assert_eq!(actions, vec![on("switch.strip"), off("switch.heater")]);
}

#[test]
fn heat_pump_follows_cooling_signal() {
    let config = ThermostatConfig {
        heater: vec!["switch.heat_pump".into()],
        heat_pump_cooling: Some("binary_sensor.hp_cooling".into()),
        ..heater(22.0)
    };
    let (mut rig, _) = Rig::start(config, &[("binary_sensor.hp_cooling", "off")]);
    assert_eq!(rig.thermostat.hvac_modes(), vec![HvacMode::Off, HvacMode::Heat]);

    rig.entity("binary_sensor.hp_cooling", "on", 10);
    assert_eq!(rig.thermostat.hvac_modes(), vec![HvacMode::Off, HvacMode::Cool]);
    assert_eq!(rig.thermostat.hvac_mode(), HvacMode::Cool);

    let actions = rig.temperature(23.0, 20);
    assert_eq!(actions, vec![on("switch.heat_pump")]);

    rig.entity("binary_sensor.hp_cooling", "unavailable", 30);
    assert_eq!(rig.thermostat.hvac_mode(), HvacMode::Heat);
}

#[test]
fn negative_hot_tolerance_engages_below_target() {
    let (_, actions) = Rig::start(cooler(24.0, -0.5), &[("sensor.temp", "23.5")]);
    assert_eq!(actions, vec![on("switch.heater")]);

    let (_, actions) = Rig::start(cooler(24.0, -0.5), &[("sensor.temp", "23.25")]);
    assert!(actions.is_empty());
}

#[test]
fn opening_suspends_heating_until_closed() {
    let config = ThermostatConfig {
        openings: vec![hvac_common::config::OpeningConfig::Entity(
            "binary_sensor.window".into(),
        )],
        ..heater(20.0)
    };
    let (mut rig, actions) = Rig::start(config, &[("sensor.temp", "18")]);
    assert_eq!(actions, vec![on("switch.heater")]);

    assert_eq!(
        rig.entity("binary_sensor.window", "on", 10),
        vec![off("switch.heater")]
    );
    assert_eq!(rig.thermostat.action_reason(), HvacActionReason::Opening);
    assert!(rig.temperature(17.0, 20).is_empty());

    assert_eq!(
        rig.entity("binary_sensor.window", "off", 30),
        vec![on("switch.heater")]
    );
}

#[test]
fn range_preset_round_trip() {
    let mut config = heat_cool();
    config.presets.insert(
        "away".to_string(),
        PresetConfig {
            target_temp_low: Some(PresetValue::Literal(16.0)),
            target_temp_high: Some(PresetValue::Literal(28.0)),
            ..PresetConfig::default()
        },
    );
    let (mut rig, _) = Rig::start(config, &[("sensor.temp", "22")]);

    rig.thermostat
        .set_preset_mode("away", &rig.states, at(10))
        .unwrap();
    assert_eq!(rig.thermostat.environment().target_temp_low(), Some(16.0));

    rig.thermostat
        .set_temperature(
            TemperatureRequest {
                target_temp_low: Some(17.0),
                target_temp_high: Some(27.0),
                ..TemperatureRequest::default()
            },
            &rig.states,
            at(20),
        )
        .unwrap();
    rig.thermostat
        .set_preset_mode("none", &rig.states, at(30))
        .unwrap();

    let env = rig.thermostat.environment();
    assert_eq!(
        (env.target_temp_low(), env.target_temp_high()),
        (Some(20.0), Some(24.0))
    );
}

#[test]
fn temperature_preset_applies_in_single_mode_of_range_thermostat() {
    let mut config = ThermostatConfig {
        cooler: vec!["switch.ac".into()],
        target_temp_low: Some(18.0),
        target_temp_high: Some(24.0),
        ..heater(20.0)
    };
    config.presets.insert(
        "away".to_string(),
        PresetConfig {
            temperature: Some(PresetValue::Literal(16.0)),
            ..PresetConfig::default()
        },
    );
    let (mut rig, actions) = Rig::start(config, &[("sensor.temp", "19")]);
    assert_eq!(actions, vec![on("switch.heater")]);
    assert_eq!(rig.thermostat.environment().target_temp(), Some(20.0));

    let actions = rig
        .thermostat
        .set_preset_mode("away", &rig.states, at(10))
        .unwrap();
    assert_eq!(actions, vec![off("switch.heater")]);
    assert_eq!(rig.thermostat.environment().target_temp(), Some(16.0));

    rig.states.apply(&actions, at(10));
    assert!(rig.temperature(18.5, 20).is_empty());
    assert_eq!(rig.thermostat.environment().target_temp(), Some(16.0));
}

#[test]
fn leaving_heat_cool_carries_matching_bound() {
    let (mut rig, _) = Rig::start(heat_cool(), &[("sensor.temp", "22")]);

    rig.thermostat
        .set_hvac_mode(HvacMode::Cool, &rig.states, at(10))
        .unwrap();
    assert_eq!(rig.thermostat.environment().target_temp(), Some(24.0));

    rig.thermostat
        .set_hvac_mode(HvacMode::Heat, &rig.states, at(20))
        .unwrap();
    assert_eq!(rig.thermostat.environment().target_temp(), Some(20.0));
}

#[test]
fn heater_plus_dryer_routes_modes() {
    let config = ThermostatConfig {
        dryer: vec!["switch.dryer".into()],
        humidity_sensor: Some("sensor.humidity".into()),
        target_humidity: Some(50.0),
        ..heater(20.0)
    };
    let (mut rig, _) = Rig::start(config, &[("sensor.temp", "18"), ("sensor.humidity", "60")]);
    assert!(rig.is_on("switch.heater"));

    let actions = rig
        .thermostat
        .set_hvac_mode(HvacMode::Dry, &rig.states, at(10))
        .unwrap();
    assert_eq!(actions, vec![off("switch.heater"), on("switch.dryer")]);
    assert_eq!(
        rig.thermostat.action_reason(),
        HvacActionReason::TargetHumidityNotReached
    );
}
