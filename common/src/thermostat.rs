use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    config::{RestoredState, ThermostatConfig},
    device::{build_device, Controllable, DeviceContext, HeatPumpRole, HvacDevice},
    entity::{CallbackKind, ControlPass, EngineAction, EntityId, EntityStates, STATE_UNKNOWN},
    error::{CommandError, ConfigError},
    managers::{
        EntityValueEvaluator, EnvironmentManager, FeatureManager, HvacPowerManager,
        OpeningManager, PresetManager, Reading, TemplateEvaluator,
    },
    reason::HvacActionReason,
    types::{HvacAction, HvacMode, SensorKind, ThermostatAttributes},
};

/// Setpoint change requested by the user. Range mode reads the bounds,
/// single-setpoint mode reads `temperature`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperatureRequest {
    pub temperature: Option<f64>,
    pub target_temp_low: Option<f64>,
    pub target_temp_high: Option<f64>,
}

/// One climate entity: managers, device tree and the control loop over them.
///
/// Every entry point takes the host's entity-state snapshot and the current
/// time, updates the managers first and then runs at most one control pass.
/// The returned actions are the side effects the host must execute in order.
pub struct Thermostat {
    name: String,
    config: ThermostatConfig,
    environment: EnvironmentManager,
    openings: OpeningManager,
    features: FeatureManager,
    presets: PresetManager,
    power: HvacPowerManager,
    device: HvacDevice,
    evaluator: Box<dyn TemplateEvaluator>,

    hvac_mode: HvacMode,
    action_reason: HvacActionReason,
    sensor_stalled: bool,
    pending_callbacks: BTreeSet<CallbackKind>,
}

impl Thermostat {
    pub fn new(config: ThermostatConfig) -> Result<Self, ConfigError> {
        Self::with_evaluator(config, Box::new(EntityValueEvaluator))
    }

    pub fn with_evaluator(
        config: ThermostatConfig,
        evaluator: Box<dyn TemplateEvaluator>,
    ) -> Result<Self, ConfigError> {
        let mut device = build_device(&config)?;
        let openings = OpeningManager::new(&config)?;
        let power = HvacPowerManager::new(&config)?;

        let hvac_mode = config.initial_hvac_mode.unwrap_or(HvacMode::Off);
        if !device.supports(hvac_mode) {
            return Err(ConfigError::UnsupportedInitialMode(hvac_mode));
        }
        device.set_hvac_mode(hvac_mode);

        let mut environment = EnvironmentManager::new(&config);
        environment.set_hvac_mode(hvac_mode);

        Ok(Self {
            name: config.name.clone(),
            environment,
            openings,
            features: FeatureManager::new(&config),
            presets: PresetManager::new(&config),
            power,
            device,
            evaluator,
            hvac_mode,
            action_reason: HvacActionReason::None,
            sensor_stalled: false,
            pending_callbacks: BTreeSet::new(),
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ThermostatConfig {
        &self.config
    }

    pub fn hvac_mode(&self) -> HvacMode {
        self.hvac_mode
    }

    pub fn hvac_modes(&self) -> Vec<HvacMode> {
        self.device.hvac_modes()
    }

    pub fn action_reason(&self) -> HvacActionReason {
        self.action_reason
    }

    pub fn environment(&self) -> &EnvironmentManager {
        &self.environment
    }

    pub fn features(&self) -> &FeatureManager {
        &self.features
    }

    pub fn preset_mode(&self) -> &str {
        self.presets.preset_mode()
    }

    pub fn device(&self) -> &HvacDevice {
        &self.device
    }

    pub fn is_sensor_stalled(&self) -> bool {
        self.sensor_stalled
    }

    /// Callbacks scheduled and neither fired nor cancelled yet.
    pub fn pending_callbacks(&self) -> impl Iterator<Item = &CallbackKind> {
        self.pending_callbacks.iter()
    }

    /// Entities whose state changes the host must forward to
    /// [`Thermostat::entity_changed`].
    pub fn watched_entities(&self) -> Vec<EntityId> {
        let mut entities: Vec<EntityId> = [
            Some(&self.config.target_sensor),
            self.config.floor_sensor.as_ref(),
            self.config.outside_sensor.as_ref(),
            self.config.humidity_sensor.as_ref(),
            self.config.heat_pump_cooling.as_ref(),
        ]
        .into_iter()
        .flatten()
        .cloned()
        .chain(self.openings.openings().iter().map(|o| o.entity_id.clone()))
        .chain(self.presets.dependencies())
        .collect();
        entities.sort();
        entities.dedup();
        entities
    }

    /// Consumes a persisted prior state. Call once, before [`Thermostat::startup`].
    pub fn apply_old_state(&mut self, old: &RestoredState) {
        self.environment.apply_old_state(old);

        if let Some(mode) = old.hvac_mode {
            if self.config.initial_hvac_mode.is_some() {
                debug!(%mode, "configured initial mode wins over restored mode");
            } else if self.device.supports(mode) {
                self.apply_mode(mode);
            } else {
                warn!(%mode, "ignoring unsupported restored mode");
            }
        }
        if let Some(preset) = &old.preset_mode {
            self.presets.restore(preset, old.saved_targets);
        }
        if let Some(reason) = old.hvac_action_reason {
            self.action_reason = reason;
        }
        info!(
            mode = %self.hvac_mode,
            preset = self.presets.preset_mode(),
            "restored previous state"
        );
    }

    /// Reads initial sensor and signal states, derives default targets and
    /// runs the first forced control pass.
    pub fn startup(&mut self, states: &dyn EntityStates, now: DateTime<Utc>) -> Vec<EngineAction> {
        if let Some(signal) = &self.config.heat_pump_cooling {
            let role = HeatPumpRole::from_state(states.state(signal));
            self.device.set_heat_pump_role(role);
            self.sync_mode_from_device();
        }

        for (entity, kind) in self.sensor_entities() {
            if let Some(state) = states.state(&entity) {
                if let Err(err) = self
                    .environment
                    .update_current(kind, &Reading::from(state.state.as_str()))
                {
                    warn!(entity = %entity, error = %err, "ignoring initial sensor state");
                }
            }
        }

        self.refresh_features();
        if self.environment.target_temp().is_none() {
            self.features
                .carry_range_bound(self.hvac_mode, &mut self.environment);
        }
        let modes = self.device.hvac_modes();
        self.environment.set_default_target_temps(
            self.features.is_single_setpoint_mode(),
            self.features.is_range_mode(),
            &modes,
        );

        let mut pass = ControlPass::new(states, now);
        if self.environment.cur_temp().is_some() {
            self.schedule_stale_check(&mut pass);
        }
        self.control(&mut pass, None, true);
        info!(name = %self.name, mode = %self.hvac_mode, "thermostat started");
        self.finish(pass)
    }

    /// Applies a sensor payload and re-evaluates. Rejected payloads are
    /// logged and leave everything untouched.
    pub fn push_reading(
        &mut self,
        kind: SensorKind,
        reading: Reading,
        states: &dyn EntityStates,
        now: DateTime<Utc>,
    ) -> Vec<EngineAction> {
        let value = match self.environment.update_current(kind, &reading) {
            Ok(value) => value,
            Err(err) => {
                warn!(?kind, error = %err, "dropping sensor update");
                return Vec::new();
            }
        };

        let mut pass = ControlPass::new(states, now);
        let mut force = false;
        if kind == SensorKind::Temperature && value.is_some() {
            if self.sensor_stalled {
                info!("temperature sensor recovered");
                self.sensor_stalled = false;
                force = true;
            }
            self.schedule_stale_check(&mut pass);
        }
        self.control(&mut pass, None, force);
        self.finish(pass)
    }

    /// Routes a state change of any watched entity.
    pub fn entity_changed(
        &mut self,
        entity: &EntityId,
        states: &dyn EntityStates,
        now: DateTime<Utc>,
    ) -> Vec<EngineAction> {
        if let Some(kind) = self.config.sensor_kind(entity) {
            let raw = states
                .state(entity)
                .map_or(STATE_UNKNOWN, |state| state.state.as_str());
            return self.push_reading(kind, Reading::from(raw), states, now);
        }

        let mut pass = ControlPass::new(states, now);
        if self.config.heat_pump_cooling.as_ref() == Some(entity) {
            let role = HeatPumpRole::from_state(states.state(entity));
            self.device.set_heat_pump_role(role);
            let before = self.hvac_mode;
            self.sync_mode_from_device();
            self.refresh_features();
            if self.hvac_mode != before {
                self.features
                    .carry_range_bound(self.hvac_mode, &mut self.environment);
            }
            self.control(&mut pass, None, true);
        } else if self.openings.is_opening(entity) {
            if let Some(delay) = self.openings.timeout_after_change(entity, states) {
                pass.schedule(CallbackKind::OpeningTimeout(entity.clone()), delay);
            }
            self.control(&mut pass, None, true);
        } else if self.presets.dependencies().contains(entity) {
            debug!(entity = %entity, "preset dependency changed");
            self.presets
                .reapply(&mut self.environment, self.evaluator.as_ref(), states);
            self.control(&mut pass, None, true);
        } else {
            debug!(entity = %entity, "ignoring change of unwatched entity");
        }
        self.finish(pass)
    }

    /// Periodic re-assertion of the desired device state.
    pub fn keep_alive(&mut self, states: &dyn EntityStates, now: DateTime<Utc>) -> Vec<EngineAction> {
        let mut pass = ControlPass::new(states, now);
        self.control(&mut pass, Some(now), false);
        self.finish(pass)
    }

    /// Runs a previously scheduled callback.
    pub fn handle_callback(
        &mut self,
        kind: &CallbackKind,
        states: &dyn EntityStates,
        now: DateTime<Utc>,
    ) -> Vec<EngineAction> {
        if !self.pending_callbacks.remove(kind) {
            debug!(?kind, "callback was not pending");
        }
        let mut pass = ControlPass::new(states, now);
        match kind {
            CallbackKind::SensorStale => {
                warn!(name = %self.name, "temperature sensor stalled, turning devices off");
                self.sensor_stalled = true;
                self.device.turn_off(&mut pass);
                self.action_reason = HvacActionReason::TemperatureSensorStalled;
                self.power.update(HvacAction::Off, None);
            }
            CallbackKind::OpeningTimeout(_) | CallbackKind::AuxHeaterTimeout => {
                self.control(&mut pass, None, true);
            }
        }
        self.finish(pass)
    }

    pub fn set_hvac_mode(
        &mut self,
        mode: HvacMode,
        states: &dyn EntityStates,
        now: DateTime<Utc>,
    ) -> Result<Vec<EngineAction>, CommandError> {
        if !self.device.supports(mode) {
            warn!(%mode, "rejecting unsupported hvac mode");
            return Err(CommandError::UnsupportedMode(mode));
        }
        info!(from = %self.hvac_mode, to = %mode, "hvac mode changed");
        let before = self.hvac_mode;
        self.apply_mode(mode);
        self.refresh_features();
        if self.hvac_mode != before {
            self.features
                .carry_range_bound(self.hvac_mode, &mut self.environment);
        }
        let modes = self.device.hvac_modes();
        self.environment.set_default_target_temps(
            self.features.is_single_setpoint_mode(),
            self.features.is_range_mode(),
            &modes,
        );

        let mut pass = ControlPass::new(states, now);
        if mode == HvacMode::Off {
            self.device.turn_off(&mut pass);
            self.action_reason = HvacActionReason::None;
            self.power.update(HvacAction::Off, None);
        } else {
            self.control(&mut pass, None, true);
        }
        Ok(self.finish(pass))
    }

    pub fn set_temperature(
        &mut self,
        request: TemperatureRequest,
        states: &dyn EntityStates,
        now: DateTime<Utc>,
    ) -> Result<Vec<EngineAction>, CommandError> {
        if self.features.is_range_mode() {
            let (Some(low), Some(high)) = (request.target_temp_low, request.target_temp_high)
            else {
                warn!(?request, "range mode needs both bounds");
                return Err(CommandError::MissingSetpoint);
            };
            let (low, high) = (
                self.environment.clamp_temp(low),
                self.environment.clamp_temp(high),
            );
            self.environment.set_temperature_range(Some(low), Some(high));
            info!(low, high, "target range set");
        } else {
            let Some(temperature) = request.temperature else {
                warn!(?request, "single setpoint mode needs a temperature");
                return Err(CommandError::MissingSetpoint);
            };
            let temperature = self.environment.clamp_temp(temperature);
            self.environment.set_target_temp(temperature);
            info!(temperature, "target temperature set");
        }

        let mut pass = ControlPass::new(states, now);
        self.control(&mut pass, None, true);
        Ok(self.finish(pass))
    }

    pub fn set_humidity(
        &mut self,
        humidity: f64,
        states: &dyn EntityStates,
        now: DateTime<Utc>,
    ) -> Vec<EngineAction> {
        let humidity = self.environment.clamp_humidity(humidity);
        self.environment.set_target_humidity(humidity);
        info!(humidity, "target humidity set");

        let mut pass = ControlPass::new(states, now);
        self.control(&mut pass, None, true);
        self.finish(pass)
    }

    pub fn set_preset_mode(
        &mut self,
        name: &str,
        states: &dyn EntityStates,
        now: DateTime<Utc>,
    ) -> Result<Vec<EngineAction>, CommandError> {
        if let Err(err) = self.presets.set_preset_mode(
            name,
            &mut self.environment,
            self.evaluator.as_ref(),
            states,
        ) {
            warn!(preset = name, error = %err, "rejecting preset");
            return Err(err);
        }
        self.refresh_features();

        let mut pass = ControlPass::new(states, now);
        self.control(&mut pass, None, true);
        Ok(self.finish(pass))
    }

    /// Overrides the action reason with one of the external values. The next
    /// control pass that reaches a decision replaces it again.
    pub fn set_action_reason(&mut self, value: &str) -> Result<(), CommandError> {
        let reason = HvacActionReason::parse_external(value).map_err(|err| {
            warn!(name = %self.name, value, "rejecting action reason");
            err
        })?;
        info!(name = %self.name, reason = reason.as_str(), "external action reason set");
        self.action_reason = reason;
        Ok(())
    }

    /// Cancels every callback still pending.
    pub fn shutdown(&mut self) -> Vec<EngineAction> {
        let pending = std::mem::take(&mut self.pending_callbacks);
        if !pending.is_empty() {
            debug!(count = pending.len(), "cancelling pending callbacks");
        }
        pending.into_iter().map(EngineAction::CancelCallback).collect()
    }

    pub fn hvac_action(&self, states: &dyn EntityStates, now: DateTime<Utc>) -> HvacAction {
        self.device.hvac_action(&ControlPass::new(states, now))
    }

    pub fn attributes(&self, states: &dyn EntityStates, now: DateTime<Utc>) -> ThermostatAttributes {
        let env = &self.environment;
        ThermostatAttributes {
            name: self.name.clone(),
            current_temperature: env.cur_temp(),
            current_floor_temperature: env.cur_floor_temp(),
            outside_temperature: env.cur_outside_temp(),
            current_humidity: env.cur_humidity(),
            target_temperature: env.target_temp(),
            target_temperature_low: env.target_temp_low(),
            target_temperature_high: env.target_temp_high(),
            target_humidity: env.target_humidity(),
            hvac_mode: self.hvac_mode,
            hvac_modes: self.device.hvac_modes(),
            hvac_action: self.hvac_action(states, now),
            hvac_action_reason: self.action_reason,
            preset_mode: self.presets.preset_mode().to_string(),
            preset_modes: self.presets.preset_modes(),
            supported_features: self.features.supported_features(),
            min_temp: env.min_temp(),
            max_temp: env.max_temp(),
            target_temp_step: env.target_temp_step(),
            hvac_power_level: self.power.level(),
            hvac_power_percent: self.power.percent(),
        }
    }

    /// State the host persists and hands back through
    /// [`Thermostat::apply_old_state`] after a restart.
    pub fn restored_state(&self) -> RestoredState {
        let env = &self.environment;
        RestoredState {
            target_temp: env.target_temp(),
            target_temp_low: env.target_temp_low(),
            target_temp_high: env.target_temp_high(),
            target_humidity: env.target_humidity(),
            hvac_mode: Some(self.hvac_mode),
            preset_mode: Some(self.presets.preset_mode().to_string()),
            hvac_action_reason: Some(self.action_reason),
            min_floor_temp: env.min_floor_temp(),
            max_floor_temp: env.max_floor_temp(),
            saved_targets: self.presets.saved_targets(),
        }
    }

    fn sensor_entities(&self) -> Vec<(EntityId, SensorKind)> {
        [
            Some((&self.config.target_sensor, SensorKind::Temperature)),
            self.config
                .floor_sensor
                .as_ref()
                .map(|e| (e, SensorKind::FloorTemperature)),
            self.config
                .outside_sensor
                .as_ref()
                .map(|e| (e, SensorKind::OutsideTemperature)),
            self.config
                .humidity_sensor
                .as_ref()
                .map(|e| (e, SensorKind::Humidity)),
        ]
        .into_iter()
        .flatten()
        .map(|(entity, kind)| (entity.clone(), kind))
        .collect()
    }

    fn apply_mode(&mut self, mode: HvacMode) {
        self.hvac_mode = mode;
        self.device.set_hvac_mode(mode);
        self.environment.set_hvac_mode(mode);
    }

    fn sync_mode_from_device(&mut self) {
        let mode = self.device.hvac_mode();
        if mode != self.hvac_mode {
            info!(from = %self.hvac_mode, to = %mode, "hvac mode follows heat pump role");
            self.hvac_mode = mode;
            self.environment.set_hvac_mode(mode);
        }
    }

    fn refresh_features(&mut self) {
        let modes = self.device.hvac_modes();
        self.features.set_support_flags(
            self.presets.has_presets(),
            self.presets.has_range_presets(),
            &modes,
            self.hvac_mode,
        );
    }

    fn schedule_stale_check(&self, pass: &mut ControlPass<'_>) {
        if let Some(stale) = self.config.sensor_stale_duration() {
            pass.schedule(CallbackKind::SensorStale, stale);
        }
    }

    fn control(&mut self, pass: &mut ControlPass<'_>, time: Option<DateTime<Utc>>, force: bool) {
        if self.sensor_stalled {
            debug!("sensor stalled, skipping control");
            return;
        }
        let ctx = DeviceContext {
            environment: &self.environment,
            openings: &self.openings,
            hvac_mode: self.hvac_mode,
        };
        if let Some(reason) = self.device.control(&ctx, pass, time, force) {
            if reason != self.action_reason {
                info!(reason = reason.as_str(), "action reason changed");
            }
            self.action_reason = reason;
        }
        let action = self.device.hvac_action(pass);
        self.power.update(action, self.deviation(action));
    }

    /// Distance still to cover for the running action.
    fn deviation(&self, action: HvacAction) -> Option<f64> {
        let env = &self.environment;
        let range = self.hvac_mode == HvacMode::HeatCool && self.features.is_range_mode();
        match action {
            HvacAction::Heating => {
                let target = if range {
                    env.target_temp_low()
                } else {
                    env.target_temp()
                };
                Some(target? - env.cur_temp()?)
            }
            HvacAction::Cooling | HvacAction::Fan => {
                let target = if range {
                    env.target_temp_high()
                } else {
                    env.target_temp()
                };
                Some(env.cur_temp()? - target?)
            }
            HvacAction::Drying => Some(env.cur_humidity()? - env.target_humidity()?),
            HvacAction::Off | HvacAction::Idle => None,
        }
    }

    fn finish(&mut self, pass: ControlPass<'_>) -> Vec<EngineAction> {
        let actions = pass.into_actions();
        for action in &actions {
            match action {
                EngineAction::ScheduleCallback { kind, .. } => {
                    self.pending_callbacks.insert(kind.clone());
                }
                EngineAction::CancelCallback(kind) => {
                    self.pending_callbacks.remove(kind);
                }
                _ => {}
            }
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{PresetConfig, PresetValue},
        entity::{MemoryStates, STATE_OFF, STATE_ON},
    };
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn heater_config() -> ThermostatConfig {
        ThermostatConfig {
            name: "living".to_string(),
            heater: vec!["switch.heater".into()],
            target_sensor: "sensor.temp".into(),
            target_temp: Some(20.0),
            initial_hvac_mode: Some(HvacMode::Heat),
            ..ThermostatConfig::default()
        }
    }

    fn started(config: ThermostatConfig, states: &mut MemoryStates) -> Thermostat {
        let mut thermostat = Thermostat::new(config).unwrap();
        let actions = thermostat.startup(states, at(0));
        states.apply(&actions, at(0));
        thermostat
    }

    #[test]
    fn rejects_unsupported_initial_mode() {
        let err = Thermostat::new(ThermostatConfig {
            initial_hvac_mode: Some(HvacMode::Cool),
            ..heater_config()
        })
        .err();
        assert_eq!(err, Some(ConfigError::UnsupportedInitialMode(HvacMode::Cool)));
    }

    #[test]
    fn startup_reads_sensor_and_heats() {
        let mut states = MemoryStates::new();
        states.set(&"sensor.temp".into(), "18.5", at(0));
        let mut thermostat = Thermostat::new(heater_config()).unwrap();

        let actions = thermostat.startup(&states, at(0));
        assert_eq!(actions, vec![EngineAction::TurnOn("switch.heater".into())]);
        assert_eq!(
            thermostat.action_reason(),
            HvacActionReason::TargetTempNotReached
        );
        assert_eq!(thermostat.environment().cur_temp(), Some(18.5));
    }

    #[test]
    fn bad_reading_is_dropped() {
        let mut states = MemoryStates::new();
        let mut thermostat = started(heater_config(), &mut states);
        thermostat.push_reading(SensorKind::Temperature, 21.0.into(), &states, at(1));

        let actions =
            thermostat.push_reading(SensorKind::Temperature, "warm".into(), &states, at(2));
        assert!(actions.is_empty());
        assert_eq!(thermostat.environment().cur_temp(), Some(21.0));

        let actions =
            thermostat.push_reading(SensorKind::Temperature, f64::NAN.into(), &states, at(3));
        assert!(actions.is_empty());
        assert_eq!(thermostat.environment().cur_temp(), Some(21.0));
    }

    #[test]
    fn unsupported_mode_is_rejected_without_mutation() {
        let mut states = MemoryStates::new();
        let mut thermostat = started(heater_config(), &mut states);

        let err = thermostat
            .set_hvac_mode(HvacMode::Cool, &states, at(1))
            .unwrap_err();
        assert_eq!(err, CommandError::UnsupportedMode(HvacMode::Cool));
        assert_eq!(thermostat.hvac_mode(), HvacMode::Heat);
    }

    #[test]
    fn mode_off_turns_everything_off() {
        let mut states = MemoryStates::new();
        states.set(&"sensor.temp".into(), "18", at(0));
        let mut thermostat = started(heater_config(), &mut states);
        assert_eq!(
            states
                .state(&"switch.heater".into())
                .map(|s| s.state.as_str()),
            Some(STATE_ON)
        );

        let actions = thermostat
            .set_hvac_mode(HvacMode::Off, &states, at(10))
            .unwrap();
        assert_eq!(actions, vec![EngineAction::TurnOff("switch.heater".into())]);
        states.apply(&actions, at(10));

        let actions =
            thermostat.push_reading(SensorKind::Temperature, 10.0.into(), &states, at(20));
        assert!(actions.is_empty());
        let actions = thermostat.keep_alive(&states, at(30));
        assert!(actions.is_empty());
    }

    #[test]
    fn set_temperature_needs_matching_fields() {
        let mut states = MemoryStates::new();
        let mut thermostat = started(heater_config(), &mut states);

        let err = thermostat
            .set_temperature(
                TemperatureRequest {
                    target_temp_low: Some(18.0),
                    target_temp_high: Some(22.0),
                    ..TemperatureRequest::default()
                },
                &states,
                at(1),
            )
            .unwrap_err();
        assert_eq!(err, CommandError::MissingSetpoint);

        thermostat
            .set_temperature(
                TemperatureRequest {
                    temperature: Some(80.0),
                    ..TemperatureRequest::default()
                },
                &states,
                at(2),
            )
            .unwrap();
        assert_eq!(thermostat.environment().target_temp(), Some(35.0));
    }

    #[test]
    fn external_action_reason() {
        let mut states = MemoryStates::new();
        let mut thermostat = started(heater_config(), &mut states);

        thermostat.set_action_reason("presence").unwrap();
        assert_eq!(thermostat.action_reason(), HvacActionReason::Presence);

        let err = thermostat.set_action_reason("opening").unwrap_err();
        assert_eq!(err, CommandError::UnknownActionReason("opening".to_string()));
        assert_eq!(thermostat.action_reason(), HvacActionReason::Presence);
    }

    #[test]
    fn stale_sensor_turns_off_until_next_reading() {
        let mut states = MemoryStates::new();
        states.set(&"sensor.temp".into(), "18", at(0));
        let mut thermostat = started(
            ThermostatConfig {
                sensor_stale_duration_ms: Some(600_000),
                ..heater_config()
            },
            &mut states,
        );
        assert_eq!(
            thermostat.pending_callbacks().collect::<Vec<_>>(),
            vec![&CallbackKind::SensorStale]
        );

        let actions = thermostat.handle_callback(&CallbackKind::SensorStale, &states, at(600));
        assert_eq!(actions, vec![EngineAction::TurnOff("switch.heater".into())]);
        states.apply(&actions, at(600));
        assert!(thermostat.is_sensor_stalled());
        assert_eq!(
            thermostat.action_reason(),
            HvacActionReason::TemperatureSensorStalled
        );
        assert!(thermostat.keep_alive(&states, at(700)).is_empty());

        let actions =
            thermostat.push_reading(SensorKind::Temperature, 18.0.into(), &states, at(800));
        assert_eq!(
            actions,
            vec![
                EngineAction::ScheduleCallback {
                    kind: CallbackKind::SensorStale,
                    delay: Duration::from_secs(600),
                },
                EngineAction::TurnOn("switch.heater".into()),
            ]
        );
        assert!(!thermostat.is_sensor_stalled());
    }

    #[test]
    fn opening_schedules_timeout_and_shutdown_cancels() {
        let mut states = MemoryStates::new();
        states.set(&"sensor.temp".into(), "18", at(0));
        let mut thermostat = started(
            ThermostatConfig {
                openings: vec![crate::config::OpeningConfig::Detailed {
                    entity_id: "binary_sensor.window".into(),
                    timeout_ms: Some(30_000),
                    closing_timeout_ms: None,
                }],
                ..heater_config()
            },
            &mut states,
        );

        let window = EntityId::from("binary_sensor.window");
        states.set(&window, STATE_ON, at(100));
        let actions = thermostat.entity_changed(&window, &states, at(100));
        assert_eq!(
            actions,
            vec![EngineAction::ScheduleCallback {
                kind: CallbackKind::OpeningTimeout(window.clone()),
                delay: Duration::from_secs(30),
            }]
        );

        let actions = thermostat.handle_callback(
            &CallbackKind::OpeningTimeout(window.clone()),
            &states,
            at(130),
        );
        assert_eq!(actions, vec![EngineAction::TurnOff("switch.heater".into())]);
        assert_eq!(thermostat.action_reason(), HvacActionReason::Opening);

        assert_eq!(thermostat.pending_callbacks().count(), 0);

        states.apply(&actions, at(130));
        states.set(&window, STATE_OFF, at(150));
        thermostat.entity_changed(&window, &states, at(150));
        states.set(&window, STATE_ON, at(200));
        thermostat.entity_changed(&window, &states, at(200));
        assert_eq!(
            thermostat.shutdown(),
            vec![EngineAction::CancelCallback(CallbackKind::OpeningTimeout(
                window
            ))]
        );
        assert!(thermostat.shutdown().is_empty());
    }

    #[test]
    fn preset_round_trip_restores_targets() {
        let mut states = MemoryStates::new();
        let mut presets = std::collections::BTreeMap::new();
        presets.insert(
            "eco".to_string(),
            PresetConfig {
                temperature: Some(PresetValue::Literal(16.0)),
                ..PresetConfig::default()
            },
        );
        let mut thermostat = started(
            ThermostatConfig {
                presets,
                ..heater_config()
            },
            &mut states,
        );

        thermostat.set_preset_mode("eco", &states, at(1)).unwrap();
        assert_eq!(thermostat.environment().target_temp(), Some(16.0));
        thermostat
            .set_temperature(
                TemperatureRequest {
                    temperature: Some(17.0),
                    ..TemperatureRequest::default()
                },
                &states,
                at(2),
            )
            .unwrap();
        thermostat.set_preset_mode("none", &states, at(3)).unwrap();
        assert_eq!(thermostat.environment().target_temp(), Some(20.0));
        assert_eq!(thermostat.preset_mode(), "none");

        assert!(matches!(
            thermostat.set_preset_mode("away", &states, at(4)),
            Err(CommandError::UnknownPreset(_))
        ));
    }

    #[test]
    fn restored_state_round_trips() {
        let mut states = MemoryStates::new();
        let thermostat = started(heater_config(), &mut states);
        let saved = thermostat.restored_state();

        let mut restored = Thermostat::new(ThermostatConfig {
            target_temp: None,
            initial_hvac_mode: None,
            ..heater_config()
        })
        .unwrap();
        restored.apply_old_state(&saved);
        assert_eq!(restored.hvac_mode(), HvacMode::Heat);
        assert_eq!(restored.environment().target_temp(), Some(20.0));
    }

    #[test]
    fn attributes_report_action_and_power() {
        let mut states = MemoryStates::new();
        states.set(&"sensor.temp".into(), "18", at(0));
        let thermostat = started(heater_config(), &mut states);

        let attributes = thermostat.attributes(&states, at(1));
        assert_eq!(attributes.hvac_action, HvacAction::Heating);
        assert_eq!(attributes.hvac_modes, vec![HvacMode::Off, HvacMode::Heat]);
        assert_eq!(attributes.preset_modes, vec!["none".to_string()]);
        assert_eq!(attributes.hvac_power_level, 5);
        assert_eq!(attributes.hvac_power_percent, 100);
    }
}
