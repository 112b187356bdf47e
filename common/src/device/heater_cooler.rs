use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{
    device::{Controllable, DeviceContext, HvacDevice},
    entity::{ControlPass, EntityId},
    reason::HvacActionReason,
    types::{HvacAction, HvacMode, TargetAttr},
};

/// Separate heating and cooling branches under one thermostat.
///
/// In HEAT_COOL the branch that is already running keeps the decision until
/// its own bound stops calling for it, then the dead band leaves both idle.
/// At most one branch is engaged per pass.
#[derive(Debug, Clone)]
pub struct HeaterCoolerDevice {
    heater: Box<HvacDevice>,
    cooler: Box<HvacDevice>,
    range_supported: bool,
    hvac_mode: HvacMode,
}

impl HeaterCoolerDevice {
    pub fn new(heater: HvacDevice, cooler: HvacDevice, range_supported: bool) -> Self {
        Self {
            heater: Box::new(heater),
            cooler: Box::new(cooler),
            range_supported,
            hvac_mode: HvacMode::Off,
        }
    }

    pub fn heater(&self) -> &HvacDevice {
        &self.heater
    }

    pub fn cooler(&self) -> &HvacDevice {
        &self.cooler
    }

    pub fn entities(&self) -> Vec<EntityId> {
        let mut entities = self.heater.entities();
        entities.extend(self.cooler.entities());
        entities
    }

    pub fn hvac_modes(&self) -> Vec<HvacMode> {
        let mut modes: Vec<HvacMode> = self
            .heater
            .hvac_modes()
            .into_iter()
            .chain(self.cooler.hvac_modes())
            .collect();
        if self.range_supported {
            modes.push(HvacMode::HeatCool);
        }
        modes.sort();
        modes.dedup();
        modes
    }

    pub fn hvac_mode(&self) -> HvacMode {
        self.hvac_mode
    }

    pub fn set_hvac_mode(&mut self, mode: HvacMode) {
        self.hvac_mode = if self.hvac_modes().contains(&mode) {
            mode
        } else {
            HvacMode::Off
        };

        let (heater_mode, cooler_mode) = match self.hvac_mode {
            HvacMode::HeatCool => (HvacMode::Heat, HvacMode::Cool),
            mode if self.heater.supports(mode) => (mode, HvacMode::Off),
            mode => (HvacMode::Off, mode),
        };
        self.heater.set_hvac_mode(heater_mode);
        self.cooler.set_hvac_mode(cooler_mode);

        let (heater_attr, cooler_attr) = if self.hvac_mode == HvacMode::HeatCool {
            (TargetAttr::TemperatureLow, TargetAttr::TemperatureHigh)
        } else {
            (TargetAttr::Temperature, TargetAttr::Temperature)
        };
        self.heater.set_target_attr(heater_attr);
        self.cooler.set_target_attr(cooler_attr);
    }

    pub fn control(
        &mut self,
        ctx: &DeviceContext<'_>,
        pass: &mut ControlPass<'_>,
        time: Option<DateTime<Utc>>,
        force: bool,
    ) -> Option<HvacActionReason> {
        match self.hvac_mode {
            HvacMode::Off => {
                self.turn_off(pass);
                None
            }
            HvacMode::HeatCool => self.control_heat_cool(ctx, pass, time, force),
            _ if self.heater.hvac_mode() != HvacMode::Off => {
                self.cooler.turn_off(pass);
                self.heater.control(ctx, pass, time, force)
            }
            _ => {
                self.heater.turn_off(pass);
                self.cooler.control(ctx, pass, time, force)
            }
        }
    }

    fn control_heat_cool(
        &mut self,
        ctx: &DeviceContext<'_>,
        pass: &mut ControlPass<'_>,
        time: Option<DateTime<Utc>>,
        force: bool,
    ) -> Option<HvacActionReason> {
        let env = ctx.environment;
        if env.cur_temp().is_none()
            || env.target_temp_low().is_none()
            || env.target_temp_high().is_none()
        {
            debug!("heat/cool range not ready");
            return None;
        }

        let mut heater_active = self.heater.is_active(pass);
        if heater_active && self.cooler.is_active(pass) {
            warn!("heater and cooler both on, stopping cooler");
            self.cooler.turn_off(pass);
        }

        if !heater_active && self.cooler.is_active(pass) {
            return self.cooler.control(ctx, pass, time, force);
        }

        // Floor limits belong to the heater branch, it decides on them.
        if !heater_active
            && (env.is_too_cold(TargetAttr::TemperatureLow) || env.is_floor_cold())
        {
            heater_active = true;
        }
        if heater_active {
            return self.heater.control(ctx, pass, time, force);
        }
        if env.is_too_hot(TargetAttr::TemperatureHigh) {
            return self.cooler.control(ctx, pass, time, force);
        }

        debug!("inside heat/cool dead band");
        let reason = self.heater.control(ctx, pass, time, force);
        if time.is_some() {
            self.cooler.turn_off(pass);
        }
        reason
    }

    pub fn hvac_action(&self, pass: &ControlPass<'_>) -> HvacAction {
        if self.hvac_mode == HvacMode::Off {
            HvacAction::Off
        } else if self.heater.is_active(pass) {
            self.heater.hvac_action(pass)
        } else if self.cooler.is_active(pass) {
            self.cooler.hvac_action(pass)
        } else {
            HvacAction::Idle
        }
    }
}

impl Controllable for HeaterCoolerDevice {
    fn turn_on(&mut self, pass: &mut ControlPass<'_>) {
        if self.cooler.hvac_mode() != HvacMode::Off && self.heater.hvac_mode() == HvacMode::Off {
            self.cooler.turn_on(pass);
        } else {
            self.heater.turn_on(pass);
        }
    }

    fn turn_off(&mut self, pass: &mut ControlPass<'_>) {
        self.heater.turn_off(pass);
        self.cooler.turn_off(pass);
    }

    fn is_active(&self, pass: &ControlPass<'_>) -> bool {
        self.heater.is_active(pass) || self.cooler.is_active(pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ThermostatConfig,
        controller::{CycleGuard, Strategy},
        device::SwitchDevice,
        entity::{EngineAction, MemoryStates, STATE_OFF, STATE_ON},
        managers::{EnvironmentManager, OpeningManager},
        types::SensorKind,
    };
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn device() -> HeaterCoolerDevice {
        let heater = SwitchDevice::new(Strategy::Heating, vec!["switch.heater".into()], CycleGuard::default());
        let cooler = SwitchDevice::new(Strategy::Cooling, vec!["switch.ac".into()], CycleGuard::default());
        let mut device =
            HeaterCoolerDevice::new(HvacDevice::Switch(heater), HvacDevice::Switch(cooler), true);
        device.set_hvac_mode(HvacMode::HeatCool);
        device
    }

    fn env(cur: f64) -> EnvironmentManager {
        let mut env = EnvironmentManager::new(&ThermostatConfig {
            target_temp: Some(24.0),
            target_temp_low: Some(20.0),
            target_temp_high: Some(24.0),
            initial_hvac_mode: Some(HvacMode::HeatCool),
            ..ThermostatConfig::default()
        });
        env.update_current(SensorKind::Temperature, &cur.into())
            .unwrap();
        env
    }

    fn run(device: &mut HeaterCoolerDevice, states: &MemoryStates, cur: f64) -> Vec<EngineAction> {
        let env = env(cur);
        let openings = OpeningManager::default();
        let ctx = DeviceContext {
            environment: &env,
            openings: &openings,
            hvac_mode: HvacMode::HeatCool,
        };
        let mut pass = ControlPass::new(states, at(60));
        device.control(&ctx, &mut pass, None, false);
        pass.into_actions()
    }

    #[test]
    fn exposes_union_of_modes() {
        assert_eq!(
            device().hvac_modes(),
            vec![HvacMode::Off, HvacMode::Heat, HvacMode::Cool, HvacMode::HeatCool]
        );
    }

    #[test]
    fn running_heater_stops_at_low_bound() {
        let mut device = device();
        let mut states = MemoryStates::new();
        states.set(&"switch.heater".into(), STATE_ON, at(0));
        states.set(&"switch.ac".into(), STATE_OFF, at(0));

        // Still at or below low - cold tolerance, heater keeps running.
        assert!(run(&mut device, &states, 19.7).is_empty());
        assert_eq!(
            run(&mut device, &states, 19.8),
            vec![EngineAction::TurnOff("switch.heater".into())]
        );
        // Far past the high bound, the cooler still waits for the next pass.
        assert_eq!(
            run(&mut device, &states, 24.5),
            vec![EngineAction::TurnOff("switch.heater".into())]
        );
    }

    #[test]
    fn both_on_is_repaired() {
        let mut device = device();
        let mut states = MemoryStates::new();
        states.set(&"switch.heater".into(), STATE_ON, at(0));
        states.set(&"switch.ac".into(), STATE_ON, at(0));

        let actions = run(&mut device, &states, 19.0);
        assert_eq!(actions, vec![EngineAction::TurnOff("switch.ac".into())]);
    }

    #[test]
    fn single_mode_turns_other_branch_off() {
        let mut device = device();
        device.set_hvac_mode(HvacMode::Cool);
        let mut states = MemoryStates::new();
        states.set(&"switch.heater".into(), STATE_ON, at(0));

        let actions = run(&mut device, &states, 25.0);
        assert_eq!(
            actions,
            vec![
                EngineAction::TurnOff("switch.heater".into()),
                EngineAction::TurnOn("switch.ac".into())
            ]
        );
    }
}
