use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    controller::{CycleGuard, HvacController, Strategy},
    device::{action_for, latch_ready, Controllable, DeviceContext, EnvironmentTracker},
    entity::{ControlPass, EntityId},
    reason::HvacActionReason,
    types::{HvacAction, HvacMode, TargetAttr},
};

/// One or more switches driven as a single unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchOutput {
    entities: Vec<EntityId>,
}

impl SwitchOutput {
    pub fn new(entities: Vec<EntityId>) -> Self {
        Self { entities }
    }

    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }
}

impl Controllable for SwitchOutput {
    fn turn_on(&mut self, pass: &mut ControlPass<'_>) {
        for entity in &self.entities {
            pass.turn_on(entity);
        }
    }

    fn turn_off(&mut self, pass: &mut ControlPass<'_>) {
        for entity in &self.entities {
            pass.turn_off(entity);
        }
    }

    fn is_active(&self, pass: &ControlPass<'_>) -> bool {
        self.entities.iter().any(|entity| pass.is_active(entity))
    }
}

/// Leaf device: a switch output with a fixed strategy.
#[derive(Debug, Clone)]
pub struct SwitchDevice {
    output: SwitchOutput,
    controller: HvacController,
    hvac_mode: HvacMode,
    target_attr: TargetAttr,
    ready: bool,
}

impl SwitchDevice {
    pub fn new(strategy: Strategy, entities: Vec<EntityId>, guard: CycleGuard) -> Self {
        Self {
            output: SwitchOutput::new(entities),
            controller: HvacController::new(strategy, guard),
            hvac_mode: HvacMode::Off,
            target_attr: strategy.default_attr(),
            ready: false,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.controller.strategy
    }

    pub fn entities(&self) -> &[EntityId] {
        self.output.entities()
    }

    pub fn hvac_modes(&self) -> Vec<HvacMode> {
        vec![HvacMode::Off, self.strategy().hvac_mode()]
    }

    pub fn hvac_mode(&self) -> HvacMode {
        self.hvac_mode
    }

    pub fn set_hvac_mode(&mut self, mode: HvacMode) {
        self.hvac_mode = if self.hvac_modes().contains(&mode) {
            mode
        } else {
            debug!(%mode, strategy = ?self.strategy(), "mode not supported, switching off");
            HvacMode::Off
        };
    }

    pub fn set_target_attr(&mut self, attr: TargetAttr) {
        self.target_attr = attr;
    }

    /// Whether this pass may change the output: readiness latch plus the
    /// minimum cycle guard.
    pub fn needs_control(
        &mut self,
        ctx: &DeviceContext<'_>,
        pass: &ControlPass<'_>,
        time: Option<DateTime<Utc>>,
        force: bool,
    ) -> bool {
        latch_ready(&mut self.ready, ctx.environment, self.target_attr);
        self.controller.guard.needs_control(
            self.ready,
            self.hvac_mode,
            self.output.entities(),
            pass,
            time,
            force,
        )
    }

    pub fn control(
        &mut self,
        ctx: &DeviceContext<'_>,
        pass: &mut ControlPass<'_>,
        time: Option<DateTime<Utc>>,
        force: bool,
    ) -> Option<HvacActionReason> {
        if !self.needs_control(ctx, pass, time, force) {
            return None;
        }
        self.controller.control(
            &mut self.output,
            ctx,
            self.target_attr,
            pass,
            time,
        )
    }

    pub fn hvac_action(&self, pass: &ControlPass<'_>) -> HvacAction {
        action_for(
            self.hvac_mode,
            self.output.is_active(pass),
            self.strategy().hvac_action(),
        )
    }
}

impl Controllable for SwitchDevice {
    fn turn_on(&mut self, pass: &mut ControlPass<'_>) {
        self.output.turn_on(pass);
    }

    fn turn_off(&mut self, pass: &mut ControlPass<'_>) {
        self.output.turn_off(pass);
    }

    fn is_active(&self, pass: &ControlPass<'_>) -> bool {
        self.output.is_active(pass)
    }
}

impl EnvironmentTracker for SwitchDevice {
    fn target_attr(&self) -> TargetAttr {
        self.target_attr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ThermostatConfig,
        entity::{EngineAction, MemoryStates, STATE_OFF, STATE_ON},
        managers::{EnvironmentManager, OpeningManager},
        types::SensorKind,
    };
    use chrono::TimeZone;
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn group_is_active_when_any_member_is_on() {
        let a = EntityId::from("switch.a");
        let b = EntityId::from("switch.b");
        let mut states = MemoryStates::new();
        states.set(&a, STATE_OFF, at(0));
        states.set(&b, STATE_ON, at(0));
        let mut output = SwitchOutput::new(vec![a.clone(), b]);

        let mut pass = ControlPass::new(&states, at(1));
        assert!(output.is_active(&pass));
        output.turn_on(&mut pass);
        assert_eq!(pass.into_actions(), vec![EngineAction::TurnOn(a)]);
    }

    #[test]
    fn waits_for_readiness_and_min_cycle() {
        let heater = EntityId::from("switch.heater");
        let mut device = SwitchDevice::new(
            Strategy::Heating,
            vec![heater.clone()],
            CycleGuard {
                min_cycle_duration: Some(Duration::from_secs(60)),
            },
        );
        device.set_hvac_mode(HvacMode::Heat);
        let mut env = EnvironmentManager::new(&ThermostatConfig {
            target_temp: Some(21.0),
            ..ThermostatConfig::default()
        });
        let openings = OpeningManager::default();
        let mut states = MemoryStates::new();
        states.set(&heater, STATE_OFF, at(0));

        let ctx = DeviceContext {
            environment: &env,
            openings: &openings,
            hvac_mode: HvacMode::Heat,
        };
        let mut pass = ControlPass::new(&states, at(120));
        assert_eq!(device.control(&ctx, &mut pass, None, true), None);

        env.update_current(SensorKind::Temperature, &18.0.into())
            .unwrap();
        let ctx = DeviceContext {
            environment: &env,
            openings: &openings,
            hvac_mode: HvacMode::Heat,
        };
        let mut pass = ControlPass::new(&states, at(30));
        assert_eq!(device.control(&ctx, &mut pass, None, false), None);

        let mut pass = ControlPass::new(&states, at(120));
        assert_eq!(
            device.control(&ctx, &mut pass, None, false),
            Some(HvacActionReason::TargetTempNotReached)
        );
        assert_eq!(pass.into_actions(), vec![EngineAction::TurnOn(heater)]);
    }

    #[test]
    fn unsupported_mode_coerces_off() {
        let mut device = SwitchDevice::new(
            Strategy::Cooling,
            vec!["switch.ac".into()],
            CycleGuard::default(),
        );
        device.set_hvac_mode(HvacMode::Heat);
        assert_eq!(device.hvac_mode(), HvacMode::Off);
        device.set_hvac_mode(HvacMode::Cool);
        assert_eq!(device.hvac_mode(), HvacMode::Cool);
    }
}
