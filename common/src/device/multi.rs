use chrono::{DateTime, Utc};

use crate::{
    device::{Controllable, DeviceContext, HeatPumpRole, HvacDevice},
    entity::{ControlPass, EntityId},
    reason::HvacActionReason,
    types::{HvacAction, HvacMode},
};

/// Independent sub-topologies behind one thermostat, e.g. a heater plus a
/// dryer. Each mode is routed to the first child that supports it, every
/// other child is driven OFF.
#[derive(Debug, Clone)]
pub struct MultiHvacDevice {
    children: Vec<HvacDevice>,
    hvac_mode: HvacMode,
}

impl MultiHvacDevice {
    pub fn new(children: Vec<HvacDevice>) -> Self {
        Self {
            children,
            hvac_mode: HvacMode::Off,
        }
    }

    pub fn children(&self) -> &[HvacDevice] {
        &self.children
    }

    pub fn entities(&self) -> Vec<EntityId> {
        self.children.iter().flat_map(HvacDevice::entities).collect()
    }

    pub fn hvac_modes(&self) -> Vec<HvacMode> {
        let mut modes: Vec<HvacMode> = self
            .children
            .iter()
            .flat_map(HvacDevice::hvac_modes)
            .collect();
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
        let mut routed = false;
        for child in &mut self.children {
            if !routed && self.hvac_mode != HvacMode::Off && child.supports(self.hvac_mode) {
                child.set_hvac_mode(self.hvac_mode);
                routed = true;
            } else {
                child.set_hvac_mode(HvacMode::Off);
            }
        }
    }

    pub fn control(
        &mut self,
        ctx: &DeviceContext<'_>,
        pass: &mut ControlPass<'_>,
        time: Option<DateTime<Utc>>,
        force: bool,
    ) -> Option<HvacActionReason> {
        let mut reason = None;
        for child in &mut self.children {
            if child.hvac_mode() == HvacMode::Off {
                child.turn_off(pass);
            } else {
                reason = child.control(ctx, pass, time, force);
            }
        }
        reason
    }

    pub fn hvac_action(&self, pass: &ControlPass<'_>) -> HvacAction {
        if self.hvac_mode == HvacMode::Off {
            return HvacAction::Off;
        }
        self.children
            .iter()
            .find(|child| child.hvac_mode() != HvacMode::Off)
            .map_or(HvacAction::Idle, |child| child.hvac_action(pass))
    }

    pub fn set_heat_pump_role(&mut self, role: HeatPumpRole) -> bool {
        let mut found = false;
        for child in &mut self.children {
            found |= child.set_heat_pump_role(role);
        }
        if found && !self.hvac_modes().contains(&self.hvac_mode) {
            self.hvac_mode = match self.hvac_mode {
                HvacMode::Heat => HvacMode::Cool,
                HvacMode::Cool => HvacMode::Heat,
                mode => mode,
            };
        }
        found
    }
}

impl Controllable for MultiHvacDevice {
    fn turn_on(&mut self, pass: &mut ControlPass<'_>) {
        if let Some(child) = self
            .children
            .iter_mut()
            .find(|child| child.hvac_mode() != HvacMode::Off)
        {
            child.turn_on(pass);
        }
    }

    fn turn_off(&mut self, pass: &mut ControlPass<'_>) {
        for child in &mut self.children {
            child.turn_off(pass);
        }
    }

    fn is_active(&self, pass: &ControlPass<'_>) -> bool {
        self.children.iter().any(|child| child.is_active(pass))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ThermostatConfig,
        controller::{CycleGuard, Strategy},
        device::SwitchDevice,
        entity::{EngineAction, MemoryStates, STATE_ON},
        managers::{EnvironmentManager, OpeningManager},
    };
    use chrono::TimeZone;

    fn multi() -> MultiHvacDevice {
        MultiHvacDevice::new(vec![
            HvacDevice::Switch(SwitchDevice::new(
                Strategy::Heating,
                vec!["switch.heater".into()],
                CycleGuard::default(),
            )),
            HvacDevice::Switch(SwitchDevice::new(
                Strategy::Drying,
                vec!["switch.dryer".into()],
                CycleGuard::default(),
            )),
        ])
    }

    #[test]
    fn routes_mode_to_supporting_child() {
        let mut device = multi();
        assert_eq!(
            device.hvac_modes(),
            vec![HvacMode::Off, HvacMode::Heat, HvacMode::Dry]
        );

        device.set_hvac_mode(HvacMode::Dry);
        assert_eq!(device.children()[0].hvac_mode(), HvacMode::Off);
        assert_eq!(device.children()[1].hvac_mode(), HvacMode::Dry);

        device.set_hvac_mode(HvacMode::Cool);
        assert_eq!(device.hvac_mode(), HvacMode::Off);
    }

    #[test]
    fn idle_children_are_driven_off() {
        let mut device = multi();
        device.set_hvac_mode(HvacMode::Dry);
        let env = EnvironmentManager::new(&ThermostatConfig::default());
        let openings = OpeningManager::default();
        let ctx = DeviceContext {
            environment: &env,
            openings: &openings,
            hvac_mode: HvacMode::Dry,
        };
        let mut states = MemoryStates::new();
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        states.set(&"switch.heater".into(), STATE_ON, now);

        let mut pass = ControlPass::new(&states, now);
        device.control(&ctx, &mut pass, None, false);
        assert_eq!(
            pass.into_actions(),
            vec![EngineAction::TurnOff("switch.heater".into())]
        );
    }
}
