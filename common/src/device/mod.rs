//! Device tree: leaf switch devices and the composites built on top of them.
//!
//! Every variant exposes the same `control` entry point. Composites own their
//! children outright and decide which one gets to act in a given pass.

pub mod cooler_fan;
pub mod factory;
pub mod heat_pump;
pub mod heater_aux;
pub mod heater_cooler;
pub mod multi;
pub mod switch;

use chrono::{DateTime, Utc};

use crate::{
    entity::{ControlPass, EntityId},
    managers::{EnvironmentManager, OpeningManager},
    reason::HvacActionReason,
    types::{HvacAction, HvacMode, TargetAttr},
};

pub use cooler_fan::CoolerFanDevice;
pub use factory::build_device;
pub use heat_pump::{HeatPumpDevice, HeatPumpRole};
pub use heater_aux::HeaterAuxDevice;
pub use heater_cooler::HeaterCoolerDevice;
pub use multi::MultiHvacDevice;
pub use switch::{SwitchDevice, SwitchOutput};

pub trait Controllable {
    fn turn_on(&mut self, pass: &mut ControlPass<'_>);
    fn turn_off(&mut self, pass: &mut ControlPass<'_>);
    fn is_active(&self, pass: &ControlPass<'_>) -> bool;
}

pub trait EnvironmentTracker {
    fn target_attr(&self) -> TargetAttr;
}

/// Read-only manager state a control pass evaluates against.
#[derive(Clone, Copy)]
pub struct DeviceContext<'a> {
    pub environment: &'a EnvironmentManager,
    pub openings: &'a OpeningManager,
    /// Thermostat-level mode, used for the opening scope.
    pub hvac_mode: HvacMode,
}

#[derive(Debug, Clone)]
pub enum HvacDevice {
    Switch(SwitchDevice),
    HeaterCooler(HeaterCoolerDevice),
    CoolerFan(CoolerFanDevice),
    HeaterAux(HeaterAuxDevice),
    HeatPump(HeatPumpDevice),
    Multi(MultiHvacDevice),
}

impl HvacDevice {
    pub fn hvac_modes(&self) -> Vec<HvacMode> {
        match self {
            Self::Switch(device) => device.hvac_modes(),
            Self::HeaterCooler(device) => device.hvac_modes(),
            Self::CoolerFan(device) => device.hvac_modes(),
            Self::HeaterAux(device) => device.hvac_modes(),
            Self::HeatPump(device) => device.hvac_modes(),
            Self::Multi(device) => device.hvac_modes(),
        }
    }

    pub fn supports(&self, mode: HvacMode) -> bool {
        self.hvac_modes().contains(&mode)
    }

    pub fn hvac_mode(&self) -> HvacMode {
        match self {
            Self::Switch(device) => device.hvac_mode(),
            Self::HeaterCooler(device) => device.hvac_mode(),
            Self::CoolerFan(device) => device.hvac_mode(),
            Self::HeaterAux(device) => device.hvac_mode(),
            Self::HeatPump(device) => device.hvac_mode(),
            Self::Multi(device) => device.hvac_mode(),
        }
    }

    /// Unsupported modes are coerced to OFF.
    pub fn set_hvac_mode(&mut self, mode: HvacMode) {
        match self {
            Self::Switch(device) => device.set_hvac_mode(mode),
            Self::HeaterCooler(device) => device.set_hvac_mode(mode),
            Self::CoolerFan(device) => device.set_hvac_mode(mode),
            Self::HeaterAux(device) => device.set_hvac_mode(mode),
            Self::HeatPump(device) => device.set_hvac_mode(mode),
            Self::Multi(device) => device.set_hvac_mode(mode),
        }
    }

    pub fn set_target_attr(&mut self, attr: TargetAttr) {
        match self {
            Self::Switch(device) => device.set_target_attr(attr),
            Self::CoolerFan(device) => device.set_target_attr(attr),
            Self::HeaterAux(device) => device.set_target_attr(attr),
            Self::HeatPump(_) | Self::HeaterCooler(_) | Self::Multi(_) => {}
        }
    }

    pub fn control(
        &mut self,
        ctx: &DeviceContext<'_>,
        pass: &mut ControlPass<'_>,
        time: Option<DateTime<Utc>>,
        force: bool,
    ) -> Option<HvacActionReason> {
        match self {
            Self::Switch(device) => device.control(ctx, pass, time, force),
            Self::HeaterCooler(device) => device.control(ctx, pass, time, force),
            Self::CoolerFan(device) => device.control(ctx, pass, time, force),
            Self::HeaterAux(device) => device.control(ctx, pass, time, force),
            Self::HeatPump(device) => device.control(ctx, pass, time, force),
            Self::Multi(device) => device.control(ctx, pass, time, force),
        }
    }

    pub fn hvac_action(&self, pass: &ControlPass<'_>) -> HvacAction {
        match self {
            Self::Switch(device) => device.hvac_action(pass),
            Self::HeaterCooler(device) => device.hvac_action(pass),
            Self::CoolerFan(device) => device.hvac_action(pass),
            Self::HeaterAux(device) => device.hvac_action(pass),
            Self::HeatPump(device) => device.hvac_action(pass),
            Self::Multi(device) => device.hvac_action(pass),
        }
    }

    pub fn entities(&self) -> Vec<EntityId> {
        match self {
            Self::Switch(device) => device.entities().to_vec(),
            Self::HeaterCooler(device) => device.entities(),
            Self::CoolerFan(device) => device.entities(),
            Self::HeaterAux(device) => device.entities(),
            Self::HeatPump(device) => device.entities().to_vec(),
            Self::Multi(device) => device.entities(),
        }
    }

    /// Propagates a heat pump role change. Returns true when a heat pump
    /// exists somewhere in the tree.
    pub fn set_heat_pump_role(&mut self, role: HeatPumpRole) -> bool {
        match self {
            Self::HeatPump(device) => {
                device.update_role(role);
                true
            }
            Self::Multi(device) => device.set_heat_pump_role(role),
            _ => false,
        }
    }
}

impl Controllable for HvacDevice {
    fn turn_on(&mut self, pass: &mut ControlPass<'_>) {
        match self {
            Self::Switch(device) => device.turn_on(pass),
            Self::HeaterCooler(device) => device.turn_on(pass),
            Self::CoolerFan(device) => device.turn_on(pass),
            Self::HeaterAux(device) => device.turn_on(pass),
            Self::HeatPump(device) => device.turn_on(pass),
            Self::Multi(device) => device.turn_on(pass),
        }
    }

    fn turn_off(&mut self, pass: &mut ControlPass<'_>) {
        match self {
            Self::Switch(device) => device.turn_off(pass),
            Self::HeaterCooler(device) => device.turn_off(pass),
            Self::CoolerFan(device) => device.turn_off(pass),
            Self::HeaterAux(device) => device.turn_off(pass),
            Self::HeatPump(device) => device.turn_off(pass),
            Self::Multi(device) => device.turn_off(pass),
        }
    }

    fn is_active(&self, pass: &ControlPass<'_>) -> bool {
        match self {
            Self::Switch(device) => device.is_active(pass),
            Self::HeaterCooler(device) => device.is_active(pass),
            Self::CoolerFan(device) => device.is_active(pass),
            Self::HeaterAux(device) => device.is_active(pass),
            Self::HeatPump(device) => device.is_active(pass),
            Self::Multi(device) => device.is_active(pass),
        }
    }
}

/// Readiness latch: set the first time both a reading and a target exist.
pub(crate) fn latch_ready(ready: &mut bool, env: &EnvironmentManager, attr: TargetAttr) {
    if !*ready {
        *ready = env.current_for(attr).is_some() && env.target_for(attr).is_some();
    }
}

/// Action of a device whose output is `active` under `mode`.
pub(crate) fn action_for(mode: HvacMode, active: bool, running: HvacAction) -> HvacAction {
    if mode == HvacMode::Off {
        HvacAction::Off
    } else if active {
        running
    } else {
        HvacAction::Idle
    }
}
