use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    device::{Controllable, DeviceContext, EnvironmentTracker, SwitchDevice},
    entity::{ControlPass, EntityId},
    reason::HvacActionReason,
    types::{HvacAction, HvacMode, TargetAttr},
};

/// Cooler with a fan used as a cheaper first stage.
#[derive(Debug, Clone)]
pub struct CoolerFanDevice {
    cooler: SwitchDevice,
    fan: SwitchDevice,
    fan_on_with_ac: bool,
    hvac_mode: HvacMode,
}

impl CoolerFanDevice {
    pub fn new(cooler: SwitchDevice, fan: SwitchDevice, fan_on_with_ac: bool) -> Self {
        Self {
            cooler,
            fan,
            fan_on_with_ac,
            hvac_mode: HvacMode::Off,
        }
    }

    pub fn entities(&self) -> Vec<EntityId> {
        self.cooler
            .entities()
            .iter()
            .chain(self.fan.entities())
            .cloned()
            .collect()
    }

    pub fn hvac_modes(&self) -> Vec<HvacMode> {
        vec![HvacMode::Off, HvacMode::Cool, HvacMode::FanOnly]
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
        match self.hvac_mode {
            HvacMode::Cool => {
                self.cooler.set_hvac_mode(HvacMode::Cool);
                self.fan.set_hvac_mode(HvacMode::FanOnly);
            }
            HvacMode::FanOnly => {
                self.cooler.set_hvac_mode(HvacMode::Off);
                self.fan.set_hvac_mode(HvacMode::FanOnly);
            }
            _ => {
                self.cooler.set_hvac_mode(HvacMode::Off);
                self.fan.set_hvac_mode(HvacMode::Off);
            }
        }
    }

    pub fn set_target_attr(&mut self, attr: TargetAttr) {
        self.cooler.set_target_attr(attr);
        self.fan.set_target_attr(attr);
    }

    pub fn control(
        &mut self,
        ctx: &DeviceContext<'_>,
        pass: &mut ControlPass<'_>,
        time: Option<DateTime<Utc>>,
        force: bool,
    ) -> Option<HvacActionReason> {
        match self.hvac_mode {
            HvacMode::Cool => self.control_cool(ctx, pass, time, force),
            HvacMode::FanOnly => {
                self.cooler.turn_off(pass);
                self.fan.control(ctx, pass, time, force)
            }
            _ => {
                self.turn_off(pass);
                None
            }
        }
    }

    fn control_cool(
        &mut self,
        ctx: &DeviceContext<'_>,
        pass: &mut ControlPass<'_>,
        time: Option<DateTime<Utc>>,
        force: bool,
    ) -> Option<HvacActionReason> {
        let env = ctx.environment;
        let attr = self.cooler.target_attr();
        let opening = ctx.openings.any_opening_open(ctx.hvac_mode, pass);

        if !opening && env.is_within_fan_tolerance(attr) && env.fan_air_usable() {
            if self.cooler.is_active(pass) && !self.cooler.needs_control(ctx, pass, time, force) {
                debug!("cooler inside minimum cycle, fan stage deferred");
                return None;
            }
            debug!("temperature within fan band, using fan");
            self.cooler.turn_off(pass);
            if self.fan.is_active(pass) || self.fan.needs_control(ctx, pass, time, force) {
                self.fan.turn_on(pass);
            }
            return Some(HvacActionReason::TargetTempNotReachedWithFan);
        }

        let reason = self.cooler.control(ctx, pass, time, force);
        if self.fan_on_with_ac && self.cooler.is_active(pass) {
            self.fan.turn_on(pass);
        } else {
            self.fan.turn_off(pass);
        }
        reason
    }

    pub fn hvac_action(&self, pass: &ControlPass<'_>) -> HvacAction {
        if self.hvac_mode == HvacMode::Off {
            HvacAction::Off
        } else if self.cooler.is_active(pass) {
            HvacAction::Cooling
        } else if self.fan.is_active(pass) {
            HvacAction::Fan
        } else {
            HvacAction::Idle
        }
    }
}

impl EnvironmentTracker for CoolerFanDevice {
    fn target_attr(&self) -> TargetAttr {
        self.cooler.target_attr()
    }
}

impl Controllable for CoolerFanDevice {
    fn turn_on(&mut self, pass: &mut ControlPass<'_>) {
        if self.hvac_mode == HvacMode::FanOnly {
            self.fan.turn_on(pass);
            return;
        }
        self.cooler.turn_on(pass);
        if self.fan_on_with_ac {
            self.fan.turn_on(pass);
        }
    }

    fn turn_off(&mut self, pass: &mut ControlPass<'_>) {
        self.cooler.turn_off(pass);
        self.fan.turn_off(pass);
    }

    fn is_active(&self, pass: &ControlPass<'_>) -> bool {
        self.cooler.is_active(pass) || self.fan.is_active(pass)
    }
}
