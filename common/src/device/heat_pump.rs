use chrono::{DateTime, Utc};
use tracing::info;

use crate::{
    controller::{CycleGuard, HvacController, Strategy},
    device::{action_for, latch_ready, Controllable, DeviceContext, EnvironmentTracker, SwitchOutput},
    entity::{ControlPass, EntityId, EntityState},
    reason::HvacActionReason,
    types::{HvacAction, HvacMode, TargetAttr},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeatPumpRole {
    #[default]
    Heating,
    Cooling,
}

impl HeatPumpRole {
    /// Unknown or unavailable signal means heating.
    pub fn from_state(state: Option<&EntityState>) -> Self {
        match state {
            Some(state) if !state.is_unavailable() && state.is_active() => Self::Cooling,
            _ => Self::Heating,
        }
    }

    pub fn strategy(self) -> Strategy {
        match self {
            Self::Heating => Strategy::Heating,
            Self::Cooling => Strategy::Cooling,
        }
    }
}

/// A single switch whose role follows an external "is cooling" signal.
#[derive(Debug, Clone)]
pub struct HeatPumpDevice {
    output: SwitchOutput,
    guard: CycleGuard,
    role: HeatPumpRole,
    range_supported: bool,
    hvac_mode: HvacMode,
    ready: bool,
}

impl HeatPumpDevice {
    pub fn new(entities: Vec<EntityId>, guard: CycleGuard, range_supported: bool) -> Self {
        Self {
            output: SwitchOutput::new(entities),
            guard,
            role: HeatPumpRole::Heating,
            range_supported,
            hvac_mode: HvacMode::Off,
            ready: false,
        }
    }

    pub fn role(&self) -> HeatPumpRole {
        self.role
    }

    pub fn entities(&self) -> &[EntityId] {
        self.output.entities()
    }

    fn controller(&self) -> HvacController {
        HvacController::new(self.role.strategy(), self.guard)
    }

    pub fn hvac_modes(&self) -> Vec<HvacMode> {
        let mut modes = vec![HvacMode::Off, self.role.strategy().hvac_mode()];
        if self.range_supported {
            modes.push(HvacMode::HeatCool);
        }
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
    }

    /// Swaps the role and moves a now-invalid single mode to its complement.
    pub fn update_role(&mut self, role: HeatPumpRole) {
        if role == self.role {
            return;
        }
        info!(?role, "heat pump role changed");
        self.role = role;
        self.hvac_mode = match (self.hvac_mode, role) {
            (HvacMode::Heat, HeatPumpRole::Cooling) => HvacMode::Cool,
            (HvacMode::Cool, HeatPumpRole::Heating) => HvacMode::Heat,
            (mode, _) => mode,
        };
    }

    pub fn control(
        &mut self,
        ctx: &DeviceContext<'_>,
        pass: &mut ControlPass<'_>,
        time: Option<DateTime<Utc>>,
        force: bool,
    ) -> Option<HvacActionReason> {
        let attr = self.target_attr();
        latch_ready(&mut self.ready, ctx.environment, attr);
        let controller = self.controller();
        if !controller.guard.needs_control(
            self.ready,
            self.hvac_mode,
            self.output.entities(),
            pass,
            time,
            force,
        ) {
            return None;
        }
        controller.control(&mut self.output, ctx, attr, pass, time)
    }

    pub fn hvac_action(&self, pass: &ControlPass<'_>) -> HvacAction {
        action_for(
            self.hvac_mode,
            self.output.is_active(pass),
            self.role.strategy().hvac_action(),
        )
    }
}

impl EnvironmentTracker for HeatPumpDevice {
    fn target_attr(&self) -> TargetAttr {
        match (self.hvac_mode, self.role) {
            (HvacMode::HeatCool, HeatPumpRole::Heating) => TargetAttr::TemperatureLow,
            (HvacMode::HeatCool, HeatPumpRole::Cooling) => TargetAttr::TemperatureHigh,
            _ => TargetAttr::Temperature,
        }
    }
}

impl Controllable for HeatPumpDevice {
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
