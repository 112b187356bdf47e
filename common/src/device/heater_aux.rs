use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::info;

use crate::{
    controller::{CycleGuard, Strategy},
    device::{Controllable, DeviceContext, EnvironmentTracker, SwitchDevice},
    entity::{CallbackKind, ControlPass, EntityId},
    reason::HvacActionReason,
    types::{HvacAction, HvacMode, TargetAttr},
};

/// Two-stage heating. The auxiliary stage engages once the primary has run
/// for `timeout` without reaching target, at most once per local calendar day.
#[derive(Debug, Clone)]
pub struct HeaterAuxDevice {
    primary: SwitchDevice,
    aux: SwitchDevice,
    timeout: Duration,
    dual_mode: bool,
    last_run: Option<NaiveDate>,
    tz: Tz,
}

impl HeaterAuxDevice {
    pub fn new(
        primary: Vec<EntityId>,
        aux: Vec<EntityId>,
        timeout: Duration,
        dual_mode: bool,
        tz: Tz,
        guard: CycleGuard,
    ) -> Self {
        Self {
            primary: SwitchDevice::new(Strategy::Heating, primary, guard),
            aux: SwitchDevice::new(Strategy::Heating, aux, guard),
            timeout,
            dual_mode,
            last_run: None,
            tz,
        }
    }

    pub fn entities(&self) -> Vec<EntityId> {
        self.primary
            .entities()
            .iter()
            .chain(self.aux.entities())
            .cloned()
            .collect()
    }

    pub fn last_run(&self) -> Option<NaiveDate> {
        self.last_run
    }

    pub fn hvac_modes(&self) -> Vec<HvacMode> {
        self.primary.hvac_modes()
    }

    pub fn hvac_mode(&self) -> HvacMode {
        self.primary.hvac_mode()
    }

    pub fn set_hvac_mode(&mut self, mode: HvacMode) {
        self.primary.set_hvac_mode(mode);
        self.aux.set_hvac_mode(mode);
    }

    pub fn set_target_attr(&mut self, attr: TargetAttr) {
        self.primary.set_target_attr(attr);
        self.aux.set_target_attr(attr);
    }

    fn ran_today(&self, now: DateTime<Utc>) -> bool {
        self.last_run == Some(now.with_timezone(&self.tz).date_naive())
    }

    pub fn control(
        &mut self,
        ctx: &DeviceContext<'_>,
        pass: &mut ControlPass<'_>,
        time: Option<DateTime<Utc>>,
        force: bool,
    ) -> Option<HvacActionReason> {
        if self.hvac_mode() == HvacMode::Off {
            self.turn_off(pass);
            return None;
        }

        if self.aux.is_active(pass) {
            let reason = self.aux.control(ctx, pass, time, force);
            if !self.aux.is_active(pass) {
                self.primary.turn_off(pass);
            } else if self.dual_mode {
                self.primary.turn_on(pass);
            }
            return reason;
        }

        let reason = self.primary.control(ctx, pass, time, force);
        let primary = self.primary.entities().to_vec();

        if !self.primary.is_active(pass) {
            if primary.iter().any(|e| pass.commanded(e) == Some(false)) {
                pass.cancel(CallbackKind::AuxHeaterTimeout);
            }
            return reason;
        }
        if primary.iter().any(|e| pass.commanded(e) == Some(true)) {
            pass.schedule(CallbackKind::AuxHeaterTimeout, self.timeout);
            return reason;
        }

        let held = primary
            .iter()
            .any(|e| pass.held_for(e, true, self.timeout));
        if held && !self.ran_today(pass.now()) {
            info!(timeout = ?self.timeout, dual = self.dual_mode, "engaging auxiliary heat");
            self.aux.turn_on(pass);
            if !self.dual_mode {
                self.primary.turn_off(pass);
            }
            self.last_run = Some(pass.now().with_timezone(&self.tz).date_naive());
            return Some(HvacActionReason::AuxHeating);
        }
        reason
    }

    pub fn hvac_action(&self, pass: &ControlPass<'_>) -> HvacAction {
        if self.hvac_mode() == HvacMode::Off {
            HvacAction::Off
        } else if self.is_active(pass) {
            HvacAction::Heating
        } else {
            HvacAction::Idle
        }
    }
}

impl EnvironmentTracker for HeaterAuxDevice {
    fn target_attr(&self) -> TargetAttr {
        self.primary.target_attr()
    }
}

impl Controllable for HeaterAuxDevice {
    fn turn_on(&mut self, pass: &mut ControlPass<'_>) {
        let was_active = self.primary.is_active(pass);
        self.primary.turn_on(pass);
        if !was_active {
            pass.schedule(CallbackKind::AuxHeaterTimeout, self.timeout);
        }
    }

    fn turn_off(&mut self, pass: &mut ControlPass<'_>) {
        let was_active = self.is_active(pass);
        self.primary.turn_off(pass);
        self.aux.turn_off(pass);
        if was_active {
            pass.cancel(CallbackKind::AuxHeaterTimeout);
        }
    }

    fn is_active(&self, pass: &ControlPass<'_>) -> bool {
        self.primary.is_active(pass) || self.aux.is_active(pass)
    }
}
