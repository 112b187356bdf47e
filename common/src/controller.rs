use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    device::{Controllable, DeviceContext},
    entity::{ControlPass, EntityId},
    managers::EnvironmentManager,
    reason::HvacActionReason,
    types::{HvacAction, HvacMode, TargetAttr},
};

/// What a device is trying to achieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Heating,
    Cooling,
    Fan,
    Drying,
}

impl Strategy {
    pub fn goal_not_reached(self, env: &EnvironmentManager, attr: TargetAttr) -> bool {
        match self {
            Self::Heating => env.is_too_cold(attr),
            Self::Cooling | Self::Fan => env.is_too_hot(attr),
            Self::Drying => env.is_too_moist(),
        }
    }

    /// Range bounds release as soon as they stop calling for action. The
    /// band between the bounds is the hysteresis in HEAT_COOL.
    pub fn goal_reached(self, env: &EnvironmentManager, attr: TargetAttr) -> bool {
        match (self, attr) {
            (Self::Heating, TargetAttr::TemperatureLow) => !env.is_too_cold(attr),
            (Self::Cooling | Self::Fan, TargetAttr::TemperatureHigh) => !env.is_too_hot(attr),
            (Self::Heating, _) => env.is_too_hot(attr),
            (Self::Cooling | Self::Fan, _) => env.is_too_cold(attr),
            (Self::Drying, _) => env.is_too_dry(),
        }
    }

    pub fn not_reached_reason(self) -> HvacActionReason {
        match self {
            Self::Drying => HvacActionReason::TargetHumidityNotReached,
            _ => HvacActionReason::TargetTempNotReached,
        }
    }

    pub fn reached_reason(self) -> HvacActionReason {
        match self {
            Self::Drying => HvacActionReason::TargetHumidityReached,
            _ => HvacActionReason::TargetTempReached,
        }
    }

    /// Floor limits only guard heating.
    pub fn uses_floor_limits(self) -> bool {
        self == Self::Heating
    }

    pub fn hvac_action(self) -> HvacAction {
        match self {
            Self::Heating => HvacAction::Heating,
            Self::Cooling => HvacAction::Cooling,
            Self::Fan => HvacAction::Fan,
            Self::Drying => HvacAction::Drying,
        }
    }

    pub fn hvac_mode(self) -> HvacMode {
        match self {
            Self::Heating => HvacMode::Heat,
            Self::Cooling => HvacMode::Cool,
            Self::Fan => HvacMode::FanOnly,
            Self::Drying => HvacMode::Dry,
        }
    }

    pub fn default_attr(self) -> TargetAttr {
        match self {
            Self::Drying => TargetAttr::Humidity,
            _ => TargetAttr::Temperature,
        }
    }
}

/// Minimum cycle debounce, derived from how long the entities have held
/// their current state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleGuard {
    pub min_cycle_duration: Option<Duration>,
}

impl CycleGuard {
    pub fn needs_control(
        &self,
        ready: bool,
        mode: HvacMode,
        entities: &[EntityId],
        pass: &ControlPass<'_>,
        time: Option<DateTime<Utc>>,
        force: bool,
    ) -> bool {
        if !ready || mode == HvacMode::Off {
            return false;
        }
        if force || time.is_some() {
            return true;
        }
        let Some(min_cycle) = self.min_cycle_duration else {
            return true;
        };
        let settled = entities
            .iter()
            .all(|entity| pass.held_for(entity, pass.is_active(entity), min_cycle));
        if !settled {
            debug!(?min_cycle, "minimum cycle duration not elapsed");
        }
        settled
    }
}

/// Hysteresis decision for one controllable target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HvacController {
    pub strategy: Strategy,
    pub guard: CycleGuard,
}

impl HvacController {
    pub fn new(strategy: Strategy, guard: CycleGuard) -> Self {
        Self { strategy, guard }
    }

    /// Runs one decision and returns the resulting reason, or `None` when
    /// nothing was decided.
    pub fn control<T: Controllable + ?Sized>(
        &self,
        target: &mut T,
        ctx: &DeviceContext<'_>,
        attr: TargetAttr,
        pass: &mut ControlPass<'_>,
        time: Option<DateTime<Utc>>,
    ) -> Option<HvacActionReason> {
        let opening = ctx.openings.any_opening_open(ctx.hvac_mode, pass);
        if target.is_active(pass) {
            self.control_when_active(target, ctx.environment, attr, opening, pass, time)
        } else {
            self.control_when_inactive(target, ctx.environment, attr, opening, pass, time)
        }
    }

    fn floor_flags(&self, env: &EnvironmentManager) -> (bool, bool) {
        if self.strategy.uses_floor_limits() {
            (env.is_floor_hot(), env.is_floor_cold())
        } else {
            (false, false)
        }
    }

    fn off_reason(&self, opening: bool, floor_hot: bool) -> HvacActionReason {
        if opening {
            HvacActionReason::Opening
        } else if floor_hot {
            HvacActionReason::Overheat
        } else {
            self.strategy.reached_reason()
        }
    }

    fn control_when_inactive<T: Controllable + ?Sized>(
        &self,
        target: &mut T,
        env: &EnvironmentManager,
        attr: TargetAttr,
        opening: bool,
        pass: &mut ControlPass<'_>,
        time: Option<DateTime<Utc>>,
    ) -> Option<HvacActionReason> {
        let (floor_hot, floor_cold) = self.floor_flags(env);
        let not_reached = self.strategy.goal_not_reached(env, attr);

        if floor_cold {
            target.turn_on(pass);
            return Some(HvacActionReason::Limit);
        }
        if not_reached && !opening && !floor_hot {
            target.turn_on(pass);
            return Some(self.strategy.not_reached_reason());
        }
        if time.is_some() || opening {
            target.turn_off(pass);
            return Some(self.off_reason(opening, floor_hot));
        }
        if floor_hot {
            return Some(HvacActionReason::Overheat);
        }
        self.strategy
            .goal_reached(env, attr)
            .then(|| self.strategy.reached_reason())
    }

    fn control_when_active<T: Controllable + ?Sized>(
        &self,
        target: &mut T,
        env: &EnvironmentManager,
        attr: TargetAttr,
        opening: bool,
        pass: &mut ControlPass<'_>,
        time: Option<DateTime<Utc>>,
    ) -> Option<HvacActionReason> {
        let (floor_hot, floor_cold) = self.floor_flags(env);
        let reached = self.strategy.goal_reached(env, attr);

        if (reached || opening || floor_hot) && !floor_cold {
            target.turn_off(pass);
            return Some(self.off_reason(opening, floor_hot));
        }
        if time.is_some() && !opening && !floor_hot {
            target.turn_on(pass);
        }
        if floor_cold {
            Some(HvacActionReason::Limit)
        } else {
            Some(self.strategy.not_reached_reason())
        }
    }
}
