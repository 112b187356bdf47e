use tracing::debug;

use crate::{
    config::ThermostatConfig,
    managers::environment::EnvironmentManager,
    types::{ClimateFeatures, HvacMode},
};

/// Capabilities derived from configuration and the live HVAC mode.
#[derive(Debug, Clone)]
pub struct FeatureManager {
    heat_cool_configured: bool,
    has_dryer: bool,
    range_capable: bool,
    supported: ClimateFeatures,
}

impl FeatureManager {
    pub fn new(config: &ThermostatConfig) -> Self {
        Self {
            heat_cool_configured: config
                .heat_cool_mode
                .unwrap_or(!config.cooler.is_empty() || config.heat_cool_requested()),
            has_dryer: !config.dryer.is_empty(),
            range_capable: false,
            supported: ClimateFeatures::TARGET_TEMPERATURE,
        }
    }

    pub fn supported_features(&self) -> ClimateFeatures {
        self.supported
    }

    pub fn is_range_mode(&self) -> bool {
        self.supported
            .contains(ClimateFeatures::TARGET_TEMPERATURE_RANGE)
    }

    pub fn is_single_setpoint_mode(&self) -> bool {
        self.supported
            .contains(ClimateFeatures::TARGET_TEMPERATURE)
    }

    /// Recomputes the capability bitmask for `current`. Targets are left
    /// alone, see [`FeatureManager::carry_range_bound`].
    pub fn set_support_flags(
        &mut self,
        has_presets: bool,
        presets_range: bool,
        hvac_modes: &[HvacMode],
        current: HvacMode,
    ) {
        self.range_capable = hvac_modes.contains(&HvacMode::HeatCool)
            && (self.heat_cool_configured || presets_range);

        let mut features = if self.range_capable && !is_single_mode(current) {
            ClimateFeatures::TARGET_TEMPERATURE_RANGE
        } else {
            ClimateFeatures::TARGET_TEMPERATURE
        };

        if self.has_dryer {
            features.insert(ClimateFeatures::TARGET_HUMIDITY);
        }
        if has_presets {
            features.insert(ClimateFeatures::PRESET_MODE);
        }
        features.insert(ClimateFeatures::TURN_OFF | ClimateFeatures::TURN_ON);

        if features != self.supported {
            debug!(bits = features.bits(), mode = %current, "supported features changed");
        }
        self.supported = features;
    }

    /// On a transition into HEAT/COOL/FAN_ONLY of a range-capable thermostat,
    /// the single target takes over the matching range bound.
    pub fn carry_range_bound(&self, current: HvacMode, environment: &mut EnvironmentManager) {
        if !self.range_capable || !is_single_mode(current) {
            return;
        }
        let bound = match current {
            HvacMode::Heat => environment.target_temp_low(),
            _ => environment.target_temp_high(),
        };
        if let Some(bound) = bound {
            debug!(bound, mode = %current, "single target follows range bound");
            environment.set_target_temp(bound);
        }
    }
}

fn is_single_mode(mode: HvacMode) -> bool {
    matches!(mode, HvacMode::Heat | HvacMode::Cool | HvacMode::FanOnly)
}
