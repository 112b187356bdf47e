use crate::{config::ThermostatConfig, error::ConfigError, types::HvacAction};

/// Coarse power level derived from how far the environment is from target.
/// Informational only.
#[derive(Debug, Clone)]
pub struct HvacPowerManager {
    levels: u8,
    min: u8,
    max: u8,
    tolerance: Option<f64>,
    level: u8,
    percent: u8,
}

impl HvacPowerManager {
    pub fn new(config: &ThermostatConfig) -> Result<Self, ConfigError> {
        let levels = config.hvac_power_levels;
        if levels == 0 {
            return Err(ConfigError::NoPowerLevels);
        }
        let min = config.hvac_power_min.unwrap_or(1);
        let max = config.hvac_power_max.unwrap_or(levels);
        if min > max {
            return Err(ConfigError::PowerMinAboveMax { min, max });
        }
        if min > levels {
            return Err(ConfigError::PowerMinAboveLevels { min, levels });
        }
        if max > levels {
            return Err(ConfigError::PowerMaxAboveLevels { max, levels });
        }
        Ok(Self {
            levels,
            min,
            max,
            tolerance: config.hvac_power_tolerance,
            level: 0,
            percent: 0,
        })
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// `deviation` is the distance still to cover towards the target.
    pub fn update(&mut self, action: HvacAction, deviation: Option<f64>) {
        self.level = match (action, deviation) {
            (HvacAction::Off | HvacAction::Idle, _) | (_, None) => 0,
            (_, Some(deviation)) => match self.tolerance {
                Some(tolerance) if tolerance > 0.0 => {
                    let ratio = (deviation.abs() / tolerance).min(1.0);
                    let span = f64::from(self.max - self.min);
                    self.min + (span * ratio).round() as u8
                }
                _ => self.max,
            },
        };
        self.percent = (f64::from(self.level) / f64::from(self.levels) * 100.0).round() as u8;
    }
}
