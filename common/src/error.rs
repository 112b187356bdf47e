use thiserror::Error;

use crate::{entity::EntityId, types::HvacMode};

/// Configuration problems. Always fatal at setup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("at least one heater entity must be configured")]
    MissingHeater,
    #[error("target_sensor must be configured")]
    MissingTargetSensor,
    #[error("cooler entity {0} is also configured as the heater")]
    CoolerIsHeater(EntityId),
    #[error("heat/cool operation requires a cooler entity")]
    MissingCooler,
    #[error("aux_heater requires aux_heater_timeout_ms")]
    MissingAuxTimeout,
    #[error("hvac_power_levels must be at least 1")]
    NoPowerLevels,
    #[error("hvac_power_min ({min}) is greater than hvac_power_max ({max})")]
    PowerMinAboveMax { min: u8, max: u8 },
    #[error("hvac_power_min ({min}) is greater than hvac_power_levels ({levels})")]
    PowerMinAboveLevels { min: u8, levels: u8 },
    #[error("hvac_power_max ({max}) is greater than hvac_power_levels ({levels})")]
    PowerMaxAboveLevels { max: u8, levels: u8 },
    #[error("min_temp ({min}) is greater than max_temp ({max})")]
    InvalidTemperatureBounds { min: f64, max: f64 },
    #[error("target_temp_low ({low}) is greater than target_temp_high ({high})")]
    InvalidRange { low: f64, high: f64 },
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
    #[error("invalid openings scope '{0}'")]
    InvalidOpeningScope(String),
    #[error("initial_hvac_mode {0} is not supported by the configured devices")]
    UnsupportedInitialMode(HvacMode),
}

/// A sensor payload that could not be turned into a finite reading.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("sensor payload '{0}' is not numeric")]
    NotNumeric(String),
    #[error("sensor value {0} is not finite")]
    NotFinite(f64),
}

/// Rejected user or service input. The thermostat state is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown hvac mode '{0}'")]
    UnknownMode(String),
    #[error("hvac mode {0} is not supported by this thermostat")]
    UnsupportedMode(HvacMode),
    #[error("unknown preset '{0}'")]
    UnknownPreset(String),
    #[error("'{0}' is not an external hvac action reason")]
    UnknownActionReason(String),
    #[error("no setpoint applicable to the current hvac mode was provided")]
    MissingSetpoint,
}
