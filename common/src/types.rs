use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{error::CommandError, reason::HvacActionReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacMode {
    Off,
    Heat,
    Cool,
    HeatCool,
    Dry,
    FanOnly,
}

impl HvacMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Heat => "heat",
            Self::Cool => "cool",
            Self::HeatCool => "heat_cool",
            Self::Dry => "dry",
            Self::FanOnly => "fan_only",
        }
    }
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HvacMode {
    type Err = CommandError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "heat" => Ok(Self::Heat),
            "cool" => Ok(Self::Cool),
            "heat_cool" => Ok(Self::HeatCool),
            "dry" => Ok(Self::Dry),
            "fan_only" => Ok(Self::FanOnly),
            other => Err(CommandError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacAction {
    Off,
    Idle,
    Heating,
    Cooling,
    Drying,
    Fan,
}

impl HvacAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Idle => "idle",
            Self::Heating => "heating",
            Self::Cooling => "cooling",
            Self::Drying => "drying",
            Self::Fan => "fan",
        }
    }
}

/// Environment attribute a device is driving towards its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetAttr {
    Temperature,
    TemperatureLow,
    TemperatureHigh,
    Humidity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Temperature,
    FloorTemperature,
    OutsideTemperature,
    Humidity,
}

/// Capability bitmask exposed to the user-facing surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct ClimateFeatures(u32);

impl ClimateFeatures {
    pub const TARGET_TEMPERATURE: Self = Self(1);
    pub const TARGET_TEMPERATURE_RANGE: Self = Self(2);
    pub const TARGET_HUMIDITY: Self = Self(4);
    pub const PRESET_MODE: Self = Self(16);
    pub const TURN_OFF: Self = Self(128);
    pub const TURN_ON: Self = Self(256);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for ClimateFeatures {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThermostatAttributes {
    pub name: String,
    #[serde(rename = "currentTemperature")]
    pub current_temperature: Option<f64>,
    #[serde(rename = "currentFloorTemperature")]
    pub current_floor_temperature: Option<f64>,
    #[serde(rename = "outsideTemperature")]
    pub outside_temperature: Option<f64>,
    #[serde(rename = "currentHumidity")]
    pub current_humidity: Option<f64>,
    #[serde(rename = "targetTemperature")]
    pub target_temperature: Option<f64>,
    #[serde(rename = "targetTemperatureLow")]
    pub target_temperature_low: Option<f64>,
    #[serde(rename = "targetTemperatureHigh")]
    pub target_temperature_high: Option<f64>,
    #[serde(rename = "targetHumidity")]
    pub target_humidity: Option<f64>,
    #[serde(rename = "hvacMode")]
    pub hvac_mode: HvacMode,
    #[serde(rename = "hvacModes")]
    pub hvac_modes: Vec<HvacMode>,
    #[serde(rename = "hvacAction")]
    pub hvac_action: HvacAction,
    #[serde(rename = "hvacActionReason")]
    pub hvac_action_reason: HvacActionReason,
    #[serde(rename = "presetMode")]
    pub preset_mode: String,
    #[serde(rename = "presetModes")]
    pub preset_modes: Vec<String>,
    #[serde(rename = "supportedFeatures")]
    pub supported_features: ClimateFeatures,
    #[serde(rename = "minTemp")]
    pub min_temp: f64,
    #[serde(rename = "maxTemp")]
    pub max_temp: f64,
    #[serde(rename = "targetTempStep")]
    pub target_temp_step: f64,
    #[serde(rename = "hvacPowerLevel")]
    pub hvac_power_level: u8,
    #[serde(rename = "hvacPowerPercent")]
    pub hvac_power_percent: u8,
}
