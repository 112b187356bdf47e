use std::{collections::BTreeMap, time::Duration};

use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    entity::EntityId,
    error::ConfigError,
    managers::environment::TargetSnapshot,
    reason::HvacActionReason,
    types::{HvacMode, SensorKind},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermostatConfig {
    pub name: String,

    #[serde(deserialize_with = "one_or_many")]
    pub heater: Vec<EntityId>,
    #[serde(deserialize_with = "one_or_many")]
    pub cooler: Vec<EntityId>,
    #[serde(deserialize_with = "one_or_many")]
    pub fan: Vec<EntityId>,
    #[serde(deserialize_with = "one_or_many")]
    pub dryer: Vec<EntityId>,
    #[serde(deserialize_with = "one_or_many")]
    pub aux_heater: Vec<EntityId>,
    pub aux_heater_timeout_ms: Option<u64>,
    pub aux_heater_dual_mode: bool,
    pub heat_pump_cooling: Option<EntityId>,

    pub ac_mode: bool,
    pub fan_mode: bool,
    pub heat_cool_mode: Option<bool>,
    pub fan_on_with_ac: bool,
    pub fan_hot_tolerance: Option<f64>,
    pub fan_air_outside: bool,

    pub target_sensor: EntityId,
    pub floor_sensor: Option<EntityId>,
    pub outside_sensor: Option<EntityId>,
    pub humidity_sensor: Option<EntityId>,

    pub min_temp: f64,
    pub max_temp: f64,
    pub min_floor_temp: Option<f64>,
    pub max_floor_temp: Option<f64>,
    pub min_humidity: f64,
    pub max_humidity: f64,

    pub target_temp: Option<f64>,
    pub target_temp_low: Option<f64>,
    pub target_temp_high: Option<f64>,
    pub target_humidity: Option<f64>,

    pub cold_tolerance: f64,
    pub hot_tolerance: f64,
    pub heat_tolerance: Option<f64>,
    pub cool_tolerance: Option<f64>,
    pub dry_tolerance: f64,
    pub moist_tolerance: f64,

    pub min_cycle_duration_ms: Option<u64>,
    pub keep_alive_ms: Option<u64>,
    pub sensor_stale_duration_ms: Option<u64>,

    pub initial_hvac_mode: Option<HvacMode>,
    pub precision: f64,
    pub target_temp_step: Option<f64>,
    pub timezone: String,

    pub openings: Vec<OpeningConfig>,
    pub openings_scope: Option<OpeningScopeConfig>,

    pub presets: BTreeMap<String, PresetConfig>,

    pub hvac_power_levels: u8,
    pub hvac_power_min: Option<u8>,
    pub hvac_power_max: Option<u8>,
    pub hvac_power_tolerance: Option<f64>,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            name: "thermostat".to_string(),
            heater: Vec::new(),
            cooler: Vec::new(),
            fan: Vec::new(),
            dryer: Vec::new(),
            aux_heater: Vec::new(),
            aux_heater_timeout_ms: None,
            aux_heater_dual_mode: false,
            heat_pump_cooling: None,
            ac_mode: false,
            fan_mode: false,
            heat_cool_mode: None,
            fan_on_with_ac: false,
            fan_hot_tolerance: None,
            fan_air_outside: false,
            target_sensor: EntityId::default(),
            floor_sensor: None,
            outside_sensor: None,
            humidity_sensor: None,
            min_temp: 7.0,
            max_temp: 35.0,
            min_floor_temp: None,
            max_floor_temp: None,
            min_humidity: 30.0,
            max_humidity: 99.0,
            target_temp: None,
            target_temp_low: None,
            target_temp_high: None,
            target_humidity: None,
            cold_tolerance: 0.3,
            hot_tolerance: 0.3,
            heat_tolerance: None,
            cool_tolerance: None,
            dry_tolerance: 3.0,
            moist_tolerance: 3.0,
            min_cycle_duration_ms: None,
            keep_alive_ms: None,
            sensor_stale_duration_ms: None,
            initial_hvac_mode: None,
            precision: 0.1,
            target_temp_step: None,
            timezone: "UTC".to_string(),
            openings: Vec::new(),
            openings_scope: None,
            presets: BTreeMap::new(),
            hvac_power_levels: 5,
            hvac_power_min: None,
            hvac_power_max: None,
            hvac_power_tolerance: None,
        }
    }
}

impl ThermostatConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heater.is_empty() {
            return Err(ConfigError::MissingHeater);
        }
        if self.target_sensor.is_empty() {
            return Err(ConfigError::MissingTargetSensor);
        }
        if let Some(shared) = self.cooler.iter().find(|c| self.heater.contains(c)) {
            return Err(ConfigError::CoolerIsHeater(shared.clone()));
        }
        if self.min_temp > self.max_temp {
            return Err(ConfigError::InvalidTemperatureBounds {
                min: self.min_temp,
                max: self.max_temp,
            });
        }
        if let (Some(low), Some(high)) = (self.target_temp_low, self.target_temp_high) {
            if low > high {
                return Err(ConfigError::InvalidRange { low, high });
            }
        }
        if !self.aux_heater.is_empty() && self.aux_heater_timeout_ms.is_none() {
            return Err(ConfigError::MissingAuxTimeout);
        }
        self.tz()?;
        self.opening_scope()?;
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))
    }

    /// `None` means the opening interlock applies to every mode.
    pub fn opening_scope(&self) -> Result<Option<Vec<HvacMode>>, ConfigError> {
        match &self.openings_scope {
            None => Ok(None),
            Some(OpeningScopeConfig::Keyword(keyword)) if keyword.eq_ignore_ascii_case("all") => {
                Ok(None)
            }
            Some(OpeningScopeConfig::Keyword(keyword)) => {
                Err(ConfigError::InvalidOpeningScope(keyword.clone()))
            }
            Some(OpeningScopeConfig::Modes(modes)) if modes.is_empty() => Ok(None),
            Some(OpeningScopeConfig::Modes(modes)) => Ok(Some(modes.clone())),
        }
    }

    pub fn min_cycle_duration(&self) -> Option<Duration> {
        self.min_cycle_duration_ms.map(Duration::from_millis)
    }

    pub fn keep_alive(&self) -> Option<Duration> {
        self.keep_alive_ms.map(Duration::from_millis)
    }

    pub fn sensor_stale_duration(&self) -> Option<Duration> {
        self.sensor_stale_duration_ms.map(Duration::from_millis)
    }

    pub fn aux_heater_timeout(&self) -> Option<Duration> {
        self.aux_heater_timeout_ms.map(Duration::from_millis)
    }

    /// Which reading a sensor entity feeds, if it is one of ours.
    pub fn sensor_kind(&self, entity: &EntityId) -> Option<SensorKind> {
        if *entity == self.target_sensor {
            return Some(SensorKind::Temperature);
        }
        [
            (&self.floor_sensor, SensorKind::FloorTemperature),
            (&self.outside_sensor, SensorKind::OutsideTemperature),
            (&self.humidity_sensor, SensorKind::Humidity),
        ]
        .into_iter()
        .find_map(|(sensor, kind)| (sensor.as_ref() == Some(entity)).then_some(kind))
    }

    pub fn heat_cool_requested(&self) -> bool {
        self.heat_cool_mode.unwrap_or(false)
            || (self.target_temp_low.is_some() && self.target_temp_high.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpeningConfig {
    Entity(EntityId),
    Detailed {
        entity_id: EntityId,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        closing_timeout_ms: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpeningScopeConfig {
    Keyword(String),
    Modes(Vec<HvacMode>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetConfig {
    pub temperature: Option<PresetValue>,
    pub target_temp_low: Option<PresetValue>,
    pub target_temp_high: Option<PresetValue>,
    pub humidity: Option<PresetValue>,
    pub min_floor_temp: Option<PresetValue>,
    pub max_floor_temp: Option<PresetValue>,
}

impl PresetConfig {
    pub fn has_range(&self) -> bool {
        self.target_temp_low.is_some() || self.target_temp_high.is_some()
    }

    pub fn values(&self) -> impl Iterator<Item = &PresetValue> {
        [
            &self.temperature,
            &self.target_temp_low,
            &self.target_temp_high,
            &self.humidity,
            &self.min_floor_temp,
            &self.max_floor_temp,
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PresetValue {
    Literal(f64),
    Template {
        template: String,
        #[serde(default)]
        entities: Vec<EntityId>,
    },
}

/// Prior state handed back by the host on restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoredState {
    pub target_temp: Option<f64>,
    pub target_temp_low: Option<f64>,
    pub target_temp_high: Option<f64>,
    pub target_humidity: Option<f64>,
    pub hvac_mode: Option<HvacMode>,
    pub preset_mode: Option<String>,
    pub hvac_action_reason: Option<HvacActionReason>,
    pub min_floor_temp: Option<f64>,
    pub max_floor_temp: Option<f64>,
    pub saved_targets: Option<TargetSnapshot>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<EntityId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(EntityId),
        Many(Vec<EntityId>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(entity)) => vec![entity],
        Some(OneOrMany::Many(entities)) => entities,
    })
}
