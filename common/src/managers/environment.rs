use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::{RestoredState, ThermostatConfig},
    entity::{STATE_UNAVAILABLE, STATE_UNKNOWN},
    error::SensorError,
    types::{HvacMode, SensorKind, TargetAttr},
};

/// Raw sensor payload as delivered by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Number(f64),
    Text(String),
}

impl From<f64> for Reading {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for Reading {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl Reading {
    /// `Ok(None)` for an unavailable/unknown sensor.
    fn parse(&self) -> Result<Option<f64>, SensorError> {
        let value = match self {
            Self::Number(value) => *value,
            Self::Text(raw) => {
                let raw = raw.trim();
                if raw.is_empty() || raw == STATE_UNAVAILABLE || raw == STATE_UNKNOWN {
                    return Ok(None);
                }
                raw.parse::<f64>()
                    .map_err(|_| SensorError::NotNumeric(raw.to_string()))?
            }
        };
        if value.is_finite() {
            Ok(Some(value))
        } else {
            Err(SensorError::NotFinite(value))
        }
    }
}

/// Target values that presets save and restore as one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSnapshot {
    pub temperature: Option<f64>,
    pub temperature_low: Option<f64>,
    pub temperature_high: Option<f64>,
    pub humidity: Option<f64>,
    pub min_floor_temp: Option<f64>,
    pub max_floor_temp: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct EnvironmentManager {
    cur_temp: Option<f64>,
    cur_floor_temp: Option<f64>,
    cur_outside_temp: Option<f64>,
    cur_humidity: Option<f64>,

    target_temp: Option<f64>,
    target_temp_low: Option<f64>,
    target_temp_high: Option<f64>,
    target_humidity: Option<f64>,

    min_temp: f64,
    max_temp: f64,
    min_floor_temp: Option<f64>,
    max_floor_temp: Option<f64>,
    min_humidity: f64,
    max_humidity: f64,

    cold_tolerance: f64,
    hot_tolerance: f64,
    heat_tolerance: Option<f64>,
    cool_tolerance: Option<f64>,
    fan_hot_tolerance: Option<f64>,
    dry_tolerance: f64,
    moist_tolerance: f64,

    has_floor_sensor: bool,
    fan_air_outside: bool,
    precision: f64,
    target_temp_step: f64,
    hvac_mode: HvacMode,
}

impl EnvironmentManager {
    pub fn new(config: &ThermostatConfig) -> Self {
        Self {
            cur_temp: None,
            cur_floor_temp: None,
            cur_outside_temp: None,
            cur_humidity: None,
            target_temp: config.target_temp,
            target_temp_low: config.target_temp_low,
            target_temp_high: config.target_temp_high,
            target_humidity: config.target_humidity,
            min_temp: config.min_temp,
            max_temp: config.max_temp,
            min_floor_temp: config.min_floor_temp,
            max_floor_temp: config.max_floor_temp,
            min_humidity: config.min_humidity,
            max_humidity: config.max_humidity,
            cold_tolerance: config.cold_tolerance,
            hot_tolerance: config.hot_tolerance,
            heat_tolerance: config.heat_tolerance,
            cool_tolerance: config.cool_tolerance,
            fan_hot_tolerance: config.fan_hot_tolerance,
            dry_tolerance: config.dry_tolerance,
            moist_tolerance: config.moist_tolerance,
            has_floor_sensor: config.floor_sensor.is_some(),
            fan_air_outside: config.fan_air_outside,
            precision: config.precision,
            target_temp_step: config.target_temp_step.unwrap_or(config.precision),
            hvac_mode: config.initial_hvac_mode.unwrap_or(HvacMode::Off),
        }
    }

    /// Applies a sensor payload. A rejected payload keeps the last good value.
    pub fn update_current(
        &mut self,
        kind: SensorKind,
        reading: &Reading,
    ) -> Result<Option<f64>, SensorError> {
        let value = reading.parse()?;
        let slot = match kind {
            SensorKind::Temperature => &mut self.cur_temp,
            SensorKind::FloorTemperature => &mut self.cur_floor_temp,
            SensorKind::OutsideTemperature => &mut self.cur_outside_temp,
            SensorKind::Humidity => &mut self.cur_humidity,
        };
        *slot = value;
        debug!(?kind, ?value, "sensor updated");
        Ok(value)
    }

    pub fn set_hvac_mode(&mut self, mode: HvacMode) {
        self.hvac_mode = mode;
    }

    pub fn cur_temp(&self) -> Option<f64> {
        self.cur_temp
    }

    pub fn cur_floor_temp(&self) -> Option<f64> {
        self.cur_floor_temp
    }

    pub fn cur_outside_temp(&self) -> Option<f64> {
        self.cur_outside_temp
    }

    pub fn cur_humidity(&self) -> Option<f64> {
        self.cur_humidity
    }

    pub fn target_temp(&self) -> Option<f64> {
        self.target_temp
    }

    pub fn target_temp_low(&self) -> Option<f64> {
        self.target_temp_low
    }

    pub fn target_temp_high(&self) -> Option<f64> {
        self.target_temp_high
    }

    pub fn target_humidity(&self) -> Option<f64> {
        self.target_humidity
    }

    pub fn min_temp(&self) -> f64 {
        self.min_temp
    }

    pub fn max_temp(&self) -> f64 {
        self.max_temp
    }

    pub fn min_humidity(&self) -> f64 {
        self.min_humidity
    }

    pub fn max_humidity(&self) -> f64 {
        self.max_humidity
    }

    pub fn min_floor_temp(&self) -> Option<f64> {
        self.min_floor_temp
    }

    pub fn max_floor_temp(&self) -> Option<f64> {
        self.max_floor_temp
    }

    pub fn target_temp_step(&self) -> f64 {
        self.target_temp_step
    }

    pub fn set_target_temp(&mut self, value: f64) {
        self.target_temp = Some(value);
    }

    pub fn set_target_humidity(&mut self, value: f64) {
        self.target_humidity = Some(value);
    }

    pub fn set_floor_limits(&mut self, min: Option<f64>, max: Option<f64>) {
        if min.is_some() {
            self.min_floor_temp = min;
        }
        if max.is_some() {
            self.max_floor_temp = max;
        }
    }

    /// Sets either bound of the range, repairing `low < high` by one precision
    /// step on the bound that was not requested.
    pub fn set_temperature_range(&mut self, low: Option<f64>, high: Option<f64>) {
        match (low, high) {
            (Some(mut low), Some(high)) => {
                if low > high {
                    low = high - self.precision;
                }
                self.target_temp_low = Some(low);
                self.target_temp_high = Some(high);
            }
            (Some(low), None) => {
                self.target_temp_low = Some(low);
                if self.target_temp_high.is_some_and(|high| high <= low) {
                    self.target_temp_high = Some(low + self.precision);
                }
            }
            (None, Some(high)) => {
                self.target_temp_high = Some(high);
                if self.target_temp_low.is_some_and(|low| low >= high) {
                    self.target_temp_low = Some(high - self.precision);
                }
            }
            (None, None) => {}
        }
    }

    pub fn current_for(&self, attr: TargetAttr) -> Option<f64> {
        match attr {
            TargetAttr::Humidity => self.cur_humidity,
            _ => self.cur_temp,
        }
    }

    pub fn target_for(&self, attr: TargetAttr) -> Option<f64> {
        match attr {
            TargetAttr::Temperature => self.target_temp,
            TargetAttr::TemperatureLow => self.target_temp_low,
            TargetAttr::TemperatureHigh => self.target_temp_high,
            TargetAttr::Humidity => self.target_humidity,
        }
    }

    /// Cold/hot tolerance pair for the active mode.
    pub fn tolerances(&self, attr: TargetAttr) -> (f64, f64) {
        let legacy = (self.cold_tolerance, self.hot_tolerance);
        if self.heat_tolerance.is_none() && self.cool_tolerance.is_none() {
            return legacy;
        }
        let heat = self.heat_tolerance.map(|t| (t, t));
        let cool = self.cool_tolerance.map(|t| (t, t));
        let chosen = match self.hvac_mode {
            HvacMode::Heat => heat,
            HvacMode::Cool | HvacMode::FanOnly => cool,
            HvacMode::HeatCool => match attr {
                TargetAttr::TemperatureLow => heat,
                TargetAttr::TemperatureHigh => cool,
                _ => match (self.cur_temp, self.target_temp) {
                    (Some(cur), Some(target)) if cur < target => heat,
                    (Some(_), Some(_)) => cool,
                    _ => None,
                },
            },
            HvacMode::Off | HvacMode::Dry => None,
        };
        chosen.unwrap_or(legacy)
    }

    pub fn is_too_cold(&self, attr: TargetAttr) -> bool {
        let (Some(cur), Some(target)) = (self.cur_temp, self.target_for(attr)) else {
            return false;
        };
        let (cold, _) = self.tolerances(attr);
        target >= cur + cold
    }

    pub fn is_too_hot(&self, attr: TargetAttr) -> bool {
        let (Some(cur), Some(target)) = (self.cur_temp, self.target_for(attr)) else {
            return false;
        };
        let (_, hot) = self.tolerances(attr);
        cur >= target + hot
    }

    pub fn is_too_dry(&self) -> bool {
        let (Some(cur), Some(target)) = (self.cur_humidity, self.target_humidity) else {
            return false;
        };
        target >= cur + self.dry_tolerance
    }

    pub fn is_too_moist(&self) -> bool {
        let (Some(cur), Some(target)) = (self.cur_humidity, self.target_humidity) else {
            return false;
        };
        cur >= target + self.moist_tolerance
    }

    pub fn is_floor_hot(&self) -> bool {
        if !self.has_floor_sensor {
            return false;
        }
        match (self.cur_floor_temp, self.max_floor_temp) {
            (Some(floor), Some(max)) => floor >= max,
            _ => false,
        }
    }

    pub fn is_floor_cold(&self) -> bool {
        if !self.has_floor_sensor {
            return false;
        }
        match (self.cur_floor_temp, self.min_floor_temp) {
            (Some(floor), Some(min)) => floor <= min,
            _ => false,
        }
    }

    /// Current temperature sits in `(target + hot, target + hot + fan]`.
    pub fn is_within_fan_tolerance(&self, attr: TargetAttr) -> bool {
        let (Some(cur), Some(target), Some(fan)) =
            (self.cur_temp, self.target_for(attr), self.fan_hot_tolerance)
        else {
            return false;
        };
        let (_, hot) = self.tolerances(attr);
        let start = target + hot;
        cur > start && cur <= start + fan
    }

    /// Whether outside air may be used by the fan stage.
    pub fn fan_air_usable(&self) -> bool {
        if !self.fan_air_outside {
            return true;
        }
        match (self.cur_outside_temp, self.cur_temp) {
            (Some(outside), Some(inside)) => outside < inside,
            _ => false,
        }
    }

    pub fn set_default_target_temps(
        &mut self,
        is_single_setpoint: bool,
        is_range: bool,
        hvac_modes: &[HvacMode],
    ) {
        if is_single_setpoint && self.target_temp.is_none() {
            let cooling = hvac_modes
                .iter()
                .any(|m| matches!(m, HvacMode::Cool | HvacMode::FanOnly));
            self.target_temp = Some(if cooling { self.max_temp } else { self.min_temp });
            debug!(target = ?self.target_temp, "derived default target temperature");
        }

        if !is_range || (self.target_temp_low.is_some() && self.target_temp_high.is_some()) {
            return;
        }

        match self.target_temp {
            None => {
                self.target_temp_low.get_or_insert(self.min_temp);
                self.target_temp_high.get_or_insert(self.max_temp);
            }
            Some(target) => {
                let mut low = self.target_temp_low.unwrap_or(target);
                let mut high = self.target_temp_high.unwrap_or(target);
                if low >= high {
                    if high - self.precision >= self.min_temp {
                        low = high - self.precision;
                    } else {
                        high = low + self.precision;
                    }
                }
                self.target_temp_low = Some(low);
                self.target_temp_high = Some(high);
            }
        }
        debug!(
            low = ?self.target_temp_low,
            high = ?self.target_temp_high,
            "derived default target range"
        );
    }

    /// Fills targets still unset from a previously persisted state.
    pub fn apply_old_state(&mut self, old: &RestoredState) {
        fill(&mut self.target_temp, old.target_temp);
        fill(&mut self.target_temp_low, old.target_temp_low);
        fill(&mut self.target_temp_high, old.target_temp_high);
        fill(&mut self.target_humidity, old.target_humidity);
        fill(&mut self.min_floor_temp, old.min_floor_temp);
        fill(&mut self.max_floor_temp, old.max_floor_temp);
    }

    pub fn snapshot(&self) -> TargetSnapshot {
        TargetSnapshot {
            temperature: self.target_temp,
            temperature_low: self.target_temp_low,
            temperature_high: self.target_temp_high,
            humidity: self.target_humidity,
            min_floor_temp: self.min_floor_temp,
            max_floor_temp: self.max_floor_temp,
        }
    }

    pub fn restore(&mut self, snapshot: &TargetSnapshot) {
        self.target_temp = snapshot.temperature;
        self.target_temp_low = snapshot.temperature_low;
        self.target_temp_high = snapshot.temperature_high;
        self.target_humidity = snapshot.humidity;
        self.min_floor_temp = snapshot.min_floor_temp;
        self.max_floor_temp = snapshot.max_floor_temp;
    }

    pub fn clamp_temp(&self, value: f64) -> f64 {
        value.clamp(self.min_temp, self.max_temp)
    }

    pub fn clamp_humidity(&self, value: f64) -> f64 {
        value.clamp(self.min_humidity, self.max_humidity)
    }
}

fn fill(slot: &mut Option<f64>, value: Option<f64>) {
    if slot.is_none() {
        *slot = value;
    }
}
