use serde::{Deserialize, Serialize};

use crate::error::CommandError;

/// Why the thermostat is in its current on/off state.
///
/// Internal reasons are computed by the control pass. External reasons can only
/// be injected through [`HvacActionReason::parse_external`] and are replaced by
/// the next control pass that reaches a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacActionReason {
    #[default]
    None,
    TargetTempNotReached,
    TargetTempReached,
    TargetTempNotReachedWithFan,
    TargetHumidityNotReached,
    TargetHumidityReached,
    Opening,
    /// Floor temperature at or below its minimum.
    Limit,
    /// Floor temperature at or above its maximum.
    Overheat,
    TemperatureSensorStalled,
    AuxHeating,

    Presence,
    Schedule,
    Emergency,
    Malfunction,
}

impl HvacActionReason {
    pub const EXTERNAL: [Self; 4] = [
        Self::Presence,
        Self::Schedule,
        Self::Emergency,
        Self::Malfunction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::TargetTempNotReached => "target_temp_not_reached",
            Self::TargetTempReached => "target_temp_reached",
            Self::TargetTempNotReachedWithFan => "target_temp_not_reached_with_fan",
            Self::TargetHumidityNotReached => "target_humidity_not_reached",
            Self::TargetHumidityReached => "target_humidity_reached",
            Self::Opening => "opening",
            Self::Limit => "limit",
            Self::Overheat => "overheat",
            Self::TemperatureSensorStalled => "temperature_sensor_stalled",
            Self::AuxHeating => "aux_heating",
            Self::Presence => "presence",
            Self::Schedule => "schedule",
            Self::Emergency => "emergency",
            Self::Malfunction => "malfunction",
        }
    }

    pub fn is_external(self) -> bool {
        Self::EXTERNAL.contains(&self)
    }

    pub fn parse_external(value: &str) -> Result<Self, CommandError> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::EXTERNAL
            .into_iter()
            .find(|reason| reason.as_str() == normalized)
            .ok_or_else(|| CommandError::UnknownActionReason(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_only_external_reasons() {
        assert_eq!(
            HvacActionReason::parse_external("Emergency"),
            Ok(HvacActionReason::Emergency)
        );
        assert_eq!(
            HvacActionReason::parse_external("opening"),
            Err(CommandError::UnknownActionReason("opening".to_string()))
        );
        assert!(HvacActionReason::parse_external("vacation").is_err());
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&HvacActionReason::TargetTempNotReachedWithFan).unwrap();
        assert_eq!(json, "\"target_temp_not_reached_with_fan\"");
        assert!(!HvacActionReason::Overheat.is_external());
        assert!(HvacActionReason::Presence.is_external());
    }
}
