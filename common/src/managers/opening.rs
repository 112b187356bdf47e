use std::time::Duration;

use crate::{
    config::{OpeningConfig, ThermostatConfig},
    entity::{ControlPass, EntityId, EntityStates},
    error::ConfigError,
    types::HvacMode,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Opening {
    pub entity_id: EntityId,
    pub timeout: Option<Duration>,
    pub closing_timeout: Option<Duration>,
}

impl From<&OpeningConfig> for Opening {
    fn from(config: &OpeningConfig) -> Self {
        match config {
            OpeningConfig::Entity(entity_id) => Self {
                entity_id: entity_id.clone(),
                timeout: None,
                closing_timeout: None,
            },
            OpeningConfig::Detailed {
                entity_id,
                timeout_ms,
                closing_timeout_ms,
            } => Self {
                entity_id: entity_id.clone(),
                timeout: timeout_ms.map(Duration::from_millis),
                closing_timeout: closing_timeout_ms.map(Duration::from_millis),
            },
        }
    }
}

impl Opening {
    /// Open once held open past `timeout`, and still open until held closed
    /// past `closing_timeout`.
    fn is_open(&self, pass: &ControlPass<'_>) -> bool {
        if pass.is_active(&self.entity_id) {
            self.timeout
                .map_or(true, |timeout| pass.held_for(&self.entity_id, true, timeout))
        } else {
            self.closing_timeout
                .is_some_and(|timeout| !pass.held_for(&self.entity_id, false, timeout))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpeningManager {
    openings: Vec<Opening>,
    scope: Option<Vec<HvacMode>>,
}

impl OpeningManager {
    pub fn new(config: &ThermostatConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            openings: config.openings.iter().map(Opening::from).collect(),
            scope: config.opening_scope()?,
        })
    }

    pub fn openings(&self) -> &[Opening] {
        &self.openings
    }

    pub fn is_opening(&self, entity: &EntityId) -> bool {
        self.openings.iter().any(|o| o.entity_id == *entity)
    }

    pub fn applies_to(&self, mode: HvacMode) -> bool {
        self.scope
            .as_ref()
            .map_or(true, |modes| modes.contains(&mode))
    }

    pub fn any_opening_open(&self, mode: HvacMode, pass: &ControlPass<'_>) -> bool {
        if !self.applies_to(mode) {
            return false;
        }
        self.openings.iter().any(|opening| opening.is_open(pass))
    }

    /// Delay after which the opening's debounced state must be re-evaluated,
    /// given the state it just moved to.
    pub fn timeout_after_change(
        &self,
        entity: &EntityId,
        states: &dyn EntityStates,
    ) -> Option<Duration> {
        let opening = self.openings.iter().find(|o| o.entity_id == *entity)?;
        let open = states.state(entity).is_some_and(|s| s.is_active());
        if open {
            opening.timeout
        } else {
            opening.closing_timeout
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::OpeningScopeConfig,
        entity::{MemoryStates, STATE_OFF, STATE_ON},
    };
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn manager(openings: Vec<OpeningConfig>, scope: Option<OpeningScopeConfig>) -> OpeningManager {
        OpeningManager::new(&ThermostatConfig {
            openings,
            openings_scope: scope,
            ..ThermostatConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn plain_opening_reads_live_state() {
        let door = EntityId::from("binary_sensor.door");
        let openings = manager(vec![OpeningConfig::Entity(door.clone())], None);
        let mut states = MemoryStates::new();

        states.set(&door, STATE_OFF, at(0));
        assert!(!openings.any_opening_open(HvacMode::Heat, &ControlPass::new(&states, at(1))));

        states.set(&door, STATE_ON, at(2));
        assert!(openings.any_opening_open(HvacMode::Heat, &ControlPass::new(&states, at(2))));
    }

    #[test]
    fn timeout_debounces_open_state() {
        let window = EntityId::from("binary_sensor.window");
        let openings = manager(
            vec![OpeningConfig::Detailed {
                entity_id: window.clone(),
                timeout_ms: Some(15_000),
                closing_timeout_ms: Some(5_000),
            }],
            None,
        );
        let mut states = MemoryStates::new();
        states.set(&window, STATE_ON, at(0));

        assert!(!openings.any_opening_open(HvacMode::Cool, &ControlPass::new(&states, at(14))));
        assert!(openings.any_opening_open(HvacMode::Cool, &ControlPass::new(&states, at(15))));
        assert_eq!(
            openings.timeout_after_change(&window, &states),
            Some(Duration::from_secs(15))
        );

        states.set(&window, STATE_OFF, at(20));
        assert!(openings.any_opening_open(HvacMode::Cool, &ControlPass::new(&states, at(24))));
        assert!(!openings.any_opening_open(HvacMode::Cool, &ControlPass::new(&states, at(25))));
        assert_eq!(
            openings.timeout_after_change(&window, &states),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn scope_limits_modes() {
        let door = EntityId::from("binary_sensor.door");
        let openings = manager(
            vec![OpeningConfig::Entity(door.clone())],
            Some(OpeningScopeConfig::Modes(vec![HvacMode::Cool])),
        );
        let mut states = MemoryStates::new();
        states.set(&door, STATE_ON, at(0));
        let pass = ControlPass::new(&states, at(0));

        assert!(openings.any_opening_open(HvacMode::Cool, &pass));
        assert!(!openings.any_opening_open(HvacMode::Heat, &pass));
    }
}
