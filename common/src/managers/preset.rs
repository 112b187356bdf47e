use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::{
    config::{PresetConfig, PresetValue, ThermostatConfig},
    entity::{EntityId, EntityStates},
    error::CommandError,
    managers::environment::{EnvironmentManager, TargetSnapshot},
};

pub const PRESET_NONE: &str = "none";

/// Resolves late-bound preset values.
pub trait TemplateEvaluator: Send + Sync {
    fn evaluate(&self, template: &str, states: &dyn EntityStates) -> Option<f64>;
}

/// Treats the template as an entity id and reads its numeric state.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityValueEvaluator;

impl TemplateEvaluator for EntityValueEvaluator {
    fn evaluate(&self, template: &str, states: &dyn EntityStates) -> Option<f64> {
        states
            .state(&EntityId::from(template.trim()))
            .and_then(|s| s.state.trim().parse::<f64>().ok())
            .filter(|value| value.is_finite())
    }
}

#[derive(Debug, Clone)]
pub struct PresetManager {
    presets: BTreeMap<String, PresetConfig>,
    active: String,
    saved: Option<TargetSnapshot>,
}

impl PresetManager {
    pub fn new(config: &ThermostatConfig) -> Self {
        Self {
            presets: config.presets.clone(),
            active: PRESET_NONE.to_string(),
            saved: None,
        }
    }

    pub fn has_presets(&self) -> bool {
        !self.presets.is_empty()
    }

    pub fn has_range_presets(&self) -> bool {
        self.presets.values().any(PresetConfig::has_range)
    }

    pub fn preset_mode(&self) -> &str {
        &self.active
    }

    pub fn preset_modes(&self) -> Vec<String> {
        std::iter::once(PRESET_NONE.to_string())
            .chain(self.presets.keys().cloned())
            .collect()
    }

    pub fn saved_targets(&self) -> Option<TargetSnapshot> {
        self.saved
    }

    pub fn set_preset_mode(
        &mut self,
        name: &str,
        environment: &mut EnvironmentManager,
        evaluator: &dyn TemplateEvaluator,
        states: &dyn EntityStates,
    ) -> Result<(), CommandError> {
        if name == PRESET_NONE {
            if let Some(saved) = self.saved.take() {
                environment.restore(&saved);
            }
            if self.active != PRESET_NONE {
                info!(from = %self.active, "preset cleared");
            }
            self.active = PRESET_NONE.to_string();
            return Ok(());
        }

        let preset = self
            .presets
            .get(name)
            .ok_or_else(|| CommandError::UnknownPreset(name.to_string()))?;

        if self.saved.is_none() {
            self.saved = Some(environment.snapshot());
        }
        apply(name, preset, environment, evaluator, states);
        self.active = name.to_string();
        info!(preset = name, "preset applied");
        Ok(())
    }

    /// Re-resolves the active preset, e.g. after a template dependency changed.
    pub fn reapply(
        &self,
        environment: &mut EnvironmentManager,
        evaluator: &dyn TemplateEvaluator,
        states: &dyn EntityStates,
    ) {
        if let Some(preset) = self.presets.get(&self.active) {
            apply(&self.active, preset, environment, evaluator, states);
        }
    }

    /// Entities the active preset's templates read.
    pub fn dependencies(&self) -> Vec<EntityId> {
        let Some(preset) = self.presets.get(&self.active) else {
            return Vec::new();
        };
        preset
            .values()
            .filter_map(|value| match value {
                PresetValue::Template { entities, .. } => Some(entities.iter().cloned()),
                PresetValue::Literal(_) => None,
            })
            .flatten()
            .collect()
    }

    /// Restores an active preset and its saved targets without re-applying it.
    pub fn restore(&mut self, name: &str, saved: Option<TargetSnapshot>) {
        if name != PRESET_NONE && !self.presets.contains_key(name) {
            warn!(preset = name, "ignoring unknown restored preset");
            return;
        }
        self.active = name.to_string();
        self.saved = saved;
    }
}

fn apply(
    name: &str,
    preset: &PresetConfig,
    environment: &mut EnvironmentManager,
    evaluator: &dyn TemplateEvaluator,
    states: &dyn EntityStates,
) {
    let resolve = |value: &Option<PresetValue>, field: &str| -> Option<f64> {
        match value.as_ref()? {
            PresetValue::Literal(value) => Some(*value),
            PresetValue::Template { template, .. } => {
                let resolved = evaluator.evaluate(template, states);
                if resolved.is_none() {
                    warn!(preset = name, field, template = %template, "preset template unavailable");
                }
                resolved
            }
        }
    };

    if let Some(temperature) = resolve(&preset.temperature, "temperature") {
        environment.set_target_temp(temperature);
    }
    environment.set_temperature_range(
        resolve(&preset.target_temp_low, "target_temp_low"),
        resolve(&preset.target_temp_high, "target_temp_high"),
    );
    if let Some(humidity) = resolve(&preset.humidity, "humidity") {
        environment.set_target_humidity(humidity);
    }
    environment.set_floor_limits(
        resolve(&preset.min_floor_temp, "min_floor_temp"),
        resolve(&preset.max_floor_temp, "max_floor_temp"),
    );
}
