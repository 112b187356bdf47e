pub mod environment;
pub mod feature;
pub mod opening;
pub mod power;
pub mod preset;

pub use environment::{EnvironmentManager, Reading, TargetSnapshot};
pub use feature::FeatureManager;
pub use opening::{Opening, OpeningManager};
pub use power::HvacPowerManager;
pub use preset::{EntityValueEvaluator, PresetManager, TemplateEvaluator, PRESET_NONE};
