pub mod config;
pub mod controller;
pub mod device;
pub mod entity;
pub mod error;
pub mod managers;
pub mod reason;
pub mod thermostat;
pub mod topics;
pub mod types;

pub use config::{RestoredState, ThermostatConfig};
pub use entity::{CallbackKind, EngineAction, EntityId, EntityState, EntityStates, MemoryStates};
pub use error::{CommandError, ConfigError, SensorError};
pub use managers::Reading;
pub use reason::HvacActionReason;
pub use thermostat::{TemperatureRequest, Thermostat};
pub use topics::*;
pub use types::{ClimateFeatures, HvacAction, HvacMode, SensorKind, ThermostatAttributes};
