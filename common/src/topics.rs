use crate::entity::{EngineAction, EntityId};

pub const TOPIC_ENTITY_STATE_PREFIX: &str = "hvac/state/";
pub const TOPIC_ENTITY_STATE_FILTER: &str = "hvac/state/#";
pub const TOPIC_ENTITY_CMD_PREFIX: &str = "hvac/cmnd/entity/";

pub const TOPIC_CONTROLLER_STATE: &str = "hvac/controller/state";

pub const TOPIC_CMD_MODE: &str = "hvac/cmnd/thermostat/mode";
pub const TOPIC_CMD_TARGET: &str = "hvac/cmnd/thermostat/target";
pub const TOPIC_CMD_HUMIDITY: &str = "hvac/cmnd/thermostat/humidity";
pub const TOPIC_CMD_PRESET: &str = "hvac/cmnd/thermostat/preset";
pub const TOPIC_CMD_ACTION_REASON: &str = "hvac/cmnd/thermostat/action_reason";

/// Entity whose state a message on `topic` carries, if any.
pub fn entity_from_state_topic(topic: &str) -> Option<EntityId> {
    topic
        .strip_prefix(TOPIC_ENTITY_STATE_PREFIX)
        .filter(|entity| !entity.is_empty())
        .map(EntityId::from)
}

/// Topic and payload that carry a device command to the actuator bridge.
pub fn command_message(action: &EngineAction) -> Option<(String, &'static str)> {
    let (entity, payload) = match action {
        EngineAction::TurnOn(entity) => (entity, "on"),
        EngineAction::TurnOff(entity) => (entity, "off"),
        EngineAction::OpenValve(entity) => (entity, "open"),
        EngineAction::CloseValve(entity) => (entity, "close"),
        EngineAction::ScheduleCallback { .. } | EngineAction::CancelCallback(_) => return None,
    };
    Some((format!("{TOPIC_ENTITY_CMD_PREFIX}{entity}"), payload))
}
