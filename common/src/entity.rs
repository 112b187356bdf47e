use std::{collections::HashMap, fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const STATE_ON: &str = "on";
pub const STATE_OFF: &str = "off";
pub const STATE_OPEN: &str = "open";
pub const STATE_CLOSED: &str = "closed";
pub const STATE_UNAVAILABLE: &str = "unavailable";
pub const STATE_UNKNOWN: &str = "unknown";

/// Host entity identifier in `domain.object_id` form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn domain(&self) -> &str {
        self.0.split_once('.').map_or("", |(domain, _)| domain)
    }

    /// Valve entities take open/close commands instead of on/off.
    pub fn is_valve(&self) -> bool {
        self.domain() == "valve"
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityState {
    pub state: String,
    pub last_changed: DateTime<Utc>,
}

impl EntityState {
    pub fn new(state: impl Into<String>, last_changed: DateTime<Utc>) -> Self {
        Self {
            state: state.into(),
            last_changed,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state.as_str(), STATE_ON | STATE_OPEN)
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self.state.as_str(), STATE_UNAVAILABLE | STATE_UNKNOWN)
    }
}

/// Read side of the host's entity-state store.
pub trait EntityStates {
    fn state(&self, entity: &EntityId) -> Option<&EntityState>;
}

/// In-memory entity store. `last_changed` moves only on real transitions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStates {
    states: HashMap<EntityId, EntityState>,
}

impl MemoryStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, entity: &EntityId, state: &str, now: DateTime<Utc>) -> bool {
        match self.states.get_mut(entity) {
            Some(existing) if existing.state == state => false,
            Some(existing) => {
                existing.state = state.to_string();
                existing.last_changed = now;
                true
            }
            None => {
                self.states
                    .insert(entity.clone(), EntityState::new(state, now));
                true
            }
        }
    }

    /// Mirrors executed device commands into the store.
    pub fn apply(&mut self, actions: &[EngineAction], now: DateTime<Utc>) {
        for action in actions {
            match action {
                EngineAction::TurnOn(entity) => {
                    self.set(entity, STATE_ON, now);
                }
                EngineAction::TurnOff(entity) => {
                    self.set(entity, STATE_OFF, now);
                }
                EngineAction::OpenValve(entity) => {
                    self.set(entity, STATE_OPEN, now);
                }
                EngineAction::CloseValve(entity) => {
                    self.set(entity, STATE_CLOSED, now);
                }
                EngineAction::ScheduleCallback { .. } | EngineAction::CancelCallback(_) => {}
            }
        }
    }
}

impl EntityStates for MemoryStates {
    fn state(&self, entity: &EntityId) -> Option<&EntityState> {
        self.states.get(entity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "entity")]
pub enum CallbackKind {
    OpeningTimeout(EntityId),
    AuxHeaterTimeout,
    SensorStale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    TurnOn(EntityId),
    TurnOff(EntityId),
    OpenValve(EntityId),
    CloseValve(EntityId),
    /// Replaces any pending callback of the same kind.
    ScheduleCallback {
        kind: CallbackKind,
        delay: Duration,
    },
    CancelCallback(CallbackKind),
}

impl EngineAction {
    pub fn is_turn_on(&self) -> bool {
        matches!(self, Self::TurnOn(_) | Self::OpenValve(_))
    }

    pub fn is_turn_off(&self) -> bool {
        matches!(self, Self::TurnOff(_) | Self::CloseValve(_))
    }

    pub fn entity(&self) -> Option<&EntityId> {
        match self {
            Self::TurnOn(entity)
            | Self::TurnOff(entity)
            | Self::OpenValve(entity)
            | Self::CloseValve(entity) => Some(entity),
            Self::ScheduleCallback { .. } | Self::CancelCallback(_) => None,
        }
    }
}

/// One control pass over the device tree.
///
/// Reads go through the host store, overlaid with commands issued earlier in
/// the same pass, so every turn-on/turn-off is checked against the state the
/// entity will have once the host executes the pass.
pub struct ControlPass<'a> {
    states: &'a dyn EntityStates,
    now: DateTime<Utc>,
    pending: HashMap<EntityId, bool>,
    actions: Vec<EngineAction>,
}

impl<'a> ControlPass<'a> {
    pub fn new(states: &'a dyn EntityStates, now: DateTime<Utc>) -> Self {
        Self {
            states,
            now,
            pending: HashMap::new(),
            actions: Vec::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn states(&self) -> &dyn EntityStates {
        self.states
    }

    pub fn is_active(&self, entity: &EntityId) -> bool {
        if let Some(commanded) = self.pending.get(entity) {
            return *commanded;
        }
        self.states
            .state(entity)
            .is_some_and(EntityState::is_active)
    }

    /// State commanded for `entity` earlier in this pass, if any.
    pub fn commanded(&self, entity: &EntityId) -> Option<bool> {
        self.pending.get(entity).copied()
    }

    /// True when `entity` has continuously been `active` for at least `duration`.
    pub fn held_for(&self, entity: &EntityId, active: bool, duration: Duration) -> bool {
        if self.pending.contains_key(entity) {
            return false;
        }
        match self.states.state(entity) {
            // Never reported: it has always been off.
            None => !active,
            Some(state) if state.is_active() != active => false,
            Some(state) => match (self.now - state.last_changed).to_std() {
                Ok(elapsed) => elapsed >= duration,
                Err(_) => false,
            },
        }
    }

    pub fn turn_on(&mut self, entity: &EntityId) {
        if self.is_active(entity) {
            debug!(entity = %entity, "already on");
            return;
        }
        info!(entity = %entity, "turning on");
        self.pending.insert(entity.clone(), true);
        self.actions.push(if entity.is_valve() {
            EngineAction::OpenValve(entity.clone())
        } else {
            EngineAction::TurnOn(entity.clone())
        });
    }

    pub fn turn_off(&mut self, entity: &EntityId) {
        if !self.is_active(entity) {
            debug!(entity = %entity, "already off");
            return;
        }
        info!(entity = %entity, "turning off");
        self.pending.insert(entity.clone(), false);
        self.actions.push(if entity.is_valve() {
            EngineAction::CloseValve(entity.clone())
        } else {
            EngineAction::TurnOff(entity.clone())
        });
    }

    pub fn schedule(&mut self, kind: CallbackKind, delay: Duration) {
        debug!(?kind, ?delay, "scheduling callback");
        self.actions
            .push(EngineAction::ScheduleCallback { kind, delay });
    }

    pub fn cancel(&mut self, kind: CallbackKind) {
        self.actions.push(EngineAction::CancelCallback(kind));
    }

    pub fn into_actions(self) -> Vec<EngineAction> {
        self.actions
    }
}
