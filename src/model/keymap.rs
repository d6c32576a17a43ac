use std::fmt;

use serde::{Deserialize, Serialize};

use super::{KeyMapAction, KeyMapTrigger};
use crate::constraints::ConstraintState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyMapUid(pub u64);

impl fmt::Display for KeyMapUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A trigger, the actions it fires, and the constraints gating it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMap {
    pub uid: KeyMapUid,
    pub enabled: bool,
    pub trigger: KeyMapTrigger,
    pub actions: Vec<KeyMapAction>,
    pub constraints: ConstraintState,
}

impl KeyMap {
    pub fn new(uid: u64, trigger: KeyMapTrigger, actions: Vec<KeyMapAction>) -> Self {
        Self {
            uid: KeyMapUid(uid),
            enabled: true,
            trigger,
            actions,
            constraints: ConstraintState::default(),
        }
    }

    pub fn with_constraints(mut self, constraints: ConstraintState) -> Self {
        self.constraints = constraints;
        self
    }

    /// Only enabled key maps with something to do take part in detection.
    pub fn is_detectable(&self) -> bool {
        self.enabled && !self.actions.is_empty() && !self.trigger.keys.is_empty()
    }
}
