//! Actions and their post-fire lifecycle options.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Defaults;

/// Action payload. Opaque to the engine; interpreted by the `ActionExecutor`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActionData {
    pub kind: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ActionData {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// When a held-down action is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldDownMode {
    UntilReleased,
    UntilPressedAgain,
}

/// When a repeating action stops repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    UntilReleased,
    UntilPressedAgain,
    UntilLimitReached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMapAction {
    pub data: ActionData,
    /// `Some` keeps the action down until the release condition is met.
    pub hold_down: Option<HoldDownMode>,
    /// `Some` keeps dispatching the action at the repeat rate.
    pub repeat: Option<RepeatMode>,
    /// Maximum number of repeats after the initial dispatch.
    pub repeat_limit: Option<u32>,
    pub repeat_rate: Option<Duration>,
    pub repeat_delay: Option<Duration>,
    pub delay_before_next_action: Option<Duration>,
    /// How many times each dispatch is performed.
    pub multiplier: u32,
}

impl KeyMapAction {
    pub fn new(data: ActionData) -> Self {
        Self {
            data,
            hold_down: None,
            repeat: None,
            repeat_limit: None,
            repeat_rate: None,
            repeat_delay: None,
            delay_before_next_action: None,
            multiplier: 1,
        }
    }

    pub fn with_hold_down(mut self, mode: HoldDownMode) -> Self {
        self.hold_down = Some(mode);
        self
    }

    pub fn with_repeat(mut self, mode: RepeatMode, limit: Option<u32>) -> Self {
        self.repeat = Some(mode);
        self.repeat_limit = limit;
        self
    }

    pub fn with_delay_before_next(mut self, delay: Duration) -> Self {
        self.delay_before_next_action = Some(delay);
        self
    }

    pub fn repeat_rate(&self, defaults: &Defaults) -> Duration {
        self.repeat_rate.unwrap_or(defaults.repeat_rate)
    }

    pub fn repeat_delay(&self, defaults: &Defaults) -> Duration {
        self.repeat_delay.unwrap_or(defaults.repeat_delay)
    }

    /// Repeat count after which repeating stops, if any.
    pub fn effective_repeat_limit(&self) -> Option<u32> {
        match self.repeat {
            Some(RepeatMode::UntilLimitReached) => Some(self.repeat_limit.unwrap_or(1)),
            Some(_) => self.repeat_limit,
            None => None,
        }
    }
}
