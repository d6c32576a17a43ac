//! Triggers: the key pattern a key map waits for.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Defaults;
use crate::keycode::KeyCode;
use crate::platform::{InputDevice, KeyEvent};

/// How a single press (or a parallel group's press) must be performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickType {
    #[default]
    ShortPress,
    LongPress,
    DoublePress,
}

/// Which devices a trigger key accepts events from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFilter {
    #[default]
    Any,
    Internal,
    /// An external device, identified by its descriptor.
    External(String),
}

impl DeviceFilter {
    pub fn matches(&self, device: &InputDevice) -> bool {
        match self {
            DeviceFilter::Any => true,
            DeviceFilter::Internal => !device.is_external,
            DeviceFilter::External(descriptor) => {
                device.is_external && device.descriptor == *descriptor
            }
        }
    }
}

/// One key within a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerKey {
    pub key: KeyCode,
    pub device: DeviceFilter,
    pub click_type: ClickType,
    /// Swallow the physical event while this key is a plausible match.
    pub consume: bool,
}

impl TriggerKey {
    pub fn new(key: KeyCode) -> Self {
        Self {
            key,
            device: DeviceFilter::Any,
            click_type: ClickType::ShortPress,
            consume: true,
        }
    }

    pub fn with_click_type(mut self, click_type: ClickType) -> Self {
        self.click_type = click_type;
        self
    }

    pub fn with_device(mut self, device: DeviceFilter) -> Self {
        self.device = device;
        self
    }

    pub fn with_consume(mut self, consume: bool) -> Self {
        self.consume = consume;
        self
    }

    /// Whether an event's key and device match this trigger key. Click type is
    /// resolved separately, over time.
    pub fn matches(&self, event: &KeyEvent) -> bool {
        self.key == event.key && self.device.matches(&event.device)
    }
}

/// How the keys of a trigger combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerMode {
    /// Exactly one key; its own click type applies.
    #[default]
    Undefined,
    /// All keys held at once; the group shares one click type.
    Parallel(ClickType),
    /// Keys pressed one after another, each with its own click type.
    Sequence,
}

/// An ordered, non-empty list of keys plus the mode that combines them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMapTrigger {
    pub keys: Vec<TriggerKey>,
    pub mode: TriggerMode,
    pub long_press_delay: Option<Duration>,
    pub double_press_delay: Option<Duration>,
    pub sequence_timeout: Option<Duration>,
    pub vibrate: bool,
    pub vibrate_duration: Option<Duration>,
    /// Vibrate once more the moment a long press is recognised.
    pub long_press_double_vibration: bool,
    pub show_toast: bool,
}

impl KeyMapTrigger {
    fn with_mode(keys: Vec<TriggerKey>, mode: TriggerMode) -> Self {
        Self {
            keys,
            mode,
            long_press_delay: None,
            double_press_delay: None,
            sequence_timeout: None,
            vibrate: false,
            vibrate_duration: None,
            long_press_double_vibration: false,
            show_toast: false,
        }
    }

    pub fn single(key: TriggerKey) -> Self {
        Self::with_mode(vec![key], TriggerMode::Undefined)
    }

    /// A parallel trigger. Every key takes on the group's click type.
    pub fn parallel(click_type: ClickType, keys: Vec<TriggerKey>) -> Self {
        let keys = keys
            .into_iter()
            .map(|k| k.with_click_type(click_type))
            .collect();
        Self::with_mode(keys, TriggerMode::Parallel(click_type))
    }

    pub fn sequence(keys: Vec<TriggerKey>) -> Self {
        Self::with_mode(keys, TriggerMode::Sequence)
    }

    pub fn is_sequence(&self) -> bool {
        self.mode == TriggerMode::Sequence
    }

    /// Click type of the whole group for single-key and parallel triggers.
    pub fn group_click_type(&self) -> ClickType {
        match self.mode {
            TriggerMode::Parallel(click_type) => click_type,
            _ => self
                .keys
                .first()
                .map(|k| k.click_type)
                .unwrap_or_default(),
        }
    }

    pub fn long_press_delay(&self, defaults: &Defaults) -> Duration {
        self.long_press_delay.unwrap_or(defaults.long_press_delay)
    }

    pub fn double_press_delay(&self, defaults: &Defaults) -> Duration {
        self.double_press_delay.unwrap_or(defaults.double_press_delay)
    }

    pub fn sequence_timeout(&self, defaults: &Defaults) -> Duration {
        self.sequence_timeout.unwrap_or(defaults.sequence_timeout)
    }

    pub fn vibrate_duration(&self, defaults: &Defaults) -> Duration {
        self.vibrate_duration.unwrap_or(defaults.vibrate_duration)
    }
}
