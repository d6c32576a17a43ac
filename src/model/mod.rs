//! Key map data model.
//!
//! Everything here is created by the configuration layer and read-only from
//! the engine's perspective.

mod action;
mod keymap;
mod trigger;

pub use action::{ActionData, HoldDownMode, KeyMapAction, RepeatMode};
pub use keymap::{KeyMap, KeyMapUid};
pub use trigger::{ClickType, DeviceFilter, KeyMapTrigger, TriggerKey, TriggerMode};
