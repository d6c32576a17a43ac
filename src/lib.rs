//! keytrigger -- key trigger detection and action dispatch.
//!
//! Physical key events go in through `Engine::on_key_event` (game controller
//! D-pad motion through `Engine::on_motion_event`); the engine
//! decides per event whether to swallow it, fires the key maps whose triggers
//! match, performs their actions through an `ActionExecutor`, and hands
//! swallowed events that nobody used back to the `InputSource`.
//! `DetectionService` drives the engine's timers from a tokio task.

pub mod config;
pub mod constraints;
pub mod engine;
pub mod error;
pub mod keycode;
pub mod model;
pub mod platform;
pub mod service;
pub mod sim;

pub use config::{Config, ConfigSnapshot, ConfigSource, Defaults, KeyMapStore};
pub use engine::Engine;
pub use error::{ConfigError, TraceError};
pub use keycode::KeyCode;
pub use platform::{
    ActionExecutor, Feedback, InputDevice, InputEventType, InputSource, KeyEvent, KeyState,
    MotionEvent, PlatformError,
};
pub use service::DetectionService;
