//! Platform boundary.
//!
//! Defines the event types the engine consumes (key events and D-pad motion)
//! and the collaborator traits it calls out to: `InputSource` (replaying
//! swallowed events), `ActionExecutor` (performing actions) and `Feedback`
//! (vibration / toast). Concrete
//! implementations live outside this crate; the simulator binary and the tests
//! provide logging and recording ones.

pub mod evdev;

use std::time::Duration;

use thiserror::Error;

use crate::keycode::KeyCode;
use crate::model::ActionData;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure reported by a platform collaborator.
///
/// The engine never propagates these: a failed dispatch is logged and the
/// match it belongs to still counts as fired.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Input events
// ---------------------------------------------------------------------------

/// Whether a key went down or came back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyState {
    Down,
    Up,
}

/// The device a key event came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct InputDevice {
    /// Session-local numeric id, used when replaying events.
    pub id: i32,
    /// Stable identifier that external-device filters match against.
    pub descriptor: String,
    pub name: String,
    /// `false` for built-in buttons (volume rocker, power key, ...).
    pub is_external: bool,
}

impl InputDevice {
    /// The device's built-in buttons.
    pub fn internal() -> Self {
        Self {
            id: 0,
            descriptor: String::new(),
            name: "internal".into(),
            is_external: false,
        }
    }

    pub fn external(id: i32, descriptor: impl Into<String>) -> Self {
        let descriptor = descriptor.into();
        Self {
            id,
            name: descriptor.clone(),
            descriptor,
            is_external: true,
        }
    }
}

/// A single physical key event as delivered by the `InputSource`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: KeyCode,
    pub state: KeyState,
    pub device: InputDevice,
    pub meta_state: u32,
    pub scan_code: u32,
}

impl KeyEvent {
    pub fn new(key: KeyCode, state: KeyState, device: InputDevice) -> Self {
        Self {
            key,
            state,
            device,
            meta_state: 0,
            scan_code: 0,
        }
    }

    pub fn down(key: KeyCode) -> Self {
        Self::new(key, KeyState::Down, InputDevice::internal())
    }

    pub fn up(key: KeyCode) -> Self {
        Self::new(key, KeyState::Up, InputDevice::internal())
    }
}

/// Game controller HAT axes from one motion event. Each axis is -1.0, 0.0 or
/// 1.0 on digital D-pads; negative is left and up.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionEvent {
    pub device: InputDevice,
    pub hat_x: f32,
    pub hat_y: f32,
}

impl MotionEvent {
    pub fn hat(device: InputDevice, hat_x: f32, hat_y: f32) -> Self {
        Self {
            device,
            hat_x,
            hat_y,
        }
    }
}

/// What an injected or performed input should look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputEventType {
    /// A complete press: down immediately followed by up.
    DownUp,
    Down,
    Up,
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// The source of physical key events, which also accepts replays of events
/// the engine swallowed but did not end up using.
pub trait InputSource: Send {
    fn imitate_button_press(
        &self,
        key: KeyCode,
        meta_state: u32,
        device_id: i32,
        event_type: InputEventType,
        scan_code: u32,
    ) -> Result<(), PlatformError>;
}

/// Performs the payload of a fired key map action.
///
/// Implementations may change constraint-relevant system state (toggling the
/// flashlight, for instance); the engine takes a fresh constraint snapshot for
/// every fire decision.
pub trait ActionExecutor: Send {
    fn perform(
        &self,
        data: &ActionData,
        event_type: InputEventType,
        meta_state: u32,
    ) -> Result<(), PlatformError>;
}

/// Haptic / visual acknowledgement that a key map fired.
pub trait Feedback: Send {
    fn vibrate(&self, duration: Duration);

    fn show_triggered_toast(&self) {}
}

/// `Feedback` that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFeedback;

impl Feedback for NoFeedback {
    fn vibrate(&self, _duration: Duration) {}
}
