//! Semantic key codes.
//!
//! `KeyCode` is the platform-independent identity of a physical button. Trigger
//! keys, incoming events and replayed events all speak `KeyCode`; translating
//! from OS-specific codes happens at the `InputSource` boundary (see
//! `platform::evdev` for the Linux mapping).
//!
//! Left and right modifier variants are unified (`Ctrl`, `Shift`, `Alt`, `Meta`).

use std::fmt;

use serde::{Deserialize, Serialize};

// Meta state bits, laid out as on Android: the combined flag plus its
// left and right variants.
pub const META_SHIFT: u32 = 0x0000_00c1;
pub const META_ALT: u32 = 0x0000_0032;
pub const META_CTRL: u32 = 0x0000_7000;
pub const META_META: u32 = 0x0007_0000;

/// A physical button, independent of the device or OS that reported it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyCode {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    N,
    O,
    P,
    Q,
    R,
    S,
    T,
    U,
    V,
    W,
    X,
    Y,
    Z,
    Key0,
    Key1,
    Key2,
    Key3,
    Key4,
    Key5,
    Key6,
    Key7,
    Key8,
    Key9,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
    Ctrl,
    Shift,
    Alt,
    Meta,
    CapsLock,
    Space,
    Enter,
    Tab,
    Escape,
    Backspace,
    Delete,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,
    VolumeUp,
    VolumeDown,
    VolumeMute,
    Power,
    Camera,
    HeadsetHook,
    MediaPlayPause,
    MediaNext,
    MediaPrevious,
    MediaStop,
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
    DpadCenter,
    ButtonA,
    ButtonB,
    ButtonX,
    ButtonY,
    ButtonL1,
    ButtonR1,
    ButtonL2,
    ButtonR2,
    ButtonThumbL,
    ButtonThumbR,
    ButtonStart,
    ButtonSelect,
    ButtonMode,
    /// A code with no semantic variant; carries the raw OS code.
    Other(u32),
}

impl KeyCode {
    /// Whether this key contributes to the modifier meta state.
    pub fn is_modifier(self) -> bool {
        matches!(self, KeyCode::Ctrl | KeyCode::Shift | KeyCode::Alt | KeyCode::Meta)
    }

    /// Meta state bits a held modifier sets on the events around it. Zero for
    /// every other key.
    pub fn meta_flags(self) -> u32 {
        match self {
            KeyCode::Shift => META_SHIFT,
            KeyCode::Alt => META_ALT,
            KeyCode::Ctrl => META_CTRL,
            KeyCode::Meta => META_META,
            _ => 0,
        }
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyCode::Other(code) => write!(f, "Other({code})"),
            key => write!(f, "{key:?}"),
        }
    }
}
