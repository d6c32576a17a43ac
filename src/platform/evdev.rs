//! Linux evdev code conversions.
//!
//! Maps key codes from `linux/input-event-codes.h` to and from the semantic
//! `KeyCode` enum, so an `InputSource` reading `/dev/input/event*` can feed the
//! engine and replays can be written back as raw codes.
//!
//! - `evdev_to_keycode`: capture side. Unknown codes become `KeyCode::Other`.
//! - `keycode_to_evdev`: replay side. Unified modifiers map to their left-side
//!   variant; `Other(code)` maps back to `code`.

use crate::keycode::KeyCode;

/// Canonical (KeyCode, evdev code) pairs. The first entry for a code wins on
/// the capture side.
const EVDEV_CODES: &[(KeyCode, u32)] = &[
    (KeyCode::Escape, 1),
    (KeyCode::Key1, 2),
    (KeyCode::Key2, 3),
    (KeyCode::Key3, 4),
    (KeyCode::Key4, 5),
    (KeyCode::Key5, 6),
    (KeyCode::Key6, 7),
    (KeyCode::Key7, 8),
    (KeyCode::Key8, 9),
    (KeyCode::Key9, 10),
    (KeyCode::Key0, 11),
    (KeyCode::Backspace, 14),
    (KeyCode::Tab, 15),
    (KeyCode::Q, 16),
    (KeyCode::W, 17),
    (KeyCode::E, 18),
    (KeyCode::R, 19),
    (KeyCode::T, 20),
    (KeyCode::Y, 21),
    (KeyCode::U, 22),
    (KeyCode::I, 23),
    (KeyCode::O, 24),
    (KeyCode::P, 25),
    (KeyCode::Enter, 28),
    (KeyCode::Ctrl, 29),
    (KeyCode::A, 30),
    (KeyCode::S, 31),
    (KeyCode::D, 32),
    (KeyCode::F, 33),
    (KeyCode::G, 34),
    (KeyCode::H, 35),
    (KeyCode::J, 36),
    (KeyCode::K, 37),
    (KeyCode::L, 38),
    (KeyCode::Shift, 42),
    (KeyCode::Z, 44),
    (KeyCode::X, 45),
    (KeyCode::C, 46),
    (KeyCode::V, 47),
    (KeyCode::B, 48),
    (KeyCode::N, 49),
    (KeyCode::M, 50),
    (KeyCode::Alt, 56),
    (KeyCode::Space, 57),
    (KeyCode::CapsLock, 58),
    (KeyCode::F1, 59),
    (KeyCode::F2, 60),
    (KeyCode::F3, 61),
    (KeyCode::F4, 62),
    (KeyCode::F5, 63),
    (KeyCode::F6, 64),
    (KeyCode::F7, 65),
    (KeyCode::F8, 66),
    (KeyCode::F9, 67),
    (KeyCode::F10, 68),
    (KeyCode::F11, 87),
    (KeyCode::F12, 88),
    (KeyCode::Home, 102),
    (KeyCode::Up, 103),
    (KeyCode::PageUp, 104),
    (KeyCode::Left, 105),
    (KeyCode::Right, 106),
    (KeyCode::End, 107),
    (KeyCode::Down, 108),
    (KeyCode::PageDown, 109),
    (KeyCode::Insert, 110),
    (KeyCode::Delete, 111),
    (KeyCode::VolumeMute, 113),
    (KeyCode::VolumeDown, 114),
    (KeyCode::VolumeUp, 115),
    (KeyCode::Power, 116),
    (KeyCode::Meta, 125),
    (KeyCode::MediaNext, 163),
    (KeyCode::MediaPlayPause, 164),
    (KeyCode::MediaPrevious, 165),
    (KeyCode::MediaStop, 166),
    (KeyCode::Camera, 212),
    (KeyCode::HeadsetHook, 226),
    (KeyCode::ButtonA, 304),
    (KeyCode::ButtonB, 305),
    (KeyCode::ButtonX, 307),
    (KeyCode::ButtonY, 308),
    (KeyCode::ButtonL1, 310),
    (KeyCode::ButtonR1, 311),
    (KeyCode::ButtonL2, 312),
    (KeyCode::ButtonR2, 313),
    (KeyCode::ButtonSelect, 314),
    (KeyCode::ButtonStart, 315),
    (KeyCode::ButtonMode, 316),
    (KeyCode::ButtonThumbL, 317),
    (KeyCode::ButtonThumbR, 318),
    (KeyCode::DpadUp, 544),
    (KeyCode::DpadDown, 545),
    (KeyCode::DpadLeft, 546),
    (KeyCode::DpadRight, 547),
    (KeyCode::DpadCenter, 353),
];

/// Right-hand modifier codes, folded into the unified modifier variants.
const RIGHT_MODIFIERS: &[(u32, KeyCode)] = &[
    (97, KeyCode::Ctrl),
    (54, KeyCode::Shift),
    (100, KeyCode::Alt),
    (126, KeyCode::Meta),
];

/// Converts a Linux evdev key code to the semantic `KeyCode`.
pub fn evdev_to_keycode(code: u32) -> KeyCode {
    if let Some(&(_, key)) = RIGHT_MODIFIERS.iter().find(|(c, _)| *c == code) {
        return key;
    }
    EVDEV_CODES
        .iter()
        .find(|(_, c)| *c == code)
        .map(|&(key, _)| key)
        .unwrap_or(KeyCode::Other(code))
}

/// Converts a semantic `KeyCode` back to a Linux evdev key code.
pub fn keycode_to_evdev(key: KeyCode) -> u32 {
    if let KeyCode::Other(code) = key {
        return code;
    }
    EVDEV_CODES
        .iter()
        .find(|(k, _)| *k == key)
        .map(|&(_, code)| code)
        .unwrap_or_else(|| {
            log::debug!("evdev: no code for {key}, using 0");
            0
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
