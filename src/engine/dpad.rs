//! D-pad motion tracking.
//!
//! Game controllers report D-pad buttons as HAT axis motion, as key events, or
//! as both. `DpadTracker` turns axis transitions into D-pad key events and
//! recognises the key events that duplicate a direction it already reported,
//! so every D-pad press reaches the matcher exactly once.

use std::collections::HashMap;

use crate::keycode::KeyCode;
use crate::platform::{KeyEvent, KeyState, MotionEvent};

/// Axis values past this count as pressed.
const HAT_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Y,
}

/// Direction per axis: -1, 0 or 1.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Hat {
    x: i8,
    y: i8,
}

impl Hat {
    fn of(event: &MotionEvent) -> Self {
        Self {
            x: direction(event.hat_x),
            y: direction(event.hat_y),
        }
    }

    fn get(self, axis: Axis) -> i8 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }
}

fn direction(value: f32) -> i8 {
    if value <= -HAT_THRESHOLD {
        -1
    } else if value >= HAT_THRESHOLD {
        1
    } else {
        0
    }
}

fn dpad_key(axis: Axis, direction: i8) -> Option<KeyCode> {
    match (axis, direction) {
        (Axis::X, -1) => Some(KeyCode::DpadLeft),
        (Axis::X, 1) => Some(KeyCode::DpadRight),
        (Axis::Y, -1) => Some(KeyCode::DpadUp),
        (Axis::Y, 1) => Some(KeyCode::DpadDown),
        _ => None,
    }
}

/// Pressed HAT directions per device id.
#[derive(Debug, Default)]
pub(crate) struct DpadTracker {
    hats: HashMap<i32, Hat>,
}

impl DpadTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Key events for every direction that changed since the device's last
    /// motion event: releases before presses, X axis before Y.
    pub(crate) fn convert(&mut self, event: &MotionEvent) -> Vec<KeyEvent> {
        let id = event.device.id;
        let next = Hat::of(event);
        let prev = self.hats.get(&id).copied().unwrap_or_default();
        if next == Hat::default() {
            self.hats.remove(&id);
        } else {
            self.hats.insert(id, next);
        }

        let mut events = Vec::new();
        for axis in [Axis::X, Axis::Y] {
            let (old, new) = (prev.get(axis), next.get(axis));
            if old == new {
                continue;
            }
            if let Some(key) = dpad_key(axis, old) {
                events.push(KeyEvent::new(key, KeyState::Up, event.device.clone()));
            }
            if let Some(key) = dpad_key(axis, new) {
                events.push(KeyEvent::new(key, KeyState::Down, event.device.clone()));
            }
        }
        events
    }

    /// Whether `event` is a controller's key event for a direction already
    /// reported through motion.
    pub(crate) fn is_duplicate(&self, event: &KeyEvent) -> bool {
        let Some(hat) = self.hats.get(&event.device.id) else {
            return false;
        };
        [Axis::X, Axis::Y]
            .into_iter()
            .any(|axis| dpad_key(axis, hat.get(axis)) == Some(event.key))
    }

    pub(crate) fn forget_device(&mut self, device_id: i32) {
        self.hats.remove(&device_id);
    }
}
