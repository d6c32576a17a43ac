//! Physical press bookkeeping and the replay queue.
//!
//! A consumed key-down is swallowed before anyone knows whether it will be
//! used. Each such press is queued here; once every trigger interested in it
//! has either fired or given up, failed presses are handed back to the
//! `InputSource` in the order they were pressed.

use std::collections::{HashMap, VecDeque};

use crate::keycode::KeyCode;
use crate::platform::{InputEventType, KeyEvent};

use super::PressId;

// ---------------------------------------------------------------------------
// Presses
// ---------------------------------------------------------------------------

/// One physical key-down and what became of it.
#[derive(Debug, Clone)]
pub(crate) struct Press {
    pub key: KeyCode,
    pub device_id: i32,
    pub meta_state: u32,
    pub scan_code: u32,
    pub held: bool,
    /// The down event was swallowed.
    pub consumed: bool,
    /// A fired trigger used this press and asked for it to be consumed.
    pub fired: bool,
    /// The down was replayed while still held, so its up must pass through.
    pub replayed_down: bool,
}

#[derive(Debug, Default)]
pub(crate) struct PressTable {
    presses: HashMap<PressId, Press>,
    held: HashMap<(KeyCode, i32), PressId>,
    next_id: PressId,
}

impl PressTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The press currently holding `key` on `device_id`, if any.
    pub(crate) fn held(&self, key: KeyCode, device_id: i32) -> Option<PressId> {
        self.held.get(&(key, device_id)).copied()
    }

    pub(crate) fn press(&mut self, event: &KeyEvent) -> PressId {
        let id = self.next_id;
        self.next_id += 1;
        self.presses.insert(
            id,
            Press {
                key: event.key,
                device_id: event.device.id,
                meta_state: event.meta_state,
                scan_code: event.scan_code,
                held: true,
                consumed: false,
                fired: false,
                replayed_down: false,
            },
        );
        self.held.insert((event.key, event.device.id), id);
        id
    }

    /// Marks the press holding `key` as released and returns it.
    pub(crate) fn release(&mut self, key: KeyCode, device_id: i32) -> Option<PressId> {
        let id = self.held.remove(&(key, device_id))?;
        if let Some(press) = self.presses.get_mut(&id) {
            press.held = false;
        }
        Some(id)
    }

    /// Releases every press held on a device.
    pub(crate) fn release_device(&mut self, device_id: i32) -> Vec<PressId> {
        let ids: Vec<PressId> = self
            .held
            .iter()
            .filter(|((_, dev), _)| *dev == device_id)
            .map(|(_, id)| *id)
            .collect();
        for id in &ids {
            if let Some(press) = self.presses.get_mut(id) {
                press.held = false;
                self.held.remove(&(press.key, press.device_id));
            }
        }
        ids
    }

    pub(crate) fn get(&self, id: PressId) -> Option<&Press> {
        self.presses.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: PressId) -> Option<&mut Press> {
        self.presses.get_mut(&id)
    }

    pub(crate) fn is_held(&self, id: PressId) -> bool {
        self.presses.get(&id).is_some_and(|p| p.held)
    }

    /// Meta bits of held modifiers whose down the system never saw.
    pub(crate) fn swallowed_meta(&self) -> u32 {
        self.presses
            .values()
            .filter(|p| p.held && p.consumed && !p.replayed_down && p.key.is_modifier())
            .fold(0, |meta, p| meta | p.key.meta_flags())
    }

    /// Every known press, held or not, that came from a device.
    pub(crate) fn on_device(&self, device_id: i32) -> Vec<PressId> {
        self.presses
            .iter()
            .filter(|(_, p)| p.device_id == device_id)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Forgets released presses that `keep` no longer needs.
    pub(crate) fn forget_released(&mut self, keep: impl Fn(PressId) -> bool) {
        self.presses.retain(|id, press| press.held || keep(*id));
    }
}

// ---------------------------------------------------------------------------
// Replay queue
// ---------------------------------------------------------------------------

/// What became of a consumed press, as far as the matcher knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// Some trigger still wants it.
    Pending,
    /// A trigger fired with it; it stays swallowed.
    Fired,
    /// Nobody used it; it must be given back.
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    press: PressId,
    released: bool,
}

#[derive(Debug, Default)]
pub(crate) struct ReplayQueue {
    entries: VecDeque<Entry>,
}

impl ReplayQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, press: PressId) {
        self.entries.push_back(Entry {
            press,
            released: false,
        });
    }

    pub(crate) fn mark_released(&mut self, press: PressId) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.press == press) {
            entry.released = true;
        }
    }

    pub(crate) fn contains(&self, press: PressId) -> bool {
        self.entries.iter().any(|e| e.press == press)
    }

    /// Drops entries without replaying them.
    pub(crate) fn discard(&mut self, drop: impl Fn(PressId) -> bool) {
        self.entries.retain(|e| !drop(e.press));
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pops resolved entries from the front and returns the replays due, in
    /// press order. Stops at the first press that is still pending.
    ///
    /// A failed press that was already released replays as `DownUp`; one that
    /// is still held replays as `Down` and its physical up passes through.
    pub(crate) fn drain_ready(
        &mut self,
        resolve: impl Fn(PressId) -> Resolution,
    ) -> Vec<(PressId, InputEventType)> {
        let mut out = Vec::new();
        while let Some(front) = self.entries.front().copied() {
            match resolve(front.press) {
                Resolution::Pending => break,
                Resolution::Fired => {}
                Resolution::Failed => {
                    let event_type = if front.released {
                        InputEventType::DownUp
                    } else {
                        InputEventType::Down
                    };
                    out.push((front.press, event_type));
                }
            }
            self.entries.pop_front();
        }
        out
    }
}
