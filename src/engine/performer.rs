//! Post-fire action lifecycle: action chains, hold-downs and repeats.
//!
//! `ActionPerformer` owns the `ActionExecutor` and the per-key-map state of
//! everything a fired trigger left running. Timed work goes through the
//! engine's `TimerQueue` as `ActionChain` and `Repeat` timers.

use std::collections::HashMap;
use std::time::Instant;

use crate::config::Defaults;
use crate::model::{ActionData, HoldDownMode, KeyMap, KeyMapAction, RepeatMode};
use crate::platform::InputEventType::{Down, DownUp, Up};
use crate::platform::{ActionExecutor, InputEventType};

use super::timers::{TimerKey, TimerQueue};

/// An action currently held down, remembered so it can be released even
/// after its key map is gone.
#[derive(Debug, Clone)]
struct HeldAction {
    data: ActionData,
    multiplier: u32,
}

#[derive(Debug, Default)]
struct SlotState {
    /// Some key of the trigger that fired is still down.
    trigger_held: bool,
    meta_state: u32,
    /// Next action of a chain paused on `delay_before_next_action`.
    chain_next: Option<usize>,
    held: HashMap<usize, HeldAction>,
    /// Repeats performed so far, per repeating action.
    repeats: HashMap<usize, u32>,
}

pub(crate) struct ActionPerformer {
    executor: Box<dyn ActionExecutor>,
    slots: HashMap<usize, SlotState>,
}

impl ActionPerformer {
    pub(crate) fn new(executor: Box<dyn ActionExecutor>) -> Self {
        Self {
            executor,
            slots: HashMap::new(),
        }
    }

    /// Runs a fired key map's action list from the top.
    pub(crate) fn on_triggered(
        &mut self,
        slot: usize,
        key_map: &KeyMap,
        defaults: &Defaults,
        released: bool,
        meta_state: u32,
        timers: &mut TimerQueue,
        now: Instant,
    ) {
        let state = self.slots.entry(slot).or_default();
        state.trigger_held = !released;
        state.meta_state = meta_state;
        if state.chain_next.take().is_some() {
            timers.cancel(TimerKey::ActionChain { slot });
        }
        self.run_chain(slot, 0, key_map, defaults, timers, now);
    }

    /// The trigger's keys went up: stop what runs "until released".
    pub(crate) fn on_released(&mut self, slot: usize, key_map: &KeyMap, timers: &mut TimerQueue) {
        let Some(state) = self.slots.get_mut(&slot) else {
            return;
        };
        state.trigger_held = false;
        for (i, action) in key_map.actions.iter().enumerate() {
            if action.repeat == Some(RepeatMode::UntilReleased)
                && state.repeats.remove(&i).is_some()
            {
                timers.cancel(TimerKey::Repeat { slot, action: i });
                log::debug!("performer: {} action {i} stopped repeating", key_map.uid);
            }
            if action.hold_down == Some(HoldDownMode::UntilReleased) {
                if let Some(held) = state.held.remove(&i) {
                    perform(&*self.executor, &held.data, Up, state.meta_state, held.multiplier);
                }
            }
        }
    }

    pub(crate) fn on_chain_timer(
        &mut self,
        slot: usize,
        key_map: &KeyMap,
        defaults: &Defaults,
        timers: &mut TimerQueue,
        now: Instant,
    ) {
        let Some(next) = self.slots.get_mut(&slot).and_then(|s| s.chain_next.take()) else {
            return;
        };
        self.run_chain(slot, next, key_map, defaults, timers, now);
    }

    pub(crate) fn on_repeat_timer(
        &mut self,
        slot: usize,
        index: usize,
        key_map: &KeyMap,
        defaults: &Defaults,
        timers: &mut TimerQueue,
        now: Instant,
    ) {
        let Some(action) = key_map.actions.get(index) else {
            return;
        };
        let Some(state) = self.slots.get_mut(&slot) else {
            return;
        };
        let Some(count) = state.repeats.get_mut(&index) else {
            return;
        };
        *count += 1;
        let count = *count;

        let event_type = if state.held.contains_key(&index) {
            Down
        } else {
            DownUp
        };
        perform(&*self.executor, &action.data, event_type, state.meta_state, action.multiplier);

        if action.effective_repeat_limit().is_some_and(|limit| count >= limit) {
            state.repeats.remove(&index);
            log::debug!("performer: {} action {index} reached its repeat limit", key_map.uid);
            return;
        }
        timers.schedule(
            TimerKey::Repeat { slot, action: index },
            now + action.repeat_rate(defaults),
        );
    }

    /// Releases every held action and forgets all state. The caller clears
    /// the timers.
    pub(crate) fn reset(&mut self) {
        for (_, state) in self.slots.drain() {
            for (_, held) in state.held {
                perform(&*self.executor, &held.data, Up, state.meta_state, held.multiplier);
            }
        }
    }

    /// Whether anything is held, repeating or waiting in a chain.
    pub(crate) fn is_idle(&self) -> bool {
        self.slots.values().all(|s| {
            s.held.is_empty() && s.repeats.is_empty() && s.chain_next.is_none()
        })
    }

    fn run_chain(
        &mut self,
        slot: usize,
        from: usize,
        key_map: &KeyMap,
        defaults: &Defaults,
        timers: &mut TimerQueue,
        now: Instant,
    ) {
        let actions = &key_map.actions;
        for i in from..actions.len() {
            self.dispatch(slot, i, &actions[i], defaults, timers, now);
            if let Some(delay) = actions[i].delay_before_next_action {
                if i + 1 < actions.len() {
                    if let Some(state) = self.slots.get_mut(&slot) {
                        state.chain_next = Some(i + 1);
                    }
                    timers.schedule(TimerKey::ActionChain { slot }, now + delay);
                    return;
                }
            }
        }
    }

    fn dispatch(
        &mut self,
        slot: usize,
        index: usize,
        action: &KeyMapAction,
        defaults: &Defaults,
        timers: &mut TimerQueue,
        now: Instant,
    ) {
        let executor = &*self.executor;
        let state = self.slots.entry(slot).or_default();
        let released = !state.trigger_held;
        let meta = state.meta_state;
        let repeat_key = TimerKey::Repeat { slot, action: index };
        let repeating = state.repeats.remove(&index).is_some();
        if repeating {
            timers.cancel(repeat_key);
        }

        // Pressing again only stops an "until pressed again" repeat.
        if repeating && action.repeat == Some(RepeatMode::UntilPressedAgain) {
            if let Some(held) = state.held.remove(&index) {
                perform(executor, &held.data, Up, meta, held.multiplier);
            }
            return;
        }

        match action.hold_down {
            Some(HoldDownMode::UntilPressedAgain) if state.held.contains_key(&index) => {
                if let Some(held) = state.held.remove(&index) {
                    perform(executor, &held.data, Up, meta, held.multiplier);
                }
            }
            Some(HoldDownMode::UntilReleased) if state.held.contains_key(&index) => {}
            Some(mode) => {
                perform(executor, &action.data, Down, meta, action.multiplier);
                if mode == HoldDownMode::UntilReleased && released {
                    perform(executor, &action.data, Up, meta, action.multiplier);
                } else {
                    state.held.insert(
                        index,
                        HeldAction {
                            data: action.data.clone(),
                            multiplier: action.multiplier,
                        },
                    );
                }
            }
            None => perform(executor, &action.data, DownUp, meta, action.multiplier),
        }

        let Some(mode) = action.repeat else {
            return;
        };
        if mode == RepeatMode::UntilReleased && released {
            return;
        }
        if action.effective_repeat_limit() == Some(0) {
            return;
        }
        state.repeats.insert(index, 0);
        timers.schedule(repeat_key, now + action.repeat_delay(defaults));
    }
}

/// Performs one dispatch `multiplier` times. Failures are logged and not
/// retried.
fn perform(
    executor: &dyn ActionExecutor,
    data: &ActionData,
    event_type: InputEventType,
    meta_state: u32,
    multiplier: u32,
) {
    for _ in 0..multiplier.max(1) {
        if let Err(e) = executor.perform(data, event_type, meta_state) {
            log::warn!("performer: {} failed: {e}", data.kind);
        }
    }
}
