//! Trigger matching engine.
//!
//! `Engine` consumes physical key events one at a time, matches them against
//! every detectable key map, decides per event whether the event is
//! swallowed, and fires the key maps that win. It is a synchronous state
//! machine driven by an explicit clock: every entry point takes `now`, and
//! time-based work (long-press thresholds, double-press windows, sequence
//! timeouts, action repeats) sits in a `TimerQueue` that `advance` drains.
//! `service::DetectionService` drives it from a tokio task.
//!
//! Matching works on presses. Each physical key-down is a press; attempts
//! claim the presses they use. A completed attempt waits as a pending fire
//! while any in-flight attempt claims a superset of its presses, so the
//! longer of two overlapping triggers always gets the chance to finish. When
//! a pending fire wins, the pending fires and attempts whose presses it
//! covers are eliminated. Presses swallowed on the way are replayed once no
//! trigger wants them any more.

mod attempt;
mod dpad;
mod performer;
mod replay;
mod timers;

#[cfg(test)]
mod tests;

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{ConfigSource, Defaults};
use crate::constraints::ConstraintGateProvider;
use crate::model::{ClickType, KeyMap, KeyMapTrigger};
use crate::platform::{
    ActionExecutor, Feedback, InputEventType, InputSource, KeyEvent, KeyState, MotionEvent,
    NoFeedback,
};

use attempt::{Attempt, Claim, Ctx, Timing, Transition};
use dpad::DpadTracker;
use performer::ActionPerformer;
use replay::{PressTable, ReplayQueue, Resolution};
use timers::{TimerKey, TimerQueue};

pub(crate) type PressId = u64;
pub(crate) type AttemptId = u64;

/// A completed attempt waiting for its competitors to settle.
#[derive(Debug)]
struct PendingFire {
    attempt: AttemptId,
    slot: usize,
    claims: Vec<Claim>,
    click_type: ClickType,
    release_watch: Vec<PressId>,
}

/// A fired key map whose keys are still down.
#[derive(Debug)]
struct FiredTrigger {
    slot: usize,
    watch: Vec<PressId>,
}

fn covers(outer: &[Claim], inner: &[Claim]) -> bool {
    inner
        .iter()
        .all(|c| outer.iter().any(|o| o.press == c.press))
}

/// Long and double presses win ties against short presses on the same presses.
fn tie_rank(click_type: ClickType) -> u8 {
    match click_type {
        ClickType::LongPress | ClickType::DoublePress => 0,
        ClickType::ShortPress => 1,
    }
}

pub struct Engine {
    config: Arc<dyn ConfigSource>,
    version: u64,
    /// Detectable key maps of the current configuration, indexed by slot.
    key_maps: Arc<[KeyMap]>,
    defaults: Defaults,

    input: Box<dyn InputSource>,
    gate: Box<dyn ConstraintGateProvider>,
    feedback: Box<dyn Feedback>,
    performer: ActionPerformer,

    timers: TimerQueue,
    dpad: DpadTracker,
    presses: PressTable,
    replay: ReplayQueue,
    attempts: Vec<Attempt>,
    pending: Vec<PendingFire>,
    fired: Vec<FiredTrigger>,
    next_attempt: AttemptId,
    /// Longest vibration requested during the current step.
    vibration: Option<Duration>,
}

impl Engine {
    pub fn new(
        config: Arc<dyn ConfigSource>,
        input: Box<dyn InputSource>,
        executor: Box<dyn ActionExecutor>,
        gate: Box<dyn ConstraintGateProvider>,
    ) -> Self {
        let mut engine = Self {
            config,
            version: 0,
            key_maps: Arc::from(Vec::new()),
            defaults: Defaults::default(),
            input,
            gate,
            feedback: Box::new(NoFeedback),
            performer: ActionPerformer::new(executor),
            timers: TimerQueue::new(),
            dpad: DpadTracker::new(),
            presses: PressTable::new(),
            replay: ReplayQueue::new(),
            attempts: Vec::new(),
            pending: Vec::new(),
            fired: Vec::new(),
            next_attempt: 0,
            vibration: None,
        };
        engine.load_config();
        engine
    }

    pub fn with_feedback(mut self, feedback: Box<dyn Feedback>) -> Self {
        self.feedback = feedback;
        self
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Handles one physical key event. Returns `true` when the event must be
    /// swallowed.
    ///
    /// Timers due at or before `now` run first, so callers that never call
    /// `advance` still see a consistent order.
    ///
    /// A controller's D-pad key event for a direction already reported by
    /// `on_motion_event` is swallowed without being matched again.
    pub fn on_key_event(&mut self, event: &KeyEvent, now: Instant) -> bool {
        if self.dpad.is_duplicate(event) {
            log::trace!("engine: {} already seen as D-pad motion", event.key);
            return true;
        }
        self.sync_config();
        self.run_timers(now);
        self.dispatch(event, now)
    }

    /// Handles a game controller's HAT motion. Each D-pad direction that
    /// changed is matched as a key event of that controller. Returns `true`
    /// when any of them was swallowed.
    pub fn on_motion_event(&mut self, event: &MotionEvent, now: Instant) -> bool {
        self.sync_config();
        self.run_timers(now);
        let mut consumed = false;
        for key_event in self.dpad.convert(event) {
            log::trace!("engine: D-pad {} {:?}", key_event.key, key_event.state);
            consumed |= self.dispatch(&key_event, now);
        }
        consumed
    }

    /// Runs every timer due at or before `now`, each at its own deadline.
    pub fn advance(&mut self, now: Instant) {
        self.sync_config();
        self.run_timers(now);
    }

    /// When `advance` next has work to do.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Drops all match state, cancels every timer and releases every held
    /// action. Presses already swallowed are neither fired nor replayed;
    /// their key-ups stay swallowed.
    pub fn reset(&mut self) {
        log::info!("engine: reset");
        self.timers.clear();
        self.attempts.clear();
        self.pending.clear();
        self.fired.clear();
        self.replay.clear();
        self.performer.reset();
        self.vibration = None;
        self.presses.forget_released(|_| false);
    }

    /// Forgets a device that went away. Attempts using its presses fail, its
    /// held keys count as released and its swallowed presses are dropped
    /// without replay.
    pub fn on_device_disconnected(&mut self, device_id: i32, now: Instant) {
        self.sync_config();
        self.run_timers(now);
        self.dpad.forget_device(device_id);
        let gone = self.presses.on_device(device_id);
        if gone.is_empty() {
            return;
        }
        log::info!(
            "engine: device {device_id} disconnected, dropping {} press(es)",
            gone.len()
        );
        self.presses.release_device(device_id);

        let uses_gone = |claims: &[Claim]| claims.iter().any(|c| gone.contains(&c.press));
        let timers = &mut self.timers;
        self.attempts.retain(|a| {
            let keep = !uses_gone(&a.claims);
            if !keep {
                a.cancel_timers(timers, false);
            }
            keep
        });
        self.pending.retain(|p| {
            let keep = !uses_gone(&p.claims);
            if !keep {
                timers.cancel(TimerKey::LongPress { attempt: p.attempt });
            }
            keep
        });
        self.replay.discard(|id| gone.contains(&id));
        self.release_fired(|watch| watch.iter().any(|p| gone.contains(p)));

        self.resolve(now);
        self.flush();
    }

    /// Nothing in flight: no attempts, pending fires, replays or running
    /// actions.
    pub fn is_idle(&self) -> bool {
        self.attempts.is_empty()
            && self.pending.is_empty()
            && self.replay.is_empty()
            && self.performer.is_idle()
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    fn sync_config(&mut self) {
        if self.config.current().version == self.version {
            return;
        }
        log::info!("engine: key maps changed, restarting detection");
        self.reset();
        self.load_config();
    }

    fn load_config(&mut self) {
        let snapshot = self.config.current();
        let detectable: Vec<KeyMap> = snapshot
            .key_maps
            .iter()
            .filter(|km| km.is_detectable())
            .cloned()
            .collect();
        log::debug!(
            "engine: version {}, {} of {} key map(s) detectable",
            snapshot.version,
            detectable.len(),
            snapshot.key_maps.len()
        );
        self.version = snapshot.version;
        self.defaults = snapshot.defaults;
        self.key_maps = Arc::from(detectable);
    }

    // -----------------------------------------------------------------------
    // Key events
    // -----------------------------------------------------------------------

    fn dispatch(&mut self, event: &KeyEvent, now: Instant) -> bool {
        match event.state {
            KeyState::Down => self.on_key_down(event, now),
            KeyState::Up => self.on_key_up(event, now),
        }
    }

    fn on_key_down(&mut self, event: &KeyEvent, now: Instant) -> bool {
        if let Some(held) = self.presses.held(event.key, event.device.id) {
            let consumed = self
                .presses
                .get(held)
                .is_some_and(|p| p.consumed && !p.replayed_down);
            log::trace!("engine: auto-repeat of {} (consumed: {consumed})", event.key);
            return consumed;
        }

        let press = self.presses.press(event);
        let key_maps = Arc::clone(&self.key_maps);
        let defaults = self.defaults;
        let mut outcomes = Vec::new();

        for attempt in &mut self.attempts {
            let trigger = &key_maps[attempt.slot].trigger;
            let mut ctx = Ctx {
                trigger,
                timing: Timing::of(trigger, &defaults),
                timers: &mut self.timers,
                now,
            };
            outcomes.push((attempt.id, attempt.on_key_down(event, press, &mut ctx)));
        }

        for slot in self.admitted_slots(event) {
            let trigger = &key_maps[slot].trigger;
            let mut ctx = Ctx {
                trigger,
                timing: Timing::of(trigger, &defaults),
                timers: &mut self.timers,
                now,
            };
            let id = self.next_attempt;
            if let Some((attempt, transition)) = Attempt::start(id, slot, event, press, &mut ctx) {
                self.next_attempt += 1;
                log::debug!("engine: {} started matching on {}", key_maps[slot].uid, event.key);
                self.attempts.push(attempt);
                outcomes.push((id, transition));
            }
        }

        for (id, transition) in outcomes {
            self.apply(id, transition);
        }
        self.resolve(now);

        let consumed = self.claimed_for_consumption(press)
            || self.presses.get(press).is_some_and(|p| p.fired);
        if consumed {
            if let Some(p) = self.presses.get_mut(press) {
                p.consumed = true;
            }
            self.replay.push(press);
        }
        self.flush();
        consumed
    }

    fn on_key_up(&mut self, event: &KeyEvent, now: Instant) -> bool {
        let Some(press) = self.presses.release(event.key, event.device.id) else {
            log::trace!("engine: untracked up of {}", event.key);
            return false;
        };
        self.replay.mark_released(press);

        let key_maps = Arc::clone(&self.key_maps);
        let defaults = self.defaults;
        let mut outcomes = Vec::new();
        for attempt in &mut self.attempts {
            let trigger = &key_maps[attempt.slot].trigger;
            let mut ctx = Ctx {
                trigger,
                timing: Timing::of(trigger, &defaults),
                timers: &mut self.timers,
                now,
            };
            outcomes.push((attempt.id, attempt.on_key_up(press, &mut ctx)));
        }
        for (id, transition) in outcomes {
            self.apply(id, transition);
        }

        // A released short press can no longer be overtaken by holding.
        for p in &self.pending {
            if p.click_type == ClickType::ShortPress && p.release_watch.contains(&press) {
                self.timers.cancel(TimerKey::LongPress { attempt: p.attempt });
            }
        }
        self.release_fired(|watch| watch.contains(&press));

        self.resolve(now);
        let consumed = self
            .presses
            .get(press)
            .is_some_and(|p| p.consumed && !p.replayed_down);
        self.flush();
        consumed
    }

    /// Slots without a live attempt that `event` may open, filtered by their
    /// constraints. One snapshot serves the whole event.
    fn admitted_slots(&self, event: &KeyEvent) -> Vec<usize> {
        let candidates: Vec<usize> = (0..self.key_maps.len())
            .filter(|&slot| !self.attempts.iter().any(|a| a.slot == slot))
            .filter(|&slot| Attempt::can_start(&self.key_maps[slot].trigger, event))
            .collect();
        if candidates
            .iter()
            .all(|&slot| self.key_maps[slot].constraints.is_empty())
        {
            return candidates;
        }
        let snapshot = self.gate.snapshot();
        candidates
            .into_iter()
            .filter(|&slot| {
                let key_map = &self.key_maps[slot];
                let ok = snapshot.is_state_satisfied(&key_map.constraints);
                if !ok {
                    log::debug!("engine: {} skipped, constraints not satisfied", key_map.uid);
                }
                ok
            })
            .collect()
    }

    fn claimed_for_consumption(&self, press: PressId) -> bool {
        let wants = |claims: &[Claim]| claims.iter().any(|c| c.press == press && c.consume);
        self.attempts.iter().any(|a| wants(&a.claims))
            || self.pending.iter().any(|p| wants(&p.claims))
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    fn run_timers(&mut self, now: Instant) {
        while let Some((at, key)) = self.timers.pop_due(now) {
            self.on_timer(key, at);
            self.resolve(at);
            self.flush();
        }
    }

    fn on_timer(&mut self, key: TimerKey, now: Instant) {
        let key_maps = Arc::clone(&self.key_maps);
        let defaults = self.defaults;
        match key {
            TimerKey::ActionChain { slot } => {
                if let Some(key_map) = key_maps.get(slot) {
                    self.performer
                        .on_chain_timer(slot, key_map, &defaults, &mut self.timers, now);
                }
            }
            TimerKey::Repeat { slot, action } => {
                if let Some(key_map) = key_maps.get(slot) {
                    self.performer
                        .on_repeat_timer(slot, action, key_map, &defaults, &mut self.timers, now);
                }
            }
            TimerKey::ChordWindow { attempt }
            | TimerKey::LongPress { attempt }
            | TimerKey::DoublePress { attempt }
            | TimerKey::SequenceStep { attempt } => {
                let Some(pos) = self.attempts.iter().position(|a| a.id == attempt) else {
                    if let TimerKey::LongPress { .. } = key {
                        self.drop_held_short_press(attempt);
                    }
                    return;
                };
                let a = &mut self.attempts[pos];
                let trigger = &key_maps[a.slot].trigger;
                let mut ctx = Ctx {
                    trigger,
                    timing: Timing::of(trigger, &defaults),
                    timers: &mut self.timers,
                    now,
                };
                let transition = a.on_timer(key, &mut ctx);
                let long_press_detected = matches!(key, TimerKey::LongPress { .. })
                    && matches!(transition, Transition::Advanced | Transition::Completed(_));
                if long_press_detected && trigger.long_press_double_vibration {
                    self.feedback.vibrate(trigger.vibrate_duration(&defaults));
                }
                self.apply(attempt, transition);
            }
        }
    }

    /// A completed short press whose keys are still down once its long-press
    /// delay passes was a long press after all.
    fn drop_held_short_press(&mut self, attempt: AttemptId) {
        let Some(pos) = self
            .pending
            .iter()
            .position(|p| p.attempt == attempt && p.click_type == ClickType::ShortPress)
        else {
            return;
        };
        if self.pending[pos]
            .release_watch
            .iter()
            .all(|&p| self.presses.is_held(p))
        {
            let dropped = self.pending.remove(pos);
            log::debug!(
                "engine: {} held too long for a short press",
                self.key_maps[dropped.slot].uid
            );
        }
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    fn apply(&mut self, id: AttemptId, transition: Transition) {
        let (Transition::Completed(_) | Transition::Failed) = transition else {
            return;
        };
        let Some(pos) = self.attempts.iter().position(|a| a.id == id) else {
            return;
        };
        let attempt = self.attempts.remove(pos);
        let uid = self.key_maps[attempt.slot].uid;
        match transition {
            Transition::Completed(click_type) => {
                attempt.cancel_timers(&mut self.timers, click_type == ClickType::ShortPress);
                log::debug!("engine: {uid} matched as {click_type:?}");
                self.pending.push(PendingFire {
                    attempt: attempt.id,
                    slot: attempt.slot,
                    release_watch: attempt.release_watch(),
                    claims: attempt.claims,
                    click_type,
                });
            }
            _ => {
                attempt.cancel_timers(&mut self.timers, false);
                log::debug!("engine: {uid} failed to match");
            }
        }
    }

    fn blocks(attempt: &Attempt, trigger: &KeyMapTrigger, fire: &PendingFire) -> bool {
        if !covers(&attempt.claims, &fire.claims) {
            return false;
        }
        // Of two long presses on the same keys, the shorter delay wins.
        let rival_long_press = fire.click_type == ClickType::LongPress
            && attempt.claims.len() == fire.claims.len()
            && attempt.completes_on_long_timer(trigger);
        !rival_long_press
    }

    /// Fires every pending match that nothing can overtake any more.
    fn resolve(&mut self, now: Instant) {
        loop {
            let mut order: Vec<usize> = (0..self.pending.len()).collect();
            order.sort_by_key(|&i| {
                let p = &self.pending[i];
                (Reverse(p.claims.len()), tie_rank(p.click_type), p.attempt)
            });

            let mut blocked: Vec<usize> = Vec::new();
            let mut winner = None;
            for i in order {
                let fire = &self.pending[i];
                let by_attempt = self
                    .attempts
                    .iter()
                    .any(|a| Self::blocks(a, &self.key_maps[a.slot].trigger, fire));
                let by_pending = blocked.iter().any(|&j| {
                    let other = &self.pending[j];
                    other.claims.len() > fire.claims.len() && covers(&other.claims, &fire.claims)
                });
                if by_attempt || by_pending {
                    blocked.push(i);
                } else {
                    winner = Some(i);
                    break;
                }
            }
            let Some(i) = winner else {
                return;
            };

            let fire = self.pending.remove(i);
            self.timers.cancel(TimerKey::LongPress { attempt: fire.attempt });
            let key_map = &self.key_maps[fire.slot];
            // Fresh snapshot: an earlier fire may have changed system state.
            if !self.gate.snapshot().is_state_satisfied(&key_map.constraints) {
                log::debug!("engine: {} matched but its constraints no longer hold", key_map.uid);
                continue;
            }
            self.fire(fire, now);
        }
    }

    fn fire(&mut self, fire: PendingFire, now: Instant) {
        let key_maps = Arc::clone(&self.key_maps);
        let key_map = &key_maps[fire.slot];
        let released = !fire.release_watch.iter().any(|&p| self.presses.is_held(p));

        for claim in fire.claims.iter().filter(|c| c.consume) {
            if let Some(p) = self.presses.get_mut(claim.press) {
                p.fired = true;
            }
        }

        let timers = &mut self.timers;
        self.pending.retain(|p| {
            let strict_subset =
                p.claims.len() < fire.claims.len() && covers(&fire.claims, &p.claims);
            let overtaken_short = p.claims.len() == fire.claims.len()
                && covers(&fire.claims, &p.claims)
                && p.click_type == ClickType::ShortPress
                && fire.click_type == ClickType::LongPress;
            let keep = !(strict_subset || overtaken_short);
            if !keep {
                timers.cancel(TimerKey::LongPress { attempt: p.attempt });
            }
            keep
        });
        self.attempts.retain(|a| {
            let keep = !covers(&fire.claims, &a.claims);
            if !keep {
                a.cancel_timers(timers, false);
            }
            keep
        });

        log::info!(
            "engine: {} fired ({:?}{})",
            key_map.uid,
            fire.click_type,
            if released { ", keys already released" } else { "" }
        );
        let meta_state = fire
            .claims
            .last()
            .and_then(|c| self.presses.get(c.press))
            .map_or(0, |p| p.meta_state)
            & !self.swallowed_meta(&fire.claims);
        self.fired.retain(|f| f.slot != fire.slot);
        self.performer.on_triggered(
            fire.slot,
            key_map,
            &self.defaults,
            released,
            meta_state,
            &mut self.timers,
            now,
        );
        if !released {
            self.fired.push(FiredTrigger {
                slot: fire.slot,
                watch: fire.release_watch,
            });
        }

        let trigger = &key_map.trigger;
        let vibrate = if trigger.vibrate {
            Some(trigger.vibrate_duration(&self.defaults))
        } else if self.defaults.force_vibrate {
            Some(self.defaults.vibrate_duration)
        } else {
            None
        };
        if let Some(duration) = vibrate {
            self.vibration = Some(self.vibration.map_or(duration, |d| d.max(duration)));
        }
        if trigger.show_toast {
            self.feedback.show_triggered_toast();
        }
    }

    /// Meta bits of modifiers held down as consumed trigger keys. The system
    /// never saw them go down, so actions must not see them either.
    fn swallowed_meta(&self, claims: &[Claim]) -> u32 {
        claims
            .iter()
            .filter(|c| c.consume)
            .filter_map(|c| self.presses.get(c.press))
            .filter(|p| p.held && p.key.is_modifier())
            .fold(self.presses.swallowed_meta(), |meta, p| meta | p.key.meta_flags())
    }

    fn release_fired(&mut self, released: impl Fn(&[PressId]) -> bool) {
        let key_maps = Arc::clone(&self.key_maps);
        let performer = &mut self.performer;
        let timers = &mut self.timers;
        self.fired.retain(|f| {
            if !released(&f.watch) {
                return true;
            }
            if let Some(key_map) = key_maps.get(f.slot) {
                log::debug!("engine: {} released", key_map.uid);
                performer.on_released(f.slot, key_map, timers);
            }
            false
        });
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    /// Replays presses nobody wants any more and issues this step's vibration.
    fn flush(&mut self) {
        let attempts = &self.attempts;
        let pending = &self.pending;
        let presses = &self.presses;
        let replays = self.replay.drain_ready(|id| {
            if presses.get(id).is_some_and(|p| p.fired) {
                return Resolution::Fired;
            }
            let wanted = |claims: &[Claim]| claims.iter().any(|c| c.press == id && c.consume);
            if attempts.iter().any(|a| wanted(&a.claims))
                || pending.iter().any(|p| wanted(&p.claims))
            {
                Resolution::Pending
            } else {
                Resolution::Failed
            }
        });

        for (id, event_type) in replays {
            let Some(p) = self.presses.get_mut(id) else {
                continue;
            };
            if event_type == InputEventType::Down {
                p.replayed_down = true;
            }
            let p = p.clone();
            let meta_state = p.meta_state & !self.presses.swallowed_meta();
            log::debug!("engine: replaying {} as {event_type:?}", p.key);
            if let Err(e) = self.input.imitate_button_press(
                p.key,
                meta_state,
                p.device_id,
                event_type,
                p.scan_code,
            ) {
                log::warn!("engine: replay of {} failed: {e}", p.key);
            }
        }

        let replay = &self.replay;
        self.presses.forget_released(|id| replay.contains(id));

        if let Some(duration) = self.vibration.take() {
            self.feedback.vibrate(duration);
        }
    }
}
