//! Match attempts.
//!
//! An attempt is one trigger's in-flight effort to match, started by a
//! key-down that matches the trigger's first key (or any key of a parallel
//! group). It claims the presses it uses and reports how each event or timer
//! moved it along. Single-key and parallel triggers share the chord matcher;
//! sequence triggers walk their keys one step at a time.

use std::time::{Duration, Instant};

use crate::config::Defaults;
use crate::model::{ClickType, KeyMapTrigger, TriggerMode};
use crate::platform::KeyEvent;

use super::timers::{TimerKey, TimerQueue};
use super::{AttemptId, PressId};

/// A press used by an attempt, and whether that trigger key swallows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Claim {
    pub press: PressId,
    pub consume: bool,
}

/// Effective delays of one trigger.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timing {
    pub long_press: Duration,
    pub double_press: Duration,
    pub sequence_timeout: Duration,
}

impl Timing {
    pub(crate) fn of(trigger: &KeyMapTrigger, defaults: &Defaults) -> Self {
        Self {
            long_press: trigger.long_press_delay(defaults),
            double_press: trigger.double_press_delay(defaults),
            sequence_timeout: trigger.sequence_timeout(defaults),
        }
    }
}

/// Everything a transition may touch besides the attempt itself.
pub(crate) struct Ctx<'a> {
    pub trigger: &'a KeyMapTrigger,
    pub timing: Timing,
    pub timers: &'a mut TimerQueue,
    pub now: Instant,
}

impl Ctx<'_> {
    fn schedule(&mut self, key: TimerKey, after: Duration) {
        self.timers.schedule(key, self.now + after);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// The event or timer is irrelevant to this attempt.
    Ignored,
    Advanced,
    Completed(ClickType),
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for the rest of the group to go down.
    Gathering,
    /// Every key of the group is down.
    Held,
    /// First click of a double press done, waiting for the second.
    BetweenClicks,
}

#[derive(Debug)]
struct Chord {
    click_type: ClickType,
    /// Press currently filling each key position.
    members: Vec<Option<PressId>>,
    phase: Phase,
    clicks: u8,
}

#[derive(Debug)]
struct Sequence {
    step: usize,
    /// Press of the current step while it is down.
    press: Option<PressId>,
    clicks: u8,
    last_press: Option<PressId>,
}

#[derive(Debug)]
enum Kind {
    Chord(Chord),
    Sequence(Sequence),
}

#[derive(Debug)]
pub(crate) struct Attempt {
    pub id: AttemptId,
    pub slot: usize,
    pub claims: Vec<Claim>,
    kind: Kind,
}

impl Attempt {
    /// Starts an attempt if `event` can open a match of `ctx.trigger`.
    pub(crate) fn start(
        id: AttemptId,
        slot: usize,
        event: &KeyEvent,
        press: PressId,
        ctx: &mut Ctx<'_>,
    ) -> Option<(Self, Transition)> {
        let trigger = ctx.trigger;
        if !Self::can_start(trigger, event) {
            return None;
        }
        let kind = match trigger.mode {
            TriggerMode::Sequence => Kind::Sequence(Sequence {
                step: 0,
                press: None,
                clicks: 0,
                last_press: None,
            }),
            TriggerMode::Undefined | TriggerMode::Parallel(_) => Kind::Chord(Chord {
                click_type: trigger.group_click_type(),
                members: vec![None; trigger.keys.len()],
                phase: Phase::Gathering,
                clicks: 0,
            }),
        };
        let mut attempt = Self {
            id,
            slot,
            claims: Vec::new(),
            kind,
        };
        if let Kind::Chord(chord) = &attempt.kind {
            if chord.members.len() > 1 {
                ctx.schedule(TimerKey::ChordWindow { attempt: id }, ctx.timing.sequence_timeout);
            }
        }
        let transition = attempt.on_key_down(event, press, ctx);
        Some((attempt, transition))
    }

    /// Sequences open on their first key, chords on any of theirs.
    pub(crate) fn can_start(trigger: &KeyMapTrigger, event: &KeyEvent) -> bool {
        match trigger.mode {
            TriggerMode::Sequence => trigger.keys.first().is_some_and(|k| k.matches(event)),
            TriggerMode::Undefined | TriggerMode::Parallel(_) => {
                trigger.keys.iter().any(|k| k.matches(event))
            }
        }
    }

    pub(crate) fn claims_press(&self, press: PressId) -> bool {
        self.claims.iter().any(|c| c.press == press)
    }

    /// Presses whose release ends a fired trigger's hold.
    pub(crate) fn release_watch(&self) -> Vec<PressId> {
        match &self.kind {
            Kind::Chord(chord) => chord.members.iter().flatten().copied().collect(),
            Kind::Sequence(seq) => seq.last_press.into_iter().collect(),
        }
    }

    /// Whether nothing but the long-press timer stands between this attempt
    /// and completion.
    pub(crate) fn completes_on_long_timer(&self, trigger: &KeyMapTrigger) -> bool {
        match &self.kind {
            Kind::Chord(chord) => {
                chord.phase == Phase::Held && chord.click_type == ClickType::LongPress
            }
            Kind::Sequence(seq) => {
                seq.press.is_some()
                    && seq.step + 1 == trigger.keys.len()
                    && trigger.keys[seq.step].click_type == ClickType::LongPress
            }
        }
    }

    /// Cancels this attempt's timers. A short press that already completed
    /// keeps its long-press timer so it can still be overtaken by holding.
    pub(crate) fn cancel_timers(&self, timers: &mut TimerQueue, keep_long_press: bool) {
        let id = self.id;
        timers.cancel(TimerKey::ChordWindow { attempt: id });
        timers.cancel(TimerKey::DoublePress { attempt: id });
        timers.cancel(TimerKey::SequenceStep { attempt: id });
        if !keep_long_press {
            timers.cancel(TimerKey::LongPress { attempt: id });
        }
    }

    fn claim(&mut self, press: PressId, consume: bool) {
        if !self.claims_press(press) {
            self.claims.push(Claim { press, consume });
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub(crate) fn on_key_down(
        &mut self,
        event: &KeyEvent,
        press: PressId,
        ctx: &mut Ctx<'_>,
    ) -> Transition {
        let id = self.id;
        let trigger = ctx.trigger;
        let claimed = match &mut self.kind {
            Kind::Chord(chord) => {
                if chord.phase == Phase::Held {
                    return Transition::Ignored;
                }
                let Some(pos) = chord
                    .members
                    .iter()
                    .zip(&trigger.keys)
                    .position(|(member, key)| member.is_none() && key.matches(event))
                else {
                    return Transition::Ignored;
                };
                chord.members[pos] = Some(press);
                pos
            }
            Kind::Sequence(seq) => {
                let key = &trigger.keys[seq.step];
                if seq.press.is_some() || !key.matches(event) {
                    return Transition::Ignored;
                }
                seq.press = Some(press);
                ctx.timers.cancel(TimerKey::SequenceStep { attempt: id });
                ctx.schedule(TimerKey::LongPress { attempt: id }, ctx.timing.long_press);
                seq.step
            }
        };
        self.claim(press, trigger.keys[claimed].consume);

        match &mut self.kind {
            Kind::Chord(chord) if chord.members.iter().all(Option::is_some) => {
                ctx.timers.cancel(TimerKey::ChordWindow { attempt: id });
                chord.phase = Phase::Held;
                ctx.schedule(TimerKey::LongPress { attempt: id }, ctx.timing.long_press);
                match chord.click_type {
                    ClickType::ShortPress => Transition::Completed(ClickType::ShortPress),
                    ClickType::LongPress | ClickType::DoublePress => Transition::Advanced,
                }
            }
            _ => Transition::Advanced,
        }
    }

    pub(crate) fn on_key_up(&mut self, press: PressId, ctx: &mut Ctx<'_>) -> Transition {
        let id = self.id;
        match &mut self.kind {
            Kind::Chord(chord) => {
                if !chord.members.contains(&Some(press)) {
                    return Transition::Ignored;
                }
                match (chord.phase, chord.click_type) {
                    (Phase::Gathering | Phase::BetweenClicks, _) => Transition::Failed,
                    (Phase::Held, ClickType::ShortPress) => Transition::Ignored,
                    (Phase::Held, ClickType::LongPress) => Transition::Failed,
                    (Phase::Held, ClickType::DoublePress) => {
                        ctx.timers.cancel(TimerKey::LongPress { attempt: id });
                        chord.clicks += 1;
                        if chord.clicks >= 2 {
                            return Transition::Completed(ClickType::DoublePress);
                        }
                        chord.phase = Phase::BetweenClicks;
                        chord.members.iter_mut().for_each(|m| *m = None);
                        let window = ctx.timing.double_press;
                        ctx.schedule(TimerKey::DoublePress { attempt: id }, window);
                        Transition::Advanced
                    }
                }
            }
            Kind::Sequence(seq) => {
                if seq.press != Some(press) {
                    return Transition::Ignored;
                }
                ctx.timers.cancel(TimerKey::LongPress { attempt: id });
                match ctx.trigger.keys[seq.step].click_type {
                    ClickType::ShortPress => seq.step_done(id, ctx),
                    ClickType::LongPress => Transition::Failed,
                    ClickType::DoublePress => {
                        seq.clicks += 1;
                        if seq.clicks >= 2 {
                            return seq.step_done(id, ctx);
                        }
                        seq.press = None;
                        let window = ctx.timing.double_press;
                        ctx.schedule(TimerKey::DoublePress { attempt: id }, window);
                        Transition::Advanced
                    }
                }
            }
        }
    }

    pub(crate) fn on_timer(&mut self, key: TimerKey, ctx: &mut Ctx<'_>) -> Transition {
        let id = self.id;
        match key {
            TimerKey::ChordWindow { .. }
            | TimerKey::DoublePress { .. }
            | TimerKey::SequenceStep { .. } => Transition::Failed,
            TimerKey::LongPress { .. } => match &mut self.kind {
                Kind::Chord(chord) => match (chord.phase, chord.click_type) {
                    (Phase::Held, ClickType::LongPress) => {
                        Transition::Completed(ClickType::LongPress)
                    }
                    (Phase::Held, ClickType::DoublePress) => Transition::Failed,
                    _ => Transition::Ignored,
                },
                Kind::Sequence(seq) => {
                    if seq.press.is_none() {
                        return Transition::Ignored;
                    }
                    match ctx.trigger.keys[seq.step].click_type {
                        ClickType::LongPress => seq.step_done(id, ctx),
                        ClickType::ShortPress | ClickType::DoublePress => Transition::Failed,
                    }
                }
            },
            TimerKey::ActionChain { .. } | TimerKey::Repeat { .. } => Transition::Ignored,
        }
    }
}

impl Sequence {
    fn step_done(&mut self, id: AttemptId, ctx: &mut Ctx<'_>) -> Transition {
        ctx.timers.cancel(TimerKey::DoublePress { attempt: id });
        let click_type = ctx.trigger.keys[self.step].click_type;
        self.last_press = self.press.take();
        self.clicks = 0;
        self.step += 1;
        if self.step == ctx.trigger.keys.len() {
            return Transition::Completed(click_type);
        }
        ctx.schedule(TimerKey::SequenceStep { attempt: id }, ctx.timing.sequence_timeout);
        Transition::Advanced
    }
}
