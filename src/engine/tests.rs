//! End-to-end engine scenarios against recording collaborators and a virtual
//! clock.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::Engine;
use crate::config::{Defaults, KeyMapStore};
use crate::constraints::{
    CameraLens, Constraint, ConstraintMode, ConstraintState, StaticSystemState, SystemStateGate,
};
use crate::keycode::{KeyCode, META_CTRL};
use crate::model::{
    ActionData, ClickType, DeviceFilter, HoldDownMode, KeyMap, KeyMapAction, KeyMapTrigger,
    RepeatMode, TriggerKey,
};
use crate::platform::InputEventType::{Down, DownUp, Up};
use crate::platform::{
    ActionExecutor, Feedback, InputDevice, InputEventType, InputSource, KeyEvent, KeyState,
    MotionEvent, PlatformError,
};

type Log<T> = Arc<Mutex<Vec<T>>>;

// ---------------------------------------------------------------------------
// Recording collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Replayed {
    key: KeyCode,
    meta_state: u32,
    device_id: i32,
    event_type: InputEventType,
    scan_code: u32,
}

struct Replays(Log<Replayed>);

impl InputSource for Replays {
    fn imitate_button_press(
        &self,
        key: KeyCode,
        meta_state: u32,
        device_id: i32,
        event_type: InputEventType,
        scan_code: u32,
    ) -> Result<(), PlatformError> {
        self.0.lock().unwrap().push(Replayed {
            key,
            meta_state,
            device_id,
            event_type,
            scan_code,
        });
        Ok(())
    }
}

/// Records dispatches. `toggle_flashlight` flips the back flashlight.
struct Actions {
    log: Log<(String, InputEventType)>,
    metas: Log<u32>,
    state: Arc<Mutex<StaticSystemState>>,
}

impl ActionExecutor for Actions {
    fn perform(
        &self,
        data: &ActionData,
        event_type: InputEventType,
        meta_state: u32,
    ) -> Result<(), PlatformError> {
        self.log.lock().unwrap().push((data.kind.clone(), event_type));
        self.metas.lock().unwrap().push(meta_state);
        if data.kind == "toggle_flashlight" && event_type != Up {
            let mut state = self.state.lock().unwrap();
            let on = state.flashlights.contains(&CameraLens::Back);
            state.set_flashlight(CameraLens::Back, !on);
        }
        Ok(())
    }
}

struct Feedbacks {
    vibrations: Log<Duration>,
    toasts: Arc<Mutex<u32>>,
}

impl Feedback for Feedbacks {
    fn vibrate(&self, duration: Duration) {
        self.vibrations.lock().unwrap().push(duration);
    }

    fn show_triggered_toast(&self) {
        *self.toasts.lock().unwrap() += 1;
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    engine: Engine,
    store: Arc<KeyMapStore>,
    replays: Log<Replayed>,
    actions: Log<(String, InputEventType)>,
    metas: Log<u32>,
    vibrations: Log<Duration>,
    toasts: Arc<Mutex<u32>>,
    state: Arc<Mutex<StaticSystemState>>,
    t0: Instant,
}

impl Harness {
    fn new(key_maps: Vec<KeyMap>) -> Self {
        Self::with_defaults(key_maps, Defaults::default())
    }

    fn with_defaults(key_maps: Vec<KeyMap>, defaults: Defaults) -> Self {
        let store = Arc::new(KeyMapStore::new(key_maps, defaults));
        let replays = Log::default();
        let actions = Log::default();
        let metas = Log::default();
        let vibrations = Log::default();
        let toasts = Arc::new(Mutex::new(0));
        let state = Arc::new(Mutex::new(StaticSystemState::default()));
        let engine = Engine::new(
            store.clone(),
            Box::new(Replays(replays.clone())),
            Box::new(Actions {
                log: actions.clone(),
                metas: metas.clone(),
                state: state.clone(),
            }),
            Box::new(SystemStateGate::new(state.clone())),
        )
        .with_feedback(Box::new(Feedbacks {
            vibrations: vibrations.clone(),
            toasts: toasts.clone(),
        }));
        Self {
            engine,
            store,
            replays,
            actions,
            metas,
            vibrations,
            toasts,
            state,
            t0: Instant::now(),
        }
    }

    fn at(&self, ms: u64) -> Instant {
        self.t0 + Duration::from_millis(ms)
    }

    fn down(&mut self, key: KeyCode, ms: u64) -> bool {
        let now = self.at(ms);
        self.engine.on_key_event(&KeyEvent::down(key), now)
    }

    fn up(&mut self, key: KeyCode, ms: u64) -> bool {
        let now = self.at(ms);
        self.engine.on_key_event(&KeyEvent::up(key), now)
    }

    fn event_on(&mut self, key: KeyCode, state: KeyState, device: InputDevice, ms: u64) -> bool {
        let now = self.at(ms);
        self.engine.on_key_event(&KeyEvent::new(key, state, device), now)
    }

    fn send(&mut self, event: KeyEvent, ms: u64) -> bool {
        let now = self.at(ms);
        self.engine.on_key_event(&event, now)
    }

    fn motion(&mut self, device: &InputDevice, hat_x: f32, hat_y: f32, ms: u64) -> bool {
        let now = self.at(ms);
        let event = MotionEvent::hat(device.clone(), hat_x, hat_y);
        self.engine.on_motion_event(&event, now)
    }

    fn advance(&mut self, ms: u64) {
        let now = self.at(ms);
        self.engine.advance(now);
    }

    fn actions(&self) -> Vec<(String, InputEventType)> {
        self.actions.lock().unwrap().clone()
    }

    fn replays(&self) -> Vec<(KeyCode, InputEventType)> {
        let replays = self.replays.lock().unwrap();
        replays.iter().map(|r| (r.key, r.event_type)).collect()
    }

    fn action_metas(&self) -> Vec<u32> {
        self.metas.lock().unwrap().clone()
    }

    fn vibrations(&self) -> Vec<Duration> {
        self.vibrations.lock().unwrap().clone()
    }
}

fn ev(kind: &str, event_type: InputEventType) -> (String, InputEventType) {
    (kind.to_string(), event_type)
}

fn action(kind: &str) -> KeyMapAction {
    KeyMapAction::new(ActionData::new(kind))
}

fn short(key: KeyCode) -> KeyMapTrigger {
    KeyMapTrigger::single(TriggerKey::new(key))
}

fn long(key: KeyCode) -> KeyMapTrigger {
    KeyMapTrigger::single(TriggerKey::new(key).with_click_type(ClickType::LongPress))
}

fn double(key: KeyCode) -> KeyMapTrigger {
    KeyMapTrigger::single(TriggerKey::new(key).with_click_type(ClickType::DoublePress))
}

fn flashlight_off() -> ConstraintState {
    ConstraintState::new(
        ConstraintMode::And,
        vec![Constraint::FlashlightOff {
            lens: CameraLens::Back,
        }],
    )
}

// ---------------------------------------------------------------------------
// Click types
// ---------------------------------------------------------------------------

#[test]
fn short_press_fires_once_and_swallows_both_events() {
    let mut h = Harness::new(vec![KeyMap::new(1, short(KeyCode::A), vec![action("a")])]);
    assert!(h.down(KeyCode::A, 0));
    assert!(h.up(KeyCode::A, 30));
    assert_eq!(h.actions(), vec![ev("a", DownUp)]);
    assert!(h.replays().is_empty());
    assert!(h.engine.is_idle());
}

#[test]
fn long_press_fires_while_held() {
    let mut h = Harness::new(vec![KeyMap::new(1, long(KeyCode::A), vec![action("a")])]);
    assert!(h.down(KeyCode::A, 0));
    h.advance(499);
    assert!(h.actions().is_empty());
    h.advance(500);
    assert_eq!(h.actions(), vec![ev("a", DownUp)]);
    assert!(h.up(KeyCode::A, 600));
    assert!(h.replays().is_empty());
}

#[test]
fn long_press_released_early_is_replayed() {
    let mut h = Harness::new(vec![KeyMap::new(1, long(KeyCode::A), vec![action("a")])]);
    assert!(h.down(KeyCode::A, 0));
    assert!(h.up(KeyCode::A, 100));
    assert_eq!(h.replays(), vec![(KeyCode::A, DownUp)]);
    h.advance(1000);
    assert!(h.actions().is_empty());
}

#[test]
fn short_and_long_on_same_key_release_early_fires_short() {
    let mut h = Harness::new(vec![
        KeyMap::new(1, short(KeyCode::A), vec![action("short")]),
        KeyMap::new(2, long(KeyCode::A), vec![action("long")]),
    ]);
    assert!(h.down(KeyCode::A, 0));
    assert!(h.actions().is_empty());
    assert!(h.up(KeyCode::A, 100));
    assert_eq!(h.actions(), vec![ev("short", DownUp)]);
    h.advance(1000);
    assert_eq!(h.actions().len(), 1);
    assert!(h.replays().is_empty());
}

#[test]
fn short_and_long_on_same_key_held_fires_long_only() {
    let mut h = Harness::new(vec![
        KeyMap::new(1, short(KeyCode::A), vec![action("short")]),
        KeyMap::new(2, long(KeyCode::A), vec![action("long")]),
    ]);
    assert!(h.down(KeyCode::A, 0));
    h.advance(500);
    assert_eq!(h.actions(), vec![ev("long", DownUp)]);
    assert!(h.up(KeyCode::A, 700));
    assert_eq!(h.actions().len(), 1);
    assert!(h.replays().is_empty());
}

#[test]
fn shortest_long_press_delay_wins() {
    let mut slow = long(KeyCode::A);
    slow.long_press_delay = Some(Duration::from_millis(1000));
    let mut h = Harness::new(vec![
        KeyMap::new(1, long(KeyCode::A), vec![action("fast")]),
        KeyMap::new(2, slow, vec![action("slow")]),
    ]);
    h.down(KeyCode::A, 0);
    h.advance(500);
    assert_eq!(h.actions(), vec![ev("fast", DownUp)]);
    h.advance(1500);
    h.up(KeyCode::A, 1600);
    assert_eq!(h.actions(), vec![ev("fast", DownUp)]);
}

#[test]
fn isolated_press_fires_short_once_double_window_closes() {
    let mut h = Harness::new(vec![
        KeyMap::new(1, short(KeyCode::A), vec![action("short")]),
        KeyMap::new(2, double(KeyCode::A), vec![action("double")]),
    ]);
    h.down(KeyCode::A, 0);
    h.up(KeyCode::A, 50);
    h.advance(349);
    assert!(h.actions().is_empty());
    h.advance(350);
    assert_eq!(h.actions(), vec![ev("short", DownUp)]);
    assert!(h.replays().is_empty());
}

#[test]
fn two_quick_presses_fire_double_only() {
    let mut h = Harness::new(vec![
        KeyMap::new(1, short(KeyCode::A), vec![action("short")]),
        KeyMap::new(2, double(KeyCode::A), vec![action("double")]),
    ]);
    assert!(h.down(KeyCode::A, 0));
    assert!(h.up(KeyCode::A, 50));
    assert!(h.down(KeyCode::A, 100));
    assert!(h.up(KeyCode::A, 150));
    assert_eq!(h.actions(), vec![ev("double", DownUp)]);
    h.advance(1000);
    assert_eq!(h.actions(), vec![ev("double", DownUp)]);
    assert!(h.replays().is_empty());
}

// ---------------------------------------------------------------------------
// Overlapping triggers
// ---------------------------------------------------------------------------

fn single_and_chord() -> Vec<KeyMap> {
    vec![
        KeyMap::new(1, short(KeyCode::A), vec![action("t1")]),
        KeyMap::new(
            2,
            KeyMapTrigger::parallel(
                ClickType::ShortPress,
                vec![TriggerKey::new(KeyCode::A), TriggerKey::new(KeyCode::B)],
            ),
            vec![action("t2")],
        ),
    ]
}

#[test]
fn lone_key_fires_single_trigger_on_release() {
    let mut h = Harness::new(single_and_chord());
    assert!(h.down(KeyCode::A, 0));
    assert!(h.actions().is_empty());
    assert!(h.up(KeyCode::A, 100));
    assert_eq!(h.actions(), vec![ev("t1", DownUp)]);
}

#[test]
fn chord_suppresses_its_single_key_subset() {
    let mut h = Harness::new(single_and_chord());
    assert!(h.down(KeyCode::A, 0));
    assert!(h.down(KeyCode::B, 50));
    assert_eq!(h.actions(), vec![ev("t2", DownUp)]);
    assert!(h.up(KeyCode::A, 100));
    assert!(h.up(KeyCode::B, 120));
    h.advance(2000);
    assert_eq!(h.actions(), vec![ev("t2", DownUp)]);
    assert!(h.replays().is_empty());
}

fn two_sequences() -> Vec<KeyMap> {
    vec![
        KeyMap::new(
            1,
            KeyMapTrigger::sequence(vec![TriggerKey::new(KeyCode::A), TriggerKey::new(KeyCode::B)]),
            vec![action("ab")],
        ),
        KeyMap::new(
            2,
            KeyMapTrigger::sequence(vec![
                TriggerKey::new(KeyCode::A),
                TriggerKey::new(KeyCode::B),
                TriggerKey::new(KeyCode::C),
            ]),
            vec![action("abc")],
        ),
    ]
}

#[test]
fn longer_sequence_wins_when_completed() {
    let mut h = Harness::new(two_sequences());
    for (i, key) in [KeyCode::A, KeyCode::B, KeyCode::C].into_iter().enumerate() {
        let t = i as u64 * 100;
        assert!(h.down(key, t));
        assert!(h.up(key, t + 50));
    }
    assert_eq!(h.actions(), vec![ev("abc", DownUp)]);
    h.advance(3000);
    assert_eq!(h.actions(), vec![ev("abc", DownUp)]);
    assert!(h.replays().is_empty());
}

#[test]
fn shorter_sequence_fires_when_longer_times_out() {
    let mut h = Harness::new(two_sequences());
    h.down(KeyCode::A, 0);
    h.up(KeyCode::A, 50);
    h.down(KeyCode::B, 100);
    h.up(KeyCode::B, 150);
    h.advance(1149);
    assert!(h.actions().is_empty());
    h.advance(1150);
    assert_eq!(h.actions(), vec![ev("ab", DownUp)]);
    assert!(h.replays().is_empty());
}

#[test]
fn failed_chord_replays_presses_in_order() {
    let chord = KeyMapTrigger::parallel(
        ClickType::LongPress,
        vec![TriggerKey::new(KeyCode::A), TriggerKey::new(KeyCode::B)],
    );
    let mut h = Harness::new(vec![KeyMap::new(1, chord, vec![action("ab")])]);
    assert!(h.down(KeyCode::A, 0));
    assert!(h.down(KeyCode::B, 20));
    assert!(h.up(KeyCode::B, 100));
    assert_eq!(h.replays(), vec![(KeyCode::A, Down), (KeyCode::B, DownUp)]);
    // A's down went through, so its up must too.
    assert!(!h.up(KeyCode::A, 150));
    assert!(h.actions().is_empty());
}

#[test]
fn unrelated_triggers_held_together_each_fire() {
    let mut h = Harness::new(vec![
        KeyMap::new(1, long(KeyCode::A), vec![action("la")]),
        KeyMap::new(2, long(KeyCode::B), vec![action("lb")]),
        KeyMap::new(3, short(KeyCode::C), vec![action("sc")]),
    ]);
    assert!(h.down(KeyCode::A, 0));
    assert!(h.down(KeyCode::B, 10));
    assert!(h.down(KeyCode::C, 20));
    assert_eq!(h.actions(), vec![ev("sc", DownUp)]);
    h.advance(500);
    assert_eq!(h.actions(), vec![ev("sc", DownUp), ev("la", DownUp)]);
    h.advance(510);
    assert!(h.up(KeyCode::C, 600));
    assert!(h.up(KeyCode::B, 610));
    assert!(h.up(KeyCode::A, 620));
    assert_eq!(h.actions(), vec![ev("sc", DownUp), ev("la", DownUp), ev("lb", DownUp)]);
    assert!(h.replays().is_empty());
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[test]
fn repeat_until_limit_dispatches_limit_plus_one() {
    let repeating = action("r").with_repeat(RepeatMode::UntilLimitReached, Some(3));
    let mut h = Harness::new(vec![KeyMap::new(1, short(KeyCode::A), vec![repeating])]);
    h.down(KeyCode::A, 0);
    h.up(KeyCode::A, 30);
    h.advance(2000);
    assert_eq!(h.actions(), vec![ev("r", DownUp); 4]);
    assert!(h.engine.is_idle());
}

#[test]
fn repeat_until_released_stops_when_key_goes_up() {
    let repeating = action("r").with_repeat(RepeatMode::UntilReleased, None);
    let mut h = Harness::new(vec![KeyMap::new(1, long(KeyCode::A), vec![repeating])]);
    h.down(KeyCode::A, 0);
    h.advance(500);
    assert_eq!(h.actions().len(), 1);
    // First repeat after the repeat delay, then one per repeat rate.
    h.advance(1000);
    assert_eq!(h.actions(), vec![ev("r", DownUp); 4]);

    assert!(h.up(KeyCode::A, 1010));
    h.advance(3000);
    assert_eq!(h.actions().len(), 4);
    assert!(h.engine.is_idle());
}

#[test]
fn hold_down_until_pressed_again_toggles() {
    let held = action("h").with_hold_down(HoldDownMode::UntilPressedAgain);
    let mut h = Harness::new(vec![KeyMap::new(1, short(KeyCode::A), vec![held])]);
    h.down(KeyCode::A, 0);
    h.up(KeyCode::A, 30);
    assert_eq!(h.actions(), vec![ev("h", Down)]);
    assert!(!h.engine.is_idle());
    h.down(KeyCode::A, 100);
    h.up(KeyCode::A, 130);
    assert_eq!(h.actions(), vec![ev("h", Down), ev("h", Up)]);
    assert!(h.engine.is_idle());
}

#[test]
fn chord_hold_down_releases_once() {
    let chord = KeyMapTrigger::parallel(
        ClickType::LongPress,
        vec![TriggerKey::new(KeyCode::A), TriggerKey::new(KeyCode::B)],
    );
    let held = action("h").with_hold_down(HoldDownMode::UntilReleased);
    let mut h = Harness::new(vec![KeyMap::new(1, chord, vec![held])]);
    h.down(KeyCode::A, 0);
    h.down(KeyCode::B, 20);
    h.advance(520);
    assert_eq!(h.actions(), vec![ev("h", Down)]);
    h.up(KeyCode::A, 600);
    h.up(KeyCode::B, 620);
    assert_eq!(h.actions(), vec![ev("h", Down), ev("h", Up)]);
}

// ---------------------------------------------------------------------------
// Constraints
// ---------------------------------------------------------------------------

#[test]
fn action_changing_state_blocks_next_fire() {
    let km = KeyMap::new(1, short(KeyCode::A), vec![action("toggle_flashlight")])
        .with_constraints(flashlight_off());
    let mut h = Harness::new(vec![km]);
    assert!(h.down(KeyCode::A, 0));
    assert!(h.up(KeyCode::A, 30));
    assert!(h.state.lock().unwrap().flashlights.contains(&CameraLens::Back));

    assert!(!h.down(KeyCode::A, 100));
    assert!(!h.up(KeyCode::A, 130));
    assert_eq!(h.actions().len(), 1);
}

#[test]
fn constraint_failing_at_fire_time_replays_held_press() {
    let km = KeyMap::new(1, long(KeyCode::A), vec![action("a")]).with_constraints(flashlight_off());
    let mut h = Harness::new(vec![km]);
    assert!(h.down(KeyCode::A, 0));
    h.state.lock().unwrap().set_flashlight(CameraLens::Back, true);
    h.advance(500);
    assert!(h.actions().is_empty());
    assert_eq!(h.replays(), vec![(KeyCode::A, Down)]);
    assert!(!h.up(KeyCode::A, 600));
}

// ---------------------------------------------------------------------------
// Events and devices
// ---------------------------------------------------------------------------

#[test]
fn auto_repeat_repeats_the_first_decision() {
    let mut h = Harness::new(vec![KeyMap::new(1, short(KeyCode::A), vec![action("a")])]);
    assert!(h.down(KeyCode::A, 0));
    assert!(h.down(KeyCode::A, 50));
    assert!(h.down(KeyCode::A, 100));
    assert!(h.up(KeyCode::A, 150));
    assert_eq!(h.actions().len(), 1);

    assert!(!h.down(KeyCode::B, 200));
    assert!(!h.down(KeyCode::B, 250));
    assert!(!h.up(KeyCode::B, 300));
}

#[test]
fn replay_keeps_meta_state_device_and_scan_code() {
    let mut h = Harness::new(vec![KeyMap::new(1, long(KeyCode::A), vec![action("a")])]);
    let pad = InputDevice::external(3, "keyboard");
    let mut down = KeyEvent::new(KeyCode::A, KeyState::Down, pad.clone());
    down.meta_state = 0x41;
    down.scan_code = 30;
    let mut up = down.clone();
    up.state = KeyState::Up;

    assert!(h.send(down, 0));
    assert!(h.send(up, 100));
    assert_eq!(
        *h.replays.lock().unwrap(),
        vec![Replayed {
            key: KeyCode::A,
            meta_state: 0x41,
            device_id: 3,
            event_type: DownUp,
            scan_code: 30,
        }]
    );
}

fn ctrl_chord(consume_ctrl: bool) -> Vec<KeyMap> {
    let chord = KeyMapTrigger::parallel(
        ClickType::ShortPress,
        vec![
            TriggerKey::new(KeyCode::Ctrl).with_consume(consume_ctrl),
            TriggerKey::new(KeyCode::VolumeUp),
        ],
    );
    vec![KeyMap::new(1, chord, vec![action("chord")])]
}

fn with_meta(key: KeyCode, state: KeyState, meta_state: u32) -> KeyEvent {
    let mut event = KeyEvent::new(key, state, InputDevice::internal());
    event.meta_state = meta_state;
    event
}

#[test]
fn swallowed_modifier_is_stripped_from_action_meta_state() {
    let mut h = Harness::new(ctrl_chord(true));
    assert!(h.send(with_meta(KeyCode::Ctrl, KeyState::Down, 0x3000), 0));
    assert!(h.send(with_meta(KeyCode::VolumeUp, KeyState::Down, 0x3041), 20));
    assert_eq!(h.actions(), vec![ev("chord", DownUp)]);
    assert_eq!(h.action_metas(), vec![0x41]);
}

#[test]
fn passed_through_modifier_stays_in_action_meta_state() {
    let mut h = Harness::new(ctrl_chord(false));
    assert!(!h.send(with_meta(KeyCode::Ctrl, KeyState::Down, 0x3000), 0));
    assert!(h.send(with_meta(KeyCode::VolumeUp, KeyState::Down, 0x3041), 20));
    assert_eq!(h.action_metas(), vec![0x3041]);
}

#[test]
fn swallowed_modifier_is_stripped_from_replays() {
    let chord = KeyMapTrigger::parallel(
        ClickType::LongPress,
        vec![TriggerKey::new(KeyCode::Ctrl), TriggerKey::new(KeyCode::A)],
    );
    let mut h = Harness::new(vec![
        KeyMap::new(1, chord, vec![action("chord")]),
        KeyMap::new(2, long(KeyCode::B), vec![action("b")]),
    ]);
    assert!(h.send(with_meta(KeyCode::Ctrl, KeyState::Down, 0x3000), 0));
    assert!(h.send(with_meta(KeyCode::A, KeyState::Down, 0x3000), 10));
    h.advance(510);
    assert_eq!(h.actions(), vec![ev("chord", DownUp)]);
    assert_eq!(h.action_metas(), vec![0]);

    // Ctrl is still held, but its down never reached the system.
    assert!(h.send(with_meta(KeyCode::B, KeyState::Down, 0x3000), 600));
    assert!(h.send(with_meta(KeyCode::B, KeyState::Up, 0x3000), 650));
    let replays = h.replays.lock().unwrap().clone();
    assert_eq!(replays.len(), 1);
    assert_eq!((replays[0].key, replays[0].event_type), (KeyCode::B, DownUp));
    assert_eq!(replays[0].meta_state & META_CTRL, 0);
}

#[test]
fn unconsumed_key_passes_through_but_fires() {
    let key = TriggerKey::new(KeyCode::A).with_consume(false);
    let mut h = Harness::new(vec![KeyMap::new(1, KeyMapTrigger::single(key), vec![action("a")])]);
    assert!(!h.down(KeyCode::A, 0));
    assert!(!h.up(KeyCode::A, 30));
    assert_eq!(h.actions(), vec![ev("a", DownUp)]);
    assert!(h.replays().is_empty());
}

#[test]
fn device_filter_ignores_other_devices() {
    let key = TriggerKey::new(KeyCode::A).with_device(DeviceFilter::External("pad".into()));
    let mut h = Harness::new(vec![KeyMap::new(1, KeyMapTrigger::single(key), vec![action("a")])]);
    assert!(!h.down(KeyCode::A, 0));
    assert!(!h.up(KeyCode::A, 30));
    assert!(h.actions().is_empty());

    let pad = InputDevice::external(4, "pad");
    assert!(h.event_on(KeyCode::A, KeyState::Down, pad.clone(), 100));
    assert!(h.event_on(KeyCode::A, KeyState::Up, pad, 130));
    assert_eq!(h.actions(), vec![ev("a", DownUp)]);
}

#[test]
fn disconnected_device_drops_its_presses() {
    let mut h = Harness::new(vec![KeyMap::new(1, long(KeyCode::A), vec![action("a")])]);
    let pad = InputDevice::external(4, "pad");
    assert!(h.event_on(KeyCode::A, KeyState::Down, pad.clone(), 0));
    let now = h.at(100);
    h.engine.on_device_disconnected(4, now);
    h.advance(1000);
    assert!(h.actions().is_empty());
    assert!(h.replays().is_empty());
    assert!(h.engine.is_idle());
    assert!(!h.event_on(KeyCode::A, KeyState::Up, pad, 1100));
}

#[test]
fn dpad_motion_drives_triggers_and_swallows_duplicate_keys() {
    let mut h = Harness::new(vec![KeyMap::new(1, short(KeyCode::DpadLeft), vec![action("left")])]);
    let pad = InputDevice::external(2, "controller");
    assert!(h.motion(&pad, -1.0, 0.0, 0));
    assert_eq!(h.actions(), vec![ev("left", DownUp)]);
    // The controller reports the same press as a key event too.
    assert!(h.event_on(KeyCode::DpadLeft, KeyState::Down, pad.clone(), 1));

    assert!(h.motion(&pad, 0.0, 0.0, 40));
    assert!(!h.event_on(KeyCode::DpadLeft, KeyState::Up, pad, 41));
    assert_eq!(h.actions(), vec![ev("left", DownUp)]);
    assert!(h.replays().is_empty());
}

#[test]
fn dpad_motion_without_trigger_passes_through() {
    let mut h = Harness::new(vec![KeyMap::new(1, short(KeyCode::DpadUp), vec![action("up")])]);
    let pad = InputDevice::external(2, "controller");
    assert!(!h.motion(&pad, 1.0, 0.0, 0));
    assert!(!h.motion(&pad, 0.0, 0.0, 50));
    assert!(h.actions().is_empty());
}

// ---------------------------------------------------------------------------
// Reset and reconfiguration
// ---------------------------------------------------------------------------

#[test]
fn reset_mid_press_neither_fires_nor_replays() {
    let mut h = Harness::new(vec![KeyMap::new(1, long(KeyCode::A), vec![action("a")])]);
    assert!(h.down(KeyCode::A, 0));
    h.engine.reset();
    h.advance(1000);
    assert!(h.actions().is_empty());
    assert!(h.replays().is_empty());
    assert!(h.up(KeyCode::A, 1100));
    assert!(h.engine.is_idle());
}

#[test]
fn config_change_releases_held_actions() {
    let held = action("h").with_hold_down(HoldDownMode::UntilPressedAgain);
    let mut h = Harness::new(vec![KeyMap::new(1, short(KeyCode::A), vec![held])]);
    h.down(KeyCode::A, 0);
    h.up(KeyCode::A, 30);
    h.store.replace_key_maps(Vec::new());
    h.advance(100);
    assert_eq!(h.actions(), vec![ev("h", Down), ev("h", Up)]);
    assert!(!h.down(KeyCode::A, 200));
    assert!(!h.up(KeyCode::A, 230));
}

// ---------------------------------------------------------------------------
// Feedback
// ---------------------------------------------------------------------------

#[test]
fn vibrates_and_shows_toast_on_fire() {
    let mut trigger = short(KeyCode::A);
    trigger.vibrate = true;
    trigger.vibrate_duration = Some(Duration::from_millis(80));
    trigger.show_toast = true;
    let mut h = Harness::new(vec![KeyMap::new(1, trigger, vec![action("a")])]);
    h.down(KeyCode::A, 0);
    assert_eq!(h.vibrations(), vec![Duration::from_millis(80)]);
    assert_eq!(*h.toasts.lock().unwrap(), 1);
}

#[test]
fn long_press_double_vibration_buzzes_on_detection_and_fire() {
    let mut trigger = long(KeyCode::A);
    trigger.vibrate = true;
    trigger.long_press_double_vibration = true;
    let mut h = Harness::new(vec![KeyMap::new(1, trigger, vec![action("a")])]);
    h.down(KeyCode::A, 0);
    assert!(h.vibrations().is_empty());
    h.advance(500);
    assert_eq!(h.vibrations(), vec![Duration::from_millis(200); 2]);
}

#[test]
fn forced_vibration_uses_default_duration() {
    let defaults = Defaults {
        force_vibrate: true,
        vibrate_duration: Duration::from_millis(120),
        ..Defaults::default()
    };
    let mut h = Harness::with_defaults(
        vec![KeyMap::new(1, short(KeyCode::A), vec![action("a")])],
        defaults,
    );
    h.down(KeyCode::A, 0);
    assert_eq!(h.vibrations(), vec![Duration::from_millis(120)]);
    assert_eq!(*h.toasts.lock().unwrap(), 0);
}
