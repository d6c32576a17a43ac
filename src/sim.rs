//! Trace simulator.
//!
//! Replays a recorded trace of key events through the engine on a virtual
//! clock and reports everything the engine did: consumption decisions,
//! dispatched actions, replays and feedback. Traces are TOML:
//!
//! ```toml
//! [state]
//! screen_on = true
//!
//! [[event]]
//! at_ms = 0
//! key = "VolumeUp"
//! action = "down"
//!
//! [[event]]
//! at_ms = 600
//! evdev = 115
//! action = "up"
//! device = "gamepad-1"
//! ```
//!
//! Events without a `device` come from the internal device. Timers keep
//! running after the last event until `end_ms`, ten seconds past the last
//! event by default.
//! The `toggle_flashlight` action flips the back flashlight in the trace's
//! system state, so flashlight constraints can be exercised.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::config::Config;
use crate::constraints::{CameraLens, StaticSystemState, SystemStateGate};
use crate::engine::Engine;
use crate::error::TraceError;
use crate::keycode::KeyCode;
use crate::model::ActionData;
use crate::platform::evdev::{evdev_to_keycode, keycode_to_evdev};
use crate::platform::{
    ActionExecutor, Feedback, InputDevice, InputEventType, InputSource, KeyEvent, KeyState,
    PlatformError,
};

// ---------------------------------------------------------------------------
// Trace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceAction {
    Down,
    Up,
    /// The event's device went away.
    Disconnect,
}

/// One validated trace step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub at: Duration,
    pub key: Option<KeyCode>,
    pub action: TraceAction,
    /// Descriptor of an external device; `None` for the internal one.
    pub device: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub state: StaticSystemState,
    pub events: Vec<TraceEvent>,
    pub end: Option<Duration>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTrace {
    #[serde(default)]
    state: StaticSystemState,
    #[serde(default, rename = "event")]
    events: Vec<RawEvent>,
    end_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEvent {
    at_ms: u64,
    key: Option<KeyCode>,
    evdev: Option<u32>,
    action: TraceAction,
    device: Option<String>,
}

impl Trace {
    pub fn load(path: &Path) -> Result<Self, TraceError> {
        let text = fs::read_to_string(path).map_err(|source| TraceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, TraceError> {
        let raw: RawTrace = toml::from_str(text)?;
        let mut events = Vec::with_capacity(raw.events.len());
        let mut last = 0;
        for (index, e) in raw.events.into_iter().enumerate() {
            if e.at_ms < last {
                return Err(TraceError::OutOfOrder {
                    index,
                    at_ms: e.at_ms,
                });
            }
            last = e.at_ms;
            let key = match (e.action, e.key, e.evdev) {
                (TraceAction::Disconnect, None, None) => None,
                (TraceAction::Disconnect, _, _) => return Err(TraceError::AmbiguousKey { index }),
                (_, Some(key), None) => Some(key),
                (_, None, Some(code)) => Some(evdev_to_keycode(code)),
                _ => return Err(TraceError::AmbiguousKey { index }),
            };
            if e.action == TraceAction::Disconnect && e.device.is_none() {
                return Err(TraceError::MissingDevice { index });
            }
            events.push(TraceEvent {
                at: Duration::from_millis(e.at_ms),
                key,
                action: e.action,
                device: e.device,
            });
        }
        Ok(Self {
            state: raw.state,
            events,
            end: raw.end_ms.map(Duration::from_millis),
        })
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Something the engine did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// A physical event and whether the engine swallowed it.
    Event {
        key: KeyCode,
        state: KeyState,
        device: String,
        consumed: bool,
    },
    Disconnected(String),
    Dispatch {
        kind: String,
        event_type: InputEventType,
    },
    Replay {
        key: KeyCode,
        event_type: InputEventType,
    },
    Vibrate(Duration),
    Toast,
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Event {
                key,
                state,
                device,
                consumed,
            } => {
                let verdict = if *consumed { "consumed" } else { "passed" };
                write!(f, "{key} {state:?} on {device}: {verdict}")
            }
            Output::Disconnected(device) => write!(f, "{device} disconnected"),
            Output::Dispatch { kind, event_type } => write!(f, "perform {kind} ({event_type:?})"),
            Output::Replay { key, event_type } => {
                write!(f, "replay {key} ({event_type:?}, evdev {})", keycode_to_evdev(*key))
            }
            Output::Vibrate(duration) => write!(f, "vibrate {} ms", duration.as_millis()),
            Output::Toast => write!(f, "toast"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub at_ms: u64,
    pub output: Output,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>7} ms  {}", self.at_ms, self.output)
    }
}

/// Shared between the collaborators and the driver loop.
#[derive(Debug, Default, Clone)]
struct Recorder {
    clock_ms: Arc<AtomicU64>,
    records: Arc<Mutex<Vec<Record>>>,
}

impl Recorder {
    fn push(&self, output: Output) {
        let at_ms = self.clock_ms.load(Ordering::Relaxed);
        log::debug!("sim: {at_ms} ms: {output}");
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Record { at_ms, output });
    }

    fn take(&self) -> Vec<Record> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

struct TraceInput(Recorder);

impl InputSource for TraceInput {
    fn imitate_button_press(
        &self,
        key: KeyCode,
        _meta_state: u32,
        _device_id: i32,
        event_type: InputEventType,
        _scan_code: u32,
    ) -> Result<(), PlatformError> {
        self.0.push(Output::Replay { key, event_type });
        Ok(())
    }
}

struct TraceExecutor {
    recorder: Recorder,
    state: Arc<Mutex<StaticSystemState>>,
}

impl ActionExecutor for TraceExecutor {
    fn perform(
        &self,
        data: &ActionData,
        event_type: InputEventType,
        _meta_state: u32,
    ) -> Result<(), PlatformError> {
        self.recorder.push(Output::Dispatch {
            kind: data.kind.clone(),
            event_type,
        });
        if data.kind == "toggle_flashlight" && event_type != InputEventType::Up {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let on = state.flashlights.contains(&CameraLens::Back);
            state.set_flashlight(CameraLens::Back, !on);
        }
        Ok(())
    }
}

struct TraceFeedback(Recorder);

impl Feedback for TraceFeedback {
    fn vibrate(&self, duration: Duration) {
        self.0.push(Output::Vibrate(duration));
    }

    fn show_triggered_toast(&self) {
        self.0.push(Output::Toast);
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

const DEFAULT_TAIL: Duration = Duration::from_secs(10);

/// Device ids handed out to external descriptors, in order of appearance.
#[derive(Default)]
struct Devices {
    ids: HashMap<String, i32>,
}

impl Devices {
    fn get(&mut self, descriptor: Option<&str>) -> InputDevice {
        let Some(descriptor) = descriptor else {
            return InputDevice::internal();
        };
        let next = self.ids.len() as i32 + 1;
        let id = *self.ids.entry(descriptor.to_string()).or_insert(next);
        InputDevice::external(id, descriptor)
    }
}

/// Replays `trace` against `config` and returns what happened, in order.
pub fn run(config: Config, trace: &Trace) -> Vec<Record> {
    let recorder = Recorder::default();
    let state = Arc::new(Mutex::new(trace.state.clone()));
    let mut engine = Engine::new(
        Arc::new(config.into_store()),
        Box::new(TraceInput(recorder.clone())),
        Box::new(TraceExecutor {
            recorder: recorder.clone(),
            state: Arc::clone(&state),
        }),
        Box::new(SystemStateGate::new(state)),
    )
    .with_feedback(Box::new(TraceFeedback(recorder.clone())));

    let t0 = Instant::now();
    let mut devices = Devices::default();
    for event in &trace.events {
        let now = t0 + event.at;
        run_timers_until(&mut engine, &recorder, t0, now);
        recorder.clock_ms.store(millis(event.at), Ordering::Relaxed);

        let device = devices.get(event.device.as_deref());
        let (Some(key), Some(state)) = (event.key, key_state(event.action)) else {
            engine.on_device_disconnected(device.id, now);
            recorder.push(Output::Disconnected(device.descriptor));
            continue;
        };
        let consumed = engine.on_key_event(&KeyEvent::new(key, state, device.clone()), now);
        recorder.push(Output::Event {
            key,
            state,
            device: device.name,
            consumed,
        });
    }

    let last = trace.events.last().map_or(Duration::ZERO, |e| e.at);
    let end = trace.end.unwrap_or(last + DEFAULT_TAIL);
    run_timers_until(&mut engine, &recorder, t0, t0 + end);

    recorder.take()
}

fn key_state(action: TraceAction) -> Option<KeyState> {
    match action {
        TraceAction::Down => Some(KeyState::Down),
        TraceAction::Up => Some(KeyState::Up),
        TraceAction::Disconnect => None,
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Runs timers one deadline at a time so each output carries its own time.
fn run_timers_until(engine: &mut Engine, recorder: &Recorder, t0: Instant, until: Instant) {
    while let Some(at) = engine.next_deadline() {
        if at > until {
            break;
        }
        recorder
            .clock_ms
            .store(millis(at.saturating_duration_since(t0)), Ordering::Relaxed);
        engine.advance(at);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
