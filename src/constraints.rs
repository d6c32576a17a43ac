//! Constraint gate.
//!
//! A key map may carry a set of constraints that must hold for it to fire. The
//! engine asks a `ConstraintGateProvider` for a fresh `ConstraintSnapshot`
//! whenever it needs a decision and evaluates the set against it.
//!
//! `LazyConstraintSnapshot` is the stock snapshot: it reads a `SystemState`
//! field on first access and caches it for the snapshot's lifetime, so a
//! decision that only needs the screen state never queries Bluetooth.

use std::cell::OnceCell;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constraint catalogue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraLens {
    #[default]
    Back,
    Front,
}

/// Screen rotation in degrees clockwise from natural portrait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Rotation0,
    Rotation90,
    Rotation180,
    Rotation270,
}

impl Orientation {
    pub fn is_portrait(self) -> bool {
        matches!(self, Orientation::Rotation0 | Orientation::Rotation180)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    #[default]
    None,
    Ringing,
    InCall,
}

/// A single condition on system state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    AppInForeground { package: String },
    AppNotInForeground { package: String },
    AppPlayingMedia { package: String },
    AppNotPlayingMedia { package: String },
    MediaPlaying,
    NoMediaPlaying,
    BtDeviceConnected { address: String },
    BtDeviceDisconnected { address: String },
    ScreenOn,
    ScreenOff,
    OrientationPortrait,
    OrientationLandscape,
    Orientation { orientation: Orientation },
    FlashlightOn {
        #[serde(default)]
        lens: CameraLens,
    },
    FlashlightOff {
        #[serde(default)]
        lens: CameraLens,
    },
    WifiOn,
    WifiOff,
    WifiConnected {
        #[serde(default)]
        ssid: Option<String>,
    },
    WifiDisconnected {
        #[serde(default)]
        ssid: Option<String>,
    },
    ImeChosen { ime: String },
    ImeNotChosen { ime: String },
    DeviceLocked,
    DeviceUnlocked,
    LockScreenShowing,
    LockScreenNotShowing,
    InPhoneCall,
    NotInPhoneCall,
    PhoneRinging,
    Charging,
    Discharging,
    /// Local time of day within `[start, end)`, wrapping past midnight when
    /// `start > end`.
    Time { start: NaiveTime, end: NaiveTime },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintMode {
    #[default]
    And,
    Or,
}

/// The constraints attached to a key map and how they combine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConstraintState {
    #[serde(default, rename = "list")]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub mode: ConstraintMode,
}

impl ConstraintState {
    pub fn new(mode: ConstraintMode, constraints: Vec<Constraint>) -> Self {
        Self { constraints, mode }
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Gate interfaces
// ---------------------------------------------------------------------------

/// A point-in-time view of system state.
pub trait ConstraintSnapshot {
    fn is_satisfied(&self, constraint: &Constraint) -> bool;

    /// Evaluates a whole set. An empty set passes in either mode.
    fn is_state_satisfied(&self, state: &ConstraintState) -> bool {
        if state.constraints.is_empty() {
            return true;
        }
        match state.mode {
            ConstraintMode::And => state.constraints.iter().all(|c| self.is_satisfied(c)),
            ConstraintMode::Or => state.constraints.iter().any(|c| self.is_satisfied(c)),
        }
    }
}

/// Hands out fresh snapshots to the engine.
pub trait ConstraintGateProvider: Send {
    fn snapshot(&self) -> Box<dyn ConstraintSnapshot + '_>;
}

/// Gate that accepts everything. Used when no system state is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysSatisfied;

impl ConstraintSnapshot for AlwaysSatisfied {
    fn is_satisfied(&self, _constraint: &Constraint) -> bool {
        true
    }
}

impl ConstraintGateProvider for AlwaysSatisfied {
    fn snapshot(&self) -> Box<dyn ConstraintSnapshot + '_> {
        Box::new(AlwaysSatisfied)
    }
}

// ---------------------------------------------------------------------------
// System state
// ---------------------------------------------------------------------------

/// Raw system queries backing `LazyConstraintSnapshot`.
pub trait SystemState {
    fn foreground_app(&self) -> Option<String>;
    fn apps_playing_media(&self) -> Vec<String>;
    fn connected_bluetooth_devices(&self) -> Vec<String>;
    fn is_screen_on(&self) -> bool;
    fn orientation(&self) -> Orientation;
    fn lit_flashlights(&self) -> Vec<CameraLens>;
    fn is_wifi_enabled(&self) -> bool;
    fn connected_wifi_ssid(&self) -> Option<String>;
    fn chosen_ime(&self) -> Option<String>;
    fn is_locked(&self) -> bool;
    fn is_lock_screen_showing(&self) -> bool;
    fn call_state(&self) -> CallState;
    fn is_charging(&self) -> bool;
    fn local_time(&self) -> NaiveTime;
}

/// Plain-data system state. Deserializable so fixed states can be described
/// in TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticSystemState {
    pub foreground_app: Option<String>,
    pub apps_playing_media: Vec<String>,
    pub bluetooth_devices: Vec<String>,
    pub screen_on: bool,
    pub orientation: Orientation,
    pub flashlights: Vec<CameraLens>,
    pub wifi_enabled: bool,
    pub wifi_ssid: Option<String>,
    pub ime: Option<String>,
    pub locked: bool,
    pub lock_screen_showing: bool,
    pub call_state: CallState,
    pub charging: bool,
    /// Fixed time of day; the local clock when unset.
    pub time: Option<NaiveTime>,
}

impl Default for StaticSystemState {
    fn default() -> Self {
        Self {
            foreground_app: None,
            apps_playing_media: Vec::new(),
            bluetooth_devices: Vec::new(),
            screen_on: true,
            orientation: Orientation::Rotation0,
            flashlights: Vec::new(),
            wifi_enabled: false,
            wifi_ssid: None,
            ime: None,
            locked: false,
            lock_screen_showing: false,
            call_state: CallState::None,
            charging: false,
            time: None,
        }
    }
}

impl StaticSystemState {
    pub fn set_flashlight(&mut self, lens: CameraLens, on: bool) {
        self.flashlights.retain(|l| *l != lens);
        if on {
            self.flashlights.push(lens);
        }
    }
}

impl SystemState for StaticSystemState {
    fn foreground_app(&self) -> Option<String> {
        self.foreground_app.clone()
    }
    fn apps_playing_media(&self) -> Vec<String> {
        self.apps_playing_media.clone()
    }
    fn connected_bluetooth_devices(&self) -> Vec<String> {
        self.bluetooth_devices.clone()
    }
    fn is_screen_on(&self) -> bool {
        self.screen_on
    }
    fn orientation(&self) -> Orientation {
        self.orientation
    }
    fn lit_flashlights(&self) -> Vec<CameraLens> {
        self.flashlights.clone()
    }
    fn is_wifi_enabled(&self) -> bool {
        self.wifi_enabled
    }
    fn connected_wifi_ssid(&self) -> Option<String> {
        self.wifi_ssid.clone()
    }
    fn chosen_ime(&self) -> Option<String> {
        self.ime.clone()
    }
    fn is_locked(&self) -> bool {
        self.locked
    }
    fn is_lock_screen_showing(&self) -> bool {
        self.lock_screen_showing
    }
    fn call_state(&self) -> CallState {
        self.call_state
    }
    fn is_charging(&self) -> bool {
        self.charging
    }
    fn local_time(&self) -> NaiveTime {
        self.time.unwrap_or_else(|| chrono::Local::now().time())
    }
}

impl<S: SystemState + ?Sized> SystemState for Mutex<S> {
    fn foreground_app(&self) -> Option<String> {
        self.lock().unwrap_or_else(PoisonError::into_inner).foreground_app()
    }
    fn apps_playing_media(&self) -> Vec<String> {
        self.lock().unwrap_or_else(PoisonError::into_inner).apps_playing_media()
    }
    fn connected_bluetooth_devices(&self) -> Vec<String> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .connected_bluetooth_devices()
    }
    fn is_screen_on(&self) -> bool {
        self.lock().unwrap_or_else(PoisonError::into_inner).is_screen_on()
    }
    fn orientation(&self) -> Orientation {
        self.lock().unwrap_or_else(PoisonError::into_inner).orientation()
    }
    fn lit_flashlights(&self) -> Vec<CameraLens> {
        self.lock().unwrap_or_else(PoisonError::into_inner).lit_flashlights()
    }
    fn is_wifi_enabled(&self) -> bool {
        self.lock().unwrap_or_else(PoisonError::into_inner).is_wifi_enabled()
    }
    fn connected_wifi_ssid(&self) -> Option<String> {
        self.lock().unwrap_or_else(PoisonError::into_inner).connected_wifi_ssid()
    }
    fn chosen_ime(&self) -> Option<String> {
        self.lock().unwrap_or_else(PoisonError::into_inner).chosen_ime()
    }
    fn is_locked(&self) -> bool {
        self.lock().unwrap_or_else(PoisonError::into_inner).is_locked()
    }
    fn is_lock_screen_showing(&self) -> bool {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_lock_screen_showing()
    }
    fn call_state(&self) -> CallState {
        self.lock().unwrap_or_else(PoisonError::into_inner).call_state()
    }
    fn is_charging(&self) -> bool {
        self.lock().unwrap_or_else(PoisonError::into_inner).is_charging()
    }
    fn local_time(&self) -> NaiveTime {
        self.lock().unwrap_or_else(PoisonError::into_inner).local_time()
    }
}

impl<S: SystemState + ?Sized> SystemState for Arc<S> {
    fn foreground_app(&self) -> Option<String> {
        (**self).foreground_app()
    }
    fn apps_playing_media(&self) -> Vec<String> {
        (**self).apps_playing_media()
    }
    fn connected_bluetooth_devices(&self) -> Vec<String> {
        (**self).connected_bluetooth_devices()
    }
    fn is_screen_on(&self) -> bool {
        (**self).is_screen_on()
    }
    fn orientation(&self) -> Orientation {
        (**self).orientation()
    }
    fn lit_flashlights(&self) -> Vec<CameraLens> {
        (**self).lit_flashlights()
    }
    fn is_wifi_enabled(&self) -> bool {
        (**self).is_wifi_enabled()
    }
    fn connected_wifi_ssid(&self) -> Option<String> {
        (**self).connected_wifi_ssid()
    }
    fn chosen_ime(&self) -> Option<String> {
        (**self).chosen_ime()
    }
    fn is_locked(&self) -> bool {
        (**self).is_locked()
    }
    fn is_lock_screen_showing(&self) -> bool {
        (**self).is_lock_screen_showing()
    }
    fn call_state(&self) -> CallState {
        (**self).call_state()
    }
    fn is_charging(&self) -> bool {
        (**self).is_charging()
    }
    fn local_time(&self) -> NaiveTime {
        (**self).local_time()
    }
}

// ---------------------------------------------------------------------------
// Lazy snapshot
// ---------------------------------------------------------------------------

/// Snapshot that queries each piece of system state at most once.
pub struct LazyConstraintSnapshot<'a, S: SystemState + ?Sized> {
    state: &'a S,
    foreground_app: OnceCell<Option<String>>,
    apps_playing_media: OnceCell<Vec<String>>,
    bluetooth_devices: OnceCell<Vec<String>>,
    screen_on: OnceCell<bool>,
    orientation: OnceCell<Orientation>,
    flashlights: OnceCell<Vec<CameraLens>>,
    wifi_enabled: OnceCell<bool>,
    wifi_ssid: OnceCell<Option<String>>,
    ime: OnceCell<Option<String>>,
    locked: OnceCell<bool>,
    lock_screen_showing: OnceCell<bool>,
    call_state: OnceCell<CallState>,
    charging: OnceCell<bool>,
    time: OnceCell<NaiveTime>,
}

impl<'a, S: SystemState + ?Sized> LazyConstraintSnapshot<'a, S> {
    pub fn new(state: &'a S) -> Self {
        Self {
            state,
            foreground_app: OnceCell::new(),
            apps_playing_media: OnceCell::new(),
            bluetooth_devices: OnceCell::new(),
            screen_on: OnceCell::new(),
            orientation: OnceCell::new(),
            flashlights: OnceCell::new(),
            wifi_enabled: OnceCell::new(),
            wifi_ssid: OnceCell::new(),
            ime: OnceCell::new(),
            locked: OnceCell::new(),
            lock_screen_showing: OnceCell::new(),
            call_state: OnceCell::new(),
            charging: OnceCell::new(),
            time: OnceCell::new(),
        }
    }

    fn foreground_app(&self) -> Option<&str> {
        self.foreground_app
            .get_or_init(|| self.state.foreground_app())
            .as_deref()
    }

    fn apps_playing_media(&self) -> &[String] {
        self.apps_playing_media
            .get_or_init(|| self.state.apps_playing_media())
    }

    fn bluetooth_devices(&self) -> &[String] {
        self.bluetooth_devices
            .get_or_init(|| self.state.connected_bluetooth_devices())
    }

    fn screen_on(&self) -> bool {
        *self.screen_on.get_or_init(|| self.state.is_screen_on())
    }

    fn orientation(&self) -> Orientation {
        *self.orientation.get_or_init(|| self.state.orientation())
    }

    fn flashlight_on(&self, lens: CameraLens) -> bool {
        self.flashlights
            .get_or_init(|| self.state.lit_flashlights())
            .contains(&lens)
    }

    fn wifi_enabled(&self) -> bool {
        *self.wifi_enabled.get_or_init(|| self.state.is_wifi_enabled())
    }

    fn wifi_ssid(&self) -> Option<&str> {
        self.wifi_ssid
            .get_or_init(|| self.state.connected_wifi_ssid())
            .as_deref()
    }

    fn ime(&self) -> Option<&str> {
        self.ime.get_or_init(|| self.state.chosen_ime()).as_deref()
    }

    fn locked(&self) -> bool {
        *self.locked.get_or_init(|| self.state.is_locked())
    }

    fn lock_screen_showing(&self) -> bool {
        *self
            .lock_screen_showing
            .get_or_init(|| self.state.is_lock_screen_showing())
    }

    fn call_state(&self) -> CallState {
        *self.call_state.get_or_init(|| self.state.call_state())
    }

    fn charging(&self) -> bool {
        *self.charging.get_or_init(|| self.state.is_charging())
    }

    fn time(&self) -> NaiveTime {
        *self.time.get_or_init(|| self.state.local_time())
    }
}

impl<S: SystemState + ?Sized> ConstraintSnapshot for LazyConstraintSnapshot<'_, S> {
    fn is_satisfied(&self, constraint: &Constraint) -> bool {
        match constraint {
            Constraint::AppInForeground { package } => {
                self.foreground_app() == Some(package.as_str())
            }
            Constraint::AppNotInForeground { package } => {
                self.foreground_app() != Some(package.as_str())
            }
            Constraint::AppPlayingMedia { package } => {
                self.apps_playing_media().contains(package)
            }
            Constraint::AppNotPlayingMedia { package } => {
                !self.apps_playing_media().contains(package)
            }
            Constraint::MediaPlaying => !self.apps_playing_media().is_empty(),
            Constraint::NoMediaPlaying => self.apps_playing_media().is_empty(),
            Constraint::BtDeviceConnected { address } => {
                self.bluetooth_devices().contains(address)
            }
            Constraint::BtDeviceDisconnected { address } => {
                !self.bluetooth_devices().contains(address)
            }
            Constraint::ScreenOn => self.screen_on(),
            Constraint::ScreenOff => !self.screen_on(),
            Constraint::OrientationPortrait => self.orientation().is_portrait(),
            Constraint::OrientationLandscape => !self.orientation().is_portrait(),
            Constraint::Orientation { orientation } => self.orientation() == *orientation,
            Constraint::FlashlightOn { lens } => self.flashlight_on(*lens),
            Constraint::FlashlightOff { lens } => !self.flashlight_on(*lens),
            Constraint::WifiOn => self.wifi_enabled(),
            Constraint::WifiOff => !self.wifi_enabled(),
            Constraint::WifiConnected { ssid } => match (ssid, self.wifi_ssid()) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(wanted), Some(current)) => wanted == current,
            },
            Constraint::WifiDisconnected { ssid } => match (ssid, self.wifi_ssid()) {
                (_, None) => true,
                (None, Some(_)) => false,
                (Some(wanted), Some(current)) => wanted != current,
            },
            Constraint::ImeChosen { ime } => self.ime() == Some(ime.as_str()),
            Constraint::ImeNotChosen { ime } => self.ime() != Some(ime.as_str()),
            Constraint::DeviceLocked => self.locked(),
            Constraint::DeviceUnlocked => !self.locked(),
            Constraint::LockScreenShowing => self.lock_screen_showing(),
            Constraint::LockScreenNotShowing => !self.lock_screen_showing(),
            Constraint::InPhoneCall => self.call_state() == CallState::InCall,
            Constraint::NotInPhoneCall => self.call_state() == CallState::None,
            Constraint::PhoneRinging => self.call_state() == CallState::Ringing,
            Constraint::Charging => self.charging(),
            Constraint::Discharging => !self.charging(),
            Constraint::Time { start, end } => time_in_window(self.time(), *start, *end),
        }
    }
}

/// Whether `now` lies in `[start, end)`. A window with `start > end` wraps
/// past midnight; `start == end` is empty.
fn time_in_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    // Minute resolution, matching how windows are configured.
    let now = now.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(now);
    if start <= end {
        start <= now && now < end
    } else {
        now >= start || now < end
    }
}

/// Adapts a `SystemState` into a `ConstraintGateProvider` that hands out
/// `LazyConstraintSnapshot`s.
#[derive(Debug, Default, Clone)]
pub struct SystemStateGate<S> {
    state: S,
}

impl<S: SystemState + Send> SystemStateGate<S> {
    pub fn new(state: S) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &S {
        &self.state
    }
}

impl<S: SystemState + Send> ConstraintGateProvider for SystemStateGate<S> {
    fn snapshot(&self) -> Box<dyn ConstraintSnapshot + '_> {
        Box::new(LazyConstraintSnapshot::new(&self.state))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
