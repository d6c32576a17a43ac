//! Key map configuration.
//!
//! `KeyMapStore` is the live collection the engine matches against: an
//! immutable, versioned `ConfigSnapshot` behind an `RwLock`, swapped wholesale
//! on every change. The engine compares versions at every entry point and
//! rebuilds its match state when the collection changed.
//!
//! Key maps are usually loaded from TOML:
//!
//! ```toml
//! [defaults]
//! long_press_delay_ms = 500
//!
//! [[keymap]]
//! uid = 1
//! [keymap.trigger]
//! mode = "parallel"
//! click_type = "long_press"
//! [[keymap.trigger.keys]]
//! key = "VolumeUp"
//! [[keymap.trigger.keys]]
//! key = "VolumeDown"
//! [[keymap.actions]]
//! kind = "flashlight"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Deserialize;

use crate::constraints::ConstraintState;
use crate::error::ConfigError;
use crate::keycode::KeyCode;
use crate::model::{
    ActionData, ClickType, DeviceFilter, HoldDownMode, KeyMap, KeyMapAction, KeyMapTrigger,
    KeyMapUid, RepeatMode, TriggerKey,
};
use crate::platform::evdev::evdev_to_keycode;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Global timing and feedback defaults. Per-trigger and per-action overrides
/// fall back to these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Defaults {
    pub long_press_delay: Duration,
    pub double_press_delay: Duration,
    pub sequence_timeout: Duration,
    pub repeat_delay: Duration,
    pub repeat_rate: Duration,
    pub vibrate_duration: Duration,
    /// Vibrate on every fire, using `vibrate_duration`, whatever the trigger says.
    pub force_vibrate: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            long_press_delay: Duration::from_millis(500),
            double_press_delay: Duration::from_millis(300),
            sequence_timeout: Duration::from_millis(1000),
            repeat_delay: Duration::from_millis(400),
            repeat_rate: Duration::from_millis(50),
            vibrate_duration: Duration::from_millis(200),
            force_vibrate: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Live collection
// ---------------------------------------------------------------------------

/// One immutable version of the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub key_maps: Vec<KeyMap>,
    pub defaults: Defaults,
}

/// Read-only view of the current configuration.
pub trait ConfigSource: Send + Sync {
    fn current(&self) -> Arc<ConfigSnapshot>;
}

/// The live key map collection.
#[derive(Debug)]
pub struct KeyMapStore {
    inner: RwLock<Arc<ConfigSnapshot>>,
}

impl KeyMapStore {
    pub fn new(key_maps: Vec<KeyMap>, defaults: Defaults) -> Self {
        Self {
            inner: RwLock::new(Arc::new(ConfigSnapshot {
                version: 0,
                key_maps,
                defaults,
            })),
        }
    }

    pub fn replace_key_maps(&self, key_maps: Vec<KeyMap>) {
        self.update(|snapshot| snapshot.key_maps = key_maps);
    }

    pub fn set_defaults(&self, defaults: Defaults) {
        self.update(|snapshot| snapshot.defaults = defaults);
    }

    /// Applies `f` to a copy of the current snapshot and publishes the result
    /// under the next version.
    pub fn update(&self, f: impl FnOnce(&mut ConfigSnapshot)) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = ConfigSnapshot::clone(&guard);
        f(&mut next);
        next.version = guard.version + 1;
        log::debug!(
            "config: version {} with {} key map(s)",
            next.version,
            next.key_maps.len()
        );
        *guard = Arc::new(next);
    }
}

impl Default for KeyMapStore {
    fn default() -> Self {
        Self::new(Vec::new(), Defaults::default())
    }
}

impl ConfigSource for KeyMapStore {
    fn current(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// A validated configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub defaults: Defaults,
    pub key_maps: Vec<KeyMap>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        log::info!(
            "config: loaded {} key map(s) from {}",
            config.key_maps.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text)?;
        raw.into_config()
    }

    pub fn into_store(self) -> KeyMapStore {
        KeyMapStore::new(self.key_maps, self.defaults)
    }
}

// ---------------------------------------------------------------------------
// TOML schema
// ---------------------------------------------------------------------------

fn yes() -> bool {
    true
}

fn one() -> u32 {
    1
}

fn millis(ms: Option<u64>) -> Option<Duration> {
    ms.map(Duration::from_millis)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    defaults: RawDefaults,
    #[serde(default, rename = "keymap")]
    key_maps: Vec<RawKeyMap>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawDefaults {
    long_press_delay_ms: Option<u64>,
    double_press_delay_ms: Option<u64>,
    sequence_timeout_ms: Option<u64>,
    repeat_delay_ms: Option<u64>,
    repeat_rate_ms: Option<u64>,
    vibrate_duration_ms: Option<u64>,
    force_vibrate: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawKeyMap {
    uid: u64,
    #[serde(default = "yes")]
    enabled: bool,
    trigger: RawTrigger,
    #[serde(default)]
    actions: Vec<RawAction>,
    #[serde(default)]
    constraints: ConstraintState,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawMode {
    #[default]
    Undefined,
    Parallel,
    Sequence,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTrigger {
    #[serde(default)]
    mode: RawMode,
    /// Group click type of a parallel trigger.
    click_type: Option<ClickType>,
    #[serde(default)]
    keys: Vec<RawTriggerKey>,
    long_press_delay_ms: Option<u64>,
    double_press_delay_ms: Option<u64>,
    sequence_timeout_ms: Option<u64>,
    #[serde(default)]
    vibrate: bool,
    vibrate_duration_ms: Option<u64>,
    #[serde(default)]
    long_press_double_vibration: bool,
    #[serde(default)]
    show_toast: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTriggerKey {
    key: Option<KeyCode>,
    /// Raw Linux evdev code, as an alternative to `key`.
    evdev: Option<u32>,
    #[serde(default)]
    device: DeviceFilter,
    /// Parallel keys take the group's click type; one given here must match.
    click_type: Option<ClickType>,
    #[serde(default = "yes")]
    consume: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAction {
    kind: String,
    #[serde(default)]
    params: BTreeMap<String, String>,
    hold_down: Option<HoldDownMode>,
    repeat: Option<RepeatMode>,
    repeat_limit: Option<u32>,
    repeat_rate_ms: Option<u64>,
    repeat_delay_ms: Option<u64>,
    delay_before_next_action_ms: Option<u64>,
    #[serde(default = "one")]
    multiplier: u32,
}

impl RawConfig {
    fn into_config(self) -> Result<Config, ConfigError> {
        let base = Defaults::default();
        let d = self.defaults;
        let defaults = Defaults {
            long_press_delay: millis(d.long_press_delay_ms).unwrap_or(base.long_press_delay),
            double_press_delay: millis(d.double_press_delay_ms).unwrap_or(base.double_press_delay),
            sequence_timeout: millis(d.sequence_timeout_ms).unwrap_or(base.sequence_timeout),
            repeat_delay: millis(d.repeat_delay_ms).unwrap_or(base.repeat_delay),
            repeat_rate: millis(d.repeat_rate_ms).unwrap_or(base.repeat_rate),
            vibrate_duration: millis(d.vibrate_duration_ms).unwrap_or(base.vibrate_duration),
            force_vibrate: d.force_vibrate.unwrap_or(base.force_vibrate),
        };

        let mut seen = HashSet::new();
        let mut key_maps = Vec::with_capacity(self.key_maps.len());
        for raw in self.key_maps {
            let uid = KeyMapUid(raw.uid);
            if !seen.insert(uid) {
                return Err(ConfigError::DuplicateUid(uid));
            }
            key_maps.push(raw.into_key_map()?);
        }
        Ok(Config { defaults, key_maps })
    }
}

impl RawKeyMap {
    fn into_key_map(self) -> Result<KeyMap, ConfigError> {
        let uid = KeyMapUid(self.uid);
        let trigger = self.trigger.into_trigger(uid)?;
        let actions = self
            .actions
            .into_iter()
            .enumerate()
            .map(|(position, raw)| raw.into_action(uid, position))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(KeyMap {
            uid,
            enabled: self.enabled,
            trigger,
            actions,
            constraints: self.constraints,
        })
    }
}

impl RawTrigger {
    fn into_trigger(self, uid: KeyMapUid) -> Result<KeyMapTrigger, ConfigError> {
        if self.keys.is_empty() {
            return Err(ConfigError::EmptyTrigger(uid));
        }
        if let (RawMode::Parallel, Some(group)) = (self.mode, self.click_type) {
            let stray = self
                .keys
                .iter()
                .position(|k| k.click_type.is_some_and(|c| c != group));
            if let Some(position) = stray {
                return Err(ConfigError::ParallelClickTypeMismatch { uid, position });
            }
        }
        let keys = self
            .keys
            .into_iter()
            .enumerate()
            .map(|(position, raw)| raw.into_key(uid, position))
            .collect::<Result<Vec<_>, _>>()?;

        let mut trigger = match self.mode {
            RawMode::Undefined => {
                if keys.len() != 1 {
                    return Err(ConfigError::UndefinedModeKeyCount {
                        uid,
                        count: keys.len(),
                    });
                }
                let key = keys.into_iter().next().ok_or(ConfigError::EmptyTrigger(uid))?;
                KeyMapTrigger::single(key)
            }
            RawMode::Parallel => {
                let click_type = self
                    .click_type
                    .ok_or(ConfigError::MissingGroupClickType(uid))?;
                let mut distinct = HashSet::new();
                for key in &keys {
                    if !distinct.insert((key.key, key.device.clone())) {
                        return Err(ConfigError::DuplicateParallelKey {
                            uid,
                            key: key.key.to_string(),
                        });
                    }
                }
                KeyMapTrigger::parallel(click_type, keys)
            }
            RawMode::Sequence => KeyMapTrigger::sequence(keys),
        };

        trigger.long_press_delay = millis(self.long_press_delay_ms);
        trigger.double_press_delay = millis(self.double_press_delay_ms);
        trigger.sequence_timeout = millis(self.sequence_timeout_ms);
        trigger.vibrate = self.vibrate;
        trigger.vibrate_duration = millis(self.vibrate_duration_ms);
        trigger.long_press_double_vibration = self.long_press_double_vibration;
        trigger.show_toast = self.show_toast;
        Ok(trigger)
    }
}

impl RawTriggerKey {
    fn into_key(self, uid: KeyMapUid, position: usize) -> Result<TriggerKey, ConfigError> {
        let key = match (self.key, self.evdev) {
            (Some(key), None) => key,
            (None, Some(code)) => evdev_to_keycode(code),
            _ => return Err(ConfigError::AmbiguousKey { uid, position }),
        };
        Ok(TriggerKey {
            key,
            device: self.device,
            click_type: self.click_type.unwrap_or_default(),
            consume: self.consume,
        })
    }
}

impl RawAction {
    fn into_action(self, uid: KeyMapUid, position: usize) -> Result<KeyMapAction, ConfigError> {
        if self.repeat == Some(RepeatMode::UntilLimitReached) && self.repeat_limit.is_none() {
            return Err(ConfigError::MissingRepeatLimit { uid, position });
        }
        if self.multiplier == 0 {
            return Err(ConfigError::InvalidMultiplier { uid, position });
        }
        Ok(KeyMapAction {
            data: ActionData {
                kind: self.kind,
                params: self.params,
            },
            hold_down: self.hold_down,
            repeat: self.repeat,
            repeat_limit: self.repeat_limit,
            repeat_rate: millis(self.repeat_rate_ms),
            repeat_delay: millis(self.repeat_delay_ms),
            delay_before_next_action: millis(self.delay_before_next_action_ms),
            multiplier: self.multiplier,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{Constraint, ConstraintMode};
    use crate::model::TriggerMode;

    const SAMPLE: &str = r#"
        [defaults]
        long_press_delay_ms = 600
        force_vibrate = true

        [[keymap]]
        uid = 1
        [keymap.trigger]
        mode = "parallel"
        click_type = "long_press"
        vibrate = true
        [[keymap.trigger.keys]]
        key = "VolumeUp"
        [[keymap.trigger.keys]]
        evdev = 114
        device = { external = "pad" }
        [[keymap.actions]]
        kind = "flashlight"
        params = { lens = "back" }
        [keymap.constraints]
        mode = "or"
        [[keymap.constraints.list]]
        type = "screen_on"

        [[keymap]]
        uid = 2
        enabled = false
        [keymap.trigger]
        mode = "sequence"
        sequence_timeout_ms = 750
        [[keymap.trigger.keys]]
        key = "A"
        [[keymap.trigger.keys]]
        key = "A"
        click_type = "long_press"
        consume = false
        [[keymap.actions]]
        kind = "key"
        repeat = "until_limit_reached"
        repeat_limit = 3
        hold_down = "until_pressed_again"
        delay_before_next_action_ms = 20
        multiplier = 2
    "#;

    #[test]
    fn sample_config_parses() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.defaults.long_press_delay, Duration::from_millis(600));
        assert_eq!(config.defaults.double_press_delay, Duration::from_millis(300));
        assert!(config.defaults.force_vibrate);
        assert_eq!(config.key_maps.len(), 2);

        let first = &config.key_maps[0];
        assert_eq!(first.trigger.mode, TriggerMode::Parallel(ClickType::LongPress));
        assert_eq!(first.trigger.keys[1].key, KeyCode::VolumeDown);
        assert_eq!(first.trigger.keys[1].device, DeviceFilter::External("pad".into()));
        assert!(first
            .trigger
            .keys
            .iter()
            .all(|k| k.click_type == ClickType::LongPress));
        assert_eq!(first.constraints.mode, ConstraintMode::Or);
        assert_eq!(first.constraints.constraints, vec![Constraint::ScreenOn]);
        assert_eq!(first.actions[0].data.params["lens"], "back");

        let second = &config.key_maps[1];
        assert!(!second.enabled);
        assert!(second.trigger.is_sequence());
        assert_eq!(second.trigger.sequence_timeout, Some(Duration::from_millis(750)));
        assert!(!second.trigger.keys[1].consume);
        let action = &second.actions[0];
        assert_eq!(action.repeat, Some(RepeatMode::UntilLimitReached));
        assert_eq!(action.repeat_limit, Some(3));
        assert_eq!(action.hold_down, Some(HoldDownMode::UntilPressedAgain));
        assert_eq!(action.multiplier, 2);
    }

    #[test]
    fn empty_trigger_is_rejected() {
        let err = Config::from_toml_str(
            r#"
            [[keymap]]
            uid = 5
            [keymap.trigger]
            keys = []
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyTrigger(KeyMapUid(5))));
    }

    #[test]
    fn single_key_mode_needs_one_key() {
        let err = Config::from_toml_str(
            r#"
            [[keymap]]
            uid = 1
            [[keymap.trigger.keys]]
            key = "A"
            [[keymap.trigger.keys]]
            key = "B"
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UndefinedModeKeyCount { count: 2, .. }
        ));
    }

    #[test]
    fn parallel_duplicate_keys_are_rejected() {
        let err = Config::from_toml_str(
            r#"
            [[keymap]]
            uid = 1
            [keymap.trigger]
            mode = "parallel"
            click_type = "short_press"
            [[keymap.trigger.keys]]
            key = "A"
            [[keymap.trigger.keys]]
            key = "A"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateParallelKey { .. }));
    }

    #[test]
    fn parallel_key_click_type_must_match_group() {
        let err = Config::from_toml_str(
            r#"
            [[keymap]]
            uid = 1
            [keymap.trigger]
            mode = "parallel"
            click_type = "long_press"
            [[keymap.trigger.keys]]
            key = "A"
            click_type = "long_press"
            [[keymap.trigger.keys]]
            key = "B"
            click_type = "double_press"
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ParallelClickTypeMismatch { position: 1, .. }
        ));
    }

    #[test]
    fn limit_mode_requires_limit() {
        let err = Config::from_toml_str(
            r#"
            [[keymap]]
            uid = 1
            [[keymap.trigger.keys]]
            key = "A"
            [[keymap.actions]]
            kind = "key"
            repeat = "until_limit_reached"
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingRepeatLimit { position: 0, .. }
        ));
    }

    #[test]
    fn duplicate_uids_are_rejected() {
        let err = Config::from_toml_str(
            r#"
            [[keymap]]
            uid = 3
            [[keymap.trigger.keys]]
            key = "A"
            [[keymap]]
            uid = 3
            [[keymap.trigger.keys]]
            key = "B"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateUid(KeyMapUid(3))));
    }

    #[test]
    fn key_and_evdev_together_are_rejected() {
        let err = Config::from_toml_str(
            r#"
            [[keymap]]
            uid = 1
            [[keymap.trigger.keys]]
            key = "A"
            evdev = 30
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::AmbiguousKey { position: 0, .. }));
    }

    #[test]
    fn bad_toml_reports_parse_error() {
        let err = Config::from_toml_str("[[keymap]\nuid = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn store_bumps_version_on_every_change() {
        let store = KeyMapStore::default();
        let first = store.current();
        assert_eq!(first.version, 0);

        store.replace_key_maps(Vec::new());
        store.set_defaults(Defaults {
            long_press_delay: Duration::from_millis(900),
            ..Defaults::default()
        });
        let latest = store.current();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.defaults.long_press_delay, Duration::from_millis(900));
        // Old readers keep their snapshot.
        assert_eq!(first.defaults.long_press_delay, Duration::from_millis(500));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Config::load(Path::new("/nonexistent/keytrigger.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/keytrigger.toml"));
    }
}
