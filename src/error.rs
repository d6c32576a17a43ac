//! Loading errors.
//!
//! Raised while loading and validating key maps and simulator traces. The
//! matching engine itself never fails; it assumes every key map it sees passed
//! these checks.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::KeyMapUid;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("key map {0} has an empty trigger")]
    EmptyTrigger(KeyMapUid),
    #[error("key map {uid}: a single-key trigger needs exactly one key, found {count}")]
    UndefinedModeKeyCount { uid: KeyMapUid, count: usize },
    #[error("key map {0}: parallel trigger needs a group click type")]
    MissingGroupClickType(KeyMapUid),
    #[error("key map {uid}: parallel trigger lists {key} twice")]
    DuplicateParallelKey { uid: KeyMapUid, key: String },
    #[error("key map {uid}: parallel key {position} has a click type other than the group's")]
    ParallelClickTypeMismatch { uid: KeyMapUid, position: usize },
    #[error("key map {uid}: key entry {position} needs exactly one of `key` or `evdev`")]
    AmbiguousKey { uid: KeyMapUid, position: usize },
    #[error("key map {uid}: action {position} repeats until a limit but has no repeat_limit")]
    MissingRepeatLimit { uid: KeyMapUid, position: usize },
    #[error("key map {uid}: action {position} has a multiplier of zero")]
    InvalidMultiplier { uid: KeyMapUid, position: usize },
    #[error("duplicate key map uid {0}")]
    DuplicateUid(KeyMapUid),
}

/// A simulator trace that cannot be replayed.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("event {index} needs exactly one of `key` or `evdev`")]
    AmbiguousKey { index: usize },
    #[error("event {index}: a disconnect needs a `device`")]
    MissingDevice { index: usize },
    #[error("event {index} at {at_ms} ms comes before the event preceding it")]
    OutOfOrder { index: usize, at_ms: u64 },
}
