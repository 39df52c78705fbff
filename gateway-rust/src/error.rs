//! # error
//!
//! Error taxonomy for the gateway.
//!
//! Only `IdentityError` and `ConfigError` ever reach a caller outside the hot
//! path. Frame, registry and translation errors are logged and the datagram
//! is dropped; the receive loop always proceeds to the next datagram.

use std::path::PathBuf;

use range_types::{Identity, IdentityParseError, SchemaError};
use thiserror::Error;

// ── Wire Framing ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame too short: {len} bytes (header is 8)")]
    FrameTooShort { len: usize },

    #[error("bad magic {found:02x?}")]
    BadMagic { found: [u8; 2] },

    #[error("declared payload length {declared} does not match {available} available bytes")]
    LengthMismatch { declared: usize, available: usize },

    #[error("payload of {len} bytes does not fit a 4-byte length field")]
    PayloadTooLarge { len: usize },
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no type code registered for {kind} payloads")]
    Unregistered { kind: &'static str },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

// ── Identity ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum IdentityError {
    /// The new identity is live in memory but could not be written to disk.
    /// A restart may lose it.
    #[error("identity {identity} is active but was not persisted to {}: {source}", path.display())]
    NotPersisted {
        identity: Identity,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The `autoGenerate` setting changed in memory but could not be written.
    #[error("identity settings were not persisted to {}: {source}", path.display())]
    SettingsNotPersisted {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Invalid(#[from] IdentityParseError),
}

// ── Route Translation ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("route plan identity {received} does not match current identity {expected}")]
    IdentityMismatch { expected: Identity, received: Identity },

    #[error("no target platform selected on the operator panel")]
    NoTargetSelected,

    #[error("route plan has no waypoints")]
    EmptyRoute,
}

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
