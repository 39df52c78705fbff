//! # range-types
//!
//! Shared payload records for the training-range simulation bus.
//!
//! These types are used by:
//! - `gateway-rust`: decoding inbound payloads and encoding translated commands
//! - sensor/simulation nodes: producing heartbeats, platform status and telemetry
//! - the navigation application: producing route plans keyed to a session identity
//!
//! ## Wire envelope
//!
//! Every payload travels inside a fixed binary envelope:
//!
//! ```text
//! [0xAA][0x55][revision:1][type_code:1][payload_len:4 LE][payload:payload_len]
//! ```
//!
//! The envelope itself is framed by the gateway. This crate only declares the
//! type code each record travels under and how the record body is encoded
//! (JSON via serde for the current protocol revision).

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Envelope Constants ────────────────────────────────────────────────────────

/// Two-byte marker opening every envelope.
pub const MAGIC: [u8; 2] = [0xAA, 0x55];

/// Protocol revision produced by this crate's encoders.
pub const PROTOCOL_REVISION: u8 = 0x01;

/// Wire type codes for the payload kinds this schema library knows about.
///
/// Codes outside this set are routine on the shared multicast channel and are
/// ignored by consumers.
pub mod type_code {
    pub const HEARTBEAT: u8 = 0x01;
    pub const PLATFORM_STATUS: u8 = 0x02;
    pub const PLATFORM_COMMAND: u8 = 0x03;
    pub const ROUTE_UPLOAD: u8 = 0x04;
    pub const RAW_TELEMETRY: u8 = 0x05;
}

// ── Schema Errors ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to decode {schema} payload: {source}")]
    Decode {
        schema: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {schema} payload: {source}")]
    Encode {
        schema: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("payload is not a {expected} record")]
    KindMismatch { expected: &'static str },
}

/// A record that can travel as an envelope payload.
pub trait WirePayload: Serialize + DeserializeOwned {
    /// Type code carried in the envelope header.
    const TYPE_CODE: u8;
    /// Human-readable schema name, used in logs and errors.
    const SCHEMA: &'static str;

    fn from_wire(bytes: &[u8]) -> Result<Self, SchemaError> {
        serde_json::from_slice(bytes).map_err(|source| SchemaError::Decode {
            schema: Self::SCHEMA,
            source,
        })
    }

    fn to_wire(&self) -> Result<Vec<u8>, SchemaError> {
        serde_json::to_vec(self).map_err(|source| SchemaError::Encode {
            schema: Self::SCHEMA,
            source,
        })
    }
}

// ── Identity ──────────────────────────────────────────────────────────────────

/// Session-scoped numeric token naming the controlled platform to the
/// navigation application. Always four decimal digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(u16);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityParseError {
    #[error("identity '{0}' is not a number")]
    NotNumeric(String),
    #[error("identity {0} is outside {}..={}", Identity::MIN, Identity::MAX)]
    OutOfRange(u32),
}

impl Identity {
    pub const MIN: u16 = 1000;
    pub const MAX: u16 = 9999;

    pub fn new(value: u32) -> Result<Self, IdentityParseError> {
        if (Self::MIN as u32..=Self::MAX as u32).contains(&value) {
            Ok(Self(value as u16))
        } else {
            Err(IdentityParseError::OutOfRange(value))
        }
    }

    /// Identity `offset` steps above [`Identity::MIN`], wrapping within range.
    pub fn from_offset(offset: u16) -> Self {
        Self(Self::MIN + offset % (Self::MAX - Self::MIN + 1))
    }

    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

impl FromStr for Identity {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s
            .trim()
            .parse()
            .map_err(|_| IdentityParseError::NotNumeric(s.to_string()))?;
        Self::new(value)
    }
}

// ── Geometry ──────────────────────────────────────────────────────────────────

/// WGS-84 position with altitude above mean sea level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f64,
}

// ── Heartbeat ─────────────────────────────────────────────────────────────────

/// Periodic liveness signal from a platform or subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    /// Stable identifier of the emitting node (e.g. "SIM-03", "gateway")
    pub source_id: String,
    /// Per-source counter, incremented on every heartbeat
    pub sequence: u32,
    /// Sender clock in milliseconds since the Unix epoch
    pub sent_at_ms: u64,
}

impl WirePayload for Heartbeat {
    const TYPE_CODE: u8 = type_code::HEARTBEAT;
    const SCHEMA: &'static str = "heartbeat";
}

// ── Platform Status ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    /// Platform name, unique on the range (e.g. "UAV-1", "GUN-2")
    pub platform_name: String,
    /// Ground speed, m/s
    pub speed_mps: f64,
    /// True heading, degrees (0 = north)
    pub heading_deg: f64,
    pub position: Coordinate,
    /// Sender clock in milliseconds since the Unix epoch
    pub reported_at_ms: u64,
}

impl WirePayload for PlatformStatus {
    const TYPE_CODE: u8 = type_code::PLATFORM_STATUS;
    const SCHEMA: &'static str = "platform-status";
}

// ── Route Plan (navigation application → gateway) ─────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteKind {
    Transit,
    Patrol,
    Loiter,
    ReturnToBase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    pub position: Coordinate,
    pub label: String,
    /// Planner's requested speed. Replaced during translation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlan {
    /// Identity the planner was launched with
    pub identity: Identity,
    pub route_kind: RouteKind,
    pub waypoints: Vec<Waypoint>,
}

impl WirePayload for RoutePlan {
    const TYPE_CODE: u8 = type_code::ROUTE_UPLOAD;
    const SCHEMA: &'static str = "route-upload";
}

// ── Platform Command (gateway/panel → simulation bus) ─────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    FollowRoute,
    Hold,
    Resume,
    SetSpeed,
    ReturnToBase,
}

/// A waypoint after translation: speed is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StampedWaypoint {
    pub position: Coordinate,
    pub label: String,
    pub speed_mps: f64,
    /// True when the platform's speed was unknown and the configured fallback was used
    pub using_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandParams {
    Route {
        route_kind: RouteKind,
        waypoints: Vec<StampedWaypoint>,
    },
    Speed {
        speed_mps: f64,
    },
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformCommand {
    pub command_id: String,
    pub target_platform: String,
    pub kind: CommandKind,
    pub params: CommandParams,
}

impl WirePayload for PlatformCommand {
    const TYPE_CODE: u8 = type_code::PLATFORM_COMMAND;
    const SCHEMA: &'static str = "platform-command";
}

// ── Raw Telemetry ─────────────────────────────────────────────────────────────

/// Free-form sensor channel samples. No dedicated consumer in the gateway;
/// forwarded to observers as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTelemetry {
    pub source_id: String,
    pub channel: String,
    pub samples: Vec<f64>,
    pub sampled_at_ms: u64,
}

impl WirePayload for RawTelemetry {
    const TYPE_CODE: u8 = type_code::RAW_TELEMETRY;
    const SCHEMA: &'static str = "raw-telemetry";
}
