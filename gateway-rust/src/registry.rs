//! # registry
//!
//! Maps a wire type code to the schema library's (decode, encode) capability
//! pair. Decoding produces a [`Payload`], a closed set of known kinds, so the
//! router switches over kinds rather than over raw codes.
//!
//! Unknown type codes are a routine outcome on the shared multicast channel:
//! [`MessageRegistry::lookup`] simply returns `None`.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use range_types::{
    Heartbeat, PlatformCommand, PlatformStatus, RawTelemetry, RoutePlan, SchemaError, WirePayload,
};
use serde::Serialize;

use crate::codec;
use crate::error::RegistryError;

// ── Payload Kinds ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayloadKind {
    Heartbeat,
    PlatformStatus,
    PlatformCommand,
    RouteUpload,
    RawTelemetry,
}

impl PayloadKind {
    pub fn schema_name(&self) -> &'static str {
        match self {
            Self::Heartbeat => Heartbeat::SCHEMA,
            Self::PlatformStatus => PlatformStatus::SCHEMA,
            Self::PlatformCommand => PlatformCommand::SCHEMA,
            Self::RouteUpload => RoutePlan::SCHEMA,
            Self::RawTelemetry => RawTelemetry::SCHEMA,
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.schema_name())
    }
}

/// A decoded payload, tagged by kind. Serializes as the bare record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Heartbeat(Heartbeat),
    PlatformStatus(PlatformStatus),
    PlatformCommand(PlatformCommand),
    RouteUpload(RoutePlan),
    RawTelemetry(RawTelemetry),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Heartbeat(_) => PayloadKind::Heartbeat,
            Self::PlatformStatus(_) => PayloadKind::PlatformStatus,
            Self::PlatformCommand(_) => PayloadKind::PlatformCommand,
            Self::RouteUpload(_) => PayloadKind::RouteUpload,
            Self::RawTelemetry(_) => PayloadKind::RawTelemetry,
        }
    }
}

/// Ties a schema record to its [`Payload`] variant.
trait PayloadVariant: WirePayload {
    const KIND: PayloadKind;
    fn wrap(self) -> Payload;
    fn peek(payload: &Payload) -> Option<&Self>;
}

macro_rules! payload_variant {
    ($ty:ty, $variant:ident) => {
        impl PayloadVariant for $ty {
            const KIND: PayloadKind = PayloadKind::$variant;

            fn wrap(self) -> Payload {
                Payload::$variant(self)
            }

            fn peek(payload: &Payload) -> Option<&Self> {
                match payload {
                    Payload::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

payload_variant!(Heartbeat, Heartbeat);
payload_variant!(PlatformStatus, PlatformStatus);
payload_variant!(PlatformCommand, PlatformCommand);
payload_variant!(RoutePlan, RouteUpload);
payload_variant!(RawTelemetry, RawTelemetry);

fn decode_as<T: PayloadVariant>(bytes: &[u8]) -> Result<Payload, SchemaError> {
    T::from_wire(bytes).map(T::wrap)
}

fn encode_as<T: PayloadVariant>(payload: &Payload) -> Result<Vec<u8>, SchemaError> {
    T::peek(payload)
        .ok_or(SchemaError::KindMismatch { expected: T::SCHEMA })?
        .to_wire()
}

// ── Capabilities ──────────────────────────────────────────────────────────────

pub type DecodeFn = fn(&[u8]) -> Result<Payload, SchemaError>;
pub type EncodeFn = fn(&Payload) -> Result<Vec<u8>, SchemaError>;

#[derive(Clone, Copy)]
pub struct Capability {
    pub kind: PayloadKind,
    pub decode: DecodeFn,
    pub encode: EncodeFn,
}

impl Capability {
    fn of<T: PayloadVariant>() -> (u8, Self) {
        (
            T::TYPE_CODE,
            Self {
                kind: T::KIND,
                decode: decode_as::<T>,
                encode: encode_as::<T>,
            },
        )
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability").field("kind", &self.kind).finish()
    }
}

#[derive(Debug, Clone)]
pub struct MessageRegistry {
    by_code: HashMap<u8, Capability>,
    by_kind: HashMap<PayloadKind, u8>,
}

impl MessageRegistry {
    /// Registry holding every kind the schema library declares.
    pub fn standard() -> Self {
        Self::from_entries([
            Capability::of::<Heartbeat>(),
            Capability::of::<PlatformStatus>(),
            Capability::of::<PlatformCommand>(),
            Capability::of::<RoutePlan>(),
            Capability::of::<RawTelemetry>(),
        ])
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (u8, Capability)>) -> Self {
        let mut by_code = HashMap::new();
        let mut by_kind = HashMap::new();
        for (code, capability) in entries {
            by_kind.insert(capability.kind, code);
            by_code.insert(code, capability);
        }
        Self { by_code, by_kind }
    }

    pub fn lookup(&self, type_code: u8) -> Option<&Capability> {
        self.by_code.get(&type_code)
    }

    pub fn type_code_of(&self, kind: PayloadKind) -> Option<u8> {
        self.by_kind.get(&kind).copied()
    }

    /// Encode `payload` and frame it for the wire.
    pub fn frame(&self, revision: u8, payload: &Payload) -> Result<Bytes, RegistryError> {
        let kind = payload.kind();
        let code = self
            .type_code_of(kind)
            .ok_or(RegistryError::Unregistered { kind: kind.schema_name() })?;
        let capability = self
            .lookup(code)
            .ok_or(RegistryError::Unregistered { kind: kind.schema_name() })?;
        let body = (capability.encode)(payload)?;
        Ok(codec::encode(revision, code, &body)?)
    }
}
