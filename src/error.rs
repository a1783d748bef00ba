//! Error taxonomy. Each subsystem boundary gets its own `thiserror` enum
//! rather than one crate-wide error type, so callers only have to match on
//! the failures that can actually reach them.

use thiserror::Error;

use crate::crc::BitError;

/// Frame-codec level failures (§4.2, §7).
#[derive(Debug, Error)]
pub enum FrameError {
    /// Not an error per se: the scanner needs more bytes before it can
    /// decide anything. Retryable.
    #[error("incomplete frame: have {have} bytes, need at least {need}")]
    Incomplete { have: usize, need: usize },

    /// The header or body CRC-8 did not match. The scanner has already
    /// advanced past the offending sync byte.
    #[error("CRC mismatch at offset {offset} (expected {expected:#04x}, got {actual:#04x})")]
    CrcMismatch { offset: usize, expected: u8, actual: u8 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Packet-model level failures: malformed payload for a given packet type.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),
    #[error("invalid return code {0:#04x}")]
    InvalidReturnCode(u8),
    #[error("invalid UTF-8 in packet payload")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("unsupported RORG {0:#04x} for telegram construction")]
    UnsupportedRorg(u8),
    #[error("sender address must be 4 bytes, got {0}")]
    InvalidSenderLength(usize),
}

/// EEP catalogue and profile-engine failures (§4.3, §4.4, §7).
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("no profile for RORG {rorg:#04x} FUNC {func:#04x} TYPE {type_:#04x}")]
    NotFound { rorg: u8, func: u8, type_: u8 },
    #[error("profile {0} declares commands, but none was supplied")]
    CommandRequired(String),
    #[error("no telegram form for command {command:?} direction {direction:?} in profile {profile}")]
    FormNotFound { profile: String, command: Option<i64>, direction: Option<u8> },
    #[error("field {shortcut} has no enum item matching {value:?}")]
    InvalidEnumValue { shortcut: String, value: String },
    #[error("raw value {raw} for field {shortcut} is out of range [{min}, {max}]")]
    OutOfRangeRaw { shortcut: String, raw: i64, min: i64, max: i64 },
    #[error("unknown field shortcut {0}")]
    UnknownField(String),
    #[error("signal telegram MID {0:#04x} is not supported")]
    SignalNotSupported(u8),
    #[error(transparent)]
    Bit(#[from] BitError),
    #[error("malformed EEP catalogue: {0}")]
    CatalogueMalformed(String),
    #[error(transparent)]
    CatalogueIo(#[from] std::io::Error),
    #[error(transparent)]
    CatalogueXml(#[from] quick_xml::Error),
}

/// Controller/transport failures (§4.8, §5, §7).
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("transport failure: {0}")]
    TransportFailure(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Packet(#[from] PacketError),
}

/// Configuration-file failures, fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("could not parse config file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
    #[error("equipment {name:?} address {address:#010x}: {source}")]
    UnresolvableEquipment { name: String, address: u32, source: ProfileError },
    #[error("equipment {name:?} has invalid hex field {field}: {value:?}")]
    InvalidHexField { name: String, field: &'static str, value: String },
}

/// Gateway-level failures: the MQTT boundary plus anything from downstream
/// subsystems that reaches it undealt-with.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("unknown equipment for address {0:#010x}")]
    UnknownEquipment(u32),
    #[error("malformed command payload: {0}")]
    MalformedCommand(String),
}
