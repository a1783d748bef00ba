//! Configuration file (§6.6) and command-line interface (§6.7). This is
//! the one "external collaborator" boundary the core spec asks to be
//! specified concretely rather than left abstract, since equipment
//! resolution needs a real EEP catalogue to check against at load time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;

use crate::eep::model::Catalogue;
use crate::equipment::{Direction, Equipment};
use crate::error::ConfigError;
use crate::packet::Address;

#[derive(Debug, Parser)]
#[command(name = "enocean-mqtt", about = "Bridges an EnOcean ESP3 radio gateway to MQTT.")]
pub struct Cli {
    /// Path to the gateway's TOML configuration file.
    #[arg(short, long, default_value = "enocean-mqtt.toml")]
    pub config: PathBuf,

    /// Raise the log level; repeatable (-v, -vv, -vvv).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Overrides the config file's `controller.eep_catalogue` path.
    #[arg(long)]
    pub eep_catalogue: Option<PathBuf>,
}

impl Cli {
    /// Translates `-v` repeat count into a `log` level filter, honored
    /// only when `RUST_LOG` isn't already set (§6.7).
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Serial,
    Tcp,
}

fn default_baudrate() -> u32 {
    57600
}
fn default_tcp_port() -> u16 {
    9637
}
fn default_true() -> bool {
    true
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "enocean-mqtt".to_string()
}
fn default_keepalive() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    pub transport: TransportKind,
    /// Serial device path, required when `transport = "serial"`.
    pub port: Option<String>,
    /// Bind address, used when `transport = "tcp"`.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    #[serde(default = "default_true")]
    pub teach_in: bool,
    pub eep_catalogue: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    pub base_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// Attaches `_timestamp` to every published reading (§6.4).
    #[serde(default = "default_true")]
    pub publish_timestamp: bool,
    /// Global fallback for `equipment.publish_raw` when an entry doesn't override it.
    #[serde(default)]
    pub publish_raw: bool,
    /// Publishes gateway status/teach-in/adapter-details/equipment-list bookkeeping topics.
    #[serde(default = "default_true")]
    pub publish_internal: bool,
    /// Publishes the return code of every `COMMON_COMMAND` response to `<base>/rep`.
    #[serde(default)]
    pub publish_response_status: bool,
    /// Global fallback for `equipment.use_key_shortcut`.
    #[serde(default)]
    pub use_key_shortcut: bool,
    /// Appends newly taught-in equipment as `[[equipment]]` blocks to this file, if set.
    #[serde(default)]
    pub learned_equipment_file: Option<PathBuf>,
}

/// Raw, string-keyed equipment entry as it appears in the TOML file
/// (§6.6). Hex fields are validated and resolved against the EEP
/// catalogue by [`EquipmentConfig::resolve`], not at deserialize time, so
/// a bad entry reports its own name instead of a generic parse error.
#[derive(Debug, Clone, Deserialize)]
pub struct EquipmentConfig {
    pub address: String,
    pub rorg: String,
    pub func: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub name: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub publish_raw: bool,
    #[serde(default)]
    pub publish_flat: bool,
    #[serde(default = "default_true")]
    pub publish_rssi: bool,
    #[serde(default)]
    pub use_key_shortcut: bool,
    #[serde(default)]
    pub retain: bool,
    #[serde(default)]
    pub log_learn: bool,
    #[serde(default)]
    pub ignore: bool,
    #[serde(default = "default_true")]
    pub answer: bool,
    #[serde(default)]
    pub default_data: HashMap<String, String>,
}

fn parse_hex_u8(name: &str, field: &'static str, s: &str) -> Result<u8, ConfigError> {
    let trimmed = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(trimmed, 16)
        .map_err(|_| ConfigError::InvalidHexField { name: name.to_string(), field, value: s.to_string() })
}

fn parse_hex_address(name: &str, field: &'static str, s: &str) -> Result<Address, ConfigError> {
    let trimmed = s.trim_start_matches("0x").trim_start_matches("0X");
    let v = u32::from_str_radix(trimmed, 16)
        .map_err(|_| ConfigError::InvalidHexField { name: name.to_string(), field, value: s.to_string() })?;
    Ok(Address::from(v))
}

impl EquipmentConfig {
    /// Resolves the raw TOML entry into a runtime [`Equipment`], looking up
    /// its `(rorg, func, type)` triple in the loaded catalogue.
    pub fn resolve(&self, catalogue: &Catalogue) -> Result<Equipment, ConfigError> {
        let address = parse_hex_address(&self.name, "address", &self.address)?;
        let rorg = parse_hex_u8(&self.name, "rorg", &self.rorg)?;
        let func = parse_hex_u8(&self.name, "func", &self.func)?;
        let type_ = parse_hex_u8(&self.name, "type", &self.type_)?;

        let profile = catalogue
            .get_profile(rorg, func, type_)
            .map_err(|source| ConfigError::UnresolvableEquipment {
                name: self.name.clone(),
                address: address.as_u32(),
                source,
            })?
            .clone();

        let sender = match &self.sender {
            Some(s) => Some(parse_hex_address(&self.name, "sender", s)?),
            None => None,
        };

        let direction = match self.direction.as_deref() {
            Some("actuator") => Direction::Actuator,
            _ => Direction::Sensor,
        };

        Ok(Equipment {
            address,
            rorg,
            func,
            type_,
            profile: Arc::new(profile),
            name: self.name.clone(),
            channel: self.channel.clone(),
            direction,
            sender,
            command_shortcut: self.command.clone().unwrap_or_else(|| "CMD".to_string()),
            publish_raw: self.publish_raw,
            publish_flat: self.publish_flat,
            publish_rssi: self.publish_rssi,
            use_key_shortcut: self.use_key_shortcut,
            retain: self.retain,
            log_learn: self.log_learn,
            ignore: self.ignore,
            answer: self.answer,
            default_data: self.default_data.clone(),
            rssi: None,
            first_seen: None,
            last_seen: None,
            repeated: 0,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub controller: ControllerConfig,
    pub mqtt: MqttConfig,
    #[serde(default, rename = "equipment")]
    pub equipment: Vec<EquipmentConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.display().to_string(), source })
    }

    /// Resolves every `[[equipment]]` entry against `catalogue`. The first
    /// unresolvable entry is fatal (§7 `ConfigError`); the caller logs
    /// which entry failed and aborts startup.
    pub fn resolve_equipment(&self, catalogue: &Catalogue) -> Result<Vec<Equipment>, ConfigError> {
        self.equipment.iter().map(|entry| entry.resolve(catalogue)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[controller]
transport = "serial"
port = "/dev/ttyUSB0"
eep_catalogue = "eep.xml"

[mqtt]
host = "localhost"
base_topic = "enocean"

[[equipment]]
address = "0x051172F7"
rorg = "0xA5"
func = "0x02"
type = "0x05"
name = "living_room_temp"
"#;

    fn catalogue_with_a50205() -> Catalogue {
        let mut cat = Catalogue::new();
        cat.insert(crate::eep::model::Profile {
            rorg: 0xA5,
            func: 0x02,
            type_: 0x05,
            description: "Temperature Sensor".into(),
            commands: None,
            variants: Default::default(),
        });
        cat
    }

    #[test]
    fn parses_minimal_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.controller.transport, TransportKind::Serial);
        assert_eq!(config.controller.baudrate, 57600);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.equipment.len(), 1);
    }

    #[test]
    fn resolves_equipment_against_catalogue() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let catalogue = catalogue_with_a50205();
        let resolved = config.resolve_equipment(&catalogue).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].address, Address([0x05, 0x11, 0x72, 0xF7]));
        assert_eq!(resolved[0].eep_code(), "A5-02-05");
    }

    #[test]
    fn unresolvable_equipment_is_reported_by_name() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let empty_catalogue = Catalogue::new();
        let err = config.resolve_equipment(&empty_catalogue).unwrap_err();
        assert!(matches!(err, ConfigError::UnresolvableEquipment { name, .. } if name == "living_room_temp"));
    }

    #[test]
    fn rejects_bad_hex_address() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.equipment[0].address = "not-hex".to_string();
        let catalogue = catalogue_with_a50205();
        let err = config.resolve_equipment(&catalogue).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHexField { field: "address", .. }));
    }
}
