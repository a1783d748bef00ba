//! Signal telegram decoding (RORG `0xD0`, §4.7).
//!
//! Signal telegrams report module- or device-internal state (battery,
//! heartbeat, RSSI quality, ...) rather than application data, and are
//! keyed by a one-byte message identifier (MID) in the first payload byte
//! rather than by an EEP FUNC/TYPE pair. They bypass the EEP profile engine
//! entirely - there is no catalogue lookup, just this fixed per-MID table.

use chrono::NaiveDateTime;

use crate::crc::{bit_of_byte, get_bits};
use crate::error::ProfileError;
use crate::packet::RadioErp1;

#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// MID `0x06`. `energy` is `"last_message"`, `"N%"` (1..=100), or `"reserved"`.
    EnergyStatus { energy: String },
    Revision { sw_version: String, hw_version: String },
    Heartbeat,
    RxChannelQuality { id: u32, dbm_worst: u8, dbm_best: u8, subtelegram_count: u8, max_repeater_level: u8 },
    /// MID `0x10`. `energy` is `"N%"` (0..=100), `"no backup battery"`, or `"reserved"`.
    BackupBatteryStatus { energy: String },
    ProductId { product_id: u64 },
    DateTime { timestamp: NaiveDateTime, daylight_saving: bool },
}

const MID_ENERGY_STATUS: u8 = 0x06;
const MID_REVISION: u8 = 0x07;
const MID_HEARTBEAT: u8 = 0x08;
const MID_RX_CHANNEL_QUALITY: u8 = 0x0A;
const MID_BACKUP_BATTERY: u8 = 0x10;
const MID_PRODUCT_ID: u8 = 0x12;
const MID_DATE_TIME: u8 = 0x13;

fn energy_status_text(energy: u8) -> String {
    match energy {
        0 => "last_message".to_owned(),
        1..=100 => format!("{energy}%"),
        _ => "reserved".to_owned(),
    }
}

fn backup_battery_text(energy: u8) -> String {
    match energy {
        0..=100 => format!("{energy}%"),
        255 => "no backup battery".to_owned(),
        _ => "reserved".to_owned(),
    }
}

/// Decodes a Signal telegram's payload. `radio.payload[0]` is the MID;
/// everything after it is MID-specific.
pub fn decode(radio: &RadioErp1) -> Result<Signal, ProfileError> {
    let payload = &radio.payload;
    let mid = *payload.first().ok_or(ProfileError::CatalogueMalformed("empty signal payload".into()))?;

    match mid {
        MID_ENERGY_STATUS => {
            let energy = payload.get(1).copied().unwrap_or(0);
            Ok(Signal::EnergyStatus { energy: energy_status_text(energy) })
        }
        MID_REVISION => {
            if payload.len() < 9 {
                return Err(ProfileError::CatalogueMalformed("revision signal too short".into()));
            }
            let sw_version = payload[1..5].iter().map(u8::to_string).collect::<Vec<_>>().join(".");
            let hw_version = payload[5..9].iter().map(u8::to_string).collect::<Vec<_>>().join(".");
            Ok(Signal::Revision { sw_version, hw_version })
        }
        MID_HEARTBEAT => Ok(Signal::Heartbeat),
        MID_RX_CHANNEL_QUALITY => {
            if payload.len() < 8 {
                return Err(ProfileError::CatalogueMalformed("rx-channel-quality signal too short".into()));
            }
            let id = get_bits(payload, 8, 32).map_err(|_| ProfileError::CatalogueMalformed("rx-channel-quality id out of range".into()))? as u32;
            let dbm_worst = payload[5];
            let dbm_best = payload[5];
            let subtelegram_count = get_bits(payload, 56, 4)
                .map_err(|_| ProfileError::CatalogueMalformed("rx-channel-quality subtelegram count out of range".into()))? as u8;
            let max_repeater_level = get_bits(payload, 60, 4)
                .map_err(|_| ProfileError::CatalogueMalformed("rx-channel-quality repeater level out of range".into()))? as u8;
            Ok(Signal::RxChannelQuality { id, dbm_worst, dbm_best, subtelegram_count, max_repeater_level })
        }
        MID_BACKUP_BATTERY => {
            let energy = payload.get(1).copied().unwrap_or(0);
            Ok(Signal::BackupBatteryStatus { energy: backup_battery_text(energy) })
        }
        MID_PRODUCT_ID => {
            if payload.len() < 7 {
                return Err(ProfileError::CatalogueMalformed("product id signal too short".into()));
            }
            let product_id = get_bits(payload, 8, 48).map_err(|_| ProfileError::CatalogueMalformed("product id out of range".into()))?;
            Ok(Signal::ProductId { product_id })
        }
        MID_DATE_TIME => {
            if payload.len() < 7 {
                return Err(ProfileError::CatalogueMalformed("date/time signal too short".into()));
            }
            let year = 2000 + payload[1] as i32;
            let month = payload[2] as u32;
            let day = payload[3] as u32;
            let daylight_saving = bit_of_byte(2, payload[4]);
            let hour = payload[4] as u32 & 0x3F;
            let minute = payload[5] as u32;
            let second = payload[6] as u32;
            let date = chrono::NaiveDate::from_ymd_opt(year, month, day)
                .ok_or_else(|| ProfileError::CatalogueMalformed("invalid date/time signal fields".into()))?;
            let time = chrono::NaiveTime::from_hms_opt(hour, minute, second)
                .ok_or_else(|| ProfileError::CatalogueMalformed("invalid date/time signal fields".into()))?;
            Ok(Signal::DateTime { timestamp: NaiveDateTime::new(date, time), daylight_saving })
        }
        other => Err(ProfileError::SignalNotSupported(other)),
    }
}

impl Signal {
    /// Flattens the decoded fields into `(key, value)` pairs for MQTT
    /// publication, matching the field names §4.7's table lists.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Signal::EnergyStatus { energy } => vec![("energy", energy.clone())],
            Signal::Revision { sw_version, hw_version } => {
                vec![("sw_version", sw_version.clone()), ("hw_version", hw_version.clone())]
            }
            Signal::Heartbeat => Vec::new(),
            Signal::RxChannelQuality { id, dbm_worst, dbm_best, subtelegram_count, max_repeater_level } => vec![
                ("id", id.to_string()),
                ("dbm_worst", dbm_worst.to_string()),
                ("dbm_best", dbm_best.to_string()),
                ("subtelegram_count", subtelegram_count.to_string()),
                ("max_repeater_level", max_repeater_level.to_string()),
            ],
            Signal::BackupBatteryStatus { energy } => vec![("energy", energy.clone())],
            Signal::ProductId { product_id } => vec![("product_id", product_id.to_string())],
            Signal::DateTime { timestamp, daylight_saving } => {
                vec![("datetime", timestamp.format("%Y-%m-%dT%H:%M:%S").to_string()), ("daylight_saving", daylight_saving.to_string())]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Address;

    fn radio_with_payload(payload: Vec<u8>) -> RadioErp1 {
        RadioErp1 {
            rorg: 0xD0,
            payload,
            sender: Address([0, 0, 0, 0]),
            status: 0,
            subtel_num: None,
            destination: None,
            dbm: None,
            security_level: None,
        }
    }

    #[test]
    fn decodes_heartbeat() {
        let radio = radio_with_payload(vec![MID_HEARTBEAT]);
        assert_eq!(decode(&radio).unwrap(), Signal::Heartbeat);
    }

    #[test]
    fn decodes_energy_status_as_percent_and_last_message_and_reserved() {
        assert_eq!(decode(&radio_with_payload(vec![MID_ENERGY_STATUS, 0])).unwrap(), Signal::EnergyStatus { energy: "last_message".into() });
        assert_eq!(decode(&radio_with_payload(vec![MID_ENERGY_STATUS, 42])).unwrap(), Signal::EnergyStatus { energy: "42%".into() });
        assert_eq!(decode(&radio_with_payload(vec![MID_ENERGY_STATUS, 200])).unwrap(), Signal::EnergyStatus { energy: "reserved".into() });
    }

    #[test]
    fn decodes_backup_battery_as_percent_no_battery_and_reserved() {
        assert_eq!(decode(&radio_with_payload(vec![MID_BACKUP_BATTERY, 0])).unwrap(), Signal::BackupBatteryStatus { energy: "0%".into() });
        assert_eq!(decode(&radio_with_payload(vec![MID_BACKUP_BATTERY, 255])).unwrap(), Signal::BackupBatteryStatus { energy: "no backup battery".into() });
        assert_eq!(decode(&radio_with_payload(vec![MID_BACKUP_BATTERY, 150])).unwrap(), Signal::BackupBatteryStatus { energy: "reserved".into() });
    }

    #[test]
    fn decodes_revision_as_dotted_quads() {
        let radio = radio_with_payload(vec![MID_REVISION, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(decode(&radio).unwrap(), Signal::Revision { sw_version: "1.2.3.4".into(), hw_version: "5.6.7.8".into() });
    }

    #[test]
    fn decodes_rx_channel_quality() {
        let radio = radio_with_payload(vec![MID_RX_CHANNEL_QUALITY, 0x00, 0x00, 0x00, 0x2A, 0x46, 0x00, 0x35]);
        assert_eq!(
            decode(&radio).unwrap(),
            Signal::RxChannelQuality { id: 0x2A, dbm_worst: 0x46, dbm_best: 0x46, subtelegram_count: 0x3, max_repeater_level: 0x5 }
        );
    }

    #[test]
    fn decodes_product_id_as_48_bit_integer() {
        let radio = radio_with_payload(vec![MID_PRODUCT_ID, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(decode(&radio).unwrap(), Signal::ProductId { product_id: 0x010203040506 });
    }

    #[test]
    fn unknown_mid_is_not_supported() {
        let radio = radio_with_payload(vec![0xFE]);
        assert!(matches!(decode(&radio), Err(ProfileError::SignalNotSupported(0xFE))));
    }

    #[test]
    fn decodes_date_time() {
        // byte4 = 0b000100: hour = 4 (low 6 bits), bit2 set -> daylight_saving = true.
        let radio = radio_with_payload(vec![MID_DATE_TIME, 26, 7, 27, 0b0000_0100, 30, 0]);
        match decode(&radio).unwrap() {
            Signal::DateTime { timestamp, daylight_saving } => {
                assert_eq!(timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(), "2026-07-27T04:30:00");
                assert!(daylight_saving);
            }
            other => panic!("expected DateTime, got {:?}", other),
        }
    }
}
