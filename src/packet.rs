//! Typed ESP3 packets, built from (or flattened back into) a [`crate::frame::Frame`].
//!
//! Packets are owned - no lifetimes tying them to the scanner's buffer -
//! since they travel across the controller's receive/command channels
//! (§5).

use std::convert::TryInto;
use std::fmt;

use num_enum::TryFromPrimitive;

use crate::constants::{CommandCode, EventCode, PacketType, ReturnCode, Rorg};
use crate::error::PacketError;
use crate::frame::Frame;

/// A 4-byte EnOcean device address (sender ID, destination ID, base ID, chip ID, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(pub [u8; 4]);

pub const BROADCAST: Address = Address([0xff, 0xff, 0xff, 0xff]);

impl Address {
    pub fn from_slice(s: &[u8]) -> Result<Self, PacketError> {
        let arr: [u8; 4] = s.try_into().map_err(|_| PacketError::InvalidSenderLength(s.len()))?;
        Ok(Self(arr))
    }

    pub fn as_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02X}{:02X}{:02X}{:02X}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl From<u32> for Address {
    fn from(v: u32) -> Self {
        Self(v.to_be_bytes())
    }
}

/// A decoded Radio-ERP1 telegram (packet type `0x01`): the RORG-tagged
/// radio payload plus the optional subtelegram/RSSI/security block.
#[derive(Debug, Clone)]
pub struct RadioErp1 {
    pub rorg: u8,
    pub payload: Vec<u8>,
    pub sender: Address,
    pub status: u8,
    pub subtel_num: Option<u8>,
    pub destination: Option<Address>,
    /// Signal strength in dBm, derived as the negation of the raw RSSI byte
    /// (§9, resolved: the raw byte is a positive attenuation magnitude).
    pub dbm: Option<i32>,
    pub security_level: Option<u8>,
}

impl RadioErp1 {
    fn decode(data: &[u8], optional: &[u8]) -> Result<Self, PacketError> {
        if data.len() < 6 {
            return Err(PacketError::TooShort(data.len()));
        }
        let rorg = data[0];
        let payload = data[1..data.len() - 5].to_vec();
        let sender = Address::from_slice(&data[data.len() - 5..data.len() - 1])?;
        let status = data[data.len() - 1];

        let (subtel_num, destination, dbm, security_level) = if optional.len() >= 7 {
            (
                Some(optional[0]),
                Some(Address::from_slice(&optional[1..5])?),
                Some(-(optional[5] as i32)),
                Some(optional[6]),
            )
        } else {
            (None, None, None, None)
        };

        Ok(Self { rorg, payload, sender, status, subtel_num, destination, dbm, security_level })
    }

    fn to_frame(&self) -> Frame {
        let mut data = Vec::with_capacity(1 + self.payload.len() + 5);
        data.push(self.rorg);
        data.extend_from_slice(&self.payload);
        data.extend_from_slice(&self.sender.0);
        data.push(self.status);

        let mut optional = Vec::new();
        if let (Some(subtel), Some(dest), Some(dbm), Some(sec)) =
            (self.subtel_num, self.destination, self.dbm, self.security_level)
        {
            optional.push(subtel);
            optional.extend_from_slice(&dest.0);
            optional.push((-dbm) as u8);
            optional.push(sec);
        }

        Frame::new(PacketType::RadioErp1 as u8, data, optional)
    }

    pub fn rorg_enum(&self) -> Option<Rorg> {
        Rorg::try_from_primitive(self.rorg).ok()
    }

    /// Whether this telegram is a 1BS/4BS teach-in rather than a data
    /// report (§4.5 "ERP parse pass"). RPS has no learn telegram and VLD
    /// teach-ins arrive via UTE, so both report `false` here.
    pub fn learn(&self) -> bool {
        use crate::crc::bit_of_byte;
        match self.rorg_enum() {
            Some(Rorg::Bs1) => self.payload.first().map(|&b| !bit_of_byte(3, b)).unwrap_or(true),
            Some(Rorg::Bs4) => self.payload.get(3).map(|&b| !bit_of_byte(3, b)).unwrap_or(true),
            _ => false,
        }
    }

    /// For a 4BS learn telegram that carries its EEP (bit 7 of the last
    /// payload byte set), the announced `(func, type, manufacturer_id)`
    /// (§4.5), for logging - the gateway still teaches 4BS devices in via
    /// the config file or UTE, not this announcement.
    pub fn bs4_announced_eep(&self) -> Option<(u8, u8, u16)> {
        use crate::crc::{bit_of_byte, get_bits};
        if self.rorg_enum() != Some(Rorg::Bs4) || !self.learn() || self.payload.len() < 4 {
            return None;
        }
        if !bit_of_byte(7, self.payload[3]) {
            return None;
        }
        let func = get_bits(&self.payload, 0, 6).ok()? as u8;
        let type_ = get_bits(&self.payload, 6, 7).ok()? as u8;
        let manufacturer_id = get_bits(&self.payload, 13, 11).ok()? as u16;
        Some((func, type_, manufacturer_id))
    }
}

/// Sets the 1BS/4BS learn bit (bit 3, LSB-first, of the last payload byte)
/// to 1 - "this is a data telegram, not a teach-in" - for every RORG where
/// that bit is meaningful. No-op for RORGs without a learn bit (§4.5).
fn mark_as_data_telegram(rorg: u8, payload: &mut [u8]) {
    use crate::crc::bit_of_byte;
    let last = match Rorg::try_from_primitive(rorg) {
        Ok(Rorg::Bs1) => payload.first_mut(),
        Ok(Rorg::Bs4) => payload.get_mut(3),
        _ => None,
    };
    if let Some(byte) = last {
        if !bit_of_byte(3, *byte) {
            *byte |= 1 << 3;
        }
    }
}

/// A decoded UTE teach-in telegram (RORG `0xD4`), unpacked from a
/// [`RadioErp1`] whose `rorg` is [`Rorg::Ute`].
#[derive(Debug, Clone, Copy)]
pub struct UteTeachIn {
    pub unidirectional: bool,
    pub response_expected: bool,
    pub request_type: u8,
    pub channels: u8,
    pub manufacturer_id: u16,
    pub func: u8,
    pub type_: u8,
    pub rorg: u8,
    /// Sender of the originating radio telegram - the teach-in response
    /// is addressed back to this, and it is compared against the
    /// controller's own address to suppress a repeater-induced echo.
    pub sender: Address,
    pub destination: Option<Address>,
    /// Bytes 2..8 of the original telegram verbatim (channels, manufacturer
    /// id low/high, type, func, rorg) - the response copies these through
    /// unchanged rather than re-serialising the decoded fields (§4.6).
    channel_and_eep: [u8; 6],
}

/// Request types carried in a UTE teach-in telegram's first payload byte, bits 4-5.
pub mod ute_request_type {
    pub const REGISTRATION: u8 = 0b00;
    pub const DELETION: u8 = 0b01;
    pub const NOT_SPECIFIED: u8 = 0b10;
    pub const NOT_USED: u8 = 0b11;
}

impl UteTeachIn {
    pub fn from_radio_erp1(radio: &RadioErp1) -> Result<Self, PacketError> {
        if radio.payload.len() < 6 {
            return Err(PacketError::TooShort(radio.payload.len()));
        }
        let b0 = radio.payload[0];
        let unidirectional = b0 & 0x80 == 0;
        let response_expected = b0 & 0x40 == 0;
        let request_type = (b0 >> 4) & 0x3;
        let channels = radio.payload[1];
        let manufacturer_id = (((radio.payload[3] as u16) << 8) | radio.payload[2] as u16) & 0x07ff;
        let type_ = radio.payload[4];
        let func = radio.payload[5];
        let rorg = radio.payload.get(6).copied().unwrap_or(radio.rorg);
        let channel_and_eep = radio.payload[1..7].try_into().unwrap();
        Ok(Self {
            unidirectional,
            response_expected,
            request_type,
            channels,
            manufacturer_id,
            func,
            type_,
            rorg,
            sender: radio.sender,
            destination: radio.destination,
            channel_and_eep,
        })
    }

    /// Builds the gateway's answer to this teach-in request (§4.6): control
    /// byte `0b1000_0001 | (response_code << 4)`, with bytes 2..7 copied
    /// verbatim from the request and the controller's own address in place
    /// of the sender.
    pub fn build_response(&self, response_code: u8, sender: Address, destination: Address) -> RadioErp1 {
        let control = 0b1000_0001u8 | ((response_code & 0x3) << 4);
        let mut payload = vec![control];
        payload.extend_from_slice(&self.channel_and_eep);

        RadioErp1 {
            rorg: Rorg::Ute as u8,
            payload,
            sender,
            status: 0,
            subtel_num: Some(3),
            destination: Some(destination),
            dbm: Some(0),
            security_level: Some(0),
        }
    }
}

/// Response codes placed in a UTE response's bits 4-5 (§4.6).
pub mod ute_response_code {
    pub const REFUSED_GENERAL: u8 = 0;
    pub const ACCEPTED_REGISTRATION: u8 = 1;
    pub const ACCEPTED_DELETION: u8 = 2;
    pub const REFUSED_EEP: u8 = 3;
}

/// A decoded `EVENT` packet (packet type `0x04`).
#[derive(Debug, Clone)]
pub enum Event {
    SaReclaimNotSuccessful,
    SaConfirmLearn { data: Vec<u8> },
    SaLearnAck { data: Vec<u8> },
    CoReady { wakeup_cause: u8 },
    CoEventSecureDevices { device: Address },
    CoDutyCycleLimit { value: u8 },
    CoTransmitFailed { value: u8 },
    CoTxDone,
    CoLrnModeDisabled,
    Other { code: u8, data: Vec<u8> },
}

impl Event {
    fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.is_empty() {
            return Err(PacketError::TooShort(0));
        }
        let code = data[0];
        let rest = &data[1..];
        let event = match EventCode::try_from_primitive(code) {
            Ok(EventCode::SaReclaimNotSuccessful) => Event::SaReclaimNotSuccessful,
            Ok(EventCode::SaConfirmLearn) => Event::SaConfirmLearn { data: rest.to_vec() },
            Ok(EventCode::SaLearnAck) => Event::SaLearnAck { data: rest.to_vec() },
            Ok(EventCode::CoReady) => Event::CoReady { wakeup_cause: rest.first().copied().unwrap_or(0) },
            Ok(EventCode::CoEventSecureDevices) => {
                Event::CoEventSecureDevices { device: Address::from_slice(rest.get(..4).unwrap_or(&[0; 4]))? }
            }
            Ok(EventCode::CoDutyCycleLimit) => Event::CoDutyCycleLimit { value: rest.first().copied().unwrap_or(0) },
            Ok(EventCode::CoTransmitFailed) => Event::CoTransmitFailed { value: rest.first().copied().unwrap_or(0) },
            Ok(EventCode::CoTxDone) => Event::CoTxDone,
            Ok(EventCode::CoLrnModeDisabled) => Event::CoLrnModeDisabled,
            Err(_) => Event::Other { code, data: rest.to_vec() },
        };
        Ok(event)
    }
}

/// A decoded `RESPONSE` packet (packet type `0x02`): the result of the last
/// command sent to the module.
#[derive(Debug, Clone)]
pub struct Response {
    pub return_code: u8,
    pub data: Vec<u8>,
    pub optional: Vec<u8>,
}

impl Response {
    fn decode(data: &[u8], optional: &[u8]) -> Result<Self, PacketError> {
        if data.is_empty() {
            return Err(PacketError::TooShort(0));
        }
        Ok(Self { return_code: data[0], data: data[1..].to_vec(), optional: optional.to_vec() })
    }

    pub fn return_code_enum(&self) -> Result<ReturnCode, PacketError> {
        ReturnCode::try_from_primitive(self.return_code).map_err(|_| PacketError::InvalidReturnCode(self.return_code))
    }

    fn to_frame(&self) -> Frame {
        let mut data = Vec::with_capacity(1 + self.data.len());
        data.push(self.return_code);
        data.extend_from_slice(&self.data);
        Frame::new(PacketType::Response as u8, data, self.optional.clone())
    }
}

/// Firmware/API version numbers, `CO_RD_VERSION`'s reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub main: u8,
    pub beta: u8,
    pub alpha: u8,
    pub build: u8,
}

#[derive(Debug, Clone)]
pub struct VersionResponse {
    pub app: Version,
    pub api: Version,
    pub chip_id: Address,
    pub chip_version: [u8; 4],
    pub description: String,
}

impl VersionResponse {
    pub fn decode(response: &Response) -> Result<Self, PacketError> {
        let d = &response.data;
        if d.len() < 32 {
            return Err(PacketError::TooShort(d.len()));
        }
        Ok(Self {
            app: Version { main: d[0], beta: d[1], alpha: d[2], build: d[3] },
            api: Version { main: d[4], beta: d[5], alpha: d[6], build: d[7] },
            chip_id: Address::from_slice(&d[8..12])?,
            chip_version: d[12..16].try_into().unwrap(),
            description: std::str::from_utf8(&d[16..32])?.trim_end_matches('\0').to_owned(),
        })
    }
}

/// `CO_RD_IDBASE`'s reply: the module's base address, from which radio
/// telegrams the gateway sends take a sender ID.
#[derive(Debug, Clone, Copy)]
pub struct IdBaseResponse {
    pub base_id: Address,
}

impl IdBaseResponse {
    pub fn decode(response: &Response) -> Result<Self, PacketError> {
        if response.data.len() < 4 {
            return Err(PacketError::TooShort(response.data.len()));
        }
        Ok(Self { base_id: Address::from_slice(&response.data[0..4])? })
    }
}

/// A request this gateway sends the module (packet type `0x05`).
#[derive(Debug, Clone)]
pub struct CommonCommandRequest {
    pub code: u8,
    pub data: Vec<u8>,
}

impl CommonCommandRequest {
    pub fn read_version() -> Self {
        Self { code: CommandCode::CoRdVersion as u8, data: Vec::new() }
    }

    pub fn read_id_base() -> Self {
        Self { code: CommandCode::CoRdIdBase as u8, data: Vec::new() }
    }

    pub fn get_frequency_info() -> Self {
        Self { code: CommandCode::CoGetFrequencyInfo as u8, data: Vec::new() }
    }

    pub fn get_noise_threshold() -> Self {
        Self { code: CommandCode::CoGetNoiseThreshold as u8, data: Vec::new() }
    }

    pub fn read_repeater() -> Self {
        Self { code: CommandCode::CoRdRepeater as u8, data: Vec::new() }
    }

    pub fn write_learn_mode(enable: bool) -> Self {
        Self { code: CommandCode::CoWrLearnMode as u8, data: vec![enable as u8, 0, 0, 0, 0] }
    }

    pub fn to_frame(&self) -> Frame {
        let mut data = Vec::with_capacity(1 + self.data.len());
        data.push(self.code);
        data.extend_from_slice(&self.data);
        Frame::new(PacketType::CommonCommand as u8, data, Vec::new())
    }
}

/// Any ESP3 packet, classified from a CRC-checked [`Frame`].
#[derive(Debug, Clone)]
pub enum Packet {
    RadioErp1(RadioErp1),
    UteTeachIn(UteTeachIn),
    Response(Response),
    Event(Event),
    Generic { packet_type: u8, data: Vec<u8>, optional: Vec<u8> },
}

impl Packet {
    pub fn decode(frame: &Frame) -> Result<Self, PacketError> {
        match PacketType::try_from_primitive(frame.packet_type) {
            Ok(PacketType::RadioErp1) => {
                let radio = RadioErp1::decode(&frame.data, &frame.optional)?;
                if radio.rorg_enum() == Some(Rorg::Ute) {
                    if let Ok(ute) = UteTeachIn::from_radio_erp1(&radio) {
                        return Ok(Packet::UteTeachIn(ute));
                    }
                }
                Ok(Packet::RadioErp1(radio))
            }
            Ok(PacketType::Response) => Ok(Packet::Response(Response::decode(&frame.data, &frame.optional)?)),
            Ok(PacketType::Event) => Ok(Packet::Event(Event::decode(&frame.data)?)),
            _ => Ok(Packet::Generic {
                packet_type: frame.packet_type,
                data: frame.data.clone(),
                optional: frame.optional.clone(),
            }),
        }
    }

    pub fn to_frame(&self) -> Frame {
        match self {
            Packet::RadioErp1(radio) => radio.to_frame(),
            Packet::UteTeachIn(_) => {
                // Never emitted directly; build the answering RadioErp1 via
                // `UteTeachIn::build_response` and encode that instead.
                unreachable!("UteTeachIn is a decode-only classification")
            }
            Packet::Response(resp) => resp.to_frame(),
            Packet::Event(_) => unreachable!("events are module-originated, never encoded by the gateway"),
            Packet::Generic { packet_type, data, optional } => {
                Frame::new(*packet_type, data.clone(), optional.clone())
            }
        }
    }
}

/// Builds an outbound Radio-ERP1 telegram for `rorg`/`payload`, addressed
/// from `sender` to `destination` (§4.5). For 1BS/4BS, `learn = false`
/// marks the telegram as a data report by setting the learn bit's
/// complement; the gateway never sends 1BS/4BS teach-ins this way (those
/// go out as explicit UTE responses), so call sites always pass `false`.
pub fn create_telegram(
    rorg: u8,
    mut payload: Vec<u8>,
    sender: Address,
    destination: Address,
    status: u8,
    learn: bool,
) -> RadioErp1 {
    if !learn {
        mark_as_data_telegram(rorg, &mut payload);
    }
    RadioErp1 {
        rorg,
        payload,
        sender,
        status,
        subtel_num: Some(3),
        destination: Some(destination),
        dbm: Some(0),
        security_level: Some(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_bs4_radio_erp1() {
        let data = vec![0xA5, 0x00, 0xE5, 0xCC, 0x0A, 0x05, 0x11, 0x72, 0xF7, 0x00];
        let optional = vec![0x01, 0xff, 0xff, 0xff, 0xff, 0x36, 0x00];
        let frame = Frame::new(0x01, data, optional);
        let packet = Packet::decode(&frame).unwrap();
        match packet {
            Packet::RadioErp1(radio) => {
                assert_eq!(radio.rorg, 0xA5);
                assert_eq!(radio.sender, Address([5, 17, 114, 247]));
                assert_eq!(radio.status, 0x00);
                assert_eq!(radio.dbm, Some(-0x36));
            }
            other => panic!("expected RadioErp1, got {:?}", other),
        }
    }

    #[test]
    fn radio_erp1_round_trips_through_frame() {
        let radio = create_telegram(0xF6, vec![0x70], Address([0, 0, 0, 1]), BROADCAST, 0x30, false);
        let frame = radio.to_frame();
        let decoded = Packet::decode(&frame).unwrap();
        match decoded {
            Packet::RadioErp1(back) => {
                assert_eq!(back.rorg, 0xF6);
                assert_eq!(back.payload, vec![0x70]);
                assert_eq!(back.sender, Address([0, 0, 0, 1]));
            }
            other => panic!("expected RadioErp1, got {:?}", other),
        }
    }

    #[test]
    fn decodes_ute_teach_in_and_builds_accepted_response() {
        // Exact scenario from the controller spec's UTE walkthrough: control
        // byte 0xA0 (request_type = NOT_SPECIFIED), manufacturer 0x601,
        // announced EEP D2-02-05.
        let request = RadioErp1 {
            rorg: 0xD4,
            payload: vec![0xA0, 0xFF, 0x01, 0x16, 0x05, 0x02, 0xA5],
            sender: Address([0x11, 0x22, 0x33, 0x44]),
            status: 0,
            subtel_num: None,
            destination: None,
            dbm: None,
            security_level: None,
        };
        let ute = UteTeachIn::from_radio_erp1(&request).unwrap();
        assert_eq!(ute.request_type, ute_request_type::NOT_SPECIFIED);
        assert_eq!(ute.channels, 0xFF);
        assert_eq!(ute.manufacturer_id, 0x601);
        assert_eq!(ute.type_, 0x05);
        assert_eq!(ute.func, 0x02);
        assert_eq!(ute.rorg, 0xA5);

        let response = ute.build_response(
            ute_response_code::ACCEPTED_REGISTRATION,
            Address([0xDE, 0xAD, 0xBE, 0xEF]),
            Address([0x11, 0x22, 0x33, 0x44]),
        );
        assert_eq!(response.rorg, 0xD4);
        assert_eq!(response.payload, vec![0x91, 0xFF, 0x01, 0x16, 0x05, 0x02, 0xA5]);
        assert_eq!(response.sender, Address([0xDE, 0xAD, 0xBE, 0xEF]));
        assert_eq!(response.destination, Some(Address([0x11, 0x22, 0x33, 0x44])));
    }

    #[test]
    fn version_response_decodes_app_and_api_version() {
        let mut data = vec![2, 5, 1, 0, 1, 0, 0, 0];
        data.extend_from_slice(&[0xAA; 4]); // chip id
        data.extend_from_slice(&[0; 4]); // chip version
        data.extend_from_slice(b"EO300I STICK\0\0\0\0");
        let response = Response { return_code: 0, data, optional: vec![] };
        let version = VersionResponse::decode(&response).unwrap();
        assert_eq!(version.app, Version { main: 2, beta: 5, alpha: 1, build: 0 });
        assert_eq!(version.description, "EO300I STICK");
    }

    #[test]
    fn bs4_learn_flag_follows_bit3_of_last_payload_byte() {
        // bit3 = 0 -> learn telegram; bit3 = 1 -> data telegram.
        let mut radio = RadioErp1 {
            rorg: 0xA5,
            payload: vec![0x00, 0x00, 0x00, 0x00],
            sender: Address([1, 2, 3, 4]),
            status: 0,
            subtel_num: None,
            destination: None,
            dbm: None,
            security_level: None,
        };
        assert!(radio.learn());
        radio.payload[3] = 1 << 3;
        assert!(!radio.learn());
    }

    #[test]
    fn bs1_learn_flag_follows_bit3_of_sole_payload_byte() {
        let mut radio = RadioErp1 {
            rorg: 0xD5,
            payload: vec![0x00],
            sender: Address([1, 2, 3, 4]),
            status: 0,
            subtel_num: None,
            destination: None,
            dbm: None,
            security_level: None,
        };
        assert!(radio.learn());
        radio.payload[0] |= 1 << 3;
        assert!(!radio.learn());
    }

    #[test]
    fn create_telegram_marks_bs4_as_data_when_not_learn() {
        let radio = create_telegram(0xA5, vec![0x00, 0x00, 0x00, 0x00], Address([0; 4]), BROADCAST, 0x00, false);
        assert!(!radio.learn());
        assert_eq!(radio.payload[3] & (1 << 3), 1 << 3);
    }

    #[test]
    fn create_telegram_leaves_bs4_learn_bit_untouched_when_learn() {
        let radio = create_telegram(0xA5, vec![0x00, 0x00, 0x00, 0x00], Address([0; 4]), BROADCAST, 0x00, true);
        assert!(radio.learn());
    }

    #[test]
    fn bs4_announced_eep_reads_func_type_manufacturer() {
        // func=6 bits, type=7 bits, manufacturer=11 bits, contains_eep bit set.
        let mut payload = [0u8; 4];
        crate::crc::set_bits(&mut payload, 0, 6, 0x02).unwrap();
        crate::crc::set_bits(&mut payload, 6, 7, 0x05).unwrap();
        crate::crc::set_bits(&mut payload, 13, 11, 0x01).unwrap();
        payload[3] |= 1 << 7; // contains_eep
        let radio = RadioErp1 {
            rorg: 0xA5,
            payload: payload.to_vec(),
            sender: Address([1, 2, 3, 4]),
            status: 0,
            subtel_num: None,
            destination: None,
            dbm: None,
            security_level: None,
        };
        assert!(radio.learn());
        let (func, type_, manufacturer_id) = radio.bs4_announced_eep().unwrap();
        assert_eq!((func, type_, manufacturer_id), (0x02, 0x05, 0x01));
    }

    #[test]
    fn event_decodes_known_and_unknown_codes() {
        let done = Event::decode(&[0x08]).unwrap();
        assert!(matches!(done, Event::CoTxDone));

        let unknown = Event::decode(&[0xEE, 0x01]).unwrap();
        assert!(matches!(unknown, Event::Other { code: 0xEE, .. }));
    }
}
