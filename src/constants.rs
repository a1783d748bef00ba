//! Wire-level enumerations and lookup tables for ESP3 and EEP: packet
//! types, RORG families, return/event/command codes, manufacturer IDs and
//! the small response-decoding tables used by the controller's adapter
//! probe.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// ESP3 packet type (byte 4 of the header).
#[derive(Debug, PartialEq, Eq, Clone, Copy, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PacketType {
    Reserved = 0x00,
    RadioErp1 = 0x01,
    Response = 0x02,
    RadioSubTel = 0x03,
    Event = 0x04,
    CommonCommand = 0x05,
    SmartAckCommand = 0x06,
    RemoteManCommand = 0x07,
    RadioMessage = 0x09,
    RadioErp2 = 0x0A,
    Radio802_15_4 = 0x10,
    Command2_4 = 0x11,
}

/// Radio telegram family (`data[0]` of a Radio-ERP1 packet).
#[derive(Debug, PartialEq, Eq, Clone, Copy, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Rorg {
    Rps = 0xF6,
    Bs1 = 0xD5,
    Bs4 = 0xA5,
    Vld = 0xD2,
    Msc = 0xD1,
    Ute = 0xD4,
    Signal = 0xD0,
    Adt = 0xA6,
    SmLrnReq = 0xC6,
    SmLrnAns = 0xC7,
    SmRec = 0xA7,
    SysEx = 0xC5,
    Sec = 0x30,
    SecEncaps = 0x31,
    Decrypted = 0x32,
    SecCdm = 0x33,
    SecTi = 0x35,
}

/// Return code carried by a `RESPONSE` packet.
#[derive(Debug, PartialEq, Eq, Clone, Copy, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ReturnCode {
    Ok = 0x00,
    Error = 0x01,
    NotSupported = 0x02,
    WrongParam = 0x03,
    OperationDenied = 0x04,
    LockSet = 0x05,
    BufferTooSmall = 0x06,
    NoFreeBuffer = 0x07,
}

/// Event code carried by an `EVENT` packet.
#[derive(Debug, PartialEq, Eq, Clone, Copy, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum EventCode {
    SaReclaimNotSuccessful = 0x01,
    SaConfirmLearn = 0x02,
    SaLearnAck = 0x03,
    CoReady = 0x04,
    CoEventSecureDevices = 0x05,
    CoDutyCycleLimit = 0x06,
    CoTransmitFailed = 0x07,
    CoTxDone = 0x08,
    CoLrnModeDisabled = 0x09,
}

/// Common-command code, sent as `data[0]` of a `COMMON_COMMAND` packet.
#[derive(Debug, PartialEq, Eq, Clone, Copy, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum CommandCode {
    CoWrSleep = 0x01,
    CoWrReset = 0x02,
    CoRdVersion = 0x03,
    CoRdSysLog = 0x04,
    CoWrSysLog = 0x05,
    CoWrBist = 0x06,
    CoWrIdBase = 0x07,
    CoRdIdBase = 0x08,
    CoWrRepeater = 0x09,
    CoRdRepeater = 0x0A,
    CoWrFilterAdd = 0x0B,
    CoWrFilterDel = 0x0C,
    CoWrFilterDelAll = 0x0D,
    CoWrFilterEnable = 0x0E,
    CoRdFilter = 0x0F,
    CoWrWaitMaturity = 0x10,
    CoWrSubtel = 0x11,
    CoWrMem = 0x12,
    CoRdMem = 0x13,
    CoRdMemAddress = 0x14,
    CoRdSecurity = 0x15,
    CoWrSecurity = 0x16,
    CoWrLearnMode = 0x17,
    CoRdLearnMode = 0x18,
    CoWrSecureDeviceAdd = 0x19,
    CoWrSecureDeviceDel = 0x1A,
    CoRdSecureDevicesByIndex = 0x1B,
    CoWrMode = 0x1C,
    CoSetBaudRate = 0x24,
    CoGetFrequencyInfo = 0x25,
    CoGetStepCode = 0x27,
    CoWrRemanCode = 0x2E,
    CoWrStartupDelay = 0x2F,
    CoWrRemanRepeating = 0x30,
    CoRdRemanRepeating = 0x31,
    CoSetNoiseThreshold = 0x32,
    CoGetNoiseThreshold = 0x33,
    CoWrRlcSavePeriod = 0x36,
    CoWrRlcLegacyMode = 0x37,
    CoWrSecureDeviceV2Add = 0x38,
    CoRdSecureDeviceV2ByIndex = 0x39,
    CoWrRssiTestMode = 0x3A,
    CoRdRssiTestMode = 0x3B,
    CoWrSecureDeviceMaintenanceKey = 0x3C,
    CoRdSecureDeviceMaintenanceKey = 0x3D,
    CoWrTransparentMode = 0x3E,
    CoRdTransparentMode = 0x3F,
    CoWrTxOnlyMode = 0x40,
    CoRdTxOnlyMode = 0x41,
}

/// Bit offsets (byte-scoped, documentation numbering) of the status byte's
/// named flags. `BIT_7` is the MSB, `BIT_0` is the LSB.
pub mod status_bits {
    pub const HASH_TYPE: usize = 0;
    pub const PTM_GENERATION: usize = 2;
    pub const PTM_IDENTIFIED: usize = 3;
    pub const REPEATER_COUNT_OFFSET: usize = 4;
    pub const REPEATER_COUNT_LEN: usize = 4;
}

/// The EEP XML `direction` attribute's two values (§4.3/§4.4): a telegram
/// form can be specific to the device reporting data or to the device
/// being commanded.
pub mod eep_direction {
    pub const FROM_DEVICE: u8 = 1;
    pub const TO_DEVICE: u8 = 2;
}

pub fn repeater_level_name(level: u8) -> &'static str {
    match level {
        0 => "Original Telegram",
        1 => "One Hop Repeated Telegram",
        2 => "Two Hop Repeated Telegram",
        15 => "Telegram shall not be repeated",
        _ => "Unknown",
    }
}

pub fn repeater_mode_name(code: u8) -> Option<&'static str> {
    match code {
        0 => Some("OFF"),
        1 => Some("ON"),
        2 => Some("SELECTIVE"),
        _ => None,
    }
}

pub fn repeater_level_response_name(code: u8) -> Option<&'static str> {
    match code {
        0 => Some("OFF"),
        1 => Some("1-level"),
        2 => Some("2-level"),
        _ => None,
    }
}

pub fn frequency_name(code: u8) -> Option<&'static str> {
    match code {
        0 => Some("315Mhz"),
        1 => Some("868.3Mhz"),
        2 => Some("902.87Mhz"),
        3 => Some("925Mhz"),
        4 => Some("928Mhz"),
        32 => Some("2.4 Ghz"),
        _ => None,
    }
}

pub fn protocol_name(code: u8) -> Option<&'static str> {
    match code {
        0 => Some("ERP1"),
        1 => Some("ERP2"),
        16 => Some("802.15.4"),
        48 => Some("Long Range"),
        _ => None,
    }
}

/// EnOcean Alliance manufacturer IDs, 11 bits wide. Not exhaustive, but
/// covers the vendors the reference implementation's table lists.
pub const MANUFACTURER_CODE: &[(u16, &str)] = &[
    (0, "Reserved"),
    (1, "Peha"),
    (2, "Thermokon"),
    (3, "Servodan"),
    (4, "Echoflex Solutions"),
    (5, "Awag Elektrotechnik Ag"),
    (6, "Hardmeier Electronics"),
    (7, "Regulvar Inc"),
    (8, "Ad Hoc Electronics"),
    (9, "Distech Controls"),
    (10, "Kieback And Peter"),
    (11, "EnOcean"),
    (12, "Vicos Gmbh"),
    (13, "Eltako"),
    (14, "Leviton"),
    (15, "Honeywell"),
    (16, "Spartan Peripheral Devices"),
    (17, "Siemens"),
    (18, "T Mac"),
    (19, "Reliable Controls Corporation"),
    (20, "Elsner Elektronik Gmbh"),
    (21, "Diehl Controls"),
    (22, "Bsc Computer"),
    (23, "S And S Regeltechnik Gmbh"),
    (24, "Masco Corporation"),
    (25, "Intesis Software Sl"),
    (26, "Viessmann"),
    (27, "Lutuo Technology"),
    (28, "Can2Go"),
    (29, "Sauter"),
    (30, "Boot Up"),
    (31, "Osram Sylvania"),
    (32, "Unotech"),
    (33, "Delta Controls Inc"),
    (34, "Unitronic Ag"),
    (35, "Nanosense"),
    (36, "The S4 Group"),
    (37, "Veissmann Hausatomation Gmbh"),
    (38, "GE"),
    (39, "Maico"),
    (40, "Ruskin Company"),
    (41, "Magnum Energy Solutions"),
    (42, "KMC Controls"),
    (43, "Ecologix Controls"),
    (44, "Trio 2 Sys"),
    (45, "Afriso Euro Index"),
    (46, "Waldmann Gmbh"),
    (48, "Nec Platforms Ltd"),
    (49, "Itec Corporation"),
    (50, "Simicx Co Ltd"),
    (51, "Permundo Gmbh"),
    (52, "Eurotronic Technology Gmbh"),
    (53, "Art Japan Co Ltd"),
    (54, "Tiansu Automation Control Syste Co Ltd"),
    (55, "Weinzierl Engineering Gmbh"),
    (56, "Gruppo Giordano Idea Spa"),
    (57, "Alphaeos Ag"),
    (58, "Tag Technologies"),
    (59, "Wattstopper"),
    (60, "Pressac Communications Ltd"),
    (62, "Giga Concept"),
    (63, "Sensortec"),
    (64, "Jaeger Direkt"),
    (65, "Air System Components Inc"),
    (66, "Ermine Corp"),
    (67, "Soda Gmbh"),
    (68, "Eke Automation"),
    (69, "Holter Regelarmutren"),
    (70, "ID RF"),
    (71, "Deuta Controls Gmbh"),
    (72, "Ewattch"),
    (73, "Micropelt"),
    (74, "Caleffi Spa"),
    (75, "Digital Concepts"),
    (76, "Emerson Climate Technologies"),
    (77, "Adee Electronic"),
    (78, "Altecon"),
    (79, "Nanjing Putian Telecommunications"),
    (80, "Terralux"),
    (81, "Menred"),
    (82, "Iexergy Gmbh"),
    (83, "Oventrop Gmbh"),
    (84, "Building Automation Products Inc"),
    (85, "Functional Devices Inc"),
    (86, "Ogga"),
    (87, "Itho Daalderop"),
    (88, "Resol"),
    (89, "Advanced Devices"),
    (90, "Autani Lcc"),
    (91, "Dr Riedel Gmbh"),
    (92, "Hoppe Holding Ag"),
    (93, "Siegenia Aubi Kg"),
    (94, "Adeo Services"),
    (95, "Eimsig Efp Gmbh"),
    (96, "Vimar Spa"),
    (97, "Glen Dimlax Gmbh"),
    (98, "Pmdm Gmbh"),
    (99, "Hubbel Lightning"),
    (100, "Debflex"),
    (101, "Perifactory Sensorsystems"),
    (102, "Watty Corp"),
    (103, "Wago Kontakttechnik"),
    (104, "Kessel"),
    (105, "Aug Winkhaus"),
    (106, "Decelect"),
    (107, "Mst Industries"),
    (108, "Becker Antriebe"),
    (109, "Nexelec"),
    (110, "Wieland Electric"),
    (111, "Avidsen"),
    (112, "Cws Boco International"),
    (113, "Roto Frank"),
    (114, "Alm Contorls"),
    (115, "Tommaso Technologies"),
    (116, "Rehau"),
    (117, "Inaba Denki Sangyo Co Lt"),
    (118, "Hager Controls Sas"),
    (255, "Multiple"),
    (2047, "Multi-user (test purpose)"),
];

/// Looks up a manufacturer name by its 11-bit ID; unknown IDs are not an
/// error, the caller sees `None`.
pub fn manufacturer_name(id: u16) -> Option<&'static str> {
    MANUFACTURER_CODE.iter().find(|&&(code, _)| code == id).map(|&(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manufacturer_lookup() {
        assert_eq!(manufacturer_name(11), Some("EnOcean"));
        assert_eq!(manufacturer_name(13), Some("Eltako"));
        assert_eq!(manufacturer_name(9999), None);
    }

    #[test]
    fn repeater_level_names() {
        assert_eq!(repeater_level_name(0), "Original Telegram");
        assert_eq!(repeater_level_name(15), "Telegram shall not be repeated");
    }
}
