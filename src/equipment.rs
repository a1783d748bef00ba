//! Known EnOcean devices (§3 "Equipment"): the profile-bound, configured
//! counterpart to a bare radio address. Equipments are created from the
//! config file at startup or from an accepted UTE teach-in at runtime
//! (§4.6, §6.4), then tracked in an [`EquipmentTable`] shared between the
//! controller and the gateway.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use crate::eep::model::Profile;
use crate::packet::Address;

/// Whether a device mostly reports (`Sensor`) or mostly receives commands
/// (`Actuator`). Used only to pick the reply direction when answering an
/// incoming telegram (§4.4); the primary outbound command path and the
/// inbound decode path each derive their own direction independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sensor,
    Actuator,
}

impl Direction {
    /// The direction code to use when *replying* to a telegram from this
    /// equipment: the reply runs the opposite way, so a `Sensor` (which
    /// reports `FROM_DEVICE` data) is answered `TO_DEVICE` and vice versa.
    pub fn reply_eep_direction(self) -> u8 {
        match self {
            Direction::Sensor => crate::constants::eep_direction::TO_DEVICE,
            Direction::Actuator => crate::constants::eep_direction::FROM_DEVICE,
        }
    }
}

/// A device known to the gateway, bound to a loaded [`Profile`].
#[derive(Debug, Clone)]
pub struct Equipment {
    pub address: Address,
    pub rorg: u8,
    pub func: u8,
    pub type_: u8,
    pub profile: Arc<Profile>,
    pub name: String,
    pub channel: Option<String>,
    pub direction: Direction,
    /// Sender address this gateway uses when transmitting to the device;
    /// defaults to the controller's own base ID when unset.
    pub sender: Option<Address>,
    /// Shortcut of the profile's command selector field, `"CMD"` unless
    /// the config overrides it.
    pub command_shortcut: String,

    pub publish_raw: bool,
    pub publish_flat: bool,
    pub publish_rssi: bool,
    pub use_key_shortcut: bool,
    pub retain: bool,
    pub log_learn: bool,
    pub ignore: bool,
    pub answer: bool,
    pub default_data: HashMap<String, String>,

    pub rssi: Option<i32>,
    pub first_seen: Option<SystemTime>,
    pub last_seen: Option<SystemTime>,
    pub repeated: u64,
}

impl Equipment {
    pub fn eep_code(&self) -> String {
        format!("{:02X}-{:02X}-{:02X}", self.rorg, self.func, self.type_)
    }

    /// Updates runtime reception bookkeeping (§3 "runtime fields"). `level`
    /// is the repeater hop count decoded from the telegram's status byte
    /// (§4.1 `status_bits::REPEATER_COUNT_OFFSET`); any nonzero,
    /// not-do-not-repeat value counts as a repeated reception.
    pub fn record_reception(&mut self, rssi: Option<i32>, level: u8, when: SystemTime) {
        if self.first_seen.is_none() {
            self.first_seen = Some(when);
        }
        self.last_seen = Some(when);
        self.rssi = rssi;
        if level > 0 && level < 15 {
            self.repeated += 1;
        }
    }

    /// The topic-facing name, combined with the channel when the device is
    /// split into sub-topics (§6.4).
    pub fn topic_suffix(&self) -> String {
        match &self.channel {
            Some(channel) => format!("{}/{}", self.name, channel),
            None => self.name.clone(),
        }
    }
}

/// The set of learned equipment, read by both the controller (to check for
/// teach-in duplicates) and the gateway (to resolve a telegram's sender to
/// a device). Mutation only happens on the gateway side, so a short-held
/// lock is sufficient (§5).
#[derive(Debug, Default)]
pub struct EquipmentTable {
    by_address: HashMap<u32, Equipment>,
}

impl EquipmentTable {
    pub fn new() -> Self {
        Self { by_address: HashMap::new() }
    }

    pub fn insert(&mut self, equipment: Equipment) {
        self.by_address.insert(equipment.address.as_u32(), equipment);
    }

    pub fn get(&self, address: Address) -> Option<&Equipment> {
        self.by_address.get(&address.as_u32())
    }

    pub fn get_mut(&mut self, address: Address) -> Option<&mut Equipment> {
        self.by_address.get_mut(&address.as_u32())
    }

    pub fn contains(&self, address: Address) -> bool {
        self.by_address.contains_key(&address.as_u32())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Equipment> {
        self.by_address.values()
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn reply_direction_is_the_opposite_of_configured_direction() {
        assert_eq!(Direction::Sensor.reply_eep_direction(), crate::constants::eep_direction::TO_DEVICE);
        assert_eq!(Direction::Actuator.reply_eep_direction(), crate::constants::eep_direction::FROM_DEVICE);
    }

    fn dummy_profile() -> Arc<Profile> {
        Arc::new(Profile {
            rorg: 0xA5,
            func: 0x02,
            type_: 0x05,
            description: "Temperature Sensor".into(),
            commands: None,
            variants: Default::default(),
        })
    }

    fn sample_equipment() -> Equipment {
        Equipment {
            address: Address([0x05, 0x11, 0x72, 0xF7]),
            rorg: 0xA5,
            func: 0x02,
            type_: 0x05,
            profile: dummy_profile(),
            name: "living_room_temp".into(),
            channel: None,
            direction: Direction::Sensor,
            sender: None,
            command_shortcut: "CMD".into(),
            publish_raw: false,
            publish_flat: false,
            publish_rssi: true,
            use_key_shortcut: false,
            retain: false,
            log_learn: false,
            ignore: false,
            answer: true,
            default_data: HashMap::new(),
            rssi: None,
            first_seen: None,
            last_seen: None,
            repeated: 0,
        }
    }

    #[test]
    fn eep_code_renders_dash_separated_hex() {
        assert_eq!(sample_equipment().eep_code(), "A5-02-05");
    }

    #[test]
    fn record_reception_sets_first_and_last_seen_once() {
        let mut eq = sample_equipment();
        let t0 = SystemTime::now();
        eq.record_reception(Some(-50), 0, t0);
        assert_eq!(eq.first_seen, Some(t0));
        assert_eq!(eq.repeated, 0);

        let t1 = t0 + Duration::from_secs(5);
        eq.record_reception(Some(-55), 1, t1);
        assert_eq!(eq.first_seen, Some(t0));
        assert_eq!(eq.last_seen, Some(t1));
        assert_eq!(eq.repeated, 1);
    }

    #[test]
    fn do_not_repeat_level_is_not_counted_as_repeated() {
        let mut eq = sample_equipment();
        eq.record_reception(None, 15, SystemTime::now());
        assert_eq!(eq.repeated, 0);
    }

    #[test]
    fn equipment_table_round_trips_by_address() {
        let mut table = EquipmentTable::new();
        let eq = sample_equipment();
        let addr = eq.address;
        table.insert(eq);
        assert!(table.contains(addr));
        assert_eq!(table.get(addr).unwrap().name, "living_room_temp");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn topic_suffix_includes_channel_when_set() {
        let mut eq = sample_equipment();
        eq.channel = Some("A".into());
        assert_eq!(eq.topic_suffix(), "living_room_temp/A");
    }
}
