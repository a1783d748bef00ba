//! The MQTT boundary (§6.4): translates decoded radio telegrams into MQTT
//! publishes and inbound MQTT commands into outbound radio telegrams.
//! Bridges the controller's receive queue with an `rumqttc` client driven
//! from its own listener thread, in the same one-thread-per-duty style as
//! [`crate::controller`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rumqttc::{Client, Connection, Event, Incoming, MqttOptions, QoS};
use serde_json::{json, Map, Value};

use crate::config::{Config, MqttConfig};
use crate::controller::ControllerHandle;
use crate::crc::get_bits;
use crate::eep::codec::{self, DecodedField, EncodeValue, FieldValue};
use crate::eep::model::Catalogue;
use crate::equipment::{Direction, Equipment, EquipmentTable};
use crate::error::GatewayError;
use crate::packet::{create_telegram, Address, Packet, BROADCAST};

const GATEWAY_TOPIC: &str = "_gateway";
const EQUIPMENT_REQUEST_SUFFIX: &str = "/req";
const TIMESTAMP_KEY: &str = "_timestamp";
const RSSI_KEY: &str = "_rssi";
const CHANNEL_KEY: &str = "_channel";
const RORG_KEY: &str = "_rorg";

struct MqttInbound {
    topic: String,
    payload: Vec<u8>,
}

/// Bridges the controller's decoded-packet stream to MQTT and back.
pub struct Gateway {
    client: Client,
    listener: Option<JoinHandle<()>>,
    inbound: Receiver<MqttInbound>,
    stop: Arc<AtomicBool>,

    config_path: PathBuf,
    learned_equipment_file: Option<PathBuf>,
    base_topic: String,
    qos: QoS,

    publish_timestamp: bool,
    publish_raw: bool,
    publish_internal: bool,
    publish_response_status: bool,
    use_key_shortcut: bool,

    catalogue: Arc<Catalogue>,
    equipment: Arc<RwLock<EquipmentTable>>,
    controller: Arc<ControllerHandle>,
    message_sent: u64,
}

impl Gateway {
    pub fn new(
        config_path: PathBuf,
        mqtt_config: &MqttConfig,
        catalogue: Arc<Catalogue>,
        equipment: Vec<Equipment>,
        controller: Arc<ControllerHandle>,
    ) -> Result<Self, GatewayError> {
        let mut options = MqttOptions::new(&mqtt_config.client_id, &mqtt_config.host, mqtt_config.port);
        options.set_keep_alive(Duration::from_secs(mqtt_config.keepalive_secs));
        if let (Some(user), Some(pass)) = (&mqtt_config.username, &mqtt_config.password) {
            options.set_credentials(user, pass);
        }
        let (client, connection) = Client::new(options, 256);

        let (inbound_tx, inbound_rx) = mpsc::sync_channel(256);
        let stop = Arc::new(AtomicBool::new(false));
        let listener = Some(spawn_mqtt_listener(connection, inbound_tx, stop.clone()));

        let mut table = EquipmentTable::new();
        for item in equipment {
            table.insert(item);
        }

        let base_topic =
            if mqtt_config.base_topic.ends_with('/') { mqtt_config.base_topic.clone() } else { format!("{}/", mqtt_config.base_topic) };

        let mut gateway = Self {
            client,
            listener,
            inbound: inbound_rx,
            stop,
            config_path,
            learned_equipment_file: mqtt_config.learned_equipment_file.clone(),
            base_topic,
            qos: QoS::AtLeastOnce,
            publish_timestamp: mqtt_config.publish_timestamp,
            publish_raw: mqtt_config.publish_raw,
            publish_internal: mqtt_config.publish_internal,
            publish_response_status: mqtt_config.publish_response_status,
            use_key_shortcut: mqtt_config.use_key_shortcut,
            catalogue,
            equipment: Arc::new(RwLock::new(table)),
            controller,
            message_sent: 0,
        };

        gateway.subscribe_all()?;
        Ok(gateway)
    }

    fn subscribe_all(&mut self) -> Result<(), GatewayError> {
        self.client.subscribe(format!("{}req", self.base_topic), self.qos)?;
        self.client.subscribe(format!("{}learn", self.base_topic), self.qos)?;
        self.client.subscribe(format!("{}reload", self.base_topic), self.qos)?;
        for equipment in self.equipment.read().unwrap().iter() {
            self.client.subscribe(self.equipment_request_topic(equipment), self.qos)?;
        }
        Ok(())
    }

    fn equipment_topic(&self, equipment: &Equipment) -> String {
        format!("{}{}", self.base_topic, equipment.topic_suffix())
    }

    fn equipment_request_topic(&self, equipment: &Equipment) -> String {
        format!("{}{}", self.equipment_topic(equipment), EQUIPMENT_REQUEST_SUFFIX)
    }

    fn gateway_topic(&self, suffix: &str) -> String {
        format!("{}{}/{}", self.base_topic, GATEWAY_TOPIC, suffix)
    }

    fn publish(&mut self, topic: &str, payload: &Value, retain: bool) {
        let bytes = match payload {
            Value::String(s) => s.clone().into_bytes(),
            other => other.to_string().into_bytes(),
        };
        if let Err(e) = self.client.publish(topic, self.qos, retain, bytes) {
            log::warn!("gateway: publish to {topic} failed: {e}");
        } else {
            self.message_sent += 1;
        }
    }

    fn equipments_definition(&self) -> Value {
        let table = self.equipment.read().unwrap();
        Value::Array(
            table
                .iter()
                .map(|e| {
                    json!({
                        "address": e.address.to_string(),
                        "name": e.name,
                        "eep": e.eep_code(),
                        "ignore": e.ignore,
                    })
                })
                .collect(),
        )
    }

    /// Publishes gateway bookkeeping topics (§6.4): status, teach-in mode,
    /// the equipment list and, once the controller's startup probe has
    /// completed, the adapter details.
    pub fn publish_startup_state(&mut self) {
        if !self.publish_internal {
            return;
        }
        self.publish(&self.gateway_topic("status"), &Value::String("ONLINE".into()), true);
        let teach_in = if self.controller.teach_in_enabled() { "ON" } else { "OFF" };
        self.publish(&self.gateway_topic("teach-in"), &Value::String(teach_in.into()), true);
        let equipments = self.equipments_definition();
        self.publish(&self.gateway_topic("equipments"), &equipments, true);

        if let Some(address) = self.controller.own_address() {
            let adapter = {
                let info = self.controller.adapter_info.read().unwrap();
                let mut payload = Map::new();
                payload.insert("address".into(), Value::String(address.to_string()));
                if let Some(version) = &info.app_version {
                    payload.insert(
                        "app_version".into(),
                        Value::String(format!("{}.{}.{}.{}", version.main, version.beta, version.alpha, version.build)),
                    );
                }
                if let Some(description) = &info.description {
                    payload.insert("description".into(), Value::String(description.clone()));
                }
                Value::Object(payload)
            };
            self.publish(&self.gateway_topic("adapter"), &adapter, true);
        }
    }

    /// Runs until `stop()` is called from another thread, draining both the
    /// controller's receive queue and inbound MQTT messages.
    pub fn run(&mut self) {
        while !self.stop.load(Ordering::Relaxed) {
            if let Some(packet) = self.controller.recv_timeout(Duration::from_millis(200)) {
                self.handle_controller_packet(packet);
            }
            while let Ok(inbound) = self.inbound.try_recv() {
                self.handle_mqtt_inbound(inbound);
            }
        }
        if self.publish_internal {
            self.publish(&self.gateway_topic("status"), &Value::String("OFFLINE".into()), true);
        }
        log::info!("gateway: stopping, {} crc errors observed", self.controller.crc_error_count());
    }

    /// A clone of the internal stop flag, so an external signal handler
    /// (SIGINT) can request shutdown without holding `&mut self` across
    /// threads (§5 "Keyboard-interrupt on the main consumer stops the
    /// controller too").
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.client.disconnect();
        if let Some(join) = self.listener.take() {
            let _ = join.join();
        }
    }

    // ----- EnOcean -> MQTT -----------------------------------------------

    fn handle_controller_packet(&mut self, packet: Packet) {
        match packet {
            Packet::RadioErp1(radio) => self.handle_radio_erp1(radio),
            Packet::UteTeachIn(ute) => self.handle_teach_in(ute),
            Packet::Response(response) => {
                if self.publish_response_status {
                    let code = response.return_code_enum().map(|c| format!("{c:?}")).unwrap_or_else(|_| format!("{:#04x}", response.return_code));
                    self.publish(&format!("{}rep", self.base_topic), &Value::String(code), false);
                }
            }
            Packet::Event(event) => log::warn!("gateway: received EVENT {event:?}"),
            Packet::Generic { packet_type, .. } => log::info!("gateway: ignoring unsupported packet type {packet_type:#04x}"),
        }
    }

    fn handle_radio_erp1(&mut self, radio: crate::packet::RadioErp1) {
        let sender = radio.sender;
        let rssi = radio.dbm;
        let repeater_level =
            crate::crc::get_bits_from_byte(radio.status, crate::constants::status_bits::REPEATER_COUNT_OFFSET, crate::constants::status_bits::REPEATER_COUNT_LEN)
                .unwrap_or(0);

        let (ignore, answer, log_learn, should_process) = {
            let mut table = self.equipment.write().unwrap();
            match table.get_mut(sender) {
                Some(equipment) => {
                    equipment.record_reception(rssi, repeater_level, SystemTime::now());
                    (equipment.ignore, equipment.answer, equipment.log_learn, true)
                }
                None => {
                    log::debug!("gateway: unknown sender {sender}, telegram disregarded");
                    (true, false, false, false)
                }
            }
        };
        if !should_process || ignore {
            return;
        }

        if radio.rorg_enum() == Some(crate::constants::Rorg::Signal) {
            if let Err(e) = self.publish_signal_telegram(&radio) {
                log::warn!("gateway: failed to decode signal telegram from {sender}: {e}");
            }
            return;
        }

        // 1BS/4BS teach-in telegrams carry their own learn bit (§4.5); unless
        // the equipment entry asks to log them anyway, skip the EEP decode -
        // there is nothing meaningful to decode from a teach-in payload.
        if radio.learn() && !log_learn {
            if let Some((func, type_, manufacturer_id)) = radio.bs4_announced_eep() {
                log::info!(
                    "gateway: {sender} sent a 4BS teach-in announcing EEP {:02X}-{func:02X}-{type_:02X} (manufacturer {manufacturer_id:#05x})",
                    radio.rorg
                );
            } else {
                log::info!("gateway: {sender} sent a teach-in telegram, ignoring (enable log_learn to decode it anyway)");
            }
            return;
        }

        if let Err(e) = self.publish_decoded_telegram(&radio) {
            log::warn!("gateway: failed to decode telegram from {sender}: {e}");
        }

        if answer {
            if let Err(e) = self.send_default_reply(sender) {
                log::warn!("gateway: failed to build reply for {sender}: {e}");
            }
        }
    }

    fn publish_decoded_telegram(&mut self, radio: &crate::packet::RadioErp1) -> Result<(), GatewayError> {
        let (profile, equipment_snapshot) = {
            let table = self.equipment.read().unwrap();
            let equipment = table.get(radio.sender).ok_or(GatewayError::UnknownEquipment(radio.sender.as_u32()))?;
            (equipment.profile.clone(), equipment.clone())
        };

        // §4.4: a telegram sent by the controller's own base address (an
        // echo, e.g. through a repeater) resolves TO_DEVICE; anything else
        // is a genuine report, FROM_DEVICE.
        let direction = self.controller.own_address().map(|own| {
            if radio.sender == own {
                crate::constants::eep_direction::TO_DEVICE
            } else {
                crate::constants::eep_direction::FROM_DEVICE
            }
        });
        let command = extract_command(&profile, &radio.payload);
        let group = profile.get_telegram_form(command, direction)?;
        let command_selector = match (&profile.commands, command) {
            (Some(spec), Some(raw)) => Some(codec::CommandSelector { spec, raw }),
            _ => None,
        };
        let fields = codec::decode_with_command(group, &radio.payload, radio.status, true, command_selector)?;

        let mut payload = Map::new();
        let mut channel_value: Option<Value> = None;
        let use_raw = equipment_snapshot.publish_raw || self.publish_raw;
        let use_shortcut = equipment_snapshot.use_key_shortcut || self.use_key_shortcut;

        for field in &fields {
            if is_not_supported(field) {
                continue;
            }
            let key = if use_raw || use_shortcut { field.shortcut.clone() } else { field.description.clone() };
            let value = if use_raw { Value::from(field.raw_value) } else { field_value_to_json(&field.value) };
            if Some(&field.shortcut) == equipment_snapshot.channel.as_ref() {
                channel_value = Some(value.clone());
            }
            payload.insert(key.clone(), value);
            if let Some(unit) = &field.unit {
                payload.insert(format!("{key}|unit"), Value::String(unit.clone()));
            }
        }

        if self.publish_timestamp {
            let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
            payload.insert(TIMESTAMP_KEY.into(), Value::from(secs));
        }
        if equipment_snapshot.publish_rssi {
            if let Some(dbm) = radio.dbm {
                payload.insert(RSSI_KEY.into(), Value::from(dbm));
            }
        }
        payload.insert(RORG_KEY.into(), Value::String(format!("{:02X}", radio.rorg)));
        if let Some(channel) = &channel_value {
            payload.insert(CHANNEL_KEY.into(), channel.clone());
        }

        let mut topic = self.equipment_topic(&equipment_snapshot);
        if let Some(channel) = &channel_value {
            topic = format!("{topic}/{}", value_to_topic_segment(channel));
        }
        self.publish(&topic, &Value::Object(payload.clone()), equipment_snapshot.retain);

        if equipment_snapshot.publish_flat {
            self.publish_flat(&topic, &fields);
        }

        Ok(())
    }

    /// Signal telegrams (RORG 0xD0) have no EEP profile - each decoded field
    /// is published directly under `{equipment}/$field`, retained, instead of
    /// through the combined JSON payload (§4.7).
    fn publish_signal_telegram(&mut self, radio: &crate::packet::RadioErp1) -> Result<(), GatewayError> {
        let equipment_topic = {
            let table = self.equipment.read().unwrap();
            let equipment = table.get(radio.sender).ok_or(GatewayError::UnknownEquipment(radio.sender.as_u32()))?;
            self.equipment_topic(equipment)
        };
        let signal = crate::signal::decode(radio)?;
        for (key, value) in signal.fields() {
            self.publish(&format!("{equipment_topic}/${key}"), &Value::String(value), true);
        }
        Ok(())
    }

    fn publish_flat(&mut self, base_topic: &str, fields: &[DecodedField]) {
        for field in fields {
            if is_not_supported(field) {
                continue;
            }
            let shortcut_topic = format!("{base_topic}/{}", field.shortcut.replace('/', ""));
            self.publish(&shortcut_topic, &field_value_to_json(&field.value), true);
            self.publish(&format!("{shortcut_topic}/$name"), &Value::String(field.description.clone()), true);
            if let Some(unit) = &field.unit {
                self.publish(&format!("{shortcut_topic}/$unit"), &Value::String(unit.clone()), true);
            }
        }
    }

    /// Answers an incoming telegram with the equipment's configured default
    /// data (§3 `default_data`), mirroring devices that expect an
    /// acknowledgement after every report.
    fn send_default_reply(&mut self, sender: Address) -> Result<(), GatewayError> {
        let (profile, equipment_snapshot) = {
            let table = self.equipment.read().unwrap();
            let equipment = table.get(sender).ok_or(GatewayError::UnknownEquipment(sender.as_u32()))?;
            (equipment.profile.clone(), equipment.clone())
        };
        if equipment_snapshot.default_data.is_empty() {
            return Ok(());
        }
        let inputs = string_map_to_encode_values(&equipment_snapshot.default_data);
        let direction = Some(equipment_snapshot.direction.reply_eep_direction());
        self.build_and_send(&profile, &equipment_snapshot, &inputs, direction)
    }

    // ----- MQTT -> EnOcean ------------------------------------------------

    fn handle_mqtt_inbound(&mut self, inbound: MqttInbound) {
        if inbound.topic == format!("{}learn", self.base_topic) {
            self.handle_learn_request(&inbound.payload);
        } else if inbound.topic == format!("{}reload", self.base_topic) {
            self.handle_reload_request();
        } else {
            self.handle_equipment_command(&inbound.topic, &inbound.payload);
        }
    }

    fn handle_learn_request(&mut self, payload: &[u8]) {
        let command = String::from_utf8_lossy(payload).trim().to_uppercase();
        match command.as_str() {
            "ON" => {
                self.controller.set_teach_in(true);
                log::info!("gateway: teach-in mode enabled");
            }
            "OFF" => {
                self.controller.set_teach_in(false);
                log::info!("gateway: teach-in mode disabled");
            }
            other => {
                log::warn!("gateway: unsupported learn command {other:?}");
                return;
            }
        }
        if self.publish_internal {
            self.publish(&self.gateway_topic("teach-in"), &Value::String(command), true);
        }
    }

    fn handle_reload_request(&mut self) {
        log::info!("gateway: reloading equipment list from {}", self.config_path.display());
        match Config::load(&self.config_path).and_then(|config| config.resolve_equipment(&self.catalogue)) {
            Ok(resolved) => {
                let mut table = EquipmentTable::new();
                for equipment in resolved {
                    table.insert(equipment);
                }
                *self.equipment.write().unwrap() = table;
                if let Err(e) = self.subscribe_all() {
                    log::warn!("gateway: failed to re-subscribe after reload: {e}");
                }
                let equipments = self.equipments_definition();
                self.publish(&self.gateway_topic("equipments"), &equipments, true);
            }
            Err(e) => log::warn!("gateway: reload failed: {e}"),
        }
    }

    fn handle_equipment_command(&mut self, topic: &str, payload: &[u8]) {
        let json: Value = match serde_json::from_slice(payload) {
            Ok(v) => v,
            Err(_) => {
                log::warn!("gateway: received non-JSON message on {topic}");
                return;
            }
        };
        let Value::Object(fields) = json else {
            log::warn!("gateway: expected a JSON object on {topic}");
            return;
        };

        let target = {
            let table = self.equipment.read().unwrap();
            table
                .iter()
                .find(|e| topic.starts_with(&format!("{}{}/", self.base_topic, e.topic_suffix())))
                .map(|e| e.address)
                .or_else(|| {
                    fields.get("equipment").and_then(Value::as_str).and_then(|id| {
                        table.iter().find(|e| e.name == id).map(|e| e.address)
                    })
                })
        };
        let Some(address) = target else {
            log::warn!("gateway: unable to resolve equipment for message on {topic}");
            return;
        };

        let (profile, equipment_snapshot) = {
            let table = self.equipment.read().unwrap();
            let equipment = match table.get(address) {
                Some(e) => e,
                None => return,
            };
            (equipment.profile.clone(), equipment.clone())
        };

        let mut inputs: HashMap<String, EncodeValue> =
            fields.iter().filter(|(k, _)| *k != "equipment").filter_map(|(k, v)| json_value_to_encode(v).map(|ev| (k.clone(), ev))).collect();
        if profile.commands.is_some() && !inputs.contains_key(&equipment_snapshot.command_shortcut) {
            log::warn!("gateway: command field {} missing in message to {}", equipment_snapshot.command_shortcut, equipment_snapshot.name);
            return;
        }
        // The command selector uses the same shortcut key as any other
        // field; no separate extraction needed before encode().
        let _ = inputs.entry(equipment_snapshot.command_shortcut.clone());

        // A command typed directly by the user carries no reply-direction
        // negation (§4.4's `_reply_packet` is the only caller that passes one).
        if let Err(e) = self.build_and_send(&profile, &equipment_snapshot, &inputs, None) {
            log::warn!("gateway: failed to build outgoing telegram for {}: {e}", equipment_snapshot.name);
        }
    }

    fn build_and_send(
        &mut self,
        profile: &crate::eep::model::Profile,
        equipment: &Equipment,
        inputs: &HashMap<String, EncodeValue>,
        direction: Option<u8>,
    ) -> Result<(), GatewayError> {
        let command = match &profile.commands {
            Some(spec) => match inputs.get(&equipment.command_shortcut) {
                Some(EncodeValue::Integer(i)) => Some(*i),
                Some(EncodeValue::Number(n)) => Some(*n as i64),
                Some(EncodeValue::Text(t)) => spec.items.iter().find(|item| &item.description == t).map(|item| item.value),
                _ => None,
            },
            None => None,
        };
        let group = profile.get_telegram_form(command, direction)?;
        let byte_len = group.payload_bits.div_ceil(8).max(1);
        let mut payload = vec![0u8; byte_len];
        let mut status = 0u8;
        codec::encode(group, &mut payload, &mut status, inputs)?;

        let sender = equipment.sender.or_else(|| self.controller.own_address()).unwrap_or(BROADCAST);
        let telegram = create_telegram(equipment.rorg, payload, sender, equipment.address, status, false);
        self.controller.send(Packet::RadioErp1(telegram).to_frame());
        Ok(())
    }

    // ----- Teach-in ---------------------------------------------------------

    fn handle_teach_in(&mut self, ute: crate::packet::UteTeachIn) {
        if !self.controller.teach_in_enabled() {
            log::info!("gateway: received teach-in from {} but learn mode is disabled", ute.sender);
            return;
        }
        if self.equipment.read().unwrap().contains(ute.sender) {
            log::debug!("gateway: {} is already known, ignoring repeated teach-in", ute.sender);
            return;
        }
        let profile = match self.catalogue.get_profile(ute.rorg, ute.func, ute.type_) {
            Ok(profile) => profile.clone(),
            Err(e) => {
                log::warn!("gateway: learned device {} announces an unknown profile: {e}", ute.sender);
                return;
            }
        };

        let equipment = Equipment {
            address: ute.sender,
            rorg: ute.rorg,
            func: ute.func,
            type_: ute.type_,
            profile: Arc::new(profile),
            name: format!("learned_{}", ute.sender),
            channel: None,
            direction: Direction::Sensor,
            sender: None,
            command_shortcut: "CMD".to_string(),
            publish_raw: false,
            publish_flat: false,
            publish_rssi: true,
            use_key_shortcut: false,
            retain: false,
            log_learn: true,
            ignore: false,
            answer: false,
            default_data: HashMap::new(),
            rssi: None,
            first_seen: None,
            last_seen: None,
            repeated: 0,
        };

        log::info!("gateway: learned new equipment {} ({})", equipment.name, equipment.eep_code());
        self.persist_learned_equipment(&equipment);
        if let Err(e) = self.client.subscribe(self.equipment_request_topic(&equipment), self.qos) {
            log::warn!("gateway: failed to subscribe to learned equipment's request topic: {e}");
        }
        self.equipment.write().unwrap().insert(equipment);
        let equipments = self.equipments_definition();
        self.publish(&self.gateway_topic("equipments"), &equipments, true);
    }

    fn persist_learned_equipment(&self, equipment: &Equipment) {
        let path = self.learned_equipment_file.as_ref().unwrap_or(&self.config_path);
        let block = format!(
            "\n[[equipment]]\naddress = \"0x{:08X}\"\nrorg = \"0x{:02X}\"\nfunc = \"0x{:02X}\"\ntype = \"0x{:02X}\"\nname = \"{}\"\n",
            equipment.address.as_u32(),
            equipment.rorg,
            equipment.func,
            equipment.type_,
            equipment.name,
        );
        if let Err(e) = append_to_file(path, &block) {
            log::warn!("gateway: failed to persist learned equipment to {}: {e}", path.display());
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.stop();
    }
}

fn append_to_file(path: &std::path::Path, text: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(text.as_bytes())
}

fn spawn_mqtt_listener(mut connection: Connection, tx: SyncSender<MqttInbound>, stop: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("enocean-mqtt-listener".into())
        .spawn(move || {
            for notification in connection.iter() {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                match notification {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        let inbound = MqttInbound { topic: publish.topic.clone(), payload: publish.payload.to_vec() };
                        if tx.send(inbound).is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => log::info!("gateway: connected to MQTT broker"),
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("gateway: mqtt connection error: {e}");
                        std::thread::sleep(Duration::from_millis(500));
                    }
                }
            }
        })
        .expect("failed to spawn mqtt listener thread")
}

fn extract_command(profile: &crate::eep::model::Profile, payload: &[u8]) -> Option<i64> {
    let spec = profile.commands.as_ref()?;
    get_bits(payload, spec.offset, spec.size).ok().map(|v| v as i64)
}

fn is_not_supported(field: &DecodedField) -> bool {
    matches!(&field.value, FieldValue::Text(t) if t.contains("not supported"))
}

fn field_value_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Text(t) => Value::String(t.clone()),
        FieldValue::Number(n) => serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
        FieldValue::Bool(b) => Value::Bool(*b),
    }
}

fn value_to_topic_segment(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_value_to_encode(value: &Value) -> Option<EncodeValue> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(EncodeValue::Integer(i))
            } else {
                n.as_f64().map(EncodeValue::Number)
            }
        }
        Value::String(s) => Some(EncodeValue::Text(s.clone())),
        Value::Bool(b) => Some(EncodeValue::Bool(*b)),
        _ => None,
    }
}

fn string_map_to_encode_values(map: &HashMap<String, String>) -> HashMap<String, EncodeValue> {
    map.iter()
        .map(|(k, v)| {
            let value = v.parse::<f64>().map(EncodeValue::Number).unwrap_or_else(|_| EncodeValue::Text(v.clone()));
            (k.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_supported_text_values_are_filtered() {
        let field = DecodedField {
            shortcut: "X".into(),
            raw_value: 0,
            value: FieldValue::Text("not supported".into()),
            description: "X".into(),
            unit: None,
            is_status: false,
        };
        assert!(is_not_supported(&field));
    }

    #[test]
    fn numeric_field_round_trips_to_json_number() {
        let value = field_value_to_json(&FieldValue::Number(21.5));
        assert_eq!(value, Value::from(21.5));
    }

    #[test]
    fn json_number_without_fraction_becomes_integer_encode_value() {
        let parsed: Value = serde_json::from_str("2").unwrap();
        assert_eq!(json_value_to_encode(&parsed), Some(EncodeValue::Integer(2)));
    }

    #[test]
    fn string_defaults_parse_numeric_when_possible() {
        let mut defaults = HashMap::new();
        defaults.insert("TMP".to_string(), "21.5".to_string());
        defaults.insert("NAME".to_string(), "kitchen".to_string());
        let encoded = string_map_to_encode_values(&defaults);
        assert_eq!(encoded.get("TMP"), Some(&EncodeValue::Number(21.5)));
        assert_eq!(encoded.get("NAME"), Some(&EncodeValue::Text("kitchen".into())));
    }
}
