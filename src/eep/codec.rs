//! Profile decode/encode engine (§4.4): walks a [`FunctionGroup`]'s field
//! list against a payload + status byte, applying scaling, enum mapping,
//! the cross-field operator factor, unit selection and sensor-availability
//! suppression.

use std::collections::HashSet;

use crate::crc::{get_bits, get_bits_from_byte, set_bits, set_bits_to_byte};
use crate::error::ProfileError;

use super::model::{EnumFieldSpec, FieldSpec, FunctionGroup, Operator};

/// Command selector to splice into the decoded output as a synthesized
/// `CMD` field (§4.4 step 6) - resolved by the caller (it already had to
/// read this to pick which [`FunctionGroup`] to decode against) and
/// threaded through so the decode pass doesn't re-derive it.
pub struct CommandSelector<'a> {
    pub spec: &'a EnumFieldSpec,
    pub raw: i64,
}

/// One decoded field, in the same order the profile XML declared it.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedField {
    pub shortcut: String,
    pub raw_value: i64,
    pub value: FieldValue,
    pub description: String,
    pub unit: Option<String>,
    pub is_status: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Bool(bool),
}

/// A value supplied for encoding, keyed by field shortcut.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodeValue {
    Number(f64),
    Integer(i64),
    Text(String),
    Bool(bool),
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn decode_enum(spec: &EnumFieldSpec, raw: i64) -> Result<(String, Option<f64>), ProfileError> {
    if let Some(item) = spec.items.iter().find(|i| i.value == raw) {
        return Ok((item.description.clone(), None));
    }
    if let Some(range) = spec.range_items.iter().find(|r| raw >= r.start && raw <= r.end) {
        return Ok((range.description.clone(), Some(round3(raw as f64 * range.multiplier))));
    }
    Err(ProfileError::InvalidEnumValue { shortcut: spec.shortcut.clone(), value: raw.to_string() })
}

/// Decodes every field in `group` against `payload` (the user-data bytes,
/// RORG/sender/status stripped) and `status_byte`.
pub fn decode(
    group: &FunctionGroup,
    payload: &[u8],
    status_byte: u8,
    global_process: bool,
) -> Result<Vec<DecodedField>, ProfileError> {
    decode_with_command(group, payload, status_byte, global_process, None)
}

/// Same as [`decode`], additionally splicing a synthesized `CMD` field at
/// the front of the output when `command` is supplied (§4.4 step 6).
pub fn decode_with_command(
    group: &FunctionGroup,
    payload: &[u8],
    status_byte: u8,
    global_process: bool,
    command: Option<CommandSelector>,
) -> Result<Vec<DecodedField>, ProfileError> {
    let operator_fields: Vec<&crate::eep::model::ValueFieldSpec> = group
        .fields
        .iter()
        .filter_map(|f| match f {
            FieldSpec::Value(v) if v.operator.is_some() => Some(v),
            _ => None,
        })
        .collect();

    let factor = if global_process && operator_fields.len() == 1 {
        let v = operator_fields[0];
        let raw = get_bits(payload, v.offset, v.size)? as i64;
        match v.operator {
            Some(Operator::Multiplier) => raw as f64,
            Some(Operator::Divisor) => {
                if raw == 0 {
                    1.0
                } else {
                    1.0 / raw as f64
                }
            }
            None => 1.0,
        }
    } else {
        1.0
    };

    let unit_field = group.fields.iter().find_map(|f| match f {
        FieldSpec::Enum(e) if e.shortcut == "UN" => Some(e),
        _ => None,
    });
    let global_unit = match unit_field {
        Some(e) => {
            let raw = get_bits(payload, e.offset, e.size)? as i64;
            Some(decode_enum(e, raw)?.0)
        }
        None => None,
    };

    // Sensor-availability suppression (§4.4 step 4): TSN=0 hides TMP + TSN
    // itself; HSN=0 hides HUM + HSN.
    let mut suppressed: HashSet<&str> = HashSet::new();
    for pair in [("TSN", "TMP"), ("HSN", "HUM")] {
        let (flag_shortcut, metric_shortcut) = pair;
        if let Some(FieldSpec::Value(v)) = group.fields.iter().find(|f| f.shortcut() == flag_shortcut) {
            let raw = get_bits(payload, v.offset, v.size)?;
            if raw == 0 {
                suppressed.insert(flag_shortcut);
                suppressed.insert(metric_shortcut);
            }
        }
    }

    let mut out = Vec::with_capacity(group.fields.len() + 1);
    if let Some(CommandSelector { spec, raw }) = command {
        let (description, _) = decode_enum(spec, raw)?;
        out.push(DecodedField {
            shortcut: "CMD".to_string(),
            raw_value: raw,
            value: FieldValue::Text(description.clone()),
            description,
            unit: None,
            is_status: false,
        });
    }
    for field in &group.fields {
        let shortcut = field.shortcut();
        if suppressed.contains(shortcut) {
            continue;
        }

        match field {
            FieldSpec::Status(s) => {
                let raw = get_bits_from_byte(status_byte, s.offset, s.size)?;
                out.push(DecodedField {
                    shortcut: s.shortcut.clone(),
                    raw_value: raw as i64,
                    value: FieldValue::Bool(raw != 0),
                    description: s.description.clone(),
                    unit: None,
                    is_status: true,
                });
            }
            FieldSpec::Value(v) => {
                let raw = get_bits(payload, v.offset, v.size)? as i64;
                let (range_min, range_max) = v.range;
                let (scale_min, scale_max) = v.scale;
                let m = if range_max == range_min { 0.0 } else { (scale_max - scale_min) / (range_max - range_min) as f64 };
                let scaled = m * (raw - range_min) as f64 + scale_min;
                let final_value = round3(scaled * factor);
                out.push(DecodedField {
                    shortcut: v.shortcut.clone(),
                    raw_value: raw,
                    value: FieldValue::Number(final_value),
                    description: v.description.clone(),
                    unit: v.unit.clone().or_else(|| global_unit.clone()),
                    is_status: false,
                });
            }
            FieldSpec::Enum(e) => {
                let raw = get_bits(payload, e.offset, e.size)? as i64;
                let (description, scaled) = decode_enum(e, raw)?;
                let value = match scaled {
                    Some(n) => FieldValue::Number(n),
                    None => FieldValue::Text(description.clone()),
                };
                out.push(DecodedField {
                    shortcut: e.shortcut.clone(),
                    raw_value: raw,
                    value,
                    description,
                    unit: None,
                    is_status: false,
                });
            }
        }
    }

    Ok(out)
}

/// Encodes `inputs` (keyed by field shortcut) into `payload`/`status_byte`
/// (§4.4 "Encode"). Unknown shortcuts are silently ignored, matching a
/// caller that supplies a superset of fields (e.g. a JSON command payload
/// with extra bookkeeping keys).
pub fn encode(
    group: &FunctionGroup,
    payload: &mut [u8],
    status_byte: &mut u8,
    inputs: &std::collections::HashMap<String, EncodeValue>,
) -> Result<(), ProfileError> {
    for field in &group.fields {
        let shortcut = field.shortcut();
        let Some(input) = inputs.get(shortcut) else { continue };

        match field {
            FieldSpec::Status(s) => {
                let raw = match input {
                    EncodeValue::Bool(b) => *b as u8,
                    EncodeValue::Integer(i) => *i as u8,
                    EncodeValue::Number(n) => *n as u8,
                    EncodeValue::Text(_) => {
                        return Err(ProfileError::UnknownField(shortcut.to_string()));
                    }
                };
                set_bits_to_byte(status_byte, s.offset, s.size, raw)?;
            }
            FieldSpec::Value(v) => {
                let numeric = match input {
                    EncodeValue::Number(n) => *n,
                    EncodeValue::Integer(i) => *i as f64,
                    EncodeValue::Bool(b) => *b as u8 as f64,
                    EncodeValue::Text(t) => t.parse::<f64>().map_err(|_| ProfileError::InvalidEnumValue {
                        shortcut: shortcut.to_string(),
                        value: t.clone(),
                    })?,
                };
                let (range_min, range_max) = v.range;
                let (scale_min, scale_max) = v.scale;
                let m = if scale_max == scale_min { 0.0 } else { (range_max - range_min) as f64 / (scale_max - scale_min) };
                let raw = (m * (numeric - scale_min) + range_min as f64).trunc() as i64;
                if raw < range_min || raw > range_max {
                    return Err(ProfileError::OutOfRangeRaw {
                        shortcut: shortcut.to_string(),
                        raw,
                        min: range_min,
                        max: range_max,
                    });
                }
                set_bits(payload, v.offset, v.size, raw as u64)?;
            }
            FieldSpec::Enum(e) => {
                let raw = match input {
                    EncodeValue::Integer(i) => *i,
                    EncodeValue::Number(n) => *n as i64,
                    EncodeValue::Text(t) => e
                        .items
                        .iter()
                        .find(|item| &item.description == t)
                        .map(|item| item.value)
                        .ok_or_else(|| ProfileError::InvalidEnumValue { shortcut: shortcut.to_string(), value: t.clone() })?,
                    EncodeValue::Bool(b) => *b as i64,
                };
                set_bits(payload, e.offset, e.size, raw as u64)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eep::model::{EnumItem, EnumRangeItem, StatusFieldSpec, ValueFieldSpec};

    fn temp_humidity_group() -> FunctionGroup {
        FunctionGroup {
            payload_bits: 32,
            fields: vec![
                FieldSpec::Value(ValueFieldSpec {
                    shortcut: "HUM".into(),
                    description: "Humidity".into(),
                    offset: 8,
                    size: 8,
                    unit: Some("%".into()),
                    range: (0, 250),
                    scale: (0.0, 100.0),
                    operator: None,
                }),
                FieldSpec::Value(ValueFieldSpec {
                    shortcut: "TMP".into(),
                    description: "Temperature".into(),
                    offset: 16,
                    size: 8,
                    unit: Some("°C".into()),
                    range: (0, 255),
                    scale: (40.0, 0.0),
                    operator: None,
                }),
                FieldSpec::Value(ValueFieldSpec {
                    shortcut: "TSN".into(),
                    description: "Temperature sensor available".into(),
                    offset: 31,
                    size: 1,
                    unit: None,
                    range: (0, 1),
                    scale: (0.0, 1.0),
                    operator: None,
                }),
            ],
        }
    }

    #[test]
    fn decodes_temperature_with_inverted_scale() {
        let group = temp_humidity_group();
        // byte0=0 unused, byte1=humidity(raw 125->~50%), byte2=temp raw=0x08 (8), byte3 bit0=1 (present)
        let payload = [0x00, 125, 0x08, 0x01];
        let fields = decode(&group, &payload, 0x00, true).unwrap();
        let tmp = fields.iter().find(|f| f.shortcut == "TMP").unwrap();
        match tmp.value {
            FieldValue::Number(n) => assert!((n - 38.745).abs() < 0.01, "got {n}"),
            _ => panic!("expected numeric TMP"),
        }
    }

    #[test]
    fn suppresses_temperature_when_sensor_absent() {
        let group = temp_humidity_group();
        let payload = [0x00, 125, 0x08, 0x00]; // TSN bit clear
        let fields = decode(&group, &payload, 0x00, true).unwrap();
        assert!(fields.iter().all(|f| f.shortcut != "TMP"));
        assert!(fields.iter().all(|f| f.shortcut != "TSN"));
        assert!(fields.iter().any(|f| f.shortcut == "HUM"));
    }

    #[test]
    fn applies_divisor_operator_across_group() {
        let group = FunctionGroup {
            payload_bits: 24,
            fields: vec![
                FieldSpec::Value(ValueFieldSpec {
                    shortcut: "DIV".into(),
                    description: "Divisor".into(),
                    offset: 0,
                    size: 8,
                    unit: None,
                    range: (0, 255),
                    scale: (0.0, 255.0),
                    operator: Some(Operator::Divisor),
                }),
                FieldSpec::Enum(EnumFieldSpec {
                    shortcut: "UN".into(),
                    description: "Unit".into(),
                    offset: 8,
                    size: 8,
                    items: vec![EnumItem { value: 1, description: "m/s".into() }],
                    range_items: vec![],
                }),
                FieldSpec::Value(ValueFieldSpec {
                    shortcut: "SPD".into(),
                    description: "Speed".into(),
                    offset: 16,
                    size: 8,
                    unit: None,
                    range: (0, 255),
                    scale: (0.0, 255.0),
                    operator: None,
                }),
            ],
        };
        let payload = [2u8, 1, 100];
        let fields = decode(&group, &payload, 0, true).unwrap();
        let spd = fields.iter().find(|f| f.shortcut == "SPD").unwrap();
        assert_eq!(spd.value, FieldValue::Number(50.0));
        assert_eq!(spd.unit.as_deref(), Some("m/s"));
    }

    #[test]
    fn status_field_reads_from_status_byte() {
        let group = FunctionGroup {
            payload_bits: 8,
            fields: vec![FieldSpec::Status(StatusFieldSpec {
                shortcut: "T21".into(),
                description: "PTM switch module type".into(),
                offset: 5,
                size: 1,
            })],
        };
        let fields = decode(&group, &[0x00], 0b0000_0100, true).unwrap();
        assert_eq!(fields[0].value, FieldValue::Bool(true));
        assert!(fields[0].is_status);
    }

    #[test]
    fn encode_round_trips_value_field() {
        let group = temp_humidity_group();
        let mut payload = [0u8; 4];
        let mut status = 0u8;
        let mut inputs = std::collections::HashMap::new();
        inputs.insert("TMP".to_string(), EncodeValue::Number(38.745));
        inputs.insert("TSN".to_string(), EncodeValue::Integer(1));
        encode(&group, &mut payload, &mut status, &inputs).unwrap();
        let fields = decode(&group, &payload, status, true).unwrap();
        let tmp = fields.iter().find(|f| f.shortcut == "TMP").unwrap();
        match tmp.value {
            FieldValue::Number(n) => assert!((n - 38.745).abs() < 0.01),
            _ => panic!("expected numeric"),
        }
    }

    #[test]
    fn enum_range_item_scales_raw() {
        let group = FunctionGroup {
            payload_bits: 8,
            fields: vec![FieldSpec::Enum(EnumFieldSpec {
                shortcut: "ENERGY".into(),
                description: "Energy status".into(),
                offset: 0,
                size: 8,
                items: vec![EnumItem { value: 0, description: "last_message".into() }],
                range_items: vec![EnumRangeItem { start: 1, end: 100, description: "percent".into(), multiplier: 1.0 }],
            })],
        };
        let fields = decode(&group, &[42], 0, true).unwrap();
        assert_eq!(fields[0].value, FieldValue::Number(42.0));
    }

    #[test]
    fn command_selector_is_spliced_in_as_a_synthesized_cmd_field() {
        let group = FunctionGroup {
            payload_bits: 8,
            fields: vec![FieldSpec::Value(ValueFieldSpec {
                shortcut: "MV".into(),
                description: "Measured value".into(),
                offset: 0,
                size: 8,
                unit: Some("W".into()),
                range: (0, 255),
                scale: (0.0, 2550.0),
                operator: None,
            })],
        };
        let commands = EnumFieldSpec {
            shortcut: "CMD".into(),
            description: "Command".into(),
            offset: 0,
            size: 4,
            items: vec![EnumItem { value: 1, description: "ON".into() }, EnumItem { value: 2, description: "OFF".into() }],
            range_items: vec![],
        };
        let payload = [100u8];
        let fields =
            decode_with_command(&group, &payload, 0, true, Some(CommandSelector { spec: &commands, raw: 1 })).unwrap();
        assert_eq!(fields[0].shortcut, "CMD");
        assert_eq!(fields[0].raw_value, 1);
        assert_eq!(fields[0].value, FieldValue::Text("ON".into()));
        assert_eq!(fields[1].shortcut, "MV");
    }
}
