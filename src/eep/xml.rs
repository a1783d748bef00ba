//! Streaming XML loader for the EEP catalogue (§4.3, §6.5).
//!
//! The catalogue file is read once at startup; a streaming reader
//! (`quick_xml`) is enough since the element grammar is shallow and
//! regular - there's no benefit to a DOM tree that outlives the load.

use std::collections::HashMap;
use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::ProfileError;

use super::model::{Catalogue, EnumFieldSpec, EnumItem, EnumRangeItem, FieldSpec, FunctionGroup, Operator, Profile, StatusFieldSpec, ValueFieldSpec, VariantKey};

fn parse_hex_attr(tag: &BytesStart, name: &str) -> Option<String> {
    tag.attributes().flatten().find(|a| a.key.as_ref() == name.as_bytes()).map(|a| {
        String::from_utf8_lossy(&a.value).into_owned()
    })
}

fn parse_u8_hex(s: &str) -> Result<u8, ProfileError> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(s, 16).map_err(|e| ProfileError::CatalogueMalformed(format!("bad hex byte {s:?}: {e}")))
}

fn attr(tag: &BytesStart, name: &str) -> Option<String> {
    parse_hex_attr(tag, name)
}

fn attr_usize(tag: &BytesStart, name: &str) -> Option<usize> {
    attr(tag, name)?.parse().ok()
}

fn attr_i64(tag: &BytesStart, name: &str) -> Option<i64> {
    attr(tag, name)?.parse().ok()
}

fn attr_f64(tag: &BytesStart, name: &str) -> Option<f64> {
    attr(tag, name)?.parse().ok()
}

#[derive(Default)]
struct FieldBuilder {
    kind: Option<&'static str>, // "status" | "value" | "enum"
    shortcut: String,
    description: String,
    offset: usize,
    size: usize,
    unit: Option<String>,
    operator: Option<Operator>,
    range: (i64, i64),
    scale: (f64, f64),
    items: Vec<EnumItem>,
    range_items: Vec<EnumRangeItem>,
    in_range_elem: bool,
    in_scale_elem: bool,
    pending_minmax: (Option<f64>, Option<f64>),
}

impl FieldBuilder {
    fn into_field_spec(self) -> Result<FieldSpec, ProfileError> {
        match self.kind {
            Some("status") => Ok(FieldSpec::Status(StatusFieldSpec {
                shortcut: self.shortcut,
                description: self.description,
                offset: self.offset,
                size: self.size,
            })),
            Some("value") => Ok(FieldSpec::Value(ValueFieldSpec {
                shortcut: self.shortcut,
                description: self.description,
                offset: self.offset,
                size: self.size,
                unit: self.unit,
                range: self.range,
                scale: self.scale,
                operator: self.operator,
            })),
            Some("enum") => Ok(FieldSpec::Enum(EnumFieldSpec {
                shortcut: self.shortcut,
                description: self.description,
                offset: self.offset,
                size: self.size,
                items: self.items,
                range_items: self.range_items,
            })),
            _ => Err(ProfileError::CatalogueMalformed("field with no kind".into())),
        }
    }

    fn into_enum_spec(self) -> EnumFieldSpec {
        EnumFieldSpec {
            shortcut: self.shortcut,
            description: self.description,
            offset: self.offset,
            size: self.size,
            items: self.items,
            range_items: self.range_items,
        }
    }
}

#[derive(Default)]
struct ProfileBuilder {
    rorg: u8,
    func: u8,
    type_: u8,
    description: String,
    commands: Option<EnumFieldSpec>,
    variants: HashMap<VariantKey, FunctionGroup>,
    in_command: bool,
}

/// Parses a full EEP catalogue XML document from any buffered reader.
pub fn load<R: BufRead>(reader: R) -> Result<Catalogue, ProfileError> {
    let mut xml = Reader::from_reader(reader);
    xml.config_mut().trim_text(true);

    let mut catalogue = Catalogue::new();
    let mut buf = Vec::new();

    let mut current_rorg: u8 = 0;
    let mut current_func: u8 = 0;
    let mut profile: Option<ProfileBuilder> = None;
    let mut data_key: Option<VariantKey> = None;
    let mut data_fields: Vec<FieldSpec> = Vec::new();
    let mut data_bits: usize = 0;
    let mut field: Option<FieldBuilder> = None;

    loop {
        let event = xml.read_event_into(&mut buf).map_err(|e| ProfileError::CatalogueMalformed(e.to_string()))?;
        let (tag, is_empty) = match event {
            Event::Eof => break,
            Event::Start(tag) => (tag, false),
            Event::Empty(tag) => (tag, true),
            Event::End(tag) => {
                let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
                match name.as_str() {
                    "min" | "max" => {}
                    "range" => {
                        if let Some(f) = field.as_mut() {
                            let (min, max) = f.pending_minmax;
                            f.range = (min.unwrap_or(0.0) as i64, max.unwrap_or(0.0) as i64);
                            f.in_range_elem = false;
                        }
                    }
                    "scale" => {
                        if let Some(f) = field.as_mut() {
                            let (min, max) = f.pending_minmax;
                            f.scale = (min.unwrap_or(0.0), max.unwrap_or(0.0));
                            f.in_scale_elem = false;
                        }
                    }
                    "status" | "value" | "enum" => {
                        finish_field(&mut field, &mut data_fields)?;
                    }
                    "command" => {
                        if let (Some(p), Some(f)) = (profile.as_mut(), field.take()) {
                            p.commands = Some(f.into_enum_spec());
                            p.in_command = false;
                        }
                    }
                    "data" => {
                        if let (Some(p), Some(key)) = (profile.as_mut(), data_key.take()) {
                            p.variants.insert(
                                key,
                                FunctionGroup { payload_bits: data_bits, fields: std::mem::take(&mut data_fields) },
                            );
                        }
                    }
                    "profile" => {
                        if let Some(p) = profile.take() {
                            catalogue.insert(Profile {
                                rorg: p.rorg,
                                func: p.func,
                                type_: p.type_,
                                description: p.description,
                                commands: p.commands,
                                variants: p.variants.into_iter().collect(),
                            });
                        }
                    }
                    _ => {}
                }
                buf.clear();
                continue;
            }
            _ => {
                buf.clear();
                continue;
            }
        };

        let name = tag.name().as_ref().to_vec();
        let name = String::from_utf8_lossy(&name).into_owned();

        match name.as_str() {
            "telegram" => {
                current_rorg = attr(&tag, "rorg").map(|s| parse_u8_hex(&s)).transpose()?.unwrap_or(0);
            }
            "profiles" => {
                current_func = attr(&tag, "func").map(|s| parse_u8_hex(&s)).transpose()?.unwrap_or(0);
            }
            "profile" => {
                let type_ = attr(&tag, "type").map(|s| parse_u8_hex(&s)).transpose()?.unwrap_or(0);
                let description = attr(&tag, "description").unwrap_or_default();
                profile = Some(ProfileBuilder {
                    rorg: current_rorg,
                    func: current_func,
                    type_,
                    description,
                    commands: None,
                    variants: HashMap::new(),
                    in_command: false,
                });
            }
            "command" => {
                if let Some(p) = profile.as_mut() {
                    p.in_command = true;
                }
                field = Some(FieldBuilder {
                    kind: Some("enum"),
                    shortcut: attr(&tag, "shortcut").unwrap_or_else(|| "CMD".to_string()),
                    description: attr(&tag, "description").unwrap_or_default(),
                    offset: attr_usize(&tag, "offset").unwrap_or(0),
                    size: attr_usize(&tag, "size").unwrap_or(8),
                    ..Default::default()
                });
            }
            "data" => {
                let command = attr_i64(&tag, "command");
                let direction = attr(&tag, "direction").map(|s| parse_u8_hex(&s)).transpose()?;
                data_key = Some(VariantKey { command, direction });
                data_bits = attr_usize(&tag, "bits").unwrap_or(0);
                data_fields = Vec::new();
            }
            "status" => {
                field = Some(FieldBuilder {
                    kind: Some("status"),
                    shortcut: attr(&tag, "shortcut").unwrap_or_default(),
                    description: attr(&tag, "description").unwrap_or_default(),
                    offset: attr_usize(&tag, "offset").unwrap_or(0),
                    size: attr_usize(&tag, "size").unwrap_or(1),
                    ..Default::default()
                });
                if is_empty {
                    finish_field(&mut field, &mut data_fields)?;
                }
            }
            "value" => {
                let operator = attr(&tag, "operator").and_then(|s| match s.as_str() {
                    "multiplier" => Some(Operator::Multiplier),
                    "divisor" => Some(Operator::Divisor),
                    _ => None,
                });
                field = Some(FieldBuilder {
                    kind: Some("value"),
                    shortcut: attr(&tag, "shortcut").unwrap_or_default(),
                    description: attr(&tag, "description").unwrap_or_default(),
                    offset: attr_usize(&tag, "offset").unwrap_or(0),
                    size: attr_usize(&tag, "size").unwrap_or(0),
                    unit: attr(&tag, "unit"),
                    operator,
                    ..Default::default()
                });
                if is_empty {
                    finish_field(&mut field, &mut data_fields)?;
                }
            }
            "enum" => {
                field = Some(FieldBuilder {
                    kind: Some("enum"),
                    shortcut: attr(&tag, "shortcut").unwrap_or_default(),
                    description: attr(&tag, "description").unwrap_or_default(),
                    offset: attr_usize(&tag, "offset").unwrap_or(0),
                    size: attr_usize(&tag, "size").unwrap_or(0),
                    ..Default::default()
                });
                if is_empty {
                    finish_field(&mut field, &mut data_fields)?;
                }
            }
            "range" => {
                if let Some(f) = field.as_mut() {
                    f.in_range_elem = true;
                    f.in_scale_elem = false;
                    f.pending_minmax = (None, None);
                }
            }
            "scale" => {
                if let Some(f) = field.as_mut() {
                    f.in_scale_elem = true;
                    f.in_range_elem = false;
                    f.pending_minmax = (None, None);
                }
            }
            "min" => {
                if let Some(v) = attr_f64(&tag, "value") {
                    if let Some(f) = field.as_mut() {
                        f.pending_minmax.0 = Some(v);
                    }
                }
            }
            "max" => {
                if let Some(v) = attr_f64(&tag, "value") {
                    if let Some(f) = field.as_mut() {
                        f.pending_minmax.1 = Some(v);
                    }
                }
            }
            "item" => {
                if let (Some(v), Some(desc)) = (attr_i64(&tag, "value"), attr(&tag, "description")) {
                    if let Some(f) = field.as_mut() {
                        f.items.push(EnumItem { value: v, description: desc });
                    }
                }
            }
            "rangeitem" => {
                if let (Some(start), Some(end), Some(desc)) =
                    (attr_i64(&tag, "start"), attr_i64(&tag, "end"), attr(&tag, "description"))
                {
                    let multiplier = attr_f64(&tag, "multiplier").unwrap_or(1.0);
                    if let Some(f) = field.as_mut() {
                        f.range_items.push(EnumRangeItem { start, end, description: desc, multiplier });
                    }
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(catalogue)
}

fn finish_field(field: &mut Option<FieldBuilder>, data_fields: &mut Vec<FieldSpec>) -> Result<(), ProfileError> {
    if let Some(f) = field.take() {
        data_fields.push(f.into_field_spec()?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<telegrams>
  <telegram rorg="0xA5">
    <profiles func="0x02">
      <profile type="0x05" description="Temperature Sensor">
        <data bits="32">
          <value shortcut="TMP" description="Temperature" offset="8" size="8" unit="&#176;C">
            <range><min value="255"/><max value="0"/></range>
            <scale><min value="0"/><max value="40"/></scale>
          </value>
          <status shortcut="T21" description="switch type" offset="5" size="1"/>
        </data>
      </profile>
    </profiles>
  </telegram>
  <telegram rorg="0xD2">
    <profiles func="0x01">
      <profile type="0x0E" description="Smart plug">
        <command>
          <item value="1" description="ON"/>
          <item value="2" description="OFF"/>
        </command>
        <data command="1" bits="8">
          <value shortcut="MV" description="Measured value" offset="0" size="8" unit="W">
            <range><min value="0"/><max value="255"/></range>
            <scale><min value="0"/><max value="2550"/></scale>
          </value>
        </data>
      </profile>
    </profiles>
  </telegram>
</telegrams>
"#;

    #[test]
    fn loads_two_profiles_with_nested_range_scale() {
        let catalogue = load(Cursor::new(SAMPLE)).unwrap();
        assert_eq!(catalogue.len(), 2);

        let temp = catalogue.get_profile(0xA5, 0x02, 0x05).unwrap();
        let group = temp.get_telegram_form(None, None).unwrap();
        assert_eq!(group.payload_bits, 32);
        let tmp_field = group.fields.iter().find(|f| f.shortcut() == "TMP").unwrap();
        match tmp_field {
            FieldSpec::Value(v) => {
                assert_eq!(v.range, (255, 0));
                assert_eq!(v.scale, (0.0, 40.0));
                assert_eq!(v.unit.as_deref(), Some("°C"));
            }
            other => panic!("expected value field, got {:?}", other),
        }
    }

    #[test]
    fn self_closing_status_tag_is_still_captured() {
        // `<status .../>` has no children, so quick_xml reports it as
        // `Event::Empty` rather than a `Start`/`End` pair; it must still
        // land in the field list instead of being silently dropped.
        let catalogue = load(Cursor::new(SAMPLE)).unwrap();
        let temp = catalogue.get_profile(0xA5, 0x02, 0x05).unwrap();
        let group = temp.get_telegram_form(None, None).unwrap();
        assert_eq!(group.fields.len(), 2);
        let status_field = group.fields.iter().find(|f| f.shortcut() == "T21").unwrap();
        match status_field {
            FieldSpec::Status(s) => {
                assert_eq!(s.offset, 5);
                assert_eq!(s.size, 1);
            }
            other => panic!("expected status field, got {:?}", other),
        }
    }

    #[test]
    fn loads_profile_with_command_selector() {
        let catalogue = load(Cursor::new(SAMPLE)).unwrap();
        let plug = catalogue.get_profile(0xD2, 0x01, 0x0E).unwrap();
        let commands = plug.commands.as_ref().unwrap();
        assert_eq!(commands.items.len(), 2);
        let form = plug.get_telegram_form(Some(1), None).unwrap();
        assert_eq!(form.fields.len(), 1);

        assert!(matches!(
            plug.get_telegram_form(None, None),
            Err(ProfileError::CommandRequired(_))
        ));
    }

    #[test]
    fn unknown_triple_is_not_found() {
        let catalogue = load(Cursor::new(SAMPLE)).unwrap();
        assert!(matches!(
            catalogue.get_profile(0xF6, 0x02, 0x01),
            Err(ProfileError::NotFound { rorg: 0xF6, func: 0x02, type_: 0x01 })
        ));
    }
}
