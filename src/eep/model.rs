//! Typed representation of a loaded EEP catalogue: profiles, telegram
//! forms (`FunctionGroup`s) and the field specifications that drive the
//! decode/encode engine in [`super::codec`].

use std::collections::BTreeMap;

/// A discrete enum item: `raw == value` matches exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumItem {
    pub value: i64,
    pub description: String,
}

/// An interval enum item: `start <= raw <= end` matches, optionally scaled
/// by `multiplier` for a numeric reading (e.g. energy-status percentages).
#[derive(Debug, Clone, PartialEq)]
pub struct EnumRangeItem {
    pub start: i64,
    pub end: i64,
    pub description: String,
    pub multiplier: f64,
}

/// Whether a value field additionally acts as a cross-field scaling factor
/// for the rest of its `FunctionGroup` (§4.4 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Multiplier,
    Divisor,
}

#[derive(Debug, Clone)]
pub struct StatusFieldSpec {
    pub shortcut: String,
    pub description: String,
    /// Bit offset/size within the status byte (byte-scoped numbering).
    pub offset: usize,
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct ValueFieldSpec {
    pub shortcut: String,
    pub description: String,
    pub offset: usize,
    pub size: usize,
    pub unit: Option<String>,
    pub range: (i64, i64),
    pub scale: (f64, f64),
    pub operator: Option<Operator>,
}

#[derive(Debug, Clone)]
pub struct EnumFieldSpec {
    pub shortcut: String,
    pub description: String,
    pub offset: usize,
    pub size: usize,
    pub items: Vec<EnumItem>,
    pub range_items: Vec<EnumRangeItem>,
}

#[derive(Debug, Clone)]
pub enum FieldSpec {
    Status(StatusFieldSpec),
    Value(ValueFieldSpec),
    Enum(EnumFieldSpec),
}

impl FieldSpec {
    pub fn shortcut(&self) -> &str {
        match self {
            FieldSpec::Status(s) => &s.shortcut,
            FieldSpec::Value(v) => &v.shortcut,
            FieldSpec::Enum(e) => &e.shortcut,
        }
    }
}

/// One concrete telegram form within a profile - its field layout and the
/// commands/direction pair that selects it.
#[derive(Debug, Clone, Default)]
pub struct FunctionGroup {
    pub payload_bits: usize,
    pub fields: Vec<FieldSpec>,
}

/// Keys a profile's variants: the command id carried by its `commands`
/// selector (if any), and `RadioDirection` (if the XML splits request/response forms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct VariantKey {
    pub command: Option<i64>,
    pub direction: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub rorg: u8,
    pub func: u8,
    pub type_: u8,
    pub description: String,
    pub commands: Option<EnumFieldSpec>,
    pub variants: BTreeMap<VariantKey, FunctionGroup>,
}

impl Profile {
    pub fn code(&self) -> String {
        format!("{:02X}-{:02X}-{:02X}", self.rorg, self.func, self.type_)
    }

    /// Resolves a telegram form for `(command, direction)`, falling back to
    /// `(command, None)` when the XML didn't split by direction (§4.3).
    pub fn get_telegram_form(
        &self,
        command: Option<i64>,
        direction: Option<u8>,
    ) -> Result<&FunctionGroup, crate::error::ProfileError> {
        if self.commands.is_some() && command.is_none() {
            return Err(crate::error::ProfileError::CommandRequired(self.code()));
        }
        let key = VariantKey { command, direction };
        if let Some(group) = self.variants.get(&key) {
            return Ok(group);
        }
        let fallback = VariantKey { command, direction: None };
        self.variants.get(&fallback).ok_or_else(|| crate::error::ProfileError::FormNotFound {
            profile: self.code(),
            command,
            direction,
        })
    }
}

/// A three-level `rorg -> func -> type -> Profile` map, immutable after load.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    profiles: BTreeMap<(u8, u8, u8), Profile>,
}

impl Catalogue {
    pub fn new() -> Self {
        Self { profiles: BTreeMap::new() }
    }

    pub fn insert(&mut self, profile: Profile) {
        self.profiles.insert((profile.rorg, profile.func, profile.type_), profile);
    }

    pub fn get_profile(&self, rorg: u8, func: u8, type_: u8) -> Result<&Profile, crate::error::ProfileError> {
        self.profiles.get(&(rorg, func, type_)).ok_or(crate::error::ProfileError::NotFound { rorg, func, type_ })
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }
}
