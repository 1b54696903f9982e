//! Field and enumerated-type dictionaries
//!
//! A dictionary is filled either from the RDM text files on disk or from the
//! parts of a dictionary download, and is then used to interpret field lists.

pub mod file;
mod value;
pub mod wire;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use tracing::{debug, info};

use crate::data::{DataValue, FieldEntry, FieldList, Payload};
use crate::error::DictionaryError;

pub use file::{parse_enum_types, parse_field_dictionary};

/// What a dictionary part carries, from the summary `Type` element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionaryKind {
    FieldDefinitions,
    EnumTables,
}

/// Wire data type of a field's value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RwfType {
    Int,
    UInt,
    Float,
    Double,
    Real,
    Date,
    Time,
    DateTime,
    Qos,
    State,
    Enum,
    Array,
    Buffer,
    AsciiString,
    Utf8String,
    RmtesString,
    /// Container or otherwise uninterpreted type
    Other(u8),
}

impl RwfType {
    pub fn code(self) -> u8 {
        match self {
            RwfType::Int => 3,
            RwfType::UInt => 4,
            RwfType::Float => 5,
            RwfType::Double => 6,
            RwfType::Real => 8,
            RwfType::Date => 9,
            RwfType::Time => 10,
            RwfType::DateTime => 11,
            RwfType::Qos => 12,
            RwfType::State => 13,
            RwfType::Enum => 14,
            RwfType::Array => 15,
            RwfType::Buffer => 16,
            RwfType::AsciiString => 17,
            RwfType::Utf8String => 18,
            RwfType::RmtesString => 19,
            RwfType::Other(code) => code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            3 => RwfType::Int,
            4 => RwfType::UInt,
            5 => RwfType::Float,
            6 => RwfType::Double,
            8 => RwfType::Real,
            9 => RwfType::Date,
            10 => RwfType::Time,
            11 => RwfType::DateTime,
            12 => RwfType::Qos,
            13 => RwfType::State,
            14 => RwfType::Enum,
            15 => RwfType::Array,
            16 => RwfType::Buffer,
            17 => RwfType::AsciiString,
            18 => RwfType::Utf8String,
            19 => RwfType::RmtesString,
            other => RwfType::Other(other),
        }
    }

    /// Type name as written in the field dictionary file, size suffix allowed (`UINT64`, `REAL64`)
    pub fn from_name(name: &str) -> Option<Self> {
        let base = name.trim_end_matches(|c: char| c.is_ascii_digit());
        let ty = match base {
            "INT" => RwfType::Int,
            "UINT" => RwfType::UInt,
            "FLOAT" => RwfType::Float,
            "DOUBLE" => RwfType::Double,
            "REAL" => RwfType::Real,
            "DATE" => RwfType::Date,
            "TIME" => RwfType::Time,
            "DATETIME" | "DATE_TIME" => RwfType::DateTime,
            "QOS" => RwfType::Qos,
            "STATE" | "STATUS" => RwfType::State,
            "ENUM" => RwfType::Enum,
            "ARRAY" => RwfType::Array,
            "BUFFER" => RwfType::Buffer,
            "ASCII_STRING" => RwfType::AsciiString,
            "UTF8_STRING" => RwfType::Utf8String,
            "RMTES_STRING" => RwfType::RmtesString,
            "OPAQUE" => RwfType::Other(130),
            "XML" => RwfType::Other(131),
            "FIELD_LIST" => RwfType::Other(132),
            "ELEMENT_LIST" | "ELEM_LIST" => RwfType::Other(133),
            "ANSI_PAGE" => RwfType::Other(134),
            "FILTER_LIST" => RwfType::Other(135),
            "VECTOR" => RwfType::Other(136),
            "MAP" => RwfType::Other(137),
            "SERIES" => RwfType::Other(138),
            "MSG" => RwfType::Other(141),
            _ => return None,
        };
        Some(ty)
    }
}

/// Marketfeed field type from the dictionary's TYPE column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfType {
    None,
    TimeSeconds,
    Integer,
    Numeric,
    Date,
    Price,
    Alphanumeric,
    Enumerated,
    Time,
    Binary,
    LongAlphanumeric,
    Opaque,
}

impl MfType {
    pub fn code(self) -> i8 {
        match self {
            MfType::None => -1,
            MfType::TimeSeconds => 0,
            MfType::Integer => 1,
            MfType::Numeric => 2,
            MfType::Date => 3,
            MfType::Price => 4,
            MfType::Alphanumeric => 5,
            MfType::Enumerated => 6,
            MfType::Time => 7,
            MfType::Binary => 8,
            MfType::LongAlphanumeric => 9,
            MfType::Opaque => 10,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        let ty = match code {
            -1 => MfType::None,
            0 => MfType::TimeSeconds,
            1 => MfType::Integer,
            2 => MfType::Numeric,
            3 => MfType::Date,
            4 => MfType::Price,
            5 => MfType::Alphanumeric,
            6 => MfType::Enumerated,
            7 => MfType::Time,
            8 => MfType::Binary,
            9 => MfType::LongAlphanumeric,
            10 => MfType::Opaque,
            _ => return None,
        };
        Some(ty)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name {
            "NONE" => MfType::None,
            "TIME_SECONDS" => MfType::TimeSeconds,
            "INTEGER" => MfType::Integer,
            "NUMERIC" => MfType::Numeric,
            "DATE" => MfType::Date,
            "PRICE" => MfType::Price,
            "ALPHANUMERIC" => MfType::Alphanumeric,
            "ENUMERATED" => MfType::Enumerated,
            "TIME" => MfType::Time,
            "BINARY" => MfType::Binary,
            "LONG_ALPHANUMERIC" => MfType::LongAlphanumeric,
            "OPAQUE" => MfType::Opaque,
            _ => return None,
        };
        Some(ty)
    }
}

/// One field definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub fid: i16,
    pub acronym: String,
    pub dde_acronym: String,
    /// Field this one ripples into, 0 for none
    pub ripples_to: i16,
    pub mf_type: MfType,
    pub length: u16,
    pub rwf_type: RwfType,
    pub rwf_len: u16,
}

/// Display values shared by one or more enumerated fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumTable {
    pub fids: Vec<i16>,
    pub displays: BTreeMap<u16, String>,
}

/// A field list entry interpreted through the dictionary
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedField {
    pub fid: i16,
    pub acronym: String,
    pub value: DataValue,
    /// Display text of an enumerated value, when the table has one
    pub enum_display: Option<String>,
}

impl fmt::Display for DecodedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.acronym, self.value)?;
        if let Some(display) = &self.enum_display {
            write!(f, " ({display})")?;
        }
        Ok(())
    }
}

/// Field and enum lookup used to load dictionaries and interpret field lists
pub trait Dictionary {
    fn load_field_file(&mut self, path: &Path) -> Result<(), DictionaryError>;

    fn load_enum_file(&mut self, path: &Path) -> Result<(), DictionaryError>;

    /// Which kind of dictionary the first part of a download carries
    fn decode_type_tag(&self, payload: &Payload) -> Result<DictionaryKind, DictionaryError> {
        wire::type_tag(payload)
    }

    /// Apply one part of a field dictionary download. Returns the number of definitions added.
    fn decode_field_part(&mut self, payload: &Payload) -> Result<usize, DictionaryError>;

    /// Apply one part of an enum table download. Returns the number of tables added.
    fn decode_enum_part(&mut self, payload: &Payload) -> Result<usize, DictionaryError>;

    fn lookup(&self, fid: i16) -> Option<&FieldDef>;

    fn enum_display(&self, fid: i16, value: u16) -> Option<&str>;

    fn clear(&mut self);

    fn decode_field(&self, entry: &FieldEntry) -> Result<DecodedField, DictionaryError> {
        let def = self
            .lookup(entry.fid)
            .ok_or(DictionaryError::UnknownFid(entry.fid))?;
        let value = value::decode(def, entry.value.as_deref())?;
        let enum_display = match value {
            DataValue::Enum(v) => self.enum_display(def.fid, v).map(str::to_owned),
            _ => None,
        };
        Ok(DecodedField {
            fid: def.fid,
            acronym: def.acronym.clone(),
            value,
            enum_display,
        })
    }

    fn decode_field_list(&self, list: &FieldList) -> Result<Vec<DecodedField>, DictionaryError> {
        list.entries.iter().map(|e| self.decode_field(e)).collect()
    }
}

/// In-memory dictionary keyed by field id
#[derive(Debug, Clone, Default)]
pub struct DataDictionary {
    fields: BTreeMap<i16, FieldDef>,
    enum_tables: Vec<EnumTable>,
    enum_index: HashMap<i16, usize>,
    field_version: Option<String>,
    enum_version: Option<String>,
}

impl DataDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn enum_table_count(&self) -> usize {
        self.enum_tables.len()
    }

    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }

    pub fn has_enums(&self) -> bool {
        !self.enum_tables.is_empty()
    }

    pub fn field_version(&self) -> Option<&str> {
        self.field_version.as_deref()
    }

    pub fn enum_version(&self) -> Option<&str> {
        self.enum_version.as_deref()
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.values()
    }

    pub fn enum_tables(&self) -> &[EnumTable] {
        &self.enum_tables
    }

    pub fn add_fields(&mut self, defs: impl IntoIterator<Item = FieldDef>) -> usize {
        let mut added = 0;
        for def in defs {
            self.fields.insert(def.fid, def);
            added += 1;
        }
        added
    }

    pub fn add_enum_tables(&mut self, tables: impl IntoIterator<Item = EnumTable>) -> usize {
        let mut added = 0;
        for table in tables {
            let index = self.enum_tables.len();
            for fid in &table.fids {
                self.enum_index.insert(*fid, index);
            }
            self.enum_tables.push(table);
            added += 1;
        }
        added
    }
}

impl Dictionary for DataDictionary {
    fn load_field_file(&mut self, path: &Path) -> Result<(), DictionaryError> {
        let text = std::fs::read_to_string(path)?;
        let parsed = parse_field_dictionary(&text, &path.display().to_string())?;
        let count = self.add_fields(parsed.fields);
        if parsed.version.is_some() {
            self.field_version = parsed.version;
        }
        info!(path = %path.display(), count, version = ?self.field_version, "Loaded field dictionary");
        Ok(())
    }

    fn load_enum_file(&mut self, path: &Path) -> Result<(), DictionaryError> {
        let text = std::fs::read_to_string(path)?;
        let parsed = parse_enum_types(&text, &path.display().to_string())?;
        let count = self.add_enum_tables(parsed.tables);
        if parsed.version.is_some() {
            self.enum_version = parsed.version;
        }
        info!(path = %path.display(), tables = count, version = ?self.enum_version, "Loaded enum dictionary");
        Ok(())
    }

    fn decode_field_part(&mut self, payload: &Payload) -> Result<usize, DictionaryError> {
        let part = wire::decode_field_part(payload)?;
        if part.version.is_some() {
            self.field_version = part.version;
        }
        let added = self.add_fields(part.fields);
        debug!(added, total = self.fields.len(), "Applied field dictionary part");
        Ok(added)
    }

    fn decode_enum_part(&mut self, payload: &Payload) -> Result<usize, DictionaryError> {
        let part = wire::decode_enum_part(payload)?;
        if part.version.is_some() {
            self.enum_version = part.version;
        }
        let added = self.add_enum_tables(part.tables);
        debug!(added, total = self.enum_tables.len(), "Applied enum dictionary part");
        Ok(added)
    }

    fn lookup(&self, fid: i16) -> Option<&FieldDef> {
        self.fields.get(&fid)
    }

    fn enum_display(&self, fid: i16, value: u16) -> Option<&str> {
        let index = *self.enum_index.get(&fid)?;
        self.enum_tables
            .get(index)?
            .displays
            .get(&value)
            .map(String::as_str)
    }

    fn clear(&mut self) {
        self.fields.clear();
        self.enum_tables.clear();
        self.enum_index.clear();
        self.field_version = None;
        self.enum_version = None;
    }
}
