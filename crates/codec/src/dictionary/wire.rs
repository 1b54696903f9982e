//! Dictionary download payloads: a series of element lists, one row per
//! field definition or enum table, with the dictionary `Type` in the summary.
use std::collections::BTreeMap;

use super::{DictionaryKind, EnumTable, FieldDef, MfType, RwfType};
use crate::data::{DataValue, ElementList, Payload, Series};
use crate::error::DictionaryError;
use crate::rdm::dictionary as names;

#[derive(Debug, Default)]
pub struct FieldPart {
    pub fields: Vec<FieldDef>,
    pub version: Option<String>,
}

#[derive(Debug, Default)]
pub struct EnumPart {
    pub tables: Vec<EnumTable>,
    pub version: Option<String>,
}

fn series(payload: &Payload) -> Result<&Series, DictionaryError> {
    payload
        .as_series()
        .map_err(|e| DictionaryError::Malformed(e.to_string()))
}

fn summary_version(series: &Series) -> Option<String> {
    series
        .summary
        .as_ref()
        .and_then(|s| s.get(names::VERSION))
        .and_then(DataValue::as_str)
        .map(str::to_owned)
}

/// Read the `Type` element from the summary of a dictionary part
pub fn type_tag(payload: &Payload) -> Result<DictionaryKind, DictionaryError> {
    let tag = series(payload)?
        .summary
        .as_ref()
        .and_then(|s| s.get(names::TYPE))
        .and_then(DataValue::as_u64)
        .ok_or(DictionaryError::MissingType)?;
    match tag {
        names::TYPE_FIELD_DEFINITIONS => Ok(DictionaryKind::FieldDefinitions),
        names::TYPE_ENUM_TABLES => Ok(DictionaryKind::EnumTables),
        other => Err(DictionaryError::Malformed(format!(
            "unsupported dictionary type {other}"
        ))),
    }
}

fn required<'a>(row: &'a ElementList, name: &str) -> Result<&'a DataValue, DictionaryError> {
    row.get(name)
        .ok_or_else(|| DictionaryError::Malformed(format!("row without {name}")))
}

fn int_in<T: TryFrom<i64>>(value: &DataValue, name: &str) -> Result<T, DictionaryError> {
    value
        .as_i64()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| DictionaryError::Malformed(format!("{name} out of range: {value}")))
}

fn optional_int<T: TryFrom<i64> + Default>(row: &ElementList, name: &str) -> Result<T, DictionaryError> {
    match row.get(name) {
        Some(value) => int_in(value, name),
        None => Ok(T::default()),
    }
}

fn field_row(row: &ElementList) -> Result<FieldDef, DictionaryError> {
    let acronym = required(row, names::NAME)?
        .as_str()
        .ok_or_else(|| DictionaryError::Malformed("NAME is not a string".into()))?
        .to_string();
    let fid: i16 = int_in(required(row, names::FID)?, names::FID)?;
    let mf_code: i64 = match row.get(names::FIELD_TYPE) {
        Some(value) => int_in(value, names::FIELD_TYPE)?,
        None => -1,
    };
    let mf_type = MfType::from_code(mf_code)
        .ok_or_else(|| DictionaryError::Malformed(format!("unknown field type {mf_code}")))?;
    let rwf_code: u8 = int_in(required(row, names::RWFTYPE)?, names::RWFTYPE)?;

    Ok(FieldDef {
        fid,
        acronym,
        dde_acronym: String::new(),
        ripples_to: optional_int(row, names::RIPPLETO)?,
        mf_type,
        length: optional_int(row, names::LENGTH)?,
        rwf_type: RwfType::from_code(rwf_code),
        rwf_len: optional_int(row, names::RWFLEN)?,
    })
}

fn array<'a>(row: &'a ElementList, name: &str) -> Result<&'a [DataValue], DictionaryError> {
    required(row, name)?
        .as_array()
        .ok_or_else(|| DictionaryError::Malformed(format!("{name} is not an array")))
}

fn enum_row(row: &ElementList) -> Result<EnumTable, DictionaryError> {
    let fids = array(row, names::FIDS)?
        .iter()
        .map(|v| int_in::<i16>(v, names::FIDS))
        .collect::<Result<Vec<_>, _>>()?;
    let values = array(row, names::VALUE)?;
    let displays = array(row, names::DISPLAY)?;
    if values.len() != displays.len() {
        return Err(DictionaryError::Malformed(format!(
            "{} values but {} displays",
            values.len(),
            displays.len()
        )));
    }

    let mut table = BTreeMap::new();
    for (value, display) in values.iter().zip(displays) {
        let value: u16 = int_in(value, names::VALUE)?;
        let display = display
            .as_str()
            .ok_or_else(|| DictionaryError::Malformed("DISPLAY is not a string".into()))?;
        table.insert(value, display.to_string());
    }
    Ok(EnumTable {
        fids,
        displays: table,
    })
}

pub fn decode_field_part(payload: &Payload) -> Result<FieldPart, DictionaryError> {
    let series = series(payload)?;
    Ok(FieldPart {
        fields: series
            .entries
            .iter()
            .map(field_row)
            .collect::<Result<_, _>>()?,
        version: summary_version(series),
    })
}

pub fn decode_enum_part(payload: &Payload) -> Result<EnumPart, DictionaryError> {
    let series = series(payload)?;
    Ok(EnumPart {
        tables: series
            .entries
            .iter()
            .map(enum_row)
            .collect::<Result<_, _>>()?,
        version: summary_version(series),
    })
}

fn summary(kind: DictionaryKind, version: Option<&str>) -> ElementList {
    let tag = match kind {
        DictionaryKind::FieldDefinitions => names::TYPE_FIELD_DEFINITIONS,
        DictionaryKind::EnumTables => names::TYPE_ENUM_TABLES,
    };
    let mut summary = ElementList::new().with(names::TYPE, DataValue::UInt(tag));
    if let Some(version) = version {
        summary.push(names::VERSION, DataValue::ascii(version));
    }
    summary
}

/// Encode field definitions as one download part. Only the first part of a
/// download needs the summary.
pub fn field_definitions_payload(fields: &[FieldDef], version: Option<&str>, first_part: bool) -> Payload {
    let entries = fields
        .iter()
        .map(|def| {
            ElementList::new()
                .with(names::NAME, DataValue::ascii(def.acronym.as_str()))
                .with(names::FID, DataValue::Int(i64::from(def.fid)))
                .with(names::RIPPLETO, DataValue::Int(i64::from(def.ripples_to)))
                .with(names::FIELD_TYPE, DataValue::Int(i64::from(def.mf_type.code())))
                .with(names::LENGTH, DataValue::UInt(u64::from(def.length)))
                .with(names::RWFTYPE, DataValue::UInt(u64::from(def.rwf_type.code())))
                .with(names::RWFLEN, DataValue::UInt(u64::from(def.rwf_len)))
        })
        .collect();
    Payload::Series(Series {
        summary: first_part.then(|| summary(DictionaryKind::FieldDefinitions, version)),
        entries,
    })
}

pub fn enum_tables_payload(tables: &[EnumTable], version: Option<&str>, first_part: bool) -> Payload {
    let entries = tables
        .iter()
        .map(|table| {
            ElementList::new()
                .with(
                    names::FIDS,
                    DataValue::Array(table.fids.iter().map(|f| DataValue::Int(i64::from(*f))).collect()),
                )
                .with(
                    names::VALUE,
                    DataValue::Array(table.displays.keys().map(|v| DataValue::Enum(*v)).collect()),
                )
                .with(
                    names::DISPLAY,
                    DataValue::Array(
                        table
                            .displays
                            .values()
                            .map(|d| DataValue::ascii(d.as_str()))
                            .collect(),
                    ),
                )
        })
        .collect();
    Payload::Series(Series {
        summary: first_part.then(|| summary(DictionaryKind::EnumTables, version)),
        entries,
    })
}
