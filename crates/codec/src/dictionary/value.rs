use crate::data::{DataValue, Date, DateTime, Real, Time};
use crate::error::DictionaryError;
use crate::rdm::{Qos, State};

use super::{FieldDef, RwfType};

/// Interpret the encoded text of a field by its dictionary type
pub(crate) fn decode(def: &FieldDef, text: Option<&str>) -> Result<DataValue, DictionaryError> {
    let Some(text) = text else {
        return Ok(DataValue::Blank);
    };
    let bad = |reason: &str| DictionaryError::BadValue {
        fid: def.fid,
        acronym: def.acronym.clone(),
        reason: format!("{reason}: {text:?}"),
    };

    let value = match def.rwf_type {
        RwfType::AsciiString | RwfType::Utf8String | RwfType::RmtesString => {
            return Ok(DataValue::Ascii(text.to_string()))
        }
        RwfType::Buffer | RwfType::Other(_) => return Ok(DataValue::Buffer(text.to_string())),
        _ if text.trim().is_empty() => DataValue::Blank,
        RwfType::UInt => DataValue::UInt(text.trim().parse().map_err(|_| bad("not an unsigned integer"))?),
        RwfType::Int => DataValue::Int(text.trim().parse().map_err(|_| bad("not an integer"))?),
        RwfType::Real => DataValue::Real(Real::parse(text).ok_or_else(|| bad("not a decimal"))?),
        RwfType::Float => DataValue::Float(text.trim().parse().map_err(|_| bad("not a float"))?),
        RwfType::Double => DataValue::Double(text.trim().parse().map_err(|_| bad("not a double"))?),
        RwfType::Enum => DataValue::Enum(text.trim().parse().map_err(|_| bad("not an enum value"))?),
        RwfType::Date => DataValue::Date(Date::parse(text).ok_or_else(|| bad("not a date"))?),
        RwfType::Time => DataValue::Time(Time::parse(text).ok_or_else(|| bad("not a time"))?),
        RwfType::DateTime => {
            DataValue::DateTime(DateTime::parse(text).ok_or_else(|| bad("not a datetime"))?)
        }
        RwfType::Qos => DataValue::Qos(
            serde_json::from_str::<Qos>(text).map_err(|_| bad("not a qos"))?,
        ),
        RwfType::State => DataValue::State(
            serde_json::from_str::<State>(text).map_err(|_| bad("not a state"))?,
        ),
        RwfType::Array => DataValue::Array(
            serde_json::from_str::<Vec<DataValue>>(text).map_err(|_| bad("not an array"))?,
        ),
    };
    Ok(value)
}
