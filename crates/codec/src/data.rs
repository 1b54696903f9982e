//! Primitive values and container types carried in message payloads
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CodecError;
use crate::rdm::{Qos, State};

/// Decimal value: mantissa scaled by a power-of-ten hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Real {
    pub value: i64,
    pub hint: u8,
}

impl Real {
    /// Hint for an exponent of zero; hints below it are negative powers of ten
    pub const EXPONENT0: u8 = 14;
    const MAX_HINT: u8 = 21;

    pub fn new(value: i64, hint: u8) -> Self {
        Self { value, hint }
    }

    pub fn exponent(&self) -> i32 {
        i32::from(self.hint.min(Self::MAX_HINT)) - i32::from(Self::EXPONENT0)
    }

    pub fn to_f64(&self) -> f64 {
        self.value as f64 * 10f64.powi(self.exponent())
    }

    /// Parse a plain decimal such as `-12.375`
    pub fn parse(text: &str) -> Option<Real> {
        let text = text.trim();
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && frac.is_empty() {
            return None;
        }
        if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
            return None;
        }
        if frac.len() > usize::from(Self::EXPONENT0) {
            return None;
        }
        let mantissa: i64 = format!("{whole}{frac}").parse().ok()?;
        Some(Real {
            value: if negative { -mantissa } else { mantissa },
            hint: Self::EXPONENT0 - frac.len() as u8,
        })
    }
}

impl fmt::Display for Real {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exponent = self.exponent();
        if exponent >= 0 {
            return write!(f, "{}{}", self.value, "0".repeat(exponent as usize));
        }
        let places = exponent.unsigned_abs() as usize;
        let digits = format!("{:0>width$}", self.value.unsigned_abs(), width = places + 1);
        let (whole, frac) = digits.split_at(digits.len() - places);
        let sign = if self.value < 0 { "-" } else { "" };
        write!(f, "{sign}{whole}.{frac}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl Date {
    /// Parse `YYYY-MM-DD`
    pub fn parse(text: &str) -> Option<Date> {
        let mut parts = text.trim().splitn(3, '-');
        let year = parts.next()?.parse().ok()?;
        let month: u8 = parts.next()?.parse().ok()?;
        let day: u8 = parts.next()?.parse().ok()?;
        if month > 12 || day > 31 {
            return None;
        }
        Some(Date { year, month, day })
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub millisecond: u16,
}

impl Time {
    /// Parse `HH:MM`, `HH:MM:SS` or `HH:MM:SS.mmm`
    pub fn parse(text: &str) -> Option<Time> {
        let (hms, millis) = text.trim().split_once('.').unwrap_or((text.trim(), "0"));
        let mut parts = hms.splitn(3, ':');
        let hour: u8 = parts.next()?.parse().ok()?;
        let minute: u8 = parts.next()?.parse().ok()?;
        let second: u8 = match parts.next() {
            Some(s) => s.parse().ok()?,
            None => 0,
        };
        let millisecond: u16 = millis.parse().ok()?;
        if hour > 23 || minute > 59 || second > 60 || millisecond > 999 {
            return None;
        }
        Some(Time {
            hour,
            minute,
            second,
            millisecond,
        })
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}.{:03}",
            self.hour, self.minute, self.second, self.millisecond
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateTime {
    pub date: Date,
    pub time: Time,
}

impl DateTime {
    /// Parse `YYYY-MM-DDTHH:MM:SS.mmm` (a space also separates date and time)
    pub fn parse(text: &str) -> Option<DateTime> {
        let (date, time) = text.trim().split_once(['T', ' '])?;
        Some(DateTime {
            date: Date::parse(date)?,
            time: Time::parse(time)?,
        })
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}T{}", self.date, self.time)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataValue {
    #[serde(rename = "uint")]
    UInt(u64),
    Int(i64),
    Real(Real),
    Float(f32),
    Double(f64),
    Enum(u16),
    Date(Date),
    Time(Time),
    #[serde(rename = "datetime")]
    DateTime(DateTime),
    Ascii(String),
    Buffer(String),
    Qos(Qos),
    State(State),
    Array(Vec<DataValue>),
    Blank,
}

impl DataValue {
    pub fn ascii(s: impl Into<String>) -> Self {
        DataValue::Ascii(s.into())
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DataValue::UInt(v) => Some(*v),
            DataValue::Int(v) => u64::try_from(*v).ok(),
            DataValue::Enum(v) => Some(u64::from(*v)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DataValue::Int(v) => Some(*v),
            DataValue::UInt(v) => i64::try_from(*v).ok(),
            DataValue::Enum(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::Ascii(s) | DataValue::Buffer(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[DataValue]> {
        match self {
            DataValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_qos(&self) -> Option<&Qos> {
        match self {
            DataValue::Qos(q) => Some(q),
            _ => None,
        }
    }

    pub fn as_state(&self) -> Option<&State> {
        match self {
            DataValue::State(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, DataValue::Blank)
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::UInt(v) => write!(f, "{v}"),
            DataValue::Int(v) => write!(f, "{v}"),
            DataValue::Real(v) => write!(f, "{v}"),
            DataValue::Float(v) => write!(f, "{v}"),
            DataValue::Double(v) => write!(f, "{v}"),
            DataValue::Enum(v) => write!(f, "{v}"),
            DataValue::Date(v) => write!(f, "{v}"),
            DataValue::Time(v) => write!(f, "{v}"),
            DataValue::DateTime(v) => write!(f, "{v}"),
            DataValue::Ascii(v) | DataValue::Buffer(v) => f.write_str(v),
            DataValue::Qos(v) => write!(f, "{v}"),
            DataValue::State(v) => write!(f, "{v}"),
            DataValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            DataValue::Blank => f.write_str("<blank>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementEntry {
    pub name: String,
    pub value: DataValue,
}

/// Named values, used for attributes, directory filters and dictionary rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementList {
    pub entries: Vec<ElementEntry>,
}

impl ElementList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: DataValue) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: DataValue) {
        self.entries.push(ElementEntry {
            name: name.into(),
            value,
        });
    }

    /// First entry with the given name
    pub fn get(&self, name: &str) -> Option<&DataValue> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ElementEntry> {
        self.entries.iter()
    }
}

/// Field list entry. The value is left in its encoded text form; the
/// dictionary knows how to interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldEntry {
    pub fid: i16,
    /// `None` is a blank value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldList {
    pub entries: Vec<FieldEntry>,
}

impl FieldList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, fid: i16, value: impl Into<String>) -> Self {
        self.entries.push(FieldEntry {
            fid,
            value: Some(value.into()),
        });
        self
    }

    pub fn with_blank(mut self, fid: i16) -> Self {
        self.entries.push(FieldEntry { fid, value: None });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapAction {
    Add,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEntry {
    pub action: MapAction,
    pub key: DataValue,
    #[serde(default)]
    pub payload: Payload,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Map {
    pub entries: Vec<MapEntry>,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, action: MapAction, key: DataValue, payload: Payload) -> Self {
        self.entries.push(MapEntry {
            action,
            key,
            payload,
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterAction {
    Set,
    Update,
    Clear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterEntry {
    pub id: u8,
    pub action: FilterAction,
    #[serde(default)]
    pub payload: Payload,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterList {
    pub entries: Vec<FilterEntry>,
}

impl FilterList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: u8, action: FilterAction, payload: Payload) -> Self {
        self.entries.push(FilterEntry {
            id,
            action,
            payload,
        });
        self
    }
}

/// Uniform rows sharing an optional summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ElementList>,
    pub entries: Vec<ElementList>,
}

/// Message payload container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    #[default]
    NoData,
    ElementList(ElementList),
    FieldList(FieldList),
    Map(Map),
    FilterList(FilterList),
    Series(Series),
    Opaque(String),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::NoData => "no data",
            Payload::ElementList(_) => "element list",
            Payload::FieldList(_) => "field list",
            Payload::Map(_) => "map",
            Payload::FilterList(_) => "filter list",
            Payload::Series(_) => "series",
            Payload::Opaque(_) => "opaque",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::NoData)
    }

    pub fn as_element_list(&self) -> Result<&ElementList, CodecError> {
        match self {
            Payload::ElementList(list) => Ok(list),
            other => Err(unexpected("element list", other)),
        }
    }

    pub fn as_field_list(&self) -> Result<&FieldList, CodecError> {
        match self {
            Payload::FieldList(list) => Ok(list),
            other => Err(unexpected("field list", other)),
        }
    }

    pub fn as_map(&self) -> Result<&Map, CodecError> {
        match self {
            Payload::Map(map) => Ok(map),
            other => Err(unexpected("map", other)),
        }
    }

    pub fn as_filter_list(&self) -> Result<&FilterList, CodecError> {
        match self {
            Payload::FilterList(list) => Ok(list),
            other => Err(unexpected("filter list", other)),
        }
    }

    pub fn as_series(&self) -> Result<&Series, CodecError> {
        match self {
            Payload::Series(series) => Ok(series),
            other => Err(unexpected("series", other)),
        }
    }
}

fn unexpected(expected: &'static str, found: &Payload) -> CodecError {
    CodecError::UnexpectedContainer {
        expected,
        found: found.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_parse_and_display() {
        let real = Real::parse("-12.375").unwrap();
        assert_eq!(real, Real::new(-12375, 11));
        assert_eq!(real.to_string(), "-12.375");
        assert_eq!(Real::parse("42").unwrap(), Real::new(42, Real::EXPONENT0));
        assert_eq!(Real::new(5, 12).to_string(), "0.05");
        assert_eq!(Real::new(3, 16).to_string(), "300");
        assert!((Real::new(12345, 12).to_f64() - 123.45).abs() < 1e-9);
    }

    #[test]
    fn test_real_rejects_garbage() {
        assert!(Real::parse("").is_none());
        assert!(Real::parse("1.2.3").is_none());
        assert!(Real::parse("abc").is_none());
    }

    #[test]
    fn test_date_time_parse() {
        let dt = DateTime::parse("2024-03-09T14:05:07.250").unwrap();
        assert_eq!(dt.date, Date { year: 2024, month: 3, day: 9 });
        assert_eq!(dt.time.millisecond, 250);
        assert_eq!(dt.to_string(), "2024-03-09T14:05:07.250");
        assert_eq!(Time::parse("09:30").unwrap().to_string(), "09:30:00.000");
        assert!(Date::parse("2024-13-01").is_none());
        assert!(Time::parse("25:00").is_none());
    }

    #[test]
    fn test_element_list_lookup() {
        let list = ElementList::new()
            .with("Name", DataValue::ascii("DIRECT_FEED"))
            .with("ServiceState", DataValue::UInt(1));
        assert_eq!(list.get("Name").and_then(DataValue::as_str), Some("DIRECT_FEED"));
        assert_eq!(list.get("ServiceState").and_then(DataValue::as_u64), Some(1));
        assert!(list.get("Missing").is_none());
    }

    #[test]
    fn test_payload_accessor_reports_container() {
        let payload = Payload::FieldList(FieldList::new());
        let err = payload.as_map().unwrap_err();
        assert_eq!(err.to_string(), "expected map container, found field list");
    }

    #[test]
    fn test_payload_json_shape() {
        let payload = Payload::FieldList(FieldList::new().with(22, "12.5").with_blank(25));
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(
            json,
            r#"{"type":"field_list","data":{"entries":[{"fid":22,"value":"12.5"},{"fid":25}]}}"#
        );
        let none: Payload = serde_json::from_str(r#"{"type":"no_data"}"#).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_array_display() {
        let value = DataValue::Array(vec![DataValue::UInt(5), DataValue::UInt(6)]);
        assert_eq!(value.to_string(), "[5, 6]");
    }
}
