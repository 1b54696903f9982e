//! Parsers for the RDM text dictionaries (`RDMFieldDictionary`, `enumtype.def`)
use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use super::{EnumTable, FieldDef, MfType, RwfType};
use crate::error::DictionaryError;

#[derive(Debug, Default)]
pub struct ParsedFields {
    pub fields: Vec<FieldDef>,
    pub version: Option<String>,
}

#[derive(Debug, Default)]
pub struct ParsedEnums {
    pub tables: Vec<EnumTable>,
    pub version: Option<String>,
}

struct Token {
    text: String,
    quoted: bool,
}

fn tokenize(line: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut text = String::new();
        if c == '"' {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some(ch) => text.push(ch),
                    None => return Err("unterminated quote".into()),
                }
            }
            tokens.push(Token { text, quoted: true });
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() {
                    break;
                }
                text.push(ch);
                chars.next();
            }
            tokens.push(Token {
                text,
                quoted: false,
            });
        }
    }
    Ok(tokens)
}

/// `!tag Version 4.20.29` style header value
fn tag_version(line: &str) -> Option<String> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "!tag" {
        return None;
    }
    match parts.next()? {
        "Version" | "RT_Version" => parts.next().map(str::to_owned),
        _ => None,
    }
}

fn parse_error(source_name: &str, line: usize, reason: impl Into<String>) -> DictionaryError {
    DictionaryError::Parse {
        source_name: source_name.to_string(),
        line,
        reason: reason.into(),
    }
}

/// Parse field definitions: `ACRONYM "DDE" FID RIPPLES_TO TYPE LENGTH [( ENUM_LEN )] RWF_TYPE RWF_LEN`
pub fn parse_field_dictionary(text: &str, source_name: &str) -> Result<ParsedFields, DictionaryError> {
    let mut parsed = ParsedFields::default();
    let mut ripples: Vec<(usize, String)> = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('!') {
            if let Some(version) = tag_version(line) {
                parsed.version = Some(version);
            }
            continue;
        }

        let tokens = tokenize(line).map_err(|e| parse_error(source_name, line_no, e))?;
        // Drop the parenthesised enum length that follows LENGTH for ENUMERATED fields
        let mut columns = Vec::with_capacity(8);
        let mut depth = 0usize;
        for token in tokens {
            let opens = !token.quoted && token.text.starts_with('(');
            let closes = !token.quoted && token.text.ends_with(')');
            if opens {
                depth += 1;
            }
            if depth == 0 {
                columns.push(token.text);
            }
            if closes {
                depth = depth.saturating_sub(1);
            }
        }
        if columns.len() < 8 {
            return Err(parse_error(
                source_name,
                line_no,
                format!("expected 8 columns, found {}", columns.len()),
            ));
        }

        let fid: i16 = columns[2]
            .parse()
            .map_err(|_| parse_error(source_name, line_no, format!("bad fid {}", columns[2])))?;
        let mf_type = MfType::from_name(&columns[4]).ok_or_else(|| {
            parse_error(source_name, line_no, format!("unknown field type {}", columns[4]))
        })?;
        let length: u16 = columns[5]
            .parse()
            .map_err(|_| parse_error(source_name, line_no, format!("bad length {}", columns[5])))?;
        let rwf_type = RwfType::from_name(&columns[6]).ok_or_else(|| {
            parse_error(source_name, line_no, format!("unknown rwf type {}", columns[6]))
        })?;
        let rwf_len: u16 = columns[7].parse().map_err(|_| {
            parse_error(source_name, line_no, format!("bad rwf length {}", columns[7]))
        })?;

        if columns[3] != "NULL" {
            ripples.push((parsed.fields.len(), columns[3].clone()));
        }
        parsed.fields.push(FieldDef {
            fid,
            acronym: columns[0].clone(),
            dde_acronym: columns[1].clone(),
            ripples_to: 0,
            mf_type,
            length,
            rwf_type,
            rwf_len,
        });
    }

    let by_acronym: HashMap<&str, i16> = parsed
        .fields
        .iter()
        .map(|f| (f.acronym.as_str(), f.fid))
        .collect();
    let resolved: Vec<(usize, i16)> = ripples
        .iter()
        .map(|(i, acronym)| {
            let fid = by_acronym.get(acronym.as_str()).copied().unwrap_or_else(|| {
                debug!(acronym = %acronym, "Ripple target not in dictionary");
                0
            });
            (*i, fid)
        })
        .collect();
    for (i, fid) in resolved {
        parsed.fields[i].ripples_to = fid;
    }

    Ok(parsed)
}

/// Split a value row into (value, display, meaning)
fn parse_enum_row(line: &str) -> Result<(u16, String, Option<String>), String> {
    let (value, rest) = line
        .split_once(char::is_whitespace)
        .ok_or_else(|| "value row without display".to_string())?;
    let value: u16 = value.parse().map_err(|_| format!("bad enum value {value}"))?;
    let rest = rest.trim_start();

    let (display, remainder) = if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted.find('"').ok_or("unterminated display")?;
        (quoted[..end].to_string(), &quoted[end + 1..])
    } else if let Some(hex) = rest.strip_prefix('#') {
        let end = hex.find('#').ok_or("unterminated hex display")?;
        (decode_hex(&hex[..end])?, &hex[end + 1..])
    } else {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        (rest[..end].to_string(), &rest[end..])
    };

    let meaning = remainder.trim();
    Ok((
        value,
        display,
        (!meaning.is_empty()).then(|| meaning.to_string()),
    ))
}

fn decode_hex(hex: &str) -> Result<String, String> {
    if hex.len() % 2 != 0 {
        return Err(format!("odd-length hex display #{hex}#"));
    }
    let bad = || format!("bad hex display #{hex}#");
    let bytes = hex
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .ok_or_else(bad)
        })
        .collect::<Result<Vec<u8>, _>>()?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Parse enum tables: runs of `ACRONYM FID` reference rows, each followed by
/// the `VALUE DISPLAY [MEANING]` rows they share
pub fn parse_enum_types(text: &str, source_name: &str) -> Result<ParsedEnums, DictionaryError> {
    let mut parsed = ParsedEnums::default();
    let mut fids: Vec<i16> = Vec::new();
    let mut displays: BTreeMap<u16, String> = BTreeMap::new();
    let mut in_values = false;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('!') {
            if let Some(version) = tag_version(line) {
                parsed.version = Some(version);
            }
            continue;
        }

        let first = line.split_whitespace().next().unwrap_or_default();
        if first.chars().all(|c| c.is_ascii_digit()) {
            if fids.is_empty() {
                return Err(parse_error(source_name, line_no, "value row before any field reference"));
            }
            let (value, display, _meaning) =
                parse_enum_row(line).map_err(|e| parse_error(source_name, line_no, e))?;
            displays.insert(value, display);
            in_values = true;
            continue;
        }

        if in_values {
            parsed.tables.push(EnumTable {
                fids: std::mem::take(&mut fids),
                displays: std::mem::take(&mut displays),
            });
            in_values = false;
        }
        let mut parts = line.split_whitespace();
        let acronym = parts.next().unwrap_or_default();
        let fid: i16 = parts
            .next()
            .and_then(|f| f.parse().ok())
            .ok_or_else(|| parse_error(source_name, line_no, format!("bad reference row for {acronym}")))?;
        fids.push(fid);
    }

    if !fids.is_empty() {
        parsed.tables.push(EnumTable { fids, displays });
    }
    Ok(parsed)
}
