//! Dictionary loading from files on disk and from download parts

use std::io::Write;

use eta_codec::dictionary::wire::{enum_tables_payload, field_definitions_payload};
use eta_codec::{DataDictionary, DataValue, Dictionary, DictionaryError, DictionaryKind, FieldList, Real};
use tempfile::NamedTempFile;

const FIELD_FILE: &str = r#"!tag Filename  RWF.DAT
!tag Version   4.20.29
!
!ACRONYM    DDE ACRONYM          FID  RIPPLES TO  FIELD TYPE     LENGTH  RWF TYPE   RWF LEN
DSPLY_NAME "DISPLAY NAME"          3  NULL        ALPHANUMERIC       16  RMTES_STRING   16
RDN_EXCHID "IDN EXCHANGE ID"       4  NULL        ENUMERATED    3 ( 3 )  ENUM            1
TRDPRC_1   "LAST"                  6  TRDPRC_2    PRICE              17  REAL64          7
TRDPRC_2   "LAST 1"                7  NULL        PRICE              17  REAL64          7
BID        "BID"                  22  NULL        PRICE              17  REAL64          7
ASK        "ASK"                  25  NULL        PRICE              17  REAL64          7
"#;

const ENUM_FILE: &str = r#"!tag RT_Version 4.20.29
RDN_EXCHID     4
     0        "   "      Undefined
     1        "ASE"      NYSE AMEX
     2        "NYS"      New York Stock Exchange
"#;

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_both_files_and_decode() {
    let fields = write_temp(FIELD_FILE);
    let enums = write_temp(ENUM_FILE);

    let mut dict = DataDictionary::new();
    dict.load_field_file(fields.path()).unwrap();
    dict.load_enum_file(enums.path()).unwrap();
    assert_eq!(dict.field_count(), 6);
    assert_eq!(dict.enum_table_count(), 1);
    assert_eq!(dict.field_version(), Some("4.20.29"));

    let decoded = dict
        .decode_field_list(&FieldList::new().with(22, "99.25").with(4, "1").with(3, "THOMSON"))
        .unwrap();
    assert_eq!(decoded[0].value, DataValue::Real(Real::new(9925, 12)));
    assert_eq!(decoded[1].enum_display.as_deref(), Some("ASE"));
    assert_eq!(decoded[2].to_string(), "DSPLY_NAME THOMSON");
}

#[test]
fn test_missing_file_is_io_error() {
    let mut dict = DataDictionary::new();
    let err = dict
        .load_field_file(std::path::Path::new("/nonexistent/RDMFieldDictionary"))
        .unwrap_err();
    assert!(matches!(err, DictionaryError::Io(_)));
    assert!(!dict.has_fields());
}

#[test]
fn test_download_matches_file_load() {
    let fields = write_temp(FIELD_FILE);
    let enums = write_temp(ENUM_FILE);
    let mut source = DataDictionary::new();
    source.load_field_file(fields.path()).unwrap();
    source.load_enum_file(enums.path()).unwrap();

    // Serve the field dictionary in two parts, the summary only on the first
    let defs: Vec<_> = source.fields().cloned().collect();
    let (first, rest) = defs.split_at(3);
    let part1 = field_definitions_payload(first, Some("4.20.29"), true);
    let part2 = field_definitions_payload(rest, None, false);

    let mut downloaded = DataDictionary::new();
    assert_eq!(
        downloaded.decode_type_tag(&part1).unwrap(),
        DictionaryKind::FieldDefinitions
    );
    downloaded.decode_field_part(&part1).unwrap();
    downloaded.decode_field_part(&part2).unwrap();
    assert_eq!(downloaded.field_count(), source.field_count());
    assert_eq!(downloaded.lookup(6).unwrap().ripples_to, 7);

    let enum_part = enum_tables_payload(source.enum_tables(), None, true);
    assert_eq!(
        downloaded.decode_type_tag(&enum_part).unwrap(),
        DictionaryKind::EnumTables
    );
    downloaded.decode_enum_part(&enum_part).unwrap();
    assert_eq!(downloaded.enum_display(4, 2), Some("NYS"));
}
