use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("expected {expected} container, found {found}")]
    UnexpectedContainer {
        expected: &'static str,
        found: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum DictionaryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{source_name} line {line}: {reason}")]
    Parse {
        source_name: String,
        line: usize,
        reason: String,
    },

    #[error("dictionary part has no Type tag")]
    MissingType,

    #[error("unknown field id {0}")]
    UnknownFid(i16),

    #[error("bad value for {acronym} ({fid}): {reason}")]
    BadValue {
        fid: i16,
        acronym: String,
        reason: String,
    },

    #[error("malformed dictionary part: {0}")]
    Malformed(String),
}
