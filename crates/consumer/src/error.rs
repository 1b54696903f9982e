use std::time::Duration;

use eta_codec::{CodecError, DictionaryError};
use eta_middleware::TransportError;
use thiserror::Error;

/// Conditions that end a session. Every variant is fatal.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("decode error: {0}")]
    Codec(#[from] CodecError),

    #[error("dictionary error: {0}")]
    Dictionary(#[from] DictionaryError),

    #[error("login denied: {0}")]
    LoginDenied(String),

    #[error("login suspect: {0}")]
    LoginSuspect(String),

    #[error("login stream closed by peer")]
    LoginClosed,

    #[error("service {0} not found in source directory")]
    ServiceNotFound(String),

    #[error("service {name} not available (up: {up}, accepting requests: {accepting})")]
    ServiceUnavailable {
        name: String,
        up: bool,
        accepting: bool,
    },

    #[error("service {0} does not support the dictionary domain")]
    DictionaryDomainUnsupported(String),

    #[error("service {service} does not provide dictionary {dictionary}")]
    DictionaryNotProvided { service: String, dictionary: String },

    #[error("dictionary {0} stream closed before download completed")]
    DictionaryStreamClosed(String),

    #[error("service {0} does not support the market price domain")]
    MarketPriceUnsupported(String),

    #[error("no message or ping from peer within {0:?}")]
    PingTimeout(Duration),

    #[error("channel initialization did not complete within {0:?}")]
    HandshakeTimeout(Duration),
}

impl SessionError {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Transport(_) => "transport",
            SessionError::Codec(_) => "codec",
            SessionError::Dictionary(_) => "dictionary",
            SessionError::LoginDenied(_) => "login_denied",
            SessionError::LoginSuspect(_) => "login_suspect",
            SessionError::LoginClosed => "login_closed",
            SessionError::ServiceNotFound(_) => "service_not_found",
            SessionError::ServiceUnavailable { .. } => "service_unavailable",
            SessionError::DictionaryDomainUnsupported(_) => "dictionary_domain_unsupported",
            SessionError::DictionaryNotProvided { .. } => "dictionary_not_provided",
            SessionError::DictionaryStreamClosed(_) => "dictionary_stream_closed",
            SessionError::MarketPriceUnsupported(_) => "market_price_unsupported",
            SessionError::PingTimeout(_) => "ping_timeout",
            SessionError::HandshakeTimeout(_) => "handshake_timeout",
        }
    }
}
