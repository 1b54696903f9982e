use bytes::Bytes;
use tracing::trace;

use crate::error::CodecError;
use crate::msg::{Message, Msg};

/// Turns messages into transport payloads and back
pub trait Codec: Send + Sync {
    fn encode(&self, msg: &Msg) -> Result<Bytes, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError>;
}

/// One JSON document per transport message
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for JsonCodec {
    fn encode(&self, msg: &Msg) -> Result<Bytes, CodecError> {
        let bytes = serde_json::to_vec(msg)?;
        trace!(stream_id = msg.stream_id, len = bytes.len(), "Encoded message");
        Ok(Bytes::from(bytes))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::Malformed("empty message".into()));
        }
        let msg: Msg = serde_json::from_slice(bytes)?;
        Ok(Message::from(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataValue, ElementList};
    use crate::msg::{MsgBody, MsgKey};
    use crate::rdm::{domain, name_type};

    const LOGIN_REFRESH: &str = r#"{
        "stream_id": 1,
        "domain": 1,
        "key": {"name": "user", "name_type": 1},
        "class": {"refresh": {"solicited": true, "refresh_complete": true,
                  "state": {"stream_state": "open", "data_state": "ok", "text": "Login accepted"}}}
    }"#;

    #[test]
    fn test_login_request_round_trip() {
        let codec = JsonCodec::new();
        let request = Msg::request(1, domain::LOGIN, true).with_key(
            MsgKey::named("jdoe", name_type::USER_NAME).with_attrib(
                ElementList::new().with("ApplicationId", DataValue::ascii("256")),
            ),
        );

        let bytes = codec.encode(&request).unwrap();
        let Message::Login(decoded) = codec.decode(&bytes).unwrap() else {
            panic!("expected a login message");
        };
        assert_eq!(decoded.stream_id, 1);
        assert_eq!(decoded.domain, domain::LOGIN);
        let key = decoded.key.as_ref().unwrap();
        assert_eq!(key.name.as_deref(), Some("jdoe"));
        assert_eq!(key.name_type, Some(name_type::USER_NAME));
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_decode_login_refresh() {
        let message = JsonCodec.decode(LOGIN_REFRESH.as_bytes()).unwrap();
        let msg = message.msg();
        assert_eq!(message.domain_name(), "login");
        assert!(matches!(
            msg.body,
            MsgBody::Refresh {
                solicited: true,
                refresh_complete: true,
                clear_cache: false,
                ..
            }
        ));
        assert_eq!(msg.state().unwrap().text, "Login accepted");
    }

    #[test]
    fn test_close_encodes_as_bare_class() {
        let bytes = JsonCodec.encode(&Msg::close(5, domain::MARKET_PRICE)).unwrap();
        assert_eq!(&bytes[..], br#"{"stream_id":5,"domain":6,"class":"close"}"#);
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(JsonCodec.decode(b""), Err(CodecError::Malformed(_))));
        assert!(matches!(JsonCodec.decode(b"{\"stream_id\":"), Err(CodecError::Json(_))));
    }
}
