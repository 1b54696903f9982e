use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data::{ElementList, Payload};
use crate::rdm::{domain, Qos, State};

/// Message class, with the wire codes of the message header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgClass {
    Request = 1,
    Refresh = 2,
    Status = 3,
    Update = 4,
    Close = 5,
    Ack = 6,
}

impl MsgClass {
    pub fn as_str(self) -> &'static str {
        match self {
            MsgClass::Request => "request",
            MsgClass::Refresh => "refresh",
            MsgClass::Status => "status",
            MsgClass::Update => "update",
            MsgClass::Close => "close",
            MsgClass::Ack => "ack",
        }
    }
}

impl fmt::Display for MsgClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies what a stream is about
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_type: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrib: Option<ElementList>,
}

impl MsgKey {
    pub fn named(name: impl Into<String>, name_type: u8) -> Self {
        Self {
            name: Some(name.into()),
            name_type: Some(name_type),
            ..Self::default()
        }
    }

    pub fn with_service(mut self, service_id: u16) -> Self {
        self.service_id = Some(service_id);
        self
    }

    pub fn with_filter(mut self, filter: u32) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_attrib(mut self, attrib: ElementList) -> Self {
        self.attrib = Some(attrib);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPriority {
    pub class: u8,
    pub count: u16,
}

/// Class-specific header fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgBody {
    Request {
        #[serde(default)]
        streaming: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<RequestPriority>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        qos: Option<Qos>,
    },
    Refresh {
        #[serde(default)]
        solicited: bool,
        #[serde(default)]
        refresh_complete: bool,
        #[serde(default)]
        clear_cache: bool,
        state: State,
    },
    Status {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<State>,
        #[serde(default)]
        clear_cache: bool,
    },
    Update {
        #[serde(default)]
        update_type: u8,
    },
    Close,
    Ack {
        ack_id: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nak_code: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

impl MsgBody {
    pub fn class(&self) -> MsgClass {
        match self {
            MsgBody::Request { .. } => MsgClass::Request,
            MsgBody::Refresh { .. } => MsgClass::Refresh,
            MsgBody::Status { .. } => MsgClass::Status,
            MsgBody::Update { .. } => MsgClass::Update,
            MsgBody::Close => MsgClass::Close,
            MsgBody::Ack { .. } => MsgClass::Ack,
        }
    }
}

/// One message on a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Msg {
    pub stream_id: i32,
    pub domain: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<MsgKey>,
    #[serde(rename = "class")]
    pub body: MsgBody,
    #[serde(default, skip_serializing_if = "Payload::is_empty")]
    pub payload: Payload,
}

impl Msg {
    pub fn new(stream_id: i32, domain: u8, body: MsgBody) -> Self {
        Self {
            stream_id,
            domain,
            key: None,
            body,
            payload: Payload::NoData,
        }
    }

    pub fn request(stream_id: i32, domain: u8, streaming: bool) -> Self {
        Self::new(
            stream_id,
            domain,
            MsgBody::Request {
                streaming,
                priority: None,
                qos: None,
            },
        )
    }

    pub fn refresh(stream_id: i32, domain: u8, state: State) -> Self {
        Self::new(
            stream_id,
            domain,
            MsgBody::Refresh {
                solicited: true,
                refresh_complete: true,
                clear_cache: false,
                state,
            },
        )
    }

    pub fn status(stream_id: i32, domain: u8, state: Option<State>) -> Self {
        Self::new(
            stream_id,
            domain,
            MsgBody::Status {
                state,
                clear_cache: false,
            },
        )
    }

    pub fn update(stream_id: i32, domain: u8) -> Self {
        Self::new(stream_id, domain, MsgBody::Update { update_type: 0 })
    }

    pub fn close(stream_id: i32, domain: u8) -> Self {
        Self::new(stream_id, domain, MsgBody::Close)
    }

    pub fn with_key(mut self, key: MsgKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn class(&self) -> MsgClass {
        self.body.class()
    }

    pub fn key_name(&self) -> Option<&str> {
        self.key.as_ref().and_then(|k| k.name.as_deref())
    }

    /// State carried by a refresh or status message
    pub fn state(&self) -> Option<&State> {
        match &self.body {
            MsgBody::Refresh { state, .. } => Some(state),
            MsgBody::Status { state, .. } => state.as_ref(),
            _ => None,
        }
    }
}

/// A decoded message routed by domain
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Login(Msg),
    Source(Msg),
    Dictionary(Msg),
    MarketPrice(Msg),
    Other(u8, Msg),
}

impl From<Msg> for Message {
    fn from(msg: Msg) -> Self {
        match msg.domain {
            domain::LOGIN => Message::Login(msg),
            domain::SOURCE => Message::Source(msg),
            domain::DICTIONARY => Message::Dictionary(msg),
            domain::MARKET_PRICE => Message::MarketPrice(msg),
            other => Message::Other(other, msg),
        }
    }
}

impl Message {
    pub fn msg(&self) -> &Msg {
        match self {
            Message::Login(msg)
            | Message::Source(msg)
            | Message::Dictionary(msg)
            | Message::MarketPrice(msg)
            | Message::Other(_, msg) => msg,
        }
    }

    pub fn into_msg(self) -> Msg {
        match self {
            Message::Login(msg)
            | Message::Source(msg)
            | Message::Dictionary(msg)
            | Message::MarketPrice(msg)
            | Message::Other(_, msg) => msg,
        }
    }

    pub fn domain_name(&self) -> &'static str {
        match self {
            Message::Login(_) => "login",
            Message::Source(_) => "source",
            Message::Dictionary(_) => "dictionary",
            Message::MarketPrice(_) => "market_price",
            Message::Other(..) => "other",
        }
    }
}
