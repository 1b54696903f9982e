//! eta-codec: Message model, JSON wire codec and data dictionaries
//!
//! Every message is a `Msg` (stream id, domain, optional key, class-specific
//! header, payload container). Decoding yields a `Message`, routed by domain.

pub mod codec;
pub mod data;
pub mod dictionary;
pub mod error;
pub mod msg;
pub mod rdm;

pub use codec::{Codec, JsonCodec};
pub use data::{
    DataValue, Date, DateTime, ElementEntry, ElementList, FieldEntry, FieldList, FilterAction,
    FilterEntry, FilterList, Map, MapAction, MapEntry, Payload, Real, Series, Time,
};
pub use dictionary::{
    DataDictionary, DecodedField, Dictionary, DictionaryKind, EnumTable, FieldDef, MfType, RwfType,
};
pub use error::{CodecError, DictionaryError};
pub use msg::{Message, Msg, MsgBody, MsgClass, MsgKey, RequestPriority};
pub use rdm::{DataState, Qos, Rate, State, StreamState, Timeliness};
