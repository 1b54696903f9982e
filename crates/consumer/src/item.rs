//! Market price item streams
use std::collections::BTreeMap;

use eta_codec::rdm::{domain, name_type};
use eta_codec::{DecodedField, Dictionary, Msg, MsgBody, MsgKey, Payload, Qos, RequestPriority, State};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::sink::MsgSink;
use crate::FIRST_ITEM_STREAM_ID;

/// One subscribed item
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSubscription {
    pub name: String,
    pub stream_id: i32,
    pub state: Option<State>,
    pub closed: bool,
    pub refreshes: u64,
    pub updates: u64,
}

impl ItemSubscription {
    pub fn new(name: impl Into<String>, stream_id: i32) -> Self {
        Self {
            name: name.into(),
            stream_id,
            state: None,
            closed: false,
            refreshes: 0,
            updates: 0,
        }
    }
}

/// What an item message amounted to
#[derive(Debug, Clone, PartialEq)]
pub enum ItemEvent {
    Refresh { stream_id: i32, fields: Vec<DecodedField> },
    Update { stream_id: i32, fields: Vec<DecodedField> },
    Status { stream_id: i32, state: Option<State> },
    /// The provider closed the stream; only this item is affected
    Closed { stream_id: i32 },
    Ack { stream_id: i32, ack_id: u32 },
    Ignored,
}

pub struct ItemStage {
    items: BTreeMap<i32, ItemSubscription>,
    request_sent: bool,
}

impl ItemStage {
    /// Assign consecutive stream ids starting at the first item stream
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items = names
            .into_iter()
            .zip(FIRST_ITEM_STREAM_ID..)
            .map(|(name, stream_id)| (stream_id, ItemSubscription::new(name, stream_id)))
            .collect();
        Self {
            items,
            request_sent: false,
        }
    }

    pub fn request_sent(&self) -> bool {
        self.request_sent
    }

    pub fn item(&self, stream_id: i32) -> Option<&ItemSubscription> {
        self.items.get(&stream_id)
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemSubscription> {
        self.items.values()
    }

    fn request_msg(item: &ItemSubscription, service_id: u16, qos: Qos) -> Msg {
        Msg::new(
            item.stream_id,
            domain::MARKET_PRICE,
            MsgBody::Request {
                streaming: true,
                priority: Some(RequestPriority { class: 1, count: 1 }),
                qos: Some(qos),
            },
        )
        .with_key(MsgKey::named(item.name.as_str(), name_type::RIC).with_service(service_id))
    }

    pub fn send_requests<S: MsgSink + ?Sized>(
        &mut self,
        sink: &mut S,
        service_id: u16,
        qos: Qos,
    ) -> Result<(), SessionError> {
        for item in self.items.values() {
            sink.send_msg(&Self::request_msg(item, service_id, qos))?;
            info!(item = %item.name, stream_id = item.stream_id, service_id, qos = %qos, "Item request sent");
        }
        self.request_sent = true;
        Ok(())
    }

    pub fn on_message<D: Dictionary + ?Sized>(
        &mut self,
        msg: &Msg,
        dictionary: &D,
    ) -> Result<ItemEvent, SessionError> {
        let stream_id = msg.stream_id;
        let Some(item) = self.items.get_mut(&stream_id) else {
            warn!(stream_id, "Market price message on unknown stream");
            return Ok(ItemEvent::Ignored);
        };

        match &msg.body {
            MsgBody::Refresh {
                solicited, state, ..
            } => {
                if let Some(name) = msg.key_name() {
                    if name != item.name {
                        warn!(expected = %item.name, received = %name, "Refresh for a different item name");
                    }
                }
                info!(item = %item.name, stream_id, state = %state, solicited, "Item refresh");
                item.closed = state.stream_state.is_closed();
                item.state = Some(state.clone());
                item.refreshes += 1;
                let fields = decode_fields(&item.name, &msg.payload, dictionary)?;
                Ok(ItemEvent::Refresh { stream_id, fields })
            }
            MsgBody::Update { .. } => {
                debug!(item = %item.name, stream_id, "Item update");
                item.updates += 1;
                let fields = decode_fields(&item.name, &msg.payload, dictionary)?;
                Ok(ItemEvent::Update { stream_id, fields })
            }
            MsgBody::Status { state, .. } => {
                if let Some(state) = state {
                    info!(item = %item.name, stream_id, state = %state, "Item status");
                    if state.stream_state.is_closed() {
                        warn!(item = %item.name, stream_id, "Item stream closed by provider");
                        item.closed = true;
                    }
                    item.state = Some(state.clone());
                }
                Ok(ItemEvent::Status {
                    stream_id,
                    state: state.clone(),
                })
            }
            MsgBody::Close => {
                warn!(item = %item.name, stream_id, "Item stream closed by provider");
                item.closed = true;
                Ok(ItemEvent::Closed { stream_id })
            }
            MsgBody::Ack {
                ack_id,
                nak_code,
                text,
            } => {
                info!(
                    item = %item.name,
                    ack_id,
                    nak_code = ?nak_code,
                    text = text.as_deref().unwrap_or(""),
                    "Received ack"
                );
                Ok(ItemEvent::Ack {
                    stream_id,
                    ack_id: *ack_id,
                })
            }
            MsgBody::Request { .. } => {
                warn!(stream_id, "Unexpected request on item stream");
                Ok(ItemEvent::Ignored)
            }
        }
    }

    /// Close every open item stream. Failures are logged and never stop teardown.
    pub fn close_streams<S: MsgSink + ?Sized>(&mut self, sink: &mut S) {
        if !self.request_sent {
            return;
        }
        for item in self.items.values_mut().filter(|item| !item.closed) {
            match sink.send_msg(&Msg::close(item.stream_id, domain::MARKET_PRICE)) {
                Ok(()) => info!(item = %item.name, stream_id = item.stream_id, "Item stream closed"),
                Err(e) => warn!(item = %item.name, error = %e, "Failed to close item stream"),
            }
            item.closed = true;
        }
    }
}

fn decode_fields<D: Dictionary + ?Sized>(
    item: &str,
    payload: &Payload,
    dictionary: &D,
) -> Result<Vec<DecodedField>, SessionError> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    let fields = dictionary.decode_field_list(payload.as_field_list()?)?;
    for field in &fields {
        info!(item, fid = field.fid, "{field}");
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eta_codec::rdm::{DataState, StreamState};
    use eta_codec::{DataDictionary, DataValue, DictionaryError, FieldDef, FieldList, MfType, Real, RwfType};

    fn dictionary() -> DataDictionary {
        let mut dict = DataDictionary::new();
        dict.add_fields([
            FieldDef {
                fid: 6,
                acronym: "TRDPRC_1".into(),
                dde_acronym: String::new(),
                ripples_to: 0,
                mf_type: MfType::Price,
                length: 17,
                rwf_type: RwfType::Real,
                rwf_len: 7,
            },
            FieldDef {
                fid: 3,
                acronym: "DSPLY_NAME".into(),
                dde_acronym: String::new(),
                ripples_to: 0,
                mf_type: MfType::Alphanumeric,
                length: 16,
                rwf_type: RwfType::RmtesString,
                rwf_len: 16,
            },
        ]);
        dict
    }

    fn subscribed() -> (ItemStage, Vec<Msg>) {
        let mut stage = ItemStage::new(["TRI"]);
        let mut sent = Vec::new();
        stage.send_requests(&mut sent, 1, Qos::default()).unwrap();
        (stage, sent)
    }

    #[test]
    fn test_request_fields() {
        let (stage, sent) = subscribed();
        assert!(stage.request_sent());
        let msg = &sent[0];
        assert_eq!(msg.stream_id, 5);
        assert_eq!(msg.domain, domain::MARKET_PRICE);
        let MsgBody::Request { streaming, priority, qos } = &msg.body else {
            panic!("expected a request");
        };
        assert!(*streaming);
        assert_eq!(*priority, Some(RequestPriority { class: 1, count: 1 }));
        assert_eq!(*qos, Some(Qos::default()));
        let key = msg.key.as_ref().unwrap();
        assert_eq!(key.name.as_deref(), Some("TRI"));
        assert_eq!(key.name_type, Some(name_type::RIC));
        assert_eq!(key.service_id, Some(1));
    }

    #[test]
    fn test_stream_ids_are_consecutive() {
        let stage = ItemStage::new(["TRI", "IBM.N"]);
        let ids: Vec<i32> = stage.items().map(|i| i.stream_id).collect();
        assert_eq!(ids, vec![5, 6]);
    }

    #[test]
    fn test_refresh_decodes_fields() {
        let (mut stage, _sent) = subscribed();
        let refresh = Msg::refresh(5, domain::MARKET_PRICE, State::open_ok())
            .with_key(MsgKey::named("TRI", name_type::RIC))
            .with_payload(Payload::FieldList(
                FieldList::new().with(6, "45.25").with(3, "THOMSON REUTERS"),
            ));
        let ItemEvent::Refresh { fields, .. } = stage.on_message(&refresh, &dictionary()).unwrap() else {
            panic!("expected a refresh event");
        };
        assert_eq!(fields[0].value, DataValue::Real(Real::parse("45.25").unwrap()));
        assert_eq!(fields[1].acronym, "DSPLY_NAME");
        let item = stage.item(5).unwrap();
        assert_eq!(item.state, Some(State::open_ok()));
        assert_eq!(item.refreshes, 1);
    }

    #[test]
    fn test_unknown_fid_is_fatal() {
        let (mut stage, _sent) = subscribed();
        let update = Msg::update(5, domain::MARKET_PRICE)
            .with_payload(Payload::FieldList(FieldList::new().with(999, "1")));
        assert!(matches!(
            stage.on_message(&update, &dictionary()),
            Err(SessionError::Dictionary(DictionaryError::UnknownFid(999)))
        ));
    }

    #[test]
    fn test_closed_status_is_local() {
        let (mut stage, _sent) = subscribed();
        let status = Msg::status(
            5,
            domain::MARKET_PRICE,
            Some(State::new(StreamState::ClosedRecover, DataState::Suspect)),
        );
        let event = stage.on_message(&status, &dictionary()).unwrap();
        assert!(matches!(event, ItemEvent::Status { stream_id: 5, .. }));
        assert!(stage.item(5).unwrap().closed);

        // Nothing left to close
        let mut sent: Vec<Msg> = Vec::new();
        stage.close_streams(&mut sent);
        assert!(sent.is_empty());
    }

    #[test]
    fn test_open_refresh_reopens_closed_item() {
        let (mut stage, _sent) = subscribed();
        let status = Msg::status(
            5,
            domain::MARKET_PRICE,
            Some(State::new(StreamState::ClosedRecover, DataState::Suspect)),
        );
        stage.on_message(&status, &dictionary()).unwrap();
        assert!(stage.item(5).unwrap().closed);

        let refresh = Msg::refresh(5, domain::MARKET_PRICE, State::open_ok())
            .with_payload(Payload::FieldList(FieldList::new().with(6, "45.50")));
        stage.on_message(&refresh, &dictionary()).unwrap();
        assert!(!stage.item(5).unwrap().closed);

        let mut sent: Vec<Msg> = Vec::new();
        stage.close_streams(&mut sent);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, MsgBody::Close);
    }

    #[test]
    fn test_close_streams_once() {
        let (mut stage, _sent) = subscribed();
        let mut sent: Vec<Msg> = Vec::new();
        stage.close_streams(&mut sent);
        stage.close_streams(&mut sent);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, MsgBody::Close);
        assert_eq!(sent[0].stream_id, 5);
    }

    #[test]
    fn test_close_without_request_sends_nothing() {
        let mut stage = ItemStage::new(["TRI"]);
        let mut sent: Vec<Msg> = Vec::new();
        stage.close_streams(&mut sent);
        assert!(sent.is_empty());
    }

    #[test]
    fn test_ack_and_unknown_stream() {
        let (mut stage, _sent) = subscribed();
        let ack = Msg::new(
            5,
            domain::MARKET_PRICE,
            MsgBody::Ack {
                ack_id: 12,
                nak_code: None,
                text: Some("ok".into()),
            },
        );
        assert_eq!(
            stage.on_message(&ack, &dictionary()).unwrap(),
            ItemEvent::Ack { stream_id: 5, ack_id: 12 }
        );
        let stray = Msg::update(77, domain::MARKET_PRICE);
        assert_eq!(stage.on_message(&stray, &dictionary()).unwrap(), ItemEvent::Ignored);
    }
}
