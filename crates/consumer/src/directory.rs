//! Source directory discovery.
//!
//! The request asks for every service; the target is picked out by name
//! because service ids are assigned by the provider.

use eta_codec::rdm::{directory as dir, domain};
use eta_codec::{
    CodecError, DataValue, ElementList, FilterAction, FilterEntry, MapAction, Msg, MsgBody,
    MsgKey, Payload, Qos, State,
};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::sink::MsgSink;
use crate::SOURCE_STREAM_ID;

pub const MAX_CAPABILITIES: usize = 10;
pub const MAX_DICTIONARIES_PROVIDED: usize = 5;
pub const MAX_QOS: usize = 5;

/// Request filter: Info | State | Group
pub const DIRECTORY_FILTER: u32 = dir::INFO_BIT | dir::STATE_BIT | dir::GROUP_BIT;

/// What is known about the target service
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceDiscoveryInfo {
    pub service_name: String,
    pub service_id: Option<u16>,
    pub found: bool,
    pub dictionary_supported: bool,
    pub market_price_supported: bool,
    pub field_dictionary_provided: bool,
    pub enum_dictionary_provided: bool,
    pub up: bool,
    pub accepting_requests: bool,
    pub status: Option<State>,
    pub qos: Vec<Qos>,
}

impl ServiceDiscoveryInfo {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            accepting_requests: true,
            ..Self::default()
        }
    }

    pub fn is_ready(&self) -> bool {
        self.found && self.up && self.accepting_requests
    }

    /// QoS to request items with
    pub fn first_qos(&self) -> Qos {
        self.qos.first().copied().unwrap_or_default()
    }

    fn reset(&mut self) {
        *self = Self::new(std::mem::take(&mut self.service_name));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryOutcome {
    Unchanged,
    /// Target service found, up and accepting requests
    ServiceReady,
}

pub struct DirectoryStage {
    info: ServiceDiscoveryInfo,
    max_services: usize,
    field_download_name: String,
    enum_download_name: String,
}

impl DirectoryStage {
    pub fn new(
        service_name: impl Into<String>,
        max_services: usize,
        field_download_name: impl Into<String>,
        enum_download_name: impl Into<String>,
    ) -> Self {
        Self {
            info: ServiceDiscoveryInfo::new(service_name),
            max_services,
            field_download_name: field_download_name.into(),
            enum_download_name: enum_download_name.into(),
        }
    }

    pub fn info(&self) -> &ServiceDiscoveryInfo {
        &self.info
    }

    pub fn request_msg(&self) -> Msg {
        Msg::request(SOURCE_STREAM_ID, domain::SOURCE, true)
            .with_key(MsgKey::default().with_filter(DIRECTORY_FILTER))
    }

    pub fn send_request<S: MsgSink + ?Sized>(&mut self, sink: &mut S) -> Result<(), SessionError> {
        sink.send_msg(&self.request_msg())?;
        info!(service = %self.info.service_name, "Source directory request sent");
        Ok(())
    }

    /// Apply a directory message. Every refresh or update re-checks that the
    /// target service is present, up and accepting requests.
    pub fn on_response(&mut self, msg: &Msg) -> Result<DirectoryOutcome, SessionError> {
        match &msg.body {
            MsgBody::Refresh {
                clear_cache, state, ..
            } => {
                info!(state = %state, "Received source directory refresh");
                if *clear_cache {
                    debug!("Directory refresh clears cached service state");
                    self.info.reset();
                }
                self.apply(&msg.payload)?;
                self.evaluate()
            }
            MsgBody::Update { .. } => {
                debug!("Received source directory update");
                self.apply(&msg.payload)?;
                self.evaluate()
            }
            MsgBody::Status { state, .. } => {
                match state {
                    Some(state) => info!(state = %state, "Received source directory status"),
                    None => info!("Received source directory status"),
                }
                Ok(DirectoryOutcome::Unchanged)
            }
            MsgBody::Close => {
                warn!("Source directory stream closed by provider");
                Ok(DirectoryOutcome::Unchanged)
            }
            other => {
                warn!(class = %other.class(), "Unexpected source directory message class");
                Ok(DirectoryOutcome::Unchanged)
            }
        }
    }

    fn evaluate(&self) -> Result<DirectoryOutcome, SessionError> {
        let info = &self.info;
        if !info.found {
            return Err(SessionError::ServiceNotFound(info.service_name.clone()));
        }
        if !(info.up && info.accepting_requests) {
            return Err(SessionError::ServiceUnavailable {
                name: info.service_name.clone(),
                up: info.up,
                accepting: info.accepting_requests,
            });
        }
        Ok(DirectoryOutcome::ServiceReady)
    }

    fn apply(&mut self, payload: &Payload) -> Result<(), SessionError> {
        if payload.is_empty() {
            return Ok(());
        }
        let map = payload.as_map()?;
        for (index, entry) in map.entries.iter().enumerate() {
            if index >= self.max_services {
                warn!(
                    max_services = self.max_services,
                    skipped = map.entries.len() - index,
                    "Directory has more services than tracked, skipping the rest"
                );
                break;
            }
            let service_id = entry
                .key
                .as_u64()
                .and_then(|id| u16::try_from(id).ok())
                .ok_or_else(|| CodecError::Malformed(format!("bad service id key {}", entry.key)))?;

            if entry.action == MapAction::Delete {
                if self.info.service_id == Some(service_id) {
                    warn!(service = %self.info.service_name, service_id, "Target service deleted from directory");
                    self.info.reset();
                }
                continue;
            }
            if entry.payload.is_empty() {
                continue;
            }

            let filters = entry.payload.as_filter_list()?;
            // Info first so a State filter in the same entry can be matched to the target
            let ordered = filters
                .entries
                .iter()
                .filter(|f| f.id == dir::FILTER_INFO)
                .chain(filters.entries.iter().filter(|f| f.id != dir::FILTER_INFO));
            for filter in ordered {
                self.apply_filter(service_id, filter)?;
            }
        }
        Ok(())
    }

    fn apply_filter(&mut self, service_id: u16, filter: &FilterEntry) -> Result<(), SessionError> {
        match filter.id {
            dir::FILTER_INFO => self.apply_info(service_id, filter),
            dir::FILTER_STATE => self.apply_state(service_id, filter),
            dir::FILTER_GROUP => {
                if let Some(group) = element_list(filter)?.and_then(|e| e.get(dir::GROUP)) {
                    debug!(service_id, group = %group, "Directory group filter");
                }
                Ok(())
            }
            dir::FILTER_LOAD | dir::FILTER_DATA | dir::FILTER_LINK => {
                debug!(service_id, filter = filter.id, "Directory filter present, not decoded");
                Ok(())
            }
            other => Err(CodecError::Malformed(format!("unknown directory filter id {other}")).into()),
        }
    }

    fn apply_info(&mut self, service_id: u16, filter: &FilterEntry) -> Result<(), SessionError> {
        let Some(elements) = element_list(filter)? else {
            return Ok(());
        };
        let name = elements.get(dir::NAME).and_then(DataValue::as_str);
        let is_target = match name {
            Some(name) => name == self.info.service_name,
            None => self.info.service_id == Some(service_id),
        };
        if !is_target {
            debug!(service_id, name = name.unwrap_or(""), "Skipping service");
            return Ok(());
        }

        let info = &mut self.info;
        if !info.found {
            info!(service = %info.service_name, service_id, "Found target service");
        }
        info.found = true;
        info.service_id = Some(service_id);

        if let Some(capabilities) = elements.get(dir::CAPABILITIES).and_then(DataValue::as_array) {
            let capabilities: Vec<u64> = capabilities
                .iter()
                .take(MAX_CAPABILITIES)
                .filter_map(DataValue::as_u64)
                .collect();
            info.dictionary_supported = capabilities.contains(&u64::from(domain::DICTIONARY));
            info.market_price_supported = capabilities.contains(&u64::from(domain::MARKET_PRICE));
            debug!(?capabilities, "Service capabilities");
        }

        if let Some(provided) = elements
            .get(dir::DICTIONARIES_PROVIDED)
            .and_then(DataValue::as_array)
        {
            let names: Vec<&str> = provided
                .iter()
                .take(MAX_DICTIONARIES_PROVIDED)
                .filter_map(DataValue::as_str)
                .collect();
            info.field_dictionary_provided = names.contains(&self.field_download_name.as_str());
            info.enum_dictionary_provided = names.contains(&self.enum_download_name.as_str());
            debug!(?names, "Dictionaries provided");
        }

        info.qos = match elements.get(dir::QOS).and_then(DataValue::as_array) {
            Some(qos) => qos
                .iter()
                .take(MAX_QOS)
                .filter_map(DataValue::as_qos)
                .copied()
                .collect(),
            None => Vec::new(),
        };
        if info.qos.is_empty() {
            info.qos.push(Qos::default());
        }
        Ok(())
    }

    fn apply_state(&mut self, service_id: u16, filter: &FilterEntry) -> Result<(), SessionError> {
        if self.info.service_id != Some(service_id) {
            return Ok(());
        }
        let Some(elements) = element_list(filter)? else {
            return Ok(());
        };
        let info = &mut self.info;
        if let Some(state) = elements.get(dir::SERVICE_STATE).and_then(DataValue::as_u64) {
            info.up = state == 1;
        }
        // Absent keeps the last value, which starts out accepting
        if let Some(accepting) = elements.get(dir::ACCEPTING_REQUESTS).and_then(DataValue::as_u64) {
            info.accepting_requests = accepting == 1;
        }
        if let Some(status) = elements.get(dir::STATUS).and_then(DataValue::as_state) {
            info!(service_id, status = %status, "Service status");
            info.status = Some(status.clone());
        }
        info!(
            service = %info.service_name,
            service_id,
            up = info.up,
            accepting_requests = info.accepting_requests,
            "Service state"
        );
        Ok(())
    }
}

/// Element list of a filter entry; a cleared entry carries none
fn element_list(filter: &FilterEntry) -> Result<Option<&ElementList>, CodecError> {
    if filter.action == FilterAction::Clear || filter.payload.is_empty() {
        return Ok(None);
    }
    filter.payload.as_element_list().map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eta_codec::rdm::{DataState, Rate, StreamState, Timeliness};
    use eta_codec::{FilterList, Map};

    fn stage() -> DirectoryStage {
        DirectoryStage::new("DIRECT_FEED", 15, "RWFFld", "RWFEnum")
    }

    fn info_filter(name: &str) -> FilterEntry {
        FilterEntry {
            id: dir::FILTER_INFO,
            action: FilterAction::Set,
            payload: Payload::ElementList(
                ElementList::new()
                    .with(dir::NAME, DataValue::ascii(name))
                    .with(
                        dir::CAPABILITIES,
                        DataValue::Array(vec![DataValue::UInt(5), DataValue::UInt(6)]),
                    )
                    .with(
                        dir::DICTIONARIES_PROVIDED,
                        DataValue::Array(vec![DataValue::ascii("RWFFld"), DataValue::ascii("RWFEnum")]),
                    ),
            ),
        }
    }

    fn state_filter(up: u64, accepting: u64) -> FilterEntry {
        FilterEntry {
            id: dir::FILTER_STATE,
            action: FilterAction::Set,
            payload: Payload::ElementList(
                ElementList::new()
                    .with(dir::SERVICE_STATE, DataValue::UInt(up))
                    .with(dir::ACCEPTING_REQUESTS, DataValue::UInt(accepting)),
            ),
        }
    }

    fn refresh(entries: Vec<(u64, Vec<FilterEntry>)>) -> Msg {
        let mut map = Map::new();
        for (id, filters) in entries {
            map = map.with(
                MapAction::Add,
                DataValue::UInt(id),
                Payload::FilterList(FilterList { entries: filters }),
            );
        }
        Msg::refresh(SOURCE_STREAM_ID, domain::SOURCE, State::open_ok()).with_payload(Payload::Map(map))
    }

    #[test]
    fn test_request_filter() {
        let mut stage = stage();
        let mut sent: Vec<Msg> = Vec::new();
        stage.send_request(&mut sent).unwrap();
        let key = sent[0].key.as_ref().unwrap();
        assert_eq!(key.filter, Some(0x0B));
        assert_eq!(key.service_id, None);
        assert_eq!(sent[0].stream_id, 2);
        assert!(matches!(sent[0].body, MsgBody::Request { streaming: true, .. }));
    }

    #[test]
    fn test_target_found_up_and_accepting() {
        let mut stage = stage();
        let msg = refresh(vec![
            (1, vec![info_filter("OTHER"), state_filter(1, 1)]),
            (7, vec![state_filter(1, 1), info_filter("DIRECT_FEED")]),
        ]);
        assert_eq!(stage.on_response(&msg).unwrap(), DirectoryOutcome::ServiceReady);
        let info = stage.info();
        assert!(info.found);
        assert_eq!(info.service_id, Some(7));
        assert!(info.dictionary_supported && info.market_price_supported);
        assert!(info.field_dictionary_provided && info.enum_dictionary_provided);
        assert_eq!(info.qos, vec![Qos::default()]);
    }

    #[test]
    fn test_target_missing() {
        let mut stage = stage();
        let msg = refresh(vec![(1, vec![info_filter("OTHER"), state_filter(1, 1)])]);
        assert!(matches!(
            stage.on_response(&msg),
            Err(SessionError::ServiceNotFound(_))
        ));
        assert!(!stage.info().found);
    }

    #[test]
    fn test_service_down_is_fatal() {
        let mut stage = stage();
        let msg = refresh(vec![(3, vec![info_filter("DIRECT_FEED"), state_filter(0, 1)])]);
        assert!(matches!(
            stage.on_response(&msg),
            Err(SessionError::ServiceUnavailable { up: false, accepting: true, .. })
        ));
    }

    #[test]
    fn test_accepting_defaults_when_absent() {
        let mut stage = stage();
        let state = FilterEntry {
            id: dir::FILTER_STATE,
            action: FilterAction::Set,
            payload: Payload::ElementList(ElementList::new().with(dir::SERVICE_STATE, DataValue::UInt(1))),
        };
        let msg = refresh(vec![(3, vec![info_filter("DIRECT_FEED"), state])]);
        assert_eq!(stage.on_response(&msg).unwrap(), DirectoryOutcome::ServiceReady);
    }

    #[test]
    fn test_absent_accepting_keeps_previous_value() {
        let mut stage = stage();
        let first = refresh(vec![(3, vec![info_filter("DIRECT_FEED"), state_filter(0, 0)])]);
        assert!(stage.on_response(&first).is_err());

        let up_only = FilterEntry {
            id: dir::FILTER_STATE,
            action: FilterAction::Set,
            payload: Payload::ElementList(ElementList::new().with(dir::SERVICE_STATE, DataValue::UInt(1))),
        };
        let mut update = refresh(vec![(3, vec![up_only])]);
        update.body = MsgBody::Update { update_type: 0 };
        assert!(matches!(
            stage.on_response(&update),
            Err(SessionError::ServiceUnavailable { up: true, accepting: false, .. })
        ));
        assert!(!stage.info().accepting_requests);
    }

    #[test]
    fn test_deleted_target_is_not_found() {
        let mut stage = stage();
        stage
            .on_response(&refresh(vec![(4, vec![info_filter("DIRECT_FEED"), state_filter(1, 1)])]))
            .unwrap();

        let map = Map::new().with(MapAction::Delete, DataValue::UInt(4), Payload::NoData);
        let mut update = Msg::refresh(SOURCE_STREAM_ID, domain::SOURCE, State::open_ok())
            .with_payload(Payload::Map(map));
        update.body = MsgBody::Update { update_type: 0 };
        assert!(matches!(
            stage.on_response(&update),
            Err(SessionError::ServiceNotFound(_))
        ));
        assert_eq!(stage.info().service_id, None);
    }

    #[test]
    fn test_entries_beyond_cap_skipped() {
        let mut stage = DirectoryStage::new("DIRECT_FEED", 2, "RWFFld", "RWFEnum");
        let msg = refresh(vec![
            (1, vec![info_filter("A")]),
            (2, vec![info_filter("B")]),
            (3, vec![info_filter("DIRECT_FEED"), state_filter(1, 1)]),
        ]);
        assert!(matches!(
            stage.on_response(&msg),
            Err(SessionError::ServiceNotFound(_))
        ));
    }

    #[test]
    fn test_unknown_filter_is_malformed() {
        let mut stage = stage();
        let bogus = FilterEntry {
            id: 9,
            action: FilterAction::Set,
            payload: Payload::NoData,
        };
        let msg = refresh(vec![(3, vec![info_filter("DIRECT_FEED"), bogus])]);
        assert!(matches!(
            stage.on_response(&msg),
            Err(SessionError::Codec(CodecError::Malformed(_)))
        ));
    }

    #[test]
    fn test_qos_capped_and_copied() {
        let mut stage = stage();
        let delayed = Qos {
            timeliness: Timeliness::Delayed(5),
            rate: Rate::JitConflated,
            dynamic: false,
        };
        let mut info = info_filter("DIRECT_FEED");
        if let Payload::ElementList(list) = &mut info.payload {
            list.push(dir::QOS, DataValue::Array(vec![DataValue::Qos(delayed); 7]));
        }
        stage.on_response(&refresh(vec![(4, vec![info, state_filter(1, 1)])])).unwrap();
        assert_eq!(stage.info().qos.len(), MAX_QOS);
        assert_eq!(stage.info().first_qos(), delayed);
    }

    #[test]
    fn test_update_takes_service_down() {
        let mut stage = stage();
        stage
            .on_response(&refresh(vec![(4, vec![info_filter("DIRECT_FEED"), state_filter(1, 1)])]))
            .unwrap();

        let mut update = refresh(vec![(4, vec![state_filter(0, 0)])]);
        update.body = MsgBody::Update { update_type: 0 };
        assert!(matches!(
            stage.on_response(&update),
            Err(SessionError::ServiceUnavailable { up: false, accepting: false, .. })
        ));
    }

    #[test]
    fn test_clear_cache_resets() {
        let mut stage = stage();
        stage
            .on_response(&refresh(vec![(4, vec![info_filter("DIRECT_FEED"), state_filter(1, 1)])]))
            .unwrap();

        let cleared = Msg::new(
            SOURCE_STREAM_ID,
            domain::SOURCE,
            MsgBody::Refresh {
                solicited: false,
                refresh_complete: true,
                clear_cache: true,
                state: State::new(StreamState::Open, DataState::Ok),
            },
        );
        assert!(stage.on_response(&cleared).is_err());
        assert_eq!(stage.info().service_id, None);
        assert_eq!(stage.info().service_name, "DIRECT_FEED");
    }

    #[test]
    fn test_status_and_close_logged_only() {
        let mut stage = stage();
        let status = Msg::status(SOURCE_STREAM_ID, domain::SOURCE, None);
        assert_eq!(stage.on_response(&status).unwrap(), DirectoryOutcome::Unchanged);
        let close = Msg::close(SOURCE_STREAM_ID, domain::SOURCE);
        assert_eq!(stage.on_response(&close).unwrap(), DirectoryOutcome::Unchanged);
    }
}
