//! Field and enum dictionary bootstrap: local files first, download what is missing.
use std::fmt;

use eta_codec::rdm::{dictionary as names, domain, name_type};
use eta_codec::{Dictionary, DictionaryError, DictionaryKind, Msg, MsgBody, MsgKey};
use eta_metadata::consumer::DictionaryConfig;
use tracing::{debug, info, warn};

use crate::directory::ServiceDiscoveryInfo;
use crate::error::SessionError;
use crate::sink::MsgSink;
use crate::{ENUM_DICTIONARY_STREAM_ID, FIELD_DICTIONARY_STREAM_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionaryId {
    Field,
    Enum,
}

impl DictionaryId {
    pub fn stream_id(self) -> i32 {
        match self {
            DictionaryId::Field => FIELD_DICTIONARY_STREAM_ID,
            DictionaryId::Enum => ENUM_DICTIONARY_STREAM_ID,
        }
    }

    pub fn from_stream_id(stream_id: i32) -> Option<Self> {
        match stream_id {
            FIELD_DICTIONARY_STREAM_ID => Some(DictionaryId::Field),
            ENUM_DICTIONARY_STREAM_ID => Some(DictionaryId::Enum),
            _ => None,
        }
    }

    fn expected_kind(self) -> DictionaryKind {
        match self {
            DictionaryId::Field => DictionaryKind::FieldDefinitions,
            DictionaryId::Enum => DictionaryKind::EnumTables,
        }
    }
}

impl fmt::Display for DictionaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictionaryId::Field => f.write_str("field"),
            DictionaryId::Enum => f.write_str("enum"),
        }
    }
}

/// Load state of one dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionaryLoadState {
    TryLocalFile,
    Loaded,
    /// Local file unavailable; needs a download
    NotLoaded,
    /// Request sent, no part received yet
    AwaitDownload,
    /// First part seen, its type tag captured
    Downloading { kind: DictionaryKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionaryProgress {
    Unchanged,
    PartApplied,
    Loaded(DictionaryId),
    /// Both dictionaries are now loaded
    AllLoaded,
}

pub struct DictionaryStage {
    config: DictionaryConfig,
    field: DictionaryLoadState,
    enums: DictionaryLoadState,
}

impl DictionaryStage {
    pub fn new(config: &DictionaryConfig) -> Self {
        Self {
            config: config.clone(),
            field: DictionaryLoadState::TryLocalFile,
            enums: DictionaryLoadState::TryLocalFile,
        }
    }

    pub fn state(&self, id: DictionaryId) -> DictionaryLoadState {
        match id {
            DictionaryId::Field => self.field,
            DictionaryId::Enum => self.enums,
        }
    }

    fn state_mut(&mut self, id: DictionaryId) -> &mut DictionaryLoadState {
        match id {
            DictionaryId::Field => &mut self.field,
            DictionaryId::Enum => &mut self.enums,
        }
    }

    fn download_name(&self, id: DictionaryId) -> &str {
        match id {
            DictionaryId::Field => &self.config.field_download_name,
            DictionaryId::Enum => &self.config.enum_download_name,
        }
    }

    pub fn all_loaded(&self) -> bool {
        self.field == DictionaryLoadState::Loaded && self.enums == DictionaryLoadState::Loaded
    }

    /// Try both local files. A failure only means the dictionary must be downloaded.
    pub fn load_local_files<D: Dictionary + ?Sized>(&mut self, dictionary: &mut D) {
        match dictionary.load_field_file(&self.config.field_file) {
            Ok(()) => {
                info!(path = %self.config.field_file.display(), "Loaded field dictionary from file");
                self.field = DictionaryLoadState::Loaded;
            }
            Err(e) => {
                warn!(path = %self.config.field_file.display(), error = %e, "Field dictionary file not loaded, will download");
                self.field = DictionaryLoadState::NotLoaded;
            }
        }
        match dictionary.load_enum_file(&self.config.enum_file) {
            Ok(()) => {
                info!(path = %self.config.enum_file.display(), "Loaded enum dictionary from file");
                self.enums = DictionaryLoadState::Loaded;
            }
            Err(e) => {
                warn!(path = %self.config.enum_file.display(), error = %e, "Enum dictionary file not loaded, will download");
                self.enums = DictionaryLoadState::NotLoaded;
            }
        }
    }

    fn request_msg(&self, id: DictionaryId, service_id: u16) -> Msg {
        Msg::request(id.stream_id(), domain::DICTIONARY, false).with_key(
            MsgKey::named(self.download_name(id), name_type::RIC)
                .with_service(service_id)
                .with_filter(names::VERBOSITY_VERBOSE),
        )
    }

    /// Request every dictionary that did not load from file. The service must
    /// support the dictionary domain and provide each missing dictionary.
    pub fn request_downloads<S: MsgSink + ?Sized>(
        &mut self,
        sink: &mut S,
        service: &ServiceDiscoveryInfo,
    ) -> Result<(), SessionError> {
        if !service.dictionary_supported {
            return Err(SessionError::DictionaryDomainUnsupported(service.service_name.clone()));
        }
        let service_id = service
            .service_id
            .ok_or_else(|| SessionError::ServiceNotFound(service.service_name.clone()))?;

        for id in [DictionaryId::Field, DictionaryId::Enum] {
            if self.state(id) != DictionaryLoadState::NotLoaded {
                continue;
            }
            let provided = match id {
                DictionaryId::Field => service.field_dictionary_provided,
                DictionaryId::Enum => service.enum_dictionary_provided,
            };
            if !provided {
                return Err(SessionError::DictionaryNotProvided {
                    service: service.service_name.clone(),
                    dictionary: self.download_name(id).to_string(),
                });
            }
            sink.send_msg(&self.request_msg(id, service_id))?;
            info!(dictionary = %self.download_name(id), stream_id = id.stream_id(), service_id, "Dictionary request sent");
            *self.state_mut(id) = DictionaryLoadState::AwaitDownload;
        }
        Ok(())
    }

    pub fn on_response<D: Dictionary + ?Sized>(
        &mut self,
        msg: &Msg,
        dictionary: &mut D,
    ) -> Result<DictionaryProgress, SessionError> {
        let Some(id) = DictionaryId::from_stream_id(msg.stream_id) else {
            warn!(stream_id = msg.stream_id, "Dictionary message on unknown stream");
            return Ok(DictionaryProgress::Unchanged);
        };

        match &msg.body {
            MsgBody::Refresh {
                refresh_complete, ..
            } => self.on_part(id, *refresh_complete, msg, dictionary),
            MsgBody::Status { state, .. } => {
                let Some(state) = state else {
                    debug!(dictionary = %id, "Dictionary status without state");
                    return Ok(DictionaryProgress::Unchanged);
                };
                info!(dictionary = %id, state = %state, "Received dictionary status");
                if state.stream_state.is_closed() && self.state(id) != DictionaryLoadState::Loaded {
                    return Err(SessionError::DictionaryStreamClosed(self.download_name(id).to_string()));
                }
                Ok(DictionaryProgress::Unchanged)
            }
            other => {
                debug!(dictionary = %id, class = %other.class(), "Ignoring dictionary message");
                Ok(DictionaryProgress::Unchanged)
            }
        }
    }

    fn on_part<D: Dictionary + ?Sized>(
        &mut self,
        id: DictionaryId,
        refresh_complete: bool,
        msg: &Msg,
        dictionary: &mut D,
    ) -> Result<DictionaryProgress, SessionError> {
        let kind = match self.state(id) {
            DictionaryLoadState::AwaitDownload => {
                let kind = dictionary.decode_type_tag(&msg.payload)?;
                if kind != id.expected_kind() {
                    return Err(DictionaryError::Malformed(format!(
                        "{id} dictionary stream carried {kind:?}"
                    ))
                    .into());
                }
                debug!(dictionary = %id, ?kind, "First dictionary part");
                kind
            }
            DictionaryLoadState::Downloading { kind } => kind,
            DictionaryLoadState::Loaded => {
                // Never replace a dictionary already loaded, from file or download
                debug!(dictionary = %id, "Dictionary already loaded, ignoring part");
                return Ok(DictionaryProgress::Unchanged);
            }
            state => {
                warn!(dictionary = %id, ?state, "Dictionary part before any request");
                return Ok(DictionaryProgress::Unchanged);
            }
        };

        let applied = match kind {
            DictionaryKind::FieldDefinitions => dictionary.decode_field_part(&msg.payload)?,
            DictionaryKind::EnumTables => dictionary.decode_enum_part(&msg.payload)?,
        };
        debug!(dictionary = %id, applied, refresh_complete, "Applied dictionary part");

        if !refresh_complete {
            *self.state_mut(id) = DictionaryLoadState::Downloading { kind };
            return Ok(DictionaryProgress::PartApplied);
        }

        *self.state_mut(id) = DictionaryLoadState::Loaded;
        info!(dictionary = %self.download_name(id), "Dictionary download complete");
        if self.all_loaded() {
            Ok(DictionaryProgress::AllLoaded)
        } else {
            Ok(DictionaryProgress::Loaded(id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eta_codec::dictionary::wire::{enum_tables_payload, field_definitions_payload};
    use eta_codec::rdm::{DataState, StreamState};
    use eta_codec::{DataDictionary, EnumTable, FieldDef, MfType, Payload, RwfType, State};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn config() -> DictionaryConfig {
        DictionaryConfig {
            field_file: PathBuf::from("/nonexistent/RDMFieldDictionary"),
            enum_file: PathBuf::from("/nonexistent/enumtype.def"),
            ..DictionaryConfig::default()
        }
    }

    fn service() -> ServiceDiscoveryInfo {
        ServiceDiscoveryInfo {
            service_id: Some(1),
            found: true,
            dictionary_supported: true,
            market_price_supported: true,
            field_dictionary_provided: true,
            enum_dictionary_provided: true,
            up: true,
            accepting_requests: true,
            ..ServiceDiscoveryInfo::new("DIRECT_FEED")
        }
    }

    fn field(fid: i16, acronym: &str) -> FieldDef {
        FieldDef {
            fid,
            acronym: acronym.into(),
            dde_acronym: String::new(),
            ripples_to: 0,
            mf_type: MfType::Price,
            length: 17,
            rwf_type: RwfType::Real,
            rwf_len: 7,
        }
    }

    fn part(stream_id: i32, payload: Payload, complete: bool) -> Msg {
        Msg::new(
            stream_id,
            domain::DICTIONARY,
            MsgBody::Refresh {
                solicited: true,
                refresh_complete: complete,
                clear_cache: false,
                state: State::new(StreamState::NonStreaming, DataState::Ok),
            },
        )
        .with_payload(payload)
    }

    fn awaiting() -> (DictionaryStage, DataDictionary, Vec<Msg>) {
        let mut stage = DictionaryStage::new(&config());
        let mut dict = DataDictionary::new();
        stage.load_local_files(&mut dict);
        let mut sent = Vec::new();
        stage.request_downloads(&mut sent, &service()).unwrap();
        (stage, dict, sent)
    }

    #[test]
    fn test_missing_files_need_download() {
        let mut stage = DictionaryStage::new(&config());
        assert_eq!(stage.state(DictionaryId::Field), DictionaryLoadState::TryLocalFile);
        stage.load_local_files(&mut DataDictionary::new());
        assert_eq!(stage.state(DictionaryId::Field), DictionaryLoadState::NotLoaded);
        assert_eq!(stage.state(DictionaryId::Enum), DictionaryLoadState::NotLoaded);
        assert!(!stage.all_loaded());
    }

    #[test]
    fn test_download_requests() {
        let (stage, _dict, sent) = awaiting();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].stream_id, 3);
        assert_eq!(sent[1].stream_id, 4);
        let key = sent[0].key.as_ref().unwrap();
        assert_eq!(key.name.as_deref(), Some("RWFFld"));
        assert_eq!(key.filter, Some(0x0F));
        assert_eq!(key.service_id, Some(1));
        assert!(matches!(sent[1].body, MsgBody::Request { streaming: false, .. }));
        assert_eq!(stage.state(DictionaryId::Enum), DictionaryLoadState::AwaitDownload);
    }

    #[test]
    fn test_loaded_only_on_refresh_complete() {
        let (mut stage, mut dict, _sent) = awaiting();
        let first = part(3, field_definitions_payload(&[field(6, "TRDPRC_1")], None, true), false);
        assert_eq!(stage.on_response(&first, &mut dict).unwrap(), DictionaryProgress::PartApplied);
        assert_eq!(
            stage.state(DictionaryId::Field),
            DictionaryLoadState::Downloading { kind: DictionaryKind::FieldDefinitions }
        );

        // Later parts carry no type tag
        let second = part(3, field_definitions_payload(&[field(22, "BID")], None, false), false);
        assert_eq!(stage.on_response(&second, &mut dict).unwrap(), DictionaryProgress::PartApplied);
        let last = part(3, field_definitions_payload(&[field(25, "ASK")], None, false), true);
        assert_eq!(
            stage.on_response(&last, &mut dict).unwrap(),
            DictionaryProgress::Loaded(DictionaryId::Field)
        );
        assert_eq!(dict.field_count(), 3);

        let table = EnumTable {
            fids: vec![4],
            displays: BTreeMap::from([(1, "ASE".to_string())]),
        };
        let enums = part(4, enum_tables_payload(&[table], None, true), true);
        assert_eq!(stage.on_response(&enums, &mut dict).unwrap(), DictionaryProgress::AllLoaded);
        assert!(stage.all_loaded());
    }

    #[test]
    fn test_wrong_type_on_stream_rejected() {
        let (mut stage, mut dict, _sent) = awaiting();
        let wrong = part(3, enum_tables_payload(&[], None, true), true);
        assert!(matches!(
            stage.on_response(&wrong, &mut dict),
            Err(SessionError::Dictionary(DictionaryError::Malformed(_)))
        ));
    }

    #[test]
    fn test_domain_unsupported() {
        let mut stage = DictionaryStage::new(&config());
        stage.load_local_files(&mut DataDictionary::new());
        let service = ServiceDiscoveryInfo {
            dictionary_supported: false,
            ..service()
        };
        assert!(matches!(
            stage.request_downloads(&mut Vec::new(), &service),
            Err(SessionError::DictionaryDomainUnsupported(_))
        ));
    }

    #[test]
    fn test_dictionary_not_provided() {
        let mut stage = DictionaryStage::new(&config());
        stage.load_local_files(&mut DataDictionary::new());
        let service = ServiceDiscoveryInfo {
            enum_dictionary_provided: false,
            ..service()
        };
        let err = stage.request_downloads(&mut Vec::new(), &service).unwrap_err();
        let SessionError::DictionaryNotProvided { dictionary, .. } = err else {
            panic!("expected DictionaryNotProvided, got {err}");
        };
        assert_eq!(dictionary, "RWFEnum");
    }

    #[test]
    fn test_closed_stream_before_completion_is_fatal() {
        let (mut stage, mut dict, _sent) = awaiting();
        let status = Msg::status(
            4,
            domain::DICTIONARY,
            Some(State::new(StreamState::Closed, DataState::Suspect).with_text("not found")),
        );
        assert!(matches!(
            stage.on_response(&status, &mut dict),
            Err(SessionError::DictionaryStreamClosed(name)) if name == "RWFEnum"
        ));
    }

    #[test]
    fn test_unknown_stream_ignored() {
        let (mut stage, mut dict, _sent) = awaiting();
        let stray = part(9, field_definitions_payload(&[], None, true), true);
        assert_eq!(stage.on_response(&stray, &mut dict).unwrap(), DictionaryProgress::Unchanged);
    }
}
