//! Reuters Domain Model constants and the small value types shared by every domain
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain type codes carried in every message
pub mod domain {
    pub const LOGIN: u8 = 1;
    pub const SOURCE: u8 = 4;
    pub const DICTIONARY: u8 = 5;
    pub const MARKET_PRICE: u8 = 6;
}

/// Name type of a message key
pub mod name_type {
    pub const RIC: u8 = 1;
    pub const USER_NAME: u8 = 1;
}

/// Source directory filter ids and request filter bits
pub mod directory {
    pub const FILTER_INFO: u8 = 1;
    pub const FILTER_STATE: u8 = 2;
    pub const FILTER_GROUP: u8 = 3;
    pub const FILTER_LOAD: u8 = 4;
    pub const FILTER_DATA: u8 = 5;
    pub const FILTER_LINK: u8 = 6;

    pub const INFO_BIT: u32 = 0x01;
    pub const STATE_BIT: u32 = 0x02;
    pub const GROUP_BIT: u32 = 0x08;

    pub const NAME: &str = "Name";
    pub const CAPABILITIES: &str = "Capabilities";
    pub const DICTIONARIES_PROVIDED: &str = "DictionariesProvided";
    pub const QOS: &str = "QoS";
    pub const SERVICE_STATE: &str = "ServiceState";
    pub const ACCEPTING_REQUESTS: &str = "AcceptingRequests";
    pub const STATUS: &str = "Status";
    pub const GROUP: &str = "Group";
}

/// Login attribute element names
pub mod login {
    pub const APPLICATION_ID: &str = "ApplicationId";
    pub const APPLICATION_NAME: &str = "ApplicationName";
    pub const POSITION: &str = "Position";
    pub const ROLE: &str = "Role";
    pub const SINGLE_OPEN: &str = "SingleOpen";
    pub const ALLOW_SUSPECT_DATA: &str = "AllowSuspectData";
    pub const SUPPORT_BATCH_REQUESTS: &str = "SupportBatchRequests";
    pub const SUPPORT_OMM_POST: &str = "SupportOMMPost";

    pub const ROLE_CONSUMER: u64 = 0;
}

/// Dictionary payload element names
pub mod dictionary {
    /// Summary element identifying the dictionary kind
    pub const TYPE: &str = "Type";
    pub const VERSION: &str = "Version";

    pub const TYPE_FIELD_DEFINITIONS: u64 = 1;
    pub const TYPE_ENUM_TABLES: u64 = 2;

    /// Full verbosity request filter
    pub const VERBOSITY_VERBOSE: u32 = 0x0F;

    pub const NAME: &str = "NAME";
    pub const FID: &str = "FID";
    pub const RIPPLETO: &str = "RIPPLETO";
    pub const FIELD_TYPE: &str = "TYPE";
    pub const LENGTH: &str = "LENGTH";
    pub const RWFTYPE: &str = "RWFTYPE";
    pub const RWFLEN: &str = "RWFLEN";

    pub const FIDS: &str = "FIDS";
    pub const VALUE: &str = "VALUE";
    pub const DISPLAY: &str = "DISPLAY";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Unspecified,
    Open,
    NonStreaming,
    ClosedRecover,
    Closed,
    Redirected,
}

impl StreamState {
    pub fn code(self) -> u8 {
        match self {
            StreamState::Unspecified => 0,
            StreamState::Open => 1,
            StreamState::NonStreaming => 2,
            StreamState::ClosedRecover => 3,
            StreamState::Closed => 4,
            StreamState::Redirected => 5,
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(self, StreamState::ClosedRecover | StreamState::Closed)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamState::Unspecified => "Unspecified",
            StreamState::Open => "Open",
            StreamState::NonStreaming => "NonStreaming",
            StreamState::ClosedRecover => "ClosedRecover",
            StreamState::Closed => "Closed",
            StreamState::Redirected => "Redirected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataState {
    NoChange,
    Ok,
    Suspect,
}

impl DataState {
    pub fn code(self) -> u8 {
        match self {
            DataState::NoChange => 0,
            DataState::Ok => 1,
            DataState::Suspect => 2,
        }
    }
}

impl fmt::Display for DataState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataState::NoChange => "NoChange",
            DataState::Ok => "Ok",
            DataState::Suspect => "Suspect",
        };
        f.write_str(s)
    }
}

/// Stream and data state reported by refresh and status messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub stream_state: StreamState,
    pub data_state: DataState,
    #[serde(default)]
    pub code: u8,
    #[serde(default)]
    pub text: String,
}

impl State {
    pub fn new(stream_state: StreamState, data_state: DataState) -> Self {
        Self {
            stream_state,
            data_state,
            code: 0,
            text: String::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn open_ok() -> Self {
        Self::new(StreamState::Open, DataState::Ok)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stream_state, self.data_state)?;
        if self.code != 0 {
            write!(f, " code {}", self.code)?;
        }
        if !self.text.is_empty() {
            write!(f, " \"{}\"", self.text)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeliness {
    Realtime,
    DelayedUnknown,
    /// Delay in seconds
    Delayed(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rate {
    TickByTick,
    JitConflated,
    /// Conflation interval in milliseconds
    TimeConflated(u16),
}

/// Quality of service: timeliness and rate of the data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qos {
    pub timeliness: Timeliness,
    pub rate: Rate,
    #[serde(default)]
    pub dynamic: bool,
}

impl Default for Qos {
    /// Realtime, tick-by-tick, static
    fn default() -> Self {
        Self {
            timeliness: Timeliness::Realtime,
            rate: Rate::TickByTick,
            dynamic: false,
        }
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timeliness {
            Timeliness::Realtime => f.write_str("Realtime")?,
            Timeliness::DelayedUnknown => f.write_str("DelayedByUnknown")?,
            Timeliness::Delayed(secs) => write!(f, "DelayedBy{secs}s")?,
        }
        match self.rate {
            Rate::TickByTick => f.write_str("/TickByTick")?,
            Rate::JitConflated => f.write_str("/JustInTimeConflated")?,
            Rate::TimeConflated(ms) => write!(f, "/ConflatedBy{ms}ms")?,
        }
        if self.dynamic {
            f.write_str("/Dynamic")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_state_codes() {
        assert_eq!(StreamState::Open.code(), 1);
        assert_eq!(StreamState::ClosedRecover.code(), 3);
        assert_eq!(StreamState::Redirected.code(), 5);
        assert!(StreamState::Closed.is_closed());
        assert!(!StreamState::NonStreaming.is_closed());
        assert_eq!(DataState::Suspect.code(), 2);
    }

    #[test]
    fn test_state_display() {
        let state = State::new(StreamState::ClosedRecover, DataState::Suspect).with_text("denied");
        assert_eq!(state.to_string(), "ClosedRecover/Suspect \"denied\"");
    }

    #[test]
    fn test_default_qos() {
        let qos = Qos::default();
        assert_eq!(qos.timeliness, Timeliness::Realtime);
        assert_eq!(qos.rate, Rate::TickByTick);
        assert!(!qos.dynamic);
        assert_eq!(qos.to_string(), "Realtime/TickByTick");
    }

    #[test]
    fn test_qos_json() {
        let qos = Qos {
            timeliness: Timeliness::Delayed(5),
            rate: Rate::TimeConflated(500),
            dynamic: false,
        };
        let json = serde_json::to_string(&qos).unwrap();
        assert_eq!(
            json,
            r#"{"timeliness":{"delayed":5},"rate":{"time_conflated":500},"dynamic":false}"#
        );
        let back: Qos = serde_json::from_str(r#"{"timeliness":"realtime","rate":"tick_by_tick"}"#).unwrap();
        assert_eq!(back, Qos::default());
    }
}
