//! eta-consumer-lib: Consumer session state machine
//!
//! A single non-blocking control loop takes one channel through connect,
//! transport handshake, login, source directory discovery, dictionary
//! bootstrap and item subscription, keeping it alive with pings until the
//! run time elapses or a fatal condition ends the session.

pub mod dictionary;
pub mod directory;
pub mod error;
pub mod handshake;
pub mod item;
pub mod login;
pub mod metrics;
pub mod ping;
pub mod server;
pub mod session;
pub mod sink;
pub mod writer;

/// Reserved stream ids. Login closes last; closing it closes the rest at the provider.
pub const LOGIN_STREAM_ID: i32 = 1;
pub const SOURCE_STREAM_ID: i32 = 2;
pub const FIELD_DICTIONARY_STREAM_ID: i32 = 3;
pub const ENUM_DICTIONARY_STREAM_ID: i32 = 4;
pub const FIRST_ITEM_STREAM_ID: i32 = 5;

pub use dictionary::{DictionaryId, DictionaryLoadState, DictionaryProgress, DictionaryStage};
pub use directory::{DirectoryOutcome, DirectoryStage, ServiceDiscoveryInfo};
pub use error::SessionError;
pub use handshake::{HandshakeProgress, HandshakeStage};
pub use item::{ItemEvent, ItemStage, ItemSubscription};
pub use login::{LoginIdentity, LoginOutcome, LoginStage, LoginState};
pub use metrics::{encode_metrics, SessionMetrics};
pub use ping::{PingAction, PingLiveness};
pub use server::{create_router, run_server, ServerState};
pub use session::{Session, SessionState};
pub use sink::{ChannelSink, MsgSink};
pub use writer::{BufferedWriter, SendOutcome};
