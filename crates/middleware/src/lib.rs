//! eta-middleware: Transport abstractions for the consumer session
//!
//! Provides the non-blocking `Transport` and readiness `Notifier` traits, the
//! RSSL-style socket transport, and in-memory implementations for testing.

pub mod error;
pub mod frame;
pub mod latency;
pub mod memory;
pub mod notifier;
pub mod tcp;
pub mod transport;

pub use error::TransportError;
pub use latency::{elapsed_since, now_tsc};
pub use notifier::{Interest, Notifier, Readiness};
pub use tcp::{SocketTable, TcpNotifier, TcpTransport};
pub use transport::{
    Channel, ChannelInfo, ChannelState, ConnectOptions, FdChange, FlushStatus, InitProgress,
    Priority, ReadEvent, SocketId, Transport, WriteBuffer, WriteStatus,
};
