//! RSSL-style socket transport over TCP
pub mod notifier;
pub mod transport;

pub use notifier::TcpNotifier;
pub use transport::{SocketTable, TcpTransport};
