//! In-memory implementations for testing
pub mod transport;

pub use transport::{
    memory_channel, InitStep, Inbound, MemoryNotifier, MemoryPeer, MemoryTransport, WriteScript,
};
