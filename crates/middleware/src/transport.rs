use bytes::{Bytes, BytesMut};
use std::time::Duration;

use crate::error::TransportError;

/// Identifier of the OS-level socket behind a channel. Changes on FD-change events.
pub type SocketId = u64;

/// RWF protocol type advertised in the connect request
pub const RWF_PROTOCOL_TYPE: u8 = 0;
pub const RWF_MAJOR_VERSION: u8 = 14;
pub const RWF_MINOR_VERSION: u8 = 1;

/// Fragment size used when the peer does not negotiate one
pub const DEFAULT_MAX_FRAGMENT_SIZE: usize = 6144;

/// Lifecycle of a channel. Moves strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Initializing,
    Active,
    Closed,
}

/// Options for an outbound connection
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    /// Local interface address to bind before connecting
    pub interface: Option<String>,
    pub protocol_type: u8,
    pub major_version: u8,
    pub minor_version: u8,
    /// Ping timeout requested from the peer; the negotiated value may be lower
    pub ping_timeout: Duration,
    pub connect_timeout: Duration,
    pub guaranteed_output_buffers: usize,
    pub num_input_buffers: usize,
    pub tcp_nodelay: bool,
    pub component_version: String,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            interface: None,
            protocol_type: RWF_PROTOCOL_TYPE,
            major_version: RWF_MAJOR_VERSION,
            minor_version: RWF_MINOR_VERSION,
            ping_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            guaranteed_output_buffers: 50,
            num_input_buffers: 10,
            tcp_nodelay: true,
            component_version: concat!("eta-consumer ", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// The single transport connection owned by a session
#[derive(Debug, Clone)]
pub struct Channel {
    pub socket_id: SocketId,
    /// Previous socket id, set when the transport swapped descriptors
    pub old_socket_id: Option<SocketId>,
    pub state: ChannelState,
    pub protocol_type: u8,
    pub major_version: u8,
    pub minor_version: u8,
    /// Negotiated once the channel is active
    pub ping_timeout: Duration,
}

impl Channel {
    pub fn new(socket_id: SocketId, options: &ConnectOptions) -> Self {
        Self {
            socket_id,
            old_socket_id: None,
            state: ChannelState::Initializing,
            protocol_type: options.protocol_type,
            major_version: options.major_version,
            minor_version: options.minor_version,
            ping_timeout: options.ping_timeout,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ChannelState::Active
    }

    /// Swap to a new descriptor, remembering the old one for unregistration
    pub fn change_socket(&mut self, new_socket_id: SocketId) -> FdChange {
        let change = FdChange {
            old: self.socket_id,
            new: new_socket_id,
        };
        self.old_socket_id = Some(self.socket_id);
        self.socket_id = new_socket_id;
        change
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdChange {
    pub old: SocketId,
    pub new: SocketId,
}

/// Result of one step of channel initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitProgress {
    InProgress { fd_change: Option<FdChange> },
    Active,
}

/// Negotiated channel parameters, queried once the channel is active
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub max_fragment_size: usize,
    pub ping_timeout: Duration,
    pub guaranteed_output_buffers: usize,
    pub num_input_buffers: usize,
    pub component_info: Vec<String>,
}

/// Outcome of a non-blocking read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    Message(Bytes),
    Ping,
    WouldBlock,
    FdChange(FdChange),
}

/// Outcome of a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Everything reached the socket
    Written,
    /// Accepted, but this many bytes still wait for a flush
    Queued(usize),
    /// Message is being fragmented; flush and write the same buffer again
    CallAgain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    Flushed,
    Pending(usize),
}

impl FlushStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, FlushStatus::Pending(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

/// Outbound message buffer obtained from the transport.
///
/// Tracks how much of its content has been handed to the transport so a
/// `CallAgain` write can resume with the same buffer.
#[derive(Debug)]
pub struct WriteBuffer {
    id: u64,
    data: BytesMut,
    consumed: usize,
    fragment_id: Option<u16>,
}

impl WriteBuffer {
    pub fn new(id: u64, capacity: usize) -> Self {
        Self {
            id,
            data: BytesMut::with_capacity(capacity),
            consumed: 0,
            fragment_id: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn put(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes already handed to the transport
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn remaining(&self) -> &[u8] {
        &self.data[self.consumed..]
    }

    pub fn advance(&mut self, n: usize) {
        self.consumed = (self.consumed + n).min(self.data.len());
    }

    pub fn is_fully_consumed(&self) -> bool {
        self.consumed >= self.data.len()
    }

    pub fn fragment_id(&self) -> Option<u16> {
        self.fragment_id
    }

    pub fn set_fragment_id(&mut self, id: u16) {
        self.fragment_id = Some(id);
    }
}

/// Non-blocking channel transport.
///
/// No call blocks: anything that cannot complete immediately reports
/// `WouldBlock`, `InProgress`, `Queued`/`Pending` or `CallAgain` and the
/// caller retries when the notifier reports readiness.
pub trait Transport: Send {
    /// Start an outbound connection. The channel starts out `Initializing`.
    fn connect(&mut self, options: &ConnectOptions) -> Result<Channel, TransportError>;

    /// Advance the transport handshake by one step
    fn init_channel(&mut self, channel: &mut Channel) -> Result<InitProgress, TransportError>;

    /// Negotiated parameters of an active channel
    fn channel_info(&self, channel: &Channel) -> Result<ChannelInfo, TransportError>;

    /// Reserve an output buffer of at least `size` bytes
    fn get_buffer(&mut self, channel: &Channel, size: usize) -> Result<WriteBuffer, TransportError>;

    /// Queue a buffer for output
    fn write(
        &mut self,
        channel: &mut Channel,
        buffer: &mut WriteBuffer,
        priority: Priority,
    ) -> Result<WriteStatus, TransportError>;

    /// Push queued output to the socket
    fn flush(&mut self, channel: &mut Channel) -> Result<FlushStatus, TransportError>;

    /// Send a heartbeat, or flush pending output which serves the same purpose
    fn ping(&mut self, channel: &mut Channel) -> Result<FlushStatus, TransportError>;

    /// Read the next complete inbound message
    fn read(&mut self, channel: &mut Channel) -> Result<ReadEvent, TransportError>;

    /// Release the channel. Safe to call more than once.
    fn close(&mut self, channel: &mut Channel);
}
