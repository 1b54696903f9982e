use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use crate::error::TransportError;
use tokio_util::codec::Decoder;

use crate::frame::{
    decode_fragment, decode_fragment_header, encode_fragment, encode_fragment_header,
    frame_bytes, ConnectAck, ConnectRequest, Frame, FrameCodec, Opcode, FRAGMENT_HEADER_PREFIX,
    FRAGMENT_PREFIX, HEADER_LEN, MAX_FRAME_LEN,
};
use crate::transport::{
    Channel, ChannelInfo, ChannelState, ConnectOptions, FlushStatus, InitProgress, Priority,
    ReadEvent, SocketId, Transport, WriteBuffer, WriteStatus, DEFAULT_MAX_FRAGMENT_SIZE,
};

/// Sockets shared between the transport and its notifier
pub type SocketTable = Arc<DashMap<SocketId, Arc<TcpStream>>>;

const READ_CHUNK: usize = 16 * 1024;
const MIN_FRAGMENT_SIZE: usize = 64;
const MAX_FRAGMENT_SIZE: usize = MAX_FRAME_LEN - HEADER_LEN;
/// Fragmented inbound messages that may be in progress at once
const MAX_REASSEMBLIES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    SendRequest,
    AwaitAck,
    Active,
}

struct Reassembly {
    total: usize,
    data: BytesMut,
}

/// Inbound fragmented messages in progress, keyed by fragment id
#[derive(Default)]
struct Reassembler {
    pending: HashMap<u16, Reassembly>,
}

impl Reassembler {
    /// Begin a message from its fragment header. Returns the message if the
    /// first chunk already completes it.
    fn start(
        &mut self,
        id: u16,
        total: usize,
        chunk: &[u8],
        max_len: usize,
    ) -> Result<Option<Bytes>, TransportError> {
        if total > max_len {
            return Err(TransportError::Protocol(format!(
                "fragmented message of {total} bytes exceeds {max_len}"
            )));
        }
        if chunk.len() > total {
            return Err(TransportError::Protocol(format!(
                "fragment {id} carries {} bytes of a {total} byte message",
                chunk.len()
            )));
        }
        if chunk.len() == total {
            return Ok(Some(Bytes::copy_from_slice(chunk)));
        }
        if !self.pending.contains_key(&id) && self.pending.len() >= MAX_REASSEMBLIES {
            return Err(TransportError::Protocol(format!(
                "more than {MAX_REASSEMBLIES} fragmented messages in progress"
            )));
        }
        self.pending.insert(
            id,
            Reassembly {
                total,
                data: BytesMut::from(chunk),
            },
        );
        Ok(None)
    }

    /// Append a continuation. Returns the message once it is complete.
    fn extend(&mut self, id: u16, chunk: &[u8]) -> Result<Option<Bytes>, TransportError> {
        let entry = self
            .pending
            .get_mut(&id)
            .ok_or_else(|| TransportError::Protocol(format!("fragment {id} without header")))?;
        let total = entry.total;
        let received = entry.data.len() + chunk.len();
        if received > total {
            self.pending.remove(&id);
            return Err(TransportError::Protocol(format!(
                "fragment {id} overruns its {total} byte message"
            )));
        }
        entry.data.extend_from_slice(chunk);
        if received < entry.total {
            return Ok(None);
        }
        Ok(self.pending.remove(&id).map(|entry| entry.data.freeze()))
    }

    fn in_progress(&self) -> usize {
        self.pending.len()
    }
}

struct Connection {
    stream: Arc<TcpStream>,
    phase: Phase,
    request: ConnectRequest,
    input: BytesMut,
    codec: FrameCodec,
    /// Framed output per priority, drained high first
    queues: [VecDeque<Bytes>; 3],
    /// Frame partially written to the socket and the offset reached
    in_flight: Option<(Bytes, usize)>,
    queued_bytes: usize,
    max_fragment_size: usize,
    guaranteed_output_buffers: usize,
    num_input_buffers: usize,
    ping_timeout: Duration,
    peer_component: Option<String>,
    next_fragment_id: u16,
    reassembly: Reassembler,
}

impl Connection {
    fn new(stream: Arc<TcpStream>, options: &ConnectOptions) -> Self {
        let request = ConnectRequest {
            major_version: options.major_version,
            minor_version: options.minor_version,
            protocol_type: options.protocol_type,
            ping_timeout_secs: options.ping_timeout.as_secs().min(u8::MAX as u64) as u8,
            component_version: options.component_version.clone(),
        };
        Self {
            stream,
            phase: Phase::SendRequest,
            request,
            input: BytesMut::with_capacity(READ_CHUNK),
            codec: FrameCodec,
            queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            in_flight: None,
            queued_bytes: 0,
            max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
            guaranteed_output_buffers: options.guaranteed_output_buffers,
            num_input_buffers: options.num_input_buffers,
            ping_timeout: options.ping_timeout,
            peer_component: None,
            next_fragment_id: 1,
            reassembly: Reassembler::default(),
        }
    }

    fn queued_frames(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum::<usize>() + usize::from(self.in_flight.is_some())
    }

    fn enqueue(&mut self, priority: Priority, frame: Bytes) {
        self.queued_bytes += frame.len();
        self.queues[priority.index()].push_back(frame);
    }

    fn flush_status(&self) -> FlushStatus {
        if self.queued_bytes == 0 {
            FlushStatus::Flushed
        } else {
            FlushStatus::Pending(self.queued_bytes)
        }
    }

    fn flush_socket(&mut self) -> Result<FlushStatus, io::Error> {
        loop {
            let (frame, offset) = match self.in_flight.take() {
                Some(pending) => pending,
                None => match self.queues.iter_mut().find_map(VecDeque::pop_front) {
                    Some(frame) => (frame, 0),
                    None => break,
                },
            };
            match self.stream.try_write(&frame[offset..]) {
                Ok(0) => {
                    self.in_flight = Some((frame, offset));
                    break;
                }
                Ok(n) => {
                    self.queued_bytes = self.queued_bytes.saturating_sub(n);
                    if offset + n < frame.len() {
                        self.in_flight = Some((frame, offset + n));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.in_flight = Some((frame, offset));
                    break;
                }
                Err(e) => {
                    self.in_flight = Some((frame, offset));
                    return Err(e);
                }
            }
        }
        Ok(self.flush_status())
    }

    /// Pull bytes from the socket. Returns false when the socket would block.
    fn fill_input(&mut self) -> Result<bool, TransportError> {
        self.input.reserve(READ_CHUNK);
        match self.stream.try_read_buf(&mut self.input) {
            Ok(0) => Err(TransportError::ChannelClosed(
                "connection closed by peer".into(),
            )),
            Ok(n) => {
                trace!(bytes = n, "Read from socket");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(TransportError::ReadFailed(e.to_string())),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.input)? {
                return Ok(Some(frame));
            }
            if !self.fill_input()? {
                return Ok(None);
            }
        }
    }

    /// Largest inbound message accepted for reassembly
    fn max_message_len(&self) -> usize {
        let buffers = self.num_input_buffers.max(self.guaranteed_output_buffers).max(1);
        self.max_fragment_size * buffers
    }

    fn allocate_fragment_id(&mut self) -> u16 {
        let id = self.next_fragment_id;
        self.next_fragment_id = self.next_fragment_id.wrapping_add(1).max(1);
        id
    }
}

/// Client side of the socket transport
pub struct TcpTransport {
    connections: HashMap<SocketId, Connection>,
    sockets: SocketTable,
    next_socket_id: SocketId,
    next_buffer_id: u64,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            sockets: Arc::new(DashMap::new()),
            next_socket_id: 1,
            next_buffer_id: 1,
        }
    }

    /// Socket table to hand to a `TcpNotifier`
    pub fn sockets(&self) -> SocketTable {
        Arc::clone(&self.sockets)
    }

    fn connection(&mut self, channel: &Channel) -> Result<&mut Connection, TransportError> {
        self.connections
            .get_mut(&channel.socket_id)
            .ok_or(TransportError::UnknownSocket(channel.socket_id))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::ConnectionFailed(format!("resolve {host}:{port}: {e}")))?
        .next()
        .ok_or_else(|| TransportError::ConnectionFailed(format!("no address for {host}:{port}")))
}

/// Mark the channel closed and pass the error through
fn fail(channel: &mut Channel, err: TransportError) -> TransportError {
    channel.state = ChannelState::Closed;
    err
}

impl Transport for TcpTransport {
    /// Must be called from within a tokio runtime.
    fn connect(&mut self, options: &ConnectOptions) -> Result<Channel, TransportError> {
        let addr = resolve(&options.host, options.port)?;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

        if let Some(interface) = options.interface.as_deref() {
            let local: IpAddr = interface.parse().map_err(|_| {
                TransportError::ConnectionFailed(format!("invalid interface address {interface}"))
            })?;
            socket.bind(&SocketAddr::new(local, 0).into())?;
        }
        socket.set_nodelay(options.tcp_nodelay)?;
        socket.set_keepalive(true)?;
        socket
            .connect_timeout(&addr.into(), options.connect_timeout)
            .map_err(|e| TransportError::ConnectionFailed(format!("{addr}: {e}")))?;
        socket.set_nonblocking(true)?;

        let stream: std::net::TcpStream = socket.into();
        let stream = Arc::new(TcpStream::from_std(stream)?);

        let socket_id = self.next_socket_id;
        self.next_socket_id += 1;
        self.sockets.insert(socket_id, Arc::clone(&stream));
        self.connections
            .insert(socket_id, Connection::new(stream, options));

        info!(%addr, socket_id, "Socket connected, starting channel initialization");
        Ok(Channel::new(socket_id, options))
    }

    fn init_channel(&mut self, channel: &mut Channel) -> Result<InitProgress, TransportError> {
        let conn = match self.connection(channel) {
            Ok(conn) => conn,
            Err(e) => return Err(fail(channel, e)),
        };

        match conn.phase {
            Phase::SendRequest => {
                let frame = frame_bytes(Opcode::ConnectReq, &conn.request.encode())?;
                conn.enqueue(Priority::High, frame);
                conn.flush_socket()
                    .map_err(|e| fail(channel, TransportError::InitFailed(e.to_string())))?;
                conn.phase = Phase::AwaitAck;
                debug!(socket_id = channel.socket_id, "Connect request sent");
                Ok(InitProgress::InProgress { fd_change: None })
            }
            Phase::AwaitAck => {
                conn.flush_socket()
                    .map_err(|e| fail(channel, TransportError::InitFailed(e.to_string())))?;
                let frame = match conn.next_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => return Ok(InitProgress::InProgress { fd_change: None }),
                    Err(e) => return Err(fail(channel, TransportError::InitFailed(e.to_string()))),
                };
                match frame.opcode {
                    Opcode::ConnectAck => {
                        let ack = ConnectAck::decode(frame.payload).map_err(|e| fail(channel, e))?;
                        if ack.ping_timeout_secs > 0 {
                            conn.ping_timeout = Duration::from_secs(u64::from(ack.ping_timeout_secs));
                        }
                        if ack.max_fragment_size > 0 {
                            conn.max_fragment_size = (ack.max_fragment_size as usize)
                                .clamp(MIN_FRAGMENT_SIZE, MAX_FRAGMENT_SIZE);
                        }
                        conn.peer_component = Some(ack.component_version);
                        conn.phase = Phase::Active;

                        channel.major_version = ack.major_version;
                        channel.minor_version = ack.minor_version;
                        channel.ping_timeout = conn.ping_timeout;
                        channel.state = ChannelState::Active;
                        info!(
                            socket_id = channel.socket_id,
                            ping_timeout_secs = conn.ping_timeout.as_secs(),
                            max_fragment_size = conn.max_fragment_size,
                            "Channel active"
                        );
                        Ok(InitProgress::Active)
                    }
                    Opcode::ConnectNak => {
                        let text = String::from_utf8_lossy(&frame.payload).into_owned();
                        warn!(socket_id = channel.socket_id, reason = %text, "Connection refused by peer");
                        Err(fail(channel, TransportError::InitFailed(text)))
                    }
                    other => Err(fail(
                        channel,
                        TransportError::InitFailed(format!("unexpected {other:?} during handshake")),
                    )),
                }
            }
            Phase::Active => Ok(InitProgress::Active),
        }
    }

    fn channel_info(&self, channel: &Channel) -> Result<ChannelInfo, TransportError> {
        let conn = self
            .connections
            .get(&channel.socket_id)
            .ok_or(TransportError::UnknownSocket(channel.socket_id))?;
        if conn.phase != Phase::Active {
            return Err(TransportError::NotActive);
        }
        Ok(ChannelInfo {
            max_fragment_size: conn.max_fragment_size,
            ping_timeout: conn.ping_timeout,
            guaranteed_output_buffers: conn.guaranteed_output_buffers,
            num_input_buffers: conn.num_input_buffers,
            component_info: conn.peer_component.iter().cloned().collect(),
        })
    }

    fn get_buffer(&mut self, channel: &Channel, size: usize) -> Result<WriteBuffer, TransportError> {
        if !channel.is_active() {
            return Err(TransportError::NotActive);
        }
        let id = self.next_buffer_id;
        let conn = self.connection(channel)?;
        if conn.queued_frames() >= conn.guaranteed_output_buffers {
            return Err(TransportError::NoBuffers);
        }
        self.next_buffer_id += 1;
        Ok(WriteBuffer::new(id, size))
    }

    fn write(
        &mut self,
        channel: &mut Channel,
        buffer: &mut WriteBuffer,
        priority: Priority,
    ) -> Result<WriteStatus, TransportError> {
        if !channel.is_active() {
            return Err(TransportError::NotActive);
        }
        let conn = match self.connection(channel) {
            Ok(conn) => conn,
            Err(e) => return Err(fail(channel, e)),
        };
        let max = conn.max_fragment_size;

        if buffer.consumed() == 0 && buffer.len() <= max {
            let frame = frame_bytes(Opcode::Data, buffer.as_slice())?;
            conn.enqueue(priority, frame);
            buffer.advance(buffer.len());
        } else {
            let fragment_id = match buffer.fragment_id() {
                Some(id) => id,
                None => {
                    let id = conn.allocate_fragment_id();
                    buffer.set_fragment_id(id);
                    id
                }
            };
            while !buffer.is_fully_consumed() {
                if conn.queued_frames() >= conn.guaranteed_output_buffers {
                    trace!(fragment_id, consumed = buffer.consumed(), "Output pool full mid-message");
                    return Ok(WriteStatus::CallAgain);
                }
                let (opcode, payload, taken) = if buffer.consumed() == 0 {
                    let take = (max - FRAGMENT_HEADER_PREFIX).min(buffer.len());
                    let payload =
                        encode_fragment_header(buffer.len() as u32, fragment_id, &buffer.remaining()[..take]);
                    (Opcode::FragmentHeader, payload, take)
                } else {
                    let take = (max - FRAGMENT_PREFIX).min(buffer.remaining().len());
                    let payload = encode_fragment(fragment_id, &buffer.remaining()[..take]);
                    (Opcode::Fragment, payload, take)
                };
                conn.enqueue(priority, frame_bytes(opcode, &payload)?);
                buffer.advance(taken);
            }
        }

        match conn.flush_socket() {
            Ok(FlushStatus::Flushed) => Ok(WriteStatus::Written),
            Ok(FlushStatus::Pending(n)) => Ok(WriteStatus::Queued(n)),
            Err(e) => Err(fail(channel, TransportError::WriteFailed(e.to_string()))),
        }
    }

    fn flush(&mut self, channel: &mut Channel) -> Result<FlushStatus, TransportError> {
        let conn = match self.connection(channel) {
            Ok(conn) => conn,
            Err(e) => return Err(fail(channel, e)),
        };
        conn.flush_socket()
            .map_err(|e| fail(channel, TransportError::FlushFailed(e.to_string())))
    }

    fn ping(&mut self, channel: &mut Channel) -> Result<FlushStatus, TransportError> {
        if !channel.is_active() {
            return Err(TransportError::NotActive);
        }
        let conn = match self.connection(channel) {
            Ok(conn) => conn,
            Err(e) => return Err(fail(channel, e)),
        };
        // Pending output reaching the peer resets its receive timer just as a ping would
        if conn.queued_bytes == 0 {
            conn.enqueue(Priority::High, frame_bytes(Opcode::Ping, &[])?);
        }
        conn.flush_socket()
            .map_err(|e| fail(channel, TransportError::FlushFailed(e.to_string())))
    }

    fn read(&mut self, channel: &mut Channel) -> Result<ReadEvent, TransportError> {
        if !channel.is_active() {
            return Err(TransportError::NotActive);
        }
        let conn = match self.connection(channel) {
            Ok(conn) => conn,
            Err(e) => return Err(fail(channel, e)),
        };

        loop {
            let frame = match conn.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(ReadEvent::WouldBlock),
                Err(e) => return Err(fail(channel, e)),
            };
            match frame.opcode {
                Opcode::Data => return Ok(ReadEvent::Message(frame.payload)),
                Opcode::Ping => return Ok(ReadEvent::Ping),
                Opcode::FragmentHeader => {
                    let (total, id, chunk) =
                        decode_fragment_header(frame.payload).map_err(|e| fail(channel, e))?;
                    let max_len = conn.max_message_len();
                    match conn.reassembly.start(id, total as usize, &chunk, max_len) {
                        Ok(Some(message)) => return Ok(ReadEvent::Message(message)),
                        Ok(None) => {
                            trace!(
                                fragment_id = id,
                                total,
                                in_progress = conn.reassembly.in_progress(),
                                "Fragmented message started"
                            );
                        }
                        Err(e) => return Err(fail(channel, e)),
                    }
                }
                Opcode::Fragment => {
                    let (id, chunk) = decode_fragment(frame.payload).map_err(|e| fail(channel, e))?;
                    match conn.reassembly.extend(id, &chunk) {
                        Ok(Some(message)) => return Ok(ReadEvent::Message(message)),
                        Ok(None) => {}
                        Err(e) => return Err(fail(channel, e)),
                    }
                }
                other => {
                    return Err(fail(
                        channel,
                        TransportError::Protocol(format!("unexpected {other:?} on active channel")),
                    ))
                }
            }
        }
    }

    fn close(&mut self, channel: &mut Channel) {
        if self.connections.remove(&channel.socket_id).is_some() {
            debug!(socket_id = channel.socket_id, "Channel closed");
        }
        self.sockets.remove(&channel.socket_id);
        channel.state = ChannelState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reassembles_in_order() {
        let mut reassembler = Reassembler::default();
        assert_eq!(reassembler.start(7, 6, b"ab", 64).unwrap(), None);
        assert_eq!(reassembler.extend(7, b"cd").unwrap(), None);
        assert_eq!(
            reassembler.extend(7, b"ef").unwrap(),
            Some(Bytes::from_static(b"abcdef"))
        );
        assert_eq!(reassembler.in_progress(), 0);
    }

    #[test]
    fn test_single_chunk_completes_immediately() {
        let mut reassembler = Reassembler::default();
        assert_eq!(
            reassembler.start(1, 3, b"abc", 64).unwrap(),
            Some(Bytes::from_static(b"abc"))
        );
        assert_eq!(reassembler.in_progress(), 0);
    }

    #[test]
    fn test_oversized_total_rejected() {
        let mut reassembler = Reassembler::default();
        let err = reassembler.start(1, u32::MAX as usize, b"abc", 6144 * 50).unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
        assert_eq!(reassembler.in_progress(), 0);
    }

    #[test]
    fn test_chunks_beyond_total_rejected() {
        let mut reassembler = Reassembler::default();
        assert!(matches!(
            reassembler.start(1, 2, b"abc", 64),
            Err(TransportError::Protocol(_))
        ));

        reassembler.start(2, 4, b"ab", 64).unwrap();
        assert!(matches!(
            reassembler.extend(2, b"cde"),
            Err(TransportError::Protocol(_))
        ));
        assert_eq!(reassembler.in_progress(), 0);
    }

    #[test]
    fn test_in_progress_messages_are_bounded() {
        let mut reassembler = Reassembler::default();
        for id in 0..MAX_REASSEMBLIES as u16 {
            reassembler.start(id, 10, b"a", 64).unwrap();
        }
        assert!(matches!(
            reassembler.start(500, 10, b"a", 64),
            Err(TransportError::Protocol(_))
        ));
        // Restarting an id already in progress replaces it
        reassembler.start(0, 10, b"b", 64).unwrap();
        assert_eq!(reassembler.in_progress(), MAX_REASSEMBLIES);
    }

    #[test]
    fn test_continuation_without_header_rejected() {
        let mut reassembler = Reassembler::default();
        assert!(matches!(
            reassembler.extend(3, b"x"),
            Err(TransportError::Protocol(_))
        ));
    }
}
