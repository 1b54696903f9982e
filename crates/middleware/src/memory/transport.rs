use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::notifier::{Interest, Notifier, Readiness};
use crate::transport::{
    Channel, ChannelInfo, ChannelState, ConnectOptions, FlushStatus, InitProgress, Priority,
    ReadEvent, SocketId, Transport, WriteBuffer, WriteStatus, DEFAULT_MAX_FRAGMENT_SIZE,
};

const FIRST_SOCKET_ID: SocketId = 100;

/// Something the fake peer delivers to the consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Message(Bytes),
    Ping,
    /// The transport swaps to a new socket id
    FdChange(SocketId),
    /// The peer drops the connection
    Close(String),
}

/// One scripted step of channel initialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitStep {
    InProgress,
    FdChange(SocketId),
    Active,
    Fail(String),
}

/// Scripted result of one `write` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteScript {
    Status(WriteStatus),
    NoBuffers,
    Fail(String),
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Inbound> + Send>;

struct Shared {
    socket_id: SocketId,
    connect_error: Option<String>,
    init_steps: VecDeque<InitStep>,
    negotiated_ping_timeout: Option<Duration>,
    buffer_failures: usize,
    write_script: VecDeque<WriteScript>,
    flush_script: VecDeque<Result<FlushStatus, String>>,
    inbound: VecDeque<Inbound>,
    scheduled: Vec<(Instant, Inbound)>,
    written: Vec<Bytes>,
    write_buffer_ids: Vec<u64>,
    buffers_requested: usize,
    flushes: usize,
    pings: usize,
    pending_output: usize,
    closed: bool,
    responder: Option<Responder>,
    next_buffer_id: u64,
}

impl Shared {
    fn new() -> Self {
        Self {
            socket_id: FIRST_SOCKET_ID,
            connect_error: None,
            init_steps: VecDeque::new(),
            negotiated_ping_timeout: None,
            buffer_failures: 0,
            write_script: VecDeque::new(),
            flush_script: VecDeque::new(),
            inbound: VecDeque::new(),
            scheduled: Vec::new(),
            written: Vec::new(),
            write_buffer_ids: Vec::new(),
            buffers_requested: 0,
            flushes: 0,
            pings: 0,
            pending_output: 0,
            closed: false,
            responder: None,
            next_buffer_id: 1,
        }
    }

    /// Move scheduled deliveries that are due into the inbound queue, in time order
    fn promote_due(&mut self, now: Instant) {
        if self.scheduled.is_empty() {
            return;
        }
        self.scheduled.sort_by_key(|(at, _)| *at);
        let due = self.scheduled.iter().take_while(|(at, _)| *at <= now).count();
        for (_, inbound) in self.scheduled.drain(..due) {
            self.inbound.push_back(inbound);
        }
    }

    fn next_scheduled(&self) -> Option<Instant> {
        self.scheduled.iter().map(|(at, _)| *at).min()
    }

    fn deliver(&mut self, payload: &[u8]) {
        self.written.push(Bytes::copy_from_slice(payload));
        if let Some(mut responder) = self.responder.take() {
            let replies = responder(payload);
            self.inbound.extend(replies);
            self.responder = Some(responder);
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a connected transport/notifier pair plus the handle that plays the peer
pub fn memory_channel() -> (MemoryTransport, MemoryNotifier, MemoryPeer) {
    let shared = Arc::new(Mutex::new(Shared::new()));
    (
        MemoryTransport {
            shared: Arc::clone(&shared),
        },
        MemoryNotifier {
            shared: Arc::clone(&shared),
            registered: HashMap::new(),
        },
        MemoryPeer { shared },
    )
}

/// Scripted transport. Everything written is recorded; reads come from the peer queue.
pub struct MemoryTransport {
    shared: Arc<Mutex<Shared>>,
}

impl Transport for MemoryTransport {
    fn connect(&mut self, options: &ConnectOptions) -> Result<Channel, TransportError> {
        let shared = lock(&self.shared);
        if let Some(reason) = &shared.connect_error {
            return Err(TransportError::ConnectionFailed(reason.clone()));
        }
        Ok(Channel::new(shared.socket_id, options))
    }

    fn init_channel(&mut self, channel: &mut Channel) -> Result<InitProgress, TransportError> {
        let mut shared = lock(&self.shared);
        match shared.init_steps.pop_front().unwrap_or(InitStep::Active) {
            InitStep::InProgress => Ok(InitProgress::InProgress { fd_change: None }),
            InitStep::FdChange(new) => {
                let change = channel.change_socket(new);
                shared.socket_id = new;
                Ok(InitProgress::InProgress {
                    fd_change: Some(change),
                })
            }
            InitStep::Active => {
                if let Some(timeout) = shared.negotiated_ping_timeout {
                    channel.ping_timeout = timeout;
                }
                channel.state = ChannelState::Active;
                Ok(InitProgress::Active)
            }
            InitStep::Fail(reason) => {
                channel.state = ChannelState::Closed;
                Err(TransportError::InitFailed(reason))
            }
        }
    }

    fn channel_info(&self, channel: &Channel) -> Result<ChannelInfo, TransportError> {
        if !channel.is_active() {
            return Err(TransportError::NotActive);
        }
        Ok(ChannelInfo {
            max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
            ping_timeout: channel.ping_timeout,
            guaranteed_output_buffers: 50,
            num_input_buffers: 10,
            component_info: vec!["memory".to_string()],
        })
    }

    fn get_buffer(&mut self, channel: &Channel, size: usize) -> Result<WriteBuffer, TransportError> {
        if !channel.is_active() {
            return Err(TransportError::NotActive);
        }
        let mut shared = lock(&self.shared);
        shared.buffers_requested += 1;
        if shared.buffer_failures > 0 {
            shared.buffer_failures -= 1;
            return Err(TransportError::NoBuffers);
        }
        let id = shared.next_buffer_id;
        shared.next_buffer_id += 1;
        Ok(WriteBuffer::new(id, size))
    }

    fn write(
        &mut self,
        channel: &mut Channel,
        buffer: &mut WriteBuffer,
        _priority: Priority,
    ) -> Result<WriteStatus, TransportError> {
        if !channel.is_active() {
            return Err(TransportError::NotActive);
        }
        let mut shared = lock(&self.shared);
        shared.write_buffer_ids.push(buffer.id());
        let script = shared
            .write_script
            .pop_front()
            .unwrap_or(WriteScript::Status(WriteStatus::Written));
        match script {
            WriteScript::Status(WriteStatus::CallAgain) => Ok(WriteStatus::CallAgain),
            WriteScript::Status(status) => {
                shared.deliver(buffer.as_slice());
                buffer.advance(buffer.len());
                if let WriteStatus::Queued(n) = status {
                    shared.pending_output += n;
                }
                Ok(status)
            }
            WriteScript::NoBuffers => Err(TransportError::NoBuffers),
            WriteScript::Fail(reason) => {
                channel.state = ChannelState::Closed;
                Err(TransportError::WriteFailed(reason))
            }
        }
    }

    fn flush(&mut self, channel: &mut Channel) -> Result<FlushStatus, TransportError> {
        let mut shared = lock(&self.shared);
        shared.flushes += 1;
        match shared.flush_script.pop_front() {
            Some(Ok(status)) => {
                if let FlushStatus::Pending(n) = status {
                    shared.pending_output = n;
                } else {
                    shared.pending_output = 0;
                }
                Ok(status)
            }
            Some(Err(reason)) => {
                channel.state = ChannelState::Closed;
                Err(TransportError::FlushFailed(reason))
            }
            None => {
                shared.pending_output = 0;
                Ok(FlushStatus::Flushed)
            }
        }
    }

    fn ping(&mut self, channel: &mut Channel) -> Result<FlushStatus, TransportError> {
        if !channel.is_active() {
            return Err(TransportError::NotActive);
        }
        let mut shared = lock(&self.shared);
        shared.pings += 1;
        shared.pending_output = 0;
        Ok(FlushStatus::Flushed)
    }

    fn read(&mut self, channel: &mut Channel) -> Result<ReadEvent, TransportError> {
        if !channel.is_active() {
            return Err(TransportError::NotActive);
        }
        let mut shared = lock(&self.shared);
        match shared.inbound.pop_front() {
            None => Ok(ReadEvent::WouldBlock),
            Some(Inbound::Message(bytes)) => Ok(ReadEvent::Message(bytes)),
            Some(Inbound::Ping) => Ok(ReadEvent::Ping),
            Some(Inbound::FdChange(new)) => {
                let change = channel.change_socket(new);
                shared.socket_id = new;
                Ok(ReadEvent::FdChange(change))
            }
            Some(Inbound::Close(reason)) => {
                channel.state = ChannelState::Closed;
                shared.closed = true;
                Err(TransportError::ChannelClosed(reason))
            }
        }
    }

    fn close(&mut self, channel: &mut Channel) {
        lock(&self.shared).closed = true;
        channel.state = ChannelState::Closed;
    }
}

/// Notifier over the in-memory channel. The socket is always writable;
/// it is readable while the peer queue is non-empty.
pub struct MemoryNotifier {
    shared: Arc<Mutex<Shared>>,
    registered: HashMap<SocketId, Interest>,
}

impl MemoryNotifier {
    fn ready_set(&self, shared: &Shared) -> Vec<Readiness> {
        self.registered
            .iter()
            .filter(|(id, _)| **id == shared.socket_id)
            .map(|(&socket_id, interest)| Readiness {
                socket_id,
                readable: interest.read && !shared.inbound.is_empty(),
                writable: interest.write,
                exception: interest.except && shared.closed,
            })
            .filter(|r| !r.is_empty())
            .collect()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    fn register(&mut self, socket_id: SocketId, interest: Interest) {
        self.registered.insert(socket_id, interest);
    }

    fn unregister(&mut self, socket_id: SocketId) {
        self.registered.remove(&socket_id);
    }

    fn interest(&self, socket_id: SocketId) -> Option<Interest> {
        self.registered.get(&socket_id).copied()
    }

    async fn wait(&mut self, timeout: Duration) -> Result<Vec<Readiness>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            let next_due = {
                let mut shared = lock(&self.shared);
                shared.promote_due(Instant::now());
                let ready = self.ready_set(&shared);
                if !ready.is_empty() {
                    return Ok(ready);
                }
                shared.next_scheduled()
            };
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            let wake = next_due.map_or(deadline, |due| due.min(deadline));
            tokio::time::sleep_until(wake).await;
        }
    }
}

/// Test-side handle: scripts the transport and plays the remote peer
#[derive(Clone)]
pub struct MemoryPeer {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryPeer {
    pub fn push(&self, inbound: Inbound) {
        lock(&self.shared).inbound.push_back(inbound);
    }

    pub fn push_message(&self, payload: impl Into<Bytes>) {
        self.push(Inbound::Message(payload.into()));
    }

    /// Deliver `inbound` once `after` has elapsed from now
    pub fn schedule(&self, after: Duration, inbound: Inbound) {
        lock(&self.shared)
            .scheduled
            .push((Instant::now() + after, inbound));
    }

    /// Answer every written message with whatever the closure returns
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Vec<Inbound> + Send + 'static,
    {
        lock(&self.shared).responder = Some(Box::new(responder));
    }

    pub fn fail_connect(&self, reason: impl Into<String>) {
        lock(&self.shared).connect_error = Some(reason.into());
    }

    pub fn script_init(&self, steps: impl IntoIterator<Item = InitStep>) {
        lock(&self.shared).init_steps.extend(steps);
    }

    pub fn script_writes(&self, writes: impl IntoIterator<Item = WriteScript>) {
        lock(&self.shared).write_script.extend(writes);
    }

    pub fn script_flushes(&self, flushes: impl IntoIterator<Item = Result<FlushStatus, String>>) {
        lock(&self.shared).flush_script.extend(flushes);
    }

    /// Make the next `count` buffer requests fail with NoBuffers
    pub fn fail_buffers(&self, count: usize) {
        lock(&self.shared).buffer_failures = count;
    }

    pub fn set_ping_timeout(&self, timeout: Duration) {
        lock(&self.shared).negotiated_ping_timeout = Some(timeout);
    }

    pub fn written(&self) -> Vec<Bytes> {
        lock(&self.shared).written.clone()
    }

    pub fn write_buffer_ids(&self) -> Vec<u64> {
        lock(&self.shared).write_buffer_ids.clone()
    }

    pub fn buffers_requested(&self) -> usize {
        lock(&self.shared).buffers_requested
    }

    pub fn flushes(&self) -> usize {
        lock(&self.shared).flushes
    }

    pub fn pings_sent(&self) -> usize {
        lock(&self.shared).pings
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared).closed
    }

    pub fn socket_id(&self) -> SocketId {
        lock(&self.shared).socket_id
    }
}
