//! The session controller: one readiness loop driving every stage
use std::fmt;
use std::time::Duration;

use eta_codec::{Codec, DataDictionary, Dictionary, JsonCodec, Message, Msg};
use eta_metadata::ConsumerConfig;
use eta_middleware::{
    elapsed_since, now_tsc, ChannelInfo, FlushStatus, Interest, Notifier, ReadEvent, SocketId,
    Transport,
};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::dictionary::{DictionaryProgress, DictionaryStage};
use crate::directory::{DirectoryOutcome, DirectoryStage, ServiceDiscoveryInfo};
use crate::error::SessionError;
use crate::handshake::{HandshakeProgress, HandshakeStage};
use crate::item::ItemStage;
use crate::login::{LoginIdentity, LoginOutcome, LoginStage, LoginState};
use crate::metrics::SessionMetrics;
use crate::ping::{PingAction, PingLiveness};
use crate::sink::ChannelSink;

/// How often the handshake is advanced when the notifier reports nothing
const HANDSHAKE_POLL: Duration = Duration::from_secs(1);
/// Shortest readiness wait in steady state
const MIN_LOOP_WAIT: Duration = Duration::from_millis(100);
/// Flush attempts while shutting down gracefully
const SHUTDOWN_FLUSH_ATTEMPTS: usize = 64;
const SHUTDOWN_FLUSH_WAIT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Initializing,
    LoggingIn,
    DiscoveringDirectory,
    LoadingDictionaries,
    Subscribed,
    ShuttingDown,
    Closed,
}

impl SessionState {
    pub fn ordinal(self) -> i64 {
        match self {
            SessionState::Connecting => 0,
            SessionState::Initializing => 1,
            SessionState::LoggingIn => 2,
            SessionState::DiscoveringDirectory => 3,
            SessionState::LoadingDictionaries => 4,
            SessionState::Subscribed => 5,
            SessionState::ShuttingDown => 6,
            SessionState::Closed => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Initializing => "initializing",
            SessionState::LoggingIn => "logging_in",
            SessionState::DiscoveringDirectory => "discovering_directory",
            SessionState::LoadingDictionaries => "loading_dictionaries",
            SessionState::Subscribed => "subscribed",
            SessionState::ShuttingDown => "shutting_down",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One consumer session over one channel.
///
/// Owns the channel, the dictionary and all stage state; nothing is shared
/// with other sessions.
pub struct Session<T: Transport, N: Notifier> {
    config: ConsumerConfig,
    notifier: N,
    sink: ChannelSink<T>,
    dictionary: DataDictionary,
    handshake: HandshakeStage,
    login: LoginStage,
    directory: DirectoryStage,
    dictionaries: DictionaryStage,
    items: ItemStage,
    ping: Option<PingLiveness>,
    state: SessionState,
    transitions: Vec<SessionState>,
    channel_info: Option<ChannelInfo>,
    registered: Option<SocketId>,
    metrics: SessionMetrics,
}

impl<T: Transport, N: Notifier> Session<T, N> {
    pub fn new(config: ConsumerConfig, transport: T, notifier: N) -> Self {
        Self::with_codec(config, transport, notifier, Box::new(JsonCodec::new()))
    }

    pub fn with_codec(config: ConsumerConfig, transport: T, notifier: N, codec: Box<dyn Codec>) -> Self {
        let metrics = SessionMetrics::new(config.directory.service_name.as_str());
        metrics.set_state(SessionState::Connecting.ordinal());
        Self {
            notifier,
            sink: ChannelSink::new(transport, codec, metrics.clone()),
            dictionary: DataDictionary::new(),
            handshake: HandshakeStage::from_config(&config.connection),
            login: LoginStage::new(LoginIdentity::from_config(&config.login)),
            directory: DirectoryStage::new(
                config.directory.service_name.as_str(),
                config.directory.max_services,
                config.dictionary.field_download_name.as_str(),
                config.dictionary.enum_download_name.as_str(),
            ),
            dictionaries: DictionaryStage::new(&config.dictionary),
            items: ItemStage::new([config.item.name.clone()]),
            ping: None,
            state: SessionState::Connecting,
            transitions: vec![SessionState::Connecting],
            channel_info: None,
            registered: None,
            metrics,
            config,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state the session has been in, in order
    pub fn transitions(&self) -> &[SessionState] {
        &self.transitions
    }

    pub fn channel_info(&self) -> Option<&ChannelInfo> {
        self.channel_info.as_ref()
    }

    pub fn service_info(&self) -> &ServiceDiscoveryInfo {
        self.directory.info()
    }

    pub fn login_state(&self) -> LoginState {
        self.login.state()
    }

    pub fn items(&self) -> &ItemStage {
        &self.items
    }

    pub fn dictionaries(&self) -> &DictionaryStage {
        &self.dictionaries
    }

    pub fn dictionary(&self) -> &DataDictionary {
        &self.dictionary
    }

    /// Run until the configured run time elapses or a fatal condition occurs.
    ///
    /// Run-time expiry closes the item and login streams before releasing the
    /// channel. A fatal condition releases the channel straight away.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        let deadline = Instant::now() + self.config.run_time();
        self.dictionaries.load_local_files(&mut self.dictionary);

        let result = self.drive(deadline).await;
        match &result {
            Ok(()) => self.shutdown().await,
            Err(e) => {
                error!(state = %self.state, error = %e, "Session failed");
                self.metrics.inc_fatal(e.kind());
            }
        }
        self.teardown();
        result
    }

    async fn drive(&mut self, deadline: Instant) -> Result<(), SessionError> {
        let channel = self.handshake.connect(self.sink.transport_mut())?;
        let socket_id = channel.socket_id;
        self.sink.attach(channel);
        self.register(socket_id, self.handshake.initial_interest());
        self.set_state(SessionState::Initializing);

        if !self.initialize(deadline).await? {
            info!("Run time elapsed during channel initialization");
            return Ok(());
        }

        self.set_state(SessionState::LoggingIn);
        self.login.send_request(&mut self.sink)?;

        loop {
            let now = Instant::now();
            if now >= deadline {
                info!(run_time_secs = self.config.run_time_secs, "Run time elapsed");
                return Ok(());
            }
            self.update_write_interest();
            let wait = self.loop_wait().min(deadline - now);
            let ready = self.notifier.wait(wait).await?;
            for readiness in ready {
                if Some(readiness.socket_id) != self.sink.socket_id() {
                    continue;
                }
                if readiness.readable || readiness.exception {
                    self.read_all()?;
                }
                if readiness.writable && self.sink.is_flush_pending() {
                    let status = self.sink.flush()?;
                    trace!(pending = status.is_pending(), "Flushed on writability");
                }
            }
            self.check_ping()?;
        }
    }

    /// Advance the handshake on every wake until the channel is active.
    /// Returns false if the run time ran out first.
    async fn initialize(&mut self, deadline: Instant) -> Result<bool, SessionError> {
        let timeout = self.handshake.timeout();
        let handshake_deadline = Instant::now() + timeout;
        loop {
            let (progress, socket_id) = {
                let (transport, channel) = self.sink.io()?;
                let progress = self.handshake.advance(transport, channel)?;
                (progress, channel.socket_id)
            };
            match progress {
                HandshakeProgress::Active(info) => {
                    self.ping = Some(PingLiveness::new(info.ping_timeout, Instant::now()));
                    self.channel_info = Some(info);
                    self.register(socket_id, Interest::READ | Interest::EXCEPT);
                    return Ok(true);
                }
                HandshakeProgress::InProgress { fd_change } => {
                    if let Some(change) = fd_change {
                        self.notifier.unregister(change.old);
                        self.registered = None;
                    }
                    self.register(socket_id, self.handshake.in_progress_interest());
                }
            }

            let now = Instant::now();
            if now >= handshake_deadline {
                return Err(SessionError::HandshakeTimeout(timeout));
            }
            if now >= deadline {
                return Ok(false);
            }
            let wait = HANDSHAKE_POLL.min(handshake_deadline - now).min(deadline - now);
            self.notifier.wait(wait).await?;
        }
    }

    /// A fraction of the ping timeout, so liveness is checked often enough
    fn loop_wait(&self) -> Duration {
        let timeout = self
            .channel_info
            .as_ref()
            .map_or(Duration::ZERO, |info| info.ping_timeout);
        (timeout / 60).max(MIN_LOOP_WAIT)
    }

    fn read_all(&mut self) -> Result<(), SessionError> {
        loop {
            match self.sink.read()? {
                ReadEvent::WouldBlock => return Ok(()),
                ReadEvent::Ping => {
                    trace!("Received ping");
                    self.metrics.inc_ping_received();
                    self.note_liveness();
                }
                ReadEvent::FdChange(change) => {
                    info!(old = change.old, new = change.new, "Socket changed");
                    self.notifier.unregister(change.old);
                    self.registered = None;
                    self.register(change.new, Interest::READ | Interest::WRITE | Interest::EXCEPT);
                }
                ReadEvent::Message(bytes) => {
                    self.note_liveness();
                    self.dispatch(&bytes)?;
                }
            }
        }
    }

    fn note_liveness(&mut self) {
        if let Some(ping) = self.ping.as_mut() {
            ping.on_message_or_ping();
        }
    }

    fn dispatch(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let start = now_tsc();
        let message = self.sink.decode(bytes)?;
        let domain = message.domain_name();
        self.metrics
            .inc_received(domain, message.msg().class().as_str());
        debug!(
            domain,
            stream_id = message.msg().stream_id,
            class = %message.msg().class(),
            "Received message"
        );

        match message {
            Message::Login(msg) => self.on_login(&msg)?,
            Message::Source(msg) => self.on_directory(&msg)?,
            Message::Dictionary(msg) => self.on_dictionary(&msg)?,
            Message::MarketPrice(msg) => {
                self.items.on_message(&msg, &self.dictionary)?;
            }
            Message::Other(code, msg) => {
                warn!(domain = code, stream_id = msg.stream_id, "Ignoring message for unhandled domain");
            }
        }

        self.metrics.observe_dispatch(domain, elapsed_since(start));
        Ok(())
    }

    fn on_login(&mut self, msg: &Msg) -> Result<(), SessionError> {
        match self.login.on_response(msg) {
            LoginOutcome::Unchanged => Ok(()),
            LoginOutcome::Established => {
                if self.state == SessionState::LoggingIn {
                    self.set_state(SessionState::DiscoveringDirectory);
                    self.directory.send_request(&mut self.sink)?;
                }
                Ok(())
            }
            LoginOutcome::Denied(text) => Err(SessionError::LoginDenied(text)),
            LoginOutcome::Suspect(text) => Err(SessionError::LoginSuspect(text)),
            LoginOutcome::Closed => Err(SessionError::LoginClosed),
        }
    }

    fn on_directory(&mut self, msg: &Msg) -> Result<(), SessionError> {
        let outcome = self.directory.on_response(msg)?;
        if outcome == DirectoryOutcome::ServiceReady && self.state == SessionState::DiscoveringDirectory {
            if self.dictionaries.all_loaded() {
                return self.subscribe();
            }
            self.set_state(SessionState::LoadingDictionaries);
            self.dictionaries
                .request_downloads(&mut self.sink, self.directory.info())?;
        }
        Ok(())
    }

    fn on_dictionary(&mut self, msg: &Msg) -> Result<(), SessionError> {
        let progress = self.dictionaries.on_response(msg, &mut self.dictionary)?;
        if progress == DictionaryProgress::AllLoaded && self.state == SessionState::LoadingDictionaries {
            info!(
                fields = self.dictionary.field_count(),
                enum_tables = self.dictionary.enum_table_count(),
                "Dictionaries loaded"
            );
            self.subscribe()?;
        }
        Ok(())
    }

    /// Only reachable with the service ready and both dictionaries loaded
    fn subscribe(&mut self) -> Result<(), SessionError> {
        let info = self.directory.info();
        debug_assert!(info.is_ready() && self.dictionaries.all_loaded());
        if !info.market_price_supported {
            return Err(SessionError::MarketPriceUnsupported(info.service_name.clone()));
        }
        let service_id = info
            .service_id
            .ok_or_else(|| SessionError::ServiceNotFound(info.service_name.clone()))?;
        let qos = info.first_qos();
        self.items.send_requests(&mut self.sink, service_id, qos)?;
        self.set_state(SessionState::Subscribed);
        Ok(())
    }

    fn check_ping(&mut self) -> Result<(), SessionError> {
        let Some(ping) = self.ping.as_mut() else {
            return Ok(());
        };
        match ping.tick(Instant::now()) {
            PingAction::Ok => Ok(()),
            PingAction::SendPing => {
                self.sink.ping()?;
                Ok(())
            }
            PingAction::Timeout => {
                let window = ping.receive_interval();
                warn!(timeout_secs = window.as_secs(), "Peer silent for the whole ping timeout");
                Err(SessionError::PingTimeout(window))
            }
        }
    }

    /// Keep write interest only while output waits for a flush
    fn update_write_interest(&mut self) {
        let Some(socket_id) = self.sink.socket_id() else {
            return;
        };
        let pending = self.sink.is_flush_pending();
        let interest = if pending {
            Interest::READ | Interest::WRITE | Interest::EXCEPT
        } else {
            Interest::READ | Interest::EXCEPT
        };
        if self.notifier.interest(socket_id) != Some(interest) {
            self.register(socket_id, interest);
        }
        self.metrics.set_flush_pending(pending);
    }

    fn register(&mut self, socket_id: SocketId, interest: Interest) {
        self.notifier.register(socket_id, interest);
        self.registered = Some(socket_id);
    }

    async fn shutdown(&mut self) {
        self.set_state(SessionState::ShuttingDown);
        if !self.sink.is_active() {
            return;
        }
        self.items.close_streams(&mut self.sink);
        if let Err(e) = self.login.close(&mut self.sink) {
            warn!(error = %e, "Failed to close login stream");
        }

        for _ in 0..SHUTDOWN_FLUSH_ATTEMPTS {
            match self.sink.flush() {
                Ok(FlushStatus::Flushed) => return,
                Ok(FlushStatus::Pending(bytes)) => {
                    trace!(bytes, "Output still pending during shutdown");
                    if let Err(e) = self.notifier.wait(SHUTDOWN_FLUSH_WAIT).await {
                        warn!(error = %e, "Wait failed during shutdown flush");
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Flush failed during shutdown");
                    return;
                }
            }
        }
        warn!(attempts = SHUTDOWN_FLUSH_ATTEMPTS, "Output still pending, closing anyway");
    }

    /// Release everything exactly once, whatever ended the session
    fn teardown(&mut self) {
        if let Some(socket_id) = self.registered.take() {
            self.notifier.unregister(socket_id);
        }
        self.sink.close();
        self.dictionary.clear();
        self.ping = None;
        self.set_state(SessionState::Closed);
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        info!(from = %self.state, to = %next, "Session state");
        self.state = next;
        self.transitions.push(next);
        self.metrics.set_state(next.ordinal());
    }
}
