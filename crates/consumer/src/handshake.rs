use std::time::Duration;

use eta_metadata::consumer::ConnectionConfig;
use eta_middleware::{
    Channel, ChannelInfo, ConnectOptions, FdChange, InitProgress, Interest, Transport,
    TransportError,
};
use tracing::{debug, info};

/// Result of one handshake step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeProgress {
    InProgress { fd_change: Option<FdChange> },
    /// Channel is up; carries the negotiated parameters
    Active(ChannelInfo),
}

/// Connects the channel and drives transport initialization to `Active`
#[derive(Debug, Clone)]
pub struct HandshakeStage {
    options: ConnectOptions,
    timeout: Duration,
}

impl HandshakeStage {
    pub fn new(options: ConnectOptions, timeout: Duration) -> Self {
        Self { options, timeout }
    }

    pub fn from_config(config: &ConnectionConfig) -> Self {
        let mut options = ConnectOptions::new(config.host.clone(), config.port);
        options.interface = config.interface().map(str::to_owned);
        options.ping_timeout = config.ping_timeout();
        options.guaranteed_output_buffers = config.guaranteed_output_buffers;
        options.num_input_buffers = config.num_input_buffers;
        options.tcp_nodelay = config.tcp_nodelay;
        Self::new(options, config.handshake_timeout())
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Interest while the connect is still outstanding
    pub fn initial_interest(&self) -> Interest {
        Interest::READ | Interest::WRITE | Interest::EXCEPT
    }

    /// Interest once initialization has started exchanging messages
    pub fn in_progress_interest(&self) -> Interest {
        Interest::READ | Interest::EXCEPT
    }

    pub fn connect<T: Transport + ?Sized>(&self, transport: &mut T) -> Result<Channel, TransportError> {
        info!(
            host = %self.options.host,
            port = self.options.port,
            interface = self.options.interface.as_deref().unwrap_or(""),
            "Connecting"
        );
        let channel = transport.connect(&self.options)?;
        debug!(socket_id = channel.socket_id, "Channel created");
        Ok(channel)
    }

    /// Advance initialization by one step. On `Active` the negotiated channel
    /// parameters are queried once and logged.
    pub fn advance<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        channel: &mut Channel,
    ) -> Result<HandshakeProgress, TransportError> {
        match transport.init_channel(channel)? {
            InitProgress::InProgress { fd_change } => {
                match fd_change {
                    Some(change) => info!(old = change.old, new = change.new, "Socket changed during initialization"),
                    None => debug!("Channel initialization in progress"),
                }
                Ok(HandshakeProgress::InProgress { fd_change })
            }
            InitProgress::Active => {
                let info = transport.channel_info(channel)?;
                info!(
                    max_fragment_size = info.max_fragment_size,
                    output_buffers = info.guaranteed_output_buffers,
                    input_buffers = info.num_input_buffers,
                    ping_timeout_secs = info.ping_timeout.as_secs(),
                    component = %info.component_info.join(", "),
                    major = channel.major_version,
                    minor = channel.minor_version,
                    "Channel active"
                );
                Ok(HandshakeProgress::Active(info))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eta_metadata::consumer::ConsumerConfig;
    use eta_middleware::memory::{memory_channel, InitStep};
    use eta_middleware::ChannelState;

    #[test]
    fn test_from_config() {
        let mut config = ConsumerConfig::default();
        config.connection.interface = "10.0.0.5".into();
        config.connection.ping_timeout_secs = 45;
        let stage = HandshakeStage::from_config(&config.connection);
        assert_eq!(stage.options().host, "localhost");
        assert_eq!(stage.options().port, 14002);
        assert_eq!(stage.options().interface.as_deref(), Some("10.0.0.5"));
        assert_eq!(stage.options().ping_timeout, Duration::from_secs(45));
        assert_eq!(stage.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_interest_narrows_after_first_step() {
        let stage = HandshakeStage::new(ConnectOptions::new("memory", 0), Duration::from_secs(5));
        assert!(stage.initial_interest().write);
        assert!(!stage.in_progress_interest().write);
        assert!(stage.in_progress_interest().read && stage.in_progress_interest().except);
    }

    #[test]
    fn test_advance_until_active() {
        let (mut transport, _notifier, peer) = memory_channel();
        peer.script_init([InitStep::InProgress, InitStep::FdChange(101), InitStep::Active]);
        peer.set_ping_timeout(Duration::from_secs(30));
        let stage = HandshakeStage::new(ConnectOptions::new("memory", 0), Duration::from_secs(5));

        let mut channel = stage.connect(&mut transport).unwrap();
        assert_eq!(
            stage.advance(&mut transport, &mut channel).unwrap(),
            HandshakeProgress::InProgress { fd_change: None }
        );
        let HandshakeProgress::InProgress { fd_change: Some(change) } =
            stage.advance(&mut transport, &mut channel).unwrap()
        else {
            panic!("expected an fd change");
        };
        assert_eq!(change.new, 101);
        let HandshakeProgress::Active(info) = stage.advance(&mut transport, &mut channel).unwrap() else {
            panic!("expected active");
        };
        assert_eq!(info.ping_timeout, Duration::from_secs(30));
        assert_eq!(channel.state, ChannelState::Active);
    }

    #[test]
    fn test_connect_failure() {
        let (mut transport, _notifier, peer) = memory_channel();
        peer.fail_connect("refused");
        let stage = HandshakeStage::new(ConnectOptions::new("memory", 0), Duration::from_secs(5));
        assert!(matches!(
            stage.connect(&mut transport),
            Err(TransportError::ConnectionFailed(_))
        ));
    }
}
