use eta_codec::rdm::domain;
use eta_codec::{Codec, Message, Msg};
use eta_middleware::{Channel, FlushStatus, ReadEvent, SocketId, Transport, TransportError};
use tracing::trace;

use crate::error::SessionError;
use crate::metrics::SessionMetrics;
use crate::writer::{BufferedWriter, SendOutcome};

/// Where stages hand the messages they want sent
pub trait MsgSink {
    fn send_msg(&mut self, msg: &Msg) -> Result<(), SessionError>;
}

/// Collects messages instead of sending them
impl MsgSink for Vec<Msg> {
    fn send_msg(&mut self, msg: &Msg) -> Result<(), SessionError> {
        self.push(msg.clone());
        Ok(())
    }
}

pub(crate) fn domain_label(domain: u8) -> &'static str {
    match domain {
        domain::LOGIN => "login",
        domain::SOURCE => "source",
        domain::DICTIONARY => "dictionary",
        domain::MARKET_PRICE => "market_price",
        _ => "other",
    }
}

/// The session's I/O side: transport, its channel, the output writer and the codec
pub struct ChannelSink<T: Transport> {
    transport: T,
    channel: Option<Channel>,
    writer: BufferedWriter,
    codec: Box<dyn Codec>,
    metrics: SessionMetrics,
}

impl<T: Transport> ChannelSink<T> {
    pub fn new(transport: T, codec: Box<dyn Codec>, metrics: SessionMetrics) -> Self {
        Self {
            transport,
            channel: None,
            writer: BufferedWriter::new(),
            codec,
            metrics,
        }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn attach(&mut self, channel: Channel) {
        self.channel = Some(channel);
    }

    pub fn channel(&self) -> Option<&Channel> {
        self.channel.as_ref()
    }

    pub fn socket_id(&self) -> Option<SocketId> {
        self.channel.as_ref().map(|c| c.socket_id)
    }

    pub fn is_active(&self) -> bool {
        self.channel.as_ref().is_some_and(Channel::is_active)
    }

    /// Transport and channel together, for calls that need both
    pub fn io(&mut self) -> Result<(&mut T, &mut Channel), TransportError> {
        let channel = self.channel.as_mut().ok_or(TransportError::NotActive)?;
        Ok((&mut self.transport, channel))
    }

    pub fn is_flush_pending(&self) -> bool {
        self.writer.is_flush_pending()
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Message, SessionError> {
        Ok(self.codec.decode(bytes)?)
    }

    pub fn read(&mut self) -> Result<ReadEvent, TransportError> {
        let (transport, channel) = self.io()?;
        transport.read(channel)
    }

    pub fn flush(&mut self) -> Result<FlushStatus, TransportError> {
        let channel = self.channel.as_mut().ok_or(TransportError::NotActive)?;
        let status = self.writer.flush(&mut self.transport, channel)?;
        self.metrics.set_flush_pending(status.is_pending());
        Ok(status)
    }

    pub fn ping(&mut self) -> Result<(), TransportError> {
        let channel = self.channel.as_mut().ok_or(TransportError::NotActive)?;
        let status = self.transport.ping(channel)?;
        self.writer.note_flush_status(status);
        self.metrics.inc_ping_sent();
        self.metrics.set_flush_pending(status.is_pending());
        trace!(pending = status.is_pending(), "Ping sent");
        Ok(())
    }

    /// Release the channel. Safe to call when never connected.
    pub fn close(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            self.transport.close(channel);
        }
    }
}

impl<T: Transport> MsgSink for ChannelSink<T> {
    fn send_msg(&mut self, msg: &Msg) -> Result<(), SessionError> {
        let bytes = self.codec.encode(msg)?;
        let channel = self.channel.as_mut().ok_or(TransportError::NotActive)?;
        if !channel.is_active() {
            return Err(TransportError::NotActive.into());
        }
        let outcome = self.writer.send(&mut self.transport, channel, &bytes)?;
        self.metrics
            .inc_sent(domain_label(msg.domain), msg.class().as_str());
        self.metrics
            .set_flush_pending(outcome == SendOutcome::FlushPending);
        trace!(stream_id = msg.stream_id, class = %msg.class(), len = bytes.len(), "Sent message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eta_codec::JsonCodec;
    use eta_middleware::memory::memory_channel;
    use eta_middleware::ConnectOptions;

    #[test]
    fn test_send_before_connect_fails() {
        let (transport, _notifier, _peer) = memory_channel();
        let mut sink = ChannelSink::new(transport, Box::new(JsonCodec), SessionMetrics::new("sink_test"));
        let err = sink.send_msg(&Msg::close(1, domain::LOGIN)).unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::NotActive)));
        sink.close();
    }

    #[test]
    fn test_send_encodes_with_codec() {
        let (mut transport, _notifier, peer) = memory_channel();
        let mut channel = transport.connect(&ConnectOptions::new("memory", 0)).unwrap();
        transport.init_channel(&mut channel).unwrap();
        let mut sink = ChannelSink::new(transport, Box::new(JsonCodec), SessionMetrics::new("sink_test"));
        sink.attach(channel);

        sink.send_msg(&Msg::close(5, domain::MARKET_PRICE)).unwrap();
        let written = peer.written();
        assert_eq!(written.len(), 1);
        let decoded = JsonCodec.decode(&written[0]).unwrap();
        assert!(matches!(decoded, Message::MarketPrice(_)));

        sink.ping().unwrap();
        assert_eq!(peer.pings_sent(), 1);
        sink.close();
        assert!(peer.is_closed());
    }

    #[test]
    fn test_vec_sink_collects() {
        let mut sent: Vec<Msg> = Vec::new();
        sent.send_msg(&Msg::close(1, domain::LOGIN)).unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(domain_label(domain::SOURCE), "source");
    }
}
