//! Buffered, non-blocking message output
use eta_middleware::{
    Channel, FlushStatus, Priority, Transport, TransportError, WriteBuffer, WriteStatus,
};
use tracing::{debug, trace, warn};

/// What the caller must do after a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Everything reached the socket
    Sent,
    /// Bytes remain queued; keep write interest and flush on writability
    FlushPending,
}

/// Writes whole messages at high priority, absorbing fragmentation and
/// transient buffer exhaustion.
#[derive(Debug, Default)]
pub struct BufferedWriter {
    flush_pending: bool,
}

impl BufferedWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_flush_pending(&self) -> bool {
        self.flush_pending
    }

    pub fn send<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        channel: &mut Channel,
        payload: &[u8],
    ) -> Result<SendOutcome, TransportError> {
        let mut buffer = self.get_buffer(transport, channel, payload.len())?;
        buffer.put(payload);

        let mut retried_no_buffers = false;
        loop {
            match transport.write(channel, &mut buffer, Priority::High) {
                Ok(WriteStatus::CallAgain) => {
                    trace!(buffer = buffer.id(), consumed = buffer.consumed(), "Write fragmenting, flushing");
                    self.flush(transport, channel)?;
                }
                Ok(WriteStatus::Written) => return Ok(SendOutcome::Sent),
                Ok(WriteStatus::Queued(bytes)) => {
                    debug!(bytes, "Write queued, flush pending");
                    self.flush_pending = true;
                    return Ok(SendOutcome::FlushPending);
                }
                Err(TransportError::NoBuffers) if !retried_no_buffers => {
                    warn!("Write found no buffers, flushing and retrying once");
                    retried_no_buffers = true;
                    self.flush(transport, channel)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn get_buffer<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        channel: &mut Channel,
        size: usize,
    ) -> Result<WriteBuffer, TransportError> {
        match transport.get_buffer(channel, size) {
            Err(TransportError::NoBuffers) => {
                warn!(size, "No output buffers, flushing and retrying once");
                self.flush(transport, channel)?;
                transport.get_buffer(channel, size)
            }
            other => other,
        }
    }

    /// Push queued output. The pending flag follows the transport's answer.
    pub fn flush<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        channel: &mut Channel,
    ) -> Result<FlushStatus, TransportError> {
        let status = transport.flush(channel)?;
        self.note_flush_status(status);
        Ok(status)
    }

    /// Record the outcome of a flush done elsewhere (a ping flushes too)
    pub fn note_flush_status(&mut self, status: FlushStatus) {
        self.flush_pending = status.is_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use eta_middleware::memory::{memory_channel, MemoryPeer, MemoryTransport, WriteScript};
    use eta_middleware::ConnectOptions;

    fn active() -> (MemoryTransport, MemoryPeer, Channel) {
        let (mut transport, _notifier, peer) = memory_channel();
        let mut channel = transport.connect(&ConnectOptions::new("memory", 0)).unwrap();
        transport.init_channel(&mut channel).unwrap();
        (transport, peer, channel)
    }

    #[test]
    fn test_written() {
        let (mut transport, peer, mut channel) = active();
        let mut writer = BufferedWriter::new();
        let outcome = writer.send(&mut transport, &mut channel, b"hello").unwrap();
        assert_eq!(outcome, SendOutcome::Sent);
        assert_eq!(peer.written(), vec![Bytes::from_static(b"hello")]);
        assert!(!writer.is_flush_pending());
    }

    #[test]
    fn test_call_again_reuses_buffer() {
        let (mut transport, peer, mut channel) = active();
        peer.script_writes([
            WriteScript::Status(WriteStatus::CallAgain),
            WriteScript::Status(WriteStatus::CallAgain),
            WriteScript::Status(WriteStatus::Written),
        ]);
        let mut writer = BufferedWriter::new();
        let outcome = writer.send(&mut transport, &mut channel, b"big").unwrap();
        assert_eq!(outcome, SendOutcome::Sent);
        let ids = peer.write_buffer_ids();
        assert_eq!(ids.len(), 3);
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(peer.flushes(), 2);
        assert_eq!(peer.buffers_requested(), 1);
    }

    #[test]
    fn test_queued_sets_flush_pending() {
        let (mut transport, peer, mut channel) = active();
        peer.script_writes([WriteScript::Status(WriteStatus::Queued(12))]);
        peer.script_flushes([Ok(FlushStatus::Pending(4)), Ok(FlushStatus::Flushed)]);
        let mut writer = BufferedWriter::new();
        let outcome = writer.send(&mut transport, &mut channel, b"queued").unwrap();
        assert_eq!(outcome, SendOutcome::FlushPending);
        assert!(writer.is_flush_pending());

        writer.flush(&mut transport, &mut channel).unwrap();
        assert!(writer.is_flush_pending());
        writer.flush(&mut transport, &mut channel).unwrap();
        assert!(!writer.is_flush_pending());
    }

    #[test]
    fn test_no_buffers_recovers_after_one_flush() {
        let (mut transport, peer, mut channel) = active();
        peer.fail_buffers(1);
        let mut writer = BufferedWriter::new();
        assert_eq!(
            writer.send(&mut transport, &mut channel, b"x").unwrap(),
            SendOutcome::Sent
        );
        assert_eq!(peer.buffers_requested(), 2);
        assert_eq!(peer.flushes(), 1);
    }

    #[test]
    fn test_no_buffers_twice_is_fatal() {
        let (mut transport, peer, mut channel) = active();
        peer.fail_buffers(2);
        let mut writer = BufferedWriter::new();
        let err = writer.send(&mut transport, &mut channel, b"x").unwrap_err();
        assert!(err.is_no_buffers());
        assert_eq!(peer.flushes(), 1);
        assert!(peer.written().is_empty());
    }

    #[test]
    fn test_write_no_buffers_retried_once() {
        let (mut transport, peer, mut channel) = active();
        peer.script_writes([WriteScript::NoBuffers, WriteScript::NoBuffers]);
        let mut writer = BufferedWriter::new();
        let err = writer.send(&mut transport, &mut channel, b"x").unwrap_err();
        assert!(err.is_no_buffers());
        assert_eq!(peer.write_buffer_ids().len(), 2);
        assert_eq!(peer.flushes(), 1);
    }

    #[test]
    fn test_write_failure_is_fatal() {
        let (mut transport, peer, mut channel) = active();
        peer.script_writes([WriteScript::Fail("reset".into())]);
        let mut writer = BufferedWriter::new();
        let err = writer.send(&mut transport, &mut channel, b"x").unwrap_err();
        assert!(matches!(err, TransportError::WriteFailed(_)));
    }
}
