use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::select_all;
use tokio::io::Interest as TokioInterest;

use crate::error::TransportError;
use crate::notifier::{Interest, Notifier, Readiness};
use crate::tcp::transport::SocketTable;
use crate::transport::SocketId;

/// Readiness notifier backed by the tokio reactor
pub struct TcpNotifier {
    sockets: SocketTable,
    registered: HashMap<SocketId, Interest>,
}

impl TcpNotifier {
    pub fn new(sockets: SocketTable) -> Self {
        Self {
            sockets,
            registered: HashMap::new(),
        }
    }
}

fn to_tokio(interest: Interest) -> Option<TokioInterest> {
    // Peer resets and EOF surface through read readiness
    let read = interest.read || interest.except;
    match (read, interest.write) {
        (true, true) => Some(TokioInterest::READABLE | TokioInterest::WRITABLE),
        (true, false) => Some(TokioInterest::READABLE),
        (false, true) => Some(TokioInterest::WRITABLE),
        (false, false) => None,
    }
}

#[async_trait]
impl Notifier for TcpNotifier {
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
        let mut waits = Vec::with_capacity(self.registered.len());
        for (&socket_id, &interest) in &self.registered {
            let Some(tokio_interest) = to_tokio(interest) else {
                continue;
            };
            let Some(stream) = self.sockets.get(&socket_id).map(|s| Arc::clone(s.value())) else {
                continue;
            };
            waits.push(Box::pin(async move {
                (socket_id, stream.ready(tokio_interest).await)
            }));
        }

        if waits.is_empty() {
            tokio::time::sleep(timeout).await;
            return Ok(Vec::new());
        }

        match tokio::time::timeout(timeout, select_all(waits)).await {
            Err(_elapsed) => Ok(Vec::new()),
            Ok(((socket_id, Ok(ready)), _, _)) => Ok(vec![Readiness {
                socket_id,
                readable: ready.is_readable(),
                writable: ready.is_writable(),
                exception: ready.is_read_closed() || ready.is_write_closed(),
            }]),
            Ok(((_, Err(e)), _, _)) => Err(TransportError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashmap::DashMap;

    #[test]
    fn test_to_tokio_mapping() {
        assert!(to_tokio(Interest::default()).is_none());
        assert_eq!(to_tokio(Interest::EXCEPT), Some(TokioInterest::READABLE));
        assert_eq!(to_tokio(Interest::WRITE), Some(TokioInterest::WRITABLE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_without_sockets_times_out() {
        let mut notifier = TcpNotifier::new(Arc::new(DashMap::new()));
        notifier.register(1, Interest::READ);
        let ready = notifier.wait(Duration::from_secs(5)).await.unwrap();
        assert!(ready.is_empty());
    }
}
