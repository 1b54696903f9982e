use async_trait::async_trait;
use std::ops::BitOr;
use std::time::Duration;

use crate::error::TransportError;
use crate::transport::SocketId;

/// Readiness a caller wants to be told about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
    pub except: bool,
}

impl Interest {
    pub const READ: Interest = Interest {
        read: true,
        write: false,
        except: false,
    };
    pub const WRITE: Interest = Interest {
        read: false,
        write: true,
        except: false,
    };
    pub const EXCEPT: Interest = Interest {
        read: false,
        write: false,
        except: true,
    };

    pub fn is_empty(&self) -> bool {
        !(self.read || self.write || self.except)
    }

    pub fn without_write(self) -> Interest {
        Interest {
            write: false,
            ..self
        }
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest {
            read: self.read || rhs.read,
            write: self.write || rhs.write,
            except: self.except || rhs.except,
        }
    }
}

/// One socket reported ready by `Notifier::wait`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub socket_id: SocketId,
    pub readable: bool,
    pub writable: bool,
    pub exception: bool,
}

impl Readiness {
    pub fn is_empty(&self) -> bool {
        !(self.readable || self.writable || self.exception)
    }
}

/// Readiness notifier (the select/poll of the session loop)
#[async_trait]
pub trait Notifier: Send {
    /// Register a socket, replacing any previous interest
    fn register(&mut self, socket_id: SocketId, interest: Interest);

    fn unregister(&mut self, socket_id: SocketId);

    fn interest(&self, socket_id: SocketId) -> Option<Interest>;

    /// Wait until a registered socket is ready or the timeout elapses.
    /// An empty result means the timeout elapsed.
    async fn wait(&mut self, timeout: Duration) -> Result<Vec<Readiness>, TransportError>;
}
