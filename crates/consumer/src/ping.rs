//! Dual-deadline heartbeat tracking.
//!
//! Outbound pings go out every third of the negotiated timeout; the peer is
//! declared dead when a full timeout passes without any inbound traffic.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingAction {
    Ok,
    SendPing,
    /// Nothing arrived within the receive window
    Timeout,
}

#[derive(Debug, Clone)]
pub struct PingLiveness {
    send_interval: Duration,
    receive_interval: Duration,
    next_send: Instant,
    next_receive: Instant,
    received_server_msg: bool,
    timed_out: bool,
}

impl PingLiveness {
    /// Start both deadlines from `now`. A zero timeout disables pinging.
    pub fn new(timeout: Duration, now: Instant) -> Self {
        let send_interval = timeout / 3;
        Self {
            send_interval,
            receive_interval: timeout,
            next_send: now + send_interval,
            next_receive: now + timeout,
            received_server_msg: false,
            timed_out: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.receive_interval.is_zero()
    }

    pub fn send_interval(&self) -> Duration {
        self.send_interval
    }

    pub fn receive_interval(&self) -> Duration {
        self.receive_interval
    }

    /// Any inbound message or ping counts as liveness
    pub fn on_message_or_ping(&mut self) {
        self.received_server_msg = true;
    }

    pub fn tick(&mut self, now: Instant) -> PingAction {
        if !self.is_enabled() {
            return PingAction::Ok;
        }
        if self.timed_out {
            return PingAction::Timeout;
        }

        if now >= self.next_receive {
            if !self.received_server_msg {
                self.timed_out = true;
                return PingAction::Timeout;
            }
            self.received_server_msg = false;
            self.next_receive = now + self.receive_interval;
        }

        if now >= self.next_send {
            self.next_send = now + self.send_interval;
            return PingAction::SendPing;
        }
        PingAction::Ok
    }
}
