use std::fmt;

use netemu::{MessageType, NetEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Host,
    Client(usize),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Host => write!(f, "host"),
            Origin::Client(index) => write!(f, "client#{}", index),
        }
    }
}

/// A peer notification with the simulated time it was raised at.
#[derive(Debug, Clone)]
pub struct SimEvent {
    pub time: f64,
    pub origin: Origin,
    pub event: NetEvent,
}

impl SimEvent {
    /// Per-message notifications are too frequent to show.
    pub fn is_noteworthy(&self) -> bool {
        match &self.event {
            NetEvent::MessageReceived(message) => {
                message.header.message_type != MessageType::Data || message.header.is_reliable
            }
            _ => true,
        }
    }
}

pub fn describe(event: &NetEvent) -> String {
    match event {
        NetEvent::Connected { peer_id, addr } => {
            format!("{}: peer {} at {}", event.action(), peer_id, addr)
        }
        NetEvent::MessageReceived(message) => format!(
            "{}: {:?} #{} action {} from {}",
            event.action(),
            message.header.message_type,
            message.header.sequence_id,
            message.header.action,
            message.source()
        ),
        NetEvent::Disconnected { peer_id, reason } => {
            format!("{}: peer {} {}", event.action(), peer_id, reason.as_str())
        }
        NetEvent::ConnectionLost { peer_id } => format!("{}: peer {}", event.action(), peer_id),
    }
}

impl fmt::Display for SimEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>9.1}s] {:<9} {}",
            self.time / 1000.0,
            self.origin,
            describe(&self.event)
        )
    }
}
