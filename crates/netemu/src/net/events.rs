use std::net::SocketAddr;

use super::protocol::IncomingMessage;

pub const NET_CONNECTED: &str = "NET_CONNECTED";
pub const NET_MESSAGE_RECEIVED: &str = "NET_MESSAGE_RECEIVED";
pub const NET_DISCONNECTED: &str = "NET_DISCONNECTED";
pub const NET_CONNECTION_LOST: &str = "NET_CONNECTION_LOST";

#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    Connected {
        peer_id: u16,
        addr: SocketAddr,
    },
    MessageReceived(IncomingMessage),
    Disconnected {
        peer_id: u16,
        reason: DisconnectReason,
    },
    ConnectionLost {
        peer_id: u16,
    },
}

impl NetEvent {
    pub fn action(&self) -> &'static str {
        match self {
            NetEvent::Connected { .. } => NET_CONNECTED,
            NetEvent::MessageReceived(_) => NET_MESSAGE_RECEIVED,
            NetEvent::Disconnected { .. } => NET_DISCONNECTED,
            NetEvent::ConnectionLost { .. } => NET_CONNECTION_LOST,
        }
    }

    pub fn peer_id(&self) -> u16 {
        match self {
            NetEvent::Connected { peer_id, .. }
            | NetEvent::Disconnected { peer_id, .. }
            | NetEvent::ConnectionLost { peer_id } => *peer_id,
            NetEvent::MessageReceived(message) => message.header.peer_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Closed,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Closed => "closed",
        }
    }
}
