use std::io;

use super::protocol::PacketError;
use super::stream::StreamError;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("peer is already initialized")]
    AlreadyInitialized,
    #[error("peer is not initialized")]
    NotInitialized,
    #[error("no socket is bound")]
    NotBound,
    #[error("all peer ids are in use")]
    PeersExhausted,
    #[error("frame of {len} bytes exceeds the {max} byte datagram limit")]
    FrameTooLarge { len: usize, max: usize },
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl NetError {
    pub fn is_transient(&self) -> bool {
        matches!(self, NetError::Io(_))
    }
}
