mod cadence;
mod client;
mod config;
mod connection;
mod error;
mod events;
mod host;
mod manager;
mod protocol;
mod simulator;
mod stats;
mod stream;
mod tracking;
mod transport;
mod update;

pub use cadence::{Cadence, period_ms, timed_out};
pub use client::{NetworkClient, NetworkState};
pub use config::{ClientConfig, DEFAULT_CONFIRMED_HISTORY, HostConfig};
pub use connection::{PeerContext, PeerTable};
pub use error::NetError;
pub use events::{
    DisconnectReason, NET_CONNECTED, NET_CONNECTION_LOST, NET_DISCONNECTED, NET_MESSAGE_RECEIVED,
    NetEvent,
};
pub use host::NetworkHost;
pub use manager::TransportManager;
pub use protocol::{
    APP_ID_LEN, DEFAULT_RECEIVE_BUFFER, HEADER_LEN, IncomingMessage, MAX_DATAGRAM_SIZE,
    MessageHeader, MessageType, NetData, OutgoingMessage, PacketError, Payload, decode_frame,
    encode_frame, sequence_greater_than,
};
pub use simulator::{LISTEN_IP, MAX_QUEUED_DATAGRAMS, NetworkRegistry, UdpEmulator};
pub use stats::{LinkConditions, NetworkStats};
pub use stream::{FIXED_POINT_SCALE, NetReader, NetWriter, StreamError};
pub use tracking::{OutgoingChannel, ReceiveTracker, SequenceCounter};
pub use transport::{Transport, UdpTransport};
pub use update::UpdateMessage;
