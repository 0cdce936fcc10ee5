pub mod interpolation;
pub mod net;

pub use interpolation::{InterpolationConfig, Interpolator, UpdateInfo};
pub use net::{
    ClientConfig, DisconnectReason, HostConfig, IncomingMessage, LinkConditions, MessageHeader,
    MessageType, NetData, NetError, NetEvent, NetReader, NetWriter, NetworkClient, NetworkHost,
    NetworkRegistry, NetworkState, NetworkStats, OutgoingMessage, PacketError, Payload,
    StreamError, Transport, TransportManager, UdpEmulator, UdpTransport, UpdateMessage,
};
