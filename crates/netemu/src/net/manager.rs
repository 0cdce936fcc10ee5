use std::net::SocketAddr;

use log::{trace, warn};

use super::error::NetError;
use super::protocol::{
    IncomingMessage, MAX_DATAGRAM_SIZE, OutgoingMessage, decode_frame, encode_frame,
};
use super::stats::NetworkStats;
use super::transport::Transport;

#[derive(Debug)]
pub struct TransportManager<T: Transport> {
    transport: T,
    application_id: u16,
    receive_limit: usize,
    buffer: Vec<u8>,
    stats: NetworkStats,
}

impl<T: Transport> TransportManager<T> {
    pub fn new(transport: T, application_id: u16) -> Self {
        Self {
            transport,
            application_id,
            receive_limit: 0,
            buffer: Vec::new(),
            stats: NetworkStats::default(),
        }
    }

    pub fn application_id(&self) -> u16 {
        self.application_id
    }

    pub fn set_application_id(&mut self, application_id: u16) {
        self.application_id = application_id;
    }

    /// Binds the transport and sizes the receive buffer. Datagrams longer
    /// than `buffer_size` are rejected.
    pub fn setup_receiver(&mut self, port: u16, buffer_size: usize) -> Result<SocketAddr, NetError> {
        let addr = self.transport.bind(port)?;
        self.transport.set_receive_buffer_size(buffer_size);
        self.receive_limit = buffer_size;
        // one spare byte tells a full datagram from a cut one
        self.buffer = vec![0u8; buffer_size + 1];
        Ok(addr)
    }

    pub fn setup_sender(&mut self, addr: SocketAddr) {
        self.transport.connect(addr);
    }

    pub fn is_bound(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Sends to the connected address. Unreliable messages are stamped with
    /// `time`; reliable ones keep the timestamp that identifies them.
    pub fn send_message(&mut self, message: &mut OutgoingMessage, time: f64) -> Result<usize, NetError> {
        let addr = self.transport.remote_addr().ok_or(NetError::NotBound)?;
        self.send_to(addr, message, time)
    }

    pub fn send_to(
        &mut self,
        addr: SocketAddr,
        message: &mut OutgoingMessage,
        time: f64,
    ) -> Result<usize, NetError> {
        if !message.header.is_reliable {
            message.header.timestamp = time;
        }
        let frame = encode_frame(self.application_id, message)?;
        if frame.len() > MAX_DATAGRAM_SIZE {
            return Err(NetError::FrameTooLarge {
                len: frame.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        let bytes = self.transport.send_to(&frame, addr, time)?;

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes as u64;
        Ok(bytes)
    }

    /// Returns the next datagram of this application, skipping foreign and
    /// malformed ones. `Ok(None)` means nothing is ready.
    pub fn receive_message(&mut self, time: f64) -> Result<Option<IncomingMessage>, NetError> {
        if self.buffer.is_empty() {
            return Err(NetError::NotBound);
        }

        loop {
            let Some((size, source)) = self.transport.receive(&mut self.buffer, time)? else {
                return Ok(None);
            };

            if size > self.receive_limit {
                self.stats.packets_rejected += 1;
                warn!(
                    "Discarding datagram of {} bytes from {}, buffer holds {}",
                    size, source, self.receive_limit
                );
                continue;
            }

            match decode_frame(self.application_id, &self.buffer[..size], source) {
                Ok(Some(message)) => {
                    self.stats.packets_received += 1;
                    self.stats.bytes_received += size as u64;
                    return Ok(Some(message));
                }
                Ok(None) => {
                    self.stats.packets_rejected += 1;
                    trace!("Ignoring datagram of another application from {}", source);
                }
                Err(e) => {
                    self.stats.packets_rejected += 1;
                    warn!("Discarding malformed datagram from {}: {}", source, e);
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.transport.close();
        self.receive_limit = 0;
        self.buffer = Vec::new();
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            packets_dropped: self.transport.dropped_count(),
            ..self.stats.clone()
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::{HEADER_LEN, MessageType};
    use crate::net::simulator::{LISTEN_IP, NetworkRegistry, UdpEmulator};

    fn manager(registry: &NetworkRegistry, app: u16, port: u16) -> TransportManager<UdpEmulator> {
        let mut manager = TransportManager::new(UdpEmulator::with_seed(registry.clone(), 0), app);
        manager.setup_receiver(port, 1024).unwrap();
        manager
    }

    #[test]
    fn test_send_and_receive() {
        let registry = NetworkRegistry::new();
        let mut sender = manager(&registry, 3, 5000);
        let mut receiver = manager(&registry, 3, 5001);
        sender.setup_sender(SocketAddr::new(LISTEN_IP, 5001));

        let mut message = OutgoingMessage::new(1, 0, MessageType::Beacon);
        sender.send_message(&mut message, 250.0).unwrap();
        assert_eq!(message.header.timestamp, 250.0);

        let received = receiver.receive_message(251.0).unwrap().unwrap();
        assert_eq!(received.header.message_type, MessageType::Beacon);
        assert_eq!(received.header.timestamp, 250.0);
        assert_eq!(received.source(), SocketAddr::new(LISTEN_IP, 5000));
        assert!(receiver.receive_message(252.0).unwrap().is_none());

        assert_eq!(sender.stats().packets_sent, 1);
        assert_eq!(receiver.stats().bytes_received, (2 + HEADER_LEN) as u64);
    }

    #[test]
    fn test_reliable_keeps_timestamp() {
        let registry = NetworkRegistry::new();
        let mut sender = manager(&registry, 3, 5000);
        let mut message = OutgoingMessage::data(0).reliable(true).with_timestamp(17.0);
        sender
            .send_to(SocketAddr::new(LISTEN_IP, 5001), &mut message, 900.0)
            .unwrap();
        assert_eq!(message.header.timestamp, 17.0);
    }

    #[test]
    fn test_foreign_application_skipped() {
        let registry = NetworkRegistry::new();
        let mut foreign = manager(&registry, 8, 5000);
        let mut own = manager(&registry, 3, 5002);
        let mut receiver = manager(&registry, 3, 5001);
        let target = SocketAddr::new(LISTEN_IP, 5001);

        foreign
            .send_to(target, &mut OutgoingMessage::new(0, 0, MessageType::Beacon), 0.0)
            .unwrap();
        own.send_to(target, &mut OutgoingMessage::new(0, 0, MessageType::Data), 0.0)
            .unwrap();

        let received = receiver.receive_message(1.0).unwrap().unwrap();
        assert_eq!(received.header.message_type, MessageType::Data);
        assert_eq!(receiver.stats().packets_rejected, 1);
    }

    #[test]
    fn test_malformed_skipped() {
        let registry = NetworkRegistry::new();
        let mut receiver = manager(&registry, 3, 5001);
        registry.deliver(
            SocketAddr::new(LISTEN_IP, 7),
            SocketAddr::new(LISTEN_IP, 5001),
            &[0, 3, 1, 2],
            0.0,
        );

        assert!(receiver.receive_message(1.0).unwrap().is_none());
        assert_eq!(receiver.stats().packets_rejected, 1);
    }

    #[test]
    fn test_oversize_datagram_rejected() {
        let registry = NetworkRegistry::new();
        let mut sender = manager(&registry, 3, 5000);
        let mut receiver = manager(&registry, 3, 5001);
        let target = SocketAddr::new(LISTEN_IP, 5001);

        let mut large = OutgoingMessage::data(42).with_payload(vec![7u8; 2000]);
        sender.send_to(target, &mut large, 0.0).unwrap();
        let mut exact = OutgoingMessage::data(43).with_payload(vec![1u8; 1024 - 2 - HEADER_LEN]);
        sender.send_to(target, &mut exact, 0.0).unwrap();

        let received = receiver.receive_message(1.0).unwrap().unwrap();
        assert_eq!(received.header.action, 43);
        assert_eq!(received.data_length(), 1024 - 2 - HEADER_LEN);
        assert!(receiver.receive_message(1.0).unwrap().is_none());
        assert_eq!(receiver.stats().packets_rejected, 1);
        assert_eq!(receiver.stats().packets_received, 1);
    }

    #[test]
    fn test_frame_over_datagram_limit_not_sent() {
        let registry = NetworkRegistry::new();
        let mut sender = manager(&registry, 3, 5000);
        let mut message = OutgoingMessage::data(1).with_payload(vec![0u8; MAX_DATAGRAM_SIZE]);

        let result = sender.send_to(SocketAddr::new(LISTEN_IP, 5001), &mut message, 0.0);
        assert!(matches!(
            result,
            Err(NetError::FrameTooLarge { max: MAX_DATAGRAM_SIZE, .. })
        ));
        assert!(!result.unwrap_err().is_transient());
        assert_eq!(sender.stats().packets_sent, 0);
        assert_eq!(registry.in_flight(), 0);
    }

    #[test]
    fn test_unbound_receive_fails() {
        let mut manager = TransportManager::new(UdpEmulator::with_seed(NetworkRegistry::new(), 0), 1);
        assert!(matches!(manager.receive_message(0.0), Err(NetError::NotBound)));
        assert!(matches!(
            manager.send_message(&mut OutgoingMessage::data(0), 0.0),
            Err(NetError::NotBound)
        ));
    }
}
