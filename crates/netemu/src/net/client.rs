use std::collections::{BTreeSet, VecDeque};
use std::net::{IpAddr, SocketAddr};

use log::{debug, info, trace, warn};

use super::cadence::{Cadence, period_ms, timed_out};
use super::config::ClientConfig;
use super::error::NetError;
use super::events::{DisconnectReason, NetEvent};
use super::manager::TransportManager;
use super::protocol::{IncomingMessage, MessageType, OutgoingMessage};
use super::stats::NetworkStats;
use super::tracking::{OutgoingChannel, ReceiveTracker};
use super::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    None,
    Discovering,
    Connecting,
    Connected,
}

impl NetworkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkState::None => "none",
            NetworkState::Discovering => "discovering",
            NetworkState::Connecting => "connecting",
            NetworkState::Connected => "connected",
        }
    }
}

#[derive(Debug)]
pub struct NetworkClient<T: Transport> {
    config: ClientConfig,
    network: TransportManager<T>,
    state: NetworkState,
    client_id: u16,
    client_port: u16,
    host_port: u16,
    host_ip: Option<IpAddr>,
    host_addr: Option<SocketAddr>,
    discovered_hosts: BTreeSet<SocketAddr>,
    last_received_time: Option<f64>,
    receive_tracker: ReceiveTracker,
    channel: OutgoingChannel,
    broadcasting: Cadence,
    connecting: Cadence,
    sending: Cadence,
    pending_events: VecDeque<NetEvent>,
}

impl<T: Transport> NetworkClient<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self {
            network: TransportManager::new(transport, 0),
            state: NetworkState::None,
            client_id: 0,
            client_port: 0,
            host_port: 0,
            host_ip: None,
            host_addr: None,
            discovered_hosts: BTreeSet::new(),
            last_received_time: None,
            receive_tracker: ReceiveTracker::new(config.confirmed_history),
            channel: OutgoingChannel::new(),
            broadcasting: Cadence::new(config.broadcasting_frequency),
            connecting: Cadence::new(config.connecting_frequency),
            sending: Cadence::new(config.sending_frequency),
            pending_events: VecDeque::new(),
            config,
        }
    }

    /// Binds `client_port` and starts looking for a host on `host_port`,
    /// either at `host_ip` or at the configured broadcast addresses.
    /// Calling it again starts over.
    pub fn init_client(
        &mut self,
        application_id: u16,
        client_port: u16,
        host_port: u16,
        host_ip: Option<IpAddr>,
    ) -> Result<SocketAddr, NetError> {
        if self.state != NetworkState::None {
            self.network.close();
        }

        self.network.set_application_id(application_id);
        self.client_port = client_port;
        self.host_port = host_port;
        self.host_ip = host_ip;

        let local_addr = self
            .network
            .setup_receiver(client_port, self.config.receive_buffer_size)?;
        info!(
            "Initialized client for application {} on {} (host port {})",
            application_id, local_addr, host_port
        );

        self.restart();
        Ok(local_addr)
    }

    fn restart(&mut self) {
        self.state = NetworkState::Discovering;
        self.client_id = 0;
        self.host_addr = None;
        self.last_received_time = None;
        self.receive_tracker.reset();
        self.channel.reset();
        self.broadcasting.reset();
        self.connecting.reset();
        self.sending.reset();
    }

    /// Queues a message for the next send cycle. Outside of the connected
    /// state only the latest message is kept.
    pub fn push_message_for_sending(&mut self, message: OutgoingMessage) {
        if self.state != NetworkState::Connected {
            self.channel.clear_queue();
        }
        self.channel.push(message);
    }

    pub fn close(&mut self, time: f64) {
        if self.state == NetworkState::None {
            return;
        }
        info!("Closing client {}", self.client_id);

        if self.state == NetworkState::Connected {
            if let Some(host) = self.host_addr {
                let mut message =
                    OutgoingMessage::new(0, self.client_id, MessageType::Disconnect);
                if let Err(e) = self.network.send_to(host, &mut message, time) {
                    debug!("Disconnect to host {} failed: {}", host, e);
                }
            }
        }

        self.network.close();
        self.restart();
        self.state = NetworkState::None;
    }

    pub fn on_update(&mut self, _delta: f64, time: f64) -> Result<(), NetError> {
        match self.state {
            NetworkState::None => Ok(()),
            NetworkState::Discovering => self.handle_discovering(time),
            NetworkState::Connecting => self.handle_connecting(time),
            NetworkState::Connected => self.handle_connected(time),
        }
    }

    pub fn connect_to_host(&mut self, addr: SocketAddr) {
        info!("Connecting to host {}", addr);
        self.host_addr = Some(addr);
        self.network.setup_sender(addr);
        self.connecting.reset();
        self.state = NetworkState::Connecting;
    }

    fn discovery_targets(&self) -> Vec<SocketAddr> {
        match self.host_ip {
            Some(ip) => vec![SocketAddr::new(ip, self.host_port)],
            None => self
                .config
                .broadcast_addresses
                .iter()
                .map(|ip| SocketAddr::new(*ip, self.host_port))
                .collect(),
        }
    }

    fn handle_discovering(&mut self, time: f64) -> Result<(), NetError> {
        if self.broadcasting.fire(time) {
            debug!("Broadcasting discover request");
            for target in self.discovery_targets() {
                let mut message = OutgoingMessage::new(0, 0, MessageType::DiscoverRequest);
                if let Err(e) = self.network.send_to(target, &mut message, time) {
                    debug!("Discover request to {} failed: {}", target, e);
                }
            }
        }

        while let Some(message) = self.network.receive_message(time)? {
            if message.header.message_type != MessageType::DiscoverResponse {
                trace!("Ignoring {:?} while discovering", message.header.message_type);
                continue;
            }

            let host = message.source();
            if self.discovered_hosts.insert(host) {
                info!("Found host {}", host);
            }
            self.last_received_time = Some(time);
            self.pending_events.push_back(NetEvent::MessageReceived(message));

            if self.config.auto_connect {
                self.connect_to_host(host);
                break;
            }
        }
        Ok(())
    }

    fn handle_connecting(&mut self, time: f64) -> Result<(), NetError> {
        let Some(host) = self.host_addr else {
            self.restart();
            return Ok(());
        };

        if self.connecting.fire(time) {
            let mut request = OutgoingMessage::new(0, self.client_id, MessageType::ConnectRequest);
            if let Err(e) = self.network.send_to(host, &mut request, time) {
                warn!("Connect request to {} failed: {}", host, e);
            }
        }

        let last_received = *self.last_received_time.get_or_insert(time);

        while let Some(message) = self.network.receive_message(time)? {
            if message.header.message_type == MessageType::ConnectResponse {
                self.on_connect_response(&message, time);
                return Ok(());
            }
            trace!("Ignoring {:?} while connecting", message.header.message_type);
        }

        if timed_out(last_received, time, self.config.disconnect_timeout_secs) {
            info!(
                "No message received from host for {}s, disconnecting",
                self.config.disconnect_timeout_secs
            );
            self.pending_events.push_back(NetEvent::Disconnected {
                peer_id: self.client_id,
                reason: DisconnectReason::Timeout,
            });
            self.restart();
        }
        Ok(())
    }

    fn on_connect_response(&mut self, message: &IncomingMessage, time: f64) {
        let peer_id = message.header.peer_id;
        info!(
            "Connected to host {}, assigned peer id {}",
            message.source(),
            peer_id
        );

        if peer_id != self.client_id {
            // a new id means a fresh context on the host
            self.receive_tracker.reset();
            self.channel.reset();
        }
        self.client_id = peer_id;
        self.last_received_time = Some(time);
        self.sending.reset();
        self.state = NetworkState::Connected;
        self.pending_events.push_back(NetEvent::Connected {
            peer_id,
            addr: message.source(),
        });
    }

    fn handle_connected(&mut self, time: f64) -> Result<(), NetError> {
        while let Some(message) = self.network.receive_message(time)? {
            match message.header.message_type {
                MessageType::Data => {
                    self.last_received_time = Some(time);
                    self.process_data(message);
                }
                MessageType::Beacon | MessageType::Accept | MessageType::ConnectResponse => {
                    self.last_received_time = Some(time);
                }
                MessageType::Disconnect => {
                    info!("Host closed the connection of client {}", self.client_id);
                    self.pending_events.push_back(NetEvent::Disconnected {
                        peer_id: self.client_id,
                        reason: DisconnectReason::Graceful,
                    });
                    self.restart();
                    return Ok(());
                }
                other => trace!("Ignoring {:?} while connected", other),
            }
        }

        if self.sending.is_due(time) {
            self.send_messages(time);
        }

        let last_received = self.last_received_time.unwrap_or(time);
        if timed_out(last_received, time, self.config.reconnect_timeout_secs) {
            info!(
                "No message received from host for {}s, reconnecting",
                self.config.reconnect_timeout_secs
            );
            self.state = NetworkState::Connecting;
            self.connecting.reset();
            self.pending_events.push_back(NetEvent::ConnectionLost {
                peer_id: self.client_id,
            });
        }
        Ok(())
    }

    fn process_data(&mut self, message: IncomingMessage) {
        let header = message.header;
        if header.is_reliable {
            debug!("Received reliable message {}", header.sequence_id);
            self.channel.queue_confirmation(header.sequence_id);
        }
        if self.receive_tracker.accept(&header) {
            self.pending_events.push_back(NetEvent::MessageReceived(message));
        }
    }

    fn send_messages(&mut self, time: f64) {
        let Some(host) = self.host_addr else {
            return;
        };

        let beacon_period = period_ms(self.config.beacon_frequency);
        let batch = self
            .channel
            .drain_client_batch(self.client_id, time, beacon_period);
        if batch.is_empty() {
            return;
        }

        self.sending.mark(time);
        for mut message in batch {
            if let Err(e) = self.network.send_to(host, &mut message, time) {
                warn!(
                    "Failed to send message {} to host: {}",
                    message.header.sequence_id, e
                );
            }
        }
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = NetEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn network_state(&self) -> NetworkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == NetworkState::Connected
    }

    pub fn client_id(&self) -> u16 {
        self.client_id
    }

    pub fn application_id(&self) -> u16 {
        self.network.application_id()
    }

    pub fn client_port(&self) -> u16 {
        self.client_port
    }

    pub fn host_addr(&self) -> Option<SocketAddr> {
        self.host_addr
    }

    pub fn discovered_hosts(&self) -> &BTreeSet<SocketAddr> {
        &self.discovered_hosts
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn stats(&self) -> NetworkStats {
        self.network.stats()
    }

    pub fn network(&self) -> &TransportManager<T> {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut TransportManager<T> {
        &mut self.network
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::{MAX_DATAGRAM_SIZE, decode_frame, encode_frame};
    use crate::net::simulator::{LISTEN_IP, NetworkRegistry, UdpEmulator};

    const APP: u16 = 11;

    fn client(registry: &NetworkRegistry, config: ClientConfig) -> NetworkClient<UdpEmulator> {
        let mut client = NetworkClient::new(UdpEmulator::with_seed(registry.clone(), 1), config);
        client
            .init_client(APP, 9001, 9000, Some(LISTEN_IP))
            .unwrap();
        client
    }

    fn fake_host(registry: &NetworkRegistry) -> UdpEmulator {
        let mut host = UdpEmulator::with_seed(registry.clone(), 2);
        host.bind(9000).unwrap();
        host
    }

    fn poll(host: &mut UdpEmulator, time: f64) -> Vec<IncomingMessage> {
        let mut buffer = [0u8; 512];
        let mut messages = Vec::new();
        while let Some((size, source)) = host.receive(&mut buffer, time).unwrap() {
            if let Some(message) = decode_frame(APP, &buffer[..size], source).unwrap() {
                messages.push(message);
            }
        }
        messages
    }

    fn reply(host: &mut UdpEmulator, message: OutgoingMessage, time: f64) {
        let frame = encode_frame(APP, &message).unwrap();
        host.send_to(&frame, SocketAddr::new(LISTEN_IP, 9001), time)
            .unwrap();
    }

    fn connect(client: &mut NetworkClient<UdpEmulator>, host: &mut UdpEmulator, peer_id: u16) {
        client.connect_to_host(SocketAddr::new(LISTEN_IP, 9000));
        client.on_update(0.0, 0.0).unwrap();
        reply(host, OutgoingMessage::new(1, peer_id, MessageType::ConnectResponse), 1.0);
        client.on_update(16.0, 16.0).unwrap();
        poll(host, 16.0);
        assert!(client.is_connected());
    }

    #[test]
    fn test_unsendable_message_is_skipped() {
        let registry = NetworkRegistry::new();
        let mut host = fake_host(&registry);
        let mut client = client(&registry, ClientConfig::default());
        connect(&mut client, &mut host, 5);

        client.push_message_for_sending(
            OutgoingMessage::data(1).with_payload(vec![0u8; MAX_DATAGRAM_SIZE]),
        );
        client.push_message_for_sending(OutgoingMessage::data(2));
        client.on_update(16.0, 200.0).unwrap();

        let sent = poll(&mut host, 201.0);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header.action, 2);
        assert!(client.is_connected());
    }

    #[test]
    fn test_discovery_without_auto_connect() {
        let registry = NetworkRegistry::new();
        let mut host = fake_host(&registry);
        let mut client = client(&registry, ClientConfig::default());
        assert_eq!(client.network_state(), NetworkState::Discovering);

        client.on_update(0.0, 0.0).unwrap();
        let requests = poll(&mut host, 1.0);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].header.message_type, MessageType::DiscoverRequest);

        // next broadcast only after the broadcasting period
        client.on_update(16.0, 1000.0).unwrap();
        assert!(poll(&mut host, 1001.0).is_empty());

        reply(&mut host, OutgoingMessage::new(1, 0, MessageType::DiscoverResponse), 1001.0);
        client.on_update(16.0, 1016.0).unwrap();

        assert_eq!(client.network_state(), NetworkState::Discovering);
        assert!(client.discovered_hosts().contains(&SocketAddr::new(LISTEN_IP, 9000)));
        let events: Vec<NetEvent> = client.drain_events().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], NetEvent::MessageReceived(_)));
    }

    #[test]
    fn test_broadcast_fallback_addresses() {
        let registry = NetworkRegistry::new();
        let mut client = NetworkClient::new(
            UdpEmulator::with_seed(registry.clone(), 1),
            ClientConfig::default(),
        );
        client.init_client(APP, 9001, 9000, None).unwrap();
        client.on_update(0.0, 0.0).unwrap();

        assert_eq!(registry.in_flight(), 3);
        assert_eq!(registry.in_flight_to(SocketAddr::new(LISTEN_IP, 9000)), 1);
    }

    #[test]
    fn test_connect_adopts_peer_id() {
        let registry = NetworkRegistry::new();
        let mut host = fake_host(&registry);
        let mut client = client(&registry, ClientConfig::default());
        connect(&mut client, &mut host, 42);

        assert_eq!(client.client_id(), 42);
        let events: Vec<NetEvent> = client.drain_events().collect();
        assert_eq!(
            events,
            vec![NetEvent::Connected {
                peer_id: 42,
                addr: SocketAddr::new(LISTEN_IP, 9000)
            }]
        );
    }

    #[test]
    fn test_connecting_times_out() {
        let registry = NetworkRegistry::new();
        let mut client = client(&registry, ClientConfig::default());
        client.connect_to_host(SocketAddr::new(LISTEN_IP, 9000));

        client.on_update(0.0, 0.0).unwrap();
        client.on_update(16.0, 12_000.0).unwrap();
        assert_eq!(client.network_state(), NetworkState::Connecting);

        client.on_update(16.0, 12_001.0).unwrap();
        assert_eq!(client.network_state(), NetworkState::Discovering);
        let events: Vec<NetEvent> = client.drain_events().collect();
        assert_eq!(events[0].action(), crate::net::events::NET_DISCONNECTED);
    }

    #[test]
    fn test_reliable_data_is_confirmed_and_deduplicated() {
        let registry = NetworkRegistry::new();
        let mut host = fake_host(&registry);
        let mut client = client(&registry, ClientConfig::default());
        connect(&mut client, &mut host, 3);
        client.drain_events().count();

        let mut reliable = OutgoingMessage::data(9)
            .with_payload(vec![1u8])
            .with_timestamp(500.0)
            .reliable(true);
        reliable.header.sequence_id = 1;
        reliable.header.peer_id = 3;

        reply(&mut host, reliable.clone(), 100.0);
        reply(&mut host, reliable, 100.0);
        client.on_update(16.0, 200.0).unwrap();

        let received: Vec<NetEvent> = client.drain_events().collect();
        assert_eq!(received.len(), 1);

        let sent = poll(&mut host, 201.0);
        let accepts: Vec<_> = sent
            .iter()
            .filter(|m| m.header.message_type == MessageType::Accept)
            .collect();
        assert_eq!(accepts.len(), 1);
        assert_eq!(accepts[0].header.confirm_id, 1);
    }

    #[test]
    fn test_reconnect_keeps_id() {
        let registry = NetworkRegistry::new();
        let mut host = fake_host(&registry);
        let mut client = client(&registry, ClientConfig::default());
        connect(&mut client, &mut host, 5);
        client.drain_events().count();

        client.on_update(16.0, 6_016.0).unwrap();
        assert_eq!(client.network_state(), NetworkState::Connected);
        client.on_update(16.0, 6_017.0).unwrap();
        assert_eq!(client.network_state(), NetworkState::Connecting);
        assert_eq!(client.client_id(), 5);
        assert_eq!(
            client.drain_events().collect::<Vec<_>>(),
            vec![NetEvent::ConnectionLost { peer_id: 5 }]
        );

        client.on_update(16.0, 6_033.0).unwrap();
        let requests = poll(&mut host, 6_034.0);
        let request = requests
            .iter()
            .find(|m| m.header.message_type == MessageType::ConnectRequest)
            .unwrap();
        assert_eq!(request.header.peer_id, 5);
    }

    #[test]
    fn test_host_disconnect_restarts_discovery() {
        let registry = NetworkRegistry::new();
        let mut host = fake_host(&registry);
        let mut client = client(&registry, ClientConfig::default());
        connect(&mut client, &mut host, 2);
        client.drain_events().count();

        reply(&mut host, OutgoingMessage::new(0, 2, MessageType::Disconnect), 20.0);
        client.on_update(16.0, 40.0).unwrap();

        assert_eq!(client.network_state(), NetworkState::Discovering);
        assert_eq!(client.client_id(), 0);
        assert_eq!(
            client.drain_events().collect::<Vec<_>>(),
            vec![NetEvent::Disconnected {
                peer_id: 2,
                reason: DisconnectReason::Graceful
            }]
        );
    }

    #[test]
    fn test_close_sends_disconnect() {
        let registry = NetworkRegistry::new();
        let mut host = fake_host(&registry);
        let mut client = client(&registry, ClientConfig::default());
        connect(&mut client, &mut host, 4);

        client.close(50.0);
        assert_eq!(client.network_state(), NetworkState::None);
        let sent = poll(&mut host, 51.0);
        assert_eq!(sent.last().unwrap().header.message_type, MessageType::Disconnect);
        assert_eq!(sent.last().unwrap().header.peer_id, 4);

        // closed clients stay idle
        client.on_update(16.0, 100.0).unwrap();
        assert_eq!(registry.in_flight(), 0);
    }
}
