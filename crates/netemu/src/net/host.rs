use std::collections::VecDeque;
use std::net::SocketAddr;

use log::{debug, info, trace, warn};

use super::cadence::{Cadence, period_ms};
use super::config::HostConfig;
use super::connection::{PeerContext, PeerTable};
use super::error::NetError;
use super::events::{DisconnectReason, NetEvent};
use super::manager::TransportManager;
use super::protocol::{IncomingMessage, MessageType, OutgoingMessage};
use super::stats::NetworkStats;
use super::transport::Transport;

#[derive(Debug)]
pub struct NetworkHost<T: Transport> {
    config: HostConfig,
    network: TransportManager<T>,
    initialized: bool,
    host_port: u16,
    peers: PeerTable,
    sending: Cadence,
    last_update_time: f64,
    pending_events: VecDeque<NetEvent>,
}

impl<T: Transport> NetworkHost<T> {
    pub fn new(transport: T, config: HostConfig) -> Self {
        Self {
            network: TransportManager::new(transport, 0),
            initialized: false,
            host_port: 0,
            peers: PeerTable::new(config.confirmed_history),
            sending: Cadence::new(config.sending_frequency),
            last_update_time: 0.0,
            pending_events: VecDeque::new(),
            config,
        }
    }

    pub fn init_host(&mut self, application_id: u16, host_port: u16) -> Result<SocketAddr, NetError> {
        if self.initialized {
            return Err(NetError::AlreadyInitialized);
        }

        self.network.set_application_id(application_id);
        let local_addr = self
            .network
            .setup_receiver(host_port, self.config.receive_buffer_size)?;
        self.host_port = local_addr.port();
        self.initialized = true;

        info!(
            "Initialized host for application {} on {}",
            application_id, local_addr
        );
        Ok(local_addr)
    }

    /// Queues a message for one peer, or for every peer when `peer_id` is
    /// `None`. Messages for unknown peers are dropped.
    pub fn push_message_for_sending(&mut self, message: OutgoingMessage, peer_id: Option<u16>) {
        match peer_id {
            Some(id) => {
                if let Some(peer) = self.peers.get_mut(id) {
                    peer.channel.push(message);
                } else {
                    trace!("Dropping message for unknown peer {}", id);
                }
            }
            None => {
                for peer in self.peers.iter_mut() {
                    peer.channel.push(message.clone());
                }
            }
        }
    }

    /// Sends DISCONNECT to the peer and forgets it.
    pub fn close_peer(&mut self, peer_id: u16) -> bool {
        let Some(addr) = self.peers.get(peer_id).map(|peer| peer.addr) else {
            return false;
        };

        info!("Closing peer {}", peer_id);
        let mut message = OutgoingMessage::new(0, peer_id, MessageType::Disconnect);
        if let Err(e) = self
            .network
            .send_to(addr, &mut message, self.last_update_time)
        {
            debug!("Disconnect to peer {} failed: {}", peer_id, e);
        }
        self.remove_peer(peer_id, DisconnectReason::Closed);
        true
    }

    /// Registers a peer at `addr` without waiting for its CONNECT_REQUEST.
    pub fn connect_to_peer(&mut self, addr: SocketAddr) -> Result<u16, NetError> {
        if !self.initialized {
            return Err(NetError::NotInitialized);
        }

        let peer_id = self
            .peers
            .connect(addr, self.last_update_time)
            .ok_or(NetError::PeersExhausted)?;
        info!("Assigned peer id {} to {}", peer_id, addr);
        Ok(peer_id)
    }

    pub fn on_update(&mut self, _delta: f64, time: f64) -> Result<(), NetError> {
        if !self.initialized {
            return Ok(());
        }

        self.last_update_time = time;
        self.handle_listening(time)?;
        self.handle_communicating(time);
        Ok(())
    }

    fn handle_listening(&mut self, time: f64) -> Result<(), NetError> {
        while let Some(message) = self.network.receive_message(time)? {
            if message.header.peer_id != 0 {
                self.process_peer_message(message, time);
                continue;
            }

            match message.header.message_type {
                MessageType::DiscoverRequest => {
                    debug!("Received discover request from {}", message.source());
                    let response = OutgoingMessage::new(0, 0, MessageType::DiscoverResponse);
                    self.send_control(message.source(), response, time);
                }
                MessageType::ConnectRequest => self.accept_connection(message.source(), time),
                other => trace!("Ignoring {:?} from unassigned peer", other),
            }
        }
        Ok(())
    }

    fn accept_connection(&mut self, addr: SocketAddr, time: f64) {
        let peer_id = match self.peers.get_by_addr_mut(&addr) {
            Some(peer) => {
                // a retried request, the first response was lost or is still on its way
                debug!("Peer {} at {} asked to connect again", peer.id, addr);
                peer.touch(time);
                peer.postponed = false;
                peer.receive_tracker.reset();
                peer.id
            }
            None => match self.peers.connect(addr, time) {
                Some(id) => {
                    info!("Connected peer {} at {}", id, addr);
                    self.pending_events
                        .push_back(NetEvent::Connected { peer_id: id, addr });
                    id
                }
                None => {
                    warn!("No free peer id for {}", addr);
                    return;
                }
            },
        };

        let response = OutgoingMessage::new(0, peer_id, MessageType::ConnectResponse);
        self.send_control(addr, response, time);
    }

    fn send_control(&mut self, addr: SocketAddr, mut message: OutgoingMessage, time: f64) {
        if let Err(e) = self.network.send_to(addr, &mut message, time) {
            warn!(
                "Failed to send {:?} to {}: {}",
                message.header.message_type, addr, e
            );
        }
    }

    fn process_peer_message(&mut self, message: IncomingMessage, time: f64) {
        let header = message.header;
        let source = message.source();
        let Some(peer) = self.peers.get_mut(header.peer_id) else {
            if header.message_type == MessageType::ConnectRequest {
                // evicted peers come back as new ones
                self.accept_connection(source, time);
            } else {
                trace!("Ignoring message from unknown peer {}", header.peer_id);
            }
            return;
        };

        let was_postponed = std::mem::replace(&mut peer.postponed, false);
        match header.message_type {
            MessageType::Data | MessageType::Accept => {
                peer.touch(time);
                if header.confirm_id != 0 && peer.channel.confirm(header.confirm_id) {
                    debug!(
                        "Received confirmation of {} from {}",
                        header.confirm_id, peer.id
                    );
                }
                if header.message_type == MessageType::Data && peer.receive_tracker.accept(&header) {
                    self.pending_events
                        .push_back(NetEvent::MessageReceived(message));
                }
            }
            MessageType::Disconnect => {
                info!("Peer {} has disconnected", header.peer_id);
                self.remove_peer(header.peer_id, DisconnectReason::Graceful);
            }
            MessageType::ConnectRequest => {
                peer.touch(time);
                let moved = peer.addr != source;
                self.peers.update_addr(header.peer_id, source);
                if was_postponed || moved {
                    info!("Peer {} reconnected from {}", header.peer_id, source);
                    self.pending_events.push_back(NetEvent::Connected {
                        peer_id: header.peer_id,
                        addr: source,
                    });
                }
                let response = OutgoingMessage::new(0, header.peer_id, MessageType::ConnectResponse);
                self.send_control(source, response, time);
            }
            MessageType::Beacon => peer.touch(time),
            other => trace!("Ignoring {:?} from peer {}", other, header.peer_id),
        }
    }

    fn handle_communicating(&mut self, time: f64) {
        for peer_id in self
            .peers
            .postpone_silent(time, self.config.postpone_timeout_secs)
        {
            info!(
                "No message received from peer {} for {}s, connection marked as lost",
                peer_id, self.config.postpone_timeout_secs
            );
            self.pending_events
                .push_back(NetEvent::ConnectionLost { peer_id });
        }

        for peer_id in self
            .peers
            .expired(time, self.config.disconnect_timeout_secs)
        {
            info!(
                "No message received from peer {} for {}s, disconnecting",
                peer_id, self.config.disconnect_timeout_secs
            );
            self.remove_peer(peer_id, DisconnectReason::Timeout);
        }

        if !self.sending.fire(time) {
            return;
        }

        let beacon_period = period_ms(self.config.beacon_frequency);
        for peer in self.peers.iter_mut().filter(|peer| !peer.postponed) {
            let batch = peer.channel.drain_host_batch(peer.id, time, beacon_period);
            for mut message in batch {
                let Err(e) = self.network.send_to(peer.addr, &mut message, time) else {
                    continue;
                };
                warn!(
                    "Failed to send message {} to peer {}: {}",
                    message.header.sequence_id, peer.id, e
                );
                if message.header.is_reliable && !e.is_transient() {
                    peer.channel.discard(message.header.sequence_id);
                }
            }
        }
    }

    fn remove_peer(&mut self, peer_id: u16, reason: DisconnectReason) -> Option<PeerContext> {
        let peer = self.peers.remove(peer_id)?;
        self.pending_events
            .push_back(NetEvent::Disconnected { peer_id, reason });
        Some(peer)
    }

    pub fn shutdown(&mut self) {
        for peer_id in self.peers.ids() {
            self.close_peer(peer_id);
        }
        self.network.close();
        self.initialized = false;
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = NetEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn host_port(&self) -> u16 {
        self.host_port
    }

    pub fn application_id(&self) -> u16 {
        self.network.application_id()
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn peer(&self, peer_id: u16) -> Option<&PeerContext> {
        self.peers.get(peer_id)
    }

    pub fn config(&self) -> &HostConfig {
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
