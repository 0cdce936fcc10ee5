use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;

use log::info;

use netemu::net::Cadence;
use netemu::{
    ClientConfig, HostConfig, Interpolator, LinkConditions, MessageType, NetError, NetEvent,
    NetworkClient, NetworkHost, NetworkRegistry, NetworkState, NetworkStats, OutgoingMessage,
    Transport, UdpEmulator, UpdateMessage,
};

use crate::events::{Origin, SimEvent};

/// Action of the per-tick state samples.
pub const SAMPLE_ACTION: i64 = 1;
/// Action of the host's periodic reliable announcement.
pub const ANNOUNCE_ACTION: i64 = 2;

const POSITION_KEY: u16 = 1;
const COUNTER_KEY: u16 = 2;
/// Host samples carry each peer's last position under `PEER_KEY_BASE + id`.
const PEER_KEY_BASE: u16 = 1000;
const SAMPLE_FREQUENCY: f64 = 10.0;
const ANNOUNCE_FREQUENCY: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct ScenarioSettings {
    pub clients: usize,
    pub application_id: u16,
    pub host_port: u16,
    pub tick_ms: f64,
    pub conditions: LinkConditions,
    pub seed: u64,
    pub client: ClientConfig,
    pub host: HostConfig,
}

#[derive(Debug)]
struct SimClient {
    network: NetworkClient<UdpEmulator>,
    interpolator: Interpolator,
    sampling: Cadence,
    samples_sent: u64,
    announcements: u64,
}

#[derive(Debug, Clone)]
pub struct PeerRow {
    pub id: u16,
    pub addr: SocketAddr,
    pub postponed: bool,
    pub unconfirmed: usize,
    pub silent_ms: f64,
    pub last_value: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ClientRow {
    pub index: usize,
    pub state: NetworkState,
    pub client_id: u16,
    pub interpolated: Option<f64>,
    pub update_speed: f64,
    pub announcements: u64,
}

#[derive(Debug, Clone)]
pub struct SimStats {
    pub time_ms: f64,
    pub conditions: LinkConditions,
    pub in_flight: usize,
    pub host: NetworkStats,
    pub clients_total: NetworkStats,
    pub peers: Vec<PeerRow>,
    pub clients: Vec<ClientRow>,
}

impl SimStats {
    pub fn connected_clients(&self) -> usize {
        self.clients
            .iter()
            .filter(|client| client.state == NetworkState::Connected)
            .count()
    }
}

/// One host and its clients on a shared emulated network, stepped on a
/// simulated clock.
#[derive(Debug)]
pub struct Simulation {
    registry: NetworkRegistry,
    host: NetworkHost<UdpEmulator>,
    clients: Vec<SimClient>,
    conditions: LinkConditions,
    tick_ms: f64,
    time: f64,
    host_sampling: Cadence,
    announcing: Cadence,
    announcements_sent: i64,
    peer_values: BTreeMap<u16, f64>,
    pending_events: VecDeque<SimEvent>,
}

impl Simulation {
    pub fn new(settings: ScenarioSettings) -> Result<Self, NetError> {
        let registry = NetworkRegistry::new();

        let emulator = UdpEmulator::with_seed(registry.clone(), settings.seed)
            .with_conditions(settings.conditions);
        let mut host = NetworkHost::new(emulator, settings.host.clone());
        host.init_host(settings.application_id, settings.host_port)?;

        let client_config = ClientConfig {
            auto_connect: true,
            ..settings.client.clone()
        };
        let mut clients = Vec::with_capacity(settings.clients);
        for index in 0..settings.clients {
            let seed = settings.seed.wrapping_add(index as u64 + 1);
            let emulator = UdpEmulator::with_seed(registry.clone(), seed)
                .with_conditions(settings.conditions);
            let mut network = NetworkClient::new(emulator, client_config.clone());
            let port = settings.host_port.wrapping_add(index as u16 + 1);
            network.init_client(settings.application_id, port, settings.host_port, None)?;

            clients.push(SimClient {
                network,
                interpolator: Interpolator::default(),
                sampling: Cadence::new(SAMPLE_FREQUENCY),
                samples_sent: 0,
                announcements: 0,
            });
        }

        info!(
            "Simulating {} clients against host port {} (lag {}ms, drop {:.0}%)",
            settings.clients,
            settings.host_port,
            settings.conditions.lag_ms,
            settings.conditions.packet_drop_ratio * 100.0
        );

        Ok(Self {
            registry,
            host,
            clients,
            conditions: settings.conditions,
            tick_ms: settings.tick_ms,
            time: 0.0,
            host_sampling: Cadence::new(SAMPLE_FREQUENCY),
            announcing: Cadence::new(ANNOUNCE_FREQUENCY),
            announcements_sent: 0,
            peer_values: BTreeMap::new(),
            pending_events: VecDeque::new(),
        })
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn tick_ms(&self) -> f64 {
        self.tick_ms
    }

    pub fn conditions(&self) -> LinkConditions {
        self.conditions
    }

    /// Applies new lag and loss to every socket.
    pub fn set_conditions(&mut self, conditions: LinkConditions) {
        let conditions = LinkConditions::new(conditions.lag_ms, conditions.packet_drop_ratio);
        self.conditions = conditions;
        self.host
            .network_mut()
            .transport_mut()
            .set_conditions(conditions);
        for client in &mut self.clients {
            client
                .network
                .network_mut()
                .transport_mut()
                .set_conditions(conditions);
        }
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = SimEvent> + '_ {
        self.pending_events.drain(..)
    }

    fn record(&mut self, origin: Origin, event: NetEvent) {
        self.pending_events.push_back(SimEvent {
            time: self.time,
            origin,
            event,
        });
    }

    pub fn step(&mut self) -> Result<(), NetError> {
        let time = self.time;
        let delta = self.tick_ms;

        for index in 0..self.clients.len() {
            self.step_client(index, delta, time)?;
        }

        self.host.on_update(delta, time)?;
        let events: Vec<NetEvent> = self.host.drain_events().collect();
        for event in events {
            self.on_host_event(&event);
            self.record(Origin::Host, event);
        }
        self.feed_host(time);

        self.time += delta;
        Ok(())
    }

    fn step_client(&mut self, index: usize, delta: f64, time: f64) -> Result<(), NetError> {
        let client = &mut self.clients[index];
        client.network.on_update(delta, time)?;

        let events: Vec<NetEvent> = client.network.drain_events().collect();
        for event in &events {
            let NetEvent::MessageReceived(message) = event else {
                continue;
            };
            if message.header.message_type != MessageType::Data {
                continue;
            }
            match message.header.action {
                SAMPLE_ACTION => {
                    if let Ok(update) = message.parse_data::<UpdateMessage>() {
                        client
                            .interpolator
                            .accept_update_message(update.into_info(message.header.timestamp));
                    }
                }
                ANNOUNCE_ACTION => client.announcements += 1,
                _ => {}
            }
        }
        client.interpolator.update(delta);

        if client.network.is_connected() && client.sampling.fire(time) {
            client.samples_sent += 1;
            let phase = (time / 1000.0) + index as f64;
            let update = UpdateMessage::new()
                .with_continuous(POSITION_KEY, phase.sin() * 10.0)
                .with_discrete(COUNTER_KEY, client.samples_sent as f64);
            client.network.push_message_for_sending(
                OutgoingMessage::data(SAMPLE_ACTION)
                    .with_payload(update)
                    .update_sample(true),
            );
        }

        for event in events {
            self.record(Origin::Client(index), event);
        }
        Ok(())
    }

    fn on_host_event(&mut self, event: &NetEvent) {
        match event {
            NetEvent::MessageReceived(message) if message.header.action == SAMPLE_ACTION => {
                if let Ok(update) = message.parse_data::<UpdateMessage>() {
                    if let Some(value) = update.continuous_values.get(&POSITION_KEY) {
                        self.peer_values.insert(message.header.peer_id, *value);
                    }
                }
            }
            NetEvent::Disconnected { peer_id, .. } => {
                self.peer_values.remove(peer_id);
            }
            _ => {}
        }
    }

    /// Host world state: the last position of every peer, plus a reliable
    /// announcement now and then.
    fn feed_host(&mut self, time: f64) {
        if self.host.peers().is_empty() {
            return;
        }

        if self.host_sampling.fire(time) {
            let mut update = UpdateMessage::new();
            for (peer_id, value) in &self.peer_values {
                update
                    .continuous_values
                    .insert(PEER_KEY_BASE.saturating_add(*peer_id), *value);
            }
            update.continuous_values.insert(POSITION_KEY, (time / 1000.0).cos());
            self.host.push_message_for_sending(
                OutgoingMessage::data(SAMPLE_ACTION)
                    .with_payload(update)
                    .update_sample(true),
                None,
            );
        }

        if self.announcing.fire(time) {
            self.announcements_sent += 1;
            let payload = self.announcements_sent.to_be_bytes().to_vec();
            self.host.push_message_for_sending(
                OutgoingMessage::data(ANNOUNCE_ACTION)
                    .with_payload(payload)
                    .reliable(true),
                None,
            );
        }
    }

    pub fn shutdown(&mut self) {
        let time = self.time;
        for client in &mut self.clients {
            client.network.close(time);
        }
        self.host.shutdown();
    }

    pub fn stats(&self) -> SimStats {
        let peers = self
            .host
            .peers()
            .iter()
            .map(|peer| PeerRow {
                id: peer.id,
                addr: peer.addr,
                postponed: peer.postponed,
                unconfirmed: peer.channel.unconfirmed_ids().len(),
                silent_ms: peer.silent_for(self.time),
                last_value: self.peer_values.get(&peer.id).copied(),
            })
            .collect();

        let mut clients_total = NetworkStats::default();
        let clients = self
            .clients
            .iter()
            .enumerate()
            .map(|(index, client)| {
                let stats = client.network.stats();
                clients_total.packets_sent += stats.packets_sent;
                clients_total.packets_received += stats.packets_received;
                clients_total.packets_dropped += stats.packets_dropped;
                clients_total.packets_rejected += stats.packets_rejected;
                clients_total.bytes_sent += stats.bytes_sent;
                clients_total.bytes_received += stats.bytes_received;

                ClientRow {
                    index,
                    state: client.network.network_state(),
                    client_id: client.network.client_id(),
                    interpolated: client
                        .interpolator
                        .current_update()
                        .find_continuous_value(POSITION_KEY),
                    update_speed: client.interpolator.update_speed(),
                    announcements: client.announcements,
                }
            })
            .collect();

        SimStats {
            time_ms: self.time,
            conditions: self.conditions,
            in_flight: self.registry.in_flight(),
            host: self.host.stats(),
            clients_total,
            peers,
            clients,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.host.network().transport().local_addr()
    }
}
