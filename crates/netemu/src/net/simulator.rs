use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::rc::Rc;

use log::trace;
use rand::SeedableRng;
use rand::rngs::StdRng;

use super::stats::LinkConditions;
use super::transport::Transport;

pub const LISTEN_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
/// Datagrams queued for one address beyond this are dropped.
pub const MAX_QUEUED_DATAGRAMS: usize = 4096;

#[derive(Debug, Clone)]
struct InFlightDatagram {
    source: SocketAddr,
    data: Vec<u8>,
    sent_at: f64,
}

#[derive(Debug, Default)]
struct RegistryState {
    queues: HashMap<SocketAddr, VecDeque<InFlightDatagram>>,
}

/// The shared medium of a group of [`UdpEmulator`]s. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    state: Rc<RefCell<RegistryState>>,
}

impl NetworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `data` for `target`. Returns false when the queue is full.
    pub fn deliver(&self, source: SocketAddr, target: SocketAddr, data: &[u8], time: f64) -> bool {
        let mut state = self.state.borrow_mut();
        let queue = state.queues.entry(target).or_default();
        if queue.len() >= MAX_QUEUED_DATAGRAMS {
            return false;
        }
        queue.push_back(InFlightDatagram {
            source,
            data: data.to_vec(),
            sent_at: time,
        });
        true
    }

    fn poll(&self, addr: SocketAddr, time: f64, lag: f64) -> Option<InFlightDatagram> {
        let mut state = self.state.borrow_mut();
        let queue = state.queues.get_mut(&addr)?;
        match queue.front() {
            Some(head) if time - head.sent_at > lag => queue.pop_front(),
            _ => None,
        }
    }

    pub fn reset(&self) {
        self.state.borrow_mut().queues.clear();
    }

    pub fn in_flight(&self) -> usize {
        self.state.borrow().queues.values().map(VecDeque::len).sum()
    }

    pub fn in_flight_to(&self, addr: SocketAddr) -> usize {
        self.state
            .borrow()
            .queues
            .get(&addr)
            .map_or(0, VecDeque::len)
    }
}

/// In-memory [`Transport`] with configurable lag and packet loss.
///
/// Loss is decided on send, lag on receive: a datagram sent at `T` can be
/// received only when the poll time exceeds `T + lag`.
#[derive(Debug)]
pub struct UdpEmulator {
    registry: NetworkRegistry,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    conditions: LinkConditions,
    rng: StdRng,
    dropped: u64,
}

impl UdpEmulator {
    pub fn new(registry: NetworkRegistry) -> Self {
        Self::with_seed(registry, rand::random())
    }

    pub fn with_seed(registry: NetworkRegistry, seed: u64) -> Self {
        Self {
            registry,
            local_addr: None,
            remote_addr: None,
            conditions: LinkConditions::default(),
            rng: StdRng::seed_from_u64(seed),
            dropped: 0,
        }
    }

    pub fn with_conditions(mut self, conditions: LinkConditions) -> Self {
        self.set_conditions(conditions);
        self
    }

    pub fn conditions(&self) -> LinkConditions {
        self.conditions
    }

    pub fn set_conditions(&mut self, conditions: LinkConditions) {
        self.conditions = LinkConditions::new(conditions.lag_ms, conditions.packet_drop_ratio);
    }

    pub fn set_lag(&mut self, lag_ms: f64) {
        self.conditions.lag_ms = lag_ms.max(0.0);
    }

    pub fn set_packet_drop_ratio(&mut self, ratio: f64) {
        self.conditions.packet_drop_ratio = ratio.clamp(0.0, 1.0);
    }

    pub fn registry(&self) -> &NetworkRegistry {
        &self.registry
    }
}

impl Transport for UdpEmulator {
    fn bind(&mut self, port: u16) -> io::Result<SocketAddr> {
        let addr = SocketAddr::new(LISTEN_IP, port);
        self.local_addr = Some(addr);
        Ok(addr)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn connect(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn send_to(&mut self, data: &[u8], addr: SocketAddr, time: f64) -> io::Result<usize> {
        let source = self
            .local_addr
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "Emulator is not bound"))?;

        if self.conditions.should_drop(&mut self.rng) {
            self.dropped += 1;
            trace!("Emulated loss of {} bytes to {}", data.len(), addr);
            return Ok(data.len());
        }

        if !self.registry.deliver(source, addr, data, time) {
            self.dropped += 1;
            trace!("Queue for {} is full, dropping datagram", addr);
        }
        Ok(data.len())
    }

    fn receive(&mut self, buffer: &mut [u8], time: f64) -> io::Result<Option<(usize, SocketAddr)>> {
        let Some(local) = self.local_addr else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "Emulator is not bound",
            ));
        };

        let Some(datagram) = self.registry.poll(local, time, self.conditions.lag_ms) else {
            return Ok(None);
        };

        let copied = datagram.data.len().min(buffer.len());
        buffer[..copied].copy_from_slice(&datagram.data[..copied]);
        self.remote_addr = Some(datagram.source);
        Ok(Some((datagram.data.len(), datagram.source)))
    }

    fn close(&mut self) {
        self.remote_addr = None;
    }

    fn dropped_count(&self) -> u64 {
        self.dropped
    }
}
