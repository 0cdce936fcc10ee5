use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

use super::cadence::timed_out;
use super::tracking::{OutgoingChannel, ReceiveTracker};

#[derive(Debug)]
pub struct PeerContext {
    pub id: u16,
    pub addr: SocketAddr,
    pub last_received_time: f64,
    pub receive_tracker: ReceiveTracker,
    pub channel: OutgoingChannel,
    /// Silent for too long; kept but no longer sent to.
    pub postponed: bool,
}

impl PeerContext {
    pub fn new(id: u16, addr: SocketAddr, time: f64, confirmed_history: usize) -> Self {
        Self {
            id,
            addr,
            last_received_time: time,
            receive_tracker: ReceiveTracker::new(confirmed_history),
            channel: OutgoingChannel::new(),
            postponed: false,
        }
    }

    pub fn touch(&mut self, time: f64) {
        self.last_received_time = time;
    }

    pub fn silent_for(&self, time: f64) -> f64 {
        time - self.last_received_time
    }
}

#[derive(Debug)]
pub struct PeerTable {
    peers: BTreeMap<u16, PeerContext>,
    peers_by_addr: HashMap<SocketAddr, u16>,
    next_peer_id: u16,
    confirmed_history: usize,
}

impl PeerTable {
    pub fn new(confirmed_history: usize) -> Self {
        Self {
            peers: BTreeMap::new(),
            peers_by_addr: HashMap::new(),
            next_peer_id: 1,
            confirmed_history,
        }
    }

    /// Next free id. Ids start at 1, never hand out 0 and skip ids in use
    /// once the counter wraps.
    fn allocate_id(&mut self) -> Option<u16> {
        if self.peers.len() >= usize::from(u16::MAX) {
            return None;
        }
        loop {
            let id = self.next_peer_id;
            self.next_peer_id = self.next_peer_id.wrapping_add(1).max(1);
            if !self.peers.contains_key(&id) {
                return Some(id);
            }
        }
    }

    pub fn connect(&mut self, addr: SocketAddr, time: f64) -> Option<u16> {
        let id = self.allocate_id()?;
        let peer = PeerContext::new(id, addr, time, self.confirmed_history);
        self.peers.insert(id, peer);
        self.peers_by_addr.insert(addr, id);
        Some(id)
    }

    pub fn get(&self, id: u16) -> Option<&PeerContext> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: u16) -> Option<&mut PeerContext> {
        self.peers.get_mut(&id)
    }

    pub fn id_by_addr(&self, addr: &SocketAddr) -> Option<u16> {
        self.peers_by_addr.get(addr).copied()
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut PeerContext> {
        let id = self.id_by_addr(addr)?;
        self.peers.get_mut(&id)
    }

    pub fn update_addr(&mut self, id: u16, addr: SocketAddr) {
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        if peer.addr == addr {
            return;
        }
        if self.peers_by_addr.get(&peer.addr) == Some(&id) {
            self.peers_by_addr.remove(&peer.addr);
        }
        peer.addr = addr;
        self.peers_by_addr.insert(addr, id);
    }

    pub fn remove(&mut self, id: u16) -> Option<PeerContext> {
        let peer = self.peers.remove(&id)?;
        if self.peers_by_addr.get(&peer.addr) == Some(&id) {
            self.peers_by_addr.remove(&peer.addr);
        }
        Some(peer)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<u16> {
        self.peers.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerContext> {
        self.peers.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerContext> {
        self.peers.values_mut()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Marks peers silent for longer than `timeout_secs` as postponed and
    /// returns the ids that were newly marked.
    pub fn postpone_silent(&mut self, time: f64, timeout_secs: f64) -> Vec<u16> {
        self.peers
            .values_mut()
            .filter(|peer| !peer.postponed && timed_out(peer.last_received_time, time, timeout_secs))
            .map(|peer| {
                peer.postponed = true;
                peer.id
            })
            .collect()
    }

    pub fn expired(&self, time: f64, timeout_secs: f64) -> Vec<u16> {
        self.peers
            .values()
            .filter(|peer| peer.postponed && timed_out(peer.last_received_time, time, timeout_secs))
            .map(|peer| peer.id)
            .collect()
    }
}
