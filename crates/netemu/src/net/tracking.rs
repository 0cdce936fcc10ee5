use std::collections::{HashSet, VecDeque};

use super::config::DEFAULT_CONFIRMED_HISTORY;
use super::protocol::{MessageHeader, MessageType, OutgoingMessage, sequence_greater_than};

/// Hands out sequence ids 1, 2, ... wrapping past `u16::MAX` and skipping 0.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter {
    last: u16,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> u16 {
        self.last = self.last.wrapping_add(1);
        if self.last == 0 {
            self.last = 1;
        }
        self.last
    }

    pub fn last(&self) -> u16 {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = 0;
    }
}

/// Decides which inbound DATA messages reach the application.
///
/// Update samples are forwarded only when newer than the last forwarded
/// sequence id. Other messages are always forwarded, but a reliable message
/// already processed (same sequence id and timestamp) is dropped.
#[derive(Debug)]
pub struct ReceiveTracker {
    last_received: Option<u16>,
    processed: VecDeque<(u16, u64)>,
    processed_set: HashSet<(u16, u64)>,
    max_processed: usize,
}

impl Default for ReceiveTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIRMED_HISTORY)
    }
}

impl ReceiveTracker {
    pub fn new(max_processed: usize) -> Self {
        Self {
            last_received: None,
            processed: VecDeque::with_capacity(max_processed),
            processed_set: HashSet::with_capacity(max_processed),
            max_processed: max_processed.max(1),
        }
    }

    pub fn last_received(&self) -> Option<u16> {
        self.last_received
    }

    pub fn processed_len(&self) -> usize {
        self.processed.len()
    }

    pub fn accept(&mut self, header: &MessageHeader) -> bool {
        let key = (header.sequence_id, header.timestamp.to_bits());
        if header.is_reliable && self.processed_set.contains(&key) {
            return false;
        }

        let newer = self
            .last_received
            .is_none_or(|last| sequence_greater_than(header.sequence_id, last));
        if newer {
            self.last_received = Some(header.sequence_id);
        }
        if !newer && header.is_update_sample {
            return false;
        }

        if header.is_reliable {
            self.remember(key);
        }
        true
    }

    fn remember(&mut self, key: (u16, u64)) {
        while self.processed.len() >= self.max_processed {
            if let Some(oldest) = self.processed.pop_front() {
                self.processed_set.remove(&oldest);
            }
        }
        self.processed.push_back(key);
        self.processed_set.insert(key);
    }

    pub fn reset(&mut self) {
        self.last_received = None;
        self.processed.clear();
        self.processed_set.clear();
    }
}

/// Outgoing state of one connection: queued messages, ids waiting to be
/// confirmed to the remote side and reliable messages the remote side has
/// not confirmed yet.
#[derive(Debug, Default)]
pub struct OutgoingChannel {
    sequence: SequenceCounter,
    queue: Vec<OutgoingMessage>,
    confirmations: VecDeque<u16>,
    unconfirmed: Vec<OutgoingMessage>,
    last_send_time: Option<f64>,
}

impl OutgoingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: OutgoingMessage) {
        self.queue.push(message);
    }

    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn last_sent_id(&self) -> u16 {
        self.sequence.last()
    }

    pub fn last_send_time(&self) -> Option<f64> {
        self.last_send_time
    }

    /// Remembers a received reliable id to be confirmed. Ids already waiting
    /// are not queued twice.
    pub fn queue_confirmation(&mut self, sequence_id: u16) {
        if !self.confirmations.contains(&sequence_id) {
            self.confirmations.push_back(sequence_id);
        }
    }

    pub fn pending_confirmations(&self) -> usize {
        self.confirmations.len()
    }

    pub fn confirm(&mut self, sequence_id: u16) -> bool {
        let before = self.unconfirmed.len();
        self.unconfirmed
            .retain(|message| message.header.sequence_id != sequence_id);
        before != self.unconfirmed.len()
    }

    /// Gives up on a reliable message that can never be sent.
    pub fn discard(&mut self, sequence_id: u16) -> bool {
        self.confirm(sequence_id)
    }

    pub fn unconfirmed_ids(&self) -> Vec<u16> {
        self.unconfirmed
            .iter()
            .map(|message| message.header.sequence_id)
            .collect()
    }

    fn beacon_due(&self, time: f64, beacon_period_ms: f64) -> bool {
        self.last_send_time
            .is_none_or(|last| time - last > beacon_period_ms)
    }

    fn stamp(&mut self, mut message: OutgoingMessage, peer_id: u16) -> OutgoingMessage {
        message.header.sequence_id = self.sequence.next_id();
        message.header.peer_id = peer_id;
        message.header.message_type = MessageType::Data;
        message
    }

    fn control(peer_id: u16, message_type: MessageType, time: f64) -> OutgoingMessage {
        OutgoingMessage::new(0, peer_id, message_type).with_timestamp(time)
    }

    /// Client flush. Queued messages go out as DATA, each carrying at most
    /// one pending confirmation. With nothing queued, every pending
    /// confirmation goes out as its own ACCEPT. With nothing at all, a
    /// BEACON once `beacon_period_ms` has passed since the last send.
    pub fn drain_client_batch(
        &mut self,
        peer_id: u16,
        time: f64,
        beacon_period_ms: f64,
    ) -> Vec<OutgoingMessage> {
        let mut batch = Vec::new();

        if !self.queue.is_empty() {
            let mut counter = 0.0;
            for message in std::mem::take(&mut self.queue) {
                let mut message = self.stamp(message, peer_id);
                message.header.confirm_id = self.confirmations.pop_front().unwrap_or(0);
                if message.header.is_reliable {
                    message.header.timestamp = time + counter;
                    counter += 1.0;
                }
                batch.push(message);
            }
        } else if !self.confirmations.is_empty() {
            for confirm_id in self.confirmations.drain(..) {
                let mut accept = Self::control(peer_id, MessageType::Accept, time);
                accept.header.confirm_id = confirm_id;
                batch.push(accept);
            }
        } else if self.beacon_due(time, beacon_period_ms) {
            batch.push(Self::control(peer_id, MessageType::Beacon, time));
        }

        if !batch.is_empty() {
            self.last_send_time = Some(time);
        }
        batch
    }

    /// Host flush. Queued messages go out as DATA. Reliable ones get a
    /// distinct timestamp `time + n` and are kept until confirmed. Every
    /// reliable message still unconfirmed from earlier cycles is resent.
    /// With nothing to send, a BEACON once `beacon_period_ms` has passed.
    pub fn drain_host_batch(
        &mut self,
        peer_id: u16,
        time: f64,
        beacon_period_ms: f64,
    ) -> Vec<OutgoingMessage> {
        let resends = self.unconfirmed.clone();
        let mut batch = Vec::with_capacity(self.queue.len() + resends.len());

        let mut counter = 0.0;
        for message in std::mem::take(&mut self.queue) {
            let mut message = self.stamp(message, peer_id);
            if message.header.is_reliable {
                message.header.timestamp = time + counter;
                counter += 1.0;
                self.unconfirmed.push(message.clone());
            }
            batch.push(message);
        }
        batch.extend(resends);

        if batch.is_empty() && self.beacon_due(time, beacon_period_ms) {
            batch.push(Self::control(peer_id, MessageType::Beacon, time));
        }

        if !batch.is_empty() {
            self.last_send_time = Some(time);
        }
        batch
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(sequence_id: u16, reliable: bool, sample: bool) -> MessageHeader {
        let mut header = MessageHeader::new(sequence_id, 1, MessageType::Data);
        header.is_reliable = reliable;
        header.is_update_sample = sample;
        header.timestamp = f64::from(sequence_id) * 10.0;
        header
    }

    #[test]
    fn test_sequence_counter_skips_zero() {
        let mut counter = SequenceCounter { last: u16::MAX - 1 };
        assert_eq!(counter.next_id(), u16::MAX);
        assert_eq!(counter.next_id(), 1);
        assert_eq!(counter.next_id(), 2);
    }

    #[test]
    fn test_stale_samples_dropped() {
        let mut tracker = ReceiveTracker::default();
        assert!(tracker.accept(&data(1, false, true)));
        assert!(tracker.accept(&data(3, false, true)));
        assert!(!tracker.accept(&data(2, false, true)));
        assert!(!tracker.accept(&data(3, false, true)));
        assert!(tracker.accept(&data(4, false, true)));
        assert_eq!(tracker.last_received(), Some(4));
    }

    #[test]
    fn test_forwarded_samples_are_monotonic() {
        let mut tracker = ReceiveTracker::default();
        let arrivals = [5u16, 2, 7, 6, 9, 8, 10, 1];
        let forwarded: Vec<u16> = arrivals
            .iter()
            .copied()
            .filter(|id| tracker.accept(&data(*id, false, true)))
            .collect();

        assert_eq!(forwarded, vec![5, 7, 9, 10]);
    }

    #[test]
    fn test_wraparound_is_newer() {
        let mut tracker = ReceiveTracker::default();
        assert!(tracker.accept(&data(65534, false, true)));
        assert!(tracker.accept(&data(65535, false, true)));
        assert!(tracker.accept(&data(2, false, true)));
        assert!(!tracker.accept(&data(65533, false, true)));
        assert_eq!(tracker.last_received(), Some(2));
    }

    #[test]
    fn test_old_non_samples_still_forwarded() {
        let mut tracker = ReceiveTracker::default();
        assert!(tracker.accept(&data(10, false, true)));
        assert!(tracker.accept(&data(4, false, false)));
        assert_eq!(tracker.last_received(), Some(10));
    }

    #[test]
    fn test_reliable_duplicate_dropped() {
        let mut tracker = ReceiveTracker::default();
        let reliable = data(3, true, false);
        assert!(tracker.accept(&reliable));
        assert!(!tracker.accept(&reliable));

        let mut other_time = reliable;
        other_time.timestamp += 1.0;
        assert!(tracker.accept(&other_time));
    }

    #[test]
    fn test_processed_history_is_bounded() {
        let mut tracker = ReceiveTracker::new(4);
        for id in 1..=6 {
            assert!(tracker.accept(&data(id, true, false)));
        }
        assert_eq!(tracker.processed_len(), 4);
        // the oldest entries were evicted
        assert!(tracker.accept(&data(1, true, false)));
        assert!(!tracker.accept(&data(6, true, false)));
    }

    #[test]
    fn test_client_batch_piggybacks_confirmations() {
        let mut channel = OutgoingChannel::new();
        channel.queue_confirmation(7);
        channel.queue_confirmation(8);
        channel.queue_confirmation(7);
        channel.push(OutgoingMessage::data(1));

        let batch = channel.drain_client_batch(3, 1000.0, 500.0);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].header.sequence_id, 1);
        assert_eq!(batch[0].header.peer_id, 3);
        assert_eq!(batch[0].header.confirm_id, 7);
        assert_eq!(batch[0].header.message_type, MessageType::Data);

        let accepts = channel.drain_client_batch(3, 1100.0, 500.0);
        assert_eq!(accepts.len(), 1);
        assert_eq!(accepts[0].header.message_type, MessageType::Accept);
        assert_eq!(accepts[0].header.confirm_id, 8);
        assert_eq!(channel.pending_confirmations(), 0);
    }

    #[test]
    fn test_client_beacon_after_silence() {
        let mut channel = OutgoingChannel::new();
        let first = channel.drain_client_batch(3, 0.0, 500.0);
        assert_eq!(first[0].header.message_type, MessageType::Beacon);

        assert!(channel.drain_client_batch(3, 400.0, 500.0).is_empty());
        assert!(channel.drain_client_batch(3, 500.0, 500.0).is_empty());
        let beacon = channel.drain_client_batch(3, 501.0, 500.0);
        assert_eq!(beacon.len(), 1);
        assert_eq!(channel.last_send_time(), Some(501.0));
    }

    #[test]
    fn test_host_resends_until_confirmed() {
        let mut channel = OutgoingChannel::new();
        channel.push(OutgoingMessage::data(1).reliable(true));
        channel.push(OutgoingMessage::data(2).reliable(true));
        channel.push(OutgoingMessage::data(3));

        let first = channel.drain_host_batch(5, 1000.0, 500.0);
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].header.timestamp, 1000.0);
        assert_eq!(first[1].header.timestamp, 1001.0);
        assert_eq!(channel.unconfirmed_ids(), vec![1, 2]);

        let second = channel.drain_host_batch(5, 1100.0, 500.0);
        assert_eq!(second.len(), 2);
        assert_eq!(second[0], first[0]);

        assert!(channel.confirm(1));
        assert!(!channel.confirm(1));
        let third = channel.drain_host_batch(5, 1200.0, 500.0);
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].header.sequence_id, 2);

        channel.confirm(2);
        assert!(channel.drain_host_batch(5, 1300.0, 500.0).is_empty());
        let beacon = channel.drain_host_batch(5, 1800.5, 500.0);
        assert_eq!(beacon[0].header.message_type, MessageType::Beacon);
    }
}
