use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConditions {
    /// Minimum age in ms a datagram must reach before it can be received.
    pub lag_ms: f64,
    /// Probability that a sent datagram is lost (0 = never, 1 = always).
    pub packet_drop_ratio: f64,
}

impl LinkConditions {
    pub fn new(lag_ms: f64, packet_drop_ratio: f64) -> Self {
        Self {
            lag_ms: lag_ms.max(0.0),
            packet_drop_ratio: packet_drop_ratio.clamp(0.0, 1.0),
        }
    }

    pub fn should_drop<R: Rng>(&self, rng: &mut R) -> bool {
        if self.packet_drop_ratio <= 0.0 {
            return false;
        }
        rng.random::<f64>() < self.packet_drop_ratio
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    /// Datagrams of a foreign application or that failed to decode.
    pub packets_rejected: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_drop_ratio_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let never = LinkConditions::new(0.0, 0.0);
        let always = LinkConditions::new(0.0, 1.0);

        for _ in 0..1000 {
            assert!(!never.should_drop(&mut rng));
            assert!(always.should_drop(&mut rng));
        }
    }

    #[test]
    fn test_drop_ratio_is_roughly_respected() {
        let mut rng = StdRng::seed_from_u64(42);
        let half = LinkConditions::new(0.0, 0.5);
        let dropped = (0..10_000).filter(|_| half.should_drop(&mut rng)).count();
        assert!((4_000..6_000).contains(&dropped));
    }

    #[test]
    fn test_new_clamps() {
        let conditions = LinkConditions::new(-5.0, 3.0);
        assert_eq!(conditions.lag_ms, 0.0);
        assert_eq!(conditions.packet_drop_ratio, 1.0);
    }
}
