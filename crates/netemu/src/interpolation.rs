use std::collections::BTreeMap;

const MAX_UPDATE_SPEED: f64 = 2.5;
const SPEED_STEP: f64 = 1.1;
const SPEED_CONVERGENCE: f64 = 1.2;

/// A captured state sample, keyed the same way as
/// [`UpdateMessage`](crate::net::UpdateMessage).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateInfo {
    pub time: f64,
    pub continuous_values: BTreeMap<u16, f64>,
    pub discrete_values: BTreeMap<u16, f64>,
}

impl UpdateInfo {
    pub fn new(
        time: f64,
        continuous_values: BTreeMap<u16, f64>,
        discrete_values: BTreeMap<u16, f64>,
    ) -> Self {
        Self {
            time,
            continuous_values,
            discrete_values,
        }
    }

    pub fn find_continuous_value(&self, key: u16) -> Option<f64> {
        self.continuous_values.get(&key).copied()
    }

    pub fn find_discrete_value(&self, key: u16) -> Option<f64> {
        self.discrete_values.get(&key).copied()
    }

    pub fn find_value(&self, key: u16) -> Option<f64> {
        self.find_continuous_value(key)
            .or_else(|| self.find_discrete_value(key))
    }
}

#[derive(Debug, Clone)]
pub struct InterpolationConfig {
    /// Gap in ms after which the local clock jumps to the newest sample.
    pub update_delay_threshold_ms: f64,
    /// How many average frame gaps may be extrapolated past the newest sample.
    pub extrapolated_samples: f64,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            update_delay_threshold_ms: 10_000.0,
            extrapolated_samples: 2.0,
        }
    }
}

/// Linear interpolation between the two most recent update samples, with a
/// playback speed that speeds up when behind and slows down when ahead.
#[derive(Debug)]
pub struct Interpolator {
    config: InterpolationConfig,
    messages_received: u32,
    init_time: f64,
    previous: Option<UpdateInfo>,
    current: UpdateInfo,
    next: Option<UpdateInfo>,
    update_speed: f64,
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new(InterpolationConfig::default())
    }
}

impl Interpolator {
    pub fn new(config: InterpolationConfig) -> Self {
        Self {
            config,
            messages_received: 0,
            init_time: 0.0,
            previous: None,
            current: UpdateInfo::default(),
            next: None,
            update_speed: 1.0,
        }
    }

    pub fn current_update(&self) -> &UpdateInfo {
        &self.current
    }

    pub fn update_speed(&self) -> f64 {
        self.update_speed
    }

    pub fn messages_received(&self) -> u32 {
        self.messages_received
    }

    pub fn reset(&mut self) {
        self.messages_received = 0;
        self.init_time = 0.0;
        self.previous = None;
        self.next = None;
        self.update_speed = 1.0;
        self.current = UpdateInfo::default();
    }

    pub fn accept_update_message(&mut self, sample: UpdateInfo) {
        if self.previous.is_none() {
            self.init_time = sample.time;
            self.messages_received = 1;
            self.current.time = sample.time;
            self.previous = Some(sample);
        } else if self.next.is_none() {
            self.next = Some(sample);
            self.messages_received += 1;
        } else {
            self.previous = self.next.replace(sample);
            self.messages_received += 1;
        }
    }

    /// Advances the local clock by `delta` ms and recomputes current values.
    pub fn update(&mut self, delta: f64) {
        let (Some(previous), Some(next)) = (&self.previous, &self.next) else {
            return;
        };

        if (self.current.time - next.time).abs() > self.config.update_delay_threshold_ms {
            self.current.time = next.time;
            self.messages_received = 1;
            self.init_time = next.time;
        }

        let average_frame_gap =
            (next.time - self.init_time).floor() / f64::from(self.messages_received);
        let can_advance = self.current.time < next.time
            || (self.current.time - next.time)
                < average_frame_gap * self.config.extrapolated_samples;
        if !can_advance {
            return;
        }

        self.current.time += delta * self.update_speed;

        if self.current.time < previous.time {
            if self.update_speed < MAX_UPDATE_SPEED {
                self.update_speed *= SPEED_STEP;
            }
        } else if self.current.time > next.time {
            if self.update_speed > 1.0 {
                self.update_speed /= SPEED_STEP;
            }
        } else if self.update_speed > 1.0 {
            self.update_speed = (self.update_speed / SPEED_CONVERGENCE).max(1.0);
        } else if self.update_speed < 1.0 {
            self.update_speed = (self.update_speed * SPEED_CONVERGENCE).min(1.0);
        }

        let span = next.time - previous.time;
        let ratio = if span > 0.0 {
            (self.current.time - previous.time) / span
        } else {
            1.0
        };

        for (key, next_value) in &next.continuous_values {
            let previous_value = previous
                .continuous_values
                .get(key)
                .copied()
                .unwrap_or(*next_value);
            let value = previous_value + (next_value - previous_value) * ratio;
            self.current.continuous_values.insert(*key, value);
        }
        self.current
            .discrete_values
            .clone_from(&next.discrete_values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(time: f64, value: f64) -> UpdateInfo {
        let mut info = UpdateInfo {
            time,
            ..Default::default()
        };
        info.continuous_values.insert(1, value);
        info.discrete_values.insert(2, time);
        info
    }

    #[test]
    fn test_needs_two_samples() {
        let mut interpolator = Interpolator::default();
        interpolator.accept_update_message(sample(0.0, 0.0));
        interpolator.update(16.0);

        assert_eq!(interpolator.current_update().time, 0.0);
        assert!(interpolator.current_update().continuous_values.is_empty());
    }

    #[test]
    fn test_linear_interpolation() {
        let mut interpolator = Interpolator::default();
        interpolator.accept_update_message(sample(0.0, 0.0));
        interpolator.accept_update_message(sample(100.0, 10.0));
        interpolator.update(50.0);

        let current = interpolator.current_update();
        assert!((current.time - 50.0).abs() < 1e-9);
        assert!((current.find_continuous_value(1).unwrap() - 5.0).abs() < 1e-9);
        assert_eq!(current.find_discrete_value(2), Some(100.0));
        assert_eq!(interpolator.update_speed(), 1.0);
    }

    #[test]
    fn test_speeds_up_when_behind() {
        let mut interpolator = Interpolator::default();
        interpolator.accept_update_message(sample(0.0, 0.0));
        interpolator.accept_update_message(sample(100.0, 10.0));
        interpolator.accept_update_message(sample(200.0, 20.0));
        interpolator.update(10.0);

        assert!(interpolator.update_speed() > 1.0);
        assert_eq!(interpolator.messages_received(), 3);
    }

    #[test]
    fn test_long_gap_resets_clock() {
        let mut interpolator = Interpolator::default();
        interpolator.accept_update_message(sample(0.0, 0.0));
        interpolator.accept_update_message(sample(20_000.0, 10.0));
        interpolator.update(16.0);

        assert_eq!(interpolator.current_update().time, 20_000.0);
        assert_eq!(interpolator.messages_received(), 1);
    }

    #[test]
    fn test_reset() {
        let mut interpolator = Interpolator::default();
        interpolator.accept_update_message(sample(0.0, 0.0));
        interpolator.accept_update_message(sample(100.0, 10.0));
        interpolator.update(50.0);
        interpolator.reset();

        assert_eq!(interpolator.messages_received(), 0);
        assert_eq!(interpolator.current_update(), &UpdateInfo::default());
    }
}
