/// A periodic action running at `frequency` times per second on the
/// caller-supplied millisecond clock. Never-fired cadences are due at once.
#[derive(Debug, Clone)]
pub struct Cadence {
    period_ms: f64,
    last: Option<f64>,
}

impl Cadence {
    pub fn new(frequency: f64) -> Self {
        Self {
            period_ms: period_ms(frequency),
            last: None,
        }
    }

    pub fn period_ms(&self) -> f64 {
        self.period_ms
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }

    pub fn is_due(&self, now: f64) -> bool {
        self.last.is_none_or(|last| now - last > self.period_ms)
    }

    pub fn mark(&mut self, now: f64) {
        self.last = Some(now);
    }

    pub fn fire(&mut self, now: f64) -> bool {
        let due = self.is_due(now);
        if due {
            self.mark(now);
        }
        due
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

pub fn period_ms(frequency: f64) -> f64 {
    1000.0 / frequency
}

pub fn timed_out(last: f64, now: f64, timeout_secs: f64) -> bool {
    now - last > timeout_secs * 1000.0
}
