//! Global backpressure with hysteresis.
//!
//! Pressure turns on when queue depth rises above the high watermark and
//! only turns off once it falls below the low one, so the mode does not
//! flap while depth hovers around a single threshold.

/// Mode change reported by [`PressureGauge::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureChange {
    Entered,
    Exited,
}

#[derive(Debug, Clone)]
pub struct PressureGauge {
    high: usize,
    low: usize,
    active: bool,
    last_depth: usize,
}

impl PressureGauge {
    pub fn new(high: usize, low: usize) -> Self {
        Self {
            high,
            low: low.min(high),
            active: false,
            last_depth: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn last_depth(&self) -> usize {
        self.last_depth
    }

    /// Feed the current depth; returns the transition, if any.
    pub fn update(&mut self, depth: usize) -> Option<PressureChange> {
        self.last_depth = depth;
        if !self.active && depth > self.high {
            self.active = true;
            tracing::warn!("🌡️ Queue pressure ON (depth {depth} > {})", self.high);
            return Some(PressureChange::Entered);
        }
        if self.active && depth < self.low {
            self.active = false;
            tracing::info!("🌡️ Queue pressure OFF (depth {depth} < {})", self.low);
            return Some(PressureChange::Exited);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hysteresis() {
        let mut g = PressureGauge::new(100, 20);
        assert_eq!(g.update(100), None);
        assert!(!g.is_active());
        assert_eq!(g.update(101), Some(PressureChange::Entered));
        // Between watermarks: stays on.
        assert_eq!(g.update(50), None);
        assert_eq!(g.update(20), None);
        assert!(g.is_active());
        assert_eq!(g.update(19), Some(PressureChange::Exited));
        // Between watermarks: stays off.
        assert_eq!(g.update(50), None);
        assert!(!g.is_active());
    }
}
