//! Smoothed level meters with peak hold

use crate::config::MeterTuning;

#[inline]
fn clamp01(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}

/// One smoothed meter: level, peak follower and held maximum, all in `0..=1`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeterState {
    /// Smoothed level
    pub val: f32,
    /// Second-stage peak follower
    pub peak: f32,
    /// Held maximum of `peak`
    pub hold: f32,
    /// Time `hold` was last raised
    pub hold_since_ms: u64,
}

impl MeterState {
    /// Move toward `target` by one update step.
    pub fn update(&mut self, target: f32, now_ms: u64, tuning: &MeterTuning) {
        let diff = clamp01(target) - self.val;
        let k = if diff > 0.0 {
            tuning.attack
        } else {
            tuning.release
        };
        self.val = clamp01(self.val + k * diff);

        let pd = self.val - self.peak;
        let k = if pd > 0.0 {
            tuning.peak_attack
        } else {
            tuning.peak_release
        };
        self.peak = clamp01(self.peak + k * pd);

        if self.peak > self.hold {
            self.hold = self.peak;
            self.hold_since_ms = now_ms;
        } else if now_ms.saturating_sub(self.hold_since_ms) > tuning.hold_ms as u64 {
            self.hold = clamp01(self.hold * tuning.hold_decay);
        }
    }
}

/// A bank of meters sharing one tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterSet {
    meters: Vec<MeterState>,
    tuning: MeterTuning,
}

impl MeterSet {
    /// `count` meters at rest.
    pub fn new(count: usize, tuning: MeterTuning) -> Self {
        MeterSet {
            meters: vec![MeterState::default(); count],
            tuning,
        }
    }

    /// Number of meters.
    pub fn len(&self) -> usize {
        self.meters.len()
    }

    /// True when the set has no meters.
    pub fn is_empty(&self) -> bool {
        self.meters.is_empty()
    }

    /// Tuning in use.
    pub fn tuning(&self) -> &MeterTuning {
        &self.tuning
    }

    /// Meter `index`, if present.
    pub fn get(&self, index: usize) -> Option<&MeterState> {
        self.meters.get(index)
    }

    /// All meters.
    pub fn meters(&self) -> &[MeterState] {
        &self.meters
    }

    /// Update meter `index` toward `target`; out-of-range indices are ignored.
    pub fn update(&mut self, index: usize, target: f32, now_ms: u64) {
        if let Some(meter) = self.meters.get_mut(index) {
            meter.update(target, now_ms, &self.tuning);
        }
    }

    /// Change the meter count, resetting every meter.
    pub fn resize(&mut self, count: usize) {
        self.meters.clear();
        self.meters.resize(count, MeterState::default());
    }

    /// Put every meter back at rest.
    pub fn reset(&mut self) {
        self.meters.fill(MeterState::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_attack_and_release() {
        let tuning = MeterTuning::voices();
        let mut m = MeterState::default();
        m.update(1.0, 0, &tuning);
        assert_relative_eq!(m.val, 0.75);
        assert_relative_eq!(m.peak, 0.75 * 0.55);
        m.update(0.0, 10, &tuning);
        assert_relative_eq!(m.val, 0.75 * 0.75);
    }

    #[test]
    fn test_target_is_clamped() {
        let tuning = MeterTuning::voices();
        let mut m = MeterState::default();
        for t in 0..50 {
            m.update(3.0, t, &tuning);
        }
        assert!(m.val <= 1.0 && m.peak <= 1.0 && m.hold <= 1.0);
    }

    #[test]
    fn test_hold_only_decays_after_hold_time() {
        let tuning = MeterTuning::voices();
        let mut m = MeterState::default();
        for t in 0..20 {
            m.update(1.0, t, &tuning);
        }
        let held = m.hold;
        let since = m.hold_since_ms;

        // Silence: peak drops below hold; hold stays until the hold time passes.
        let mut now = since;
        while now <= since + tuning.hold_ms as u64 {
            m.update(0.0, now, &tuning);
            assert_relative_eq!(m.hold, held);
            now += 10;
        }

        let before = m.hold;
        m.update(0.0, now, &tuning);
        assert_relative_eq!(m.hold, before * tuning.hold_decay);
        let before = m.hold;
        m.update(0.0, now + 10, &tuning);
        assert_relative_eq!(m.hold, before * tuning.hold_decay);
    }

    #[test]
    fn test_set_ignores_out_of_range() {
        let mut set = MeterSet::new(6, MeterTuning::voices());
        set.update(9, 1.0, 0);
        set.update(2, 1.0, 0);
        assert_eq!(set.get(0).unwrap().val, 0.0);
        assert!(set.get(2).unwrap().val > 0.0);
        set.resize(16);
        assert_eq!(set.len(), 16);
        assert!(set.meters().iter().all(|m| m.val == 0.0));
    }
}
