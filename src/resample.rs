//! Fixed-point resamplers
//!
//! Both resamplers keep a 16.16 phase: the low 16 bits are the fractional
//! position between the two middle history samples and every carry past
//! `1 << 16` pulls exactly one new native sample. Samples are pulled through
//! a closure so the caller decides what "one native sample" means (one chip
//! render, or one entry of a rendered tracker block).

/// One whole native sample in phase units.
const PHASE_ONE: u32 = 1 << 16;
const PHASE_MASK: u32 = PHASE_ONE - 1;

/// Phase increment per output sample for a `native -> output` conversion.
///
/// # Example
///
/// ```
/// use chipdeck::resample::phase_step;
///
/// assert_eq!(phase_step(44_100, 44_100), 1 << 16);
/// assert_eq!(phase_step(22_050, 44_100), 1 << 15);
/// ```
pub fn phase_step(native_rate: u32, output_rate: u32) -> u32 {
    if output_rate == 0 {
        return PHASE_ONE;
    }
    (((native_rate as u64) << 16) / output_rate as u64).clamp(1, u32::MAX as u64) as u32
}

#[inline]
fn clamp_i16(v: i64) -> i16 {
    v.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}

/// Two-tap linear interpolator used on the register-stream path.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    step: u32,
    phase: u32,
    s0: i16,
    s1: i16,
    pulled: u64,
}

impl LinearResampler {
    /// Create a resampler for `native_rate -> output_rate`.
    pub fn new(native_rate: u32, output_rate: u32) -> Self {
        LinearResampler {
            step: phase_step(native_rate, output_rate),
            phase: 0,
            s0: 0,
            s1: 0,
            pulled: 0,
        }
    }

    /// Fill the history with the first two native samples.
    pub fn prime<F: FnMut() -> i16>(&mut self, mut pull: F) {
        self.phase = 0;
        self.s0 = pull();
        self.s1 = pull();
        self.pulled = 2;
    }

    /// Produce one output sample, pulling native samples as the phase carries.
    #[inline]
    pub fn next_sample<F: FnMut() -> i16>(&mut self, mut pull: F) -> i16 {
        let t = (self.phase & PHASE_MASK) as i64;
        let s0 = self.s0 as i64;
        let out = s0 + (((self.s1 as i64 - s0) * t) >> 16);

        self.phase += self.step;
        while self.phase >= PHASE_ONE {
            self.phase -= PHASE_ONE;
            self.s0 = self.s1;
            self.s1 = pull();
            self.pulled += 1;
        }
        clamp_i16(out)
    }

    /// Phase increment per output sample.
    pub fn step(&self) -> u32 {
        self.step
    }

    /// Native samples pulled since priming.
    pub fn pulled(&self) -> u64 {
        self.pulled
    }
}

/// Four-tap Catmull-Rom interpolator used on the tracker path.
#[derive(Debug, Clone)]
pub struct CubicResampler {
    step: u32,
    phase: u32,
    /// `[s-1, s0, s1, s2]`, interpolating between `s0` and `s1`
    hist: [i16; 4],
    pulled: u64,
}

impl CubicResampler {
    /// Create a resampler for `native_rate -> output_rate`.
    pub fn new(native_rate: u32, output_rate: u32) -> Self {
        CubicResampler {
            step: phase_step(native_rate, output_rate),
            phase: 0,
            hist: [0; 4],
            pulled: 0,
        }
    }

    /// Fill the history with the first four native samples.
    pub fn prime<F: FnMut() -> i16>(&mut self, mut pull: F) {
        self.phase = 0;
        for slot in self.hist.iter_mut() {
            *slot = pull();
        }
        self.pulled = 4;
    }

    /// Produce one output sample, pulling native samples as the phase carries.
    #[inline]
    pub fn next_sample<F: FnMut() -> i16>(&mut self, mut pull: F) -> i16 {
        let out = Self::interpolate(self.hist, self.phase & PHASE_MASK);

        self.phase += self.step;
        while self.phase >= PHASE_ONE {
            self.phase -= PHASE_ONE;
            self.hist = [self.hist[1], self.hist[2], self.hist[3], pull()];
            self.pulled += 1;
        }
        out
    }

    fn interpolate(hist: [i16; 4], t: u32) -> i16 {
        let [sm1, s0, s1, s2] = hist.map(|s| s as i64);
        let t = t as i64;
        let t2 = (t * t) >> 16;
        let t3 = (t2 * t) >> 16;

        let a0 = 2 * s0;
        let a1 = -sm1 + s1;
        let a2 = 2 * sm1 - 5 * s0 + 4 * s1 - s2;
        let a3 = -sm1 + 3 * s0 - 3 * s1 + s2;

        let y = (a0 + ((a1 * t) >> 16) + ((a2 * t2) >> 16) + ((a3 * t3) >> 16)) >> 1;
        clamp_i16(y)
    }

    /// Phase increment per output sample.
    pub fn step(&self) -> u32 {
        self.step
    }

    /// Native samples pulled since priming.
    pub fn pulled(&self) -> u64 {
        self.pulled
    }
}

/// One-pole IIR low-pass in Q15: `y += alpha * (x - y)`.
#[derive(Debug, Clone)]
pub struct OnePoleLowPass {
    alpha_q15: i32,
    /// Filter state in Q15
    state: i64,
}

impl OnePoleLowPass {
    /// Create a filter; `alpha_q15 <= 0` disables it.
    pub fn new(alpha_q15: i32) -> Self {
        OnePoleLowPass {
            alpha_q15: alpha_q15.min(1 << 15),
            state: 0,
        }
    }

    /// Whether the filter modifies its input.
    pub fn is_enabled(&self) -> bool {
        self.alpha_q15 > 0
    }

    /// Filter one sample.
    #[inline]
    pub fn process(&mut self, x: i16) -> i16 {
        if self.alpha_q15 <= 0 {
            return x;
        }
        let x = (x as i64) << 15;
        self.state += (self.alpha_q15 as i64 * (x - self.state)) >> 15;
        clamp_i16(self.state >> 15)
    }

    /// Clear the filter state.
    pub fn reset(&mut self) {
        self.state = 0;
    }
}
