//! Chip core boundary
//!
//! The synthesis core that turns register writes into samples is supplied by
//! an implementation of [`ChipCore`]. The [`ChipAdapter`] owns one core per
//! track and is the only thing the register-stream path talks to.

pub mod ssg;

pub use ssg::SsgCore;

/// Anything that accepts chip register writes.
///
/// The register-stream interpreter forwards every write to a sink; the
/// session fans it out to the chip adapter and the voice-activity tracker.
pub trait RegisterSink {
    /// Write `value` to register `reg`.
    fn write_reg(&mut self, reg: u8, value: u8);
}

/// Register-level synthesis core running at its own native sample rate.
///
/// # Example
///
/// ```
/// use chipdeck::{ChipCore, SsgCore};
///
/// let mut core = SsgCore::with_clock(3_993_600);
/// core.write_reg(0x08, 0x0F); // SSG A volume
/// core.write_reg(0x07, 0x3E); // tone A on
/// let sample = core.render_one_native_sample();
/// # let _ = sample;
/// ```
pub trait ChipCore: Send {
    /// Create a core for a chip driven by `clock_hz`.
    fn with_clock(clock_hz: u32) -> Self
    where
        Self: Sized;

    /// Reset the core to its power-on state.
    fn reset(&mut self);

    /// Write one register (address then data).
    fn write_reg(&mut self, addr: u8, value: u8);

    /// Render one mono sample at the native rate.
    fn render_one_native_sample(&mut self) -> i16;

    /// Native output rate in Hz.
    fn native_sample_rate(&self) -> u32;
}

/// Owns the chip core of the current register-stream track.
#[derive(Debug)]
pub struct ChipAdapter<C: ChipCore> {
    core: C,
    clock_hz: u32,
    native_rate: u32,
}

impl<C: ChipCore> ChipAdapter<C> {
    /// Create an adapter around a fresh core for `clock_hz`.
    pub fn new(clock_hz: u32) -> Self {
        let core = C::with_clock(clock_hz);
        let native_rate = core.native_sample_rate();
        ChipAdapter {
            core,
            clock_hz,
            native_rate,
        }
    }

    /// Chip clock the core was built for.
    pub fn clock_hz(&self) -> u32 {
        self.clock_hz
    }

    /// Native sample rate of the core.
    pub fn native_sample_rate(&self) -> u32 {
        self.native_rate
    }

    /// Render one native sample.
    #[inline]
    pub fn render_one(&mut self) -> i16 {
        self.core.render_one_native_sample()
    }

    /// Borrow the wrapped core.
    pub fn core(&self) -> &C {
        &self.core
    }
}

impl<C: ChipCore> RegisterSink for ChipAdapter<C> {
    #[inline]
    fn write_reg(&mut self, reg: u8, value: u8) {
        self.core.write_reg(reg, value);
    }
}
