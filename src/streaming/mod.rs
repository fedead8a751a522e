//! Audio output and buffering
//!
//! The [`BufferingEngine`] decides once per scheduler tick how many blocks to
//! synthesize; blocks go to an [`AudioSink`]. Two sinks ship with the crate:
//! a ring buffer shared with a playback thread ([`RingBufferSink`], feeding
//! the rodio [`AudioDevice`] under the `streaming` feature) and a WAV file
//! writer ([`WavSink`], `export-wav` feature).

pub mod buffering;
pub mod ring_buffer;

#[cfg(feature = "streaming")]
pub mod audio_device;
#[cfg(feature = "export-wav")]
pub mod wav;

#[cfg(feature = "streaming")]
pub use audio_device::AudioDevice;
pub use buffering::{BlockSource, BufferingEngine, FillState, PumpReport, PumpStop};
pub use ring_buffer::{RingBuffer, RingBufferConsumer, RingBufferSink};
#[cfg(feature = "export-wav")]
pub use wav::WavSink;

use std::cell::Cell;
use std::time::Instant;

/// Consumer back-off while the ring buffer is empty, in microseconds.
pub const BUFFER_BACKOFF_MICROS: u64 = 100;

/// Queue depth reported by a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Nothing queued; playback has run dry
    Idle,
    /// Audio is playing and at least one more block fits
    Accepting,
    /// No room for another block
    Full,
}

/// Destination for mono 16-bit output blocks.
pub trait AudioSink {
    /// Current queue depth.
    fn queue_state(&self) -> QueueState;

    /// Queue one block.
    fn submit(&mut self, block: &[i16]) -> crate::Result<()>;
}

/// Monotonic time source in microseconds.
pub trait Clock {
    /// Microseconds since an arbitrary fixed origin.
    fn now_us(&self) -> u64;

    /// Milliseconds since the same origin.
    fn now_ms(&self) -> u64 {
        self.now_us() / 1_000
    }
}

/// Wall-clock time via [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Clock starting at zero now.
    pub fn new() -> Self {
        MonotonicClock {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Manually advanced clock, for offline rendering and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
    auto_step: u64,
}

impl ManualClock {
    /// Clock at `start_us` that only moves when advanced.
    pub fn new(start_us: u64) -> Self {
        ManualClock {
            now: Cell::new(start_us),
            auto_step: 0,
        }
    }

    /// Clock that also moves forward `step_us` on every read.
    pub fn stepping(start_us: u64, step_us: u64) -> Self {
        ManualClock {
            now: Cell::new(start_us),
            auto_step: step_us,
        }
    }

    /// Move the clock forward.
    pub fn advance_us(&self, us: u64) {
        self.now.set(self.now.get() + us);
    }

    /// Move the clock forward in milliseconds.
    pub fn advance_ms(&self, ms: u64) {
        self.advance_us(ms * 1_000);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        let t = self.now.get();
        self.now.set(t + self.auto_step);
        t
    }
}

/// Ring-buffer sizing for real-time output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Ring buffer capacity in samples
    pub ring_buffer_size: usize,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Samples per submitted block
    pub block_samples: usize,
}

impl StreamConfig {
    /// Buffer deep enough for `latency_ms` of audio.
    pub fn with_latency_ms(sample_rate: u32, block_samples: usize, latency_ms: u32) -> Self {
        StreamConfig {
            ring_buffer_size: (sample_rate as usize * latency_ms as usize / 1000)
                .max(block_samples * 2),
            sample_rate,
            block_samples,
        }
    }

    /// Room for the deepest buffering profile plus headroom.
    pub fn stable(sample_rate: u32) -> Self {
        Self::with_latency_ms(sample_rate, crate::config::AUDIO_BLOCK_SAMPLES, 800)
    }

    /// Latency of a full buffer in milliseconds.
    pub fn latency_ms(&self) -> f32 {
        (self.ring_buffer_size as f32 / self.sample_rate as f32) * 1000.0
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::stable(crate::config::OUTPUT_SAMPLE_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_latency() {
        let config = StreamConfig::with_latency_ms(44_100, 1024, 800);
        assert_eq!(config.ring_buffer_size, 35_280);
        let latency = config.latency_ms();
        assert!(latency > 799.0 && latency < 801.0);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(5);
        clock.advance_ms(2);
        assert_eq!(clock.now_us(), 2_005);
        assert_eq!(clock.now_us(), 2_005);

        let stepping = ManualClock::stepping(0, 10);
        assert_eq!(stepping.now_us(), 0);
        assert_eq!(stepping.now_us(), 10);
    }

    #[test]
    fn test_monotonic_clock_moves_forward() {
        let clock = MonotonicClock::new();
        let a = clock.now_us();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(clock.now_us() >= a + 1_000);
    }
}
