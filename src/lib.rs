//! Real-time VGM / MDX chiptune playback engine
//!
//! Plays two historical sound-chip formats through one output pipeline:
//!
//! - **VGM** register-write logs for the YM2203 (3 FM + 3 SSG channels), with
//!   optional gzip wrapping (`.vgz`)
//! - **MDX** tracker scores for the YM2151 + MSM6258 ADPCM, with the PDX sample
//!   bank resolved next to the score
//!
//! The register stream is interpreted one output tick at a time and resampled
//! from the chip's native rate with 16.16 linear interpolation. Tracker audio
//! is rendered through an external sequencer, mixed with the ADPCM voices and
//! resampled with a 4-tap cubic interpolator followed by a Q15 one-pole
//! low-pass. A time-budgeted buffering engine decides once per scheduler tick
//! how many blocks to synthesize, and the same blocks feed a 32-column spectrum
//! and per-voice level meters.
//!
//! # Synthesis cores
//! The FM synthesis of both chips and the MDX sequencer are external: hosts
//! plug them in through [`ChipCore`] and [`Sequencer`]. The bundled
//! [`SsgCore`] renders only the SSG (PSG) part of the YM2203, so a VGM
//! played through it sounds its three SSG channels while the FM channels
//! stay silent. [`NoSequencer`] refuses MDX scores with
//! [`ChipdeckError::Unsupported`].
//!
//! # Crate feature flags
//! - `export-wav` (default): WAV rendering sink (`streaming::WavSink`)
//! - `streaming` (opt-in): Real-time audio output via rodio (`streaming::AudioDevice`)
//!
//! # Quick start
//! ```no_run
//! use chipdeck::{EngineConfig, FsStore, PlaybackSession, SsgCore, NoSequencer};
//! use chipdeck::streaming::{MonotonicClock, RingBufferSink};
//!
//! let mut session: PlaybackSession<SsgCore, NoSequencer> =
//!     PlaybackSession::new(EngineConfig::default(), NoSequencer::default);
//! session.load_path("song.vgz", &FsStore).unwrap();
//!
//! let (mut sink, _consumer) = RingBufferSink::with_latency_ms(44_100, 1024, 800).unwrap();
//! let clock = MonotonicClock::new();
//! loop {
//!     session.tick(&clock, &mut sink);
//!     std::thread::sleep(std::time::Duration::from_millis(1));
//! }
//! ```

#![warn(missing_docs)]

pub mod analysis; // Level meters and spectrum
pub mod chip; // Chip core boundary and built-in SSG core
pub mod config; // Engine tunables
pub mod resample; // Fixed-point resamplers
pub mod session; // Playback session (owns all per-track state)
pub mod source; // Track bytes, storage and track list
pub mod streaming; // Buffering engine and audio sinks
pub mod tracker; // MDX / PDX decoding and orchestration
pub mod vgm; // VGM register-stream interpreter

/// Error types for loading and playing tracks
#[derive(thiserror::Error, Debug)]
pub enum ChipdeckError {
    /// Malformed file format (bad magic, bad offsets)
    #[error("Format error: {0}")]
    Format(String),

    /// Buffer shorter than the format requires
    #[error("Truncated data: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes the header requires
        needed: usize,
        /// Bytes actually present
        available: usize,
    },

    /// Chip clock field is zero
    #[error("Chip clock is zero")]
    ZeroClock,

    /// Working buffer allocation failed
    #[error("Allocation of {0} bytes failed")]
    Allocation(usize),

    /// IO error from the track store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Format or operation not supported by the configured collaborators
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Audio device error
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// Sink had no room for the whole block; the tail was dropped
    #[error("Buffer overrun: {dropped} of {block} samples dropped")]
    BufferOverrun {
        /// Samples that did not fit
        dropped: usize,
        /// Samples in the submitted block
        block: usize,
    },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for ChipdeckError {
    /// Converts a String into `ChipdeckError::Other`.
    ///
    /// Prefer the specific variants (`Format`, `Config`, ...) where the failure
    /// class is known.
    fn from(msg: String) -> Self {
        ChipdeckError::Other(msg)
    }
}

impl From<&str> for ChipdeckError {
    /// Converts a string slice into `ChipdeckError::Other`.
    fn from(msg: &str) -> Self {
        ChipdeckError::Other(msg.to_string())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, ChipdeckError>;

// Public API exports
pub use analysis::{MeterSet, MeterState, Spectrum};
pub use chip::{ChipAdapter, ChipCore, RegisterSink, SsgCore};
pub use config::{BufferProfile, EngineConfig, MeterTuning, TrackerConfig};
pub use resample::{CubicResampler, LinearResampler, OnePoleLowPass};
pub use session::PlaybackSession;
pub use source::{FsStore, TrackFormat, TrackList, TrackSource, TrackStore};
pub use streaming::{AudioSink, BufferingEngine, QueueState};
pub use tracker::{NoSequencer, PcmBank, Sequencer, TrackerDecoder, VoiceEventSink};
pub use vgm::{StreamInterpreter, VgmHeader};
