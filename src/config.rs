//! Engine configuration
//!
//! Every timing constant and smoothing coefficient the engine uses lives here,
//! so a frontend can tune buffering depth or meter feel without touching the
//! playback code. Configurations round-trip through JSON.

use crate::{ChipdeckError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Fixed output sample rate of the engine.
pub const OUTPUT_SAMPLE_RATE: u32 = 44_100;

/// Samples per output block handed to the audio sink.
pub const AUDIO_BLOCK_SAMPLES: usize = 1024;

/// Fill targets for one buffering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferProfile {
    /// Banked audio the engine tries to keep queued, in milliseconds
    pub target_ms: u32,
    /// Banked audio required before the time budget may cut a tick short
    pub min_ms: u32,
    /// Wall-clock budget for a single tick, in microseconds
    pub budget_us: u32,
}

impl BufferProfile {
    /// Profile for the register-stream path.
    pub const fn normal() -> Self {
        BufferProfile {
            target_ms: 400,
            min_ms: 250,
            budget_us: 4_000,
        }
    }

    /// Deeper profile for the tracker path with an ADPCM bank, which costs
    /// more per sample.
    pub const fn heavy() -> Self {
        BufferProfile {
            target_ms: 600,
            min_ms: 400,
            budget_us: 6_000,
        }
    }
}

/// Smoothing and kick parameters for a bank of level meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterTuning {
    /// Coefficient applied when the level rises toward its target
    pub attack: f32,
    /// Coefficient applied when the level falls toward its target
    pub release: f32,
    /// Rise coefficient of the peak follower
    pub peak_attack: f32,
    /// Fall coefficient of the peak follower
    pub peak_release: f32,
    /// Time a held maximum stays put before decaying
    pub hold_ms: u32,
    /// Multiplicative decay applied to the held maximum after `hold_ms`
    pub hold_decay: f32,
    /// Base level of a keyed-on FM voice
    pub keyon_level: f32,
    /// Boost added right after a key-on
    pub kick_boost: f32,
    /// Duration of the key-on boost
    pub kick_ms: u32,
    /// Boost added when an SSG channel becomes audible
    pub ssg_kick_boost: f32,
    /// Duration of the SSG boost
    pub ssg_kick_ms: u32,
}

impl MeterTuning {
    /// Fast, snappy voice meters.
    pub const fn voices() -> Self {
        MeterTuning {
            attack: 0.75,
            release: 0.25,
            peak_attack: 0.55,
            peak_release: 0.20,
            hold_ms: 120,
            hold_decay: 0.90,
            keyon_level: 0.65,
            kick_boost: 0.20,
            kick_ms: 80,
            ssg_kick_boost: 0.15,
            ssg_kick_ms: 60,
        }
    }

    /// Spectrum column smoothing.
    pub const fn spectrum() -> Self {
        MeterTuning {
            attack: 0.70,
            release: 0.25,
            peak_attack: 0.60,
            peak_release: 0.25,
            ..Self::voices()
        }
    }
}

impl Default for MeterTuning {
    fn default() -> Self {
        Self::voices()
    }
}

/// Tracker render parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Native render rate when no ADPCM bank is loaded
    pub render_rate: u32,
    /// Native render rate when an ADPCM bank is loaded
    pub render_rate_pcm: u32,
    /// Native samples rendered per sequencer call
    pub render_block: usize,
    /// One-pole low-pass coefficient in Q15, `<= 0` disables the filter
    pub lpf_alpha_q15: i32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            render_rate: 22_050,
            render_rate_pcm: 31_250,
            render_block: 256,
            lpf_alpha_q15: 22_000,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz
    pub output_rate: u32,
    /// Samples per output block
    pub block_samples: usize,
    /// Buffering for the register-stream path
    pub buffering: BufferProfile,
    /// Buffering for the tracker + ADPCM path
    pub buffering_heavy: BufferProfile,
    /// UI / analysis cadence in milliseconds
    pub ui_interval_ms: u32,
    /// UI cadence while the heavy profile is active
    pub ui_interval_heavy_ms: u32,
    /// Voice meter tuning
    pub meters: MeterTuning,
    /// Spectrum column tuning
    pub spectrum: MeterTuning,
    /// Tracker render parameters
    pub tracker: TrackerConfig,
    /// Master volume, 0-255
    pub volume: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            output_rate: OUTPUT_SAMPLE_RATE,
            block_samples: AUDIO_BLOCK_SAMPLES,
            buffering: BufferProfile::normal(),
            buffering_heavy: BufferProfile::heavy(),
            ui_interval_ms: 33,
            ui_interval_heavy_ms: 50,
            meters: MeterTuning::voices(),
            spectrum: MeterTuning::spectrum(),
            tracker: TrackerConfig::default(),
            volume: 200,
        }
    }
}

impl Default for BufferProfile {
    fn default() -> Self {
        Self::normal()
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| ChipdeckError::Config(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ChipdeckError::Config(format!("cannot serialize config: {e}")))
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.output_rate == 0 {
            return Err(ChipdeckError::Config("output_rate must be non-zero".into()));
        }
        if self.block_samples == 0 {
            return Err(ChipdeckError::Config(
                "block_samples must be non-zero".into(),
            ));
        }
        if self.tracker.render_rate == 0
            || self.tracker.render_rate_pcm == 0
            || self.tracker.render_block == 0
        {
            return Err(ChipdeckError::Config(
                "tracker render rates and block must be non-zero".into(),
            ));
        }
        for (name, profile) in [
            ("buffering", &self.buffering),
            ("buffering_heavy", &self.buffering_heavy),
        ] {
            if profile.min_ms > profile.target_ms {
                return Err(ChipdeckError::Config(format!(
                    "{name}: min_ms {} exceeds target_ms {}",
                    profile.min_ms, profile.target_ms
                )));
            }
        }
        Ok(())
    }

    /// Duration of one output block in microseconds.
    pub fn block_duration_us(&self) -> u64 {
        (self.block_samples as u64 * 1_000_000) / self.output_rate as u64
    }
}
