//! ADPCM voice mixer
//!
//! Eight voices play decoded bank samples on top of the FM mix. Playback
//! position and step are 16.16 fixed point; the rate code selects one of
//! the five MSM6258 clock dividers and the volume code goes through one of
//! two attenuation tables (codes 0-15, or the extended 16-58 range).

use super::pdx::{PcmBank, SampleRef};
use bitflags::bitflags;

/// Number of ADPCM voices.
pub const PCM_VOICES: usize = 8;

/// Playback rates of the five MSM6258 rate codes, in millihertz.
pub const ADPCM_RATES_MHZ: [u64; 5] = [3_906_250, 5_208_333, 7_812_500, 10_416_667, 15_625_000];

/// Rate code used until the sequencer sets one.
pub const DEFAULT_RATE_CODE: u8 = 4;

/// Q8 gain of volume codes 0-15 (2 dB per step, 0 is silent).
const VOLUME_Q8: [u16; 16] = [
    0, 10, 13, 16, 20, 26, 32, 41, 51, 64, 81, 102, 128, 162, 203, 256,
];

/// Q8 gain of extended volume codes 16-58 (0.75 dB per step).
const VOLUME_EXT_Q8: [u16; 43] = [
    7, 7, 8, 9, 10, 10, 11, 12, 14, 15, 16, 18, 19, 21, 23, 25, 27, 30, 32, 35, 38, 42, 46, 50, 54,
    59, 64, 70, 76, 83, 91, 99, 108, 118, 128, 140, 152, 166, 181, 198, 215, 235, 256,
];

bitflags! {
    /// Set of sounding ADPCM voices.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PcmMask: u8 {
        /// Voice 1
        const VOICE1 = 1 << 0;
        /// Voice 2
        const VOICE2 = 1 << 1;
        /// Voice 3
        const VOICE3 = 1 << 2;
        /// Voice 4
        const VOICE4 = 1 << 3;
        /// Voice 5
        const VOICE5 = 1 << 4;
        /// Voice 6
        const VOICE6 = 1 << 5;
        /// Voice 7
        const VOICE7 = 1 << 6;
        /// Voice 8
        const VOICE8 = 1 << 7;
    }
}

impl PcmMask {
    /// Mask with only `voice` (0-based) set.
    pub fn voice(voice: usize) -> Self {
        PcmMask::from_bits_truncate(1u8.checked_shl(voice as u32).unwrap_or(0))
    }
}

/// 16.16 step for a rate code at the given native rate.
///
/// Codes past the end of the table use the last entry.
pub fn adpcm_step(rate_code: u8, native_rate: u32) -> u32 {
    let rate = ADPCM_RATES_MHZ
        .get(rate_code as usize)
        .or(ADPCM_RATES_MHZ.last())
        .copied()
        .unwrap_or(0);
    let denom = native_rate.max(1) as u64 * 1000;
    ((rate << 16) / denom) as u32
}

/// Q8 gain of a volume code.
pub fn volume_scale(volume_code: u8) -> u16 {
    if volume_code <= 15 {
        VOLUME_Q8[volume_code as usize]
    } else {
        let idx = (volume_code as usize - 16).min(VOLUME_EXT_Q8.len() - 1);
        VOLUME_EXT_Q8[idx]
    }
}

/// Runtime state of one voice.
#[derive(Debug, Clone, Copy)]
pub struct PcmVoice {
    sample: Option<usize>,
    len: usize,
    pos_fp: u64,
    step_fp: u32,
    volume_scale: u16,
    rate_code: u8,
    active: bool,
}

impl Default for PcmVoice {
    fn default() -> Self {
        PcmVoice {
            sample: None,
            len: 0,
            pos_fp: 0,
            step_fp: 0,
            volume_scale: VOLUME_Q8[15],
            rate_code: DEFAULT_RATE_CODE,
            active: false,
        }
    }
}

impl PcmVoice {
    /// Whether the voice is playing a sample.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Integer playback position in samples.
    pub fn position(&self) -> usize {
        (self.pos_fp >> 16) as usize
    }

    /// Current Q8 gain.
    pub fn volume_scale(&self) -> u16 {
        self.volume_scale
    }

    /// Current 16.16 step.
    pub fn step(&self) -> u32 {
        self.step_fp
    }
}

/// The eight ADPCM voices.
#[derive(Debug, Clone)]
pub struct PcmVoices {
    voices: [PcmVoice; PCM_VOICES],
    native_rate: u32,
}

impl PcmVoices {
    /// Idle voices mixing at `native_rate`.
    pub fn new(native_rate: u32) -> Self {
        PcmVoices {
            voices: [PcmVoice::default(); PCM_VOICES],
            native_rate,
        }
    }

    /// Voice state by index.
    pub fn voice(&self, voice: usize) -> Option<&PcmVoice> {
        self.voices.get(voice)
    }

    /// Start `source` on `voice`. The voice stays silent unless the bank holds
    /// a non-empty entry for that exact image.
    pub fn start(
        &mut self,
        bank: Option<&PcmBank>,
        voice: u8,
        source: SampleRef,
        rate_code: u8,
        volume_code: u8,
    ) {
        let native_rate = self.native_rate;
        let Some(v) = self.voices.get_mut(voice as usize) else {
            return;
        };
        v.rate_code = rate_code;
        v.step_fp = adpcm_step(rate_code, native_rate);
        v.volume_scale = volume_scale(volume_code);
        v.pos_fp = 0;

        let found = bank.and_then(|b| b.find(source).map(|i| (i, b.samples(i).len())));
        match found {
            Some((index, len)) if len > 0 => {
                v.sample = Some(index);
                v.len = len;
                v.active = true;
            }
            _ => {
                log::trace!("PCM voice {voice}: no bank entry for {source:?}");
                v.sample = None;
                v.len = 0;
                v.active = false;
            }
        }
    }

    /// Silence `voice`.
    pub fn stop(&mut self, voice: u8) {
        if let Some(v) = self.voices.get_mut(voice as usize) {
            v.active = false;
        }
    }

    /// Change the gain of `voice`.
    pub fn set_volume(&mut self, voice: u8, volume_code: u8) {
        if let Some(v) = self.voices.get_mut(voice as usize) {
            v.volume_scale = volume_scale(volume_code);
        }
    }

    /// Change the rate of `voice`.
    pub fn set_frequency(&mut self, voice: u8, rate_code: u8) {
        let native_rate = self.native_rate;
        if let Some(v) = self.voices.get_mut(voice as usize) {
            v.rate_code = rate_code;
            v.step_fp = adpcm_step(rate_code, native_rate);
        }
    }

    /// Mix one native sample of every active voice and advance them.
    #[inline]
    pub fn mix_one(&mut self, bank: &PcmBank) -> i32 {
        let mut acc = 0i32;
        for v in self.voices.iter_mut().filter(|v| v.active) {
            let Some(index) = v.sample else {
                v.active = false;
                continue;
            };
            let pcm = bank.samples(index);
            let pos = (v.pos_fp >> 16) as usize;
            let Some(&s) = pcm.get(pos).filter(|_| pos < v.len) else {
                v.active = false;
                continue;
            };
            acc += (s as i32 * v.volume_scale as i32) >> 8;
            v.pos_fp += v.step_fp as u64;
            if (v.pos_fp >> 16) as usize >= v.len {
                v.active = false;
            }
        }
        acc
    }

    /// Mask of voices currently playing a sample.
    pub fn active_mask(&self) -> PcmMask {
        self.voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.active)
            .fold(PcmMask::empty(), |m, (i, _)| m | PcmMask::voice(i))
    }

    /// Stop every voice.
    pub fn reset(&mut self) {
        self.voices = [PcmVoice::default(); PCM_VOICES];
    }
}
