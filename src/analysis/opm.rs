//! YM2151 voice activity from sequencer events
//!
//! FM voices are tracked from key-on events (either the dedicated callback or
//! raw writes to register 0x08). ADPCM voices have no envelope information, so
//! their meters follow the decoder's sounding-voice mask.

use super::MeterSet;
use crate::tracker::{PcmMask, VoiceEventSink};

/// FM voices on the YM2151.
pub const OPM_VOICES: usize = 8;
/// Meters in the tracker layout without an ADPCM bank.
pub const OPM_METERS: usize = OPM_VOICES;
/// Meters in the tracker layout with an ADPCM bank (FM1-8, PCM1-8).
pub const OPM_PCM_METERS: usize = OPM_VOICES * 2;

const REG_KEY_ON: u8 = 0x08;

/// Key-on and kick bookkeeping for the eight FM voices.
#[derive(Debug, Clone, Default)]
pub struct OpmActivity {
    keyon: [u8; OPM_VOICES],
    kick_pending: [bool; OPM_VOICES],
    kick_until_ms: [u64; OPM_VOICES],
}

impl OpmActivity {
    /// Fresh tracker with every voice off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all key-on state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// True when FM voice `voice` has any operator keyed on.
    pub fn is_keyed(&self, voice: usize) -> bool {
        self.keyon.get(voice).is_some_and(|&mask| mask != 0)
    }

    fn key(&mut self, voice: usize, slots: u8) {
        if voice >= OPM_VOICES {
            return;
        }
        self.keyon[voice] = slots;
        if slots != 0 {
            self.kick_pending[voice] = true;
        }
    }

    /// Advance the FM meters, and the PCM meters when the set has room for
    /// them, to `now_ms`.
    pub fn update(&mut self, now_ms: u64, pcm_mask: u8, meters: &mut MeterSet) {
        let tuning = *meters.tuning();
        for voice in 0..OPM_VOICES {
            if std::mem::take(&mut self.kick_pending[voice]) {
                self.kick_until_ms[voice] = now_ms + tuning.kick_ms as u64;
            }
            let mut level = 0.0;
            if self.keyon[voice] != 0 {
                level = tuning.keyon_level;
                if now_ms < self.kick_until_ms[voice] {
                    level = (level + tuning.kick_boost).min(1.0);
                }
            }
            meters.update(voice, level, now_ms);
        }

        if meters.len() >= OPM_PCM_METERS {
            let mask = PcmMask::from_bits_truncate(pcm_mask);
            for voice in 0..OPM_VOICES {
                let level = if mask.contains(PcmMask::voice(voice)) {
                    tuning.keyon_level
                } else {
                    0.0
                };
                meters.update(OPM_VOICES + voice, level, now_ms);
            }
        }
    }
}

impl VoiceEventSink for OpmActivity {
    fn on_register_write(&mut self, reg: u8, value: u8) {
        if reg == REG_KEY_ON {
            self.key((value & 0x07) as usize, (value >> 3) & 0x0F);
        }
    }

    fn on_voice_keyon(&mut self, voice: u8, on: bool) {
        self.key(voice as usize, if on { 0x0F } else { 0 });
    }
}
