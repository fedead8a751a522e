//! YM2203 voice activity from the register-write stream
//!
//! Tracks a shadow of every register the stream writes and derives one meter
//! target per voice: FM1-3 from the key-on register (0x28) and the operators'
//! total level, SSG A-C from the mixer (0x07) and volume (0x08-0x0A)
//! registers.

use super::MeterSet;
use crate::chip::RegisterSink;
use crate::config::MeterTuning;
use bitflags::bitflags;

/// FM voices on the YM2203.
pub const FM_VOICES: usize = 3;
/// SSG voices on the YM2203.
pub const SSG_VOICES: usize = 3;
/// Meters in the register-stream layout (FM1-3, SSG A-C).
pub const OPN_METERS: usize = FM_VOICES + SSG_VOICES;

const REG_KEY_ON: u8 = 0x28;
const REG_MIXER: usize = 0x07;
const REG_SSG_VOLUME: usize = 0x08;
const REG_TOTAL_LEVEL: usize = 0x40;

/// Operator offsets inside a total-level register group.
const SLOT_OFFSETS: [usize; 4] = [0x00, 0x08, 0x04, 0x0C];

bitflags! {
    /// Operator bits of a key-on write (upper nibble of register 0x28).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyOnSlots: u8 {
        /// Operator 1
        const OP1 = 0x10;
        /// Operator 2
        const OP2 = 0x20;
        /// Operator 3
        const OP3 = 0x40;
        /// Operator 4
        const OP4 = 0x80;
    }
}

/// Register shadow plus key-on and kick bookkeeping for one YM2203.
#[derive(Debug, Clone)]
pub struct OpnActivity {
    regs: [u8; 256],
    keyon: [KeyOnSlots; FM_VOICES],
    fm_kick_pending: [bool; FM_VOICES],
    fm_kick_until_ms: [u64; FM_VOICES],
    ssg_prev_active: [bool; SSG_VOICES],
    ssg_kick_until_ms: [u64; SSG_VOICES],
}

impl Default for OpnActivity {
    fn default() -> Self {
        OpnActivity {
            regs: [0; 256],
            keyon: [KeyOnSlots::empty(); FM_VOICES],
            fm_kick_pending: [false; FM_VOICES],
            fm_kick_until_ms: [0; FM_VOICES],
            ssg_prev_active: [false; SSG_VOICES],
            ssg_kick_until_ms: [0; SSG_VOICES],
        }
    }
}

impl OpnActivity {
    /// Fresh tracker with all registers zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all register state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Shadowed register value.
    pub fn register(&self, reg: u8) -> u8 {
        self.regs[reg as usize]
    }

    /// Operators currently keyed on for FM voice `ch`.
    pub fn keyon(&self, ch: usize) -> KeyOnSlots {
        self.keyon.get(ch).copied().unwrap_or_default()
    }

    /// True when SSG voice `ch` has volume and a tone or noise source enabled.
    pub fn ssg_active(&self, ch: usize) -> bool {
        let enable = self.regs[REG_MIXER];
        let tone_on = (enable >> ch) & 1 == 0;
        let noise_on = (enable >> (3 + ch)) & 1 == 0;
        let volume = self.regs[REG_SSG_VOLUME + ch] & 0x0F;
        volume > 0 && (tone_on || noise_on)
    }

    fn fm_target(&self, ch: usize, now_ms: u64, tuning: &MeterTuning) -> f32 {
        if self.keyon[ch].is_empty() {
            return 0.0;
        }
        let min_tl = SLOT_OFFSETS
            .iter()
            .map(|&slot| self.regs[REG_TOTAL_LEVEL + slot + ch] & 0x7F)
            .min()
            .unwrap_or(0x7F);
        let tl_level = 1.0 - min_tl as f32 / 127.0;
        let mut level = tuning.keyon_level * (0.80 + 0.20 * tl_level);
        if now_ms < self.fm_kick_until_ms[ch] {
            level += tuning.kick_boost;
        }
        level.clamp(0.0, 1.0)
    }

    fn ssg_target(&mut self, ch: usize, now_ms: u64, tuning: &MeterTuning) -> f32 {
        let active = self.ssg_active(ch);
        let mut level = if active {
            (self.regs[REG_SSG_VOLUME + ch] & 0x0F) as f32 / 15.0
        } else {
            0.0
        };
        if active && !self.ssg_prev_active[ch] {
            self.ssg_kick_until_ms[ch] = now_ms + tuning.ssg_kick_ms as u64;
        }
        self.ssg_prev_active[ch] = active;
        if now_ms < self.ssg_kick_until_ms[ch] {
            level += tuning.ssg_kick_boost;
        }
        level.clamp(0.0, 1.0)
    }

    /// Advance the six meters (FM1-3, SSG A-C) to `now_ms`.
    pub fn update(&mut self, now_ms: u64, meters: &mut MeterSet) {
        let tuning = *meters.tuning();
        for ch in 0..FM_VOICES {
            if std::mem::take(&mut self.fm_kick_pending[ch]) {
                self.fm_kick_until_ms[ch] = now_ms + tuning.kick_ms as u64;
            }
            let target = self.fm_target(ch, now_ms, &tuning);
            meters.update(ch, target, now_ms);
        }
        for ch in 0..SSG_VOICES {
            let target = self.ssg_target(ch, now_ms, &tuning);
            meters.update(FM_VOICES + ch, target, now_ms);
        }
    }
}

impl RegisterSink for OpnActivity {
    fn write_reg(&mut self, reg: u8, value: u8) {
        self.regs[reg as usize] = value;
        if reg == REG_KEY_ON {
            let ch = (value & 0x03) as usize;
            if ch < FM_VOICES {
                let slots = KeyOnSlots::from_bits_truncate(value);
                if self.keyon[ch].is_empty() && !slots.is_empty() {
                    self.fm_kick_pending[ch] = true;
                }
                self.keyon[ch] = slots;
            }
        }
    }
}
