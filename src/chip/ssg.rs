//! Built-in YM2203 SSG core
//!
//! Renders the SSG half of the YM2203 (three square-wave channels, one shared
//! noise LFSR and the 32-step envelope) at the chip's FM output rate of
//! `clock / 72`. This is not a full YM2203: FM registers (0x10 and up) are
//! accepted and ignored, so an FM track played through this core sounds only
//! its SSG parts. Plug a full OPN synthesis core in through [`ChipCore`] for
//! FM output.
//!
//! Timing follows the default 1/4 SSG prescaler: the tone, noise and
//! envelope counters all tick at `clock / 32`, so a tone period `TP` sounds at
//! `clock / (64 * TP)`.

use super::ChipCore;

/// Master clocks per native (FM-rate) sample.
const CLOCKS_PER_SAMPLE: u32 = 72;
/// Master clocks per SSG generator tick.
const CLOCKS_PER_TICK: u32 = 32;

/// DC history length for the output centering filter (2048 samples).
const DC_HISTORY_BITS: usize = 11;
const DC_HISTORY_SIZE: usize = 1 << DC_HISTORY_BITS;

/// Peak DAC value of one channel (three channels must fit in i16 after DC removal).
const CHANNEL_FULL_SCALE: f32 = 8191.0;

/// YM2203 SSG section emulation (no FM channels).
#[derive(Clone)]
pub struct SsgCore {
    regs: [u8; 16],
    native_rate: u32,
    clock_acc: u32,

    tone_counter: [u32; 3],
    tone_output: [bool; 3],

    noise_counter: u32,
    noise_half: bool,
    noise_lfsr: u32,
    noise_output: bool,

    env_counter: u32,
    env_step: i32,
    env_attack: u8,
    env_hold: bool,
    env_alternate: bool,
    env_holding: bool,

    dac: [u16; 32],
    dc_history: Box<[u16; DC_HISTORY_SIZE]>,
    dc_pos: usize,
    dc_sum: u32,
}

impl SsgCore {
    /// Current value of an SSG register (0x00-0x0F).
    pub fn register(&self, addr: u8) -> u8 {
        self.regs.get(addr as usize).copied().unwrap_or(0)
    }

    fn tone_period(&self, ch: usize) -> u32 {
        let lo = self.regs[ch * 2] as u32;
        let hi = (self.regs[ch * 2 + 1] & 0x0F) as u32;
        ((hi << 8) | lo).max(1)
    }

    fn noise_period(&self) -> u32 {
        ((self.regs[6] & 0x1F) as u32).max(1)
    }

    fn env_period(&self) -> u32 {
        ((self.regs[11] as u32) | ((self.regs[12] as u32) << 8)).max(1)
    }

    fn restart_envelope(&mut self, shape: u8) {
        self.env_attack = if shape & 0x04 != 0 { 0x1F } else { 0 };
        if shape & 0x08 == 0 {
            // Shapes 0-7 behave as one-shot: run once, then sit at zero.
            self.env_hold = true;
            self.env_alternate = self.env_attack != 0;
        } else {
            self.env_hold = shape & 0x01 != 0;
            self.env_alternate = shape & 0x02 != 0;
        }
        self.env_step = 0x1F;
        self.env_holding = false;
        self.env_counter = 0;
    }

    fn envelope_level(&self) -> u8 {
        (self.env_step as u8 & 0x1F) ^ self.env_attack
    }

    fn tick(&mut self) {
        for ch in 0..3 {
            self.tone_counter[ch] += 1;
            if self.tone_counter[ch] >= self.tone_period(ch) {
                self.tone_counter[ch] = 0;
                self.tone_output[ch] = !self.tone_output[ch];
            }
        }

        // Noise runs at half the tone rate.
        self.noise_half = !self.noise_half;
        if self.noise_half {
            self.noise_counter += 1;
            if self.noise_counter >= self.noise_period() {
                self.noise_counter = 0;
                // 17-bit LFSR, taps at bits 0 and 3
                let bit = (self.noise_lfsr ^ (self.noise_lfsr >> 3)) & 1;
                self.noise_lfsr = (self.noise_lfsr >> 1) | (bit << 16);
                self.noise_output = self.noise_lfsr & 1 != 0;
            }
        }

        if !self.env_holding {
            self.env_counter += 1;
            if self.env_counter >= self.env_period() {
                self.env_counter = 0;
                self.env_step -= 1;
                if self.env_step < 0 {
                    if self.env_hold {
                        if self.env_alternate {
                            self.env_attack ^= 0x1F;
                        }
                        self.env_holding = true;
                        self.env_step = 0;
                    } else {
                        if self.env_alternate {
                            self.env_attack ^= 0x1F;
                        }
                        self.env_step &= 0x1F;
                    }
                }
            }
        }
    }

    fn channel_level(&self, ch: usize) -> u16 {
        let mixer = self.regs[7];
        let tone_off = mixer & (1 << ch) != 0;
        let noise_off = mixer & (8 << ch) != 0;
        let gate = (self.tone_output[ch] || tone_off) && (self.noise_output || noise_off);
        if !gate {
            return 0;
        }
        let amp = self.regs[8 + ch];
        let level = if amp & 0x10 != 0 {
            self.envelope_level()
        } else {
            let fixed = amp & 0x0F;
            if fixed == 0 {
                0
            } else {
                fixed * 2 + 1
            }
        };
        self.dac[level as usize]
    }

    #[inline]
    fn remove_dc(&mut self, sample: u16) -> i16 {
        self.dc_sum -= self.dc_history[self.dc_pos] as u32;
        self.dc_sum += sample as u32;
        self.dc_history[self.dc_pos] = sample;
        self.dc_pos = (self.dc_pos + 1) & (DC_HISTORY_SIZE - 1);
        let dc = self.dc_sum >> DC_HISTORY_BITS;
        (sample as i32 - dc as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16
    }

    fn build_dac() -> [u16; 32] {
        // 1.5 dB per step, level 0 is silent.
        let mut dac = [0u16; 32];
        for (i, slot) in dac.iter_mut().enumerate().skip(1) {
            let gain = 2f32.powf((i as f32 - 31.0) / 4.0);
            *slot = (gain * CHANNEL_FULL_SCALE) as u16;
        }
        dac
    }
}

impl ChipCore for SsgCore {
    fn with_clock(clock_hz: u32) -> Self {
        let mut core = SsgCore {
            regs: [0; 16],
            native_rate: (clock_hz / CLOCKS_PER_SAMPLE).max(1),
            clock_acc: 0,
            tone_counter: [0; 3],
            tone_output: [false; 3],
            noise_counter: 0,
            noise_half: false,
            noise_lfsr: 1,
            noise_output: false,
            env_counter: 0,
            env_step: 0,
            env_attack: 0,
            env_hold: true,
            env_alternate: false,
            env_holding: true,
            dac: Self::build_dac(),
            dc_history: Box::new([0; DC_HISTORY_SIZE]),
            dc_pos: 0,
            dc_sum: 0,
        };
        core.reset();
        core
    }

    fn reset(&mut self) {
        self.regs = [0; 16];
        self.regs[7] = 0x3F;
        self.clock_acc = 0;
        self.tone_counter = [0; 3];
        self.tone_output = [false; 3];
        self.noise_counter = 0;
        self.noise_half = false;
        self.noise_lfsr = 1;
        self.noise_output = false;
        self.restart_envelope(0);
        self.env_holding = true;
        self.env_step = 0;
        self.dc_history.fill(0);
        self.dc_pos = 0;
        self.dc_sum = 0;
    }

    fn write_reg(&mut self, addr: u8, value: u8) {
        if addr >= 0x10 {
            return;
        }
        self.regs[addr as usize] = value;
        if addr == 13 {
            self.restart_envelope(value & 0x0F);
        }
    }

    fn render_one_native_sample(&mut self) -> i16 {
        self.clock_acc += CLOCKS_PER_SAMPLE;
        while self.clock_acc >= CLOCKS_PER_TICK {
            self.clock_acc -= CLOCKS_PER_TICK;
            self.tick();
        }
        let mix = self.channel_level(0) + self.channel_level(1) + self.channel_level(2);
        self.remove_dc(mix)
    }

    fn native_sample_rate(&self) -> u32 {
        self.native_rate
    }
}

impl std::fmt::Debug for SsgCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsgCore")
            .field("regs", &self.regs)
            .field("native_rate", &self.native_rate)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLOCK: u32 = 3_993_600;

    fn render(core: &mut SsgCore, n: usize) -> Vec<i16> {
        (0..n).map(|_| core.render_one_native_sample()).collect()
    }

    #[test]
    fn test_silent_after_reset() {
        let mut core = SsgCore::with_clock(CLOCK);
        assert!(render(&mut core, 1000).iter().all(|&s| s == 0));
    }

    #[test]
    fn test_tone_produces_square_wave() {
        let mut core = SsgCore::with_clock(CLOCK);
        core.write_reg(0x00, 0x40); // period 64
        core.write_reg(0x07, 0x3E);
        core.write_reg(0x08, 0x0F);

        let out = render(&mut core, 4000);
        let max = *out.iter().max().unwrap();
        let min = *out.iter().min().unwrap();
        assert!(max > 1000, "expected positive swing, got {max}");
        assert!(min < -1000, "expected negative swing, got {min}");

        // 64-period tone at clock/64/64 ~= 975 Hz: about 2 zero crossings per 57 samples
        let crossings = out
            .windows(2)
            .skip(2048)
            .filter(|w| (w[0] < 0) != (w[1] < 0))
            .count();
        let expected = 2.0 * (CLOCK as f32 / (64.0 * 64.0)) * (out.len() - 2049) as f32
            / core.native_sample_rate() as f32;
        assert!(
            (crossings as f32 - expected).abs() < expected * 0.2,
            "crossings {crossings}, expected about {expected}"
        );
    }

    #[test]
    fn test_fm_registers_ignored() {
        let mut core = SsgCore::with_clock(CLOCK);
        core.write_reg(0x28, 0xF0);
        core.write_reg(0xB4, 0xC0);
        assert!(render(&mut core, 500).iter().all(|&s| s == 0));
    }

    #[test]
    fn test_fm_track_sounds_only_its_ssg_part() {
        let ssg = |core: &mut SsgCore| {
            core.write_reg(0x00, 0x40);
            core.write_reg(0x07, 0x3E);
            core.write_reg(0x08, 0x0F);
        };
        let mut plain = SsgCore::with_clock(CLOCK);
        ssg(&mut plain);

        let mut mixed = SsgCore::with_clock(CLOCK);
        ssg(&mut mixed);
        for (reg, value) in [(0xA0, 0x44), (0xA4, 0x22), (0x40, 0x00), (0x28, 0xF0)] {
            mixed.write_reg(reg, value);
        }
        assert_eq!(render(&mut plain, 2_000), render(&mut mixed, 2_000));
    }

    #[test]
    fn test_one_shot_envelope_decays_to_zero() {
        let mut core = SsgCore::with_clock(CLOCK);
        core.write_reg(11, 0x01);
        core.write_reg(12, 0x00);
        core.write_reg(13, 0x00);
        assert_eq!(core.envelope_level(), 0x1F);
        for _ in 0..64 {
            core.tick();
        }
        assert!(core.env_holding);
        assert_eq!(core.envelope_level(), 0);
    }

    #[test]
    fn test_attack_envelope_rises() {
        let mut core = SsgCore::with_clock(CLOCK);
        core.write_reg(11, 0x01);
        core.write_reg(13, 0x0D); // attack + hold at max
        assert_eq!(core.envelope_level(), 0);
        for _ in 0..40 {
            core.tick();
        }
        assert_eq!(core.envelope_level(), 0x1F);
    }
}
