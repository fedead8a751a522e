//! 32-column spectrum of the output stream
//!
//! Output blocks are copied into a 1024-sample ring; each UI update
//! Hann-windows the most recent 64 samples, transforms them with a planned
//! `rustfft` forward FFT and smooths the dB-normalized magnitudes per column
//! with the same meter dynamics as the voice meters. The plan, window and
//! scratch space are built once, so an update never allocates.

use super::MeterState;
use crate::config::MeterTuning;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::fmt;
use std::sync::Arc;

/// Samples kept for analysis.
pub const SPECTRUM_RING: usize = 1024;
/// Displayed columns.
pub const SPECTRUM_COLUMNS: usize = 32;
/// Transform length.
pub const FFT_SIZE: usize = 64;
/// Magnitude bins produced (DC up to just below Nyquist).
pub const FFT_BINS: usize = FFT_SIZE / 2;

const FLOOR_DB: f32 = -60.0;

#[inline]
fn to_db(x: f32) -> f32 {
    20.0 * (x + 1e-6).log10()
}

/// Map `[-60, 0]` dB onto `0..=1`.
#[inline]
fn db_norm(db: f32) -> f32 {
    (db.clamp(FLOOR_DB, 0.0) - FLOOR_DB) / -FLOOR_DB
}

fn hann() -> [f32; FFT_SIZE] {
    let mut window = [0.0; FFT_SIZE];
    for (i, w) in window.iter_mut().enumerate() {
        *w = 0.5 - 0.5 * (2.0 * PI * i as f32 / (FFT_SIZE - 1) as f32).cos();
    }
    window
}

/// Ring buffer, transform and per-column smoothing.
#[derive(Clone)]
pub struct Spectrum {
    ring: Box<[i16; SPECTRUM_RING]>,
    write: usize,
    fft: Arc<dyn Fft<f32>>,
    window: [f32; FFT_SIZE],
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    mags: [f32; FFT_BINS],
    columns: [MeterState; SPECTRUM_COLUMNS],
    bin_scale: f32,
    tuning: MeterTuning,
}

impl fmt::Debug for Spectrum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spectrum")
            .field("write", &self.write)
            .field("mags", &self.mags)
            .field("columns", &self.columns)
            .field("bin_scale", &self.bin_scale)
            .finish_non_exhaustive()
    }
}

impl Default for Spectrum {
    fn default() -> Self {
        Self::new(MeterTuning::spectrum())
    }
}

impl Spectrum {
    /// Empty spectrum using `tuning` for the columns.
    pub fn new(tuning: MeterTuning) -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward(FFT_SIZE);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        Spectrum {
            ring: Box::new([0; SPECTRUM_RING]),
            write: 0,
            fft,
            window: hann(),
            buffer: vec![Complex::default(); FFT_SIZE],
            scratch,
            mags: [0.0; FFT_BINS],
            columns: [MeterState::default(); SPECTRUM_COLUMNS],
            bin_scale: 1.0,
            tuning,
        }
    }

    /// Clear the ring and the column state; the bin scale is kept.
    pub fn reset(&mut self) {
        self.ring.fill(0);
        self.write = 0;
        self.mags = [0.0; FFT_BINS];
        self.columns = [MeterState::default(); SPECTRUM_COLUMNS];
    }

    /// Append output samples to the ring.
    pub fn push_block(&mut self, pcm: &[i16]) {
        for &s in pcm {
            self.ring[self.write % SPECTRUM_RING] = s;
            self.write = self.write.wrapping_add(1);
        }
    }

    /// Column-to-bin factor, clamped to `[0.1, 1.0]`.
    ///
    /// Sources rendered below the output rate only carry energy in the lower
    /// bins; a scale of `render_rate / output_rate` spreads that range over
    /// all 32 columns.
    pub fn set_bin_scale(&mut self, scale: f32) {
        self.bin_scale = if scale.is_nan() {
            1.0
        } else {
            scale.clamp(0.1, 1.0)
        };
    }

    /// Current column-to-bin factor.
    pub fn bin_scale(&self) -> f32 {
        self.bin_scale
    }

    /// FFT bin shown in `column`. Bin 0 (DC) is never shown.
    pub fn column_bin(&self, column: usize) -> usize {
        ((column as f32 * self.bin_scale) as usize).clamp(1, FFT_BINS - 1)
    }

    /// Transform the latest 64 samples and advance every column to `now_ms`.
    pub fn update(&mut self, now_ms: u64) {
        let start = self.write.wrapping_sub(FFT_SIZE);
        for (i, (c, w)) in self.buffer.iter_mut().zip(&self.window).enumerate() {
            let s = self.ring[start.wrapping_add(i) % SPECTRUM_RING];
            *c = Complex::new(s as f32 / 32768.0 * w, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);
        for (m, c) in self.mags.iter_mut().zip(&self.buffer) {
            *m = c.norm();
        }

        for c in 0..SPECTRUM_COLUMNS {
            let target = db_norm(to_db(self.mags[self.column_bin(c)]));
            self.columns[c].update(target, now_ms, &self.tuning);
        }
    }

    /// Column states, low to high frequency.
    pub fn columns(&self) -> &[MeterState] {
        &self.columns
    }

    /// Raw magnitudes of the last transform.
    pub fn magnitudes(&self) -> &[f32] {
        &self.mags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    #[test]
    fn test_db_norm_range() {
        assert_relative_eq!(db_norm(to_db(0.0)), 0.0);
        assert_relative_eq!(db_norm(to_db(1.0)), 1.0, epsilon = 1e-5);
        assert_relative_eq!(db_norm(-30.0), 0.5);
        assert_relative_eq!(db_norm(12.0), 1.0);
    }

    #[test]
    fn test_bin_scale_clamped() {
        let mut s = Spectrum::default();
        s.set_bin_scale(0.0);
        assert_relative_eq!(s.bin_scale(), 0.1);
        s.set_bin_scale(4.0);
        assert_relative_eq!(s.bin_scale(), 1.0);
        assert_eq!(s.column_bin(0), 1);
        assert_eq!(s.column_bin(31), 31);
        s.set_bin_scale(0.5);
        assert_eq!(s.column_bin(10), 5);
    }

    #[test]
    fn test_window_is_symmetric() {
        let window = hann();
        assert_relative_eq!(window[0], 0.0);
        assert_relative_eq!(window[63], 0.0, epsilon = 1e-6);
        for i in 0..32 {
            assert_relative_eq!(window[i], window[63 - i], epsilon = 1e-5);
        }
    }

    #[test]
    fn test_silence_transforms_to_zero() {
        let mut s = Spectrum::default();
        s.push_block(&[0; 64]);
        s.update(0);
        assert!(s.magnitudes().iter().all(|&m| m == 0.0));
    }

    #[test]
    fn test_sine_peaks_at_its_bin() {
        let mut s = Spectrum::default();
        let block: Vec<i16> = (0..FFT_SIZE)
            .map(|i| (16_000.0 * (2.0 * PI * 8.0 * i as f32 / FFT_SIZE as f32).sin()) as i16)
            .collect();
        s.push_block(&block);
        s.update(0);

        let mags = s.magnitudes();
        assert_eq!(mags.len(), FFT_BINS);
        let peak = mags
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(peak, Some(8));
        assert!(mags[8] > 10.0 * mags[20]);
    }

    #[test]
    fn test_dc_lands_in_bin_zero() {
        let mut s = Spectrum::default();
        s.push_block(&[8_192; 64]);
        s.update(0);
        // 0.25 * sum of the window (31.5)
        assert_relative_eq!(s.magnitudes()[0], 0.25 * 31.5, epsilon = 1e-3);
    }

    #[test]
    fn test_clone_keeps_its_plan() {
        let mut s = Spectrum::default();
        s.push_block(&[8_192; 64]);
        let mut copy = s.clone();
        s.update(0);
        copy.update(0);
        assert_eq!(s.magnitudes(), copy.magnitudes());
    }

    #[test]
    fn test_silence_stays_at_rest() {
        let mut s = Spectrum::default();
        s.push_block(&[0; 512]);
        s.update(0);
        assert!(s.columns().iter().all(|c| c.val == 0.0));
    }

    #[test]
    fn test_tone_lights_its_column() {
        let mut s = Spectrum::default();
        let block: Vec<i16> = (0..1024)
            .map(|i| (20_000.0 * (2.0 * PI * 12.0 * i as f32 / 64.0).sin()) as i16)
            .collect();
        s.push_block(&block);
        for t in 0..5 {
            s.update(t * 33);
        }
        let cols = s.columns();
        assert!(cols[12].val > 0.9);
        assert!(cols[12].val > cols[25].val);
    }

    #[test]
    fn test_reads_latest_samples_across_wrap() {
        let mut s = Spectrum::default();
        s.push_block(&[0; 1000]);
        // 64 samples straddling the ring end
        s.push_block(&[8_192; 64]);
        s.update(0);
        assert_relative_eq!(s.magnitudes()[0], 0.25 * 31.5, epsilon = 1e-3);
    }
}
