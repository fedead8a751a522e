//! Level meters and spectrum
//!
//! Both are driven from the audio path: voice meters from the register
//! writes or sequencer events that produced a block, the spectrum from the
//! block itself. Updates run at UI cadence, not per block.

pub mod meter;
pub mod opm;
pub mod opn;
pub mod spectrum;

pub use meter::{MeterSet, MeterState};
pub use opm::{OpmActivity, OPM_METERS, OPM_PCM_METERS};
pub use opn::{KeyOnSlots, OpnActivity, OPN_METERS};
pub use spectrum::{Spectrum, FFT_BINS, FFT_SIZE, SPECTRUM_COLUMNS};
