//! MDX tracker playback
//!
//! - `mdx`: score header (title, sample bank name)
//! - `pdx`: ADPCM sample bank
//! - `pcm`: ADPCM voice mixer
//! - `sequencer`: boundary to the external sequencer
//! - `decoder`: orchestration of the above into a mono native-rate stream

pub mod decoder;
pub mod mdx;
pub mod pcm;
pub mod pdx;
pub mod sequencer;

pub use decoder::{resolve_bank_path, TrackerDecoder};
pub use mdx::MdxHeader;
pub use pcm::{PcmMask, PcmVoices};
pub use pdx::{PcmBank, SampleRef};
pub use sequencer::{
    NoSequencer, ScriptEvent, ScriptedSequencer, Sequencer, VoiceEventSink, WorkArea, WorkSize,
};
