//! Sequencer boundary
//!
//! The MDX sequencer (score interpretation and OPM synthesis) is an external
//! collaborator. The decoder only drives it through [`Sequencer`] and
//! receives its voice events through [`VoiceEventSink`]; the sequencer calls
//! into the sink, never the other way around.

use super::pdx::SampleRef;
use crate::{ChipdeckError, Result};

/// Receiver of sequencer voice events. All methods default to no-ops.
pub trait VoiceEventSink {
    /// An OPM register was written.
    fn on_register_write(&mut self, _reg: u8, _value: u8) {}

    /// FM voice `voice` (0-7) was keyed on or off.
    fn on_voice_keyon(&mut self, _voice: u8, _on: bool) {}

    /// ADPCM voice `voice` starts the bank image `sample`.
    fn on_pcm_start(&mut self, _voice: u8, _sample: SampleRef, _rate_code: u8, _volume_code: u8) {}

    /// ADPCM voice `voice` stops.
    fn on_pcm_stop(&mut self, _voice: u8) {}

    /// ADPCM voice `voice` changes volume.
    fn on_pcm_volume(&mut self, _voice: u8, _volume_code: u8) {}

    /// ADPCM voice `voice` changes rate.
    fn on_pcm_frequency(&mut self, _voice: u8, _rate_code: u8) {}
}

/// Working memory the sequencer needs for one score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkSize {
    /// Bytes for the relocated score
    pub score: usize,
    /// Bytes for the relocated sample bank
    pub bank: usize,
}

/// Working buffers allocated by the decoder and handed to the sequencer.
#[derive(Debug, Clone, Default)]
pub struct WorkArea {
    /// Score buffer
    pub score: Vec<u8>,
    /// Sample bank buffer
    pub bank: Vec<u8>,
}

impl WorkArea {
    /// Allocate zeroed buffers, failing instead of aborting on exhaustion.
    pub fn allocate(size: WorkSize) -> Result<Self> {
        Ok(WorkArea {
            score: zeroed(size.score)?,
            bank: zeroed(size.bank)?,
        })
    }
}

fn zeroed(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| ChipdeckError::Allocation(len))?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Tracker sequencer driven at a fixed native rate.
pub trait Sequencer: Send {
    /// Working memory required for `score` with a bank image of `bank_len`
    /// bytes (0 when no bank is loaded).
    fn work_size(&self, score: &[u8], bank_len: usize) -> Result<WorkSize>;

    /// Load a score (and optional raw bank image) into `work` and prepare
    /// playback at `native_rate`.
    fn load(
        &mut self,
        score: &[u8],
        bank: Option<&[u8]>,
        work: WorkArea,
        native_rate: u32,
    ) -> Result<()>;

    /// Native samples that can be synthesized before the next internal event.
    fn samples_until_event(&self) -> usize;

    /// Process the pending event(s), reporting voice activity to `events`.
    fn advance_event(&mut self, events: &mut dyn VoiceEventSink);

    /// Synthesize `out.len() / 2` interleaved stereo samples. Never crosses an
    /// event boundary.
    fn synthesize(&mut self, out: &mut [i16]);

    /// Whether the score has ended.
    fn is_finished(&self) -> bool;

    /// Whether ADPCM voice `voice` holds a note.
    fn pcm_note_on(&self, voice: usize) -> bool;
}

/// Sequencer for builds without a tracker backend: every load is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSequencer;

impl Sequencer for NoSequencer {
    fn work_size(&self, _score: &[u8], _bank_len: usize) -> Result<WorkSize> {
        Err(ChipdeckError::Unsupported(
            "no MDX sequencer configured".into(),
        ))
    }

    fn load(
        &mut self,
        _score: &[u8],
        _bank: Option<&[u8]>,
        _work: WorkArea,
        _native_rate: u32,
    ) -> Result<()> {
        Err(ChipdeckError::Unsupported(
            "no MDX sequencer configured".into(),
        ))
    }

    fn samples_until_event(&self) -> usize {
        0
    }

    fn advance_event(&mut self, _events: &mut dyn VoiceEventSink) {}

    fn synthesize(&mut self, out: &mut [i16]) {
        out.fill(0);
    }

    fn is_finished(&self) -> bool {
        true
    }

    fn pcm_note_on(&self, _voice: usize) -> bool {
        false
    }
}

/// One scripted sequencer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptEvent {
    /// OPM register write
    Register(u8, u8),
    /// FM key-on / key-off
    KeyOn(u8, bool),
    /// ADPCM note start
    PcmStart {
        /// Voice 0-7
        voice: u8,
        /// Bank image reference
        sample: SampleRef,
        /// Rate code
        rate: u8,
        /// Volume code
        volume: u8,
    },
    /// ADPCM note stop
    PcmStop(u8),
}

/// Deterministic sequencer that replays a fixed event list and renders a
/// constant level per keyed FM voice. Useful for exercising the decoder
/// without a real MDX backend.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSequencer {
    script: Vec<(u64, ScriptEvent)>,
    next: usize,
    now: u64,
    length: u64,
    level: i16,
    keyed: [bool; 8],
    pcm_notes: [bool; 8],
    loaded: bool,
    work: WorkArea,
}

impl ScriptedSequencer {
    /// Sequencer that plays `script` (sample time, event) for `length`
    /// native samples, rendering `level` per keyed FM voice on each channel.
    pub fn new(mut script: Vec<(u64, ScriptEvent)>, length: u64, level: i16) -> Self {
        script.sort_by_key(|(at, _)| *at);
        ScriptedSequencer {
            script,
            length,
            level,
            ..Default::default()
        }
    }

    /// Native samples rendered so far.
    pub fn position(&self) -> u64 {
        self.now
    }

    /// Size of the score buffer it was loaded with.
    pub fn work_len(&self) -> usize {
        self.work.score.len()
    }
}

impl Sequencer for ScriptedSequencer {
    fn work_size(&self, score: &[u8], bank_len: usize) -> Result<WorkSize> {
        Ok(WorkSize {
            score: score.len(),
            bank: bank_len,
        })
    }

    fn load(
        &mut self,
        score: &[u8],
        bank: Option<&[u8]>,
        mut work: WorkArea,
        _native_rate: u32,
    ) -> Result<()> {
        let n = score.len().min(work.score.len());
        work.score[..n].copy_from_slice(&score[..n]);
        if let Some(bank) = bank {
            let n = bank.len().min(work.bank.len());
            work.bank[..n].copy_from_slice(&bank[..n]);
        }
        self.work = work;
        self.next = 0;
        self.now = 0;
        self.keyed = [false; 8];
        self.pcm_notes = [false; 8];
        self.loaded = true;
        Ok(())
    }

    fn samples_until_event(&self) -> usize {
        if !self.loaded {
            return 0;
        }
        let horizon = match self.script.get(self.next) {
            Some((at, _)) => (*at).min(self.length),
            None => self.length,
        };
        horizon.saturating_sub(self.now) as usize
    }

    fn advance_event(&mut self, events: &mut dyn VoiceEventSink) {
        while let Some(&(at, event)) = self.script.get(self.next) {
            if at > self.now {
                break;
            }
            self.next += 1;
            match event {
                ScriptEvent::Register(reg, value) => events.on_register_write(reg, value),
                ScriptEvent::KeyOn(voice, on) => {
                    if let Some(k) = self.keyed.get_mut(voice as usize) {
                        *k = on;
                    }
                    events.on_voice_keyon(voice, on);
                }
                ScriptEvent::PcmStart {
                    voice,
                    sample,
                    rate,
                    volume,
                } => {
                    if let Some(n) = self.pcm_notes.get_mut(voice as usize) {
                        *n = true;
                    }
                    events.on_pcm_start(voice, sample, rate, volume);
                }
                ScriptEvent::PcmStop(voice) => {
                    if let Some(n) = self.pcm_notes.get_mut(voice as usize) {
                        *n = false;
                    }
                    events.on_pcm_stop(voice);
                }
            }
        }
    }

    fn synthesize(&mut self, out: &mut [i16]) {
        let voices = self.keyed.iter().filter(|&&k| k).count() as i32;
        let value = (self.level as i32 * voices).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        out.fill(value);
        self.now += (out.len() / 2) as u64;
    }

    fn is_finished(&self) -> bool {
        self.loaded && self.now >= self.length
    }

    fn pcm_note_on(&self, voice: usize) -> bool {
        self.pcm_notes.get(voice).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Log(Vec<String>);

    impl VoiceEventSink for Log {
        fn on_voice_keyon(&mut self, voice: u8, on: bool) {
            self.0.push(format!("key {voice} {on}"));
        }
    }

    #[test]
    fn test_no_sequencer_rejects() {
        let seq = NoSequencer;
        assert!(matches!(
            seq.work_size(&[0; 8], 0),
            Err(ChipdeckError::Unsupported(_))
        ));
        assert!(seq.is_finished());
    }

    #[test]
    fn test_work_area_sizes() {
        let work = WorkArea::allocate(WorkSize { score: 10, bank: 0 }).unwrap();
        assert_eq!(work.score.len(), 10);
        assert!(work.bank.is_empty());
    }

    #[test]
    fn test_scripted_event_timing() {
        let mut seq = ScriptedSequencer::new(
            vec![
                (0, ScriptEvent::KeyOn(0, true)),
                (100, ScriptEvent::KeyOn(0, false)),
            ],
            300,
            1000,
        );
        let work = WorkArea::allocate(seq.work_size(b"score", 0).unwrap()).unwrap();
        seq.load(b"score", None, work, 22_050).unwrap();
        assert_eq!(seq.work_len(), 5);
        assert_eq!(seq.samples_until_event(), 0);

        let mut log = Log::default();
        seq.advance_event(&mut log);
        assert_eq!(seq.samples_until_event(), 100);

        let mut buf = vec![0i16; 200];
        seq.synthesize(&mut buf);
        assert!(buf.iter().all(|&s| s == 1000));
        assert_eq!(seq.samples_until_event(), 0);
        seq.advance_event(&mut log);
        assert_eq!(seq.samples_until_event(), 200);
        assert_eq!(log.0, vec!["key 0 true", "key 0 false"]);
        assert!(!seq.is_finished());

        let mut buf = vec![0i16; 400];
        seq.synthesize(&mut buf);
        assert!(buf.iter().all(|&s| s == 0));
        assert!(seq.is_finished());
    }
}
