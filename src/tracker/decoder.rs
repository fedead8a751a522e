//! MDX decoder
//!
//! Owns one loaded score: the header, the resolved PDX bank, the sequencer
//! and the ADPCM voices. Rendering alternates between letting the sequencer
//! process its pending events and synthesizing up to the next event, so the
//! ADPCM voices always start and stop on the exact sample the score asks for.

use super::mdx::MdxHeader;
use super::pcm::{PcmMask, PcmVoices, PCM_VOICES};
use super::pdx::{PcmBank, SampleRef};
use super::sequencer::{Sequencer, VoiceEventSink, WorkArea};
use crate::config::TrackerConfig;
use crate::source::TrackStore;
use crate::{ChipdeckError, Result};
use std::path::{Path, PathBuf};

/// Consecutive events without audio progress before the score is treated as
/// ended.
const MAX_IDLE_EVENTS: u32 = 256;

/// Routes sequencer events: FM activity to the caller, ADPCM to the voices.
struct EventRouter<'a, 's> {
    voices: &'a mut PcmVoices,
    bank: Option<&'a PcmBank>,
    fm: &'a mut (dyn VoiceEventSink + 's),
}

impl VoiceEventSink for EventRouter<'_, '_> {
    fn on_register_write(&mut self, reg: u8, value: u8) {
        self.fm.on_register_write(reg, value);
    }

    fn on_voice_keyon(&mut self, voice: u8, on: bool) {
        self.fm.on_voice_keyon(voice, on);
    }

    fn on_pcm_start(&mut self, voice: u8, sample: SampleRef, rate_code: u8, volume_code: u8) {
        self.voices
            .start(self.bank, voice, sample, rate_code, volume_code);
    }

    fn on_pcm_stop(&mut self, voice: u8) {
        self.voices.stop(voice);
    }

    fn on_pcm_volume(&mut self, voice: u8, volume_code: u8) {
        self.voices.set_volume(voice, volume_code);
    }

    fn on_pcm_frequency(&mut self, voice: u8, rate_code: u8) {
        self.voices.set_frequency(voice, rate_code);
    }
}

/// Locate the sample bank named by `header` next to `track_path`.
///
/// Tries the stored name, the name with `.PDX` appended, then a
/// case-insensitive match over the directory listing.
pub fn resolve_bank_path(
    header: &MdxHeader,
    track_path: &Path,
    store: &dyn TrackStore,
) -> Option<PathBuf> {
    let candidates = header.pdx_candidates();
    if candidates.is_empty() {
        return None;
    }
    let dir = track_path.parent().unwrap_or_else(|| Path::new(""));

    for name in &candidates {
        let path = dir.join(name);
        if store.exists(&path) {
            return Some(path);
        }
    }

    let listing = match store.list_dir(dir) {
        Ok(names) => names,
        Err(e) => {
            log::warn!("cannot list {} for PDX lookup: {e}", dir.display());
            return None;
        }
    };
    candidates.iter().find_map(|want| {
        listing
            .iter()
            .find(|have| have.eq_ignore_ascii_case(want))
            .map(|have| dir.join(have))
    })
}

/// A loaded MDX score ready to render.
#[derive(Debug)]
pub struct TrackerDecoder<Q: Sequencer> {
    sequencer: Q,
    header: MdxHeader,
    bank: Option<PcmBank>,
    bank_path: Option<PathBuf>,
    voices: PcmVoices,
    stereo: Vec<i16>,
    native_rate: u32,
    render_block: usize,
    playing: bool,
    pcm_mask: PcmMask,
}

impl<Q: Sequencer> TrackerDecoder<Q> {
    /// Parse `data`, resolve its sample bank through `store` and load the
    /// score into `sequencer`.
    ///
    /// A missing or unreadable bank only disables ADPCM; header, allocation
    /// and sequencer failures fail the load.
    pub fn load(
        mut sequencer: Q,
        data: &[u8],
        path: &Path,
        store: &dyn TrackStore,
        config: &TrackerConfig,
    ) -> Result<Self> {
        let header = MdxHeader::parse(data)?;

        let mut bank_path = resolve_bank_path(&header, path, store);
        let mut bank_image = None;
        let mut bank = None;
        if let Some(p) = &bank_path {
            match store.read(p).map_err(ChipdeckError::from).and_then(|image| {
                let parsed = PcmBank::parse(&image)?;
                Ok((image, parsed))
            }) {
                Ok((image, parsed)) => {
                    log::debug!("PDX {} resolved ({} samples)", p.display(), parsed.len());
                    bank_image = Some(image);
                    bank = Some(parsed);
                }
                Err(e) => log::warn!("PDX {} unusable, ADPCM disabled: {e}", p.display()),
            }
        } else if let Some(name) = &header.pdx_name {
            log::warn!("PDX '{name}' not found next to {}, ADPCM disabled", path.display());
        }
        if bank.is_none() {
            bank_path = None;
        }

        let native_rate = if bank.is_some() {
            config.render_rate_pcm
        } else {
            config.render_rate
        };

        let size = sequencer.work_size(data, bank_image.as_ref().map_or(0, Vec::len))?;
        let work = WorkArea::allocate(size)?;
        sequencer.load(data, bank_image.as_deref(), work, native_rate)?;

        let render_block = config.render_block.max(1);
        let mut stereo = Vec::new();
        stereo
            .try_reserve_exact(render_block * 2)
            .map_err(|_| ChipdeckError::Allocation(render_block * 2 * std::mem::size_of::<i16>()))?;
        stereo.resize(render_block * 2, 0);

        log::info!(
            "MDX '{}' loaded at {native_rate} Hz{}",
            header.title_lossy(),
            if bank.is_some() { " with ADPCM" } else { "" }
        );

        Ok(TrackerDecoder {
            sequencer,
            header,
            bank,
            bank_path,
            voices: PcmVoices::new(native_rate),
            stereo,
            native_rate,
            render_block,
            playing: true,
            pcm_mask: PcmMask::empty(),
        })
    }

    /// Fill `dst` with mono native-rate samples, reporting FM voice activity
    /// to `fm`. Once the score ends the rest of `dst` is zero-filled.
    pub fn render_mono(&mut self, dst: &mut [i16], fm: &mut dyn VoiceEventSink) {
        let mut filled = 0;
        let mut idle_events = 0;

        while self.playing && filled < dst.len() {
            if self.sequencer.is_finished() {
                log::debug!("MDX score finished");
                self.playing = false;
                break;
            }

            let until = self.sequencer.samples_until_event();
            if until == 0 {
                let mut router = EventRouter {
                    voices: &mut self.voices,
                    bank: self.bank.as_ref(),
                    fm: &mut *fm,
                };
                self.sequencer.advance_event(&mut router);
                idle_events += 1;
                if idle_events > MAX_IDLE_EVENTS {
                    log::warn!("MDX sequencer stalled without producing audio, stopping");
                    self.playing = false;
                }
                continue;
            }
            idle_events = 0;

            let chunk = until.min(dst.len() - filled).min(self.render_block);
            let stereo = &mut self.stereo[..chunk * 2];
            self.sequencer.synthesize(stereo);

            for (out, frame) in dst[filled..filled + chunk]
                .iter_mut()
                .zip(stereo.chunks_exact(2))
            {
                let mut mono = (frame[0] as i32 + frame[1] as i32) / 2;
                if let Some(bank) = &self.bank {
                    mono += self.voices.mix_one(bank);
                }
                *out = mono.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            }
            filled += chunk;
        }

        dst[filled..].fill(0);
        self.refresh_pcm_mask();
    }

    fn refresh_pcm_mask(&mut self) {
        self.pcm_mask = if self.bank.is_some() && self.playing {
            (0..PCM_VOICES)
                .filter(|&v| self.sequencer.pcm_note_on(v))
                .fold(PcmMask::empty(), |m, v| m | PcmMask::voice(v))
        } else {
            PcmMask::empty()
        };
    }

    /// Sounding ADPCM voices as an 8-bit mask; 0 without a bank.
    pub fn pcm_mask(&self) -> u8 {
        self.pcm_mask.bits()
    }

    /// Whether the score is still playing.
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Stop playback; further renders produce silence.
    pub fn stop(&mut self) {
        self.playing = false;
        self.voices.reset();
        self.pcm_mask = PcmMask::empty();
    }

    /// Whether a sample bank was resolved and decoded.
    pub fn has_bank(&self) -> bool {
        self.bank.is_some()
    }

    /// The decoded sample bank.
    pub fn bank(&self) -> Option<&PcmBank> {
        self.bank.as_ref()
    }

    /// Path the bank was loaded from.
    pub fn bank_path(&self) -> Option<&Path> {
        self.bank_path.as_deref()
    }

    /// Native render rate.
    pub fn native_rate(&self) -> u32 {
        self.native_rate
    }

    /// Parsed header.
    pub fn header(&self) -> &MdxHeader {
        &self.header
    }

    /// Title with non-ASCII bytes replaced.
    pub fn title(&self) -> String {
        self.header.title_lossy()
    }

    /// ADPCM voice state.
    pub fn voices(&self) -> &PcmVoices {
        &self.voices
    }

    /// The wrapped sequencer.
    pub fn sequencer(&self) -> &Q {
        &self.sequencer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::pdx::PDX_TABLE_LEN;
    use crate::tracker::sequencer::{NoSequencer, ScriptEvent, ScriptedSequencer};
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemStore(HashMap<PathBuf, Vec<u8>>);

    impl MemStore {
        fn with(mut self, path: &str, bytes: Vec<u8>) -> Self {
            self.0.insert(PathBuf::from(path), bytes);
            self
        }
    }

    impl TrackStore for MemStore {
        fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))
        }

        fn exists(&self, path: &Path) -> bool {
            self.0.contains_key(path)
        }

        fn list_dir(&self, dir: &Path) -> std::io::Result<Vec<String>> {
            Ok(self
                .0
                .keys()
                .filter(|p| p.parent() == Some(dir))
                .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
                .collect())
        }
    }

    #[derive(Default)]
    struct KeyLog(Vec<(u8, bool)>);

    impl VoiceEventSink for KeyLog {
        fn on_voice_keyon(&mut self, voice: u8, on: bool) {
            self.0.push((voice, on));
        }
    }

    fn mdx(pdx: &str) -> Vec<u8> {
        let mut data = b"Test song\r\n\x1a".to_vec();
        data.extend_from_slice(pdx.as_bytes());
        data.push(0);
        data.extend_from_slice(&[0u8; 16]);
        data
    }

    fn pdx(adpcm: &[u8]) -> (Vec<u8>, SampleRef) {
        let mut image = vec![0u8; PDX_TABLE_LEN];
        let source = SampleRef {
            offset: PDX_TABLE_LEN as u32,
            len: adpcm.len() as u32,
        };
        image[0..4].copy_from_slice(&source.offset.to_be_bytes());
        image[4..8].copy_from_slice(&source.len.to_be_bytes());
        image.extend_from_slice(adpcm);
        (image, source)
    }

    fn pcm_script(source: SampleRef) -> ScriptedSequencer {
        ScriptedSequencer::new(
            vec![
                (0, ScriptEvent::KeyOn(0, true)),
                (
                    10,
                    ScriptEvent::PcmStart {
                        voice: 1,
                        sample: source,
                        rate: 4,
                        volume: 15,
                    },
                ),
            ],
            1_000,
            0,
        )
    }

    #[test]
    fn test_unresolved_bank_still_loads() {
        let (_, source) = pdx(&[0x77; 32]);
        let store = MemStore::default();
        let mut dec = TrackerDecoder::load(
            pcm_script(source),
            &mdx("missing"),
            Path::new("songs/a.mdx"),
            &store,
            &TrackerConfig::default(),
        )
        .unwrap();
        assert!(!dec.has_bank());
        assert_eq!(dec.native_rate(), 22_050);

        let mut buf = vec![1i16; 256];
        for _ in 0..3 {
            dec.render_mono(&mut buf, &mut KeyLog::default());
            assert_eq!(dec.pcm_mask(), 0);
            assert!(buf.iter().all(|&s| s == 0), "no ADPCM without a bank");
        }
    }

    #[test]
    fn test_bank_resolution_order() {
        let header = MdxHeader::parse(&mdx("Kit")).unwrap();
        let exact = MemStore::default().with("dir/Kit", vec![1]);
        assert_eq!(
            resolve_bank_path(&header, Path::new("dir/s.mdx"), &exact),
            Some(PathBuf::from("dir/Kit"))
        );
        let ext = MemStore::default().with("dir/Kit.PDX", vec![1]);
        assert_eq!(
            resolve_bank_path(&header, Path::new("dir/s.mdx"), &ext),
            Some(PathBuf::from("dir/Kit.PDX"))
        );
        let folded = MemStore::default().with("dir/kit.pdx", vec![1]);
        assert_eq!(
            resolve_bank_path(&header, Path::new("dir/s.mdx"), &folded),
            Some(PathBuf::from("dir/kit.pdx"))
        );
        let elsewhere = MemStore::default().with("other/kit.pdx", vec![1]);
        assert_eq!(
            resolve_bank_path(&header, Path::new("dir/s.mdx"), &elsewhere),
            None
        );
    }

    #[test]
    fn test_pcm_voice_mixed_from_bank() {
        let (image, source) = pdx(&[0x77; 32]);
        let store = MemStore::default().with("songs/kit.pdx", image);
        let mut dec = TrackerDecoder::load(
            pcm_script(source),
            &mdx("KIT"),
            Path::new("songs/a.mdx"),
            &store,
            &TrackerConfig::default(),
        )
        .unwrap();
        assert!(dec.has_bank());
        assert_eq!(dec.native_rate(), 31_250);
        assert_eq!(dec.bank_path(), Some(Path::new("songs/kit.pdx")));

        let mut keys = KeyLog::default();
        let mut buf = vec![0i16; 64];
        dec.render_mono(&mut buf, &mut keys);
        assert_eq!(keys.0, vec![(0, true)]);
        assert!(buf[..10].iter().all(|&s| s == 0));
        assert!(buf[10] > 0, "ADPCM starts on its event sample");
        assert_eq!(dec.pcm_mask(), 0b10);
    }

    #[test]
    fn test_score_end_zero_fills() {
        let seq = ScriptedSequencer::new(vec![(0, ScriptEvent::KeyOn(3, true))], 100, 500);
        let mut dec = TrackerDecoder::load(
            seq,
            &mdx(""),
            Path::new("a.mdx"),
            &MemStore::default(),
            &TrackerConfig::default(),
        )
        .unwrap();
        let mut buf = vec![7i16; 300];
        dec.render_mono(&mut buf, &mut KeyLog::default());
        assert!(buf[..100].iter().all(|&s| s == 500));
        assert!(buf[100..].iter().all(|&s| s == 0));
        assert!(!dec.is_playing());
    }

    #[test]
    fn test_no_sequencer_fails_load() {
        let result = TrackerDecoder::load(
            NoSequencer,
            &mdx(""),
            Path::new("a.mdx"),
            &MemStore::default(),
            &TrackerConfig::default(),
        );
        assert!(matches!(result, Err(ChipdeckError::Unsupported(_))));
    }

    #[test]
    fn test_bad_header_fails_load() {
        let result = TrackerDecoder::load(
            ScriptedSequencer::default(),
            b"garbage without terminators",
            Path::new("a.mdx"),
            &MemStore::default(),
            &TrackerConfig::default(),
        );
        assert!(result.is_err());
    }
}
