use std::path::{Path, PathBuf};

use chipdeck::tracker::pdx::PDX_TABLE_LEN;
use chipdeck::tracker::{SampleRef, ScriptEvent, ScriptedSequencer};
use chipdeck::{EngineConfig, FsStore, PlaybackSession, SsgCore};

type Session = PlaybackSession<SsgCore, ScriptedSequencer>;

fn mdx(pdx: &str) -> Vec<u8> {
    let mut data = b"Stage 1\r\n\x1a".to_vec();
    data.extend_from_slice(pdx.as_bytes());
    data.push(0);
    data.extend_from_slice(&[0u8; 16]);
    data
}

fn pdx(adpcm: &[u8]) -> (Vec<u8>, SampleRef) {
    let mut image = vec![0u8; PDX_TABLE_LEN];
    let sample = SampleRef {
        offset: PDX_TABLE_LEN as u32,
        len: adpcm.len() as u32,
    };
    image[0..4].copy_from_slice(&sample.offset.to_be_bytes());
    image[4..8].copy_from_slice(&sample.len.to_be_bytes());
    image.extend_from_slice(adpcm);
    (image, sample)
}

fn session(sample: SampleRef, length: u64) -> Session {
    PlaybackSession::new(EngineConfig::default(), move || {
        ScriptedSequencer::new(
            vec![
                (0, ScriptEvent::KeyOn(0, true)),
                (
                    10,
                    ScriptEvent::PcmStart {
                        voice: 1,
                        sample,
                        rate: 4,
                        volume: 15,
                    },
                ),
            ],
            length,
            2_000,
        )
    })
}

fn write_track(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

#[test]
fn missing_bank_plays_without_adpcm() {
    let dir = tempfile::tempdir().unwrap();
    let track = write_track(dir.path(), "song.mdx", &mdx("absent"));
    let (_, sample) = pdx(&[0x77; 32]);

    let mut s = session(sample, 100_000);
    s.load_path(&track, &FsStore).unwrap();
    assert!(!s.is_heavy());
    assert_eq!(s.meters().len(), 8);
    assert_eq!(s.title().as_deref(), Some("Stage 1"));

    s.render_block();
    assert!(s.is_playing());
    assert_eq!(s.pcm_mask(), 0);
}

#[test]
fn bank_name_matches_case_insensitively() {
    let dir = tempfile::tempdir().unwrap();
    let (image, sample) = pdx(&[0x77; 4_000]);
    write_track(dir.path(), "kit.pdx", &image);
    let track = write_track(dir.path(), "song.mdx", &mdx("Kit"));

    let mut s = session(sample, 100_000);
    s.load_path(&track, &FsStore).unwrap();
    assert!(s.is_heavy());
    assert_eq!(s.meters().len(), 16);

    s.render_block();
    assert_eq!(s.pcm_mask(), 0b10);

    s.update_analysis(0);
    let meters = s.meters();
    assert!(meters.get(0).unwrap().val > 0.0, "keyed FM voice");
    assert!(meters.get(9).unwrap().val > 0.0, "sounding PCM voice");
    assert_eq!(meters.get(8).unwrap().val, 0.0);
}

#[test]
fn heavy_profile_banks_more_audio() {
    use chipdeck::streaming::{AudioSink, ManualClock, PumpStop, QueueState};

    #[derive(Default)]
    struct Counter(usize);

    impl AudioSink for Counter {
        fn queue_state(&self) -> QueueState {
            QueueState::Accepting
        }

        fn submit(&mut self, _block: &[i16]) -> chipdeck::Result<()> {
            self.0 += 1;
            Ok(())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let (image, sample) = pdx(&[0x77; 64]);
    write_track(dir.path(), "KIT.PDX", &image);
    let track = write_track(dir.path(), "song.mdx", &mdx("kit"));

    let mut s = session(sample, 1_000_000);
    s.load_path(&track, &FsStore).unwrap();

    let clock = ManualClock::new(0);
    let mut sink = Counter::default();
    let report = s.tick(&clock, &mut sink).unwrap();
    // 600 ms of 1024-sample blocks at 44.1 kHz
    assert_eq!(report.stop, PumpStop::TargetReached);
    assert_eq!(sink.0, 26);
    assert!(s.banked_ms() >= 600);
}

#[test]
fn short_score_ends_playback() {
    let dir = tempfile::tempdir().unwrap();
    let track = write_track(dir.path(), "jingle.mdx", &mdx(""));
    let (_, sample) = pdx(&[0x77; 8]);

    let mut s = session(sample, 500);
    s.load_path(&track, &FsStore).unwrap();
    assert!(s.is_playing());
    for _ in 0..4 {
        s.render_block();
    }
    assert!(!s.is_playing());
    assert_eq!(s.pcm_mask(), 0);
}
