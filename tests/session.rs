use chipdeck::source::{TrackFormat, TrackSource};
use chipdeck::streaming::{ManualClock, PumpStop, RingBufferSink};
use chipdeck::vgm::VgmImage;
use chipdeck::{EngineConfig, FsStore, NoSequencer, PlaybackSession, SsgCore};

type Session = PlaybackSession<SsgCore, NoSequencer>;

fn session() -> Session {
    PlaybackSession::new(EngineConfig::default(), NoSequencer::default)
}

fn tone(period: u8, name: &str) -> TrackSource {
    let image = VgmImage::new(3_993_600)
        .write(0x00, period)
        .write(0x07, 0x3E)
        .write(0x08, 0x0F)
        .loop_here()
        .wait(30_000)
        .write(0x08, 0x0C)
        .wait(30_000)
        .end();
    TrackSource::from_bytes(image, TrackFormat::RegisterStream, name).unwrap()
}

fn capture(s: &mut Session, blocks: usize) -> (Vec<i16>, Vec<f32>) {
    let mut pcm = Vec::new();
    for _ in 0..blocks {
        pcm.extend_from_slice(s.render_block());
    }
    s.update_analysis(100);
    (pcm, s.spectrum().magnitudes().to_vec())
}

#[test]
fn switching_back_replays_identically() {
    let mut s = session();

    s.load_source(tone(0x40, "a.vgm"), &FsStore).unwrap();
    let (first, first_spec) = capture(&mut s, 3);
    let first_meters = s.meters().meters().to_vec();

    s.load_source(tone(0x90, "b.vgm"), &FsStore).unwrap();
    let (other, _) = capture(&mut s, 3);
    assert_ne!(first, other);

    s.load_source(tone(0x40, "a.vgm"), &FsStore).unwrap();
    let (again, again_spec) = capture(&mut s, 3);
    assert_eq!(first, again);
    assert_eq!(first_spec, again_spec);
    assert_eq!(first_meters, s.meters().meters().to_vec());
}

#[test]
fn ring_sink_fills_to_target_then_idles() {
    let mut s = session();
    s.load_source(tone(0x40, "a.vgm"), &FsStore).unwrap();
    let (mut sink, consumer) = RingBufferSink::with_latency_ms(44_100, 1024, 800).unwrap();
    let clock = ManualClock::new(0);

    let report = s.tick(&clock, &mut sink).unwrap();
    assert_eq!(report.blocks, 18);
    assert_eq!(report.stop, PumpStop::TargetReached);
    assert_eq!(sink.queued(), 18 * 1024);

    // no time passed: nothing to synthesize
    let report = s.tick(&clock, &mut sink).unwrap();
    assert_eq!(report.blocks, 0);

    clock.advance_ms(100);
    let mut played = vec![0i16; 4_410];
    assert_eq!(consumer.read(&mut played), 4_410);
    let report = s.tick(&clock, &mut sink).unwrap();
    assert_eq!(report.blocks, 4);
    assert!(s.banked_ms() >= 400);
}

#[test]
fn meters_follow_ssg_activity() {
    let mut s = session();
    s.load_source(tone(0x40, "a.vgm"), &FsStore).unwrap();
    s.render_block();
    s.update_analysis(0);
    let meters = s.meters();
    assert_eq!(meters.len(), 6);
    assert!(meters.get(3).unwrap().val > 0.0, "SSG A is sounding");
    assert_eq!(meters.get(4).unwrap().val, 0.0);
    assert_eq!(meters.get(0).unwrap().val, 0.0);
}

#[test]
fn unload_stops_ticking() {
    let mut s = session();
    s.load_source(tone(0x40, "a.vgm"), &FsStore).unwrap();
    s.unload();
    let (mut sink, _consumer) = RingBufferSink::with_latency_ms(44_100, 1024, 800).unwrap();
    assert!(s.tick(&ManualClock::new(0), &mut sink).is_none());
    assert!(s.meters().is_empty());
    assert!(!s.is_playing());
}

#[cfg(feature = "export-wav")]
#[test]
fn renders_to_wav() {
    use chipdeck::streaming::WavSink;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.wav");

    let mut s = session();
    s.load_source(tone(0x40, "a.vgm"), &FsStore).unwrap();
    let mut sink = WavSink::create(&out, 44_100, 1).unwrap();
    let clock = ManualClock::new(0);
    s.tick(&clock, &mut sink);
    assert_eq!(sink.samples_written(), 18 * 1024);
    sink.finalize().unwrap();

    let reader = hound::WavReader::open(&out).unwrap();
    assert_eq!(reader.spec().sample_rate, 44_100);
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.len(), 18 * 1024);
}
