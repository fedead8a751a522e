//! `chipdeck` command-line player
//!
//! Plays a VGM/VGZ track on the default audio device (`streaming` feature)
//! or renders it to a WAV file (`export-wav` feature), printing the voice
//! meters while it runs. Both modes drive the same session tick loop.
//!
//! The binary ships no MDX sequencer and only the SSG part of the YM2203, so
//! MDX scores are refused up front and FM voices of a VGM stay silent. Hosts
//! that supply a `Sequencer` and a full `ChipCore` play both through the
//! library.

use anyhow::{bail, Context};
use chipdeck::analysis::MeterSet;
use chipdeck::{EngineConfig, FsStore, NoSequencer, PlaybackSession, SsgCore, TrackFormat};
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};

type Session = PlaybackSession<SsgCore, NoSequencer>;

/// WAV length cap when `--seconds` is not given (looping tracks never end).
const DEFAULT_WAV_SECONDS: f32 = 180.0;

const METER_GLYPHS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Parsed command line.
#[derive(Debug, Default)]
struct Options {
    track: Option<PathBuf>,
    wav: Option<PathBuf>,
    config: Option<PathBuf>,
    seconds: Option<f32>,
    volume: Option<u8>,
    quiet: bool,
}

fn usage() {
    eprintln!(
        "Usage:\n  chipdeck [options] <track.vgm|track.vgz>\n\n\
         Options:\n  \
         --wav <out.wav>      Render to a WAV file instead of the audio device\n  \
         --seconds <n>        Stop after n seconds\n  \
         --config <cfg.json>  Engine configuration\n  \
         --volume <0-255>     Master volume\n  \
         -q, --quiet          Do not print meters\n  \
         -h, --help           Show this help\n\n\
         MDX scores need a sequencer and are not playable from this binary.\n\
         Only the SSG channels of the YM2203 are synthesized.\n"
    );
}

fn parse_args() -> anyhow::Result<Option<Options>> {
    let mut opts = Options::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(None),
            "--quiet" | "-q" => opts.quiet = true,
            "--wav" => opts.wav = Some(args.next().context("--wav requires a path")?.into()),
            "--config" => {
                opts.config = Some(args.next().context("--config requires a path")?.into())
            }
            "--seconds" => {
                let value = args.next().context("--seconds requires a value")?;
                opts.seconds = Some(
                    value
                        .parse()
                        .with_context(|| format!("invalid --seconds value '{value}'"))?,
                );
            }
            "--volume" => {
                let value = args.next().context("--volume requires a value")?;
                opts.volume = Some(
                    value
                        .parse()
                        .with_context(|| format!("invalid --volume value '{value}'"))?,
                );
            }
            _ if arg.starts_with('-') => bail!("unknown flag: {arg}"),
            _ => opts.track = Some(arg.into()),
        }
    }
    if opts.track.is_none() {
        return Ok(None);
    }
    Ok(Some(opts))
}

fn meter_line(meters: &MeterSet) -> String {
    meters
        .meters()
        .iter()
        .map(|m| {
            let idx = (m.val * (METER_GLYPHS.len() - 1) as f32).round() as usize;
            METER_GLYPHS[idx.min(METER_GLYPHS.len() - 1)]
        })
        .collect()
}

fn print_meters(session: &Session) {
    let columns: String = session
        .spectrum()
        .columns()
        .iter()
        .map(|c| {
            let idx = (c.val * (METER_GLYPHS.len() - 1) as f32).round() as usize;
            METER_GLYPHS[idx.min(METER_GLYPHS.len() - 1)]
        })
        .collect();
    print!(
        "\r[{}] [{columns}] {:>4} ms ",
        meter_line(session.meters()),
        session.banked_ms()
    );
    let _ = std::io::stdout().flush();
}

/// Load `track`, refusing formats this binary cannot render.
fn open_track(session: &mut Session, track: &Path) -> anyhow::Result<()> {
    if TrackFormat::from_path(track) == Some(TrackFormat::Tracker) {
        bail!(
            "{}: MDX playback needs a sequencer, which this binary does not include",
            track.display()
        );
    }
    session
        .load_path(track, &FsStore)
        .with_context(|| format!("cannot load {}", track.display()))
}

#[cfg(feature = "export-wav")]
fn render_wav(session: &mut Session, out: &std::path::Path, opts: &Options) -> anyhow::Result<()> {
    use chipdeck::streaming::{ManualClock, WavSink};

    let rate = session.config().output_rate;
    let mut sink = WavSink::create(out, rate, 1)
        .with_context(|| format!("cannot create {}", out.display()))?;
    let clock = ManualClock::new(0);
    let limit_us = (opts.seconds.unwrap_or(DEFAULT_WAV_SECONDS) * 1_000_000.0) as u64;
    let step_ms = session.config().ui_interval_ms.max(1) as u64;

    let mut elapsed_us = 0;
    let mut ticks = 0u64;
    while session.is_playing() && elapsed_us < limit_us {
        session.tick(&clock, &mut sink);
        if !opts.quiet && ticks % 10 == 0 {
            print_meters(session);
        }
        clock.advance_ms(step_ms);
        elapsed_us += step_ms * 1_000;
        ticks += 1;
    }
    if !opts.quiet {
        println!();
    }

    let written = sink.samples_written();
    sink.finalize()?;
    println!(
        "wrote {} ({:.1} s)",
        out.display(),
        written as f32 / rate as f32
    );
    Ok(())
}

#[cfg(not(feature = "export-wav"))]
fn render_wav(_: &mut Session, _: &std::path::Path, _: &Options) -> anyhow::Result<()> {
    bail!("WAV rendering requires the \"export-wav\" feature")
}

#[cfg(feature = "streaming")]
fn play(session: &mut Session, opts: &Options) -> anyhow::Result<()> {
    use chipdeck::streaming::{
        AudioDevice, Clock, MonotonicClock, RingBufferSink, StreamConfig,
    };
    use std::time::Duration;

    let rate = session.config().output_rate;
    let (mut sink, consumer) = RingBufferSink::new(StreamConfig::stable(rate))?;
    let device = AudioDevice::new(rate, consumer.clone())?;
    let clock = MonotonicClock::new();
    let limit_ms = opts.seconds.map(|s| (s * 1_000.0) as u64);
    let mut last_print = 0;

    loop {
        session.tick(&clock, &mut sink);
        let now = clock.now_ms();
        if !opts.quiet && now.saturating_sub(last_print) >= 100 {
            print_meters(session);
            last_print = now;
        }
        if limit_ms.is_some_and(|limit| now >= limit) {
            break;
        }
        if !session.is_playing() && consumer.available() == 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    device.finish();
    if !opts.quiet {
        println!();
    }
    log::info!("{} underruns", consumer.underruns());
    Ok(())
}

#[cfg(not(feature = "streaming"))]
fn play(_: &mut Session, _: &Options) -> anyhow::Result<()> {
    bail!("audio playback requires the \"streaming\" feature; use --wav <out.wav> to render")
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let Some(opts) = parse_args()? else {
        usage();
        return Ok(());
    };

    let config = match &opts.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let mut session: Session = PlaybackSession::new(config, NoSequencer::default);
    if let Some(volume) = opts.volume {
        session.set_volume(volume);
    }

    let Some(track) = &opts.track else {
        bail!("no track given");
    };
    open_track(&mut session, track)?;

    println!(
        "{} [{}]",
        session.title().unwrap_or_default(),
        session.format().map_or("?", |f| f.label())
    );

    match &opts.wav {
        Some(out) => render_wav(&mut session, out, &opts),
        None => play(&mut session, &opts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chipdeck::MeterTuning;

    fn session() -> Session {
        PlaybackSession::new(EngineConfig::default(), NoSequencer::default)
    }

    #[test]
    fn test_mdx_is_refused_before_loading() {
        let dir = tempfile::tempdir().unwrap();
        let track = dir.path().join("Song.MDX");
        std::fs::write(&track, b"Song\r\n\x1akit\0\0\0\0\0\0\0\0").unwrap();

        let mut s = session();
        let err = open_track(&mut s, &track).unwrap_err();
        assert!(err.to_string().contains("needs a sequencer"), "{err}");
        assert!(s.format().is_none());
        assert!(!s.is_playing());
    }

    #[test]
    fn test_vgm_load_errors_carry_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let track = dir.path().join("broken.vgm");
        std::fs::write(&track, b"not a vgm").unwrap();

        let err = open_track(&mut session(), &track).unwrap_err();
        assert!(err.to_string().starts_with("cannot load"), "{err}");
        assert!(err.chain().any(|e| e.to_string().contains("Truncated")));
    }

    #[test]
    fn test_meter_line_has_one_glyph_per_meter() {
        let mut set = MeterSet::new(6, MeterTuning::voices());
        for _ in 0..20 {
            set.update(0, 1.0, 0);
        }
        let line = meter_line(&set);
        assert_eq!(line.chars().count(), 6);
        assert_eq!(line.chars().next(), Some('█'));
        assert_eq!(line.chars().nth(1), Some(' '));
    }
}
