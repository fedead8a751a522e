//! Playback session
//!
//! [`PlaybackSession`] owns everything that belongs to the current track:
//! the register-stream interpreter and chip, or the tracker decoder, plus
//! their resamplers and voice-activity trackers. Loading builds the complete
//! new track first and swaps it in only on success, so a failed load leaves
//! the previous track playing untouched.
//!
//! The host drives the session with [`PlaybackSession::tick`] from its main
//! loop: each tick tops up the audio sink through the [`BufferingEngine`]
//! and, at UI cadence, advances the meters and the spectrum.

use crate::analysis::{
    MeterSet, OpmActivity, OpnActivity, Spectrum, OPM_METERS, OPM_PCM_METERS, OPN_METERS,
};
use crate::chip::{ChipAdapter, ChipCore, RegisterSink};
use crate::config::EngineConfig;
use crate::resample::{CubicResampler, LinearResampler, OnePoleLowPass};
use crate::source::{TrackFormat, TrackSource, TrackStore};
use crate::streaming::{AudioSink, BlockSource, BufferingEngine, Clock, PumpReport};
use crate::tracker::{Sequencer, TrackerDecoder};
use crate::vgm::StreamInterpreter;
use crate::{ChipdeckError, Result};
use std::path::Path;

/// Forwards each register write to the chip and the activity tracker.
struct FanOut<'a, C: ChipCore> {
    chip: &'a mut ChipAdapter<C>,
    activity: &'a mut OpnActivity,
}

impl<C: ChipCore> RegisterSink for FanOut<'_, C> {
    #[inline]
    fn write_reg(&mut self, reg: u8, value: u8) {
        self.chip.write_reg(reg, value);
        self.activity.write_reg(reg, value);
    }
}

struct RegisterStreamTrack<C: ChipCore> {
    interpreter: StreamInterpreter,
    chip: ChipAdapter<C>,
    activity: OpnActivity,
    /// `None` when the chip already runs at the output rate
    resampler: Option<LinearResampler>,
}

impl<C: ChipCore> RegisterStreamTrack<C> {
    fn render(&mut self, out: &mut [i16]) {
        let RegisterStreamTrack {
            interpreter,
            chip,
            activity,
            resampler,
        } = self;

        for sample in out.iter_mut() {
            if !interpreter.is_playing() {
                *sample = 0;
                continue;
            }
            interpreter.step_one_sample(&mut FanOut {
                chip: &mut *chip,
                activity: &mut *activity,
            });
            *sample = match resampler {
                Some(r) => r.next_sample(|| chip.render_one()),
                None => chip.render_one(),
            };
        }
    }
}

/// Native-rate tracker samples, rendered one decoder block at a time.
struct NativeFeed {
    buf: Vec<i16>,
    pos: usize,
}

impl NativeFeed {
    fn with_len(len: usize) -> Result<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| ChipdeckError::Allocation(len * std::mem::size_of::<i16>()))?;
        buf.resize(len, 0);
        Ok(NativeFeed { pos: len, buf })
    }

    #[inline]
    fn next<Q: Sequencer>(
        &mut self,
        decoder: &mut TrackerDecoder<Q>,
        activity: &mut OpmActivity,
    ) -> i16 {
        if self.pos >= self.buf.len() {
            decoder.render_mono(&mut self.buf, activity);
            self.pos = 0;
        }
        let s = self.buf[self.pos];
        self.pos += 1;
        s
    }
}

struct TrackerTrack<Q: Sequencer> {
    decoder: TrackerDecoder<Q>,
    activity: OpmActivity,
    feed: NativeFeed,
    /// `None` when the decoder already renders at the output rate
    resampler: Option<CubicResampler>,
    lowpass: OnePoleLowPass,
}

impl<Q: Sequencer> TrackerTrack<Q> {
    fn render(&mut self, out: &mut [i16]) {
        let TrackerTrack {
            decoder,
            activity,
            feed,
            resampler,
            lowpass,
        } = self;

        for sample in out.iter_mut() {
            let s = match resampler {
                Some(r) => r.next_sample(|| feed.next(decoder, activity)),
                None => feed.next(decoder, activity),
            };
            *sample = lowpass.process(s);
        }
    }
}

enum Track<C: ChipCore, Q: Sequencer> {
    Empty,
    RegisterStream(Box<RegisterStreamTrack<C>>),
    Tracker(Box<TrackerTrack<Q>>),
}

/// Block producer handed to the buffering engine for one tick.
struct BlockRenderer<'a, C: ChipCore, Q: Sequencer> {
    track: &'a mut Track<C, Q>,
    block: &'a mut [i16],
    spectrum: &'a mut Spectrum,
    volume: u8,
}

impl<C: ChipCore, Q: Sequencer> BlockSource for BlockRenderer<'_, C, Q> {
    fn render_block(&mut self) -> &[i16] {
        match self.track {
            Track::Empty => self.block.fill(0),
            Track::RegisterStream(t) => t.render(self.block),
            Track::Tracker(t) => t.render(self.block),
        }
        if self.volume != u8::MAX {
            let volume = self.volume as i32;
            for s in self.block.iter_mut() {
                *s = (*s as i32 * volume / 255) as i16;
            }
        }
        self.spectrum.push_block(self.block);
        &*self.block
    }
}

/// One playing track plus the engine state around it.
pub struct PlaybackSession<C: ChipCore, Q: Sequencer> {
    config: EngineConfig,
    sequencer_factory: Box<dyn Fn() -> Q + Send>,
    track: Track<C, Q>,
    source: Option<TrackSource>,
    engine: BufferingEngine,
    block: Vec<i16>,
    meters: MeterSet,
    spectrum: Spectrum,
    volume: u8,
    last_ui_ms: Option<u64>,
}

impl<C: ChipCore, Q: Sequencer> PlaybackSession<C, Q> {
    /// Create an idle session. `sequencer_factory` builds a fresh sequencer
    /// for every tracker load.
    pub fn new<F>(config: EngineConfig, sequencer_factory: F) -> Self
    where
        F: Fn() -> Q + Send + 'static,
    {
        let block_samples = config.block_samples.max(1);
        PlaybackSession {
            engine: BufferingEngine::new(config.output_rate),
            block: vec![0; block_samples],
            meters: MeterSet::new(0, config.meters),
            spectrum: Spectrum::new(config.spectrum),
            volume: config.volume,
            sequencer_factory: Box::new(sequencer_factory),
            track: Track::Empty,
            source: None,
            last_ui_ms: None,
            config,
        }
    }

    /// Load a track through `store`, choosing the path by file extension.
    pub fn load_path(&mut self, path: impl AsRef<Path>, store: &dyn TrackStore) -> Result<()> {
        let source = TrackSource::load(path, store)?;
        self.load_source(source, store)
    }

    /// Load an already-read track. `store` resolves tracker sample banks.
    pub fn load_source(&mut self, source: TrackSource, store: &dyn TrackStore) -> Result<()> {
        match source.format() {
            TrackFormat::RegisterStream => self.load_register_stream(source),
            TrackFormat::Tracker => self.load_tracker(source, store),
        }
    }

    /// Load a VGM image. The previous track keeps playing if this fails.
    pub fn load_register_stream(&mut self, source: TrackSource) -> Result<()> {
        let interpreter = StreamInterpreter::new(source.shared_bytes())?;
        let clock = interpreter
            .header()
            .map(|h| h.ym2203_clock)
            .ok_or_else(|| ChipdeckError::Format("VGM header missing".into()))?;
        if clock == 0 {
            return Err(ChipdeckError::ZeroClock);
        }

        let mut chip = ChipAdapter::<C>::new(clock);
        let native = chip.native_sample_rate();
        let resampler = if native == self.config.output_rate {
            None
        } else {
            let mut r = LinearResampler::new(native, self.config.output_rate);
            r.prime(|| chip.render_one());
            Some(r)
        };

        log::info!(
            "playing {} (VGM, clock {clock} Hz, native {native} Hz)",
            source.path().display()
        );
        self.install(
            Track::RegisterStream(Box::new(RegisterStreamTrack {
                interpreter,
                chip,
                activity: OpnActivity::new(),
                resampler,
            })),
            source,
            OPN_METERS,
            1.0,
        );
        Ok(())
    }

    /// Load an MDX score, resolving its sample bank through `store`. The
    /// previous track keeps playing if this fails.
    pub fn load_tracker(&mut self, source: TrackSource, store: &dyn TrackStore) -> Result<()> {
        let mut decoder = TrackerDecoder::load(
            (self.sequencer_factory)(),
            source.bytes(),
            source.path(),
            store,
            &self.config.tracker,
        )?;
        let mut activity = OpmActivity::new();
        let mut feed = NativeFeed::with_len(self.config.tracker.render_block.max(1))?;

        let native = decoder.native_rate();
        let output = self.config.output_rate;
        let resampler = if native == output {
            None
        } else {
            let mut r = CubicResampler::new(native, output);
            r.prime(|| feed.next(&mut decoder, &mut activity));
            Some(r)
        };

        let meters = if decoder.has_bank() {
            OPM_PCM_METERS
        } else {
            OPM_METERS
        };
        let bin_scale = (native as f32 / output.max(1) as f32).min(1.0);

        log::info!(
            "playing {} (MDX '{}', native {native} Hz)",
            source.path().display(),
            decoder.title()
        );
        self.install(
            Track::Tracker(Box::new(TrackerTrack {
                decoder,
                activity,
                feed,
                resampler,
                lowpass: OnePoleLowPass::new(self.config.tracker.lpf_alpha_q15),
            })),
            source,
            meters,
            bin_scale,
        );
        Ok(())
    }

    fn install(&mut self, track: Track<C, Q>, source: TrackSource, meters: usize, bin_scale: f32) {
        self.track = track;
        self.source = Some(source);
        self.meters.resize(meters);
        self.spectrum.reset();
        self.spectrum.set_bin_scale(bin_scale);
        self.last_ui_ms = None;
    }

    /// Drop the current track; further ticks synthesize nothing.
    pub fn unload(&mut self) {
        self.track = Track::Empty;
        self.source = None;
        self.meters.resize(0);
        self.spectrum.reset();
    }

    /// Run one scheduler tick: top up `sink`, then refresh the analysis if
    /// the UI interval has passed. Returns `None` when no track is loaded.
    pub fn tick<S>(&mut self, clock: &dyn Clock, sink: &mut S) -> Option<PumpReport>
    where
        S: AudioSink + ?Sized,
    {
        if matches!(self.track, Track::Empty) {
            return None;
        }

        let heavy = self.is_heavy();
        let profile = if heavy {
            self.config.buffering_heavy
        } else {
            self.config.buffering
        };
        let mut renderer = BlockRenderer {
            track: &mut self.track,
            block: &mut self.block,
            spectrum: &mut self.spectrum,
            volume: self.volume,
        };
        let report = self.engine.pump(clock, &profile, sink, &mut renderer);

        let now_ms = clock.now_ms();
        let interval = if heavy {
            self.config.ui_interval_heavy_ms
        } else {
            self.config.ui_interval_ms
        } as u64;
        if self
            .last_ui_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= interval)
        {
            self.update_analysis(now_ms);
        }
        Some(report)
    }

    /// Advance the voice meters and the spectrum to `now_ms`.
    pub fn update_analysis(&mut self, now_ms: u64) {
        match &mut self.track {
            Track::Empty => return,
            Track::RegisterStream(t) => t.activity.update(now_ms, &mut self.meters),
            Track::Tracker(t) => {
                let mask = t.decoder.pcm_mask();
                t.activity.update(now_ms, mask, &mut self.meters);
            }
        }
        self.spectrum.update(now_ms);
        self.last_ui_ms = Some(now_ms);
    }

    /// Synthesize one block directly, bypassing the buffering engine.
    pub fn render_block(&mut self) -> &[i16] {
        let mut renderer = BlockRenderer {
            track: &mut self.track,
            block: &mut self.block,
            spectrum: &mut self.spectrum,
            volume: self.volume,
        };
        renderer.render_block();
        &self.block
    }

    /// Whether the heavy buffering profile is active (tracker with a bank).
    pub fn is_heavy(&self) -> bool {
        matches!(&self.track, Track::Tracker(t) if t.decoder.has_bank())
    }

    /// Whether the current track is still producing audio.
    pub fn is_playing(&self) -> bool {
        match &self.track {
            Track::Empty => false,
            Track::RegisterStream(t) => t.interpreter.is_playing(),
            Track::Tracker(t) => t.decoder.is_playing(),
        }
    }

    /// Format of the current track.
    pub fn format(&self) -> Option<TrackFormat> {
        self.source.as_ref().map(TrackSource::format)
    }

    /// Path of the current track.
    pub fn path(&self) -> Option<&Path> {
        self.source.as_ref().map(TrackSource::path)
    }

    /// Display title: the MDX title, or the file stem of a VGM.
    pub fn title(&self) -> Option<String> {
        match &self.track {
            Track::Empty => None,
            Track::Tracker(t) => Some(t.decoder.title()),
            Track::RegisterStream(_) => self
                .path()
                .and_then(Path::file_stem)
                .map(|s| s.to_string_lossy().into_owned()),
        }
    }

    /// Register writes issued by the register stream so far.
    pub fn writes(&self) -> u64 {
        match &self.track {
            Track::RegisterStream(t) => t.interpreter.writes(),
            _ => 0,
        }
    }

    /// Byte cursor of the register stream.
    pub fn position(&self) -> Option<usize> {
        match &self.track {
            Track::RegisterStream(t) => Some(t.interpreter.position()),
            _ => None,
        }
    }

    /// Sounding ADPCM voices of the tracker track.
    pub fn pcm_mask(&self) -> u8 {
        match &self.track {
            Track::Tracker(t) => t.decoder.pcm_mask(),
            _ => 0,
        }
    }

    /// Voice meters: FM1-3 + SSG A-C for VGM, FM1-8 (+ PCM1-8) for MDX.
    pub fn meters(&self) -> &MeterSet {
        &self.meters
    }

    /// Spectrum columns.
    pub fn spectrum(&self) -> &Spectrum {
        &self.spectrum
    }

    /// Audio banked in the sink, as estimated by the buffering engine.
    pub fn banked_ms(&self) -> u64 {
        self.engine.banked_ms()
    }

    /// Master volume (0-255).
    pub fn volume(&self) -> u8 {
        self.volume
    }

    /// Set the master volume (0-255).
    pub fn set_volume(&mut self, volume: u8) {
        self.volume = volume;
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
