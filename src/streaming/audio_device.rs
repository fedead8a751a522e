//! Audio device integration using rodio
//!
//! Plays the consumer half of a ring buffer on the default output device.
//! Underruns play silence so the stream stays open while the tick loop
//! catches up.

use super::RingBufferConsumer;
use crate::{ChipdeckError, Result};
use rodio::{OutputStream, Sink, Source};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Samples fetched from the ring buffer per lock.
const SOURCE_BATCH: usize = 1024;

/// rodio source reading from the ring buffer.
struct RingBufferSource {
    consumer: RingBufferConsumer,
    sample_rate: u32,
    finished: Arc<AtomicBool>,
    batch: Vec<i16>,
    batch_pos: usize,
}

impl RingBufferSource {
    fn new(consumer: RingBufferConsumer, sample_rate: u32, finished: Arc<AtomicBool>) -> Self {
        RingBufferSource {
            consumer,
            sample_rate,
            finished,
            batch: vec![0; SOURCE_BATCH],
            batch_pos: SOURCE_BATCH,
        }
    }
}

impl Source for RingBufferSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(SOURCE_BATCH)
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

impl Iterator for RingBufferSource {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        if self.finished.load(Ordering::Relaxed) {
            return None;
        }
        if self.batch_pos >= self.batch.len() {
            // zero-fills on underrun
            self.consumer.read(&mut self.batch);
            self.batch_pos = 0;
        }
        let sample = self.batch[self.batch_pos];
        self.batch_pos += 1;
        Some(sample)
    }
}

/// Audio playback device using rodio.
pub struct AudioDevice {
    _stream: OutputStream,
    sink: Sink,
    finished: Arc<AtomicBool>,
}

impl AudioDevice {
    /// Open the default output device and start playing from `consumer`.
    pub fn new(sample_rate: u32, consumer: RingBufferConsumer) -> Result<Self> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| ChipdeckError::AudioDevice(format!("cannot open output stream: {e}")))?;
        let sink = Sink::try_new(&handle)
            .map_err(|e| ChipdeckError::AudioDevice(format!("cannot create sink: {e}")))?;

        let finished = Arc::new(AtomicBool::new(false));
        sink.append(RingBufferSource::new(
            consumer,
            sample_rate,
            Arc::clone(&finished),
        ));
        log::info!("audio device opened at {sample_rate} Hz");

        Ok(AudioDevice {
            _stream: stream,
            sink,
            finished,
        })
    }

    /// Pause playback.
    pub fn pause(&self) {
        self.sink.pause();
    }

    /// Resume playback.
    pub fn play(&self) {
        self.sink.play();
    }

    /// Set device volume (1.0 = unity).
    pub fn set_volume(&self, volume: f32) {
        self.sink.set_volume(volume);
    }

    /// Signal that no more samples will be produced.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.finish();
        self.sink.pause();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::{AudioSink, RingBufferSink, StreamConfig};

    fn pair() -> (RingBufferSink, RingBufferConsumer) {
        RingBufferSink::new(StreamConfig::with_latency_ms(44_100, 256, 100)).unwrap()
    }

    #[test]
    fn test_source_plays_queued_then_silence() {
        let (mut sink, consumer) = pair();
        sink.submit(&[5; 10]).unwrap();
        let mut source = RingBufferSource::new(consumer, 44_100, Arc::new(AtomicBool::new(false)));
        let out: Vec<i16> = source.by_ref().take(12).collect();
        assert_eq!(&out[..10], &[5; 10]);
        assert_eq!(&out[10..], &[0; 2]);
        assert_eq!(source.channels(), 1);
        assert_eq!(source.sample_rate(), 44_100);
    }

    #[test]
    fn test_source_stops_when_finished() {
        let (_sink, consumer) = pair();
        let finished = Arc::new(AtomicBool::new(false));
        let mut source = RingBufferSource::new(consumer, 44_100, Arc::clone(&finished));
        assert!(source.next().is_some());
        finished.store(true, Ordering::Relaxed);
        assert_eq!(source.next(), None);
    }

    #[test]
    fn test_device_creation_when_available() {
        let (_sink, consumer) = pair();
        match AudioDevice::new(44_100, consumer) {
            Ok(device) => {
                device.pause();
                device.play();
            }
            Err(err) => eprintln!("skipping audio device test (backend unavailable): {err}"),
        }
    }
}
