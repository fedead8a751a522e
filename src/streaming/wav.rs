//! WAV file sink
//!
//! Writes submitted blocks straight to a 16-bit WAV file. The sink never
//! reports `Full`, so with a manually advanced clock the buffering engine
//! renders exactly as much audio as the clock moves.

use super::{AudioSink, QueueState};
use crate::{ChipdeckError, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// [`AudioSink`] that writes a WAV file.
pub struct WavSink {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    channels: u16,
    samples: u64,
}

impl WavSink {
    /// Create `path` as a 16-bit WAV at `sample_rate`; `channels` is 1 or 2
    /// (mono blocks are duplicated for stereo).
    pub fn create(path: impl AsRef<Path>, sample_rate: u32, channels: u16) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: channels.clamp(1, 2),
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path.as_ref(), spec)
            .map_err(|e| ChipdeckError::Other(format!("failed to create WAV file: {e}")))?;
        Ok(WavSink {
            writer: Some(writer),
            channels: spec.channels,
            samples: 0,
        })
    }

    /// Mono samples written so far.
    pub fn samples_written(&self) -> u64 {
        self.samples
    }

    /// Flush and close the file.
    pub fn finalize(mut self) -> Result<()> {
        match self.writer.take() {
            Some(writer) => writer
                .finalize()
                .map_err(|e| ChipdeckError::Other(format!("failed to finalize WAV file: {e}"))),
            None => Ok(()),
        }
    }
}

impl AudioSink for WavSink {
    fn queue_state(&self) -> QueueState {
        if self.writer.is_some() {
            QueueState::Accepting
        } else {
            QueueState::Full
        }
    }

    fn submit(&mut self, block: &[i16]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ChipdeckError::Other("WAV sink already finalized".into()))?;
        for &sample in block {
            for _ in 0..self.channels {
                writer
                    .write_sample(sample)
                    .map_err(|e| ChipdeckError::Other(format!("failed to write sample: {e}")))?;
            }
        }
        self.samples += block.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let mut sink = WavSink::create(&path, 44_100, 2).unwrap();
        sink.submit(&[100, -100, 7]).unwrap();
        assert_eq!(sink.samples_written(), 3);
        sink.finalize().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 44_100);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![100, 100, -100, -100, 7, 7]);
    }
}
