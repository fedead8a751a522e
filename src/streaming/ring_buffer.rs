//! Ring buffer between the tick loop and the playback thread
//!
//! The producer side ([`RingBufferSink`]) is driven by the buffering engine;
//! the consumer side ([`RingBufferConsumer`]) is read by the audio callback.
//! Storage is a `parking_lot` mutex with atomic positions, so the queue depth
//! can be sampled without taking the lock.

use super::{AudioSink, QueueState, StreamConfig};
use crate::{ChipdeckError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixed-capacity i16 ring buffer (one producer, one consumer).
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Mutex<Vec<i16>>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    capacity: usize,
    mask: usize,
}

impl RingBuffer {
    /// Create a buffer; capacity is rounded up to a power of two.
    pub fn new(requested_capacity: usize) -> Result<Self> {
        if requested_capacity == 0 {
            return Err(ChipdeckError::Config(
                "ring buffer capacity must be greater than 0".into(),
            ));
        }
        let capacity = requested_capacity.next_power_of_two();

        // 64 MB of samples
        const MAX_CAPACITY: usize = 64 * 1024 * 1024 / std::mem::size_of::<i16>();
        if capacity > MAX_CAPACITY {
            return Err(ChipdeckError::Config(format!(
                "ring buffer capacity {capacity} exceeds maximum {MAX_CAPACITY}"
            )));
        }

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|_| ChipdeckError::Allocation(capacity * std::mem::size_of::<i16>()))?;
        storage.resize(capacity, 0);

        Ok(RingBuffer {
            buffer: Mutex::new(storage),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
        })
    }

    /// Buffer capacity in samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples ready to read.
    pub fn available_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Free space in samples (one slot stays empty).
    pub fn available_write(&self) -> usize {
        self.capacity - 1 - self.available_read().min(self.capacity - 1)
    }

    /// Write as many samples as fit; returns the count written.
    pub fn write(&self, samples: &[i16]) -> usize {
        let mut buf = self.buffer.lock();

        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        let used = write_pos.wrapping_sub(read_pos);
        let to_write = samples.len().min(self.capacity - 1 - used);
        if to_write == 0 {
            return 0;
        }

        let write_idx = write_pos & self.mask;
        if write_idx + to_write <= self.capacity {
            buf[write_idx..write_idx + to_write].copy_from_slice(&samples[..to_write]);
        } else {
            let first = self.capacity - write_idx;
            buf[write_idx..].copy_from_slice(&samples[..first]);
            buf[..to_write - first].copy_from_slice(&samples[first..to_write]);
        }
        drop(buf);

        self.write_pos
            .store(write_pos.wrapping_add(to_write), Ordering::Release);
        to_write
    }

    /// Read up to `dest.len()` samples; returns the count read.
    pub fn read(&self, dest: &mut [i16]) -> usize {
        let buf = self.buffer.lock();

        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        let to_read = dest.len().min(write_pos.wrapping_sub(read_pos));
        if to_read == 0 {
            return 0;
        }

        let read_idx = read_pos & self.mask;
        if read_idx + to_read <= self.capacity {
            dest[..to_read].copy_from_slice(&buf[read_idx..read_idx + to_read]);
        } else {
            let first = self.capacity - read_idx;
            dest[..first].copy_from_slice(&buf[read_idx..]);
            dest[first..to_read].copy_from_slice(&buf[..to_read - first]);
        }
        drop(buf);

        self.read_pos
            .store(read_pos.wrapping_add(to_read), Ordering::Release);
        to_read
    }

    /// Discard everything queued.
    pub fn flush(&self) {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write_pos, Ordering::Release);
    }

    /// Fill level, 0.0 to 1.0.
    pub fn fill_percentage(&self) -> f32 {
        self.available_read() as f32 / self.capacity as f32
    }
}

/// Producer half: an [`AudioSink`] writing into a shared ring buffer.
#[derive(Debug)]
pub struct RingBufferSink {
    ring: Arc<RingBuffer>,
    block_samples: usize,
    overruns: Arc<AtomicU64>,
}

/// Consumer half, handed to the playback thread.
#[derive(Debug, Clone)]
pub struct RingBufferConsumer {
    ring: Arc<RingBuffer>,
    underruns: Arc<AtomicU64>,
}

impl RingBufferSink {
    /// Create a connected sink/consumer pair.
    pub fn new(config: StreamConfig) -> Result<(Self, RingBufferConsumer)> {
        let ring = Arc::new(RingBuffer::new(config.ring_buffer_size)?);
        let sink = RingBufferSink {
            ring: Arc::clone(&ring),
            block_samples: config.block_samples.max(1),
            overruns: Arc::new(AtomicU64::new(0)),
        };
        let consumer = RingBufferConsumer {
            ring,
            underruns: Arc::new(AtomicU64::new(0)),
        };
        Ok((sink, consumer))
    }

    /// Pair with room for `latency_ms` of audio at `sample_rate`.
    pub fn with_latency_ms(
        sample_rate: u32,
        block_samples: usize,
        latency_ms: u32,
    ) -> Result<(Self, RingBufferConsumer)> {
        Self::new(StreamConfig::with_latency_ms(
            sample_rate,
            block_samples,
            latency_ms,
        ))
    }

    /// Samples currently queued.
    pub fn queued(&self) -> usize {
        self.ring.available_read()
    }

    /// Blocks that did not fit completely.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

impl AudioSink for RingBufferSink {
    fn queue_state(&self) -> QueueState {
        if self.ring.available_read() == 0 {
            QueueState::Idle
        } else if self.ring.available_write() < self.block_samples {
            QueueState::Full
        } else {
            QueueState::Accepting
        }
    }

    /// Queue `block`. A block that does not fit completely is an overrun:
    /// the part that fit stays queued and `BufferOverrun` is returned, so the
    /// buffering engine stops without banking the block.
    fn submit(&mut self, block: &[i16]) -> Result<()> {
        let written = self.ring.write(block);
        if written < block.len() {
            self.overruns.fetch_add(1, Ordering::Relaxed);
            let dropped = block.len() - written;
            log::debug!("ring buffer overrun: {dropped} of {} samples dropped", block.len());
            return Err(ChipdeckError::BufferOverrun {
                dropped,
                block: block.len(),
            });
        }
        Ok(())
    }
}

impl RingBufferConsumer {
    /// Read queued samples into `dest`, zero-filling on underrun. Returns the
    /// number of real samples read.
    pub fn read(&self, dest: &mut [i16]) -> usize {
        let read = self.ring.read(dest);
        if read < dest.len() {
            dest[read..].fill(0);
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
        read
    }

    /// Reads that came up short.
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Samples currently queued.
    pub fn available(&self) -> usize {
        self.ring.available_read()
    }
}
