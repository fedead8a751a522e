//! Time-budgeted buffering engine
//!
//! Keeps an estimate of how much audio is queued in the sink ("banked") and
//! tops it up once per scheduler tick:
//!
//! 1. the bank decays by the wall-clock time since the previous tick;
//! 2. an idle sink forces the bank to zero (the sink is ground truth);
//! 3. blocks are synthesized while the bank is below target, stopping early
//!    when the sink is full, or when the tick has used its time budget and
//!    at least the minimum is banked.
//!
//! A single block is never interrupted, so the budget is a cooperative
//! yield point rather than a hard deadline.

use super::{AudioSink, Clock, QueueState};
use crate::config::BufferProfile;

/// Supplier of output blocks.
pub trait BlockSource {
    /// Synthesize the next output block.
    fn render_block(&mut self) -> &[i16];
}

/// Engine state within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillState {
    /// Between ticks
    #[default]
    Idle,
    /// Synthesizing blocks
    Filling,
}

/// Why a pump returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStop {
    /// Bank reached the target
    TargetReached,
    /// Sink had no room for another block
    SinkFull,
    /// Tick budget spent with the minimum banked
    Budget,
    /// Source produced an empty block or the sink rejected one
    Stalled,
}

/// Outcome of one [`BufferingEngine::pump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpReport {
    /// Blocks synthesized and submitted
    pub blocks: usize,
    /// Banked audio after the tick, in microseconds
    pub banked_us: u64,
    /// Why filling stopped
    pub stop: PumpStop,
}

/// Banked-duration accounting and fill loop.
#[derive(Debug, Clone)]
pub struct BufferingEngine {
    sample_rate: u32,
    banked_us: u64,
    last_tick_us: Option<u64>,
    state: FillState,
    total_blocks: u64,
}

impl BufferingEngine {
    /// Engine for blocks at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        BufferingEngine {
            sample_rate: sample_rate.max(1),
            banked_us: 0,
            last_tick_us: None,
            state: FillState::Idle,
            total_blocks: 0,
        }
    }

    /// Run one tick.
    pub fn pump<S, B>(
        &mut self,
        clock: &dyn Clock,
        profile: &BufferProfile,
        sink: &mut S,
        source: &mut B,
    ) -> PumpReport
    where
        S: AudioSink + ?Sized,
        B: BlockSource + ?Sized,
    {
        let start = clock.now_us();
        if let Some(last) = self.last_tick_us {
            self.banked_us = self.banked_us.saturating_sub(start.saturating_sub(last));
        }
        self.last_tick_us = Some(start);

        if sink.queue_state() == QueueState::Idle {
            self.banked_us = 0;
        }

        let target_us = profile.target_ms as u64 * 1_000;
        let min_us = profile.min_ms as u64 * 1_000;
        let budget_us = profile.budget_us as u64;

        let mut blocks = 0;
        let mut stop = PumpStop::TargetReached;
        self.state = FillState::Filling;
        while self.banked_us < target_us {
            if sink.queue_state() == QueueState::Full {
                stop = PumpStop::SinkFull;
                break;
            }
            if clock.now_us().saturating_sub(start) > budget_us && self.banked_us >= min_us {
                stop = PumpStop::Budget;
                break;
            }

            let block = source.render_block();
            if block.is_empty() {
                log::warn!("block source returned no samples");
                stop = PumpStop::Stalled;
                break;
            }
            let duration = self.block_duration_us(block.len());
            if let Err(e) = sink.submit(block) {
                log::warn!("audio sink rejected block: {e}");
                stop = PumpStop::Stalled;
                break;
            }
            self.banked_us += duration;
            blocks += 1;
        }
        self.state = FillState::Idle;
        self.total_blocks += blocks as u64;

        if stop == PumpStop::Budget {
            log::trace!(
                "buffer tick hit budget after {blocks} blocks, {} ms banked",
                self.banked_us / 1_000
            );
        }

        PumpReport {
            blocks,
            banked_us: self.banked_us,
            stop,
        }
    }

    /// Duration of `samples` output samples in microseconds.
    pub fn block_duration_us(&self, samples: usize) -> u64 {
        samples as u64 * 1_000_000 / self.sample_rate as u64
    }

    /// Banked audio in microseconds.
    pub fn banked_us(&self) -> u64 {
        self.banked_us
    }

    /// Banked audio in milliseconds.
    pub fn banked_ms(&self) -> u64 {
        self.banked_us / 1_000
    }

    /// Current state.
    pub fn state(&self) -> FillState {
        self.state
    }

    /// Blocks synthesized since creation or the last reset.
    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    /// Forget banked audio and the last tick time.
    pub fn reset(&mut self) {
        self.banked_us = 0;
        self.last_tick_us = None;
        self.state = FillState::Idle;
        self.total_blocks = 0;
    }
}
