//! VGM command interpreter
//!
//! Walks the command stream one output tick at a time. Register writes are
//! forwarded to a [`RegisterSink`]; waits are counted down in 44.1 kHz ticks.
//! Any fault inside the stream stops playback for the rest of the track, so
//! a damaged file degrades to silence instead of an error.

use super::{Opcode, VgmHeader, WAIT_NTSC_FRAME, WAIT_PAL_FRAME};
use crate::chip::RegisterSink;
use crate::Result;
use num_traits::FromPrimitive;
use std::sync::Arc;

/// Data block sub-header after the 0x67 opcode: `66 tt ss ss ss ss`.
const DATA_BLOCK_HEADER: usize = 6;

/// Outcome of a single command.
enum Flow {
    /// Keep interpreting
    Continue,
    /// A non-zero wait was set or playback stopped
    Yield,
}

/// Register-stream playback cursor.
#[derive(Debug, Clone)]
pub struct StreamInterpreter {
    data: Arc<[u8]>,
    header: Option<VgmHeader>,
    pos: usize,
    wait: u32,
    writes: u64,
    samples: u64,
    loops: u32,
    playing: bool,
}

impl Default for StreamInterpreter {
    fn default() -> Self {
        StreamInterpreter {
            data: Arc::from(Vec::new()),
            header: None,
            pos: 0,
            wait: 0,
            writes: 0,
            samples: 0,
            loops: 0,
            playing: false,
        }
    }
}

impl StreamInterpreter {
    /// Create an interpreter positioned at the start of `data`.
    pub fn new(data: Arc<[u8]>) -> Result<Self> {
        let mut interp = StreamInterpreter::default();
        interp.load(data)?;
        Ok(interp)
    }

    /// Validate the header and rewind to the first command.
    ///
    /// On failure the interpreter keeps its previous state.
    pub fn load(&mut self, data: Arc<[u8]>) -> Result<VgmHeader> {
        let header = VgmHeader::parse(&data)?;
        log::debug!(
            "VGM loaded: {} bytes, data at 0x{:X}, loop at 0x{:X}, clock {} Hz",
            data.len(),
            header.data_start,
            header.loop_offset,
            header.ym2203_clock
        );
        self.pos = header.data_start as usize;
        self.data = data;
        self.header = Some(header);
        self.wait = 0;
        self.writes = 0;
        self.samples = 0;
        self.loops = 0;
        self.playing = true;
        Ok(header)
    }

    /// Advance exactly one output tick.
    ///
    /// With no wait pending, commands are interpreted until a new wait is set
    /// or the stream stops. The wait is then decremented; once it reaches zero
    /// any end or data-block commands at the cursor are consumed so the cursor
    /// rests on the next audible command.
    pub fn step_one_sample<S: RegisterSink + ?Sized>(&mut self, sink: &mut S) {
        if !self.playing {
            return;
        }
        if self.wait == 0 {
            self.run_commands(sink);
        }
        if self.wait > 0 {
            self.wait -= 1;
            if self.wait == 0 {
                self.settle();
            }
        }
        self.samples += 1;
    }

    /// Current byte offset into the track.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Register writes forwarded since load.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Pending wait in ticks.
    pub fn wait(&self) -> u32 {
        self.wait
    }

    /// Output ticks stepped since load.
    pub fn samples_played(&self) -> u64 {
        self.samples
    }

    /// Times the stream jumped back to its loop point.
    pub fn loop_count(&self) -> u32 {
        self.loops
    }

    /// Whether the stream is still producing commands.
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Parsed header of the loaded track.
    pub fn header(&self) -> Option<&VgmHeader> {
        self.header.as_ref()
    }

    /// Absolute loop target, 0 when the track does not loop.
    pub fn loop_offset(&self) -> u32 {
        self.header.map(|h| h.loop_offset).unwrap_or(0)
    }

    /// Absolute offset of the first command.
    pub fn data_start(&self) -> u32 {
        self.header.map(|h| h.data_start).unwrap_or(0)
    }

    fn run_commands<S: RegisterSink + ?Sized>(&mut self, sink: &mut S) {
        let mut idle_ends = 0u8;
        while self.playing && self.wait == 0 {
            let before = self.writes;
            let is_end = self.data.get(self.pos) == Some(&(Opcode::EndOfData as u8));
            let flow = self.execute(sink);
            if self.writes != before || self.wait != 0 {
                idle_ends = 0;
            } else if is_end {
                idle_ends += 1;
                if idle_ends >= 2 {
                    log::warn!("VGM loop at 0x{:X} contains no commands, stopping", self.pos);
                    self.stop();
                }
            }
            if let Flow::Yield = flow {
                break;
            }
        }
    }

    fn settle(&mut self) {
        let mut ends = 0u8;
        while self.playing {
            match self.data.get(self.pos).copied() {
                Some(op) if op == Opcode::EndOfData as u8 => {
                    ends += 1;
                    if ends >= 2 {
                        log::warn!("VGM loop at 0x{:X} contains no commands, stopping", self.pos);
                        self.stop();
                        break;
                    }
                    self.end_of_data();
                }
                Some(op) if op == Opcode::DataBlock as u8 => self.data_block(),
                _ => break,
            }
        }
    }

    fn execute<S: RegisterSink + ?Sized>(&mut self, sink: &mut S) -> Flow {
        let Some(&op) = self.data.get(self.pos) else {
            log::warn!("VGM stream ran past end of data without an end command");
            self.stop();
            return Flow::Yield;
        };

        if (0x70..=0x7F).contains(&op) {
            self.pos += 1;
            return self.set_wait((op & 0x0F) as u32 + 1);
        }

        match Opcode::from_u8(op) {
            Some(Opcode::Ym2203Write) => {
                let Some(args) = self.data.get(self.pos + 1..self.pos + 3) else {
                    return self.fault(op);
                };
                let (reg, value) = (args[0], args[1]);
                self.pos += 3;
                sink.write_reg(reg, value);
                self.writes += 1;
                Flow::Continue
            }
            Some(Opcode::Wait) => {
                let Some(args) = self.data.get(self.pos + 1..self.pos + 3) else {
                    return self.fault(op);
                };
                let samples = u16::from_le_bytes([args[0], args[1]]) as u32;
                self.pos += 3;
                self.set_wait(samples)
            }
            Some(Opcode::WaitNtsc) => {
                self.pos += 1;
                self.set_wait(WAIT_NTSC_FRAME)
            }
            Some(Opcode::WaitPal) => {
                self.pos += 1;
                self.set_wait(WAIT_PAL_FRAME)
            }
            Some(Opcode::EndOfData) => {
                self.end_of_data();
                if self.playing {
                    Flow::Continue
                } else {
                    Flow::Yield
                }
            }
            Some(Opcode::DataBlock) => {
                self.data_block();
                if self.playing {
                    Flow::Continue
                } else {
                    Flow::Yield
                }
            }
            None => self.fault(op),
        }
    }

    fn set_wait(&mut self, samples: u32) -> Flow {
        self.wait = samples;
        if samples > 0 {
            Flow::Yield
        } else {
            Flow::Continue
        }
    }

    fn end_of_data(&mut self) {
        let target = self.loop_offset() as usize;
        let start = self.data_start() as usize;
        if target != 0 && target >= start && target < self.data.len() {
            log::debug!("VGM loop: 0x{:X} -> 0x{target:X}", self.pos);
            self.pos = target;
            self.loops += 1;
        } else {
            log::debug!("VGM end of data at 0x{:X}", self.pos);
            self.stop();
        }
    }

    fn data_block(&mut self) {
        let body = self.pos + 1;
        let Some(hdr) = self.data.get(body..body + DATA_BLOCK_HEADER) else {
            log::warn!("VGM data block header truncated at 0x{:X}", self.pos);
            self.stop();
            return;
        };
        if hdr[0] != Opcode::EndOfData as u8 {
            log::warn!("VGM data block at 0x{:X} has no 0x66 marker", self.pos);
            self.stop();
            return;
        }
        let size = u32::from_le_bytes([hdr[2], hdr[3], hdr[4], hdr[5]]) as usize;
        let next = body + DATA_BLOCK_HEADER;
        match next.checked_add(size) {
            Some(end) if end <= self.data.len() => {
                log::debug!("VGM data block type 0x{:02X}, {size} bytes skipped", hdr[1]);
                self.pos = end;
            }
            _ => {
                log::warn!(
                    "VGM data block at 0x{:X} overruns the file ({size} bytes)",
                    self.pos
                );
                self.stop();
            }
        }
    }

    fn fault(&mut self, op: u8) -> Flow {
        log::warn!("VGM unsupported or truncated command 0x{op:02X} at 0x{:X}", self.pos);
        self.stop();
        Flow::Yield
    }

    fn stop(&mut self) {
        self.playing = false;
        self.wait = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vgm::VgmImage;

    #[derive(Default)]
    struct Recorder(Vec<(u8, u8)>);

    impl RegisterSink for Recorder {
        fn write_reg(&mut self, reg: u8, value: u8) {
            self.0.push((reg, value));
        }
    }

    fn scenario_bytes() -> Vec<u8> {
        let mut data = vec![0u8; 0x40];
        data[..4].copy_from_slice(b"Vgm ");
        // loop target 0x40 = 0x1C + 0x24
        data[0x1C..0x20].copy_from_slice(&0x24u32.to_le_bytes());
        data.extend_from_slice(&[0x55, 0xB4, 0xC0, 0x61, 0xDF, 0x02, 0x66]);
        data
    }

    #[test]
    fn test_loop_after_one_frame() {
        let mut interp = StreamInterpreter::new(scenario_bytes().into()).unwrap();
        let mut sink = Recorder::default();
        for _ in 0..735 {
            interp.step_one_sample(&mut sink);
        }
        assert_eq!(interp.writes(), 1);
        assert_eq!(interp.position(), 0x40);
        assert_eq!(interp.wait(), 0);
        assert!(interp.is_playing());
        assert_eq!(interp.loop_count(), 1);
        assert_eq!(sink.0, vec![(0xB4, 0xC0)]);

        // The next tick replays the loop body.
        interp.step_one_sample(&mut sink);
        assert_eq!(interp.writes(), 2);
        assert_eq!(interp.wait(), 734);
    }

    #[test]
    fn test_stop_without_loop() {
        let bytes = VgmImage::new(4_000_000).write(0x08, 0x0F).wait(10).end();
        let mut interp = StreamInterpreter::new(bytes.into()).unwrap();
        let mut sink = Recorder::default();
        for _ in 0..10 {
            interp.step_one_sample(&mut sink);
        }
        assert!(!interp.is_playing());
        assert_eq!(interp.writes(), 1);

        // Stopped streams ignore further ticks.
        interp.step_one_sample(&mut sink);
        assert_eq!(sink.0.len(), 1);
    }

    #[test]
    fn test_wait_opcodes() {
        let bytes = VgmImage::new(4_000_000)
            .raw(&[0x62, 0x63, 0x70, 0x7F])
            .end();
        let mut interp = StreamInterpreter::new(bytes.into()).unwrap();
        let mut sink = Recorder::default();
        interp.step_one_sample(&mut sink);
        assert_eq!(interp.wait(), 734);
        for _ in 0..734 {
            interp.step_one_sample(&mut sink);
        }
        interp.step_one_sample(&mut sink);
        assert_eq!(interp.wait(), 881);
        for _ in 0..881 {
            interp.step_one_sample(&mut sink);
        }
        interp.step_one_sample(&mut sink);
        // 0x70 waits one tick, consumed entirely within this step
        assert_eq!(interp.wait(), 0);
        interp.step_one_sample(&mut sink);
        assert_eq!(interp.wait(), 15);
        assert_eq!(interp.samples_played(), 1 + 734 + 1 + 881 + 1 + 1);
    }

    #[test]
    fn test_unknown_opcode_stops() {
        let bytes = VgmImage::new(4_000_000)
            .write(0x28, 0xF0)
            .raw(&[0xA0, 0x00, 0x00])
            .write(0x28, 0x00)
            .end();
        let mut interp = StreamInterpreter::new(bytes.into()).unwrap();
        let mut sink = Recorder::default();
        interp.step_one_sample(&mut sink);
        assert!(!interp.is_playing());
        assert_eq!(sink.0, vec![(0x28, 0xF0)]);
    }

    #[test]
    fn test_data_block_skipped() {
        let bytes = VgmImage::new(4_000_000)
            .raw(&[0x67, 0x66, 0x00, 0x03, 0x00, 0x00, 0x00, 0xAA, 0xBB, 0xCC])
            .write(0x07, 0x38)
            .wait(2)
            .end();
        let mut interp = StreamInterpreter::new(bytes.into()).unwrap();
        let mut sink = Recorder::default();
        interp.step_one_sample(&mut sink);
        assert!(interp.is_playing());
        assert_eq!(sink.0, vec![(0x07, 0x38)]);
    }

    #[test]
    fn test_data_block_overrun_stops() {
        let bytes = VgmImage::new(4_000_000)
            .raw(&[0x67, 0x66, 0x00, 0xFF, 0xFF, 0x00, 0x00])
            .write(0x07, 0x38)
            .end();
        let mut interp = StreamInterpreter::new(bytes.into()).unwrap();
        let mut sink = Recorder::default();
        interp.step_one_sample(&mut sink);
        assert!(!interp.is_playing());
        assert!(sink.0.is_empty());
    }

    #[test]
    fn test_truncated_write_stops() {
        let mut bytes = VgmImage::new(4_000_000).wait(1).end();
        bytes.pop();
        bytes.extend_from_slice(&[0x55, 0x28]);
        let mut interp = StreamInterpreter::new(bytes.into()).unwrap();
        let mut sink = Recorder::default();
        interp.step_one_sample(&mut sink);
        interp.step_one_sample(&mut sink);
        assert!(!interp.is_playing());
        assert!(sink.0.is_empty());
    }

    #[test]
    fn test_empty_loop_stops() {
        let bytes = VgmImage::new(4_000_000).wait(2).loop_here().end();
        let mut interp = StreamInterpreter::new(bytes.into()).unwrap();
        let mut sink = Recorder::default();
        for _ in 0..4 {
            interp.step_one_sample(&mut sink);
        }
        assert!(!interp.is_playing());
    }

    #[test]
    fn test_failed_load_keeps_state() {
        let mut interp = StreamInterpreter::new(scenario_bytes().into()).unwrap();
        let mut sink = Recorder::default();
        interp.step_one_sample(&mut sink);
        assert!(interp.load(Arc::from(vec![0u8; 8])).is_err());
        assert_eq!(interp.writes(), 1);
        assert_eq!(interp.wait(), 734);
    }

    #[test]
    fn test_steps_match_declared_duration() {
        // 3 x 100-tick frames; stop lands exactly on the last tick
        let bytes = VgmImage::new(4_000_000)
            .write(0x08, 1)
            .wait(100)
            .write(0x08, 2)
            .wait(100)
            .write(0x08, 3)
            .wait(100)
            .end();
        let mut interp = StreamInterpreter::new(bytes.into()).unwrap();
        let mut sink = Recorder::default();
        for _ in 0..299 {
            interp.step_one_sample(&mut sink);
            assert!(interp.is_playing());
        }
        interp.step_one_sample(&mut sink);
        assert!(!interp.is_playing());
        assert_eq!(interp.writes(), 3);
    }
}
