//! VGM register-stream format
//!
//! VGM is a time-stamped log of chip register writes interleaved with wait
//! commands. Only the fields the player needs are decoded here:
//!
//! | offset | field |
//! |--------|-------|
//! | 0x00 | magic `"Vgm "` |
//! | 0x14 | GD3 tag offset (relative to 0x14) |
//! | 0x18 | total samples |
//! | 0x1C | loop offset (relative to 0x1C, 0 = no loop) |
//! | 0x20 | loop samples |
//! | 0x34 | data offset (relative to 0x34, 0 = data at 0x40) |
//! | 0x44 | YM2203 clock |

pub mod interpreter;

pub use interpreter::StreamInterpreter;

use crate::{ChipdeckError, Result};
use nom::bytes::complete::{tag, take};
use nom::number::complete::le_u32;
use nom::IResult;
use num_derive::FromPrimitive;

/// File magic.
pub const VGM_MAGIC: &[u8; 4] = b"Vgm ";

/// Minimum header size (v1.00 header).
pub const HEADER_MIN_LEN: usize = 0x40;

/// Data start used when the data offset field is zero.
pub const DEFAULT_DATA_START: u32 = 0x40;

/// Anchor of the relative loop offset field.
pub const LOOP_OFFSET_FIELD: usize = 0x1C;

/// Anchor of the relative data offset field.
pub const DATA_OFFSET_FIELD: usize = 0x34;

/// Location of the YM2203 clock field.
pub const YM2203_CLOCK_FIELD: usize = 0x44;

/// Wait length of opcode 0x62 (one 60 Hz frame at 44.1 kHz).
pub const WAIT_NTSC_FRAME: u32 = 735;

/// Wait length of opcode 0x63 (one 50 Hz frame at 44.1 kHz).
pub const WAIT_PAL_FRAME: u32 = 882;

/// Command opcodes understood by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    /// `55 aa dd`: YM2203 register write
    Ym2203Write = 0x55,
    /// `61 nn nn`: wait n samples
    Wait = 0x61,
    /// `62`: wait one 60 Hz frame
    WaitNtsc = 0x62,
    /// `63`: wait one 50 Hz frame
    WaitPal = 0x63,
    /// `66`: end of sound data
    EndOfData = 0x66,
    /// `67 66 tt ss ss ss ss`: data block
    DataBlock = 0x67,
}

/// Decoded header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VgmHeader {
    /// Absolute offset of the first command
    pub data_start: u32,
    /// Absolute loop target, 0 when the track does not loop
    pub loop_offset: u32,
    /// Total length in 44.1 kHz samples
    pub total_samples: u32,
    /// Loop length in 44.1 kHz samples
    pub loop_samples: u32,
    /// Absolute GD3 tag offset, 0 when absent
    pub gd3_offset: u32,
    /// YM2203 clock in Hz, 0 when absent or the header is too short
    pub ym2203_clock: u32,
}

fn u32_at(data: &[u8], offset: usize) -> u32 {
    fn field(input: &[u8], offset: usize) -> IResult<&[u8], u32> {
        let (input, _) = take(offset)(input)?;
        le_u32(input)
    }
    field(data, offset).map(|(_, v)| v).unwrap_or(0)
}

fn relative(data: &[u8], anchor: usize) -> u32 {
    match u32_at(data, anchor) {
        0 => 0,
        rel => (anchor as u32).saturating_add(rel),
    }
}

impl VgmHeader {
    /// Parse and validate the header of a VGM image.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_MIN_LEN {
            return Err(ChipdeckError::Truncated {
                needed: HEADER_MIN_LEN,
                available: data.len(),
            });
        }
        let magic: IResult<&[u8], &[u8]> = tag(&VGM_MAGIC[..])(data);
        if magic.is_err() {
            return Err(ChipdeckError::Format("missing \"Vgm \" magic".into()));
        }

        let data_start = match relative(data, DATA_OFFSET_FIELD) {
            0 => DEFAULT_DATA_START,
            start => start,
        };
        if data_start as usize >= data.len() {
            return Err(ChipdeckError::Format(format!(
                "data start 0x{data_start:X} beyond end of file (0x{:X})",
                data.len()
            )));
        }

        Ok(VgmHeader {
            data_start,
            loop_offset: relative(data, LOOP_OFFSET_FIELD),
            total_samples: u32_at(data, 0x18),
            loop_samples: u32_at(data, 0x20),
            gd3_offset: relative(data, 0x14),
            // older headers end at 0x40 and commands would overlap the field
            ym2203_clock: if data_start as usize >= YM2203_CLOCK_FIELD + 4 {
                u32_at(data, YM2203_CLOCK_FIELD)
            } else {
                0
            },
        })
    }

    /// Whether the header declares a loop point.
    pub fn has_loop(&self) -> bool {
        self.loop_offset != 0
    }
}

/// Builder for synthetic VGM images (test and tooling helper).
#[derive(Debug, Clone)]
pub struct VgmImage {
    bytes: Vec<u8>,
}

impl VgmImage {
    /// Start an image with a 0x100-byte header and the given YM2203 clock.
    pub fn new(clock: u32) -> Self {
        let mut bytes = vec![0u8; 0x100];
        bytes[..4].copy_from_slice(VGM_MAGIC);
        bytes[0x08..0x0C].copy_from_slice(&0x0000_0151u32.to_le_bytes());
        bytes[DATA_OFFSET_FIELD..DATA_OFFSET_FIELD + 4]
            .copy_from_slice(&(0x100u32 - DATA_OFFSET_FIELD as u32).to_le_bytes());
        bytes[YM2203_CLOCK_FIELD..YM2203_CLOCK_FIELD + 4].copy_from_slice(&clock.to_le_bytes());
        VgmImage { bytes }
    }

    /// Append a register write.
    pub fn write(mut self, reg: u8, value: u8) -> Self {
        self.bytes.extend_from_slice(&[Opcode::Ym2203Write as u8, reg, value]);
        self
    }

    /// Append a 16-bit wait.
    pub fn wait(mut self, samples: u16) -> Self {
        self.bytes.push(Opcode::Wait as u8);
        self.bytes.extend_from_slice(&samples.to_le_bytes());
        self
    }

    /// Mark the current end of the stream as the loop target.
    pub fn loop_here(mut self) -> Self {
        let rel = self.bytes.len() as u32 - LOOP_OFFSET_FIELD as u32;
        self.bytes[LOOP_OFFSET_FIELD..LOOP_OFFSET_FIELD + 4].copy_from_slice(&rel.to_le_bytes());
        self
    }

    /// Append raw command bytes.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// Terminate with an end-of-data command and return the bytes.
    pub fn end(mut self) -> Vec<u8> {
        self.bytes.push(Opcode::EndOfData as u8);
        self.bytes
    }
}
