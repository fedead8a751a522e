//! PDX ADPCM sample bank
//!
//! A PDX file starts with 96 big-endian `(offset, length)` pairs followed by
//! the sample images, each in MSM6258 4-bit ADPCM (low nibble first). Every
//! non-empty entry is decoded to 16-bit PCM once, at load, and looked up by
//! its `(offset, length)` image reference when the sequencer starts a note.

use crate::{ChipdeckError, Result};
use nom::multi::count;
use nom::number::complete::be_u32;
use nom::sequence::pair;
use nom::IResult;

/// Number of entries in the PDX table.
pub const PDX_ENTRIES: usize = 96;

/// Size of the entry table in bytes.
pub const PDX_TABLE_LEN: usize = PDX_ENTRIES * 8;

const ADPCM_STEPS: [i32; 49] = [
    16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66, 73, 80, 88, 97, 107, 118, 130,
    143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408, 449, 494, 544, 598, 658, 724, 796,
    876, 963, 1060, 1166, 1282, 1411, 1552,
];

const ADPCM_INDEX_SHIFT: [i32; 8] = [-1, -1, -1, -1, 2, 4, 6, 8];

/// Reference to a sample image inside the bank file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleRef {
    /// Byte offset of the ADPCM image in the PDX file
    pub offset: u32,
    /// Length of the ADPCM image in bytes
    pub len: u32,
}

/// One decoded bank entry.
#[derive(Debug, Clone)]
pub struct PcmSample {
    /// Image reference the entry was decoded from
    pub source: SampleRef,
    /// Decoded samples (two per ADPCM byte)
    pub pcm: Vec<i16>,
}

/// MSM6258 ADPCM decoder state.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdpcmDecoder {
    signal: i32,
    index: i32,
}

impl AdpcmDecoder {
    /// Decode one nibble to a 16-bit sample.
    #[inline]
    pub fn decode(&mut self, nibble: u8) -> i16 {
        let step = ADPCM_STEPS[self.index as usize];
        let mut diff = step >> 3;
        if nibble & 1 != 0 {
            diff += step >> 2;
        }
        if nibble & 2 != 0 {
            diff += step >> 1;
        }
        if nibble & 4 != 0 {
            diff += step;
        }
        if nibble & 8 != 0 {
            diff = -diff;
        }
        self.signal = (self.signal + diff).clamp(-2048, 2047);
        self.index = (self.index + ADPCM_INDEX_SHIFT[(nibble & 7) as usize]).clamp(0, 48);
        (self.signal << 4) as i16
    }
}

/// Decode an ADPCM image, low nibble first.
pub fn decode_adpcm(image: &[u8]) -> Result<Vec<i16>> {
    let n = image.len() * 2;
    let mut pcm = Vec::new();
    pcm.try_reserve_exact(n)
        .map_err(|_| ChipdeckError::Allocation(n * std::mem::size_of::<i16>()))?;
    let mut dec = AdpcmDecoder::default();
    for &byte in image {
        pcm.push(dec.decode(byte & 0x0F));
        pcm.push(dec.decode(byte >> 4));
    }
    Ok(pcm)
}

fn entry_table(input: &[u8]) -> IResult<&[u8], Vec<(u32, u32)>> {
    count(pair(be_u32, be_u32), PDX_ENTRIES)(input)
}

/// Decoded sample bank.
#[derive(Debug, Clone, Default)]
pub struct PcmBank {
    samples: Vec<PcmSample>,
    image_len: usize,
}

impl PcmBank {
    /// Parse a PDX image and decode every valid entry.
    ///
    /// Entries pointing outside the image are skipped.
    pub fn parse(image: &[u8]) -> Result<Self> {
        let (_, table) = entry_table(image).map_err(|_| ChipdeckError::Truncated {
            needed: PDX_TABLE_LEN,
            available: image.len(),
        })?;

        let mut samples = Vec::new();
        for (slot, (offset, len)) in table.into_iter().enumerate() {
            if offset == 0 || len == 0 {
                continue;
            }
            let start = offset as usize;
            let Some(bytes) = start
                .checked_add(len as usize)
                .and_then(|end| image.get(start..end))
            else {
                log::warn!("PDX entry {slot} (0x{offset:X}+{len}) outside bank, skipped");
                continue;
            };
            samples.push(PcmSample {
                source: SampleRef { offset, len },
                pcm: decode_adpcm(bytes)?,
            });
        }
        log::debug!("PDX bank: {} samples, {} bytes", samples.len(), image.len());
        Ok(PcmBank {
            samples,
            image_len: image.len(),
        })
    }

    /// Index of the entry decoded from `source`.
    pub fn find(&self, source: SampleRef) -> Option<usize> {
        if source.len == 0 {
            return None;
        }
        self.samples.iter().position(|s| s.source == source)
    }

    /// Decoded samples of entry `index`.
    pub fn samples(&self, index: usize) -> &[i16] {
        self.samples.get(index).map(|s| s.pcm.as_slice()).unwrap_or(&[])
    }

    /// Number of decoded entries.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no entry decoded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Size of the PDX image the bank was built from.
    pub fn image_len(&self) -> usize {
        self.image_len
    }

    /// Image references of all decoded entries.
    pub fn sources(&self) -> impl Iterator<Item = SampleRef> + '_ {
        self.samples.iter().map(|s| s.source)
    }
}
