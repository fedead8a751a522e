//! MDX score header
//!
//! An MDX file starts with a free-form title terminated by `CR LF EOF`
//! (`0D 0A 1A`), followed by the name of the PDX sample bank terminated by
//! NUL (empty when the score uses no ADPCM). The score body follows.

use crate::{ChipdeckError, Result};
use nom::bytes::complete::{tag, take_until};
use nom::IResult;

/// Title terminator.
const TITLE_END: &[u8] = b"\r\n\x1a";

/// Smallest image that can hold a header and a score body.
pub const MDX_MIN_LEN: usize = 8;

/// Conventional sample bank extension.
pub const PDX_EXTENSION: &str = ".PDX";

/// Decoded MDX header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MdxHeader {
    /// Raw title bytes (Shift-JIS in practice, not decoded here)
    pub title: Vec<u8>,
    /// Sample bank file name, `None` when the score has no ADPCM part
    pub pdx_name: Option<String>,
    /// Offset of the score body
    pub body_offset: usize,
}

fn header_fields(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    let (input, title) = take_until(TITLE_END)(input)?;
    let (input, _) = tag(TITLE_END)(input)?;
    let (input, pdx) = take_until(&b"\0"[..])(input)?;
    let (input, _) = tag(&b"\0"[..])(input)?;
    Ok((input, (title, pdx)))
}

impl MdxHeader {
    /// Parse the header of an MDX image.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MDX_MIN_LEN {
            return Err(ChipdeckError::Truncated {
                needed: MDX_MIN_LEN,
                available: data.len(),
            });
        }
        let (rest, (title, pdx)) = header_fields(data)
            .map_err(|_| ChipdeckError::Format("MDX title or PDX name not terminated".into()))?;

        let pdx_name = if pdx.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(pdx).trim().to_string()).filter(|s| !s.is_empty())
        };

        Ok(MdxHeader {
            title: title.to_vec(),
            pdx_name,
            body_offset: data.len() - rest.len(),
        })
    }

    /// Title with non-ASCII bytes replaced.
    pub fn title_lossy(&self) -> String {
        String::from_utf8_lossy(&self.title).trim().to_string()
    }

    /// Candidate bank file names: the stored name, then with `.PDX` appended
    /// when the name carries no extension.
    pub fn pdx_candidates(&self) -> Vec<String> {
        let Some(name) = &self.pdx_name else {
            return Vec::new();
        };
        let mut names = vec![name.clone()];
        if !name.to_ascii_uppercase().ends_with(PDX_EXTENSION) {
            names.push(format!("{name}{PDX_EXTENSION}"));
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(title: &[u8], pdx: &[u8]) -> Vec<u8> {
        let mut data = title.to_vec();
        data.extend_from_slice(TITLE_END);
        data.extend_from_slice(pdx);
        data.push(0);
        data.extend_from_slice(&[0x00, 0x08, 0x00, 0x0A, 0, 0, 0, 0]);
        data
    }

    #[test]
    fn test_title_and_bank() {
        let data = image(b"Stage 1", b"drums");
        let header = MdxHeader::parse(&data).unwrap();
        assert_eq!(header.title_lossy(), "Stage 1");
        assert_eq!(header.pdx_name.as_deref(), Some("drums"));
        assert_eq!(header.body_offset, 7 + 3 + 5 + 1);
        assert_eq!(header.pdx_candidates(), vec!["drums", "drums.PDX"]);
    }

    #[test]
    fn test_no_bank() {
        let header = MdxHeader::parse(&image(b"FM only", b"")).unwrap();
        assert!(header.pdx_name.is_none());
        assert!(header.pdx_candidates().is_empty());
    }

    #[test]
    fn test_bank_with_extension() {
        let header = MdxHeader::parse(&image(b"x", b"kit.pdx")).unwrap();
        assert_eq!(header.pdx_candidates(), vec!["kit.pdx"]);
    }

    #[test]
    fn test_unterminated_title() {
        let data = b"no terminator here".to_vec();
        assert!(matches!(
            MdxHeader::parse(&data),
            Err(ChipdeckError::Format(_))
        ));
    }

    #[test]
    fn test_too_short() {
        assert!(matches!(
            MdxHeader::parse(b"\r\n\x1a\0"),
            Err(ChipdeckError::Truncated { .. })
        ));
    }
}
