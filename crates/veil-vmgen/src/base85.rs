//! Base-85 text encoding for the embedded bytecode blob.
//!
//! Glyphs are the 85 characters `!`..=`u`. Every 4 input bytes (big-endian,
//! the last group zero-padded) become 5 glyphs, most significant first. The
//! text opens with [`SENTINEL`] and carries [`DECOY`] before every 15th group.
use thiserror::Error;

pub const SENTINEL: &str = "LPH+m0<X;z";
pub const DECOY: &str = "z!!";

const FIRST_GLYPH: u8 = b'!';
const LAST_GLYPH: u8 = b'u';
/// Groups between decoys.
const DECOY_INTERVAL: usize = 15;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid glyph {glyph:?} at offset {offset}")]
    InvalidGlyph { glyph: char, offset: usize },
    #[error("incomplete group at offset {0}")]
    IncompleteGroup(usize),
    #[error("group at offset {0} overflows 32 bits")]
    Overflow(usize),
}

pub fn encode(data: &[u8]) -> String {
    let groups = data.len().div_ceil(4);
    let mut out = String::with_capacity(SENTINEL.len() + groups * 5 + groups / DECOY_INTERVAL * 3);
    out.push_str(SENTINEL);

    for (i, group) in data.chunks(4).enumerate() {
        let mut word = [0u8; 4];
        word[..group.len()].copy_from_slice(group);
        let mut value = u32::from_be_bytes(word);

        if i > 0 && i % DECOY_INTERVAL == 0 {
            out.push_str(DECOY);
        }

        let mut glyphs = [0u8; 5];
        for glyph in glyphs.iter_mut().rev() {
            *glyph = FIRST_GLYPH + (value % 85) as u8;
            value /= 85;
        }
        out.extend(glyphs.iter().map(|&g| g as char));
    }
    out
}

pub fn decode(text: &str) -> Result<Vec<u8>, DecodeError> {
    let bytes = text.as_bytes();
    let mut pos = if bytes.starts_with(SENTINEL.as_bytes()) {
        SENTINEL.len()
    } else {
        0
    };
    let mut out = Vec::with_capacity(bytes.len() / 5 * 4);

    while pos < bytes.len() {
        if bytes[pos..].starts_with(DECOY.as_bytes()) {
            pos += DECOY.len();
            continue;
        }
        let group = bytes
            .get(pos..pos + 5)
            .ok_or(DecodeError::IncompleteGroup(pos))?;
        let mut value: u64 = 0;
        for (i, &g) in group.iter().enumerate() {
            if !(FIRST_GLYPH..=LAST_GLYPH).contains(&g) {
                return Err(DecodeError::InvalidGlyph {
                    glyph: g as char,
                    offset: pos + i,
                });
            }
            value = value * 85 + u64::from(g - FIRST_GLYPH);
        }
        let word = u32::try_from(value).map_err(|_| DecodeError::Overflow(pos))?;
        out.extend_from_slice(&word.to_be_bytes());
        pos += 5;
    }
    Ok(out)
}
