//! Column payload codecs
//!
//! Genotype and file metadata cells are handled by [`VariantColumnCodec`],
//! statistics cells by [`VariantStatsCodec`]. All decoders report failures as
//! [`CodecError`] values so that a row decoder can record them against the
//! offending cell and move on.

mod column;
mod stats;

pub use column::{VariantColumnCodec, MISSING_ALLELE_INDEX, SHORT_FORM_MAX_ALLELE};
pub use stats::{DecodedStats, VariantStatsCodec};

use std::io::Write;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::CodecError;

/// Writes a u16 length-prefixed UTF-8 string
pub(crate) fn write_short_str(buffer: &mut Vec<u8>, value: &str) -> Option<()> {
    let len = u16::try_from(value.len()).ok()?;
    buffer.write_u16::<BigEndian>(len).ok()?;
    buffer.write_all(value.as_bytes()).ok()
}

/// Writes a u32 length-prefixed UTF-8 string
pub(crate) fn write_long_str(buffer: &mut Vec<u8>, value: &str) -> Option<()> {
    let len = u32::try_from(value.len()).ok()?;
    buffer.write_u32::<BigEndian>(len).ok()?;
    buffer.write_all(value.as_bytes()).ok()
}

/// Reads a u16 length-prefixed UTF-8 string, advancing the cursor
pub(crate) fn read_short_str<F>(cursor: &mut &[u8], err: F) -> Result<String, CodecError>
where
    F: Fn(&str) -> CodecError,
{
    let len = cursor
        .read_u16::<BigEndian>()
        .map_err(|_| err("truncated string length"))?;
    take_str(cursor, usize::from(len), err)
}

/// Reads a u32 length-prefixed UTF-8 string, advancing the cursor
pub(crate) fn read_long_str<F>(cursor: &mut &[u8], err: F) -> Result<String, CodecError>
where
    F: Fn(&str) -> CodecError,
{
    let len = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| err("truncated string length"))?;
    take_str(cursor, len as usize, err)
}

fn take_str<F>(cursor: &mut &[u8], len: usize, err: F) -> Result<String, CodecError>
where
    F: Fn(&str) -> CodecError,
{
    if cursor.len() < len {
        return Err(err("truncated string"));
    }
    let (head, tail) = cursor.split_at(len);
    let value = std::str::from_utf8(head).map_err(|_| err("string is not UTF-8"))?;
    *cursor = tail;
    Ok(value.to_string())
}

/// Fails if any bytes remain after a payload has been fully read
pub(crate) fn expect_exhausted<F>(cursor: &[u8], err: F) -> Result<(), CodecError>
where
    F: Fn(&str) -> CodecError,
{
    if cursor.is_empty() {
        Ok(())
    } else {
        Err(err("trailing bytes after payload"))
    }
}
