use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tracing::warn;
use zstd::{bulk, stream::copy_encode};

use super::{expect_exhausted, read_long_str, read_short_str, write_long_str, write_short_str};
use crate::{
    error::{CodecError, EncodeError, Result},
    helper::ColumnKind,
    options::StorageOptions,
    variant::{StatValue, VariantStats},
};

/// Leading byte of an uncompressed stats payload
const STATS_RAW: u8 = 0;

/// Leading byte of a zstd-compressed stats payload
const STATS_ZSTD: u8 = 1;

/// Upper bound on the declared uncompressed size of a stats payload
const MAX_STATS_BYTES: u32 = 64 * 1024 * 1024;

const VALUE_NUMBER: u8 = b'N';
const VALUE_INTEGER: u8 = b'I';
const VALUE_CATEGORY: u8 = b'C';

fn corrupt_stats(reason: &str) -> CodecError {
    CodecError::CorruptStats(reason.to_string())
}

/// Outcome of a best-effort stats decode
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedStats {
    /// The cell decoded successfully
    Present(VariantStats),
    /// There was no stats cell
    Absent,
    /// The cell exists but could not be decoded
    Malformed(CodecError),
}
impl DecodedStats {
    /// Collapses malformed payloads into absence
    #[must_use]
    pub fn into_option(self) -> Option<VariantStats> {
        match self {
            Self::Present(stats) => Some(stats),
            Self::Absent | Self::Malformed(_) => None,
        }
    }

    #[must_use]
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }
}

/// Encodes and decodes per-cohort statistics cells
///
/// Payload layout: a compression byte, then (when compressed) the big-endian
/// u32 uncompressed length followed by the zstd frame. The uncompressed body is
/// a u16 field count followed by `name, tag, value` triples.
#[derive(Debug, Clone)]
pub struct VariantStatsCodec {
    threshold: usize,
    level: i32,
}
impl Default for VariantStatsCodec {
    fn default() -> Self {
        Self::new(&StorageOptions::default())
    }
}
impl VariantStatsCodec {
    #[must_use]
    pub fn new(options: &StorageOptions) -> Self {
        Self {
            threshold: options.stats_compression_threshold,
            level: options.stats_compression_level,
        }
    }

    /// Encodes a stats block into its cell payload
    pub fn encode_stats(&self, stats: &VariantStats) -> Result<Vec<u8>> {
        let body = Self::encode_body(stats)?;
        if body.len() < self.threshold {
            let mut payload = Vec::with_capacity(body.len() + 1);
            payload.push(STATS_RAW);
            payload.extend_from_slice(&body);
            return Ok(payload);
        }

        let mut payload = vec![STATS_ZSTD];
        payload.write_u32::<BigEndian>(body.len() as u32)?;
        copy_encode(body.as_slice(), &mut payload, self.level)?;
        Ok(payload)
    }

    fn encode_body(stats: &VariantStats) -> Result<Vec<u8>> {
        let too_large = |reason: &str| -> crate::Error {
            EncodeError::PayloadTooLarge {
                kind: ColumnKind::Stats,
                reason: reason.to_string(),
            }
            .into()
        };

        let count = u16::try_from(stats.len()).map_err(|_| too_large("too many fields"))?;
        let mut body = Vec::new();
        body.write_u16::<BigEndian>(count)?;
        for (name, value) in &stats.fields {
            write_short_str(&mut body, name).ok_or_else(|| too_large("field name too long"))?;
            match value {
                StatValue::Number(v) => {
                    body.push(VALUE_NUMBER);
                    body.write_f64::<BigEndian>(*v)?;
                }
                StatValue::Integer(v) => {
                    body.push(VALUE_INTEGER);
                    body.write_i64::<BigEndian>(*v)?;
                }
                StatValue::Category(v) => {
                    body.push(VALUE_CATEGORY);
                    write_long_str(&mut body, v).ok_or_else(|| too_large("category too long"))?;
                }
            }
        }
        if body.len() > MAX_STATS_BYTES as usize {
            return Err(too_large("stats payload too large"));
        }
        Ok(body)
    }

    /// Decodes a stats payload, failing on any malformation
    pub fn try_decode_stats(&self, bytes: &[u8]) -> std::result::Result<VariantStats, CodecError> {
        let (&mode, rest) = bytes
            .split_first()
            .ok_or_else(|| corrupt_stats("empty payload"))?;
        match mode {
            STATS_RAW => Self::decode_body(rest),
            STATS_ZSTD => {
                let mut cursor = rest;
                let u_bytes = cursor
                    .read_u32::<BigEndian>()
                    .map_err(|_| corrupt_stats("missing uncompressed length"))?;
                if u_bytes > MAX_STATS_BYTES {
                    return Err(corrupt_stats("declared size too large"));
                }
                // output is capped at the declared length
                let body = bulk::decompress(cursor, u_bytes as usize)
                    .map_err(|_| corrupt_stats("invalid zstd frame"))?;
                if body.len() != u_bytes as usize {
                    return Err(corrupt_stats("uncompressed length mismatch"));
                }
                Self::decode_body(&body)
            }
            _ => Err(corrupt_stats("unknown compression mode")),
        }
    }

    /// Best-effort decode: a missing or malformed cell never fails
    pub fn decode_stats(&self, bytes: Option<&[u8]>) -> DecodedStats {
        let Some(bytes) = bytes else {
            return DecodedStats::Absent;
        };
        match self.try_decode_stats(bytes) {
            Ok(stats) => DecodedStats::Present(stats),
            Err(err) => {
                warn!("Ignoring malformed stats payload: {}", err);
                DecodedStats::Malformed(err)
            }
        }
    }

    fn decode_body(bytes: &[u8]) -> std::result::Result<VariantStats, CodecError> {
        let mut cursor = bytes;
        let count = cursor
            .read_u16::<BigEndian>()
            .map_err(|_| corrupt_stats("missing field count"))?;
        let mut stats = VariantStats::new();
        for _ in 0..count {
            let name = read_short_str(&mut cursor, corrupt_stats)?;
            let tag = cursor
                .read_u8()
                .map_err(|_| corrupt_stats("missing value tag"))?;
            let value = match tag {
                VALUE_NUMBER => StatValue::Number(
                    cursor
                        .read_f64::<BigEndian>()
                        .map_err(|_| corrupt_stats("truncated number"))?,
                ),
                VALUE_INTEGER => StatValue::Integer(
                    cursor
                        .read_i64::<BigEndian>()
                        .map_err(|_| corrupt_stats("truncated integer"))?,
                ),
                VALUE_CATEGORY => StatValue::Category(read_long_str(&mut cursor, corrupt_stats)?),
                _ => return Err(corrupt_stats("unknown value tag")),
            };
            stats.fields.insert(name, value);
        }
        expect_exhausted(cursor, corrupt_stats)?;
        Ok(stats)
    }
}
