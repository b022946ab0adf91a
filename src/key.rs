//! Row key encoding
//!
//! A row key is laid out as
//!
//! ```text
//! +--------+-----+--------------+-----+------------------+
//! | chr(2) | '_' | position(10) | '_' | allele summary   |
//! +--------+-----+--------------+-----+------------------+
//! ```
//!
//! The chromosome and position form a fixed-length prefix of
//! [`KEY_PREFIX_LEN`] bytes. Positions are zero-padded ASCII so that byte order
//! equals numeric order within a chromosome. The allele summary disambiguates
//! distinct variants at the same position and is bounded by
//! [`MAX_ALLELE_SUMMARY_BYTES`].
//!
//! The summary starts with a tag byte, the number of alleles, and the length of
//! each allele (u16, big-endian). When every allele is a non-empty run of
//! `A`/`C`/`G`/`T` the alleles are 2-bit packed (tag `P`), otherwise they are
//! stored as raw bytes (tag `L`).

use std::fmt;
use std::io::Write;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    error::{KeyError, Result},
    helper::{CHROMOSOME_WIDTH, GenomeHelper},
};

/// Separator between the key fields
pub const KEY_SEPARATOR: u8 = b'_';

/// Width of the zero-padded position field
pub const POSITION_WIDTH: usize = 10;

/// Largest position representable in the key
pub const MAX_POSITION: u64 = 9_999_999_999;

/// Length of the chromosome + position prefix (including both separators)
pub const KEY_PREFIX_LEN: usize = CHROMOSOME_WIDTH + 1 + POSITION_WIDTH + 1;

/// Upper bound on the encoded allele summary
pub const MAX_ALLELE_SUMMARY_BYTES: usize = 4096;

/// Summary tag for 2-bit packed alleles
const TAG_PACKED: u8 = b'P';

/// Summary tag for literal alleles
const TAG_LITERAL: u8 = b'L';

/// Nucleotides per packed word
const BASES_PER_WORD: usize = 32;

/// The reference and alternate alleles of a variant, as embedded in the row key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AlleleSummary {
    pub reference: String,
    pub alternates: Vec<String>,
}
impl AlleleSummary {
    #[must_use]
    pub fn new(reference: &str, alternates: &[&str]) -> Self {
        Self {
            reference: reference.to_string(),
            alternates: alternates.iter().map(ToString::to_string).collect(),
        }
    }

    fn alleles(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.reference.as_str()).chain(self.alternates.iter().map(String::as_str))
    }

    fn is_packable(&self) -> bool {
        self.alleles()
            .all(|a| !a.is_empty() && a.bytes().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T')))
    }

    /// Writes the tagged summary encoding into `buffer`
    fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<()> {
        let n_alleles = 1 + self.alternates.len();
        if n_alleles > usize::from(u8::MAX) {
            return Err(self.malformed("too many alternate alleles"));
        }
        if self.alleles().any(|a| a.len() > usize::from(u16::MAX)) {
            return Err(self.malformed("allele too long"));
        }

        let start = buffer.len();
        let packed = self.is_packable();
        buffer.push(if packed { TAG_PACKED } else { TAG_LITERAL });
        buffer.push(n_alleles as u8);
        for allele in self.alleles() {
            buffer.write_u16::<BigEndian>(allele.len() as u16)?;
        }

        if packed {
            let mut words = Vec::new();
            for allele in self.alleles() {
                words.clear();
                bitnuc::encode(allele.as_bytes(), &mut words)
                    .map_err(|_| self.malformed("allele could not be packed"))?;
                if words.len() != allele.len().div_ceil(BASES_PER_WORD) {
                    return Err(self.malformed("unexpected packed allele width"));
                }
                words
                    .iter()
                    .try_for_each(|&w| buffer.write_u64::<BigEndian>(w))?;
            }
        } else {
            for allele in self.alleles() {
                buffer.write_all(allele.as_bytes())?;
            }
        }

        if buffer.len() - start > MAX_ALLELE_SUMMARY_BYTES {
            return Err(self.malformed("allele summary exceeds maximum size"));
        }
        Ok(())
    }

    /// Parses a tagged summary encoding occupying all of `bytes`
    ///
    /// `offset` is the position of `bytes` within the full key, used for error reporting.
    fn decode(bytes: &[u8], offset: usize) -> Result<Self> {
        let corrupt = |at: usize, reason: &'static str| KeyError::CorruptRowKey(offset + at, reason);

        if bytes.len() > MAX_ALLELE_SUMMARY_BYTES {
            return Err(corrupt(0, "allele summary exceeds maximum size").into());
        }
        let mut cursor = bytes;
        let tag = cursor
            .read_u8()
            .map_err(|_| corrupt(0, "missing allele summary"))?;
        let n_alleles = cursor
            .read_u8()
            .map_err(|_| corrupt(1, "missing allele count"))?;
        if n_alleles == 0 {
            return Err(corrupt(1, "allele count is zero").into());
        }

        let mut lengths = Vec::with_capacity(usize::from(n_alleles));
        for _ in 0..n_alleles {
            let len = cursor
                .read_u16::<BigEndian>()
                .map_err(|_| corrupt(bytes.len() - cursor.len(), "truncated allele lengths"))?;
            lengths.push(usize::from(len));
        }

        let mut alleles = Vec::with_capacity(lengths.len());
        match tag {
            TAG_PACKED => {
                let expected: usize = lengths
                    .iter()
                    .map(|len| len.div_ceil(BASES_PER_WORD) * 8)
                    .sum();
                if cursor.len() != expected {
                    return Err(corrupt(bytes.len() - cursor.len(), "packed allele size mismatch").into());
                }
                let mut words = Vec::new();
                let mut decoded = Vec::new();
                for &len in &lengths {
                    if len == 0 {
                        return Err(corrupt(2, "empty packed allele").into());
                    }
                    words.clear();
                    for _ in 0..len.div_ceil(BASES_PER_WORD) {
                        words.push(
                            cursor
                                .read_u64::<BigEndian>()
                                .map_err(|_| corrupt(bytes.len(), "truncated packed allele"))?,
                        );
                    }
                    decoded.clear();
                    bitnuc::decode(&words, len, &mut decoded)
                        .map_err(|_| corrupt(bytes.len() - cursor.len(), "invalid packed allele"))?;
                    alleles.push(String::from_utf8(std::mem::take(&mut decoded)).map_err(|_| {
                        corrupt(bytes.len() - cursor.len(), "invalid packed allele")
                    })?);
                }
            }
            TAG_LITERAL => {
                let expected: usize = lengths.iter().sum();
                if cursor.len() != expected {
                    return Err(corrupt(bytes.len() - cursor.len(), "literal allele size mismatch").into());
                }
                for &len in &lengths {
                    let (head, tail) = cursor.split_at(len);
                    let allele = std::str::from_utf8(head)
                        .map_err(|_| corrupt(bytes.len() - cursor.len(), "allele is not UTF-8"))?;
                    alleles.push(allele.to_string());
                    cursor = tail;
                }
            }
            _ => return Err(corrupt(0, "unknown allele summary tag").into()),
        }

        let mut alleles = alleles.into_iter();
        let reference = alleles.next().unwrap_or_default();
        Ok(Self {
            reference,
            alternates: alleles.collect(),
        })
    }

    fn malformed(&self, reason: &'static str) -> crate::Error {
        KeyError::MalformedCoordinate {
            chromosome: String::new(),
            position: 0,
            reason,
        }
        .into()
    }
}
impl fmt::Display for AlleleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.reference, self.alternates.join(","))
    }
}

/// The decoded identity of a variant row
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey {
    /// Canonical chromosome name
    pub chromosome: String,
    pub position: u64,
    pub alleles: AlleleSummary,
}
impl RowKey {
    #[must_use]
    pub fn new(chromosome: &str, position: u64, alleles: AlleleSummary) -> Self {
        Self {
            chromosome: chromosome.to_string(),
            position,
            alleles,
        }
    }
}
impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.chromosome, self.position, self.alleles)
    }
}

/// Encodes and decodes variant row keys
pub struct RowKeyCodec;
impl RowKeyCodec {
    /// Encodes a variant identity into a sortable row key
    ///
    /// The chromosome is normalized first, so `chr1` and `1` produce the same key.
    ///
    /// # Examples
    ///
    /// ```
    /// use varcol::{AlleleSummary, RowKeyCodec};
    ///
    /// let alleles = AlleleSummary::new("A", &["T"]);
    /// let key = RowKeyCodec::encode("chr1", 1000, &alleles).unwrap();
    /// assert!(key.starts_with(b"01_0000001000_"));
    ///
    /// let decoded = RowKeyCodec::decode(&key).unwrap();
    /// assert_eq!(decoded.chromosome, "1");
    /// assert_eq!(decoded.position, 1000);
    /// assert_eq!(decoded.alleles, alleles);
    /// ```
    pub fn encode(chromosome: &str, position: u64, alleles: &AlleleSummary) -> Result<Vec<u8>> {
        let malformed = |reason| KeyError::MalformedCoordinate {
            chromosome: chromosome.to_string(),
            position,
            reason,
        };
        if chromosome.trim().is_empty() {
            return Err(malformed("empty chromosome").into());
        }
        if position > MAX_POSITION {
            return Err(malformed("position overflow").into());
        }
        let canonical = GenomeHelper::normalize_chromosome(chromosome)?;

        let mut key = Vec::with_capacity(KEY_PREFIX_LEN + 16);
        write_prefix(&mut key, canonical, position)?;
        alleles.encode_into(&mut key).map_err(|err| match err {
            crate::Error::KeyError(KeyError::MalformedCoordinate { reason, .. }) => malformed(reason).into(),
            other => other,
        })?;
        Ok(key)
    }

    /// Encodes an already-assembled [`RowKey`]
    pub fn encode_key(key: &RowKey) -> Result<Vec<u8>> {
        Self::encode(&key.chromosome, key.position, &key.alleles)
    }

    /// Decodes a row key produced by [`RowKeyCodec::encode`]
    pub fn decode(bytes: &[u8]) -> Result<RowKey> {
        if bytes.len() < KEY_PREFIX_LEN {
            return Err(KeyError::CorruptRowKey(bytes.len(), "key shorter than fixed prefix").into());
        }
        let chromosome = GenomeHelper::unpad_chromosome(&bytes[..CHROMOSOME_WIDTH])
            .ok_or(KeyError::CorruptRowKey(0, "unknown chromosome field"))?;
        if bytes[CHROMOSOME_WIDTH] != KEY_SEPARATOR {
            return Err(KeyError::CorruptRowKey(CHROMOSOME_WIDTH, "missing chromosome separator").into());
        }

        let position_field = &bytes[CHROMOSOME_WIDTH + 1..CHROMOSOME_WIDTH + 1 + POSITION_WIDTH];
        let position = position_field.iter().try_fold(0u64, |acc, &b| {
            b.is_ascii_digit().then(|| acc * 10 + u64::from(b - b'0'))
        });
        let position =
            position.ok_or(KeyError::CorruptRowKey(CHROMOSOME_WIDTH + 1, "non-digit in position"))?;
        if bytes[KEY_PREFIX_LEN - 1] != KEY_SEPARATOR {
            return Err(KeyError::CorruptRowKey(KEY_PREFIX_LEN - 1, "missing position separator").into());
        }

        let alleles = AlleleSummary::decode(&bytes[KEY_PREFIX_LEN..], KEY_PREFIX_LEN)?;
        Ok(RowKey {
            chromosome: chromosome.to_string(),
            position,
            alleles,
        })
    }

    /// Key prefix shared by every row of a chromosome
    pub fn chromosome_prefix(chromosome: &str) -> Result<Vec<u8>> {
        let canonical = GenomeHelper::normalize_chromosome(chromosome)?;
        let mut prefix = GenomeHelper::pad_chromosome(canonical).to_vec();
        prefix.push(KEY_SEPARATOR);
        Ok(prefix)
    }

    /// Scan bounds covering positions `start..end` of a chromosome
    ///
    /// The returned stop key is exclusive.
    pub fn region_bounds(chromosome: &str, start: u64, end: u64) -> Result<(Vec<u8>, Vec<u8>)> {
        let canonical = GenomeHelper::normalize_chromosome(chromosome)?;
        let mut start_key = Vec::with_capacity(KEY_PREFIX_LEN);
        write_prefix(&mut start_key, canonical, start.min(MAX_POSITION))?;

        let stop_key = if end > MAX_POSITION {
            let mut stop = GenomeHelper::pad_chromosome(canonical).to_vec();
            stop.push(KEY_SEPARATOR + 1);
            stop
        } else {
            let mut stop = Vec::with_capacity(KEY_PREFIX_LEN);
            write_prefix(&mut stop, canonical, end)?;
            stop
        };
        Ok((start_key, stop_key))
    }
}

fn write_prefix(buffer: &mut Vec<u8>, canonical: &str, position: u64) -> Result<()> {
    buffer.extend_from_slice(&GenomeHelper::pad_chromosome(canonical));
    buffer.push(KEY_SEPARATOR);
    write!(buffer, "{position:0width$}", width = POSITION_WIDTH)?;
    buffer.push(KEY_SEPARATOR);
    Ok(())
}
