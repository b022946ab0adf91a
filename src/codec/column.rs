use std::collections::BTreeMap;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::{expect_exhausted, read_long_str, read_short_str, write_long_str, write_short_str};
use crate::{
    error::{CodecError, EncodeError, Result},
    helper::ColumnKind,
    variant::{FileMeta, Genotype, GenotypeCall},
};

/// Largest allele index representable in the single-byte genotype form
pub const SHORT_FORM_MAX_ALLELE: u32 = 2;

/// Allele index reserved for a missing allele in the tagged genotype form
pub const MISSING_ALLELE_INDEX: u16 = u16::MAX;

/// Set on the first byte of a tagged genotype payload
const TAGGED: u8 = 0x80;

/// Short form: phased flag
const SHORT_PHASED: u8 = 0x40;

/// Short form: code of a missing allele
const SHORT_MISSING: u8 = 0b11;

/// Tagged form flags
const FLAG_PHASED: u8 = 1 << 0;
const FLAG_QUALITY: u8 = 1 << 1;
const FLAG_DEPTH: u8 = 1 << 2;
const FLAG_FILTER: u8 = 1 << 3;
const FLAG_MASK: u8 = FLAG_PHASED | FLAG_QUALITY | FLAG_DEPTH | FLAG_FILTER;

/// File metadata payload version
const FILE_META_VERSION: u8 = 1;

/// File metadata flags
const META_QUALITY: u8 = 1 << 0;
const META_FILTER: u8 = 1 << 1;

fn corrupt_genotype(reason: &str) -> CodecError {
    CodecError::CorruptGenotype(reason.to_string())
}

fn corrupt_file_meta(reason: &str) -> CodecError {
    CodecError::CorruptFileMeta(reason.to_string())
}

fn too_large(kind: ColumnKind, reason: &str) -> crate::Error {
    EncodeError::PayloadTooLarge {
        kind,
        reason: reason.to_string(),
    }
    .into()
}

/// Encodes and decodes genotype and file metadata cells
///
/// # Genotype layout
///
/// Most calls are haploid or diploid, unannotated, and only reference the
/// reference, first or second alternate allele. Those fit in one byte:
///
/// ```text
/// bit 7    : 0 (short form)
/// bit 6    : phased
/// bits 5-4 : ploidy (1 or 2)
/// bits 3-2 : first allele  (0, 1, 2, or 3 = missing)
/// bits 1-0 : second allele (0 when haploid)
/// ```
///
/// Everything else uses the tagged form: a flag byte with bit 7 set, the
/// ploidy, one big-endian u16 per allele ([`MISSING_ALLELE_INDEX`] for `.`), then
/// the optional GQ (u16), DP (u32) and FT (length-prefixed string) fields
/// announced by the flags.
pub struct VariantColumnCodec;
impl VariantColumnCodec {
    /// Encodes a genotype call into its cell payload
    pub fn encode_genotype(call: &GenotypeCall) -> Result<Vec<u8>> {
        if let Some(byte) = Self::short_form(call) {
            return Ok(vec![byte]);
        }

        let genotype = &call.genotype;
        let ploidy = u8::try_from(genotype.ploidy())
            .map_err(|_| too_large(ColumnKind::Genotype, "ploidy exceeds 255"))?;
        if ploidy == 0 {
            return Err(EncodeError::InvalidGenotype("genotype has no alleles".to_string()).into());
        }

        let mut flags = TAGGED;
        if genotype.phased {
            flags |= FLAG_PHASED;
        }
        if call.quality.is_some() {
            flags |= FLAG_QUALITY;
        }
        if call.depth.is_some() {
            flags |= FLAG_DEPTH;
        }
        if call.filter.is_some() {
            flags |= FLAG_FILTER;
        }

        let mut buffer = Vec::with_capacity(2 + 2 * usize::from(ploidy));
        buffer.push(flags);
        buffer.push(ploidy);
        for allele in &genotype.alleles {
            let index = match allele {
                Some(index) => u16::try_from(*index)
                    .ok()
                    .filter(|&i| i != MISSING_ALLELE_INDEX)
                    .ok_or_else(|| too_large(ColumnKind::Genotype, "allele index too large"))?,
                None => MISSING_ALLELE_INDEX,
            };
            buffer.write_u16::<BigEndian>(index)?;
        }
        if let Some(quality) = call.quality {
            buffer.write_u16::<BigEndian>(quality)?;
        }
        if let Some(depth) = call.depth {
            buffer.write_u32::<BigEndian>(depth)?;
        }
        if let Some(filter) = &call.filter {
            write_short_str(&mut buffer, filter)
                .ok_or_else(|| too_large(ColumnKind::Genotype, "filter too long"))?;
        }
        Ok(buffer)
    }

    fn short_form(call: &GenotypeCall) -> Option<u8> {
        let genotype = &call.genotype;
        if call.is_annotated() || !matches!(genotype.ploidy(), 1 | 2) {
            return None;
        }
        let code = |allele: &Option<u32>| match allele {
            None => Some(SHORT_MISSING),
            Some(index) if *index <= SHORT_FORM_MAX_ALLELE => Some(*index as u8),
            Some(_) => None,
        };

        let mut byte = (genotype.ploidy() as u8) << 4;
        if genotype.phased {
            byte |= SHORT_PHASED;
        }
        byte |= code(&genotype.alleles[0])? << 2;
        if let Some(second) = genotype.alleles.get(1) {
            byte |= code(second)?;
        }
        Some(byte)
    }

    /// Decodes a genotype cell payload
    ///
    /// Fails with [`CodecError::CorruptGenotype`] on any malformed payload. Callers
    /// decoding a whole row record the failure against the sample and continue.
    pub fn decode_genotype(bytes: &[u8]) -> std::result::Result<GenotypeCall, CodecError> {
        let (&first, rest) = bytes
            .split_first()
            .ok_or_else(|| corrupt_genotype("empty payload"))?;

        if first & TAGGED == 0 {
            expect_exhausted(rest, corrupt_genotype)?;
            return Self::decode_short_form(first);
        }

        let flags = first & !TAGGED;
        if flags & !FLAG_MASK != 0 {
            return Err(corrupt_genotype("unknown flag bits"));
        }
        let mut cursor = rest;
        let ploidy = cursor
            .read_u8()
            .map_err(|_| corrupt_genotype("missing ploidy"))?;
        if ploidy == 0 {
            return Err(corrupt_genotype("zero ploidy"));
        }

        let mut alleles = Vec::with_capacity(usize::from(ploidy));
        for _ in 0..ploidy {
            let index = cursor
                .read_u16::<BigEndian>()
                .map_err(|_| corrupt_genotype("truncated allele indices"))?;
            alleles.push((index != MISSING_ALLELE_INDEX).then_some(u32::from(index)));
        }

        let mut call = GenotypeCall::new(Genotype::new(alleles, flags & FLAG_PHASED != 0));
        if flags & FLAG_QUALITY != 0 {
            call.quality = Some(
                cursor
                    .read_u16::<BigEndian>()
                    .map_err(|_| corrupt_genotype("truncated quality"))?,
            );
        }
        if flags & FLAG_DEPTH != 0 {
            call.depth = Some(
                cursor
                    .read_u32::<BigEndian>()
                    .map_err(|_| corrupt_genotype("truncated depth"))?,
            );
        }
        if flags & FLAG_FILTER != 0 {
            call.filter = Some(read_short_str(&mut cursor, corrupt_genotype)?);
        }
        expect_exhausted(cursor, corrupt_genotype)?;
        Ok(call)
    }

    fn decode_short_form(byte: u8) -> std::result::Result<GenotypeCall, CodecError> {
        let ploidy = (byte >> 4) & 0b11;
        let allele = |code: u8| (code != SHORT_MISSING).then_some(u32::from(code));
        let first = (byte >> 2) & 0b11;
        let second = byte & 0b11;

        let alleles = match ploidy {
            1 if second == 0 => vec![allele(first)],
            1 => return Err(corrupt_genotype("haploid call with second allele")),
            2 => vec![allele(first), allele(second)],
            _ => return Err(corrupt_genotype("invalid ploidy in short form")),
        };
        Ok(GenotypeCall::new(Genotype::new(
            alleles,
            byte & SHORT_PHASED != 0,
        )))
    }

    /// Encodes the site-level data of one file
    pub fn encode_file_meta(meta: &FileMeta) -> Result<Vec<u8>> {
        let mut flags = 0;
        if meta.quality.is_some() {
            flags |= META_QUALITY;
        }
        if meta.filter.is_some() {
            flags |= META_FILTER;
        }

        let mut buffer = vec![FILE_META_VERSION, flags];
        if let Some(quality) = meta.quality {
            buffer.write_f32::<BigEndian>(quality)?;
        }
        if let Some(filter) = &meta.filter {
            write_short_str(&mut buffer, filter)
                .ok_or_else(|| too_large(ColumnKind::FileMeta, "filter too long"))?;
        }

        let n_info = u16::try_from(meta.info.len())
            .map_err(|_| too_large(ColumnKind::FileMeta, "too many INFO fields"))?;
        buffer.write_u16::<BigEndian>(n_info)?;
        for (key, value) in &meta.info {
            write_short_str(&mut buffer, key)
                .ok_or_else(|| too_large(ColumnKind::FileMeta, "INFO key too long"))?;
            write_long_str(&mut buffer, value)
                .ok_or_else(|| too_large(ColumnKind::FileMeta, "INFO value too long"))?;
        }
        Ok(buffer)
    }

    /// Decodes the site-level data of one file
    pub fn decode_file_meta(bytes: &[u8]) -> std::result::Result<FileMeta, CodecError> {
        let mut cursor = bytes;
        let version = cursor
            .read_u8()
            .map_err(|_| corrupt_file_meta("empty payload"))?;
        if version != FILE_META_VERSION {
            return Err(corrupt_file_meta("unsupported payload version"));
        }
        let flags = cursor
            .read_u8()
            .map_err(|_| corrupt_file_meta("missing flags"))?;
        if flags & !(META_QUALITY | META_FILTER) != 0 {
            return Err(corrupt_file_meta("unknown flag bits"));
        }

        let mut meta = FileMeta::default();
        if flags & META_QUALITY != 0 {
            meta.quality = Some(
                cursor
                    .read_f32::<BigEndian>()
                    .map_err(|_| corrupt_file_meta("truncated quality"))?,
            );
        }
        if flags & META_FILTER != 0 {
            meta.filter = Some(read_short_str(&mut cursor, corrupt_file_meta)?);
        }

        let n_info = cursor
            .read_u16::<BigEndian>()
            .map_err(|_| corrupt_file_meta("missing INFO count"))?;
        let mut info = BTreeMap::new();
        for _ in 0..n_info {
            let key = read_short_str(&mut cursor, corrupt_file_meta)?;
            let value = read_long_str(&mut cursor, corrupt_file_meta)?;
            info.insert(key, value);
        }
        meta.info = info;
        expect_exhausted(cursor, corrupt_file_meta)?;
        Ok(meta)
    }
}
