//! Shared naming and addressing rules for variant rows
//!
//! This module owns the pieces of the storage layout that both the row codec and
//! the configuration layer need to agree on: canonical chromosome names, the
//! fixed-width chromosome field of a row key, the column family name, the
//! configuration row keys and the 9-byte column qualifier.

use bytemuck::{Pod, Zeroable};

use crate::{
    error::{CodecError, KeyError, Result},
    options::StorageOptions,
};

/// Width in bytes of the chromosome field of a row key
pub const CHROMOSOME_WIDTH: usize = 2;

/// Byte used to left-pad chromosome names shorter than [`CHROMOSOME_WIDTH`]
pub const CHROMOSOME_PAD: u8 = b'0';

/// Size of an encoded column qualifier
pub const QUALIFIER_SIZE: usize = std::mem::size_of::<Qualifier>();

/// Canonical chromosome names, in genomic order
pub const CHROMOSOMES: [&str; 25] = [
    "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16", "17",
    "18", "19", "20", "21", "22", "X", "Y", "MT",
];

/// The kind of data held by a column
///
/// The kind is the first byte of every qualifier, so a raw column name is
/// enough to know how to decode its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ColumnKind {
    /// One sample's genotype call; the column index is the sample column index
    Genotype,
    /// One file's site-level metadata; the column index is the file id
    FileMeta,
    /// One cohort's aggregate statistics; the column index is the cohort id
    Stats,
}
impl ColumnKind {
    #[must_use]
    pub fn tag(self) -> u8 {
        match self {
            Self::Genotype => b'G',
            Self::FileMeta => b'F',
            Self::Stats => b'S',
        }
    }

    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'G' => Some(Self::Genotype),
            b'F' => Some(Self::FileMeta),
            b'S' => Some(Self::Stats),
            _ => None,
        }
    }
}

/// On-disk layout of a column qualifier
///
/// Integers are stored big-endian so that qualifiers of one study sort by
/// kind, then by column index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
struct Qualifier {
    kind: u8,
    study_id: [u8; 4],
    column_index: [u8; 4],
}

/// A parsed column qualifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnId {
    pub study_id: u32,
    pub column_index: u32,
    pub kind: ColumnKind,
}
impl ColumnId {
    #[must_use]
    pub fn new(study_id: u32, column_index: u32, kind: ColumnKind) -> Self {
        Self {
            study_id,
            column_index,
            kind,
        }
    }
}

/// Shared encoding utilities for the row codec and configuration layer
#[derive(Debug, Clone)]
pub struct GenomeHelper {
    family: Vec<u8>,
    config_prefix: Vec<u8>,
}
impl Default for GenomeHelper {
    fn default() -> Self {
        Self::new(&StorageOptions::default())
    }
}
impl GenomeHelper {
    #[must_use]
    pub fn new(options: &StorageOptions) -> Self {
        Self {
            family: options.column_family.as_bytes().to_vec(),
            config_prefix: options.config_key_prefix.as_bytes().to_vec(),
        }
    }

    /// Canonicalizes a chromosome name
    ///
    /// Strips any `chr` prefix (case-insensitive), drops leading zeros on
    /// numeric names and folds the mitochondrial and sex chromosome aliases.
    ///
    /// # Examples
    ///
    /// ```
    /// use varcol::GenomeHelper;
    ///
    /// assert_eq!(GenomeHelper::normalize_chromosome("chr1").unwrap(), "1");
    /// assert_eq!(GenomeHelper::normalize_chromosome("chrM").unwrap(), "MT");
    /// assert_eq!(GenomeHelper::normalize_chromosome("x").unwrap(), "X");
    /// assert!(GenomeHelper::normalize_chromosome("chrUn_gl000220").is_err());
    /// ```
    pub fn normalize_chromosome(raw: &str) -> Result<&'static str> {
        let trimmed = raw.trim();
        let stripped = match trimmed.get(..3) {
            Some(prefix) if prefix.eq_ignore_ascii_case("chr") => &trimmed[3..],
            _ => trimmed,
        };

        let canonical = if !stripped.is_empty() && stripped.bytes().all(|b| b.is_ascii_digit()) {
            match stripped.parse::<u32>() {
                Ok(n @ 1..=22) => Some(CHROMOSOMES[n as usize - 1]),
                Ok(23) => Some("X"),
                Ok(24) => Some("Y"),
                Ok(25) => Some("MT"),
                _ => None,
            }
        } else if stripped.eq_ignore_ascii_case("x") {
            Some("X")
        } else if stripped.eq_ignore_ascii_case("y") {
            Some("Y")
        } else if stripped.eq_ignore_ascii_case("m") || stripped.eq_ignore_ascii_case("mt") {
            Some("MT")
        } else {
            None
        };

        canonical.ok_or_else(|| KeyError::UnknownChromosome(raw.to_string()).into())
    }

    /// Position of a canonical chromosome in genomic order
    #[must_use]
    pub fn chromosome_rank(chromosome: &str) -> Option<usize> {
        CHROMOSOMES.iter().position(|c| *c == chromosome)
    }

    /// Encodes a canonical chromosome name into the fixed-width key field
    pub(crate) fn pad_chromosome(chromosome: &str) -> [u8; CHROMOSOME_WIDTH] {
        let mut field = [CHROMOSOME_PAD; CHROMOSOME_WIDTH];
        let bytes = chromosome.as_bytes();
        field[CHROMOSOME_WIDTH - bytes.len()..].copy_from_slice(bytes);
        field
    }

    /// Decodes the fixed-width key field back into a canonical chromosome name
    pub(crate) fn unpad_chromosome(field: &[u8]) -> Option<&'static str> {
        let start = field
            .iter()
            .position(|&b| b != CHROMOSOME_PAD)
            .unwrap_or(field.len());
        let name = std::str::from_utf8(&field[start..]).ok()?;
        CHROMOSOMES.iter().copied().find(|c| *c == name)
    }

    /// Column family holding every variant column
    #[must_use]
    pub fn column_family(&self) -> &[u8] {
        &self.family
    }

    /// Builds the column qualifier for a (study, column index, kind) triple
    ///
    /// # Examples
    ///
    /// ```
    /// use varcol::{ColumnId, ColumnKind, GenomeHelper};
    ///
    /// let qualifier = GenomeHelper::qualifier_for(1, 0, ColumnKind::Genotype);
    /// let parsed = GenomeHelper::parse_qualifier(&qualifier).unwrap();
    /// assert_eq!(parsed, ColumnId::new(1, 0, ColumnKind::Genotype));
    /// ```
    #[must_use]
    pub fn qualifier_for(study_id: u32, column_index: u32, kind: ColumnKind) -> Vec<u8> {
        let qualifier = Qualifier {
            kind: kind.tag(),
            study_id: study_id.to_be_bytes(),
            column_index: column_index.to_be_bytes(),
        };
        bytemuck::bytes_of(&qualifier).to_vec()
    }

    /// Recovers the (study, column index, kind) triple from a raw qualifier
    pub fn parse_qualifier(bytes: &[u8]) -> std::result::Result<ColumnId, CodecError> {
        if bytes.len() != QUALIFIER_SIZE {
            return Err(CodecError::InvalidQualifier {
                len: bytes.len(),
                reason: "unexpected qualifier length",
            });
        }
        let qualifier: Qualifier = *bytemuck::from_bytes(bytes);
        let kind = ColumnKind::from_tag(qualifier.kind).ok_or(CodecError::InvalidQualifier {
            len: bytes.len(),
            reason: "unknown column kind tag",
        })?;
        Ok(ColumnId {
            study_id: u32::from_be_bytes(qualifier.study_id),
            column_index: u32::from_be_bytes(qualifier.column_index),
            kind,
        })
    }

    /// Qualifier prefix shared by every column of one study and kind
    #[must_use]
    pub fn qualifier_prefix(study_id: u32, kind: ColumnKind) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(5);
        prefix.push(kind.tag());
        prefix.extend_from_slice(&study_id.to_be_bytes());
        prefix
    }

    /// Row key under which a study configuration is persisted
    ///
    /// The prefix sorts after every chromosome field so configuration rows never
    /// interleave with variant rows during a scan.
    #[must_use]
    pub fn study_configuration_key(&self, study_id: u32) -> Vec<u8> {
        let mut key = self.config_prefix.clone();
        key.extend_from_slice(&study_id.to_be_bytes());
        key
    }

    /// Returns `true` if the key belongs to a persisted study configuration
    #[must_use]
    pub fn is_configuration_key(&self, key: &[u8]) -> bool {
        key.starts_with(&self.config_prefix)
    }

    /// Returns `true` if the key lies in the variant row space
    #[must_use]
    pub fn is_variant_key(&self, key: &[u8]) -> bool {
        !self.is_configuration_key(key)
            && key.len() >= CHROMOSOME_WIDTH
            && Self::unpad_chromosome(&key[..CHROMOSOME_WIDTH]).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    // ==================== Chromosome Tests ====================

    #[test]
    fn test_normalize_plain_names() {
        for chr in CHROMOSOMES {
            assert_eq!(GenomeHelper::normalize_chromosome(chr).unwrap(), chr);
        }
    }

    #[test]
    fn test_normalize_prefixed_names() {
        assert_eq!(GenomeHelper::normalize_chromosome("chr1").unwrap(), "1");
        assert_eq!(GenomeHelper::normalize_chromosome("Chr22").unwrap(), "22");
        assert_eq!(GenomeHelper::normalize_chromosome("CHRX").unwrap(), "X");
        assert_eq!(GenomeHelper::normalize_chromosome("chrM").unwrap(), "MT");
        assert_eq!(GenomeHelper::normalize_chromosome("chrMT").unwrap(), "MT");
    }

    #[test]
    fn test_normalize_numeric_aliases() {
        assert_eq!(GenomeHelper::normalize_chromosome("01").unwrap(), "1");
        assert_eq!(GenomeHelper::normalize_chromosome("23").unwrap(), "X");
        assert_eq!(GenomeHelper::normalize_chromosome("24").unwrap(), "Y");
        assert_eq!(GenomeHelper::normalize_chromosome("25").unwrap(), "MT");
        assert_eq!(GenomeHelper::normalize_chromosome(" 7 ").unwrap(), "7");
    }

    #[test]
    fn test_normalize_unknown() {
        for raw in ["", "chr", "0", "26", "chrUn", "GL000192.1", "1_random"] {
            let err = GenomeHelper::normalize_chromosome(raw).unwrap_err();
            assert!(matches!(err, Error::KeyError(KeyError::UnknownChromosome(_))));
        }
    }

    #[test]
    fn test_pad_unpad() {
        assert_eq!(&GenomeHelper::pad_chromosome("1"), b"01");
        assert_eq!(&GenomeHelper::pad_chromosome("22"), b"22");
        assert_eq!(&GenomeHelper::pad_chromosome("X"), b"0X");
        assert_eq!(&GenomeHelper::pad_chromosome("MT"), b"MT");
        for chr in CHROMOSOMES {
            let field = GenomeHelper::pad_chromosome(chr);
            assert_eq!(GenomeHelper::unpad_chromosome(&field), Some(chr));
        }
        assert_eq!(GenomeHelper::unpad_chromosome(b"00"), None);
        assert_eq!(GenomeHelper::unpad_chromosome(b"99"), None);
    }

    #[test]
    fn test_chromosome_rank() {
        assert_eq!(GenomeHelper::chromosome_rank("1"), Some(0));
        assert_eq!(GenomeHelper::chromosome_rank("MT"), Some(24));
        assert_eq!(GenomeHelper::chromosome_rank("chr1"), None);
    }

    // ==================== Qualifier Tests ====================

    #[test]
    fn test_qualifier_size() {
        assert_eq!(QUALIFIER_SIZE, 9);
        assert_eq!(GenomeHelper::qualifier_for(1, 2, ColumnKind::Stats).len(), 9);
    }

    #[test]
    fn test_qualifier_round_trip() {
        let kinds = [ColumnKind::Genotype, ColumnKind::FileMeta, ColumnKind::Stats];
        for kind in kinds {
            for (study, index) in [(0, 0), (1, 0), (2, 17), (u32::MAX, u32::MAX)] {
                let qualifier = GenomeHelper::qualifier_for(study, index, kind);
                let parsed = GenomeHelper::parse_qualifier(&qualifier).unwrap();
                assert_eq!(parsed, ColumnId::new(study, index, kind));
            }
        }
    }

    #[test]
    fn test_qualifier_prefix_matches() {
        let qualifier = GenomeHelper::qualifier_for(5, 300, ColumnKind::Genotype);
        assert!(qualifier.starts_with(&GenomeHelper::qualifier_prefix(5, ColumnKind::Genotype)));
        assert!(!qualifier.starts_with(&GenomeHelper::qualifier_prefix(5, ColumnKind::Stats)));
    }

    #[test]
    fn test_qualifiers_sort_by_index() {
        let a = GenomeHelper::qualifier_for(1, 9, ColumnKind::Genotype);
        let b = GenomeHelper::qualifier_for(1, 256, ColumnKind::Genotype);
        assert!(a < b);
    }

    #[test]
    fn test_parse_invalid_qualifier() {
        assert!(matches!(
            GenomeHelper::parse_qualifier(b"short"),
            Err(CodecError::InvalidQualifier { len: 5, .. })
        ));

        let mut qualifier = GenomeHelper::qualifier_for(1, 1, ColumnKind::Genotype);
        qualifier[0] = b'Z';
        assert!(matches!(
            GenomeHelper::parse_qualifier(&qualifier),
            Err(CodecError::InvalidQualifier { .. })
        ));
    }

    // ==================== Key Space Tests ====================

    #[test]
    fn test_configuration_key_outside_variant_space() {
        let helper = GenomeHelper::default();
        let key = helper.study_configuration_key(3);
        assert!(!helper.is_variant_key(&key));
        assert!(helper.is_configuration_key(&key));
        assert!(helper.is_variant_key(b"01_0000001000_"));
        assert!(!helper.is_configuration_key(b"01_0000001000_"));
        for chr in CHROMOSOMES {
            assert!(key.as_slice() > GenomeHelper::pad_chromosome(chr).as_slice());
        }
    }

    #[test]
    fn test_custom_family() {
        let options = StorageOptions::default().with_column_family("v");
        let helper = GenomeHelper::new(&options);
        assert_eq!(helper.column_family(), b"v");
    }
}
