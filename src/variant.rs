//! Materialized variant records
//!
//! A [`Variant`] only exists transiently: it is assembled from a row on read and
//! flattened back into columns on write. Its identity is the
//! (chromosome, position, reference, alternates) tuple; everything else is
//! per-study payload.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{
    error::{CodecError, Result},
    helper::{ColumnId, GenomeHelper},
    key::{AlleleSummary, RowKey, RowKeyCodec},
};

/// Separator for unphased genotypes
pub const UNPHASED_SEPARATOR: char = '/';

/// Separator for phased genotypes
pub const PHASED_SEPARATOR: char = '|';

/// Text form of a missing allele
pub const MISSING_ALLELE: &str = ".";

/// Allele indices of one sample's call
///
/// `None` marks a missing allele (`.`). Index 0 is the reference allele and
/// index `n` the `n`-th alternate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Genotype {
    pub alleles: Vec<Option<u32>>,
    pub phased: bool,
}
impl Genotype {
    #[must_use]
    pub fn new(alleles: Vec<Option<u32>>, phased: bool) -> Self {
        Self { alleles, phased }
    }

    /// A diploid unphased call
    #[must_use]
    pub fn diploid(a: u32, b: u32) -> Self {
        Self::new(vec![Some(a), Some(b)], false)
    }

    /// A call with every allele missing
    #[must_use]
    pub fn missing(ploidy: usize) -> Self {
        Self::new(vec![None; ploidy], false)
    }

    #[must_use]
    pub fn ploidy(&self) -> usize {
        self.alleles.len()
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        self.alleles.iter().all(Option::is_none)
    }

    /// Largest allele index referenced by the call
    #[must_use]
    pub fn max_allele(&self) -> Option<u32> {
        self.alleles.iter().flatten().copied().max()
    }
}
impl fmt::Display for Genotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let separator = if self.phased {
            PHASED_SEPARATOR
        } else {
            UNPHASED_SEPARATOR
        };
        for (i, allele) in self.alleles.iter().enumerate() {
            if i > 0 {
                write!(f, "{separator}")?;
            }
            match allele {
                Some(index) => write!(f, "{index}")?,
                None => f.write_str(MISSING_ALLELE)?,
            }
        }
        Ok(())
    }
}
impl FromStr for Genotype {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CodecError::InvalidGenotype(s.to_string());
        if s.is_empty() {
            return Err(invalid().into());
        }
        let has_phased = s.contains(PHASED_SEPARATOR);
        let has_unphased = s.contains(UNPHASED_SEPARATOR);
        if has_phased && has_unphased {
            return Err(invalid().into());
        }
        let separator = if has_phased {
            PHASED_SEPARATOR
        } else {
            UNPHASED_SEPARATOR
        };

        let alleles = s
            .split(separator)
            .map(|token| match token {
                MISSING_ALLELE => Ok(None),
                _ => token.parse::<u32>().map(Some).map_err(|_| invalid()),
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self::new(alleles, has_phased))
    }
}

/// One sample's genotype plus optional per-sample annotations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenotypeCall {
    pub genotype: Genotype,

    /// Genotype quality (GQ)
    pub quality: Option<u16>,

    /// Read depth (DP)
    pub depth: Option<u32>,

    /// Per-sample filter (FT)
    pub filter: Option<String>,
}
impl GenotypeCall {
    #[must_use]
    pub fn new(genotype: Genotype) -> Self {
        Self {
            genotype,
            quality: None,
            depth: None,
            filter: None,
        }
    }

    #[must_use]
    pub fn with_quality(mut self, quality: u16) -> Self {
        self.quality = Some(quality);
        self
    }

    #[must_use]
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: &str) -> Self {
        self.filter = Some(filter.to_string());
        self
    }

    /// Returns `true` if the call carries anything beyond allele indices and phasing
    #[must_use]
    pub fn is_annotated(&self) -> bool {
        self.quality.is_some() || self.depth.is_some() || self.filter.is_some()
    }
}
impl FromStr for GenotypeCall {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse().map(Self::new)
    }
}

/// Site-level data contributed by one file
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileMeta {
    /// QUAL column
    pub quality: Option<f32>,

    /// FILTER column
    pub filter: Option<String>,

    /// INFO key/value pairs
    pub info: BTreeMap<String, String>,
}

/// A single statistic value
#[derive(Debug, Clone, PartialEq)]
pub enum StatValue {
    Number(f64),
    Integer(i64),
    Category(String),
}

/// Aggregate statistics of one cohort at one variant
///
/// The field set is opaque at this layer; only round-trip fidelity is guaranteed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariantStats {
    pub fields: BTreeMap<String, StatValue>,
}
impl VariantStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: &str, value: StatValue) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn insert(&mut self, name: &str, value: StatValue) {
        self.fields.insert(name.to_string(), value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StatValue> {
        self.fields.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A cell that could not be decoded
#[derive(Debug, Clone, PartialEq)]
pub struct CellFailure {
    pub column: ColumnId,
    pub reason: CodecError,
}

/// A recoverable condition met while decoding a row
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeWarning {
    /// Columns of a study with no stored configuration were skipped
    UnknownStudy { study_id: u32, columns: usize },

    /// A cell outside the variant column family was ignored
    ForeignFamily { family: Vec<u8> },

    /// A qualifier did not follow the qualifier layout
    UnparseableQualifier { qualifier: Vec<u8>, reason: CodecError },

    /// A genotype column index has no sample in the configuration
    UnknownSampleIndex { study_id: u32, column_index: u32 },

    /// A stats column references an undefined cohort
    UnknownCohort { study_id: u32, cohort_id: u32 },
}

/// Everything one study contributes to a variant
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StudyEntry {
    pub study_id: u32,

    /// Genotype calls keyed by sample name
    pub genotypes: BTreeMap<String, GenotypeCall>,

    /// Site-level data keyed by file id
    pub files: BTreeMap<u32, FileMeta>,

    /// Statistics keyed by cohort name
    pub stats: BTreeMap<String, VariantStats>,

    /// Cells of this study that failed to decode
    pub failures: Vec<CellFailure>,
}
impl StudyEntry {
    #[must_use]
    pub fn new(study_id: u32) -> Self {
        Self {
            study_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.genotypes.is_empty()
            && self.files.is_empty()
            && self.stats.is_empty()
            && self.failures.is_empty()
    }
}

/// A fully materialized variant
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    /// Canonical chromosome name
    pub chromosome: String,
    pub position: u64,
    pub reference: String,
    pub alternates: Vec<String>,

    /// Per-study payload keyed by study id
    pub studies: BTreeMap<u32, StudyEntry>,

    /// Recoverable conditions met while decoding the row
    pub warnings: Vec<DecodeWarning>,
}
impl Variant {
    /// Creates a variant with no study payload
    ///
    /// The chromosome is normalized; unknown names fail with `UnknownChromosome`.
    pub fn new(chromosome: &str, position: u64, reference: &str, alternates: &[&str]) -> Result<Self> {
        Ok(Self {
            chromosome: GenomeHelper::normalize_chromosome(chromosome)?.to_string(),
            position,
            reference: reference.to_string(),
            alternates: alternates.iter().map(ToString::to_string).collect(),
            studies: BTreeMap::new(),
            warnings: Vec::new(),
        })
    }

    /// Creates an empty variant from a decoded row key
    #[must_use]
    pub fn from_key(key: RowKey) -> Self {
        Self {
            chromosome: key.chromosome,
            position: key.position,
            reference: key.alleles.reference,
            alternates: key.alleles.alternates,
            studies: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn allele_summary(&self) -> AlleleSummary {
        AlleleSummary {
            reference: self.reference.clone(),
            alternates: self.alternates.clone(),
        }
    }

    /// Encodes the identity of this variant into a row key
    pub fn row_key(&self) -> Result<Vec<u8>> {
        RowKeyCodec::encode(&self.chromosome, self.position, &self.allele_summary())
    }

    #[must_use]
    pub fn study(&self, study_id: u32) -> Option<&StudyEntry> {
        self.studies.get(&study_id)
    }

    /// Returns the entry of a study, creating it if absent
    pub fn study_mut(&mut self, study_id: u32) -> &mut StudyEntry {
        self.studies
            .entry(study_id)
            .or_insert_with(|| StudyEntry::new(study_id))
    }

    /// Records a genotype call for a sample of a study
    pub fn set_genotype(&mut self, study_id: u32, sample: &str, call: GenotypeCall) {
        self.study_mut(study_id)
            .genotypes
            .insert(sample.to_string(), call);
    }

    /// Records site-level data for a file of a study
    pub fn set_file_meta(&mut self, study_id: u32, file_id: u32, meta: FileMeta) {
        self.study_mut(study_id).files.insert(file_id, meta);
    }

    /// Records statistics for a cohort of a study
    pub fn set_stats(&mut self, study_id: u32, cohort: &str, stats: VariantStats) {
        self.study_mut(study_id)
            .stats
            .insert(cohort.to_string(), stats);
    }

    #[must_use]
    pub fn genotype(&self, study_id: u32, sample: &str) -> Option<&GenotypeCall> {
        self.study(study_id)?.genotypes.get(sample)
    }

    #[must_use]
    pub fn stats(&self, study_id: u32, cohort: &str) -> Option<&VariantStats> {
        self.study(study_id)?.stats.get(cohort)
    }

    /// Iterates over every (study, sample, call) triple
    pub fn genotypes(&self) -> impl Iterator<Item = (u32, &str, &GenotypeCall)> {
        self.studies.values().flat_map(|entry| {
            entry
                .genotypes
                .iter()
                .map(move |(sample, call)| (entry.study_id, sample.as_str(), call))
        })
    }

    /// Total number of cells that failed to decode across all studies
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.studies.values().map(|s| s.failures.len()).sum()
    }
}
