//! # varcol
//!
//! Stores genomic variants in an ordered wide-column store.
//!
//! Each variant is one row. The row key is built from the chromosome, the
//! zero-padded position and the alleles, so a byte-ordered scan walks the
//! genome in coordinate order. Every sample, file and cohort of every study
//! gets its own column, addressed by a qualifier that names the study, the
//! column index and the kind of data held, so rows stay sparse.
//!
//! Column indices come from a per-study [`StudyConfiguration`]. It is
//! append-only: indices are never reassigned, so historical rows always decode.
//! Writers register samples through the [`StudyConfigurationManager`], which
//! serializes concurrent updates with a compare-and-swap on the stored version.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use varcol::{
//!     InMemoryConfigStore, InMemoryVariantStore, StorageOptions, StudyConfigurationManager,
//!     Variant, VariantRowConverter, VariantStore,
//! };
//!
//! let options = StorageOptions::default();
//! let manager = StudyConfigurationManager::new(InMemoryConfigStore::new(), &options);
//! manager.create_study(1, "pilot").unwrap();
//! let (config, _) = manager.add_samples(1, 1, "pilot.vcf", &["S1"]).unwrap();
//!
//! let mut variant = Variant::new("chr1", 1000, "A", &["T"]).unwrap();
//! variant.set_genotype(1, "S1", "0/1".parse().unwrap());
//!
//! let converter = VariantRowConverter::new(&options);
//! let store = InMemoryVariantStore::new();
//! let key = variant.row_key().unwrap();
//! store.put(converter.encode_row(&variant, &[&config]).unwrap()).unwrap();
//!
//! let row = store.get(&key).unwrap().unwrap();
//! let decoded = converter.decode_row(&row, &manager).unwrap();
//! assert_eq!(decoded.genotype(1, "S1").unwrap().genotype.to_string(), "0/1");
//! ```

mod codec;
mod config;
mod converter;
mod error;
mod helper;
mod key;
mod options;
mod parallel;
mod policy;
mod store;
mod variant;

pub use codec::{
    DecodedStats, MISSING_ALLELE_INDEX, SHORT_FORM_MAX_ALLELE, VariantColumnCodec,
    VariantStatsCodec,
};
pub use config::{
    BLOB_QUALIFIER, CONFIG_FORMAT_VERSION, CONFIG_MAGIC, Cohort, ConfigHeader, ConfigResolver,
    ConfigStore, DEFAULT_COHORT, DEFAULT_COHORT_ID, FileEntry, InMemoryConfigStore,
    RowConfigStore, SampleEntry, StaticResolver, StudyConfiguration, StudyConfigurationManager,
    VERSION_QUALIFIER, VersionedBlob, decode_configuration, encode_configuration,
};
pub use converter::VariantRowConverter;
pub use error::{CodecError, ConfigError, EncodeError, Error, IntoVarcolError, KeyError, Result};
pub use helper::{
    CHROMOSOME_PAD, CHROMOSOME_WIDTH, CHROMOSOMES, ColumnId, ColumnKind, GenomeHelper,
    QUALIFIER_SIZE,
};
pub use key::{
    AlleleSummary, KEY_PREFIX_LEN, KEY_SEPARATOR, MAX_ALLELE_SUMMARY_BYTES, MAX_POSITION,
    POSITION_WIDTH, RowKey, RowKeyCodec,
};
pub use options::StorageOptions;
pub use parallel::{CancellationToken, RowProcessor, ScanDecoder};
pub use policy::RetryPolicy;
pub use store::{Cell, InMemoryVariantStore, Row, RowMutation, VariantStore};
pub use variant::{
    CellFailure, DecodeWarning, FileMeta, Genotype, GenotypeCall, StatValue, StudyEntry, Variant,
    VariantStats,
};
