//! Study configurations: the per-study schema that maps column indices to
//! samples, files and cohorts, and the machinery to store and share it.
//!
//! A configuration is append-only. Column indices handed out to samples are
//! never reassigned, so any row written against an older version decodes
//! against every later one. Writers coordinate through a compare-and-swap on
//! the stored version (see [`ConfigStore::put_if_version`]).

mod blob;
mod manager;
mod store;
mod study;

pub use blob::{CONFIG_FORMAT_VERSION, CONFIG_MAGIC, ConfigHeader, decode_configuration, encode_configuration};
pub use manager::{ConfigResolver, StaticResolver, StudyConfigurationManager};
pub use store::{
    BLOB_QUALIFIER, ConfigStore, InMemoryConfigStore, RowConfigStore, VERSION_QUALIFIER,
    VersionedBlob,
};
pub use study::{Cohort, DEFAULT_COHORT, DEFAULT_COHORT_ID, FileEntry, SampleEntry, StudyConfiguration};
