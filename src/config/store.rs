use std::collections::BTreeMap;

use auto_impl::auto_impl;
use parking_lot::Mutex;

use crate::{
    error::{ConfigError, Result},
    helper::GenomeHelper,
    store::{RowMutation, VariantStore},
};

/// Qualifier of the version cell of a configuration row
pub const VERSION_QUALIFIER: &[u8] = b"_v";

/// Qualifier of the blob cell of a configuration row
pub const BLOB_QUALIFIER: &[u8] = b"_c";

/// A stored configuration blob and the version it was written as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedBlob {
    pub version: u64,
    pub data: Vec<u8>,
}

/// Durable, versioned storage of configuration blobs
///
/// Versions start at 1 and increase by one on every successful write. Writers
/// never overwrite blindly: `put_if_version` only succeeds when the stored
/// version still equals the one the writer read.
#[auto_impl(&, Arc, Box)]
pub trait ConfigStore: Send + Sync {
    fn get(&self, study_id: u32) -> Result<Option<VersionedBlob>>;

    /// Current version of a study without fetching its blob
    fn version(&self, study_id: u32) -> Result<Option<u64>>;

    /// Compare-and-swap write
    ///
    /// An `expected` of 0 requires the study to be absent. On success the
    /// stored version becomes `expected + 1`.
    fn put_if_version(&self, study_id: u32, expected: u64, data: Vec<u8>) -> Result<bool>;

    /// Ids of every stored study, ascending
    fn list(&self) -> Result<Vec<u32>>;
}

/// A `ConfigStore` held entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    blobs: Mutex<BTreeMap<u32, VersionedBlob>>,
}
impl InMemoryConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
impl ConfigStore for InMemoryConfigStore {
    fn get(&self, study_id: u32) -> Result<Option<VersionedBlob>> {
        Ok(self.blobs.lock().get(&study_id).cloned())
    }

    fn version(&self, study_id: u32) -> Result<Option<u64>> {
        Ok(self.blobs.lock().get(&study_id).map(|blob| blob.version))
    }

    fn put_if_version(&self, study_id: u32, expected: u64, data: Vec<u8>) -> Result<bool> {
        let mut blobs = self.blobs.lock();
        let current = blobs.get(&study_id).map_or(0, |blob| blob.version);
        if current != expected {
            return Ok(false);
        }
        blobs.insert(
            study_id,
            VersionedBlob {
                version: expected + 1,
                data,
            },
        );
        Ok(true)
    }

    fn list(&self) -> Result<Vec<u32>> {
        Ok(self.blobs.lock().keys().copied().collect())
    }
}

/// A `ConfigStore` keeping each configuration as one row of a variant store
///
/// The row lives under [`GenomeHelper::study_configuration_key`], outside the
/// variant key space. The version cell holds the big-endian version and is the
/// cell every conditional write checks.
#[derive(Debug, Clone)]
pub struct RowConfigStore<S: VariantStore> {
    store: S,
    helper: GenomeHelper,
}
impl<S: VariantStore> RowConfigStore<S> {
    pub fn new(store: S, helper: GenomeHelper) -> Self {
        Self { store, helper }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    fn parse_version(study_id: u32, bytes: &[u8]) -> Result<u64> {
        let bytes: [u8; 8] = bytes
            .try_into()
            .map_err(|_| ConfigError::CorruptConfiguration {
                study_id,
                reason: "version cell is not 8 bytes".to_string(),
            })?;
        Ok(u64::from_be_bytes(bytes))
    }
}
impl<S: VariantStore> ConfigStore for RowConfigStore<S> {
    fn get(&self, study_id: u32) -> Result<Option<VersionedBlob>> {
        let key = self.helper.study_configuration_key(study_id);
        let Some(row) = self.store.get(&key)? else {
            return Ok(None);
        };
        let family = self.helper.column_family();
        let (Some(version), Some(data)) = (
            row.value(family, VERSION_QUALIFIER),
            row.value(family, BLOB_QUALIFIER),
        ) else {
            return Ok(None);
        };
        Ok(Some(VersionedBlob {
            version: Self::parse_version(study_id, version)?,
            data: data.to_vec(),
        }))
    }

    fn version(&self, study_id: u32) -> Result<Option<u64>> {
        let key = self.helper.study_configuration_key(study_id);
        let Some(row) = self.store.get(&key)? else {
            return Ok(None);
        };
        row.value(self.helper.column_family(), VERSION_QUALIFIER)
            .map(|bytes| Self::parse_version(study_id, bytes))
            .transpose()
    }

    fn put_if_version(&self, study_id: u32, expected: u64, data: Vec<u8>) -> Result<bool> {
        let key = self.helper.study_configuration_key(study_id);
        let family = self.helper.column_family();
        let expected_cell = expected.to_be_bytes();

        let mut mutation = RowMutation::new(key);
        mutation.put(family, VERSION_QUALIFIER, (expected + 1).to_be_bytes().to_vec());
        mutation.put(family, BLOB_QUALIFIER, data);

        let expected_cell = (expected > 0).then_some(&expected_cell[..]);
        self.store
            .check_and_put(family, VERSION_QUALIFIER, expected_cell, mutation)
    }

    fn list(&self) -> Result<Vec<u32>> {
        let start = self.helper.study_configuration_key(0);
        let mut stop = self.helper.study_configuration_key(u32::MAX);
        stop.push(0);
        let mut ids = Vec::new();
        for row in self.store.scan(&start, &stop)? {
            let suffix = &row.key[start.len() - 4..];
            if let Ok(bytes) = <[u8; 4]>::try_from(suffix) {
                ids.push(u32::from_be_bytes(bytes));
            }
        }
        Ok(ids)
    }
}
