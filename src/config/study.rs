use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Name of the cohort that always holds every active sample
pub const DEFAULT_COHORT: &str = "ALL";

/// Cohort id of [`DEFAULT_COHORT`]
pub const DEFAULT_COHORT_ID: u32 = 0;

/// A registered sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleEntry {
    /// Column index of the sample; never reassigned
    pub index: u32,

    /// `false` once the sample has been deprecated
    pub active: bool,
}

/// A registered file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,

    /// Column indices of the samples contributed by the file
    pub samples: Vec<u32>,

    /// Configuration version at which the file was registered
    pub batch: u64,
}

/// A named group of samples with its own stats column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cohort {
    pub name: String,
    pub samples: BTreeSet<u32>,
}

/// The versioned, append-only schema of one study
///
/// Maps sample names to column indices, file ids to the samples they
/// contributed, and cohort ids to sample sets. Column indices are handed out
/// from a monotonic counter and are never reused, so every row written against
/// an older version of the configuration still decodes against a newer one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyConfiguration {
    study_id: u32,
    name: String,

    /// Version of the stored copy this configuration was loaded from (0 = never stored)
    #[serde(skip)]
    pub(crate) version: u64,

    next_sample_index: u32,
    samples: BTreeMap<String, SampleEntry>,
    files: BTreeMap<u32, FileEntry>,
    next_cohort_id: u32,
    cohorts: BTreeMap<u32, Cohort>,

    #[serde(skip)]
    index_to_sample: BTreeMap<u32, String>,
}
impl StudyConfiguration {
    /// Creates an empty configuration holding only the default cohort
    #[must_use]
    pub fn new(study_id: u32, name: &str) -> Self {
        let mut cohorts = BTreeMap::new();
        cohorts.insert(
            DEFAULT_COHORT_ID,
            Cohort {
                name: DEFAULT_COHORT.to_string(),
                samples: BTreeSet::new(),
            },
        );
        Self {
            study_id,
            name: name.to_string(),
            version: 0,
            next_sample_index: 0,
            samples: BTreeMap::new(),
            files: BTreeMap::new(),
            next_cohort_id: DEFAULT_COHORT_ID + 1,
            cohorts,
            index_to_sample: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn study_id(&self) -> u32 {
        self.study_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The column index the next new sample will receive
    #[must_use]
    pub fn next_sample_index(&self) -> u32 {
        self.next_sample_index
    }

    // ==================== Samples ====================

    #[must_use]
    pub fn sample_index(&self, sample: &str) -> Option<u32> {
        self.samples.get(sample).map(|entry| entry.index)
    }

    #[must_use]
    pub fn sample(&self, sample: &str) -> Option<&SampleEntry> {
        self.samples.get(sample)
    }

    #[must_use]
    pub fn sample_name(&self, index: u32) -> Option<&str> {
        self.index_to_sample.get(&index).map(String::as_str)
    }

    #[must_use]
    pub fn is_active(&self, sample: &str) -> bool {
        self.samples.get(sample).is_some_and(|entry| entry.active)
    }

    /// Iterates over every registered sample, deprecated ones included
    pub fn samples(&self) -> impl Iterator<Item = (&str, &SampleEntry)> {
        self.samples.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Names of the samples that have not been deprecated, in column order
    #[must_use]
    pub fn active_samples(&self) -> Vec<&str> {
        self.index_to_sample
            .values()
            .filter(|name| self.is_active(name))
            .map(String::as_str)
            .collect()
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    // ==================== Files ====================

    #[must_use]
    pub fn file(&self, file_id: u32) -> Option<&FileEntry> {
        self.files.get(&file_id)
    }

    pub fn files(&self) -> impl Iterator<Item = (u32, &FileEntry)> {
        self.files.iter().map(|(id, entry)| (*id, entry))
    }

    /// Names of the samples contributed by a file
    #[must_use]
    pub fn samples_in_file(&self, file_id: u32) -> Option<Vec<&str>> {
        let entry = self.files.get(&file_id)?;
        Some(
            entry
                .samples
                .iter()
                .filter_map(|index| self.sample_name(*index))
                .collect(),
        )
    }

    // ==================== Cohorts ====================

    #[must_use]
    pub fn cohort(&self, cohort_id: u32) -> Option<&Cohort> {
        self.cohorts.get(&cohort_id)
    }

    #[must_use]
    pub fn cohort_id(&self, name: &str) -> Option<u32> {
        self.cohorts
            .iter()
            .find(|(_, cohort)| cohort.name == name)
            .map(|(id, _)| *id)
    }

    #[must_use]
    pub fn cohort_name(&self, cohort_id: u32) -> Option<&str> {
        self.cohorts.get(&cohort_id).map(|c| c.name.as_str())
    }

    pub fn cohorts(&self) -> impl Iterator<Item = (u32, &Cohort)> {
        self.cohorts.iter().map(|(id, cohort)| (*id, cohort))
    }

    // ==================== Mutations ====================

    /// Registers a file and the samples it contributes
    ///
    /// Samples seen for the first time receive the next unused column indices,
    /// in input order. Samples already registered keep their index. The file is
    /// stamped with the version this mutation will be stored as.
    ///
    /// # Returns
    ///
    /// The column index of every input sample, in input order.
    pub(crate) fn register_file(
        &mut self,
        file_id: u32,
        file_name: &str,
        sample_names: &[&str],
    ) -> Result<Vec<u32>> {
        if self.files.contains_key(&file_id) {
            return Err(ConfigError::DuplicateFile {
                study_id: self.study_id,
                file_id,
            }
            .into());
        }
        if let Some(retired) = sample_names
            .iter()
            .find(|name| self.samples.get(**name).is_some_and(|entry| !entry.active))
        {
            return Err(ConfigError::SampleRetired {
                study_id: self.study_id,
                sample: (*retired).to_string(),
            }
            .into());
        }

        let mut indices = Vec::with_capacity(sample_names.len());
        for name in sample_names {
            let index = match self.samples.get(*name) {
                Some(entry) => entry.index,
                None => self.assign_index(name)?,
            };
            indices.push(index);
        }

        let mut seen = BTreeSet::new();
        let file_samples: Vec<u32> = indices
            .iter()
            .copied()
            .filter(|index| seen.insert(*index))
            .collect();
        self.files.insert(
            file_id,
            FileEntry {
                name: file_name.to_string(),
                samples: file_samples,
                batch: self.version + 1,
            },
        );
        Ok(indices)
    }

    fn assign_index(&mut self, name: &str) -> Result<u32> {
        let index = self.next_sample_index;
        self.next_sample_index = index
            .checked_add(1)
            .ok_or(ConfigError::ColumnIndexExhausted(self.study_id))?;
        self.samples.insert(
            name.to_string(),
            SampleEntry {
                index,
                active: true,
            },
        );
        self.index_to_sample.insert(index, name.to_string());
        if let Some(all) = self.cohorts.get_mut(&DEFAULT_COHORT_ID) {
            all.samples.insert(index);
        }
        Ok(index)
    }

    /// Marks samples inactive, retiring their column indices
    ///
    /// Deprecated samples leave the default cohort but keep their index, so
    /// historical rows still decode to the same sample names.
    ///
    /// # Returns
    ///
    /// The number of samples that were active before the call.
    pub(crate) fn deprecate_samples(&mut self, sample_names: &[&str]) -> Result<usize> {
        if let Some(unknown) = sample_names.iter().find(|name| !self.samples.contains_key(**name)) {
            return Err(ConfigError::UnknownSample {
                study_id: self.study_id,
                sample: (*unknown).to_string(),
            }
            .into());
        }

        let mut deprecated = 0;
        for name in sample_names {
            if let Some(entry) = self.samples.get_mut(*name) {
                if entry.active {
                    entry.active = false;
                    deprecated += 1;
                    if let Some(all) = self.cohorts.get_mut(&DEFAULT_COHORT_ID) {
                        all.samples.remove(&entry.index);
                    }
                }
            }
        }
        Ok(deprecated)
    }

    /// Defines a new cohort over registered samples
    pub(crate) fn add_cohort(&mut self, name: &str, sample_names: &[&str]) -> Result<u32> {
        if self.cohort_id(name).is_some() {
            return Err(ConfigError::DuplicateCohort {
                study_id: self.study_id,
                cohort: name.to_string(),
            }
            .into());
        }
        let samples = sample_names
            .iter()
            .map(|sample| {
                self.sample_index(sample).ok_or_else(|| ConfigError::UnknownSample {
                    study_id: self.study_id,
                    sample: (*sample).to_string(),
                })
            })
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;

        let cohort_id = self.next_cohort_id;
        self.next_cohort_id += 1;
        self.cohorts.insert(
            cohort_id,
            Cohort {
                name: name.to_string(),
                samples,
            },
        );
        Ok(cohort_id)
    }

    /// Rebuilds the reverse sample index and checks the schema invariants
    ///
    /// Called after deserialization, since the reverse index is not stored.
    pub(crate) fn rebuild_index(&mut self) -> std::result::Result<(), String> {
        self.index_to_sample.clear();
        for (name, entry) in &self.samples {
            if entry.index >= self.next_sample_index {
                return Err(format!(
                    "sample {name} has index {} beyond counter {}",
                    entry.index, self.next_sample_index
                ));
            }
            if let Some(previous) = self.index_to_sample.insert(entry.index, name.clone()) {
                return Err(format!(
                    "samples {previous} and {name} share column index {}",
                    entry.index
                ));
            }
        }
        if !self.cohorts.contains_key(&DEFAULT_COHORT_ID) {
            return Err("default cohort missing".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn study() -> StudyConfiguration {
        StudyConfiguration::new(1, "cohort-study")
    }

    #[test]
    fn test_new_has_default_cohort() {
        let config = study();
        assert_eq!(config.cohort_id(DEFAULT_COHORT), Some(DEFAULT_COHORT_ID));
        assert_eq!(config.cohort_name(DEFAULT_COHORT_ID), Some(DEFAULT_COHORT));
        assert_eq!(config.version(), 0);
        assert_eq!(config.sample_count(), 0);
    }

    #[test]
    fn test_register_assigns_sequential_indices() {
        let mut config = study();
        let indices = config.register_file(10, "a.vcf", &["S1", "S2", "S3"]).unwrap();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(config.sample_index("S2"), Some(1));
        assert_eq!(config.sample_name(2), Some("S3"));
        assert_eq!(config.next_sample_index(), 3);
        assert_eq!(config.samples_in_file(10).unwrap(), vec!["S1", "S2", "S3"]);
        assert_eq!(config.file(10).unwrap().batch, 1);
    }

    #[test]
    fn test_register_is_append_only() {
        let mut config = study();
        config.register_file(1, "a.vcf", &["S1", "S2"]).unwrap();
        let before: Vec<_> = config.samples().map(|(n, e)| (n.to_string(), e.index)).collect();

        let indices = config.register_file(2, "b.vcf", &["S3", "S1", "S4"]).unwrap();
        assert_eq!(indices, vec![2, 0, 3]);
        for (name, index) in before {
            assert_eq!(config.sample_index(&name), Some(index));
        }
    }

    #[test]
    fn test_register_duplicate_file() {
        let mut config = study();
        config.register_file(1, "a.vcf", &["S1"]).unwrap();
        let err = config.register_file(1, "a.vcf", &["S2"]).unwrap_err();
        assert!(matches!(
            err,
            Error::ConfigError(ConfigError::DuplicateFile { file_id: 1, .. })
        ));
        assert!(config.sample_index("S2").is_none());
    }

    #[test]
    fn test_register_repeated_name_in_input() {
        let mut config = study();
        let indices = config.register_file(1, "a.vcf", &["S1", "S1"]).unwrap();
        assert_eq!(indices, vec![0, 0]);
        assert_eq!(config.file(1).unwrap().samples, vec![0]);
        assert_eq!(config.next_sample_index(), 1);
    }

    #[test]
    fn test_file_samples_are_a_set() {
        let mut config = study();
        let indices = config.register_file(1, "a.vcf", &["S1", "S2", "S1"]).unwrap();
        assert_eq!(indices, vec![0, 1, 0]);
        assert_eq!(config.file(1).unwrap().samples, vec![0, 1]);
        assert_eq!(config.samples_in_file(1).unwrap(), vec!["S1", "S2"]);
    }

    #[test]
    fn test_deprecation_retires_index() {
        let mut config = study();
        config.register_file(1, "a.vcf", &["S1", "S2"]).unwrap();
        assert_eq!(config.deprecate_samples(&["S1"]).unwrap(), 1);
        assert_eq!(config.deprecate_samples(&["S1"]).unwrap(), 0);

        assert!(!config.is_active("S1"));
        assert_eq!(config.sample_index("S1"), Some(0));
        assert_eq!(config.sample_name(0), Some("S1"));
        assert_eq!(config.active_samples(), vec!["S2"]);
        assert!(!config.cohort(DEFAULT_COHORT_ID).unwrap().samples.contains(&0));

        // new samples never reuse the retired index
        let indices = config.register_file(2, "b.vcf", &["S3"]).unwrap();
        assert_eq!(indices, vec![2]);

        // a retired sample cannot be registered again
        let err = config.register_file(3, "c.vcf", &["S1"]).unwrap_err();
        assert!(matches!(err, Error::ConfigError(ConfigError::SampleRetired { .. })));
    }

    #[test]
    fn test_deprecate_unknown_sample() {
        let mut config = study();
        assert!(matches!(
            config.deprecate_samples(&["ghost"]).unwrap_err(),
            Error::ConfigError(ConfigError::UnknownSample { .. })
        ));
    }

    #[test]
    fn test_add_cohort() {
        let mut config = study();
        config.register_file(1, "a.vcf", &["S1", "S2", "S3"]).unwrap();
        let id = config.add_cohort("cases", &["S1", "S3"]).unwrap();
        assert_eq!(id, 1);
        assert_eq!(config.cohort_id("cases"), Some(1));
        assert_eq!(
            config.cohort(1).unwrap().samples,
            [0, 2].into_iter().collect::<BTreeSet<_>>()
        );
        assert_eq!(config.cohort(DEFAULT_COHORT_ID).unwrap().samples.len(), 3);

        assert!(config.add_cohort("cases", &["S2"]).is_err());
        assert!(config.add_cohort("controls", &["S9"]).is_err());
        assert_eq!(config.cohorts().count(), 2);
    }

    #[test]
    fn test_rebuild_index_detects_collisions() {
        let mut config = study();
        config.register_file(1, "a.vcf", &["S1", "S2"]).unwrap();
        assert!(config.rebuild_index().is_ok());
        assert_eq!(config.sample_name(1), Some("S2"));

        config.samples.get_mut("S2").unwrap().index = 0;
        assert!(config.rebuild_index().is_err());

        let mut config = study();
        config.register_file(1, "a.vcf", &["S1"]).unwrap();
        config.next_sample_index = 0;
        assert!(config.rebuild_index().is_err());
    }
}
