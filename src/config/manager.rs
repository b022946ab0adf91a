use std::collections::HashMap;
use std::sync::Arc;

use auto_impl::auto_impl;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::{
    StudyConfiguration,
    blob::{decode_configuration, encode_configuration},
    store::ConfigStore,
};
use crate::{
    error::{ConfigError, Result},
    options::StorageOptions,
    policy::RetryPolicy,
};

/// Source of study configurations for row decoding
///
/// Decoders call `begin_batch` before each batch of rows. Implementations that
/// cache configurations use it as the point to pick up concurrent changes, so a
/// whole batch decodes against one consistent view.
#[auto_impl(&, Arc, Box)]
pub trait ConfigResolver: Send + Sync {
    /// Returns the configuration of a study
    ///
    /// Fails with `StudyNotFound` when the study has never been stored.
    fn resolve(&self, study_id: u32) -> Result<Arc<StudyConfiguration>>;

    /// Called once before every batch of rows
    fn begin_batch(&self) -> Result<()> {
        Ok(())
    }
}

/// A fixed set of configurations, never refreshed
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    configs: HashMap<u32, Arc<StudyConfiguration>>,
}
impl StaticResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, config: StudyConfiguration) -> Self {
        self.insert(config);
        self
    }

    pub fn insert(&mut self, config: StudyConfiguration) {
        self.configs.insert(config.study_id(), Arc::new(config));
    }
}
impl ConfigResolver for StaticResolver {
    fn resolve(&self, study_id: u32) -> Result<Arc<StudyConfiguration>> {
        self.configs
            .get(&study_id)
            .cloned()
            .ok_or_else(|| ConfigError::StudyNotFound(study_id).into())
    }
}

/// Loads, caches and mutates study configurations
///
/// Every mutation reads the current configuration, applies the change to a
/// copy and writes it back with a compare-and-swap on the version it read. A
/// writer that loses the race gets a `ConfigurationConflict` and its cached copy
/// is dropped, so the next attempt starts from the winner's configuration.
///
/// Readers are served from the cache; `revalidate` and `begin_batch` compare
/// cached versions against the store and reload what changed.
pub struct StudyConfigurationManager<S: ConfigStore> {
    store: S,
    cache: RwLock<HashMap<u32, Arc<StudyConfiguration>>>,
    compression_level: i32,
}
impl<S: ConfigStore> StudyConfigurationManager<S> {
    pub fn new(store: S, options: &StorageOptions) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            compression_level: options.config_compression_level,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Stores an empty configuration for a new study
    pub fn create_study(&self, study_id: u32, name: &str) -> Result<Arc<StudyConfiguration>> {
        let mut config = StudyConfiguration::new(study_id, name);
        let blob = encode_configuration(&config, 1, self.compression_level)?;
        if !self.store.put_if_version(study_id, 0, blob)? {
            return Err(ConfigError::StudyAlreadyExists(study_id).into());
        }
        config.version = 1;
        let config = Arc::new(config);
        self.cache.write().insert(study_id, Arc::clone(&config));
        info!("Created study {} ({})", study_id, name);
        Ok(config)
    }

    /// Returns the configuration of a study, from the cache when possible
    pub fn resolve(&self, study_id: u32) -> Result<Arc<StudyConfiguration>> {
        if let Some(config) = self.cache.read().get(&study_id) {
            debug!("Configuration cache hit for study {}", study_id);
            return Ok(Arc::clone(config));
        }
        debug!("Configuration cache miss for study {}", study_id);
        self.load(study_id)
    }

    fn load(&self, study_id: u32) -> Result<Arc<StudyConfiguration>> {
        let blob = self
            .store
            .get(study_id)?
            .ok_or(ConfigError::StudyNotFound(study_id))?;
        let loaded = Arc::new(decode_configuration(study_id, blob.version, &blob.data)?);

        // a concurrent update may have cached a newer copy meanwhile
        let mut cache = self.cache.write();
        match cache.get(&study_id) {
            Some(cached) if cached.version() >= loaded.version() => Ok(Arc::clone(cached)),
            _ => {
                cache.insert(study_id, Arc::clone(&loaded));
                Ok(loaded)
            }
        }
    }

    /// Drops the cached copy of a study
    pub fn invalidate(&self, study_id: u32) {
        self.cache.write().remove(&study_id);
    }

    /// Reloads a cached study if the stored version moved on
    ///
    /// # Returns
    ///
    /// `true` if the cached copy was stale.
    pub fn revalidate(&self, study_id: u32) -> Result<bool> {
        let Some(cached) = self.cache.read().get(&study_id).map(|c| c.version()) else {
            return Ok(false);
        };
        match self.store.version(study_id)? {
            Some(current) if current == cached => Ok(false),
            Some(current) => {
                debug!(
                    "Study {} moved from version {} to {}",
                    study_id, cached, current
                );
                self.invalidate(study_id);
                self.load(study_id)?;
                Ok(true)
            }
            None => {
                warn!("Study {} disappeared from the configuration store", study_id);
                self.invalidate(study_id);
                Ok(true)
            }
        }
    }

    /// Revalidates every cached study
    ///
    /// # Returns
    ///
    /// The number of stale studies that were reloaded or dropped.
    pub fn revalidate_all(&self) -> Result<usize> {
        let cached: Vec<u32> = self.cache.read().keys().copied().collect();
        let mut stale = 0;
        for study_id in cached {
            if self.revalidate(study_id)? {
                stale += 1;
            }
        }
        Ok(stale)
    }

    /// Applies one mutation under a compare-and-swap of the stored version
    fn update<T, F>(&self, study_id: u32, mutate: F) -> Result<(Arc<StudyConfiguration>, T)>
    where
        F: FnOnce(&mut StudyConfiguration) -> Result<T>,
    {
        let current = self.resolve(study_id)?;
        let expected = current.version();
        let mut next = (*current).clone();
        let output = mutate(&mut next)?;

        let blob = encode_configuration(&next, expected + 1, self.compression_level)?;
        if !self.store.put_if_version(study_id, expected, blob)? {
            let found = self.store.version(study_id)?;
            self.invalidate(study_id);
            return Err(ConfigError::ConfigurationConflict {
                study_id,
                expected,
                found,
            }
            .into());
        }

        next.version = expected + 1;
        let next = Arc::new(next);
        self.cache.write().insert(study_id, Arc::clone(&next));
        Ok((next, output))
    }

    /// Repeats `update` while it conflicts, backing off between attempts
    fn update_with_retry<T, F>(
        &self,
        study_id: u32,
        policy: &RetryPolicy,
        mut mutate: F,
    ) -> Result<(Arc<StudyConfiguration>, T)>
    where
        F: FnMut(&mut StudyConfiguration) -> Result<T>,
    {
        let mut rng = policy.rng();
        for attempt in 0..policy.max_attempts {
            match self.update(study_id, &mut mutate) {
                Err(err) if err.is_conflict() => {
                    let delay = policy.delay(attempt, &mut rng);
                    debug!(
                        "Attempt {} on study {} conflicted, retrying in {:?}",
                        attempt + 1,
                        study_id,
                        delay
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                outcome => return outcome,
            }
        }
        Err(ConfigError::RetriesExhausted {
            study_id,
            attempts: policy.max_attempts,
        }
        .into())
    }

    /// Registers a file and its samples, assigning indices to new samples
    ///
    /// A single attempt: a concurrent writer makes this fail with
    /// `ConfigurationConflict`, after which the caller may simply call again.
    ///
    /// # Returns
    ///
    /// The updated configuration and the column index of every input sample.
    pub fn add_samples(
        &self,
        study_id: u32,
        file_id: u32,
        file_name: &str,
        samples: &[&str],
    ) -> Result<(Arc<StudyConfiguration>, Vec<u32>)> {
        let (config, indices) = self.update(study_id, |config| {
            config.register_file(file_id, file_name, samples)
        })?;
        info!(
            "Registered file {} with {} samples in study {} (version {})",
            file_id,
            samples.len(),
            study_id,
            config.version()
        );
        Ok((config, indices))
    }

    /// `add_samples`, retried on conflict according to `policy`
    pub fn add_samples_with_retry(
        &self,
        study_id: u32,
        file_id: u32,
        file_name: &str,
        samples: &[&str],
        policy: &RetryPolicy,
    ) -> Result<(Arc<StudyConfiguration>, Vec<u32>)> {
        let (config, indices) = self.update_with_retry(study_id, policy, |config| {
            config.register_file(file_id, file_name, samples)
        })?;
        info!(
            "Registered file {} with {} samples in study {} (version {})",
            file_id,
            samples.len(),
            study_id,
            config.version()
        );
        Ok((config, indices))
    }

    /// Retires samples; their indices are never handed out again
    pub fn deprecate_samples(
        &self,
        study_id: u32,
        samples: &[&str],
        policy: &RetryPolicy,
    ) -> Result<Arc<StudyConfiguration>> {
        let (config, count) = self.update_with_retry(study_id, policy, |config| {
            config.deprecate_samples(samples)
        })?;
        info!("Deprecated {} samples in study {}", count, study_id);
        Ok(config)
    }

    /// Defines a cohort over registered samples
    pub fn add_cohort(
        &self,
        study_id: u32,
        name: &str,
        samples: &[&str],
        policy: &RetryPolicy,
    ) -> Result<(Arc<StudyConfiguration>, u32)> {
        let (config, cohort_id) =
            self.update_with_retry(study_id, policy, |config| config.add_cohort(name, samples))?;
        info!(
            "Created cohort {} ({}) with {} samples in study {}",
            name,
            cohort_id,
            samples.len(),
            study_id
        );
        Ok((config, cohort_id))
    }

    /// Ids of every stored study
    pub fn list_studies(&self) -> Result<Vec<u32>> {
        self.store.list()
    }
}
impl<S: ConfigStore> ConfigResolver for StudyConfigurationManager<S> {
    fn resolve(&self, study_id: u32) -> Result<Arc<StudyConfiguration>> {
        StudyConfigurationManager::resolve(self, study_id)
    }

    fn begin_batch(&self) -> Result<()> {
        let stale = self.revalidate_all()?;
        if stale > 0 {
            debug!("Reloaded {} stale configurations before batch", stale);
        }
        Ok(())
    }
}

#[cfg(test)]
mod testing {
    use std::collections::HashSet;
    use std::thread;

    use super::*;
    use crate::{
        config::{DEFAULT_COHORT_ID, InMemoryConfigStore, VersionedBlob},
        error::Error,
    };

    fn manager(store: Arc<InMemoryConfigStore>) -> StudyConfigurationManager<Arc<InMemoryConfigStore>> {
        StudyConfigurationManager::new(store, &StorageOptions::default())
    }

    #[test]
    fn test_create_and_resolve() {
        let store = Arc::new(InMemoryConfigStore::new());
        let writer = manager(Arc::clone(&store));
        let created = writer.create_study(1, "pilot").unwrap();
        assert_eq!(created.version(), 1);

        // a second manager loads from the store
        let reader = manager(store);
        let loaded = reader.resolve(1).unwrap();
        assert_eq!(loaded.name(), "pilot");
        assert_eq!(loaded.version(), 1);
        assert_eq!(loaded.cohort_name(DEFAULT_COHORT_ID), Some("ALL"));
        assert_eq!(reader.list_studies().unwrap(), vec![1]);
    }

    #[test]
    fn test_create_twice() {
        let manager = manager(Arc::new(InMemoryConfigStore::new()));
        manager.create_study(1, "pilot").unwrap();
        assert!(matches!(
            manager.create_study(1, "pilot").unwrap_err(),
            Error::ConfigError(ConfigError::StudyAlreadyExists(1))
        ));
    }

    #[test]
    fn test_resolve_unknown_study() {
        let manager = manager(Arc::new(InMemoryConfigStore::new()));
        assert!(manager.resolve(9).unwrap_err().is_not_found());
    }

    #[test]
    fn test_add_samples_bumps_version() {
        let manager = manager(Arc::new(InMemoryConfigStore::new()));
        manager.create_study(1, "pilot").unwrap();
        let (config, indices) = manager.add_samples(1, 10, "a.vcf", &["S1", "S2"]).unwrap();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(config.version(), 2);
        assert_eq!(config.file(10).unwrap().batch, 2);
        assert_eq!(manager.store().version(1).unwrap(), Some(2));
    }

    /// Serves one queued blob from `get`, as if the read raced a writer
    struct LaggingStore {
        inner: Arc<InMemoryConfigStore>,
        queued: parking_lot::Mutex<Option<VersionedBlob>>,
    }
    impl ConfigStore for LaggingStore {
        fn get(&self, study_id: u32) -> Result<Option<VersionedBlob>> {
            match self.queued.lock().take() {
                Some(blob) => Ok(Some(blob)),
                None => self.inner.get(study_id),
            }
        }

        fn version(&self, study_id: u32) -> Result<Option<u64>> {
            self.inner.version(study_id)
        }

        fn put_if_version(&self, study_id: u32, expected: u64, data: Vec<u8>) -> Result<bool> {
            self.inner.put_if_version(study_id, expected, data)
        }

        fn list(&self) -> Result<Vec<u32>> {
            self.inner.list()
        }
    }

    #[test]
    fn test_slow_load_keeps_newer_cached_copy() {
        let inner = Arc::new(InMemoryConfigStore::new());
        let manager = StudyConfigurationManager::new(
            LaggingStore {
                inner: Arc::clone(&inner),
                queued: parking_lot::Mutex::new(None),
            },
            &StorageOptions::default(),
        );
        manager.create_study(1, "pilot").unwrap();
        let old_blob = inner.get(1).unwrap().unwrap();
        manager.add_samples(1, 1, "a.vcf", &["S1"]).unwrap();

        *manager.store().queued.lock() = Some(old_blob);
        let loaded = manager.load(1).unwrap();
        assert_eq!(loaded.version(), 2);
        assert_eq!(manager.resolve(1).unwrap().version(), 2);
        assert_eq!(manager.resolve(1).unwrap().sample_index("S1"), Some(0));
    }

    #[test]
    fn test_stale_writer_conflicts() {
        let store = Arc::new(InMemoryConfigStore::new());
        let a = manager(Arc::clone(&store));
        let b = manager(Arc::clone(&store));
        a.create_study(1, "pilot").unwrap();
        b.resolve(1).unwrap();

        a.add_samples(1, 1, "a.vcf", &["S1"]).unwrap();
        let err = b.add_samples(1, 2, "b.vcf", &["S2"]).unwrap_err();
        assert!(err.is_conflict());
        assert!(matches!(
            err,
            Error::ConfigError(ConfigError::ConfigurationConflict {
                expected: 1,
                found: Some(2),
                ..
            })
        ));

        // the conflict dropped the stale copy, so a plain retry succeeds
        let (config, indices) = b.add_samples(1, 2, "b.vcf", &["S2"]).unwrap();
        assert_eq!(indices, vec![1]);
        assert_eq!(config.sample_index("S1"), Some(0));
    }

    #[test]
    fn test_retry_recovers_from_conflict() {
        let store = Arc::new(InMemoryConfigStore::new());
        let a = manager(Arc::clone(&store));
        let b = manager(Arc::clone(&store));
        a.create_study(1, "pilot").unwrap();
        b.resolve(1).unwrap();
        a.add_samples(1, 1, "a.vcf", &["S1"]).unwrap();

        let (_, indices) = b
            .add_samples_with_retry(1, 2, "b.vcf", &["S2"], &RetryPolicy::immediate(3))
            .unwrap();
        assert_eq!(indices, vec![1]);
    }

    #[test]
    fn test_duplicate_file_is_not_retried() {
        let manager = manager(Arc::new(InMemoryConfigStore::new()));
        manager.create_study(1, "pilot").unwrap();
        manager.add_samples(1, 1, "a.vcf", &["S1"]).unwrap();
        let err = manager
            .add_samples_with_retry(1, 1, "a.vcf", &["S1"], &RetryPolicy::immediate(3))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ConfigError(ConfigError::DuplicateFile { .. })
        ));
        assert_eq!(manager.store().version(1).unwrap(), Some(2));
    }

    #[test]
    fn test_revalidate_picks_up_changes() {
        let store = Arc::new(InMemoryConfigStore::new());
        let writer = manager(Arc::clone(&store));
        let reader = manager(Arc::clone(&store));
        writer.create_study(1, "pilot").unwrap();
        assert!(reader.resolve(1).unwrap().sample_index("S1").is_none());

        writer.add_samples(1, 1, "a.vcf", &["S1"]).unwrap();
        // cached copy is still served until revalidation
        assert!(reader.resolve(1).unwrap().sample_index("S1").is_none());
        assert!(!reader.revalidate(2).unwrap());

        ConfigResolver::begin_batch(&reader).unwrap();
        assert_eq!(reader.resolve(1).unwrap().sample_index("S1"), Some(0));
        assert_eq!(reader.revalidate_all().unwrap(), 0);
    }

    #[test]
    fn test_deprecate_and_cohort() {
        let manager = manager(Arc::new(InMemoryConfigStore::new()));
        let policy = RetryPolicy::immediate(2);
        manager.create_study(1, "pilot").unwrap();
        manager.add_samples(1, 1, "a.vcf", &["S1", "S2", "S3"]).unwrap();

        let (config, cohort) = manager.add_cohort(1, "cases", &["S1", "S2"], &policy).unwrap();
        assert_eq!(cohort, 1);
        assert_eq!(config.cohort_id("cases"), Some(1));

        let config = manager.deprecate_samples(1, &["S2"], &policy).unwrap();
        assert!(!config.is_active("S2"));
        assert_eq!(config.version(), 4);
        assert_eq!(config.active_samples(), vec!["S1", "S3"]);
    }

    #[test]
    fn test_concurrent_add_samples_assigns_unique_indices() {
        const WRITERS: usize = 4;
        const SAMPLES_PER_WRITER: usize = 5;

        let store = Arc::new(InMemoryConfigStore::new());
        manager(Arc::clone(&store)).create_study(1, "pilot").unwrap();

        let handles: Vec<_> = (0..WRITERS)
            .map(|w| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let manager = manager(store);
                    let names: Vec<String> = (0..SAMPLES_PER_WRITER)
                        .map(|s| format!("W{w}_S{s}"))
                        .collect();
                    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
                    let policy = RetryPolicy::new(
                        64,
                        std::time::Duration::from_micros(50),
                        std::time::Duration::from_millis(2),
                    );
                    manager
                        .add_samples_with_retry(1, w as u32, "part.vcf", &refs, &policy)
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let config = manager(store).resolve(1).unwrap();
        assert_eq!(config.sample_count(), WRITERS * SAMPLES_PER_WRITER);
        let indices: HashSet<u32> = config.samples().map(|(_, e)| e.index).collect();
        assert_eq!(indices.len(), WRITERS * SAMPLES_PER_WRITER);
        assert!(indices.iter().all(|i| (*i as usize) < WRITERS * SAMPLES_PER_WRITER));
        assert_eq!(config.version(), 1 + WRITERS as u64);
    }

    #[test]
    fn test_static_resolver() {
        let resolver = StaticResolver::new().with(StudyConfiguration::new(3, "fixed"));
        assert_eq!(resolver.resolve(3).unwrap().name(), "fixed");
        assert!(resolver.resolve(4).unwrap_err().is_not_found());
        assert!(resolver.begin_batch().is_ok());
    }
}
