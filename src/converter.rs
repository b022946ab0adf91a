use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::{
    codec::{DecodedStats, VariantColumnCodec, VariantStatsCodec},
    config::{ConfigResolver, StudyConfiguration},
    error::{CodecError, EncodeError, Result},
    helper::{ColumnId, ColumnKind, GenomeHelper},
    key::RowKeyCodec,
    options::StorageOptions,
    store::{Row, RowMutation},
    variant::{CellFailure, DecodeWarning, StudyEntry, Variant},
};

/// Converts between stored rows and materialized variants
///
/// Decoding is resilient at the cell level: a column that cannot be decoded
/// is recorded as a [`CellFailure`] on its study, and columns that cannot be
/// attributed at all (foreign family, unreadable qualifier, unknown study,
/// sample or cohort) become [`DecodeWarning`]s. Only a bad row key or a failing
/// configuration lookup aborts the row.
#[derive(Debug, Clone, Default)]
pub struct VariantRowConverter {
    helper: GenomeHelper,
    stats: VariantStatsCodec,
}
impl VariantRowConverter {
    #[must_use]
    pub fn new(options: &StorageOptions) -> Self {
        Self {
            helper: GenomeHelper::new(options),
            stats: VariantStatsCodec::new(options),
        }
    }

    #[must_use]
    pub fn helper(&self) -> &GenomeHelper {
        &self.helper
    }

    /// Materializes a variant from a stored row
    pub fn decode_row<R: ConfigResolver + ?Sized>(&self, row: &Row, resolver: &R) -> Result<Variant> {
        let key = RowKeyCodec::decode(&row.key)?;
        let mut variant = Variant::from_key(key);

        let mut configs: HashMap<u32, Option<Arc<StudyConfiguration>>> = HashMap::new();
        let mut skipped: Vec<(u32, usize)> = Vec::new();

        for cell in &row.cells {
            if cell.family != self.helper.column_family() {
                let warning = DecodeWarning::ForeignFamily {
                    family: cell.family.clone(),
                };
                if !variant.warnings.contains(&warning) {
                    variant.warnings.push(warning);
                }
                continue;
            }

            let column = match GenomeHelper::parse_qualifier(&cell.qualifier) {
                Ok(column) => column,
                Err(reason) => {
                    warn!("Skipping column with unreadable qualifier: {}", reason);
                    variant.warnings.push(DecodeWarning::UnparseableQualifier {
                        qualifier: cell.qualifier.clone(),
                        reason,
                    });
                    continue;
                }
            };

            let config = match configs.get(&column.study_id) {
                Some(config) => config.clone(),
                None => {
                    let config = match resolver.resolve(column.study_id) {
                        Ok(config) => Some(config),
                        Err(err) if err.is_not_found() => None,
                        Err(err) => return Err(err),
                    };
                    configs.insert(column.study_id, config.clone());
                    config
                }
            };
            let Some(config) = config else {
                match skipped.iter_mut().find(|(id, _)| *id == column.study_id) {
                    Some((_, count)) => *count += 1,
                    None => skipped.push((column.study_id, 1)),
                }
                continue;
            };

            self.decode_cell(&mut variant, &config, column, &cell.value);
        }

        for (study_id, columns) in skipped {
            warn!(
                "Skipped {} columns of unknown study {} at {}:{}",
                columns, study_id, variant.chromosome, variant.position
            );
            variant
                .warnings
                .push(DecodeWarning::UnknownStudy { study_id, columns });
        }
        Ok(variant)
    }

    fn decode_cell(
        &self,
        variant: &mut Variant,
        config: &StudyConfiguration,
        column: ColumnId,
        value: &[u8],
    ) {
        let study_id = column.study_id;
        match column.kind {
            ColumnKind::Genotype => {
                let Some(sample) = config.sample_name(column.column_index) else {
                    variant.warnings.push(DecodeWarning::UnknownSampleIndex {
                        study_id,
                        column_index: column.column_index,
                    });
                    return;
                };
                match VariantColumnCodec::decode_genotype(value) {
                    Ok(call) => variant.set_genotype(study_id, sample, call),
                    Err(reason) => {
                        warn!("Sample {} of study {}: {}", sample, study_id, reason);
                        record_failure(variant.study_mut(study_id), column, reason);
                    }
                }
            }
            ColumnKind::FileMeta => match VariantColumnCodec::decode_file_meta(value) {
                Ok(meta) => variant.set_file_meta(study_id, column.column_index, meta),
                Err(reason) => {
                    warn!("File {} of study {}: {}", column.column_index, study_id, reason);
                    record_failure(variant.study_mut(study_id), column, reason);
                }
            },
            ColumnKind::Stats => {
                let Some(cohort) = config.cohort_name(column.column_index) else {
                    variant.warnings.push(DecodeWarning::UnknownCohort {
                        study_id,
                        cohort_id: column.column_index,
                    });
                    return;
                };
                match self.stats.decode_stats(Some(value)) {
                    DecodedStats::Present(stats) => variant.set_stats(study_id, cohort, stats),
                    DecodedStats::Malformed(reason) => {
                        record_failure(variant.study_mut(study_id), column, reason);
                    }
                    DecodedStats::Absent => {}
                }
            }
        }
    }

    /// Builds the mutation writing a variant's payload for the target studies
    ///
    /// Payload of studies outside `studies` is left out, as are the decode
    /// failures carried by the variant. Every sample, file and cohort must be
    /// registered in its study beforehand.
    pub fn encode_row(&self, variant: &Variant, studies: &[&StudyConfiguration]) -> Result<RowMutation> {
        let mut mutation = RowMutation::new(variant.row_key()?);
        for config in studies {
            if let Some(entry) = variant.study(config.study_id()) {
                self.encode_study(entry, config, &mut mutation)?;
            }
        }
        Ok(mutation)
    }

    /// Builds the mutation for every study the variant carries, resolving each
    pub fn encode_row_with<R: ConfigResolver + ?Sized>(
        &self,
        variant: &Variant,
        resolver: &R,
    ) -> Result<RowMutation> {
        let mut mutation = RowMutation::new(variant.row_key()?);
        for entry in variant.studies.values() {
            let config = resolver.resolve(entry.study_id)?;
            self.encode_study(entry, &config, &mut mutation)?;
        }
        Ok(mutation)
    }

    fn encode_study(
        &self,
        entry: &StudyEntry,
        config: &StudyConfiguration,
        mutation: &mut RowMutation,
    ) -> Result<()> {
        let study_id = config.study_id();
        let family = self.helper.column_family();

        for (sample, call) in &entry.genotypes {
            let registered = config.sample(sample).ok_or_else(|| EncodeError::UnregisteredSample {
                study_id,
                sample: sample.clone(),
            })?;
            if !registered.active {
                return Err(EncodeError::DeprecatedSample {
                    study_id,
                    sample: sample.clone(),
                }
                .into());
            }
            mutation.put(
                family,
                &GenomeHelper::qualifier_for(study_id, registered.index, ColumnKind::Genotype),
                VariantColumnCodec::encode_genotype(call)?,
            );
        }

        for (file_id, meta) in &entry.files {
            if config.file(*file_id).is_none() {
                return Err(EncodeError::UnregisteredFile {
                    study_id,
                    file_id: *file_id,
                }
                .into());
            }
            mutation.put(
                family,
                &GenomeHelper::qualifier_for(study_id, *file_id, ColumnKind::FileMeta),
                VariantColumnCodec::encode_file_meta(meta)?,
            );
        }

        for (cohort, stats) in &entry.stats {
            let cohort_id = config
                .cohort_id(cohort)
                .ok_or_else(|| EncodeError::UnregisteredCohort {
                    study_id,
                    cohort: cohort.clone(),
                })?;
            mutation.put(
                family,
                &GenomeHelper::qualifier_for(study_id, cohort_id, ColumnKind::Stats),
                self.stats.encode_stats(stats)?,
            );
        }
        Ok(())
    }
}

fn record_failure(entry: &mut StudyEntry, column: ColumnId, reason: CodecError) {
    entry.failures.push(CellFailure { column, reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{DEFAULT_COHORT, StaticResolver},
        error::Error,
        store::Cell,
        variant::{FileMeta, GenotypeCall, StatValue, VariantStats},
    };

    fn study_one() -> StudyConfiguration {
        let mut config = StudyConfiguration::new(1, "one");
        config.register_file(7, "one.vcf", &["S1", "S2", "S3"]).unwrap();
        config
    }

    fn call(text: &str) -> GenotypeCall {
        text.parse().unwrap()
    }

    fn row_of(mutation: RowMutation) -> Row {
        Row::new(mutation.key, mutation.cells)
    }

    fn genotype_cell(study_id: u32, index: u32, value: Vec<u8>) -> Cell {
        Cell::new(
            GenomeHelper::default().column_family(),
            &GenomeHelper::qualifier_for(study_id, index, ColumnKind::Genotype),
            value,
        )
    }

    #[test]
    fn test_single_sample_round_trip() {
        let mut config = StudyConfiguration::new(1, "one");
        config.register_file(1, "s1.vcf", &["S1"]).unwrap();
        assert_eq!(config.sample_index("S1"), Some(0));

        let mut variant = Variant::new("1", 1000, "A", &["T"]).unwrap();
        variant.set_genotype(1, "S1", "0/1".parse().unwrap());

        let converter = VariantRowConverter::default();
        let mutation = converter.encode_row(&variant, &[&config]).unwrap();
        assert_eq!(mutation.len(), 1);

        let resolver = StaticResolver::new().with(config);
        let decoded = converter.decode_row(&row_of(mutation), &resolver).unwrap();
        assert_eq!(decoded.chromosome, "1");
        assert_eq!(decoded.position, 1000);
        assert_eq!(decoded.reference, "A");
        assert_eq!(decoded.alternates, vec!["T".to_string()]);
        assert_eq!(decoded.genotype(1, "S1").unwrap().genotype.to_string(), "0/1");
        assert!(decoded.warnings.is_empty());
        assert_eq!(decoded, variant);
    }

    #[test]
    fn test_stats_only_row() {
        let config = StudyConfiguration::new(2, "two");
        let mut variant = Variant::new("chr2", 500, "G", &["C"]).unwrap();
        variant.set_stats(
            2,
            DEFAULT_COHORT,
            VariantStats::new().with("maf", StatValue::Number(0.25)),
        );

        let converter = VariantRowConverter::default();
        let mutation = converter.encode_row(&variant, &[&config]).unwrap();
        let resolver = StaticResolver::new().with(config);
        let decoded = converter.decode_row(&row_of(mutation), &resolver).unwrap();

        let entry = decoded.study(2).unwrap();
        assert!(entry.genotypes.is_empty());
        assert_eq!(entry.stats.len(), 1);
        assert_eq!(
            decoded.stats(2, DEFAULT_COHORT).unwrap().get("maf"),
            Some(&StatValue::Number(0.25))
        );
    }

    #[test]
    fn test_corrupt_genotype_is_isolated() {
        let config = study_one();
        let mut variant = Variant::new("3", 42, "T", &["A"]).unwrap();
        for sample in ["S1", "S2", "S3"] {
            variant.set_genotype(1, sample, call("0/1"));
        }
        let converter = VariantRowConverter::default();
        let mut mutation = converter.encode_row(&variant, &[&config]).unwrap();
        for cell in &mut mutation.cells {
            if GenomeHelper::parse_qualifier(&cell.qualifier).unwrap().column_index == 1 {
                cell.value = vec![0xFF];
            }
        }

        let resolver = StaticResolver::new().with(config);
        let decoded = converter.decode_row(&row_of(mutation), &resolver).unwrap();
        let entry = decoded.study(1).unwrap();
        assert_eq!(entry.genotypes.len(), 2);
        assert!(entry.genotypes.contains_key("S1"));
        assert!(entry.genotypes.contains_key("S3"));
        assert_eq!(entry.failures.len(), 1);
        assert_eq!(entry.failures[0].column.column_index, 1);
        assert!(matches!(entry.failures[0].reason, CodecError::CorruptGenotype(_)));
    }

    #[test]
    fn test_unknown_study_is_skipped() {
        let config = study_one();
        let mut variant = Variant::new("1", 10, "C", &["G"]).unwrap();
        variant.set_genotype(1, "S1", call("1/1"));
        let converter = VariantRowConverter::default();
        let mut row = row_of(converter.encode_row(&variant, &[&config]).unwrap());
        row.cells.push(genotype_cell(99, 0, vec![0x11]));
        row.cells.push(genotype_cell(99, 1, vec![0x11]));

        let resolver = StaticResolver::new().with(config);
        let decoded = converter.decode_row(&row, &resolver).unwrap();
        assert_eq!(decoded.study(1).unwrap().genotypes.len(), 1);
        assert!(decoded.study(99).is_none());
        assert_eq!(
            decoded.warnings,
            vec![DecodeWarning::UnknownStudy {
                study_id: 99,
                columns: 2
            }]
        );
    }

    #[test]
    fn test_unattributable_columns_become_warnings() {
        let config = study_one();
        let key = Variant::new("X", 77, "A", &["AT"]).unwrap().row_key().unwrap();
        let family = GenomeHelper::default().column_family().to_vec();
        let row = Row::new(
            key,
            vec![
                Cell::new(b"other", b"anything", vec![1]),
                Cell::new(&family, b"short", vec![1]),
                genotype_cell(1, 40, vec![0x11]),
                Cell::new(
                    &family,
                    &GenomeHelper::qualifier_for(1, 5, ColumnKind::Stats),
                    vec![0, 0, 0],
                ),
            ],
        );

        let resolver = StaticResolver::new().with(config);
        let decoded = VariantRowConverter::default().decode_row(&row, &resolver).unwrap();
        assert_eq!(decoded.chromosome, "X");
        assert!(decoded.studies.is_empty());
        assert_eq!(decoded.warnings.len(), 4);
        assert!(matches!(decoded.warnings[0], DecodeWarning::ForeignFamily { .. }));
        assert!(matches!(decoded.warnings[1], DecodeWarning::UnparseableQualifier { .. }));
        assert_eq!(
            decoded.warnings[2],
            DecodeWarning::UnknownSampleIndex {
                study_id: 1,
                column_index: 40
            }
        );
        assert_eq!(
            decoded.warnings[3],
            DecodeWarning::UnknownCohort {
                study_id: 1,
                cohort_id: 5
            }
        );
    }

    #[test]
    fn test_corrupt_row_key_aborts() {
        let row = Row::new(b"zz_garbage".to_vec(), Vec::new());
        let err = VariantRowConverter::default()
            .decode_row(&row, &StaticResolver::new())
            .unwrap_err();
        assert!(matches!(err, Error::KeyError(_)));
    }

    #[test]
    fn test_malformed_stats_and_file_meta_are_recorded() {
        let config = study_one();
        let key = Variant::new("1", 5, "A", &["G"]).unwrap().row_key().unwrap();
        let family = GenomeHelper::default().column_family().to_vec();
        let row = Row::new(
            key,
            vec![
                Cell::new(
                    &family,
                    &GenomeHelper::qualifier_for(1, 7, ColumnKind::FileMeta),
                    vec![9],
                ),
                Cell::new(
                    &family,
                    &GenomeHelper::qualifier_for(1, 0, ColumnKind::Stats),
                    vec![1, 2],
                ),
            ],
        );
        let resolver = StaticResolver::new().with(config);
        let decoded = VariantRowConverter::default().decode_row(&row, &resolver).unwrap();
        let entry = decoded.study(1).unwrap();
        assert!(entry.files.is_empty());
        assert!(entry.stats.is_empty());
        assert_eq!(decoded.failure_count(), 2);
    }

    #[test]
    fn test_full_payload_round_trip() {
        let mut config = study_one();
        config.add_cohort("cases", &["S1", "S2"]).unwrap();

        let mut variant = Variant::new("MT", 16_519, "T", &["C", "TA"]).unwrap();
        variant.set_genotype(1, "S1", call("0|2"));
        variant.set_genotype(
            1,
            "S2",
            call("1/1").with_quality(60).with_depth(31),
        );
        let mut meta = FileMeta {
            quality: Some(512.5),
            filter: Some("PASS".into()),
            ..FileMeta::default()
        };
        meta.info.insert("DP".into(), "88".into());
        variant.set_file_meta(1, 7, meta);
        variant.set_stats(1, "cases", VariantStats::new().with("ac", StatValue::Integer(3)));

        let converter = VariantRowConverter::default();
        let mutation = converter.encode_row(&variant, &[&config]).unwrap();
        assert_eq!(mutation.len(), 4);
        let decoded = converter
            .decode_row(&row_of(mutation), &StaticResolver::new().with(config))
            .unwrap();
        assert_eq!(decoded, variant);
    }

    #[test]
    fn test_encode_requires_registration() {
        let mut config = study_one();
        let converter = VariantRowConverter::default();

        let mut variant = Variant::new("1", 1, "A", &["T"]).unwrap();
        variant.set_genotype(1, "ghost", call("0/1"));
        assert!(matches!(
            converter.encode_row(&variant, &[&config]).unwrap_err(),
            Error::EncodeError(EncodeError::UnregisteredSample { .. })
        ));

        config.deprecate_samples(&["S1"]).unwrap();
        let mut variant = Variant::new("1", 1, "A", &["T"]).unwrap();
        variant.set_genotype(1, "S1", call("0/1"));
        assert!(matches!(
            converter.encode_row(&variant, &[&config]).unwrap_err(),
            Error::EncodeError(EncodeError::DeprecatedSample { .. })
        ));

        let mut variant = Variant::new("1", 1, "A", &["T"]).unwrap();
        variant.set_file_meta(1, 99, FileMeta::default());
        assert!(matches!(
            converter.encode_row(&variant, &[&config]).unwrap_err(),
            Error::EncodeError(EncodeError::UnregisteredFile { file_id: 99, .. })
        ));

        let mut variant = Variant::new("1", 1, "A", &["T"]).unwrap();
        variant.set_stats(1, "controls", VariantStats::new());
        assert!(matches!(
            converter.encode_row(&variant, &[&config]).unwrap_err(),
            Error::EncodeError(EncodeError::UnregisteredCohort { .. })
        ));
    }

    #[test]
    fn test_encode_with_resolver() {
        let converter = VariantRowConverter::default();
        let mut variant = Variant::new("1", 1, "A", &["T"]).unwrap();
        variant.set_genotype(1, "S2", call("0/0"));

        let resolver = StaticResolver::new().with(study_one());
        let mutation = converter.encode_row_with(&variant, &resolver).unwrap();
        assert_eq!(mutation.len(), 1);

        variant.set_genotype(5, "S1", call("0/0"));
        assert!(converter.encode_row_with(&variant, &resolver).unwrap_err().is_not_found());

        // untargeted studies are left out
        let mutation = converter.encode_row(&variant, &[&study_one()]).unwrap();
        assert_eq!(mutation.len(), 1);
    }
}
