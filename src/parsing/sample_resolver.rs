/*!
# Sample resolver
Turns raw run entries into [`RunEntry`] values with a fixed input kind and fully determined sample names.
Errors here only invalidate the entry they occur in; duplicate entries are a configuration error because they would collide on disk.
*/
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::data_types::sample::{AlignmentFormat, InputKind, ReadGroup, RunEntry, SampleRole, SampleUnit, DEFAULT_PLATFORM};
use crate::parsing::run_config::{ConfigError, RawReadGroup, RawRunEntry, RawSample};

lazy_static! {
    /// Known sequence file suffixes, longest first
    static ref SEQUENCE_SUFFIX: Regex = Regex::new(r"(?i)\.(fastq\.gz|fq\.gz|fastq|fq|cram|bam)$").unwrap();
    /// Trailing read-pair tags such as `_R1`, `.R2_001`, or `_1`
    static ref READ_PAIR_TAG: Regex = Regex::new(r"[._]R?[12](_\d{3})?$").unwrap();
}

#[derive(thiserror::Error, Debug, Eq, PartialEq)]
pub enum SampleInputError {
    #[error("{role}: both fq and cram are set, exactly one is allowed")]
    AmbiguousInput { role: SampleRole },
    #[error("{role}: neither fq nor cram is set")]
    MissingInput { role: SampleRole },
    #[error("{role}: fq must list exactly 2 files (read 1, read 2), found {count}")]
    FastqCount { role: SampleRole, count: usize },
    #[error("{role}: unsupported alignment file extension {path:?}, expected .cram or .bam")]
    UnsupportedAlignment { role: SampleRole, path: PathBuf },
    #[error("{role}: read_group is missing {missing:?}, all of ID, PU, SM, PL, LB are required together")]
    PartialReadGroup { role: SampleRole, missing: Vec<&'static str> },
    #[error("{role}: could not derive a sample name from {path:?}")]
    UnnamedSample { role: SampleRole, path: PathBuf },
    #[error("entry has neither a tumor nor a normal sample")]
    EmptyEntry,
    #[error("tumor and normal both resolve to sample name {name:?}, set sample_name to tell them apart")]
    SameSampleName { name: String }
}

/// The outcome of resolving every entry in a run
#[derive(Debug, Default)]
pub struct ResolvedRuns {
    /// Entries that resolved cleanly
    pub entries: Vec<RunEntry>,
    /// Entries that failed, by configuration index
    pub failures: Vec<(usize, SampleInputError)>
}

/// Resolves all configured run entries.
/// Entries with invalid samples are reported in `failures` and do not stop the others.
/// # Arguments
/// * `raw_runs` - the run entries from the configuration
/// # Errors
/// * if two resolved entries share the same identity key
pub fn resolve_run_entries(raw_runs: &[RawRunEntry]) -> Result<ResolvedRuns, ConfigError> {
    let mut resolved = ResolvedRuns::default();
    let mut seen: BTreeMap<String, usize> = Default::default();
    for (index, raw_entry) in raw_runs.iter().enumerate() {
        match resolve_run_entry(index, raw_entry) {
            Ok(entry) => {
                let entry_id = entry.entry_id();
                if let Some(first) = seen.insert(entry_id.clone(), index) {
                    return Err(ConfigError::DuplicateRunEntry {
                        field: format!("runs[{index}]"),
                        entry_id: format!("{entry_id} (first seen at runs[{first}])")
                    });
                }
                debug!("Resolved runs[{index}] as {entry_id}");
                resolved.entries.push(entry);
            },
            Err(e) => {
                warn!("Invalid sample input in runs[{index}]: {e}");
                resolved.failures.push((index, e));
            }
        }
    }
    Ok(resolved)
}

/// Resolves a single run entry
/// # Arguments
/// * `index` - position of the entry in the configuration
/// * `raw_entry` - the raw entry
/// # Errors
/// * if neither sample is provided
/// * if any provided sample fails `resolve_sample`
/// * if tumor and normal resolve to the same sample name
pub fn resolve_run_entry(index: usize, raw_entry: &RawRunEntry) -> Result<RunEntry, SampleInputError> {
    if raw_entry.tumor.is_none() && raw_entry.normal.is_none() {
        return Err(SampleInputError::EmptyEntry);
    }
    let tumor = raw_entry.tumor.as_ref()
        .map(|s| resolve_sample(SampleRole::Tumor, s))
        .transpose()?;
    let normal = raw_entry.normal.as_ref()
        .map(|s| resolve_sample(SampleRole::Normal, s))
        .transpose()?;
    if let (Some(t), Some(n)) = (tumor.as_ref(), normal.as_ref()) {
        if t.name() == n.name() {
            return Err(SampleInputError::SameSampleName { name: t.name().to_string() });
        }
    }
    RunEntry::new(index, tumor, normal).ok_or(SampleInputError::EmptyEntry)
}

/// Resolves one sample into a `SampleUnit`.
/// Name resolution order is: explicit `sample_name`, then the read group `SM`, then the primary input filename.
/// # Arguments
/// * `role` - tumor or normal, used for error messages
/// * `raw` - the raw sample block
/// # Errors
/// * if both or neither of `fq`/`cram` are set
/// * if `fq` does not have exactly two files
/// * if `cram` has an unrecognized extension
/// * if a read group is only partially filled in
pub fn resolve_sample(role: SampleRole, raw: &RawSample) -> Result<SampleUnit, SampleInputError> {
    let read_group = raw.read_group.as_ref()
        .map(|rg| complete_read_group(role, rg))
        .transpose()?;

    match (raw.fq.as_ref(), raw.cram.as_ref()) {
        (Some(_), Some(_)) => Err(SampleInputError::AmbiguousInput { role }),
        (None, None) => Err(SampleInputError::MissingInput { role }),
        (Some(fq), None) => {
            if fq.len() != 2 {
                return Err(SampleInputError::FastqCount { role, count: fq.len() });
            }
            let read1 = fq[0].clone();
            let read2 = fq[1].clone();
            let name = match (raw.sample_name.as_ref(), read_group.as_ref()) {
                (Some(name), _) => name.clone(),
                (None, Some(rg)) => rg.sm.clone(),
                (None, None) => derive_sample_name(&read1)
                    .ok_or_else(|| SampleInputError::UnnamedSample { role, path: read1.clone() })?
            };
            let read_group = match read_group {
                Some(rg) => rg,
                None => default_read_group(&read1, &name)
            };
            Ok(SampleUnit::new(name, InputKind::PairedFastq { read1, read2, read_group }))
        },
        (None, Some(path)) => {
            let format = AlignmentFormat::from_path(path)
                .ok_or_else(|| SampleInputError::UnsupportedAlignment { role, path: path.clone() })?;
            if read_group.is_some() {
                warn!("{role}: read_group is only used for naming with pre-aligned input {path:?}");
            }
            let name = match (raw.sample_name.as_ref(), read_group.as_ref()) {
                (Some(name), _) => name.clone(),
                (None, Some(rg)) => rg.sm.clone(),
                (None, None) => derive_sample_name(path)
                    .ok_or_else(|| SampleInputError::UnnamedSample { role, path: path.clone() })?
            };
            Ok(SampleUnit::new(name, InputKind::Alignment { path: path.clone(), format }))
        }
    }
}

/// Checks that all five read group fields are present
fn complete_read_group(role: SampleRole, raw: &RawReadGroup) -> Result<ReadGroup, SampleInputError> {
    let fields = [
        ("ID", &raw.id), ("PU", &raw.pu), ("SM", &raw.sm), ("PL", &raw.pl), ("LB", &raw.lb)
    ];
    let missing: Vec<&'static str> = fields.iter()
        .filter(|(_label, value)| value.as_deref().map(|v| v.trim().is_empty()).unwrap_or(true))
        .map(|(label, _value)| *label)
        .collect();
    if !missing.is_empty() {
        return Err(SampleInputError::PartialReadGroup { role, missing });
    }

    // all fields are checked above
    let get = |v: &Option<String>| v.clone().unwrap_or_default();
    Ok(ReadGroup {
        id: get(&raw.id),
        pu: get(&raw.pu),
        sm: get(&raw.sm),
        pl: get(&raw.pl),
        lb: get(&raw.lb)
    })
}

/// Removes the directory, sequence suffix, and any read-pair tag from a filename
fn file_stem(path: &Path) -> Option<String> {
    let filename = path.file_name()?.to_str()?;
    let stem = SEQUENCE_SUFFIX.replace(filename, "");
    let stem = stem.strip_suffix(".gz").unwrap_or(&stem);
    Some(stem.to_string())
}

/// Derives a deterministic sample name from the primary input filename.
/// # Arguments
/// * `path` - read 1 for FASTQ input, the alignment file otherwise
pub fn derive_sample_name(path: &Path) -> Option<String> {
    let stem = file_stem(path)?;
    let name = READ_PAIR_TAG.replace(&stem, "").to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Builds the read group used when FASTQ input comes without one
fn default_read_group(read1: &Path, sample_name: &str) -> ReadGroup {
    let stem = file_stem(read1)
        .map(|s| READ_PAIR_TAG.replace(&s, "").to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| sample_name.to_string());
    ReadGroup {
        id: stem.clone(),
        pu: stem,
        sm: sample_name.to_string(),
        pl: DEFAULT_PLATFORM.to_string(),
        lb: sample_name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fastq_sample(r1: &str, r2: &str) -> RawSample {
        RawSample {
            fq: Some(vec![PathBuf::from(r1), PathBuf::from(r2)]),
            ..Default::default()
        }
    }

    fn cram_sample(path: &str, name: Option<&str>) -> RawSample {
        RawSample {
            cram: Some(PathBuf::from(path)),
            sample_name: name.map(|n| n.to_string()),
            ..Default::default()
        }
    }

    fn full_read_group() -> RawReadGroup {
        RawReadGroup {
            id: Some("FCX.1".to_string()),
            pu: Some("FCX.1.ACGT".to_string()),
            sm: Some("patient7_T".to_string()),
            pl: Some("ILLUMINA".to_string()),
            lb: Some("lib1".to_string())
        }
    }

    #[test]
    fn test_derive_sample_name() {
        assert_eq!(derive_sample_name(Path::new("/x/tumor_R1.fastq.gz")).unwrap(), "tumor");
        assert_eq!(derive_sample_name(Path::new("/x/tumor.R1.fq.gz")).unwrap(), "tumor");
        assert_eq!(derive_sample_name(Path::new("/x/S1_L001_R1_001.fastq.gz")).unwrap(), "S1_L001");
        assert_eq!(derive_sample_name(Path::new("normal_1.fq")).unwrap(), "normal");
        assert_eq!(derive_sample_name(Path::new("/x/N01.cram")).unwrap(), "N01");
        assert_eq!(derive_sample_name(Path::new("/x/N01.markdup.BAM")).unwrap(), "N01.markdup");
    }

    #[test]
    fn test_fastq_defaults() {
        let sample = resolve_sample(SampleRole::Tumor, &fastq_sample("/d/T7_R1.fq.gz", "/d/T7_R2.fq.gz")).unwrap();
        assert_eq!(sample.name(), "T7");
        let rg = sample.read_group().unwrap();
        assert_eq!(rg.id, "T7");
        assert_eq!(rg.sm, "T7");
        assert_eq!(rg.pl, DEFAULT_PLATFORM);
        match sample.input() {
            InputKind::PairedFastq { read1, read2, .. } => {
                assert_eq!(read1, Path::new("/d/T7_R1.fq.gz"));
                assert_eq!(read2, Path::new("/d/T7_R2.fq.gz"));
            },
            other => panic!("unexpected input {other:?}")
        };
    }

    #[test]
    fn test_name_resolution_order() {
        // read group SM wins over the filename
        let mut raw = fastq_sample("/d/T7_R1.fq.gz", "/d/T7_R2.fq.gz");
        raw.read_group = Some(full_read_group());
        let sample = resolve_sample(SampleRole::Tumor, &raw).unwrap();
        assert_eq!(sample.name(), "patient7_T");
        assert_eq!(sample.read_group().unwrap().id, "FCX.1");

        // explicit name wins over everything
        raw.sample_name = Some("explicit".to_string());
        let sample = resolve_sample(SampleRole::Tumor, &raw).unwrap();
        assert_eq!(sample.name(), "explicit");
    }

    #[test]
    fn test_alignment_input() {
        let sample = resolve_sample(SampleRole::Normal, &cram_sample("/d/n.cram", Some("N1"))).unwrap();
        assert_eq!(sample.name(), "N1");
        assert!(sample.read_group().is_none());
        assert_eq!(sample.input(), &InputKind::Alignment { path: PathBuf::from("/d/n.cram"), format: AlignmentFormat::Cram });

        let sample = resolve_sample(SampleRole::Normal, &cram_sample("/d/n2.bam", None)).unwrap();
        assert_eq!(sample.name(), "n2");

        let err = resolve_sample(SampleRole::Normal, &cram_sample("/d/n.sam", None)).unwrap_err();
        assert!(matches!(err, SampleInputError::UnsupportedAlignment { .. }));
    }

    #[test]
    fn test_ambiguous_or_missing() {
        let mut raw = fastq_sample("a_R1.fq", "a_R2.fq");
        raw.cram = Some(PathBuf::from("a.cram"));
        assert_eq!(
            resolve_sample(SampleRole::Tumor, &raw).unwrap_err(),
            SampleInputError::AmbiguousInput { role: SampleRole::Tumor }
        );
        assert_eq!(
            resolve_sample(SampleRole::Normal, &RawSample::default()).unwrap_err(),
            SampleInputError::MissingInput { role: SampleRole::Normal }
        );
    }

    #[test]
    fn test_fastq_count() {
        let raw = RawSample {
            fq: Some(vec![PathBuf::from("only_R1.fq.gz")]),
            ..Default::default()
        };
        assert_eq!(
            resolve_sample(SampleRole::Tumor, &raw).unwrap_err(),
            SampleInputError::FastqCount { role: SampleRole::Tumor, count: 1 }
        );
    }

    #[test]
    fn test_partial_read_group() {
        let mut raw = fastq_sample("a_R1.fq", "a_R2.fq");
        let mut rg = full_read_group();
        rg.pl = None;
        rg.lb = Some("".to_string());
        raw.read_group = Some(rg);
        assert_eq!(
            resolve_sample(SampleRole::Tumor, &raw).unwrap_err(),
            SampleInputError::PartialReadGroup { role: SampleRole::Tumor, missing: vec!["PL", "LB"] }
        );
    }

    #[test]
    fn test_resolve_runs() {
        let raw_runs = vec![
            RawRunEntry {
                tumor: Some(cram_sample("t.cram", Some("T"))),
                normal: Some(cram_sample("n.cram", Some("N")))
            },
            // broken entry, does not stop the others
            RawRunEntry {
                tumor: Some(RawSample::default()),
                normal: Some(cram_sample("n.cram", Some("N")))
            },
            RawRunEntry {
                tumor: None,
                normal: Some(cram_sample("g.cram", Some("G")))
            },
            RawRunEntry::default()
        ];
        let resolved = resolve_run_entries(&raw_runs).unwrap();
        assert_eq!(resolved.entries.len(), 2);
        assert_eq!(resolved.entries[0].entry_id(), "T_vs_N");
        assert_eq!(resolved.entries[1].entry_id(), "G");
        assert_eq!(resolved.entries[1].index(), 2);
        assert_eq!(resolved.failures.len(), 2);
        assert_eq!(resolved.failures[0].0, 1);
        assert_eq!(resolved.failures[1], (3, SampleInputError::EmptyEntry));
    }

    #[test]
    fn test_same_sample_name() {
        // both file names derive "S1", which would put tumor and normal on the same align/ paths
        let raw_entry = RawRunEntry {
            tumor: Some(fastq_sample("/tumor/S1_R1.fq.gz", "/tumor/S1_R2.fq.gz")),
            normal: Some(fastq_sample("/normal/S1_R1.fq.gz", "/normal/S1_R2.fq.gz"))
        };
        assert_eq!(
            resolve_run_entry(0, &raw_entry).unwrap_err(),
            SampleInputError::SameSampleName { name: "S1".to_string() }
        );

        // an explicit name on either side resolves it
        let mut raw_entry = raw_entry;
        if let Some(tumor) = raw_entry.tumor.as_mut() {
            tumor.sample_name = Some("S1_T".to_string());
        }
        assert_eq!(resolve_run_entry(0, &raw_entry).unwrap().entry_id(), "S1_T_vs_S1");
    }

    #[test]
    fn test_duplicate_entries() {
        let entry = RawRunEntry {
            tumor: Some(cram_sample("t.cram", Some("T"))),
            normal: Some(cram_sample("n.cram", Some("N")))
        };
        let err = resolve_run_entries(&[entry.clone(), entry]).unwrap_err();
        assert_eq!(err.field(), Some("runs[1]"));
    }
}
