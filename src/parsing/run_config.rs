/*!
# Run configuration
Loads the declarative YAML run configuration and converts it into a validated [`RunConfig`].
Parsing is a pure transform: resource paths are only checked for presence here, the files themselves are checked when a tool first needs them.
*/
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::data_types::callers::{AnalysisClass, Annotator, Caller, MetricsCollector, ResourceKey, BQSR_KNOWN_SITES};
use crate::data_types::reference::ReferenceVersion;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("error while reading {path:?}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("{field}: {message}")]
    InvalidValue { field: String, message: String },
    #[error("{field}: unrecognized key")]
    UnknownKey { field: String },
    #[error("{field}: required by {required_by} but missing or empty")]
    MissingResource { field: String, required_by: String },
    #[error("{field}: duplicate run entry {entry_id:?}")]
    DuplicateRunEntry { field: String, entry_id: String },
    #[error("runs: at least one run entry is required")]
    NoRuns
}

impl ConfigError {
    /// The configuration field path that caused the error, if there is one
    pub fn field(&self) -> Option<&str> {
        match self {
            ConfigError::Yaml(_) |
            ConfigError::Io { .. } => None,
            ConfigError::InvalidValue { field, .. } |
            ConfigError::UnknownKey { field } |
            ConfigError::MissingResource { field, .. } |
            ConfigError::DuplicateRunEntry { field, .. } => Some(field),
            ConfigError::NoRuns => Some("runs")
        }
    }
}

/// Read group block as written in the configuration; completeness is checked by the sample resolver
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawReadGroup {
    #[serde(rename = "ID")]
    pub id: Option<String>,
    #[serde(rename = "PU")]
    pub pu: Option<String>,
    #[serde(rename = "SM")]
    pub sm: Option<String>,
    #[serde(rename = "PL")]
    pub pl: Option<String>,
    #[serde(rename = "LB")]
    pub lb: Option<String>
}

/// One sample as written in the configuration
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSample {
    /// Paired FASTQ files
    pub fq: Option<Vec<PathBuf>>,
    /// A CRAM or BAM file
    pub cram: Option<PathBuf>,
    /// Explicit sample name
    pub sample_name: Option<String>,
    /// Optional read group
    pub read_group: Option<RawReadGroup>
}

/// One run entry as written in the configuration
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRunEntry {
    pub tumor: Option<RawSample>,
    pub normal: Option<RawSample>
}

/// Mirror of the YAML document, before validation
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRunConfig {
    #[serde(default)]
    reference_name: String,
    reference_version: String,
    #[serde(default)]
    exome: bool,
    #[serde(default = "default_true")]
    adapter_removal: bool,
    #[serde(default = "default_true")]
    normalize_vcf: bool,
    #[serde(default)]
    callers: BTreeMap<String, BTreeMap<String, bool>>,
    #[serde(default)]
    metrics_collectors: BTreeMap<String, bool>,
    #[serde(default)]
    annotators: BTreeMap<String, bool>,
    #[serde(default)]
    resources: BTreeMap<String, Option<PathBuf>>,
    #[serde(default)]
    runs: Vec<RawRunEntry>
}

fn default_true() -> bool {
    true
}

/// The validated run configuration
#[derive(Clone, Debug, Serialize)]
pub struct RunConfig {
    /// Free-text reference name
    reference_name: String,
    /// The genome build
    reference_version: ReferenceVersion,
    /// Exome (targeted) vs whole-genome data
    exome: bool,
    /// If true, reads are adapter-trimmed before alignment
    adapter_removal: bool,
    /// If true, caller VCFs are left-aligned and split with `bcftools norm` before annotation
    normalize_vcf: bool,
    /// All enabled callers
    callers: BTreeSet<Caller>,
    /// All enabled QC collectors
    metrics_collectors: BTreeSet<MetricsCollector>,
    /// All enabled annotators
    annotators: BTreeSet<Annotator>,
    /// Resource paths, all non-empty
    resources: BTreeMap<ResourceKey, PathBuf>,
    /// Run entries, resolved into samples later
    runs: Vec<RawRunEntry>
}

impl RunConfig {
    /// Reads and parses a configuration file; relative paths are resolved against the file's folder.
    /// # Arguments
    /// * `filename` - the YAML file to load
    /// # Errors
    /// * if the file cannot be read
    /// * if the content does not pass `parse_run_config`
    pub fn from_yaml_file(filename: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(filename)
            .map_err(|source| ConfigError::Io { path: filename.to_path_buf(), source })?;
        let base_dir = filename.parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default();
        parse_run_config(&content, Some(&base_dir))
    }

    /// Returns all analysis classes with at least one enabled caller
    pub fn enabled_classes(&self) -> BTreeSet<AnalysisClass> {
        self.callers.iter().map(|c| c.analysis_class()).collect()
    }

    /// Returns true if any configured sample still needs alignment
    pub fn has_fastq_input(&self) -> bool {
        self.runs.iter()
            .flat_map(|r| [r.tumor.as_ref(), r.normal.as_ref()])
            .flatten()
            .any(|s| s.fq.is_some())
    }

    /// Gets a resource path, only valid for resources that were validated as required
    pub fn resource(&self, key: ResourceKey) -> Option<&Path> {
        self.resources.get(&key).map(|p| p.as_path())
    }

    // getters
    pub fn reference_name(&self) -> &str {
        &self.reference_name
    }

    pub fn reference_version(&self) -> ReferenceVersion {
        self.reference_version
    }

    pub fn exome(&self) -> bool {
        self.exome
    }

    pub fn adapter_removal(&self) -> bool {
        self.adapter_removal
    }

    pub fn normalize_vcf(&self) -> bool {
        self.normalize_vcf
    }

    pub fn callers(&self) -> &BTreeSet<Caller> {
        &self.callers
    }

    pub fn metrics_collectors(&self) -> &BTreeSet<MetricsCollector> {
        &self.metrics_collectors
    }

    pub fn annotators(&self) -> &BTreeSet<Annotator> {
        &self.annotators
    }

    pub fn resources(&self) -> &BTreeMap<ResourceKey, PathBuf> {
        &self.resources
    }

    pub fn runs(&self) -> &[RawRunEntry] {
        &self.runs
    }
}

/// Parses the YAML run configuration into a validated `RunConfig`.
/// # Arguments
/// * `content` - the raw YAML text
/// * `base_dir` - if provided, relative resource and input paths are joined onto this folder
/// # Errors
/// * if the YAML is malformed or has unknown top-level keys
/// * if the reference version is not supported
/// * if any caller, collector, annotator, or resource key is not recognized
/// * if a resource needed by an enabled component is missing or empty
/// * if there are no run entries
pub fn parse_run_config(content: &str, base_dir: Option<&Path>) -> Result<RunConfig, ConfigError> {
    let raw: RawRunConfig = serde_yaml::from_str(content)?;

    let reference_version = ReferenceVersion::from_str(raw.reference_version.trim())
        .map_err(|_e| ConfigError::InvalidValue {
            field: "reference_version".to_string(),
            message: format!("unsupported reference version {:?}", raw.reference_version)
        })?;

    // convert the nested toggle tables into the closed caller set
    let mut callers: BTreeSet<Caller> = Default::default();
    for (class_key, tools) in raw.callers.iter() {
        let class = AnalysisClass::from_str(class_key)
            .map_err(|_e| ConfigError::UnknownKey { field: format!("callers.{class_key}") })?;
        let mut class_enabled = false;
        for (tool_key, &enabled) in tools.iter() {
            let caller = Caller::from_class_tool(class, tool_key)
                .ok_or_else(|| ConfigError::UnknownKey { field: format!("callers.{class_key}.{tool_key}") })?;
            if enabled {
                callers.insert(caller);
                class_enabled = true;
            }
        }
        if !class_enabled {
            info!("No callers enabled for {class}, skipping the class.");
        }
    }

    let metrics_collectors = parse_toggles::<MetricsCollector>(&raw.metrics_collectors, "metrics_collectors")?;
    let annotators = parse_toggles::<Annotator>(&raw.annotators, "annotators")?;

    // resources; empty values are treated the same as missing ones
    let mut resources: BTreeMap<ResourceKey, PathBuf> = Default::default();
    for (res_key, opt_path) in raw.resources.into_iter() {
        let key = ResourceKey::from_str(&res_key)
            .map_err(|_e| ConfigError::UnknownKey { field: format!("resources.{res_key}") })?;
        match opt_path {
            Some(path) if !path.as_os_str().is_empty() => {
                resources.insert(key, resolve_path(path, base_dir));
            },
            _ => {
                debug!("Resource {key} is empty, ignoring it.");
            }
        }
    }

    if raw.runs.is_empty() {
        return Err(ConfigError::NoRuns);
    }
    let runs: Vec<RawRunEntry> = raw.runs.into_iter()
        .map(|entry| resolve_entry_paths(entry, base_dir))
        .collect();

    let config = RunConfig {
        reference_name: raw.reference_name,
        reference_version,
        exome: raw.exome,
        adapter_removal: raw.adapter_removal,
        normalize_vcf: raw.normalize_vcf,
        callers,
        metrics_collectors,
        annotators,
        resources,
        runs
    };
    check_required_resources(&config)?;
    Ok(config)
}

/// Converts a flat `name: bool` table into the set of enabled values
fn parse_toggles<T: FromStr + Ord>(toggles: &BTreeMap<String, bool>, section: &str) -> Result<BTreeSet<T>, ConfigError> {
    let mut ret = BTreeSet::new();
    for (key, &enabled) in toggles.iter() {
        let value = T::from_str(key)
            .map_err(|_e| ConfigError::UnknownKey { field: format!("{section}.{key}") })?;
        if enabled {
            ret.insert(value);
        }
    }
    Ok(ret)
}

/// Makes sure every enabled component has the resources it needs
fn check_required_resources(config: &RunConfig) -> Result<(), ConfigError> {
    let mut required: Vec<(ResourceKey, String)> = vec![
        (ResourceKey::ReferenceFa, "the reference genome".to_string())
    ];

    if config.has_fastq_input() {
        for key in BQSR_KNOWN_SITES {
            required.push((key, "base quality score recalibration of FASTQ input".to_string()));
        }
    }

    for caller in config.callers.iter() {
        for &key in caller.required_resources() {
            required.push((key, caller.to_string()));
        }
    }

    for annotator in config.annotators.iter() {
        match annotator {
            Annotator::Funcotator => {
                for caller in config.callers.iter().filter(|c| annotator.annotates(**c)) {
                    let key = if caller.analysis_class().is_somatic() {
                        ResourceKey::FuncotatorSomaticDataDir
                    } else {
                        ResourceKey::FuncotatorGermlineDataDir
                    };
                    required.push((key, format!("annotators.{annotator} on {caller}")));
                }
            },
            Annotator::Snpeff => required.push((ResourceKey::SnpeffDataDir, format!("annotators.{annotator}"))),
            Annotator::Vep => required.push((ResourceKey::VepCacheDir, format!("annotators.{annotator}")))
        };
    }

    for (key, required_by) in required.into_iter() {
        if !config.resources.contains_key(&key) {
            return Err(ConfigError::MissingResource {
                field: format!("resources.{key}"),
                required_by
            });
        }
    }

    let unused: Vec<String> = config.resources.keys()
        .filter(|k| !is_resource_used(config, **k))
        .map(|k| k.to_string())
        .collect();
    if !unused.is_empty() {
        warn!("Resources not used by any enabled component: {}", unused.join(", "));
    }
    Ok(())
}

/// Checks if any enabled component reads the given resource
fn is_resource_used(config: &RunConfig, key: ResourceKey) -> bool {
    match key {
        ResourceKey::ReferenceFa => true,
        ResourceKey::DbsnpVcf |
        ResourceKey::MillsIndelVcf |
        ResourceKey::KnownIndelVcf if config.has_fastq_input() => true,
        ResourceKey::FuncotatorSomaticDataDir |
        ResourceKey::FuncotatorGermlineDataDir => config.annotators.contains(&Annotator::Funcotator),
        ResourceKey::SnpeffDataDir => config.annotators.contains(&Annotator::Snpeff),
        ResourceKey::VepCacheDir => config.annotators.contains(&Annotator::Vep),
        _ => config.callers.iter().any(|c| c.required_resources().contains(&key))
    }
}

fn resolve_path(path: PathBuf, base_dir: Option<&Path>) -> PathBuf {
    match base_dir {
        Some(base) if path.is_relative() => base.join(path),
        _ => path
    }
}

fn resolve_entry_paths(entry: RawRunEntry, base_dir: Option<&Path>) -> RawRunEntry {
    let resolve_sample = |sample: RawSample| RawSample {
        fq: sample.fq.map(|v| v.into_iter().map(|p| resolve_path(p, base_dir)).collect()),
        cram: sample.cram.map(|p| resolve_path(p, base_dir)),
        ..sample
    };
    RawRunEntry {
        tumor: entry.tumor.map(resolve_sample),
        normal: entry.normal.map(resolve_sample)
    }
}

/// Template written by `vcline init`
pub const CONFIG_TEMPLATE: &str = r#"---
reference_name: GRCh38 (Homo sapiens)
reference_version: hg38
exome: false
adapter_removal: true
normalize_vcf: true
callers:
  somatic_snv_indel:
    gatk: true
    strelka: true
  somatic_sv:
    manta: true
    delly: true
  somatic_cnv:
    gatk: true
    cnvkit: true
  somatic_msi:
    msisensor: true
  germline_snv_indel:
    gatk: true
    strelka: true
metrics_collectors:
  samtools: true
  picard: true
  bcftools: true
annotators:
  funcotator: true
  snpeff: true
  vep: false
resources:
  reference_fa: /path/to/GRCh38_full_analysis_set_plus_decoy_hla.fa
  dbsnp_vcf: /path/to/Homo_sapiens_assembly38.dbsnp138.vcf.gz
  mills_indel_vcf: /path/to/Mills_and_1000G_gold_standard.indels.hg38.vcf.gz
  known_indel_vcf: /path/to/Homo_sapiens_assembly38.known_indels.vcf.gz
  hapmap_vcf: /path/to/hapmap_3.3.hg38.vcf.gz
  gnomad_vcf: /path/to/af-only-gnomad.hg38.vcf.gz
  evaluation_interval: /path/to/wgs_calling_regions.hg38.interval_list
  exclusion_bed: /path/to/human.hg38.excl.tsv
  cnv_blacklist: /path/to/CNV_and_centromere_blacklist.hg38liftover.list
  refflat_txt: /path/to/refFlat.txt
  access_bed: /path/to/access-5k-mappable.hg38.bed
  funcotator_somatic_data_dir: /path/to/funcotator_dataSources.v1.7.20200521s
  funcotator_germline_data_dir: /path/to/funcotator_dataSources.v1.7.20200521g
  snpeff_data_dir: /path/to/snpeff_data
  vep_cache_dir: /path/to/vep_cache
runs:
  - tumor:
      fq:
        - /path/to/tumor.R1.fq.gz
        - /path/to/tumor.R2.fq.gz
    normal:
      fq:
        - /path/to/normal.R1.fq.gz
        - /path/to/normal.R2.fq.gz
  - tumor:
      cram: /path/to/tumor.cram
      sample_name: tumor02
    normal:
      cram: /path/to/normal.cram
      sample_name: normal02
"#;

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_RESOURCES: &str = "
resources:
  reference_fa: ref/genome.fa
  dbsnp_vcf: dbsnp.vcf.gz
  mills_indel_vcf: mills.vcf.gz
  known_indel_vcf: known.vcf.gz
  hapmap_vcf: hapmap.vcf.gz
  gnomad_vcf: gnomad.vcf.gz
  evaluation_interval: calling.interval_list
";

    const FASTQ_RUNS: &str = "
runs:
  - tumor:
      fq: [t_R1.fq.gz, t_R2.fq.gz]
    normal:
      fq: [n_R1.fq.gz, n_R2.fq.gz]
";

    fn build_config(body: &str) -> String {
        format!("reference_version: hg38\n{body}{MINIMAL_RESOURCES}{FASTQ_RUNS}")
    }

    #[test]
    fn test_template_parses() {
        let config = parse_run_config(CONFIG_TEMPLATE, None).unwrap();
        assert_eq!(config.reference_version(), ReferenceVersion::Hg38);
        assert_eq!(config.callers().len(), 9);
        assert_eq!(config.annotators().len(), 2);
        assert_eq!(config.metrics_collectors().len(), 3);
        assert_eq!(config.runs().len(), 2);
        assert!(config.has_fastq_input());
    }

    #[test]
    fn test_minimal_config() {
        let content = build_config("callers:\n  somatic_snv_indel:\n    gatk: true\n    strelka: false\n");
        let config = parse_run_config(&content, Some(Path::new("/base"))).unwrap();
        assert_eq!(config.callers().iter().copied().collect::<Vec<_>>(), vec![Caller::SomaticSnvIndelGatk]);
        assert!(config.adapter_removal());
        assert!(config.normalize_vcf());
        assert!(!config.exome());

        // relative paths are anchored on the base folder
        assert_eq!(config.resource(ResourceKey::ReferenceFa).unwrap(), Path::new("/base/ref/genome.fa"));
        let tumor = config.runs()[0].tumor.as_ref().unwrap();
        assert_eq!(tumor.fq.as_ref().unwrap()[0], PathBuf::from("/base/t_R1.fq.gz"));
    }

    #[test]
    fn test_disabled_class_is_skipped() {
        let content = build_config("callers:\n  somatic_sv:\n    manta: false\n    delly: false\n");
        let config = parse_run_config(&content, None).unwrap();
        assert!(config.callers().is_empty());
        assert!(config.enabled_classes().is_empty());
    }

    #[test]
    fn test_missing_resource() {
        // delly needs the exclusion BED, which is not provided
        let content = build_config("callers:\n  somatic_sv:\n    delly: true\n");
        let err = parse_run_config(&content, None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingResource { .. }));
        assert_eq!(err.field(), Some("resources.exclusion_bed"));

        // empty values count as missing
        let content = format!(
            "reference_version: hg38\ncallers:\n  somatic_sv:\n    delly: true\n{MINIMAL_RESOURCES}  exclusion_bed: \"\"\n{FASTQ_RUNS}"
        );
        let err = parse_run_config(&content, None).unwrap_err();
        assert_eq!(err.field(), Some("resources.exclusion_bed"));
    }

    #[test]
    fn test_bqsr_resources_for_fastq() {
        let content = "reference_version: hg38
resources:
  reference_fa: genome.fa
runs:
  - normal:
      fq: [n_R1.fq.gz, n_R2.fq.gz]
";
        let err = parse_run_config(content, None).unwrap_err();
        assert_eq!(err.field(), Some("resources.dbsnp_vcf"));

        // pre-aligned input does not need them
        let content = "reference_version: hg38
resources:
  reference_fa: genome.fa
runs:
  - normal:
      cram: n.cram
";
        assert!(parse_run_config(content, None).is_ok());
    }

    #[test]
    fn test_funcotator_data_dirs() {
        let content = build_config("callers:\n  germline_snv_indel:\n    gatk: true\nannotators:\n  funcotator: true\n");
        let err = parse_run_config(&content, None).unwrap_err();
        assert_eq!(err.field(), Some("resources.funcotator_germline_data_dir"));
    }

    #[test]
    fn test_tranche_filter_resources() {
        // the germline GATK chain filters CNN scores against HapMap and Mills
        let content = "reference_version: hg38
callers:
  germline_snv_indel:
    gatk: true
resources:
  reference_fa: genome.fa
  dbsnp_vcf: dbsnp.vcf.gz
  evaluation_interval: calling.interval_list
  mills_indel_vcf: mills.vcf.gz
runs:
  - normal:
      cram: n.cram
";
        let err = parse_run_config(content, None).unwrap_err();
        assert_eq!(err.field(), Some("resources.hapmap_vcf"));
    }

    #[test]
    fn test_normalize_toggle() {
        let content = build_config("normalize_vcf: false
");
        let config = parse_run_config(&content, None).unwrap();
        assert!(!config.normalize_vcf());
    }

    #[test]
    fn test_unknown_keys() {
        let content = build_config("callers:\n  somatic_snv_indel:\n    gatkk: true\n");
        let err = parse_run_config(&content, None).unwrap_err();
        assert_eq!(err.field(), Some("callers.somatic_snv_indel.gatkk"));

        let content = build_config("callers:\n  somatic_snp:\n    gatk: true\n");
        let err = parse_run_config(&content, None).unwrap_err();
        assert_eq!(err.field(), Some("callers.somatic_snp"));

        let content = build_config("annotators:\n  annovar: true\n");
        let err = parse_run_config(&content, None).unwrap_err();
        assert_eq!(err.field(), Some("annotators.annovar"));

        let content = build_config("metrics_collectors:\n  qualimap: true\n");
        let err = parse_run_config(&content, None).unwrap_err();
        assert_eq!(err.field(), Some("metrics_collectors.qualimap"));

        // unknown top-level keys are rejected by serde
        let content = build_config("unexpected_key: 1\n");
        assert!(matches!(parse_run_config(&content, None).unwrap_err(), ConfigError::Yaml(_)));
    }

    #[test]
    fn test_bad_reference_version() {
        let content = format!("reference_version: hg18\n{MINIMAL_RESOURCES}{FASTQ_RUNS}");
        let err = parse_run_config(&content, None).unwrap_err();
        assert_eq!(err.field(), Some("reference_version"));
    }

    #[test]
    fn test_no_runs() {
        let content = format!("reference_version: GRCh37\n{MINIMAL_RESOURCES}");
        let err = parse_run_config(&content, None).unwrap_err();
        assert!(matches!(err, ConfigError::NoRuns));
    }
}
