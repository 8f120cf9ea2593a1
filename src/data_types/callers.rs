
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{EnumIter, EnumString};

/// The analysis classes a run can request; each one groups tools that answer the same biological question
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize, strum_macros::Display, EnumString, EnumIter)]
pub enum AnalysisClass {
    /// Somatic SNVs and small indels
    #[strum(serialize = "somatic_snv_indel")]
    #[serde(rename = "somatic_snv_indel")]
    SomaticSnvIndel,
    /// Somatic structural variants
    #[strum(serialize = "somatic_sv")]
    #[serde(rename = "somatic_sv")]
    SomaticSv,
    /// Somatic copy-number variants
    #[strum(serialize = "somatic_cnv")]
    #[serde(rename = "somatic_cnv")]
    SomaticCnv,
    /// Microsatellite instability scoring
    #[strum(serialize = "somatic_msi")]
    #[serde(rename = "somatic_msi")]
    SomaticMsi,
    /// Germline SNVs and small indels
    #[strum(serialize = "germline_snv_indel")]
    #[serde(rename = "germline_snv_indel")]
    GermlineSnvIndel
}

/// How the outputs of several callers within one class are combined
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MergePolicy {
    /// Calls are loaded and unioned by normalized variant signature
    VariantUnion,
    /// Outputs are segment/score files, only the artifacts are collected with provenance
    ArtifactUnion
}

impl AnalysisClass {
    /// Returns true if the class needs a matched tumor/normal pair
    pub fn is_somatic(&self) -> bool {
        match self {
            AnalysisClass::SomaticSnvIndel |
            AnalysisClass::SomaticSv |
            AnalysisClass::SomaticCnv |
            AnalysisClass::SomaticMsi => true,
            AnalysisClass::GermlineSnvIndel => false
        }
    }

    pub fn merge_policy(&self) -> MergePolicy {
        match self {
            AnalysisClass::SomaticSnvIndel |
            AnalysisClass::SomaticSv |
            AnalysisClass::GermlineSnvIndel => MergePolicy::VariantUnion,
            AnalysisClass::SomaticCnv |
            AnalysisClass::SomaticMsi => MergePolicy::ArtifactUnion
        }
    }
}

/// Closed set of (analysis class, tool) pairs that the pipeline knows how to run.
/// Configuration toggles are converted into this type at load time so that misspelled keys fail loudly.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize, strum_macros::Display, EnumIter)]
pub enum Caller {
    /// GATK Mutect2
    #[strum(serialize = "somatic_snv_indel.gatk")]
    #[serde(rename = "somatic_snv_indel.gatk")]
    SomaticSnvIndelGatk,
    /// Strelka2 somatic workflow
    #[strum(serialize = "somatic_snv_indel.strelka")]
    #[serde(rename = "somatic_snv_indel.strelka")]
    SomaticSnvIndelStrelka,
    /// Manta somatic SV workflow
    #[strum(serialize = "somatic_sv.manta")]
    #[serde(rename = "somatic_sv.manta")]
    SomaticSvManta,
    /// Delly somatic SV calling
    #[strum(serialize = "somatic_sv.delly")]
    #[serde(rename = "somatic_sv.delly")]
    SomaticSvDelly,
    /// GATK read-count based copy ratio segmentation
    #[strum(serialize = "somatic_cnv.gatk")]
    #[serde(rename = "somatic_cnv.gatk")]
    SomaticCnvGatk,
    /// CNVkit batch mode
    #[strum(serialize = "somatic_cnv.cnvkit")]
    #[serde(rename = "somatic_cnv.cnvkit")]
    SomaticCnvCnvkit,
    /// MSIsensor-pro tumor/normal scoring
    #[strum(serialize = "somatic_msi.msisensor")]
    #[serde(rename = "somatic_msi.msisensor")]
    SomaticMsiMsisensor,
    /// GATK HaplotypeCaller
    #[strum(serialize = "germline_snv_indel.gatk")]
    #[serde(rename = "germline_snv_indel.gatk")]
    GermlineSnvIndelGatk,
    /// Strelka2 germline workflow
    #[strum(serialize = "germline_snv_indel.strelka")]
    #[serde(rename = "germline_snv_indel.strelka")]
    GermlineSnvIndelStrelka
}

impl Caller {
    /// Looks up a caller from the configuration keys
    /// # Arguments
    /// * `class` - the analysis class table the tool was listed under
    /// * `tool` - the tool key, e.g. "gatk"
    pub fn from_class_tool(class: AnalysisClass, tool: &str) -> Option<Caller> {
        Caller::iter().find(|c| c.analysis_class() == class && c.tool_name() == tool)
    }

    pub fn analysis_class(&self) -> AnalysisClass {
        match self {
            Caller::SomaticSnvIndelGatk |
            Caller::SomaticSnvIndelStrelka => AnalysisClass::SomaticSnvIndel,
            Caller::SomaticSvManta |
            Caller::SomaticSvDelly => AnalysisClass::SomaticSv,
            Caller::SomaticCnvGatk |
            Caller::SomaticCnvCnvkit => AnalysisClass::SomaticCnv,
            Caller::SomaticMsiMsisensor => AnalysisClass::SomaticMsi,
            Caller::GermlineSnvIndelGatk |
            Caller::GermlineSnvIndelStrelka => AnalysisClass::GermlineSnvIndel
        }
    }

    /// The tool key used in the configuration tables
    pub fn tool_name(&self) -> &'static str {
        match self {
            Caller::SomaticSnvIndelGatk |
            Caller::SomaticCnvGatk |
            Caller::GermlineSnvIndelGatk => "gatk",
            Caller::SomaticSnvIndelStrelka |
            Caller::GermlineSnvIndelStrelka => "strelka",
            Caller::SomaticSvManta => "manta",
            Caller::SomaticSvDelly => "delly",
            Caller::SomaticCnvCnvkit => "cnvkit",
            Caller::SomaticMsiMsisensor => "msisensor"
        }
    }

    /// Resources that must be configured when this caller is enabled
    pub fn required_resources(&self) -> &'static [ResourceKey] {
        match self {
            Caller::SomaticSnvIndelGatk => &[ResourceKey::GnomadVcf, ResourceKey::EvaluationInterval],
            Caller::SomaticSnvIndelStrelka |
            Caller::GermlineSnvIndelStrelka |
            Caller::SomaticSvManta => &[ResourceKey::EvaluationInterval],
            Caller::SomaticSvDelly => &[ResourceKey::ExclusionBed],
            Caller::SomaticCnvGatk => &[ResourceKey::EvaluationInterval, ResourceKey::GnomadVcf, ResourceKey::CnvBlacklist],
            Caller::SomaticCnvCnvkit => &[ResourceKey::RefflatTxt, ResourceKey::AccessBed],
            Caller::SomaticMsiMsisensor => &[],
            Caller::GermlineSnvIndelGatk => &[ResourceKey::DbsnpVcf, ResourceKey::EvaluationInterval, ResourceKey::HapmapVcf, ResourceKey::MillsIndelVcf]
        }
    }

    /// Returns true if the caller writes variant records (VCF/BCF) that downstream VCF tools can consume
    pub fn produces_vcf(&self) -> bool {
        !matches!(self, Caller::SomaticCnvGatk | Caller::SomaticCnvCnvkit | Caller::SomaticMsiMsisensor)
    }

    /// Returns true if the caller reports structural variants
    pub fn is_structural(&self) -> bool {
        self.analysis_class() == AnalysisClass::SomaticSv
    }
}

/// Optional QC collectors
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize, strum_macros::Display, EnumString, EnumIter)]
pub enum MetricsCollector {
    /// samtools stats/flagstat/idxstats on each canonical alignment
    #[strum(serialize = "samtools")]
    #[serde(rename = "samtools")]
    Samtools,
    /// picard CollectMultipleMetrics on each canonical alignment
    #[strum(serialize = "picard")]
    #[serde(rename = "picard")]
    Picard,
    /// bcftools stats on each caller VCF
    #[strum(serialize = "bcftools")]
    #[serde(rename = "bcftools")]
    Bcftools
}

/// Optional variant annotators
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize, strum_macros::Display, EnumString, EnumIter)]
pub enum Annotator {
    #[strum(serialize = "funcotator")]
    #[serde(rename = "funcotator")]
    Funcotator,
    #[strum(serialize = "snpeff")]
    #[serde(rename = "snpeff")]
    Snpeff,
    #[strum(serialize = "vep")]
    #[serde(rename = "vep")]
    Vep
}

impl Annotator {
    /// Returns true if this annotator has something to do with the output of the given caller
    pub fn annotates(&self, caller: Caller) -> bool {
        match self {
            // Funcotator does not handle symbolic SV alleles, but it does annotate GATK segments
            Annotator::Funcotator => (caller.produces_vcf() && !caller.is_structural()) || caller == Caller::SomaticCnvGatk,
            Annotator::Snpeff |
            Annotator::Vep => caller.produces_vcf()
        }
    }
}

/// Closed set of named external resources
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize, strum_macros::Display, EnumString, EnumIter)]
pub enum ResourceKey {
    #[strum(serialize = "reference_fa")]
    #[serde(rename = "reference_fa")]
    ReferenceFa,
    #[strum(serialize = "dbsnp_vcf")]
    #[serde(rename = "dbsnp_vcf")]
    DbsnpVcf,
    #[strum(serialize = "mills_indel_vcf")]
    #[serde(rename = "mills_indel_vcf")]
    MillsIndelVcf,
    #[strum(serialize = "known_indel_vcf")]
    #[serde(rename = "known_indel_vcf")]
    KnownIndelVcf,
    #[strum(serialize = "hapmap_vcf")]
    #[serde(rename = "hapmap_vcf")]
    HapmapVcf,
    #[strum(serialize = "gnomad_vcf")]
    #[serde(rename = "gnomad_vcf")]
    GnomadVcf,
    #[strum(serialize = "evaluation_interval")]
    #[serde(rename = "evaluation_interval")]
    EvaluationInterval,
    #[strum(serialize = "exclusion_bed")]
    #[serde(rename = "exclusion_bed")]
    ExclusionBed,
    #[strum(serialize = "cnv_blacklist")]
    #[serde(rename = "cnv_blacklist")]
    CnvBlacklist,
    #[strum(serialize = "refflat_txt")]
    #[serde(rename = "refflat_txt")]
    RefflatTxt,
    #[strum(serialize = "access_bed")]
    #[serde(rename = "access_bed")]
    AccessBed,
    #[strum(serialize = "funcotator_somatic_data_dir")]
    #[serde(rename = "funcotator_somatic_data_dir")]
    FuncotatorSomaticDataDir,
    #[strum(serialize = "funcotator_germline_data_dir")]
    #[serde(rename = "funcotator_germline_data_dir")]
    FuncotatorGermlineDataDir,
    #[strum(serialize = "snpeff_data_dir")]
    #[serde(rename = "snpeff_data_dir")]
    SnpeffDataDir,
    #[strum(serialize = "vep_cache_dir")]
    #[serde(rename = "vep_cache_dir")]
    VepCacheDir
}

/// Known-site VCFs consumed by base quality score recalibration
pub const BQSR_KNOWN_SITES: [ResourceKey; 3] = [
    ResourceKey::DbsnpVcf,
    ResourceKey::MillsIndelVcf,
    ResourceKey::KnownIndelVcf
];
