
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::data_types::callers::{AnalysisClass, Caller};

/// All the variant types we distinguish when matching calls across tools
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize, strum_macros::Display)]
pub enum VariantType {
    /// REF and ALT are both length = 1
    #[strum(serialize = "SNV")]
    Snv=0,
    /// REF length = 1, ALT length > 1
    #[strum(serialize = "INS")]
    Insertion,
    /// REF length > 1, ALT length = 1
    #[strum(serialize = "DEL")]
    Deletion,
    /// REF and ALT lengths > 1, including MNVs
    #[strum(serialize = "INDEL")]
    Indel,
    /// Tagged with SVTYPE=INS or a symbolic <INS> allele
    #[strum(serialize = "SV_INS")]
    SvInsertion,
    /// Tagged with SVTYPE=DEL or a symbolic <DEL> allele
    #[strum(serialize = "SV_DEL")]
    SvDeletion,
    /// Tagged with SVTYPE=DUP or a symbolic <DUP> allele
    #[strum(serialize = "SV_DUP")]
    SvDuplication,
    /// Tagged with SVTYPE=INV or a symbolic <INV> allele
    #[strum(serialize = "SV_INV")]
    SvInversion,
    /// Tagged with SVTYPE=BND or written in breakend notation
    #[strum(serialize = "SV_BND")]
    SvBreakend,
    /// Something that doesn't match the above criteria
    #[strum(serialize = "UNKNOWN")]
    Unknown // make sure Unknown is always the last one in the list
}

impl VariantType {
    /// Classifies a single REF/ALT pair.
    /// # Arguments
    /// * `ref_allele` - the REF sequence
    /// * `alt_allele` - one ALT allele; symbolic and breakend alleles are recognized
    /// * `sv_type` - the SVTYPE INFO value, if the record has one
    pub fn classify(ref_allele: &str, alt_allele: &str, sv_type: Option<&str>) -> VariantType {
        if let Some(sv_type) = sv_type {
            return Self::from_sv_tag(sv_type);
        }

        if alt_allele.starts_with('<') && alt_allele.ends_with('>') {
            // symbolic alleles such as <DEL> or <DUP:TANDEM>
            let inner = &alt_allele[1..alt_allele.len() - 1];
            let primary = inner.split(':').next().unwrap_or_default();
            return Self::from_sv_tag(primary);
        }

        if alt_allele.contains('[') || alt_allele.contains(']') {
            return VariantType::SvBreakend;
        }

        if ref_allele.is_empty() || alt_allele.is_empty() || alt_allele == "*" || alt_allele == "." {
            return VariantType::Unknown;
        }

        match (ref_allele.len(), alt_allele.len()) {
            (1, 1) => VariantType::Snv,
            (1, _) => VariantType::Insertion,
            (_, 1) => VariantType::Deletion,
            _ => VariantType::Indel
        }
    }

    fn from_sv_tag(tag: &str) -> VariantType {
        match tag.to_ascii_uppercase().as_str() {
            "INS" => VariantType::SvInsertion,
            "DEL" => VariantType::SvDeletion,
            "DUP" => VariantType::SvDuplication,
            "INV" => VariantType::SvInversion,
            "BND" | "TRA" => VariantType::SvBreakend,
            _ => VariantType::Unknown
        }
    }
}

/// Normalized key used to match calls across callers
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariantSignature {
    /// Chromosome with any "chr" prefix removed
    chrom: String,
    /// 1-based position
    position: u64,
    /// Type of the event
    variant_type: VariantType
}

impl VariantSignature {
    /// Constructor, normalizes the chromosome name
    /// # Arguments
    /// * `chrom` - chromosome name as written by the caller
    /// * `position` - 1-based position
    /// * `variant_type` - type of the event
    pub fn new(chrom: &str, position: u64, variant_type: VariantType) -> Self {
        Self {
            chrom: normalize_chrom(chrom).to_string(),
            position,
            variant_type
        }
    }

    // getters
    pub fn chrom(&self) -> &str {
        &self.chrom
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn variant_type(&self) -> VariantType {
        self.variant_type
    }
}

/// Strips a leading "chr" (any case) so that UCSC and NCBI contig names match
pub fn normalize_chrom(chrom: &str) -> &str {
    match chrom.get(..3) {
        Some(prefix) if chrom.len() > 3 && prefix.eq_ignore_ascii_case("chr") => &chrom[3..],
        _ => chrom
    }
}

/// One allele of one record as reported by a caller
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariantCall {
    /// Where the call is
    signature: VariantSignature,
    /// REF sequence as written
    ref_allele: String,
    /// ALT allele as written
    alt_allele: String,
    /// True if FILTER is PASS or missing
    is_pass: bool
}

impl VariantCall {
    pub fn new(chrom: &str, position: u64, ref_allele: String, alt_allele: String, sv_type: Option<&str>, is_pass: bool) -> Self {
        let variant_type = VariantType::classify(&ref_allele, &alt_allele, sv_type);
        Self {
            signature: VariantSignature::new(chrom, position, variant_type),
            ref_allele,
            alt_allele,
            is_pass
        }
    }

    // getters
    pub fn signature(&self) -> &VariantSignature {
        &self.signature
    }

    pub fn ref_allele(&self) -> &str {
        &self.ref_allele
    }

    pub fn alt_allele(&self) -> &str {
        &self.alt_allele
    }

    pub fn is_pass(&self) -> bool {
        self.is_pass
    }
}

/// Per run entry and analysis class: what each enabled caller produced
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CallerResult {
    /// Owning run entry
    entry_id: String,
    /// The analysis class
    analysis_class: Option<AnalysisClass>,
    /// Call artifacts of each caller whose calling node succeeded
    artifacts: BTreeMap<Caller, Vec<PathBuf>>,
    /// Enabled callers whose calling node did not succeed
    failed_callers: Vec<Caller>
}

impl CallerResult {
    pub fn new(entry_id: String, analysis_class: AnalysisClass) -> Self {
        Self {
            entry_id,
            analysis_class: Some(analysis_class),
            ..Default::default()
        }
    }

    /// Records the call artifacts of a successful caller
    pub fn add_success(&mut self, caller: Caller, artifacts: Vec<PathBuf>) {
        self.artifacts.insert(caller, artifacts);
    }

    /// Records an enabled caller that did not finish
    pub fn add_failure(&mut self, caller: Caller) {
        if !self.failed_callers.contains(&caller) {
            self.failed_callers.push(caller);
            self.failed_callers.sort();
        }
    }

    // getters
    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub fn analysis_class(&self) -> Option<AnalysisClass> {
        self.analysis_class
    }

    pub fn artifacts(&self) -> &BTreeMap<Caller, Vec<PathBuf>> {
        &self.artifacts
    }

    pub fn failed_callers(&self) -> &[Caller] {
        &self.failed_callers
    }
}

/// What one caller reported at a merged signature
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CallerSupport {
    /// The reporting caller
    pub caller: Caller,
    /// REF as the caller wrote it
    pub ref_allele: String,
    /// ALT as the caller wrote it
    pub alt_allele: String,
    /// FILTER status
    pub is_pass: bool
}

/// One normalized signature with every caller that reported it
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MergedCall {
    /// The shared signature
    signature: VariantSignature,
    /// Support, sorted by caller then allele
    support: Vec<CallerSupport>
}

impl MergedCall {
    pub fn new(signature: VariantSignature, support: Vec<CallerSupport>) -> Self {
        Self {
            signature,
            support
        }
    }

    /// The distinct callers supporting this signature, sorted
    pub fn callers(&self) -> Vec<Caller> {
        let mut ret: Vec<Caller> = self.support.iter().map(|s| s.caller).collect();
        ret.dedup();
        ret
    }

    // getters
    pub fn signature(&self) -> &VariantSignature {
        &self.signature
    }

    pub fn support(&self) -> &[CallerSupport] {
        &self.support
    }
}

/// The merged content of a class; depends on the class merge policy
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MergedContent {
    /// Union of variant records, ordered by signature
    Variants(Vec<MergedCall>),
    /// Per-caller artifact listing
    Artifacts(BTreeMap<Caller, Vec<PathBuf>>)
}

/// Aggregation output for one run entry and analysis class
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MergedCallSet {
    /// Owning run entry
    entry_id: String,
    /// The analysis class
    analysis_class: AnalysisClass,
    /// Callers that contributed
    contributing_callers: Vec<Caller>,
    /// Enabled callers that did not contribute
    missing_callers: Vec<Caller>,
    /// The merged records or artifacts
    content: MergedContent
}

impl MergedCallSet {
    pub fn new(
        entry_id: String, analysis_class: AnalysisClass,
        contributing_callers: Vec<Caller>, missing_callers: Vec<Caller>,
        content: MergedContent
    ) -> Self {
        Self {
            entry_id,
            analysis_class,
            contributing_callers,
            missing_callers,
            content
        }
    }

    /// Number of unique signatures, or number of artifacts for artifact unions
    pub fn len(&self) -> usize {
        match &self.content {
            MergedContent::Variants(calls) => calls.len(),
            MergedContent::Artifacts(artifacts) => artifacts.values().map(|v| v.len()).sum()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // getters
    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub fn analysis_class(&self) -> AnalysisClass {
        self.analysis_class
    }

    pub fn contributing_callers(&self) -> &[Caller] {
        &self.contributing_callers
    }

    pub fn missing_callers(&self) -> &[Caller] {
        &self.missing_callers
    }

    pub fn content(&self) -> &MergedContent {
        &self.content
    }
}
