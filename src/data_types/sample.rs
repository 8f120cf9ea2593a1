
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The sequencer platform written into synthesized read groups
pub const DEFAULT_PLATFORM: &str = "ILLUMINA";

/// Pre-aligned file formats we accept as input
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize, strum_macros::Display)]
pub enum AlignmentFormat {
    #[strum(serialize = "cram")]
    Cram,
    #[strum(serialize = "bam")]
    Bam
}

impl AlignmentFormat {
    /// Infers the format from the file extension, returns None if the extension is not recognized
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "cram" => Some(AlignmentFormat::Cram),
            "bam" => Some(AlignmentFormat::Bam),
            _ => None
        }
    }
}

/// Read group metadata, all fields are required
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReadGroup {
    /// Read group identifier
    pub id: String,
    /// Platform unit
    pub pu: String,
    /// Sample name
    pub sm: String,
    /// Sequencing platform
    pub pl: String,
    /// Library
    pub lb: String
}

impl ReadGroup {
    /// Formats the read group as a SAM header line the way `bwa mem -R` expects it
    pub fn to_sam_header(&self) -> String {
        format!(
            "@RG\\tID:{}\\tPU:{}\\tSM:{}\\tPL:{}\\tLB:{}",
            self.id, self.pu, self.sm, self.pl, self.lb
        )
    }
}

/// The two mutually exclusive ways a sample can be provided
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum InputKind {
    /// Raw paired reads, ordered (read 1, read 2); alignment must be done by the pipeline
    PairedFastq {
        read1: PathBuf,
        read2: PathBuf,
        read_group: ReadGroup
    },
    /// An alignment file that is used as-is
    Alignment {
        path: PathBuf,
        format: AlignmentFormat
    }
}

/// Role of a sample within a run entry
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize, strum_macros::Display)]
pub enum SampleRole {
    #[strum(serialize = "tumor")]
    Tumor,
    #[strum(serialize = "normal")]
    Normal
}

/// A fully resolved sample
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SampleUnit {
    /// Final sample name
    name: String,
    /// How the reads were provided
    input: InputKind
}

impl SampleUnit {
    pub fn new(name: String, input: InputKind) -> Self {
        Self {
            name,
            input
        }
    }

    // getters
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input(&self) -> &InputKind {
        &self.input
    }

    pub fn is_fastq(&self) -> bool {
        matches!(self.input, InputKind::PairedFastq { .. })
    }

    /// Returns the read group if this sample still needs alignment
    pub fn read_group(&self) -> Option<&ReadGroup> {
        match &self.input {
            InputKind::PairedFastq { read_group, .. } => Some(read_group),
            InputKind::Alignment { .. } => None
        }
    }
}

/// A tumor/normal pair, or a single sample for germline-only processing
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunEntry {
    /// Position of the entry in the configuration
    index: usize,
    /// Tumor sample, if any
    tumor: Option<SampleUnit>,
    /// Normal sample, if any
    normal: Option<SampleUnit>
}

impl RunEntry {
    /// Constructor, returns None if there is no sample or if tumor and normal share a name.
    /// Sample names key every per-sample output path, so a pair must be distinguishable.
    /// # Arguments
    /// * `index` - position of the entry in the configured run list
    /// * `tumor` - optional tumor sample
    /// * `normal` - optional normal sample
    pub fn new(index: usize, tumor: Option<SampleUnit>, normal: Option<SampleUnit>) -> Option<Self> {
        match (tumor.as_ref(), normal.as_ref()) {
            (None, None) => return None,
            (Some(t), Some(n)) if t.name() == n.name() => return None,
            _ => {}
        };
        Some(Self {
            index,
            tumor,
            normal
        })
    }

    /// Identity key of the entry: (tumor, normal) names or the single sample name
    pub fn identity(&self) -> (Option<&str>, Option<&str>) {
        (
            self.tumor.as_ref().map(|s| s.name()),
            self.normal.as_ref().map(|s| s.name())
        )
    }

    /// Name used for node identifiers and the output sub-directory
    pub fn entry_id(&self) -> String {
        match (self.tumor.as_ref(), self.normal.as_ref()) {
            (Some(t), Some(n)) => format!("{}_vs_{}", t.name(), n.name()),
            (Some(s), None) |
            (None, Some(s)) => s.name().to_string(),
            (None, None) => unreachable!("checked in constructor")
        }
    }

    /// Returns the (tumor, normal) pair if both are present
    pub fn matched_pair(&self) -> Option<(&SampleUnit, &SampleUnit)> {
        match (self.tumor.as_ref(), self.normal.as_ref()) {
            (Some(t), Some(n)) => Some((t, n)),
            _ => None
        }
    }

    /// The sample used for germline calling: the normal if present, otherwise the only sample
    pub fn germline_sample(&self) -> &SampleUnit {
        match (self.normal.as_ref(), self.tumor.as_ref()) {
            (Some(n), _) => n,
            (None, Some(t)) => t,
            (None, None) => unreachable!("checked in constructor")
        }
    }

    /// All samples with their roles, tumor first
    pub fn samples(&self) -> Vec<(SampleRole, &SampleUnit)> {
        let mut ret = vec![];
        if let Some(t) = self.tumor.as_ref() {
            ret.push((SampleRole::Tumor, t));
        }
        if let Some(n) = self.normal.as_ref() {
            ret.push((SampleRole::Normal, n));
        }
        ret
    }

    // getters
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn tumor(&self) -> Option<&SampleUnit> {
        self.tumor.as_ref()
    }

    pub fn normal(&self) -> Option<&SampleUnit> {
        self.normal.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cram_sample(name: &str) -> SampleUnit {
        SampleUnit::new(name.to_string(), InputKind::Alignment {
            path: PathBuf::from(format!("/data/{name}.cram")),
            format: AlignmentFormat::Cram
        })
    }

    #[test]
    fn test_entry_ids() {
        let pair = RunEntry::new(0, Some(cram_sample("T1")), Some(cram_sample("N1"))).unwrap();
        assert_eq!(pair.entry_id(), "T1_vs_N1");
        assert_eq!(pair.identity(), (Some("T1"), Some("N1")));
        assert_eq!(pair.germline_sample().name(), "N1");
        assert!(pair.matched_pair().is_some());

        let single = RunEntry::new(1, Some(cram_sample("S1")), None).unwrap();
        assert_eq!(single.entry_id(), "S1");
        assert_eq!(single.germline_sample().name(), "S1");
        assert!(single.matched_pair().is_none());
    }

    #[test]
    fn test_invalid_entries() {
        assert!(RunEntry::new(0, None, None).is_none());
        assert!(RunEntry::new(0, Some(cram_sample("S1")), Some(cram_sample("S1"))).is_none());
        assert!(RunEntry::new(0, None, Some(cram_sample("S1"))).is_some());
    }

    #[test]
    fn test_alignment_format() {
        assert_eq!(AlignmentFormat::from_path(Path::new("a/b.cram")), Some(AlignmentFormat::Cram));
        assert_eq!(AlignmentFormat::from_path(Path::new("a/b.BAM")), Some(AlignmentFormat::Bam));
        assert_eq!(AlignmentFormat::from_path(Path::new("a/b.sam")), None);
        assert_eq!(AlignmentFormat::from_path(Path::new("a/b")), None);
    }

    #[test]
    fn test_read_group_header() {
        let rg = ReadGroup {
            id: "FC1.L1".to_string(),
            pu: "FC1.L1".to_string(),
            sm: "T1".to_string(),
            pl: DEFAULT_PLATFORM.to_string(),
            lb: "T1".to_string()
        };
        assert_eq!(rg.to_sam_header(), "@RG\\tID:FC1.L1\\tPU:FC1.L1\\tSM:T1\\tPL:ILLUMINA\\tLB:T1");
    }
}
