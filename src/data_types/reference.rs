
use serde::{Deserialize, Serialize};
use strum_macros::EnumString;

/// Supported genome builds, each build accepts both the UCSC and NCBI spelling
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize, strum_macros::Display, EnumString)]
pub enum ReferenceVersion {
    #[default]
    #[strum(ascii_case_insensitive, to_string = "hg38", serialize = "GRCh38")]
    #[serde(rename = "hg38")]
    Hg38,
    #[strum(ascii_case_insensitive, to_string = "hg19", serialize = "GRCh37")]
    #[serde(rename = "hg19")]
    Hg19
}

impl ReferenceVersion {
    /// UCSC build name, used by Funcotator
    pub fn ucsc_name(&self) -> &'static str {
        match self {
            ReferenceVersion::Hg38 => "hg38",
            ReferenceVersion::Hg19 => "hg19"
        }
    }

    /// NCBI build name, used by VEP
    pub fn ncbi_name(&self) -> &'static str {
        match self {
            ReferenceVersion::Hg38 => "GRCh38",
            ReferenceVersion::Hg19 => "GRCh37"
        }
    }

    /// Default SnpEff database for the build
    pub fn snpeff_genome(&self) -> &'static str {
        match self {
            ReferenceVersion::Hg38 => "GRCh38.99",
            ReferenceVersion::Hg19 => "GRCh37.75"
        }
    }
}
