/*!
# Aggregator
Combines the outputs of every caller that answered the same question for one run entry.

Variant classes are merged into a union keyed by [`VariantSignature`], where each signature keeps the REF/ALT that every supporting caller reported.
Segment and score classes (CNV, MSI) have no shared record format, so only the artifacts are collected with their provenance.
The result is deterministic and does not depend on the order callers finished in.

## Example usage
```rust
use std::path::{Path, PathBuf};
use vcline::aggregator::{VariantSource, aggregate_caller_results};
use vcline::data_types::caller_result::{CallerResult, VariantCall};
use vcline::data_types::callers::{AnalysisClass, Caller};

struct Fixed;
impl VariantSource for Fixed {
    fn load_calls(&self, path: &Path) -> anyhow::Result<Vec<VariantCall>> {
        let alt = if path.ends_with("a.vcf") { "C" } else { "G" };
        Ok(vec![VariantCall::new("chr1", 100, "A".to_string(), alt.to_string(), None, true)])
    }
}

let mut result = CallerResult::new("T_vs_N".to_string(), AnalysisClass::SomaticSnvIndel);
result.add_success(Caller::SomaticSnvIndelGatk, vec![PathBuf::from("a.vcf")]);
result.add_success(Caller::SomaticSnvIndelStrelka, vec![PathBuf::from("b.vcf")]);
let merged = aggregate_caller_results(&result, &Fixed).unwrap();
// both callers report an SNV at chr1:100, so they share a signature
assert_eq!(merged.len(), 1);
assert_eq!(merged.contributing_callers().len(), 2);
```
*/
use log::{debug, info};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::data_types::caller_result::{CallerResult, CallerSupport, MergedCall, MergedCallSet, MergedContent, VariantCall, VariantSignature};
use crate::data_types::callers::{Caller, MergePolicy};

/// Loads the calls of one call artifact
pub trait VariantSource {
    /// Returns every call in the artifact
    /// # Errors
    /// * if the artifact cannot be read or parsed
    fn load_calls(&self, path: &Path) -> anyhow::Result<Vec<VariantCall>>;
}

#[derive(thiserror::Error, Debug)]
pub enum AggregationError {
    #[error("no caller succeeded for {entry_id} / {analysis_class}")]
    NoContributingCallers { entry_id: String, analysis_class: String },
    #[error("caller result for {entry_id} has no analysis class")]
    MissingAnalysisClass { entry_id: String },
    #[error("failed to load {caller} calls from {path:?}: {message}")]
    LoadFailure { caller: Caller, path: PathBuf, message: String }
}

/// Merges the caller outputs of one run entry and analysis class.
/// # Arguments
/// * `caller_result` - what each enabled caller produced
/// * `source` - used to read call artifacts for variant classes
/// # Errors
/// * if no enabled caller succeeded
/// * if any call artifact cannot be loaded
pub fn aggregate_caller_results(caller_result: &CallerResult, source: &dyn VariantSource) -> Result<MergedCallSet, AggregationError> {
    let entry_id = caller_result.entry_id().to_string();
    let analysis_class = caller_result.analysis_class()
        .ok_or_else(|| AggregationError::MissingAnalysisClass { entry_id: entry_id.clone() })?;

    if caller_result.artifacts().is_empty() {
        return Err(AggregationError::NoContributingCallers {
            entry_id,
            analysis_class: analysis_class.to_string()
        });
    }

    // BTreeMap keys are already sorted
    let contributing: Vec<Caller> = caller_result.artifacts().keys().copied().collect();
    let missing: Vec<Caller> = caller_result.failed_callers().to_vec();

    let content = match analysis_class.merge_policy() {
        MergePolicy::VariantUnion => MergedContent::Variants(variant_union(caller_result.artifacts(), source)?),
        MergePolicy::ArtifactUnion => MergedContent::Artifacts(caller_result.artifacts().clone())
    };

    let merged = MergedCallSet::new(entry_id, analysis_class, contributing, missing, content);
    info!(
        "{} / {}: merged {} record(s) from {} caller(s)",
        merged.entry_id(), analysis_class, merged.len(), merged.contributing_callers().len()
    );
    Ok(merged)
}

/// Unions every call of every caller by signature
fn variant_union(artifacts: &BTreeMap<Caller, Vec<PathBuf>>, source: &dyn VariantSource) -> Result<Vec<MergedCall>, AggregationError> {
    let mut union: BTreeMap<VariantSignature, Vec<CallerSupport>> = Default::default();
    for (&caller, paths) in artifacts.iter() {
        for path in paths.iter() {
            let calls = source.load_calls(path)
                .map_err(|e| AggregationError::LoadFailure {
                    caller,
                    path: path.clone(),
                    message: format!("{e:#}")
                })?;
            debug!("{caller}: {} calls in {path:?}", calls.len());

            for call in calls.into_iter() {
                let support = CallerSupport {
                    caller,
                    ref_allele: call.ref_allele().to_string(),
                    alt_allele: call.alt_allele().to_string(),
                    is_pass: call.is_pass()
                };
                union.entry(call.signature().clone()).or_default().push(support);
            }
        }
    }

    let merged = union.into_iter()
        .map(|(signature, mut support)| {
            support.sort_by(|a, b| {
                (a.caller, &a.ref_allele, &a.alt_allele, a.is_pass).cmp(&(b.caller, &b.ref_allele, &b.alt_allele, b.is_pass))
            });
            support.dedup();
            MergedCall::new(signature, support)
        })
        .collect();
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::caller_result::VariantType;
    use crate::data_types::callers::AnalysisClass;
    use std::collections::HashMap;

    /// Serves pre-defined calls by path
    #[derive(Default)]
    struct MockSource {
        calls: HashMap<PathBuf, Vec<VariantCall>>
    }

    impl MockSource {
        fn with(mut self, path: &str, calls: Vec<VariantCall>) -> Self {
            self.calls.insert(PathBuf::from(path), calls);
            self
        }
    }

    impl VariantSource for MockSource {
        fn load_calls(&self, path: &Path) -> anyhow::Result<Vec<VariantCall>> {
            self.calls.get(path)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such file"))
        }
    }

    fn snv(chrom: &str, position: u64, alt: &str) -> VariantCall {
        VariantCall::new(chrom, position, "A".to_string(), alt.to_string(), None, true)
    }

    fn merged_calls(merged: &MergedCallSet) -> &[MergedCall] {
        match merged.content() {
            MergedContent::Variants(calls) => calls,
            MergedContent::Artifacts(_) => panic!("expected variants")
        }
    }

    #[test]
    fn test_disjoint_union() {
        let source = MockSource::default()
            .with("gatk.vcf", vec![snv("chr1", 100, "C"), snv("chr1", 200, "G")])
            .with("strelka.vcf", vec![snv("chr2", 50, "T"), snv("chr3", 10, "C"), snv("chr3", 20, "C")]);
        let mut result = CallerResult::new("T_vs_N".to_string(), AnalysisClass::SomaticSnvIndel);
        result.add_success(Caller::SomaticSnvIndelStrelka, vec![PathBuf::from("strelka.vcf")]);
        result.add_success(Caller::SomaticSnvIndelGatk, vec![PathBuf::from("gatk.vcf")]);

        let merged = aggregate_caller_results(&result, &source).unwrap();
        assert_eq!(merged.len(), 5);
        assert_eq!(merged.contributing_callers(), &[Caller::SomaticSnvIndelGatk, Caller::SomaticSnvIndelStrelka]);
        assert!(merged.missing_callers().is_empty());

        let calls = merged_calls(&merged);
        // sorted by normalized signature
        assert_eq!(calls[0].signature(), &VariantSignature::new("1", 100, VariantType::Snv));
        assert_eq!(calls[0].callers(), vec![Caller::SomaticSnvIndelGatk]);
        assert_eq!(calls[2].signature().chrom(), "2");
        assert_eq!(calls[2].callers(), vec![Caller::SomaticSnvIndelStrelka]);
        assert!(calls.iter().all(|c| c.support().len() == 1));
    }

    #[test]
    fn test_shared_signature_keeps_both_alleles() {
        // same position and type, different ALT and chromosome naming
        let source = MockSource::default()
            .with("gatk.vcf", vec![snv("chr1", 100, "C")])
            .with("strelka.vcf", vec![snv("1", 100, "G")]);
        let mut result = CallerResult::new("T_vs_N".to_string(), AnalysisClass::SomaticSnvIndel);
        result.add_success(Caller::SomaticSnvIndelGatk, vec![PathBuf::from("gatk.vcf")]);
        result.add_success(Caller::SomaticSnvIndelStrelka, vec![PathBuf::from("strelka.vcf")]);

        let merged = aggregate_caller_results(&result, &source).unwrap();
        assert_eq!(merged.len(), 1);
        let call = &merged_calls(&merged)[0];
        assert_eq!(call.callers(), vec![Caller::SomaticSnvIndelGatk, Caller::SomaticSnvIndelStrelka]);
        assert_eq!(call.support()[0].alt_allele, "C");
        assert_eq!(call.support()[1].alt_allele, "G");
    }

    #[test]
    fn test_order_independence() {
        let source = MockSource::default()
            .with("a.vcf", vec![snv("chr1", 100, "C"), snv("chr1", 5, "G")])
            .with("b.vcf", vec![snv("chr1", 100, "C")]);

        let mut first = CallerResult::new("S".to_string(), AnalysisClass::GermlineSnvIndel);
        first.add_success(Caller::GermlineSnvIndelGatk, vec![PathBuf::from("a.vcf")]);
        first.add_success(Caller::GermlineSnvIndelStrelka, vec![PathBuf::from("b.vcf")]);
        let mut second = CallerResult::new("S".to_string(), AnalysisClass::GermlineSnvIndel);
        second.add_success(Caller::GermlineSnvIndelStrelka, vec![PathBuf::from("b.vcf")]);
        second.add_success(Caller::GermlineSnvIndelGatk, vec![PathBuf::from("a.vcf")]);

        assert_eq!(
            aggregate_caller_results(&first, &source).unwrap(),
            aggregate_caller_results(&second, &source).unwrap()
        );
    }

    #[test]
    fn test_artifact_union() {
        let mut result = CallerResult::new("T_vs_N".to_string(), AnalysisClass::SomaticCnv);
        result.add_success(Caller::SomaticCnvCnvkit, vec![PathBuf::from("t.call.cns"), PathBuf::from("t.cns")]);
        result.add_failure(Caller::SomaticCnvGatk);

        // nothing is loaded for segment classes
        let merged = aggregate_caller_results(&result, &MockSource::default()).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.contributing_callers(), &[Caller::SomaticCnvCnvkit]);
        assert_eq!(merged.missing_callers(), &[Caller::SomaticCnvGatk]);
        assert!(matches!(merged.content(), MergedContent::Artifacts(_)));
    }

    #[test]
    fn test_aggregation_errors() {
        let mut result = CallerResult::new("T_vs_N".to_string(), AnalysisClass::SomaticSv);
        result.add_failure(Caller::SomaticSvManta);
        assert!(matches!(
            aggregate_caller_results(&result, &MockSource::default()),
            Err(AggregationError::NoContributingCallers { .. })
        ));

        result.add_success(Caller::SomaticSvDelly, vec![PathBuf::from("missing.bcf")]);
        let error = aggregate_caller_results(&result, &MockSource::default()).unwrap_err();
        assert!(matches!(error, AggregationError::LoadFailure { caller: Caller::SomaticSvDelly, .. }));
    }
}
