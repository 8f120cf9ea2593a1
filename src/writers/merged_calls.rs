
use anyhow::Context;
use itertools::Itertools;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

use crate::data_types::caller_result::{MergedCallSet, MergedContent};

/// One merged signature per row
#[derive(Serialize)]
struct VariantRow<'a> {
    chrom: &'a str,
    position: u64,
    variant_type: String,
    /// Number of distinct callers reporting the signature
    num_callers: usize,
    /// Comma separated caller list
    callers: String,
    /// Per-caller alleles, e.g. `somatic_snv_indel.gatk:A>C:PASS`
    alleles: String
}

/// One artifact per row, for classes that are not merged record by record
#[derive(Serialize)]
struct ArtifactRow<'a> {
    caller: String,
    artifact: &'a Path
}

/// Writes a merged call set as a TSV (or CSV if the filename ends in `.csv`). Missing parent folders are created.
/// # Arguments
/// * `merged_set` - the merged result of one run entry and analysis class
/// * `filename` - the output path
/// # Errors
/// * if the folder or file cannot be created
/// * if any row fails to serialize
pub fn write_merged_calls(merged_set: &MergedCallSet, filename: &Path) -> anyhow::Result<()> {
    if let Some(parent) = filename.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Error while creating folder {parent:?}:"))?;
    }

    let is_csv: bool = filename.extension().unwrap_or_default() == "csv";
    let delimiter: u8 = if is_csv { b',' } else { b'\t' };
    let mut csv_writer: csv::Writer<File> = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(filename)
        .with_context(|| format!("Error while creating {filename:?}:"))?;

    match merged_set.content() {
        MergedContent::Variants(calls) => {
            for call in calls.iter() {
                let alleles = call.support().iter()
                    .map(|s| format!(
                        "{}:{}>{}:{}",
                        s.caller, s.ref_allele, s.alt_allele, if s.is_pass { "PASS" } else { "FILTERED" }
                    ))
                    .join(";");
                let callers = call.callers();
                let row = VariantRow {
                    chrom: call.signature().chrom(),
                    position: call.signature().position(),
                    variant_type: call.signature().variant_type().to_string(),
                    num_callers: callers.len(),
                    callers: callers.iter().join(","),
                    alleles
                };
                csv_writer.serialize(&row)?;
            }
        },
        MergedContent::Artifacts(artifacts) => {
            for (caller, paths) in artifacts.iter() {
                for artifact in paths.iter() {
                    csv_writer.serialize(&ArtifactRow {
                        caller: caller.to_string(),
                        artifact
                    })?;
                }
            }
        }
    };

    csv_writer.flush()
        .with_context(|| format!("Error while flushing {filename:?}:"))?;
    Ok(())
}
