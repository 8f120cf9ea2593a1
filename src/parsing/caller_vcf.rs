
use anyhow::{Context, anyhow};
use log::{debug, trace};
use noodles::vcf;
use noodles::vcf::variant::record_buf::info::field::Value as InfoValue;
use noodles_util::variant::io::reader::Builder as VariantReaderBuilder;
use std::path::Path;

use crate::aggregator::VariantSource;
use crate::data_types::caller_result::VariantCall;

/// Loads call artifacts with noodles; VCF, bgzipped VCF, and BCF are detected automatically
#[derive(Clone, Copy, Debug, Default)]
pub struct NoodlesVariantSource;

impl VariantSource for NoodlesVariantSource {
    fn load_calls(&self, path: &Path) -> anyhow::Result<Vec<VariantCall>> {
        load_variant_calls(path)
    }
}

/// Reads every record of a caller output and splits multi-ALT records into one call per ALT.
/// Records without an ALT allele are ignored.
/// # Arguments
/// * `filename` - the VCF(.gz) or BCF to load
/// # Errors
/// * if the file cannot be opened or the header cannot be read
/// * if any record fails to parse
pub fn load_variant_calls(filename: &Path) -> anyhow::Result<Vec<VariantCall>> {
    debug!("Loading calls from {filename:?}...");
    #[allow(clippy::default_constructed_unit_structs)]
    let mut reader = VariantReaderBuilder::default()
        .build_from_path(filename)
        .with_context(|| format!("Error while opening {filename:?}:"))?;
    let header = reader.read_header()
        .with_context(|| format!("Error while reading header of {filename:?}:"))?;

    let mut ret = vec![];
    for result in reader.records(&header) {
        let record: Box<dyn vcf::variant::Record> = result
            .with_context(|| format!("Error while reading record from {filename:?}:"))?;
        let record_buf = vcf::variant::RecordBuf::try_from_variant_record(&header, record.as_ref())
            .with_context(|| format!("Error while parsing record from {filename:?}:"))?;
        ret.extend(parse_calls(&record_buf)?);
    }
    debug!("Loaded {} calls from {filename:?}", ret.len());
    Ok(ret)
}

/// Converts one record into a call per ALT allele
fn parse_calls(record: &vcf::variant::RecordBuf) -> anyhow::Result<Vec<VariantCall>> {
    let chrom = record.reference_sequence_name();
    let position = record.variant_start()
        .ok_or(anyhow!("Missing POS in record at {chrom}"))?
        .get() as u64; // 1-based
    let ref_allele = record.reference_bases();
    let sv_type = match record.info().get("SVTYPE") {
        Some(Some(InfoValue::String(s))) => Some(s.as_str()),
        _ => None
    };

    // no FILTER value is treated the same as PASS, unfiltered callers leave it empty
    let filters = record.filters().as_ref();
    let is_pass = filters.is_empty() || filters.iter().all(|f| f == "PASS");

    let ret: Vec<VariantCall> = record.alternate_bases().as_ref().iter()
        .map(|alt| VariantCall::new(chrom, position, ref_allele.to_string(), alt.clone(), sv_type, is_pass))
        .collect();
    trace!("{chrom}\t{position}\t{ref_allele}\t{:?}", record.alternate_bases().as_ref());
    Ok(ret)
}
