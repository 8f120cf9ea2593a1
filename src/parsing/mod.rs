/*!
# Parsing module
Contains the logic for parsing input files into meaningful structs / data.
*/
/// Loads caller VCF/BCF outputs through noodles
pub mod caller_vcf;
/// Loads and validates the YAML run configuration
pub mod run_config;
/// Normalizes raw run entries into samples
pub mod sample_resolver;
