/*!
# Writers module
Contains the logic for writing the run outputs: merged call tables and the final run summary.
*/
/// Writes merged call sets as TSV
pub mod merged_calls;
/// Writes the per-stage run summary (TSV + JSON)
pub mod run_summary;
