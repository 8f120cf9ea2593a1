
/// Merges the outputs of several callers per run entry and analysis class
pub mod aggregator;
/// Command line interface functionality
pub mod cli;
/// Contains various shared data types
pub mod data_types;
/// Builds the DAG of stages from the configuration and resolved samples
pub mod graph_builder;
/// Tooling for parsing input files into meaningful structs / data
pub mod parsing;
/// Planning, execution, and aggregation of one full run
pub mod pipeline;
/// Executes a stage graph with a bounded worker pool
pub mod scheduler;
/// Uniform interface for running external tools
pub mod tool_adapter;
/// Various utility functions that tend to be very generic
pub mod util;
/// All output writers
pub mod writers;
