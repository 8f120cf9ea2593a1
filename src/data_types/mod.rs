/// Caller results before and after aggregation
pub mod caller_result;
/// Closed sets of callers, collectors, annotators, and resources
pub mod callers;
/// Supported reference genome builds
pub mod reference;
/// Samples and run entries
pub mod sample;
/// Nodes of the stage graph and their tool invocations
pub mod stage_node;
