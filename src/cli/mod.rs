/*!
# CLI module
Command line interface functionality that is specific to vcline.
*/

/// The main CLI module that contains the top-level CLI parser and help text
pub mod core;
/// The init CLI subcommand
pub mod init;
/// The run and preprocess CLI subcommands
pub mod run;
