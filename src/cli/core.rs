
use anyhow::bail;
use clap::{Parser, Subcommand};
use chrono::Datelike;
use lazy_static::lazy_static;
use std::path::Path;

use crate::cli::init::InitSettings;
use crate::cli::run::RunSettings;

lazy_static! {
    /// Stores the full version string we plan to use, which is generated in build.rs
    /// # Examples
    /// * `0.1.0-6bb9635-dirty` - while on a dirty branch
    /// * `0.1.0-6bb9635` - with a fresh commit
    pub static ref FULL_VERSION: String = format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("VERGEN_GIT_DESCRIBE"));

    /// Shared after help string
    pub static ref AFTER_HELP: String = format!("Copyright (C) {}     vcline contributors
This program comes with ABSOLUTELY NO WARRANTY; it is intended for
Research Use Only and not for use in diagnostic procedures.", chrono::Utc::now().year());
}

#[derive(Parser)]
#[clap(author,
    version = &**FULL_VERSION,
    about,
    after_help = &**AFTER_HELP)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands
}

/// vcline, a variant calling pipeline driver for tumor/normal and germline sequencing data.
/// Select a subcommand to see more usage information:
#[derive(Subcommand)]
pub enum Commands {
    /// Writes a configuration YAML template
    Init(InitSettings),
    /// Runs the full analytical pipeline described by a configuration YAML
    Run(Box<RunSettings>),
    /// Runs only the reference preprocessing (indexes, dictionaries, call regions)
    Preprocess(Box<RunSettings>)
}

pub fn get_cli() -> Cli {
    Cli::parse()
}

/// Checks if a file exists and will otherwise exit
/// # Arguments
/// * `filename` - the file path to check for
/// * `label` - the label to use for error messages
pub fn check_required_filename(filename: &Path, label: &str) -> anyhow::Result<()> {
    if !filename.exists() {
        bail!("{} does not exist: \"{}\"", label, filename.display());
    }

    // file exists
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["vcline", "run", "--yml", "my.yml", "--workers", "3", "--skip-cleaning", "-vv"]).unwrap();
        match cli.command {
            Commands::Run(settings) => {
                assert_eq!(settings.yml, Path::new("my.yml"));
                assert_eq!(settings.workers, 3);
                assert!(settings.skip_cleaning);
                assert!(!settings.dry_run);
                assert_eq!(settings.verbosity, 2);
            },
            _ => panic!("expected run")
        };

        let cli = Cli::try_parse_from(["vcline", "init"]).unwrap();
        match cli.command {
            Commands::Init(settings) => assert_eq!(settings.yml, Path::new("vcline.yml")),
            _ => panic!("expected init")
        };

        assert!(Cli::try_parse_from(["vcline", "download-resources"]).is_err());
    }

    #[test]
    fn test_check_required_filename() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(check_required_filename(temp_dir.path(), "Folder").is_ok());
        assert!(check_required_filename(&temp_dir.path().join("missing.yml"), "Configuration").is_err());
    }
}
