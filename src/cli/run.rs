
use anyhow::ensure;
use clap::Args;
use log::info;
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::core::{check_required_filename, AFTER_HELP, FULL_VERSION};

#[derive(Args, Clone, Debug, Default, Serialize)]
#[clap(author, about,
    after_help = &**AFTER_HELP
)]
pub struct RunSettings {
    #[clap(default_value = "")]
    #[clap(hide = true)]
    vcline_version: String,

    /// Configuration YAML describing the run
    #[clap(long = "yml")]
    #[clap(value_name = "YAML")]
    #[clap(default_value = "vcline.yml")]
    #[clap(help_heading = Some("Input/Output"))]
    pub yml: PathBuf,

    /// Output folder
    #[clap(long = "dest-dir")]
    #[clap(value_name = "DIR")]
    #[clap(default_value = ".")]
    #[clap(help_heading = Some("Input/Output"))]
    pub dest_dir: PathBuf,

    /// Only writes the stage graph (JSON) to the output folder without running anything
    #[clap(long = "dry-run")]
    #[clap(help_heading = Some("Input/Output"))]
    pub dry_run: bool,

    /// Total number of CPU threads shared by all workers [default: all available]
    #[clap(long = "threads")]
    #[clap(value_name = "THREADS")]
    #[clap(help_heading = Some("Resources"))]
    pub threads: Option<usize>,

    /// Maximum number of stages that run at the same time
    #[clap(long = "workers")]
    #[clap(value_name = "WORKERS")]
    #[clap(default_value = "1")]
    #[clap(help_heading = Some("Resources"))]
    pub workers: usize,

    /// Java heap (MB) given to each GATK stage; 0 leaves the JVM default
    #[clap(long = "memory-mb")]
    #[clap(value_name = "MB")]
    #[clap(default_value = "0")]
    #[clap(help_heading = Some("Resources"))]
    pub memory_mb: u64,

    /// Extra attempts for stages that fail with a transient error
    #[clap(long = "max-retries")]
    #[clap(value_name = "N")]
    #[clap(default_value = "2")]
    #[clap(help_heading = Some("Execution"))]
    pub max_retries: usize,

    /// Keeps incomplete outputs of failed stages
    #[clap(long = "skip-cleaning")]
    #[clap(help_heading = Some("Execution"))]
    pub skip_cleaning: bool,

    /// Hides the progress bar
    #[clap(long = "no-progress")]
    #[clap(help_heading = Some("Execution"))]
    pub no_progress: bool,

    /// Enable verbose output.
    #[clap(short = 'v')]
    #[clap(long = "verbose")]
    #[clap(action = clap::ArgAction::Count)]
    pub verbosity: u8
}

impl RunSettings {
    /// Resolved thread count; only valid after `check_run_settings`
    pub fn total_threads(&self) -> usize {
        self.threads.unwrap_or(1)
    }
}

/// Validates the run settings and fills in defaults that depend on the machine
/// # Arguments
/// * `settings` - the parsed settings
/// * `sub_command` - label for logging
/// # Errors
/// * if the configuration file does not exist
/// * if the thread or worker counts are 0
pub fn check_run_settings(mut settings: RunSettings, sub_command: &str) -> anyhow::Result<RunSettings> {
    // hard code the version in
    settings.vcline_version = FULL_VERSION.clone();
    info!("vcline version: {:?}", &settings.vcline_version);
    info!("Sub-command: {sub_command}");
    info!("Inputs:");

    check_required_filename(&settings.yml, "Configuration YAML")?;
    info!("\tConfiguration: {:?}", settings.yml);

    info!("Outputs:");
    info!("\tDestination: {:?}", settings.dest_dir);
    if settings.dry_run {
        info!("\tDry run: stage graph only");
    }

    info!("Resources:");
    let threads = match settings.threads {
        Some(t) => t,
        None => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    };
    ensure!(threads > 0, "--threads must be greater than 0");
    settings.threads = Some(threads);
    info!("\tThreads: {threads}");

    ensure!(settings.workers > 0, "--workers must be greater than 0");
    info!("\tWorkers: {}", settings.workers);
    if settings.workers > threads {
        info!("\tWorkers exceed threads, each stage gets a single thread");
    }
    if settings.memory_mb > 0 {
        info!("\tMemory per GATK stage: {} MB", settings.memory_mb);
    } else {
        info!("\tMemory per GATK stage: JVM default");
    }

    info!("Execution:");
    info!("\tMax retries: {}", settings.max_retries);
    info!("\tSkip cleaning: {}", settings.skip_cleaning);

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_run_settings() {
        let temp_dir = tempfile::tempdir().unwrap();
        let yml = temp_dir.path().join("vcline.yml");
        let settings = RunSettings {
            yml: yml.clone(),
            workers: 2,
            ..Default::default()
        };

        // missing configuration
        assert!(check_run_settings(settings.clone(), "run").is_err());

        std::fs::write(&yml, "").unwrap();
        let checked = check_run_settings(settings.clone(), "run").unwrap();
        assert!(checked.total_threads() >= 1);
        assert_eq!(checked.vcline_version, *FULL_VERSION);

        let explicit = check_run_settings(RunSettings { threads: Some(6), ..settings.clone() }, "run").unwrap();
        assert_eq!(explicit.total_threads(), 6);

        assert!(check_run_settings(RunSettings { workers: 0, ..settings.clone() }, "run").is_err());
        assert!(check_run_settings(RunSettings { threads: Some(0), ..settings }, "run").is_err());
    }
}
