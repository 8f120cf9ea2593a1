
use anyhow::bail;
use clap::Args;
use log::info;
use std::path::PathBuf;

use crate::cli::core::{AFTER_HELP, FULL_VERSION};

#[derive(Args, Clone, Debug, Default)]
#[clap(author, about,
    after_help = &**AFTER_HELP
)]
pub struct InitSettings {
    /// Path of the configuration YAML to create
    #[clap(long = "yml")]
    #[clap(value_name = "YAML")]
    #[clap(default_value = "vcline.yml")]
    #[clap(help_heading = Some("Input/Output"))]
    pub yml: PathBuf,

    /// Overwrites an existing file
    #[clap(long = "force")]
    #[clap(help_heading = Some("Input/Output"))]
    pub force: bool,

    /// Enable verbose output.
    #[clap(short = 'v')]
    #[clap(long = "verbose")]
    #[clap(action = clap::ArgAction::Count)]
    pub verbosity: u8
}

pub fn check_init_settings(settings: InitSettings) -> anyhow::Result<InitSettings> {
    info!("vcline version: {:?}", &*FULL_VERSION);
    info!("Sub-command: init");
    if settings.yml.exists() && !settings.force {
        bail!("{:?} already exists, use --force to overwrite it", settings.yml);
    }
    info!("\tConfiguration: {:?}", settings.yml);
    Ok(settings)
}
