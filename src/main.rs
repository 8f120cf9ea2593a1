
use log::{LevelFilter, error, info, warn};
use std::time::Instant;

use vcline::cli::core::{Commands, get_cli};
use vcline::cli::init::{InitSettings, check_init_settings};
use vcline::cli::run::{RunSettings, check_run_settings};
use vcline::graph_builder::GraphConfigBuilder;
use vcline::parsing::caller_vcf::NoodlesVariantSource;
use vcline::parsing::run_config::{RunConfig, CONFIG_TEMPLATE};
use vcline::pipeline::{execute_pipeline, plan_pipeline};
use vcline::scheduler::SchedulerConfigBuilder;
use vcline::tool_adapter::{CancelToken, ProcessInvoker};
use vcline::util::json_io::save_json;
use vcline::writers::run_summary::write_run_summary;

/// Folder under the destination that holds tool logs
const LOG_FOLDER: &str = "log";
/// File name of the dumped stage graph
const STAGE_GRAPH_FILENAME: &str = "stage_graph.json";

fn init_logging(verbosity: u8) {
    let filter_level: LevelFilter = match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace
    };
    env_logger::builder()
        .format_timestamp_millis()
        .filter_level(filter_level)
        .init();
}

/// Fires the cancel token on Ctrl-C; the listener lives on its own thread with a small tokio runtime
fn spawn_ctrl_c_listener(cancel: CancelToken) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            warn!("Error while building signal runtime, Ctrl-C will not stop stages cleanly: {e}");
            return;
        }
    };
    std::thread::spawn(move || {
        runtime.block_on(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("Received Ctrl-C, stopping running stages...");
                    cancel.cancel();
                },
                Err(e) => warn!("Error while listening for Ctrl-C: {e}")
            };
        });
    });
}

fn run_init(settings: InitSettings) {
    init_logging(settings.verbosity);

    let settings = match check_init_settings(settings) {
        Ok(s) => s,
        Err(e) => {
            error!("Error while verifying settings: {e:#}");
            std::process::exit(exitcode::CONFIG);
        }
    };

    info!("Writing configuration template to {:?}...", settings.yml);
    if let Err(e) = std::fs::write(&settings.yml, CONFIG_TEMPLATE) {
        error!("Error while writing configuration template: {e}");
        std::process::exit(exitcode::IOERR);
    }
}

fn run_pipeline(settings: RunSettings, reference_only: bool) {
    // start the timer
    let start_time = Instant::now();

    // set up logging before we check the other settings
    init_logging(settings.verbosity);

    let sub_command = if reference_only { "preprocess" } else { "run" };
    let settings = match check_run_settings(settings, sub_command) {
        Ok(s) => s,
        Err(e) => {
            error!("Error while verifying settings: {e:#}");
            std::process::exit(exitcode::CONFIG);
        }
    };

    info!("Loading configuration from {:?}...", settings.yml);
    let run_config = match RunConfig::from_yaml_file(&settings.yml) {
        Ok(rc) => rc,
        Err(e) => {
            error!("Error while loading configuration: {e}");
            std::process::exit(exitcode::CONFIG);
        }
    };

    let graph_config = match GraphConfigBuilder::default()
        .dest_dir(settings.dest_dir.clone())
        .threads(settings.total_threads())
        .workers(settings.workers)
        .memory_mb(settings.memory_mb)
        .reference_only(reference_only)
        .build() {
        Ok(gc) => gc,
        Err(e) => {
            error!("Error while building graph config: {e:?}");
            std::process::exit(exitcode::SOFTWARE);
        }
    };

    let plan = match plan_pipeline(&run_config, &graph_config) {
        Ok(p) => p,
        Err(e) => {
            error!("Error while planning the run: {e}");
            std::process::exit(exitcode::CONFIG);
        }
    };

    // create the primary output folder
    info!("Creating output folder at {:?}...", settings.dest_dir);
    if let Err(e) = std::fs::create_dir_all(&settings.dest_dir) {
        error!("Error while creating output folder: {e}");
        std::process::exit(exitcode::IOERR);
    }

    // save the CLI options and the graph
    let cli_json = settings.dest_dir.join("cli_settings.json");
    info!("Saving CLI options to {cli_json:?}...");
    if let Err(e) = save_json(&settings, &cli_json) {
        error!("Error while saving CLI options: {e:#}");
        std::process::exit(exitcode::IOERR);
    }

    let graph_json = settings.dest_dir.join(STAGE_GRAPH_FILENAME);
    info!("Saving stage graph to {graph_json:?}...");
    if let Err(e) = save_json(plan.graph(), &graph_json) {
        error!("Error while saving stage graph: {e:#}");
        std::process::exit(exitcode::IOERR);
    }

    if settings.dry_run {
        info!("Dry run requested, no stages were executed.");
        return;
    }

    let scheduler_config = match SchedulerConfigBuilder::default()
        .workers(settings.workers)
        .max_retries(settings.max_retries)
        .skip_cleaning(settings.skip_cleaning)
        .show_progress(!settings.no_progress)
        .build() {
        Ok(sc) => sc,
        Err(e) => {
            error!("Error while building scheduler config: {e:?}");
            std::process::exit(exitcode::SOFTWARE);
        }
    };

    let cancel = CancelToken::new();
    spawn_ctrl_c_listener(cancel.clone());

    let invoker = ProcessInvoker::new(settings.dest_dir.join(LOG_FOLDER));
    info!("Running {} stages with {} worker(s)...", plan.graph().len(), settings.workers);
    let report = match execute_pipeline(&plan, scheduler_config, &invoker, &NoodlesVariantSource, &cancel) {
        Ok(r) => r,
        Err(e) => {
            error!("Error while running the pipeline: {e:#}");
            std::process::exit(exitcode::SOFTWARE);
        }
    };

    if let Err(e) = write_run_summary(&report, &settings.dest_dir) {
        error!("Error while saving run summary: {e:#}");
        std::process::exit(exitcode::IOERR);
    }

    for entry in report.entries.iter() {
        info!("{}: {} ({} unfinished stage(s))", entry.entry_id, entry.status, entry.unfinished_stages());
        for merged in entry.merged.iter() {
            info!("\t{}: {} record(s) from {} caller(s)", merged.analysis_class, merged.records, merged.contributing_callers.len());
        }
    }

    if report.has_failures() {
        error!(
            "Run finished with failures after {:.1} seconds: {} of {} run entries failed{}",
            start_time.elapsed().as_secs_f64(),
            report.failed_entries(),
            report.entries.len(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        std::process::exit(exitcode::SOFTWARE);
    }
    info!("Run completed in {:.1} seconds.", start_time.elapsed().as_secs_f64());
}

fn main() {
    let cli = get_cli();
    match cli.command {
        Commands::Init(settings) => {
            run_init(settings);
        },
        Commands::Run(settings) => {
            run_pipeline(*settings, false);
        },
        Commands::Preprocess(settings) => {
            run_pipeline(*settings, true);
        }
    }

    info!("Process finished successfully.");
}
