//! Agent command - connect to a job queue and process rendering jobs.
//!
//! The process started by the user is the supervisor. It re-executes itself
//! with the hidden `--worker` flag once per worker; each worker polls the
//! queue on its own.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tileseed::agent::{
    available_cpus, worker_count, HttpQueueClient, Supervisor, Worker, WorkerCommand,
    WorkerConfig, WORKER_FLAG,
};
use tileseed::config::{ConfigFile, AGENT_CONCURRENCY_CHOICES};
use tileseed::job::{JobServices, ReportTiming};
use tileseed::logging::default_log_dir;
use tileseed::render::PngTileEncoder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::common::{parse_ratio, resolve_store, GlobalArgs};
use crate::error::CliError;
use crate::runner::{load_config, CliRunner};

/// Arguments for the agent command.
#[derive(Debug, Args)]
pub struct AgentArgs {
    /// URL of the job queue [default: from config, http://localhost:7081]
    #[arg(short, long, help_heading = "Agent options")]
    pub queue_url: Option<String>,

    /// Store directory
    #[arg(short, long, help_heading = "Agent options")]
    pub store: Option<PathBuf>,

    /// Image pixel ratio
    #[arg(short, long, value_parser = parse_ratio, help_heading = "Agent options")]
    pub ratio: Option<u32>,

    /// Number of jobs processed concurrently (max: number of CPU cores - 1)
    #[arg(short, long, value_parser = parse_concurrency, help_heading = "Agent options")]
    pub concurrency: Option<usize>,

    /// Log to file instead of stdout
    #[arg(short, long, help_heading = "Agent options")]
    pub file_log: bool,

    /// External renderer command line [default: from config]
    #[arg(long, help_heading = "Agent options")]
    pub renderer: Option<String>,

    /// Run as a worker process of a supervising agent
    #[arg(long, hide = true)]
    pub worker: bool,
}

/// Agent settings after merging CLI values over the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub queue_url: String,
    pub store: PathBuf,
    pub ratio: u32,
    pub concurrency: usize,
    pub log_dir: Option<PathBuf>,
}

impl AgentArgs {
    /// Resolve settings: CLI > config.
    pub fn resolve(&self, config: &ConfigFile) -> AgentSettings {
        let store = resolve_store(self.store.clone(), config);
        let log_dir = self.file_log.then(|| {
            config
                .logging
                .directory
                .clone()
                .unwrap_or_else(|| default_log_dir(&store))
        });

        AgentSettings {
            queue_url: self
                .queue_url
                .clone()
                .unwrap_or_else(|| config.agent.queue_url.clone())
                .trim_end_matches('/')
                .to_string(),
            ratio: self.ratio.unwrap_or(config.agent.ratio),
            concurrency: self.concurrency.unwrap_or(config.agent.concurrency),
            store,
            log_dir,
        }
    }
}

/// Run the agent command.
pub fn run(globals: &GlobalArgs, args: AgentArgs) -> Result<(), CliError> {
    let config = load_config(globals)?;
    let settings = args.resolve(&config);
    let runner = CliRunner::with_config(globals, config, settings.log_dir.clone())?;

    let cancel = CancellationToken::new();
    let handler_cancel = cancel.clone();
    ctrlc::set_handler(move || handler_cancel.cancel())
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let runtime = runner.runtime()?;
    if args.worker {
        runtime.block_on(run_worker(&runner, &args, &settings, cancel))
    } else {
        runner.log_startup("agent");
        runtime.block_on(run_supervisor(&settings, cancel))
    }
}

async fn run_supervisor(settings: &AgentSettings, cancel: CancellationToken) -> Result<(), CliError> {
    let workers = worker_count(available_cpus(), settings.concurrency);
    let worker_args = std::env::args()
        .skip(1)
        .chain(std::iter::once(WORKER_FLAG.to_string()))
        .collect();

    let supervisor = Supervisor::new(WorkerCommand::current_exe(worker_args)?, workers, cancel);
    let stats = supervisor.run().await?;

    info!(
        started = stats.started,
        restarts = stats.restarts,
        "All workers stopped"
    );
    Ok(())
}

async fn run_worker(
    runner: &CliRunner,
    args: &AgentArgs,
    settings: &AgentSettings,
    cancel: CancellationToken,
) -> Result<(), CliError> {
    let agent = &runner.config().agent;

    let queue = HttpQueueClient::new(&settings.queue_url, &agent.worker_id)
        .map_err(tileseed::agent::AgentError::from)?;

    let timing = ReportTiming::for_verbosity(runner.verbosity())
        .with_progress_interval(agent.progress_interval());
    let services = JobServices::new(
        runner.renderer(args.renderer.as_deref())?,
        Arc::new(PngTileEncoder::new()),
    )
    .with_cancel(cancel)
    .with_timing(timing);

    let config = WorkerConfig::new(&settings.store)
        .with_ratio(settings.ratio)
        .with_tile_concurrency(agent.tile_concurrency)
        .with_poll_interval(agent.poll_interval());

    let mut worker = Worker::new(Arc::new(queue), config, services);
    let stats = worker.run().await;

    if stats.failed > 0 {
        error!(
            jobs = stats.jobs,
            failed = stats.failed,
            "Worker finished with failed jobs"
        );
    }
    Ok(())
}

fn parse_concurrency(s: &str) -> Result<usize, String> {
    let n: usize = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    if AGENT_CONCURRENCY_CHOICES.contains(&n) {
        Ok(n)
    } else {
        Err("must be one of: 1, 2, 4, 8, 16, 32".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: AgentArgs,
    }

    fn parse(argv: &[&str]) -> AgentArgs {
        let mut full = vec!["agent"];
        full.extend_from_slice(argv);
        TestCli::try_parse_from(full).unwrap().args
    }

    #[test]
    fn test_defaults_come_from_config() {
        let config = ConfigFile::default();
        let settings = parse(&[]).resolve(&config);

        assert_eq!(settings.queue_url, "http://localhost:7081");
        assert_eq!(settings.ratio, 1);
        assert_eq!(settings.concurrency, 1);
        assert_eq!(settings.store, config.store.directory);
        assert!(settings.log_dir.is_none());
    }

    #[test]
    fn test_cli_overrides_config() {
        let config = ConfigFile::default();
        let settings = parse(&[
            "-q",
            "http://queue:9000/",
            "-s",
            "/srv/store",
            "-r",
            "4",
            "-c",
            "8",
            "--file-log",
        ])
        .resolve(&config);

        assert_eq!(settings.queue_url, "http://queue:9000");
        assert_eq!(settings.store, PathBuf::from("/srv/store"));
        assert_eq!(settings.ratio, 4);
        assert_eq!(settings.concurrency, 8);
        assert_eq!(settings.log_dir, Some(PathBuf::from("/srv/store/log")));
    }

    #[test]
    fn test_config_log_directory_wins_over_store() {
        let mut config = ConfigFile::default();
        config.logging.directory = Some(PathBuf::from("/var/log/tileseed"));

        let settings = parse(&["--file-log"]).resolve(&config);
        assert_eq!(settings.log_dir, Some(PathBuf::from("/var/log/tileseed")));
    }

    #[test]
    fn test_concurrency_choices() {
        assert_eq!(parse_concurrency("16"), Ok(16));
        assert!(parse_concurrency("3").is_err());
        assert!(TestCli::try_parse_from(["agent", "-c", "5"]).is_err());
    }

    #[test]
    fn test_worker_flag_is_accepted() {
        assert!(parse(&[WORKER_FLAG]).worker);
    }
}
