//! CLI runner for common setup and operations.
//!
//! Encapsulates config loading, logging initialization, runtime and
//! renderer creation to reduce duplication across command handlers.

use crate::commands::common::GlobalArgs;
use crate::error::CliError;
use std::path::PathBuf;
use std::sync::Arc;
use tileseed::config::ConfigFile;
use tileseed::logging::{init_logging, LoggingGuard, LoggingOptions};
use tileseed::render::{ProcessRenderer, Renderer};
use tokio::runtime::Runtime;
use tracing::info;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    config: ConfigFile,
    verbosity: u8,
}

impl CliRunner {
    /// Load the config file and log to stdout.
    pub fn new(globals: &GlobalArgs) -> Result<Self, CliError> {
        let config = load_config(globals)?;
        Self::with_config(globals, config, None)
    }

    /// Start with an already loaded config, logging to files in `log_dir`
    /// when given.
    pub fn with_config(
        globals: &GlobalArgs,
        config: ConfigFile,
        log_dir: Option<PathBuf>,
    ) -> Result<Self, CliError> {
        let mut options = LoggingOptions::new(globals.verbose);
        if let Some(dir) = log_dir {
            options = options.with_file_dir(dir);
        }

        let logging_guard =
            init_logging(&options).map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
            verbosity: globals.verbose,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("tileseed v{}", tileseed::VERSION);
        info!("tileseed CLI: {} command", command);
    }

    /// Build the multi-threaded runtime the command runs on.
    pub fn runtime(&self) -> Result<Runtime, CliError> {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(CliError::Runtime)
    }

    /// Create the external renderer: CLI value > config.
    pub fn renderer(&self, command: Option<&str>) -> Result<Arc<dyn Renderer>, CliError> {
        let command = command.unwrap_or(&self.config.render.renderer);
        let renderer = ProcessRenderer::from_command_line(command).ok_or_else(|| {
            CliError::InvalidArgument("renderer command must not be empty".to_string())
        })?;

        info!(program = %renderer.program().display(), "Using external renderer");
        Ok(Arc::new(renderer))
    }
}

/// Load the config file named by `--config`, or the default one.
pub fn load_config(globals: &GlobalArgs) -> Result<ConfigFile, CliError> {
    let config = match &globals.config {
        Some(path) => ConfigFile::load_from(path)?,
        None => ConfigFile::load()?,
    };
    Ok(config)
}
