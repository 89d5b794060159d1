//! Common types and utilities shared across CLI commands.

use clap::{Args, ValueEnum};
use std::path::PathBuf;
use tileseed::job::SUPPORTED_RATIOS;

use crate::error::CliError;

/// Options accepted by every command.
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Run with verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Do not ask for confirmation
    #[arg(long, global = true)]
    pub yes: bool,

    /// Configuration file to use instead of ~/.tileseed/config.ini
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Parse a pixel ratio argument.
pub fn parse_ratio(s: &str) -> Result<u32, String> {
    let ratio: u32 = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    if SUPPORTED_RATIOS.contains(&ratio) {
        Ok(ratio)
    } else {
        Err("must be one of: 1, 2, 4, 8".to_string())
    }
}

/// Job sharding selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
pub enum PerJobMode {
    /// Shard archives per job
    True,
    /// Never shard archives per job
    False,
    /// Shard when every cache of the dataset uses per-job storage
    #[default]
    Detect,
}

impl PerJobMode {
    pub fn as_option(self) -> Option<bool> {
        match self {
            PerJobMode::True => Some(true),
            PerJobMode::False => Some(false),
            PerJobMode::Detect => None,
        }
    }
}

/// Resolve the store directory: CLI > config.
pub fn resolve_store(cli: Option<PathBuf>, config: &tileseed::config::ConfigFile) -> PathBuf {
    cli.unwrap_or_else(|| config.store.directory.clone())
}

/// Ask the user to confirm unless `--yes` was given.
pub fn confirm(globals: &GlobalArgs, prompt: &str) -> Result<bool, CliError> {
    if globals.yes {
        return Ok(true);
    }

    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(true)
        .interact()
        .map_err(|e| CliError::Config(format!("Confirm error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ratio() {
        assert_eq!(parse_ratio("2"), Ok(2));
        assert_eq!(parse_ratio("8"), Ok(8));
        assert!(parse_ratio("3").is_err());
        assert!(parse_ratio("two").is_err());
    }

    #[test]
    fn test_per_job_mode() {
        assert_eq!(PerJobMode::True.as_option(), Some(true));
        assert_eq!(PerJobMode::False.as_option(), Some(false));
        assert_eq!(PerJobMode::default().as_option(), None);
    }

    #[test]
    fn test_resolve_store_prefers_cli() {
        let config = tileseed::config::ConfigFile::default();
        assert_eq!(
            resolve_store(Some(PathBuf::from("/srv/store")), &config),
            PathBuf::from("/srv/store")
        );
        assert_eq!(resolve_store(None, &config), config.store.directory);
    }

    #[test]
    fn test_confirm_skipped_with_yes() {
        let globals = GlobalArgs {
            yes: true,
            ..Default::default()
        };
        assert!(confirm(&globals, "Proceed?").unwrap());
    }
}
