//! tileseed CLI - Command-line interface
//!
//! This binary provides a command-line interface to the tileseed library.

mod commands;
mod error;
mod runner;

use clap::{Parser, Subcommand};
use commands::agent::AgentArgs;
use commands::common::GlobalArgs;
use commands::render::RenderArgs;

#[derive(Parser)]
#[command(name = "tileseed")]
#[command(version = tileseed::VERSION)]
#[command(about = "Render raster tiles from vector styles into tile stores", long_about = None)]
struct Cli {
    #[command(flatten)]
    globals: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a raster tile rendering job
    Render(RenderArgs),

    /// Connect to a job queue and process raster tile rendering jobs
    Agent(AgentArgs),
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Render(args) => commands::render::run(&cli.globals, args),
        Commands::Agent(args) => commands::agent::run(&cli.globals, args),
    };

    if let Err(e) = result {
        e.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["tileseed", "agent", "-vv", "--yes"]).unwrap();
        assert_eq!(cli.globals.verbose, 2);
        assert!(cli.globals.yes);
        assert!(matches!(cli.command, Commands::Agent(_)));
    }
}
