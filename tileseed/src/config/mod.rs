//! Configuration for tileseed.
//!
//! Settings are read from an optional INI file at `~/.tileseed/config.ini`.
//! Every key has a default, so a missing file or section is not an error.
//! Command-line flags override file values.
//!
//! ```ini
//! [store]
//! directory = ~/ldproxy/store
//!
//! [agent]
//! queue_url = http://localhost:7081
//! concurrency = 4
//! ```

mod defaults;
mod file;
mod parser;
mod settings;

pub use defaults::*;
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{AgentSettings, ConfigFile, LoggingSettings, RenderSettings, StoreSettings};
