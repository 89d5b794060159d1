//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`agent`] - Process rendering jobs from a job queue
//! - [`render`] - Render one tile rectangle into a store

pub mod agent;
pub mod common;
pub mod render;
