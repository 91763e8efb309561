//! Configuration
//!
//! CLI argument definitions and the resolved copy configuration.

mod settings;

pub use settings::{parse_size, CliArgs, Commands, CopyConfig};
