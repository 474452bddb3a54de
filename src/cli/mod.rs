//! # Command-Line Interface
//!
//! User-facing commands and output formatting.
//!
//! ## Commands
//!
//! | Command | Purpose |
//! |---------|---------|
//! | `build` | Plan, prune stale outputs, execute, report, write back headers |
//! | `plan` | Print the plan summary or export it as Graphviz DOT |
//! | `verify` | Check config and content without building; `--strict` fails on warnings |
//! | `clean` | Remove the site's cache directory (default outputs and database) |
//! | `cache status` | Cache location, schema version, record count |
//! | `cache clear` | Drop every cache record |
//!
//! ## Output Formats
//!
//! All commands support the `--format` flag:
//! - `text` (default) - `key: value` lines
//! - `json` - one JSON object per command
//!
//! ## Logging
//!
//! Diagnostics go to stderr through `tracing`. `--verbose` (or `-v`) raises
//! the default level to debug; `RUST_LOG` overrides both:
//! ```bash
//! RUST_LOG=stbl=trace stbl build
//! ```
//!
//! ## Entry Point
//!
//! Call [`run()`] to parse arguments and execute the appropriate command.

mod app;
mod build_cmd;
mod cache_cmd;
mod clean_cmd;
mod output;
mod plan_cmd;
mod verify_cmd;

pub use app::{run, Cli, Commands};
pub use output::{Output, OutputFormat};
