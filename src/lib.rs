//! nestql - evaluate SQL-compatible queries over nested data from the command line.
//!
//! The evaluation core lives in `nestql-core`; this crate adds configuration
//! loading and a JSON-in/JSON-out runner.

pub mod config;
pub mod runner;

pub use config::Config;
pub use runner::{run, Request};
