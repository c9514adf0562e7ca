//! Process-wide plumbing shared by the gateway binary: logging setup.
mod logger;

pub use logger::{parse_level, Logger};
