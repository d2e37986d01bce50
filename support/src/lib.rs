#![allow(clippy::new_without_default)]

//! Ambient infrastructure shared by every crate in the runtime: structured logging.

pub mod logging;

pub use slog::{self, crit, debug, error, info, o, trace, warn, Logger};
