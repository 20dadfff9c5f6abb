//! `sprout` resolves each sub-command to a versioned plugin package, caches
//! it locally and runs it.

pub mod app;
pub mod cli;
pub mod command;
pub mod error;
pub mod model;
pub mod plugin;
pub mod registry;

pub use error::{Error, Result};
