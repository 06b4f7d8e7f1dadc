#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod config;
pub mod embed;
pub mod loader;
pub mod logging;
pub mod navigator;
pub mod renderer;
pub mod sources;
pub mod token;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run_with, RunOptions};
