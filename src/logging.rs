use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;

/// Installs the global subscriber. The terminal owns stdout and stderr while
/// the viewer runs, so events go to a file; without one, logging stays off.
pub fn init(cfg: &LogConfig) -> Result<Option<PathBuf>> {
    let Some(path) = cfg.file.clone() else {
        return Ok(None);
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("log: failed to create directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("log: failed to open {}", path.display()))?;

    tracing_subscriber::registry()
        .with(filter(cfg))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .context("log: install subscriber")?;

    Ok(Some(path))
}

fn filter(cfg: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.filter))
}
