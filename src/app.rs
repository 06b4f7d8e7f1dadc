use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config;
use crate::embed::{self, EmbedWidget};
use crate::loader::{self, ListLoader, ListService};
use crate::logging;
use crate::renderer::PostRenderer;
use crate::sources::{self, SourceKey};
use crate::ui;

pub const PROJECT_LINK_URL: &str = "https://github.com/lempiji/dman-tweet-viewer";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub year: Option<SourceKey>,
}

pub fn run_with(options: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let log_path = match logging::init(&cfg.log) {
        Ok(path) => path,
        Err(err) => {
            eprintln!("warning: logging disabled: {err:#}");
            None
        }
    };

    let entries = sources::list().to_vec();
    let initial_source = match options.year.or(cfg.viewer.default_year) {
        Some(key) => entries
            .iter()
            .position(|entry| entry.key == key)
            .with_context(|| format!("no post list for year {key}"))?,
        None => 0,
    };

    let list_service: Arc<dyn ListService> = Arc::new(
        loader::HttpListService::new(loader::ClientConfig {
            user_agent: cfg.http.user_agent.clone(),
            timeout: Some(cfg.http.timeout),
            http_client: None,
        })
        .context("create list client")?,
    );
    let widget: Arc<dyn EmbedWidget> = Arc::new(
        embed::OEmbedWidget::new(embed::ClientConfig {
            user_agent: cfg.http.user_agent.clone(),
            endpoint: Some(cfg.http.oembed_endpoint.clone()),
            timeout: Some(cfg.http.timeout),
            http_client: None,
        })
        .context("create embed client")?,
    );

    let config_path = config::default_path()
        .map(|path| path.display().to_string())
        .unwrap_or_default();
    let log_path = log_path
        .map(|path| path.display().to_string())
        .unwrap_or_default();
    info!(
        version = crate::VERSION,
        config = %config_path,
        log = %log_path,
        year = %entries[initial_source].key,
        "starting viewer"
    );

    let options = ui::Options {
        sources: entries,
        initial_source,
        loader: ListLoader::new(list_service),
        renderer: PostRenderer::new(widget, cfg.viewer.max_embed_width),
        autoplay_interval: cfg.viewer.autoplay_interval,
        max_embed_width: cfg.viewer.max_embed_width,
        project_url: PROJECT_LINK_URL.to_string(),
    };

    let mut model = ui::Model::new(options);
    model.run()
}
