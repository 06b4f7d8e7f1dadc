use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::embed::DEFAULT_OEMBED_ENDPOINT;
use crate::navigator::DEFAULT_AUTOPLAY_INTERVAL;
use crate::renderer::MAX_EMBED_WIDTH;
use crate::sources::SourceKey;

const DEFAULT_ENV_PREFIX: &str = "POSTREEL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub viewer: ViewerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewerConfig {
    #[serde(default = "default_autoplay_interval", with = "humantime_serde")]
    pub autoplay_interval: Duration,
    #[serde(default)]
    pub default_year: Option<SourceKey>,
    #[serde(default = "default_max_embed_width")]
    pub max_embed_width: u16,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            autoplay_interval: default_autoplay_interval(),
            default_year: None,
            max_embed_width: default_max_embed_width(),
        }
    }
}

fn default_autoplay_interval() -> Duration {
    DEFAULT_AUTOPLAY_INTERVAL
}

fn default_max_embed_width() -> u16 {
    MAX_EMBED_WIDTH
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_oembed_endpoint")]
    pub oembed_endpoint: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout: default_timeout(),
            oembed_endpoint: default_oembed_endpoint(),
        }
    }
}

fn default_user_agent() -> String {
    format!("postreel/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_oembed_endpoint() -> String {
    DEFAULT_OEMBED_ENDPOINT.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_file")]
    pub file: Option<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            filter: default_log_filter(),
        }
    }
}

fn default_log_file() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("postreel").join("postreel.log"))
}

fn default_log_filter() -> String {
    "postreel=info".into()
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.viewer.autoplay_interval.is_zero() {
        base.viewer.autoplay_interval = other.viewer.autoplay_interval;
    }
    if other.viewer.default_year.is_some() {
        base.viewer.default_year = other.viewer.default_year;
    }
    if other.viewer.max_embed_width != 0 {
        base.viewer.max_embed_width = other.viewer.max_embed_width;
    }

    if !other.http.user_agent.trim().is_empty() {
        base.http.user_agent = other.http.user_agent;
    }
    if !other.http.timeout.is_zero() {
        base.http.timeout = other.http.timeout;
    }
    if !other.http.oembed_endpoint.trim().is_empty() {
        base.http.oembed_endpoint = other.http.oembed_endpoint;
    }

    if other.log.file.is_some() {
        base.log.file = other.log.file;
    }
    if !other.log.filter.trim().is_empty() {
        base.log.filter = other.log.filter;
    }

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "viewer.autoplay_interval" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                if !duration.is_zero() {
                    cfg.viewer.autoplay_interval = duration;
                }
            }
        }
        "viewer.default_year" => {
            if let Ok(key) = value.parse::<SourceKey>() {
                cfg.viewer.default_year = Some(key);
            }
        }
        "viewer.max_embed_width" => {
            if let Ok(parsed) = value.parse::<u16>() {
                if parsed != 0 {
                    cfg.viewer.max_embed_width = parsed;
                }
            }
        }
        "http.user_agent" if !value.trim().is_empty() => cfg.http.user_agent = value,
        "http.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                if !duration.is_zero() {
                    cfg.http.timeout = duration;
                }
            }
        }
        "http.oembed_endpoint" if !value.trim().is_empty() => cfg.http.oembed_endpoint = value,
        "log.file" => cfg.log.file = Some(PathBuf::from(value)),
        "log.filter" if !value.trim().is_empty() => cfg.log.filter = value,
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("postreel").join("config.yaml"))
}
