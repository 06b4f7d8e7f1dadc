//! Embed widget boundary.
//!
//! A widget renders a post identifier into a [`Container`] and reports the
//! handle of the node it mounted, or nothing when the post does not exist.
//! Teardown removes a node if it is still attached.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::USER_AGENT;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

pub const DEFAULT_OEMBED_ENDPOINT: &str = "https://publish.twitter.com/oembed";
pub const STATUS_URL_BASE: &str = "https://twitter.com/i/status";

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("oEmbed endpoint returned HTTP {0}")]
    Status(u16),
    #[error("oEmbed response for {0} carried no markup")]
    EmptyMarkup(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedNode {
    pub handle: NodeHandle,
    pub post_id: String,
    pub text: String,
    pub author: Option<String>,
    pub permalink: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPost {
    pub text: String,
    pub author: Option<String>,
    pub permalink: String,
}

/// Mount target shared between the renderer and widget worker threads.
#[derive(Debug, Default)]
pub struct Container {
    nodes: Mutex<Vec<MountedNode>>,
    next_handle: AtomicU64,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, post_id: &str, post: RenderedPost) -> NodeHandle {
        let handle = NodeHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.nodes.lock().push(MountedNode {
            handle,
            post_id: post_id.to_string(),
            text: post.text,
            author: post.author,
            permalink: post.permalink,
        });
        handle
    }

    /// Returns false when the node was already detached.
    pub fn remove(&self, handle: NodeHandle) -> bool {
        let mut nodes = self.nodes.lock();
        let before = nodes.len();
        nodes.retain(|node| node.handle != handle);
        nodes.len() != before
    }

    pub fn get(&self, handle: NodeHandle) -> Option<MountedNode> {
        self.nodes
            .lock()
            .iter()
            .find(|node| node.handle == handle)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedOptions {
    pub width: u16,
}

pub trait EmbedWidget: Send + Sync {
    /// Blocks until the post is mounted. `Ok(None)` means nothing was mounted.
    fn render(
        &self,
        post_id: &str,
        container: &Container,
        options: EmbedOptions,
    ) -> Result<Option<NodeHandle>>;

    fn teardown(&self, container: &Container, node: NodeHandle) {
        container.remove(node);
    }
}

pub fn status_url(post_id: &str) -> String {
    format!("{}/{}", STATUS_URL_BASE, post_id)
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub endpoint: Option<String>,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

/// Renders posts through a public oEmbed endpoint.
pub struct OEmbedWidget {
    http: HttpClient,
    user_agent: String,
    endpoint: Url,
}

#[derive(Debug, Deserialize)]
struct OEmbedResponse {
    #[serde(default)]
    html: String,
    #[serde(default)]
    author_name: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl OEmbedWidget {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("embed client user agent required");
        }
        let endpoint = config
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_OEMBED_ENDPOINT);
        let endpoint =
            Url::parse(endpoint).with_context(|| format!("parse oEmbed endpoint {endpoint}"))?;

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()
                .context("build embed HTTP client")?,
        };

        Ok(Self {
            http,
            user_agent: config.user_agent,
            endpoint,
        })
    }

    fn request_url(&self, post_id: &str, options: EmbedOptions) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("url", &status_url(post_id))
                .append_pair("omit_script", "true")
                .append_pair("dnt", "true");
            if options.width > 0 {
                query.append_pair("maxwidth", &options.width.to_string());
            }
        }
        url
    }

    fn fetch(&self, post_id: &str, options: EmbedOptions) -> Result<Option<RenderedPost>> {
        let response = self
            .http
            .get(self.request_url(post_id, options))
            .header(USER_AGENT, &self.user_agent)
            .send()
            .with_context(|| format!("request embed for {post_id}"))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::GONE => return Ok(None),
            status if !status.is_success() => bail!(EmbedError::Status(status.as_u16())),
            _ => {}
        }

        let payload: OEmbedResponse = response
            .json()
            .with_context(|| format!("decode embed for {post_id}"))?;
        if payload.html.trim().is_empty() {
            bail!(EmbedError::EmptyMarkup(post_id.to_string()));
        }

        Ok(Some(RenderedPost {
            text: html_to_text(&payload.html),
            author: payload.author_name.filter(|name| !name.trim().is_empty()),
            permalink: payload.url.unwrap_or_else(|| status_url(post_id)),
        }))
    }
}

impl EmbedWidget for OEmbedWidget {
    fn render(
        &self,
        post_id: &str,
        container: &Container,
        options: EmbedOptions,
    ) -> Result<Option<NodeHandle>> {
        let post_id = post_id.trim();
        if post_id.is_empty() {
            return Ok(None);
        }
        Ok(self
            .fetch(post_id, options)?
            .map(|post| container.attach(post_id, post)))
    }
}

/// Offline widget: mounts a placeholder for every identifier except empty
/// ones and `missing`.
#[derive(Default)]
pub struct MockEmbedWidget;

impl EmbedWidget for MockEmbedWidget {
    fn render(
        &self,
        post_id: &str,
        container: &Container,
        _options: EmbedOptions,
    ) -> Result<Option<NodeHandle>> {
        let post_id = post_id.trim();
        if post_id.is_empty() || post_id == "missing" {
            return Ok(None);
        }
        Ok(Some(container.attach(
            post_id,
            RenderedPost {
                text: format!("Sample post {post_id}"),
                author: Some("postreel".into()),
                permalink: status_url(post_id),
            },
        )))
    }
}

static BREAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>|</p>").expect("valid line break regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

/// Flattens embed markup into plain text.
pub fn html_to_text(html: &str) -> String {
    let with_breaks = BREAK_RE.replace_all(html, "\n");
    let stripped = TAG_RE.replace_all(&with_breaks, "");
    let decoded = decode_entities(&stripped);
    decoded
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    text.replace("&mdash;", "—")
        .replace("&ndash;", "–")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_attach_and_remove() {
        let container = Container::new();
        let post = RenderedPost {
            text: "hello".into(),
            author: None,
            permalink: status_url("1"),
        };
        let handle = container.attach("1", post);
        assert_eq!(container.get(handle).unwrap().post_id, "1");
        assert!(container.remove(handle));
        assert!(!container.remove(handle));
        assert!(container.is_empty());
    }

    #[test]
    fn markup_flattens_to_lines() {
        let html = r#"<blockquote class="twitter-tweet"><p lang="ja" dir="ltr">first line<br>second &amp; more <a href="https://t.co/x">pic.twitter.com/x</a></p>&mdash; D-man (@dman) <a href="https://twitter.com/dman/status/1">December 1, 2021</a></blockquote>"#;
        assert_eq!(
            html_to_text(html),
            "first line\nsecond & more pic.twitter.com/x\n— D-man (@dman) December 1, 2021"
        );
    }

    #[test]
    fn request_url_carries_status_link() {
        let widget = OEmbedWidget::new(ClientConfig {
            user_agent: "postreel-test".into(),
            endpoint: Some("http://127.0.0.1:9/oembed".into()),
            ..Default::default()
        })
        .unwrap();
        let url = widget.request_url("12345", EmbedOptions { width: 60 });
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&(
            "url".to_string(),
            "https://twitter.com/i/status/12345".to_string()
        )));
        assert!(pairs.contains(&("omit_script".to_string(), "true".to_string())));
        assert!(pairs.contains(&("maxwidth".to_string(), "60".to_string())));

        let url = widget.request_url("12345", EmbedOptions { width: 0 });
        assert!(!url.query_pairs().any(|(key, _)| key == "maxwidth"));
    }

    #[test]
    fn empty_identifier_mounts_nothing() {
        let widget = OEmbedWidget::new(ClientConfig {
            user_agent: "postreel-test".into(),
            endpoint: Some("http://127.0.0.1:9/oembed".into()),
            ..Default::default()
        })
        .unwrap();
        let container = Container::new();
        let mounted = widget
            .render("  ", &container, EmbedOptions { width: 60 })
            .unwrap();
        assert!(mounted.is_none());
        assert!(container.is_empty());
    }
}
