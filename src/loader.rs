use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::USER_AGENT;
use tracing::debug;

use crate::navigator::FetchTicket;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Source of post identifier lists.
pub trait ListService: Send + Sync {
    fn fetch_list(&self, url: &str) -> Result<Vec<String>>;
}

/// Splits a fetched body into post identifiers.
///
/// The body is trimmed at both ends, then split on `\n`. Interior blank
/// lines survive as empty identifiers; only a trailing `\r` is dropped
/// from each line.
pub fn parse_post_list(body: &str) -> Vec<String> {
    body.trim()
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct HttpListService {
    http: HttpClient,
    user_agent: String,
}

impl HttpListService {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("list client user agent required");
        }

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()
                .context("build list HTTP client")?,
        };

        Ok(Self {
            http,
            user_agent: config.user_agent,
        })
    }
}

impl ListService for HttpListService {
    fn fetch_list(&self, url: &str) -> Result<Vec<String>> {
        let response = self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .with_context(|| format!("request {url}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().context("read post list body")?;
        Ok(parse_post_list(&body))
    }
}

#[derive(Debug)]
pub struct ListResponse {
    pub request_id: u64,
    pub result: Result<Vec<String>>,
}

/// Runs fetch tickets on worker threads and hands results back in order of
/// arrival.
pub struct ListLoader {
    service: Arc<dyn ListService>,
    response_tx: Sender<ListResponse>,
    response_rx: Receiver<ListResponse>,
}

impl ListLoader {
    pub fn new(service: Arc<dyn ListService>) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            service,
            response_tx,
            response_rx,
        }
    }

    pub fn dispatch(&self, ticket: FetchTicket) {
        let tx = self.response_tx.clone();
        let service = self.service.clone();
        thread::spawn(move || {
            if ticket.cancel.is_cancelled() {
                return;
            }
            let result = service.fetch_list(&ticket.url);
            if ticket.cancel.is_cancelled() {
                debug!(request_id = ticket.request_id, "dropping cancelled list fetch");
                return;
            }
            let _ = tx.send(ListResponse {
                request_id: ticket.request_id,
                result,
            });
        });
    }

    pub fn try_recv(&self) -> Option<ListResponse> {
        self.response_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<ListResponse> {
        self.response_rx.recv_timeout(timeout).ok()
    }
}

#[derive(Default)]
pub struct MockListService {
    pub posts: Vec<String>,
}

impl ListService for MockListService {
    fn fetch_list(&self, _url: &str) -> Result<Vec<String>> {
        Ok(self.posts.clone())
    }
}
