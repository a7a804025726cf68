//! HTTP implementation of [`ContentFetcher`].
//!
//! Every fetch opens its own [`PageSession`] and drops it before returning,
//! so no connection state leaks between runs or survives a failed one.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use pagewatch_shared::{FetchConfig, FetchError};

use crate::ContentFetcher;

// ---------------------------------------------------------------------------
// PageSession
// ---------------------------------------------------------------------------

/// A single page-load session. Released when dropped.
pub struct PageSession {
    client: Client,
    url: Url,
    timeout_secs: u64,
}

impl PageSession {
    /// Open a session for `url` with a fresh client.
    pub fn open(config: &FetchConfig, url: &str) -> Result<Self, FetchError> {
        let url = Url::parse(url).map_err(|e| FetchError::Transport {
            reason: format!("invalid url {url}: {e}"),
        })?;

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        debug!(%url, "page session opened");
        Ok(Self {
            client,
            url,
            timeout_secs: config.timeout.as_secs(),
        })
    }

    /// Load the page body. Any non-2xx status is an error.
    pub async fn load(&self) -> Result<String, FetchError> {
        let response = self
            .client
            .get(self.url.as_str())
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: self.url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                url: self.url.to_string(),
                timeout_secs: self.timeout_secs,
            }
        } else {
            FetchError::Transport {
                reason: format!("{}: {e}", self.url),
            }
        }
    }
}

impl Drop for PageSession {
    fn drop(&mut self) {
        debug!(url = %self.url, "page session released");
    }
}

// ---------------------------------------------------------------------------
// Element extraction
// ---------------------------------------------------------------------------

/// Inner markup of the first element in `body` matching `selector`.
pub fn extract_inner_html(body: &str, selector: &str) -> Result<String, FetchError> {
    let parsed = Selector::parse(selector).map_err(|e| FetchError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })?;

    let doc = Html::parse_document(body);
    let element = doc
        .select(&parsed)
        .next()
        .ok_or_else(|| FetchError::SelectorNotFound {
            selector: selector.to_string(),
        })?;

    let html = element.inner_html();
    if html.trim().is_empty() {
        return Err(FetchError::EmptyContent {
            selector: selector.to_string(),
        });
    }
    Ok(html)
}

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// Fetches element markup over plain HTTP. No JavaScript is executed.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    config: FetchConfig,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    #[instrument(skip_all, fields(url = %url, selector = %selector))]
    async fn fetch(&self, url: &str, selector: &str) -> Result<String, FetchError> {
        let body = {
            let session = PageSession::open(&self.config, url)?;
            session.load().await?
        };

        let html = extract_inner_html(&body, selector)?;
        debug!(bytes = html.len(), "element extracted");
        Ok(html)
    }
}
