//! Page content fetching for monitored targets.
//!
//! This crate provides:
//! - [`ContentFetcher`]: given a page URL and a CSS selector, return the
//!   element's inner markup
//! - [`HttpFetcher`]: the shipped implementation, one HTTP session per fetch
//!
//! Rendering providers (headless browsers) plug in by implementing
//! [`ContentFetcher`].

pub mod http;

use async_trait::async_trait;
use pagewatch_shared::FetchError;

pub use http::{HttpFetcher, PageSession, extract_inner_html};

/// Load a page and read one element's inner markup.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetch the inner markup of the first element matching `selector` on `url`.
    ///
    /// Blank markup is reported as [`FetchError::EmptyContent`].
    async fn fetch(&self, url: &str, selector: &str) -> Result<String, FetchError>;
}
