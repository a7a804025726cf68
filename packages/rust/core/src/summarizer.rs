//! Summary generation through an Ollama-compatible `/api/generate` endpoint.
//!
//! Summaries are best effort. Any failure (status, transport, timeout,
//! response shape) is logged as a summarize error and yields `None`, so the
//! raw observation is still stored.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use pagewatch_normalize::NormalizedContent;
use pagewatch_shared::{GenerationConfig, PageWatchError, Result};

/// Returned by the model when the update has nothing to do with the instruction.
pub const NOT_RELEVANT_SENTINEL: &str = "This update is not relevant to the requested topic.";

/// Marker used in place of a missing custom instruction.
const NO_INSTRUCTION: &str = "none";

const SYSTEM_INSTRUCTIONS: &str = r#"You are a content analysis assistant. Analyze and summarize the content below:
1. Extract only information relevant to the required instructions. Ignore HTML tags and keep only the text.
2. Preserve important figures and numbers from the source.
3. Use a clear, structured output format.
4. When a piece of text has a link, add the link after the text.
5. For every link:
   - Keep the complete URL including the domain (for example https://www.example.gov).
   - If a link is relative (starts with ./ or /), prefix it with the domain.
   - Make sure every link is a directly clickable absolute URL.
   Correct: <a href="https://www.example.gov/notices/2025/0214.html">Notice on the logistics data pilot</a>
   Wrong: [https://www.example.gov/notices/2025/0214.html](https://www.example.gov/notices/2025/0214.html)
6. Links inside tables use this format:
   | Title | Date |
   | ---- | ---- |
   | <a href="FULL_URL">Article title</a> | Publication date |
7. Output only the structured result.
8. Summarize only content related to the required topic:
   - If the content is unrelated to the required topic, reply exactly "This update is not relevant to the requested topic."
   - Do not summarize unrelated content."#;

/// Build the full prompt for one summary request.
pub fn build_prompt(custom_instruction: Option<&str>, content: &str) -> String {
    let instruction = custom_instruction
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(NO_INSTRUCTION);

    format!(
        "### Required instructions ###\n{instruction}\n\n{SYSTEM_INSTRUCTIONS}\n\nContent to analyze:\n{content}"
    )
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for the generation service.
pub struct Summarizer {
    config: GenerationConfig,
    client: Client,
}

impl Summarizer {
    /// Create a summarizer whose requests are bounded by `config.timeout`.
    pub fn new(config: GenerationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PageWatchError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Summarize normalized content. Returns `None` when disabled or on failure.
    #[instrument(skip_all, fields(model = %self.config.model))]
    pub async fn summarize(
        &self,
        custom_instruction: Option<&str>,
        content: &NormalizedContent,
    ) -> Option<String> {
        if !self.config.enabled {
            debug!("summary generation disabled");
            return None;
        }

        let prompt = build_prompt(custom_instruction, &content.text());
        match self.generate(&prompt).await {
            Ok(summary) => {
                debug!(chars = summary.len(), "summary generated");
                Some(summary)
            }
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "summary generation failed");
                None
            }
        }
    }

    /// One non-streaming generate call.
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PageWatchError::Summarize(format!(
                        "timed out after {}s",
                        self.config.timeout.as_secs()
                    ))
                } else {
                    PageWatchError::Summarize(format!(
                        "request to {} failed: {e}",
                        self.config.endpoint
                    ))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PageWatchError::Summarize(format!("HTTP {status}: {body}")));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| PageWatchError::Summarize(format!("malformed response: {e}")))?;
        Ok(parsed.response)
    }
}
