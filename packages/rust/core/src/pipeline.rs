//! One execution for one target: fetch → detect → summarize → store.
//!
//! [`PipelineRunner::run`] never returns an error. Fetch and storage failures
//! are recorded as an error observation for the target, so one target's
//! failures cannot reach the scheduler or other targets.

use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{error, info, instrument, warn};

use pagewatch_fetcher::ContentFetcher;
use pagewatch_shared::{FetchSpec, PageWatchError, Result, TargetId};
use pagewatch_storage::Storage;

use crate::change::ChangeDetector;
use crate::summarizer::Summarizer;

/// What a single run did to the target's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// New content: a current observation was inserted.
    Inserted {
        observation_id: String,
        fingerprint: String,
        summarized: bool,
    },
    /// Same content as the latest observation: no insert, current row demoted.
    Unchanged { demoted: u64 },
    /// The run failed; an error observation describes why.
    Failed { kind: String, message: String },
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Inserted { .. } => "inserted",
            Self::Unchanged { .. } => "unchanged",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Orchestrates fetch, change detection, summarization and persistence.
pub struct PipelineRunner {
    storage: Arc<Storage>,
    fetcher: Arc<dyn ContentFetcher>,
    summarizer: Arc<Summarizer>,
}

impl PipelineRunner {
    pub fn new(
        storage: Arc<Storage>,
        fetcher: Arc<dyn ContentFetcher>,
        summarizer: Arc<Summarizer>,
    ) -> Self {
        Self {
            storage,
            fetcher,
            summarizer,
        }
    }

    /// Execute one pass for `target_id`.
    #[instrument(skip_all, fields(target_id = %target_id, url = %spec.url))]
    pub async fn run(&self, target_id: TargetId, spec: &FetchSpec) -> RunOutcome {
        match self.try_run(&target_id, spec).await {
            Ok(outcome) => outcome,
            Err(e) => self.record_failure(&target_id, spec, &e).await,
        }
    }

    async fn try_run(&self, target_id: &TargetId, spec: &FetchSpec) -> Result<RunOutcome> {
        let markup = self.fetcher.fetch(&spec.url, &spec.selector).await?;

        let detection = ChangeDetector::new(&self.storage)
            .detect(target_id, &markup)
            .await?;

        if !detection.is_changed() {
            let demoted = self.storage.demote_current(target_id).await?;
            info!(demoted, "content unchanged");
            return Ok(RunOutcome::Unchanged { demoted });
        }

        let instruction = self.storage.custom_instruction(target_id).await?;
        let normalized = pagewatch_normalize::normalize(&markup, &spec.url);
        let summary = self
            .summarizer
            .summarize(instruction.as_deref(), &normalized)
            .await;

        let observation = self
            .storage
            .insert_observation(
                target_id,
                &markup,
                Some(&detection.fingerprint),
                summary.as_deref(),
            )
            .await?;

        info!(
            observation_id = %observation.id,
            summarized = summary.is_some(),
            "new content stored"
        );
        Ok(RunOutcome::Inserted {
            observation_id: observation.id,
            fingerprint: detection.fingerprint,
            summarized: summary.is_some(),
        })
    }

    async fn record_failure(
        &self,
        target_id: &TargetId,
        spec: &FetchSpec,
        err: &PageWatchError,
    ) -> RunOutcome {
        warn!(error = %err, kind = err.kind(), "run failed");

        let description = describe_failure(target_id, spec, err, Local::now());
        if let Err(store_err) = self
            .storage
            .insert_observation(target_id, &description, None, None)
            .await
        {
            error!(error = %store_err, "could not record error observation");
        }

        RunOutcome::Failed {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Human-readable description stored as an error observation's content.
pub fn describe_failure(
    target_id: &TargetId,
    spec: &FetchSpec,
    err: &PageWatchError,
    at: DateTime<Local>,
) -> String {
    format!(
        "Run failed\nTarget: {target_id}\nURL: {}\nSelector: {}\nError type: {}\nError: {err}\nTime: {}",
        spec.url,
        spec.selector,
        err.kind(),
        at.format("%Y-%m-%d %H:%M:%S"),
    )
}
