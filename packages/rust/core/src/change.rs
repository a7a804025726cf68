//! Content fingerprinting and single-level change detection.

use sha2::{Digest, Sha256};
use tracing::debug;

use pagewatch_shared::{Result, TargetId};
use pagewatch_storage::Storage;

/// SHA-256 of the raw markup, lowercase hex.
pub fn fingerprint(markup: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(markup.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Outcome of comparing fresh markup to the latest stored observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDecision {
    /// Same fingerprint as the latest observation.
    Unchanged,
    /// Different from the latest observation, or nothing comparable stored.
    Changed { previous: Option<String> },
}

/// Fingerprint plus the decision reached for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub fingerprint: String,
    pub decision: ChangeDecision,
}

impl Detection {
    pub fn is_changed(&self) -> bool {
        matches!(self.decision, ChangeDecision::Changed { .. })
    }
}

/// Compares fetched markup against the target's most recent observation only.
/// A → B → A counts as two changes.
pub struct ChangeDetector<'a> {
    storage: &'a Storage,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub async fn detect(&self, target_id: &TargetId, markup: &str) -> Result<Detection> {
        let fingerprint = fingerprint(markup);
        let previous = self.storage.current_fingerprint(target_id).await?;

        let decision = match previous {
            Some(prev) if prev == fingerprint => ChangeDecision::Unchanged,
            previous => ChangeDecision::Changed { previous },
        };
        debug!(
            %target_id,
            %fingerprint,
            changed = !matches!(decision, ChangeDecision::Unchanged),
            "change detection"
        );

        Ok(Detection {
            fingerprint,
            decision,
        })
    }
}
