//! Core domain types for PageWatch targets and observations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schedule::Schedule;

// ---------------------------------------------------------------------------
// TargetId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for monitored target identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub Uuid);

impl TargetId {
    /// Generate a new time-sortable target identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TargetId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// MonitoredTarget
// ---------------------------------------------------------------------------

/// What to fetch for a target: the page and the element within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSpec {
    /// Source page URL.
    pub url: String,
    /// Opaque CSS selector of the watched element.
    pub selector: String,
}

/// A configured (URL, selector, schedule) unit under observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredTarget {
    pub id: TargetId,
    pub url: String,
    pub selector: String,
    pub schedule: Schedule,
    pub active: bool,
    /// Extra summarization instructions for this target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instruction: Option<String>,
    pub created_at: DateTime<Utc>,
    /// When the target last went from paused to active (or was added).
    pub activated_at: DateTime<Utc>,
}

impl MonitoredTarget {
    /// The fetch half of the target, as handed to the scheduler.
    pub fn fetch_spec(&self) -> FetchSpec {
        FetchSpec {
            url: self.url.clone(),
            selector: self.selector.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// One stored snapshot of a target's fetched content.
///
/// Error observations carry a failure description as `content` and have no
/// fingerprint or summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Unique observation identifier (UUID v7).
    pub id: String,
    pub target_id: TargetId,
    /// Raw element markup, or the failure description for error rows.
    pub content: String,
    /// SHA-256 of the raw markup; `None` for error rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Marks the most recently detected distinct content state.
    pub is_current: bool,
}

impl Observation {
    /// Whether this row records a failed run.
    pub fn is_error(&self) -> bool {
        self.fingerprint.is_none()
    }
}
