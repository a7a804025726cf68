//! Read-once selector handoff file.
//!
//! An external picker writes `{"selector": "...", "previewText": "..."}` to a
//! file. The file is consumed on read so a selector is never applied twice.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use pagewatch_shared::{PageWatchError, Result};

/// A finalized selector handed over by the picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorHandoff {
    pub selector: String,
    #[serde(rename = "previewText", default)]
    pub preview_text: String,
}

/// Take the handoff at `path`, deleting the file. Returns `None` if no file is present.
pub fn take_selector_handoff(path: &Path) -> Result<Option<SelectorHandoff>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "no selector handoff present");
            return Ok(None);
        }
        Err(e) => return Err(PageWatchError::io(path, e)),
    };
    std::fs::remove_file(path).map_err(|e| PageWatchError::io(path, e))?;

    let handoff: SelectorHandoff = serde_json::from_str(&content)
        .map_err(|e| PageWatchError::parse(format!("invalid selector handoff: {e}")))?;

    let selector = handoff.selector.trim();
    if selector.is_empty() {
        return Err(PageWatchError::validation("selector handoff has an empty selector"));
    }

    info!(selector, "selector handoff consumed");
    Ok(Some(SelectorHandoff {
        selector: selector.to_string(),
        preview_text: handoff.preview_text,
    }))
}
