//! Change-monitoring domain logic for PageWatch.
//!
//! This crate ties fetching, normalization, summarization and storage into
//! one pipeline run per target, and schedules those runs weekly:
//! - [`change`]: fingerprints and single-level change detection
//! - [`summarizer`]: generation-service client
//! - [`pipeline`]: [`PipelineRunner`], one run for one target
//! - [`scheduler`]: [`JobScheduler`], weekly triggers and the serialized worker
//! - [`handoff`]: read-once selector handoff file

pub mod change;
pub mod handoff;
pub mod pipeline;
pub mod scheduler;
pub mod summarizer;

pub use change::{ChangeDecision, ChangeDetector, Detection, fingerprint};
pub use handoff::{SelectorHandoff, take_selector_handoff};
pub use pipeline::{PipelineRunner, RunOutcome, describe_failure};
pub use scheduler::{JobScheduler, ReconcileReport, TargetRunner};
pub use summarizer::{NOT_RELEVANT_SENTINEL, Summarizer, build_prompt};
