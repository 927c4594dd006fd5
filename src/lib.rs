//! revq: a multi-session code-review queue driven by an external
//! code-assistant CLI.
//!
//! A run fans out one review worker per prompt against a workspace,
//! optionally aggregates the worker outputs into a deduplicated issue
//! list, optionally runs a fix pass over the aggregate, and leaves every
//! artifact in a per-job directory under
//! `<workspace>/.runtime-cache/review-queue/`. Past jobs are listed by
//! reconstructing state from whatever files remain on disk.

pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod history;
pub mod job;
pub mod model;
pub mod process;
pub mod queue;
pub mod tool;
