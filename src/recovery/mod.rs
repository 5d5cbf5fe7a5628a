//! Recovery Module
//!
//! Restores data files after a restart.
//!
//! ## Per-file state machine
//! ```text
//!            ┌─────────┐
//!  file ───▶ │ exists? │── no ──▶ MISSING (logged, skipped)
//!            └────┬────┘
//!                 │ yes
//!            ┌────▼────┐
//!            │ footer? │── yes ─▶ INTACT ── .resource? ── yes ─▶ deserialize
//!            └────┬────┘                        └──────── no ──▶ rebuild from footer, serialize
//!                 │ no
//!                 ▼
//!             CRASHED ─▶ fold surviving groups ─▶ replay WAL ─▶ flush ─▶ seal ─▶ serialize
//! ```
//! Intact and crashed files both end with their log node deleted and their
//! resource closed.

mod performer;
mod replayer;

pub use performer::{FileRecoverPerformer, RecoveryState};
pub use replayer::{log_node_identifier, LogReplayer, ReplayStats};
