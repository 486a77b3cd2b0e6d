//! Case document processing
//!
//! Tracks a case's documents from upload through asynchronous backend
//! processing, keeping the snapshot and aggregated results consistent under
//! out-of-order, duplicated, or lost events.
//!
//! ```text
//! upload → ProcessingSet ─┐
//! channel events ─────────┼→ CaseOrchestrator → snapshot / validation / cross-verification
//! REST backfill ──────────┘        │
//!                                  └→ NotificationGate (once per session)
//! ```
//!
//! `CaseSession` runs one orchestrator on one task; user commands and channel
//! messages never touch its state concurrently.

pub mod error;
pub mod types;
pub mod traits;
pub mod processing_set;
pub mod snapshot;
pub mod reconcile;
pub mod validation;
pub mod verification;
pub mod gate;
pub mod upload;
pub mod orchestrator;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{CaseError, RejectReason, ServiceError};
pub use types::*;
pub use traits::*;
pub use processing_set::ProcessingSet;
pub use snapshot::CaseSnapshotStore;
pub use reconcile::{reconcile_completed, resolve, Reconciled, Resolution};
pub use validation::{Adoption, Provenance, RuleSummary, ValidationAggregator};
pub use verification::CrossVerificationAggregator;
pub use gate::{GateOutcome, NotificationGate};
pub use upload::{check_upload, detect_mime};
pub use orchestrator::{CaseOrchestrator, HydrationReport, OrchestratorConfig, SessionView};
pub use session::{CaseSession, SessionHandle};
