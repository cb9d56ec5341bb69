//! rsv-engine
//!
//! Pure reallocation logic:
//! - Delta calculator (before/after per company, fund-wide totals)
//! - Validation & warning rule engine (blocking errors vs advisory warnings)
//! - Version consistency classifier for the fund-wide optimistic lock
//!
//! No IO, no time, no store wiring. The transactional orchestration lives
//! in rsv-db; everything here is safe to call arbitrarily often.

mod delta;
mod version;

pub mod rules;

pub use delta::{compute_deltas, compute_totals};
pub use rules::{detect_issues, Finding, IssueReport, RuleContext, RuleThresholds};
pub use version::VersionConsistency;
