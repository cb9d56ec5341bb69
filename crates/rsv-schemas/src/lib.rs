use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One company row of a fund's reserve book, as stored.
///
/// `allocation_version` is the fund-wide optimistic-lock token: it is
/// identical across every row of the same fund, and every successful
/// commit increments it on every row at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyAllocation {
    pub fund_id: i64,
    pub company_id: i64,
    pub company_name: String,
    pub planned_cents: i64,
    pub allocation_cap_cents: Option<i64>,
    pub allocation_version: i64,
    /// Lifecycle tag maintained elsewhere; never mutated by reallocation.
    pub status: String,
    pub last_allocation_at: Option<DateTime<Utc>>,
}

/// Operator-proposed target for one company. Request-scoped, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAllocation {
    pub company_id: i64,
    pub planned_cents: i64,
    /// When present, replaces the stored cap as part of the commit.
    pub allocation_cap_cents: Option<i64>,
}

/// Direction of a per-company change, derived from the sign of `delta_cents`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaStatus {
    Increased,
    Decreased,
    Unchanged,
}

/// Before/after view for one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationDelta {
    pub company_id: i64,
    pub company_name: String,
    pub from_cents: i64,
    pub to_cents: i64,
    pub delta_cents: i64,
    pub delta_pct: f64,
    pub status: DeltaStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Advisory; does not block a commit.
    Warning,
    /// Blocking; the request is previewable but not committable.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    CapExceeded,
    NegativeDelta,
    HighConcentration,
    UnrealisticConviction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub company_id: Option<i64>,
    pub message: String,
    pub severity: Severity,
}

/// Fund-wide before/after aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReallocationTotals {
    pub total_before_cents: i64,
    pub total_after_cents: i64,
    pub delta_cents: i64,
    pub delta_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// Input shared by preview and commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewRequest {
    pub fund_id: i64,
    /// The allocation_version the caller last read.
    pub current_version: i64,
    pub proposed_allocations: Vec<ProposedAllocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub deltas: Vec<AllocationDelta>,
    pub totals: ReallocationTotals,
    pub warnings: Vec<Warning>,
    pub validation: ValidationReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRequest {
    #[serde(flatten)]
    pub preview: PreviewRequest,
    pub reason: Option<String>,
    pub user_id: Option<i64>,
}

/// Returned by a successful commit; `new_version` is the token for the
/// caller's next round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub new_version: i64,
    pub updated_count: u64,
    pub audit_id: Uuid,
    pub committed_at_utc: DateTime<Utc>,
}

/// Optimistic-lock rejection detail.
///
/// `actual_versions` with a single element means a concurrent commit won;
/// more than one element means the fund-wide single-version invariant was
/// already broken before this call (fatal inconsistency).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionConflict {
    pub expected_version: i64,
    pub actual_versions: Vec<i64>,
}

/// Outcome of the read-only preview path. Infrastructure failures are
/// reported separately as errors; these are business outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PreviewOutcome {
    Report(PreviewResponse),
    FundNotFound,
    VersionConflict(VersionConflict),
}

/// Outcome of the transactional commit path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum CommitOutcome {
    Applied(CommitReceipt),
    FundNotFound,
    VersionConflict(VersionConflict),
    /// Blocking validation errors; nothing was written.
    Rejected(ValidationReport),
}

/// One append-only audit record, one per successful commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReallocationAudit {
    pub audit_id: Uuid,
    pub fund_id: i64,
    pub user_id: Option<i64>,
    pub baseline_version: i64,
    pub new_version: i64,
    /// Full ordered per-company delta list as committed.
    pub deltas: Vec<AllocationDelta>,
    pub reason: Option<String>,
    pub created_at_utc: DateTime<Utc>,
}
