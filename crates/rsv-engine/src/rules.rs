//! Validation & warning rule engine.
//!
//! Classifies a proposed reallocation into blocking errors and advisory
//! warnings. Rules are independent predicate+classifier pairs held in an
//! ordered slice and evaluated uniformly; adding a rule means adding a
//! function and one slice entry, not touching control flow. All rules run
//! on every call and their findings are unioned.
//!
//! Blocking semantics: a request with only advisory warnings is
//! previewable and committable; a request with any error is previewable
//! (so the operator can see why) but not committable.

use rsv_money::{format_bps, format_cents};
use rsv_schemas::{
    AllocationDelta, CompanyAllocation, ProposedAllocation, Severity, ValidationReport, Warning,
    WarningKind,
};

// ─── Thresholds ──────────────────────────────────────────────────────────────

/// Advisory-rule thresholds in basis points.
///
/// Defaults are the house policy: concentration above 30 % of post-change
/// reserves, conviction above 50 % of fund size. Operator config may
/// override both.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuleThresholds {
    /// A company above this share of total reserves after the change is
    /// flagged as concentrated. Strict comparison: exactly at the limit
    /// does not trigger.
    pub concentration_limit_bps: i64,
    /// A single proposed allocation above this share of fund size is
    /// flagged as unrealistic conviction. Strict comparison.
    pub conviction_limit_bps: i64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            concentration_limit_bps: 3_000,
            conviction_limit_bps: 5_000,
        }
    }
}

// ─── Context & findings ──────────────────────────────────────────────────────

/// Everything a rule may inspect. Deltas are precomputed by the caller so
/// rules never re-derive them.
pub struct RuleContext<'a> {
    pub current: &'a [CompanyAllocation],
    pub proposed: &'a [ProposedAllocation],
    pub deltas: &'a [AllocationDelta],
    pub fund_size_cents: i64,
    pub thresholds: RuleThresholds,
}

/// One rule finding: an advisory warning, a blocking error, or (for rules
/// that surface both forms, like cap breaches) the pair.
#[derive(Clone, Debug, PartialEq)]
pub struct Finding {
    pub warning: Option<Warning>,
    pub error: Option<String>,
}

impl Finding {
    fn blocking_error(message: String) -> Self {
        Self {
            warning: None,
            error: Some(message),
        }
    }

    fn advisory(warning: Warning) -> Self {
        Self {
            warning: Some(warning),
            error: None,
        }
    }

    /// A warning carried at error severity plus its blocking error string.
    fn blocking(warning: Warning, message: String) -> Self {
        Self {
            warning: Some(warning),
            error: Some(message),
        }
    }
}

/// Union of all rule findings, split into the two channels.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IssueReport {
    pub warnings: Vec<Warning>,
    pub errors: Vec<String>,
}

impl IssueReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn validation(&self) -> ValidationReport {
        ValidationReport {
            is_valid: self.is_valid(),
            errors: self.errors.clone(),
        }
    }
}

type Rule = fn(&RuleContext<'_>) -> Vec<Finding>;

/// Evaluation order is also report order.
const RULES: &[Rule] = &[
    check_unknown_companies,
    check_negative_allocations,
    check_cap_exceeded,
    check_high_concentration,
    check_unrealistic_conviction,
];

/// Run every rule and union the findings.
pub fn detect_issues(ctx: &RuleContext<'_>) -> IssueReport {
    let mut report = IssueReport::default();
    for rule in RULES {
        for finding in rule(ctx) {
            if let Some(w) = finding.warning {
                report.warnings.push(w);
            }
            if let Some(e) = finding.error {
                report.errors.push(e);
            }
        }
    }
    report
}

// ─── Individual rules ────────────────────────────────────────────────────────

fn display_name(current: &[CompanyAllocation], company_id: i64) -> String {
    current
        .iter()
        .find(|c| c.company_id == company_id)
        .map(|c| c.company_name.clone())
        .unwrap_or_else(|| format!("company {company_id}"))
}

/// A proposal naming a company_id absent from the fund is a blocking error.
pub fn check_unknown_companies(ctx: &RuleContext<'_>) -> Vec<Finding> {
    ctx.proposed
        .iter()
        .filter(|p| !ctx.current.iter().any(|c| c.company_id == p.company_id))
        .map(|p| {
            Finding::blocking_error(format!(
                "unknown company_id {} in proposal",
                p.company_id
            ))
        })
        .collect()
}

/// A proposed allocation below zero is a blocking error.
pub fn check_negative_allocations(ctx: &RuleContext<'_>) -> Vec<Finding> {
    ctx.proposed
        .iter()
        .filter(|p| p.planned_cents < 0)
        .map(|p| {
            let name = display_name(ctx.current, p.company_id);
            let message = format!(
                "negative allocation for '{name}': {}",
                format_cents(p.planned_cents)
            );
            Finding::blocking(
                Warning {
                    kind: WarningKind::NegativeDelta,
                    company_id: Some(p.company_id),
                    message: message.clone(),
                    severity: Severity::Error,
                },
                message,
            )
        })
        .collect()
}

/// A proposed amount above the effective cap is a blocking error. The
/// proposal's cap override, when present, replaces the stored cap for this
/// check (and would be persisted by the commit).
pub fn check_cap_exceeded(ctx: &RuleContext<'_>) -> Vec<Finding> {
    let mut findings = Vec::new();
    for p in ctx.proposed {
        let Some(row) = ctx.current.iter().find(|c| c.company_id == p.company_id) else {
            continue;
        };
        let effective_cap = p.allocation_cap_cents.or(row.allocation_cap_cents);
        if let Some(cap) = effective_cap {
            if p.planned_cents > cap {
                let message = format!(
                    "'{}' allocation {} exceeds cap {}",
                    row.company_name,
                    format_cents(p.planned_cents),
                    format_cents(cap)
                );
                findings.push(Finding::blocking(
                    Warning {
                        kind: WarningKind::CapExceeded,
                        company_id: Some(p.company_id),
                        message: message.clone(),
                        severity: Severity::Error,
                    },
                    message,
                ));
            }
        }
    }
    findings
}

/// Advisory: a company holding strictly more than the concentration limit
/// of total post-change reserves. Exactly at the limit does not trigger.
/// Integer arithmetic throughout; i128 intermediates so the cross products
/// cannot overflow.
pub fn check_high_concentration(ctx: &RuleContext<'_>) -> Vec<Finding> {
    let total_after: i64 = ctx.deltas.iter().map(|d| d.to_cents).sum();
    if total_after <= 0 {
        return Vec::new();
    }

    let limit_bps = ctx.thresholds.concentration_limit_bps;
    ctx.deltas
        .iter()
        .filter(|d| (d.to_cents as i128) * 10_000 > (total_after as i128) * (limit_bps as i128))
        .map(|d| {
            let share_bps = ((d.to_cents as i128) * 10_000 / (total_after as i128)) as i64;
            Finding::advisory(Warning {
                kind: WarningKind::HighConcentration,
                company_id: Some(d.company_id),
                message: format!(
                    "'{}' holds {} of reserves after reallocation (limit {})",
                    d.company_name,
                    format_bps(share_bps),
                    format_bps(limit_bps)
                ),
                severity: Severity::Warning,
            })
        })
        .collect()
}

/// Advisory: a single proposed allocation strictly above the conviction
/// limit of fund size.
pub fn check_unrealistic_conviction(ctx: &RuleContext<'_>) -> Vec<Finding> {
    let limit_bps = ctx.thresholds.conviction_limit_bps;
    ctx.proposed
        .iter()
        .filter(|p| {
            (p.planned_cents as i128) * 10_000
                > (ctx.fund_size_cents as i128) * (limit_bps as i128)
        })
        .map(|p| {
            Finding::advisory(Warning {
                kind: WarningKind::UnrealisticConviction,
                company_id: Some(p.company_id),
                message: format!(
                    "'{}' proposal {} exceeds {} of fund size {}",
                    display_name(ctx.current, p.company_id),
                    format_cents(p.planned_cents),
                    format_bps(limit_bps),
                    format_cents(ctx.fund_size_cents)
                ),
                severity: Severity::Warning,
            })
        })
        .collect()
}

// ─── Tests ────────────────────────────────────────────────────────────────────
