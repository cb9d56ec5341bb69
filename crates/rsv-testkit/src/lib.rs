//! Shared test fixtures for the reallocation crates.
//!
//! Builders keep scenario tests terse; the canned two-company fund mirrors
//! the reference walkthrough used across the engine and store tests
//! (Alpha id=1 planned $100 uncapped, Beta id=2 planned $200 capped $250,
//! version 3).

use rsv_schemas::{AllocationDelta, CompanyAllocation, DeltaStatus, ProposedAllocation};

/// Build a company allocation row with fund_id 1 and ACTIVE status.
pub fn company(
    company_id: i64,
    name: &str,
    planned_cents: i64,
    allocation_cap_cents: Option<i64>,
    allocation_version: i64,
) -> CompanyAllocation {
    CompanyAllocation {
        fund_id: 1,
        company_id,
        company_name: name.to_string(),
        planned_cents,
        allocation_cap_cents,
        allocation_version,
        status: "ACTIVE".to_string(),
        last_allocation_at: None,
    }
}

/// Build a proposal without a cap override.
pub fn proposal(company_id: i64, planned_cents: i64) -> ProposedAllocation {
    ProposedAllocation {
        company_id,
        planned_cents,
        allocation_cap_cents: None,
    }
}

/// Build a proposal that also overrides the stored cap.
pub fn proposal_with_cap(company_id: i64, planned_cents: i64, cap_cents: i64) -> ProposedAllocation {
    ProposedAllocation {
        company_id,
        planned_cents,
        allocation_cap_cents: Some(cap_cents),
    }
}

/// Two-company fund at version 3: Alpha $100.00 uncapped, Beta $200.00
/// capped at $250.00.
pub fn demo_fund() -> Vec<CompanyAllocation> {
    vec![
        company(1, "Alpha", 100_00, None, 3),
        company(2, "Beta", 200_00, Some(250_00), 3),
    ]
}

/// Fund size used alongside [`demo_fund`]: $10,000.00.
pub const DEMO_FUND_SIZE_CENTS: i64 = 10_000_00;

/// Assert-friendly summary of a delta: (company_id, from, to, status).
pub fn delta_tuple(d: &AllocationDelta) -> (i64, i64, i64, DeltaStatus) {
    (d.company_id, d.from_cents, d.to_cents, d.status)
}
