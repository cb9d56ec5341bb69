//! Delta calculator.
//!
//! Pure before/after computation. Exactly one delta per *current* company,
//! in company_id order, regardless of how many proposals were supplied:
//! companies without a matching proposal are carried through unchanged, and
//! proposals for unknown companies contribute no delta (the rule engine
//! reports them as blocking errors instead).

use rsv_schemas::{AllocationDelta, CompanyAllocation, DeltaStatus, ProposedAllocation, ReallocationTotals};
use std::collections::BTreeMap;

/// Percentage change with the zero-baseline policy: a move from 0 to any
/// positive amount reads as +100 %, a move from 0 to 0 as 0 %.
fn pct_change(from_cents: i64, to_cents: i64) -> f64 {
    if from_cents == 0 {
        if to_cents > 0 {
            100.0
        } else {
            0.0
        }
    } else {
        (to_cents - from_cents) as f64 * 100.0 / from_cents as f64
    }
}

fn status_of(delta_cents: i64) -> DeltaStatus {
    match delta_cents.signum() {
        1 => DeltaStatus::Increased,
        -1 => DeltaStatus::Decreased,
        _ => DeltaStatus::Unchanged,
    }
}

/// Compute per-company deltas from current state + a proposed target set.
pub fn compute_deltas(
    current: &[CompanyAllocation],
    proposed: &[ProposedAllocation],
) -> Vec<AllocationDelta> {
    let targets: BTreeMap<i64, i64> = proposed
        .iter()
        .map(|p| (p.company_id, p.planned_cents))
        .collect();

    let mut rows: Vec<&CompanyAllocation> = current.iter().collect();
    rows.sort_by_key(|c| c.company_id);

    rows.into_iter()
        .map(|c| {
            let to_cents = targets.get(&c.company_id).copied().unwrap_or(c.planned_cents);
            let delta_cents = to_cents - c.planned_cents;
            AllocationDelta {
                company_id: c.company_id,
                company_name: c.company_name.clone(),
                from_cents: c.planned_cents,
                to_cents,
                delta_cents,
                delta_pct: pct_change(c.planned_cents, to_cents),
                status: status_of(delta_cents),
            }
        })
        .collect()
}

/// Fund-wide totals over a delta list, same zero-baseline percentage policy
/// as the per-company deltas.
pub fn compute_totals(deltas: &[AllocationDelta]) -> ReallocationTotals {
    let total_before_cents: i64 = deltas.iter().map(|d| d.from_cents).sum();
    let total_after_cents: i64 = deltas.iter().map(|d| d.to_cents).sum();
    ReallocationTotals {
        total_before_cents,
        total_after_cents,
        delta_cents: total_after_cents - total_before_cents,
        delta_pct: pct_change(total_before_cents, total_after_cents),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsv_testkit::{company, proposal};

    #[test]
    fn one_delta_per_current_company() {
        let current = vec![
            company(1, "Alpha", 100_00, None, 3),
            company(2, "Beta", 200_00, Some(250_00), 3),
            company(3, "Gamma", 0, None, 3),
        ];
        // One matching proposal, one for an unknown company.
        let proposed = vec![proposal(2, 220_00), proposal(99, 50_00)];

        let deltas = compute_deltas(&current, &proposed);
        assert_eq!(deltas.len(), 3);
        assert_eq!(
            deltas.iter().map(|d| d.company_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn unmatched_company_carried_through_unchanged() {
        let current = vec![company(1, "Alpha", 100_00, None, 1)];
        let deltas = compute_deltas(&current, &[]);
        assert_eq!(deltas[0].from_cents, 100_00);
        assert_eq!(deltas[0].to_cents, 100_00);
        assert_eq!(deltas[0].delta_cents, 0);
        assert_eq!(deltas[0].delta_pct, 0.0);
        assert_eq!(deltas[0].status, DeltaStatus::Unchanged);
    }

    #[test]
    fn increase_and_decrease_status() {
        let current = vec![
            company(1, "Alpha", 100_00, None, 1),
            company(2, "Beta", 200_00, None, 1),
        ];
        let proposed = vec![proposal(1, 150_00), proposal(2, 150_00)];
        let deltas = compute_deltas(&current, &proposed);

        assert_eq!(deltas[0].status, DeltaStatus::Increased);
        assert_eq!(deltas[0].delta_cents, 50_00);
        assert_eq!(deltas[0].delta_pct, 50.0);

        assert_eq!(deltas[1].status, DeltaStatus::Decreased);
        assert_eq!(deltas[1].delta_cents, -50_00);
        assert_eq!(deltas[1].delta_pct, -25.0);
    }

    #[test]
    fn zero_baseline_pct_policy() {
        let current = vec![
            company(1, "Alpha", 0, None, 1),
            company(2, "Beta", 0, None, 1),
        ];
        let proposed = vec![proposal(1, 75_00), proposal(2, 0)];
        let deltas = compute_deltas(&current, &proposed);

        // 0 -> positive reads as +100 %
        assert_eq!(deltas[0].delta_pct, 100.0);
        // 0 -> 0 reads as 0 %
        assert_eq!(deltas[1].delta_pct, 0.0);
    }

    #[test]
    fn rows_sorted_by_company_id_regardless_of_input_order() {
        let current = vec![
            company(7, "Gamma", 10_00, None, 1),
            company(2, "Beta", 10_00, None, 1),
            company(5, "Alpha", 10_00, None, 1),
        ];
        let deltas = compute_deltas(&current, &[]);
        assert_eq!(
            deltas.iter().map(|d| d.company_id).collect::<Vec<_>>(),
            vec![2, 5, 7]
        );
    }

    #[test]
    fn totals_aggregate_and_pct() {
        let current = vec![
            company(1, "Alpha", 100_00, None, 1),
            company(2, "Beta", 200_00, None, 1),
        ];
        let proposed = vec![proposal(1, 150_00), proposal(2, 300_00)];
        let totals = compute_totals(&compute_deltas(&current, &proposed));

        assert_eq!(totals.total_before_cents, 300_00);
        assert_eq!(totals.total_after_cents, 450_00);
        assert_eq!(totals.delta_cents, 150_00);
        assert_eq!(totals.delta_pct, 50.0);
    }

    #[test]
    fn totals_zero_baseline() {
        let current = vec![company(1, "Alpha", 0, None, 1)];
        let proposed = vec![proposal(1, 10_00)];
        let totals = compute_totals(&compute_deltas(&current, &proposed));
        assert_eq!(totals.delta_pct, 100.0);

        let empty = compute_totals(&compute_deltas(&[], &[]));
        assert_eq!(empty.delta_pct, 0.0);
        assert_eq!(empty.total_after_cents, 0);
    }

    #[test]
    fn idempotent_on_identical_inputs() {
        let current = vec![
            company(1, "Alpha", 100_00, None, 3),
            company(2, "Beta", 200_00, Some(250_00), 3),
        ];
        let proposed = vec![proposal(1, 120_00), proposal(2, 220_00)];
        let a = compute_deltas(&current, &proposed);
        let b = compute_deltas(&current, &proposed);
        assert_eq!(a, b);
    }
}
