use rsv_engine::{compute_deltas, compute_totals, detect_issues, RuleContext, RuleThresholds};
use rsv_schemas::{DeltaStatus, Severity, WarningKind};
use rsv_testkit::{delta_tuple, demo_fund, proposal, DEMO_FUND_SIZE_CENTS};

// Reference walkthrough: Alpha $100 -> $150 (fine), Beta $200 -> $300
// (breaches its $250 cap). Deltas are still fully reported so the operator
// sees what they asked for; validation is blocking.
#[test]
fn scenario_cap_breach_reports_deltas_but_blocks() {
    let current = demo_fund();
    let proposed = vec![proposal(1, 150_00), proposal(2, 300_00)];

    let deltas = compute_deltas(&current, &proposed);
    assert_eq!(
        deltas.iter().map(delta_tuple).collect::<Vec<_>>(),
        vec![
            (1, 100_00, 150_00, DeltaStatus::Increased),
            (2, 200_00, 300_00, DeltaStatus::Increased),
        ]
    );
    assert_eq!(deltas[0].delta_cents, 50_00);
    assert_eq!(deltas[0].delta_pct, 50.0);
    assert_eq!(deltas[1].delta_cents, 100_00);
    assert_eq!(deltas[1].delta_pct, 50.0);

    let report = detect_issues(&RuleContext {
        current: &current,
        proposed: &proposed,
        deltas: &deltas,
        fund_size_cents: DEMO_FUND_SIZE_CENTS,
        thresholds: RuleThresholds::default(),
    });

    assert!(!report.is_valid());
    let cap = report
        .warnings
        .iter()
        .find(|w| w.kind == WarningKind::CapExceeded)
        .expect("cap_exceeded warning for Beta");
    assert_eq!(cap.company_id, Some(2));
    assert_eq!(cap.severity, Severity::Error);
}

// Same fund, both targets within every rule: clean preview.
#[test]
fn scenario_within_rules_is_clean_and_committable() {
    let current = demo_fund();
    let proposed = vec![proposal(1, 120_00), proposal(2, 220_00)];

    let deltas = compute_deltas(&current, &proposed);
    let totals = compute_totals(&deltas);
    assert_eq!(totals.total_before_cents, 300_00);
    assert_eq!(totals.total_after_cents, 340_00);
    assert_eq!(totals.delta_cents, 40_00);

    let report = detect_issues(&RuleContext {
        current: &current,
        proposed: &proposed,
        deltas: &deltas,
        fund_size_cents: DEMO_FUND_SIZE_CENTS,
        thresholds: RuleThresholds::default(),
    });
    assert!(report.is_valid());
    // Concentration advisories may fire in a two-company fund; nothing blocks.
    assert!(report
        .warnings
        .iter()
        .all(|w| w.severity == Severity::Warning));
}
