use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rsv_engine::{compute_deltas, compute_totals, detect_issues, RuleContext, RuleThresholds, VersionConsistency};
use rsv_schemas::{
    CommitOutcome, CommitReceipt, CommitRequest, CompanyAllocation, PreviewOutcome,
    PreviewRequest, PreviewResponse, ReallocationAudit, ValidationReport,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

pub use sqlx::PgPool;

pub const ENV_DB_URL: &str = "RSV_DATABASE_URL";

/// Connect to Postgres using RSV_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='company_allocations'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus { ok, has_allocations_table: exists })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_allocations_table: bool,
}

// ---------------------------------------------------------------------------
// Funds & seeding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FundRow {
    pub fund_id: i64,
    pub name: String,
    pub fund_size_cents: i64,
}

pub async fn fetch_fund(pool: &PgPool, fund_id: i64) -> Result<Option<FundRow>> {
    let row = sqlx::query(
        "select fund_id, name, fund_size_cents from funds where fund_id = $1",
    )
    .bind(fund_id)
    .fetch_optional(pool)
    .await
    .context("fetch_fund failed")?;

    row.map(fund_from_row).transpose()
}

fn fund_from_row(row: PgRow) -> Result<FundRow> {
    Ok(FundRow {
        fund_id: row.try_get("fund_id")?,
        name: row.try_get("name")?,
        fund_size_cents: row.try_get("fund_size_cents")?,
    })
}

/// Insert a fund row. Fund lifecycle is owned elsewhere; this exists for
/// the demo seeder and scenario tests.
pub async fn insert_fund(pool: &PgPool, fund: &NewFund) -> Result<()> {
    sqlx::query(
        "insert into funds (fund_id, name, fund_size_cents) values ($1, $2, $3)",
    )
    .bind(fund.fund_id)
    .bind(&fund.name)
    .bind(fund.fund_size_cents)
    .execute(pool)
    .await
    .context("insert_fund failed")?;

    Ok(())
}

#[derive(Debug, Clone)]
pub struct NewFund {
    pub fund_id: i64,
    pub name: String,
    pub fund_size_cents: i64,
}

/// Insert one company allocation row. Same ownership caveat as
/// [`insert_fund`]; the seeder must use one allocation_version for every
/// row of a fund.
pub async fn insert_allocation(pool: &PgPool, alloc: &NewAllocation) -> Result<()> {
    sqlx::query(
        r#"
        insert into company_allocations (
          fund_id, company_id, company_name, planned_cents, allocation_cap_cents,
          allocation_version, status
        ) values (
          $1, $2, $3, $4, $5, $6, $7
        )
        "#,
    )
    .bind(alloc.fund_id)
    .bind(alloc.company_id)
    .bind(&alloc.company_name)
    .bind(alloc.planned_cents)
    .bind(alloc.allocation_cap_cents)
    .bind(alloc.allocation_version)
    .bind(&alloc.status)
    .execute(pool)
    .await
    .context("insert_allocation failed")?;

    Ok(())
}

#[derive(Debug, Clone)]
pub struct NewAllocation {
    pub fund_id: i64,
    pub company_id: i64,
    pub company_name: String,
    pub planned_cents: i64,
    pub allocation_cap_cents: Option<i64>,
    pub allocation_version: i64,
    pub status: String,
}

// ---------------------------------------------------------------------------
// Allocation reads
// ---------------------------------------------------------------------------

const ALLOCATION_COLUMNS: &str = r#"
          fund_id,
          company_id,
          company_name,
          planned_cents,
          allocation_cap_cents,
          allocation_version,
          status,
          last_allocation_at
"#;

fn alloc_from_row(row: &PgRow) -> Result<CompanyAllocation> {
    Ok(CompanyAllocation {
        fund_id: row.try_get("fund_id")?,
        company_id: row.try_get("company_id")?,
        company_name: row.try_get("company_name")?,
        planned_cents: row.try_get("planned_cents")?,
        allocation_cap_cents: row.try_get("allocation_cap_cents")?,
        allocation_version: row.try_get("allocation_version")?,
        status: row.try_get("status")?,
        last_allocation_at: row.try_get("last_allocation_at")?,
    })
}

/// All company rows of a fund, company_id order. Lock-free.
pub async fn fetch_allocations(pool: &PgPool, fund_id: i64) -> Result<Vec<CompanyAllocation>> {
    let sql = format!(
        "select {ALLOCATION_COLUMNS} from company_allocations where fund_id = $1 order by company_id",
    );
    let rows = sqlx::query(&sql)
        .bind(fund_id)
        .fetch_all(pool)
        .await
        .context("fetch_allocations failed")?;

    rows.iter().map(alloc_from_row).collect()
}

/// Same read, but `select ... for update`: acquires a row lock on every
/// company row of the fund, serializing concurrent commits on that fund.
async fn lock_allocations(
    tx: &mut Transaction<'_, Postgres>,
    fund_id: i64,
) -> Result<Vec<CompanyAllocation>> {
    let sql = format!(
        "select {ALLOCATION_COLUMNS} from company_allocations where fund_id = $1 order by company_id for update",
    );
    let rows = sqlx::query(&sql)
        .bind(fund_id)
        .fetch_all(&mut **tx)
        .await
        .context("lock_allocations failed")?;

    rows.iter().map(alloc_from_row).collect()
}

/// Fund-size read inside the commit transaction. The fund row itself is
/// read-only in this subsystem, so no lock is taken on it.
async fn fetch_fund_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    fund_id: i64,
) -> Result<Option<FundRow>> {
    let row = sqlx::query(
        "select fund_id, name, fund_size_cents from funds where fund_id = $1",
    )
    .bind(fund_id)
    .fetch_optional(&mut **tx)
    .await
    .context("fetch fund inside commit failed")?;

    row.map(fund_from_row).transpose()
}

// ---------------------------------------------------------------------------
// Preview: read-only path
// ---------------------------------------------------------------------------

/// Request-shape errors caught before any business rule runs.
fn shape_errors(req: &PreviewRequest) -> Vec<String> {
    let mut errors = Vec::new();
    if req.proposed_allocations.is_empty() {
        errors.push("proposed_allocations must contain at least one entry".to_string());
    }
    errors
}

fn build_response(
    current: &[CompanyAllocation],
    req: &PreviewRequest,
    fund_size_cents: i64,
    thresholds: RuleThresholds,
) -> PreviewResponse {
    let deltas = compute_deltas(current, &req.proposed_allocations);
    let totals = compute_totals(&deltas);
    let report = detect_issues(&RuleContext {
        current,
        proposed: &req.proposed_allocations,
        deltas: &deltas,
        fund_size_cents,
        thresholds,
    });

    let mut errors = shape_errors(req);
    errors.extend(report.errors.clone());

    PreviewResponse {
        deltas,
        totals,
        warnings: report.warnings,
        validation: ValidationReport {
            is_valid: errors.is_empty(),
            errors,
        },
    }
}

/// Read-only preview of a proposed reallocation.
///
/// Takes no locks; any number of callers may preview the same fund
/// concurrently, and the result may be stale by the time a commit is
/// attempted (the commit re-validates under lock).
pub async fn preview_reallocation(
    pool: &PgPool,
    req: &PreviewRequest,
    thresholds: RuleThresholds,
) -> Result<PreviewOutcome> {
    let current = fetch_allocations(pool, req.fund_id).await?;
    if current.is_empty() {
        return Ok(PreviewOutcome::FundNotFound);
    }

    let vc = VersionConsistency::evaluate(
        req.current_version,
        current.iter().map(|c| c.allocation_version),
    );
    if !vc.consistent {
        if vc.is_fractured() {
            warn!(
                fund_id = req.fund_id,
                actual_versions = ?vc.actual_versions,
                "fund holds multiple allocation versions; prior non-atomic write"
            );
        }
        return Ok(PreviewOutcome::VersionConflict(vc.into_conflict()));
    }

    let fund = fetch_fund(pool, req.fund_id)
        .await?
        .ok_or_else(|| anyhow!("fund {} has allocations but no fund row", req.fund_id))?;

    Ok(PreviewOutcome::Report(build_response(
        &current,
        req,
        fund.fund_size_cents,
        thresholds,
    )))
}

// ---------------------------------------------------------------------------
// Commit: transactional write path
// ---------------------------------------------------------------------------

/// Commit a reallocation: lock, re-validate, batch-write, audit, all
/// inside one transaction, all-or-nothing.
///
/// Every rejection path rolls back with nothing written. Concurrent
/// commits on the same fund serialize on the row locks; commits on
/// different funds never contend. No retries happen here: a conflict or
/// rejection goes back to the operator, who re-previews against fresh
/// state.
pub async fn commit_reallocation(
    pool: &PgPool,
    req: &CommitRequest,
    thresholds: RuleThresholds,
) -> Result<CommitOutcome> {
    let fund_id = req.preview.fund_id;

    let mut tx = pool.begin().await.context("begin commit transaction")?;

    // 1. Row-lock every company row of the fund; later steps read only
    //    this locked snapshot.
    let current = lock_allocations(&mut tx, fund_id).await?;
    if current.is_empty() {
        tx.rollback().await.context("rollback failed")?;
        return Ok(CommitOutcome::FundNotFound);
    }

    // 2. Version guard under the lock.
    let vc = VersionConsistency::evaluate(
        req.preview.current_version,
        current.iter().map(|c| c.allocation_version),
    );
    if !vc.consistent {
        if vc.is_fractured() {
            warn!(
                fund_id,
                actual_versions = ?vc.actual_versions,
                "fund holds multiple allocation versions; prior non-atomic write"
            );
        }
        tx.rollback().await.context("rollback failed")?;
        return Ok(CommitOutcome::VersionConflict(vc.into_conflict()));
    }
    let baseline_version = current[0].allocation_version;

    // 3. Re-validate against the locked state; preview results may be stale.
    let fund = fetch_fund_in_tx(&mut tx, fund_id)
        .await?
        .ok_or_else(|| anyhow!("fund {fund_id} has allocations but no fund row"))?;

    let response = build_response(&current, &req.preview, fund.fund_size_cents, thresholds);
    if !response.validation.is_valid {
        tx.rollback().await.context("rollback failed")?;
        return Ok(CommitOutcome::Rejected(response.validation));
    }

    // 4. One batched update across the whole fund: targets where proposed,
    //    cap only where explicitly overridden, version bump + timestamp on
    //    every row so the fund-wide single-version invariant holds.
    let updated_count =
        apply_batched_update(&mut tx, fund_id, &req.preview).await?;

    // 5. One append-only audit record carrying the full delta list.
    let audit = ReallocationAudit {
        audit_id: Uuid::new_v4(),
        fund_id,
        user_id: req.user_id,
        baseline_version,
        new_version: baseline_version + 1,
        deltas: response.deltas,
        reason: req.reason.clone(),
        created_at_utc: Utc::now(),
    };
    insert_audit(&mut tx, &audit).await?;

    tx.commit().await.context("commit transaction failed")?;

    info!(
        fund_id,
        new_version = audit.new_version,
        updated_count,
        "reallocation committed"
    );

    Ok(CommitOutcome::Applied(CommitReceipt {
        new_version: audit.new_version,
        updated_count,
        audit_id: audit.audit_id,
        committed_at_utc: audit.created_at_utc,
    }))
}

/// The batched write. A single statement touches every row of the fund:
/// the unnest mapping carries per-company targets, the left join carries
/// untouched companies through, and the version bump applies uniformly.
/// One statement means a crash can never leave a partial-version state.
async fn apply_batched_update(
    tx: &mut Transaction<'_, Postgres>,
    fund_id: i64,
    req: &PreviewRequest,
) -> Result<u64> {
    let mut company_ids: Vec<i64> = Vec::with_capacity(req.proposed_allocations.len());
    let mut planned: Vec<i64> = Vec::with_capacity(req.proposed_allocations.len());
    let mut set_cap: Vec<bool> = Vec::with_capacity(req.proposed_allocations.len());
    let mut caps: Vec<i64> = Vec::with_capacity(req.proposed_allocations.len());

    for p in &req.proposed_allocations {
        company_ids.push(p.company_id);
        planned.push(p.planned_cents);
        set_cap.push(p.allocation_cap_cents.is_some());
        caps.push(p.allocation_cap_cents.unwrap_or(0));
    }

    let res = sqlx::query(
        r#"
        update company_allocations as ca
        set planned_cents        = coalesce(p.new_planned_cents, ca.planned_cents),
            allocation_cap_cents = case when p.set_cap then p.new_cap_cents
                                        else ca.allocation_cap_cents end,
            allocation_version   = ca.allocation_version + 1,
            last_allocation_at   = now()
        from (
            select c.company_id,
                   u.new_planned_cents,
                   coalesce(u.set_cap, false) as set_cap,
                   u.new_cap_cents
            from company_allocations c
            left join unnest($2::bigint[], $3::bigint[], $4::boolean[], $5::bigint[])
                   as u(company_id, new_planned_cents, set_cap, new_cap_cents)
              on u.company_id = c.company_id
            where c.fund_id = $1
        ) as p
        where ca.fund_id = $1
          and ca.company_id = p.company_id
        "#,
    )
    .bind(fund_id)
    .bind(&company_ids)
    .bind(&planned)
    .bind(&set_cap)
    .bind(&caps)
    .execute(&mut **tx)
    .await
    .context("batched allocation update failed")?;

    Ok(res.rows_affected())
}

// ---------------------------------------------------------------------------
// Audit trail
// ---------------------------------------------------------------------------

async fn insert_audit(
    tx: &mut Transaction<'_, Postgres>,
    audit: &ReallocationAudit,
) -> Result<()> {
    let deltas =
        serde_json::to_value(&audit.deltas).context("serialize audit deltas failed")?;

    sqlx::query(
        r#"
        insert into reallocation_audit (
          audit_id, fund_id, user_id, baseline_version, new_version, deltas,
          reason, created_at_utc
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8
        )
        "#,
    )
    .bind(audit.audit_id)
    .bind(audit.fund_id)
    .bind(audit.user_id)
    .bind(audit.baseline_version)
    .bind(audit.new_version)
    .bind(deltas)
    .bind(&audit.reason)
    .bind(audit.created_at_utc)
    .execute(&mut **tx)
    .await
    .context("insert_audit failed")?;

    Ok(())
}

/// Full audit trail of a fund, oldest first.
pub async fn fetch_audit_records(pool: &PgPool, fund_id: i64) -> Result<Vec<ReallocationAudit>> {
    let rows = sqlx::query(
        r#"
        select audit_id, fund_id, user_id, baseline_version, new_version, deltas,
               reason, created_at_utc
        from reallocation_audit
        where fund_id = $1
        order by created_at_utc, audit_id
        "#,
    )
    .bind(fund_id)
    .fetch_all(pool)
    .await
    .context("fetch_audit_records failed")?;

    rows.into_iter()
        .map(|row| {
            let deltas: serde_json::Value = row.try_get("deltas")?;
            Ok(ReallocationAudit {
                audit_id: row.try_get("audit_id")?,
                fund_id: row.try_get("fund_id")?,
                user_id: row.try_get("user_id")?,
                baseline_version: row.try_get("baseline_version")?,
                new_version: row.try_get("new_version")?,
                deltas: serde_json::from_value(deltas)
                    .context("parse audit deltas failed")?,
                reason: row.try_get("reason")?,
                created_at_utc: row.try_get("created_at_utc")?,
            })
        })
        .collect()
}

/// Count of audit records across all funds; the CLI migrate guardrail
/// refuses to touch a store that already has committed history without an
/// explicit acknowledgement.
pub async fn count_audit_records(pool: &PgPool) -> Result<i64> {
    let st = status(pool).await?;
    if !st.has_allocations_table {
        return Ok(0);
    }

    let (n,): (i64,) =
        sqlx::query_as::<_, (i64,)>("select count(*)::bigint from reallocation_audit")
            .fetch_one(pool)
            .await
            .context("count_audit_records failed")?;

    Ok(n)
}
