use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rsv_engine::RuleThresholds;
use rsv_money::{dollars_to_cents, format_cents};
use rsv_schemas::{
    CommitOutcome, CommitRequest, PreviewOutcome, PreviewRequest, PreviewResponse,
    ProposedAllocation, Severity, VersionConflict, Warning, WarningKind,
};

#[derive(Parser)]
#[command(name = "rsv")]
#[command(about = "ReserveDesk reallocation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Preview a reallocation (read-only, takes no locks)
    Preview {
        #[command(flatten)]
        req: RequestArgs,
    },

    /// Commit a reallocation (transactional, all-or-nothing)
    Commit {
        #[command(flatten)]
        req: RequestArgs,

        /// Free-text reason recorded in the audit trail
        #[arg(long)]
        reason: Option<String>,

        /// Acting user id recorded in the audit trail
        #[arg(long)]
        user: Option<i64>,
    },

    /// Audit trail utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> desk -> fund overrides)
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(clap::Args)]
struct RequestArgs {
    /// Fund id
    #[arg(long)]
    fund: i64,

    /// The allocation_version last read (optimistic-lock baseline)
    #[arg(long)]
    version: i64,

    /// Proposed target, repeatable: company_id=dollars[:cap_dollars]
    /// (e.g. --set 1=150.00 --set 2=300:400)
    #[arg(long = "set", required = true)]
    set: Vec<String>,

    /// Layered config paths in merge order (rule threshold overrides)
    #[arg(long = "config")]
    config_paths: Vec<String>,
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations. Guardrail: refuses when the store already holds
    /// committed audit history unless --yes is provided.
    Migrate {
        /// Acknowledge you are migrating a store with committed history.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },

    /// Seed a small demo fund and print its id.
    SeedDemo,
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Export a fund's audit trail to a tamper-evident JSONL file.
    Export {
        #[arg(long)]
        fund: i64,

        /// Output path (appended to if it exists; chain is not resumed)
        #[arg(long)]
        out: String,

        /// Disable the SHA-256 hash chain on the export
        #[arg(long, default_value_t = false)]
        no_hash_chain: bool,
    },

    /// Verify the hash chain of an exported audit trail.
    Verify {
        #[arg(long)]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = rsv_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = rsv_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_allocations_table={}",
                        s.ok, s.has_allocations_table
                    );
                }
                DbCmd::Migrate { yes } => {
                    let n = rsv_db::count_audit_records(&pool).await?;
                    if n > 0 && !yes {
                        bail!(
                            "REFUSING MIGRATE: store holds {} committed audit record(s). Re-run with: `rsv db migrate --yes`",
                            n
                        );
                    }

                    rsv_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
                DbCmd::SeedDemo => {
                    let fund_id = seed_demo(&pool).await?;
                    println!("fund_id={fund_id}");
                    println!("allocation_version=1");
                }
            }
        }

        Commands::Preview { req } => {
            let pool = rsv_db::connect_from_env().await?;
            let (request, thresholds) = build_request(&req)?;

            match rsv_db::preview_reallocation(&pool, &request, thresholds).await? {
                PreviewOutcome::Report(report) => {
                    print_report(&report);
                    if !report.validation.is_valid {
                        bail!("PREVIEW_INVALID: request has blocking errors");
                    }
                }
                PreviewOutcome::FundNotFound => bail!("fund {} not found", request.fund_id),
                PreviewOutcome::VersionConflict(c) => bail_conflict(&c)?,
            }
        }

        Commands::Commit { req, reason, user } => {
            let pool = rsv_db::connect_from_env().await?;
            let (request, thresholds) = build_request(&req)?;

            let commit = CommitRequest {
                preview: request,
                reason,
                user_id: user,
            };
            match rsv_db::commit_reallocation(&pool, &commit, thresholds).await? {
                CommitOutcome::Applied(receipt) => {
                    println!("committed=true");
                    println!("new_version={}", receipt.new_version);
                    println!("updated_count={}", receipt.updated_count);
                    println!("audit_id={}", receipt.audit_id);
                    println!("committed_at_utc={}", receipt.committed_at_utc.to_rfc3339());
                }
                CommitOutcome::FundNotFound => {
                    bail!("fund {} not found", commit.preview.fund_id)
                }
                CommitOutcome::VersionConflict(c) => bail_conflict(&c)?,
                CommitOutcome::Rejected(validation) => {
                    for e in &validation.errors {
                        println!("error={e}");
                    }
                    bail!("COMMIT_REJECTED: nothing was written; re-preview with corrected input");
                }
            }
        }

        Commands::Audit { cmd } => match cmd {
            AuditCmd::Export {
                fund,
                out,
                no_hash_chain,
            } => {
                let pool = rsv_db::connect_from_env().await?;
                let records = rsv_db::fetch_audit_records(&pool, fund).await?;

                let mut exporter = rsv_audit::AuditExporter::new(&out, !no_hash_chain)?;
                for record in &records {
                    exporter.append(record)?;
                }
                println!("exported={} path={}", records.len(), out);
            }
            AuditCmd::Verify { path } => match rsv_audit::verify_hash_chain(&path)? {
                rsv_audit::VerifyResult::Valid { lines } => {
                    println!("chain_valid=true lines={lines}");
                }
                rsv_audit::VerifyResult::Broken { line, reason } => {
                    bail!("AUDIT_CHAIN_BROKEN line={line}: {reason}");
                }
            },
        },

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = rsv_config::load_layered(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}

fn build_request(args: &RequestArgs) -> Result<(PreviewRequest, RuleThresholds)> {
    let mut proposed = Vec::with_capacity(args.set.len());
    for s in &args.set {
        proposed.push(parse_proposal_arg(s)?);
    }

    let thresholds = if args.config_paths.is_empty() {
        RuleThresholds::default()
    } else {
        let path_refs: Vec<&str> = args.config_paths.iter().map(|s| s.as_str()).collect();
        let loaded = rsv_config::load_layered(&path_refs)?;
        rsv_config::rule_thresholds(&loaded.config_json)?
    };

    Ok((
        PreviewRequest {
            fund_id: args.fund,
            current_version: args.version,
            proposed_allocations: proposed,
        },
        thresholds,
    ))
}

/// Parse one `--set` operand: `company_id=dollars[:cap_dollars]`.
/// Dollar amounts are converted to exact integer cents at the edge.
fn parse_proposal_arg(s: &str) -> Result<ProposedAllocation> {
    let (id_part, amount_part) = s
        .split_once('=')
        .with_context(|| format!("--set '{s}': expected company_id=dollars[:cap_dollars]"))?;

    let company_id: i64 = id_part
        .trim()
        .parse()
        .with_context(|| format!("--set '{s}': invalid company_id"))?;

    let (planned_part, cap_part) = match amount_part.split_once(':') {
        Some((p, c)) => (p, Some(c)),
        None => (amount_part, None),
    };

    let planned_dollars: f64 = planned_part
        .trim()
        .parse()
        .with_context(|| format!("--set '{s}': invalid dollar amount"))?;
    let planned_cents = dollars_to_cents(planned_dollars)
        .with_context(|| format!("--set '{s}': unrepresentable dollar amount"))?;

    let allocation_cap_cents = match cap_part {
        Some(c) => {
            let cap_dollars: f64 = c
                .trim()
                .parse()
                .with_context(|| format!("--set '{s}': invalid cap amount"))?;
            Some(
                dollars_to_cents(cap_dollars)
                    .with_context(|| format!("--set '{s}': unrepresentable cap amount"))?,
            )
        }
        None => None,
    };

    Ok(ProposedAllocation {
        company_id,
        planned_cents,
        allocation_cap_cents,
    })
}

fn print_report(report: &PreviewResponse) {
    for d in &report.deltas {
        println!(
            "delta company_id={} name='{}' {} -> {} ({}{}, {:+.1}%)",
            d.company_id,
            d.company_name,
            format_cents(d.from_cents),
            format_cents(d.to_cents),
            if d.delta_cents >= 0 { "+" } else { "" },
            format_cents(d.delta_cents),
            d.delta_pct,
        );
    }
    println!(
        "totals {} -> {} ({}{}, {:+.1}%)",
        format_cents(report.totals.total_before_cents),
        format_cents(report.totals.total_after_cents),
        if report.totals.delta_cents >= 0 { "+" } else { "" },
        format_cents(report.totals.delta_cents),
        report.totals.delta_pct,
    );
    for w in &report.warnings {
        println!(
            "warning kind={} severity={}{} message='{}'",
            warning_kind_str(w),
            severity_str(w.severity),
            w.company_id
                .map(|id| format!(" company_id={id}"))
                .unwrap_or_default(),
            w.message,
        );
    }
    println!("is_valid={}", report.validation.is_valid);
    for e in &report.validation.errors {
        println!("error={e}");
    }
}

fn bail_conflict(c: &VersionConflict) -> Result<()> {
    let actuals: Vec<String> = c.actual_versions.iter().map(|v| v.to_string()).collect();
    bail!(
        "VERSION_CONFLICT: expected {} found [{}]; re-preview against the current version",
        c.expected_version,
        actuals.join(",")
    );
}

fn warning_kind_str(w: &Warning) -> &'static str {
    match w.kind {
        WarningKind::CapExceeded => "cap_exceeded",
        WarningKind::NegativeDelta => "negative_delta",
        WarningKind::HighConcentration => "high_concentration",
        WarningKind::UnrealisticConviction => "unrealistic_conviction",
    }
}

fn severity_str(s: Severity) -> &'static str {
    match s {
        Severity::Warning => "warning",
        Severity::Error => "error",
    }
}

/// Seed the demo fund: Alpha $100 uncapped, Beta $200 capped $250, plus an
/// unallocated Gamma. Fund id derives from the current time so repeated
/// seeds never collide.
async fn seed_demo(pool: &rsv_db::PgPool) -> Result<i64> {
    use chrono::Utc;

    let fund_id = Utc::now().timestamp_micros();
    rsv_db::insert_fund(
        pool,
        &rsv_db::NewFund {
            fund_id,
            name: format!("Demo Fund {fund_id}"),
            fund_size_cents: 10_000_00,
        },
    )
    .await?;

    for (company_id, name, planned_cents, cap) in [
        (1_i64, "Alpha", 100_00_i64, None),
        (2, "Beta", 200_00, Some(250_00)),
        (3, "Gamma", 0, None),
    ] {
        rsv_db::insert_allocation(
            pool,
            &rsv_db::NewAllocation {
                fund_id,
                company_id,
                company_name: name.to_string(),
                planned_cents,
                allocation_cap_cents: cap,
                allocation_version: 1,
                status: "ACTIVE".to_string(),
            },
        )
        .await?;
    }

    Ok(fund_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_set_without_cap() {
        let p = parse_proposal_arg("1=150.00").unwrap();
        assert_eq!(p.company_id, 1);
        assert_eq!(p.planned_cents, 150_00);
        assert_eq!(p.allocation_cap_cents, None);
    }

    #[test]
    fn parse_set_with_cap() {
        let p = parse_proposal_arg("2=300:400").unwrap();
        assert_eq!(p.company_id, 2);
        assert_eq!(p.planned_cents, 300_00);
        assert_eq!(p.allocation_cap_cents, Some(400_00));
    }

    #[test]
    fn parse_set_fractional_cents_round_to_nearest() {
        let p = parse_proposal_arg("7=0.005").unwrap();
        assert_eq!(p.planned_cents, 1);
    }

    #[test]
    fn parse_set_rejects_garbage() {
        assert!(parse_proposal_arg("no-equals").is_err());
        assert!(parse_proposal_arg("x=100").is_err());
        assert!(parse_proposal_arg("1=abc").is_err());
        assert!(parse_proposal_arg("1=100:xyz").is_err());
    }
}
