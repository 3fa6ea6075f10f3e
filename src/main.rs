use anyhow::{bail, Context, Result};
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use ledger_curator::{
    ingest, read_parsed_rows, AmendmentEngine, ChangedStore, Project, ReconciliationEngine,
};

const USAGE: &str = "usage:
  ledger-curator ingest <project> <account> <parsed.csv>
  ledger-curator reconcile <project> unresolved|pending
  ledger-curator amend <project> <rules.json>
  ledger-curator check <project>";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let words: Vec<&str> = args.iter().map(String::as_str).collect();

    match words.as_slice() {
        ["ingest", project, account, parsed] => run_ingest(project, account, parsed),
        ["reconcile", project, changed] => run_reconcile(project, changed),
        ["amend", project, rules] => run_amend(project, rules),
        ["check", project] => run_check(project),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

fn run_ingest(root: &str, account: &str, parsed: &str) -> Result<()> {
    println!("📥 Ingest - {} → {}", parsed, root);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let project = Project::init(root).with_context(|| format!("Failed to open project {}", root))?;
    let config = project.load_config().context("Failed to load curator.toml")?;
    let mut stores = project.load().context("Failed to load project stores")?;

    let parsed_path = Path::new(parsed);
    let rows = read_parsed_rows(parsed_path)
        .with_context(|| format!("Failed to read parsed rows from {}", parsed))?;
    let source = parsed_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| parsed.to_string());

    let report = ingest(&mut stores, account, &source, rows, &config)?;
    project
        .save(&stores, &format!("ingest_{}", account), config.persist.archive)
        .context("Failed to commit stores")?;

    if config.persist.audit {
        project.audit_log()?.record_ingest(&report)?;
    }

    println!("\n✓ {}", report.summary());
    if !report.new_pending.is_empty() {
        println!("⚠️  {} new fuzzy matches waiting in pending.csv", report.new_pending.len());
    }
    if !report.new_unresolved.is_empty() {
        println!("⚠️  {} new labels in unresolved.csv", report.new_unresolved.len());
    }
    if !report.balance_breaks.is_empty() {
        println!("⚠️  running balance breaks at rows {:?}", report.balance_breaks);
    }

    Ok(())
}

fn run_reconcile(root: &str, changed: &str) -> Result<()> {
    let changed: ChangedStore = changed
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    println!("🔄 Reconcile - {} edits in {}", changed, root);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let project = Project::open(root);
    let config = project.load_config().context("Failed to load curator.toml")?;
    let mut stores = project.load().context("Failed to load project stores")?;

    let report = ReconciliationEngine::new().reconcile(changed, &mut stores)?;

    if report.is_noop() && !report.has_skipped() {
        println!("\n✓ Nothing to reconcile");
        return Ok(());
    }

    if !report.is_noop() {
        project
            .save(&stores, &format!("reconcile_{}", changed), config.persist.archive)
            .context("Failed to commit stores")?;
    }

    if config.persist.audit {
        project.audit_log()?.record_reconciliation(&report)?;
    }

    println!("\n✓ {}", report.summary());
    for skipped in &report.skipped {
        println!("⚠️  skipped {}: {}", skipped.key, skipped.reason);
    }

    Ok(())
}

fn run_amend(root: &str, rules: &str) -> Result<()> {
    println!("✏️  Amend - {} on {}", rules, root);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let engine = AmendmentEngine::from_file(rules)?;
    let project = Project::open(root);
    let config = project.load_config().context("Failed to load curator.toml")?;
    let mut stores = project.load().context("Failed to load project stores")?;

    let report = engine.apply(&mut stores.ledger);
    if report.amended() == 0 {
        println!("\n✓ No ledger rows selected");
        return Ok(());
    }

    project
        .save(&stores, "amend", config.persist.archive)
        .context("Failed to commit stores")?;

    println!("\n✓ {} rows set to manual ({} changed category)", report.amended(), report.changed);
    for (rule, rows) in &report.by_rule {
        println!("   {} → {} rows", rule, rows.len());
    }

    Ok(())
}

fn run_check(root: &str) -> Result<()> {
    println!("🔍 Check - {}", root);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let project = Project::open(root);
    let recovery = project.recover()?;
    let config = project.load_config().context("Failed to load curator.toml")?;
    let stores = project.load().context("Failed to load project stores")?;

    println!("\n✓ Project: {}", project.root().display());
    println!("✓ Recovery: {:?}", recovery);
    println!("✓ Fuzzy threshold: {}", config.fuzzy.threshold);
    println!("✓ Ledger: {} rows", stores.ledger.len());
    println!("✓ Confirmed: {} | Unresolved: {} | Pending: {}",
        stores.confirmed.len(), stores.unresolved.len(), stores.pending.len());

    let awaiting = stores
        .pending
        .rows()
        .iter()
        .filter(|row| row.decision() != ledger_curator::ReviewDecision::Hold)
        .count();
    let resolved = stores.unresolved.rows().iter().filter(|row| row.is_resolved()).count();
    println!("✓ Reviewed, not yet reconciled: {} pending, {} unresolved", awaiting, resolved);

    let overlaps = stores.overlapping_keys();
    if !overlaps.is_empty() {
        for (key, homes) in &overlaps {
            println!("❌ {} is in {}", key, homes.join(" and "));
        }
        bail!("{} keys live in more than one exception store", overlaps.len());
    }
    if !stores.ledger.sequence_is_monotonic() {
        bail!("ledger sequence ids are not strictly increasing");
    }

    println!("\n✅ Stores are consistent");
    Ok(())
}
