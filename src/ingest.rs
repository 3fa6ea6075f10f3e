// 📥 Ingestion - one account's freshly parsed rows into the ledger
//
// Deduplicator → Resolution Engine (per row) → ledger append.
// New pending / unresolved rows are inserted into the stores as a side effect;
// the caller commits the whole snapshot afterwards.

use crate::config::CuratorConfig;
use crate::deduplication::DeduplicationEngine;
use crate::error::Result;
use crate::ledger::LedgerEntry;
use crate::model::{ParsedRow, Provenance, StoreKey};
use crate::normalize::normalize;
use crate::resolve::ResolutionEngine;
use crate::similarity::FuzzyMatch;
use crate::stores::Stores;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Balances that disagree by less than this are considered continuous.
const BALANCE_TOLERANCE: f64 = 1e-3;

// ============================================================================
// INGEST REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbiguousMatch {
    pub key: StoreKey,
    pub chosen: String,
    pub tied_with: Vec<String>,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub account: String,
    pub source: String,
    pub received: usize,
    pub duplicates: usize,

    /// Sequence ids of the rows appended to the ledger
    pub appended: Vec<u64>,

    pub by_provenance: BTreeMap<Provenance, usize>,

    /// Keys newly added to the pending fuzzy store
    pub new_pending: Vec<StoreKey>,

    /// Keys newly added to the unresolved set
    pub new_unresolved: Vec<StoreKey>,

    pub ambiguous: Vec<AmbiguousMatch>,

    /// Indexes (into the parsed rows) where the running balance breaks
    pub balance_breaks: Vec<usize>,

    /// Indexes of parsed rows identical to an earlier row of the same batch
    pub in_batch_duplicates: Vec<usize>,
}

impl IngestReport {
    /// Nothing new was loaded although rows were received.
    pub fn resubmitted(&self) -> bool {
        self.received > 0 && self.appended.is_empty()
    }

    pub fn count(&self, provenance: Provenance) -> usize {
        self.by_provenance.get(&provenance).copied().unwrap_or(0)
    }

    pub fn summary(&self) -> String {
        let breakdown = self
            .by_provenance
            .iter()
            .map(|(p, n)| format!("{}={}", p, n))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{} ({}): {} received, {} duplicates, {} appended [{}]",
            self.account,
            self.source,
            self.received,
            self.duplicates,
            self.appended.len(),
            breakdown
        )
    }
}

// ============================================================================
// BALANCE CONTINUITY
// ============================================================================

/// Indexes `n` where `balance[n] != balance[n-1] + amount[n]`.
///
/// Only consecutive rows that both carry a balance are compared.
pub fn balance_breaks(rows: &[ParsedRow]) -> Vec<usize> {
    rows.windows(2)
        .enumerate()
        .filter_map(|(i, pair)| match (pair[0].balance, pair[1].balance) {
            (Some(previous), Some(current))
                if (current - (previous + pair[1].amount)).abs() >= BALANCE_TOLERANCE =>
            {
                Some(i + 1)
            }
            _ => None,
        })
        .collect()
}

// ============================================================================
// REPEATED ROWS
// ============================================================================

/// Indexes of rows whose every column repeats an earlier row of `rows`.
///
/// Such rows are still loaded; repeated purchases on one day are legitimate.
pub fn in_batch_duplicates(rows: &[ParsedRow]) -> Vec<usize> {
    let mut seen = HashSet::new();
    rows.iter()
        .enumerate()
        .filter(|(_, row)| !seen.insert(row.columns()))
        .map(|(i, _)| i)
        .collect()
}

// ============================================================================
// INGEST
// ============================================================================

/// Load `rows` (already parsed for `account`) into `stores`.
pub fn ingest(
    stores: &mut Stores,
    account: &str,
    source: &str,
    rows: Vec<ParsedRow>,
    config: &CuratorConfig,
) -> Result<IngestReport> {
    let resolver = ResolutionEngine::new(config.fuzzy.clone())?;
    let deduplicator = DeduplicationEngine::with_sequence_base(config.ledger.first_sequence_base);

    let breaks = balance_breaks(&rows);
    if !breaks.is_empty() {
        tracing::warn!(account, source, rows = ?breaks, "running balance is discontinuous");
    }
    let repeated = in_batch_duplicates(&rows);
    if !repeated.is_empty() {
        tracing::warn!(account, source, rows = ?repeated, "batch has duplicated rows");
    }

    let received = rows.len();
    let outcome = deduplicator.dedupe(rows, &stores.ledger, account);

    let mut report = IngestReport {
        account: account.to_string(),
        source: source.to_string(),
        received,
        duplicates: outcome.duplicates,
        appended: Vec::with_capacity(outcome.unique.len()),
        by_provenance: BTreeMap::new(),
        new_pending: Vec::new(),
        new_unresolved: Vec::new(),
        ambiguous: Vec::new(),
        balance_breaks: breaks,
        in_batch_duplicates: repeated,
    };

    let mut entries = Vec::with_capacity(outcome.unique.len());

    for sequenced in outcome.unique {
        let label = normalize(&sequenced.row.raw_label);
        let pending_before = stores.pending.len();
        let resolution = resolver.resolve(&label, account, stores);
        let key = StoreKey::new(label.clone(), account);

        if stores.pending.len() > pending_before {
            report.new_pending.push(key.clone());
        }
        if resolution.provenance == Provenance::NewUnknown {
            report.new_unresolved.push(key.clone());
        }
        if let Some(hit) = resolution.fuzzy.as_ref().filter(|hit| hit.is_ambiguous()) {
            report.ambiguous.push(ambiguous(&key, hit));
        }
        *report.by_provenance.entry(resolution.provenance).or_insert(0) += 1;
        report.appended.push(sequenced.sequence_id);

        entries.push(LedgerEntry::from_parsed(
            sequenced.sequence_id,
            sequenced.row,
            account,
            label,
            resolution.category,
            resolution.provenance,
            source,
        ));
    }

    stores.ledger.append(entries);
    tracing::info!("{}", report.summary());
    Ok(report)
}

fn ambiguous(key: &StoreKey, hit: &FuzzyMatch) -> AmbiguousMatch {
    AmbiguousMatch {
        key: key.clone(),
        chosen: hit.candidate.clone(),
        tied_with: hit.ties.clone(),
        score: hit.score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FuzzyConfig;
    use crate::stores::{MappingRow, MatchStatus};
    use chrono::NaiveDate;

    fn row(day: u32, label: &str, amount: f64) -> ParsedRow {
        ParsedRow::new(NaiveDate::from_ymd_opt(2025, 1, day).unwrap(), label, amount)
    }

    fn config(threshold: f64) -> CuratorConfig {
        CuratorConfig {
            fuzzy: FuzzyConfig::with_threshold(threshold),
            ..CuratorConfig::default()
        }
    }

    fn seeded() -> Stores {
        let mut stores = Stores::new();
        stores
            .confirmed
            .push(MappingRow::new(&StoreKey::new("coffee shop", "acc1"), "dining"));
        stores
    }

    #[test]
    fn test_ingest_resolves_and_appends() {
        let mut stores = seeded();
        let rows = vec![
            row(2, "Coffee  Shop ", -3.2),
            row(3, "Coffe Shp", -2.9),
            row(4, "Council Tax", -140.0),
            row(5, "COUNCIL TAX", -140.0),
        ];

        let report = ingest(&mut stores, "acc1", "jan.csv", rows, &config(70.0)).unwrap();

        assert_eq!(report.appended, vec![101, 102, 103, 104]);
        assert_eq!(report.count(Provenance::Known), 1);
        assert_eq!(report.count(Provenance::NewFuzzy), 1);
        assert_eq!(report.count(Provenance::NewUnknown), 1);
        assert_eq!(report.count(Provenance::OldUnknown), 1);
        assert_eq!(report.new_pending, vec![StoreKey::new("coffe shp", "acc1")]);
        assert_eq!(report.new_unresolved, vec![StoreKey::new("council tax", "acc1")]);

        let ledger = stores.ledger.entries();
        assert_eq!(ledger.len(), 4);
        assert_eq!(ledger[0].category, "dining");
        assert_eq!(ledger[1].category, "dining");
        assert_eq!(ledger[1].provenance, Provenance::NewFuzzy);
        assert_eq!(ledger[2].category, "unknown");
        assert_eq!(ledger[3].normalized_label, "council tax");
        assert_eq!(ledger[3].source, "jan.csv");
        assert!(stores.ledger.sequence_is_monotonic());

        assert_eq!(stores.pending.rows()[0].status, MatchStatus::Unconfirmed);
        assert_eq!(stores.overlapping_keys().len(), 0);
    }

    #[test]
    fn test_resubmitted_file() {
        let mut stores = seeded();
        let rows = vec![row(2, "Coffee Shop", -3.2), row(4, "Rent", -950.0)];
        ingest(&mut stores, "acc1", "jan.csv", rows.clone(), &config(70.0)).unwrap();

        let report = ingest(&mut stores, "acc1", "jan-again.csv", rows, &config(70.0)).unwrap();
        assert!(report.resubmitted());
        assert_eq!(report.duplicates, 2);
        assert_eq!(stores.ledger.len(), 2);
    }

    #[test]
    fn test_invalid_threshold_fails_before_touching_stores() {
        let mut stores = seeded();
        let result = ingest(&mut stores, "acc1", "jan.csv", vec![row(2, "Rent", -950.0)], &config(250.0));

        assert!(result.is_err());
        assert!(stores.ledger.is_empty());
        assert!(stores.unresolved.is_empty());
    }

    #[test]
    fn test_balance_breaks() {
        let rows = vec![
            row(1, "Opening", 0.0).with_balance(100.0),
            row(2, "Coffee", -5.0).with_balance(95.0),
            row(3, "Lunch", -10.0).with_balance(80.0),
            row(4, "No balance", -1.0),
            row(5, "Salary", 1000.0).with_balance(1079.0),
        ];
        assert_eq!(balance_breaks(&rows), vec![2]);
    }

    #[test]
    fn test_repeated_rows_in_batch_are_flagged_but_kept() {
        let mut stores = seeded();
        let rows = vec![
            row(2, "Rent", -1.0),
            row(2, "Rent", -1.0),
            row(3, "Rent", -1.0),
            row(2, "Rent", -1.0),
        ];

        let report = ingest(&mut stores, "acc1", "jan.csv", rows, &config(70.0)).unwrap();

        assert_eq!(report.in_batch_duplicates, vec![1, 3]);
        assert_eq!(report.appended, vec![101, 102, 103, 104]);
        assert_eq!(report.duplicates, 0);
    }

    #[test]
    fn test_in_batch_duplicates_compare_every_column() {
        let rows = vec![
            row(2, "Rent", -1.0).with_balance(10.0),
            row(2, "Rent", -1.0).with_balance(9.0),
            row(2, "Rent", -1.0),
        ];
        assert!(in_batch_duplicates(&rows).is_empty());
    }

    #[test]
    fn test_second_account_gets_its_own_pending_row() {
        let mut stores = seeded();
        ingest(&mut stores, "acc1", "jan.csv", vec![row(3, "Coffe Shp", -2.9)], &config(70.0)).unwrap();

        let report = ingest(&mut stores, "acc2", "card.csv", vec![row(4, "Coffe Shp", -2.9)], &config(70.0)).unwrap();

        assert_eq!(report.count(Provenance::OldFuzzy), 1);
        assert_eq!(report.new_pending, vec![StoreKey::new("coffe shp", "acc2")]);
        assert_eq!(stores.pending.len(), 2);
    }

    #[test]
    fn test_ambiguous_fuzzy_is_reported() {
        let mut stores = Stores::new();
        stores
            .confirmed
            .push(MappingRow::new(&StoreKey::new("cafe one", "acc1"), "dining"));
        stores
            .confirmed
            .push(MappingRow::new(&StoreKey::new("cafe two", "acc1"), "work"));

        let report = ingest(&mut stores, "acc1", "jan.csv", vec![row(2, "Cafe", -4.0)], &config(70.0)).unwrap();

        assert_eq!(report.ambiguous.len(), 1);
        assert_eq!(report.ambiguous[0].chosen, "cafe one");
        assert_eq!(stores.ledger.entries()[0].category, "dining");
    }
}
