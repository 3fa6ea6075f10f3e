// 🔍 Deduplication Engine - drop parsed rows the ledger already holds
//
// Composite-key set difference over the columns both sides carry, restricted
// to one account. Volatile bookkeeping columns never take part.

use crate::ledger::Ledger;
use crate::model::ParsedRow;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Columns that differ between two loads of the same transaction.
pub const VOLATILE_COLUMNS: [&str; 3] = ["source", "sequence_id", "provenance"];

// ============================================================================
// DEDUP RESULT
// ============================================================================

/// A parsed row that survived deduplication, with its ledger id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedRow {
    pub sequence_id: u64,
    pub row: ParsedRow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupOutcome {
    /// New rows, in input order, with fresh sequence ids
    pub unique: Vec<SequencedRow>,

    /// How many input rows were already in the ledger
    pub duplicates: usize,

    /// Columns the comparison was made on
    pub compared_columns: Vec<String>,
}

impl DedupOutcome {
    /// Every input row was a duplicate: usually a re-submitted source file.
    pub fn all_duplicates(&self) -> bool {
        self.unique.is_empty() && self.duplicates > 0
    }
}

// ============================================================================
// DEDUPLICATION ENGINE
// ============================================================================

pub struct DeduplicationEngine {
    /// Base id used when the ledger is empty (default: 100)
    pub sequence_base: u64,
}

impl DeduplicationEngine {
    pub fn new() -> Self {
        DeduplicationEngine { sequence_base: 100 }
    }

    pub fn with_sequence_base(sequence_base: u64) -> Self {
        DeduplicationEngine { sequence_base }
    }

    /// Return the rows of `new_rows` not already present in `ledger` for `account`.
    pub fn dedupe(&self, new_rows: Vec<ParsedRow>, ledger: &Ledger, account: &str) -> DedupOutcome {
        let existing: Vec<BTreeMap<String, String>> =
            ledger.for_account(account).map(|e| e.columns()).collect();
        let incoming: Vec<BTreeMap<String, String>> = new_rows.iter().map(|r| r.columns()).collect();

        let compared_columns = common_columns(&incoming, &existing);

        let seen: HashSet<String> = if compared_columns.is_empty() {
            if !existing.is_empty() && !incoming.is_empty() {
                tracing::warn!(account, "no columns in common with the ledger; nothing treated as duplicate");
            }
            HashSet::new()
        } else {
            existing
                .iter()
                .map(|columns| fingerprint(columns, &compared_columns))
                .collect()
        };

        let mut next_id = ledger.max_sequence_id().unwrap_or(self.sequence_base);
        let mut unique = Vec::new();
        let mut duplicates = 0;

        for (row, columns) in new_rows.into_iter().zip(&incoming) {
            if !compared_columns.is_empty() && seen.contains(&fingerprint(columns, &compared_columns)) {
                duplicates += 1;
                continue;
            }
            next_id += 1;
            unique.push(SequencedRow {
                sequence_id: next_id,
                row,
            });
        }

        let outcome = DedupOutcome {
            unique,
            duplicates,
            compared_columns,
        };

        if outcome.all_duplicates() {
            tracing::warn!(
                account,
                duplicates = outcome.duplicates,
                "every new row is already in the ledger; was this source file submitted before?"
            );
        } else {
            tracing::info!(account, new = outcome.unique.len(), duplicates = outcome.duplicates, "deduplicated batch");
        }

        outcome
    }
}

impl Default for DeduplicationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Columns present on both sides, minus the volatile ones, sorted.
fn common_columns(
    incoming: &[BTreeMap<String, String>],
    existing: &[BTreeMap<String, String>],
) -> Vec<String> {
    let names = |rows: &[BTreeMap<String, String>]| -> BTreeSet<String> {
        rows.iter().flat_map(|r| r.keys().cloned()).collect()
    };

    names(incoming)
        .intersection(&names(existing))
        .filter(|c| !VOLATILE_COLUMNS.contains(&c.as_str()))
        .cloned()
        .collect()
}

/// Hash of a row's values over `columns` (absent values count as empty).
fn fingerprint(row: &BTreeMap<String, String>, columns: &[String]) -> String {
    let mut hasher = Sha256::new();
    for column in columns {
        hasher.update(row.get(column).map(String::as_str).unwrap_or("").as_bytes());
        hasher.update(b"\x1f");
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================
