// 📒 Ledger - append-mostly table of every categorised transaction
//
// Rows are created at ingestion and never deleted. Only `category` and
// `provenance` change afterwards, and never on a `manual` row.

use crate::model::{format_date, ParsedRow, Provenance, StoreKey};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// LEDGER ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique, strictly increasing
    pub sequence_id: u64,

    pub timestamp: NaiveDate,

    /// Originating account ("accX")
    pub account: String,

    /// Resolved target ("accY"), or `unknown`
    pub category: String,

    pub amount: f64,

    pub balance: Option<f64>,

    pub raw_label: String,

    pub normalized_label: String,

    pub provenance: Provenance,

    /// Input file the row came from
    pub source: String,

    /// Columns the ledger carries but the curator does not interpret
    pub extra: BTreeMap<String, String>,
}

impl LedgerEntry {
    /// Build a ledger row from a parsed row once it has a category.
    pub fn from_parsed(
        sequence_id: u64,
        row: ParsedRow,
        account: &str,
        normalized_label: String,
        category: String,
        provenance: Provenance,
        source: &str,
    ) -> Self {
        LedgerEntry {
            sequence_id,
            timestamp: row.timestamp,
            account: account.to_string(),
            category,
            amount: row.amount,
            balance: row.balance,
            raw_label: row.raw_label,
            normalized_label,
            provenance,
            source: source.to_string(),
            extra: row.extra,
        }
    }

    pub fn key(&self) -> StoreKey {
        StoreKey::new(self.normalized_label.clone(), self.account.clone())
    }

    pub fn matches_key(&self, key: &StoreKey) -> bool {
        self.normalized_label == key.label && self.account == key.account
    }

    pub fn is_protected(&self) -> bool {
        self.provenance.is_protected()
    }

    /// Value of a named column, core or extra.
    pub fn column_value(&self, column: &str) -> Option<String> {
        match column {
            "sequence_id" => Some(self.sequence_id.to_string()),
            "timestamp" => Some(format_date(self.timestamp)),
            "account" => Some(self.account.clone()),
            "category" => Some(self.category.clone()),
            "amount" => Some(self.amount.to_string()),
            "balance" => self.balance.map(|b| b.to_string()),
            "raw_label" => Some(self.raw_label.clone()),
            "normalized_label" => Some(self.normalized_label.clone()),
            "provenance" => Some(self.provenance.to_string()),
            "source" => Some(self.source.clone()),
            other => self.extra.get(other).cloned(),
        }
    }

    /// Column name → rendered value (absent optional columns are omitted).
    pub fn columns(&self) -> BTreeMap<String, String> {
        let mut columns = self.extra.clone();
        for name in CORE_COLUMNS {
            if let Some(value) = self.column_value(name) {
                columns.insert(name.to_string(), value);
            }
        }
        columns
    }
}

/// Core ledger columns, in on-disk order.
pub const CORE_COLUMNS: [&str; 10] = [
    "sequence_id",
    "timestamp",
    "account",
    "category",
    "amount",
    "balance",
    "raw_label",
    "normalized_label",
    "provenance",
    "source",
];

// ============================================================================
// LEDGER
// ============================================================================

/// Result of rewriting every ledger row for one composite key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteOutcome {
    pub rewritten: usize,

    /// Rows that matched but were left alone because they are `manual`
    pub protected: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Ledger::default()
    }

    pub fn from_entries(entries: Vec<LedgerEntry>) -> Self {
        Ledger { entries }
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Mutable access for amendments. Sequence ids must not be touched.
    pub fn entries_mut(&mut self) -> &mut [LedgerEntry] {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_sequence_id(&self) -> Option<u64> {
        self.entries.iter().map(|e| e.sequence_id).max()
    }

    pub fn for_account<'a>(&'a self, account: &'a str) -> impl Iterator<Item = &'a LedgerEntry> + 'a {
        self.entries.iter().filter(move |e| e.account == account)
    }

    pub fn for_key<'a>(&'a self, key: &'a StoreKey) -> impl Iterator<Item = &'a LedgerEntry> + 'a {
        self.entries.iter().filter(move |e| e.matches_key(key))
    }

    /// Append freshly resolved rows. Ids must continue the existing sequence.
    pub fn append(&mut self, entries: Vec<LedgerEntry>) {
        debug_assert!(
            entries.first().map_or(true, |first| self
                .max_sequence_id()
                .map_or(true, |max| first.sequence_id > max)),
            "appended sequence ids must exceed the ledger maximum"
        );
        self.entries.extend(entries);
    }

    /// Rewrite every non-manual row for `key`.
    ///
    /// `category = None` keeps the current category and only retags provenance.
    pub fn rewrite(
        &mut self,
        key: &StoreKey,
        category: Option<&str>,
        provenance: Provenance,
    ) -> RewriteOutcome {
        let mut outcome = RewriteOutcome::default();

        for entry in self.entries.iter_mut().filter(|e| e.matches_key(key)) {
            if entry.is_protected() {
                outcome.protected += 1;
                continue;
            }
            if let Some(category) = category {
                entry.category = category.to_string();
            }
            entry.provenance = provenance;
            outcome.rewritten += 1;
        }

        outcome
    }

    /// Sequence ids are unique and strictly increasing in row order.
    pub fn sequence_is_monotonic(&self) -> bool {
        self.entries
            .windows(2)
            .all(|pair| pair[0].sequence_id < pair[1].sequence_id)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn entry(
        sequence_id: u64,
        label: &str,
        account: &str,
        category: &str,
        provenance: Provenance,
    ) -> LedgerEntry {
        LedgerEntry {
            sequence_id,
            timestamp: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            account: account.to_string(),
            category: category.to_string(),
            amount: -12.5,
            balance: None,
            raw_label: label.to_uppercase(),
            normalized_label: label.to_string(),
            provenance,
            source: "statement.csv".to_string(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_rewrite_skips_manual_rows() {
        let mut ledger = Ledger::from_entries(vec![
            entry(101, "coffee shop", "acc1", "unknown", Provenance::NewUnknown),
            entry(102, "coffee shop", "acc1", "treats", Provenance::Manual),
            entry(103, "coffee shop", "acc2", "unknown", Provenance::NewUnknown),
        ]);

        let key = StoreKey::new("coffee shop", "acc1");
        let outcome = ledger.rewrite(&key, Some("dining"), Provenance::OverwrittenUnknown);

        assert_eq!(outcome, RewriteOutcome { rewritten: 1, protected: 1 });
        assert_eq!(ledger.entries()[0].category, "dining");
        assert_eq!(ledger.entries()[0].provenance, Provenance::OverwrittenUnknown);
        assert_eq!(ledger.entries()[1].category, "treats");
        assert_eq!(ledger.entries()[1].provenance, Provenance::Manual);
        assert_eq!(ledger.entries()[2].category, "unknown");
    }

    #[test]
    fn test_rewrite_provenance_only() {
        let mut ledger = Ledger::from_entries(vec![entry(
            101,
            "coffe shp",
            "acc1",
            "dining",
            Provenance::NewFuzzy,
        )]);

        let key = StoreKey::new("coffe shp", "acc1");
        ledger.rewrite(&key, None, Provenance::ConfirmedFuzzy);

        assert_eq!(ledger.entries()[0].category, "dining");
        assert_eq!(ledger.entries()[0].provenance, Provenance::ConfirmedFuzzy);
    }

    #[test]
    fn test_columns_include_extras_and_skip_missing_balance() {
        let mut e = entry(101, "rent", "acc1", "housing", Provenance::Known);
        e.extra.insert("memo".to_string(), "march".to_string());

        let columns = e.columns();
        assert_eq!(columns["memo"], "march");
        assert_eq!(columns["sequence_id"], "101");
        assert!(!columns.contains_key("balance"));
        assert_eq!(e.column_value("provenance").as_deref(), Some("known"));
    }

    #[test]
    fn test_max_sequence_and_monotonic() {
        let ledger = Ledger::from_entries(vec![
            entry(101, "a", "acc1", "x", Provenance::Known),
            entry(105, "b", "acc1", "y", Provenance::Known),
        ]);
        assert_eq!(ledger.max_sequence_id(), Some(105));
        assert!(ledger.sequence_is_monotonic());
        assert_eq!(Ledger::new().max_sequence_id(), None);
    }
}
