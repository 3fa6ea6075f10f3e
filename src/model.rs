// 🧱 Core Types - keys, provenance tags and parsed input rows
//
// Every exception store and the ledger agree on one composite key:
// (normalized label, originating account).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Sentinel category for rows nobody has resolved yet.
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// True when `category` carries no real assignment.
pub fn is_unknown(category: &str) -> bool {
    let category = category.trim();
    category.is_empty() || category.eq_ignore_ascii_case(UNKNOWN_CATEGORY)
}

// ============================================================================
// STORE KEY
// ============================================================================

/// Composite key shared by the ledger and all exception stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreKey {
    /// Normalized label (see `normalize::normalize`)
    pub label: String,

    /// Originating account of the transaction
    pub account: String,
}

impl StoreKey {
    pub fn new(label: impl Into<String>, account: impl Into<String>) -> Self {
        StoreKey {
            label: label.into(),
            account: account.into(),
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.label, self.account)
    }
}

// ============================================================================
// PROVENANCE
// ============================================================================

/// How a ledger row's category was assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Provenance {
    /// Exact hit in the confirmed mapping
    Known,

    /// Exact hit on an earlier, still pending fuzzy match
    OldFuzzy,

    /// Fresh fuzzy match against the confirmed mapping
    NewFuzzy,

    /// Label already sitting in the unresolved set
    OldUnknown,

    /// Nothing matched; label added to the unresolved set
    NewUnknown,

    /// Set by a human amendment, never overwritten automatically
    Manual,

    ConfirmedFuzzy,
    RejectedFuzzy,
    OverwrittenUnknown,
    OverwrittenFuzzy,
}

impl Provenance {
    pub const ALL: [Provenance; 10] = [
        Provenance::Known,
        Provenance::OldFuzzy,
        Provenance::NewFuzzy,
        Provenance::OldUnknown,
        Provenance::NewUnknown,
        Provenance::Manual,
        Provenance::ConfirmedFuzzy,
        Provenance::RejectedFuzzy,
        Provenance::OverwrittenUnknown,
        Provenance::OverwrittenFuzzy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Known => "known",
            Provenance::OldFuzzy => "old_fuzzy",
            Provenance::NewFuzzy => "new_fuzzy",
            Provenance::OldUnknown => "old_unknown",
            Provenance::NewUnknown => "new_unknown",
            Provenance::Manual => "manual",
            Provenance::ConfirmedFuzzy => "confirmed_fuzzy",
            Provenance::RejectedFuzzy => "rejected_fuzzy",
            Provenance::OverwrittenUnknown => "overwritten_unknown",
            Provenance::OverwrittenFuzzy => "overwritten_fuzzy",
        }
    }

    /// Rows with this provenance are off limits to automated rewrites.
    pub fn is_protected(&self) -> bool {
        matches!(self, Provenance::Manual)
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provenance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        Provenance::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == tag)
            .ok_or_else(|| format!("unknown provenance tag '{}'", tag))
    }
}

impl TryFrom<String> for Provenance {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Provenance> for String {
    fn from(value: Provenance) -> Self {
        value.as_str().to_string()
    }
}

// ============================================================================
// PARSED ROW (output of the external parser / column mapper)
// ============================================================================

/// A freshly parsed transaction, before deduplication and categorisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedRow {
    pub timestamp: NaiveDate,
    pub raw_label: String,
    pub amount: f64,

    /// Running balance, when the source statement reports one
    pub balance: Option<f64>,

    /// Any further columns the parser produced
    pub extra: BTreeMap<String, String>,
}

impl ParsedRow {
    pub fn new(timestamp: NaiveDate, raw_label: impl Into<String>, amount: f64) -> Self {
        ParsedRow {
            timestamp,
            raw_label: raw_label.into(),
            amount,
            balance: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_balance(mut self, balance: f64) -> Self {
        self.balance = Some(balance);
        self
    }

    /// Column name → rendered value, for column-wise comparison with the ledger.
    pub fn columns(&self) -> BTreeMap<String, String> {
        let mut columns = self.extra.clone();
        columns.insert("timestamp".to_string(), format_date(self.timestamp));
        columns.insert("raw_label".to_string(), self.raw_label.clone());
        columns.insert("amount".to_string(), self.amount.to_string());
        if let Some(balance) = self.balance {
            columns.insert("balance".to_string(), balance.to_string());
        }
        columns
    }
}

// ============================================================================
// DATES
// ============================================================================

/// Canonical on-disk date format.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse date from string (supports YYYY-MM-DD and MM/DD/YYYY)
pub fn parse_date(date_str: &str) -> Option<NaiveDate> {
    let date_str = date_str.trim();

    if let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
        return Some(date);
    }

    NaiveDate::parse_from_str(date_str, "%m/%d/%Y").ok()
}
