// 🗂️ Exception Stores - confirmed mapping, unresolved set, pending fuzzy matches
//
// All three key on (normalized label, account) and should be mutually
// disjoint at rest. Rows keep insertion order: that order is the tie-break
// contract used by resolution.

use crate::ledger::Ledger;
use crate::model::{is_unknown, StoreKey, UNKNOWN_CATEGORY};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ROW TRAIT
// ============================================================================

/// A store row that assigns a category for one (label, account) pair.
pub trait CategorisedRow {
    fn label(&self) -> &str;
    fn account(&self) -> &str;
    fn category(&self) -> &str;

    fn key(&self) -> StoreKey {
        StoreKey::new(self.label(), self.account())
    }
}

// ============================================================================
// CONFIRMED MAPPING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRow {
    pub label: String,
    pub account: String,
    pub category: String,
}

impl MappingRow {
    pub const COLUMNS: [&'static str; 3] = ["label", "account", "category"];

    pub fn new(key: &StoreKey, category: impl Into<String>) -> Self {
        MappingRow {
            label: key.label.clone(),
            account: key.account.clone(),
            category: category.into(),
        }
    }
}

impl CategorisedRow for MappingRow {
    fn label(&self) -> &str {
        &self.label
    }
    fn account(&self) -> &str {
        &self.account
    }
    fn category(&self) -> &str {
        &self.category
    }
}

/// Human-verified label → category associations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedMapping {
    rows: Vec<MappingRow>,
}

impl ConfirmedMapping {
    pub fn from_rows(rows: Vec<MappingRow>) -> Self {
        ConfirmedMapping { rows }
    }

    pub fn rows(&self) -> &[MappingRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All rows for a label, any account, in insertion order.
    pub fn rows_for_label(&self, label: &str) -> Vec<&MappingRow> {
        self.rows.iter().filter(|r| r.label == label).collect()
    }

    pub fn contains_key(&self, key: &StoreKey) -> bool {
        self.rows
            .iter()
            .any(|r| r.label == key.label && r.account == key.account)
    }

    /// Distinct labels in first-seen order (fuzzy-match candidates).
    pub fn labels(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.rows
            .iter()
            .map(|r| r.label.as_str())
            .filter(|label| seen.insert(*label))
            .collect()
    }

    pub fn push(&mut self, row: MappingRow) {
        self.rows.push(row);
    }
}

// ============================================================================
// UNRESOLVED SET
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedRow {
    pub label: String,
    pub account: String,

    /// `unknown` until a human types a real category in
    pub category: String,
}

impl UnresolvedRow {
    pub const COLUMNS: [&'static str; 3] = ["label", "account", "category"];

    pub fn new(key: &StoreKey) -> Self {
        UnresolvedRow {
            label: key.label.clone(),
            account: key.account.clone(),
            category: UNKNOWN_CATEGORY.to_string(),
        }
    }

    /// A human has replaced `unknown` with a real category.
    pub fn is_resolved(&self) -> bool {
        !is_unknown(&self.category)
    }
}

impl CategorisedRow for UnresolvedRow {
    fn label(&self) -> &str {
        &self.label
    }
    fn account(&self) -> &str {
        &self.account
    }
    fn category(&self) -> &str {
        &self.category
    }
}

/// Keys known to have no category, cached so fuzzy search is not repeated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedSet {
    rows: Vec<UnresolvedRow>,
}

impl UnresolvedSet {
    pub fn from_rows(rows: Vec<UnresolvedRow>) -> Self {
        UnresolvedSet { rows }
    }

    pub fn rows(&self) -> &[UnresolvedRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, key: &StoreKey) -> bool {
        self.rows
            .iter()
            .any(|r| r.label == key.label && r.account == key.account)
    }

    pub fn push(&mut self, row: UnresolvedRow) {
        self.rows.push(row);
    }

    pub(crate) fn take_rows(&mut self) -> Vec<UnresolvedRow> {
        std::mem::take(&mut self.rows)
    }

    pub(crate) fn restore_rows(&mut self, rows: Vec<UnresolvedRow>) {
        debug_assert!(self.rows.is_empty());
        self.rows = rows;
    }
}

// ============================================================================
// PENDING FUZZY MATCHES
// ============================================================================

/// Review state a human sets on a pending fuzzy match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MatchStatus {
    #[default]
    Unconfirmed,
    Confirmed,
    Rejected,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Unconfirmed => "unconfirmed",
            MatchStatus::Confirmed => "confirmed",
            MatchStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = String;

    /// An empty cell reads as `unconfirmed`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "unconfirmed" => Ok(MatchStatus::Unconfirmed),
            "confirmed" => Ok(MatchStatus::Confirmed),
            "rejected" => Ok(MatchStatus::Rejected),
            other => Err(format!(
                "invalid status '{}' (expected unconfirmed, confirmed or rejected; \
                 put a replacement category in override_category)",
                other
            )),
        }
    }
}

impl TryFrom<String> for MatchStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MatchStatus> for String {
    fn from(value: MatchStatus) -> Self {
        value.as_str().to_string()
    }
}

/// What reconciliation should do with one pending row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    /// Not reviewed yet; leave it where it is
    Hold,
    Confirm,
    Reject,
    /// Replace the tentative category with this one
    Override(String),
    /// Contradictory edits; needs another look
    Conflict(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMatch {
    pub label: String,
    pub account: String,

    /// Category proposed by the fuzzy matcher
    pub tentative_category: String,

    #[serde(default)]
    pub status: MatchStatus,

    /// Human correction; takes precedence over `tentative_category`
    #[serde(default)]
    pub override_category: Option<String>,
}

impl PendingMatch {
    pub const COLUMNS: [&'static str; 5] = [
        "label",
        "account",
        "tentative_category",
        "status",
        "override_category",
    ];

    pub fn new(key: &StoreKey, tentative_category: impl Into<String>) -> Self {
        PendingMatch {
            label: key.label.clone(),
            account: key.account.clone(),
            tentative_category: tentative_category.into(),
            status: MatchStatus::Unconfirmed,
            override_category: None,
        }
    }

    /// Interpret the two review fields.
    ///
    /// An override wins over `unconfirmed`/`confirmed`. An override of
    /// `unknown` is a rejection. `rejected` together with a real override is
    /// a conflict.
    pub fn decision(&self) -> ReviewDecision {
        let override_category = self
            .override_category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());

        match (self.status, override_category) {
            (MatchStatus::Rejected, Some(category)) if !is_unknown(category) => {
                ReviewDecision::Conflict(format!(
                    "status is rejected but override_category is '{}'",
                    category
                ))
            }
            (MatchStatus::Rejected, _) => ReviewDecision::Reject,
            (_, Some(category)) if is_unknown(category) => ReviewDecision::Reject,
            (_, Some(category)) => ReviewDecision::Override(category.to_string()),
            (MatchStatus::Confirmed, None) => ReviewDecision::Confirm,
            (MatchStatus::Unconfirmed, None) => ReviewDecision::Hold,
        }
    }
}

impl CategorisedRow for PendingMatch {
    fn label(&self) -> &str {
        &self.label
    }
    fn account(&self) -> &str {
        &self.account
    }
    fn category(&self) -> &str {
        &self.tentative_category
    }
}

/// Tentative fuzzy categorisations awaiting review.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMatches {
    rows: Vec<PendingMatch>,
}

impl PendingMatches {
    pub fn from_rows(rows: Vec<PendingMatch>) -> Self {
        PendingMatches { rows }
    }

    pub fn rows(&self) -> &[PendingMatch] {
        &self.rows
    }

    /// Mutable access for review edits made in code rather than on disk.
    pub fn rows_mut(&mut self) -> &mut [PendingMatch] {
        &mut self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows_for_label(&self, label: &str) -> Vec<&PendingMatch> {
        self.rows.iter().filter(|r| r.label == label).collect()
    }

    pub fn contains(&self, key: &StoreKey) -> bool {
        self.rows
            .iter()
            .any(|r| r.label == key.label && r.account == key.account)
    }

    pub fn get_mut(&mut self, key: &StoreKey) -> Option<&mut PendingMatch> {
        self.rows
            .iter_mut()
            .find(|r| r.label == key.label && r.account == key.account)
    }

    pub fn push(&mut self, row: PendingMatch) {
        self.rows.push(row);
    }

    pub(crate) fn take_rows(&mut self) -> Vec<PendingMatch> {
        std::mem::take(&mut self.rows)
    }

    pub(crate) fn restore_rows(&mut self, rows: Vec<PendingMatch>) {
        debug_assert!(self.rows.is_empty());
        self.rows = rows;
    }
}

// ============================================================================
// STORES (one project snapshot)
// ============================================================================

/// Full in-memory snapshot of a project's four stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stores {
    pub ledger: Ledger,
    pub confirmed: ConfirmedMapping,
    pub unresolved: UnresolvedSet,
    pub pending: PendingMatches,
}

impl Stores {
    pub fn new() -> Self {
        Stores::default()
    }

    /// Rows across the three exception stores (the conserved quantity).
    pub fn exception_len(&self) -> usize {
        self.confirmed.len() + self.unresolved.len() + self.pending.len()
    }

    /// Keys living in more than one exception store, with the stores they sit in.
    pub fn overlapping_keys(&self) -> BTreeMap<StoreKey, Vec<&'static str>> {
        let mut homes: BTreeMap<StoreKey, Vec<&'static str>> = BTreeMap::new();

        let confirmed: BTreeSet<StoreKey> = self.confirmed.rows().iter().map(|r| r.key()).collect();
        let unresolved: BTreeSet<StoreKey> = self.unresolved.rows().iter().map(|r| r.key()).collect();
        let pending: BTreeSet<StoreKey> = self.pending.rows().iter().map(|r| r.key()).collect();

        for (name, keys) in [
            ("confirmed", &confirmed),
            ("unresolved", &unresolved),
            ("pending", &pending),
        ] {
            for key in keys {
                homes.entry(key.clone()).or_default().push(name);
            }
        }

        homes.retain(|_, stores| stores.len() > 1);
        homes
    }

    /// Warn about every key that breaks store disjointness. Returns the count.
    pub fn check_disjoint(&self) -> usize {
        let overlaps = self.overlapping_keys();
        for (key, stores) in &overlaps {
            tracing::warn!(%key, stores = ?stores, "key present in more than one exception store");
        }
        overlaps.len()
    }
}
