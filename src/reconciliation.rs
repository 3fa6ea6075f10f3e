// ⚖️ Store Reconciler - replay human edits of an exception store
//
// After a human edits the unresolved set or the pending fuzzy matches on disk,
// move the reviewed keys to the store they now belong in and rewrite every
// ledger row for those keys. `manual` ledger rows are never touched.
//
// Post-condition (checked on every call):
//   |confirmed| + |unresolved| + |pending| is unchanged.
//
// Re-running on an already reconciled snapshot is a no-op.

use crate::error::{CuratorError, Result, SkippedRow};
use crate::ledger::RewriteOutcome;
use crate::model::{Provenance, StoreKey, UNKNOWN_CATEGORY};
use crate::stores::{CategorisedRow, MappingRow, ReviewDecision, Stores, UnresolvedRow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// CHANGED STORE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangedStore {
    Unresolved,
    Pending,
}

impl ChangedStore {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangedStore::Unresolved => "unresolved",
            ChangedStore::Pending => "pending",
        }
    }
}

impl fmt::Display for ChangedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangedStore {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "unresolved" => Ok(ChangedStore::Unresolved),
            "pending" | "pending_fuzzy" => Ok(ChangedStore::Pending),
            other => Err(format!("unknown store '{}' (expected unresolved or pending)", other)),
        }
    }
}

// ============================================================================
// RECONCILIATION RESULT
// ============================================================================

/// What happened to one reviewed key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReconciliationAction {
    /// Unresolved row given a category → confirmed mapping
    Promoted { category: String },

    /// Pending row confirmed → confirmed mapping with its tentative category
    Confirmed { category: String },

    /// Pending row rejected → unresolved set
    Rejected,

    /// Pending row corrected → confirmed mapping with the override
    Overridden { category: String },
}

impl ReconciliationAction {
    pub fn event_type(&self) -> &'static str {
        match self {
            ReconciliationAction::Promoted { .. } => "unknown_promoted",
            ReconciliationAction::Confirmed { .. } => "fuzzy_confirmed",
            ReconciliationAction::Rejected => "fuzzy_rejected",
            ReconciliationAction::Overridden { .. } => "fuzzy_overridden",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledKey {
    pub key: StoreKey,
    pub action: ReconciliationAction,
    pub ledger: RewriteOutcome,
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub changed: ChangedStore,
    pub reconciled: Vec<ReconciledKey>,
    pub skipped: Vec<SkippedRow>,

    /// Rows left in place because nobody reviewed them yet
    pub untouched: usize,

    /// Exception-store row count (identical before and after)
    pub exception_rows: usize,

    pub reconciled_at: chrono::DateTime<chrono::Utc>,
}

impl ReconciliationReport {
    /// No key moved, so the stores are unchanged.
    pub fn is_noop(&self) -> bool {
        self.reconciled.is_empty()
    }

    /// Rows that need another human look, whether or not anything moved.
    pub fn has_skipped(&self) -> bool {
        !self.skipped.is_empty()
    }

    pub fn ledger_rows_rewritten(&self) -> usize {
        self.reconciled.iter().map(|r| r.ledger.rewritten).sum()
    }

    pub fn ledger_rows_protected(&self) -> usize {
        self.reconciled.iter().map(|r| r.ledger.protected).sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "Reconciled {} store: {} keys moved, {} ledger rows rewritten, {} manual rows protected, {} skipped, {} awaiting review",
            self.changed,
            self.reconciled.len(),
            self.ledger_rows_rewritten(),
            self.ledger_rows_protected(),
            self.skipped.len(),
            self.untouched
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine;

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine
    }

    /// Propagate edits made to `changed` across all stores.
    ///
    /// Works on a copy of `stores` and only swaps it in once the conservation
    /// check passes, so a failed call leaves the snapshot untouched.
    pub fn reconcile(&self, changed: ChangedStore, stores: &mut Stores) -> Result<ReconciliationReport> {
        let before = stores.exception_len();
        let mut work = stores.clone();

        let mut report = ReconciliationReport {
            changed,
            reconciled: Vec::new(),
            skipped: Vec::new(),
            untouched: 0,
            exception_rows: before,
            reconciled_at: chrono::Utc::now(),
        };

        match changed {
            ChangedStore::Unresolved => self.reconcile_unresolved(&mut work, &mut report),
            ChangedStore::Pending => self.reconcile_pending(&mut work, &mut report),
        }

        let after = work.exception_len();
        if before != after {
            return Err(CuratorError::ConservationViolated { before, after });
        }

        *stores = work;
        tracing::info!("{}", report.summary());
        Ok(report)
    }

    /// Unresolved rows whose category is no longer `unknown` are promoted.
    fn reconcile_unresolved(&self, stores: &mut Stores, report: &mut ReconciliationReport) {
        let mut kept = Vec::new();

        for row in stores.unresolved.take_rows() {
            if !row.is_resolved() {
                report.untouched += 1;
                kept.push(row);
                continue;
            }

            let key = row.key();
            if stores.confirmed.contains_key(&key) {
                report
                    .skipped
                    .push(SkippedRow::new(&key, "already present in confirmed mapping"));
                kept.push(row);
                continue;
            }

            let category = row.category.trim().to_string();
            let ledger = stores
                .ledger
                .rewrite(&key, Some(&category), Provenance::OverwrittenUnknown);
            log_empty_ledger(&key, &ledger);

            stores.confirmed.push(MappingRow::new(&key, category.clone()));
            report.reconciled.push(ReconciledKey {
                key,
                action: ReconciliationAction::Promoted { category },
                ledger,
            });
        }

        stores.unresolved.restore_rows(kept);
    }

    /// Pending rows are confirmed, rejected or overridden per their review fields.
    fn reconcile_pending(&self, stores: &mut Stores, report: &mut ReconciliationReport) {
        let mut kept = Vec::new();

        for row in stores.pending.take_rows() {
            let key = row.key();

            let (action, ledger) = match row.decision() {
                ReviewDecision::Hold => {
                    report.untouched += 1;
                    kept.push(row);
                    continue;
                }
                ReviewDecision::Conflict(reason) => {
                    report.skipped.push(SkippedRow::new(&key, reason));
                    kept.push(row);
                    continue;
                }
                ReviewDecision::Reject => {
                    if stores.unresolved.contains(&key) {
                        report
                            .skipped
                            .push(SkippedRow::new(&key, "already present in unresolved set"));
                        kept.push(row);
                        continue;
                    }
                    stores.unresolved.push(UnresolvedRow::new(&key));
                    let ledger = stores
                        .ledger
                        .rewrite(&key, Some(UNKNOWN_CATEGORY), Provenance::RejectedFuzzy);
                    (ReconciliationAction::Rejected, ledger)
                }
                ReviewDecision::Confirm | ReviewDecision::Override(_) if stores.confirmed.contains_key(&key) => {
                    report
                        .skipped
                        .push(SkippedRow::new(&key, "already present in confirmed mapping"));
                    kept.push(row);
                    continue;
                }
                ReviewDecision::Confirm => {
                    let category = row.tentative_category.clone();
                    stores.confirmed.push(MappingRow::new(&key, category.clone()));
                    let ledger = stores.ledger.rewrite(&key, None, Provenance::ConfirmedFuzzy);
                    (ReconciliationAction::Confirmed { category }, ledger)
                }
                ReviewDecision::Override(category) => {
                    stores.confirmed.push(MappingRow::new(&key, category.clone()));
                    let ledger = stores
                        .ledger
                        .rewrite(&key, Some(&category), Provenance::OverwrittenFuzzy);
                    (ReconciliationAction::Overridden { category }, ledger)
                }
            };
            log_empty_ledger(&key, &ledger);

            report.reconciled.push(ReconciledKey { key, action, ledger });
        }

        stores.pending.restore_rows(kept);
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn log_empty_ledger(key: &StoreKey, outcome: &RewriteOutcome) {
    if outcome.rewritten == 0 && outcome.protected == 0 {
        tracing::debug!(%key, "reviewed key has no ledger rows");
    }
}

// ============================================================================
// TESTS
// ============================================================================
