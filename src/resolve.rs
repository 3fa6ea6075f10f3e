// 🎯 Category Resolution Engine - label + account → (category, provenance)
//
// Priority chain, first hit wins:
//   1. unresolved set (exact key)   → unknown        old_unknown
//   2. confirmed mapping (label)    → tie-break      known
//   3. pending fuzzy match (label)  → tie-break      old_fuzzy
//   4. fuzzy match vs confirmed     → tie-break      new_fuzzy    (+ pending row)
//   5. nothing                      → unknown        new_unknown  (+ unresolved row)

use crate::config::FuzzyConfig;
use crate::error::Result;
use crate::model::{Provenance, StoreKey, UNKNOWN_CATEGORY};
use crate::similarity::{best_match, FuzzyMatch};
use crate::stores::{CategorisedRow, PendingMatch, Stores, UnresolvedRow};
use serde::{Deserialize, Serialize};

// ============================================================================
// TIE-BREAK
// ============================================================================

/// Pick one row out of several for the same label.
///
/// Contract: the first row (insertion order) whose account equals `account`;
/// if no row belongs to that account, the first row overall.
pub fn pick_match<'a, R: CategorisedRow>(rows: &[&'a R], account: &str) -> Option<&'a R> {
    rows.iter()
        .find(|row| row.account() == account)
        .or_else(|| rows.first())
        .copied()
}

// ============================================================================
// RESOLUTION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub category: String,
    pub provenance: Provenance,

    /// Present for `new_fuzzy` resolutions
    pub fuzzy: Option<FuzzyMatch>,
}

impl Resolution {
    fn plain(category: impl Into<String>, provenance: Provenance) -> Self {
        Resolution {
            category: category.into(),
            provenance,
            fuzzy: None,
        }
    }
}

// ============================================================================
// RESOLUTION ENGINE
// ============================================================================

pub struct ResolutionEngine {
    fuzzy: FuzzyConfig,
}

impl ResolutionEngine {
    /// Fails fast on an out-of-range threshold.
    pub fn new(fuzzy: FuzzyConfig) -> Result<Self> {
        fuzzy.validate()?;
        Ok(ResolutionEngine { fuzzy })
    }

    /// Resolve one normalized label for one originating account.
    ///
    /// Steps 4 and 5 insert a row into the pending / unresolved store of
    /// `stores`; the caller persists the stores once the batch is done.
    pub fn resolve(&self, normalized_label: &str, account: &str, stores: &mut Stores) -> Resolution {
        let key = StoreKey::new(normalized_label, account);

        // 1. Already known to be unresolvable
        if stores.unresolved.contains(&key) {
            tracing::debug!(%key, "unresolved set hit");
            return Resolution::plain(UNKNOWN_CATEGORY, Provenance::OldUnknown);
        }

        // 2. Confirmed mapping
        if let Some(row) = pick_match(&stores.confirmed.rows_for_label(normalized_label), account) {
            tracing::debug!(%key, category = %row.category, "confirmed mapping hit");
            return Resolution::plain(row.category(), Provenance::Known);
        }

        // 3. Earlier fuzzy match still awaiting review
        let pending_hit = pick_match(&stores.pending.rows_for_label(normalized_label), account)
            .map(|row| (row.category().to_string(), row.account() == account));
        if let Some((category, own_row)) = pending_hit {
            tracing::debug!(%key, %category, own_row, "pending fuzzy hit");
            if !own_row {
                // borrowed from another account: this account gets its own row to review
                stores.pending.push(PendingMatch::new(&key, category.clone()));
            }
            return Resolution::plain(category, Provenance::OldFuzzy);
        }

        // 4. Fresh fuzzy match against the confirmed labels
        if let Some(resolution) = self.try_fuzzy(&key, stores) {
            return resolution;
        }

        // 5. Give up and remember the failure
        tracing::debug!(%key, "no match, adding to unresolved set");
        stores.unresolved.push(UnresolvedRow::new(&key));
        Resolution::plain(UNKNOWN_CATEGORY, Provenance::NewUnknown)
    }

    fn try_fuzzy(&self, key: &StoreKey, stores: &mut Stores) -> Option<Resolution> {
        if !self.fuzzy.enabled {
            return None;
        }

        let hit = best_match(&key.label, stores.confirmed.labels())?;

        if hit.score < self.fuzzy.threshold {
            tracing::debug!(%key, candidate = %hit.candidate, score = hit.score, "fuzzy candidate below threshold");
            return None;
        }

        if hit.is_ambiguous() && self.fuzzy.warn_on_ties {
            tracing::warn!(
                %key,
                chosen = %hit.candidate,
                tied = ?hit.ties,
                score = hit.score,
                "several fuzzy candidates share the best score"
            );
        }

        let category = pick_match(&stores.confirmed.rows_for_label(&hit.candidate), &key.account)?
            .category
            .clone();

        tracing::debug!(
            %key,
            candidate = %hit.candidate,
            score = hit.score,
            scorer = hit.scorer.as_str(),
            %category,
            "new fuzzy match"
        );
        stores.pending.push(PendingMatch::new(key, category.clone()));

        Some(Resolution {
            category,
            provenance: Provenance::NewFuzzy,
            fuzzy: Some(hit),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CuratorError;
    use crate::normalize::normalize;
    use crate::stores::{MappingRow, MatchStatus};

    fn engine(threshold: f64) -> ResolutionEngine {
        ResolutionEngine::new(FuzzyConfig::with_threshold(threshold)).unwrap()
    }

    fn stores_with_confirmed(rows: &[(&str, &str, &str)]) -> Stores {
        let mut stores = Stores::new();
        for (label, account, category) in rows {
            stores
                .confirmed
                .push(MappingRow::new(&StoreKey::new(*label, *account), *category));
        }
        stores
    }

    #[test]
    fn test_known_after_normalization() {
        let mut stores = stores_with_confirmed(&[("coffee shop", "acc1", "dining")]);
        let resolution = engine(70.0).resolve(&normalize("Coffee  Shop "), "acc1", &mut stores);

        assert_eq!(resolution.category, "dining");
        assert_eq!(resolution.provenance, Provenance::Known);
        assert!(stores.pending.is_empty());
        assert!(stores.unresolved.is_empty());
    }

    #[test]
    fn test_new_fuzzy_inserts_pending_row() {
        let mut stores = stores_with_confirmed(&[("coffee shop", "acc1", "dining")]);
        let resolution = engine(70.0).resolve(&normalize("Coffe Shp"), "acc1", &mut stores);

        assert_eq!(resolution.category, "dining");
        assert_eq!(resolution.provenance, Provenance::NewFuzzy);
        let hit = resolution.fuzzy.unwrap();
        assert_eq!(hit.candidate, "coffee shop");
        assert!(hit.score >= 70.0);

        assert_eq!(stores.pending.len(), 1);
        let row = &stores.pending.rows()[0];
        assert_eq!(row.key(), StoreKey::new("coffe shp", "acc1"));
        assert_eq!(row.tentative_category, "dining");
        assert_eq!(row.status, MatchStatus::Unconfirmed);
    }

    #[test]
    fn test_second_lookup_uses_pending_row() {
        let mut stores = stores_with_confirmed(&[("coffee shop", "acc1", "dining")]);
        let engine = engine(70.0);
        engine.resolve("coffe shp", "acc1", &mut stores);
        let again = engine.resolve("coffe shp", "acc1", &mut stores);

        assert_eq!(again.provenance, Provenance::OldFuzzy);
        assert_eq!(again.category, "dining");
        assert_eq!(stores.pending.len(), 1);
    }

    #[test]
    fn test_pending_row_from_other_account_is_copied_for_review() {
        let mut stores = stores_with_confirmed(&[("coffee shop", "acc1", "dining")]);
        let engine = engine(70.0);
        engine.resolve("coffe shp", "acc1", &mut stores);

        let borrowed = engine.resolve("coffe shp", "acc2", &mut stores);
        assert_eq!(borrowed.provenance, Provenance::OldFuzzy);
        assert_eq!(borrowed.category, "dining");
        assert!(stores.pending.contains(&StoreKey::new("coffe shp", "acc2")));
        assert_eq!(stores.pending.len(), 2);

        // the copy is now found directly
        engine.resolve("coffe shp", "acc2", &mut stores);
        assert_eq!(stores.pending.len(), 2);
    }

    #[test]
    fn test_new_unknown_then_old_unknown() {
        let mut stores = stores_with_confirmed(&[("coffee shop", "acc1", "dining")]);
        let engine = engine(70.0);

        let first = engine.resolve("council tax", "acc1", &mut stores);
        assert_eq!(first.category, UNKNOWN_CATEGORY);
        assert_eq!(first.provenance, Provenance::NewUnknown);
        assert_eq!(stores.unresolved.len(), 1);

        let second = engine.resolve("council tax", "acc1", &mut stores);
        assert_eq!(second.provenance, Provenance::OldUnknown);
        assert_eq!(stores.unresolved.len(), 1);
    }

    #[test]
    fn test_unresolved_set_wins_over_confirmed() {
        let mut stores = stores_with_confirmed(&[("gym", "acc1", "fitness")]);
        stores
            .unresolved
            .push(UnresolvedRow::new(&StoreKey::new("gym", "acc1")));

        let resolution = engine(70.0).resolve("gym", "acc1", &mut stores);
        assert_eq!(resolution.category, UNKNOWN_CATEGORY);
        assert_eq!(resolution.provenance, Provenance::OldUnknown);
    }

    #[test]
    fn test_confirmed_wins_over_pending() {
        let mut stores = stores_with_confirmed(&[("gym", "acc1", "fitness")]);
        stores
            .pending
            .push(PendingMatch::new(&StoreKey::new("gym", "acc1"), "health"));

        let resolution = engine(70.0).resolve("gym", "acc1", &mut stores);
        assert_eq!(resolution.category, "fitness");
        assert_eq!(resolution.provenance, Provenance::Known);
    }

    #[test]
    fn test_tie_break_prefers_home_account_then_first_row() {
        let mut stores = stores_with_confirmed(&[
            ("transfer", "acc1", "savings"),
            ("transfer", "acc2", "rent"),
            ("transfer", "acc3", "loan"),
        ]);
        let engine = engine(70.0);

        assert_eq!(engine.resolve("transfer", "acc2", &mut stores).category, "rent");
        assert_eq!(engine.resolve("transfer", "acc9", &mut stores).category, "savings");
    }

    #[test]
    fn test_fuzzy_disabled_goes_straight_to_unknown() {
        let mut stores = stores_with_confirmed(&[("coffee shop", "acc1", "dining")]);
        let engine = ResolutionEngine::new(FuzzyConfig::disabled()).unwrap();

        let resolution = engine.resolve("coffe shp", "acc1", &mut stores);
        assert_eq!(resolution.provenance, Provenance::NewUnknown);
        assert!(stores.pending.is_empty());
    }

    #[test]
    fn test_empty_confirmed_mapping_is_new_unknown() {
        let mut stores = Stores::new();
        let resolution = engine(0.0).resolve("anything", "acc1", &mut stores);
        assert_eq!(resolution.provenance, Provenance::NewUnknown);
        assert_eq!(stores.unresolved.len(), 1);
    }

    #[test]
    fn test_below_threshold_is_unknown() {
        let mut stores = stores_with_confirmed(&[("coffee shop", "acc1", "dining")]);
        let resolution = engine(95.0).resolve("coffe shp", "acc1", &mut stores);
        assert_eq!(resolution.provenance, Provenance::NewUnknown);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let err = ResolutionEngine::new(FuzzyConfig::with_threshold(101.0)).err().unwrap();
        assert!(matches!(err, CuratorError::ThresholdOutOfRange(_)));
    }
}
