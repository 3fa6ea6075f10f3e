// ✏️ Manual Amendments - human overwrites of ledger categories, as data
//
// A rule selects ledger rows by column masks and sets their category.
// Every row it touches becomes `manual`, so reconciliation leaves it alone.

use crate::ledger::Ledger;
use crate::model::Provenance;
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

// ============================================================================
// SELECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionOp {
    Equals,
    NotEquals,
    /// Case-insensitive substring
    Contains,
    NotContains,
}

/// One column mask: `column <op> term`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub column: String,
    pub op: SelectionOp,
    pub term: String,
}

impl Selection {
    pub fn new(column: &str, op: SelectionOp, term: &str) -> Self {
        Selection {
            column: column.to_string(),
            op,
            term: term.to_string(),
        }
    }

    /// A column the row does not carry reads as "".
    pub fn matches(&self, value: Option<&str>) -> bool {
        let value = value.unwrap_or("");
        match self.op {
            SelectionOp::Equals => value == self.term,
            SelectionOp::NotEquals => value != self.term,
            SelectionOp::Contains => value.to_lowercase().contains(&self.term.to_lowercase()),
            SelectionOp::NotContains => !value.to_lowercase().contains(&self.term.to_lowercase()),
        }
    }
}

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmendmentRule {
    /// Rule ID for tracking
    pub id: String,

    /// All must hold (AND); an empty list selects nothing
    pub selections: Vec<Selection>,

    /// Category written onto every selected row
    pub category: String,

    /// Priority (higher = applied first)
    #[serde(default)]
    pub priority: i32,
}

impl AmendmentRule {
    pub fn selects(&self, row: &impl Fn(&str) -> Option<String>) -> bool {
        !self.selections.is_empty()
            && self
                .selections
                .iter()
                .all(|s| s.matches(row(&s.column).as_deref()))
    }
}

// ============================================================================
// AMENDMENT REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AmendmentReport {
    /// Rule id → ledger rows it amended
    pub by_rule: BTreeMap<String, Vec<u64>>,

    /// Rows whose category actually changed
    pub changed: usize,
}

impl AmendmentReport {
    pub fn amended(&self) -> usize {
        self.by_rule.values().map(Vec::len).sum()
    }
}

// ============================================================================
// AMENDMENT ENGINE
// ============================================================================

pub struct AmendmentEngine {
    rules: Vec<AmendmentRule>,
}

impl AmendmentEngine {
    pub fn new() -> Self {
        AmendmentEngine { rules: Vec::new() }
    }

    /// Load rules from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read amendment file: {:?}", path.as_ref()))?;

        let rules: Vec<AmendmentRule> =
            serde_json::from_str(&content).context("Failed to parse amendment rules JSON")?;

        Ok(AmendmentEngine::from_rules(rules))
    }

    pub fn from_rules(mut rules: Vec<AmendmentRule>) -> Self {
        // Stable: equal priorities keep file order
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        AmendmentEngine { rules }
    }

    pub fn add_rule(&mut self, rule: AmendmentRule) {
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Apply the first matching rule (by priority) to every ledger row.
    pub fn apply(&self, ledger: &mut Ledger) -> AmendmentReport {
        let mut report = AmendmentReport::default();

        for entry in ledger.entries_mut() {
            let lookup = |column: &str| entry.column_value(column);
            let Some(rule) = self.rules.iter().find(|rule| rule.selects(&lookup)) else {
                continue;
            };

            if entry.category != rule.category {
                report.changed += 1;
            }
            tracing::debug!(
                sequence_id = entry.sequence_id,
                rule = %rule.id,
                from = %entry.category,
                to = %rule.category,
                "manual amendment"
            );
            report
                .by_rule
                .entry(rule.id.clone())
                .or_default()
                .push(entry.sequence_id);

            entry.category = rule.category.clone();
            entry.provenance = Provenance::Manual;
        }

        tracing::info!(amended = report.amended(), changed = report.changed, "applied amendment rules");
        report
    }
}

impl Default for AmendmentEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
