// ⚠️ Error Taxonomy - configuration errors abort, data errors are skipped
//
// Configuration errors fail the whole batch before anything is written.
// Data errors (a row pointing at a key that is not where it should be) are
// never raised through this type: they are collected as `SkippedRow`s in the
// operation report and logged.

use crate::model::StoreKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CuratorError {
    /// Store file is missing a column every row needs.
    #[error("{store}: missing required column '{column}'")]
    MissingColumn { store: String, column: String },

    /// A row could not be parsed (bad date, amount, tag...).
    #[error("{store}, line {line}: {message}")]
    MalformedRow {
        store: String,
        line: u64,
        message: String,
    },

    /// Fuzzy threshold must be a percentage.
    #[error("fuzzy threshold {0} is outside [0, 100]")]
    ThresholdOutOfRange(f64),

    /// curator.toml could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Exception-store row count changed during reconciliation.
    #[error("exception stores held {before} rows before reconciliation and {after} after")]
    ConservationViolated { before: usize, after: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl CuratorError {
    /// True for errors that mean the inputs themselves are unusable.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CuratorError::MissingColumn { .. }
                | CuratorError::MalformedRow { .. }
                | CuratorError::ThresholdOutOfRange(_)
                | CuratorError::ConfigParse(_)
        )
    }

    pub fn malformed(store: &str, line: u64, message: impl Into<String>) -> Self {
        CuratorError::MalformedRow {
            store: store.to_string(),
            line,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CuratorError>;

/// A row an operation refused to act on, kept for operator review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRow {
    pub key: StoreKey,
    pub reason: String,
}

impl SkippedRow {
    pub fn new(key: &StoreKey, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::warn!(label = %key.label, account = %key.account, %reason, "skipping row");
        SkippedRow {
            key: key.clone(),
            reason,
        }
    }
}
