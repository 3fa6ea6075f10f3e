// Ledger Curator - Core Library
// Categorises bank transactions and keeps the ledger in step with human review

pub mod error;          // Error taxonomy: configuration vs data errors
pub mod model;          // Store keys, provenance tags, parsed rows
pub mod config;         // curator.toml
pub mod normalize;      // Label normalization
pub mod similarity;     // Fuzzy scorers + best match
pub mod ledger;         // Ledger rows and rewrites
pub mod stores;         // Confirmed / unresolved / pending exception stores
pub mod resolve;        // Category Resolution Engine
pub mod deduplication;  // Deduplicator
pub mod ingest;         // Dedup → resolve → append pipeline
pub mod reconciliation; // Store Reconciler
pub mod amend;          // Manual amendments as data
pub mod persist;        // Journalled CSV project directory
pub mod audit;          // SQLite audit trail

// Re-export commonly used types
pub use error::{CuratorError, Result, SkippedRow};
pub use model::{
    ParsedRow, Provenance, StoreKey, UNKNOWN_CATEGORY,
    format_date, is_unknown, parse_date,
};
pub use config::{CuratorConfig, FuzzyConfig, LedgerConfig, PersistConfig};
pub use normalize::normalize;
pub use similarity::{
    FuzzyMatch, Scorer,
    best_match, full_process, indel_distance, ratio, token_set_ratio, token_sort_ratio,
};
pub use ledger::{Ledger, LedgerEntry, RewriteOutcome};
pub use stores::{
    CategorisedRow, ConfirmedMapping, MappingRow, MatchStatus,
    PendingMatch, PendingMatches, ReviewDecision, Stores,
    UnresolvedRow, UnresolvedSet,
};
pub use resolve::{Resolution, ResolutionEngine, pick_match};
pub use deduplication::{DedupOutcome, DeduplicationEngine, SequencedRow};
pub use ingest::{AmbiguousMatch, IngestReport, balance_breaks, in_batch_duplicates, ingest};
pub use reconciliation::{
    ChangedStore, ReconciledKey, ReconciliationAction,
    ReconciliationEngine, ReconciliationReport,
};
pub use amend::{AmendmentEngine, AmendmentReport, AmendmentRule, Selection, SelectionOp};
pub use persist::{Project, Recovery, read_parsed_rows};
pub use audit::{AuditEvent, AuditLog};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
