// 💾 Persistence - project directory of human-editable CSV stores
//
// <project>/
//   ledger.csv  confirmed.csv  unresolved.csv  pending.csv
//   curator.toml  audit.db
//   archive/<YYYYmmdd_HHMMSS>_<annotation>/
//
// A save is one journalled commit: all four files go to .staging/ (fsynced),
// a manifest is atomically renamed into place, then the staged files are
// renamed over the live ones. `recover()` finishes or discards a commit
// interrupted at any point, so readers never see a mix of two snapshots.

use crate::audit::AuditLog;
use crate::config::CuratorConfig;
use crate::error::{CuratorError, Result};
use crate::ledger::{Ledger, LedgerEntry, CORE_COLUMNS};
use crate::model::{parse_date, ParsedRow, Provenance};
use crate::stores::{ConfirmedMapping, MappingRow, PendingMatch, PendingMatches, Stores, UnresolvedRow, UnresolvedSet};
use chrono::{DateTime, Utc};
use csv::StringRecord;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const LEDGER_FILE: &str = "ledger.csv";
pub const CONFIRMED_FILE: &str = "confirmed.csv";
pub const UNRESOLVED_FILE: &str = "unresolved.csv";
pub const PENDING_FILE: &str = "pending.csv";
pub const CONFIG_FILE: &str = "curator.toml";
pub const AUDIT_FILE: &str = "audit.db";

const STAGING_DIR: &str = ".staging";
const MANIFEST_FILE: &str = ".commit.json";
const MANIFEST_TMP_FILE: &str = ".commit.json.tmp";
const ARCHIVE_DIR: &str = "archive";

pub const STORE_FILES: [&str; 4] = [LEDGER_FILE, CONFIRMED_FILE, UNRESOLVED_FILE, PENDING_FILE];

const LEDGER_REQUIRED: [&str; 8] = [
    "sequence_id",
    "timestamp",
    "account",
    "category",
    "amount",
    "raw_label",
    "normalized_label",
    "provenance",
];
const MAPPING_REQUIRED: [&str; 3] = ["label", "account", "category"];
const PENDING_REQUIRED: [&str; 3] = ["label", "account", "tentative_category"];
const PARSED_REQUIRED: [&str; 3] = ["timestamp", "raw_label", "amount"];

// ============================================================================
// COMMIT JOURNAL
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommitManifest {
    annotation: String,
    created_at: DateTime<Utc>,
    files: Vec<String>,
}

/// What `recover()` found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Clean,
    /// A committed snapshot was still in staging and has been installed
    RolledForward,
    /// An uncommitted staging directory was thrown away
    Discarded,
}

// ============================================================================
// PROJECT
// ============================================================================

#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
}

impl Project {
    pub fn open<P: AsRef<Path>>(root: P) -> Self {
        Project {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Create the directory and a default curator.toml if they are missing.
    pub fn init<P: AsRef<Path>>(root: P) -> Result<Self> {
        let project = Self::open(root);
        fs::create_dir_all(&project.root)?;

        let config_path = project.path(CONFIG_FILE);
        if !config_path.exists() {
            let content = toml::to_string_pretty(&CuratorConfig::default())
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            fs::write(&config_path, content)?;
            tracing::info!(path = %config_path.display(), "wrote default config");
        }

        Ok(project)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn load_config(&self) -> Result<CuratorConfig> {
        CuratorConfig::load(self.path(CONFIG_FILE))
    }

    pub fn audit_log(&self) -> Result<AuditLog> {
        AuditLog::open(self.path(AUDIT_FILE))
    }

    /// Read all four stores. Missing files load as empty stores.
    pub fn load(&self) -> Result<Stores> {
        self.recover()?;

        let stores = Stores {
            ledger: read_ledger(&self.path(LEDGER_FILE))?,
            confirmed: ConfirmedMapping::from_rows(read_table::<MappingRow>(
                &self.path(CONFIRMED_FILE),
                CONFIRMED_FILE,
                &MAPPING_REQUIRED,
            )?),
            unresolved: UnresolvedSet::from_rows(read_table::<UnresolvedRow>(
                &self.path(UNRESOLVED_FILE),
                UNRESOLVED_FILE,
                &MAPPING_REQUIRED,
            )?),
            pending: PendingMatches::from_rows(read_table::<PendingMatch>(
                &self.path(PENDING_FILE),
                PENDING_FILE,
                &PENDING_REQUIRED,
            )?),
        };

        if !stores.ledger.sequence_is_monotonic() {
            tracing::warn!("ledger sequence ids are not strictly increasing");
        }
        stores.check_disjoint();

        tracing::info!(
            ledger = stores.ledger.len(),
            confirmed = stores.confirmed.len(),
            unresolved = stores.unresolved.len(),
            pending = stores.pending.len(),
            "loaded project stores"
        );
        Ok(stores)
    }

    /// Commit all four stores; optionally archive the result.
    ///
    /// Returns the archive directory when one was written.
    pub fn save(&self, stores: &Stores, annotation: &str, archive: bool) -> Result<Option<PathBuf>> {
        self.stage_commit(stores, annotation)?;
        self.finish_commit()?;

        if archive {
            return self.archive(annotation).map(Some);
        }
        Ok(None)
    }

    /// Write the snapshot to staging and publish the manifest.
    ///
    /// After this returns the commit is durable: a crash before
    /// `finish_commit` is rolled forward by `recover`.
    pub(crate) fn stage_commit(&self, stores: &Stores, annotation: &str) -> Result<()> {
        self.recover()?;

        let staging = self.path(STAGING_DIR);
        fs::create_dir_all(&staging)?;

        write_ledger(&staging.join(LEDGER_FILE), &stores.ledger)?;
        write_table(&staging.join(CONFIRMED_FILE), &MappingRow::COLUMNS, stores.confirmed.rows())?;
        write_table(&staging.join(UNRESOLVED_FILE), &UnresolvedRow::COLUMNS, stores.unresolved.rows())?;
        write_table(&staging.join(PENDING_FILE), &PendingMatch::COLUMNS, stores.pending.rows())?;

        let manifest = CommitManifest {
            annotation: annotation.to_string(),
            created_at: Utc::now(),
            files: STORE_FILES.iter().map(|f| f.to_string()).collect(),
        };

        let tmp = self.path(MANIFEST_TMP_FILE);
        let mut file = File::create(&tmp)?;
        file.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, self.path(MANIFEST_FILE))?;

        tracing::debug!(annotation, "commit staged");
        Ok(())
    }

    /// Install a staged commit. No-op when nothing is staged.
    pub(crate) fn finish_commit(&self) -> Result<()> {
        let manifest_path = self.path(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Ok(());
        }

        let manifest: CommitManifest = serde_json::from_str(&fs::read_to_string(&manifest_path)?)?;
        let staging = self.path(STAGING_DIR);

        for name in &manifest.files {
            let staged = staging.join(name);
            // Already moved by an earlier, interrupted roll-forward
            if staged.exists() {
                fs::rename(&staged, self.path(name))?;
            }
        }

        fs::remove_file(&manifest_path)?;
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }

        tracing::info!(annotation = %manifest.annotation, "commit installed");
        Ok(())
    }

    /// Bring the directory back to a single consistent snapshot.
    pub fn recover(&self) -> Result<Recovery> {
        let tmp = self.path(MANIFEST_TMP_FILE);
        if tmp.exists() {
            fs::remove_file(&tmp)?;
        }

        if self.path(MANIFEST_FILE).exists() {
            tracing::warn!(root = %self.root.display(), "found interrupted commit, rolling forward");
            self.finish_commit()?;
            return Ok(Recovery::RolledForward);
        }

        let staging = self.path(STAGING_DIR);
        if staging.exists() {
            tracing::warn!(root = %self.root.display(), "discarding uncommitted staging directory");
            fs::remove_dir_all(&staging)?;
            return Ok(Recovery::Discarded);
        }

        Ok(Recovery::Clean)
    }

    /// Copy the live stores to archive/<YYYYmmdd_HHMMSS>_<annotation>/.
    pub fn archive(&self, annotation: &str) -> Result<PathBuf> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let name = format!("{}_{}", stamp, sanitize(annotation));
        let dir = self.path(ARCHIVE_DIR).join(name);
        fs::create_dir_all(&dir)?;

        for file in STORE_FILES {
            let live = self.path(file);
            if live.exists() {
                fs::copy(&live, dir.join(file))?;
            }
        }

        tracing::info!(path = %dir.display(), "archived stores");
        Ok(dir)
    }
}

fn sanitize(annotation: &str) -> String {
    let cleaned: String = annotation
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "snapshot".to_string()
    } else {
        cleaned
    }
}

// ============================================================================
// GENERIC TABLES (exception stores)
// ============================================================================

fn open_reader(path: &Path, store: &str, required: &[&str]) -> Result<Option<csv::Reader<File>>> {
    if !path.exists() || fs::metadata(path)?.len() == 0 {
        tracing::debug!(store, "store file absent, starting empty");
        return Ok(None);
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(false)
        .trim(csv::Trim::Headers)
        .from_path(path)?;
    let headers = reader.headers()?.clone();

    for column in required {
        if !headers.iter().any(|h| h == *column) {
            return Err(CuratorError::MissingColumn {
                store: store.to_string(),
                column: column.to_string(),
            });
        }
    }

    Ok(Some(reader))
}

fn line_of(error: &csv::Error, fallback: u64) -> u64 {
    error.position().map(|p| p.line()).unwrap_or(fallback)
}

/// Deserialize every row of a store file, failing on the first bad row.
pub fn read_table<T: DeserializeOwned>(path: &Path, store: &str, required: &[&str]) -> Result<Vec<T>> {
    let Some(mut reader) = open_reader(path, store, required)? else {
        return Ok(Vec::new());
    };

    let mut rows = Vec::new();
    for (index, result) in reader.deserialize::<T>().enumerate() {
        let row = result.map_err(|e| CuratorError::malformed(store, line_of(&e, index as u64 + 2), e.to_string()))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Write a header line then one serialized row per element.
pub fn write_table<T: Serialize>(path: &Path, columns: &[&str], rows: &[T]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(columns)?;
    for row in rows {
        writer.serialize(row)?;
    }
    sync(writer)
}

fn sync(writer: csv::Writer<File>) -> Result<()> {
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

// ============================================================================
// LEDGER
// ============================================================================

struct RecordReader<'a> {
    store: &'a str,
    line: u64,
    record: &'a StringRecord,
    index: &'a HashMap<String, usize>,
}

impl<'a> RecordReader<'a> {
    fn get(&self, column: &str) -> Option<&'a str> {
        self.index.get(column).and_then(|&i| self.record.get(i))
    }

    fn text(&self, column: &str) -> String {
        self.get(column).unwrap_or("").to_string()
    }

    fn error(&self, message: String) -> CuratorError {
        CuratorError::malformed(self.store, self.line, message)
    }

    fn date(&self, column: &str) -> Result<chrono::NaiveDate> {
        let value = self.get(column).unwrap_or("");
        parse_date(value).ok_or_else(|| self.error(format!("invalid {} '{}'", column, value)))
    }

    fn number(&self, column: &str) -> Result<f64> {
        let value = self.get(column).unwrap_or("").trim();
        value
            .parse::<f64>()
            .map_err(|_| self.error(format!("invalid {} '{}'", column, value)))
    }

    fn optional_number(&self, column: &str) -> Result<Option<f64>> {
        match self.get(column).map(str::trim) {
            None | Some("") => Ok(None),
            Some(_) => self.number(column).map(Some),
        }
    }

    fn extras(&self, known: &[&str]) -> std::collections::BTreeMap<String, String> {
        self.index
            .iter()
            .filter(|(name, _)| !known.contains(&name.as_str()))
            .filter_map(|(name, &i)| self.record.get(i).map(|v| (name, v)))
            // a blank cell means the row never had that column
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect()
    }
}

fn header_index(reader: &mut csv::Reader<File>) -> Result<HashMap<String, usize>> {
    Ok(reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, h)| (h.to_string(), i))
        .collect())
}

pub fn read_ledger(path: &Path) -> Result<Ledger> {
    let Some(mut reader) = open_reader(path, LEDGER_FILE, &LEDGER_REQUIRED)? else {
        return Ok(Ledger::new());
    };
    let index = header_index(&mut reader)?;

    let mut entries = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = result.map_err(|e| CuratorError::malformed(LEDGER_FILE, line_of(&e, i as u64 + 2), e.to_string()))?;
        let row = RecordReader {
            store: LEDGER_FILE,
            line: record.position().map(|p| p.line()).unwrap_or(i as u64 + 2),
            record: &record,
            index: &index,
        };

        let sequence_id = row
            .text("sequence_id")
            .trim()
            .parse::<u64>()
            .map_err(|_| row.error(format!("invalid sequence_id '{}'", row.text("sequence_id"))))?;
        let provenance = row
            .text("provenance")
            .parse::<Provenance>()
            .map_err(|e| row.error(e))?;

        entries.push(LedgerEntry {
            sequence_id,
            timestamp: row.date("timestamp")?,
            account: row.text("account"),
            category: row.text("category"),
            amount: row.number("amount")?,
            balance: row.optional_number("balance")?,
            raw_label: row.text("raw_label"),
            normalized_label: row.text("normalized_label"),
            provenance,
            source: row.text("source"),
            extra: row.extras(&CORE_COLUMNS),
        });
    }

    Ok(Ledger::from_entries(entries))
}

/// Core columns first, then every extra column any row carries (sorted).
pub fn write_ledger(path: &Path, ledger: &Ledger) -> Result<()> {
    let extras: BTreeSet<&str> = ledger
        .entries()
        .iter()
        .flat_map(|e| e.extra.keys().map(String::as_str))
        .collect();
    let header: Vec<&str> = CORE_COLUMNS.iter().copied().chain(extras).collect();

    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(&header)?;
    for entry in ledger.entries() {
        writer.write_record(header.iter().map(|c| entry.column_value(c).unwrap_or_default()))?;
    }
    sync(writer)
}

// ============================================================================
// PARSED INPUT
// ============================================================================

/// Read a parser/column-mapper output file for one account.
///
/// Columns the ledger itself owns (account, category, ...) are dropped with a
/// warning; anything else is kept as an extra column.
pub fn read_parsed_rows(path: &Path) -> Result<Vec<ParsedRow>> {
    let store = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "parsed input".to_string());

    let Some(mut reader) = open_reader(path, &store, &PARSED_REQUIRED)? else {
        return Ok(Vec::new());
    };
    let index = header_index(&mut reader)?;

    let reserved: Vec<&str> = index
        .keys()
        .map(String::as_str)
        .filter(|c| CORE_COLUMNS.contains(c) && !PARSED_REQUIRED.contains(c) && *c != "balance")
        .collect();
    if !reserved.is_empty() {
        tracing::warn!(file = %store, columns = ?reserved, "ignoring ledger-owned columns in parsed input");
    }

    let mut rows = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = result.map_err(|e| CuratorError::malformed(&store, line_of(&e, i as u64 + 2), e.to_string()))?;
        let row = RecordReader {
            store: &store,
            line: record.position().map(|p| p.line()).unwrap_or(i as u64 + 2),
            record: &record,
            index: &index,
        };

        rows.push(ParsedRow {
            timestamp: row.date("timestamp")?,
            raw_label: row.text("raw_label"),
            amount: row.number("amount")?,
            balance: row.optional_number("balance")?,
            extra: row.extras(&CORE_COLUMNS),
        });
    }

    Ok(rows)
}
