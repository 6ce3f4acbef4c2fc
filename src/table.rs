//! The conversion table: one row per source file, persisted as TSV.
//!
//! The table is the only record of what has been converted.  Derived
//! columns (`task_count`, `task_flag`) are computed once by the builder and
//! stored; loading never recomputes them, so an operator's manual edits to a
//! flagged table survive.
//!
//! Tables live in `<bids root>/conversion_logs/`.  Every build writes a new
//! dated file (`20240131_conversion.tsv`, then `20240131_r1_conversion.tsv`
//! on the same day) so earlier tables are kept.
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::bids::BidsPath;

pub const LOG_DIR: &str = "conversion_logs";
const SUFFIX: &str = "_conversion.tsv";

// ── Row ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunConversion {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskFlag {
    Ok,
    Check,
}

impl fmt::Display for TaskFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Check => "check",
        })
    }
}

/// One planned or executed source → BIDS mapping.  Field order is column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRow {
    /// `YYYYMMDD` of the build.
    pub time_stamp:       String,
    pub run_conversion:   RunConversion,
    pub task_count:       usize,
    pub task_flag:        TaskFlag,
    /// Source participant directory as found (`NatMEG_0123`, `sub-0045`).
    pub participant_from: String,
    pub participant_to:   String,
    pub session_from:     String,
    pub session_to:       String,
    pub task:             String,
    pub split:            String,
    pub run:              String,
    pub datatype:         String,
    /// `triux` or `hedscan`.
    pub acquisition:      String,
    pub processing:       String,
    pub description:      String,
    pub raw_path:         String,
    pub raw_name:         String,
    pub bids_path:        String,
    pub bids_name:        String,
}

impl ConversionRow {
    pub fn raw_file(&self) -> PathBuf {
        Path::new(&self.raw_path).join(&self.raw_name)
    }

    pub fn bids_file(&self) -> PathBuf {
        Path::new(&self.bids_path).join(&self.bids_name)
    }

    /// The target as a [`BidsPath`], when `bids_name` is a BIDS basename.
    pub fn bids_target(&self) -> Option<BidsPath> {
        BidsPath::parse(&self.bids_file())
    }

    /// Split parts are produced by the writer from their parent and are
    /// never converted on their own.
    pub fn is_split(&self) -> bool {
        !self.split.is_empty()
    }

    pub fn is_pending(&self) -> bool {
        self.run_conversion == RunConversion::Yes
    }

    fn group_key(&self) -> (&str, &str, &str, &str, &str, &str, &str) {
        (
            &self.participant_to,
            &self.acquisition,
            &self.datatype,
            &self.split,
            &self.task,
            &self.processing,
            &self.description,
        )
    }
}

// ── Table ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionTable {
    pub rows: Vec<ConversionRow>,
}

impl ConversionTable {
    pub fn new(rows: Vec<ConversionRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Fill `task_count` and `task_flag`.
    ///
    /// Rows are grouped by (participant_to, acquisition, datatype, split,
    /// task, processing, description).  A row is `ok` when its group is as
    /// large as the largest group in the table, `check` otherwise.
    pub fn compute_task_counts(&mut self) {
        let mut counts: HashMap<_, usize> = HashMap::new();
        for row in &self.rows {
            *counts.entry(row.group_key()).or_default() += 1;
        }
        let per_row: Vec<usize> = self.rows.iter().map(|r| counts[&r.group_key()]).collect();
        let max = per_row.iter().copied().max().unwrap_or(0);
        for (row, n) in self.rows.iter_mut().zip(per_row) {
            row.task_count = n;
            row.task_flag = if n == max { TaskFlag::Ok } else { TaskFlag::Check };
        }
    }

    /// Unsplit rows flagged `check`.
    pub fn inconsistent_rows(&self) -> Vec<ConversionRow> {
        self.rows
            .iter()
            .filter(|r| !r.is_split() && r.task_flag == TaskFlag::Check)
            .cloned()
            .collect()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path)
            .with_context(|| format!("opening conversion table {}", path.display()))?;
        let rows = rdr
            .deserialize()
            .collect::<std::result::Result<Vec<ConversionRow>, _>>()
            .with_context(|| format!("parsing conversion table {}", path.display()))?;
        Ok(Self { rows })
    }

    /// Write atomically: a temporary sibling is renamed over `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let tmp = path.with_extension("tsv.tmp");
        {
            let mut wtr = csv::WriterBuilder::new()
                .delimiter(b'\t')
                .from_path(&tmp)
                .with_context(|| format!("creating {}", tmp.display()))?;
            if self.rows.is_empty() {
                wtr.write_record(COLUMNS)?;
            }
            for row in &self.rows {
                wtr.serialize(row)?;
            }
            wtr.flush()?;
        }
        fs::rename(&tmp, path)
            .with_context(|| format!("moving {} to {}", tmp.display(), path.display()))?;
        Ok(())
    }

    /// Save as a new dated table in `<bids_root>/conversion_logs`; never
    /// replaces an existing table.
    pub fn save_new(&self, bids_root: &Path, date: NaiveDate) -> Result<PathBuf> {
        let dir = log_dir(bids_root);
        let path = next_table_path(&dir, date);
        self.save(&path)?;
        Ok(path)
    }
}

/// Column names, in file order.
pub const COLUMNS: [&str; 19] = [
    "time_stamp", "run_conversion", "task_count", "task_flag",
    "participant_from", "participant_to", "session_from", "session_to",
    "task", "split", "run", "datatype", "acquisition", "processing", "description",
    "raw_path", "raw_name", "bids_path", "bids_name",
];

// ── Dated table files ─────────────────────────────────────────────────────

/// A table file name decoded into its date and same-day revision.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TableFile {
    pub date:     NaiveDate,
    pub revision: u32,
    pub path:     PathBuf,
}

impl TableFile {
    /// `20240131_conversion.tsv` → revision 0, `20240131_r2_conversion.tsv` → 2.
    pub fn parse(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let head = name.strip_suffix(SUFFIX)?;
        let (date, revision) = match head.split_once("_r") {
            Some((d, r)) => (d, r.parse().ok()?),
            None => (head, 0),
        };
        let date = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
        Some(Self { date, revision, path: path.to_path_buf() })
    }

    pub fn file_name(date: NaiveDate, revision: u32) -> String {
        let d = date.format("%Y%m%d");
        if revision == 0 {
            format!("{d}{SUFFIX}")
        } else {
            format!("{d}_r{revision}{SUFFIX}")
        }
    }
}

pub fn log_dir(bids_root: &Path) -> PathBuf {
    bids_root.join(LOG_DIR)
}

/// All table files in `dir`, oldest first.
pub fn list_tables(dir: &Path) -> Vec<TableFile> {
    if !dir.is_dir() {
        return Vec::new();
    }
    let mut tables: Vec<TableFile> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| TableFile::parse(e.path()))
        .collect();
    tables.sort();
    tables
}

/// The most recent table by (date, revision).
pub fn latest_table(dir: &Path) -> Option<PathBuf> {
    list_tables(dir).pop().map(|t| t.path)
}

/// A path for a new table dated `date` that does not collide with an existing one.
pub fn next_table_path(dir: &Path, date: NaiveDate) -> PathBuf {
    let taken: Vec<u32> = list_tables(dir)
        .into_iter()
        .filter(|t| t.date == date)
        .map(|t| t.revision)
        .collect();
    let revision = match taken.iter().max() {
        Some(&r) => r + 1,
        None => 0,
    };
    dir.join(TableFile::file_name(date, revision))
}
