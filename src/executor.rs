//! Conversion table executor.
//!
//! Consumes a loaded [`ConversionTable`], writes every pending row into the
//! BIDS tree and marks it done.  Nothing is written while the table still
//! carries unresolved `check` rows, and nothing is written when a needed
//! reference file is missing.  The table is saved back to its own file only
//! when a row changed, so a second run is a no-op.  Empty-room rows are
//! written first so every task sidecar can list them.
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::bids::BidsPath;
use crate::builder::{Acquisition, FileError};
use crate::config::BidsifyConfig;
use crate::entity::{is_noise_task, Datatype};
use crate::error::{ConfigError, ConversionError};
use crate::io::{write_or_copy, RecordingInspector, RecordingWriter, WriteOutcome};
use crate::sidecar::{copy_eeg_to_meg, merge_channels_tsv, source_channels_tsv, SidecarEnricher};
use crate::table::{ConversionRow, ConversionTable, RunConversion};

/// Where to write and which reference files to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub bids_root:   PathBuf,
    pub calibration: Option<PathBuf>,
    pub crosstalk:   Option<PathBuf>,
    /// Re-convert rows already marked `no`.
    pub overwrite:   bool,
}

fn configured(path: &str) -> Option<PathBuf> {
    let path = path.trim();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

impl ExecutionContext {
    pub fn from_config(cfg: &BidsifyConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            bids_root: cfg.bids_root()?,
            calibration: configured(&cfg.calibration),
            crosstalk: configured(&cfg.crosstalk),
            overwrite: cfg.overwrite()?,
        })
    }

    fn reference(&self, key: &str) -> Result<&Path, ConfigError> {
        let path = match key {
            "Calibration" => self.calibration.as_deref(),
            _ => self.crosstalk.as_deref(),
        };
        let path = path.ok_or_else(|| ConfigError::MissingReference { key: key.into() })?;
        if !path.is_file() {
            return Err(ConfigError::MissingReferenceFile {
                key: key.into(),
                path: path.to_path_buf(),
            });
        }
        Ok(path)
    }
}

#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub written:  usize,
    pub degraded: usize,
    pub skipped:  usize,
    pub failed:   Vec<FileError>,
}

impl ExecutionReport {
    pub fn converted(&self) -> usize {
        self.written + self.degraded
    }
}

pub struct Executor<'a> {
    ctx:       ExecutionContext,
    writer:    &'a dyn RecordingWriter,
    inspector: &'a dyn RecordingInspector,
}

impl<'a> Executor<'a> {
    pub fn new(
        ctx: ExecutionContext,
        writer: &'a dyn RecordingWriter,
        inspector: &'a dyn RecordingInspector,
    ) -> Self {
        Self { ctx, writer, inspector }
    }

    fn will_write(&self, row: &ConversionRow) -> bool {
        !row.is_split() && (row.is_pending() || self.ctx.overwrite)
    }

    fn needs_references(row: &ConversionRow) -> bool {
        row.datatype == Datatype::Meg.as_str() && row.acquisition == Acquisition::Triux.as_str()
    }

    /// Run the table and save it back to `table_path` when anything changed.
    pub fn execute(&self, table: &mut ConversionTable, table_path: &Path) -> Result<ExecutionReport> {
        let inconsistent = table.inconsistent_rows();
        if !inconsistent.is_empty() {
            return Err(ConversionError::InconsistentTaskCounts { rows: inconsistent }.into());
        }

        let writing: Vec<&ConversionRow> = table.rows.iter().filter(|r| self.will_write(r)).collect();
        let references = if writing.iter().any(|r| Self::needs_references(r)) {
            Some((self.ctx.reference("Calibration")?, self.ctx.reference("Crosstalk")?))
        } else {
            None
        };

        let dirs: BTreeSet<PathBuf> = table
            .rows
            .iter()
            .filter(|r| !r.is_split())
            .map(|r| PathBuf::from(&r.bids_path))
            .collect();
        for dir in &dirs {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }

        if let Some((cal, ctc)) = references {
            let sessions: BTreeSet<(&str, &str)> = writing
                .iter()
                .filter(|r| Self::needs_references(r))
                .map(|r| (r.participant_to.as_str(), r.session_to.as_str()))
                .collect();
            for (subject, session) in sessions {
                self.install_reference(cal, &BidsPath::calibration(&self.ctx.bids_root, subject, session))?;
                self.install_reference(ctc, &BidsPath::crosstalk(&self.ctx.bids_root, subject, session))?;
            }
        }

        let mut report = ExecutionReport::default();
        let mut changed = false;
        let mut order: Vec<usize> = (0..table.rows.len()).filter(|&i| !table.rows[i].is_split()).collect();
        order.sort_by_key(|&i| !is_noise_task(&table.rows[i].task));
        for i in order {
            let row = &mut table.rows[i];
            if !row.is_pending() && !self.ctx.overwrite {
                report.skipped += 1;
                continue;
            }
            let source = row.raw_file();
            match self.convert(row, &source) {
                Ok(outcome) => {
                    match outcome {
                        WriteOutcome::Written => report.written += 1,
                        WriteOutcome::DegradedCopy { .. } => report.degraded += 1,
                    }
                    if row.is_pending() {
                        row.run_conversion = RunConversion::No;
                        changed = true;
                    }
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    tracing::error!("error processing file {}: {message}", source.display());
                    report.failed.push(FileError { path: source, message });
                }
            }
        }

        if changed {
            table.save(table_path)?;
        }
        info!(
            "{} converted ({} degraded), {} skipped, {} failed",
            report.converted(),
            report.degraded,
            report.skipped,
            report.failed.len()
        );
        Ok(report)
    }

    fn install_reference(&self, source: &Path, target: &BidsPath) -> Result<()> {
        let dest = target.fpath();
        if dest.exists() {
            return Ok(());
        }
        self.writer
            .write_reference(source, &dest)
            .with_context(|| format!("installing {}", dest.display()))?;
        info!("{} -> {}", source.display(), dest.display());
        Ok(())
    }

    fn convert(&self, row: &ConversionRow, source: &Path) -> Result<WriteOutcome> {
        let target = row
            .bids_target()
            .with_context(|| format!("'{}' is not a BIDS file name", row.bids_name))?;
        let outcome = write_or_copy(self.writer, source, &target)?;
        self.post_write(row, source, &target);
        info!("{} -> {}", source.display(), target.fpath().display());
        Ok(outcome)
    }

    /// Follow-up steps never undo a write; their failures are logged.
    fn post_write(&self, row: &ConversionRow, source: &Path, target: &BidsPath) {
        let result = if row.datatype == Datatype::Meg.as_str() {
            let enriched = SidecarEnricher::new(self.inspector).enrich(source, target).map(|_| ());
            if row.acquisition == Acquisition::Hedscan.as_str() {
                enriched.and_then(|_| merge_channels_tsv(&target.channels(), &source_channels_tsv(source)).map(|_| ()))
            } else {
                enriched
            }
        } else if row.datatype == Datatype::Eeg.as_str() {
            copy_eeg_to_meg(target).map(|_| ())
        } else {
            Ok(())
        };
        if let Err(e) = result {
            warn!("post-processing of {} failed: {e:#}", target.basename());
        }
    }
}
