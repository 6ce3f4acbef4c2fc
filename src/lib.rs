//! # megbids: NatMEG recordings to BIDS
//!
//! `megbids` converts the raw MEG, OPM and EEG recordings of the NatMEG lab
//! into a BIDS tree and plans the MaxFilter runs of a project.  Recordings
//! are never decoded: a native FIFF header reader supplies everything the
//! conversion needs (channel composition, gantry angle, head-coil
//! frequencies, MaxFilter history).
//!
//! ## Conversion overview
//!
//! ```text
//! <squidMEG>/NatMEG_0123/231101/meg/rest_raw.fif     <opmMEG>/sub-0045/20231101_..._raw.fif
//!   │                                                   │
//!   ├─ builder::SourceTree::walk()     one walk per acquisition (triux / hedscan)
//!   ├─ entity::extract()               filename → subject, task, proc, split, desc
//!   ├─ mapping::SubjectSessionMap      optional subject/session renaming
//!   ├─ io::RecordingInspector          datatype from the channel set
//!   ├─ table::ConversionTable          task_count / task_flag, saved as dated TSV
//!   │
//!   ├─ executor::Executor              consistency gate, references, writes
//!   └─ sidecar::SidecarEnricher        institution, dewar, empty rooms, MaxFilter
//!        │
//!        └─→ <BIDS>/sub-0123/ses-231101/meg/sub-0123_ses-231101_task-Rest_acq-triux_meg.fif
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::path::Path;
//! use megbids::{bidsify, BidsifyConfig, FifBidsWriter, FifInspector};
//!
//! let cfg = BidsifyConfig::load(Path::new("bidsify_config.json")).unwrap();
//! let today = chrono::Local::now().date_naive();
//! let run = bidsify(&cfg, &FifInspector, &FifBidsWriter, today).unwrap();
//! println!("{} files converted, table in {}", run.report.converted(), run.table_path.display());
//! ```
//!
//! ## MaxFilter
//!
//! ```no_run
//! use std::path::Path;
//! use megbids::maxfilter::{plan_session, resolve};
//! use megbids::{FifInspector, MaxFilterSettings};
//!
//! let settings = MaxFilterSettings::load(Path::new("maxfilter_settings.json")).unwrap();
//! let params = resolve(&settings, "NatMEG_0123", "231101", "rest").unwrap();
//! println!("proc-{}", params.label());
//!
//! for plan in plan_session(&settings, &FifInspector, "NatMEG_0123", "231101").unwrap() {
//!     for job in &plan.jobs {
//!         println!("{}", job.command);
//!     }
//! }
//! ```

pub mod bids;
pub mod builder;
pub mod config;
pub mod entity;
pub mod error;
pub mod executor;
pub mod fiff;
pub mod headpos;
pub mod io;
pub mod logging;
pub mod mapping;
pub mod maxfilter;
pub mod sidecar;
pub mod table;

use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{error, info};

// ── Crate-root re-exports ─────────────────────────────────────────────────

// bids
pub use bids::BidsPath;

// builder
pub use builder::{Acquisition, BuildReport, FileError, SourceTree, TableBuilder};

// config
pub use config::{BidsifyConfig, MaxFilterSettings, Switch};

// entity
pub use entity::{extract, Datatype, FileEntity, NoiseTask, ProcessingStep};

// error
pub use error::{ConfigError, ConversionError, ExtractError};

// executor
pub use executor::{ExecutionContext, ExecutionReport, Executor};

// fiff: header reader
pub use fiff::{read_header, ChannelType, RecordingHeader};

// headpos
pub use headpos::{ensure_task_transform, max_translation_mm, read_pos, HeadPositionEstimator};

// io: collaborators
pub use io::{write_or_copy, FifBidsWriter, FifInspector, RecordingInspector, RecordingWriter, WriteOutcome};

// mapping
pub use mapping::SubjectSessionMap;

// sidecar
pub use sidecar::{update_sidecar_json, SidecarEnricher};

// table
pub use table::{ConversionRow, ConversionTable, RunConversion, TaskFlag};

/// Outcome of [`bidsify`].
#[derive(Debug)]
pub struct Conversion {
    /// The table that was executed.
    pub table_path:   PathBuf,
    /// Files left out of a freshly built table.
    pub build_errors: Vec<FileError>,
    pub report:       ExecutionReport,
}

/// Convert everything a conversion record points at.
///
/// The most recent table in `<BIDS>/conversion_logs` is executed when one
/// exists; otherwise the source trees are scanned and the new table is saved
/// under `today`'s date before executing it.
///
/// # Errors
///
/// * [`ConfigError`] for a missing BIDS root, an unreadable mapping file, a
///   faulty `Overwrite` value or missing reference files.
/// * [`ConversionError::InconsistentTaskCounts`] when the table still has
///   `check` rows.  Nothing is written in that case.
pub fn bidsify(
    cfg: &BidsifyConfig,
    inspector: &dyn RecordingInspector,
    writer: &dyn RecordingWriter,
    today: NaiveDate,
) -> Result<Conversion> {
    let ctx = ExecutionContext::from_config(cfg)?;
    let dir = table::log_dir(&ctx.bids_root);

    let (mut table, table_path, build_errors) = match table::latest_table(&dir) {
        Some(path) => {
            info!("using conversion table {}", path.display());
            (ConversionTable::load(&path)?, path, Vec::new())
        }
        None => {
            let mapping = SubjectSessionMap::from_config(cfg)?;
            let report = TableBuilder::new(&ctx.bids_root, inspector, today)
                .with_mapping(mapping.as_ref())
                .build(&SourceTree::from_config(cfg));
            for e in &report.errors {
                error!("Error processing file: {}", e.path.display());
            }
            let path = report.table.save_new(&ctx.bids_root, today)?;
            info!("conversion table with {} rows saved to {}", report.table.len(), path.display());
            (report.table, path, report.errors)
        }
    };

    let report = Executor::new(ctx, writer, inspector).execute(&mut table, &table_path)?;
    Ok(Conversion { table_path, build_errors, report })
}
