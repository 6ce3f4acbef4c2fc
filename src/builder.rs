//! Conversion table builder.
//!
//! Walks every configured source tree, extracts entities from each `.fif`
//! file, remaps subject/session, asks the inspector for the channel
//! composition and plans the BIDS target.  Files that cannot be planned are
//! collected in [`BuildReport::errors`] and left out of the table.
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::bids::BidsPath;
use crate::config::BidsifyConfig;
use crate::entity::{extract, FileEntity};
use crate::io::RecordingInspector;
use crate::mapping::SubjectSessionMap;
use crate::table::{ConversionRow, ConversionTable, RunConversion, TaskFlag};

// ── Source trees ──────────────────────────────────────────────────────────

/// Acquisition system, used as the BIDS `acq` entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// Conventional SQUID MEG: `<root>/NatMEG_<id>/<session>/meg/*.fif`.
    Triux,
    /// OPM MEG: `<root>/sub-<id>/<YYYYMMDD>_..._.fif`.
    Hedscan,
}

impl Acquisition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Triux => "triux",
            Self::Hedscan => "hedscan",
        }
    }
}

impl fmt::Display for Acquisition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTree {
    pub acquisition: Acquisition,
    pub root:        PathBuf,
}

impl SourceTree {
    /// The trees a conversion record configures, conventional first.
    pub fn from_config(cfg: &BidsifyConfig) -> Vec<Self> {
        let mut trees = Vec::new();
        if let Some(root) = cfg.squid_root() {
            trees.push(Self { acquisition: Acquisition::Triux, root });
        }
        if let Some(root) = cfg.opm_root() {
            trees.push(Self { acquisition: Acquisition::Hedscan, root });
        }
        trees
    }

    pub fn walk(&self) -> Vec<SourceFile> {
        match self.acquisition {
            Acquisition::Triux => walk_triux(&self.root),
            Acquisition::Hedscan => walk_hedscan(&self.root),
        }
    }
}

/// One recording found by a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path:            PathBuf,
    /// Participant directory name as found.
    pub participant_dir: String,
    pub session:         String,
    pub acquisition:     Acquisition,
}

/// Sorted, non-hidden children of `dir`.
fn children(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.into_path())
        .collect()
}

fn name_of(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

fn is_fif(path: &Path) -> bool {
    path.is_file() && name_of(path).ends_with(".fif")
}

pub fn walk_triux(root: &Path) -> Vec<SourceFile> {
    let mut out = Vec::new();
    for participant in children(root).into_iter().filter(|p| p.is_dir()) {
        let participant_dir = name_of(&participant);
        if !participant_dir.starts_with("NatMEG") {
            continue;
        }
        for session in children(&participant).into_iter().filter(|p| p.is_dir()) {
            let session_name = name_of(&session);
            for file in children(&session.join("meg")).into_iter().filter(|p| is_fif(p)) {
                out.push(SourceFile {
                    path: file,
                    participant_dir: participant_dir.clone(),
                    session: session_name.clone(),
                    acquisition: Acquisition::Triux,
                });
            }
        }
    }
    out
}

/// Session of an OPM export: its leading `YYYYMMDD` segment without the century.
pub fn hedscan_session(file_name: &str) -> String {
    let first = file_name.split('_').next().unwrap_or_default();
    first.get(2..).unwrap_or_default().to_string()
}

pub fn walk_hedscan(root: &Path) -> Vec<SourceFile> {
    let mut out = Vec::new();
    for participant in children(root).into_iter().filter(|p| p.is_dir()) {
        let participant_dir = name_of(&participant);
        if !participant_dir.starts_with("sub") {
            continue;
        }
        for file in children(&participant).into_iter().filter(|p| is_fif(p)) {
            let session = hedscan_session(&name_of(&file));
            out.push(SourceFile {
                path: file,
                participant_dir: participant_dir.clone(),
                session,
                acquisition: Acquisition::Hedscan,
            });
        }
    }
    out
}

// ── Build ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileError {
    pub path:    PathBuf,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub table:  ConversionTable,
    pub errors: Vec<FileError>,
}

pub struct TableBuilder<'a> {
    bids_root: PathBuf,
    mapping:   Option<&'a SubjectSessionMap>,
    inspector: &'a dyn RecordingInspector,
    date:      NaiveDate,
}

impl<'a> TableBuilder<'a> {
    pub fn new(bids_root: impl Into<PathBuf>, inspector: &'a dyn RecordingInspector, date: NaiveDate) -> Self {
        Self { bids_root: bids_root.into(), mapping: None, inspector, date }
    }

    pub fn with_mapping(mut self, mapping: Option<&'a SubjectSessionMap>) -> Self {
        self.mapping = mapping;
        self
    }

    /// Plan every file of every tree, then fill the task-count columns.
    pub fn build(&self, sources: &[SourceTree]) -> BuildReport {
        let mut report = BuildReport::default();
        for tree in sources {
            let files = tree.walk();
            info!("{}: {} recordings under {}", tree.acquisition, files.len(), tree.root.display());
            for file in files {
                match self.plan(&file) {
                    Ok(row) => report.table.rows.push(row),
                    Err(message) => {
                        warn!("{}: {message}", file.path.display());
                        report.errors.push(FileError { path: file.path, message });
                    }
                }
            }
        }
        report.table.compute_task_counts();
        report
    }

    fn remap(&self, entity: FileEntity) -> FileEntity {
        match self.mapping {
            Some(map) => FileEntity {
                subject_mapped: map.subject(&entity.subject_raw),
                session_mapped: map.session(&entity.session_raw),
                ..entity
            },
            None => entity,
        }
    }

    fn plan(&self, file: &SourceFile) -> Result<ConversionRow, String> {
        let entity = extract(&file.path.to_string_lossy()).map_err(|e| e.to_string())?;
        let entity = self.remap(entity.with_session(file.session.clone()));

        let header = self.inspector.inspect(&file.path).map_err(|e| format!("{e:#}"))?;
        let datatype = header
            .datatype()
            .ok_or_else(|| "no MEG or EEG channels".to_string())?;

        let target = BidsPath::new(
            &self.bids_root,
            &entity.subject_mapped,
            &entity.session_mapped,
            datatype.as_str(),
        )
        .task(&entity.task)
        .acquisition(file.acquisition.as_str())
        .processing(entity.processing_label())
        .split(&entity.split)
        .description(entity.description_label())
        .extension(&entity.extension);

        let run_conversion = if target.exists() { RunConversion::No } else { RunConversion::Yes };
        let parent = file.path.parent().map(Path::to_path_buf).unwrap_or_default();

        Ok(ConversionRow {
            time_stamp: self.date.format("%Y%m%d").to_string(),
            run_conversion,
            task_count: 0,
            task_flag: TaskFlag::Ok,
            participant_from: file.participant_dir.clone(),
            participant_to: entity.subject_mapped.clone(),
            session_from: entity.session_raw.clone(),
            session_to: entity.session_mapped.clone(),
            task: entity.task.clone(),
            split: entity.split.clone(),
            run: String::new(),
            datatype: datatype.as_str().to_string(),
            acquisition: file.acquisition.as_str().to_string(),
            processing: entity.processing_label(),
            description: entity.description_label(),
            raw_path: parent.to_string_lossy().into_owned(),
            raw_name: name_of(&file.path),
            bids_path: target.directory().to_string_lossy().into_owned(),
            bids_name: target.basename(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn hedscan_session_drops_century() {
        assert_eq!(hedscan_session("20231101_103722_sub-0045_file-rest_raw.fif"), "231101");
        assert_eq!(hedscan_session("x"), "");
    }

    #[test]
    fn triux_walk_layout() {
        let dir = tempfile::tempdir().unwrap();
        let meg = dir.path().join("NatMEG_0123/231101/meg");
        fs::create_dir_all(&meg).unwrap();
        for f in ["rest_raw.fif", "notes.txt", ".hidden.fif", "b_raw.fif"] {
            fs::write(meg.join(f), b"").unwrap();
        }
        fs::create_dir_all(dir.path().join("other/231101/meg")).unwrap();

        let files = walk_triux(dir.path());
        let names: Vec<String> = files.iter().map(|f| name_of(&f.path)).collect();
        assert_eq!(names, vec!["b_raw.fif", "rest_raw.fif"]);
        assert_eq!(files[0].session, "231101");
        assert_eq!(files[0].participant_dir, "NatMEG_0123");
    }

    #[test]
    fn hedscan_walk_layout() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub-0045");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("20231101_1_sub-0045_file-rest_raw.fif"), b"").unwrap();
        let files = walk_hedscan(dir.path());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].session, "231101");
        assert_eq!(files[0].acquisition, Acquisition::Hedscan);
    }
}
