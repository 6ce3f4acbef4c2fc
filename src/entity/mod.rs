//! Filename entity extraction.
//!
//! ```
//! use megbids::entity::{extract, ProcessingStep};
//!
//! let e = extract("NatMEG_0123/231101/meg/task1_tsss_mc.fif").unwrap();
//! assert_eq!(e.subject_raw, "0123");
//! assert_eq!(e.task, "Task1");
//! assert_eq!(e.processing, vec![ProcessingStep::Tsss, ProcessingStep::Mc]);
//! assert_eq!(e.extension, ".fif");
//! assert_eq!(e.split, "");
//! ```
pub mod extract;
pub mod vocab;

pub use extract::extract;
pub use vocab::{is_noise_task, Datatype, Description, NoiseTask, ProcessingStep};

use std::path::PathBuf;

/// Everything that can be read off one raw filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntity {
    /// Source location, never rewritten.
    pub raw_path: PathBuf,
    /// Participant digits as found (`0123`).
    pub subject_raw: String,
    /// Participant after remapping; equals `subject_raw` without a mapping.
    pub subject_mapped: String,
    /// Session as found in the directory layout or filename.
    pub session_raw: String,
    pub session_mapped: String,
    /// Normalised task label.
    pub task: String,
    /// MaxFilter steps, first-seen order.
    pub processing: Vec<ProcessingStep>,
    pub description: Vec<Description>,
    pub datatypes: Vec<Datatype>,
    /// Zero-padded split index, or empty.
    pub split: String,
    /// Everything from the first `.` of the basename (`.fif`, `.pos`, `.tar.gz`).
    pub extension: String,
}

impl FileEntity {
    /// `tsss+mc`, or empty.
    pub fn processing_label(&self) -> String {
        join(self.processing.iter().map(|p| p.label()))
    }

    /// `trans+headpos`, or empty.
    pub fn description_label(&self) -> String {
        join(self.description.iter().map(|d| d.as_str().to_string()))
    }

    pub fn is_noise(&self) -> bool {
        is_noise_task(&self.task)
    }

    /// Set both session fields.  Remapping happens later.
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        let session = session.into();
        self.session_mapped = session.clone();
        self.session_raw = session;
        self
    }
}

fn join(parts: impl Iterator<Item = String>) -> String {
    parts.collect::<Vec<_>>().join("+")
}
