//! BIDS path construction.
//!
//! Layout: `<root>/sub-<s>/ses-<ses>/<datatype>/<basename>`, with entities in
//! the order `sub ses task acq run proc split desc` followed by
//! `_<suffix><extension>`.  Empty entities are left out.
//!
//! ```
//! use std::path::Path;
//! use megbids::bids::BidsPath;
//!
//! let p = BidsPath::new("/bids", "0123", "231101", "meg")
//!     .task("Rest")
//!     .acquisition("triux")
//!     .processing("tsss+mc")
//!     .extension(".fif");
//! assert_eq!(
//!     p.fpath(),
//!     Path::new("/bids/sub-0123/ses-231101/meg/sub-0123_ses-231101_task-Rest_acq-triux_proc-tsss+mc_meg.fif")
//! );
//! ```
use std::path::{Path, PathBuf};

/// Entity keys in BIDS order.
const ENTITY_ORDER: [&str; 8] = ["sub", "ses", "task", "acq", "run", "proc", "split", "desc"];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BidsPath {
    pub root:        PathBuf,
    pub subject:     String,
    pub session:     String,
    pub task:        String,
    pub acquisition: String,
    pub run:         String,
    pub processing:  String,
    pub split:       String,
    pub description: String,
    pub datatype:    String,
    pub suffix:      String,
    pub extension:   String,
}

impl BidsPath {
    /// A path with subject, session and datatype set.  The suffix defaults to
    /// the datatype.
    pub fn new(
        root: impl Into<PathBuf>,
        subject: impl Into<String>,
        session: impl Into<String>,
        datatype: impl Into<String>,
    ) -> Self {
        let datatype = datatype.into();
        Self {
            root: root.into(),
            subject: subject.into(),
            session: session.into(),
            suffix: datatype.clone(),
            datatype,
            ..Self::default()
        }
    }

    pub fn task(mut self, v: impl Into<String>) -> Self {
        self.task = v.into();
        self
    }

    pub fn acquisition(mut self, v: impl Into<String>) -> Self {
        self.acquisition = v.into();
        self
    }

    pub fn run(mut self, v: impl Into<String>) -> Self {
        self.run = v.into();
        self
    }

    pub fn processing(mut self, v: impl Into<String>) -> Self {
        self.processing = v.into();
        self
    }

    pub fn split(mut self, v: impl Into<String>) -> Self {
        self.split = v.into();
        self
    }

    pub fn description(mut self, v: impl Into<String>) -> Self {
        self.description = v.into();
        self
    }

    pub fn suffix(mut self, v: impl Into<String>) -> Self {
        self.suffix = v.into();
        self
    }

    pub fn extension(mut self, v: impl Into<String>) -> Self {
        self.extension = v.into();
        self
    }

    fn entity(&self, key: &str) -> &str {
        match key {
            "sub" => &self.subject,
            "ses" => &self.session,
            "task" => &self.task,
            "acq" => &self.acquisition,
            "run" => &self.run,
            "proc" => &self.processing,
            "split" => &self.split,
            "desc" => &self.description,
            _ => "",
        }
    }

    fn set_entity(&mut self, key: &str, value: &str) {
        let slot = match key {
            "sub" => &mut self.subject,
            "ses" => &mut self.session,
            "task" => &mut self.task,
            "acq" => &mut self.acquisition,
            "run" => &mut self.run,
            "proc" => &mut self.processing,
            "split" => &mut self.split,
            "desc" => &mut self.description,
            _ => return,
        };
        *slot = value.to_string();
    }

    /// `<root>/sub-<s>[/ses-<ses>]/<datatype>`.
    pub fn directory(&self) -> PathBuf {
        let mut dir = self.root.join(format!("sub-{}", self.subject));
        if !self.session.is_empty() {
            dir.push(format!("ses-{}", self.session));
        }
        if !self.datatype.is_empty() {
            dir.push(&self.datatype);
        }
        dir
    }

    pub fn basename(&self) -> String {
        let mut parts: Vec<String> = ENTITY_ORDER
            .iter()
            .filter(|k| !self.entity(k).is_empty())
            .map(|k| format!("{k}-{}", self.entity(k)))
            .collect();
        if !self.suffix.is_empty() {
            parts.push(self.suffix.clone());
        }
        format!("{}{}", parts.join("_"), self.extension)
    }

    pub fn fpath(&self) -> PathBuf {
        self.directory().join(self.basename())
    }

    /// The JSON sidecar: same entities without `split`.
    pub fn sidecar(&self) -> PathBuf {
        let mut p = self.clone().split("").extension(".json");
        if p.suffix.is_empty() {
            p.suffix = p.datatype.clone();
        }
        p.fpath()
    }

    /// `<entities>_channels.tsv`, without `split` or `desc`.
    pub fn channels(&self) -> PathBuf {
        self.clone()
            .split("")
            .description("")
            .suffix("channels")
            .extension(".tsv")
            .fpath()
    }

    /// The same path with `split-01`, the first part a splitting writer produces.
    pub fn first_split(&self) -> PathBuf {
        self.clone().split("01").fpath()
    }

    /// `true` when the file or its first split part is on disk.
    pub fn exists(&self) -> bool {
        self.fpath().exists() || (self.split.is_empty() && self.first_split().exists())
    }

    /// Fine-calibration file of one MEG session.
    pub fn calibration(root: impl Into<PathBuf>, subject: &str, session: &str) -> Self {
        Self::new(root, subject, session, "meg")
            .acquisition("calibration")
            .extension(".dat")
    }

    /// Cross-talk file of one MEG session.
    pub fn crosstalk(root: impl Into<PathBuf>, subject: &str, session: &str) -> Self {
        Self::new(root, subject, session, "meg")
            .acquisition("crosstalk")
            .extension(".fif")
    }

    /// Parse a file that already sits in a BIDS tree.
    ///
    /// Returns `None` unless the basename starts with `sub-`.  The root is
    /// recovered from the directory depth implied by the session entity.
    pub fn parse(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let (stem, extension) = match name.find('.') {
            Some(i) => (&name[..i], &name[i..]),
            None => (name, ""),
        };
        if !stem.starts_with("sub-") {
            return None;
        }
        let mut out = Self {
            extension: extension.to_string(),
            ..Self::default()
        };
        for part in stem.split('_') {
            match part.split_once('-') {
                Some((k, v)) if ENTITY_ORDER.contains(&k) => out.set_entity(k, v),
                Some(_) => {}
                None => out.suffix = part.to_string(),
            }
        }
        let datatype_dir = path.parent()?;
        out.datatype = datatype_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let subject_dir = if out.session.is_empty() {
            datatype_dir.parent()?
        } else {
            datatype_dir.parent()?.parent()?
        };
        out.root = subject_dir.parent()?.to_path_buf();
        Some(out)
    }
}
