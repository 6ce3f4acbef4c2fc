//! Optional subject/session remapping.
//!
//! A comma-separated file with a header row.  Four configured column names
//! select the old/new subject and old/new session columns.  Mapped subjects
//! are zero-padded to three digits and mapped sessions to two.
use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use crate::config::BidsifyConfig;

pub const SUBJECT_WIDTH: usize = 3;
pub const SESSION_WIDTH: usize = 2;

#[derive(Debug, Clone, Default)]
pub struct SubjectSessionMap {
    subjects: HashMap<String, String>,
    sessions: HashMap<String, String>,
}

fn pad(value: &str, width: usize) -> String {
    format!("{value:0>width$}")
}

impl SubjectSessionMap {
    /// Read a mapping CSV.
    pub fn from_csv(
        path: &Path,
        old_subject: &str,
        new_subject: &str,
        old_session: &str,
        new_session: &str,
    ) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("opening mapping file {}", path.display()))?;
        let headers = rdr.headers()?.clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .with_context(|| format!("column '{name}' not in {}", path.display()))
        };
        let (os, ns) = (column(old_subject)?, column(new_subject)?);
        let (oe, ne) = (column(old_session)?, column(new_session)?);

        let mut map = Self::default();
        for record in rdr.records() {
            let record = record.with_context(|| format!("reading {}", path.display()))?;
            let get = |i: usize| record.get(i).unwrap_or("").to_string();
            if !get(os).is_empty() && !get(ns).is_empty() {
                map.subjects.insert(get(os), pad(&get(ns), SUBJECT_WIDTH));
            }
            if !get(oe).is_empty() && !get(ne).is_empty() {
                map.sessions.insert(get(oe), pad(&get(ne), SESSION_WIDTH));
            }
        }
        Ok(map)
    }

    /// The mapping named by a conversion record, if one is configured and
    /// present.  A configured but missing file is warned about and ignored.
    pub fn from_config(cfg: &BidsifyConfig) -> Result<Option<Self>> {
        let Some(path) = cfg.mapping_file() else {
            return Ok(None);
        };
        if !path.exists() {
            warn!("participant mapping file {} not found, skipping", path.display());
            return Ok(None);
        }
        Self::from_csv(
            &path,
            &cfg.old_subject_column,
            &cfg.new_subject_column,
            &cfg.old_session_column,
            &cfg.new_session_column,
        )
        .map(Some)
    }

    /// Mapped subject, or `raw` with a warning when it is not listed.
    pub fn subject(&self, raw: &str) -> String {
        self.subjects.get(raw).cloned().unwrap_or_else(|| {
            warn!("subject {raw} not in mapping file, keeping it");
            raw.to_string()
        })
    }

    pub fn session(&self, raw: &str) -> String {
        self.sessions.get(raw).cloned().unwrap_or_else(|| {
            warn!("session {raw} not in mapping file, keeping it");
            raw.to_string()
        })
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty() && self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_map(dir: &Path) -> std::path::PathBuf {
        let p = dir.join("map.csv");
        std::fs::write(&p, "old,new,old_ses,new_ses\n0123,7,231101,1\n0124,12,231102,2\n").unwrap();
        p
    }

    #[test]
    fn maps_and_pads() {
        let dir = tempfile::tempdir().unwrap();
        let m = SubjectSessionMap::from_csv(&write_map(dir.path()), "old", "new", "old_ses", "new_ses")
            .unwrap();
        assert_eq!(m.subject("0123"), "007");
        assert_eq!(m.subject("0124"), "012");
        assert_eq!(m.session("231101"), "01");
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn unknown_ids_fall_back_to_raw() {
        let m = SubjectSessionMap::default();
        assert_eq!(m.subject("0999"), "0999");
        assert_eq!(m.session("240101"), "240101");
    }

    #[test]
    fn missing_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SubjectSessionMap::from_csv(&write_map(dir.path()), "subject", "new", "old_ses", "new_ses")
            .unwrap_err();
        assert!(err.to_string().contains("subject"));
    }

    #[test]
    fn configured_but_missing_file_is_skipped() {
        let cfg = BidsifyConfig {
            participants_mapping: "/nonexistent/map.csv".into(),
            ..BidsifyConfig::default()
        };
        assert!(SubjectSessionMap::from_config(&cfg).unwrap().is_none());
    }
}
