//! Head-position files.
//!
//! MNE/MaxFilter `.pos` files hold one row per cHPI fit:
//!
//! ```text
//!  Time       q1       q2       q3       q4       q5       q6       g-value  error    velocity
//! ```
//!
//! `q1..q3` are rotation quaternion components, `q4..q6` the device→head
//! translation in metres.  Estimating positions from cHPI signals is left to
//! a [`HeadPositionEstimator`]; this module parses the results and makes sure
//! each task's files are derived once.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ndarray::{s, Array2, Axis};
use tracing::info;

/// Columns per row of a `.pos` file.
pub const POS_COLUMNS: usize = 10;

/// Parse a `.pos` file into `[n_samples, 10]`.
///
/// The header row, `%` comments and blank lines are skipped.
pub fn read_pos(path: &Path) -> Result<Array2<f64>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_pos(&text).with_context(|| format!("parsing {}", path.display()))
}

pub fn parse_pos(text: &str) -> Result<Array2<f64>> {
    let mut values = Vec::new();
    let mut rows = 0usize;
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('%') {
            continue;
        }
        let first = line.split_whitespace().next().unwrap_or_default();
        if first.parse::<f64>().is_err() {
            continue;
        }
        let row: Vec<f64> = line
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<std::result::Result<_, _>>()
            .with_context(|| format!("line {}", lineno + 1))?;
        if row.len() != POS_COLUMNS {
            bail!("line {}: expected {POS_COLUMNS} columns, got {}", lineno + 1, row.len());
        }
        values.extend(row);
        rows += 1;
    }
    Ok(Array2::from_shape_vec((rows, POS_COLUMNS), values)?)
}

pub fn write_pos(path: &Path, samples: &Array2<f64>) -> Result<()> {
    let mut out = String::from(
        " Time       q1       q2       q3       q4       q5       q6       g-value  error    velocity\n",
    );
    for row in samples.axis_iter(Axis(0)) {
        let cols: Vec<String> = row.iter().map(|v| format!("{v:10.5}")).collect();
        out.push_str(&cols.join(" "));
        out.push('\n');
    }
    fs::write(path, out).with_context(|| format!("writing {}", path.display()))
}

/// Largest magnitude of the fitted head translation `(q4, q5, q6)`, in millimetres.
pub fn max_translation_mm(samples: &Array2<f64>) -> Option<f64> {
    if samples.nrows() == 0 || samples.ncols() < 7 {
        return None;
    }
    samples
        .slice(s![.., 4..7])
        .axis_iter(Axis(0))
        .map(|r| r.mapv(|v| v * v).sum().sqrt() * 1000.0)
        .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d))))
}

// ── Per-task derivation ───────────────────────────────────────────────────

/// Computes continuous head position and the average head transform of a recording.
pub trait HeadPositionEstimator {
    /// Write the `.pos` file for `raw` to `pos_out` and the averaged
    /// device→head transform to `trans_out`.
    fn estimate(&self, raw: &Path, pos_out: &Path, trans_out: &Path) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTransform {
    pub headpos: PathBuf,
    pub trans:   PathBuf,
    /// `false` when existing files were reused.
    pub derived: bool,
}

/// `<session_dir>/<trans_folder>/<task>_headpos.pos` and `<task>_trans.fif`.
pub fn task_transform_paths(session_dir: &Path, trans_folder: &str, task: &str) -> (PathBuf, PathBuf) {
    let dir = session_dir.join(trans_folder);
    (dir.join(format!("{task}_headpos.pos")), dir.join(format!("{task}_trans.fif")))
}

/// Derive the head position and average transform of `task` unless both
/// files already exist.  `overwrite` forces a new derivation.
pub fn ensure_task_transform(
    estimator: &dyn HeadPositionEstimator,
    session_dir: &Path,
    trans_folder: &str,
    task: &str,
    raw: &Path,
    overwrite: bool,
) -> Result<TaskTransform> {
    let (headpos, trans) = task_transform_paths(session_dir, trans_folder, task);
    if !overwrite && headpos.exists() && trans.exists() {
        return Ok(TaskTransform { headpos, trans, derived: false });
    }
    if let Some(dir) = headpos.parent() {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    estimator
        .estimate(raw, &headpos, &trans)
        .with_context(|| format!("estimating head position of {}", raw.display()))?;
    info!("head position of {task} written to {}", headpos.display());
    Ok(TaskTransform { headpos, trans, derived: true })
}
