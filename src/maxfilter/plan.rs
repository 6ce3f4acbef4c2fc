//! Session planning: which files each task runs on and the exact command.
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::warn;
use walkdir::WalkDir;

use super::resolve::{resolve, ParameterSet};
use crate::config::MaxFilterSettings;
use crate::entity::ProcessingStep;
use crate::io::RecordingInspector;

/// Substrings of files that are never MaxFiltered directly.
const EXCLUDED_MARKERS: [&str; 4] = ["_trans", "opm", "eeg", "avg.fif"];

fn split_part() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-\d+\.fif$").expect("constant regex"))
}

/// Tasks of a session: the sorted union of `trans_conditions`, `sss_files`
/// and `empty_room_files`.
pub fn tasks(settings: &MaxFilterSettings) -> Vec<String> {
    let std = &settings.standard;
    let all: BTreeSet<&String> = std
        .trans_conditions
        .iter()
        .chain(&std.sss_files)
        .chain(&std.empty_room_files)
        .collect();
    all.into_iter().cloned().collect()
}

/// Split parts, transforms, OPM and EEG recordings, averages and anything
/// carrying a processing token are left out.
pub fn is_excluded(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    if split_part().is_match(&lower) || EXCLUDED_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    let stem = lower.split('.').next().unwrap_or_default();
    stem.split(['_', '-', '+']).any(is_processed_piece)
}

/// `proc` or a processing step, matched on a lowercased piece.
fn is_processed_piece(piece: &str) -> bool {
    matches!(piece, "proc" | "avghead") || ProcessingStep::parse(piece).is_some()
}

/// Files of `task` among `names`, in name order.
pub fn task_files<'a>(names: &'a [String], task: &str) -> Vec<&'a str> {
    names
        .iter()
        .map(String::as_str)
        .filter(|n| n.contains(task) && !is_excluded(n))
        .collect()
}

/// `<stem>_proc-<label>.fif`, or `..._proc-<label>_meg.fif` when the name
/// carries no `raw`/`meg` suffix.
pub fn output_name(file_name: &str, label: &str) -> String {
    let stem = file_name.strip_suffix(".fif").unwrap_or(file_name);
    let out = format!("{stem}_proc-{label}");
    if out.contains("raw") || out.contains("meg") {
        format!("{out}.fif")
    } else {
        format!("{out}_meg.fif")
    }
}

/// One MaxFilter invocation, relative to the session directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub input:   String,
    pub output:  String,
    pub log:     String,
    pub command: String,
}

pub fn command_line(exe: &str, input: &str, output: &str, params: &ParameterSet, extra: &str, log: &str) -> String {
    let input = format!("-f {input}");
    let output = format!("-o {output}");
    let tee = format!("| tee -a {log}");
    let mut parts = vec![exe, input.as_str(), output.as_str()];
    parts.extend(params.native_flags());
    parts.extend([extra.trim(), "-v", tee.as_str()]);
    parts.retain(|p| !p.is_empty());
    parts.join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPlan {
    pub params:   ParameterSet,
    /// Runs of the task; measurement-date order when they are merged.
    pub inputs:   Vec<String>,
    pub merge:    bool,
    pub jobs:     Vec<Job>,
    /// Outputs already on disk.
    pub existing: Vec<String>,
}

fn fif_names(dir: &Path) -> Vec<String> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".fif") && !n.starts_with('.'))
        .collect()
}

/// Order runs by measurement date.  Unreadable dates sort last, by name.
fn by_meas_date(dir: &Path, names: Vec<String>, inspector: &dyn RecordingInspector) -> Vec<String> {
    let mut dated: Vec<(Option<DateTime<Utc>>, String)> = names
        .into_iter()
        .map(|n| {
            let date = match inspector.inspect(&dir.join(&n)) {
                Ok(h) => h.meas_date,
                Err(e) => {
                    warn!("no measurement date for {n}: {e:#}");
                    None
                }
            };
            (date, n)
        })
        .collect();
    dated.sort_by(|a, b| match (a.0, b.0) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.1.cmp(&b.1)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.1.cmp(&b.1),
    });
    dated.into_iter().map(|(_, n)| n).collect()
}

/// Plan every task of one session.
pub fn plan_session(
    settings: &MaxFilterSettings,
    inspector: &dyn RecordingInspector,
    subject: &str,
    session: &str,
) -> Result<Vec<TaskPlan>> {
    let merge_runs = settings.standard.merge_runs.is_on("merge_runs")?;
    let adv = &settings.advanced;
    let mut plans = Vec::new();
    for task in tasks(settings) {
        let params = resolve(settings, subject, session, &task)?;
        let names = fif_names(&params.session_dir);
        let inputs: Vec<String> = task_files(&names, &task).into_iter().map(str::to_string).collect();
        let merge = merge_runs && inputs.len() > 1;
        let inputs = if merge { by_meas_date(&params.session_dir, inputs, inspector) } else { inputs };

        let label = params.label();
        let targets: Vec<&String> = if merge { inputs.iter().take(1).collect() } else { inputs.iter().collect() };
        let mut jobs = Vec::new();
        let mut existing = Vec::new();
        for input in targets {
            let output = output_name(input, &label);
            if params.session_dir.join(&output).exists() {
                existing.push(output);
                continue;
            }
            let log = format!("{}/{}.log", adv.log_folder, output.strip_suffix(".fif").unwrap_or(&output));
            let command = command_line(&adv.maxfilter_version, input, &output, &params, &adv.maxfilter_commands, &log);
            jobs.push(Job { input: input.clone(), output, log, command });
        }
        plans.push(TaskPlan { params, inputs, merge, jobs, existing });
    }
    Ok(plans)
}

/// `(subject, session)` pairs under the data root: `NatMEG*` directories and
/// their session directories.
pub fn sessions(data_root: &Path) -> Vec<(String, String)> {
    let dirs = |p: &Path| -> Vec<PathBuf> {
        WalkDir::new(p)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .map(|e| e.into_path())
            .collect()
    };
    let name = |p: &Path| p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let mut out = Vec::new();
    for subject in dirs(data_root) {
        let subject_name = name(&subject);
        if !subject_name.starts_with("NatMEG") {
            continue;
        }
        for session in dirs(&subject) {
            out.push((subject_name.clone(), name(&session)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusions() {
        for name in [
            "rest_raw-1.fif",
            "rest_trans.fif",
            "rest_opm_raw.fif",
            "rest_eeg.fif",
            "rest_avg.fif",
            "rest_tsss.fif",
            "rest_proc-tsss+mc_meg.fif",
            "rest_corr98.fif",
            "rest_avgHead.fif",
        ] {
            assert!(is_excluded(name), "{name}");
        }
        for name in ["rest_raw.fif", "words_raw.fif", "correct_raw.fif", "rest_corr_raw.fif"] {
            assert!(!is_excluded(name), "{name}");
        }
    }

    #[test]
    fn output_names() {
        assert_eq!(output_name("rest_raw.fif", "tsss+mc"), "rest_raw_proc-tsss+mc.fif");
        assert_eq!(output_name("rest.fif", "sss"), "rest_proc-sss_meg.fif");
    }

    #[test]
    fn task_union_is_sorted_and_unique() {
        let mut s = MaxFilterSettings::default();
        s.standard.trans_conditions = vec!["rest".into(), "oddball".into()];
        s.standard.sss_files = vec!["empty_room_before.fif".into()];
        s.standard.empty_room_files = vec!["empty_room_before.fif".into()];
        assert_eq!(tasks(&s), vec!["empty_room_before.fif", "oddball", "rest"]);
    }

    #[test]
    fn command_skips_empty_parts() {
        let s = MaxFilterSettings::default();
        let params = resolve(&s, "NatMEG_1", "1", "noise").unwrap();
        let cmd = command_line("/neuro/bin/util/mfilter", "noise.fif", "noise_proc-sss_meg.fif", &params, "", "log/x.log");
        assert_eq!(
            cmd,
            "/neuro/bin/util/mfilter -f noise.fif -o noise_proc-sss_meg.fif \
             -cal /neuro/databases/sss/sss_cal.dat -ctc /neuro/databases/ctc/ct_sparse.fif \
             -autobad on -badlimit 7 -v | tee -a log/x.log"
        );
    }
}
