//! Filename → [`FileEntity`] tokenizer.
//!
//! The stem is split on `_` into segments and every segment on `-`/`+` into
//! pieces.  Pieces that belong to a known vocabulary are removed, the
//! surviving pieces of each segment are glued back together and the
//! remaining segments are title-cased into the task label.
//!
//! OPM exports (`..._file-<task>opm_raw.fif`) carry their task positionally
//! and skip the vocabulary stripping.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use super::vocab::{
    Datatype, Description, NoiseTask, ProcessingStep, OPM_MODALITY_MARKER, OPM_TASK_PREFIX,
    OPM_VENDOR_MARKER, PARTICIPANT_PREFIXES, PROCESSING_MARKER,
};
use super::FileEntity;
use crate::error::ExtractError;

fn participant_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:NatMEG_|sub-)(\d+)").expect("participant pattern"))
}

fn split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-(\d+)$").expect("split pattern"))
}

/// Extract the entities of one raw filename.
///
/// `filename` may be a bare basename or a full path; the participant is
/// looked up in the basename first and then in the whole path, so files in a
/// `NatMEG_<id>/` tree do not need the id in their own name.
///
/// Subject and session are filled with the participant id and an empty
/// session; the builder sets the session from the directory layout and
/// applies remapping.
pub fn extract(filename: &str) -> Result<FileEntity, ExtractError> {
    let path = Path::new(filename);
    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());

    let participant = participant_re()
        .captures(&basename)
        .or_else(|| participant_re().captures(filename))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ExtractError::MalformedFilename(filename.to_string()))?;

    let (stem, extension) = match basename.find('.') {
        Some(i) => (&basename[..i], basename[i..].to_string()),
        None => (basename.as_str(), String::new()),
    };

    let (stem, split) = match split_re().captures(stem) {
        Some(c) => {
            let whole = c.get(0).map_or(0, |m| m.start());
            let digits = c.get(1).map_or("", |m| m.as_str());
            (&stem[..whole], format!("{digits:0>2}"))
        }
        None => (stem, String::new()),
    };

    let pieces: Vec<&str> = stem.split(['_', '-', '+']).filter(|p| !p.is_empty()).collect();
    let datatypes = detect_datatypes(&pieces, &basename);
    let processing = detect_processing(&pieces);
    let description = detect_description(&pieces);

    let residual = if datatypes.contains(&Datatype::Opm) {
        opm_task(stem, &participant)
    } else {
        strip_known_tokens(stem, &participant)
    };
    let residual = remove_all(&residual, &participant);
    if residual.is_empty() {
        return Err(ExtractError::AmbiguousTask(filename.to_string()));
    }

    let task = match NoiseTask::classify(&residual) {
        Some(noise) => noise.as_str().to_string(),
        None => residual,
    };

    Ok(FileEntity {
        raw_path: PathBuf::from(filename),
        subject_raw: participant.clone(),
        subject_mapped: participant,
        session_raw: String::new(),
        session_mapped: String::new(),
        task,
        processing,
        description,
        datatypes,
        split,
        extension,
    })
}

/// Modality tokens, first-seen order.  A piece counts when it is a token or
/// ends with one (`RSEOopm`).  A vendor marker anywhere in the name makes the
/// file OPM.
fn detect_datatypes(pieces: &[&str], basename: &str) -> Vec<Datatype> {
    let mut found: Vec<Datatype> = Vec::new();
    for piece in pieces {
        let lower = piece.to_lowercase();
        for d in Datatype::ALL {
            if lower.ends_with(d.as_str()) && !found.contains(&d) {
                found.push(d);
            }
        }
    }
    if basename.to_lowercase().contains(OPM_VENDOR_MARKER) && !found.contains(&Datatype::Opm) {
        found.push(Datatype::Opm);
    }
    found
}

fn detect_processing(pieces: &[&str]) -> Vec<ProcessingStep> {
    let mut steps: Vec<ProcessingStep> = Vec::new();
    for step in pieces.iter().filter_map(|p| ProcessingStep::parse(p)) {
        if !steps.contains(&step) {
            steps.push(step);
        }
    }
    let finer: Vec<ProcessingStep> = steps.clone();
    steps.retain(|s| !finer.iter().any(|f| f.supersedes(*s)));
    steps
}

fn detect_description(pieces: &[&str]) -> Vec<Description> {
    let mut found: Vec<Description> = Vec::new();
    for d in pieces.iter().filter_map(|p| Description::from_token(p)) {
        if !found.contains(&d) {
            found.push(d);
        }
    }
    found
}

fn is_known_piece(piece: &str, participant: &str) -> bool {
    piece == participant
        || piece.eq_ignore_ascii_case(PROCESSING_MARKER)
        || PARTICIPANT_PREFIXES.iter().any(|p| piece.eq_ignore_ascii_case(p))
        || Datatype::from_token(piece).is_some()
        || ProcessingStep::parse(piece).is_some()
        || Description::from_token(piece).is_some()
}

/// Conventional filenames: drop every recognised piece, title-case what is left.
fn strip_known_tokens(stem: &str, participant: &str) -> String {
    stem.split('_')
        .map(|segment| {
            segment
                .split(['-', '+'])
                .filter(|p| !p.is_empty() && !is_known_piece(p, participant))
                .collect::<String>()
        })
        .map(|segment| remove_all(&segment, participant))
        .filter(|segment| !segment.is_empty())
        .map(|segment| title_case(&segment))
        .collect()
}

/// OPM filenames: the `file-` segment (or the second-to-last one) names the
/// task; everything from `opm` on is vendor suffix.
fn opm_task(stem: &str, participant: &str) -> String {
    let segments: Vec<&str> = stem.split('_').filter(|s| !s.is_empty()).collect();
    let picked = segments
        .iter()
        .find(|s| s.to_ascii_lowercase().starts_with(OPM_TASK_PREFIX))
        .or_else(|| segments.len().checked_sub(2).and_then(|i| segments.get(i)))
        .or_else(|| segments.first())
        .copied()
        .unwrap_or_default();

    let task = if picked.to_ascii_lowercase().starts_with(OPM_TASK_PREFIX) {
        &picked[OPM_TASK_PREFIX.len()..]
    } else {
        picked
    };
    let task = match task.to_ascii_lowercase().find(OPM_MODALITY_MARKER) {
        Some(i) => &task[..i],
        None => task,
    };
    remove_all(task.trim_matches(['-', '+']), participant)
}

/// Remove `needle` until it no longer occurs; removals can splice new matches.
fn remove_all(text: &str, needle: &str) -> String {
    let mut out = text.to_string();
    if needle.is_empty() {
        return out;
    }
    while out.contains(needle) {
        out = out.replace(needle, "");
    }
    out
}

/// Upper-case the first letter of every alphabetic run, lower-case the rest
/// (`task1a` → `Task1A`, `RSEO` → `Rseo`).
pub(crate) fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_word = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}
