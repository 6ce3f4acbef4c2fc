//! Closed vocabularies recognised in raw NatMEG filenames.
//!
//! Each vocabulary is an ordered enumeration.  Declaration order is the match
//! order; where two entries can both describe the same token the more
//! specific one wins (see [`ProcessingStep::supersedes`]).
use std::fmt;

/// Participant prefixes, legacy first.
pub const PARTICIPANT_PREFIXES: [&str; 2] = ["NatMEG", "sub"];

/// Literal that introduces MaxFilter steps in processed filenames (`_proc-tsss+mc`).
pub const PROCESSING_MARKER: &str = "proc";

/// Substring that marks an OPM (Kaptah/Hedscan export) file even without an `opm` token.
pub const OPM_VENDOR_MARKER: &str = "kaptah";

/// Prefix of the task segment in OPM filenames (`..._file-rest_raw.fif`).
pub const OPM_TASK_PREFIX: &str = "file-";

/// Everything from this literal on is dropped from an OPM task segment.
pub const OPM_MODALITY_MARKER: &str = "opm";

/// Case-insensitive markers of empty-room recordings.
pub const NOISE_MARKERS: [&str; 2] = ["empty", "noise"];

// ── Datatypes ─────────────────────────────────────────────────────────────

/// Modality tokens that may appear anywhere in a filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Datatype {
    Meg,
    Raw,
    Opm,
    Eeg,
    Behav,
}

impl Datatype {
    pub const ALL: [Datatype; 5] = [Self::Meg, Self::Raw, Self::Opm, Self::Eeg, Self::Behav];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Meg => "meg",
            Self::Raw => "raw",
            Self::Opm => "opm",
            Self::Eeg => "eeg",
            Self::Behav => "behav",
        }
    }

    /// Exact, case-insensitive match of a whole token.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(token))
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Processing steps ──────────────────────────────────────────────────────

/// MaxFilter steps encoded in processed filenames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingStep {
    /// Temporal SSS.
    Tsss,
    /// Spatial-only SSS.
    Sss,
    /// tSSS subspace correlation limit in percent (`corr98`).
    Corr(u32),
    /// Downsampled.
    Ds,
    /// Movement compensated.
    Mc,
    /// Transformed to the average head position.
    AvgHead,
}

impl ProcessingStep {
    /// Case-sensitive match of a whole token, e.g. `tsss`, `corr98`, `avgHead`.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "tsss" => Some(Self::Tsss),
            "sss" => Some(Self::Sss),
            "ds" => Some(Self::Ds),
            "mc" => Some(Self::Mc),
            "avgHead" => Some(Self::AvgHead),
            t => {
                let digits = t.strip_prefix("corr")?;
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                digits.parse().ok().map(Self::Corr)
            }
        }
    }

    /// Label used in BIDS `proc-` entities and conversion tables.
    pub fn label(self) -> String {
        match self {
            Self::Tsss => "tsss".into(),
            Self::Sss => "sss".into(),
            Self::Corr(pct) => format!("corr{pct}"),
            Self::Ds => "ds".into(),
            Self::Mc => "mc".into(),
            Self::AvgHead => "avgHead".into(),
        }
    }

    /// `true` when `self` is a finer variant of `other` and replaces it.
    pub fn supersedes(self, other: Self) -> bool {
        matches!((self, other), (Self::Tsss, Self::Sss))
    }
}

impl fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

// ── Descriptions ──────────────────────────────────────────────────────────

/// Tokens marking derived head-position artifacts rather than sensor data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Description {
    Trans,
    Headpos,
}

impl Description {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trans => "trans",
            Self::Headpos => "headpos",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        [Self::Trans, Self::Headpos]
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(token))
    }
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Noise tasks ───────────────────────────────────────────────────────────

/// Normalised empty-room task names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseTask {
    Noise,
    NoiseBefore,
    NoiseAfter,
}

impl NoiseTask {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Noise => "Noise",
            Self::NoiseBefore => "NoiseBefore",
            Self::NoiseAfter => "NoiseAfter",
        }
    }

    /// Classify free text.  `None` unless it contains a noise marker; then
    /// whichever of `before`/`after` appears first picks the variant.
    pub fn classify(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        if !NOISE_MARKERS.iter().any(|m| lower.contains(m)) {
            return None;
        }
        match (lower.find("before"), lower.find("after")) {
            (Some(b), Some(a)) if a < b => Some(Self::NoiseAfter),
            (Some(_), _) => Some(Self::NoiseBefore),
            (None, Some(_)) => Some(Self::NoiseAfter),
            (None, None) => Some(Self::Noise),
        }
    }
}

/// `true` when a task label names an empty-room recording.
pub fn is_noise_task(task: &str) -> bool {
    NoiseTask::classify(task).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_tokens() {
        assert_eq!(ProcessingStep::parse("tsss"), Some(ProcessingStep::Tsss));
        assert_eq!(ProcessingStep::parse("corr98"), Some(ProcessingStep::Corr(98)));
        assert_eq!(ProcessingStep::parse("corr"), None);
        assert_eq!(ProcessingStep::parse("corrx"), None);
        assert_eq!(ProcessingStep::parse("avghead"), None);
        assert_eq!(ProcessingStep::Corr(90).label(), "corr90");
        assert!(ProcessingStep::Tsss.supersedes(ProcessingStep::Sss));
        assert!(!ProcessingStep::Sss.supersedes(ProcessingStep::Tsss));
    }

    #[test]
    fn datatype_tokens_ignore_case() {
        assert_eq!(Datatype::from_token("MEG"), Some(Datatype::Meg));
        assert_eq!(Datatype::from_token("Raw"), Some(Datatype::Raw));
        assert_eq!(Datatype::from_token("rawdata"), None);
    }

    #[test]
    fn noise_classification() {
        assert_eq!(NoiseTask::classify("EmptyroomBefore"), Some(NoiseTask::NoiseBefore));
        assert_eq!(NoiseTask::classify("noise_after"), Some(NoiseTask::NoiseAfter));
        assert_eq!(NoiseTask::classify("Empty"), Some(NoiseTask::Noise));
        assert_eq!(NoiseTask::classify("afternoon"), None);
        assert!(is_noise_task("NoiseAfter"));
        assert!(!is_noise_task("Rest"));
    }
}
