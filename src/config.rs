//! Configuration records.
//!
//! Two JSON records drive the crate:
//!
//! * [`BidsifyConfig`]: source trees, BIDS root, reference files and the
//!   optional subject/session remapping used by the conversion table.
//! * [`MaxFilterSettings`]: the `standard_settings` / `advanced_settings`
//!   record consumed by the parameter resolution engine.
//!
//! Both are written by the lab's form editors, which save every value as a
//! string and turn `", "`-separated entries into lists.  The deserialisers
//! here accept either shape.
//!
//! ```
//! use megbids::config::BidsifyConfig;
//!
//! let cfg: BidsifyConfig = serde_json::from_str(r#"{
//!     "squidMEG": "/neuro/sinuhe/project",
//!     "opmMEG": "()",
//!     "BIDS": "/neuro/bids/project",
//!     "Overwrite": "off"
//! }"#).unwrap();
//! assert!(cfg.opm_root().is_none());
//! assert!(!cfg.overwrite().unwrap());
//! ```
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;

// ── On/off switch ─────────────────────────────────────────────────────────

/// An `on`/`off` value, kept verbatim until it is used.
///
/// Validation is deferred to [`Switch::is_on`] so that a faulty value aborts
/// at the point where the governing setting is resolved, naming the key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Switch(pub String);

impl Switch {
    pub fn on() -> Self {
        Self("on".into())
    }

    pub fn off() -> Self {
        Self("off".into())
    }

    /// `Ok(true)` for `on`, `Ok(false)` for `off`, anything else is fatal.
    pub fn is_on(&self, key: &str) -> Result<bool, ConfigError> {
        match self.0.trim() {
            "on" => Ok(true),
            "off" => Ok(false),
            other => Err(ConfigError::InvalidSwitch {
                key: key.to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl Default for Switch {
    fn default() -> Self {
        Self::off()
    }
}

// ── Lenient value shapes ──────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum StrOrList {
    List(Vec<serde_json::Value>),
    Str(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Num(f64),
    Str(String),
}

fn value_to_string(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

/// A JSON list, or a single string that is split on `", "`. Blank entries are dropped.
fn list_of_strings<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let items: Vec<String> = match StrOrList::deserialize(d)? {
        StrOrList::List(vs) => vs.into_iter().map(value_to_string).collect(),
        StrOrList::Str(s) => s.split(", ").map(str::to_string).collect(),
    };
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// First entry of a list, or the string itself.
fn first_of_list<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match StrOrList::deserialize(d)? {
        StrOrList::List(vs) => vs.into_iter().next().map(value_to_string).unwrap_or_default(),
        StrOrList::Str(s) => s,
    })
}

fn number<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    match NumOrStr::deserialize(d)? {
        NumOrStr::Num(n) => Ok(n),
        NumOrStr::Str(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("'{s}' is not a number"))),
    }
}

/// A number, a numeric string, or `""` / `null` for "not set".
fn optional_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    match Option::<NumOrStr>::deserialize(d)? {
        None => Ok(None),
        Some(NumOrStr::Num(n)) => Ok(Some(n)),
        Some(NumOrStr::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(NumOrStr::Str(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("'{s}' is not a number"))),
    }
}

/// Read and parse one JSON configuration file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// The editors store an unset directory as `""` or `"()"`.
fn configured_dir(value: &str) -> Option<PathBuf> {
    let v = value.trim();
    if v.is_empty() || v == "()" {
        None
    } else {
        Some(PathBuf::from(v))
    }
}

// ── Conversion record ─────────────────────────────────────────────────────

/// Configuration of one BIDS conversion project.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BidsifyConfig {
    /// Root of the conventional (TRIUX) tree: `NatMEG_<id>/<session>/meg/*.fif`.
    #[serde(rename = "squidMEG")]
    pub squid_meg: String,

    /// Root of the OPM (Hedscan) tree: `sub-<id>/*.fif`.
    #[serde(rename = "opmMEG")]
    pub opm_meg: String,

    /// Output BIDS root.  Conversion tables and `log.tsv` live here too.
    #[serde(rename = "BIDS")]
    pub bids: String,

    /// Fine-calibration file copied next to every MEG session.
    #[serde(rename = "Calibration")]
    pub calibration: String,

    /// Cross-talk compensation file copied next to every MEG session.
    #[serde(rename = "Crosstalk")]
    pub crosstalk: String,

    /// Optional CSV remapping old subject/session ids to new ones.
    #[serde(rename = "Participants mapping file")]
    pub participants_mapping: String,

    #[serde(rename = "Original subjID name")]
    pub old_subject_column: String,

    #[serde(rename = "New subjID name")]
    pub new_subject_column: String,

    #[serde(rename = "Original session name")]
    pub old_session_column: String,

    #[serde(rename = "New session name")]
    pub new_session_column: String,

    /// Re-convert rows that are already marked as done.
    #[serde(rename = "Overwrite")]
    pub overwrite: Switch,
}

impl Default for BidsifyConfig {
    fn default() -> Self {
        Self {
            squid_meg: "/neuro/sinuhe/".into(),
            opm_meg: String::new(),
            bids: String::new(),
            calibration: "/neuro/databases/sss/sss_cal.dat".into(),
            crosstalk: "/neuro/databases/ctc/ct_sparse.fif".into(),
            participants_mapping: String::new(),
            old_subject_column: String::new(),
            new_subject_column: String::new(),
            old_session_column: String::new(),
            new_session_column: String::new(),
            overwrite: Switch::off(),
        }
    }
}

impl BidsifyConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_json(path)
    }

    pub fn squid_root(&self) -> Option<PathBuf> {
        configured_dir(&self.squid_meg)
    }

    pub fn opm_root(&self) -> Option<PathBuf> {
        configured_dir(&self.opm_meg)
    }

    /// The BIDS root is mandatory.
    pub fn bids_root(&self) -> Result<PathBuf, ConfigError> {
        configured_dir(&self.bids).ok_or_else(|| ConfigError::MissingReference { key: "BIDS".into() })
    }

    pub fn mapping_file(&self) -> Option<PathBuf> {
        configured_dir(&self.participants_mapping)
    }

    pub fn overwrite(&self) -> Result<bool, ConfigError> {
        self.overwrite.is_on("Overwrite")
    }
}

// ── MaxFilter record ──────────────────────────────────────────────────────

/// How the head transformation is obtained for tasks in `trans_conditions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TransOption {
    #[serde(rename = "mne_continous")]
    MneContinuous,
    #[serde(rename = "continous")]
    Continuous,
    #[serde(rename = "initial")]
    Initial,
}

impl TransOption {
    /// Both continuous variants transform to the average head position.
    pub fn is_continuous(self) -> bool {
        matches!(self, Self::MneContinuous | Self::Continuous)
    }
}

/// The `standard_settings` half of a MaxFilter record.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StandardSettings {
    pub project_name: String,

    /// Tasks that get a continuous head transformation (`-trans`).
    #[serde(deserialize_with = "list_of_strings")]
    pub trans_conditions: Vec<String>,

    pub trans_option: TransOption,

    /// Averaging method for the head position.  Only `mean` is produced.
    pub trans_type: String,

    /// Concatenate multiple runs of one task before filtering.
    pub merge_runs: Switch,

    /// Empty-room recordings: never movement compensated.
    #[serde(deserialize_with = "list_of_strings")]
    pub empty_room_files: Vec<String>,

    /// Tasks that are filtered with plain SSS instead of tSSS.
    #[serde(deserialize_with = "list_of_strings")]
    pub sss_files: Vec<String>,

    pub autobad: Switch,

    #[serde(deserialize_with = "number")]
    pub badlimit: f64,

    #[serde(deserialize_with = "list_of_strings")]
    pub bad_channels: Vec<String>,

    /// Temporal extension of SSS.
    pub tsss_default: Switch,

    /// tSSS subspace correlation limit in `(0, 1]`, unset for the MaxFilter default.
    #[serde(deserialize_with = "optional_number")]
    pub correlation: Option<f64>,

    /// Movement compensation.
    pub movecomp_default: Switch,

    /// Directory holding `<project_name>/`.
    pub data_path: String,
}

impl Default for StandardSettings {
    fn default() -> Self {
        Self {
            project_name: String::new(),
            trans_conditions: vec!["task1".into(), "task2".into()],
            trans_option: TransOption::MneContinuous,
            trans_type: "mean".into(),
            merge_runs: Switch::on(),
            empty_room_files: vec!["empty_room_before.fif".into(), "empty_room_after.fif".into()],
            sss_files: vec!["empty_room_before.fif".into(), "empty_room_after.fif".into()],
            autobad: Switch::on(),
            badlimit: 7.0,
            bad_channels: vec![],
            tsss_default: Switch::on(),
            correlation: Some(0.98),
            movecomp_default: Switch::on(),
            data_path: "neuro/data/sinuhe".into(),
        }
    }
}

/// The `advanced_settings` half of a MaxFilter record.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    /// Passed as `-force`; also forces head-position files to be re-derived.
    pub force: Switch,

    pub downsample: Switch,

    #[serde(deserialize_with = "number")]
    pub downsample_factor: f64,

    pub apply_linefreq: Switch,

    #[serde(rename = "linefreq_Hz", deserialize_with = "number")]
    pub linefreq_hz: f64,

    pub cal: String,

    pub ctc: String,

    pub dst_path: String,

    /// Per-session folder for `<task>_headpos.pos` / `<task>_trans.fif`.
    pub trans_folder: String,

    /// Per-session folder for MaxFilter logs.
    pub log_folder: String,

    /// Path to the MaxFilter executable.
    #[serde(deserialize_with = "first_of_list")]
    pub maxfilter_version: String,

    /// Appended verbatim to every command line.
    #[serde(rename = "MaxFilter_commands")]
    pub maxfilter_commands: String,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            force: Switch::off(),
            downsample: Switch::off(),
            downsample_factor: 4.0,
            apply_linefreq: Switch::off(),
            linefreq_hz: 50.0,
            cal: "/neuro/databases/sss/sss_cal.dat".into(),
            ctc: "/neuro/databases/ctc/ct_sparse.fif".into(),
            dst_path: "NatMEG".into(),
            trans_folder: "headtrans".into(),
            log_folder: "log".into(),
            maxfilter_version: "/neuro/bin/util/mfilter".into(),
            maxfilter_commands: String::new(),
        }
    }
}

/// A complete MaxFilter record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MaxFilterSettings {
    #[serde(rename = "standard_settings", default)]
    pub standard: StandardSettings,
    #[serde(rename = "advanced_settings", default)]
    pub advanced: AdvancedSettings,
}

impl MaxFilterSettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_json(path)
    }

    /// `<data_path>/<project_name>`, the directory holding `NatMEG_*` subjects.
    pub fn data_root(&self) -> PathBuf {
        Path::new(&self.standard.data_path).join(&self.standard.project_name)
    }
}
