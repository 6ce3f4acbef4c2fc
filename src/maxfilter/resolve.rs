//! Per-task parameter resolution.
//!
//! Every setting is turned into a [`Resolution`] by its own function of the
//! configuration and the task.  The noise and SSS-only overrides run after
//! all of them.
use std::path::{Path, PathBuf};

use crate::config::MaxFilterSettings;
use crate::error::ConfigError;
use crate::headpos::task_transform_paths;

/// One setting rendered for the native MaxFilter CLI, the alternate
/// (MNE-style) CLI and the BIDS processing label.  All three are empty when
/// the setting is off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub native:    String,
    pub alternate: String,
    pub label:     String,
}

impl Resolution {
    fn new(native: impl Into<String>, alternate: impl Into<String>, label: impl Into<String>) -> Self {
        Self { native: native.into(), alternate: alternate.into(), label: label.into() }
    }

    pub fn off() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        !self.native.is_empty()
    }
}

/// `7` rather than `7.0`; fractions are kept as written.
pub(crate) fn fmt_num(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// The fully resolved parameters of one (subject, session, task).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSet {
    pub subject:     String,
    pub session:     String,
    pub task:        String,
    pub session_dir: PathBuf,
    pub trans_file:  PathBuf,
    pub trans:       Resolution,
    pub cal:         Resolution,
    pub ctc:         Resolution,
    pub mc:          Resolution,
    pub tsss:        Resolution,
    pub ds:          Resolution,
    pub corr:        Resolution,
    pub linefreq:    Resolution,
    pub autobad:     Resolution,
    pub badlimit:    Resolution,
    pub bad:         Resolution,
    /// `-force` or empty.
    pub force:       String,
}

impl ParameterSet {
    /// BIDS `proc` label: `tsss[+corrNN]` or `sss`, then `+mc`, then `+avgHead`.
    pub fn label(&self) -> String {
        let mut parts = Vec::new();
        if self.tsss.is_active() {
            parts.push(self.tsss.label.clone());
            if self.corr.is_active() {
                parts.push(self.corr.label.clone());
            }
        } else {
            parts.push("sss".to_string());
        }
        if self.mc.is_active() {
            parts.push(self.mc.label.clone());
        }
        if self.wants_transform() {
            parts.push(self.trans.label.clone());
        }
        parts.join("+")
    }

    /// A continuous head transformation is applied to this task.
    pub fn wants_transform(&self) -> bool {
        self.trans.is_active()
    }

    /// Native flags in command order: cal ctc trans tsss ds corr mc autobad
    /// badlimit bad linefreq force.
    pub fn native_flags(&self) -> Vec<&str> {
        [
            &self.cal, &self.ctc, &self.trans, &self.tsss, &self.ds, &self.corr, &self.mc,
            &self.autobad, &self.badlimit, &self.bad, &self.linefreq,
        ]
        .into_iter()
        .map(|r| r.native.as_str())
        .chain(std::iter::once(self.force.as_str()))
        .filter(|s| !s.is_empty())
        .collect()
    }
}

// ── Independent resolutions ───────────────────────────────────────────────

pub fn resolve_trans(settings: &MaxFilterSettings, task: &str, trans_file: &Path) -> Resolution {
    let std = &settings.standard;
    if std.trans_option.is_continuous() && std.trans_conditions.iter().any(|t| t == task) {
        let f = trans_file.display();
        Resolution::new(format!("-trans {f}"), format!("--trans={f}"), "avgHead")
    } else {
        Resolution::off()
    }
}

fn reference(key: &str, path: &str, native: &str, alternate: &str) -> Result<Resolution, ConfigError> {
    let path = path.trim();
    if path.is_empty() {
        return Err(ConfigError::MissingReference { key: key.into() });
    }
    Ok(Resolution::new(format!("{native} {path}"), format!("{alternate}={path}"), key))
}

pub fn resolve_cal(settings: &MaxFilterSettings) -> Result<Resolution, ConfigError> {
    reference("cal", &settings.advanced.cal, "-cal", "--calibration")
}

pub fn resolve_ctc(settings: &MaxFilterSettings) -> Result<Resolution, ConfigError> {
    reference("ctc", &settings.advanced.ctc, "-ctc", "--cross_talk")
}

pub fn resolve_mc(settings: &MaxFilterSettings) -> Result<Resolution, ConfigError> {
    Ok(if settings.standard.movecomp_default.is_on("movecomp_default")? {
        Resolution::new("-movecomp", "--movecomp", "mc")
    } else {
        Resolution::off()
    })
}

pub fn resolve_tsss(settings: &MaxFilterSettings) -> Result<Resolution, ConfigError> {
    Ok(if settings.standard.tsss_default.is_on("tsss_default")? {
        Resolution::new("-st", "--st", "tsss")
    } else {
        Resolution::off()
    })
}

pub fn resolve_ds(settings: &MaxFilterSettings) -> Result<Resolution, ConfigError> {
    let adv = &settings.advanced;
    if !adv.downsample.is_on("downsample")? {
        return Ok(Resolution::off());
    }
    let factor = adv.downsample_factor;
    if factor.fract() != 0.0 || factor <= 1.0 {
        return Err(ConfigError::InvalidValue {
            key: "downsample_factor".into(),
            value: fmt_num(factor),
            reason: "must be an integer greater than 1".into(),
        });
    }
    let n = fmt_num(factor);
    Ok(Resolution::new(format!("-ds {n}"), "", format!("dsfactor-{n}")))
}

pub fn resolve_corr(settings: &MaxFilterSettings) -> Result<Resolution, ConfigError> {
    let Some(c) = settings.standard.correlation else {
        return Ok(Resolution::off());
    };
    if !(c > 0.0 && c <= 1.0) {
        return Err(ConfigError::InvalidValue {
            key: "correlation".into(),
            value: fmt_num(c),
            reason: "must be between 0 and 1".into(),
        });
    }
    let v = fmt_num(c);
    Ok(Resolution::new(
        format!("-corr {v}"),
        format!("--corr={v}"),
        format!("corr{}", (c * 100.0).round() as i64),
    ))
}

pub fn resolve_linefreq(settings: &MaxFilterSettings) -> Result<Resolution, ConfigError> {
    let adv = &settings.advanced;
    Ok(if adv.apply_linefreq.is_on("apply_linefreq")? {
        let hz = fmt_num(adv.linefreq_hz);
        Resolution::new(format!("-linefreq {hz}"), format!("--linefreq {hz}"), format!("linefreq-{hz}"))
    } else {
        Resolution::off()
    })
}

pub fn resolve_autobad(settings: &MaxFilterSettings) -> Result<Resolution, ConfigError> {
    let std = &settings.standard;
    Ok(if std.autobad.is_on("autobad")? {
        Resolution::new("-autobad on", format!("--autobad={}", fmt_num(std.badlimit)), "autobad")
    } else {
        Resolution::new("-autobad off", "", "")
    })
}

pub fn resolve_badlimit(settings: &MaxFilterSettings) -> Result<Resolution, ConfigError> {
    let std = &settings.standard;
    Ok(if std.autobad.is_on("autobad")? {
        Resolution::new(format!("-badlimit {}", fmt_num(std.badlimit)), "", "")
    } else {
        Resolution::off()
    })
}

pub fn resolve_bad(settings: &MaxFilterSettings) -> Resolution {
    let bad = &settings.standard.bad_channels;
    if bad.is_empty() {
        return Resolution::off();
    }
    let list = bad.join(" ");
    Resolution::new(format!("-bad {list}"), format!("--bad {list}"), "bad")
}

pub fn resolve_force(settings: &MaxFilterSettings) -> Result<String, ConfigError> {
    Ok(if settings.advanced.force.is_on("force")? { "-force".into() } else { String::new() })
}

// ── Overrides ─────────────────────────────────────────────────────────────

/// Empty-room recordings: the task mentions noise or empty, or is listed
/// in `empty_room_files`.
pub fn is_noise_task(settings: &MaxFilterSettings, task: &str) -> bool {
    let lower = task.to_lowercase();
    lower.contains("noise") || lower.contains("empty") || settings.standard.empty_room_files.iter().any(|t| t == task)
}

pub fn is_sss_only_task(settings: &MaxFilterSettings, task: &str) -> bool {
    settings.standard.sss_files.iter().any(|t| t == task)
}

/// Resolve every parameter of `task` in the session directory
/// `<data root>/<subject>/<session>/meg`.
pub fn resolve(
    settings: &MaxFilterSettings,
    subject: &str,
    session: &str,
    task: &str,
) -> Result<ParameterSet, ConfigError> {
    let session_dir = settings.data_root().join(subject).join(session).join("meg");
    let (_, trans_file) = task_transform_paths(&session_dir, &settings.advanced.trans_folder, task);

    let mut set = ParameterSet {
        subject: subject.into(),
        session: session.into(),
        task: task.into(),
        trans: resolve_trans(settings, task, &trans_file),
        cal: resolve_cal(settings)?,
        ctc: resolve_ctc(settings)?,
        mc: resolve_mc(settings)?,
        tsss: resolve_tsss(settings)?,
        ds: resolve_ds(settings)?,
        corr: resolve_corr(settings)?,
        linefreq: resolve_linefreq(settings)?,
        autobad: resolve_autobad(settings)?,
        badlimit: resolve_badlimit(settings)?,
        bad: resolve_bad(settings),
        force: resolve_force(settings)?,
        session_dir,
        trans_file,
    };

    if is_noise_task(settings, task) {
        set.mc = Resolution::off();
        set.corr = Resolution::off();
        set.tsss = Resolution::off();
    }
    if is_sss_only_task(settings, task) {
        set.tsss = Resolution::off();
        set.corr = Resolution::off();
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Switch, TransOption};

    fn settings() -> MaxFilterSettings {
        let mut s = MaxFilterSettings::default();
        s.standard.project_name = "proj".into();
        s.standard.data_path = "/data".into();
        s.standard.trans_conditions = vec!["rest".into()];
        s.standard.empty_room_files = vec!["empty_room_before.fif".into()];
        s.standard.sss_files = vec!["phantom".into()];
        s
    }

    #[test]
    fn defaults_resolve_to_tsss_mc() {
        let p = resolve(&settings(), "NatMEG_0123", "231101", "oddball").unwrap();
        assert_eq!(p.label(), "tsss+corr98+mc");
        assert_eq!(p.corr.native, "-corr 0.98");
        assert_eq!(p.autobad.native, "-autobad on");
        assert_eq!(p.autobad.alternate, "--autobad=7");
        assert_eq!(p.badlimit.native, "-badlimit 7");
        assert!(!p.wants_transform());
        assert_eq!(p.session_dir, PathBuf::from("/data/proj/NatMEG_0123/231101/meg"));
    }

    #[test]
    fn continuous_trans_adds_avg_head() {
        let p = resolve(&settings(), "NatMEG_0123", "231101", "rest").unwrap();
        assert_eq!(p.trans.native, "-trans /data/proj/NatMEG_0123/231101/meg/headtrans/rest_trans.fif");
        assert_eq!(p.label(), "tsss+corr98+mc+avgHead");

        let mut s = settings();
        s.standard.trans_option = TransOption::Initial;
        assert!(!resolve(&s, "NatMEG_0123", "231101", "rest").unwrap().wants_transform());
    }

    #[test]
    fn noise_task_clears_mc_and_corr() {
        for task in ["noisebefore", "Empty_room", "empty_room_before.fif"] {
            let p = resolve(&settings(), "s", "1", task).unwrap();
            assert!(!p.mc.is_active(), "{task}");
            assert!(!p.corr.is_active(), "{task}");
            assert_eq!(p.label(), "sss");
        }
    }

    #[test]
    fn sss_only_task() {
        let p = resolve(&settings(), "s", "1", "phantom").unwrap();
        assert!(!p.tsss.is_active());
        assert_eq!(p.label(), "sss+mc");
        assert!(!p.native_flags().contains(&"-st"));
    }

    #[test]
    fn invalid_switch_names_the_key() {
        let mut s = settings();
        s.standard.movecomp_default = Switch("maybe".into());
        let err = resolve(&s, "s", "1", "rest").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSwitch { ref key, .. } if key == "movecomp_default"));
    }

    #[test]
    fn missing_calibration_is_fatal() {
        let mut s = settings();
        s.advanced.cal = String::new();
        assert!(matches!(resolve(&s, "s", "1", "rest"), Err(ConfigError::MissingReference { .. })));
    }

    #[test]
    fn downsample_and_correlation_bounds() {
        let mut s = settings();
        s.advanced.downsample = Switch::on();
        s.advanced.downsample_factor = 1.0;
        assert!(resolve_ds(&s).is_err());
        s.advanced.downsample_factor = 4.0;
        assert_eq!(resolve_ds(&s).unwrap().label, "dsfactor-4");

        s.standard.correlation = Some(1.5);
        assert!(resolve_corr(&s).is_err());
        s.standard.correlation = None;
        assert!(!resolve_corr(&s).unwrap().is_active());
    }

    #[test]
    fn flag_order() {
        let mut s = settings();
        s.standard.bad_channels = vec!["MEG0111".into(), "MEG2443".into()];
        s.advanced.force = Switch::on();
        s.advanced.apply_linefreq = Switch::on();
        let p = resolve(&s, "s", "1", "oddball").unwrap();
        assert_eq!(
            p.native_flags(),
            vec![
                "-cal /neuro/databases/sss/sss_cal.dat",
                "-ctc /neuro/databases/ctc/ct_sparse.fif",
                "-st",
                "-corr 0.98",
                "-movecomp",
                "-autobad on",
                "-badlimit 7",
                "-bad MEG0111 MEG2443",
                "-linefreq 50",
                "-force",
            ]
        );
    }
}
