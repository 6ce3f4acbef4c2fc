//! Sidecar enrichment and post-write steps.
//!
//! After a recording lands in the BIDS tree its JSON sidecar is extended
//! with facts the structured writer does not know about: the institution,
//! dewar orientation, empty-room associations, head-coil frequencies,
//! MaxFilter history and head movement.  EEG recordings are mirrored into
//! the sibling `meg` directory and OPM channel tables pick up the columns
//! of the vendor export.
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::bids::BidsPath;
use crate::builder::Acquisition;
use crate::entity::is_noise_task;
use crate::fiff::{MaxFilterHistory, RecordingHeader};
use crate::headpos::{max_translation_mm, read_pos};
use crate::io::RecordingInspector;

pub const INSTITUTION_NAME: &str = "Karolinska Institutet";
pub const INSTITUTION_DEPARTMENT: &str = "Department of Clinical Neuroscience (CNS)";
pub const INSTITUTION_ADDRESS: &str = "Nobels vag 9, 171 77, Stockholm, Sweden";
pub const OPM_MANUFACTURER: &str = "FieldLine";

/// Directory the head-position estimator writes into next to the raw data.
pub const HEADPOS_DIR: &str = "headtrans";

// ── JSON merge ────────────────────────────────────────────────────────────

/// Merge `entries` into the JSON object at `path`, creating the file when
/// it does not exist.  Existing keys are overwritten, others kept.
pub fn update_sidecar_json(path: &Path, entries: &Map<String, Value>) -> Result<()> {
    let mut object = if path.exists() {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        match serde_json::from_str::<Value>(&text).with_context(|| format!("parsing {}", path.display()))? {
            Value::Object(map) => map,
            _ => bail!("{} does not hold a JSON object", path.display()),
        }
    } else {
        Map::new()
    };
    for (k, v) in entries {
        object.insert(k.clone(), v.clone());
    }
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let text = serde_json::to_string_pretty(&Value::Object(object))?;
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

// ── Derived fields ────────────────────────────────────────────────────────

/// `upright (68 degrees)` for a tilted gantry, `supine (0 degrees)` otherwise.
pub fn dewar_position(gantry_angle: f64) -> String {
    let degrees = gantry_angle.trunc() as i64;
    if gantry_angle > 0.0 {
        format!("upright ({degrees} degrees)")
    } else {
        format!("supine ({degrees} degrees)")
    }
}

/// `SoftwareFilters.MaxFilter` block, or `None` when nothing was recorded.
pub fn software_filters(history: &MaxFilterHistory) -> Option<Value> {
    let mut maxfilter = Map::new();
    if let Some(sss) = &history.sss {
        let mut block = Map::new();
        if let Some(n) = sss.nfree {
            block.insert("NumberOfComponents".into(), json!(n));
        }
        if let Some(n) = sss.in_order {
            block.insert("InternalOrder".into(), json!(n));
        }
        if let Some(n) = sss.out_order {
            block.insert("ExternalOrder".into(), json!(n));
        }
        if !block.is_empty() {
            maxfilter.insert("SSS".into(), Value::Object(block));
        }
    }
    if let Some(tsss) = &history.tsss {
        let mut block = Map::new();
        if let Some(c) = tsss.subspace_corr {
            block.insert("SubspaceCorrelationLimit".into(), json!(c));
        }
        if let Some(b) = tsss.buffer_len {
            block.insert("BufferLength".into(), json!(b));
        }
        if !block.is_empty() {
            maxfilter.insert("tSSS".into(), Value::Object(block));
        }
    }
    if maxfilter.is_empty() {
        None
    } else {
        Some(json!({ "MaxFilter": maxfilter }))
    }
}

/// Basenames of the empty-room recordings next to `target`: `.fif` files of
/// the same subject, session and acquisition whose task is a noise task.
/// Only the first part of a split recording is listed.
pub fn associated_empty_rooms(target: &BidsPath) -> Vec<String> {
    let Ok(entries) = fs::read_dir(target.directory()) else {
        return Vec::new();
    };
    let names: BTreeSet<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter_map(|p| BidsPath::parse(&p))
        .filter(|p| {
            p.extension == ".fif"
                && p.subject == target.subject
                && p.session == target.session
                && p.acquisition == target.acquisition
                && (p.split.is_empty() || p.split == "01")
                && is_noise_task(&p.task)
        })
        .map(|p| p.basename())
        .collect();
    names.into_iter().collect()
}

/// Head-position file of a recording, searched next to the source data
/// first and in the BIDS tree last.
pub fn find_headpos(source: &Path, target: &BidsPath) -> Option<PathBuf> {
    let name = source.file_name()?.to_string_lossy();
    let stem = name.split('.').next().unwrap_or_default();
    let dir = source.parent().unwrap_or_else(|| Path::new(""));
    let bids = target
        .clone()
        .processing("")
        .split("")
        .description("headpos")
        .suffix("meg")
        .extension(".pos")
        .fpath();
    [
        dir.join(HEADPOS_DIR).join(format!("{stem}_headpos.pos")),
        dir.join(format!("{stem}_headpos.pos")),
        bids,
    ]
    .into_iter()
    .find(|p| p.is_file())
}

// ── Enricher ──────────────────────────────────────────────────────────────

pub struct SidecarEnricher<'a> {
    inspector: &'a dyn RecordingInspector,
}

impl<'a> SidecarEnricher<'a> {
    pub fn new(inspector: &'a dyn RecordingInspector) -> Self {
        Self { inspector }
    }

    /// Header of the written file, falling back to the source recording.
    fn header(&self, source: &Path, target: &BidsPath) -> Option<RecordingHeader> {
        let written = if target.fpath().is_file() { target.fpath() } else { target.first_split() };
        [written, source.to_path_buf()]
            .iter()
            .filter(|p| p.is_file())
            .find_map(|p| match self.inspector.inspect(p) {
                Ok(h) => Some(h),
                Err(e) => {
                    debug!("no header from {}: {e:#}", p.display());
                    None
                }
            })
    }

    /// Entries to merge into the sidecar of `target`.
    pub fn entries(&self, source: &Path, target: &BidsPath) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert("InstitutionName".into(), json!(INSTITUTION_NAME));
        out.insert("InstitutionDepartmentName".into(), json!(INSTITUTION_DEPARTMENT));
        out.insert("InstitutionAddress".into(), json!(INSTITUTION_ADDRESS));

        if target.datatype != "meg" {
            return out;
        }
        if target.acquisition == Acquisition::Hedscan.as_str() {
            out.insert("Manufacturer".into(), json!(OPM_MANUFACTURER));
            return out;
        }
        if target.acquisition != Acquisition::Triux.as_str() {
            return out;
        }

        if let Some(header) = self.header(source, target) {
            if let Some(angle) = header.gantry_angle {
                out.insert("DewarPosition".into(), json!(dewar_position(angle)));
            }
            if !header.hpi_freqs.is_empty() {
                out.insert("HeadCoilFrequency".into(), json!(header.hpi_freqs));
            }
            if let Some(filters) = header.maxfilter.as_ref().and_then(software_filters) {
                out.insert("SoftwareFilters".into(), filters);
            }
        }

        if !is_noise_task(&target.task) {
            out.insert("AssociatedEmptyRoom".into(), json!(associated_empty_rooms(target)));
            let movement = find_headpos(source, target)
                .and_then(|p| read_pos(&p).map_err(|e| debug!("{e:#}")).ok())
                .and_then(|pos| max_translation_mm(&pos));
            if let Some(mm) = movement {
                out.insert("MaxMovement".into(), json!((mm * 100.0).round() / 100.0));
            }
        }
        out
    }

    /// Update the sidecar of `target` and return its path.
    pub fn enrich(&self, source: &Path, target: &BidsPath) -> Result<PathBuf> {
        let path = target.sidecar();
        update_sidecar_json(&path, &self.entries(source, target))?;
        debug!("{} updated", path.display());
        Ok(path)
    }
}

// ── EEG mirror ────────────────────────────────────────────────────────────

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(dir) = to.parent() {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    fs::copy(from, to).with_context(|| format!("copying {} to {}", from.display(), to.display()))?;
    Ok(())
}

/// Mirror an EEG recording, its sidecar and the session's CapTrak files into
/// the sibling `meg` directory.  Existing CapTrak files are left alone.
pub fn copy_eeg_to_meg(target: &BidsPath) -> Result<Vec<PathBuf>> {
    let mut meg = target.clone();
    meg.datatype = "meg".into();
    let mut copied = Vec::new();

    for (from, to) in [(target.fpath(), meg.fpath()), (target.sidecar(), meg.sidecar())] {
        if from.is_file() {
            copy_file(&from, &to)?;
            copied.push(to);
        }
    }

    let eeg_dir = target.directory();
    let meg_dir = meg.directory();
    let entries = fs::read_dir(&eeg_dir).with_context(|| format!("listing {}", eeg_dir.display()))?;
    let mut captrak: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .map(|n| n.to_string_lossy().contains("space-CapTrak"))
                    .unwrap_or(false)
        })
        .collect();
    captrak.sort();
    for from in captrak {
        let Some(name) = from.file_name() else { continue };
        let to = meg_dir.join(name);
        if !to.exists() {
            copy_file(&from, &to)?;
            copied.push(to);
        }
    }
    info!("{} mirrored into {}", target.basename(), meg_dir.display());
    Ok(copied)
}

// ── OPM channel table ─────────────────────────────────────────────────────

/// Channel table exported next to an OPM recording:
/// `..._raw.fif` → `..._channels.tsv`.
pub fn source_channels_tsv(raw: &Path) -> PathBuf {
    let name = raw.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let stem = name
        .strip_suffix("_raw.fif")
        .or_else(|| name.strip_suffix(".fif"))
        .unwrap_or(&name);
    raw.with_file_name(format!("{stem}_channels.tsv"))
}

struct Tsv {
    headers: Vec<String>,
    rows:    Vec<Vec<String>>,
}

impl Tsv {
    fn read(path: &Path) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path)
            .with_context(|| format!("opening {}", path.display()))?;
        let headers = rdr.headers()?.iter().map(str::to_string).collect();
        let rows = rdr
            .records()
            .map(|r| r.map(|rec| rec.iter().map(str::to_string).collect()))
            .collect::<std::result::Result<_, _>>()
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(Self { headers, rows })
    }

    fn write(&self, path: &Path) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)
            .with_context(|| format!("creating {}", path.display()))?;
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn column(&self, name: &str, path: &Path) -> Result<usize> {
        match self.headers.iter().position(|h| h == name) {
            Some(i) => Ok(i),
            None => bail!("{} has no `{name}` column", path.display()),
        }
    }
}

/// Outer-join the columns of `source_tsv` into `bids_tsv` on `name`.
///
/// Columns the BIDS table lacks are appended; channels only the source
/// knows are added at the end with `n/a` for the BIDS columns.  Returns
/// `false` when the source table is missing or adds nothing.
pub fn merge_channels_tsv(bids_tsv: &Path, source_tsv: &Path) -> Result<bool> {
    if !source_tsv.is_file() {
        return Ok(false);
    }
    let source = Tsv::read(source_tsv)?;
    if !bids_tsv.is_file() {
        copy_file(source_tsv, bids_tsv)?;
        return Ok(true);
    }
    let bids = Tsv::read(bids_tsv)?;
    if bids.headers == source.headers && bids.rows == source.rows {
        return Ok(false);
    }

    let src_name = source.column("name", source_tsv)?;
    let bids_name = bids.column("name", bids_tsv)?;
    let added: Vec<usize> = (0..source.headers.len())
        .filter(|&i| !bids.headers.contains(&source.headers[i]))
        .collect();
    let by_name: HashMap<&str, &Vec<String>> =
        source.rows.iter().map(|r| (r[src_name].as_str(), r)).collect();
    let known: BTreeSet<&str> = bids.rows.iter().map(|r| r[bids_name].as_str()).collect();

    let extra: Vec<&Vec<String>> = source
        .rows
        .iter()
        .filter(|r| !known.contains(r[src_name].as_str()))
        .collect();
    if added.is_empty() && extra.is_empty() {
        return Ok(false);
    }

    let mut headers = bids.headers.clone();
    headers.extend(added.iter().map(|&i| source.headers[i].clone()));

    let mut rows = Vec::with_capacity(bids.rows.len() + extra.len());
    for row in &bids.rows {
        let mut out = row.clone();
        let matched = by_name.get(row[bids_name].as_str());
        out.extend(added.iter().map(|&i| match matched {
            Some(src) => src[i].clone(),
            None => "n/a".to_string(),
        }));
        rows.push(out);
    }
    for src in extra {
        let mut out = vec!["n/a".to_string(); bids.headers.len()];
        out[bids_name] = src[src_name].clone();
        out.extend(added.iter().map(|&i| src[i].clone()));
        rows.push(out);
    }

    Tsv { headers, rows }.write(bids_tsv)?;
    info!("channel parameters of {} added to {}", source_tsv.display(), bids_tsv.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiff::{SssInfo, TsssInfo};

    #[test]
    fn dewar_orientation() {
        assert_eq!(dewar_position(68.0), "upright (68 degrees)");
        assert_eq!(dewar_position(0.0), "supine (0 degrees)");
        assert_eq!(dewar_position(45.7), "upright (45 degrees)");
    }

    #[test]
    fn json_merge_keeps_existing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x_meg.json");
        fs::write(&path, r#"{"TaskName": "Rest", "InstitutionName": "old"}"#).unwrap();
        let mut entries = Map::new();
        entries.insert("InstitutionName".into(), json!(INSTITUTION_NAME));
        update_sidecar_json(&path, &entries).unwrap();

        let v: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(v["TaskName"], "Rest");
        assert_eq!(v["InstitutionName"], INSTITUTION_NAME);
    }

    #[test]
    fn missing_sidecar_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meg/new_meg.json");
        update_sidecar_json(&path, &Map::new()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "{}");
    }

    #[test]
    fn maxfilter_block() {
        let history = MaxFilterHistory {
            sss: Some(SssInfo { in_order: Some(8), out_order: Some(3), nfree: Some(80) }),
            tsss: Some(TsssInfo { subspace_corr: Some(0.98), buffer_len: Some(10.0) }),
        };
        let v = software_filters(&history).unwrap();
        assert_eq!(v["MaxFilter"]["SSS"]["NumberOfComponents"], 80);
        assert_eq!(v["MaxFilter"]["SSS"]["InternalOrder"], 8);
        assert_eq!(v["MaxFilter"]["tSSS"]["BufferLength"], 10.0);
        assert!(software_filters(&MaxFilterHistory::default()).is_none());
    }

    #[test]
    fn source_tsv_name() {
        assert_eq!(
            source_channels_tsv(Path::new("/opm/sub-1/2023_file-rest_raw.fif")),
            PathBuf::from("/opm/sub-1/2023_file-rest_channels.tsv")
        );
    }

    #[test]
    fn channel_columns_outer_join() {
        let dir = tempfile::tempdir().unwrap();
        let bids = dir.path().join("bids_channels.tsv");
        let src = dir.path().join("src_channels.tsv");
        fs::write(&bids, "name\ttype\tunits\nL101\tMEGMAG\tT\nL102\tMEGMAG\tT\n").unwrap();
        fs::write(&src, "name\tsensor\tgain\nL102\tFL-2\t2.7\nL103\tFL-3\t2.7\n").unwrap();

        assert!(merge_channels_tsv(&bids, &src).unwrap());
        let text = fs::read_to_string(&bids).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "name\ttype\tunits\tsensor\tgain");
        assert_eq!(lines[1], "L101\tMEGMAG\tT\tn/a\tn/a");
        assert_eq!(lines[2], "L102\tMEGMAG\tT\tFL-2\t2.7");
        assert_eq!(lines[3], "L103\tn/a\tn/a\tFL-3\t2.7");

        // second merge adds nothing
        assert!(!merge_channels_tsv(&bids, &src).unwrap());
    }

    #[test]
    fn missing_source_table_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!merge_channels_tsv(&dir.path().join("a.tsv"), &dir.path().join("b.tsv")).unwrap());
    }

    #[test]
    fn eeg_mirror_copies_data_sidecar_and_captrak() {
        let dir = tempfile::tempdir().unwrap();
        let target = BidsPath::new(dir.path(), "001", "01", "eeg")
            .task("Rest")
            .acquisition("triux")
            .extension(".fif");
        fs::create_dir_all(target.directory()).unwrap();
        fs::write(target.fpath(), b"data").unwrap();
        fs::write(target.sidecar(), b"{}").unwrap();
        let cap = target.directory().join("sub-001_ses-01_space-CapTrak_electrodes.tsv");
        fs::write(&cap, b"x").unwrap();

        let copied = copy_eeg_to_meg(&target).unwrap();
        assert_eq!(copied.len(), 3);
        let meg_dir = dir.path().join("sub-001/ses-01/meg");
        assert!(meg_dir.join("sub-001_ses-01_task-Rest_acq-triux_eeg.fif").is_file());
        assert!(meg_dir.join("sub-001_ses-01_task-Rest_acq-triux_eeg.json").is_file());
        assert!(meg_dir.join("sub-001_ses-01_space-CapTrak_electrodes.tsv").is_file());

        // CapTrak files are copied once
        assert_eq!(copy_eeg_to_meg(&target).unwrap().len(), 2);
    }

    #[test]
    fn headpos_search_order() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("raw/rest_raw.fif");
        fs::create_dir_all(dir.path().join("raw/headtrans")).unwrap();
        let target = BidsPath::new(dir.path().join("bids"), "001", "01", "meg")
            .task("Rest")
            .acquisition("triux")
            .extension(".fif");
        assert_eq!(find_headpos(&source, &target), None);

        let beside = dir.path().join("raw/rest_raw_headpos.pos");
        fs::write(&beside, b"").unwrap();
        assert_eq!(find_headpos(&source, &target), Some(beside));

        let nested = dir.path().join("raw/headtrans/rest_raw_headpos.pos");
        fs::write(&nested, b"").unwrap();
        assert_eq!(find_headpos(&source, &target), Some(nested));
    }
}
