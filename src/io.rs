//! Recording collaborators: header inspection and BIDS materialisation.
//!
//! The builder and executor only talk to these traits.  [`FifInspector`]
//! and [`FifBidsWriter`] are the native implementations; tests substitute
//! scripted ones.
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, warn};

use crate::bids::BidsPath;
use crate::fiff::{read_header, ChannelType, RecordingHeader};

// ── Inspection ────────────────────────────────────────────────────────────

/// Reports what a recording contains without reading its samples.
pub trait RecordingInspector {
    fn inspect(&self, path: &Path) -> Result<RecordingHeader>;
}

/// Reads FIF headers from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FifInspector;

impl RecordingInspector for FifInspector {
    fn inspect(&self, path: &Path) -> Result<RecordingHeader> {
        read_header(path)
    }
}

// ── Writing ───────────────────────────────────────────────────────────────

/// How a row's data file reached its BIDS location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The structured writer produced the file and its sidecars.
    Written,
    /// The structured writer failed; the source was copied under the target name.
    DegradedCopy { reason: String },
}

/// Materialises recordings in a BIDS tree.
pub trait RecordingWriter {
    /// Write `source` as `target`, together with its sidecar and channel table.
    fn write_recording(&self, source: &Path, target: &BidsPath) -> Result<()>;

    /// Place a reference artifact (calibration, cross-talk) at `dest`.
    fn write_reference(&self, source: &Path, dest: &Path) -> Result<()>;
}

/// Copies FIF recordings into place and writes their base sidecar and
/// `channels.tsv` from the header.
#[derive(Debug, Clone, Copy, Default)]
pub struct FifBidsWriter;

impl RecordingWriter for FifBidsWriter {
    fn write_recording(&self, source: &Path, target: &BidsPath) -> Result<()> {
        let header = read_header(source)?;
        let dest = target.fpath();
        ensure_parent(&dest)?;
        fs::copy(source, &dest)
            .with_context(|| format!("copying {} to {}", source.display(), dest.display()))?;
        write_base_sidecar(&header, target)?;
        write_channels_tsv(&header, &target.channels())?;
        debug!("wrote {}", dest.display());
        Ok(())
    }

    fn write_reference(&self, source: &Path, dest: &Path) -> Result<()> {
        ensure_parent(dest)?;
        fs::copy(source, dest)
            .with_context(|| format!("copying {} to {}", source.display(), dest.display()))?;
        Ok(())
    }
}

/// Run the structured writer, falling back to a plain copy under the
/// target name when it fails.  Only a failing fallback is an error.
pub fn write_or_copy(writer: &dyn RecordingWriter, source: &Path, target: &BidsPath) -> Result<WriteOutcome> {
    match writer.write_recording(source, target) {
        Ok(()) => Ok(WriteOutcome::Written),
        Err(e) => {
            let reason = format!("{e:#}");
            warn!("structured write of {} failed ({reason}), copying instead", source.display());
            let dest = target.fpath();
            ensure_parent(&dest)?;
            fs::copy(source, &dest)
                .with_context(|| format!("copying {} to {}", source.display(), dest.display()))?;
            Ok(WriteOutcome::DegradedCopy { reason })
        }
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    Ok(())
}

// ── Sidecar and channel table ─────────────────────────────────────────────

fn write_base_sidecar(header: &RecordingHeader, target: &BidsPath) -> Result<()> {
    let count = |t: ChannelType| header.count(t);
    let sidecar = json!({
        "TaskName": target.task,
        "SamplingFrequency": header.sfreq,
        "PowerLineFrequency": header.line_freq.map_or(json!("n/a"), |f| json!(f)),
        "MEGChannelCount": count(ChannelType::Mag) + count(ChannelType::Grad),
        "MEGREFChannelCount": count(ChannelType::RefMeg),
        "EEGChannelCount": count(ChannelType::Eeg),
        "EOGChannelCount": count(ChannelType::Eog),
        "ECGChannelCount": count(ChannelType::Ecg),
        "EMGChannelCount": count(ChannelType::Emg),
        "MiscChannelCount": count(ChannelType::Misc),
        "TriggerChannelCount": count(ChannelType::Stim),
        "RecordingType": "continuous",
    });
    let path = target.sidecar();
    let text = serde_json::to_string_pretty(&sidecar)?;
    fs::write(&path, text).with_context(|| format!("writing {}", path.display()))
}

fn write_channels_tsv(header: &RecordingHeader, path: &Path) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    wtr.write_record(["name", "type", "units", "status"])?;
    for ch in &header.channels {
        let ty = ch.channel_type();
        let status = if header.bads.contains(&ch.name) { "bad" } else { "good" };
        wtr.write_record([ch.name.as_str(), ty.bids_type(), ty.bids_unit(), status])?;
    }
    wtr.flush()?;
    Ok(())
}
