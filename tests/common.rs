/// Shared helpers: a synthetic FIF writer and fake collaborators.
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use megbids::fiff::constants::*;
use megbids::fiff::{ChannelInfo, MaxFilterHistory, RecordingHeader};
use megbids::{BidsPath, RecordingInspector, RecordingWriter};

// ── Synthetic FIF files ───────────────────────────────────────────────────

/// Sequential tags with `next = 0`, terminated by `next = -1`.  The file id
/// is followed by a dir pointer of -1, so readers take the scanning path.
#[allow(unused)]
pub struct FifBuilder {
    tags: Vec<(i32, u32, Vec<u8>)>,
}

#[allow(unused)]
impl FifBuilder {
    pub fn new() -> Self {
        let mut b = Self { tags: Vec::new() };
        b.tags.push((FIFF_FILE_ID, FIFFT_ID_STRUCT, vec![0u8; 20]));
        b.tags.push((FIFF_DIR_POINTER, FIFFT_INT, (-1i32).to_be_bytes().to_vec()));
        b
    }

    pub fn start(mut self, block: i32) -> Self {
        self.tags.push((FIFF_BLOCK_START, FIFFT_INT, block.to_be_bytes().to_vec()));
        self
    }

    pub fn end(mut self, block: i32) -> Self {
        self.tags.push((FIFF_BLOCK_END, FIFFT_INT, block.to_be_bytes().to_vec()));
        self
    }

    pub fn int(mut self, kind: i32, v: i32) -> Self {
        self.tags.push((kind, FIFFT_INT, v.to_be_bytes().to_vec()));
        self
    }

    pub fn ints(mut self, kind: i32, vs: &[i32]) -> Self {
        let payload = vs.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.tags.push((kind, FIFFT_INT, payload));
        self
    }

    pub fn float(mut self, kind: i32, v: f32) -> Self {
        self.tags.push((kind, FIFFT_FLOAT, v.to_be_bytes().to_vec()));
        self
    }

    pub fn string(mut self, kind: i32, s: &str) -> Self {
        self.tags.push((kind, FIFFT_STRING, s.as_bytes().to_vec()));
        self
    }

    pub fn channel(mut self, name: &str, kind: i32, unit: i32) -> Self {
        let mut raw = vec![0u8; ChannelInfo::SIZE];
        raw[8..12].copy_from_slice(&kind.to_be_bytes());
        raw[12..16].copy_from_slice(&1_f32.to_be_bytes());
        raw[16..20].copy_from_slice(&1_f32.to_be_bytes());
        raw[72..76].copy_from_slice(&unit.to_be_bytes());
        let n = name.len().min(15);
        raw[80..80 + n].copy_from_slice(&name.as_bytes()[..n]);
        self.tags.push((FIFF_CH_INFO, FIFFT_CH_INFO_STRUCT, raw));
        self
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for (i, (kind, ftype, payload)) in self.tags.iter().enumerate() {
            let next = if i + 1 == self.tags.len() { FIFFV_NEXT_NONE } else { FIFFV_NEXT_SEQ };
            buf.extend_from_slice(&kind.to_be_bytes());
            buf.extend_from_slice(&ftype.to_be_bytes());
            buf.extend_from_slice(&(payload.len() as i32).to_be_bytes());
            buf.extend_from_slice(&next.to_be_bytes());
            buf.extend_from_slice(payload);
        }
        buf
    }

    pub fn write(&self, path: &Path) {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).unwrap();
        }
        fs::write(path, self.bytes()).unwrap();
    }
}

/// A TRIUX-like header: two magnetometers, one gradiometer, a trigger.
#[allow(unused)]
pub fn triux_fif(meas_date: i32, gantry: i32) -> FifBuilder {
    FifBuilder::new()
        .start(FIFFB_MEAS)
        .start(FIFFB_MEAS_INFO)
        .float(FIFF_SFREQ, 1000.0)
        .float(FIFF_LINE_FREQ, 50.0)
        .ints(FIFF_MEAS_DATE, &[meas_date, 0])
        .int(FIFF_GANTRY_ANGLE, gantry)
        .channel("MEG0111", FIFFV_MEG_CH, FIFF_UNIT_T)
        .channel("MEG0112", FIFFV_MEG_CH, FIFF_UNIT_T_M)
        .channel("MEG0121", FIFFV_MEG_CH, FIFF_UNIT_T)
        .channel("STI101", FIFFV_STIM_CH, 0)
        .string(FIFF_BAD_CHS, "MEG0121")
        .start(FIFFB_HPI_MEAS)
        .start(FIFFB_HPI_COIL)
        .float(FIFF_HPI_COIL_FREQ, 293.0)
        .end(FIFFB_HPI_COIL)
        .start(FIFFB_HPI_COIL)
        .float(FIFF_HPI_COIL_FREQ, 307.0)
        .end(FIFFB_HPI_COIL)
        .end(FIFFB_HPI_MEAS)
        .end(FIFFB_MEAS_INFO)
        .end(FIFFB_MEAS)
}

/// An EEG-only header.
#[allow(unused)]
pub fn eeg_fif() -> FifBuilder {
    FifBuilder::new()
        .start(FIFFB_MEAS)
        .start(FIFFB_MEAS_INFO)
        .float(FIFF_SFREQ, 500.0)
        .channel("EEG001", FIFFV_EEG_CH, FIFF_UNIT_V)
        .channel("EEG002", FIFFV_EEG_CH, FIFF_UNIT_V)
        .end(FIFFB_MEAS_INFO)
        .end(FIFFB_MEAS)
}

// ── Headers without files ─────────────────────────────────────────────────

#[allow(unused)]
pub fn header(channels: &[(i32, i32)]) -> RecordingHeader {
    RecordingHeader {
        sfreq: 1000.0,
        line_freq: Some(50.0),
        channels: channels
            .iter()
            .enumerate()
            .map(|(i, &(kind, unit))| ChannelInfo {
                kind,
                range: 1.0,
                cal: 1.0,
                coil_type: 0,
                unit,
                name: format!("CH{i:03}"),
            })
            .collect(),
        bads: vec![],
        meas_date: None,
        gantry_angle: None,
        hpi_freqs: vec![],
        maxfilter: None,
    }
}

#[allow(unused)]
pub fn meg_header() -> RecordingHeader {
    let mut h = header(&[(FIFFV_MEG_CH, FIFF_UNIT_T), (FIFFV_MEG_CH, FIFF_UNIT_T_M)]);
    h.gantry_angle = Some(68.0);
    h.hpi_freqs = vec![293.0, 307.0];
    h
}

#[allow(unused)]
pub fn eeg_header() -> RecordingHeader {
    header(&[(FIFFV_EEG_CH, FIFF_UNIT_V)])
}

#[allow(unused)]
pub fn maxfiltered(mut h: RecordingHeader, history: MaxFilterHistory) -> RecordingHeader {
    h.maxfilter = Some(history);
    h
}

// ── Fake collaborators ────────────────────────────────────────────────────

/// Answers with a header chosen by file name; unknown files are errors.
/// A `*` entry answers for every file.
#[allow(unused)]
#[derive(Default)]
pub struct ScriptedInspector {
    headers: HashMap<String, RecordingHeader>,
}

#[allow(unused)]
impl ScriptedInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, file_name: &str, header: RecordingHeader) -> Self {
        self.headers.insert(file_name.to_string(), header);
        self
    }
}

impl RecordingInspector for ScriptedInspector {
    fn inspect(&self, path: &Path) -> Result<RecordingHeader> {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        self.headers
            .get(&name)
            .or_else(|| self.headers.get("*"))
            .cloned()
            .ok_or_else(|| anyhow!("no scripted header for {name}"))
    }
}

/// Copies sources into place and records every call.  With `fail` set the
/// structured write always errors.
#[allow(unused)]
#[derive(Default)]
pub struct CountingWriter {
    pub recordings: RefCell<Vec<PathBuf>>,
    pub references: RefCell<Vec<PathBuf>>,
    pub fail:       bool,
}

#[allow(unused)]
impl CountingWriter {
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn writes(&self) -> usize {
        self.recordings.borrow().len() + self.references.borrow().len()
    }
}

impl RecordingWriter for CountingWriter {
    fn write_recording(&self, source: &Path, target: &BidsPath) -> Result<()> {
        self.recordings.borrow_mut().push(target.fpath());
        if self.fail {
            bail!("structured writer unavailable");
        }
        fs::create_dir_all(target.directory())?;
        fs::copy(source, target.fpath())?;
        fs::write(target.sidecar(), format!("{{\"TaskName\": \"{}\"}}", target.task))?;
        Ok(())
    }

    fn write_reference(&self, source: &Path, dest: &Path) -> Result<()> {
        self.references.borrow_mut().push(dest.to_path_buf());
        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::copy(source, dest)?;
        Ok(())
    }
}

/// Create `path` with a few bytes of content.
#[allow(unused)]
pub fn touch(path: &Path) {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).unwrap();
    }
    fs::write(path, b"fif").unwrap();
}
