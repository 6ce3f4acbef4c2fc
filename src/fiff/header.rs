//! Measurement header of a FIF recording.
//!
//! Only what conversion needs is read: channel composition, sampling and
//! line frequency, bad channels, measurement date, dewar (gantry) angle,
//! HPI coil frequencies and the MaxFilter processing history.  Data buffers
//! are never touched, so a header read costs a handful of seeks even on a
//! multi-gigabyte file.
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};

use super::constants::*;
use super::tag::{be_f32, be_i32, latin1, read_bytes, read_i32s, read_number, read_string, TagHeader};
use super::tree::{load_directory, read_tree, Node};
use crate::entity::Datatype;

// ── Channels ──────────────────────────────────────────────────────────────

/// Sensor classes distinguished by conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelType {
    Mag,
    Grad,
    RefMeg,
    Eeg,
    Eog,
    Ecg,
    Emg,
    Stim,
    Misc,
    Other,
}

impl ChannelType {
    /// Classify a channel from its FIFF kind and unit.  MEG channels
    /// measured in T/m are planar gradiometers, the rest magnetometers.
    pub fn from_kind(kind: i32, unit: i32) -> Self {
        match kind {
            FIFFV_MEG_CH if unit == FIFF_UNIT_T_M => Self::Grad,
            FIFFV_MEG_CH => Self::Mag,
            FIFFV_REF_MEG_CH => Self::RefMeg,
            FIFFV_EEG_CH => Self::Eeg,
            FIFFV_EOG_CH => Self::Eog,
            FIFFV_ECG_CH => Self::Ecg,
            FIFFV_EMG_CH => Self::Emg,
            FIFFV_STIM_CH => Self::Stim,
            FIFFV_MISC_CH => Self::Misc,
            _ => Self::Other,
        }
    }

    /// BIDS `channels.tsv` type column.
    pub fn bids_type(self) -> &'static str {
        match self {
            Self::Mag => "MEGMAG",
            Self::Grad => "MEGGRADPLANAR",
            Self::RefMeg => "MEGREFMAG",
            Self::Eeg => "EEG",
            Self::Eog => "EOG",
            Self::Ecg => "ECG",
            Self::Emg => "EMG",
            Self::Stim => "TRIG",
            Self::Misc => "MISC",
            Self::Other => "OTHER",
        }
    }

    pub fn bids_unit(self) -> &'static str {
        match self {
            Self::Mag | Self::RefMeg => "T",
            Self::Grad => "T/m",
            Self::Eeg | Self::Eog | Self::Ecg | Self::Emg => "V",
            Self::Stim | Self::Misc | Self::Other => "n/a",
        }
    }
}

/// Channel info, parsed from a `FIFFT_CH_INFO_STRUCT` tag.
///
/// On-disk layout (big-endian, 96 bytes):
/// ```text
///  4  scanno       i32
///  4  logno        i32
///  4  kind         i32
///  4  range        f32
///  4  cal          f32
///  4  coil_type    i32
/// 48  loc          12 × f32
///  4  unit         i32
///  4  unit_mul     i32
/// 16  ch_name      16 × u8 (null-padded Latin-1)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    pub kind:      i32,
    pub range:     f32,
    pub cal:       f32,
    pub coil_type: i32,
    pub unit:      i32,
    pub name:      String,
}

impl ChannelInfo {
    pub const SIZE: usize = 96;

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::SIZE {
            bail!("ch_info payload too short: {} bytes (need {})", raw.len(), Self::SIZE);
        }
        let name_bytes = &raw[80..96];
        let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(16);
        Ok(Self {
            kind:      be_i32(&raw[8..12]),
            range:     be_f32(&raw[12..16]),
            cal:       be_f32(&raw[16..20]),
            coil_type: be_i32(&raw[20..24]),
            unit:      be_i32(&raw[72..76]),
            name:      latin1(&name_bytes[..end]),
        })
    }

    pub fn channel_type(&self) -> ChannelType {
        ChannelType::from_kind(self.kind, self.unit)
    }
}

// ── MaxFilter history ─────────────────────────────────────────────────────

/// Spatial SSS parameters of a MaxFiltered recording.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SssInfo {
    pub in_order:  Option<i32>,
    pub out_order: Option<i32>,
    pub nfree:     Option<i32>,
}

/// Temporal SSS parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TsssInfo {
    pub subspace_corr: Option<f64>,
    /// Seconds.
    pub buffer_len:    Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaxFilterHistory {
    pub sss:  Option<SssInfo>,
    pub tsss: Option<TsssInfo>,
}

// ── Header ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingHeader {
    pub sfreq:        f64,
    pub line_freq:    Option<f64>,
    pub channels:     Vec<ChannelInfo>,
    pub bads:         Vec<String>,
    pub meas_date:    Option<DateTime<Utc>>,
    /// Dewar tilt in degrees; only TRIUX systems record it.
    pub gantry_angle: Option<f64>,
    pub hpi_freqs:    Vec<f64>,
    /// `Some` when the file carries a processing history.
    pub maxfilter:    Option<MaxFilterHistory>,
}

impl RecordingHeader {
    pub fn channel_types(&self) -> BTreeSet<ChannelType> {
        self.channels.iter().map(ChannelInfo::channel_type).collect()
    }

    pub fn count(&self, ty: ChannelType) -> usize {
        self.channels.iter().filter(|c| c.channel_type() == ty).count()
    }

    /// Output datatype from channel-type membership: any magnetometer makes
    /// the recording MEG, otherwise any EEG channel makes it EEG.
    pub fn datatype(&self) -> Option<Datatype> {
        let types = self.channel_types();
        if types.contains(&ChannelType::Mag) {
            Some(Datatype::Meg)
        } else if types.contains(&ChannelType::Eeg) {
            Some(Datatype::Eeg)
        } else {
            None
        }
    }

    pub fn is_maxfiltered(&self) -> bool {
        self.maxfilter.is_some()
    }
}

/// Read the measurement header of a `.fif` file.
pub fn read_header(path: impl AsRef<Path>) -> Result<RecordingHeader> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = BufReader::new(file);
    read_header_from(&mut reader).with_context(|| format!("reading FIF header of {}", path.display()))
}

pub fn read_header_from<R: Read + Seek>(reader: &mut R) -> Result<RecordingHeader> {
    let directory = load_directory(reader)?;
    let tree = read_tree(reader, &directory)?;

    let Some(info) = tree.find_block(FIFFB_MEAS_INFO) else {
        bail!("FIFFB_MEAS_INFO block not found");
    };

    let mut sfreq = None::<f64>;
    let mut line_freq = None::<f64>;
    let mut channels = Vec::<ChannelInfo>::new();
    let mut bads = Vec::<String>::new();
    let mut meas_date = None::<DateTime<Utc>>;
    let mut gantry_angle = None::<f64>;

    for ent in &info.entries {
        match ent.kind {
            FIFF_SFREQ => sfreq = Some(read_number(reader, ent)?),
            FIFF_LINE_FREQ => {
                let v = read_number(reader, ent)?;
                if v.is_finite() {
                    line_freq = Some(v);
                }
            }
            FIFF_CH_INFO => channels.push(ChannelInfo::from_bytes(&read_bytes(reader, ent)?)?),
            FIFF_BAD_CHS => {
                bads = read_string(reader, ent)?
                    .split(':')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            FIFF_MEAS_DATE => meas_date = read_meas_date(reader, ent)?,
            FIFF_GANTRY_ANGLE => gantry_angle = Some(read_number(reader, ent)?),
            _ => {}
        }
    }

    let Some(sfreq) = sfreq else {
        bail!("FIFF_SFREQ not found");
    };

    let mut hpi_freqs = Vec::new();
    for coil in info.find_blocks(FIFFB_HPI_COIL) {
        if let Some(t) = coil.find_tag(FIFF_HPI_COIL_FREQ) {
            hpi_freqs.push(read_number(reader, t)?);
        }
    }

    let maxfilter = read_maxfilter_history(reader, &tree)?;

    Ok(RecordingHeader {
        sfreq,
        line_freq,
        channels,
        bads,
        meas_date,
        gantry_angle,
        hpi_freqs,
        maxfilter,
    })
}

fn read_meas_date<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<Option<DateTime<Utc>>> {
    let v = read_i32s(reader, tag)?;
    let (secs, usecs) = match v.as_slice() {
        [s, u, ..] => (*s as i64, *u),
        [s] => (*s as i64, 0),
        [] => return Ok(None),
    };
    Ok(DateTime::from_timestamp(secs, (usecs.max(0) as u32).saturating_mul(1000)))
}

fn read_maxfilter_history<R: Read + Seek>(reader: &mut R, tree: &Node) -> Result<Option<MaxFilterHistory>> {
    let has_history = tree.find_block(FIFFB_PROCESSING_HISTORY).is_some();
    let sss_block = tree.find_block(FIFFB_SSS_INFO);
    let st_block = tree.find_block(FIFFB_SSS_ST_INFO);
    if !has_history && sss_block.is_none() && st_block.is_none() {
        return Ok(None);
    }

    let sss = match sss_block {
        Some(node) => Some(SssInfo {
            in_order:  int_tag(reader, node, FIFF_SSS_ORD_IN)?,
            out_order: int_tag(reader, node, FIFF_SSS_ORD_OUT)?,
            nfree:     int_tag(reader, node, FIFF_SSS_NFREE)?,
        }),
        None => None,
    };
    let tsss = match st_block {
        Some(node) => Some(TsssInfo {
            subspace_corr: float_tag(reader, node, FIFF_SSS_ST_CORR)?,
            buffer_len:    float_tag(reader, node, FIFF_SSS_ST_LENGTH)?,
        }),
        None => None,
    };
    Ok(Some(MaxFilterHistory { sss, tsss }))
}

fn int_tag<R: Read + Seek>(reader: &mut R, node: &Node, kind: i32) -> Result<Option<i32>> {
    Ok(float_tag(reader, node, kind)?.map(|v| v as i32))
}

fn float_tag<R: Read + Seek>(reader: &mut R, node: &Node, kind: i32) -> Result<Option<f64>> {
    match node.find_tag(kind) {
        Some(t) => Ok(Some(read_number(reader, t)?)),
        None => Ok(None),
    }
}
