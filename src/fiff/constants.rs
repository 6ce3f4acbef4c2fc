//! FIFF constants used by the header reader.
//!
//! Names follow `mne/_fiff/constants.py` so that values can be checked
//! against MNE one by one.  Only the blocks and tags needed to describe a
//! recording's header are listed; data buffers are never read.
//!
//! Every piece of data in a FIF file is wrapped in a **tag**: a 16-byte
//! header (`kind`, `type`, `size`, `next`) followed by a payload.  Tags are
//! grouped into **blocks** by `FIFF_BLOCK_START` / `FIFF_BLOCK_END`.

#![allow(dead_code)]

// ── Block kinds ───────────────────────────────────────────────────────────

/// Measurement block, top-level container for one recording.
pub const FIFFB_MEAS:               i32 = 100;
/// Channel metadata, sfreq, bad channels, gantry angle.
pub const FIFFB_MEAS_INFO:          i32 = 101;
/// Head-position indicator measurement.
pub const FIFFB_HPI_MEAS:           i32 = 108;
/// One HPI coil inside `FIFFB_HPI_MEAS`.
pub const FIFFB_HPI_COIL:           i32 = 110;
/// MaxFilter SSS parameters.
pub const FIFFB_SSS_INFO:           i32 = 502;
/// MaxFilter fine-calibration record.
pub const FIFFB_SSS_CAL:            i32 = 503;
/// MaxFilter temporal SSS parameters.
pub const FIFFB_SSS_ST_INFO:        i32 = 504;
/// Container of processing records.
pub const FIFFB_PROCESSING_HISTORY: i32 = 900;
/// One processing step.
pub const FIFFB_PROCESSING_RECORD:  i32 = 901;

// ── Tag kinds (structural) ─────────────────────────────────────────────────

/// Unique file identifier (first tag in every FIF file).
pub const FIFF_FILE_ID:         i32 = 100;
/// Pointer to the embedded tag directory (second tag, payload = byte offset).
pub const FIFF_DIR_POINTER:     i32 = 101;
/// Opens a new block; payload = block kind (i32).
pub const FIFF_BLOCK_START:     i32 = 104;
/// Closes the most recently opened block.
pub const FIFF_BLOCK_END:       i32 = 105;

// ── Tag kinds (measurement info) ──────────────────────────────────────────

/// Number of channels (i32).
pub const FIFF_NCHAN:           i32 = 200;
/// Sampling frequency in Hz (f32).
pub const FIFF_SFREQ:           i32 = 201;
/// Channel info struct, one per channel.
pub const FIFF_CH_INFO:         i32 = 203;
/// Measurement date: `[seconds, microseconds]` since the Unix epoch.
pub const FIFF_MEAS_DATE:       i32 = 204;
/// Colon-separated list of bad channel names (string).
pub const FIFF_BAD_CHS:         i32 = 220;
/// Power-line frequency in Hz (f32).
pub const FIFF_LINE_FREQ:       i32 = 235;
/// HPI coil drive frequency in Hz (f32), inside `FIFFB_HPI_COIL`.
pub const FIFF_HPI_COIL_FREQ:   i32 = 236;
/// Dewar tilt in degrees; written as int by TRIUX, as float by MNE.
pub const FIFF_GANTRY_ANGLE:    i32 = 282;

// ── Tag kinds (MaxFilter) ─────────────────────────────────────────────────

/// SSS internal expansion order (i32).
pub const FIFF_SSS_ORD_IN:      i32 = 266;
/// SSS external expansion order (i32).
pub const FIFF_SSS_ORD_OUT:     i32 = 267;
/// Per-channel SSS components (int array).
pub const FIFF_SSS_COMPONENTS:  i32 = 269;
/// tSSS subspace correlation limit (f32).
pub const FIFF_SSS_ST_CORR:     i32 = 272;
/// Number of free SSS components (i32).
pub const FIFF_SSS_NFREE:       i32 = 278;
/// tSSS buffer length in seconds (f32).
pub const FIFF_SSS_ST_LENGTH:   i32 = 279;

// ── Tag payload types ─────────────────────────────────────────────────────

pub const FIFFT_SHORT:             u32 = 2;
pub const FIFFT_INT:               u32 = 3;
pub const FIFFT_FLOAT:             u32 = 4;
pub const FIFFT_DOUBLE:            u32 = 5;
pub const FIFFT_JULIAN:            u32 = 6;
pub const FIFFT_STRING:            u32 = 10;
/// 96-byte channel info struct.
pub const FIFFT_CH_INFO_STRUCT:    u32 = 30;
pub const FIFFT_ID_STRUCT:         u32 = 31;
/// Tag-directory entry struct (16 bytes per entry).
pub const FIFFT_DIR_ENTRY_STRUCT:  u32 = 32;

// ── `next` field sentinels ────────────────────────────────────────────────

/// The next tag follows immediately: `next_pos = pos + 16 + size`.
pub const FIFFV_NEXT_SEQ:  i32 = 0;
/// There is no next tag.
pub const FIFFV_NEXT_NONE: i32 = -1;

// ── Channel kind codes ────────────────────────────────────────────────────

pub const FIFFV_MEG_CH:     i32 = 1;
pub const FIFFV_EEG_CH:     i32 = 2;
pub const FIFFV_STIM_CH:    i32 = 3;
pub const FIFFV_EOG_CH:     i32 = 202;
pub const FIFFV_REF_MEG_CH: i32 = 301;
pub const FIFFV_EMG_CH:     i32 = 302;
pub const FIFFV_ECG_CH:     i32 = 402;
pub const FIFFV_MISC_CH:    i32 = 502;

// ── Units ─────────────────────────────────────────────────────────────────

/// Volt.
pub const FIFF_UNIT_V:   i32 = 107;
/// Tesla: magnetometers.
pub const FIFF_UNIT_T:   i32 = 112;
/// Tesla per metre: planar gradiometers.
pub const FIFF_UNIT_T_M: i32 = 201;
