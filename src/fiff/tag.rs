//! FIFF tag I/O.
//!
//! On-disk layout (always big-endian):
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  kind : i32  │  type : u32  │  size : i32  │ next : i32 │  ← 16 bytes
//! ├──────────────────────────────────────────────────────┤
//! │  <size bytes of payload data>                        │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! `next == 0` means the next tag follows immediately (pos + 16 + size).
//! `next  > 0` means seek to byte offset `next`.
//! `next == -1` means there is no next tag.
use std::io::{Read, Seek, SeekFrom};

use anyhow::{bail, Context, Result};

use super::constants::*;

// ── Tag header ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHeader {
    pub kind:  i32,
    pub ftype: u32,   // "type" is a Rust keyword
    pub size:  i32,
    pub next:  i32,
    pub pos:   u64,   // byte offset of the header in the file
}

impl TagHeader {
    #[inline]
    pub fn data_pos(&self) -> u64 {
        self.pos + 16
    }

    /// Position of the next tag header, `None` after the last tag.
    pub fn next_pos(&self) -> Option<u64> {
        if self.next == FIFFV_NEXT_SEQ {
            Some(self.pos + 16 + self.size.max(0) as u64)
        } else if self.next > 0 {
            Some(self.next as u64)
        } else {
            None
        }
    }

    fn from_bytes(buf: &[u8; 16], pos: u64) -> Self {
        Self {
            kind:  be_i32(&buf[0..4]),
            ftype: be_i32(&buf[4..8]) as u32,
            size:  be_i32(&buf[8..12]),
            next:  be_i32(&buf[12..16]),
            pos,
        }
    }
}

/// Read only the 16-byte tag header at `pos`.
pub fn read_tag_header<R: Read + Seek>(reader: &mut R, pos: u64) -> Result<TagHeader> {
    reader.seek(SeekFrom::Start(pos))
        .with_context(|| format!("seek to tag header @ {pos:#x}"))?;
    let mut buf = [0u8; 16];
    reader.read_exact(&mut buf)
        .with_context(|| format!("read tag header @ {pos:#x}"))?;
    Ok(TagHeader::from_bytes(&buf, pos))
}

// ── Payload readers ───────────────────────────────────────────────────────

/// The whole payload as raw bytes.
pub fn read_bytes<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<Vec<u8>> {
    reader
        .seek(SeekFrom::Start(tag.data_pos()))
        .with_context(|| format!("seek to tag data @ {:#x}", tag.data_pos()))?;
    let mut buf = vec![0u8; tag.size.max(0) as usize];
    reader
        .read_exact(&mut buf)
        .with_context(|| format!("read {} payload bytes of tag {}", buf.len(), tag.kind))?;
    Ok(buf)
}

pub fn read_i32s<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<Vec<i32>> {
    Ok(read_bytes(reader, tag)?.chunks_exact(4).map(be_i32).collect())
}

pub fn read_i32<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<i32> {
    match read_i32s(reader, tag)?.first() {
        Some(&v) => Ok(v),
        None => bail!("tag {} has an empty int payload", tag.kind),
    }
}

/// A scalar of any numeric tag type, widened to `f64`.
///
/// Some header fields (gantry angle) are written as int by the acquisition
/// software and as float by MNE.
pub fn read_number<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<f64> {
    let bytes = read_bytes(reader, tag)?;
    let v = match tag.ftype {
        FIFFT_INT | FIFFT_JULIAN if bytes.len() >= 4 => be_i32(&bytes[0..4]) as f64,
        FIFFT_SHORT if bytes.len() >= 2 => i16::from_be_bytes([bytes[0], bytes[1]]) as f64,
        FIFFT_FLOAT if bytes.len() >= 4 => {
            f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
        }
        FIFFT_DOUBLE if bytes.len() >= 8 => {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[0..8]);
            f64::from_be_bytes(b)
        }
        t => bail!("tag {} of type {t} ({} bytes) is not a number", tag.kind, bytes.len()),
    };
    Ok(v)
}

/// A Latin-1 string payload, trailing NULs removed.
pub fn read_string<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<String> {
    let bytes = read_bytes(reader, tag)?;
    Ok(latin1(&bytes).trim_end_matches('\0').to_string())
}

// ── Directory tag (FIFFT_DIR_ENTRY_STRUCT) ────────────────────────────────

/// Read the tag directory embedded in a file.  Each entry has the shape of a
/// tag header whose last field is the real file position of that tag.
pub fn read_directory<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<Vec<TagHeader>> {
    if tag.ftype != FIFFT_DIR_ENTRY_STRUCT {
        bail!("expected FIFFT_DIR_ENTRY_STRUCT, got {}", tag.ftype);
    }
    let bytes = read_bytes(reader, tag)?;
    Ok(bytes
        .chunks_exact(16)
        .map(|e| TagHeader {
            kind:  be_i32(&e[0..4]),
            ftype: be_i32(&e[4..8]) as u32,
            size:  be_i32(&e[8..12]),
            next:  FIFFV_NEXT_NONE,
            pos:   be_i32(&e[12..16]) as u32 as u64,
        })
        .collect())
}

// ── Helpers ───────────────────────────────────────────────────────────────

/// Big-endian i32 from the first four bytes of `b`; callers pass 4-byte chunks.
#[inline]
pub(crate) fn be_i32(b: &[u8]) -> i32 {
    i32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

#[inline]
pub(crate) fn be_f32(b: &[u8]) -> f32 {
    f32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// FIFF strings are ISO-8859-1; every byte maps to one char.
pub(crate) fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
