//! FIF directory tree construction.
//!
//! Tag headers are grouped into blocks delimited by `FIFF_BLOCK_START` /
//! `FIFF_BLOCK_END`.  The headers come from the embedded directory when the
//! file has one, otherwise from following the `next` chain.
use std::io::{Read, Seek, SeekFrom};

use anyhow::Result;

use super::constants::*;
use super::tag::{read_directory, read_i32, read_tag_header, TagHeader};

// ── Node ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct Node {
    /// Block kind (`FIFFB_MEAS`, `FIFFB_HPI_COIL`, …); 0 for the root.
    pub block:    i32,
    /// Non-structural tags of this block.
    pub entries:  Vec<TagHeader>,
    pub children: Vec<Node>,
}

impl Node {
    /// Depth-first search for the first block of the given kind, `self` included.
    pub fn find_block(&self, kind: i32) -> Option<&Node> {
        if self.block == kind {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_block(kind))
    }

    /// Every block of the given kind, in file order.
    pub fn find_blocks(&self, kind: i32) -> Vec<&Node> {
        let mut out = Vec::new();
        self.collect_blocks(kind, &mut out);
        out
    }

    fn collect_blocks<'a>(&'a self, kind: i32, out: &mut Vec<&'a Node>) {
        if self.block == kind {
            out.push(self);
        }
        for child in &self.children {
            child.collect_blocks(kind, out);
        }
    }

    /// First tag of the given kind in this block.  Does not recurse.
    pub fn find_tag(&self, kind: i32) -> Option<&TagHeader> {
        self.entries.iter().find(|e| e.kind == kind)
    }
}

// ── Tree builder ─────────────────────────────────────────────────────────

/// Group a flat directory into blocks, reading each block's kind from the file.
pub fn read_tree<R: Read + Seek>(reader: &mut R, directory: &[TagHeader]) -> Result<Node> {
    let mut stack: Vec<Node> = vec![Node::default()];

    for &tag in directory {
        match tag.kind {
            FIFF_BLOCK_START => {
                let block = read_i32(reader, &tag).unwrap_or(0);
                stack.push(Node { block, ..Node::default() });
            }
            FIFF_BLOCK_END => {
                if stack.len() > 1 {
                    if let Some(finished) = stack.pop() {
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(finished);
                        }
                    }
                }
            }
            _ => {
                if let Some(node) = stack.last_mut() {
                    node.entries.push(tag);
                }
            }
        }
    }

    // Unterminated blocks hang off their parent.
    while stack.len() > 1 {
        if let Some(orphan) = stack.pop() {
            if let Some(parent) = stack.last_mut() {
                parent.children.push(orphan);
            }
        }
    }
    Ok(stack.pop().unwrap_or_default())
}

// ── Directory scanner ─────────────────────────────────────────────────────

/// Read every tag header by following the `next` chain until the last tag
/// or the end of the file.
pub fn scan_directory<R: Read + Seek>(reader: &mut R) -> Result<Vec<TagHeader>> {
    let len = reader.seek(SeekFrom::End(0))?;
    let mut directory = Vec::new();
    let mut pos: Option<u64> = Some(0);
    while let Some(p) = pos {
        if p + 16 > len {
            break;
        }
        let tag = read_tag_header(reader, p)?;
        pos = tag.next_pos().filter(|&n| n > p);
        directory.push(tag);
    }
    Ok(directory)
}

/// The directory embedded in the file, when `FIFF_DIR_POINTER` points to one.
pub fn try_load_directory<R: Read + Seek>(reader: &mut R) -> Result<Option<Vec<TagHeader>>> {
    let id_tag = read_tag_header(reader, 0)?;
    if id_tag.kind != FIFF_FILE_ID {
        return Ok(None);
    }
    let Some(next) = id_tag.next_pos() else {
        return Ok(None);
    };
    let dir_ptr_tag = read_tag_header(reader, next)?;
    if dir_ptr_tag.kind != FIFF_DIR_POINTER {
        return Ok(None);
    }
    let dirpos = read_i32(reader, &dir_ptr_tag)?;
    if dirpos <= 0 {
        return Ok(None);
    }
    let dir_tag = read_tag_header(reader, dirpos as u64)?;
    if dir_tag.ftype != FIFFT_DIR_ENTRY_STRUCT {
        return Ok(None);
    }
    Ok(Some(read_directory(reader, &dir_tag)?))
}

/// Fast path through the embedded directory, slow path by scanning.
pub fn load_directory<R: Read + Seek>(reader: &mut R) -> Result<Vec<TagHeader>> {
    match try_load_directory(reader) {
        Ok(Some(dir)) if !dir.is_empty() => Ok(dir),
        _ => scan_directory(reader),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Sequential tags; each `(kind, ftype, payload)`.
    fn file_of(tags: &[(i32, u32, Vec<u8>)]) -> Cursor<Vec<u8>> {
        let mut buf = Vec::new();
        for (i, (kind, ftype, payload)) in tags.iter().enumerate() {
            let next = if i + 1 == tags.len() { FIFFV_NEXT_NONE } else { FIFFV_NEXT_SEQ };
            buf.extend_from_slice(&kind.to_be_bytes());
            buf.extend_from_slice(&ftype.to_be_bytes());
            buf.extend_from_slice(&(payload.len() as i32).to_be_bytes());
            buf.extend_from_slice(&next.to_be_bytes());
            buf.extend_from_slice(payload);
        }
        Cursor::new(buf)
    }

    fn int(v: i32) -> Vec<u8> {
        v.to_be_bytes().to_vec()
    }

    #[test]
    fn nested_blocks_resolve_kinds() {
        let mut f = file_of(&[
            (FIFF_BLOCK_START, FIFFT_INT, int(FIFFB_MEAS)),
            (FIFF_BLOCK_START, FIFFT_INT, int(FIFFB_MEAS_INFO)),
            (FIFF_NCHAN,       FIFFT_INT, int(3)),
            (FIFF_BLOCK_END,   FIFFT_INT, int(FIFFB_MEAS_INFO)),
            (FIFF_BLOCK_END,   FIFFT_INT, int(FIFFB_MEAS)),
        ]);
        let dir = scan_directory(&mut f).unwrap();
        assert_eq!(dir.len(), 5);
        let root = read_tree(&mut f, &dir).unwrap();
        let meas = root.find_block(FIFFB_MEAS).unwrap();
        let info = meas.find_block(FIFFB_MEAS_INFO).unwrap();
        assert!(info.find_tag(FIFF_NCHAN).is_some());
        assert!(meas.find_tag(FIFF_NCHAN).is_none());
    }

    #[test]
    fn find_blocks_collects_siblings() {
        let mut f = file_of(&[
            (FIFF_BLOCK_START, FIFFT_INT, int(FIFFB_HPI_MEAS)),
            (FIFF_BLOCK_START, FIFFT_INT, int(FIFFB_HPI_COIL)),
            (FIFF_BLOCK_END,   FIFFT_INT, int(FIFFB_HPI_COIL)),
            (FIFF_BLOCK_START, FIFFT_INT, int(FIFFB_HPI_COIL)),
            (FIFF_BLOCK_END,   FIFFT_INT, int(FIFFB_HPI_COIL)),
            (FIFF_BLOCK_END,   FIFFT_INT, int(FIFFB_HPI_MEAS)),
        ]);
        let dir = load_directory(&mut f).unwrap();
        let root = read_tree(&mut f, &dir).unwrap();
        assert_eq!(root.find_blocks(FIFFB_HPI_COIL).len(), 2);
    }

    #[test]
    fn unterminated_block_is_kept() {
        let mut f = file_of(&[
            (FIFF_BLOCK_START, FIFFT_INT, int(FIFFB_MEAS)),
            (FIFF_NCHAN,       FIFFT_INT, int(1)),
        ]);
        let dir = scan_directory(&mut f).unwrap();
        let root = read_tree(&mut f, &dir).unwrap();
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].entries.len(), 1);
    }

    #[test]
    fn scan_stops_at_end_of_file() {
        // A final tag that claims a sequential successor.
        let mut buf = Vec::new();
        buf.extend_from_slice(&FIFF_NCHAN.to_be_bytes());
        buf.extend_from_slice(&FIFFT_INT.to_be_bytes());
        buf.extend_from_slice(&4_i32.to_be_bytes());
        buf.extend_from_slice(&FIFFV_NEXT_SEQ.to_be_bytes());
        buf.extend_from_slice(&int(1));
        let dir = scan_directory(&mut Cursor::new(buf)).unwrap();
        assert_eq!(dir.len(), 1);
    }
}
