//! FIFF header reader.
//!
//! Reads the measurement header of Elekta/MEGIN `.fif` recordings (and
//! FieldLine exports written by MNE) without loading any sample data.
//!
//! # Quick start
//! ```no_run
//! use megbids::fiff::read_header;
//!
//! let hdr = read_header("NatMEG_0123/231101/meg/rest_raw.fif").unwrap();
//! println!("{} channels @ {} Hz, gantry {:?}", hdr.channels.len(), hdr.sfreq, hdr.gantry_angle);
//! ```
pub mod constants;
pub mod header;
pub mod tag;
pub mod tree;

pub use header::{
    read_header, read_header_from, ChannelInfo, ChannelType, MaxFilterHistory, RecordingHeader,
    SssInfo, TsssInfo,
};
pub use tag::{read_tag_header, TagHeader};
pub use tree::{load_directory, read_tree, Node};
