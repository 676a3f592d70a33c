//! Forensic reader for Hikvision DVR disk images.
//!
//! Four operations over a single [`ImageReader`]: [`master_sector::parse`]
//! locates and decodes the Master Sector (and derives the alignment offset
//! every other parser needs), [`hikbtree::parse`] walks the HIKBTREE index,
//! [`system_log::parse`] frames and decodes the system log stream, and
//! [`extractor::extract_block`] carves a single video data block into a raw
//! H.264 elementary stream.

pub mod error;
pub mod ewf;
pub mod extractor;
pub mod field;
pub mod hikbtree;
pub mod idr;
pub mod image_reader;
pub mod master_sector;
pub mod raw;
pub mod system_log;

pub use error::{HikError, Result};
pub use image_reader::ImageReader;
