//! Carves a single video data block out of the image and emits it as a
//! playable raw H.264 elementary stream.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::error::{HikError, Result};
use crate::idr;
use crate::image_reader::ImageReader;

const H264_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

pub struct ExtractResult {
    pub output_path: PathBuf,
    pub nal_unit_count: usize,
    pub block_start: u64,
    pub block_end: u64,
}

/// Carves the data block at `block_start = offset + extra_offset` and writes
/// its NAL-filtered H.264 payload to `<output_dir>/video_block_at_<offset_hex>.h264`.
pub fn extract_block(
    reader: &mut ImageReader,
    offset: u64,
    extra_offset: u64,
    data_block_size: u64,
    output_dir: &str,
    offset_hex: &str,
) -> Result<ExtractResult> {
    let block_start = offset + extra_offset;

    let idr_records = idr::parse_data_block(reader, block_start, data_block_size)?;
    if idr_records.is_empty() {
        return Err(HikError::ParseError(format!(
            "could not parse IDR table for block at 0x{:x}; cannot determine video boundaries",
            block_start
        )));
    }

    let block_end = idr_records[0].address;
    if block_end <= block_start {
        return Err(HikError::ParseError(
            "calculated video data size is zero or negative".to_string(),
        ));
    }

    let carve_size = (block_end - block_start) as usize;
    info!(
        "Carving {:.2} MB of raw video data from 0x{:x}",
        carve_size as f64 / (1024.0 * 1024.0),
        block_start
    );
    let raw = reader.read(block_start, carve_size)?;

    let (cleaned, nal_unit_count) = filter_nal_units(&raw);
    if cleaned.is_empty() {
        return Err(HikError::ParseError(
            "no H.264 NAL units could be found in the data block".to_string(),
        ));
    }

    fs::create_dir_all(output_dir)?;
    let safe_offset = offset_hex.trim_start_matches("0x").trim_start_matches("0X").to_lowercase();
    let output_path = Path::new(output_dir).join(format!("video_block_at_{safe_offset}.h264"));
    fs::write(&output_path, &cleaned)?;
    info!("Saved cleaned video stream to {}", output_path.display());

    Ok(ExtractResult {
        output_path,
        nal_unit_count,
        block_start,
        block_end,
    })
}

/// Scans `raw` for the H.264 start code and concatenates every NAL unit
/// (start code through just before the next one, or end of buffer) verbatim
/// in on-disk order. Bytes before the first start code are dropped.
fn filter_nal_units(raw: &[u8]) -> (Vec<u8>, usize) {
    let mut cleaned = Vec::new();
    let mut current_pos = 0usize;
    let mut nal_unit_count = 0usize;

    while current_pos < raw.len() {
        let start = match find(raw, &H264_START_CODE, current_pos) {
            Some(p) => p,
            None => break,
        };
        let next_start = find(raw, &H264_START_CODE, start + 4);
        let end = next_start.unwrap_or(raw.len());
        cleaned.extend_from_slice(&raw[start..end]);
        nal_unit_count += 1;
        current_pos = next_start.unwrap_or(raw.len());
    }

    (cleaned, nal_unit_count)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}
