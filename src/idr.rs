//! IDR metadata table parser.
//!
//! Each data block carries a fixed-size IDR record table near its tail,
//! signature `OFNI`, used to delimit the H.264 payload that precedes it.

use log::{info, warn};
use serde::Serialize;

use crate::error::Result;
use crate::field::format_timestamp;
use crate::image_reader::ImageReader;

const SIGNATURE: &[u8] = b"OFNI";
const RECORD_SIZE: usize = 56;
const SEARCH_BUFFER_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize)]
pub struct IdrRecord {
    pub address: u64,
    pub frame_index: u32,
    pub channel: u8,
    pub timestamp_unix: u32,
    pub timestamp_readable: String,
}

/// Scans backwards from the tail of `[block_start, block_start + block_size)`
/// for the IDR record table, returning records in ascending (low-address
/// first) order. Returns an empty vector if no table is found.
pub fn parse_data_block(
    reader: &mut ImageReader,
    block_start: u64,
    block_size: u64,
) -> Result<Vec<IdrRecord>> {
    if block_size == 0 {
        warn!("invalid block size for block at 0x{:x}", block_start);
        return Ok(Vec::new());
    }

    let block_end = block_start + block_size;
    let mut read_start = block_end.saturating_sub(SEARCH_BUFFER_SIZE);
    if read_start < block_start {
        read_start = block_start;
    }
    let search_size = (block_end - read_start) as usize;

    info!(
        "Reading {} KB from the end of the data block at 0x{:x} to find the IDR table",
        search_size / 1024,
        block_start
    );
    let chunk = reader.read(read_start, search_size)?;

    let mut sig_pos = match rfind(&chunk, SIGNATURE, chunk.len()) {
        Some(p) => p,
        None => {
            warn!("no IDR ('OFNI') signature found at the end of block 0x{:x}", block_start);
            return Ok(Vec::new());
        }
    };

    let mut records = Vec::new();
    loop {
        let record_addr = read_start + sig_pos as u64;
        let record_end = sig_pos + RECORD_SIZE;
        if record_end > chunk.len() {
            break;
        }
        let record = &chunk[sig_pos..record_end];

        let rec_size = u32::from_le_bytes(record[4..8].try_into().unwrap());
        if rec_size != RECORD_SIZE as u32 {
            warn!(
                "IDR record at 0x{:x} has unexpected size {rec_size}, stopping table scan",
                record_addr
            );
            break;
        }

        let frame_index = u32::from_le_bytes(record[12..16].try_into().unwrap());
        let channel = record[16];
        let timestamp = u32::from_le_bytes(record[24..28].try_into().unwrap());

        records.insert(
            0,
            IdrRecord {
                address: record_addr,
                frame_index,
                channel,
                timestamp_unix: timestamp,
                timestamp_readable: format_timestamp(timestamp),
            },
        );

        match rfind(&chunk, SIGNATURE, sig_pos) {
            Some(p) => sig_pos = p,
            None => break,
        }
    }

    info!("Parsed {} IDR records for block at 0x{:x}", records.len(), block_start);
    Ok(records)
}

/// Finds the last occurrence of `needle` in `haystack[..before]`.
fn rfind(haystack: &[u8], needle: &[u8], before: usize) -> Option<usize> {
    if needle.is_empty() || before == 0 || before > haystack.len() {
        return None;
    }
    haystack[..before]
        .windows(needle.len())
        .enumerate()
        .rev()
        .find(|(_, w)| *w == needle)
        .map(|(i, _)| i)
}
