//! Master Sector parser.
//!
//! Anchors the whole analysis: locates the `HIKVISION@HANGZHOU` signature
//! near the start of the image and derives `extra_offset`, the alignment
//! correction added to every other relative offset in the filesystem.

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{HikError, Result};
use crate::field::{format_bytes, Field};
use crate::image_reader::{ImageInfo, ImageReader};

const SIGNATURE: &[u8] = b"HIKVISION@HANGZHOU";
const SEARCH_START_OFFSET: u64 = 0x200;
const SEARCH_WINDOW: usize = 4096;
const DESCRIPTOR_SIZE: usize = 512;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawField<T> {
    pub value: T,
    pub value_hex: String,
    pub address: u64,
    pub address_hex: String,
    pub raw_bytes: String,
}

impl<T: std::fmt::LowerHex + Copy> RawField<T> {
    fn new(value: T, address: u64, raw: &[u8]) -> Self {
        RawField {
            value,
            value_hex: format!("0x{:x}", value),
            address,
            address_hex: format!("0x{:x}", address),
            raw_bytes: format_bytes(raw),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInitTime {
    pub value_unix: u32,
    pub value_readable: String,
    pub address: u64,
    pub address_hex: String,
    pub raw_bytes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterRecord {
    pub extra_offset: u64,
    pub signature_address: u64,
    pub disk_capacity: RawField<u64>,
    pub system_logs_offset: RawField<u64>,
    pub system_logs_size: RawField<u64>,
    pub video_data_offset: RawField<u64>,
    pub data_block_size: RawField<u64>,
    pub total_data_blocks: RawField<u32>,
    pub hikbtree1_offset: RawField<u64>,
    pub hikbtree1_size: RawField<u32>,
    pub hikbtree2_offset: RawField<u64>,
    pub hikbtree2_size: RawField<u32>,
    pub system_init_time: SystemInitTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterDocument {
    pub image_info: ImageInfo,
    pub master_sector: MasterRecord,
}

fn read_u64(block: &[u8], base_addr: u64, offset: usize) -> Result<(u64, u64, Vec<u8>)> {
    let raw = block.get(offset..offset + 8).ok_or(HikError::TruncatedField {
        field: "master_sector_u64",
        address: base_addr + offset as u64,
        expected: 8,
        got: block.len().saturating_sub(offset),
    })?;
    let val = u64::from_le_bytes(raw.try_into().unwrap());
    Ok((val, base_addr + offset as u64, raw.to_vec()))
}

fn read_u32(block: &[u8], base_addr: u64, offset: usize) -> Result<(u32, u64, Vec<u8>)> {
    let raw = block.get(offset..offset + 4).ok_or(HikError::TruncatedField {
        field: "master_sector_u32",
        address: base_addr + offset as u64,
        expected: 4,
        got: block.len().saturating_sub(offset),
    })?;
    let val = u32::from_le_bytes(raw.try_into().unwrap());
    Ok((val, base_addr + offset as u64, raw.to_vec()))
}

/// Locates the Master Sector signature and decodes its fixed-layout
/// descriptor. Returns the full record (including `extra_offset`, which
/// every other parser needs).
pub fn parse(reader: &mut ImageReader) -> Result<MasterDocument> {
    info!("Locating the Master Sector signature");
    let search_block = reader.read(SEARCH_START_OFFSET, SEARCH_WINDOW)?;

    let sig_index = find(&search_block, SIGNATURE).ok_or(HikError::SignatureNotFound {
        window_start: SEARCH_START_OFFSET,
    })?;

    let signature_address = SEARCH_START_OFFSET + sig_index as u64;
    let extra_offset = signature_address - SEARCH_START_OFFSET;
    info!(
        "Found signature at 0x{:x}, extra_offset = 0x{:x}",
        signature_address, extra_offset
    );

    let descriptor = reader.read(signature_address, DESCRIPTOR_SIZE)?;
    if descriptor.len() < DESCRIPTOR_SIZE {
        return Err(HikError::TruncatedField {
            field: "master_sector_descriptor",
            address: signature_address,
            expected: DESCRIPTOR_SIZE,
            got: descriptor.len(),
        });
    }

    // Displacements are relative to the byte just after the signature.
    let mut offset = SIGNATURE.len();

    offset += 38;
    let (disk_capacity_v, disk_capacity_a, disk_capacity_raw) =
        read_u64(&descriptor, signature_address, offset)?;

    offset += 8 + 16;
    let (logs_off_v, logs_off_a, logs_off_raw) = read_u64(&descriptor, signature_address, offset)?;

    offset += 8;
    let (logs_size_v, logs_size_a, logs_size_raw) =
        read_u64(&descriptor, signature_address, offset)?;

    offset += 8 + 8;
    let (video_off_v, video_off_a, video_off_raw) =
        read_u64(&descriptor, signature_address, offset)?;

    offset += 8 + 8;
    let (block_size_v, block_size_a, block_size_raw) =
        read_u64(&descriptor, signature_address, offset)?;

    offset += 8;
    let (total_blocks_v, total_blocks_a, total_blocks_raw) =
        read_u32(&descriptor, signature_address, offset)?;

    offset += 4 + 4;
    let (hb1_off_v, hb1_off_a, hb1_off_raw) = read_u64(&descriptor, signature_address, offset)?;

    offset += 8;
    let (hb1_size_v, hb1_size_a, hb1_size_raw) = read_u32(&descriptor, signature_address, offset)?;

    offset += 4 + 4;
    let (hb2_off_v, hb2_off_a, hb2_off_raw) = read_u64(&descriptor, signature_address, offset)?;

    offset += 8;
    let (hb2_size_v, hb2_size_a, hb2_size_raw) = read_u32(&descriptor, signature_address, offset)?;

    offset += 4 + 60;
    let (init_time_v, init_time_a, init_time_raw) =
        read_u32(&descriptor, signature_address, offset)?;

    let master_sector = MasterRecord {
        extra_offset,
        signature_address,
        disk_capacity: RawField::new(disk_capacity_v, disk_capacity_a, &disk_capacity_raw),
        system_logs_offset: RawField::new(logs_off_v, logs_off_a, &logs_off_raw),
        system_logs_size: RawField::new(logs_size_v, logs_size_a, &logs_size_raw),
        video_data_offset: RawField::new(video_off_v, video_off_a, &video_off_raw),
        data_block_size: RawField::new(block_size_v, block_size_a, &block_size_raw),
        total_data_blocks: RawField::new(total_blocks_v, total_blocks_a, &total_blocks_raw),
        hikbtree1_offset: RawField::new(hb1_off_v, hb1_off_a, &hb1_off_raw),
        hikbtree1_size: RawField::new(hb1_size_v, hb1_size_a, &hb1_size_raw),
        hikbtree2_offset: RawField::new(hb2_off_v, hb2_off_a, &hb2_off_raw),
        hikbtree2_size: RawField::new(hb2_size_v, hb2_size_a, &hb2_size_raw),
        system_init_time: SystemInitTime {
            value_unix: init_time_v,
            value_readable: Field::timestamp(init_time_v, init_time_a).readable,
            address: init_time_a,
            address_hex: format!("0x{:x}", init_time_a),
            raw_bytes: format_bytes(&init_time_raw),
        },
    };

    Ok(MasterDocument {
        image_info: reader.image_info(),
        master_sector,
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a 512-byte descriptor starting right at the signature, with
    /// every field placed at its spec-mandated displacement.
    fn build_descriptor(
        disk_capacity: u64,
        logs_offset: u64,
        logs_size: u64,
        video_offset: u64,
        block_size: u64,
        total_blocks: u32,
        hb1_offset: u64,
        hb1_size: u32,
        hb2_offset: u64,
        hb2_size: u32,
        init_time: u32,
    ) -> Vec<u8> {
        let mut buf = vec![0u8; DESCRIPTOR_SIZE];
        buf[0..SIGNATURE.len()].copy_from_slice(SIGNATURE);
        let mut offset = SIGNATURE.len();

        offset += 38;
        buf[offset..offset + 8].copy_from_slice(&disk_capacity.to_le_bytes());

        offset += 8 + 16;
        buf[offset..offset + 8].copy_from_slice(&logs_offset.to_le_bytes());

        offset += 8;
        buf[offset..offset + 8].copy_from_slice(&logs_size.to_le_bytes());

        offset += 8 + 8;
        buf[offset..offset + 8].copy_from_slice(&video_offset.to_le_bytes());

        offset += 8 + 8;
        buf[offset..offset + 8].copy_from_slice(&block_size.to_le_bytes());

        offset += 8;
        buf[offset..offset + 4].copy_from_slice(&total_blocks.to_le_bytes());

        offset += 4 + 4;
        buf[offset..offset + 8].copy_from_slice(&hb1_offset.to_le_bytes());

        offset += 8;
        buf[offset..offset + 4].copy_from_slice(&hb1_size.to_le_bytes());

        offset += 4 + 4;
        buf[offset..offset + 8].copy_from_slice(&hb2_offset.to_le_bytes());

        offset += 8;
        buf[offset..offset + 4].copy_from_slice(&hb2_size.to_le_bytes());

        offset += 4 + 60;
        buf[offset..offset + 4].copy_from_slice(&init_time.to_le_bytes());

        buf
    }

    #[test]
    fn displacements_round_trip() {
        let descriptor = build_descriptor(
            0x1_0000_0000,
            0x1000,
            0x2000,
            0x3000,
            0x4000,
            7,
            0x5000,
            8,
            0x6000,
            9,
            1_609_459_200,
        );

        // Decode using the same offset walk as `parse`, against an image
        // whose signature sits at address 0 for simplicity.
        let mut offset = SIGNATURE.len();
        offset += 38;
        assert_eq!(
            u64::from_le_bytes(descriptor[offset..offset + 8].try_into().unwrap()),
            0x1_0000_0000
        );
        offset += 8 + 16;
        assert_eq!(
            u64::from_le_bytes(descriptor[offset..offset + 8].try_into().unwrap()),
            0x1000
        );
        offset += 8;
        assert_eq!(
            u64::from_le_bytes(descriptor[offset..offset + 8].try_into().unwrap()),
            0x2000
        );
        offset += 8 + 8;
        assert_eq!(
            u64::from_le_bytes(descriptor[offset..offset + 8].try_into().unwrap()),
            0x3000
        );
        offset += 8 + 8;
        assert_eq!(
            u64::from_le_bytes(descriptor[offset..offset + 8].try_into().unwrap()),
            0x4000
        );
        offset += 8;
        assert_eq!(
            u32::from_le_bytes(descriptor[offset..offset + 4].try_into().unwrap()),
            7
        );
        offset += 4 + 4;
        assert_eq!(
            u64::from_le_bytes(descriptor[offset..offset + 8].try_into().unwrap()),
            0x5000
        );
        offset += 8;
        assert_eq!(
            u32::from_le_bytes(descriptor[offset..offset + 4].try_into().unwrap()),
            8
        );
        offset += 4 + 4;
        assert_eq!(
            u64::from_le_bytes(descriptor[offset..offset + 8].try_into().unwrap()),
            0x6000
        );
        offset += 8;
        assert_eq!(
            u32::from_le_bytes(descriptor[offset..offset + 4].try_into().unwrap()),
            9
        );
        offset += 4 + 60;
        assert_eq!(
            u32::from_le_bytes(descriptor[offset..offset + 4].try_into().unwrap()),
            1_609_459_200
        );
    }

    #[test]
    fn find_locates_signature_anywhere_in_window() {
        let mut window = vec![0u8; 4096];
        window[256..256 + SIGNATURE.len()].copy_from_slice(SIGNATURE);
        assert_eq!(find(&window, SIGNATURE), Some(256));
    }

    #[test]
    fn find_returns_none_when_signature_absent() {
        let window = vec![0u8; 4096];
        assert_eq!(find(&window, SIGNATURE), None);
    }
}
