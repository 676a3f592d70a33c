//! HIKBTREE parser: header, page-list, per-page entry arrays, and footer.

use log::{debug, info, warn};
use serde::Serialize;

use crate::error::{HikError, Result};
use crate::field::Field;
use crate::image_reader::{ImageInfo, ImageReader};
use crate::master_sector::MasterRecord;

const SIGNATURE: &[u8] = b"HIKBTREE";
const HEADER_SIZE: usize = 256;
const PAGE_LIST_SIZE: usize = 8192;
const PAGE_LIST_ENTRY_START: usize = 80;
const PAGE_LIST_ENTRY_SIZE: usize = 48;
const PAGE_SIZE: usize = 4096;
const PAGE_ENTRY_START: usize = 80;
const PAGE_ENTRY_SIZE: usize = 48;
const FOOTER_SIZE: usize = 32;
const LAST_PAGE_SENTINEL: u64 = 0xFFFF_FFFF_FFFF_FFFF;

#[derive(Debug, Clone, Serialize)]
pub struct HikbtreeHeader {
    pub created_time: Field<u32>,
    pub footer_address: Field<u64>,
    pub page_list_address: Field<u64>,
    pub page_1_address: Field<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageMetadata {
    pub page_number: usize,
    pub page_offset: Field<u64>,
    pub channel: Field<u8>,
    pub first_entry_start_time: Field<u32>,
    pub first_entry_end_time: Field<u32>,
    pub first_entry_data_offset: Field<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageListSummary {
    pub total_pages: Field<u32>,
    pub page_metadata: Vec<PageMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageEntry {
    pub entry_number_in_page: usize,
    pub address: String,
    pub existence: String,
    pub channel: u8,
    pub start_time: Field<u32>,
    pub end_time: Field<u32>,
    pub data_block_offset: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub next_page_address: String,
    pub is_last_page: bool,
    pub entries: Vec<PageEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HikbtreeFooter {
    pub last_page_address: Field<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HikbtreeDocument {
    pub image_info: ImageInfo,
    pub header: HikbtreeHeader,
    pub page_list_summary: PageListSummary,
    pub pages: std::collections::BTreeMap<String, Page>,
    pub footer: HikbtreeFooter,
}

/// Parses the HIKBTREE structure rooted at `master.hikbtree1_offset`.
pub fn parse(
    reader: &mut ImageReader,
    master: &MasterRecord,
    extra_offset: u64,
) -> Result<HikbtreeDocument> {
    let base_offset = master.hikbtree1_offset.value;
    let header = parse_header(reader, base_offset, extra_offset)?;

    let page_list_summary = parse_page_list(
        reader,
        header.page_list_address.value,
        extra_offset,
    )?;

    let mut pages = std::collections::BTreeMap::new();
    for (i, meta) in page_list_summary.page_metadata.iter().enumerate() {
        let page_number = i + 1;
        info!("Parsing page #{page_number} at 0x{:x}", meta.page_offset.value);
        let page = parse_single_page(reader, meta.page_offset.value, extra_offset);
        pages.insert(format!("page_{page_number}"), page);
    }

    let footer = parse_footer(reader, header.footer_address.value, extra_offset)?;

    Ok(HikbtreeDocument {
        image_info: reader.image_info(),
        header,
        page_list_summary,
        pages,
        footer,
    })
}

fn parse_header(reader: &mut ImageReader, base_offset: u64, extra_offset: u64) -> Result<HikbtreeHeader> {
    let data_addr = base_offset + extra_offset;
    info!("Parsing HIKBTREE header at 0x{:x}", data_addr);
    let data = reader.read(data_addr, HEADER_SIZE)?;

    if !data.starts_with(SIGNATURE) {
        return Err(HikError::InvalidSignature {
            expected: "HIKBTREE",
            address: data_addr,
        });
    }

    let sig_len = SIGNATURE.len();

    let created_time_addr = data_addr + sig_len as u64 + 36;
    let created_time = read_u32(&data, sig_len + 36, "created_time", data_addr)?;

    let footer_addr = created_time_addr + 4;
    let footer_address = read_u64(&data, sig_len + 40, "footer_address", data_addr)?;

    let page_list_addr = footer_addr + 8 + 8;
    let page_list_address = read_u64(&data, sig_len + 56, "page_list_address", data_addr)?;

    let page_1_addr = page_list_addr + 8;
    let page_1_address = read_u64(&data, sig_len + 64, "page_1_address", data_addr)?;

    Ok(HikbtreeHeader {
        created_time: Field::timestamp(created_time, created_time_addr),
        footer_address: Field::hex(footer_address, footer_addr),
        page_list_address: Field::hex(page_list_address, page_list_addr),
        page_1_address: Field::hex(page_1_address, page_1_addr),
    })
}

fn parse_page_list(
    reader: &mut ImageReader,
    base_offset: u64,
    extra_offset: u64,
) -> Result<PageListSummary> {
    let data_addr = base_offset + extra_offset;
    info!("Parsing page list at 0x{:x}", data_addr);
    let data = reader.read(data_addr, PAGE_LIST_SIZE)?;

    let total_pages = u32::from_le_bytes(
        data.get(0..4)
            .ok_or(HikError::TruncatedField {
                field: "total_pages",
                address: data_addr,
                expected: 4,
                got: data.len(),
            })?
            .try_into()
            .unwrap(),
    );

    let mut page_metadata = Vec::new();
    let mut cursor = PAGE_LIST_ENTRY_START;
    for i in 0..total_pages as usize {
        if cursor + PAGE_LIST_ENTRY_SIZE > data.len() {
            warn!("Ran out of data in page list after {i} pages");
            break;
        }
        let entry = &data[cursor..cursor + PAGE_LIST_ENTRY_SIZE];
        let entry_addr = data_addr + cursor as u64;

        let page_offset = u64::from_le_bytes(entry[0..8].try_into().unwrap());
        let channel = entry[17];
        let start_time = u32::from_le_bytes(entry[24..28].try_into().unwrap());
        let end_time = u32::from_le_bytes(entry[28..32].try_into().unwrap());
        let first_block_offset = u64::from_le_bytes(entry[32..40].try_into().unwrap());

        debug!("Parsed page list metadata for page #{} at 0x{:x}", i + 1, entry_addr);
        page_metadata.push(PageMetadata {
            page_number: i + 1,
            page_offset: Field::hex(page_offset, entry_addr),
            channel: Field::hex(channel, entry_addr + 17),
            first_entry_start_time: Field::timestamp(start_time, entry_addr + 24),
            first_entry_end_time: Field::timestamp(end_time, entry_addr + 28),
            first_entry_data_offset: Field::hex(first_block_offset, entry_addr + 32),
        });
        cursor += PAGE_LIST_ENTRY_SIZE;
    }

    Ok(PageListSummary {
        total_pages: Field::hex(total_pages, data_addr),
        page_metadata,
    })
}

fn parse_single_page(reader: &mut ImageReader, base_offset: u64, extra_offset: u64) -> Page {
    let data_addr = base_offset + extra_offset;
    let data = match reader.read(data_addr, PAGE_SIZE) {
        Ok(d) => d,
        Err(e) => {
            warn!("Failed to read page at 0x{:x}: {e}", data_addr);
            return Page {
                next_page_address: "0x0".to_string(),
                is_last_page: false,
                entries: Vec::new(),
                warning: Some(e.to_string()),
            };
        }
    };

    if data.len() < 24 {
        warn!("Page at 0x{:x} is truncated", data_addr);
        return Page {
            next_page_address: "0x0".to_string(),
            is_last_page: false,
            entries: Vec::new(),
            warning: Some("truncated page header".to_string()),
        };
    }

    let next_page_offset = u64::from_le_bytes(data[16..24].try_into().unwrap());
    let is_last_page = next_page_offset == LAST_PAGE_SENTINEL;

    let mut entries = Vec::new();
    let mut cursor = PAGE_ENTRY_START;
    let mut entry_num = 0usize;

    while cursor + PAGE_ENTRY_SIZE <= data.len() {
        let entry = &data[cursor..cursor + PAGE_ENTRY_SIZE];
        if entry[0..8] != [0xFFu8; 8] {
            break;
        }

        let existence_bytes = &entry[8..16];
        let channel = entry[17];
        let start_time = u32::from_le_bytes(entry[24..28].try_into().unwrap());
        let end_time = u32::from_le_bytes(entry[28..32].try_into().unwrap());
        let data_offset = u64::from_le_bytes(entry[32..40].try_into().unwrap());
        let entry_addr = data_addr + cursor as u64;

        entries.push(PageEntry {
            entry_number_in_page: entry_num + 1,
            address: format!("0x{:x}", entry_addr),
            existence: if existence_bytes == [0u8; 8] {
                "Has Video Data".to_string()
            } else {
                "No Video/Recording".to_string()
            },
            channel,
            start_time: Field::timestamp(start_time, entry_addr + 24),
            end_time: Field::timestamp(end_time, entry_addr + 28),
            data_block_offset: format!("0x{:x}", data_offset),
        });

        entry_num += 1;
        cursor += PAGE_ENTRY_SIZE;
    }

    Page {
        next_page_address: format!("0x{:x}", next_page_offset),
        is_last_page,
        entries,
        warning: None,
    }
}

fn parse_footer(reader: &mut ImageReader, base_offset: u64, extra_offset: u64) -> Result<HikbtreeFooter> {
    let data_addr = base_offset + extra_offset;
    info!("Parsing HIKBTREE footer at 0x{:x}", data_addr);
    let data = reader.read(data_addr, FOOTER_SIZE)?;

    if data.len() < 16 {
        return Err(HikError::TruncatedField {
            field: "footer",
            address: data_addr,
            expected: FOOTER_SIZE,
            got: data.len(),
        });
    }

    if data[0..8] != [0xFFu8; 8] {
        warn!("Footer at 0x{:x} does not start with expected FF padding", data_addr);
    }

    let last_page_offset = u64::from_le_bytes(data[8..16].try_into().unwrap());
    Ok(HikbtreeFooter {
        last_page_address: Field::hex(last_page_offset, data_addr + 8),
    })
}

fn read_u32(data: &[u8], offset: usize, field: &'static str, base_addr: u64) -> Result<u32> {
    let raw = data
        .get(offset..offset + 4)
        .ok_or(HikError::TruncatedField {
            field,
            address: base_addr + offset as u64,
            expected: 4,
            got: data.len().saturating_sub(offset),
        })?;
    Ok(u32::from_le_bytes(raw.try_into().unwrap()))
}

fn read_u64(data: &[u8], offset: usize, field: &'static str, base_addr: u64) -> Result<u64> {
    let raw = data
        .get(offset..offset + 8)
        .ok_or(HikError::TruncatedField {
            field,
            address: base_addr + offset as u64,
            expected: 8,
            got: data.len().saturating_sub(offset),
        })?;
    Ok(u64::from_le_bytes(raw.try_into().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_list_entry_start_offset_is_eighty_not_seventy_six() {
        // Regression guard: an earlier implementation used 76 and
        // misaligned every entry. See spec.md's Open Questions.
        assert_eq!(PAGE_LIST_ENTRY_START, 80);
        assert_ne!(PAGE_LIST_ENTRY_START, 76);
    }

    #[test]
    fn page_entry_start_offset_is_eighty() {
        assert_eq!(PAGE_ENTRY_START, 80);
    }

    #[test]
    fn live_page_entry_prefix_detection() {
        let mut entry = [0u8; 48];
        entry[0..8].copy_from_slice(&[0xFF; 8]);
        assert_eq!(&entry[0..8], &[0xFFu8; 8]);

        let mut non_live = [0u8; 48];
        non_live[0] = 0x00;
        assert_ne!(&non_live[0..8], &[0xFFu8; 8]);
    }

    #[test]
    fn last_page_sentinel_detection() {
        assert_eq!(LAST_PAGE_SENTINEL, u64::MAX);
    }

    #[test]
    fn existence_flag_all_zero_means_has_video_data() {
        let zero = [0u8; 8];
        let nonzero = [0xAAu8; 8];
        assert_eq!(zero, [0u8; 8]);
        assert_ne!(nonzero, [0u8; 8]);
    }
}
