//! End-to-end scenarios over synthetic images, covering spec section 8's
//! worked examples: master anchor offset, HIKBTREE page-list offset 80,
//! exception/operation log decoding, and IDR tail-scan + NAL carving.

use std::io::Write;

use exhume_hikvision::{extractor, hikbtree, master_sector, system_log, ImageReader};

const SIGNATURE: &[u8] = b"HIKVISION@HANGZHOU";

/// Writes `bytes` at `offset` into `buf`, growing it with zeros as needed.
fn place(buf: &mut Vec<u8>, offset: usize, bytes: &[u8]) {
    let end = offset + bytes.len();
    if buf.len() < end {
        buf.resize(end, 0);
    }
    buf[offset..end].copy_from_slice(bytes);
}

/// Writes a full Master Sector descriptor at `sig_addr`, using the exact
/// displacement sequence the parser walks.
#[allow(clippy::too_many_arguments)]
fn write_master_descriptor(
    buf: &mut Vec<u8>,
    sig_addr: usize,
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
) {
    place(buf, sig_addr, SIGNATURE);
    let mut offset = sig_addr + SIGNATURE.len();

    offset += 38;
    place(buf, offset, &disk_capacity.to_le_bytes());
    offset += 8 + 16;
    place(buf, offset, &logs_offset.to_le_bytes());
    offset += 8;
    place(buf, offset, &logs_size.to_le_bytes());
    offset += 8 + 8;
    place(buf, offset, &video_offset.to_le_bytes());
    offset += 8 + 8;
    place(buf, offset, &block_size.to_le_bytes());
    offset += 8;
    place(buf, offset, &total_blocks.to_le_bytes());
    offset += 4 + 4;
    place(buf, offset, &hb1_offset.to_le_bytes());
    offset += 8;
    place(buf, offset, &hb1_size.to_le_bytes());
    offset += 4 + 4;
    place(buf, offset, &hb2_offset.to_le_bytes());
    offset += 8;
    place(buf, offset, &hb2_size.to_le_bytes());
    offset += 4 + 60;
    place(buf, offset, &init_time.to_le_bytes());

    // Ensure the 512-byte descriptor window the parser reads is fully
    // present even past the last field.
    let descriptor_end = sig_addr + 512;
    if buf.len() < descriptor_end {
        buf.resize(descriptor_end, 0);
    }
}

fn write_hikbtree_page_list_entry(buf: &mut Vec<u8>, list_addr: usize, slot: usize, page_offset: u64, channel: u8) {
    let entry_addr = list_addr + 80 + slot * 48;
    place(buf, entry_addr, &page_offset.to_le_bytes());
    place(buf, entry_addr + 17, &[channel]);
    place(buf, entry_addr + 24, &1u32.to_le_bytes());
    place(buf, entry_addr + 28, &2u32.to_le_bytes());
    place(buf, entry_addr + 32, &0u64.to_le_bytes());
}

fn write_hikbtree_page(buf: &mut Vec<u8>, page_addr: usize, next_page_offset: u64) {
    place(buf, page_addr + 16, &next_page_offset.to_le_bytes());
    let entry_addr = page_addr + 80;
    place(buf, entry_addr, &[0xFFu8; 8]);
    place(buf, entry_addr + 8, &[0u8; 8]);
    place(buf, entry_addr + 17, &[3u8]);
    place(buf, entry_addr + 24, &10u32.to_le_bytes());
    place(buf, entry_addr + 28, &20u32.to_le_bytes());
    place(buf, entry_addr + 32, &0u64.to_le_bytes());
    // Zero bytes just after (default-filled) terminate the entry run.
    let tail = page_addr + 4096;
    if buf.len() < tail {
        buf.resize(tail, 0);
    }
}

fn write_log_entry(buf: &mut Vec<u8>, addr: usize, ts: u32, log_type: u16, payload: &[u8]) -> usize {
    place(buf, addr, b"RATS\x14\x00\x00\x00");
    place(buf, addr + 8, &ts.to_le_bytes());
    place(buf, addr + 12, &log_type.to_le_bytes());
    place(buf, addr + 14, payload);
    addr + 14 + payload.len()
}

fn write_idr_record(buf: &mut Vec<u8>, addr: usize, frame_index: u32, channel: u8, ts: u32) {
    place(buf, addr, b"OFNI");
    place(buf, addr + 4, &56u32.to_le_bytes());
    place(buf, addr + 12, &frame_index.to_le_bytes());
    place(buf, addr + 16, &[channel]);
    place(buf, addr + 24, &ts.to_le_bytes());
}

struct SyntheticImage {
    extra_offset: u64,
    hikbtree1_offset: u64,
    system_logs_offset: u64,
    system_logs_size: u64,
    video_data_offset: u64,
    data_block_size: u64,
    path: std::path::PathBuf,
    _tempdir: tempfile::TempDir,
}

/// Builds one synthetic disk image covering the master sector, a two-page
/// HIKBTREE, a two-entry system log, and a one-block video region with an
/// IDR table and NAL payload, then writes it to a temp file.
fn build_synthetic_image() -> SyntheticImage {
    let mut buf = vec![0u8; 0x4000];

    const SIG_ADDR: usize = 0x300;
    const EXTRA_OFFSET: u64 = 0x100; // SIG_ADDR - SEARCH_START_OFFSET(0x200)

    const HIKBTREE1_OFFSET: u64 = 0x10000;
    const SYSTEM_LOGS_OFFSET: u64 = 0x20000;
    const VIDEO_DATA_OFFSET: u64 = 0x100000;
    const DATA_BLOCK_SIZE: u64 = 0x100000;

    let hikbtree_header_addr = (HIKBTREE1_OFFSET + EXTRA_OFFSET) as usize;
    let page_list_relative = 0x11000u64;
    let footer_relative = 0x12000u64;
    let page1_relative = 0x13000u64;
    let page2_relative = 0x14000u64;

    place(&mut buf, hikbtree_header_addr, b"HIKBTREE");
    let sig_len = 8usize;
    place(
        &mut buf,
        hikbtree_header_addr + sig_len + 36,
        &1_700_000_000u32.to_le_bytes(),
    );
    place(
        &mut buf,
        hikbtree_header_addr + sig_len + 40,
        &footer_relative.to_le_bytes(),
    );
    place(
        &mut buf,
        hikbtree_header_addr + sig_len + 56,
        &page_list_relative.to_le_bytes(),
    );
    place(
        &mut buf,
        hikbtree_header_addr + sig_len + 64,
        &page1_relative.to_le_bytes(),
    );

    let page_list_addr = (page_list_relative + EXTRA_OFFSET) as usize;
    place(&mut buf, page_list_addr, &2u32.to_le_bytes());
    write_hikbtree_page_list_entry(&mut buf, page_list_addr, 0, page1_relative, 1);
    write_hikbtree_page_list_entry(&mut buf, page_list_addr, 1, page2_relative, 2);

    let page1_addr = (page1_relative + EXTRA_OFFSET) as usize;
    write_hikbtree_page(&mut buf, page1_addr, page2_relative);
    let page2_addr = (page2_relative + EXTRA_OFFSET) as usize;
    write_hikbtree_page(&mut buf, page2_addr, u64::MAX);

    let footer_addr = (footer_relative + EXTRA_OFFSET) as usize;
    place(&mut buf, footer_addr, &[0xFFu8; 8]);
    place(&mut buf, footer_addr + 8, &page2_relative.to_le_bytes());

    let logs_addr = (SYSTEM_LOGS_OFFSET + EXTRA_OFFSET) as usize;
    let mut video_loss_payload = vec![0u8; 80];
    video_loss_payload[0] = 0x27;
    video_loss_payload[68..72].copy_from_slice(&5u32.to_le_bytes());
    let after_first = write_log_entry(&mut buf, logs_addr, 1, 0x0002, &video_loss_payload);

    let mut startup_payload = b"junk DS-7608NI-K2 more junk CCWR1234567890 tail".to_vec();
    startup_payload.resize(startup_payload.len() + 4, 0);
    let after_second = write_log_entry(&mut buf, after_first, 2, 0x0003, &startup_payload);
    let system_logs_size = (after_second - logs_addr) as u64;

    write_master_descriptor(
        &mut buf,
        SIG_ADDR,
        1_000_000_000,
        SYSTEM_LOGS_OFFSET,
        system_logs_size,
        VIDEO_DATA_OFFSET,
        DATA_BLOCK_SIZE,
        1,
        HIKBTREE1_OFFSET,
        0x2000,
        0,
        0,
        1_700_000_000,
    );

    let block_start = (VIDEO_DATA_OFFSET + EXTRA_OFFSET) as usize;
    let record_offset_in_block = 0xFFF00usize;
    let record_addr = block_start + record_offset_in_block;

    place(&mut buf, block_start, &[0xAA, 0xBB]);
    place(&mut buf, block_start + 2, &[0x00, 0x00, 0x00, 0x01, 0x67, 0x01, 0x02]);
    place(
        &mut buf,
        block_start + 9,
        &[0x00, 0x00, 0x00, 0x01, 0x68, 0x03, 0x04],
    );
    write_idr_record(&mut buf, record_addr, 42, 1, 0x5F00_0000);

    let image_end = block_start + 0x100000;
    if buf.len() < image_end {
        buf.resize(image_end, 0);
    }

    let tempdir = tempfile::tempdir().expect("tempdir");
    let path = tempdir.path().join("disk.img");
    let mut file = std::fs::File::create(&path).expect("create image");
    file.write_all(&buf).expect("write image");

    SyntheticImage {
        extra_offset: EXTRA_OFFSET,
        hikbtree1_offset: HIKBTREE1_OFFSET,
        system_logs_offset: SYSTEM_LOGS_OFFSET,
        system_logs_size,
        video_data_offset: VIDEO_DATA_OFFSET,
        data_block_size: DATA_BLOCK_SIZE,
        path,
        _tempdir: tempdir,
    }
}

#[test]
fn master_anchor_offset_and_round_trip() {
    let image = build_synthetic_image();

    let mut reader = ImageReader::open(image.path.to_str().unwrap()).unwrap();
    let doc1 = master_sector::parse(&mut reader).unwrap();
    let doc2 = master_sector::parse(&mut reader).unwrap();

    assert_eq!(doc1.master_sector.extra_offset, 0x100);
    assert_eq!(doc1.master_sector.signature_address, 0x300);
    assert_eq!(
        serde_json::to_string(&doc1).unwrap(),
        serde_json::to_string(&doc2).unwrap()
    );
}

#[test]
fn hikbtree_page_list_uses_offset_eighty() {
    let image = build_synthetic_image();
    let mut reader = ImageReader::open(image.path.to_str().unwrap()).unwrap();
    let master_doc = master_sector::parse(&mut reader).unwrap();
    assert_eq!(master_doc.master_sector.hikbtree1_offset.value, image.hikbtree1_offset);

    let doc = hikbtree::parse(&mut reader, &master_doc.master_sector, image.extra_offset).unwrap();
    assert_eq!(doc.page_list_summary.page_metadata.len(), 2);

    let page_list_addr = doc.header.page_list_address.value + image.extra_offset;
    assert_eq!(
        doc.page_list_summary.page_metadata[0].page_offset.address,
        page_list_addr + 80
    );
    assert_eq!(
        doc.page_list_summary.page_metadata[1].page_offset.address,
        page_list_addr + 128
    );

    assert_eq!(doc.pages.len(), 2);
    let page1 = &doc.pages["page_1"];
    let page2 = &doc.pages["page_2"];
    assert!(!page1.is_last_page);
    assert!(page2.is_last_page);
    assert_eq!(page1.entries.len(), 1);
    assert_eq!(page2.entries.len(), 1);
}

#[test]
fn system_log_decodes_video_loss_and_startup_in_order() {
    let image = build_synthetic_image();
    let mut reader = ImageReader::open(image.path.to_str().unwrap()).unwrap();
    let master_doc = master_sector::parse(&mut reader).unwrap();
    assert_eq!(master_doc.master_sector.system_logs_offset.value, image.system_logs_offset);
    assert_eq!(master_doc.master_sector.system_logs_size.value, image.system_logs_size);

    let doc = system_log::parse(&mut reader, &master_doc.master_sector, image.extra_offset).unwrap();
    assert_eq!(doc.system_logs.len(), 2);
    assert!(doc.system_logs[0].address < doc.system_logs[1].address);

    match &doc.system_logs[0].description {
        system_log::LogDescription::VideoException { details, .. } => {
            assert_eq!(details.exception_type, "Video Loss");
            assert_eq!(details.channel, 5);
        }
        other => panic!("unexpected description: {other:?}"),
    }
    match &doc.system_logs[1].description {
        system_log::LogDescription::SystemStartup { details, .. } => {
            assert_eq!(details.model_number, "DS-7608NI-K2");
            assert_eq!(details.serial_number, "CCWR1234567890");
        }
        other => panic!("unexpected description: {other:?}"),
    }
}

#[test]
fn idr_tail_scan_and_nal_carving() {
    let image = build_synthetic_image();
    let mut reader = ImageReader::open(image.path.to_str().unwrap()).unwrap();
    let master_doc = master_sector::parse(&mut reader).unwrap();
    assert_eq!(master_doc.master_sector.video_data_offset.value, image.video_data_offset);
    assert_eq!(master_doc.master_sector.data_block_size.value, image.data_block_size);

    let block_start = image.video_data_offset + image.extra_offset;
    let offset_hex = format!("0x{:x}", image.video_data_offset);
    let output_dir = image.path.parent().unwrap().join("video_exports");

    let result = extractor::extract_block(
        &mut reader,
        image.video_data_offset,
        image.extra_offset,
        image.data_block_size,
        output_dir.to_str().unwrap(),
        &offset_hex,
    )
    .unwrap();

    assert_eq!(result.block_start, block_start);
    assert_eq!(result.block_end, block_start + 0xFFF00);
    assert_eq!(result.nal_unit_count, 2);

    let cleaned = std::fs::read(&result.output_path).unwrap();
    assert!(cleaned.starts_with(&[0x00, 0x00, 0x00, 0x01]));
    assert!(!cleaned.windows(2).any(|w| w == [0xAA, 0xBB]));
}
