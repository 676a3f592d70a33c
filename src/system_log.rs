//! System Log parser: frames the `RATS`-delimited log stream and dispatches
//! each entry to a type-specific sub-decoder.

use log::{info, warn};
use regex::bytes::Regex;
use serde::Serialize;

use crate::error::Result;
use crate::field::{format_bytes, format_timestamp};
use crate::image_reader::{ImageInfo, ImageReader};
use crate::master_sector::MasterRecord;

const SIGNATURE: &[u8] = b"RATS\x14\x00\x00\x00";

#[derive(Debug, Clone, Serialize, Default)]
pub struct LogHeaderInfo {
    pub start_address: Option<u64>,
    pub start_address_hex: Option<String>,
    pub size_bytes: Option<usize>,
    pub raw_hex_preview: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "parsed_type")]
pub enum LogDescription {
    #[serde(rename = "Motion Alarm")]
    MotionAlarm { details: String, raw_hex_preview: String },
    #[serde(rename = "Video Exception")]
    VideoException {
        details: VideoExceptionDetails,
        raw_hex_preview: String,
    },
    #[serde(rename = "System Startup")]
    SystemStartup {
        details: SystemStartupDetails,
        raw_hex_preview: String,
    },
    #[serde(rename = "User Login")]
    UserLogin {
        details: UserLoginDetails,
        raw_hex_preview: String,
    },
    #[serde(rename = "Start Recording Command")]
    StartRecordingCommand { details: String, raw_hex_preview: String },
    #[serde(rename = "Configuration Operation")]
    ConfigurationOperation { details: String, raw_hex_preview: String },
    #[serde(rename = "HDD Information")]
    HddInformation {
        details: HddInformationDetails,
        raw_hex_preview: String,
    },
    #[serde(rename = "Periodic System Statistics")]
    PeriodicSystemStatistics {
        details: PeriodicStatsDetails,
        raw_hex_preview: String,
    },
    #[serde(rename = "Unknown Structure")]
    Generic {
        extracted_strings: Vec<String>,
        raw_hex_preview: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoExceptionDetails {
    pub exception_type: String,
    pub channel: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStartupDetails {
    pub model_number: String,
    pub serial_number: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserLoginDetails {
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HddInformationDetails {
    pub disk_model: String,
    pub serial_number: String,
    pub firmware: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodicStatsDetails {
    pub counter_value_1: u32,
    pub counter_value_2: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub entry_number: usize,
    pub address: u64,
    pub address_hex: String,
    pub timestamp_unix: u32,
    pub timestamp_readable: String,
    pub log_type_code: u16,
    pub log_type_name: String,
    pub description: LogDescription,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogDocument {
    pub image_info: ImageInfo,
    pub log_header_info: LogHeaderInfo,
    pub system_logs: Vec<LogEntry>,
}

fn log_type_name(code: u16) -> &'static str {
    match code {
        0x01 => "Alarm - Motion Detection or other sensor.",
        0x02 => "Exception - An error or unusual event, like Video Loss.",
        0x03 => "Operation - A user or system action, like Login or System Startup.",
        0x04 => "Information - System status reports, like HDD info or Network Stats.",
        _ => "Unknown",
    }
}

/// Parses the whole logs block `[system_logs_offset + extra_offset, +size)`.
/// A size of zero is a valid no-op, per spec.md §4.4.
pub fn parse(
    reader: &mut ImageReader,
    master: &MasterRecord,
    extra_offset: u64,
) -> Result<LogDocument> {
    let logs_offset = master.system_logs_offset.value;
    let logs_size = master.system_logs_size.value as usize;

    if logs_size == 0 {
        warn!("system_logs_size is 0, nothing to parse");
        return Ok(LogDocument {
            image_info: reader.image_info(),
            log_header_info: LogHeaderInfo::default(),
            system_logs: Vec::new(),
        });
    }

    let actual_offset = logs_offset + extra_offset;
    info!(
        "Reading {logs_size} bytes of system logs from 0x{:x}",
        actual_offset
    );
    let block = reader.read(actual_offset, logs_size)?;

    let (log_header_info, system_logs) = parse_block(&block, actual_offset);

    Ok(LogDocument {
        image_info: reader.image_info(),
        log_header_info,
        system_logs,
    })
}

fn parse_block(block: &[u8], base_offset: u64) -> (LogHeaderInfo, Vec<LogEntry>) {
    let first_sig_pos = match find(block, SIGNATURE) {
        Some(pos) => pos,
        None => {
            warn!("No log signatures found in the data block");
            return (LogHeaderInfo::default(), Vec::new());
        }
    };

    let log_header_info = if first_sig_pos > 0 {
        let header_data = &block[..first_sig_pos];
        LogHeaderInfo {
            start_address: Some(base_offset),
            start_address_hex: Some(format!("0x{:x}", base_offset)),
            size_bytes: Some(first_sig_pos),
            raw_hex_preview: Some(format_bytes(&header_data[..header_data.len().min(128)])),
        }
    } else {
        LogHeaderInfo::default()
    };

    let logs_data = &block[first_sig_pos..];
    let logs_start_offset = base_offset + first_sig_pos as u64;
    let entries = parse_entries(logs_data, logs_start_offset);

    (log_header_info, entries)
}

fn parse_entries(logs_data: &[u8], base_offset: u64) -> Vec<LogEntry> {
    let mut entries = Vec::new();
    let mut current_pos = 0usize;
    let mut log_count = 0usize;

    while current_pos < logs_data.len() {
        let sig_pos = match find_from(logs_data, SIGNATURE, current_pos) {
            Some(p) => p,
            None => break,
        };

        let next_sig_pos = find_from(logs_data, SIGNATURE, sig_pos + 1);
        let entry_end = next_sig_pos.unwrap_or(logs_data.len());
        let data_start = sig_pos + SIGNATURE.len();
        if data_start > entry_end {
            current_pos = sig_pos + 1;
            continue;
        }
        let entry_data = &logs_data[data_start..entry_end];

        if entry_data.len() < 6 {
            current_pos = sig_pos + 1;
            continue;
        }

        let timestamp = u32::from_le_bytes(entry_data[0..4].try_into().unwrap());
        let log_type = u16::from_le_bytes(entry_data[4..6].try_into().unwrap());
        let description = decode_description(log_type, &entry_data[6..]);

        let address = base_offset + sig_pos as u64;
        entries.push(LogEntry {
            entry_number: log_count + 1,
            address,
            address_hex: format!("0x{:x}", address),
            timestamp_unix: timestamp,
            timestamp_readable: format_timestamp(timestamp),
            log_type_code: log_type,
            log_type_name: log_type_name(log_type).to_string(),
            description,
        });
        log_count += 1;
        current_pos = sig_pos + 1;
    }

    info!("Found and parsed {log_count} system log entries");
    entries
}

fn decode_description(log_type: u16, payload: &[u8]) -> LogDescription {
    match log_type {
        0x01 => parse_alarm(payload),
        0x02 => parse_exception(payload),
        0x03 => parse_operation(payload),
        0x04 => parse_information(payload),
        _ => parse_generic(payload),
    }
}

fn parse_alarm(payload: &[u8]) -> LogDescription {
    LogDescription::MotionAlarm {
        details: "Motion detected.".to_string(),
        raw_hex_preview: preview(payload, 64),
    }
}

fn parse_exception(payload: &[u8]) -> LogDescription {
    if payload.first() == Some(&0x27) {
        if let Some(raw) = payload.get(68..72) {
            let channel = u32::from_le_bytes(raw.try_into().unwrap());
            return LogDescription::VideoException {
                details: VideoExceptionDetails {
                    exception_type: "Video Loss".to_string(),
                    channel,
                },
                raw_hex_preview: preview(payload, 128),
            };
        }
    }
    parse_generic(payload)
}

fn parse_operation(payload: &[u8]) -> LogDescription {
    if contains(payload, b"DS-") {
        let model_re = Regex::new(r"DS-[\w-]{4,}").unwrap();
        let serial_re = Regex::new(r"CCWR[\w]+").unwrap();
        let model = model_re
            .find(payload)
            .map(|m| String::from_utf8_lossy(m.as_bytes()).to_string())
            .unwrap_or_else(|| "Not Found".to_string());
        let serial = serial_re
            .find(payload)
            .map(|m| String::from_utf8_lossy(m.as_bytes()).to_string())
            .unwrap_or_else(|| "Not Found".to_string());
        return LogDescription::SystemStartup {
            details: SystemStartupDetails {
                model_number: model,
                serial_number: serial,
            },
            raw_hex_preview: preview(payload, 256),
        };
    }
    if contains(payload, b"admin") {
        return LogDescription::UserLogin {
            details: UserLoginDetails {
                username: "admin".to_string(),
            },
            raw_hex_preview: preview(payload, 128),
        };
    }
    if payload.starts_with(&[0x43, 0x00, 0x00, 0x00]) {
        return LogDescription::StartRecordingCommand {
            details: "The DVR initiated video recording.".to_string(),
            raw_hex_preview: preview(payload, 64),
        };
    }
    if payload.starts_with(&[0x54, 0x00, 0x00, 0x00]) {
        return LogDescription::ConfigurationOperation {
            details: "A system configuration was likely checked, saved, or changed.".to_string(),
            raw_hex_preview: preview(payload, 128),
        };
    }
    parse_generic(payload)
}

fn parse_information(payload: &[u8]) -> LogDescription {
    match payload.first() {
        Some(&0xA1) | Some(&0xA2) => parse_hdd_info(payload),
        Some(&0xAA) => parse_system_stats(payload),
        _ => parse_generic(payload),
    }
}

fn parse_hdd_info(payload: &[u8]) -> LogDescription {
    let strings = extract_strings(payload);
    let mut disk_model = "Unknown".to_string();
    let mut serial_number = "Unknown".to_string();
    let mut firmware = "Unknown".to_string();

    for s in &strings {
        if s.starts_with("ST") || s.starts_with("WD") {
            disk_model = s.clone();
        } else if s.len() > 6 && s.chars().any(|c| c.is_ascii_digit()) && s.chars().any(|c| c.is_ascii_alphabetic())
        {
            serial_number = s.clone();
        } else if s.len() >= 4 && s.len() < 8 {
            firmware = s.clone();
        }
    }

    LogDescription::HddInformation {
        details: HddInformationDetails {
            disk_model,
            serial_number,
            firmware,
        },
        raw_hex_preview: preview(payload, 128),
    }
}

fn parse_system_stats(payload: &[u8]) -> LogDescription {
    match (payload.get(52..56), payload.get(88..92)) {
        (Some(c1), Some(c2)) => LogDescription::PeriodicSystemStatistics {
            details: PeriodicStatsDetails {
                counter_value_1: u32::from_le_bytes(c1.try_into().unwrap()),
                counter_value_2: u32::from_le_bytes(c2.try_into().unwrap()),
            },
            raw_hex_preview: preview(payload, 128),
        },
        _ => parse_generic(payload),
    }
}

fn parse_generic(payload: &[u8]) -> LogDescription {
    LogDescription::Generic {
        extracted_strings: extract_strings(payload),
        raw_hex_preview: preview(payload, 128),
    }
}

/// Runs of printable ASCII (0x20-0x7E), length >= 4, containing at least one
/// alphanumeric character.
fn extract_strings(payload: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let mut run_start: Option<usize> = None;

    for (i, &b) in payload.iter().enumerate() {
        let printable = (0x20..=0x7E).contains(&b);
        if printable {
            if run_start.is_none() {
                run_start = Some(i);
            }
        } else if let Some(start) = run_start.take() {
            push_if_valid(&mut out, &payload[start..i]);
        }
    }
    if let Some(start) = run_start {
        push_if_valid(&mut out, &payload[start..]);
    }
    out
}

fn push_if_valid(out: &mut Vec<String>, run: &[u8]) {
    if run.len() < 4 {
        return;
    }
    if !run.iter().any(|b| b.is_ascii_alphanumeric()) {
        return;
    }
    out.push(String::from_utf8_lossy(run).trim().to_string());
}

fn preview(payload: &[u8], len: usize) -> String {
    format_bytes(&payload[..payload.len().min(len)])
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    find_from(haystack, needle, 0)
}

fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}
