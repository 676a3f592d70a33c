use std::fs;
use std::path::Path;

use clap::{Arg, ArgAction, Command};
use log::{error, info};
use serde_json::json;

use exhume_hikvision::error::HikError;
use exhume_hikvision::image_reader::ImageReader;
use exhume_hikvision::master_sector::{self, MasterDocument};
use exhume_hikvision::{extractor, hikbtree, system_log};

const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;

fn hex_offset(raw: &str) -> Result<u64, String> {
    let trimmed = raw.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(trimmed, 16).map_err(|e| format!("invalid hex offset '{raw}': {e}"))
}

fn write_json_document<T: serde::Serialize>(path: &str, doc: &T) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = fs::File::create(path)?;
    serde_json::to_writer_pretty(file, doc)?;
    Ok(())
}

fn load_master_document(path: &str) -> Result<MasterDocument, HikError> {
    let data = fs::read_to_string(path).map_err(HikError::IoError)?;
    serde_json::from_str(&data).map_err(|e| HikError::ParseError(e.to_string()))
}

fn emit_error(message: &str) {
    error!("{message}");
    println!("{}", json!({"type": "error", "message": message}));
}

fn run_master(image: &str, output_file: &str) -> i32 {
    let mut reader = match ImageReader::open(image) {
        Ok(r) => r,
        Err(e) => {
            emit_error(&e.to_string());
            return EXIT_ERROR;
        }
    };

    let result = master_sector::parse(&mut reader);
    reader.close();

    match result {
        Ok(doc) => {
            if let Err(e) = write_json_document(output_file, &doc) {
                emit_error(&e.to_string());
                return EXIT_ERROR;
            }
            info!("Master sector analysis written to {output_file}");
            println!(
                "{}",
                json!({
                    "type": "master_complete",
                    "success": true,
                    "output_file": output_file,
                    "extra_offset": doc.master_sector.extra_offset,
                })
            );
            EXIT_SUCCESS
        }
        Err(e) => {
            emit_error(&e.to_string());
            EXIT_ERROR
        }
    }
}

fn run_hikbtree(image: &str, master_file: &str, output_file: &str, extra_offset_arg: Option<u64>) -> i32 {
    let master_doc = match load_master_document(master_file) {
        Ok(d) => d,
        Err(e) => {
            emit_error(&e.to_string());
            return EXIT_ERROR;
        }
    };
    let extra_offset = extra_offset_arg.unwrap_or(master_doc.master_sector.extra_offset);

    let mut reader = match ImageReader::open(image) {
        Ok(r) => r,
        Err(e) => {
            emit_error(&e.to_string());
            return EXIT_ERROR;
        }
    };

    let result = hikbtree::parse(&mut reader, &master_doc.master_sector, extra_offset);
    reader.close();

    match result {
        Ok(doc) => {
            if let Err(e) = write_json_document(output_file, &doc) {
                emit_error(&e.to_string());
                return EXIT_ERROR;
            }
            info!("HIKBTREE analysis written to {output_file}");
            println!(
                "{}",
                json!({"type": "hikbtree_complete", "success": true, "output_file": output_file})
            );
            EXIT_SUCCESS
        }
        Err(e) => {
            emit_error(&e.to_string());
            EXIT_ERROR
        }
    }
}

fn run_logs(image: &str, master_file: &str, output_file: &str, extra_offset_arg: Option<u64>) -> i32 {
    let master_doc = match load_master_document(master_file) {
        Ok(d) => d,
        Err(e) => {
            emit_error(&e.to_string());
            return EXIT_ERROR;
        }
    };
    let extra_offset = extra_offset_arg.unwrap_or(master_doc.master_sector.extra_offset);

    let mut reader = match ImageReader::open(image) {
        Ok(r) => r,
        Err(e) => {
            emit_error(&e.to_string());
            return EXIT_ERROR;
        }
    };

    let result = system_log::parse(&mut reader, &master_doc.master_sector, extra_offset);
    reader.close();

    match result {
        Ok(doc) => {
            if let Err(e) = write_json_document(output_file, &doc) {
                emit_error(&e.to_string());
                return EXIT_ERROR;
            }
            info!("System log analysis written to {output_file}");
            println!(
                "{}",
                json!({"type": "logs_complete", "success": true, "output_file": output_file})
            );
            EXIT_SUCCESS
        }
        Err(e) => {
            emit_error(&e.to_string());
            EXIT_ERROR
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_extract(
    image: &str,
    master_file: &str,
    offset_hex: &str,
    output_dir: &str,
    extra_offset_arg: Option<u64>,
) -> i32 {
    let master_doc = match load_master_document(master_file) {
        Ok(d) => d,
        Err(e) => {
            emit_error(&e.to_string());
            return EXIT_ERROR;
        }
    };
    let extra_offset = extra_offset_arg.unwrap_or(master_doc.master_sector.extra_offset);
    let data_block_size = master_doc.master_sector.data_block_size.value;

    let offset = match hex_offset(offset_hex) {
        Ok(o) => o,
        Err(e) => {
            emit_error(&e);
            return EXIT_ERROR;
        }
    };

    let mut reader = match ImageReader::open(image) {
        Ok(r) => r,
        Err(e) => {
            emit_error(&e.to_string());
            return EXIT_ERROR;
        }
    };

    let result = extractor::extract_block(
        &mut reader,
        offset,
        extra_offset,
        data_block_size,
        output_dir,
        offset_hex,
    );
    reader.close();

    match result {
        Ok(r) => {
            println!(
                "{}",
                json!({
                    "type": "extract_complete",
                    "path": r.output_path.to_string_lossy(),
                    "nal_unit_count": r.nal_unit_count,
                    "block_start": format!("0x{:x}", r.block_start),
                    "block_end": format!("0x{:x}", r.block_end),
                })
            );
            EXIT_SUCCESS
        }
        Err(e) => {
            emit_error(&e.to_string());
            EXIT_ERROR
        }
    }
}

fn extra_offset_arg() -> Arg {
    Arg::new("extra-offset")
        .long("extra-offset")
        .value_parser(clap_num::maybe_hex::<u64>)
        .required(false)
        .help("Override the alignment offset instead of reading it from the master document.")
}

fn main() {
    let matches = Command::new("exhume-hikvision")
        .version(clap::crate_version!())
        .author("ForensicXlab")
        .about("Forensic reader for Hikvision DVR disk images.")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("master")
                .about("Locate and decode the Master Sector.")
                .arg(Arg::new("image").short('i').long("image").required(true))
                .arg(Arg::new("output").short('o').long("output").required(true)),
        )
        .subcommand(
            Command::new("hikbtree")
                .about("Walk the HIKBTREE index.")
                .arg(Arg::new("image").short('i').long("image").required(true))
                .arg(Arg::new("master").short('m').long("master").required(true))
                .arg(Arg::new("output").short('o').long("output").required(true))
                .arg(extra_offset_arg()),
        )
        .subcommand(
            Command::new("logs")
                .about("Extract chronologically ordered system log entries.")
                .arg(Arg::new("image").short('i').long("image").required(true))
                .arg(Arg::new("master").short('m').long("master").required(true))
                .arg(Arg::new("output").short('o').long("output").required(true))
                .arg(extra_offset_arg()),
        )
        .subcommand(
            Command::new("extract")
                .about("Carve a single video data block as raw H.264.")
                .arg(Arg::new("image").short('i').long("image").required(true))
                .arg(Arg::new("master").short('m').long("master").required(true))
                .arg(
                    Arg::new("offset")
                        .long("offset")
                        .required(true)
                        .help("Hex offset (with or without 0x prefix) of the data block."),
                )
                .arg(
                    Arg::new("output-dir")
                        .long("output-dir")
                        .default_value("video_exports"),
                )
                .arg(extra_offset_arg()),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Enable debug-level logging."),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    env_logger::Builder::from_default_env()
        .filter_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let exit_code = match matches.subcommand() {
        Some(("master", sub)) => run_master(
            sub.get_one::<String>("image").unwrap(),
            sub.get_one::<String>("output").unwrap(),
        ),
        Some(("hikbtree", sub)) => run_hikbtree(
            sub.get_one::<String>("image").unwrap(),
            sub.get_one::<String>("master").unwrap(),
            sub.get_one::<String>("output").unwrap(),
            sub.get_one::<u64>("extra-offset").copied(),
        ),
        Some(("logs", sub)) => run_logs(
            sub.get_one::<String>("image").unwrap(),
            sub.get_one::<String>("master").unwrap(),
            sub.get_one::<String>("output").unwrap(),
            sub.get_one::<u64>("extra-offset").copied(),
        ),
        Some(("extract", sub)) => run_extract(
            sub.get_one::<String>("image").unwrap(),
            sub.get_one::<String>("master").unwrap(),
            sub.get_one::<String>("offset").unwrap(),
            sub.get_one::<String>("output-dir").unwrap(),
            sub.get_one::<u64>("extra-offset").copied(),
        ),
        _ => {
            error!("no subcommand given");
            EXIT_ERROR
        }
    };

    std::process::exit(exit_code);
}
