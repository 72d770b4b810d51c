//! dicom-encaps: inspect and extract the frames of encapsulated pixel data.
//!
//! - `dicom-encaps <FILE> info` - transfer syntax, offset tables, frame sizes
//! - `dicom-encaps <FILE> extract -o <DIR>` - frame bytes, plus PNGs for RLE

use std::{
    collections::HashMap,
    fs,
    io::Cursor,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use dicom_encaps::{offset_table, Diagnostics, FrameContext, MarkerSet, RleParams};
use lazy_static::lazy_static;
use regex::Regex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod service;

pub type CommonError = Box<dyn std::error::Error>;
pub type CommonResult<T> = std::result::Result<T, CommonError>;

const RLE_LOSSLESS: &str = "1.2.840.10008.1.2.5";

lazy_static! {
    static ref TRANSFER_SYNTAX_NAMES: HashMap<&'static str, &'static str> = HashMap::from([
        ("1.2.840.10008.1.2.1", "Explicit VR Little Endian"),
        ("1.2.840.10008.1.2.4.50", "JPEG Baseline (Process 1)"),
        ("1.2.840.10008.1.2.4.51", "JPEG Extended (Process 2 & 4)"),
        ("1.2.840.10008.1.2.4.57", "JPEG Lossless, Non-Hierarchical (Process 14)"),
        ("1.2.840.10008.1.2.4.70", "JPEG Lossless, First-Order Prediction"),
        ("1.2.840.10008.1.2.4.80", "JPEG-LS Lossless"),
        ("1.2.840.10008.1.2.4.81", "JPEG-LS Near-Lossless"),
        ("1.2.840.10008.1.2.4.90", "JPEG 2000 Lossless Only"),
        ("1.2.840.10008.1.2.4.91", "JPEG 2000"),
        ("1.2.840.10008.1.2.4.201", "High-Throughput JPEG 2000 Lossless Only"),
        ("1.2.840.10008.1.2.4.202", "High-Throughput JPEG 2000 with RPCL Options Lossless Only"),
        ("1.2.840.10008.1.2.4.203", "High-Throughput JPEG 2000"),
        ("1.2.840.10008.1.2.5", "RLE Lossless"),
    ]);
    static ref JPEG_FAMILY: Regex = Regex::new(r"^1\.2\.840\.10008\.1\.2\.4\.(\d+)$").expect("valid pattern");
}

/// Codec families as far as framing and file naming are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodecFamily {
    Jpeg,
    JpegLs,
    Jpeg2000,
    Rle,
    Other,
}

impl CodecFamily {
    fn from_uid(uid: &str) -> Self {
        if uid == RLE_LOSSLESS {
            return CodecFamily::Rle;
        }

        let process = JPEG_FAMILY
            .captures(uid)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok());

        match process {
            Some(50..=70) => CodecFamily::Jpeg,
            Some(80 | 81) => CodecFamily::JpegLs,
            Some(90..=93 | 201..=203) => CodecFamily::Jpeg2000,
            _ => CodecFamily::Other,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            CodecFamily::Jpeg => "jpg",
            CodecFamily::JpegLs => "jls",
            CodecFamily::Jpeg2000 => "j2k",
            CodecFamily::Rle => "rle",
            CodecFamily::Other => "bin",
        }
    }
}

#[derive(Parser)]
#[command(name = "dicom-encaps")]
#[command(version, about = "Inspect and extract encapsulated DICOM pixel data", long_about = None)]
struct Cli {
    /// DICOM Part 10 file, explicit VR little endian
    file: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Treat extra frames and extra RLE segment data as errors
    #[arg(long, global = true)]
    strict: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the transfer syntax, offset tables and frame sizes
    Info,

    /// Write every frame to a directory
    Extract {
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Skip decoding RLE frames to PNG
        #[arg(long)]
        no_images: bool,
    },
}

fn frame_context(info: &service::PixelInfo, strict: bool) -> FrameContext {
    let mut ctx = FrameContext::new().with_markers(MarkerSet::jpeg_family()).strict(strict);

    if let Some(number_of_frames) = info.number_of_frames {
        ctx = ctx.with_number_of_frames(number_of_frames);
    }

    if let Some(table) = info.extended.clone() {
        ctx = ctx.with_extended(table);
    }

    ctx
}

fn report(diag: &Diagnostics) {
    for entry in diag.entries() {
        println!("  warning: {}", entry);
    }
}

fn show_info(buffer: &[u8], info: &service::PixelInfo, strict: bool) -> CommonResult<()> {
    let family = CodecFamily::from_uid(&info.transfer_syntax);
    let name = TRANSFER_SYNTAX_NAMES
        .get(info.transfer_syntax.as_str())
        .copied()
        .unwrap_or("unknown");

    println!("transfer syntax: {} ({})", info.transfer_syntax, name);
    println!(
        "image: {} x {}, {} sample(s), {} bits allocated, {}",
        info.rows, info.columns, info.samples_per_pixel, info.bits_allocated, info.photometric_interpretation
    );

    let (start, length) = match info.pixel_data {
        Some(v) => v,
        None => {
            println!("no encapsulated pixel data");
            return Ok(());
        }
    };

    let pixel_data = &buffer[start..start + length];
    let mut diag = Diagnostics::new();

    let mut fp = Cursor::new(pixel_data);
    let (has_bot, offsets) = offset_table::get_frame_offsets(&mut fp)?;
    let nr_fragments = offset_table::get_nr_fragments(&mut fp, &mut diag)?;

    println!("declared frames: {:?}", info.number_of_frames);
    println!("fragments: {}", nr_fragments);
    if has_bot {
        println!("basic offset table: {:?}", offsets);
    } else {
        println!("basic offset table: empty");
    }
    if let Some(table) = &info.extended {
        println!("extended offset table: {} entries", table.len());
    }

    let mut frames = dicom_encaps::generate_frames(Cursor::new(pixel_data), &frame_context(info, strict))?;
    let mut index = 0;

    loop {
        let frame = match frames.next() {
            Some(frame) => frame?,
            None => break,
        };

        println!(
            "frame {}: {} bytes ({}), starts {}",
            index,
            frame.len(),
            family.extension(),
            dicom_encaps::util::format_hex(&frame[..frame.len().min(4)])
        );
        index += 1;
    }

    diag.extend(frames.into_diagnostics());
    report(&diag);

    Ok(())
}

fn extract(
    buffer: &[u8],
    info: &service::PixelInfo,
    output: &Path,
    images: bool,
    strict: bool,
) -> CommonResult<()> {
    let (start, length) = info.pixel_data.ok_or("no encapsulated pixel data")?;
    let family = CodecFamily::from_uid(&info.transfer_syntax);

    fs::create_dir_all(output)?;

    let pixel_data = &buffer[start..start + length];
    let mut frames = dicom_encaps::generate_frames(Cursor::new(pixel_data), &frame_context(info, strict))?;

    let params = RleParams::new(info.rows, info.columns, info.samples_per_pixel, info.bits_allocated).strict(strict);
    let mut diag = Diagnostics::new();
    let mut index = 0;

    loop {
        let frame = match frames.next() {
            Some(frame) => frame?,
            None => break,
        };

        let path = output.join(format!("frame_{:04}.{}", index, family.extension()));
        fs::write(&path, &frame)?;
        tracing::info!(frame = index, bytes = frame.len(), path = %path.display(), "wrote frame");

        if images && family == CodecFamily::Rle {
            let decoded = dicom_encaps::rle::decode_frame(&frame, &params, &mut diag)?;
            let path = output.join(format!("frame_{:04}.png", index));

            if service::write_frame_image(&path, info, &decoded)? {
                tracing::info!(frame = index, path = %path.display(), "wrote image");
            } else {
                tracing::warn!(
                    samples = info.samples_per_pixel,
                    bits = info.bits_allocated,
                    photometric = %info.photometric_interpretation,
                    "no PNG layout for this image"
                );
            }
        }

        index += 1;
    }

    diag.extend(frames.into_diagnostics());
    println!("{} frame(s) written to {}", index, output.display());
    report(&diag);

    Ok(())
}

fn main() -> CommonResult<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("dicom_encaps={}", log_level))),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let file_content = fs::read(&cli.file)?;

    let mut diag = Diagnostics::new();
    let data_elements = service::parse_file(&file_content, &mut diag)?;
    let pixel_info = service::get_pixel_info(&data_elements)?;
    report(&diag);

    match cli.command {
        Commands::Info => show_info(&file_content, &pixel_info, cli.strict),
        Commands::Extract { output, no_images } => {
            extract(&file_content, &pixel_info, &output, !no_images, cli.strict)
        }
    }
}
