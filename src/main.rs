//! cimbar command-line front end.
//!
//! Three modes:
//! - `encode <SRC> <OUT>` paints a file into one or more barcode frames
//! - `decode <IMAGES>... --output <FILE>` reads captures back into bytes
//! - `grade <BASELINE> <MESSY>` reports per-symbol/per-color bit errors
//!
//! The codec itself lives in the `codec` crate; this binary only parses
//! arguments, sets up logging, and moves files around.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use codec::deskew::DeskewLevel;
use codec::grade;
use codec::{DecodeOptions, EncodeOptions, Preprocess, Profile};

#[derive(Parser)]
#[command(name = "cimbar", version, about = "color-icon-matrix barcode encoder/decoder")]
struct Cli {
    /// Also write logs to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encode a file into one or more barcode frames.
    Encode {
        /// Data to encode.
        src: PathBuf,
        /// Output image path; multi-frame output appends `_N`.
        out: PathBuf,
        /// Light mode: dark marks on a white background.
        #[arg(long)]
        light: bool,
        /// Color bits per tile (0-3), overriding the preset.
        #[arg(long)]
        colorbits: Option<u32>,
        /// Reed-Solomon redundancy bytes per block, overriding the preset.
        #[arg(long)]
        ecc: Option<u32>,
        /// Wrap the payload in the rateless fountain layer.
        #[arg(long)]
        fountain: bool,
        /// Compress the payload before encoding.
        #[arg(long)]
        compress: bool,
        /// Write symbol and color bits as separate streams.
        #[arg(long)]
        split: bool,
        /// Distinguishes re-encodings of the same payload (0-127).
        #[arg(long, default_value_t = 0)]
        encode_id: u8,
        /// Geometry preset.
        #[arg(long, default_value = "8x8")]
        config: String,
    },
    /// Decode captured frames back into the original bytes.
    Decode {
        /// Images to decode, in order.
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Where to write the decoded bytes.
        #[arg(long, short)]
        output: PathBuf,
        #[arg(long)]
        light: bool,
        #[arg(long)]
        colorbits: Option<u32>,
        #[arg(long)]
        ecc: Option<u32>,
        #[arg(long)]
        fountain: bool,
        #[arg(long)]
        compress: bool,
        #[arg(long)]
        split: bool,
        /// 0 = none, 1 = perspective, 2 = perspective + lens dewarp.
        #[arg(long, default_value_t = 1)]
        deskew: u8,
        /// -1 = auto, 0 = off, 1 = force sharpening.
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        preprocess: i8,
        /// 0 = off, 1 = white balance, 2 = two-pass fit.
        #[arg(long = "color-correct", default_value_t = 0)]
        color_correct: u8,
        #[arg(long, default_value = "8x8")]
        config: String,
    },
    /// Grade a messy decode bit-for-bit against a clean baseline.
    Grade {
        baseline: PathBuf,
        messy: PathBuf,
        /// Bits per tile; defaults to the preset's symbol+color width.
        #[arg(long)]
        bits_per_op: Option<u32>,
        /// Emit the full report as JSON.
        #[arg(long)]
        json: bool,
        #[arg(long, default_value = "8x8")]
        config: String,
    },
}

fn build_profile(config: &str, ecc: Option<u32>, colorbits: Option<u32>) -> Result<Profile> {
    let mut profile = Profile::preset(config)?;
    if let Some(ecc) = ecc {
        profile = profile.with_ecc(ecc);
    }
    if let Some(bits) = colorbits {
        profile = profile.with_color_bits(bits);
    }
    profile.validate()?;
    Ok(profile)
}

/// Output path for frame `i`: `code.png` becomes `code_0.png` and so on.
/// A single frame keeps the name as given.
fn frame_path(out: &Path, index: usize, total: usize) -> PathBuf {
    if total == 1 {
        return out.to_path_buf();
    }
    let stem = out.file_stem().unwrap_or_default().to_string_lossy();
    let ext = out
        .extension()
        .map_or_else(|| "png".into(), |e| e.to_string_lossy());
    out.with_file_name(format!("{stem}_{index}.{ext}"))
}

fn run_encode(src: &Path, out: &Path, profile: &Profile, opts: &EncodeOptions) -> Result<()> {
    let src = File::open(src).with_context(|| format!("opening {}", src.display()))?;
    let frames = codec::encode(profile, opts, src)?;
    if frames.is_empty() {
        bail!("no frames produced");
    }
    for (i, frame) in frames.iter().enumerate() {
        let path = frame_path(out, i, frames.len());
        frame
            .save(&path)
            .with_context(|| format!("saving {}", path.display()))?;
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn run_decode(
    images: &[PathBuf],
    output: &Path,
    profile: &Profile,
    opts: &DecodeOptions,
) -> Result<()> {
    let mut frames = Vec::with_capacity(images.len());
    for path in images {
        let img = image::open(path)
            .with_context(|| format!("reading {}", path.display()))?
            .to_rgb8();
        tracing::debug!(path = %path.display(), width = img.width(), height = img.height(), "loaded");
        frames.push(img);
    }

    let mut out =
        File::create(output).with_context(|| format!("creating {}", output.display()))?;
    let summary = codec::decode(profile, opts, frames.iter(), &mut out)?;
    out.flush()?;

    println!(
        "decoded {} frame(s), skipped {}",
        summary.frames_decoded, summary.frames_skipped
    );
    if summary.frames_decoded == 0 {
        bail!("no frame could be decoded");
    }
    Ok(())
}

fn run_grade(
    baseline: &Path,
    messy: &Path,
    profile: &Profile,
    bits_per_op: Option<u32>,
    json: bool,
) -> Result<()> {
    let bits_per_op = bits_per_op.unwrap_or_else(|| profile.bits_per_op());
    let base = File::open(baseline).with_context(|| format!("opening {}", baseline.display()))?;
    let messy = File::open(messy).with_context(|| format!("opening {}", messy.display()))?;
    let report = grade::evaluate(base, messy, bits_per_op, profile.bits_per_symbol)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("tiles:             {}", report.total_tiles);
    println!("error tiles:       {}", report.error_tiles);
    println!("error bits:        {}", report.error_bits);
    println!("symbol error bits: {}", report.symbol_error_bits);
    println!("color error bits:  {}", report.color_error_bits);
    for (symbol, tracker) in &report.errors_by_symbol {
        println!("  symbol {symbol:02x}: {}/{}", tracker.errors, tracker.total);
    }
    for (color, tracker) in &report.errors_by_color {
        println!("  color {color:02x}: {}/{}", tracker.errors, tracker.total);
    }
    Ok(())
}

fn init_tracing(
    log_file: Option<&Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let name = path.file_name().context("log file needs a name")?;
        let appender = tracing_appender::rolling::never(dir, name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Ok(Some(guard))
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(None)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref())?;

    match cli.command {
        Command::Encode {
            src,
            out,
            light,
            colorbits,
            ecc,
            fountain,
            compress,
            split,
            encode_id,
            config,
        } => {
            if encode_id > 127 {
                bail!("encode id must be 0..=127");
            }
            let profile = build_profile(&config, ecc, colorbits)?;
            let opts = EncodeOptions {
                dark: !light,
                fountain,
                compress,
                split,
                encode_id,
            };
            run_encode(&src, &out, &profile, &opts)
        }
        Command::Decode {
            images,
            output,
            light,
            colorbits,
            ecc,
            fountain,
            compress,
            split,
            deskew,
            preprocess,
            color_correct,
            config,
        } => {
            let profile = build_profile(&config, ecc, colorbits)?;
            let opts = DecodeOptions {
                dark: !light,
                fountain,
                compress,
                split,
                deskew: DeskewLevel::from_arg(deskew),
                preprocess: Preprocess::from_arg(preprocess),
                color_correct,
            };
            run_decode(&images, &output, &profile, &opts)
        }
        Command::Grade {
            baseline,
            messy,
            bits_per_op,
            json,
            config,
        } => {
            let profile = build_profile(&config, None, None)?;
            run_grade(&baseline, &messy, &profile, bits_per_op, json)
        }
    }
}
