//! The codec pipeline: layered encode and decode orchestration.
//!
//! Encode: `bytes -> [zlib] -> [fountain] -> reed-solomon -> bit stream ->
//! interleaved tile painting -> frames`. Decode runs the inverse, with the
//! flood-fill tile reader feeding an interleaved reassembly buffer per
//! frame and a persistent RS/fountain/decompression stack across frames.

use std::io::{self, Cursor, Read, Write};

use flate2::Compression;
use flate2::read::ZlibEncoder;
use flate2::write::ZlibDecoder;
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::bits::{BitPump, InterleavedWriter, interleave_indices, interleave_reverse};
use crate::config::Profile;
use crate::deskew::{DeskewLevel, deskew};
use crate::ecc::{FailurePolicy, RsDecoder, RsEncoder};
use crate::error::{Error, Result};
use crate::fountain::{FountainDecoder, FountainEncoder};
use crate::frame::frame_template;
use crate::grid::{AdjacentCellFinder, CellPositions, DecodeOrder, FloodDecodeOrder};
use crate::stream::{FinishWrite, FlushOnly};
use crate::tile::{ColorCorrector, ColorMatrix, TileDecoder, TileEncoder, fit_least_squares};

#[derive(Clone, Copy, Debug)]
pub struct EncodeOptions {
    pub dark: bool,
    pub fountain: bool,
    pub compress: bool,
    pub split: bool,
    pub encode_id: u8,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            dark: true,
            fountain: false,
            compress: false,
            split: false,
            encode_id: 0,
        }
    }
}

/// Sharpening before the tile read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Preprocess {
    /// Sharpen when the source photo was smaller than the canonical frame.
    #[default]
    Auto,
    Off,
    Force,
}

impl Preprocess {
    #[must_use]
    pub fn from_arg(arg: i8) -> Self {
        match arg {
            0 => Self::Off,
            1 => Self::Force,
            _ => Self::Auto,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DecodeOptions {
    pub dark: bool,
    pub fountain: bool,
    pub compress: bool,
    pub split: bool,
    pub deskew: DeskewLevel,
    pub preprocess: Preprocess,
    /// 0 off, 1 white balance, 2 two-pass fit, 6/7 split-matrix variants
    pub color_correct: u8,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            dark: true,
            fountain: false,
            compress: false,
            split: false,
            deskew: DeskewLevel::Scan,
            preprocess: Preprocess::Auto,
            color_correct: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeSummary {
    pub frames_decoded: u32,
    pub frames_skipped: u32,
}

/// Encode `src` into one or more frames.
pub fn encode<R: Read>(profile: &Profile, opts: &EncodeOptions, src: R) -> Result<Vec<RgbImage>> {
    profile.validate()?;

    let mut payload = Vec::new();
    if opts.compress {
        ZlibEncoder::new(src, Compression::default()).read_to_end(&mut payload)?;
    } else {
        let mut src = src;
        src.read_to_end(&mut payload)?;
    }
    if payload.is_empty() {
        return Err(Error::Config("nothing to encode".into()));
    }

    let mut frame_limit = None;
    let reader: Box<dyn Read> = if opts.fountain {
        if profile.fountain_blocks == 0 {
            return Err(Error::Config(
                "this profile has no fountain chunking".into(),
            ));
        }
        let chunk = profile.fountain_chunk_write_size() as usize;
        let enc = FountainEncoder::new(&payload[..], chunk, opts.encode_id)?;
        let needed = enc.source_chunks() + 2;
        frame_limit = Some(needed.div_ceil(profile.fountain_blocks).max(1));
        Box::new(enc)
    } else {
        Box::new(Cursor::new(payload))
    };

    let rs = RsEncoder::new(
        reader,
        profile.ecc as usize,
        profile.ecc_block_size as usize,
    );
    let mut bits = BitPump::new(rs, profile.bits_per_op());

    let cells = CellPositions::for_profile(profile);
    let seq = interleave_indices(
        cells.len(),
        profile.interleave_blocks as usize,
        profile.interleave_partitions as usize,
    );
    let template = frame_template(profile, opts.dark);
    let painter = TileEncoder::new(
        opts.dark,
        profile.bits_per_symbol,
        profile.bits_per_color,
        profile.cell_size,
    );

    let mut frames = Vec::new();
    loop {
        match frame_limit {
            Some(limit) => {
                if frames.len() as u32 >= limit {
                    break;
                }
            }
            None => {
                if bits.exhausted() {
                    break;
                }
            }
        }

        let mut img = template.clone();
        if opts.split {
            paint_split(profile, &painter, &mut img, &mut bits, &cells, &seq)?;
        } else {
            for &cell in &seq {
                let value = bits.read()?;
                let (x, y) = cells.positions[cell];
                painter.paint(&mut img, value, x, y);
            }
        }
        frames.push(img);
        debug!(frame = frames.len(), "painted frame");
    }

    info!(frames = frames.len(), "encode complete");
    Ok(frames)
}

/// Split mode lays the symbol plane down first, then the color plane, each
/// in interleaved order at its own bit width.
fn paint_split<R: Read>(
    profile: &Profile,
    painter: &TileEncoder,
    img: &mut RgbImage,
    bits: &mut BitPump<R>,
    cells: &CellPositions,
    seq: &[usize],
) -> Result<()> {
    let mut symbols = vec![0u16; cells.len()];
    for &cell in seq {
        symbols[cell] = bits.read_width(profile.bits_per_symbol)?;
    }
    bits.align();

    let mut colors = vec![0u16; cells.len()];
    if profile.bits_per_color > 0 {
        for &cell in seq {
            colors[cell] = bits.read_width(profile.bits_per_color)?;
        }
        bits.align();
    }

    for (i, &(x, y)) in cells.positions.iter().enumerate() {
        let value = (colors[i] << profile.bits_per_symbol) | symbols[i];
        painter.paint(img, value, x, y);
    }
    Ok(())
}

/// Decode a sequence of frames into `out`. Frames whose anchors cannot be
/// found are skipped; everything else flows through the stream stack.
pub fn decode<'a, I>(
    profile: &Profile,
    opts: &DecodeOptions,
    images: I,
    out: &mut dyn Write,
) -> Result<DecodeSummary>
where
    I: IntoIterator<Item = &'a RgbImage>,
{
    profile.validate()?;

    let sink: Box<dyn FinishWrite + '_> = Box::new(FlushOnly(out));
    let sink: Box<dyn FinishWrite + '_> = if opts.compress {
        Box::new(InflateSink::new(sink))
    } else {
        sink
    };
    let sink: Box<dyn FinishWrite + '_> = if opts.fountain {
        if profile.fountain_blocks == 0 {
            return Err(Error::Config(
                "this profile has no fountain chunking".into(),
            ));
        }
        Box::new(FountainDecoder::new(
            sink,
            profile.fountain_chunk_write_size() as usize,
        ))
    } else {
        sink
    };
    let policy = if opts.fountain {
        FailurePolicy::Skip
    } else {
        FailurePolicy::Zeros
    };
    let mut rs = RsDecoder::new(
        sink,
        profile.ecc as usize,
        profile.ecc_block_size as usize,
        policy,
    );

    let mut summary = DecodeSummary::default();
    for img in images {
        match decode_frame(profile, opts, img, &mut rs) {
            Ok(()) => summary.frames_decoded += 1,
            Err(Error::AnchorDetection { found }) => {
                warn!(found, "skipping frame: not enough anchors");
                summary.frames_skipped += 1;
            }
            Err(err) => return Err(err),
        }
    }

    rs.finish()?;
    info!(?summary, "decode complete");
    Ok(summary)
}

#[derive(Clone, Copy, Default)]
struct CellRead {
    symbol: u16,
    /// color bits, already shifted above the symbol bits
    color: u16,
    /// drift-adjusted crop origin
    sx: i64,
    sy: i64,
    /// uncorrected mean ink color, kept for the least-squares refit
    raw_mean: [f64; 3],
    confident: bool,
}

fn decode_frame<W: Write>(
    profile: &Profile,
    opts: &DecodeOptions,
    src: &RgbImage,
    rs: &mut W,
) -> Result<()> {
    let deskewed = deskew(src, profile, opts.dark, opts.deskew)?;
    let sharpen = match opts.preprocess {
        Preprocess::Force => true,
        Preprocess::Off => false,
        Preprocess::Auto => {
            deskewed.observed.0.min(deskewed.observed.1) < profile.total_size
                && opts.deskew != DeskewLevel::Off
        }
    };
    let img = if sharpen {
        debug!("sharpening before tile read");
        unsharp(&deskewed.image)
    } else {
        deskewed.image
    };

    let cells = CellPositions::for_profile(profile);
    let finder = AdjacentCellFinder::for_profile(profile);
    let mut order = FloodDecodeOrder::new(finder);
    let mut translator = TileDecoder::new(
        opts.dark,
        profile.bits_per_symbol,
        profile.bits_per_color,
        profile.cell_size,
    );

    // symbol phase, flood order
    let mut reads = vec![CellRead::default(); cells.len()];
    while let Some((i, (x, y), drift)) = order.next() {
        let sym = translator.decode_symbol(&img, x, y, drift);
        order.update(sym.dx, sym.dy, sym.distance);
        reads[i] = CellRead {
            symbol: sym.bits,
            color: 0,
            sx: i64::from(x) + i64::from(drift.x) + i64::from(sym.dx),
            sy: i64::from(y) + i64::from(drift.y) + i64::from(sym.dy),
            raw_mean: [0.0; 3],
            confident: sym.distance == 0,
        };
    }

    // color phase, with optional correction passes
    if profile.bits_per_color > 0 {
        let bps = profile.bits_per_symbol;
        let corrector = initial_corrector(&img, profile, opts);
        color_pass(&img, &mut translator, &mut reads, &corrector, bps);

        // second pass: least-squares refit from confident tiles, uniform
        // for mode 2, per-region for the split variants
        if matches!(opts.color_correct, 2 | 7) {
            if let Some(corrector) = refit_corrector(profile, false, &translator, &reads) {
                color_pass(&img, &mut translator, &mut reads, &corrector, bps);
            }
        }
        if matches!(opts.color_correct, 6 | 7) {
            if let Some(corrector) = refit_corrector(profile, true, &translator, &reads) {
                color_pass(&img, &mut translator, &mut reads, &corrector, bps);
            }
        }
    }

    // reassemble the interleaved stream
    let rev = || {
        interleave_reverse(
            cells.len(),
            profile.interleave_blocks as usize,
            profile.interleave_partitions as usize,
        )
    };

    if opts.split {
        let mut writer = InterleavedWriter::new(&mut *rs, rev(), profile.bits_per_symbol);
        for (i, read) in reads.iter().enumerate() {
            writer.write(read.symbol, i);
        }
        writer.finish()?;

        if profile.bits_per_color > 0 {
            let mut writer = InterleavedWriter::new(&mut *rs, rev(), profile.bits_per_color);
            for (i, read) in reads.iter().enumerate() {
                writer.write(read.color >> profile.bits_per_symbol, i);
            }
            writer.finish()?;
        }
    } else {
        let mut writer = InterleavedWriter::new(&mut *rs, rev(), profile.bits_per_op());
        for (i, read) in reads.iter().enumerate() {
            writer.write(read.color | read.symbol, i);
        }
        writer.finish()?;
    }
    Ok(())
}

fn color_pass(
    img: &RgbImage,
    translator: &mut TileDecoder,
    reads: &mut [CellRead],
    corrector: &ColorCorrector,
    bits_per_symbol: u32,
) {
    let (w, h) = (i64::from(img.width()) - 1, i64::from(img.height()) - 1);
    for read in reads.iter_mut() {
        let mean = translator.mean_ink_color(img, read.sx, read.sy);
        read.raw_mean = mean;
        let px = read.sx.clamp(0, w) as u32;
        let py = read.sy.clamp(0, h) as u32;
        let corrected = corrector.apply(px, py, mean);
        read.color = translator.classify_mean(corrected) << bits_per_symbol;
    }
}

/// Mode 1 and the first pass of modes 2/6/7: von-Kries white balance from
/// the known-bright regions beside the finder patterns.
fn initial_corrector(img: &RgbImage, profile: &Profile, opts: &DecodeOptions) -> ColorCorrector {
    if opts.color_correct == 0 {
        return ColorCorrector::Off;
    }
    let white = white_point_sample(img, profile, opts.dark);
    debug!(?white, "white point sample");
    ColorCorrector::Uniform(ColorMatrix::white_balance(white))
}

/// Average color of the regions that are bright by construction: the marker
/// cores in dark mode, the frame margin in light mode.
fn white_point_sample(img: &RgbImage, profile: &Profile, dark: bool) -> [f64; 3] {
    let t = profile.total_size;
    let a = profile.anchor_inset();
    let patches: [(u32, u32); 4] = if dark {
        [(a, a), (t - a, a), (a, t - a), (t - a, t - a)]
    } else {
        // margin strips between the markers and the guides
        let m = profile.marker_px() + 10;
        [(m, 4), (t - m, 4), (m, t - 4), (t - m, t - 4)]
    };

    let mut sum = [0.0f64; 3];
    let mut count = 0u32;
    for (cx, cy) in patches {
        for dy in -3i64..=3 {
            for dx in -3i64..=3 {
                let x = (i64::from(cx) + dx).clamp(0, i64::from(img.width()) - 1) as u32;
                let y = (i64::from(cy) + dy).clamp(0, i64::from(img.height()) - 1) as u32;
                let p = img.get_pixel(x, y).0;
                sum[0] += f64::from(p[0]);
                sum[1] += f64::from(p[1]);
                sum[2] += f64::from(p[2]);
                count += 1;
            }
        }
    }
    let n = f64::from(count.max(1));
    [sum[0] / n, sum[1] / n, sum[2] / n]
}

/// Modes 2/6/7: least-squares refit from tiles whose symbol decoded with
/// zero hash distance, pairing what the camera saw with the palette entry
/// the first color pass chose.
fn refit_corrector(
    profile: &Profile,
    split: bool,
    translator: &TileDecoder,
    reads: &[CellRead],
) -> Option<ColorCorrector> {
    let t = f64::from(profile.total_size);
    let (cx, cy) = (t / 2.0, t / 2.0);
    let radius = t / 3.0;
    let in_center =
        |r: &CellRead| ((r.sx as f64 - cx).powi(2) + (r.sy as f64 - cy).powi(2)) <= radius * radius;

    let gather = |filter: &dyn Fn(&CellRead) -> bool| -> (Vec<[f64; 3]>, Vec<[f64; 3]>) {
        let mut observed = Vec::new();
        let mut expected = Vec::new();
        for read in reads.iter().filter(|r| r.confident && filter(r)) {
            observed.push(read.raw_mean);
            expected.push(translator.expected_color(read.color >> profile.bits_per_symbol));
        }
        (observed, expected)
    };

    if split {
        let (obs_c, exp_c) = gather(&in_center);
        let (obs_o, exp_o) = gather(&|r: &CellRead| !in_center(r));
        let center = fit_least_squares(&obs_c, &exp_c)?;
        let outer = fit_least_squares(&obs_o, &exp_o)?;
        Some(ColorCorrector::Split {
            center,
            outer,
            radius_sq: radius * radius,
            cx,
            cy,
        })
    } else {
        let (observed, expected) = gather(&|_: &CellRead| true);
        fit_least_squares(&observed, &expected).map(ColorCorrector::Uniform)
    }
}

/// Unsharp-mask 3x3 for small or forced sources.
fn unsharp(img: &RgbImage) -> RgbImage {
    let kernel: [f32; 9] = [-1.0, -1.0, -1.0, -1.0, 8.5, -1.0, -1.0, -1.0, -1.0];
    imageproc::filter::filter3x3::<image::Rgb<u8>, f32, u8>(img, &kernel)
}

/// Write-side zlib layer with end-of-stream handling.
///
/// Without the fountain layer the frame outlives the payload, so zero
/// padding arrives after the zlib stream's own terminator; everything past
/// the first successfully inflated byte stream is swallowed.
struct InflateSink<W: FinishWrite> {
    inner: ZlibDecoder<W>,
    wrote_any: bool,
    done: bool,
}

impl<W: FinishWrite> InflateSink<W> {
    fn new(inner: W) -> Self {
        Self {
            inner: ZlibDecoder::new(inner),
            wrote_any: false,
            done: false,
        }
    }
}

impl<W: FinishWrite> Write for InflateSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.done {
            return Ok(buf.len());
        }
        match self.inner.write(buf) {
            Ok(0) if !buf.is_empty() => {
                self.done = true;
                Ok(buf.len())
            }
            Ok(n) => {
                self.wrote_any = true;
                Ok(n)
            }
            Err(err) if self.wrote_any => {
                debug!(%err, "inflate stopped accepting input, treating as end of stream");
                self.done = true;
                Ok(buf.len())
            }
            Err(err) => Err(err),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: FinishWrite> FinishWrite for InflateSink<W> {
    fn finish(&mut self) -> io::Result<()> {
        if !self.done {
            self.inner.try_finish()?;
        }
        self.inner.get_mut().finish()
    }
}
