//! End-to-end pipeline tests: encode to frames, decode back to bytes,
//! through clean images, perspective warps, and the fountain layer.

use image::{Rgb, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use pretty_assertions::assert_eq;

use codec::deskew::DeskewLevel;
use codec::{DecodeOptions, EncodeOptions, Preprocess, Profile, decode, encode, grade};

fn sample_payload() -> Vec<u8> {
    b"0123456789abcdefghij".repeat(1000)
}

fn clean_decode_opts() -> DecodeOptions {
    DecodeOptions {
        deskew: DeskewLevel::Off,
        ..DecodeOptions::default()
    }
}

#[test]
fn round_trip_no_noise() {
    let profile = Profile::sq_8x8();
    let payload = sample_payload();

    let frames = encode(&profile, &EncodeOptions::default(), &payload[..]).unwrap();
    // 20,000 bytes at 7,500 payload bytes per frame
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].dimensions(), (1024, 1024));

    let mut out = Vec::new();
    let summary = decode(&profile, &clean_decode_opts(), frames.iter(), &mut out).unwrap();
    assert_eq!(summary.frames_decoded, 3);
    assert_eq!(out.len(), 3 * profile.rs_payload_bytes() as usize);
    assert_eq!(&out[..payload.len()], &payload[..]);
    assert!(out[payload.len()..].iter().all(|&b| b == 0));
}

#[test]
fn round_trip_single_frame_prefix() {
    use rand::{Rng, SeedableRng};

    let profile = Profile::sq_8x8();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x51F7);
    let payload: Vec<u8> = (0..9000).map(|_| rng.r#gen()).collect();

    let frames = encode(&profile, &EncodeOptions::default(), &payload[..]).unwrap();
    let mut out = Vec::new();
    decode(&profile, &clean_decode_opts(), frames.iter(), &mut out).unwrap();

    // a single frame yields exactly the frame capacity minus RS overhead
    let capacity = profile.rs_payload_bytes() as usize;
    assert_eq!(&out[..capacity], &payload[..capacity]);
}

#[test]
fn round_trip_light_mode() {
    let profile = Profile::sq_8x8();
    let payload = b"light mode round trip".repeat(64);

    let opts = EncodeOptions {
        dark: false,
        ..EncodeOptions::default()
    };
    let frames = encode(&profile, &opts, &payload[..]).unwrap();

    let mut out = Vec::new();
    let decode_opts = DecodeOptions {
        dark: false,
        ..clean_decode_opts()
    };
    decode(&profile, &decode_opts, frames.iter(), &mut out).unwrap();
    assert_eq!(&out[..payload.len()], &payload[..]);
}

#[test]
fn round_trip_split_streams() {
    let profile = Profile::sq_8x8();
    let payload = sample_payload();

    let opts = EncodeOptions {
        split: true,
        ..EncodeOptions::default()
    };
    let frames = encode(&profile, &opts, &payload[..]).unwrap();

    let mut out = Vec::new();
    let decode_opts = DecodeOptions {
        split: true,
        ..clean_decode_opts()
    };
    decode(&profile, &decode_opts, frames.iter(), &mut out).unwrap();
    assert_eq!(&out[..payload.len()], &payload[..]);
}

#[test]
fn round_trip_fountain_and_compression() {
    let profile = Profile::sq_8x8();
    let payload = sample_payload();

    let opts = EncodeOptions {
        fountain: true,
        compress: true,
        ..EncodeOptions::default()
    };
    let frames = encode(&profile, &opts, &payload[..]).unwrap();
    assert!(!frames.is_empty());

    let mut out = Vec::new();
    let decode_opts = DecodeOptions {
        fountain: true,
        compress: true,
        ..clean_decode_opts()
    };
    decode(&profile, &decode_opts, frames.iter(), &mut out).unwrap();
    // the fountain layer knows the exact payload size; no padding comes out
    assert_eq!(out, payload);
}

#[test]
fn round_trip_fountain_uncompressed() {
    let profile = Profile::sq_8x8();
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i * 31 + 7) as u8).collect();

    let opts = EncodeOptions {
        fountain: true,
        ..EncodeOptions::default()
    };
    let frames = encode(&profile, &opts, &payload[..]).unwrap();
    // ceil(20000 / 744) + 2 = 29 chunks, 10 per frame
    assert_eq!(frames.len(), 3);

    let mut out = Vec::new();
    let decode_opts = DecodeOptions {
        fountain: true,
        ..clean_decode_opts()
    };
    decode(&profile, &decode_opts, frames.iter(), &mut out).unwrap();
    assert_eq!(out, payload);
}

#[test]
fn deskew_recovers_a_clean_frame() {
    let profile = Profile::sq_8x8();
    let payload = sample_payload();

    let frames = encode(&profile, &EncodeOptions::default(), &payload[..]).unwrap();

    let mut out = Vec::new();
    let decode_opts = DecodeOptions {
        deskew: DeskewLevel::Scan,
        preprocess: Preprocess::Off,
        ..DecodeOptions::default()
    };
    let summary = decode(&profile, &decode_opts, frames.iter().take(1), &mut out).unwrap();
    assert_eq!(summary.frames_decoded, 1);
    assert_eq!(&out[..], &payload[..out.len().min(payload.len())]);
}

#[test]
fn png_file_round_trip() {
    let profile = Profile::sq_8x8();
    let payload = b"file system round trip".repeat(100);

    let frames = encode(&profile, &EncodeOptions::default(), &payload[..]).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.png");
    frames[0].save(&path).unwrap();

    let reloaded = image::open(&path).unwrap().to_rgb8();
    let mut out = Vec::new();
    decode(&profile, &clean_decode_opts(), [&reloaded], &mut out).unwrap();
    assert_eq!(&out[..payload.len()], &payload[..]);
}

fn warp_onto_canvas(src: &RgbImage, from: [(f32, f32); 4], to: [(f32, f32); 4]) -> RgbImage {
    let projection = Projection::from_control_points(from, to).unwrap();
    let mut canvas = RgbImage::new(1000, 1000);
    warp_into(
        src,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut canvas,
    );
    gaussian_blur_f32(&canvas, 0.8)
}

fn graded_errors(profile: &Profile, baseline: &[u8], skewed: &RgbImage) -> u64 {
    let decode_opts = DecodeOptions {
        deskew: DeskewLevel::Scan,
        preprocess: Preprocess::Force,
        ..DecodeOptions::default()
    };
    let mut out = Vec::new();
    decode(profile, &decode_opts, [skewed], &mut out).unwrap();

    let report = grade::evaluate(
        baseline,
        &out[..],
        profile.bits_per_op(),
        profile.bits_per_symbol,
    )
    .unwrap();
    report.error_bits
}

#[test]
fn perspective_warp_stays_under_the_error_budget() {
    // graded without error correction, so every residual bit shows
    let profile = Profile::sq_8x8().with_ecc(0);
    let payload: Vec<u8> = (0..profile.rs_payload_bytes())
        .map(|i| (i * 131 + 17) as u8)
        .collect();

    let frames = encode(&profile, &EncodeOptions::default(), &payload[..]).unwrap();
    assert_eq!(frames.len(), 1);

    let skewed = warp_onto_canvas(
        &frames[0],
        [(0.0, 0.0), (0.0, 1023.0), (1023.0, 0.0), (1023.0, 1023.0)],
        [(21.0, 212.0), (115.0, 943.0), (854.0, 198.0), (795.0, 942.0)],
    );

    let errors = graded_errors(&profile, &payload, &skewed);
    assert!(errors < 2000, "{errors} bit errors");
}

#[test]
fn perspective_rotate_stays_under_the_error_budget() {
    let profile = Profile::sq_8x8().with_ecc(0);
    let payload: Vec<u8> = (0..profile.rs_payload_bytes())
        .map(|i| (i * 73 + 5) as u8)
        .collect();

    let frames = encode(&profile, &EncodeOptions::default(), &payload[..]).unwrap();

    // the same correspondence with the source corners reversed: the code
    // arrives rotated 180 degrees
    let skewed = warp_onto_canvas(
        &frames[0],
        [(1023.0, 1023.0), (1023.0, 0.0), (0.0, 1023.0), (0.0, 0.0)],
        [(21.0, 212.0), (115.0, 943.0), (854.0, 198.0), (795.0, 942.0)],
    );

    let errors = graded_errors(&profile, &payload, &skewed);
    assert!(errors <= 4000, "{errors} bit errors");
}

#[test]
fn decode_survives_an_undecodable_frame() {
    let profile = Profile::sq_8x8();
    let payload = sample_payload();

    let frames = encode(&profile, &EncodeOptions::default(), &payload[..]).unwrap();
    let noise = RgbImage::from_pixel(400, 400, Rgb([40, 40, 40]));

    let mut out = Vec::new();
    let decode_opts = DecodeOptions {
        deskew: DeskewLevel::Scan,
        preprocess: Preprocess::Off,
        ..DecodeOptions::default()
    };
    let images: Vec<&RgbImage> = std::iter::once(&noise).chain(frames.iter()).collect();
    let summary = decode(&profile, &decode_opts, images, &mut out).unwrap();
    assert_eq!(summary.frames_skipped, 1);
    assert_eq!(summary.frames_decoded, 3);
    assert_eq!(&out[..payload.len()], &payload[..]);
}
