use std::io;

use thiserror::Error;

/// Errors surfaced by the codec.
///
/// Only I/O and unreadable-image failures abort an invocation. Everything
/// else in the decode path degrades: uncorrectable blocks become sentinel
/// payloads, bad fountain headers are skipped, and a frame with too few
/// anchors is reported so the caller can move on to the next one.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("found {found} anchors, need at least 3")]
    AnchorDetection { found: usize },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
