use image::{imageops, DynamicImage, GrayImage};
use image_hasher::{HashAlg, HasherConfig};
use std::fmt;
use std::path::Path;

use crate::error::{CurationError, Result};

/// Side length of the hash grid; the fingerprint has `HASH_SIZE²` bits
pub const HASH_SIZE: u32 = 8;

/// 64-bit mean (average) hash of an image.
///
/// Each bit records whether one cell of the 8×8 grayscale grid is at least as
/// bright as the grid's mean. Only distances between fingerprints are
/// meaningful; the bit layout is whatever the hasher produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    pub fn from_image(image: &DynamicImage) -> Self {
        Self::from_gray(&image.to_luma8())
    }

    pub fn from_gray(gray: &GrayImage) -> Self {
        // Area-average down to the grid first; the hasher's own resize is then
        // an identity and every cell is the true mean of its block
        let grid = if gray.width() >= HASH_SIZE && gray.height() >= HASH_SIZE {
            imageops::thumbnail(gray, HASH_SIZE, HASH_SIZE)
        } else {
            imageops::resize(gray, HASH_SIZE, HASH_SIZE, imageops::FilterType::Triangle)
        };

        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Mean)
            .hash_size(HASH_SIZE, HASH_SIZE)
            .to_hasher();
        let hash = hasher.hash_image(&DynamicImage::ImageLuma8(grid));

        let bits = hash
            .as_bytes()
            .iter()
            .take(8)
            .enumerate()
            .fold(0u64, |bits, (i, byte)| bits | (u64::from(*byte) << (8 * i)));
        Fingerprint(bits)
    }

    /// Number of differing bits
    pub fn distance(self, other: Fingerprint) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Decode an image file and compute its fingerprint
pub fn fingerprint_file(path: &Path) -> Result<Fingerprint> {
    let image = image::open(path).map_err(|source| CurationError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Fingerprint::from_image(&image))
}
