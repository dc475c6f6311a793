//! Perceptual fingerprints used to skip re-estimating unchanged frames.

use image::{DynamicImage, RgbImage};
use image_hasher::{HashAlg, HasherConfig, ImageHash};

pub struct FrameHasher {
    hasher: image_hasher::Hasher,
}

impl FrameHasher {
    pub fn new() -> Self {
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::DoubleGradient)
            .hash_size(8, 8)
            .to_hasher();
        Self { hasher }
    }

    pub fn fingerprint(&self, frame: &RgbImage) -> ImageHash {
        self.hasher.hash_image(&DynamicImage::ImageRgb8(frame.clone()))
    }
}

impl Default for FrameHasher {
    fn default() -> Self {
        Self::new()
    }
}
