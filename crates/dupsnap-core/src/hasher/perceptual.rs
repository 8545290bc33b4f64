use crate::cluster::FINGERPRINT_BITS;
use image::DynamicImage;
use image_hasher::{HashAlg, Hasher, HasherConfig};

/// DCT mean hash at 8x8, i.e. 64 bits.
pub fn fingerprint_hasher() -> Hasher {
    HasherConfig::new()
        .hash_size(8, 8)
        .hash_alg(HashAlg::Mean)
        .preproc_dct()
        .to_hasher()
}

/// Raw fingerprint bytes for one decoded frame or image.
pub fn fingerprint_bytes(hasher: &Hasher, image: &DynamicImage) -> Vec<u8> {
    hasher.hash_image(image).as_bytes().to_vec()
}

/// 16 lowercase hex characters.
pub fn image_fingerprint(hasher: &Hasher, image: &DynamicImage) -> String {
    hex::encode(fingerprint_bytes(hasher, image))
}

/// Combine per-frame fingerprints bit by bit: a bit is set when a strict
/// majority of frames set it. One black or corrupt frame cannot flip the
/// result on its own.
pub fn median_fingerprint(frames: &[Vec<u8>]) -> String {
    if frames.is_empty() {
        return String::new();
    }
    let bytes = (FINGERPRINT_BITS / 8) as usize;
    let mut combined = vec![0u8; bytes];
    for (byte_idx, out) in combined.iter_mut().enumerate() {
        for bit in 0..8 {
            let mask = 1u8 << bit;
            let ones = frames
                .iter()
                .filter(|f| f.get(byte_idx).is_some_and(|b| b & mask != 0))
                .count();
            if ones * 2 > frames.len() {
                *out |= mask;
            }
        }
    }
    hex::encode(combined)
}
