use blake3::Hasher as Blake3Hasher;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

const CHUNK_SIZE: usize = 64 * 1024;

/// BLAKE3 of the full file contents as lowercase hex, streamed in 64 KiB
/// chunks so large videos are never buffered whole.
pub fn content_hash(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, file);
    let mut hasher = Blake3Hasher::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}
