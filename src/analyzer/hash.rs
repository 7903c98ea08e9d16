use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::path::Path;

/// Read size for hashing. The whole file is streamed; only one chunk is resident.
const CHUNK_SIZE: usize = 64 * 1024;

/// SHA-256 digest of a file's full byte content. Identity key in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for b in &self.0 {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Hash everything a reader yields, in fixed-size chunks.
pub fn hash_reader<R: Read>(mut reader: R) -> std::io::Result<ContentHash> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..read]);
    }

    Ok(ContentHash(hasher.finalize().into()))
}

/// Hash a whole file, independent of how much of it is later decoded.
pub fn hash_file(path: &Path) -> std::io::Result<ContentHash> {
    let file = std::fs::File::open(path)?;
    hash_reader(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_bytes_identical_hash() {
        let data = vec![7u8; 200_000];
        let a = hash_reader(&data[..]).unwrap();
        let b = hash_reader(&data[..]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_byte_difference_changes_hash() {
        let base: Vec<u8> = (0..150_000u32).map(|i| (i % 251) as u8).collect();
        let reference = hash_reader(&base[..]).unwrap();

        // Flip one byte at a few positions, including across chunk boundaries
        for pos in [0, 1, CHUNK_SIZE - 1, CHUNK_SIZE, base.len() - 1] {
            let mut altered = base.clone();
            altered[pos] ^= 0x01;
            assert_ne!(hash_reader(&altered[..]).unwrap(), reference, "pos {pos}");
        }
    }

    #[test]
    fn test_empty_input_known_digest() {
        let h = hash_reader(std::io::empty()).unwrap();
        assert_eq!(
            h.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_file_matches_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        let data: Vec<u8> = (0..100_000u32).map(|i| (i * 31 % 256) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_reader(&data[..]).unwrap());
    }
}
