//! Whole-file content fingerprints (blake3, 256-bit, lowercase hex).

use std::fs;
use std::io::{self, Read};
use std::path::Path;

const BUF_SIZE: usize = 64 * 1024;

/// Streams the file once through blake3. Memory use is one fixed buffer.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let file = fs::File::open(path)?;
    hash_reader(file)
}

pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_content_same_fingerprint() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("a.bin");
        fs::write(&file, b"hello smartdir").unwrap();
        let first = hash_file(&file).unwrap();
        let second = hash_file(&file).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn one_byte_changes_fingerprint() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("a.bin");
        fs::write(&file, b"hello smartdir").unwrap();
        let before = hash_file(&file).unwrap();
        fs::write(&file, b"hello smartdiR").unwrap();
        assert_ne!(before, hash_file(&file).unwrap());
    }

    #[test]
    fn streaming_matches_one_shot_digest() {
        let data: Vec<u8> = (0..(BUF_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let streamed = hash_reader(&data[..]).unwrap();
        assert_eq!(streamed, blake3::hash(&data).to_hex().to_string());
    }

    #[test]
    fn missing_file_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let err = hash_file(&temp.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
