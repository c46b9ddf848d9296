use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Compute the BLAKE3 hash of a file, returning the hex-encoded digest.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn blake3_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Hash a sequence of string parts with a separator that cannot appear in
/// file paths, returning the first `len` hex characters.
///
/// Used for short identity hashes such as the browser cache-busting hash.
#[must_use]
pub fn short_hash<'a>(parts: impl IntoIterator<Item = &'a str>, len: usize) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\0");
    }
    let hex = hasher.finalize().to_hex();
    hex[..len.min(hex.len())].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_blake3_file_matches_bytes() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();

        assert_eq!(
            blake3_file(file.path()).unwrap(),
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
        assert_eq!(blake3_file(file.path()).unwrap(), blake3_bytes(b"hello world"));
    }

    #[test]
    fn test_short_hash_is_stable_and_separated() {
        let a = short_hash(["react", "/a/react.js"], 8);
        assert_eq!(a.len(), 8);
        assert_eq!(a, short_hash(["react", "/a/react.js"], 8));
        // Part boundaries matter.
        assert_ne!(short_hash(["ab", "c"], 8), short_hash(["a", "bc"], 8));
    }
}
