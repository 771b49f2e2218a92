use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::CoreResult;

/// Read granularity for hashing; model files run to multiple gigabytes, so
/// the file is never pulled into memory whole.
const HASH_BUF_SIZE: usize = 1024 * 1024;

/// Compute the SHA-256 hex digest of a file on disk, streaming the contents.
pub fn sha256_file(path: &Path) -> CoreResult<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let digest = hex::encode(hasher.finalize());
    debug!(path = %path.display(), sha256 = %digest, "Hashed file");
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(contents: &[u8]) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), contents).unwrap();
        file
    }

    #[test]
    fn sha256_known_value() {
        // SHA-256 of the ASCII string "hello" is well-known
        let file = write_temp(b"hello");
        let digest = sha256_file(file.path()).unwrap();
        assert_eq!(
            digest,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn sha256_empty_file() {
        let file = write_temp(b"");
        let digest = sha256_file(file.path()).unwrap();
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn sha256_crosses_buffer_boundary() {
        // Exercise the chunked read loop with more than one buffer's worth.
        let data = vec![0xabu8; HASH_BUF_SIZE + 17];
        let file = write_temp(&data);
        let streamed = sha256_file(file.path()).unwrap();
        let whole = hex::encode(Sha256::digest(&data));
        assert_eq!(streamed, whole);
    }
}
