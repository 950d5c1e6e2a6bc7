use super::types::SecurityError;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

const CHUNK_SIZE: usize = 8192;

/// Hex-encoded SHA-256 of a file, streamed in fixed-size chunks
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, file);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compare a file's digest against an expected hex string (case-insensitive)
///
/// Returns the computed digest on success.
pub fn verify_checksum(path: &Path, expected: &str) -> Result<String, SecurityError> {
    let actual = sha256_file(path).map_err(|source| SecurityError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if !actual.eq_ignore_ascii_case(expected.trim()) {
        tracing::error!("Checksum mismatch for {}", path.display());
        tracing::error!("Expected: {}", expected);
        tracing::error!("Got:      {}", actual);
        return Err(SecurityError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }

    tracing::info!("Checksum verified for {}", path.display());
    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // sha256("abc")
    const ABC_DIGEST: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn test_sha256_known_vector() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        assert_eq!(sha256_file(file.path()).unwrap(), ABC_DIGEST);
    }

    #[test]
    fn test_verify_is_case_insensitive() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        let upper = ABC_DIGEST.to_uppercase();
        assert!(verify_checksum(file.path(), &upper).is_ok());
    }

    #[test]
    fn test_verify_mismatch() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abd").unwrap();
        let err = verify_checksum(file.path(), ABC_DIGEST).unwrap_err();
        assert_eq!(err.code(), "checksum-mismatch");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = verify_checksum(&dir.path().join("nope.onnx"), ABC_DIGEST).unwrap_err();
        assert!(matches!(err, SecurityError::Io { .. }));
    }
}
