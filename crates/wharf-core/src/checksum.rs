use std::path::Path;

use crate::error::{ErrorContext, FeedError};

/// Calculates the blake3 checksum of a file, hex-encoded.
///
/// Used both for artifact checksums and for detecting changed package
/// files during synchronization.
pub fn file_checksum<P: AsRef<Path>>(path: P) -> Result<String, FeedError> {
    let path = path.as_ref();
    let mut hasher = blake3::Hasher::new();
    hasher
        .update_mmap(path)
        .with_context(|| format!("hashing {}", path.display()))?;
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn checksum_is_stable_and_content_sensitive() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"package contents").unwrap();

        let first = file_checksum(file.path()).unwrap();
        let second = file_checksum(file.path()).unwrap();
        assert_eq!(first, second);

        file.write_all(b" changed").unwrap();
        file.flush().unwrap();
        assert_ne!(first, file_checksum(file.path()).unwrap());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = file_checksum("/nonexistent/file").unwrap_err();
        assert!(matches!(err, FeedError::IoError { .. }));
    }
}
