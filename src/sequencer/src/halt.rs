//! Per-bucket halt flag.
//!
//! A halted bucket is frozen: it is not drained and it is never reaped, so
//! later arrivals for its key queue up behind the failed item until an
//! operator clears the flag.

use std::io;
use std::path::Path;
use tokio::fs::OpenOptions;

/// File name of the halt flag inside a bucket. Never treated as an item.
pub const HALT_FLAG: &str = "block";

pub async fn is_halted(bucket: &Path) -> io::Result<bool> {
    tokio::fs::try_exists(bucket.join(HALT_FLAG)).await
}

/// Set the flag. Returns `false` when the bucket was already halted.
pub async fn set_halt(bucket: &Path) -> io::Result<bool> {
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(bucket.join(HALT_FLAG))
        .await
    {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Clear the flag. Returns `false` when the bucket was not halted.
pub async fn clear_halt(bucket: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(bucket.join(HALT_FLAG)).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_halt_lifecycle() {
        let bucket = TempDir::new().unwrap();

        assert!(!is_halted(bucket.path()).await.unwrap());
        assert!(set_halt(bucket.path()).await.unwrap());
        assert!(is_halted(bucket.path()).await.unwrap());
        assert_eq!(
            std::fs::metadata(bucket.path().join(HALT_FLAG)).unwrap().len(),
            0
        );

        // second halt is a no-op
        assert!(!set_halt(bucket.path()).await.unwrap());

        assert!(clear_halt(bucket.path()).await.unwrap());
        assert!(!is_halted(bucket.path()).await.unwrap());
        assert!(!clear_halt(bucket.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_halting_a_vanished_bucket_fails() {
        let root = TempDir::new().unwrap();
        let err = set_halt(&root.path().join("gone")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
