//! Reclaims buckets that are empty and not halted.
//!
//! Deleting a bucket frees its key: the next arrival for that key gets a new
//! bucket instance. A halt flag is an entry of its own, so a halted bucket is
//! never empty and never reaped.

use crate::lease::BucketLeases;
use crate::ordering::{EntryKind, list_sorted};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Buckets that were deleted
    pub deleted: Vec<PathBuf>,
    /// Buckets left alone because they hold items or a halt flag
    pub kept: usize,
    /// Buckets skipped because a drain holds their lease
    pub leased: usize,
}

pub struct Reaper {
    destination: PathBuf,
    reserved: Vec<String>,
    leases: BucketLeases,
}

impl Reaper {
    pub fn new(destination: impl Into<PathBuf>, reserved: Vec<String>) -> Self {
        Self {
            destination: destination.into(),
            reserved,
            leases: BucketLeases::new(),
        }
    }

    /// Share leases with the drain dispatcher
    pub fn with_leases(mut self, leases: BucketLeases) -> Self {
        self.leases = leases;
        self
    }

    /// Delete every empty, unleased bucket under the destination root
    pub async fn reap(&self) -> io::Result<ReapReport> {
        let mut report = ReapReport::default();
        let dirs = match list_sorted(&self.destination, EntryKind::Directory, |name| {
            !self.reserved.iter().any(|r| r == name)
        })
        .await
        {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e),
        };

        for dir in dirs {
            let Some(_lease) = self.leases.try_acquire(&dir) else {
                report.leased += 1;
                continue;
            };
            match delete_if_empty(&dir).await {
                Ok(true) => {
                    tracing::debug!(bucket = %dir.display(), "Deleted empty bucket");
                    report.deleted.push(dir);
                }
                Ok(false) => report.kept += 1,
                Err(e) => {
                    tracing::warn!(bucket = %dir.display(), error = %e, "Unable to reap bucket");
                    report.kept += 1;
                }
            }
        }
        Ok(report)
    }
}

/// Delete `dir` when it has no entries. A directory that vanished or filled up
/// in the meantime is left alone.
async fn delete_if_empty(dir: &Path) -> io::Result<bool> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if entries.next_entry().await?.is_some() {
        return Ok(false);
    }

    match tokio::fs::remove_dir(dir).await {
        Ok(()) => Ok(true),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::DirectoryNotEmpty
            ) =>
        {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::create_bucket;
    use crate::key::Key;
    use tempfile::TempDir;

    async fn bucket(root: &Path, key: &str) -> PathBuf {
        create_bucket(root, &Key::new(key).unwrap())
            .await
            .unwrap()
            .path()
            .to_path_buf()
    }

    #[tokio::test]
    async fn test_deletes_only_empty_unblocked_buckets() {
        let root = TempDir::new().unwrap();
        let empty = bucket(root.path(), "K1").await;
        let busy = bucket(root.path(), "K2").await;
        std::fs::write(busy.join("b1"), b"b1").unwrap();
        let halted = bucket(root.path(), "K3").await;
        crate::halt::set_halt(&halted).await.unwrap();

        let report = Reaper::new(root.path(), Vec::new()).reap().await.unwrap();

        assert_eq!(report.deleted, vec![empty.clone()]);
        assert_eq!(report.kept, 2);
        assert!(!empty.exists());
        assert!(busy.exists());
        assert!(halted.exists());
    }

    #[tokio::test]
    async fn test_reserved_sinks_are_never_reaped() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("failed")).unwrap();

        let report = Reaper::new(root.path(), vec!["failed".to_string()])
            .reap()
            .await
            .unwrap();

        assert!(report.deleted.is_empty());
        assert!(root.path().join("failed").exists());
    }

    #[tokio::test]
    async fn test_leased_bucket_is_skipped() {
        let root = TempDir::new().unwrap();
        let empty = bucket(root.path(), "K1").await;
        let leases = BucketLeases::new();
        let lease = leases.try_acquire(&empty).unwrap();
        let reaper = Reaper::new(root.path(), Vec::new()).with_leases(leases.clone());

        let report = reaper.reap().await.unwrap();
        assert_eq!(report.leased, 1);
        assert!(empty.exists());

        drop(lease);
        let report = reaper.reap().await.unwrap();
        assert_eq!(report.deleted, vec![empty.clone()]);
    }

    #[tokio::test]
    async fn test_reaping_is_idempotent() {
        let root = TempDir::new().unwrap();
        let empty = bucket(root.path(), "K1").await;
        let busy = bucket(root.path(), "K2").await;
        std::fs::write(busy.join("b1"), b"b1").unwrap();
        let reaper = Reaper::new(root.path(), Vec::new());

        reaper.reap().await.unwrap();
        let again = reaper.reap().await.unwrap();

        assert!(again.deleted.is_empty());
        assert_eq!(again.kept, 1);
        assert!(!empty.exists());
        assert!(busy.join("b1").exists());
    }

    #[tokio::test]
    async fn test_delete_if_empty_on_missing_directory_is_noop() {
        let root = TempDir::new().unwrap();
        assert!(!delete_if_empty(&root.path().join("gone")).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_destination_is_empty_report() {
        let root = TempDir::new().unwrap();
        let report = Reaper::new(root.path().join("nope"), Vec::new())
            .reap()
            .await
            .unwrap();
        assert_eq!(report, ReapReport::default());
    }
}
