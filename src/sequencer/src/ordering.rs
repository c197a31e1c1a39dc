//! Arrival order of items and buckets.
//!
//! Everything that hands items on (the staging inbox, bucket drains, the
//! dispatcher) sorts through [`ItemStamp`], so arrival order is the same at
//! every stage. A rename keeps an item's creation time, which is what makes
//! the order survive the move from staging into a bucket.

use std::cmp::Ordering;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Sort key of an item: creation time, ties broken by file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemStamp {
    pub created: SystemTime,
    pub name: OsString,
}

impl ItemStamp {
    pub fn new(created: SystemTime, name: impl Into<OsString>) -> Self {
        Self {
            created,
            name: name.into(),
        }
    }

    /// Read the stamp of a path. Filesystems without birth time fall back to mtime.
    pub async fn of(path: &Path) -> io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        let created = metadata.created().or_else(|_| metadata.modified())?;
        let name = path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        Ok(Self { created, name })
    }
}

impl Ord for ItemStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.created
            .cmp(&other.created)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for ItemStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// What [`list_sorted`] should return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// List the entries of `dir` of the given kind whose name passes `keep`, in arrival order.
///
/// Entries that vanish between listing and stamping are left out.
pub async fn list_sorted<F>(dir: &Path, kind: EntryKind, keep: F) -> io::Result<Vec<PathBuf>>
where
    F: Fn(&str) -> bool,
{
    let mut stamped = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        let matches_kind = match kind {
            EntryKind::File => file_type.is_file(),
            EntryKind::Directory => file_type.is_dir(),
        };
        if !matches_kind || !keep(&entry.file_name().to_string_lossy()) {
            continue;
        }

        let path = entry.path();
        match ItemStamp::of(&path).await {
            Ok(stamp) => stamped.push((stamp, path)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        }
    }

    stamped.sort_by(|(a, _), (b, _)| a.cmp(b));
    Ok(stamped.into_iter().map(|(_, path)| path).collect())
}
