//! Item moves and diagnostic records.

use crate::key::Key;
use chrono::Utc;
use std::error::Error;
use std::ffi::OsString;
use std::fmt::{self, Write as _};
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Suffix of the diagnostic record written next to a failed or rejected item
pub const ERROR_LOG_SUFFIX: &str = "-error.log";

/// Stage at which an item left the happy path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Admission,
    Drain,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Admission => write!(f, "admission"),
            Stage::Drain => write!(f, "drain"),
        }
    }
}

/// Context rendered into a diagnostic record
pub struct Diagnostic<'a> {
    pub stage: Stage,
    pub item: &'a Path,
    pub key: Option<&'a Key>,
    pub bucket: Option<&'a Path>,
    pub error: &'a (dyn Error + Send + Sync + 'static),
}

impl Diagnostic<'_> {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "time: {}", Utc::now().to_rfc3339());
        let _ = writeln!(out, "stage: {}", self.stage);
        let _ = writeln!(out, "item: {}", self.item.display());
        if let Some(key) = self.key {
            let _ = writeln!(out, "key: {key}");
        }
        if let Some(bucket) = self.bucket {
            let _ = writeln!(out, "bucket: {}", bucket.display());
        }
        let _ = writeln!(out, "error: {}", self.error);

        let mut source = self.error.source();
        while let Some(cause) = source {
            let _ = writeln!(out, "caused by: {cause}");
            source = cause.source();
        }
        out
    }
}

/// Subdirectory of a sink holding the items of one key
pub fn keyed_sink(sink: &Path, key: &Key) -> PathBuf {
    sink.join(key.encoded())
}

/// Target path in `dir` for an item named `name` that does not clobber an existing file
async fn free_target(dir: &Path, name: &OsString) -> io::Result<PathBuf> {
    let target = dir.join(name);
    if !tokio::fs::try_exists(&target).await? {
        return Ok(target);
    }
    let mut renamed = name.clone();
    renamed.push(format!(".{}", Uuid::new_v4().simple()));
    Ok(dir.join(renamed))
}

fn file_name(item: &Path) -> io::Result<OsString> {
    item.file_name()
        .map(|name| name.to_os_string())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("item has no file name: {}", item.display()),
            )
        })
}

/// Atomically rename `item` into an existing directory.
///
/// `dir` is not created. Renaming into a bucket that was reaped fails with
/// `NotFound`.
pub async fn relocate(item: &Path, dir: &Path) -> io::Result<PathBuf> {
    let name = file_name(item)?;
    let target = free_target(dir, &name).await?;
    tokio::fs::rename(item, &target).await?;
    Ok(target)
}

/// Rename `item` into a sink directory, creating it when needed
pub async fn move_into_sink(item: &Path, sink: &Path) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(sink).await?;
    relocate(item, sink).await
}

/// Move `item` into `sink` and write its diagnostic record beside it.
///
/// Returns the new location of the item.
pub async fn quarantine(item: &Path, sink: &Path, diagnostic: &Diagnostic<'_>) -> io::Result<PathBuf> {
    let moved = move_into_sink(item, sink).await?;
    let mut log_name = file_name(&moved)?;
    log_name.push(ERROR_LOG_SUFFIX);
    tokio::fs::write(sink.join(log_name), diagnostic.render()).await?;
    Ok(moved)
}

/// Path of the diagnostic record belonging to an item in a sink
pub fn diagnostic_path(item: &Path) -> PathBuf {
    let mut name = item.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(ERROR_LOG_SUFFIX);
    item.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_relocate_does_not_create_missing_directory() {
        let root = TempDir::new().unwrap();
        let item = root.path().join("a1.zip");
        std::fs::write(&item, b"a1").unwrap();

        let err = relocate(&item, &root.path().join("reaped@bucket"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(item.exists());
        assert!(!root.path().join("reaped@bucket").exists());
    }

    #[tokio::test]
    async fn test_relocate_never_overwrites() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("bucket");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("v1.zip"), b"old").unwrap();
        let item = root.path().join("v1.zip");
        std::fs::write(&item, b"new").unwrap();

        let moved = relocate(&item, &dir).await.unwrap();
        assert_ne!(moved, dir.join("v1.zip"));
        assert_eq!(std::fs::read(dir.join("v1.zip")).unwrap(), b"old");
        assert_eq!(std::fs::read(&moved).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_quarantine_writes_diagnostic_next_to_item() {
        let root = TempDir::new().unwrap();
        let item = root.path().join("bad.zip");
        std::fs::write(&item, b"junk").unwrap();
        let sink = root.path().join("rejected");
        let error = io::Error::other("not a zip");

        let diagnostic = Diagnostic {
            stage: Stage::Admission,
            item: &item,
            key: None,
            bucket: None,
            error: &error,
        };
        let moved = quarantine(&item, &sink, &diagnostic).await.unwrap();

        assert_eq!(moved, sink.join("bad.zip"));
        assert!(!item.exists());
        let record = std::fs::read_to_string(diagnostic_path(&moved)).unwrap();
        assert!(record.contains("stage: admission"));
        assert!(record.contains("not a zip"));
    }

    #[test]
    fn test_render_includes_key_bucket_and_causes() {
        #[derive(Debug)]
        struct Outer(io::Error);
        impl fmt::Display for Outer {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "registration failed")
            }
        }
        impl Error for Outer {
            fn source(&self) -> Option<&(dyn Error + 'static)> {
                Some(&self.0)
            }
        }

        let key = Key::new("K1").unwrap();
        let error = Outer(io::Error::other("connection reset"));
        let rendered = Diagnostic {
            stage: Stage::Drain,
            item: Path::new("/b/a1.zip"),
            key: Some(&key),
            bucket: Some(Path::new("/b")),
            error: &error,
        }
        .render();

        assert!(rendered.contains("key: K1"));
        assert!(rendered.contains("bucket: /b"));
        assert!(rendered.contains("error: registration failed"));
        assert!(rendered.contains("caused by: connection reset"));
    }
}
