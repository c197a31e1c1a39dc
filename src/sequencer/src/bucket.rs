use crate::halt::{self, HALT_FLAG};
use crate::key::Key;
use crate::ordering::{EntryKind, list_sorted};
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Separates the encoded key from the instance id in a bucket directory name
const INSTANCE_SEPARATOR: char = '@';

/// A per-key working directory.
///
/// The directory is named `<encoded key>@<instance>`; every bucket created for a
/// key gets a fresh instance id, so a bucket that was reaped is never confused
/// with its successor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    path: PathBuf,
    key: Key,
    instance: String,
}

impl Bucket {
    /// Interpret a directory as a bucket. Returns `None` for foreign directories.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let name = path.file_name()?.to_str()?;
        let (encoded, instance) = name.rsplit_once(INSTANCE_SEPARATOR)?;
        if instance.is_empty() {
            return None;
        }
        let key = Key::decode(encoded)?;
        let instance = instance.to_string();
        Some(Self {
            path,
            key,
            instance,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub async fn exists(&self) -> io::Result<bool> {
        tokio::fs::try_exists(&self.path).await
    }

    pub async fn is_halted(&self) -> io::Result<bool> {
        halt::is_halted(&self.path).await
    }

    pub async fn halt(&self) -> io::Result<bool> {
        halt::set_halt(&self.path).await
    }

    pub async fn resume(&self) -> io::Result<bool> {
        halt::clear_halt(&self.path).await
    }

    /// Queued items in arrival order, excluding the halt flag
    pub async fn items(&self) -> io::Result<Vec<PathBuf>> {
        list_sorted(&self.path, EntryKind::File, |name| name != HALT_FLAG).await
    }
}

/// All buckets under `root`, oldest first. Reserved sink directories and
/// directories that do not look like buckets are skipped.
pub async fn list_buckets(root: &Path, reserved: &[String]) -> io::Result<Vec<Bucket>> {
    let dirs = match list_sorted(root, EntryKind::Directory, |name| {
        !reserved.iter().any(|r| r == name)
    })
    .await
    {
        Ok(dirs) => dirs,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut buckets = Vec::with_capacity(dirs.len());
    for dir in dirs {
        match Bucket::from_path(&dir) {
            Some(bucket) => buckets.push(bucket),
            None => tracing::debug!(dir = %dir.display(), "Ignoring directory that is not a bucket"),
        }
    }
    Ok(buckets)
}

/// The live bucket for `key`, if any
pub async fn find_bucket(root: &Path, key: &Key) -> io::Result<Option<Bucket>> {
    let mut matching = list_buckets(root, &[])
        .await?
        .into_iter()
        .filter(|bucket| bucket.key() == key);

    let found = matching.next();
    if let Some(duplicate) = matching.next() {
        // Only possible when admission was not serialized. Keep feeding the oldest.
        tracing::warn!(
            key = %key,
            kept = %found.as_ref().map(|b| b.path().display().to_string()).unwrap_or_default(),
            duplicate = %duplicate.path().display(),
            "More than one bucket exists for key"
        );
    }
    Ok(found)
}

/// Create a fresh bucket instance for `key`
pub async fn create_bucket(root: &Path, key: &Key) -> io::Result<Bucket> {
    tokio::fs::create_dir_all(root).await?;

    let name = format!(
        "{}{}{}",
        key.encoded(),
        INSTANCE_SEPARATOR,
        Uuid::new_v4().simple()
    );
    let path = root.join(name);
    tokio::fs::create_dir(&path).await?;

    tracing::info!(key = %key, bucket = %path.display(), "Created bucket");
    Bucket::from_path(&path).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("created bucket has an unparsable name: {}", path.display()),
        )
    })
}
