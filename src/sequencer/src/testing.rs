//! Fixtures for sequencing tests: export builders, a file-name key extractor
//! and a processor that records what it was handed.

use crate::drain::ItemProcessor;
use crate::error::{ExtractionError, ProcessingError};
use crate::extract::KeyExtractor;
use crate::key::Key;
use async_trait::async_trait;
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Write a ZIP archive with the given `(entry name, content)` pairs
pub fn write_archive(dir: &Path, name: &str, entries: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(name);
    let file = File::create(&path).expect("create archive");
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    for (entry, content) in entries {
        zip.start_file(*entry, options).expect("start entry");
        zip.write_all(content.as_bytes()).expect("write entry");
    }
    zip.finish().expect("finish archive");
    path
}

/// Write a dataset version export whose OAI-ORE document names `nbn`
pub fn write_dve(dir: &Path, name: &str, nbn: &str) -> PathBuf {
    let metadata = serde_json::json!({
        "@context": { "ore": "http://www.openarchives.org/ore/terms/" },
        "ore:describes": {
            "dansDataVaultMetadata:dansNbn": nbn,
            "dansDataVaultMetadata:dansBagId": format!("urn:uuid:{name}"),
        }
    })
    .to_string();
    write_archive(
        dir,
        name,
        &[
            ("dataset/bagit.txt", "BagIt-Version: 1.0\n"),
            ("dataset/metadata/oai-ore.jsonld", &metadata),
        ],
    )
}

/// Keys items by the part of their file name before the first `_`, so
/// `K1_a1` belongs to `K1`. Names without `_` are malformed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileNameKeyExtractor;

impl KeyExtractor for FileNameKeyExtractor {
    fn extract_key(&self, item: &Path) -> Result<Key, ExtractionError> {
        let name = item
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(ExtractionError::MissingKey)?;
        let (key, _) = name.split_once('_').ok_or(ExtractionError::MissingKey)?;
        Key::new(key).ok_or(ExtractionError::MissingKey)
    }
}

/// One call made to a [`RecordingProcessor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handled {
    pub key: String,
    pub item: String,
}

/// Records every item it is handed. Fails for configured item names; can
/// consume items itself to imitate a collaborator that removes what it processed.
#[derive(Debug, Clone, Default)]
pub struct RecordingProcessor {
    handled: Arc<Mutex<Vec<Handled>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    consume: bool,
}

impl RecordingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processor that deletes each item it handles successfully
    pub fn consuming() -> Self {
        Self {
            consume: true,
            ..Self::default()
        }
    }

    pub fn fail_on(&self, item: &str) {
        self.failing.lock().unwrap().insert(item.to_string());
    }

    pub fn stop_failing(&self, item: &str) {
        self.failing.lock().unwrap().remove(item);
    }

    pub fn handled(&self) -> Vec<Handled> {
        self.handled.lock().unwrap().clone()
    }

    /// Item names handed over for `key`, in call order
    pub fn handled_for(&self, key: &str) -> Vec<String> {
        self.handled()
            .into_iter()
            .filter(|h| h.key == key)
            .map(|h| h.item)
            .collect()
    }
}

#[async_trait]
impl ItemProcessor for RecordingProcessor {
    async fn process(&self, item: &Path, key: &Key) -> Result<(), ProcessingError> {
        let name = item
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.handled.lock().unwrap().push(Handled {
            key: key.to_string(),
            item: name.clone(),
        });

        if self.failing.lock().unwrap().contains(&name) {
            return Err(ProcessingError::Other(format!("refusing {name}")));
        }
        if self.consume {
            tokio::fs::remove_file(item)
                .await
                .map_err(|e| ProcessingError::Other(e.to_string()))?;
        }
        Ok(())
    }
}

/// Create an empty staged item
pub fn stage(dir: &Path, name: &str) -> PathBuf {
    std::fs::create_dir_all(dir).expect("create staging dir");
    let path = dir.join(name);
    std::fs::write(&path, name.as_bytes()).expect("write staged item");
    path
}

/// File names (not paths) in a directory, sorted; empty when it does not exist
pub fn names_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
