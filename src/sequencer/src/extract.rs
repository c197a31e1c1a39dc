//! Routing key extraction from dataset version exports.
//!
//! An export is a ZIP archive with a single top-level directory. The NBN that
//! identifies the dataset is read from `<top>/metadata/oai-ore.jsonld` at
//! `ore:describes` / `dansDataVaultMetadata:dansNbn`.

use crate::error::ExtractionError;
use crate::key::Key;
use serde_json::Value;
use std::fs::File;
use std::path::Path;
use zip::ZipArchive;
use zip::result::ZipError;

const METADATA_PATH: &str = "metadata/oai-ore.jsonld";
const DESCRIBES: &str = "ore:describes";
const NBN: &str = "dansDataVaultMetadata:dansNbn";

/// Determines the routing key of an item. Consulted only during admission.
pub trait KeyExtractor: Send + Sync {
    fn extract_key(&self, item: &Path) -> Result<Key, ExtractionError>;
}

/// Reads the NBN from the item's OAI-ORE document
#[derive(Debug, Clone, Copy, Default)]
pub struct OaiOreKeyExtractor;

impl KeyExtractor for OaiOreKeyExtractor {
    fn extract_key(&self, item: &Path) -> Result<Key, ExtractionError> {
        let metadata = read_oai_ore(item)?;
        metadata
            .get(DESCRIBES)
            .and_then(|describes| describes.get(NBN))
            .and_then(Value::as_str)
            .and_then(Key::new)
            .ok_or(ExtractionError::MissingKey)
    }
}

/// Parse the OAI-ORE document of an export
pub fn read_oai_ore(item: &Path) -> Result<Value, ExtractionError> {
    let file = File::open(item)?;
    let mut archive = ZipArchive::new(file).map_err(ExtractionError::NotAnArchive)?;

    let top_level = top_level_directory(&archive).ok_or(ExtractionError::NoTopLevelDirectory)?;
    let metadata_path = format!("{top_level}/{METADATA_PATH}");

    let entry = match archive.by_name(&metadata_path) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Err(ExtractionError::MissingMetadata(metadata_path)),
        Err(e) => return Err(ExtractionError::NotAnArchive(e)),
    };
    serde_json::from_reader(entry).map_err(ExtractionError::InvalidMetadata)
}

/// First directory at the root of the archive, in archive order
fn top_level_directory<R>(archive: &ZipArchive<R>) -> Option<String>
where
    R: std::io::Read + std::io::Seek,
{
    archive
        .file_names()
        .filter_map(|name| name.split_once('/'))
        .map(|(top, _)| top)
        .find(|top| !top.is_empty())
        .map(str::to_string)
}
