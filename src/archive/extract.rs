//! Reading bundles back: used by the requester client and by tests.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use zip::ZipArchive;
use zip::result::ZipError;

use super::{METADATA_FILE, PAYLOAD_ARCHIVE, PAYLOAD_PASSWORD, Result};
use crate::jobs::JobMetadata;

/// Unpacks the outer archive into `target`. The inner archive stays packed.
pub fn extract_bundle(bundle: &Path, target: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(File::open(bundle)?)?;
    archive.extract(target)?;
    Ok(())
}

pub fn read_metadata(bundle: &Path) -> Result<JobMetadata> {
    let mut archive = ZipArchive::new(File::open(bundle)?)?;
    let entry = archive.by_name(METADATA_FILE)?;
    Ok(serde_json::from_reader(entry)?)
}

/// Decrypts the single entry of an inner payload archive.
pub fn read_payload(payload_archive: &Path) -> Result<Vec<u8>> {
    let archive = ZipArchive::new(File::open(payload_archive)?)?;
    decrypt_first(archive)
}

/// Payload carried by a bundle, or `None` when the fetch produced no body.
pub fn read_payload_from_bundle(bundle: &Path) -> Result<Option<Vec<u8>>> {
    let mut archive = ZipArchive::new(File::open(bundle)?)?;
    let mut inner = Vec::new();
    match archive.by_name(PAYLOAD_ARCHIVE) {
        Ok(mut entry) => {
            entry.read_to_end(&mut inner)?;
        }
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    decrypt_first(ZipArchive::new(Cursor::new(inner))?).map(Some)
}

/// Entry names of a bundle, sorted.
pub fn entry_names(bundle: &Path) -> Result<Vec<String>> {
    let archive = ZipArchive::new(File::open(bundle)?)?;
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    Ok(names)
}

fn decrypt_first<R: std::io::Read + std::io::Seek>(mut archive: ZipArchive<R>) -> Result<Vec<u8>> {
    let mut entry = archive.by_index_decrypt(0, PAYLOAD_PASSWORD)?;
    let mut content = Vec::new();
    entry.read_to_end(&mut content)?;
    Ok(content)
}
