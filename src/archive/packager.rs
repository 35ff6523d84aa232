use std::fs::File;
use std::io::{self, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::unstable::write::FileOptionsExt;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{
    ArchiveError, METADATA_FILE, PAYLOAD_ARCHIVE, PAYLOAD_PASSWORD, RESULTS_ARCHIVE, Result,
};
use crate::jobs::{FetchMode, JobMetadata};

const PARTIAL_SUFFIX: &str = ".part";

/// Builds the bundle for a job directory. Stateless; repackaging the same
/// directory overwrites both archives.
#[derive(Debug, Clone, Copy)]
pub struct ArchivePackager {
    inner_level: i64,
    outer_level: i64,
}

impl Default for ArchivePackager {
    fn default() -> Self {
        Self {
            inner_level: 1,
            outer_level: 9,
        }
    }
}

impl ArchivePackager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packages `job_dir` off the async runtime and returns the bundle path.
    pub async fn package(
        &self,
        job_dir: &Path,
        metadata: &JobMetadata,
        mode: FetchMode,
    ) -> Result<PathBuf> {
        let packager = *self;
        let dir = job_dir.to_path_buf();
        let payload_name = metadata.remote_job_id.clone();

        tokio::task::spawn_blocking(move || packager.package_blocking(&dir, &payload_name, mode))
            .await
            .map_err(|e| ArchiveError::Io(io::Error::other(e)))?
    }

    pub fn package_blocking(
        &self,
        job_dir: &Path,
        payload_name: &str,
        mode: FetchMode,
    ) -> Result<PathBuf> {
        let metadata_path = job_dir.join(METADATA_FILE);
        if !metadata_path.is_file() {
            return Err(ArchiveError::MissingMetadata(metadata_path));
        }

        let payload = job_dir.join(payload_name);
        let inner = if !payload_name.is_empty() && payload.is_file() {
            Some(self.write_inner(job_dir, &payload, payload_name)?)
        } else {
            None
        };

        let extras = match mode {
            FetchMode::Basic => Vec::new(),
            FetchMode::Rendered => rendered_artifacts(job_dir)?,
        };

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(self.outer_level));

        let partial = job_dir.join(format!("{RESULTS_ARCHIVE}{PARTIAL_SUFFIX}"));
        let mut zip = ZipWriter::new(BufWriter::new(File::create(&partial)?));
        add_file(&mut zip, &metadata_path, METADATA_FILE, options)?;
        if let Some(inner) = &inner {
            add_file(&mut zip, inner, PAYLOAD_ARCHIVE, options)?;
        }
        for name in &extras {
            add_file(&mut zip, &job_dir.join(name), name, options)?;
        }
        zip.finish()?.flush()?;

        let bundle = job_dir.join(RESULTS_ARCHIVE);
        std::fs::rename(&partial, &bundle)?;

        debug!(
            path = %bundle.display(),
            inner = inner.is_some(),
            extras = extras.len(),
            "Bundle written"
        );
        Ok(bundle)
    }

    fn write_inner(&self, job_dir: &Path, payload: &Path, name: &str) -> Result<PathBuf> {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(self.inner_level))
            .with_deprecated_encryption(PAYLOAD_PASSWORD);

        let path = job_dir.join(PAYLOAD_ARCHIVE);
        let mut zip = ZipWriter::new(BufWriter::new(File::create(&path)?));
        add_file(&mut zip, payload, name, options)?;
        zip.finish()?.flush()?;
        Ok(path)
    }
}

/// Resource files and screenshots, matched by name, in a stable order.
fn rendered_artifacts(job_dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(job_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let is_screenshot = Path::new(&name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
        if name.contains("resource") || is_screenshot {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

fn add_file<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    source: &Path,
    name: &str,
    options: SimpleFileOptions,
) -> Result<()> {
    zip.start_file(name, options)?;
    let mut file = File::open(source)?;
    io::copy(&mut file, zip)?;
    Ok(())
}
