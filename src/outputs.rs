//! Zip archives of the host app's generated outputs.
//!
//! Every regular file under the output directory is stored DEFLATE-compressed
//! with its path relative to that directory (`/`-separated). Entries are
//! written in file-name order so the same tree always produces the same
//! listing.

use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, Write};
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::Result;

/// What went into an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    pub files: usize,
    pub bytes: u64,
}

/// Archive `dir` into `writer`. A missing directory yields an empty archive.
pub fn archive_dir<W: Write + Seek>(dir: &Path, writer: W) -> Result<(W, ArchiveSummary)> {
    archive_filtered(dir, writer, |_| true)
}

/// Archive `output_dir` into a new zip file at `dest`.
///
/// When `dest` lives inside `output_dir` it is not archived into itself.
pub fn write_outputs_zip(output_dir: &Path, dest: &Path) -> Result<ArchiveSummary> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(dest)?;
    let dest_abs = dest.canonicalize()?;

    let (mut writer, summary) = archive_filtered(output_dir, BufWriter::new(file), |path| {
        path.canonicalize().map(|p| p != dest_abs).unwrap_or(true)
    })?;
    writer.flush()?;

    info!(
        "Archived {} files ({} bytes) from {} into {}",
        summary.files,
        summary.bytes,
        output_dir.display(),
        dest.display()
    );
    Ok(summary)
}

fn archive_filtered<W, F>(dir: &Path, writer: W, include: F) -> Result<(W, ArchiveSummary)>
where
    W: Write + Seek,
    F: Fn(&Path) -> bool,
{
    let mut zip = ZipWriter::new(writer);
    let mut summary = ArchiveSummary::default();

    if !dir.is_dir() {
        warn!("Output directory {} not found, archive is empty", dir.display());
        return Ok((zip.finish()?, summary));
    }

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable output entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !include(entry.path()) {
            continue;
        }

        let Some(name) = entry_name(dir, entry.path()) else {
            continue;
        };
        let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(len >= u32::MAX as u64);

        zip.start_file(name, options)?;
        let mut source = File::open(entry.path())?;
        summary.bytes += io::copy(&mut source, &mut zip)?;
        summary.files += 1;
    }

    Ok((zip.finish()?, summary))
}

fn entry_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}
