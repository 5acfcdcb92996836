//! Helpers to extract zip (and jar) archives.
use std::{
    io::{BufReader, ErrorKind, Read, Seek, Write},
    path::Path,
};

use fs_err as fs;
use fs_err::File;
use sampledb_consts::consts;

use crate::error::ExtractError;

/// Tunables for [`extract_zip_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Size of the buffer that entry payloads are copied through.
    pub buffer_size: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            buffer_size: consts::DEFAULT_COPY_BUFFER_SIZE,
        }
    }
}

/// What an extraction wrote to disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Extracts a zip archive to the specified target directory using the
/// default [`ExtractOptions`].
pub fn extract_zip<R: Read + Seek>(
    archive: R,
    target_directory: impl AsRef<Path>,
) -> Result<ExtractSummary, ExtractError> {
    extract_zip_with(archive, target_directory, &ExtractOptions::default())
}

/// Opens the archive at `archive` and extracts it to the target directory.
pub fn extract_zip_file(
    archive: impl AsRef<Path>,
    target_directory: impl AsRef<Path>,
    options: &ExtractOptions,
) -> Result<ExtractSummary, ExtractError> {
    let file = File::open(archive.as_ref())?;
    let buf_reader = BufReader::with_capacity(1024 * 1024, file);
    extract_zip_with(buf_reader, target_directory, options)
}

/// Extracts a zip archive to the specified target directory.
///
/// Entries are processed in archive order. Directory entries are created
/// together with their ancestors, file entries are created at their relative
/// path (ancestors are created on demand, archives are not required to list
/// directories before their contents) and their payload is streamed through a
/// buffer of `options.buffer_size` bytes.
///
/// The first failure aborts the extraction. Anything written up to that point
/// is left in place.
pub fn extract_zip_with<R: Read + Seek>(
    archive: R,
    target_directory: impl AsRef<Path>,
    options: &ExtractOptions,
) -> Result<ExtractSummary, ExtractError> {
    let target_directory = target_directory.as_ref();
    fs::create_dir_all(target_directory)?;

    let mut archive =
        zip::ZipArchive::new(archive).map_err(|e| ExtractError::InvalidZip(e.to_string()))?;

    let mut buf = vec![0u8; options.buffer_size.max(1)];
    let mut summary = ExtractSummary::default();

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ExtractError::ZipEntry {
                index,
                reason: e.to_string(),
            })?;

        let Some(relative_path) = entry.enclosed_name() else {
            return Err(ExtractError::UnsafeEntryPath(entry.name().to_string()));
        };
        let destination = target_directory.join(relative_path);

        if entry.is_dir() {
            fs::create_dir_all(&destination)?;
            summary.directories += 1;
            continue;
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = File::create(&destination)?;
        let written = copy_entry(&mut entry, &mut file, &mut buf)?;
        tracing::trace!("extracted {} ({written} bytes)", destination.display());

        summary.files += 1;
        summary.bytes += written;
    }

    tracing::debug!(
        files = summary.files,
        directories = summary.directories,
        bytes = summary.bytes,
        "extracted archive into {}",
        target_directory.display()
    );

    Ok(summary)
}

/// Copies `reader` into `writer` until the end of the entry.
fn copy_entry(
    reader: &mut impl Read,
    writer: &mut impl Write,
    buf: &mut [u8],
) -> std::io::Result<u64> {
    let mut written = 0u64;
    loop {
        let read = match reader.read(buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..read])?;
        written += read as u64;
    }
    writer.flush()?;
    Ok(written)
}
