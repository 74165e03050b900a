//! Bundles converted files into a single zip for `GET /download-all`.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, ErrorKind as StdIoErrorKind, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::warn;
use zip::ZipWriter;
use zip::result::ZipResult;
use zip::write::SimpleFileOptions;

pub const ARCHIVE_NAME: &str = "converted_files.zip";

#[derive(Clone, Debug)]
pub struct ArchiveEntry {
    /// Name inside the archive
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct Archive {
    /// Anonymous temp file, rewound to the start
    pub file: File,
    pub added: Vec<String>,
}

/// Write the entries into an anonymous temp file in `scratch_dir`.
///
/// Blocking; missing files and repeated names are skipped.
pub fn build_archive(scratch_dir: &Path, entries: &[ArchiveEntry]) -> ZipResult<Archive> {
    let file = tempfile::tempfile_in(scratch_dir)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().large_file(true);

    let mut seen = HashSet::new();
    let mut added = Vec::new();
    for entry in entries {
        if !seen.insert(entry.name.as_str()) {
            continue;
        }

        let mut source = match File::open(&entry.path) {
            Ok(source) => source,
            Err(error) if error.kind() == StdIoErrorKind::NotFound => {
                warn!(name = %entry.name, "File for archive not found, skipping");
                continue;
            }
            Err(error) => return Err(error.into()),
        };

        zip.start_file(entry.name.as_str(), options)?;
        io::copy(&mut source, &mut zip)?;
        added.push(entry.name.clone());
    }

    let mut file = zip.finish()?;
    file.seek(SeekFrom::Start(0))?;
    Ok(Archive { file, added })
}
