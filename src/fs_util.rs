//! Small filesystem helpers for sidecar hash files and store persistence.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::errors::Result;

/// Returns `true` if the path is a regular file (not a symlink).
///
/// Uses `symlink_metadata()` to avoid following symlinks.
#[must_use]
pub(crate) fn is_regular_file(path: &Path) -> bool {
    path.symlink_metadata()
        .map(|m| m.file_type().is_file())
        .unwrap_or(false)
}

/// Read the first line of a text file without its line terminator.
///
/// Fails with an IO `NotFound` error if the file does not exist.
pub(crate) fn read_first_line(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(fs::File::open(path)?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let trimmed = line.trim_end_matches(['\n', '\r']).len();
    line.truncate(trimmed);
    Ok(line)
}

/// Replace `path` with `contents` via a temporary sibling and a rename.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
