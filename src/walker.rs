use std::{path::Path, time::SystemTime};

use globset::GlobSet;

use crate::error::Result;

/// A discovered note file.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Fully resolved absolute path as a string.
    ///
    /// This string is the scan sort key and the resume cursor; both sides
    /// must use plain byte-wise ordering on it.
    pub path: String,
    /// The file name component, including extension.
    pub file_name: String,
    /// Last modification time as seconds since the Unix epoch.
    pub mtime: u64,
    /// File size in bytes.
    pub size: u64,
}

/// Supported file extensions for note discovery.
const SUPPORTED_EXTENSIONS: &[&str] = &["md", "txt"];

pub(crate) fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
}

/// Recursively walk a directory and discover eligible note files.
///
/// Skips hidden files/directories (names starting with `.`) and only
/// returns files with supported extensions (.md, .txt). Paths matching
/// `exclude` (relative to `root`) are dropped. Results are sorted by
/// their absolute path string.
pub fn discover_files(
    root: &Path,
    exclude: Option<&GlobSet>,
) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, exclude, &mut results)?;
    results.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    exclude: Option<&GlobSet>,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        // Skip hidden files and directories.
        if name.starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &entry.path(), exclude, results)?;
        } else if file_type.is_symlink() {
            // Resolve symlink and check for cycles.
            let resolved = match entry.path().canonicalize() {
                Ok(p) => p,
                Err(_) => continue, // Skip broken symlinks
            };
            // Skip if the symlink points back into or above the root
            // (cycle prevention).
            if resolved.starts_with(root) && resolved.is_dir() {
                continue;
            }
            if resolved.is_file()
                && is_supported(&resolved)
                && !is_excluded(root, &entry.path(), exclude)
                && let Some(df) = make_discovered(&resolved)?
            {
                results.push(df);
            }
        } else if file_type.is_file()
            && is_supported(&entry.path())
            && !is_excluded(root, &entry.path(), exclude)
        {
            let abs = entry.path().canonicalize()?;
            if let Some(df) = make_discovered(&abs)? {
                results.push(df);
            }
        }
    }

    Ok(())
}

fn is_excluded(root: &Path, path: &Path, exclude: Option<&GlobSet>) -> bool {
    let Some(set) = exclude else {
        return false;
    };
    let relative: &Path = path.strip_prefix(root).unwrap_or(path);
    set.is_match(relative)
}

fn make_discovered(absolute_path: &Path) -> Result<Option<DiscoveredFile>> {
    let metadata = std::fs::metadata(absolute_path)?;
    let mtime = metadata
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let file_name = absolute_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(Some(DiscoveredFile {
        path: absolute_path.to_string_lossy().to_string(),
        file_name,
        mtime,
        size: metadata.len(),
    }))
}

/// Build a single discovered-file record for a known path.
///
/// Used by the watcher when re-indexing one file outside a scan.
pub fn discover_one(path: &Path) -> Result<Option<DiscoveredFile>> {
    let abs = path.canonicalize()?;
    if !is_supported(&abs) {
        return Ok(None);
    }
    make_discovered(&abs)
}
