use super::MediaKind;
use glob::Pattern;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{error, warn};
use walkdir::WalkDir;

/// A media file found by the walk, with the stat triple the cache keys on.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified_time: f64,
    pub kind: MediaKind,
}

/// Size and modification time (seconds since the epoch, sub-second
/// precision kept) for `path`.
pub fn file_identity(path: &Path) -> io::Result<(u64, f64)> {
    let metadata = fs::metadata(path)?;
    let modified = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok((metadata.len(), modified))
}

/// Walk `root` in sorted order collecting allow-listed media files.
/// Skips symlinks, 0-byte files and anything matching an ignore glob;
/// unreadable entries are logged and skipped.
pub fn collect_media_files<F>(
    root: &Path,
    ignore_globs: &[String],
    include_videos: bool,
    mut on_found: F,
) -> io::Result<Vec<MediaFile>>
where
    F: FnMut(usize, &Path),
{
    let ignore_patterns: Vec<Pattern> = ignore_globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect();

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !ignore_patterns
                .iter()
                .any(|pattern| pattern.matches_path(entry.path()))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if err.depth() == 0 {
                    return Err(err
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::other("unable to read scan root")));
                }
                warn!("Skipping unreadable entry: {}", err);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let kind = MediaKind::from_path(path);
        let wanted = match kind {
            MediaKind::Image => true,
            MediaKind::Video => include_videos,
            MediaKind::Other => false,
        };
        if !wanted {
            continue;
        }

        let (size, modified_time) = match file_identity(path) {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Error reading metadata for {}: {}", path.display(), e);
                continue;
            }
        };
        if size == 0 {
            continue;
        }

        files.push(MediaFile {
            path: path.to_path_buf(),
            size,
            modified_time,
            kind,
        });
        on_found(files.len(), path);
    }

    Ok(files)
}
