//! Discovery and cleanup of files written by the retrieval tool.
//!
//! The tool picks the final extension itself, so artifacts are located by
//! globbing `<temp_dir>/<base_name>.*`. Base names are unique per fetch, so
//! concurrent fetches in the same directory never see each other's files.

use std::path::{Path, PathBuf};

use glob::Pattern;
use tracing::{debug, warn};

/// Extensions treated as the downloaded media.
const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "webm", "mkv", "mov", "m4v", "avi", "flv", "3gp", "m4a", "mp3", "ogg", "opus", "wav",
    "aac",
];

/// Extensions treated as co-downloaded thumbnails or still images.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "heic", "heif"];

/// Markers of incomplete or intermediate downloads.
const PARTIAL_MARKERS: &[&str] = &[".part", ".ytdl", ".temp."];

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// MIME type for a media or image path, judged by extension.
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let mime = match extension(path)?.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "flv" => "video/x-flv",
        "3gp" => "video/3gpp",
        "m4a" | "aac" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "ogg" | "opus" => "audio/ogg",
        "wav" => "audio/wav",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "heif" => "image/heif",
        _ => return None,
    };
    Some(mime)
}

pub fn is_image(path: &Path) -> bool {
    extension(path).is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}

fn is_partial(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    PARTIAL_MARKERS.iter().any(|m| name.contains(m))
}

/// Glob pattern matching every artifact of one fetch.
pub(crate) fn artifact_pattern(dir: &Path, base_name: &str) -> String {
    let dir = Pattern::escape(&dir.to_string_lossy());
    format!("{}/{}.*", dir.trim_end_matches('/'), Pattern::escape(base_name))
}

/// All files currently matching the fetch's base name.
pub(crate) fn find_artifacts(dir: &Path, base_name: &str) -> Vec<PathBuf> {
    let pattern = artifact_pattern(dir, base_name);
    match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(Result::ok).filter(|p| p.is_file()).collect(),
        Err(e) => {
            warn!("Invalid artifact pattern {}: {}", pattern, e);
            Vec::new()
        }
    }
}

/// Pick the finished media file, ignoring thumbnails and partial downloads.
pub(crate) fn select_media(paths: &[PathBuf]) -> Option<PathBuf> {
    let mut candidates: Vec<&PathBuf> = paths
        .iter()
        .filter(|p| !is_partial(p))
        .filter(|p| extension(p).is_some_and(|e| MEDIA_EXTENSIONS.contains(&e.as_str())))
        .collect();
    // Prefer the merged `<base>.<ext>` file over per-format leftovers like `<base>.f137.mp4`.
    candidates.sort_by_key(|p| {
        p.file_stem()
            .map(|s| s.to_string_lossy().matches('.').count())
            .unwrap_or(usize::MAX)
    });
    candidates.first().map(|p| (*p).clone())
}

/// Delete every artifact of one fetch, optionally keeping one path.
pub(crate) async fn remove_artifacts(dir: &Path, base_name: &str, keep: Option<&Path>) -> usize {
    let mut removed = 0;
    for path in find_artifacts(dir, base_name) {
        if keep.is_some_and(|k| k == path) {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed fetch artifact {:?}", path);
                removed += 1;
            }
            Err(e) => warn!("Failed to remove fetch artifact {:?}: {}", path, e),
        }
    }
    removed
}
