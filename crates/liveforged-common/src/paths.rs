//! Path utilities for classifying HLS output files by extension.
//!
//! The directory manager uses these to find stale output from a previous run,
//! and the HTTP layer uses them to pick response headers.

use std::path::Path;

/// Playlist (manifest) file extensions.
const MANIFEST_EXTENSIONS: &[&str] = &["m3u8"];

/// Media segment file extensions, including fMP4 init segments.
const SEGMENT_EXTENSIONS: &[&str] = &["ts", "m4s", "mp4", "aac"];

/// Content type for playlists.
pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

fn extension_in(path: &Path, list: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| list.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Check if a path has a playlist extension.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use liveforged_common::paths::is_manifest_file;
///
/// assert!(is_manifest_file(Path::new("index.m3u8")));
/// assert!(!is_manifest_file(Path::new("segment_00001.ts")));
/// ```
pub fn is_manifest_file(path: &Path) -> bool {
    extension_in(path, MANIFEST_EXTENSIONS)
}

/// Check if a path has a media segment extension.
pub fn is_segment_file(path: &Path) -> bool {
    extension_in(path, SEGMENT_EXTENSIONS)
}

/// Check if a path is transcoder output of any kind (playlist, segment, or
/// the `.tmp` file ffmpeg writes before renaming a playlist into place).
pub fn is_hls_output(path: &Path) -> bool {
    if is_manifest_file(path) || is_segment_file(path) {
        return true;
    }
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("tmp") => path.file_stem().map(Path::new).is_some_and(is_manifest_file),
        _ => false,
    }
}

/// Media type served for an HLS output file, if it is one.
pub fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "m3u8" => Some(MANIFEST_CONTENT_TYPE),
        "ts" => Some("video/mp2t"),
        "m4s" => Some("video/iso.segment"),
        "mp4" => Some("video/mp4"),
        "aac" => Some("audio/aac"),
        _ => None,
    }
}
