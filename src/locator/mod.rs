//! Best-effort discovery of the file an acquisition produced.
//!
//! The fetch collaborator names its output from a title template, so the
//! pipeline cannot predict the final path. Instead it snapshots the target
//! directory before the download and asks this module afterwards which file
//! is new, with an ordered fallback when the obvious answer is missing.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// File names present in `dir` right now. An absent or unreadable directory
/// yields an empty snapshot.
pub fn snapshot(dir: &Path) -> HashSet<OsString> {
    let mut names = HashSet::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            names.insert(entry.file_name());
        }
    }
    names
}

/// Locate the artifact produced since `before` was taken.
///
/// Ordered fallback, each tier consulted only when the previous one is empty:
/// 1. newly created files with the expected extension, newest first;
/// 2. any newly created file, newest first;
/// 3. any file in the directory with the expected extension, newest first;
/// 4. any file at all, newest first.
///
/// Returns `None` when the directory is empty or absent.
pub fn locate_artifact(
    dir: &Path,
    before: &HashSet<OsString>,
    expected_ext: &str,
) -> Option<PathBuf> {
    let files = list_files(dir);
    if files.is_empty() {
        return None;
    }

    let new_files: Vec<&PathBuf> = files
        .iter()
        .filter(|p| {
            p.file_name()
                .map(|n| !before.contains(n))
                .unwrap_or(false)
        })
        .collect();

    if !new_files.is_empty() {
        let matching: Vec<&PathBuf> = new_files
            .iter()
            .copied()
            .filter(|p| has_extension(p, expected_ext))
            .collect();
        if let Some(found) = newest(&matching) {
            return Some(found);
        }
        return newest(&new_files);
    }

    // No new files at all (the listing may have raced): fall back to the
    // newest existing file, preferring the expected extension.
    let matching: Vec<&PathBuf> = files
        .iter()
        .filter(|p| has_extension(p, expected_ext))
        .collect();
    if let Some(found) = newest(&matching) {
        return Some(found);
    }
    newest(&files.iter().collect::<Vec<_>>())
}

/// Newest file in `dir` carrying `ext`. Used by the transcription phase,
/// which has no handle to the final filename either.
pub fn newest_with_extension(dir: &Path, ext: &str) -> Option<PathBuf> {
    let files = list_files(dir);
    let matching: Vec<&PathBuf> = files.iter().filter(|p| has_extension(p, ext)).collect();
    newest(&matching)
}

fn list_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                files.push(path);
            }
        }
    }
    files
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

fn modified(path: &Path) -> SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn newest(candidates: &[&PathBuf]) -> Option<PathBuf> {
    candidates
        .iter()
        .max_by_key(|p| modified(p))
        .map(|p| (*p).clone())
}
