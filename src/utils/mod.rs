use std::path::Path;
use url::Url;

use crate::{CourierError, Result};

/// Platforms yt-dlp handles that the URL validator recognizes up front.
/// Anything else is rejected before a job is ever launched.
const KNOWN_DOMAINS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "m.youtube.com",
    "twitter.com",
    "x.com",
    "vimeo.com",
    "soundcloud.com",
    "twitch.tv",
];

/// Validate a source URL: non-empty, http(s), and a recognized platform.
pub fn validate_url(url: &str) -> Result<Url> {
    let url = url.trim();
    if url.is_empty() {
        return Err(CourierError::Validation("URL must not be empty".into()));
    }

    let parsed = Url::parse(url)
        .map_err(|_| CourierError::Validation(format!("invalid URL format: {}", url)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(CourierError::Validation(
            "URL must use HTTP or HTTPS".into(),
        ));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| CourierError::Validation("URL has no host".into()))?;
    let bare = host.strip_prefix("www.").unwrap_or(host);
    if !KNOWN_DOMAINS.iter().any(|d| bare == *d || bare.ends_with(&format!(".{}", d))) {
        return Err(CourierError::Validation(format!(
            "unsupported platform: {}",
            host
        )));
    }

    Ok(parsed)
}

/// Validate a destination folder: create it when missing, reject anything
/// that exists but is not a directory.
pub fn validate_folder(folder: &Path) -> Result<()> {
    if folder.as_os_str().is_empty() {
        return Err(CourierError::Validation(
            "destination folder must not be empty".into(),
        ));
    }

    if !folder.exists() {
        fs_err::create_dir_all(folder).map_err(|e| {
            CourierError::Validation(format!("cannot create folder {}: {}", folder.display(), e))
        })?;
    }

    if !folder.is_dir() {
        return Err(CourierError::Validation(format!(
            "{} is not a directory",
            folder.display()
        )));
    }

    Ok(())
}

/// Format a byte count in human-readable form.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Check for the external tools the collaborators shell out to. Missing
/// entries are surfaced as warnings, never as a hard failure.
pub async fn check_dependencies() -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available("yt-dlp").await {
        missing.push("yt-dlp - required for media downloads".to_string());
    }

    if !check_command_available("ffmpeg").await {
        missing.push("ffmpeg - required for audio extraction and mp4 merging".to_string());
    }

    if !check_command_available("whisper").await {
        missing.push("whisper - required only when transcription is requested".to_string());
    }

    missing
}

/// Check if a command is available in PATH.
pub async fn check_command_available(command: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg("--help")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url_accepts_known_platforms() {
        assert!(validate_url("https://www.youtube.com/watch?v=abc123").is_ok());
        assert!(validate_url("https://youtu.be/abc123").is_ok());
        assert!(validate_url("  https://x.com/user/status/1  ").is_ok());
    }

    #[test]
    fn test_validate_url_rejects_bad_input() {
        assert!(validate_url("").is_err());
        assert!(validate_url("   ").is_err());
        assert!(validate_url("not-a-url").is_err());
        assert!(validate_url("ftp://youtube.com/x").is_err());
        assert!(validate_url("https://example.com/video").is_err());
    }

    #[test]
    fn test_validate_folder_creates_missing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let nested = tmp.path().join("a").join("b");
        assert!(validate_folder(&nested).is_ok());
        assert!(nested.is_dir());
    }

    #[test]
    fn test_validate_folder_rejects_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();
        assert!(validate_folder(&file).is_err());
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1024), "1.0 KB");
        assert_eq!(format_file_size(1048576), "1.0 MB");
    }
}
