//! Media-fetch collaborator: a trait seam for the pipeline and the yt-dlp
//! subprocess implementation behind it.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;

use crate::job::{MediaKind, VideoQuality};
use crate::{CourierError, Result};

/// Overall wall-clock cap on one download. Surfaced as an ordinary
/// acquisition failure, not a distinct category.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Marker prepended to progress-template lines so they can be told apart
/// from other yt-dlp stdout chatter.
const PROGRESS_MARKER: &str = "courier|";

const PROGRESS_TEMPLATE: &str = "download:courier|%(progress.status)s|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s|%(progress.speed)s";

/// Metadata resolved without downloading.
#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub title: String,
    pub duration_seconds: Option<f64>,
    pub uploader: Option<String>,
}

/// One acquisition request: where to put the file and in what shape.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub output_dir: PathBuf,
    pub kind: MediaKind,
    pub quality: VideoQuality,
}

/// Phase of a progress callback from the collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Downloading,
    Finished,
}

/// Byte counters reported during acquisition. Totals may be absent or only
/// estimated; percent derivation lives in [`crate::progress::PercentTracker`].
#[derive(Debug, Clone)]
pub struct FetchProgress {
    pub status: FetchStatus,
    pub downloaded: Option<u64>,
    pub total: Option<u64>,
    pub total_estimate: Option<u64>,
    pub speed: Option<f64>,
}

/// Trait seam over the media-fetch collaborator.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Resolve title and basic metadata without downloading.
    async fn resolve_metadata(&self, url: &str) -> Result<MediaInfo>;

    /// Download into `request.output_dir` under a title-based template,
    /// streaming progress into the channel. The final filename is chosen by
    /// the collaborator and is not reported back.
    async fn download(
        &self,
        request: &FetchRequest,
        progress: UnboundedSender<FetchProgress>,
    ) -> Result<()>;
}

/// yt-dlp subprocess fetcher.
pub struct YtDlpFetcher {
    binary: PathBuf,
}

impl YtDlpFetcher {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("yt-dlp"),
        }
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Check if yt-dlp is runnable.
    pub async fn check_availability(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Find yt-dlp on PATH, or fall back to a managed copy under the data
    /// directory, downloading it once if necessary.
    pub async fn ensure_binary() -> Result<YtDlpFetcher> {
        let default = YtDlpFetcher::new();
        if default.check_availability().await {
            return Ok(default);
        }

        let managed = managed_binary_path()?;
        if !managed.exists() {
            tracing::info!("yt-dlp not found on PATH, downloading managed copy");
            download_managed_binary(&managed).await?;
        }
        Ok(YtDlpFetcher::with_binary(managed))
    }

    fn build_args(request: &FetchRequest) -> Vec<String> {
        let output_template = request
            .output_dir
            .join("%(title)s.%(ext)s")
            .to_string_lossy()
            .into_owned();

        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--newline".to_string(),
            "--progress-template".to_string(),
            PROGRESS_TEMPLATE.to_string(),
            "-o".to_string(),
            output_template,
        ];

        match request.kind {
            MediaKind::Audio => {
                args.extend(
                    [
                        "-f",
                        "bestaudio/best",
                        "--extract-audio",
                        "--audio-format",
                        "mp3",
                        "--audio-quality",
                        "192",
                    ]
                    .map(String::from),
                );
            }
            MediaKind::Video => {
                args.extend(
                    ["-f", request.quality.format_selector(), "--merge-output-format", "mp4"]
                        .map(String::from),
                );
            }
        }

        args.push(request.url.clone());
        args
    }
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn resolve_metadata(&self, url: &str) -> Result<MediaInfo> {
        tracing::debug!("resolving metadata for {}", url);

        let output = Command::new(&self.binary)
            .args(["--dump-json", "--no-playlist", url])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| CourierError::Metadata(format!("failed to run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CourierError::Metadata(stderr.trim().to_string()));
        }

        let info: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| CourierError::Metadata(format!("unparseable yt-dlp output: {}", e)))?;

        Ok(MediaInfo {
            title: info["title"].as_str().unwrap_or("media").to_string(),
            duration_seconds: info["duration"].as_f64(),
            uploader: info["uploader"].as_str().map(|s| s.to_string()),
        })
    }

    async fn download(
        &self,
        request: &FetchRequest,
        progress: UnboundedSender<FetchProgress>,
    ) -> Result<()> {
        let args = Self::build_args(request);
        tracing::debug!("spawning yt-dlp {:?}", args);

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CourierError::Acquisition(format!("failed to spawn yt-dlp: {}", e)))?;

        // Keep the tail of stderr for the failure message.
        let stderr_tail = Arc::new(Mutex::new(Vec::<String>::new()));
        if let Some(stderr) = child.stderr.take() {
            let tail = Arc::clone(&stderr_tail);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("yt-dlp stderr: {}", line);
                    let mut tail = tail.lock().unwrap();
                    tail.push(line);
                    if tail.len() > 50 {
                        tail.remove(0);
                    }
                }
            });
        }

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(update) = parse_progress_line(&line) {
                    // Receiver gone means the job is being torn down.
                    if progress.send(update).is_err() {
                        break;
                    }
                }
            }
        }

        let status = match tokio::time::timeout(DOWNLOAD_TIMEOUT, child.wait()).await {
            Ok(result) => result
                .map_err(|e| CourierError::Acquisition(format!("yt-dlp process failed: {}", e)))?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(CourierError::Acquisition(format!(
                    "yt-dlp timed out after {}s",
                    DOWNLOAD_TIMEOUT.as_secs()
                )));
            }
        };

        if !status.success() {
            let tail = stderr_tail.lock().unwrap().join("\n");
            let msg = if tail.is_empty() {
                format!("yt-dlp exited with {}", status)
            } else {
                tail
            };
            return Err(CourierError::Acquisition(msg));
        }

        Ok(())
    }
}

/// Parse one `--progress-template` line. Returns `None` for unrelated output.
fn parse_progress_line(line: &str) -> Option<FetchProgress> {
    let rest = line.trim().strip_prefix(PROGRESS_MARKER)?;
    let mut fields = rest.split('|');

    let status = match fields.next()? {
        "downloading" => FetchStatus::Downloading,
        "finished" => FetchStatus::Finished,
        _ => return None,
    };

    Some(FetchProgress {
        status,
        downloaded: parse_counter(fields.next()),
        total: parse_counter(fields.next()),
        total_estimate: parse_counter(fields.next()),
        speed: fields.next().and_then(|v| v.parse::<f64>().ok()),
    })
}

// yt-dlp renders missing fields as "NA" and byte counters occasionally as
// floats.
fn parse_counter(field: Option<&str>) -> Option<u64> {
    let field = field?;
    if field.is_empty() || field == "NA" {
        return None;
    }
    field.parse::<f64>().ok().map(|v| v as u64)
}

fn managed_binary_path() -> Result<PathBuf> {
    let data = dirs::data_dir()
        .ok_or_else(|| CourierError::Io("could not determine data directory".into()))?;
    let bin_name = if cfg!(target_os = "windows") {
        "yt-dlp.exe"
    } else {
        "yt-dlp"
    };
    Ok(data.join("media-courier").join("bin").join(bin_name))
}

async fn download_managed_binary(target: &Path) -> Result<()> {
    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let url = if cfg!(target_os = "windows") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp.exe"
    } else if cfg!(target_os = "macos") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_macos"
    } else {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp"
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(|e| CourierError::Io(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| CourierError::Io(format!("failed to download yt-dlp: {}", e)))?;

    if !response.status().is_success() {
        return Err(CourierError::Io(format!(
            "failed to download yt-dlp: HTTP {}",
            response.status()
        )));
    }

    let mut file = tokio::fs::File::create(target).await?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| CourierError::Io(e.to_string()))?;
        file.write_all(&chunk).await?;
    }
    file.sync_all().await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o755);
        tokio::fs::set_permissions(target, perms).await?;
    }

    Ok(())
}
