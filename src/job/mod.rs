use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::transcribe::WhisperModel;

/// What kind of media a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Extension the acquisition phase is expected to produce. The fetch
    /// collaborator may still pick another container; the artifact locator
    /// handles that case.
    pub fn expected_extension(&self) -> &'static str {
        match self {
            MediaKind::Audio => "mp3",
            MediaKind::Video => "mp4",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// Video quality ladder. Ignored for audio jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum VideoQuality {
    #[default]
    Best,
    #[value(name = "1080p")]
    P1080,
    #[value(name = "720p")]
    P720,
    #[value(name = "480p")]
    P480,
    #[value(name = "360p")]
    P360,
    #[value(name = "240p")]
    P240,
}

impl VideoQuality {
    /// yt-dlp format selector for this tier: height-capped mp4 video plus
    /// m4a audio, with a progressively looser fallback chain.
    pub fn format_selector(&self) -> &'static str {
        match self {
            VideoQuality::Best => "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best",
            VideoQuality::P1080 => {
                "bestvideo[height<=1080][ext=mp4]+bestaudio[ext=m4a]/best[height<=1080][ext=mp4]/best"
            }
            VideoQuality::P720 => {
                "bestvideo[height<=720][ext=mp4]+bestaudio[ext=m4a]/best[height<=720][ext=mp4]/best"
            }
            VideoQuality::P480 => {
                "bestvideo[height<=480][ext=mp4]+bestaudio[ext=m4a]/best[height<=480][ext=mp4]/best"
            }
            VideoQuality::P360 => {
                "bestvideo[height<=360][ext=mp4]+bestaudio[ext=m4a]/best[height<=360][ext=mp4]/best"
            }
            VideoQuality::P240 => {
                "bestvideo[height<=240][ext=mp4]+bestaudio[ext=m4a]/best[height<=240][ext=mp4]/best"
            }
        }
    }
}

/// Where a job delivers its artifact. Exactly one of the two.
#[derive(Debug, Clone)]
pub enum Destination {
    Local(PathBuf),
    Remote(RemoteTarget),
}

/// An SSH upload target. At least one of password/key file must be usable for
/// a successful connection; this is not enforced up front, the connection
/// attempt surfaces it.
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
    pub remote_folder: String,
}

/// Immutable input to one pipeline run.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub source_url: String,
    pub destination: Destination,
    pub kind: MediaKind,
    pub quality: VideoQuality,
    pub transcribe: bool,
    pub transcription_model: WhisperModel,
    pub language: Option<String>,
}

impl JobRequest {
    pub fn is_audio(&self) -> bool {
        self.kind == MediaKind::Audio
    }
}

/// Terminal classification of a job. Cancellation is deliberately neither
/// success nor failure so the caller can tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    Failure,
    Cancelled,
}

/// The single terminal record of one job, built exactly once at the end of
/// the pipeline and consumed exactly once by the frontend.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub kind: OutcomeKind,
    pub message: String,
    pub artifact_title: Option<String>,
}

impl Outcome {
    pub fn success(message: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Success,
            message: message.into(),
            artifact_title: Some(title.into()),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failure,
            message: message.into(),
            artifact_title: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: OutcomeKind::Cancelled,
            message: "Download cancelled by user".to_string(),
            artifact_title: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }
}
