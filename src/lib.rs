//! Media Courier - download media with yt-dlp, optionally transcribe it, and
//! deliver it to a remote server over SSH/SFTP.
//!
//! The library is a linear job pipeline: resolve metadata, acquire the file,
//! locate the produced artifact, then optionally upload and/or transcribe.
//! Cancellation is cooperative and checked between phases.

pub mod cli;
pub mod config;
pub mod fetch;
pub mod job;
pub mod locator;
pub mod pipeline;
pub mod progress;
pub mod ssh;
pub mod transcribe;
pub mod utils;

pub use config::{ServerProfiles, SettingsStore};
pub use fetch::{MediaFetcher, MediaInfo, YtDlpFetcher};
pub use job::{Destination, JobRequest, MediaKind, Outcome, OutcomeKind, RemoteTarget, VideoQuality};
pub use pipeline::{JobRunner, Pipeline};
pub use progress::{CancelFlag, Event, LogKind};
pub use transcribe::{Transcriber, WhisperCli, WhisperModel};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, CourierError>;

/// Phase-tagged errors of the job pipeline. Collaborator messages are carried
/// verbatim; only the phase in which they occurred is classified.
#[derive(thiserror::Error, Debug, Clone)]
pub enum CourierError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("metadata resolution failed: {0}")]
    Metadata(String),

    #[error("download failed: {0}")]
    Acquisition(String),

    #[error("no downloaded file found in {dir} (directory contents: {listing:?})")]
    ArtifactNotFound { dir: String, listing: Vec<String> },

    #[error("downloaded file is empty: {0}")]
    EmptyArtifact(String),

    #[error("SSH connection failed: {0}")]
    Connect(String),

    #[error("remote folder not usable: {0}")]
    RemoteFolder(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CourierError {
    fn from(err: std::io::Error) -> Self {
        CourierError::Io(err.to_string())
    }
}
