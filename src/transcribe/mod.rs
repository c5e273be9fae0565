//! Transcription collaborator: trait seam plus the whisper CLI
//! implementation. A missing whisper installation is a recoverable
//! condition, never a crash; the pipeline treats transcription failures as
//! non-fatal.

use async_trait::async_trait;
use clap::ValueEnum;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::{CourierError, Result};

/// Whisper model sizes. Bigger is slower and more accurate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum WhisperModel {
    Tiny,
    #[default]
    Base,
    Small,
    Medium,
    Large,
}

impl WhisperModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            WhisperModel::Tiny => "tiny",
            WhisperModel::Base => "base",
            WhisperModel::Small => "small",
            WhisperModel::Medium => "medium",
            WhisperModel::Large => "large",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            WhisperModel::Tiny => "~39 MB, fastest, basic quality",
            WhisperModel::Base => "~74 MB, fast, good quality",
            WhisperModel::Small => "~244 MB, moderate speed, very good quality",
            WhisperModel::Medium => "~769 MB, slow, excellent quality",
            WhisperModel::Large => "~1.5 GB, slowest, best quality",
        }
    }
}

/// Trait seam over the transcription collaborator.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Whether the collaborator is installed and runnable.
    async fn is_available(&self) -> bool;

    /// Transcribe `audio`, writing a sibling text file. Returns the path of
    /// the written transcript.
    async fn transcribe(
        &self,
        audio: &Path,
        model: WhisperModel,
        language: Option<&str>,
    ) -> Result<PathBuf>;
}

/// Path of the transcript written next to `audio`.
pub fn transcript_path(audio: &Path) -> PathBuf {
    let stem = audio
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string());
    audio.with_file_name(format!("{}_transcription.txt", stem))
}

/// whisper CLI subprocess transcriber.
pub struct WhisperCli {
    binary: PathBuf,
}

impl WhisperCli {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("whisper"),
        }
    }

    fn render_transcript(audio: &Path, model: WhisperModel, text: &str) -> String {
        let rule = "=".repeat(80);
        format!(
            "{rule}\nAUDIO TRANSCRIPTION\n{rule}\nFile: {}\nModel: whisper {}\nDate: {}\n{rule}\n\n{}\n",
            audio.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            model.as_str(),
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            text.trim(),
        )
    }
}

impl Default for WhisperCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transcriber for WhisperCli {
    async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn transcribe(
        &self,
        audio: &Path,
        model: WhisperModel,
        language: Option<&str>,
    ) -> Result<PathBuf> {
        if !audio.exists() {
            return Err(CourierError::Transcription(format!(
                "audio file does not exist: {}",
                audio.display()
            )));
        }
        if !self.is_available().await {
            return Err(CourierError::Transcription(
                "whisper is not installed (pip install openai-whisper)".into(),
            ));
        }

        let output_dir = audio
            .parent()
            .ok_or_else(|| CourierError::Transcription("audio file has no parent".into()))?;

        let mut args: Vec<String> = vec![
            audio.to_string_lossy().into_owned(),
            "--model".into(),
            model.as_str().into(),
            "--output_format".into(),
            "txt".into(),
            "--output_dir".into(),
            output_dir.to_string_lossy().into_owned(),
            "--verbose".into(),
            "False".into(),
        ];
        if let Some(lang) = language {
            args.push("--language".into());
            args.push(lang.into());
        }

        tracing::info!("transcribing {} with whisper {}", audio.display(), model.as_str());

        let output = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| CourierError::Transcription(format!("failed to run whisper: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CourierError::Transcription(stderr.trim().to_string()));
        }

        // whisper writes <stem>.txt into the output dir; wrap it with a
        // header and rename to the sibling transcript.
        let raw = audio.with_extension("txt");
        let text = fs_err::read_to_string(&raw)
            .map_err(|e| CourierError::Transcription(format!("no transcript produced: {}", e)))?;
        let _ = fs_err::remove_file(&raw);

        let target = transcript_path(audio);
        fs_err::write(&target, Self::render_transcript(audio, model, &text))
            .map_err(|e| CourierError::Transcription(e.to_string()))?;

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_names() {
        assert_eq!(WhisperModel::Tiny.as_str(), "tiny");
        assert_eq!(WhisperModel::Large.as_str(), "large");
        assert_eq!(WhisperModel::default(), WhisperModel::Base);
    }

    #[test]
    fn test_transcript_path_is_sibling() {
        let audio = Path::new("/music/Song Title.mp3");
        assert_eq!(
            transcript_path(audio),
            PathBuf::from("/music/Song Title_transcription.txt")
        );
    }

    #[test]
    fn test_render_transcript_carries_metadata() {
        let text = WhisperCli::render_transcript(
            Path::new("/music/Song.mp3"),
            WhisperModel::Base,
            "  hello world  ",
        );
        assert!(text.contains("Song.mp3"));
        assert!(text.contains("whisper base"));
        assert!(text.contains("hello world"));
        assert!(!text.contains("  hello world  "));
    }
}
