use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::job::{MediaKind, VideoQuality};
use crate::transcribe::WhisperModel;

#[derive(Parser)]
#[command(
    name = "media-courier",
    about = "Media Courier - Download audio/video from YouTube and friends, locally or straight to an SSH server",
    version,
    long_about = "A CLI tool that downloads media from YouTube, Vimeo, SoundCloud and other platforms via yt-dlp, optionally uploads the result to a remote server over SSH/SFTP, and can transcribe downloaded audio with Whisper."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download media from a supported platform
    Download {
        /// URL to download (YouTube, Twitter/X, Vimeo, SoundCloud, Twitch)
        #[arg(value_name = "URL")]
        url: String,

        /// Local destination folder (defaults to the last-used folder)
        #[arg(short, long, value_name = "DIR", conflicts_with = "server")]
        output: Option<PathBuf>,

        /// Saved server profile to upload to instead of saving locally
        #[arg(short, long, value_name = "NAME")]
        server: Option<String>,

        /// Remote folder override when uploading to a server
        #[arg(long, value_name = "PATH", requires = "server")]
        remote_folder: Option<String>,

        /// Media format to produce (defaults to the saved default, else audio)
        #[arg(short, long, value_enum)]
        format: Option<MediaKind>,

        /// Maximum video quality (video format only)
        #[arg(long, value_enum, default_value = "best")]
        quality: VideoQuality,

        /// Transcribe the downloaded audio with Whisper
        #[arg(short, long)]
        transcribe: bool,

        /// Whisper model to use for transcription
        #[arg(short, long, value_enum, default_value = "base")]
        model: WhisperModel,

        /// Language code for transcription (auto-detect if not specified)
        #[arg(short, long, value_name = "LANG")]
        language: Option<String>,
    },

    /// Manage saved SSH server profiles
    Servers {
        #[command(subcommand)]
        action: ServerAction,
    },

    /// Show or change the persisted configuration
    Config {
        /// Set the default media format for downloads; shows the current
        /// configuration when omitted
        #[arg(long, value_enum, value_name = "FORMAT")]
        default_format: Option<MediaKind>,
    },

    /// List available Whisper transcription models
    Models,

    /// List supported platforms
    Platforms,
}

#[derive(Subcommand)]
pub enum ServerAction {
    /// List saved server profiles
    List,

    /// Add a server profile (replaces an existing profile with the same name)
    Add {
        /// Profile name
        #[arg(value_name = "NAME")]
        name: String,

        /// Server hostname or IP address
        #[arg(long, value_name = "HOST")]
        host: String,

        /// SSH port
        #[arg(long, default_value = "22")]
        port: u16,

        /// SSH username
        #[arg(long, value_name = "USER")]
        username: String,

        /// SSH password (omit to use a key file or the SSH agent)
        #[arg(long, value_name = "PASSWORD")]
        password: Option<String>,

        /// Path to a private key file
        #[arg(long, value_name = "FILE")]
        key_file: Option<PathBuf>,

        /// Default remote folder for uploads
        #[arg(long, value_name = "PATH")]
        remote_folder: String,

        /// Free-form note shown when listing profiles
        #[arg(long, value_name = "TEXT", default_value = "")]
        description: String,
    },

    /// Remove a server profile
    Remove {
        /// Profile name
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// List a remote folder's contents over SFTP
    Browse {
        /// Profile name
        #[arg(value_name = "NAME")]
        name: String,

        /// Folder to list (defaults to the profile's remote folder)
        #[arg(long, value_name = "PATH")]
        folder: Option<String>,
    },
}
