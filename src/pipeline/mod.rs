//! The job orchestrator: one linear pipeline per job, running on a worker
//! task, reporting progress through an event channel and polling a shared
//! cancellation flag between phases.
//!
//! Phase order: metadata, acquisition, artifact location (remote only),
//! remote delivery (remote only), transcription (local audio only),
//! finalization. Every phase boundary checks the flag; cancellation cleans
//! up any temp artifact and yields a distinct outcome, never a failure.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::config::SettingsStore;
use crate::fetch::{FetchProgress, FetchRequest, FetchStatus, MediaFetcher, MediaInfo};
use crate::job::{Destination, JobRequest, Outcome, RemoteTarget};
use crate::locator;
use crate::progress::{CancelFlag, Event, EventSender, LogKind, PercentTracker};
use crate::ssh::{remote_join, RemoteDelivery};
use crate::transcribe::Transcriber;
use crate::utils::format_file_size;
use crate::{CourierError, Result};

/// Job-scoped temporary download directory. Only one job runs at a time, so
/// a fixed well-known path is enough.
pub fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("media-courier")
}

/// Remove leftover files from a previous abnormal termination. Called at
/// application startup, never during an active job.
pub fn sweep_temp_dir(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!("could not sweep {}: {}", path.display(), e);
            }
        }
    }
    let _ = std::fs::remove_dir(dir);
}

enum DeliveryResult {
    Uploaded { remote_path: String },
    Cancelled,
}

/// Orchestrates one job end to end against the collaborator seams.
pub struct Pipeline {
    fetcher: Arc<dyn MediaFetcher>,
    remote: Arc<dyn RemoteDelivery>,
    transcriber: Arc<dyn Transcriber>,
    settings: Arc<SettingsStore>,
    temp_dir: PathBuf,
    settle_delay: Duration,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        remote: Arc<dyn RemoteDelivery>,
        transcriber: Arc<dyn Transcriber>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self {
            fetcher,
            remote,
            transcriber,
            settings,
            temp_dir: default_temp_dir(),
            settle_delay: Duration::from_secs(1),
        }
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Run one job to completion. Exactly one terminal [`Event::Finished`]
    /// is emitted, whatever happens.
    pub async fn run(&self, job: JobRequest, events: EventSender, cancel: CancelFlag) -> Outcome {
        let outcome = match self.execute(&job, &events, &cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("job failed: {}", e);
                log(&events, LogKind::Error, format!("Download error: {}", e));
                Outcome::failure(e.to_string())
            }
        };
        let _ = events.send(Event::Finished(outcome.clone()));
        outcome
    }

    async fn execute(
        &self,
        job: &JobRequest,
        events: &EventSender,
        cancel: &CancelFlag,
    ) -> Result<Outcome> {
        // Phase 1: metadata. Fatal on failure.
        if cancel.is_cancelled() {
            return Ok(Outcome::cancelled());
        }
        let info = self.fetcher.resolve_metadata(&job.source_url).await?;
        let _ = events.send(Event::Progress {
            percent: 0,
            message: format!("Starting download: {}", info.title),
        });
        log(events, LogKind::Info, describe_media(&info));

        // Phase 2 onwards depends on the destination.
        if cancel.is_cancelled() {
            return Ok(Outcome::cancelled());
        }
        let outcome = match &job.destination {
            Destination::Local(folder) => {
                self.run_local(job, &info, folder, events, cancel).await?
            }
            Destination::Remote(target) => {
                self.run_remote(job, &info, target, events, cancel).await?
            }
        };

        // Finalization side effect: remember the folder of a successful run.
        if outcome.is_success() {
            let persisted = match &job.destination {
                Destination::Local(folder) => self.settings.set_last_local_folder(folder),
                Destination::Remote(target) => {
                    self.settings.set_last_remote_folder(&target.remote_folder)
                }
            };
            if let Err(e) = persisted {
                tracing::warn!("could not persist folder preference: {}", e);
            }
        }

        Ok(outcome)
    }

    async fn run_local(
        &self,
        job: &JobRequest,
        info: &MediaInfo,
        folder: &Path,
        events: &EventSender,
        cancel: &CancelFlag,
    ) -> Result<Outcome> {
        let request = FetchRequest {
            url: job.source_url.clone(),
            output_dir: folder.to_path_buf(),
            kind: job.kind,
            quality: job.quality,
        };
        let (tx, forwarder) = spawn_progress_forwarder(events.clone(), 0, 100);
        let downloaded = self.fetcher.download(&request, tx).await;
        let _ = forwarder.await;
        downloaded?;

        // Phase 5: transcription, local audio only. Non-fatal.
        let mut note = String::new();
        if job.is_audio() && job.transcribe {
            if cancel.is_cancelled() {
                return Ok(Outcome::cancelled());
            }
            note = self.transcribe_newest(job, folder, events).await;
        }

        let _ = events.send(Event::Progress {
            percent: 100,
            message: "Download complete!".to_string(),
        });
        log(
            events,
            LogKind::Success,
            format!("Download complete! File saved in: {}", folder.display()),
        );
        Ok(Outcome::success(
            format!(
                "Download complete!\n\n{}\n\nSaved to: {}{}",
                info.title,
                folder.display(),
                note
            ),
            &info.title,
        ))
    }

    /// Transcribe the newest matching audio file in `folder`, returning the
    /// note appended to the outcome message.
    async fn transcribe_newest(
        &self,
        job: &JobRequest,
        folder: &Path,
        events: &EventSender,
    ) -> String {
        let _ = events.send(Event::Progress {
            percent: 95,
            message: "Transcribing audio...".to_string(),
        });
        log(events, LogKind::Info, "Starting transcription...".to_string());

        // Let the filesystem write settle; the final filename is not known,
        // only discoverable.
        tokio::time::sleep(self.settle_delay).await;

        let Some(audio) = locator::newest_with_extension(folder, job.kind.expected_extension())
        else {
            log(
                events,
                LogKind::Warning,
                "No audio file found to transcribe".to_string(),
            );
            return "\nTranscription failed: no audio file found".to_string();
        };

        match self
            .transcriber
            .transcribe(&audio, job.transcription_model, job.language.as_deref())
            .await
        {
            Ok(path) => {
                log(
                    events,
                    LogKind::Success,
                    format!("Transcript saved: {}", path.display()),
                );
                format!("\nTranscript: {}", path.display())
            }
            Err(e) => {
                log(events, LogKind::Warning, format!("Transcription error: {}", e));
                format!("\nTranscription failed: {}", e)
            }
        }
    }

    async fn run_remote(
        &self,
        job: &JobRequest,
        info: &MediaInfo,
        target: &RemoteTarget,
        events: &EventSender,
        cancel: &CancelFlag,
    ) -> Result<Outcome> {
        // Acquire into the job-scoped temp directory so the network leg is
        // decoupled from the local write.
        fs_err::create_dir_all(&self.temp_dir)?;
        let before = locator::snapshot(&self.temp_dir);

        log(
            events,
            LogKind::Info,
            "Downloading to temporary folder...".to_string(),
        );
        let request = FetchRequest {
            url: job.source_url.clone(),
            output_dir: self.temp_dir.clone(),
            kind: job.kind,
            quality: job.quality,
        };
        let (tx, forwarder) = spawn_progress_forwarder(events.clone(), 0, 60);
        let downloaded = self.fetcher.download(&request, tx).await;
        let _ = forwarder.await;
        downloaded?;

        tokio::time::sleep(self.settle_delay).await;

        // Phase 3: locate the artifact. A zero-byte file fails the job.
        let artifact = locator::locate_artifact(
            &self.temp_dir,
            &before,
            job.kind.expected_extension(),
        )
        .ok_or_else(|| CourierError::ArtifactNotFound {
            dir: self.temp_dir.display().to_string(),
            listing: locator::snapshot(&self.temp_dir)
                .into_iter()
                .map(|n| n.to_string_lossy().into_owned())
                .collect(),
        })?;
        let size = fs_err::metadata(&artifact)?.len();
        if size == 0 {
            return Err(CourierError::EmptyArtifact(artifact.display().to_string()));
        }
        let filename = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        log(
            events,
            LogKind::Info,
            format!("Downloaded: {} ({})", filename, format_file_size(size)),
        );

        // Phase 4: remote delivery.
        if cancel.is_cancelled() {
            self.remove_temp(&artifact);
            return Ok(Outcome::cancelled());
        }
        log(events, LogKind::Info, "Connecting to SSH server...".to_string());
        let _ = events.send(Event::Progress {
            percent: 60,
            message: "Connecting to server...".to_string(),
        });

        let delivered = self
            .deliver(target, &artifact, &filename, size, events, cancel)
            .await;

        match delivered? {
            DeliveryResult::Cancelled => {
                self.remove_temp(&artifact);
                Ok(Outcome::cancelled())
            }
            DeliveryResult::Uploaded { remote_path } => {
                self.remove_temp(&artifact);
                let _ = events.send(Event::Progress {
                    percent: 100,
                    message: "Download and upload complete!".to_string(),
                });
                log(
                    events,
                    LogKind::Success,
                    format!("File uploaded to: {}", remote_path),
                );
                Ok(Outcome::success(
                    format!(
                        "Download and upload complete!\n\n{}\n\nSaved on server: {}",
                        info.title, remote_path
                    ),
                    &info.title,
                ))
            }
        }
    }

    /// The whole SSH leg runs in one blocking closure owning the session,
    /// which is always closed before returning. On failure the temp artifact
    /// is left on disk for inspection.
    async fn deliver(
        &self,
        target: &RemoteTarget,
        artifact: &Path,
        filename: &str,
        size: u64,
        events: &EventSender,
        cancel: &CancelFlag,
    ) -> Result<DeliveryResult> {
        let delivery = Arc::clone(&self.remote);
        let target = target.clone();
        let artifact = artifact.to_path_buf();
        let filename = filename.to_string();
        let events = events.clone();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || {
            let mut session = delivery.connect(&target)?;
            log(&events, LogKind::Success, "SSH connection established".to_string());

            let result = (|| {
                log(&events, LogKind::Info, "Verifying remote folder...".to_string());
                let folder = target.remote_folder.as_str();
                if !session.dir_writable(folder)? {
                    session.create_dir(folder)?;
                }

                if cancel.is_cancelled() {
                    return Ok(DeliveryResult::Cancelled);
                }

                log(
                    &events,
                    LogKind::Info,
                    format!(
                        "Uploading {} ({}) to {}...",
                        filename,
                        format_file_size(size),
                        folder
                    ),
                );
                let _ = events.send(Event::Progress {
                    percent: 70,
                    message: "Uploading file...".to_string(),
                });

                let remote_path = remote_join(folder, &filename);
                let upload_events = events.clone();
                session.upload(&artifact, &remote_path, &mut |transferred, total| {
                    if total > 0 {
                        let percent = 70 + ((transferred as f64 / total as f64) * 28.0) as u8;
                        let _ = upload_events.send(Event::Progress {
                            percent,
                            message: format!(
                                "Uploading... {} / {}",
                                format_file_size(transferred),
                                format_file_size(total)
                            ),
                        });
                    }
                })?;

                Ok(DeliveryResult::Uploaded { remote_path })
            })();

            session.close();
            result
        })
        .await
        .map_err(|e| CourierError::Upload(format!("delivery worker failed: {}", e)))?
    }

    /// Best-effort removal of the temp artifact and its directory when empty.
    fn remove_temp(&self, artifact: &Path) {
        if artifact.exists() {
            if let Err(e) = std::fs::remove_file(artifact) {
                tracing::warn!("could not remove temp file {}: {}", artifact.display(), e);
            }
        }
        if let Ok(mut entries) = std::fs::read_dir(&self.temp_dir) {
            if entries.next().is_none() {
                let _ = std::fs::remove_dir(&self.temp_dir);
            }
        }
    }
}

fn log(events: &EventSender, kind: LogKind, message: String) {
    let _ = events.send(Event::Log { kind, message });
}

/// Start-of-job log line carrying whatever metadata was resolved.
fn describe_media(info: &MediaInfo) -> String {
    let mut line = format!("Starting download: {}", info.title);
    if let Some(uploader) = &info.uploader {
        line.push_str(&format!(" by {}", uploader));
    }
    if let Some(duration) = info.duration_seconds {
        let secs = duration.round() as u64;
        line.push_str(&format!(" [{}:{:02}]", secs / 60, secs % 60));
    }
    line
}

/// Bridge the fetch collaborator's byte counters into scaled overall
/// progress events. The returned sender is handed to the fetcher; the task
/// ends when it is dropped.
fn spawn_progress_forwarder(
    events: EventSender,
    base: u8,
    span: u8,
) -> (UnboundedSender<FetchProgress>, JoinHandle<()>) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<FetchProgress>();
    let handle = tokio::spawn(async move {
        let mut tracker = PercentTracker::new();
        while let Some(update) = rx.recv().await {
            match update.status {
                FetchStatus::Downloading => {
                    let percent =
                        tracker.update(update.downloaded, update.total, update.total_estimate);
                    let scaled = base + (percent as u32 * span as u32 / 100) as u8;
                    let speed = update
                        .speed
                        .map(|s| format!("{:.2} MB/s", s / 1024.0 / 1024.0))
                        .unwrap_or_else(|| "calculating...".to_string());
                    let _ = events.send(Event::Progress {
                        percent: scaled,
                        message: format!("Downloading... {}", speed),
                    });
                }
                FetchStatus::Finished => {
                    let _ = events.send(Event::Progress {
                        percent: base + span,
                        message: "Processing file...".to_string(),
                    });
                }
            }
        }
    });
    (tx, handle)
}

/// Single-active-job guard: spawns pipeline runs on worker tasks and
/// refuses to start a second job while one is active.
pub struct JobRunner {
    pipeline: Arc<Pipeline>,
    active: Arc<AtomicBool>,
}

impl JobRunner {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Launch a job on a worker task. Returns an error without any side
    /// effects when a job is already running.
    pub fn try_start(
        &self,
        job: JobRequest,
        events: EventSender,
        cancel: CancelFlag,
    ) -> Result<()> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CourierError::Validation(
                "a download is already in progress".into(),
            ));
        }

        let pipeline = Arc::clone(&self.pipeline);
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            pipeline.run(job, events, cancel).await;
            active.store(false, Ordering::SeqCst);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchProgress, FetchStatus};
    use crate::job::{MediaKind, OutcomeKind, VideoQuality};
    use crate::progress::event_channel;
    use crate::ssh::RemoteSession;
    use crate::transcribe::WhisperModel;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeFetcher {
        metadata_calls: AtomicUsize,
        download_calls: AtomicUsize,
        artifact_name: String,
        artifact_bytes: Vec<u8>,
        produce_artifact: bool,
        cancel_after_download: Option<CancelFlag>,
        download_delay: Duration,
    }

    impl FakeFetcher {
        fn new(artifact_name: &str) -> Self {
            Self {
                metadata_calls: AtomicUsize::new(0),
                download_calls: AtomicUsize::new(0),
                artifact_name: artifact_name.to_string(),
                artifact_bytes: b"media bytes".to_vec(),
                produce_artifact: true,
                cancel_after_download: None,
                download_delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl MediaFetcher for FakeFetcher {
        async fn resolve_metadata(&self, _url: &str) -> Result<MediaInfo> {
            self.metadata_calls.fetch_add(1, Ordering::SeqCst);
            Ok(MediaInfo {
                title: "Test Song".to_string(),
                duration_seconds: Some(180.0),
                uploader: None,
            })
        }

        async fn download(
            &self,
            request: &FetchRequest,
            progress: UnboundedSender<FetchProgress>,
        ) -> Result<()> {
            self.download_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.download_delay).await;
            if self.produce_artifact {
                std::fs::write(request.output_dir.join(&self.artifact_name), &self.artifact_bytes)?;
            }
            let _ = progress.send(FetchProgress {
                status: FetchStatus::Downloading,
                downloaded: Some(50),
                total: Some(100),
                total_estimate: None,
                speed: Some(1024.0),
            });
            let _ = progress.send(FetchProgress {
                status: FetchStatus::Finished,
                downloaded: Some(100),
                total: Some(100),
                total_estimate: None,
                speed: None,
            });
            if let Some(flag) = &self.cancel_after_download {
                flag.cancel();
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeDelivery {
        auth_failure: bool,
        dir_writable: bool,
        fail_upload: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl RemoteDelivery for FakeDelivery {
        fn connect(&self, _target: &RemoteTarget) -> Result<Box<dyn RemoteSession>> {
            if self.auth_failure {
                return Err(CourierError::Connect(
                    "authentication failed: invalid credentials".into(),
                ));
            }
            self.log.lock().unwrap().push("connect".into());
            Ok(Box::new(FakeSession {
                dir_writable: self.dir_writable,
                fail_upload: self.fail_upload,
                log: Arc::clone(&self.log),
            }))
        }
    }

    struct FakeSession {
        dir_writable: bool,
        fail_upload: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl RemoteSession for FakeSession {
        fn dir_writable(&mut self, _path: &str) -> Result<bool> {
            self.log.lock().unwrap().push("check".into());
            Ok(self.dir_writable)
        }

        fn create_dir(&mut self, _path: &str) -> Result<()> {
            self.log.lock().unwrap().push("mkdir".into());
            Ok(())
        }

        fn upload(
            &mut self,
            _local: &Path,
            remote: &str,
            progress: &mut dyn FnMut(u64, u64),
        ) -> Result<()> {
            self.log.lock().unwrap().push(format!("upload {}", remote));
            if self.fail_upload {
                return Err(CourierError::Upload("broken pipe".into()));
            }
            progress(5, 11);
            progress(11, 11);
            Ok(())
        }

        fn close(&mut self) {
            self.log.lock().unwrap().push("close".into());
        }
    }

    struct FakeTranscriber {
        fail: bool,
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn is_available(&self) -> bool {
            !self.fail
        }

        async fn transcribe(
            &self,
            audio: &Path,
            _model: WhisperModel,
            _language: Option<&str>,
        ) -> Result<PathBuf> {
            if self.fail {
                return Err(CourierError::Transcription("whisper is not installed".into()));
            }
            let path = crate::transcribe::transcript_path(audio);
            std::fs::write(&path, "transcript")?;
            Ok(path)
        }
    }

    struct Fixture {
        _config_dir: TempDir,
        temp_dir: TempDir,
        dest_dir: TempDir,
        delivery_log: Arc<Mutex<Vec<String>>>,
        pipeline: Arc<Pipeline>,
    }

    fn build_pipeline(
        fetcher: FakeFetcher,
        delivery: FakeDelivery,
        transcriber: FakeTranscriber,
    ) -> Fixture {
        let config_dir = TempDir::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let dest_dir = TempDir::new().unwrap();
        let delivery_log = Arc::clone(&delivery.log);
        let settings = Arc::new(SettingsStore::open(config_dir.path().join("settings.json")));
        let pipeline = Arc::new(
            Pipeline::new(
                Arc::new(fetcher),
                Arc::new(delivery),
                Arc::new(transcriber),
                settings,
            )
            .with_temp_dir(temp_dir.path())
            .with_settle_delay(Duration::ZERO),
        );
        Fixture {
            _config_dir: config_dir,
            temp_dir,
            dest_dir,
            delivery_log,
            pipeline,
        }
    }

    fn local_job(folder: &Path) -> JobRequest {
        JobRequest {
            source_url: "https://youtu.be/abc".to_string(),
            destination: Destination::Local(folder.to_path_buf()),
            kind: MediaKind::Audio,
            quality: VideoQuality::Best,
            transcribe: false,
            transcription_model: WhisperModel::Base,
            language: None,
        }
    }

    fn remote_job() -> JobRequest {
        JobRequest {
            source_url: "https://youtu.be/abc".to_string(),
            destination: Destination::Remote(RemoteTarget {
                host: "media.example.org".to_string(),
                port: 22,
                username: "uploader".to_string(),
                password: Some("hunter2".to_string()),
                key_file: None,
                remote_folder: "/srv/media".to_string(),
            }),
            kind: MediaKind::Audio,
            quality: VideoQuality::Best,
            transcribe: false,
            transcription_model: WhisperModel::Base,
            language: None,
        }
    }

    #[tokio::test]
    async fn test_cancel_before_start_touches_nothing() {
        let fetcher = FakeFetcher::new("Test Song.mp3");
        let fixture = build_pipeline(fetcher, FakeDelivery::default(), FakeTranscriber { fail: false });
        let (tx, _rx) = event_channel();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let outcome = fixture
            .pipeline
            .run(local_job(fixture.dest_dir.path()), tx, cancel)
            .await;

        assert_eq!(outcome.kind, OutcomeKind::Cancelled);
        // No collaborator was consulted: nothing was downloaded or uploaded.
        assert!(std::fs::read_dir(fixture.dest_dir.path()).unwrap().next().is_none());
        assert!(fixture.delivery_log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_after_acquisition_removes_temp_and_skips_upload() {
        let mut fetcher = FakeFetcher::new("Test Song.mp3");
        let cancel = CancelFlag::new();
        fetcher.cancel_after_download = Some(cancel.clone());
        let fixture = build_pipeline(fetcher, FakeDelivery::default(), FakeTranscriber { fail: false });
        let (tx, _rx) = event_channel();

        let outcome = fixture.pipeline.run(remote_job(), tx, cancel).await;

        assert_eq!(outcome.kind, OutcomeKind::Cancelled);
        assert!(!fixture.temp_dir.path().join("Test Song.mp3").exists());
        assert!(fixture.delivery_log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_success_emits_one_terminal_outcome() {
        let fixture = build_pipeline(
            FakeFetcher::new("Test Song.mp3"),
            FakeDelivery::default(),
            FakeTranscriber { fail: false },
        );
        let (tx, mut rx) = event_channel();

        let outcome = fixture
            .pipeline
            .run(local_job(fixture.dest_dir.path()), tx, CancelFlag::new())
            .await;

        assert!(outcome.is_success());
        assert!(outcome
            .message
            .contains(&fixture.dest_dir.path().display().to_string()));
        assert_eq!(outcome.artifact_title.as_deref(), Some("Test Song"));

        let mut finished = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, Event::Finished(_)) {
                finished += 1;
            }
        }
        assert_eq!(finished, 1);
    }

    #[tokio::test]
    async fn test_remote_success_uploads_and_cleans_temp() {
        let fixture = build_pipeline(
            FakeFetcher::new("Test Song.mp3"),
            FakeDelivery {
                dir_writable: true,
                ..Default::default()
            },
            FakeTranscriber { fail: false },
        );
        let (tx, _rx) = event_channel();

        let outcome = fixture.pipeline.run(remote_job(), tx, CancelFlag::new()).await;

        assert!(outcome.is_success());
        assert!(outcome.message.contains("/srv/media/Test Song.mp3"));
        assert!(!fixture.temp_dir.path().join("Test Song.mp3").exists());
        let log = fixture.delivery_log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "connect".to_string(),
                "check".to_string(),
                "upload /srv/media/Test Song.mp3".to_string(),
                "close".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_unwritable_remote_folder_is_created_then_uploaded() {
        let fixture = build_pipeline(
            FakeFetcher::new("Test Song.mp3"),
            FakeDelivery {
                dir_writable: false,
                ..Default::default()
            },
            FakeTranscriber { fail: false },
        );
        let (tx, _rx) = event_channel();

        let outcome = fixture.pipeline.run(remote_job(), tx, CancelFlag::new()).await;

        assert!(outcome.is_success());
        let log = fixture.delivery_log.lock().unwrap();
        assert!(log.contains(&"mkdir".to_string()));
        assert!(log.iter().any(|l| l.starts_with("upload ")));
    }

    #[tokio::test]
    async fn test_zero_byte_artifact_fails_before_delivery() {
        let mut fetcher = FakeFetcher::new("Test Song.mp3");
        fetcher.artifact_bytes = Vec::new();
        let fixture = build_pipeline(fetcher, FakeDelivery::default(), FakeTranscriber { fail: false });
        let (tx, _rx) = event_channel();

        let outcome = fixture.pipeline.run(remote_job(), tx, CancelFlag::new()).await;

        assert_eq!(outcome.kind, OutcomeKind::Failure);
        assert!(outcome.message.contains("empty"));
        assert!(fixture.delivery_log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_artifact_failure_lists_directory() {
        let mut fetcher = FakeFetcher::new("Test Song.mp3");
        fetcher.produce_artifact = false;
        let fixture = build_pipeline(fetcher, FakeDelivery::default(), FakeTranscriber { fail: false });
        let (tx, _rx) = event_channel();

        let outcome = fixture.pipeline.run(remote_job(), tx, CancelFlag::new()).await;

        assert_eq!(outcome.kind, OutcomeKind::Failure);
        assert!(outcome.message.contains("no downloaded file found"));
        assert!(outcome
            .message
            .contains(&fixture.temp_dir.path().display().to_string()));
        assert!(fixture.delivery_log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_auth_failure_never_reaches_upload() {
        let fixture = build_pipeline(
            FakeFetcher::new("Test Song.mp3"),
            FakeDelivery {
                auth_failure: true,
                ..Default::default()
            },
            FakeTranscriber { fail: false },
        );
        let (tx, _rx) = event_channel();

        let outcome = fixture.pipeline.run(remote_job(), tx, CancelFlag::new()).await;

        assert_eq!(outcome.kind, OutcomeKind::Failure);
        assert!(outcome.message.contains("authentication"));
        assert!(fixture.delivery_log.lock().unwrap().is_empty());
        // Failed delivery leaves the temp artifact for inspection.
        assert!(fixture.temp_dir.path().join("Test Song.mp3").exists());
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_temp_and_closes_session() {
        let fixture = build_pipeline(
            FakeFetcher::new("Test Song.mp3"),
            FakeDelivery {
                dir_writable: true,
                fail_upload: true,
                ..Default::default()
            },
            FakeTranscriber { fail: false },
        );
        let (tx, _rx) = event_channel();

        let outcome = fixture.pipeline.run(remote_job(), tx, CancelFlag::new()).await;

        assert_eq!(outcome.kind, OutcomeKind::Failure);
        assert!(fixture.temp_dir.path().join("Test Song.mp3").exists());
        let log = fixture.delivery_log.lock().unwrap();
        assert_eq!(log.last().unwrap(), "close");
    }

    #[tokio::test]
    async fn test_transcription_failure_is_non_fatal() {
        let fixture = build_pipeline(
            FakeFetcher::new("Test Song.mp3"),
            FakeDelivery::default(),
            FakeTranscriber { fail: true },
        );
        let (tx, _rx) = event_channel();
        let mut job = local_job(fixture.dest_dir.path());
        job.transcribe = true;

        let outcome = fixture.pipeline.run(job, tx, CancelFlag::new()).await;

        assert!(outcome.is_success());
        assert!(outcome.message.contains("Transcription failed"));
    }

    #[tokio::test]
    async fn test_transcription_success_notes_transcript() {
        let fixture = build_pipeline(
            FakeFetcher::new("Test Song.mp3"),
            FakeDelivery::default(),
            FakeTranscriber { fail: false },
        );
        let (tx, _rx) = event_channel();
        let mut job = local_job(fixture.dest_dir.path());
        job.transcribe = true;

        let outcome = fixture.pipeline.run(job, tx, CancelFlag::new()).await;

        assert!(outcome.is_success());
        assert!(outcome.message.contains("Transcript:"));
        assert!(fixture
            .dest_dir
            .path()
            .join("Test Song_transcription.txt")
            .exists());
    }

    #[tokio::test]
    async fn test_successful_run_persists_folder_preference() {
        let config_dir = TempDir::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let dest_dir = TempDir::new().unwrap();
        let settings_path = config_dir.path().join("settings.json");
        let settings = Arc::new(SettingsStore::open(&settings_path));
        let pipeline = Pipeline::new(
            Arc::new(FakeFetcher::new("Test Song.mp3")),
            Arc::new(FakeDelivery::default()),
            Arc::new(FakeTranscriber { fail: false }),
            Arc::clone(&settings),
        )
        .with_temp_dir(temp_dir.path())
        .with_settle_delay(Duration::ZERO);

        let (tx, _rx) = event_channel();
        let outcome = pipeline
            .run(local_job(dest_dir.path()), tx, CancelFlag::new())
            .await;

        assert!(outcome.is_success());
        assert_eq!(
            settings.last_local_folder().unwrap(),
            dest_dir.path().to_path_buf()
        );
    }

    #[tokio::test]
    async fn test_second_job_is_rejected_while_active() {
        let mut fetcher = FakeFetcher::new("Test Song.mp3");
        fetcher.download_delay = Duration::from_millis(200);
        let fixture = build_pipeline(fetcher, FakeDelivery::default(), FakeTranscriber { fail: false });
        let runner = JobRunner::new(Arc::clone(&fixture.pipeline));

        let (tx, mut rx) = event_channel();
        runner
            .try_start(local_job(fixture.dest_dir.path()), tx, CancelFlag::new())
            .unwrap();
        assert!(runner.is_active());

        let (tx2, _rx2) = event_channel();
        let rejected =
            runner.try_start(local_job(fixture.dest_dir.path()), tx2, CancelFlag::new());
        assert!(rejected.is_err());

        // Drain until the first job finishes; the guard releases afterwards.
        while let Some(event) = rx.recv().await {
            if matches!(event, Event::Finished(_)) {
                break;
            }
        }
    }

    #[test]
    fn test_describe_media_includes_uploader_and_duration() {
        let full = describe_media(&MediaInfo {
            title: "Test Song".to_string(),
            duration_seconds: Some(185.0),
            uploader: Some("Test Channel".to_string()),
        });
        assert_eq!(full, "Starting download: Test Song by Test Channel [3:05]");

        let bare = describe_media(&MediaInfo {
            title: "Test Song".to_string(),
            duration_seconds: None,
            uploader: None,
        });
        assert_eq!(bare, "Starting download: Test Song");
    }

    #[test]
    fn test_sweep_temp_dir() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("media-courier");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("leftover.mp3"), b"x").unwrap();

        sweep_temp_dir(&dir);
        assert!(!dir.exists());
    }
}
