//! Download/clip pipeline.
//!
//! One job runs its stages in order: admission, account check, content cache
//! lookup, throttled download on a miss, then trim/crop. Progress is split
//! between the download (0-0.5) and transcode (0.5-1.0) stages and only
//! ever moves forward.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use clipdl_account::AccountService;
use clipdl_media::{
    admit_url, clip_output_filename, create_clip, download_video, fetch_metadata, resolve_tool,
    ClipRequest, DownloadRequest, ProcessSupervisor, SafetyThrottle,
};
use clipdl_models::{
    extract_youtube_id, validate_clip_range, ClipJob, JobEvent, JobId, JobStatus, Stage,
    VideoMetadata,
};
use clipdl_storage::{link_or_copy, move_file, CacheKey, ContentCache};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::JobLogger;
use crate::metrics::record_job;

const YTDLP: &str = "yt-dlp";
const FFMPEG: &str = "ffmpeg";

/// Job-private copy of the source video inside the work dir.
const SOURCE_FILE: &str = "source.mp4";
/// Work subdirectory the transcoder renders into.
const RENDER_DIR: &str = "render";

type EventSink = Option<UnboundedSender<JobEvent>>;

/// Job-level progress shared with the tool output callbacks.
#[derive(Clone)]
struct ProgressReporter {
    job_id: JobId,
    current: Arc<Mutex<f64>>,
    events: EventSink,
}

impl ProgressReporter {
    fn new(job: &ClipJob, events: EventSink) -> Self {
        Self {
            job_id: job.id.clone(),
            current: Arc::new(Mutex::new(job.progress)),
            events,
        }
    }

    fn report(&self, stage: Stage, fraction: f64) {
        let value = stage.scale(fraction);
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if value <= *current {
            return;
        }
        *current = value;
        drop(current);

        emit(
            &self.events,
            JobEvent::Progress {
                job_id: self.job_id.clone(),
                value,
            },
        );
    }
}

fn emit(events: &EventSink, event: JobEvent) {
    if let Some(tx) = events {
        // A closed receiver only means nobody is watching
        let _ = tx.send(event);
    }
}

/// Orchestrates downloader and transcoder runs for clip jobs.
pub struct ClipPipeline {
    config: PipelineConfig,
    supervisor: ProcessSupervisor,
    cache: Arc<ContentCache>,
    throttle: Arc<SafetyThrottle>,
    account: Option<AccountService>,
}

impl ClipPipeline {
    pub fn new(
        config: PipelineConfig,
        cache: Arc<ContentCache>,
        throttle: Arc<SafetyThrottle>,
        account: Option<AccountService>,
    ) -> Self {
        if account.is_none() {
            warn!("No account backend configured, credit checks disabled");
        }

        Self {
            config,
            supervisor: ProcessSupervisor::new(),
            cache,
            throttle,
            account,
        }
    }

    /// Open the content cache and safety state named by `config`.
    pub async fn from_config(
        config: PipelineConfig,
        account: Option<AccountService>,
    ) -> PipelineResult<Self> {
        let cache = ContentCache::open(config.cache_config()).await?;
        let throttle = SafetyThrottle::open(config.safety_config()).await;
        Ok(Self::new(config, Arc::new(cache), Arc::new(throttle), account))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    pub fn account(&self) -> Option<&AccountService> {
        self.account.as_ref()
    }

    /// Run `job` to completion.
    ///
    /// The job is updated in place and ends `Completed` or `Failed`. Events
    /// are sent to `events` as the job advances.
    pub async fn run(
        &self,
        job: &mut ClipJob,
        cancel: &CancellationToken,
        events: EventSink,
    ) -> PipelineResult<PathBuf> {
        let logger = JobLogger::new(job);
        let started = Instant::now();
        let job_dir = self.config.work_dir.join(job.id.as_str());

        let result = self
            .run_stages(job, &job_dir, cancel, &events, &logger)
            .instrument(logger.span())
            .await;

        remove_dir_quietly(&job_dir).await;

        match &result {
            Ok(output) => {
                record_job("completed", started.elapsed(), job.cache_hit);
                logger.log_completion(output, job.cache_hit, started.elapsed());
            }
            Err(e) => {
                let outcome = if matches!(e, PipelineError::Cancelled) {
                    "cancelled"
                } else {
                    "failed"
                };
                record_job(outcome, started.elapsed(), job.cache_hit);
                logger.log_failure(&e.to_string());

                if job.fail(e.to_string()).is_ok() {
                    emit(&events, JobEvent::status(&job.id, JobStatus::Failed));
                }
                emit(
                    &events,
                    JobEvent::Failed {
                        job_id: job.id.clone(),
                        message: e.to_string(),
                    },
                );
            }
        }

        result
    }

    async fn run_stages(
        &self,
        job: &mut ClipJob,
        job_dir: &Path,
        cancel: &CancellationToken,
        events: &EventSink,
        logger: &JobLogger,
    ) -> PipelineResult<PathBuf> {
        logger.log_start(&job.start, &job.end);

        // Reject bad input before spending credits or bandwidth
        let url = admit_url(&job.url)?;
        let range = validate_clip_range(&job.start, &job.end)
            .map_err(|e| PipelineError::invalid_input(e.to_string()))?;
        let ffmpeg = resolve_tool(self.config.ffmpeg_path.as_deref(), FFMPEG)?;

        if let Some(account) = &self.account {
            account.ensure_can_start(cancel).await?;
        }

        let content_id = extract_youtube_id(url.as_str()).ok();
        let key = CacheKey::derive(content_id.as_deref(), &job.url, job.quality);
        let reporter = ProgressReporter::new(job, events.clone());

        // The job links its own copy so eviction cannot pull the file away mid-clip
        let source = match self.cache.checkout(&key, &job_dir.join(SOURCE_FILE)).await {
            Some(entry) => {
                logger.log_cache(key.as_str(), true);
                job.cache_hit = true;
                entry.payload_path
            }
            None => {
                logger.log_cache(key.as_str(), false);
                advance(job, JobStatus::Downloading, events, logger)?;
                self.download_stage(job, job_dir, &key, content_id, cancel, events, logger, &reporter)
                    .await?
            }
        };

        advance(job, JobStatus::Processing, events, logger)?;

        let transcode = reporter.clone();
        let render_dir = job_dir.join(RENDER_DIR);
        let request = ClipRequest {
            input: &source,
            output_dir: &render_dir,
            start: &job.start,
            end: &job.end,
            aspect: job.aspect,
        };
        let rendered = create_clip(
            &self.supervisor,
            &ffmpeg,
            &request,
            self.config.transcode_timeout,
            cancel,
            move |fraction| transcode.report(Stage::Transcode, fraction),
        )
        .await?;

        // Clips of different sources share range-based names, so each source
        // gets its own directory; the rename replaces atomically
        let output = self
            .config
            .output_dir
            .join(key.as_str())
            .join(clip_output_filename(&range, job.aspect));
        move_file(&rendered, &output).await?;

        reporter.report(Stage::Transcode, 1.0);
        job.complete(output.clone())?;
        logger.log_status(JobStatus::Completed);
        emit(events, JobEvent::status(&job.id, JobStatus::Completed));
        emit(
            events,
            JobEvent::Completed {
                job_id: job.id.clone(),
                output_path: output.clone(),
                cache_hit: job.cache_hit,
            },
        );

        if let Some(account) = &self.account {
            if let Err(e) = account.record_credit_use(cancel).await {
                logger.log_warning(&format!("Failed to record credit use: {}", e));
            }
        }

        Ok(output)
    }

    /// Throttle, download and cache the source. Returns the payload to clip.
    #[allow(clippy::too_many_arguments)]
    async fn download_stage(
        &self,
        job: &mut ClipJob,
        job_dir: &Path,
        key: &CacheKey,
        content_id: Option<String>,
        cancel: &CancellationToken,
        events: &EventSink,
        logger: &JobLogger,
        reporter: &ProgressReporter,
    ) -> PipelineResult<PathBuf> {
        let ytdlp = resolve_tool(self.config.ytdlp_path.as_deref(), YTDLP)?;

        let directives = self.throttle.prepare().await;
        if let Some(notice) = &directives.notice {
            logger.log_notice(notice);
            emit(
                events,
                JobEvent::Notice {
                    job_id: job.id.clone(),
                    notice: notice.clone(),
                },
            );
        }

        debug!(delay_ms = directives.delay.as_millis() as u64, "Waiting before download");
        tokio::select! {
            _ = tokio::time::sleep(directives.delay) => {}
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        }

        let request = DownloadRequest {
            url: &job.url,
            quality: job.quality,
            work_dir: job_dir,
            key: key.as_str(),
            directives: &directives,
        };
        let download = reporter.clone();
        let downloaded = download_video(
            &self.supervisor,
            &ytdlp,
            &request,
            self.config.download_timeout,
            cancel,
            move |fraction| download.report(Stage::Download, fraction),
        )
        .await?;

        reporter.report(Stage::Download, 1.0);
        job.set_stage_progress(Stage::Download, 1.0);

        // Key the entry exactly as it was looked up
        let mut metadata = downloaded
            .metadata
            .unwrap_or_else(|| VideoMetadata::for_url(job.url.clone(), None));
        metadata.content_id = content_id;
        metadata.source_url = job.url.clone();

        // Keep a job-private link before the payload moves into the cache
        let source = job_dir.join(SOURCE_FILE);
        link_or_copy(&downloaded.path, &source).await?;

        if !self.cache.save(&downloaded.path, &metadata, job.quality).await {
            debug!(key = %key, "Download not cached, clipping from work dir");
        }

        Ok(source)
    }

    /// Metadata for `url`, from the metadata cache when possible.
    pub async fn metadata(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> PipelineResult<VideoMetadata> {
        let url = admit_url(url)?;
        let content_id = extract_youtube_id(url.as_str()).ok();

        if let Some(id) = &content_id {
            if let Some(metadata) = self.cache.lookup_metadata_only(id).await {
                debug!(content_id = %id, "Metadata served from cache");
                return Ok(metadata);
            }
        }

        let ytdlp = resolve_tool(self.config.ytdlp_path.as_deref(), YTDLP)?;
        let mut metadata = fetch_metadata(
            &self.supervisor,
            &ytdlp,
            url.as_str(),
            self.config.metadata_timeout,
            cancel,
        )
        .await?;

        if metadata.content_id.is_none() {
            metadata.content_id = content_id;
        }
        self.cache.save_metadata(&metadata).await;

        Ok(metadata)
    }
}

fn advance(
    job: &mut ClipJob,
    status: JobStatus,
    events: &EventSink,
    logger: &JobLogger,
) -> PipelineResult<()> {
    job.transition(status)?;
    logger.log_status(status);
    emit(events, JobEvent::status(&job.id, status));
    Ok(())
}

async fn remove_dir_quietly(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to remove job work dir"),
    }
}
