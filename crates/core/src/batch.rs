//! Batch orchestration.
//! This module wires scanning, searching, selection and persistence into one
//! sequential run bracketed by login and logout.

use crate::persist::{destination_path, persist, DownloadRequest};
use crate::scan::{list_videos, VideoFile, VideoFormat};
use crate::select::{choose, SelectError, SubtitleCandidate};
use crate::service::{Language, Session, SubtitleService};
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use tracing::{debug, info, trace, warn};

/// Default 1-indexed rank of the subtitle to download.
pub const DEFAULT_RANK: usize = 1;

/// What to do with a video the search finds no subtitles for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingPolicy {
    /// Fail the whole run before anything is downloaded.
    #[default]
    Abort,
    /// Log the video as skipped and carry on with the rest. Videos that
    /// cannot be fingerprinted are skipped the same way.
    Skip,
}

/// Everything a run needs besides the service itself.
#[derive(Clone)]
pub struct BatchConfig {
    pub username: String,
    pub password: String,
    pub folder: PathBuf,
    pub format: VideoFormat,
    pub language: Language,
    /// Requested 1-indexed rank among candidates sorted by popularity.
    pub rank: usize,
    pub missing: MissingPolicy,
    /// Stop after selection without downloading anything.
    pub dry_run: bool,
}

/// Outcome of a successful run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Destination of every subtitle chosen, in processing order.
    pub planned: Vec<PathBuf>,
    /// Files actually written.
    pub written: Vec<PathBuf>,
    /// Videos without any subtitle, or too small to fingerprint, when
    /// skipping is enabled.
    pub skipped: Vec<PathBuf>,
}

/// Download subtitles for every matching video in the configured folder.
/// The folder is listed before logging in so a bad folder never reaches the
/// service. Once logged in, logout is attempted whatever happens next and a
/// failing logout is only logged.
pub fn run_batch<S: SubtitleService>(service: &S, config: &BatchConfig) -> Result<BatchReport> {
    trace!(
        "run_batch(folder={}, format={}, language={}, rank={})",
        config.folder.display(),
        config.format,
        config.language,
        config.rank
    );
    let videos = list_videos(&config.folder, config.format)?;
    info!(
        "found {} {} files in {}",
        videos.len(),
        config.format,
        config.folder.display()
    );

    let session = service
        .login(&config.username, &config.password)
        .context("login failed")?;
    info!("logged in");

    let outcome = process_videos(service, &session, &videos, config);

    match service.logout(session) {
        Ok(()) => info!("logged out"),
        Err(err) => warn!("logout failed: {err:#}"),
    }
    outcome
}

/// Search, choose and queue each video in turn, then download the queue.
fn process_videos<S: SubtitleService>(
    service: &S,
    session: &Session,
    videos: &[PathBuf],
    config: &BatchConfig,
) -> Result<BatchReport> {
    let mut report = BatchReport::default();
    let mut request = DownloadRequest::new();
    for path in videos {
        let video = match VideoFile::open(path) {
            Ok(video) => video,
            Err(err) if config.missing == MissingPolicy::Skip => {
                warn!("cannot fingerprint {}, skipping: {err:#}", path.display());
                report.skipped.push(path.clone());
                continue;
            }
            Err(err) => return Err(err),
        };
        let records = service
            .search(session, config.language, &video)
            .with_context(|| format!("search failed for {}", path.display()))?;
        let candidates = records.iter().map(SubtitleCandidate::from_record).collect();
        let choice = match choose(candidates, config.rank) {
            Ok(choice) => choice,
            Err(SelectError::NoCandidates) if config.missing == MissingPolicy::Skip => {
                warn!("no subtitles found for {}, skipping", path.display());
                report.skipped.push(path.clone());
                continue;
            }
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("cannot choose a subtitle for {}", path.display())))
            }
        };

        let summary = serde_json::to_string(&choice.candidate)?;
        if config.dry_run {
            info!("{} rank {}: {}", path.display(), choice.rank, summary);
        } else {
            debug!("{} rank {}: {}", path.display(), choice.rank, summary);
        }

        let file_id = choice
            .candidate
            .subtitle_file_id
            .clone()
            .ok_or_else(|| anyhow!("chosen subtitle for {} has no file id", path.display()))?;
        let destination = destination_path(&config.folder, &choice);
        info!("{} -> {}", path.display(), destination.display());
        request.queue(file_id, destination.clone())?;
        report.planned.push(destination);
    }

    if config.dry_run {
        info!("dry run, not downloading {} subtitles", request.len());
        return Ok(report);
    }
    if request.is_empty() {
        info!("nothing to download");
        return Ok(report);
    }
    info!("downloading {} subtitles", request.len());
    let subtitles = service
        .download(session, &request.ids())
        .context("download failed")?;
    report.written = persist(&request, subtitles)?;
    Ok(report)
}
