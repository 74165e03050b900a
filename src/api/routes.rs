use crate::api::ApiError;
use crate::api::archive::{ARCHIVE_NAME, ArchiveEntry, build_archive};
use crate::app_state::AppState;
use crate::job::{Job, JobCounts, JobRegistry};
use crate::presets::{OutputFormat, output_formats};
use crate::upload::receive_upload;
use crate::utils::{RemoveOnDrop, is_safe_file_name, remove_file_quietly};
use axum::body::Body;
use axum::extract::{Extension, Multipart, Path as AxumPath, Query};
use axum::http::{HeaderValue, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures::{Stream, StreamExt};
use mime_guess::from_path;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    pub job_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadAllParams {
    pub job_ids: Option<String>,
    pub output_filenames: Option<String>,
}

pub async fn list_output_formats() -> Json<&'static [OutputFormat]> {
    Json(output_formats())
}

#[axum::debug_handler]
pub async fn waitlist(Extension(state): Extension<AppState>) -> Json<JobCounts> {
    Json(state.jobs.counts().await)
}

/// Accept an upload and start converting it in the background.
pub async fn convert(
    Extension(state): Extension<AppState>,
    multipart: Multipart,
) -> Result<Json<ConvertResponse>, ApiError> {
    let (upload, request) =
        receive_upload(multipart, state.upload_dir(), state.max_file_size).await?;
    let Some(upload) = upload else {
        return Err(ApiError::NoFile);
    };

    let job_id = state.jobs.create().await;
    info!(
        job_id,
        original_name = %upload.original_name,
        size = upload.size,
        output_extension = ?request.output_extension,
        output_type = ?request.output_type,
        custom = request.custom_command.is_some(),
        "Conversion job accepted"
    );

    state.spawn_conversion(job_id.clone(), upload, request);
    Ok(Json(ConvertResponse { job_id }))
}

/// Server-sent events with the job state, until the job ends or disappears.
pub async fn progress(
    Extension(state): Extension<AppState>,
    AxumPath(job_id): AxumPath<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if state.jobs.get(&job_id).await.is_none() {
        return Err(ApiError::JobNotFound);
    }
    debug!(job_id, "Progress stream opened");

    let stream = job_events(state.jobs.clone(), job_id, state.progress_interval);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn job_events(
    jobs: JobRegistry,
    job_id: String,
    period: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    struct Poll {
        jobs: JobRegistry,
        job_id: String,
        interval: Interval,
        done: bool,
    }

    let poll = Poll {
        jobs,
        job_id,
        interval,
        done: false,
    };

    futures::stream::unfold(poll, |mut poll| async move {
        if poll.done {
            return None;
        }
        // first tick completes immediately
        poll.interval.tick().await;

        let Some(job) = poll.jobs.get(&poll.job_id).await else {
            debug!(job_id = %poll.job_id, "Job gone, closing progress stream");
            return None;
        };
        poll.done = job.is_terminal();

        Some((Ok(job_event(&job)), poll))
    })
}

fn job_event(job: &Job) -> Event {
    Event::default()
        .json_data(job)
        .unwrap_or_else(|error| Event::default().data(format!(r#"{{"error":"{error}"}}"#)))
}

/// Stream a finished output once; the file and the job are gone afterwards.
pub async fn download(
    Extension(state): Extension<AppState>,
    AxumPath(job_id): AxumPath<String>,
) -> Result<Response, ApiError> {
    let Some(job) = state.jobs.take_completed(&job_id).await else {
        return Err(ApiError::NotReady);
    };
    let (Some(path), Some(name)) = (job.output_path, job.output_file_name) else {
        return Err(ApiError::NotReady);
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(error) => {
            warn!(job_id, ?path, %error, "Converted file missing");
            return Err(ApiError::NotReady);
        }
    };
    let size = file.metadata().await?.len();
    info!(job_id, name, size, "Serving converted file");

    let guard = RemoveOnDrop::new(path.clone());
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _ = &guard;
        chunk
    });

    let content_type = from_path(&path).first_or_octet_stream();
    attachment(
        Body::from_stream(stream),
        content_type.as_ref(),
        &name,
        size,
    )
}

pub async fn check_file(
    Extension(state): Extension<AppState>,
    AxumPath(filename): AxumPath<String>,
) -> Result<&'static str, ApiError> {
    if !is_safe_file_name(&filename) {
        warn!(filename, "Rejected file name");
        return Err(ApiError::InvalidFileName);
    }

    let path = state.output_dir().join(&filename);
    match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => Ok("File exists"),
        _ => Err(ApiError::FileNotFound),
    }
}

/// Zip the listed outputs, then delete them and forget their finished jobs.
pub async fn download_all(
    Extension(state): Extension<AppState>,
    Query(params): Query<DownloadAllParams>,
) -> Result<Response, ApiError> {
    let (Some(job_ids), Some(file_names)) = (params.job_ids, params.output_filenames) else {
        return Err(ApiError::BadRequest(
            "jobIds and outputFilenames are required.".to_string(),
        ));
    };
    let job_ids = split_list(&job_ids);
    let file_names = split_list(&file_names);
    if job_ids.is_empty() || job_ids.len() != file_names.len() {
        return Err(ApiError::BadRequest(
            "jobIds and outputFilenames must list the same number of entries.".to_string(),
        ));
    }
    if let Some(name) = file_names.iter().find(|name| !is_safe_file_name(name)) {
        warn!(name, "Rejected file name in archive request");
        return Err(ApiError::InvalidFileName);
    }

    let entries = file_names
        .iter()
        .map(|name| ArchiveEntry {
            name: name.to_string(),
            path: state.output_dir().join(name),
        })
        .collect::<Vec<_>>();

    let scratch_dir = state.output_dir().to_path_buf();
    let build_entries = entries.clone();
    let archive = tokio::task::spawn_blocking(move || build_archive(&scratch_dir, &build_entries))
        .await
        .map_err(|error| ApiError::Internal(format!("Archive task failed: {error}")))??;
    info!(files = ?archive.added, "Serving archive");

    for entry in &entries {
        remove_file_quietly(&entry.path).await;
    }
    for job_id in &job_ids {
        if state.jobs.remove_finished(job_id).await.is_none() {
            debug!(job_id, "Archived job unknown or still converting, kept");
        }
    }

    let file = tokio::fs::File::from_std(archive.file);
    let size = file.metadata().await?.len();
    attachment(
        Body::from_stream(ReaderStream::new(file)),
        "application/zip",
        ARCHIVE_NAME,
        size,
    )
}

fn split_list(list: &str) -> Vec<&str> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect()
}

fn attachment(body: Body, content_type: &str, name: &str, size: u64) -> Result<Response, ApiError> {
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{name}\""))
        .map_err(|_| ApiError::InvalidFileName)?;
    let content_type = HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, HeaderValue::from(size)),
        ],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("a, b,,c "), ["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }

    #[tokio::test]
    async fn test_job_events_end_after_terminal_state() {
        let jobs = JobRegistry::new();
        let id = jobs.create().await;
        jobs.set_progress(&id, 50.0).await;

        let stream = job_events(jobs.clone(), id.clone(), Duration::from_millis(10));
        futures::pin_mut!(stream);

        assert!(stream.next().await.is_some());

        jobs.complete(&id, 3).await;
        // at most one more processing event may have been polled before completion
        let mut remaining = 0;
        while stream.next().await.is_some() {
            remaining += 1;
        }
        assert!((1..=2).contains(&remaining));
    }

    #[tokio::test]
    async fn test_job_events_end_when_job_disappears() {
        let jobs = JobRegistry::new();
        let id = jobs.create().await;

        let stream = job_events(jobs.clone(), id.clone(), Duration::from_millis(10));
        futures::pin_mut!(stream);
        assert!(stream.next().await.is_some());

        jobs.remove(&id).await;
        assert!(stream.next().await.is_none());
    }
}
