use super::{ConversionPlan, ConversionRequest, ConvertError, ProgressParser, plan, probe_duration};
use crate::app_state::AppState;
use crate::upload::UploadedFile;
use crate::utils::remove_file_quietly;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, error, info, warn};

/// Number of trailing stderr lines kept for the job error message.
const STDERR_TAIL_LINES: usize = 5;

/// Drive one job from upload to a terminal state.
///
/// Waits for a conversion permit first and holds it until ffmpeg exits.
/// The uploaded input is always removed when this returns.
pub async fn run_conversion(
    state: AppState,
    job_id: String,
    upload: UploadedFile,
    request: ConversionRequest,
) {
    let Ok(_permit) = state.convert_permits.clone().acquire_owned().await else {
        let error = ConvertError::QueueClosed;
        error!(job_id = %job_id, %error, "Conversion failed");
        state.jobs.fail(&job_id, error.to_string()).await;
        remove_file_quietly(&upload.path).await;
        return;
    };
    debug!(job_id = %job_id, "Conversion permit acquired");
    let started = Instant::now();

    match convert(&state, &job_id, &upload, &request).await {
        Ok(converted_size) => {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            info!(
                job_id = %job_id,
                converted_size,
                elapsed_ms,
                exit_code = 0,
                "Conversion completed"
            );
            state.jobs.complete(&job_id, converted_size).await;
        }
        Err(error) => {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let exit_code = error.exit_code();
            error!(job_id = %job_id, %error, elapsed_ms, ?exit_code, "Conversion failed");
            state.jobs.fail(&job_id, error.to_string()).await;
        }
    }

    remove_file_quietly(&upload.path).await;
}

async fn convert(
    state: &AppState,
    job_id: &str,
    upload: &UploadedFile,
    request: &ConversionRequest,
) -> Result<u64, ConvertError> {
    let duration = probe_duration(&state.ffprobe_path, &upload.path).await?;
    let plan = plan(request, &upload.original_name, duration)?;
    let (output_file_name, output_path) = state
        .jobs
        .claim_output(job_id, state.output_dir(), &plan.output_file_name)
        .await;
    info!(
        job_id,
        original_name = %upload.original_name,
        output = %output_file_name,
        ?duration,
        options = ?plan.output_options,
        "Starting ffmpeg"
    );

    if let Err(error) = run_ffmpeg(state, job_id, &plan, &upload.path, &output_path).await {
        remove_file_quietly(&output_path).await;
        return Err(error);
    }

    let converted_size = match tokio::fs::metadata(&output_path).await {
        Ok(metadata) => metadata.len(),
        Err(error) => {
            warn!(job_id, ?output_path, %error, "Failed to stat converted file");
            0
        }
    };
    Ok(converted_size)
}

async fn run_ffmpeg(
    state: &AppState,
    job_id: &str,
    plan: &ConversionPlan,
    input: &Path,
    output: &Path,
) -> Result<(), ConvertError> {
    let mut child = plan
        .command(&state.ffmpeg_path, input, output)
        .spawn()
        .map_err(|source| ConvertError::Spawn {
            program: state.ffmpeg_path.display().to_string(),
            source,
        })?;

    let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(stderr_tail(stderr)));

    if let Some(stdout) = child.stdout.take() {
        let mut parser = ProgressParser::new(plan.effective_duration);
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(update) = parser.feed(&line)
                && !update.finished
            {
                state.jobs.set_progress(job_id, update.percent).await;
            }
        }
    }

    let status = child.wait().await?;
    let message = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    if status.success() {
        if !message.is_empty() {
            debug!(job_id, stderr = %message, "ffmpeg finished with messages");
        }
        return Ok(());
    }

    match status.code() {
        Some(code) => Err(ConvertError::Ffmpeg { code, message }),
        None => Err(ConvertError::Terminated(message)),
    }
}

/// Read a stream to the end, keeping only its last non-empty lines.
async fn stderr_tail<R: AsyncRead + Unpin>(stderr: R) -> String {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(stderr).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.to_string());
            }
            Ok(None) => break,
            Err(error) => {
                warn!(%error, "Failed to read ffmpeg stderr");
                break;
            }
        }
    }

    Vec::from(tail).join("\n")
}
