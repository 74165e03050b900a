use crate::config::Config;
use crate::convert::{ConversionRequest, run_conversion};
use crate::job::JobRegistry;
use crate::upload::UploadedFile;
use crate::utils::remove_file_quietly;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

const REAPER_INTERVAL: Duration = Duration::from_secs(60);

async fn init_workspace(upload_dir: &Path, output_dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(upload_dir).await?;
    tokio::fs::create_dir_all(output_dir).await?;
    Ok(())
}

/// Jobs do not survive a restart, so uploads left behind can never be converted.
/// Only uuid-named files are touched.
async fn clear_stale_uploads(upload_dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(upload_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let is_upload = name
            .to_str()
            .is_some_and(|name| Uuid::parse_str(name).is_ok());
        if is_upload && entry.file_type().await?.is_file() {
            remove_file_quietly(&entry.path()).await;
            removed += 1;
        }
    }
    Ok(removed)
}

#[derive(Clone)]
pub struct AppState {
    pub jobs: JobRegistry,
    pub convert_permits: Arc<Semaphore>,

    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub max_file_size: u64,
    pub progress_interval: Duration,
}

impl AppState {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        init_workspace(&config.upload_dir, &config.output_dir).await?;

        let stale = clear_stale_uploads(&config.upload_dir).await?;
        if stale > 0 {
            info!(count = stale, upload_dir = ?config.upload_dir, "Removed stale uploads");
        }

        Ok(Self {
            jobs: JobRegistry::new(),
            convert_permits: Arc::new(Semaphore::new(config.permits)),

            upload_dir: config.upload_dir.clone(),
            output_dir: config.output_dir.clone(),
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            max_file_size: config.max_file_size,
            progress_interval: config.progress_interval(),
        })
    }

    pub fn upload_dir(&self) -> &Path {
        self.upload_dir.as_path()
    }

    pub fn output_dir(&self) -> &Path {
        self.output_dir.as_path()
    }

    /// Run a conversion in the background; the job already exists in the registry.
    pub fn spawn_conversion(
        &self,
        job_id: String,
        upload: UploadedFile,
        request: ConversionRequest,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { run_conversion(this, job_id, upload, request).await })
    }

    /// Periodically forget finished jobs nobody came back for and delete their outputs.
    pub fn start_reaper(&self, ttl: Duration) -> JoinHandle<()> {
        let jobs = self.jobs.clone();
        let period = ttl.min(REAPER_INTERVAL).max(Duration::from_millis(100));
        info!(?ttl, ?period, "Job reaper started");

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;

                let expired = jobs.drain_expired(ttl).await;
                if expired.is_empty() {
                    continue;
                }

                for (job_id, job) in &expired {
                    debug!(job_id, status = %job.status, "Expired job removed");
                    if let Some(path) = &job.output_path {
                        remove_file_quietly(path).await;
                    }
                }
                info!(count = expired.len(), "Removed expired jobs that were never downloaded");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(root: &Path) -> Config {
        Config {
            upload_dir: root.join("uploads"),
            output_dir: root.join("outputs"),
            permits: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_new_creates_dirs_and_clears_stale_uploads() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());

        std::fs::create_dir_all(&config.upload_dir).unwrap();
        let stale = config.upload_dir.join(Uuid::new_v4().to_string());
        let unrelated = config.upload_dir.join("keep-me.txt");
        std::fs::write(&stale, b"old upload").unwrap();
        std::fs::write(&unrelated, b"not ours").unwrap();

        let state = AppState::new(&config).await.unwrap();

        assert!(state.output_dir().is_dir());
        assert!(state.upload_dir().is_dir());
        assert!(!stale.exists());
        assert!(unrelated.exists());
        assert_eq!(state.convert_permits.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_reaper_removes_expired_jobs_and_outputs() {
        let root = tempfile::tempdir().unwrap();
        let state = AppState::new(&test_config(root.path())).await.unwrap();

        let done = state.jobs.create().await;
        let (_, output) = state
            .jobs
            .claim_output(&done, state.output_dir(), "old_converted.mp4")
            .await;
        std::fs::write(&output, b"converted").unwrap();
        state.jobs.complete(&done, 9).await;
        let running = state.jobs.create().await;

        let reaper = state.start_reaper(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(500)).await;
        reaper.abort();

        assert!(state.jobs.get(&done).await.is_none());
        assert!(!output.exists());
        assert!(state.jobs.get(&running).await.is_some());
    }
}
