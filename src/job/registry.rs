use super::{Job, JobStatus};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tracing::debug;
use uuid::Uuid;

/// In-memory map from job id to job state, shared by handlers and conversion tasks.
///
/// Nothing is persisted: a restart forgets every job.
#[derive(Clone, Debug, Default)]
pub struct JobRegistry {
    jobs: Arc<TokioMutex<HashMap<String, Job>>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub starting: usize,
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
    pub total: usize,
}

/// `song_converted.mp3` -> `song_converted-2.mp3`; attempt 0 keeps the name as is.
fn numbered_name(file_name: &str, attempt: usize) -> String {
    if attempt == 0 {
        return file_name.to_string();
    }
    match file_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => format!("{stem}-{attempt}.{extension}"),
        _ => format!("{file_name}-{attempt}"),
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new job in `starting` state and returns its id.
    pub async fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.jobs.lock().await.insert(id.clone(), Job::new());
        debug!(job_id = %id, "Job created");
        id
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.lock().await.get(id).cloned()
    }

    async fn update(&self, id: &str, f: impl FnOnce(&mut Job)) -> bool {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(id) {
            Some(job) => {
                f(job);
                job.touch();
                true
            }
            None => false,
        }
    }

    /// Assigns the job an output file in `output_dir`, starting from `file_name`.
    ///
    /// A name held by another job or already present on disk is skipped in favour of
    /// `<stem>-1.<ext>`, `<stem>-2.<ext>` and so on. Returns the name and path given out.
    pub async fn claim_output(
        &self,
        id: &str,
        output_dir: &Path,
        file_name: &str,
    ) -> (String, PathBuf) {
        let mut jobs = self.jobs.lock().await;

        let mut attempt = 0;
        let (name, path) = loop {
            let name = numbered_name(file_name, attempt);
            let path = output_dir.join(&name);
            let held = jobs.iter().any(|(other, job)| {
                other != id && job.output_file_name.as_deref() == Some(name.as_str())
            });
            let on_disk = tokio::fs::try_exists(&path).await.unwrap_or(false);
            if !held && !on_disk {
                break (name, path);
            }
            attempt += 1;
        };

        if attempt > 0 {
            debug!(
                job_id = %id,
                requested = %file_name,
                output = %name,
                "Output name taken, using a numbered variant"
            );
        }
        if let Some(job) = jobs.get_mut(id) {
            job.output_file_name = Some(name.clone());
            job.output_path = Some(path.clone());
            job.touch();
        }
        (name, path)
    }

    /// Records conversion progress; ignored once the job has finished.
    pub async fn set_progress(&self, id: &str, percent: f64) {
        if !percent.is_finite() {
            return;
        }

        self.update(id, |job| {
            if job.is_terminal() {
                return;
            }
            job.progress = percent.clamp(0.0, 100.0);
            job.status = JobStatus::Processing;
        })
        .await;
    }

    pub async fn complete(&self, id: &str, converted_size: u64) {
        self.update(id, |job| {
            job.progress = 100.0;
            job.status = JobStatus::Completed;
            job.converted_size = converted_size;
        })
        .await;
    }

    pub async fn fail(&self, id: &str, message: impl Into<String>) {
        let message = message.into();
        self.update(id, |job| {
            job.status = JobStatus::Error;
            job.error = Some(message);
        })
        .await;
    }

    /// Removes and returns the job only when it has completed.
    pub async fn take_completed(&self, id: &str) -> Option<Job> {
        let mut jobs = self.jobs.lock().await;
        if jobs.get(id)?.status != JobStatus::Completed {
            return None;
        }
        jobs.remove(id)
    }

    /// Removes and returns the job once it has completed or failed. A job still
    /// converting stays, since its task keeps reporting into it.
    pub async fn remove_finished(&self, id: &str) -> Option<Job> {
        let mut jobs = self.jobs.lock().await;
        if !jobs.get(id)?.is_terminal() {
            return None;
        }
        jobs.remove(id)
    }

    pub async fn remove(&self, id: &str) -> Option<Job> {
        self.jobs.lock().await.remove(id)
    }

    pub async fn counts(&self) -> JobCounts {
        let jobs = self.jobs.lock().await;
        let mut counts = JobCounts {
            total: jobs.len(),
            ..Default::default()
        };
        for job in jobs.values() {
            match job.status {
                JobStatus::Starting => counts.starting += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Error => counts.error += 1,
            }
        }
        counts
    }

    /// Removes finished jobs that have not changed for `ttl` and returns them.
    pub async fn drain_expired(&self, ttl: Duration) -> Vec<(String, Job)> {
        let mut jobs = self.jobs.lock().await;
        let expired = jobs
            .iter()
            .filter(|(_, job)| job.is_terminal() && job.updated_at.elapsed() >= ttl)
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();

        expired
            .into_iter()
            .filter_map(|id| jobs.remove(&id).map(|job| (id, job)))
            .collect()
    }
}
