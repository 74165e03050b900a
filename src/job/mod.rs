pub mod registry;

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

pub use registry::{JobCounts, JobRegistry};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted, waiting for a permit or for the probe to finish
    Starting,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Starting => write!(f, "starting"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// State of a single conversion, as pushed to the progress stream.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub progress: f64,
    pub status: JobStatus,
    pub error: Option<String>,
    pub output_file_name: Option<String>,
    pub converted_size: u64,

    #[serde(skip)]
    pub output_path: Option<PathBuf>,
    #[serde(skip)]
    pub updated_at: Instant,
}

impl Job {
    pub fn new() -> Self {
        Self {
            progress: 0.0,
            status: JobStatus::Starting,
            error: None,
            output_file_name: None,
            converted_size: 0,
            output_path: None,
            updated_at: Instant::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn touch(&mut self) {
        self.updated_at = Instant::now();
    }
}

impl Default for Job {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_display() {
        assert_eq!(JobStatus::Starting.to_string(), "starting");
        assert_eq!(JobStatus::Processing.to_string(), "processing");
        assert_eq!(JobStatus::Completed.to_string(), "completed");
        assert_eq!(JobStatus::Error.to_string(), "error");
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Starting.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Error.is_terminal());
    }

    #[test]
    fn test_job_serialization_hides_internal_fields() {
        let mut job = Job::new();
        job.output_file_name = Some("clip_converted.mp4".to_string());
        job.output_path = Some(PathBuf::from("/srv/out/clip_converted.mp4"));

        let json = serde_json::to_value(&job).unwrap();

        assert_eq!(json["progress"], 0.0);
        assert_eq!(json["status"], "starting");
        assert!(json["error"].is_null());
        assert_eq!(json["outputFileName"], "clip_converted.mp4");
        assert_eq!(json["convertedSize"], 0);
        assert!(json.get("outputPath").is_none());
        assert!(json.get("updatedAt").is_none());
    }
}
