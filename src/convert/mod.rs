//! Conversion orchestrator: turns an upload plus form fields into an ffmpeg run
//! and reports its progress into the job registry.

mod plan;
mod probe;
mod progress;
mod runner;

use std::collections::BTreeMap;
use std::io;
use thiserror::Error;

pub use plan::{ConversionPlan, parse_timestamp, plan};
pub use probe::probe_duration;
pub use progress::{ProgressParser, ProgressUpdate};
pub use runner::run_conversion;

pub const OUTPUT_EXTENSION_FIELD: &str = "outputExtension";
pub const OUTPUT_TYPE_FIELD: &str = "outputType";
pub const CUSTOM_COMMAND_FIELD: &str = "customCommand";

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Specified output format not found.")]
    FormatNotFound,

    #[error("No output format or custom ffmpeg command specified.")]
    NoTarget,

    #[error("Invalid value '{value}' for option '{option}'")]
    InvalidOption { option: String, value: String },

    #[error("ffprobe failed: {0}")]
    Probe(String),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("ffmpeg exited with code {code}: {message}")]
    Ffmpeg { code: i32, message: String },

    #[error("ffmpeg was terminated by a signal: {0}")]
    Terminated(String),

    #[error("Conversion queue closed")]
    QueueClosed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ConvertError {
    /// Exit code of the ffmpeg run that produced this error, if it ran to an exit.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ConvertError::Ffmpeg { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// What the client asked for, collected from the multipart text fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConversionRequest {
    pub output_extension: Option<String>,
    pub output_type: Option<String>,
    pub custom_command: Option<String>,
    /// Every other field, keyed by option id
    pub options: BTreeMap<String, String>,
}

impl ConversionRequest {
    /// Store one form field. Blank values count as absent.
    pub fn insert_field(&mut self, name: &str, value: String) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }

        let value = value.to_string();
        match name {
            OUTPUT_EXTENSION_FIELD => self.output_extension = Some(value),
            OUTPUT_TYPE_FIELD => self.output_type = Some(value),
            CUSTOM_COMMAND_FIELD => self.custom_command = Some(value),
            _ => {
                self.options.insert(name.to_string(), value);
            }
        }
    }

    pub fn option(&self, id: &str) -> Option<&str> {
        self.options.get(id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_field() {
        let mut request = ConversionRequest::default();
        request.insert_field("outputExtension", "mp4".into());
        request.insert_field("outputType", "video".into());
        request.insert_field("customCommand", "   ".into());
        request.insert_field("resolution", "720p".into());
        request.insert_field("startTime", " 00:00:05 ".into());
        request.insert_field("endTime", "".into());

        assert_eq!(request.output_extension.as_deref(), Some("mp4"));
        assert_eq!(request.output_type.as_deref(), Some("video"));
        assert!(request.custom_command.is_none());
        assert_eq!(request.option("resolution"), Some("720p"));
        assert_eq!(request.option("startTime"), Some("00:00:05"));
        assert!(request.option("endTime").is_none());
        assert_eq!(request.options.len(), 2);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ConvertError::FormatNotFound.to_string(),
            "Specified output format not found."
        );
        assert_eq!(
            ConvertError::Ffmpeg {
                code: 1,
                message: "Unknown encoder 'libfoo'".into()
            }
            .to_string(),
            "ffmpeg exited with code 1: Unknown encoder 'libfoo'"
        );
    }

    #[test]
    fn test_exit_code() {
        let error = ConvertError::Ffmpeg {
            code: 183,
            message: String::new(),
        };
        assert_eq!(error.exit_code(), Some(183));
        assert_eq!(ConvertError::Terminated(String::new()).exit_code(), None);
        assert_eq!(ConvertError::FormatNotFound.exit_code(), None);
    }
}
