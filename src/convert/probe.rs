use super::ConvertError;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    /// ffprobe prints numbers as strings, `N/A` when unknown
    duration: Option<String>,
}

/// Ask ffprobe for the container duration in seconds.
///
/// A file ffprobe cannot read is an error; a readable file without a known
/// duration (still images, some streams) yields `None`.
pub async fn probe_duration(ffprobe: &Path, input: &Path) -> Result<Option<f64>, ConvertError> {
    let output = Command::new(ffprobe)
        .args(["-v", "error", "-print_format", "json", "-show_format"])
        .arg(input)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ConvertError::Spawn {
            program: ffprobe.display().to_string(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = stderr.trim();
        return Err(ConvertError::Probe(if message.is_empty() {
            format!("exited with {}", output.status)
        } else {
            message.to_string()
        }));
    }

    let duration = parse_duration(&output.stdout);
    debug!(?input, ?duration, "Probed input");
    Ok(duration)
}

fn parse_duration(stdout: &[u8]) -> Option<f64> {
    let probe: ProbeOutput = serde_json::from_slice(stdout).ok()?;
    probe
        .format
        .duration?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_duration() {
        let json = br#"{"format": {"filename": "in", "duration": "12.345000", "size": "1000"}}"#;
        assert_eq!(parse_duration(json), Some(12.345));

        assert_eq!(parse_duration(br#"{"format": {"duration": "N/A"}}"#), None);
        assert_eq!(parse_duration(br#"{"format": {}}"#), None);
        assert_eq!(parse_duration(br#"{}"#), None);
        assert_eq!(parse_duration(b"not json"), None);
    }

    #[tokio::test]
    async fn test_missing_ffprobe_is_spawn_error() {
        let result = probe_duration(
            &PathBuf::from("nonexistent_ffprobe_xyz_12345"),
            &PathBuf::from("/tmp/input"),
        )
        .await;

        assert!(matches!(result, Err(ConvertError::Spawn { .. })));
    }
}
