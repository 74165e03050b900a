use super::{ConversionRequest, ConvertError};
use crate::presets::{OutputFormat, find_format};
use crate::utils::sanitize_file_name;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

const OUTPUT_SUFFIX: &str = "_converted";

/// Everything needed to launch ffmpeg for one job.
#[derive(Clone, Debug, PartialEq)]
pub struct ConversionPlan {
    pub output_file_name: String,
    /// Options placed before `-i`
    pub input_options: Vec<String>,
    pub output_options: Vec<String>,
    /// Value for `-t`, placed after the output options
    pub duration_limit: Option<f64>,
    /// Length of the produced media, used to turn ffmpeg timestamps into percent
    pub effective_duration: Option<f64>,
}

impl ConversionPlan {
    pub fn command(&self, ffmpeg: &Path, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(ffmpeg);
        cmd.args([
            "-hide_banner",
            "-nostdin",
            "-loglevel",
            "error",
            "-progress",
            "pipe:1",
            "-nostats",
        ]);
        cmd.args(&self.input_options);
        cmd.arg("-i").arg(input);
        cmd.arg("-y");
        cmd.args(&self.output_options);
        if let Some(limit) = self.duration_limit {
            cmd.arg("-t").arg(format_seconds(limit));
        }
        cmd.arg(output);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Parse an `HH:MM:SS` timestamp into seconds.
///
/// Missing trailing parts count as zero (`"01"` is one hour), seconds may be
/// fractional.
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let parts = value.trim().split(':').collect::<Vec<_>>();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }

    let hours = parts[0].parse::<u64>().ok()?;
    let minutes = match parts.get(1) {
        Some(m) => m.parse::<u64>().ok()?,
        None => 0,
    };
    let seconds = match parts.get(2) {
        Some(s) => s.parse::<f64>().ok().filter(|s| s.is_finite() && *s >= 0.0)?,
        None => 0.0,
    };

    Some(hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds)
}

/// Build the ffmpeg options and output name for a request.
///
/// `duration` is the probed length of the input, when known.
pub fn plan(
    request: &ConversionRequest,
    original_name: &str,
    duration: Option<f64>,
) -> Result<ConversionPlan, ConvertError> {
    let (stem, original_extension) = split_name(original_name);

    if let Some(custom) = &request.custom_command {
        return Ok(ConversionPlan {
            output_file_name: format!("{stem}{OUTPUT_SUFFIX}{original_extension}"),
            input_options: Vec::new(),
            output_options: custom.split_whitespace().map(str::to_string).collect(),
            duration_limit: None,
            effective_duration: duration,
        });
    }

    let (Some(extension), Some(format_type)) = (&request.output_extension, &request.output_type)
    else {
        return Err(ConvertError::NoTarget);
    };
    let format = find_format(extension, format_type).ok_or(ConvertError::FormatNotFound)?;

    let mut plan = ConversionPlan {
        output_file_name: format!("{stem}{OUTPUT_SUFFIX}.{}", format.extension),
        input_options: Vec::new(),
        output_options: Vec::new(),
        duration_limit: None,
        effective_duration: duration,
    };
    apply_options(&mut plan, format, request, duration)?;
    Ok(plan)
}

fn apply_options(
    plan: &mut ConversionPlan,
    format: &OutputFormat,
    request: &ConversionRequest,
    duration: Option<f64>,
) -> Result<(), ConvertError> {
    let mut start = 0.0;

    for option in format.configurable_options {
        let Some(value) = request.option(option.id) else {
            continue;
        };
        if !option.validate(value) {
            return Err(ConvertError::InvalidOption {
                option: option.id.to_string(),
                value: value.to_string(),
            });
        }

        let out = &mut plan.output_options;
        match option.id {
            "resolution" => {
                if let Some(filter) = scale_filter(value) {
                    out.extend(["-vf".to_string(), filter]);
                }
            }
            "videoQuality" => out.extend(["-crf".to_string(), value.to_string()]),
            "videoBitrate" => out.extend(["-b:v".to_string(), format!("{value}M")]),
            "audioBitrate" => out.extend(["-b:a".to_string(), format!("{value}k")]),
            "audioQuality" => out.extend(["-q:a".to_string(), value.to_string()]),
            "speedPreset" => out.extend(["-preset".to_string(), value.to_string()]),
            "fps" => out.extend(["-r".to_string(), value.to_string()]),
            "quality" => out.extend(["-q:v".to_string(), value.to_string()]),
            "compressionLevel" => {
                out.extend(["-compression_level".to_string(), value.to_string()])
            }
            "lossless" => {
                if value == "true" {
                    out.extend(["-lossless".to_string(), "1".to_string()]);
                }
            }
            "startTime" => {
                start = parse_timestamp(value).unwrap_or(0.0);
                if start > 0.0 {
                    plan.input_options
                        .extend(["-ss".to_string(), format_seconds(start)]);
                }
            }
            "endTime" => {
                let start = request
                    .option("startTime")
                    .and_then(parse_timestamp)
                    .unwrap_or(0.0);
                let mut end = parse_timestamp(value).unwrap_or(0.0);
                if let Some(duration) = duration {
                    end = end.min(duration);
                }
                let limit = end - start;
                if limit > 0.0 {
                    plan.duration_limit = Some(limit);
                }
            }
            _ => {}
        }
    }

    plan.effective_duration = match (plan.duration_limit, duration) {
        (Some(limit), _) => Some(limit),
        (None, Some(duration)) if start > 0.0 => Some((duration - start).max(0.0)),
        (None, duration) => duration,
    };

    Ok(())
}

/// `NNNp` keeps the aspect ratio, `WxH` is taken literally, `Original` is left alone.
fn scale_filter(value: &str) -> Option<String> {
    if let Some(height) = value.strip_suffix('p')
        && let Ok(height) = height.parse::<u32>()
    {
        return Some(format!("scale=-2:{height}"));
    }

    if let Some((width, height)) = value.split_once('x')
        && let (Ok(width), Ok(height)) = (width.parse::<u32>(), height.parse::<u32>())
    {
        return Some(format!("scale={width}:{height}"));
    }

    None
}

/// Split an uploaded file name into a safe stem and its extension (with dot).
fn split_name(original_name: &str) -> (String, String) {
    let file_name = Path::new(original_name)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let file_name = sanitize_file_name(file_name);
    let path = Path::new(&file_name);

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty() && !s.starts_with('.'))
        .unwrap_or("output")
        .replace("..", "_");
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();

    (stem, extension)
}

fn format_seconds(seconds: f64) -> String {
    let rounded = (seconds * 1000.0).round() / 1000.0;
    format!("{rounded}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::path::PathBuf;

    fn request(extension: &str, format_type: &str, options: &[(&str, &str)]) -> ConversionRequest {
        let mut request = ConversionRequest::default();
        request.insert_field("outputExtension", extension.into());
        request.insert_field("outputType", format_type.into());
        for (name, value) in options {
            request.insert_field(name, (*value).into());
        }
        request
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("00:00:00"), Some(0.0));
        assert_eq!(parse_timestamp("00:01:30"), Some(90.0));
        assert_eq!(parse_timestamp("01:00:00"), Some(3600.0));
        assert_eq!(parse_timestamp("00:00:02.5"), Some(2.5));
        assert_eq!(parse_timestamp("00:02"), Some(120.0));

        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("abc"), None);
        assert_eq!(parse_timestamp("00:xx:10"), None);
        assert_eq!(parse_timestamp("00:00:00:00"), None);
        assert_eq!(parse_timestamp("-1:00:00"), None);
    }

    #[test]
    fn test_plan_preset_options_in_catalog_order() {
        let request = request(
            "mp4",
            "video",
            &[
                ("speedPreset", "fast"),
                ("videoQuality", "23"),
                ("resolution", "720p"),
                ("audioBitrate", "128"),
            ],
        );

        let plan = plan(&request, "holiday.mov", Some(60.0)).unwrap();

        assert_eq!(plan.output_file_name, "holiday_converted.mp4");
        assert!(plan.input_options.is_empty());
        assert_eq!(
            plan.output_options,
            [
                "-vf",
                "scale=-2:720",
                "-crf",
                "23",
                "-b:a",
                "128k",
                "-preset",
                "fast"
            ]
        );
        assert_eq!(plan.duration_limit, None);
        assert_eq!(plan.effective_duration, Some(60.0));
    }

    #[test]
    fn test_plan_original_resolution_adds_nothing() {
        let request = request("mp4", "video", &[("resolution", "Original")]);
        let plan = plan(&request, "a.mp4", None).unwrap();
        assert!(plan.output_options.is_empty());
    }

    #[test]
    fn test_plan_trim_window() {
        let request = request(
            "gif",
            "video",
            &[("startTime", "00:00:10"), ("endTime", "00:00:25")],
        );

        let plan = plan(&request, "clip.mp4", Some(120.0)).unwrap();

        assert_eq!(plan.output_file_name, "clip_converted.gif");
        assert_eq!(plan.input_options, ["-ss", "10"]);
        assert_eq!(plan.duration_limit, Some(15.0));
        assert_eq!(plan.effective_duration, Some(15.0));
    }

    #[test]
    fn test_plan_end_time_clamped_to_duration() {
        let request = request(
            "gif",
            "video",
            &[("startTime", "00:00:05"), ("endTime", "00:10:00")],
        );
        let plan = plan(&request, "clip.mp4", Some(20.0)).unwrap();
        assert_eq!(plan.duration_limit, Some(15.0));

        // end before start drops the limit, progress falls back to what is left
        let reversed = self::request(
            "gif",
            "video",
            &[("startTime", "00:00:30"), ("endTime", "00:00:10")],
        );
        let reversed_plan = super::plan(&reversed, "clip.mp4", Some(40.0)).unwrap();
        assert_eq!(reversed_plan.duration_limit, None);
        assert_eq!(reversed_plan.effective_duration, Some(10.0));
    }

    #[test]
    fn test_plan_image_options() {
        let request = request(
            "webp",
            "image",
            &[("quality", "80"), ("lossless", "true")],
        );
        let plan = plan(&request, "photo.png", None).unwrap();
        assert_eq!(plan.output_file_name, "photo_converted.webp");
        assert_eq!(plan.output_options, ["-q:v", "80", "-lossless", "1"]);

        let lossy = self::request("webp", "image", &[("lossless", "false")]);
        let lossy_plan = super::plan(&lossy, "photo.png", None).unwrap();
        assert!(!lossy_plan.output_options.contains(&"-lossless".to_string()));
    }

    #[test]
    fn test_plan_ignores_options_the_format_does_not_have() {
        let request = request("mp3", "audio", &[("resolution", "720p"), ("audioBitrate", "320")]);
        let plan = plan(&request, "song.wav", None).unwrap();
        assert_eq!(plan.output_options, ["-b:a", "320k"]);
    }

    #[test]
    fn test_plan_custom_command_wins() {
        let mut request = request("mp4", "video", &[("resolution", "720p")]);
        request.insert_field("customCommand", "  -c:v libx264   -an ".into());

        let plan = plan(&request, "clip.mkv", Some(10.0)).unwrap();

        assert_eq!(plan.output_file_name, "clip_converted.mkv");
        assert_eq!(plan.output_options, ["-c:v", "libx264", "-an"]);
        assert_eq!(plan.effective_duration, Some(10.0));
    }

    #[test]
    fn test_plan_errors() {
        let err = plan(&ConversionRequest::default(), "a.mp4", None).unwrap_err();
        assert!(matches!(err, ConvertError::NoTarget));

        let err = plan(&request("mp4", "", &[]), "a.mp4", None).unwrap_err();
        assert!(matches!(err, ConvertError::NoTarget));

        let err = plan(&request("xyz", "video", &[]), "a.mp4", None).unwrap_err();
        assert_eq!(err.to_string(), "Specified output format not found.");

        let err = plan(&request("mp3", "video", &[]), "a.mp4", None).unwrap_err();
        assert!(matches!(err, ConvertError::FormatNotFound));

        let err = plan(&request("mp4", "video", &[("speedPreset", "warp")]), "a.mp4", None)
            .unwrap_err();
        assert!(matches!(err, ConvertError::InvalidOption { .. }));
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("clip.mp4"), ("clip".into(), ".mp4".into()));
        assert_eq!(split_name("archive.tar.gz"), ("archive.tar".into(), ".gz".into()));
        assert_eq!(split_name("noext"), ("noext".into(), String::new()));
        assert_eq!(split_name("../../etc/passwd"), ("passwd".into(), String::new()));
        assert_eq!(split_name(""), ("output".into(), String::new()));
        assert_eq!(split_name("my \"clip\".mov"), ("my _clip_".into(), ".mov".into()));
        assert_eq!(split_name("a..b.mp4"), ("a_b".into(), ".mp4".into()));
    }

    #[test]
    fn test_scale_filter() {
        assert_eq!(scale_filter("1080p").as_deref(), Some("scale=-2:1080"));
        assert_eq!(scale_filter("1280x720").as_deref(), Some("scale=1280:720"));
        assert_eq!(scale_filter("Original"), None);
        assert_eq!(scale_filter("bigp"), None);
    }

    #[test]
    fn test_command_layout() {
        let plan = ConversionPlan {
            output_file_name: "a_converted.mp4".into(),
            input_options: vec!["-ss".into(), "5".into()],
            output_options: vec!["-crf".into(), "23".into()],
            duration_limit: Some(2.5),
            effective_duration: Some(2.5),
        };

        let cmd = plan.command(
            Path::new("/usr/bin/ffmpeg"),
            Path::new("/in/abc"),
            &PathBuf::from("/out/a_converted.mp4"),
        );
        let cmd = cmd.as_std();

        assert_eq!(cmd.get_program(), OsStr::new("/usr/bin/ffmpeg"));
        let args = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(
            args,
            [
                "-hide_banner",
                "-nostdin",
                "-loglevel",
                "error",
                "-progress",
                "pipe:1",
                "-nostats",
                "-ss",
                "5",
                "-i",
                "/in/abc",
                "-y",
                "-crf",
                "23",
                "-t",
                "2.5",
                "/out/a_converted.mp4"
            ]
        );
    }
}
