//! Output format catalog served to the front-end and used to build ffmpeg options.

use crate::convert::parse_timestamp;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatType {
    Video,
    Audio,
    Image,
}

impl FormatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatType::Video => "video",
            FormatType::Audio => "audio",
            FormatType::Image => "image",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Text(&'static str),
    Number(i64),
    Bool(bool),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OptionKind {
    Select { values: &'static [&'static str] },
    Range { min: i64, max: i64, step: i64 },
    Number,
    /// Free text, always an `HH:MM:SS` timestamp in this catalog
    Text,
    Checkbox,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ConfigurableOption {
    pub id: &'static str,
    pub label: &'static str,
    #[serde(flatten)]
    pub kind: OptionKind,
    pub default: DefaultValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<&'static str>,
}

impl ConfigurableOption {
    /// Check a submitted form value against the option kind.
    pub fn validate(&self, value: &str) -> bool {
        match self.kind {
            OptionKind::Select { values } => values.contains(&value),
            OptionKind::Range { min, max, .. } => value
                .parse::<i64>()
                .is_ok_and(|v| (min..=max).contains(&v)),
            OptionKind::Number => {
                is_plain_decimal(value) && value.parse::<f64>().is_ok_and(|v| v > 0.0)
            }
            OptionKind::Text => parse_timestamp(value).is_some(),
            OptionKind::Checkbox => matches!(value, "true" | "false"),
        }
    }
}

/// Digits with an optional fractional part: `128`, `29.97`. No sign or exponent.
fn is_plain_decimal(value: &str) -> bool {
    let (whole, fraction) = value.split_once('.').unwrap_or((value, "0"));
    !whole.is_empty()
        && !fraction.is_empty()
        && whole.bytes().all(|b| b.is_ascii_digit())
        && fraction.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputFormat {
    pub name: &'static str,
    pub extension: &'static str,
    #[serde(rename = "type")]
    pub format_type: FormatType,
    pub description: &'static str,
    pub configurable_options: &'static [ConfigurableOption],
}

impl OutputFormat {
    pub fn option(&self, id: &str) -> Option<&ConfigurableOption> {
        self.configurable_options.iter().find(|option| option.id == id)
    }
}

pub fn output_formats() -> &'static [OutputFormat] {
    OUTPUT_FORMATS
}

/// Look a format up by extension and type, both as submitted by the client.
pub fn find_format(extension: &str, format_type: &str) -> Option<&'static OutputFormat> {
    OUTPUT_FORMATS
        .iter()
        .find(|f| f.extension == extension && f.format_type.as_str() == format_type)
}

const SPEED_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
];

const fn option(
    id: &'static str,
    label: &'static str,
    kind: OptionKind,
    default: DefaultValue,
    tooltip: Option<&'static str>,
) -> ConfigurableOption {
    ConfigurableOption {
        id,
        label,
        kind,
        default,
        tooltip,
    }
}

const RESOLUTION: ConfigurableOption = option(
    "resolution",
    "Resolution",
    OptionKind::Select {
        values: &["Original", "480p", "720p", "1080p"],
    },
    DefaultValue::Text("720p"),
    None,
);

const VIDEO_QUALITY: ConfigurableOption = option(
    "videoQuality",
    "Video Quality (CRF)",
    OptionKind::Range {
        min: 18,
        max: 28,
        step: 1,
    },
    DefaultValue::Number(23),
    Some("Constant Rate Factor. Lower values mean higher quality."),
);

const AUDIO_BITRATE: ConfigurableOption = option(
    "audioBitrate",
    "Audio Bitrate (kbps)",
    OptionKind::Number,
    DefaultValue::Number(128),
    Some("Sets the target audio bitrate."),
);

const SPEED_PRESET: ConfigurableOption = option(
    "speedPreset",
    "Encoding Speed",
    OptionKind::Select {
        values: SPEED_PRESETS,
    },
    DefaultValue::Text("medium"),
    Some("Affects encoding speed and compression efficiency."),
);

const STANDARD_VIDEO: &[ConfigurableOption] =
    &[RESOLUTION, VIDEO_QUALITY, AUDIO_BITRATE, SPEED_PRESET];

const AUDIO_BITRATE_SELECT: ConfigurableOption = option(
    "audioBitrate",
    "Audio Bitrate (kbps)",
    OptionKind::Select {
        values: &["64", "128", "192", "256", "320"],
    },
    DefaultValue::Text("128"),
    Some("Higher bitrate means better audio quality."),
);

const fn image_quality(default: i64, tooltip: &'static str) -> ConfigurableOption {
    option(
        "quality",
        "Quality (%)",
        OptionKind::Range {
            min: 1,
            max: 100,
            step: 1,
        },
        DefaultValue::Number(default),
        Some(tooltip),
    )
}

const fn video(
    name: &'static str,
    extension: &'static str,
    description: &'static str,
    configurable_options: &'static [ConfigurableOption],
) -> OutputFormat {
    OutputFormat {
        name,
        extension,
        format_type: FormatType::Video,
        description,
        configurable_options,
    }
}

const fn audio(
    name: &'static str,
    extension: &'static str,
    description: &'static str,
    configurable_options: &'static [ConfigurableOption],
) -> OutputFormat {
    OutputFormat {
        name,
        extension,
        format_type: FormatType::Audio,
        description,
        configurable_options,
    }
}

const fn image(
    name: &'static str,
    extension: &'static str,
    description: &'static str,
    configurable_options: &'static [ConfigurableOption],
) -> OutputFormat {
    OutputFormat {
        name,
        extension,
        format_type: FormatType::Image,
        description,
        configurable_options,
    }
}

const WEBM_OPTIONS: &[ConfigurableOption] = &[
    RESOLUTION,
    option(
        "videoBitrate",
        "Video Bitrate (Mbps)",
        OptionKind::Number,
        DefaultValue::Number(2),
        Some("Sets the target video bitrate."),
    ),
    AUDIO_BITRATE,
    SPEED_PRESET,
];

const MOBILE_OPTIONS: &[ConfigurableOption] = &[
    option(
        "resolution",
        "Resolution",
        OptionKind::Select {
            values: &["Original", "176x144", "320x240"],
        },
        DefaultValue::Text("176x144"),
        None,
    ),
    VIDEO_QUALITY,
    option(
        "audioBitrate",
        "Audio Bitrate (kbps)",
        OptionKind::Number,
        DefaultValue::Number(64),
        Some("Sets the target audio bitrate."),
    ),
    SPEED_PRESET,
];

const GIF_OPTIONS: &[ConfigurableOption] = &[
    option(
        "fps",
        "Frames Per Second",
        OptionKind::Number,
        DefaultValue::Number(15),
        Some("Higher FPS means smoother animation but larger file size."),
    ),
    option(
        "startTime",
        "Start Time (HH:MM:SS)",
        OptionKind::Text,
        DefaultValue::Text("00:00:00"),
        Some("Start conversion from this timestamp."),
    ),
    option(
        "endTime",
        "End Time (HH:MM:SS)",
        OptionKind::Text,
        DefaultValue::Text("00:00:05"),
        Some("End conversion at this timestamp."),
    ),
    option(
        "resolution",
        "Resolution",
        OptionKind::Select {
            values: &["Original", "320p", "480p"],
        },
        DefaultValue::Text("320p"),
        None,
    ),
    SPEED_PRESET,
];

const BITRATE_AUDIO_OPTIONS: &[ConfigurableOption] = &[AUDIO_BITRATE_SELECT];

const OGG_OPTIONS: &[ConfigurableOption] = &[option(
    "audioQuality",
    "Audio Quality (qscale)",
    OptionKind::Range {
        min: 0,
        max: 10,
        step: 1,
    },
    DefaultValue::Number(5),
    Some("Quality scale for OGG. Higher values mean better quality."),
)];

const WMA_OPTIONS: &[ConfigurableOption] = &[option(
    "audioBitrate",
    "Audio Bitrate (kbps)",
    OptionKind::Select {
        values: &["64", "128", "192", "256"],
    },
    DefaultValue::Text("128"),
    None,
)];

const JPG_OPTIONS: &[ConfigurableOption] = &[image_quality(
    80,
    "JPEG quality. Lower values mean more compression and smaller file size.",
)];

const PNG_OPTIONS: &[ConfigurableOption] = &[option(
    "compressionLevel",
    "Compression Level",
    OptionKind::Range {
        min: 0,
        max: 9,
        step: 1,
    },
    DefaultValue::Number(6),
    Some("PNG compression level. Higher values mean more compression."),
)];

const BMP_OPTIONS: &[ConfigurableOption] = &[image_quality(
    100,
    "BMP quality. Lower values mean more compression and smaller file size.",
)];

const TIFF_OPTIONS: &[ConfigurableOption] = &[image_quality(
    100,
    "TIFF quality. Lower values mean more compression and smaller file size.",
)];

const WEBP_OPTIONS: &[ConfigurableOption] = &[
    image_quality(
        75,
        "WebP quality. Lower values mean more compression and smaller file size.",
    ),
    option(
        "lossless",
        "Lossless",
        OptionKind::Checkbox,
        DefaultValue::Bool(false),
        Some("Enable lossless compression. Larger files, no loss of image quality."),
    ),
];

const ICO_OPTIONS: &[ConfigurableOption] = &[image_quality(
    100,
    "ICO quality. Lower values mean more compression and smaller file size.",
)];

const SVG_OPTIONS: &[ConfigurableOption] = &[image_quality(
    100,
    "SVG quality. Lower values mean more compression and smaller file size.",
)];

static OUTPUT_FORMATS: &[OutputFormat] = &[
    // Video
    video("MP4", "mp4", "Convert to MP4 format.", STANDARD_VIDEO),
    video("WebM", "webm", "Convert to WebM format.", WEBM_OPTIONS),
    video("AVI", "avi", "Convert to AVI format.", STANDARD_VIDEO),
    video("MOV", "mov", "Convert to MOV (QuickTime) format.", STANDARD_VIDEO),
    video("MKV", "mkv", "Convert to MKV (Matroska) format.", STANDARD_VIDEO),
    video(
        "WMV",
        "wmv",
        "Convert to WMV (Windows Media Video) format.",
        STANDARD_VIDEO,
    ),
    video("MPEG", "mpeg", "Convert to MPEG format.", STANDARD_VIDEO),
    video(
        "3GP",
        "3gp",
        "Convert to 3GP format (for mobile devices).",
        MOBILE_OPTIONS,
    ),
    video("GIF", "gif", "Convert video to GIF.", GIF_OPTIONS),
    // Audio
    audio("MP3", "mp3", "Convert to MP3 format.", BITRATE_AUDIO_OPTIONS),
    audio("WAV", "wav", "Convert to WAV (Waveform Audio File Format).", &[]),
    audio("FLAC", "flac", "Convert to FLAC (Free Lossless Audio Codec).", &[]),
    audio(
        "AAC",
        "aac",
        "Convert to AAC (Advanced Audio Coding).",
        BITRATE_AUDIO_OPTIONS,
    ),
    audio("OGG", "ogg", "Convert to OGG Vorbis format.", OGG_OPTIONS),
    audio(
        "WMA",
        "wma",
        "Convert to WMA (Windows Media Audio) format.",
        WMA_OPTIONS,
    ),
    audio(
        "AIFF",
        "aiff",
        "Convert to AIFF (Audio Interchange File Format).",
        &[],
    ),
    audio(
        "M4A",
        "m4a",
        "Convert to M4A (MPEG-4 Audio) format.",
        BITRATE_AUDIO_OPTIONS,
    ),
    // Image
    image("JPG", "jpg", "Convert to JPEG format.", JPG_OPTIONS),
    image("PNG", "png", "Convert to PNG format.", PNG_OPTIONS),
    image("BMP", "bmp", "Convert to BMP (Bitmap) format.", BMP_OPTIONS),
    image(
        "TIFF",
        "tiff",
        "Convert to TIFF (Tagged Image File Format).",
        TIFF_OPTIONS,
    ),
    image("WebP", "webp", "Convert to WebP format.", WEBP_OPTIONS),
    image("ICO", "ico", "Convert to ICO (Windows Icon) format.", ICO_OPTIONS),
    image(
        "SVG",
        "svg",
        "Convert to SVG (Scalable Vector Graphics) format.",
        SVG_OPTIONS,
    ),
];
