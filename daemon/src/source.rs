//! Source classification: playable-URL checks, coarse format labels and
//! translation of platform media errors into user-facing messages.

use std::fmt;
use url::Url;

/// Message reported when no source was supplied at all
pub const MISSING_SOURCE_MESSAGE: &str = "No video source provided";

/// Message reported when a source fails the basic URL sanity check
pub const INVALID_SOURCE_MESSAGE: &str = "Invalid video URL";

/// Message reported when a temporary in-memory reference cannot be played
pub const BLOB_PREVIEW_MESSAGE: &str = "The temporary preview cannot be played";

/// Coarse container/protocol label used for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFormat {
    Mp4,
    WebM,
    Mov,
    Hls,
    Dash,
    Blob,
    Unknown,
}

impl VideoFormat {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::WebM => "webm",
            Self::Mov => "mov",
            Self::Hls => "hls",
            Self::Dash => "dash",
            Self::Blob => "blob",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// URL/format detection used by the loader.
pub trait SourceClassifier {
    /// Whether `src` plausibly points at something a media element can play
    fn is_valid_video_url(&self, src: &str) -> bool;

    fn format_label(&self, src: &str) -> VideoFormat;

    /// Whether `src` is an adaptive-streaming manifest
    fn is_manifest(&self, src: &str) -> bool {
        self.format_label(src) == VideoFormat::Hls
    }
}

/// Classifier based on URL scheme and path extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl SourceClassifier for DefaultClassifier {
    fn is_valid_video_url(&self, src: &str) -> bool {
        let src = src.trim();
        if is_blob_url(src) {
            return src.len() > "blob:".len();
        }
        if src.starts_with("data:video/") {
            return true;
        }

        match Url::parse(src) {
            Ok(url) => {
                matches!(url.scheme(), "http" | "https")
                    && url.host_str().is_some_and(|h| !h.is_empty())
            }
            Err(_) => false,
        }
    }

    fn format_label(&self, src: &str) -> VideoFormat {
        if is_blob_url(src) {
            return VideoFormat::Blob;
        }

        let path = match Url::parse(src) {
            Ok(url) => url.path().to_string(),
            Err(_) => src.split(['?', '#']).next().unwrap_or_default().to_string(),
        };

        let extension = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "mp4" | "m4v" => VideoFormat::Mp4,
            "webm" => VideoFormat::WebM,
            "mov" => VideoFormat::Mov,
            "m3u8" => VideoFormat::Hls,
            "mpd" => VideoFormat::Dash,
            _ => VideoFormat::Unknown,
        }
    }
}

/// Whether `src` is a short-lived in-memory object reference
pub fn is_blob_url(src: &str) -> bool {
    src.starts_with("blob:")
}

/// Error object reported by the platform with a media error event
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaErrorInfo {
    /// HTML media error code (1 aborted, 2 network, 3 decode, 4 unsupported)
    pub code: Option<u16>,
    pub message: Option<String>,
}

/// Turn a platform media error into a user-facing message and a diagnostic
/// details string.
pub fn classify_media_error(
    src: &str,
    format: VideoFormat,
    error: &MediaErrorInfo,
) -> (String, String) {
    let message = match error.code {
        Some(1) => "Video loading was aborted".to_string(),
        Some(2) => "A network error interrupted the video download".to_string(),
        Some(3) => "The video could not be decoded".to_string(),
        Some(4) if format != VideoFormat::Unknown => {
            format!("This video format is not supported ({})", format)
        }
        Some(4) => "This video format is not supported".to_string(),
        _ => "The video could not be played".to_string(),
    };

    let details = format!(
        "code={} format={} src={} message={}",
        error
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string()),
        format,
        src,
        error.message.as_deref().unwrap_or("none")
    );

    (message, details)
}
