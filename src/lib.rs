pub mod acquisition;
pub mod captions;
pub mod chunking;
pub mod config;
pub mod enhance;
pub mod error;
pub mod http;
pub mod metadata;
pub mod output;
pub mod parser;
pub mod providers;
pub mod service;
pub mod youtube;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub use error::{AppError, ErrorCode};

/// Desktop browser user agent sent with every page fetch
pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// A single timed unit of transcript text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    pub offset_ms: u64,
    pub duration_ms: u64,
}

impl TranscriptSegment {
    pub fn end_ms(&self) -> u64 {
        self.offset_ms.saturating_add(self.duration_ms)
    }
}

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_CHANNEL: &str = "Unknown Channel";
pub const NO_DESCRIPTION: &str = "No description available";

/// Best-effort video metadata; unresolved fields hold placeholders, never nothing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub channel: String,
    pub description: String,
    pub duration_seconds: Option<u64>,
}

impl Default for VideoMetadata {
    fn default() -> Self {
        Self {
            title: UNKNOWN_TITLE.to_string(),
            channel: UNKNOWN_CHANNEL.to_string(),
            description: NO_DESCRIPTION.to_string(),
            duration_seconds: None,
        }
    }
}

/// Which acquisition tier produced a transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TranscriptSource {
    /// Platform-internal transcript endpoint
    InnerTube,
    /// Caption track fallback
    CaptionTrack,
}

impl std::fmt::Display for TranscriptSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscriptSource::InnerTube => write!(f, "innertube"),
            TranscriptSource::CaptionTrack => write!(f, "caption-track"),
        }
    }
}

/// Complete transcript for a video
#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub video_id: String,
    pub language: Option<String>,
    pub source: TranscriptSource,
    pub segments: Vec<TranscriptSegment>,
}

impl Transcript {
    /// Segment text joined with single spaces, whitespace collapsed
    pub fn text(&self) -> String {
        join_segment_text(&self.segments)
    }
}

/// Join segment text with single spaces and collapse all whitespace runs
pub fn join_segment_text(segments: &[TranscriptSegment]) -> String {
    collapse_whitespace(
        &segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" "),
    )
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

static BARE_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]{11}$").unwrap());
static URL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"youtube\.com/watch\?(?:.*&)?v=([a-zA-Z0-9_-]{11})",
        r"youtu\.be/([a-zA-Z0-9_-]{11})",
        r"youtube\.com/embed/([a-zA-Z0-9_-]{11})",
        r"youtube\.com/shorts/([a-zA-Z0-9_-]{11})",
        r"youtube\.com/live/([a-zA-Z0-9_-]{11})",
        r"youtube\.com/v/([a-zA-Z0-9_-]{11})",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Extract video ID from various YouTube URL formats
pub fn extract_video_id(input: &str) -> Option<String> {
    let input = input.trim();

    if BARE_ID.is_match(input) {
        return Some(input.to_string());
    }

    URL_PATTERNS
        .iter()
        .find_map(|re| re.captures(input))
        .map(|caps| caps[1].to_string())
}

/// Canonical watch page URL for a video
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_video_id() {
        assert_eq!(extract_video_id("dQw4w9WgXcQ"), Some("dQw4w9WgXcQ".to_string()));
    }

    #[test]
    fn test_watch_url() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
    }

    #[test]
    fn test_watch_url_with_extra_params() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=120"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
    }

    #[test]
    fn test_short_url() {
        assert_eq!(
            extract_video_id("https://youtu.be/dQw4w9WgXcQ?si=abc"),
            Some("dQw4w9WgXcQ".to_string())
        );
    }

    #[test]
    fn test_embed_shorts_live_urls() {
        for url in [
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/live/dQw4w9WgXcQ",
        ] {
            assert_eq!(extract_video_id(url), Some("dQw4w9WgXcQ".to_string()), "{url}");
        }
    }

    #[test]
    fn test_invalid_url() {
        assert_eq!(extract_video_id("not-a-valid-id"), None);
        assert_eq!(extract_video_id(""), None);
    }

    #[test]
    fn test_whitespace_trimming() {
        assert_eq!(extract_video_id("  dQw4w9WgXcQ  "), Some("dQw4w9WgXcQ".to_string()));
    }

    #[test]
    fn test_join_segment_text_collapses_whitespace() {
        let segments = vec![
            TranscriptSegment { text: " hello\n".into(), offset_ms: 0, duration_ms: 1000 },
            TranscriptSegment { text: "world  again".into(), offset_ms: 1000, duration_ms: 1000 },
        ];
        assert_eq!(join_segment_text(&segments), "hello world again");
    }

    #[test]
    fn test_end_ms_saturates() {
        let segment = TranscriptSegment { text: "late".into(), offset_ms: u64::MAX - 10, duration_ms: 1000 };
        assert_eq!(segment.end_ms(), u64::MAX);
    }

    #[test]
    fn test_metadata_placeholders() {
        let meta = VideoMetadata::default();
        assert_eq!(meta.title, UNKNOWN_TITLE);
        assert_eq!(meta.channel, UNKNOWN_CHANNEL);
        assert!(meta.duration_seconds.is_none());
    }
}
