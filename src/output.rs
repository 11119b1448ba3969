use crate::{Transcript, TranscriptSegment};

/// Segment text one per line, no timestamps
pub fn render_lines(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|s| s.text.trim())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render transcript as plain text (one segment per line, no timestamps)
pub fn render_text(transcript: &Transcript) -> String {
    render_lines(&transcript.segments)
}

pub fn render_json(transcript: &Transcript) -> serde_json::Result<String> {
    serde_json::to_string_pretty(transcript)
}

/// One `[m:ss] text` line per segment
pub fn render_timestamped(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|s| format!("[{}] {}", format_timestamp(s.offset_ms), s.text.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_srt(transcript: &Transcript) -> String {
    transcript
        .segments
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "{}\n{} --> {}\n{}\n",
                i + 1,
                srt_timestamp(s.offset_ms),
                srt_timestamp(s.end_ms()),
                s.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `m:ss`, or `h:mm:ss` past the hour
pub fn format_timestamp(ms: u64) -> String {
    let total = ms / 1000;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 { format!("{h}:{m:02}:{s:02}") } else { format!("{m}:{s:02}") }
}

/// `HH:MM:SS,mmm`
fn srt_timestamp(ms: u64) -> String {
    let (h, m, s, millis) = (ms / 3_600_000, (ms / 60_000) % 60, (ms / 1000) % 60, ms % 1000);
    format!("{h:02}:{m:02}:{s:02},{millis:03}")
}
