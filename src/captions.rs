//! Fallback tier: the open caption tracks a video publishes.
//!
//! Tracks come from the player response embedded in the watch page, or from the player
//! endpoint when the page carries none. The chosen track is downloaded as timed-text XML.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::Deserialize;
use serde_json::Value;

use crate::acquisition::TranscriptFetcher;
use crate::error::{AppError, Result};
use crate::parser::{self, PLAYER_RESPONSE_MARKERS};
use crate::{TranscriptSegment, USER_AGENT, collapse_whitespace, watch_url};

/// Language hint selecting the auto-generated caption track
pub const AUTO_LANGUAGE: &str = "auto";

const PLAYER_ENDPOINT: &str = "https://www.youtube.com/youtubei/v1/player";
const TRACKS_POINTER: &str = "/captions/playerCaptionsTracklistRenderer/captionTracks";

/// Span given to a cue without a duration
const DEFAULT_CUE_MS: u64 = 1000;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptionTrack {
    base_url: String,
    language_code: String,
    #[serde(default)]
    kind: Option<String>,
}

fn tracks_from_player(player: &Value) -> Vec<CaptionTrack> {
    player
        .pointer(TRACKS_POINTER)
        .cloned()
        .and_then(|tracks| serde_json::from_value(tracks).ok())
        .unwrap_or_default()
}

pub struct CaptionTrackFetcher {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl CaptionTrackFetcher {
    pub fn new(client: reqwest::Client, timeout: Option<Duration>) -> Self {
        Self { client, timeout }
    }

    fn with_timeout(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.timeout {
            Some(t) => request.timeout(t),
            None => request,
        }
    }

    async fn list_tracks(&self, video_id: &str, hl: &str) -> Result<Vec<CaptionTrack>> {
        let page = crate::http::send_text(
            self.with_timeout(self.client.get(watch_url(video_id)).header("User-Agent", USER_AGENT)),
            "fetch_watch_page",
        )
        .await?;

        if let Ok(player) = parser::parse_embedded_state(&page, PLAYER_RESPONSE_MARKERS, "list_caption_tracks") {
            let tracks = tracks_from_player(&player);
            if !tracks.is_empty() {
                debug!("{} caption tracks from the embedded player response", tracks.len());
                return Ok(tracks);
            }
        }

        let api_key = parser::extract_api_key(&page)
            .ok_or_else(|| AppError::not_found("list_caption_tracks", "no API key on the watch page"))?;
        let body = serde_json::json!({
            "context": {
                "client": {
                    "clientName": "WEB",
                    "clientVersion": parser::client_version(&page),
                    "hl": hl,
                    "gl": "US"
                }
            },
            "videoId": video_id
        });
        let request = self
            .client
            .post(format!("{PLAYER_ENDPOINT}?key={}&prettyPrint=false", urlencoding::encode(&api_key)))
            .header("User-Agent", USER_AGENT)
            .header("Content-Type", "application/json")
            .json(&body);
        let player = crate::http::send_json(self.with_timeout(request), "fetch_player_response").await?;
        Ok(tracks_from_player(&player))
    }
}

/// No hint takes the first track, `auto` the generated one, anything else an exact code
fn select_track<'a>(tracks: &'a [CaptionTrack], lang: Option<&str>) -> Option<&'a CaptionTrack> {
    match lang {
        None => tracks.first(),
        Some(AUTO_LANGUAGE) => tracks.iter().find(|t| t.kind.as_deref() == Some("asr")),
        Some(code) => tracks.iter().find(|t| t.language_code.eq_ignore_ascii_case(code)),
    }
}

/// Tracks to try for `hints`, in hint order, each distinct track once
fn candidate_tracks<'a, 'h>(
    tracks: &'a [CaptionTrack],
    hints: &[Option<&'h str>],
) -> Vec<(Option<&'h str>, &'a CaptionTrack)> {
    let mut candidates: Vec<(Option<&str>, &CaptionTrack)> = Vec::new();
    for &lang in hints {
        let Some(track) = select_track(tracks, lang) else { continue };
        if !candidates.iter().any(|(_, seen)| seen.base_url == track.base_url) {
            candidates.push((lang, track));
        }
    }
    candidates
}

/// Interface language for the player request
fn interface_language(lang: Option<&str>) -> &str {
    match lang {
        Some(code) if code != AUTO_LANGUAGE => code.split('-').next().unwrap_or(code),
        _ => "en",
    }
}

impl CaptionTrackFetcher {
    async fn available_tracks(&self, video_id: &str, hl: &str) -> Result<Vec<CaptionTrack>> {
        let tracks = self.list_tracks(video_id, hl).await?;
        if tracks.is_empty() {
            return Err(AppError::not_found(
                "fetch_caption_track",
                format!("video {video_id} publishes no caption tracks"),
            ));
        }
        Ok(tracks)
    }

    async fn download(&self, track: &CaptionTrack) -> Result<Vec<TranscriptSegment>> {
        debug!("Caption track {} (kind {:?})", track.language_code, track.kind);
        let xml = crate::http::send_text(
            self.with_timeout(self.client.get(&track.base_url).header("User-Agent", USER_AGENT)),
            "fetch_caption_track",
        )
        .await?;
        parse_caption_xml(&xml)
    }
}

fn no_track_error(tracks: &[CaptionTrack], wanted: &str) -> AppError {
    let available: Vec<&str> = tracks.iter().map(|t| t.language_code.as_str()).collect();
    AppError::not_found(
        "fetch_caption_track",
        format!("no caption track for {wanted}; available: {}", available.join(", ")),
    )
}

#[async_trait]
impl TranscriptFetcher for CaptionTrackFetcher {
    fn name(&self) -> &'static str {
        "caption-track"
    }

    async fn fetch(&self, video_id: &str, lang: Option<&str>) -> Result<Vec<TranscriptSegment>> {
        let tracks = self.available_tracks(video_id, interface_language(lang)).await?;
        let track = select_track(&tracks, lang).ok_or_else(|| no_track_error(&tracks, lang.unwrap_or("any")))?;
        self.download(track).await
    }

    /// Lists the tracks once, then walks the hints against that list
    async fn fetch_first(
        &self,
        video_id: &str,
        hints: &[Option<&str>],
    ) -> Result<(Option<String>, Vec<TranscriptSegment>)> {
        let hl = interface_language(hints.iter().copied().flatten().next());
        let tracks = self.available_tracks(video_id, hl).await?;

        let candidates = candidate_tracks(&tracks, hints);
        let mut last_err = None;
        for (lang, track) in candidates {
            match self.download(track).await {
                Ok(segments) if !segments.is_empty() => return Ok((lang.map(str::to_string), segments)),
                Ok(_) => debug!("Caption track {} is empty", track.language_code),
                Err(e) => {
                    debug!("Caption track {} failed: {e}", track.language_code);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            let wanted: Vec<&str> = hints.iter().map(|h| h.unwrap_or("any")).collect();
            no_track_error(&tracks, &wanted.join(", "))
        }))
    }
}

struct PendingCue {
    offset_ms: u64,
    duration_ms: u64,
    text: String,
}

fn is_cue(element: &[u8]) -> bool {
    element == b"text" || element == b"p"
}

/// Timing of a `<text start dur>` cue (seconds) or a `<p t d>` cue (milliseconds)
fn cue_timing(element: &BytesStart) -> (u64, u64) {
    let millis = element.name().as_ref() == b"p";
    let (start_key, dur_key): (&[u8], &[u8]) = if millis { (b"t", b"d") } else { (b"start", b"dur") };
    let scale = if millis { 1.0 } else { 1000.0 };

    let (mut start, mut dur) = (None, None);
    for attr in element.attributes().flatten() {
        let value = std::str::from_utf8(&attr.value).ok().and_then(|v| v.trim().parse::<f64>().ok());
        if attr.key.as_ref() == start_key {
            start = value;
        } else if attr.key.as_ref() == dur_key {
            dur = value;
        }
    }
    (
        start.map(|s| to_ms(s * scale)).unwrap_or(0),
        dur.map(|d| to_ms(d * scale)).unwrap_or(DEFAULT_CUE_MS),
    )
}

fn to_ms(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 { value.round() as u64 } else { 0 }
}

/// Parse a timed-text document into segments ordered by offset
fn parse_caption_xml(xml: &str) -> Result<Vec<TranscriptSegment>> {
    const OP: &str = "parse_caption_xml";
    let mut reader = Reader::from_str(xml);
    let mut segments = Vec::new();
    let mut pending: Option<PendingCue> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if is_cue(e.name().as_ref()) => {
                let (offset_ms, duration_ms) = cue_timing(&e);
                pending = Some(PendingCue { offset_ms, duration_ms, text: String::new() });
            }
            Ok(Event::Text(t)) => {
                if let Some(cue) = pending.as_mut() {
                    let raw = t.unescape().map_err(|e| AppError::parse(OP, format!("bad caption text: {e}")))?;
                    cue.text.push_str(&raw);
                }
            }
            Ok(Event::End(e)) if is_cue(e.name().as_ref()) => {
                if let Some(cue) = pending.take() {
                    let text = collapse_whitespace(&html_escape::decode_html_entities(&cue.text));
                    if !text.is_empty() {
                        segments.push(TranscriptSegment { text, offset_ms: cue.offset_ms, duration_ms: cue.duration_ms });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(AppError::parse(OP, format!("malformed caption XML: {e}"))),
            _ => {}
        }
    }

    segments.sort_by_key(|s| s.offset_ms);
    Ok(segments)
}
