//! Parsing of YouTube page payloads and transcript endpoint responses.
//!
//! The internal JSON schema drifts between releases, so segment lookup tries a primary path,
//! then one alternate path, then a bounded walk over every key mentioning "transcript".
//! Nothing here touches the network.

use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use serde_json::Value;

use crate::TranscriptSegment;
use crate::error::{AppError, Result};

/// Markers that precede the embedded page state blobs
pub const INITIAL_DATA_MARKERS: &[&str] = &["var ytInitialData = ", "window[\"ytInitialData\"] = "];
pub const PLAYER_RESPONSE_MARKERS: &[&str] =
    &["var ytInitialPlayerResponse = ", "window[\"ytInitialPlayerResponse\"] = "];

const PRIMARY_SEGMENTS_PATH: &str = "/actions/0/updateEngagementPanelAction/content/transcriptRenderer/content/transcriptSearchPanelRenderer/body/transcriptSegmentListRenderer/initialSegments";
const ALTERNATE_SEGMENTS_PATH: &str =
    "/actions/0/updateEngagementPanelAction/content/transcriptRenderer/body/transcriptBodyRenderer/cueGroups";

/// Depth limit for the fallback tree walk
const MAX_SEARCH_DEPTH: usize = 24;

/// Default span given to a segment with no parsable end time
const DEFAULT_SEGMENT_MS: u64 = 1000;

const DEFAULT_CLIENT_NAME: &str = "WEB";
const DEFAULT_CLIENT_VERSION: &str = "2.20241126.01.00";

/// Request parameters scraped from the watch page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageState {
    pub api_key: Option<String>,
    pub client_name: String,
    pub client_version: String,
    pub hl: String,
    pub gl: String,
    pub transcript_params: String,
}

/// Metadata fields scraped from the watch page; any may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub channel: Option<String>,
    pub description: Option<String>,
    pub duration_seconds: Option<u64>,
}

/// Slice out the JSON object that follows `marker`, honoring nested braces and strings
pub fn embedded_json<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let after = text.find(marker)? + marker.len();
    let rest = &text[after..];
    let open = rest.find('{')?;
    let body = &rest[open..];

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&body[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Locate and decode the first embedded blob found under any of `markers`
pub fn parse_embedded_state(html: &str, markers: &[&str], operation: &str) -> Result<Value> {
    let raw = markers
        .iter()
        .find_map(|m| embedded_json(html, m))
        .ok_or_else(|| AppError::not_found(operation, "embedded page state not found"))?;
    serde_json::from_str(raw)
        .map_err(|e| AppError::parse(operation, format!("malformed embedded page state: {e}")))
}

/// Parse the raw JSON body returned by the transcript endpoint
pub fn parse_transcript_response(json_text: &str) -> Result<Vec<TranscriptSegment>> {
    let root: Value = serde_json::from_str(json_text)
        .map_err(|e| AppError::parse("parse_transcript", format!("malformed transcript response: {e}")))?;
    Ok(segments_from_value(&root))
}

/// Parse segments from a watch page that embeds a preloaded transcript panel
pub fn parse_transcript_page(html: &str) -> Result<Vec<TranscriptSegment>> {
    let root = parse_embedded_state(html, INITIAL_DATA_MARKERS, "parse_transcript_page")?;
    Ok(segments_from_value(&root))
}

/// Find the segment list in a decoded payload; an empty result means none was found
pub fn segments_from_value(root: &Value) -> Vec<TranscriptSegment> {
    let items = if let Some(items) = root.pointer(PRIMARY_SEGMENTS_PATH).and_then(Value::as_array) {
        debug!("Transcript segments found at primary path");
        items
    } else if let Some(items) = root.pointer(ALTERNATE_SEGMENTS_PATH).and_then(Value::as_array) {
        debug!("Transcript segments found at alternate path");
        items
    } else if let Some(items) = search_segment_array(root, false, 0) {
        debug!("Transcript segments found by key search");
        items
    } else {
        debug!("No transcript segments in payload");
        return Vec::new();
    };

    let mut segments: Vec<TranscriptSegment> = items.iter().filter_map(segment_from_item).collect();
    segments.sort_by_key(|s| s.offset_ms);
    segments
}

fn search_segment_array(value: &Value, under_transcript_key: bool, depth: usize) -> Option<&Vec<Value>> {
    if depth > MAX_SEARCH_DEPTH {
        return None;
    }
    match value {
        Value::Array(items) => {
            if under_transcript_key && looks_like_segments(items) {
                return Some(items);
            }
            items
                .iter()
                .find_map(|v| search_segment_array(v, under_transcript_key, depth + 1))
        }
        Value::Object(map) => map.iter().find_map(|(key, v)| {
            let flagged = under_transcript_key || key.to_ascii_lowercase().contains("transcript");
            search_segment_array(v, flagged, depth + 1)
        }),
        _ => None,
    }
}

fn looks_like_segments(items: &[Value]) -> bool {
    items.iter().any(|item| {
        item.get("transcriptSegmentRenderer").is_some()
            || item.get("transcriptCueGroupRenderer").is_some()
            || (item.get("startMs").is_some() && item.get("snippet").is_some())
    })
}

fn segment_from_item(item: &Value) -> Option<TranscriptSegment> {
    if item.get("transcriptSectionHeaderRenderer").is_some() {
        return None;
    }

    if let Some(group) = item.get("transcriptCueGroupRenderer") {
        let cue = group.pointer("/cues/0/transcriptCueRenderer")?;
        let text = text_of(cue.get("cue")?)?;
        let offset_ms = coerce_ms(cue.get("startOffsetMs")).unwrap_or(0);
        let duration_ms = coerce_ms(cue.get("durationMs")).unwrap_or(DEFAULT_SEGMENT_MS);
        return Some(TranscriptSegment { text, offset_ms, duration_ms });
    }

    let renderer = item.get("transcriptSegmentRenderer").unwrap_or(item);
    let text = text_of(renderer.get("snippet")?)?;
    let offset_ms = coerce_ms(renderer.get("startMs")).unwrap_or(0);
    let end_ms = coerce_ms(renderer.get("endMs")).unwrap_or(offset_ms.saturating_add(DEFAULT_SEGMENT_MS));
    Some(TranscriptSegment {
        text,
        offset_ms,
        duration_ms: end_ms.saturating_sub(offset_ms),
    })
}

/// Text from either a `runs` list or a `simpleText` field; blank text yields `None`
fn text_of(node: &Value) -> Option<String> {
    let raw = if let Some(runs) = node.get("runs").and_then(Value::as_array) {
        runs.iter()
            .filter_map(|r| r.get("text").and_then(Value::as_str))
            .collect::<String>()
    } else {
        node.get("simpleText").and_then(Value::as_str)?.to_string()
    };
    let text = crate::collapse_whitespace(&html_escape::decode_html_entities(&raw));
    if text.is_empty() { None } else { Some(text) }
}

/// Milliseconds from a number or numeric string
fn coerce_ms(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
        }
        _ => None,
    }
}

/// First value stored under a key accepted by `matches`, searched depth-first up to `max_depth`
pub fn find_key<'a>(value: &'a Value, matches: &dyn Fn(&str) -> bool, max_depth: usize) -> Option<&'a Value> {
    if max_depth == 0 {
        return None;
    }
    match value {
        Value::Object(map) => map
            .iter()
            .find_map(|(k, v)| if matches(k) { Some(v) } else { None })
            .or_else(|| map.values().find_map(|v| find_key(v, matches, max_depth - 1))),
        Value::Array(items) => items.iter().find_map(|v| find_key(v, matches, max_depth - 1)),
        _ => None,
    }
}

static API_KEY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r#""INNERTUBE_API_KEY"\s*:\s*"([^"]+)""#).unwrap(),
        Regex::new(r#"innertubeApiKey\s*[=:]\s*"([^"]+)""#).unwrap(),
    ]
});
static CLIENT_VERSION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r#""INNERTUBE_CLIENT_VERSION"\s*:\s*"([^"]+)""#).unwrap(),
        Regex::new(r#""clientVersion"\s*:\s*"([^"]+)""#).unwrap(),
    ]
});
static CLIENT_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""INNERTUBE_CLIENT_NAME"\s*:\s*"([^"]+)""#).unwrap());
static HL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""INNERTUBE_CONTEXT_HL"\s*:\s*"([^"]+)""#).unwrap());
static GL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""INNERTUBE_CONTEXT_GL"\s*:\s*"([^"]+)""#).unwrap());
static TRANSCRIPT_PARAMS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""getTranscriptEndpoint"\s*:\s*\{\s*"params"\s*:\s*"([^"]+)""#).unwrap());

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|re| capture(re, text))
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text).map(|caps| caps[1].to_string())
}

/// Extract the InnerTube API key from a watch page
pub fn extract_api_key(html: &str) -> Option<String> {
    first_capture(&API_KEY_PATTERNS, html)
}

/// Client version advertised by the page, or a known-good default
pub fn client_version(html: &str) -> String {
    first_capture(&CLIENT_VERSION_PATTERNS, html).unwrap_or_else(|| DEFAULT_CLIENT_VERSION.to_string())
}

/// Extract the client context and transcript continuation params from a watch page
pub fn parse_page_state(html: &str) -> Result<PageState> {
    const OP: &str = "parse_page_state";

    let transcript_params = match parse_embedded_state(html, INITIAL_DATA_MARKERS, OP) {
        Ok(data) => find_key(&data, &|k: &str| k == "getTranscriptEndpoint", MAX_SEARCH_DEPTH)
            .and_then(|endpoint| endpoint.get("params"))
            .and_then(Value::as_str)
            .map(str::to_string),
        Err(e) => {
            debug!("Initial data unavailable ({e}), trying raw pattern");
            None
        }
    }
    .or_else(|| capture(&TRANSCRIPT_PARAMS_RE, html))
    .ok_or_else(|| AppError::not_found(OP, "no transcript panel on the watch page"))?;

    Ok(PageState {
        api_key: extract_api_key(html),
        client_name: capture(&CLIENT_NAME_RE, html)
            .unwrap_or_else(|| DEFAULT_CLIENT_NAME.to_string()),
        client_version: client_version(html),
        hl: capture(&HL_RE, html).unwrap_or_else(|| "en".to_string()),
        gl: capture(&GL_RE, html).unwrap_or_else(|| "US".to_string()),
        transcript_params,
    })
}

static META_DESCRIPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta\s+(?:name|property)="(?:og:)?description"\s+content="([^"]*)""#).unwrap()
});
static JSON_LD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<script[^>]*type="application/ld\+json"[^>]*>(.*?)</script>"#).unwrap()
});

/// Scrape title, channel, description and duration from a watch page.
///
/// Description falls back from the player response to the meta tag to JSON-LD.
pub fn parse_page_metadata(html: &str) -> PageMetadata {
    let details = parse_embedded_state(html, PLAYER_RESPONSE_MARKERS, "parse_page_metadata")
        .ok()
        .and_then(|v| v.get("videoDetails").cloned());

    let detail_str = |key: &str| {
        details
            .as_ref()
            .and_then(|d| d.get(key))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let description = detail_str("shortDescription")
        .or_else(|| {
            META_DESCRIPTION_RE
                .captures(html)
                .map(|caps| html_escape::decode_html_entities(&caps[1]).trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .or_else(|| json_ld_description(html));

    PageMetadata {
        title: detail_str("title"),
        channel: detail_str("author"),
        description,
        duration_seconds: detail_str("lengthSeconds").and_then(|s| s.parse().ok()),
    }
}

fn json_ld_description(html: &str) -> Option<String> {
    JSON_LD_RE.captures_iter(html).find_map(|caps| {
        let value: Value = serde_json::from_str(caps[1].trim()).ok()?;
        find_key(&value, &|k: &str| k == "description", 4)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn segment_renderer(start: &str, end: &str, text: &str) -> Value {
        json!({
            "transcriptSegmentRenderer": {
                "startMs": start,
                "endMs": end,
                "snippet": { "runs": [{ "text": text }] }
            }
        })
    }

    fn primary_payload(items: Vec<Value>) -> Value {
        json!({
            "actions": [{
                "updateEngagementPanelAction": {
                    "content": {
                        "transcriptRenderer": {
                            "content": {
                                "transcriptSearchPanelRenderer": {
                                    "body": {
                                        "transcriptSegmentListRenderer": { "initialSegments": items }
                                    }
                                }
                            }
                        }
                    }
                }
            }]
        })
    }

    #[test]
    fn test_primary_path() {
        let payload = primary_payload(vec![
            segment_renderer("0", "1500", "Hello there"),
            segment_renderer("1500", "3000", "general Kenobi"),
        ]);
        let segments = parse_transcript_response(&payload.to_string()).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "Hello there");
        assert_eq!(segments[0].offset_ms, 0);
        assert_eq!(segments[0].duration_ms, 1500);
        assert_eq!(segments[1].offset_ms, 1500);
    }

    #[test]
    fn test_alternate_path_with_cue_groups() {
        let payload = json!({
            "actions": [{
                "updateEngagementPanelAction": {
                    "content": {
                        "transcriptRenderer": {
                            "body": {
                                "transcriptBodyRenderer": {
                                    "cueGroups": [{
                                        "transcriptCueGroupRenderer": {
                                            "cues": [{
                                                "transcriptCueRenderer": {
                                                    "cue": { "simpleText": "older layout" },
                                                    "startOffsetMs": "2000",
                                                    "durationMs": "1200"
                                                }
                                            }]
                                        }
                                    }]
                                }
                            }
                        }
                    }
                }
            }]
        });
        let segments = parse_transcript_response(&payload.to_string()).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "older layout");
        assert_eq!(segments[0].offset_ms, 2000);
        assert_eq!(segments[0].duration_ms, 1200);
    }

    #[test]
    fn test_key_search_fallback() {
        let payload = json!({
            "onResponseReceivedActions": [{
                "newTranscriptPanel": {
                    "wrapper": {
                        "segments": [segment_renderer("100", "900", "found by search")]
                    }
                }
            }]
        });
        let segments = parse_transcript_response(&payload.to_string()).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "found by search");
        assert_eq!(segments[0].duration_ms, 800);
    }

    #[test]
    fn test_no_known_path_returns_empty() {
        let payload = json!({ "responseContext": { "visitorData": "abc" }, "items": [1, 2, 3] });
        let segments = parse_transcript_response(&payload.to_string()).unwrap();
        assert!(segments.is_empty());
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = parse_transcript_response("{\"actions\": [").unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::Parse);
        assert!(err.message.contains("EOF"), "{}", err.message);
    }

    #[test]
    fn test_unparsable_times_default() {
        let payload = primary_payload(vec![json!({
            "transcriptSegmentRenderer": {
                "startMs": "soon",
                "endMs": null,
                "snippet": { "simpleText": "fuzzy timing" }
            }
        })]);
        let segments = parse_transcript_response(&payload.to_string()).unwrap();
        assert_eq!(segments[0].offset_ms, 0);
        assert_eq!(segments[0].duration_ms, 1000);
    }

    #[test]
    fn test_huge_start_without_end_saturates() {
        let payload = primary_payload(vec![json!({
            "startMs": "18446744073709551615",
            "snippet": { "simpleText": "x" }
        })]);
        let segments = parse_transcript_response(&payload.to_string()).unwrap();
        assert_eq!(segments[0].offset_ms, u64::MAX);
        assert_eq!(segments[0].duration_ms, 0);
        assert_eq!(segments[0].end_ms(), u64::MAX);
    }

    #[test]
    fn test_headers_and_blank_segments_filtered() {
        let payload = primary_payload(vec![
            json!({ "transcriptSectionHeaderRenderer": { "snippet": { "simpleText": "Intro" } } }),
            segment_renderer("0", "1000", "   "),
            segment_renderer("1000", "2000", "it&#39;s   real"),
        ]);
        let segments = parse_transcript_response(&payload.to_string()).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "it's real");
    }

    #[test]
    fn test_runs_are_concatenated() {
        let payload = primary_payload(vec![json!({
            "transcriptSegmentRenderer": {
                "startMs": 5000,
                "endMs": 7000,
                "snippet": { "runs": [{ "text": "split " }, { "text": "runs" }] }
            }
        })]);
        let segments = parse_transcript_response(&payload.to_string()).unwrap();
        assert_eq!(segments[0].text, "split runs");
        assert_eq!(segments[0].offset_ms, 5000);
    }

    #[test]
    fn test_embedded_json_respects_strings() {
        let html = r#"<script>var ytInitialData = {"a": "brace } inside", "b": {"c": "\"}"}};</script>"#;
        let raw = embedded_json(html, "var ytInitialData = ").unwrap();
        let value: Value = serde_json::from_str(raw).unwrap();
        assert_eq!(value["a"], "brace } inside");
        assert_eq!(value["b"]["c"], "\"}");
    }

    #[test]
    fn test_parse_embedded_state_missing_marker() {
        let err = parse_embedded_state("<html></html>", INITIAL_DATA_MARKERS, "op").unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::NotFound);
    }

    #[test]
    fn test_parse_transcript_page() {
        let payload = primary_payload(vec![segment_renderer("0", "1000", "preloaded")]);
        let html = format!("<html><script>var ytInitialData = {payload};</script></html>");
        let segments = parse_transcript_page(&html).unwrap();
        assert_eq!(segments[0].text, "preloaded");
    }

    #[test]
    fn test_parse_page_state() {
        let html = r#"<script>ytcfg.set({"INNERTUBE_API_KEY":"AIzaKey","INNERTUBE_CLIENT_VERSION":"2.20250101.00.00","INNERTUBE_CONTEXT_HL":"de","INNERTUBE_CONTEXT_GL":"DE"});</script>
<script>var ytInitialData = {"engagementPanels":[{"content":{"continuationItemRenderer":{"continuationEndpoint":{"getTranscriptEndpoint":{"params":"CgtQQVJBTVM="}}}}}]};</script>"#;
        let state = parse_page_state(html).unwrap();
        assert_eq!(state.api_key.as_deref(), Some("AIzaKey"));
        assert_eq!(state.client_name, "WEB");
        assert_eq!(state.client_version, "2.20250101.00.00");
        assert_eq!(state.hl, "de");
        assert_eq!(state.gl, "DE");
        assert_eq!(state.transcript_params, "CgtQQVJBTVM=");
    }

    #[test]
    fn test_parse_page_state_without_panel() {
        let html = r#"<script>var ytInitialData = {"contents":{}};</script>"#;
        let err = parse_page_state(html).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::NotFound);
    }

    #[test]
    fn test_extract_api_key_fallback_pattern() {
        assert_eq!(extract_api_key(r#"innertubeApiKey="AIzaSyB123";"#).as_deref(), Some("AIzaSyB123"));
        assert!(extract_api_key("<html><body>no key here</body></html>").is_none());
    }

    #[test]
    fn test_page_metadata_from_player_response() {
        let html = r#"<script>var ytInitialPlayerResponse = {"videoDetails":{"title":"Talk","author":"Chan","shortDescription":"About things","lengthSeconds":"754"}};</script>"#;
        let meta = parse_page_metadata(html);
        assert_eq!(meta.title.as_deref(), Some("Talk"));
        assert_eq!(meta.channel.as_deref(), Some("Chan"));
        assert_eq!(meta.description.as_deref(), Some("About things"));
        assert_eq!(meta.duration_seconds, Some(754));
    }

    #[test]
    fn test_page_metadata_meta_tag_fallback() {
        let html = r#"<head><meta name="description" content="Fish &amp; chips"></head>"#;
        let meta = parse_page_metadata(html);
        assert_eq!(meta.description.as_deref(), Some("Fish & chips"));
        assert!(meta.title.is_none());
    }

    #[test]
    fn test_page_metadata_json_ld_fallback() {
        let html = r#"<script type="application/ld+json">{"@type":"VideoObject","description":"From JSON-LD"}</script>"#;
        let meta = parse_page_metadata(html);
        assert_eq!(meta.description.as_deref(), Some("From JSON-LD"));
    }
}
