use std::sync::LazyLock;
use std::time::Duration;

use log::{debug, warn};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::parser::{self, PageMetadata};
use crate::{NO_DESCRIPTION, UNKNOWN_CHANNEL, UNKNOWN_TITLE, USER_AGENT, VideoMetadata, extract_video_id, watch_url};

const DATA_API_URL: &str = "https://www.googleapis.com/youtube/v3/videos";
const OEMBED_URL: &str = "https://www.youtube.com/oembed";

#[derive(Debug, Deserialize)]
struct OEmbed {
    title: Option<String>,
    author_name: Option<String>,
}

/// Resolves title, channel, description and duration; never fails
pub struct MetadataResolver {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl MetadataResolver {
    pub fn new(client: reqwest::Client, timeout: Option<Duration>) -> Self {
        Self { client, timeout }
    }

    fn with_timeout(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.timeout {
            Some(t) => request.timeout(t),
            None => request,
        }
    }

    /// Resolve metadata, preferring the Data API when a key is given.
    ///
    /// Every failure degrades to placeholder values.
    pub async fn resolve(&self, video_ref: &str, api_key: Option<&str>) -> VideoMetadata {
        let Some(video_id) = extract_video_id(video_ref) else {
            warn!("Cannot resolve metadata for invalid reference: {video_ref}");
            return VideoMetadata::default();
        };

        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            match self.from_data_api(&video_id, key).await {
                Ok(meta) => return meta,
                Err(e) => warn!("Data API metadata failed for {video_id}: {e} [{}], using page fallback", e.code),
            }
        }

        self.from_page(&video_id).await
    }

    async fn from_data_api(&self, video_id: &str, key: &str) -> Result<VideoMetadata> {
        debug!("Fetching metadata from Data API for {video_id}");
        let request = self
            .client
            .get(DATA_API_URL)
            .query(&[("part", "snippet,contentDetails"), ("id", video_id), ("key", key)]);
        let json = crate::http::send_json(self.with_timeout(request), "fetch_video_metadata").await?;
        metadata_from_api_response(&json, video_id)
    }

    async fn from_page(&self, video_id: &str) -> VideoMetadata {
        let watch = watch_url(video_id);
        let oembed_request = self
            .client
            .get(OEMBED_URL)
            .query(&[("url", watch.as_str()), ("format", "json")]);
        let page_request = self.client.get(&watch).header("User-Agent", USER_AGENT);

        let (oembed, page) = tokio::join!(
            crate::http::send_json(self.with_timeout(oembed_request), "fetch_oembed"),
            crate::http::send_text(self.with_timeout(page_request), "fetch_watch_page"),
        );

        let oembed = match oembed {
            Ok(json) => serde_json::from_value::<OEmbed>(json).ok(),
            Err(e) => {
                debug!("oEmbed lookup failed for {video_id}: {e}");
                None
            }
        };
        let page = match page {
            Ok(html) => parser::parse_page_metadata(&html),
            Err(e) => {
                debug!("Watch page fetch failed for {video_id}: {e}");
                PageMetadata::default()
            }
        };

        merge_page_metadata(oembed, page)
    }
}

fn merge_page_metadata(oembed: Option<OEmbed>, page: PageMetadata) -> VideoMetadata {
    let non_empty = |s: Option<String>| s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let (o_title, o_author) = match oembed {
        Some(o) => (o.title, o.author_name),
        None => (None, None),
    };

    VideoMetadata {
        title: non_empty(o_title)
            .or_else(|| non_empty(page.title))
            .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
        channel: non_empty(o_author)
            .or_else(|| non_empty(page.channel))
            .unwrap_or_else(|| UNKNOWN_CHANNEL.to_string()),
        description: non_empty(page.description).unwrap_or_else(|| NO_DESCRIPTION.to_string()),
        duration_seconds: page.duration_seconds,
    }
}

fn metadata_from_api_response(json: &Value, video_id: &str) -> Result<VideoMetadata> {
    let item = json
        .pointer("/items/0")
        .ok_or_else(|| AppError::not_found("fetch_video_metadata", format!("video {video_id} not found")))?;
    let snippet = item
        .get("snippet")
        .ok_or_else(|| AppError::parse("fetch_video_metadata", "response has no snippet"))?;

    let field = |key: &str, fallback: &str| {
        snippet
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(fallback)
            .to_string()
    };

    Ok(VideoMetadata {
        title: field("title", UNKNOWN_TITLE),
        channel: field("channelTitle", UNKNOWN_CHANNEL),
        description: field("description", NO_DESCRIPTION),
        duration_seconds: item
            .pointer("/contentDetails/duration")
            .and_then(Value::as_str)
            .and_then(parse_iso8601_duration),
    })
}

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?$").unwrap());

/// Parse a `PT#H#M#S` duration token into whole seconds
pub fn parse_iso8601_duration(token: &str) -> Option<u64> {
    let token = token.trim();
    let caps = DURATION_RE.captures(token)?;
    if caps.get(1).is_none() && caps.get(2).is_none() && caps.get(3).is_none() {
        return None;
    }
    let part = |i: usize| -> Option<u64> {
        match caps.get(i) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(0),
        }
    };
    part(1)?
        .checked_mul(3600)?
        .checked_add(part(2)?.checked_mul(60)?)?
        .checked_add(part(3)?)
}
