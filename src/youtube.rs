use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::acquisition::TranscriptFetcher;
use crate::error::{AppError, Result};
use crate::parser::{self, PageState};
use crate::{TranscriptSegment, USER_AGENT, watch_url};

const ORIGIN: &str = "https://www.youtube.com";
const TRANSCRIPT_ENDPOINT: &str = "https://www.youtube.com/youtubei/v1/get_transcript";

/// Fetches transcripts through the watch page and the internal transcript endpoint
pub struct InnerTubeFetcher {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl InnerTubeFetcher {
    pub fn new(client: reqwest::Client, timeout: Option<Duration>) -> Self {
        Self { client, timeout }
    }

    fn with_timeout(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.timeout {
            Some(t) => request.timeout(t),
            None => request,
        }
    }

    async fn fetch_page(&self, video_id: &str) -> Result<String> {
        let url = watch_url(video_id);
        debug!("Fetching watch page: {url}");
        let request = self
            .client
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .header("Accept-Language", "en-US,en;q=0.9");
        crate::http::send_text(self.with_timeout(request), "fetch_watch_page").await
    }
}

/// JSON body for the transcript endpoint
pub fn transcript_request_body(video_id: &str, state: &PageState) -> serde_json::Value {
    serde_json::json!({
        "context": {
            "client": {
                "clientName": state.client_name,
                "clientVersion": state.client_version,
                "hl": state.hl,
                "gl": state.gl
            }
        },
        "externalVideoId": video_id,
        "params": state.transcript_params
    })
}

fn transcript_endpoint_url(state: &PageState) -> String {
    match &state.api_key {
        Some(key) => format!("{TRANSCRIPT_ENDPOINT}?key={}&prettyPrint=false", urlencoding::encode(key)),
        None => format!("{TRANSCRIPT_ENDPOINT}?prettyPrint=false"),
    }
}

/// Segments from a transcript panel already rendered into the page, if any
fn preloaded_segments(page: &str) -> Option<Vec<TranscriptSegment>> {
    parser::parse_transcript_page(page).ok().filter(|segments| !segments.is_empty())
}

#[async_trait]
impl TranscriptFetcher for InnerTubeFetcher {
    fn name(&self) -> &'static str {
        "innertube"
    }

    /// The language hint is ignored; the page decides the transcript language
    async fn fetch(&self, video_id: &str, _lang: Option<&str>) -> Result<Vec<TranscriptSegment>> {
        let page = self.fetch_page(video_id).await?;
        if let Some(segments) = preloaded_segments(&page) {
            debug!("Watch page carries a preloaded transcript panel ({} segments)", segments.len());
            return Ok(segments);
        }

        let state = parser::parse_page_state(&page)?;
        debug!(
            "Page state: client={} {} hl={} gl={} key={}",
            state.client_name,
            state.client_version,
            state.hl,
            state.gl,
            state.api_key.is_some()
        );

        let watch = watch_url(video_id);
        let request = self
            .client
            .post(transcript_endpoint_url(&state))
            .header("User-Agent", USER_AGENT)
            .header("Content-Type", "application/json")
            .header("Origin", ORIGIN)
            .header("Referer", &watch)
            .json(&transcript_request_body(video_id, &state));

        let body = crate::http::send_text(self.with_timeout(request), "fetch_transcript_endpoint").await?;
        let segments = parser::parse_transcript_response(&body)?;
        if segments.is_empty() {
            return Err(AppError::not_found(
                "fetch_transcript_endpoint",
                format!("transcript endpoint returned no segments for {video_id}"),
            ));
        }
        debug!("InnerTube returned {} segments", segments.len());
        Ok(segments)
    }
}
