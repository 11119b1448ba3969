//! Ordered fallback chain for transcript acquisition.
//!
//! Tier 1 is the internal transcript endpoint, tier 2 the caption tracks tried across
//! language hints, tier 3 an actionable error. Tiers run strictly one after another and
//! results are never merged across tiers.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::captions::CaptionTrackFetcher;
use crate::error::{AppError, Result};
use crate::youtube::InnerTubeFetcher;
use crate::{Transcript, TranscriptSegment, TranscriptSource, extract_video_id};

/// Language hints tried in order by the fallback tier, before one attempt with no hint
pub const LANGUAGE_HINTS: &[&str] = &["en", "en-US", "en-GB", "auto"];

/// One transcript source in the fallback chain
#[async_trait]
pub trait TranscriptFetcher: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Fetch timed segments, optionally for a specific language
    async fn fetch(&self, video_id: &str, lang: Option<&str>) -> Result<Vec<TranscriptSegment>>;

    /// First non-empty result across `hints` in order, with the hint that produced it.
    ///
    /// Fetchers that can share work between hints override this.
    async fn fetch_first(
        &self,
        video_id: &str,
        hints: &[Option<&str>],
    ) -> Result<(Option<String>, Vec<TranscriptSegment>)> {
        let mut last_err = None;
        for &lang in hints {
            debug!("{} lang={lang:?}", self.name());
            match self.fetch(video_id, lang).await {
                Ok(segments) if !segments.is_empty() => return Ok((lang.map(str::to_string), segments)),
                Ok(_) => debug!("{} lang={lang:?} returned no segments", self.name()),
                Err(e) => {
                    debug!("{} lang={lang:?} failed: {e}", self.name());
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            AppError::not_found("fetch_transcript", format!("no segments for {video_id} under any language hint"))
        }))
    }
}

pub struct TranscriptAcquisition {
    primary: Box<dyn TranscriptFetcher>,
    fallback: Box<dyn TranscriptFetcher>,
    language_hints: Vec<String>,
}

impl TranscriptAcquisition {
    pub fn new(primary: Box<dyn TranscriptFetcher>, fallback: Box<dyn TranscriptFetcher>) -> Self {
        Self {
            primary,
            fallback,
            language_hints: LANGUAGE_HINTS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Default chain: InnerTube transcript endpoint, then caption tracks
    pub fn with_client(client: reqwest::Client, timeout: Option<Duration>) -> Self {
        Self::new(
            Box::new(InnerTubeFetcher::new(client.clone(), timeout)),
            Box::new(CaptionTrackFetcher::new(client, timeout)),
        )
    }

    pub fn with_language_hints(mut self, hints: Vec<String>) -> Self {
        self.language_hints = hints;
        self
    }

    /// Acquire a transcript for a URL or bare video ID
    pub async fn acquire(&self, video_ref: &str) -> Result<Transcript> {
        let video_id = extract_video_id(video_ref).ok_or_else(|| {
            AppError::validation(
                "acquire_transcript",
                format!("Invalid YouTube URL or video ID: {}", video_ref.trim()),
            )
        })?;

        debug!("Tier 1 ({}) for {video_id}", self.primary.name());
        match self.primary.fetch(&video_id, None).await {
            Ok(segments) if !segments.is_empty() => {
                info!("Acquired {} segments via {}", segments.len(), self.primary.name());
                return Ok(Transcript {
                    video_id,
                    language: None,
                    source: TranscriptSource::InnerTube,
                    segments,
                });
            }
            Ok(_) => warn!("Tier 1 ({}) returned no segments", self.primary.name()),
            Err(e) => warn!("Tier 1 ({}) failed: {} [{}]", self.primary.name(), e, e.code),
        }

        let hints: Vec<Option<&str>> = self
            .language_hints
            .iter()
            .map(|h| Some(h.as_str()))
            .chain(std::iter::once(None))
            .collect();
        debug!("Tier 2 ({}) hints={hints:?}", self.fallback.name());
        match self.fallback.fetch_first(&video_id, &hints).await {
            Ok((language, segments)) => {
                info!(
                    "Acquired {} segments via {} (lang={language:?})",
                    segments.len(),
                    self.fallback.name()
                );
                return Ok(Transcript {
                    video_id,
                    language,
                    source: TranscriptSource::CaptionTrack,
                    segments,
                });
            }
            Err(e) => warn!("Tier 2 ({}) failed: {} [{}]", self.fallback.name(), e, e.code),
        }

        warn!("All transcript tiers failed for {video_id}");
        Err(AppError::not_found("acquire_transcript", exhausted_message(&video_id)))
    }
}

/// Terminal message shown when every tier failed
pub fn exhausted_message(video_id: &str) -> String {
    format!(
        "Unable to extract the transcript for video {video_id} automatically. \
         YouTube may have changed its page structure, or the video has no captions. \
         Workaround: open https://www.youtube.com/watch?v={video_id}, click \"...more\" \
         below the video, choose \"Show transcript\", and copy the text manually."
    )
}
