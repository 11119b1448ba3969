//! Caller-facing entry points.
//!
//! The plain-text path reports failures as strings starting with `Error:`; the segment path
//! returns the structured [`AppError`]. Callers rely on that difference.

use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::acquisition::TranscriptAcquisition;
use crate::enhance::{EnhancementOrchestrator, EnhancementOutcome, EnhancementSettings};
use crate::error::{AppError, Result};
use crate::metadata::MetadataResolver;
use crate::providers::{LlmProvider, ProviderConfig, create_provider};
use crate::{Transcript, TranscriptSegment, VideoMetadata};

pub struct TranscriptService {
    client: reqwest::Client,
    acquisition: TranscriptAcquisition,
    metadata: MetadataResolver,
    orchestrator: EnhancementOrchestrator,
}

impl TranscriptService {
    /// Live service over one shared HTTP client
    pub fn new(timeout: Option<Duration>, settings: EnhancementSettings) -> Self {
        let client = reqwest::Client::new();
        Self {
            acquisition: TranscriptAcquisition::with_client(client.clone(), timeout),
            metadata: MetadataResolver::new(client.clone(), timeout),
            orchestrator: EnhancementOrchestrator::new(settings),
            client,
        }
    }

    pub fn from_parts(
        client: reqwest::Client,
        acquisition: TranscriptAcquisition,
        metadata: MetadataResolver,
        orchestrator: EnhancementOrchestrator,
    ) -> Self {
        Self { client, acquisition, metadata, orchestrator }
    }

    pub fn with_language_hints(mut self, hints: Vec<String>) -> Self {
        self.acquisition = self.acquisition.with_language_hints(hints);
        self
    }

    pub async fn acquire(&self, url: &str) -> Result<Transcript> {
        self.acquisition.acquire(url).await
    }

    /// Joined transcript text, or a message starting with `Error:`
    pub async fn acquire_transcript(&self, url: &str) -> String {
        match self.acquisition.acquire(url).await {
            Ok(transcript) => transcript.text(),
            Err(e) => format!("Error: {e}"),
        }
    }

    pub async fn acquire_transcript_lines(&self, url: &str) -> Result<Vec<TranscriptSegment>, AppError> {
        self.acquisition.acquire(url).await.map(|t| t.segments)
    }

    pub async fn resolve_metadata(&self, url: &str, api_key: Option<&str>) -> VideoMetadata {
        self.metadata.resolve(url, api_key).await
    }

    /// Transcript and metadata fetched concurrently
    pub async fn acquire_with_metadata(&self, url: &str, api_key: Option<&str>) -> Result<(Transcript, VideoMetadata)> {
        let (transcript, metadata) = tokio::join!(self.acquisition.acquire(url), self.metadata.resolve(url, api_key));
        Ok((transcript?, metadata))
    }

    /// Enhance with a provider built from a config snapshot
    pub async fn enhance(
        &self,
        segments: &[TranscriptSegment],
        metadata: &VideoMetadata,
        config: &ProviderConfig,
    ) -> EnhancementOutcome {
        debug!("Enhancing {} segments with provider {}", segments.len(), config.name);
        let provider = create_provider(Arc::new(config.clone()), self.client.clone());
        self.orchestrator.enhance(segments, metadata, provider.as_ref()).await
    }

    pub async fn enhance_with(
        &self,
        segments: &[TranscriptSegment],
        metadata: &VideoMetadata,
        provider: &dyn LlmProvider,
    ) -> EnhancementOutcome {
        self.orchestrator.enhance(segments, metadata, provider).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::ErrorCode;
    use crate::acquisition::TranscriptFetcher;

    const VIDEO: &str = "dQw4w9WgXcQ";

    struct FixedFetcher(Result<Vec<TranscriptSegment>>);

    #[async_trait]
    impl TranscriptFetcher for FixedFetcher {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn fetch(&self, _video_id: &str, _lang: Option<&str>) -> Result<Vec<TranscriptSegment>> {
            self.0.clone()
        }
    }

    fn service(primary: Result<Vec<TranscriptSegment>>) -> TranscriptService {
        let client = reqwest::Client::new();
        let acquisition = TranscriptAcquisition::new(
            Box::new(FixedFetcher(primary)),
            Box::new(FixedFetcher(Err(AppError::not_found("fake", "no captions")))),
        );
        TranscriptService::from_parts(
            client.clone(),
            acquisition,
            MetadataResolver::new(client, Some(Duration::from_millis(50))),
            EnhancementOrchestrator::new(EnhancementSettings::default()),
        )
    }

    fn segments() -> Vec<TranscriptSegment> {
        vec![
            TranscriptSegment { text: "hello \n there".into(), offset_ms: 0, duration_ms: 1000 },
            TranscriptSegment { text: "general   kenobi".into(), offset_ms: 1000, duration_ms: 1000 },
        ]
    }

    #[tokio::test]
    async fn test_plain_text_joins_and_collapses() {
        let svc = service(Ok(segments()));
        assert_eq!(svc.acquire_transcript(VIDEO).await, "hello there general kenobi");
    }

    #[tokio::test]
    async fn test_plain_text_reports_error_string() {
        let svc = service(Err(AppError::parse("fake", "layout changed")));
        let text = svc.acquire_transcript(VIDEO).await;
        assert!(text.starts_with("Error: "));
        assert!(text.contains(VIDEO));
        assert!(text.contains("Show transcript"));

        let invalid = svc.acquire_transcript("not a video").await;
        assert!(invalid.starts_with("Error: Invalid YouTube URL"));
    }

    #[tokio::test]
    async fn test_lines_path_returns_structured_error() {
        let svc = service(Err(AppError::parse("fake", "layout changed")));
        let err = svc.acquire_transcript_lines(VIDEO).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);

        let ok = service(Ok(segments())).acquire_transcript_lines(VIDEO).await.unwrap();
        assert_eq!(ok, segments());
    }

    #[tokio::test]
    async fn test_metadata_for_invalid_reference_is_placeholder() {
        let svc = service(Ok(segments()));
        assert_eq!(svc.resolve_metadata("nope", None).await, VideoMetadata::default());
    }

    #[tokio::test]
    async fn test_enhance_with_invalid_config_falls_back() {
        let svc = service(Ok(segments()));
        let outcome = svc.enhance(&segments(), &VideoMetadata::default(), &ProviderConfig::openai(None)).await;
        assert!(!outcome.is_enhanced());
        assert_eq!(outcome.text, "hello \n there\ngeneral   kenobi");
        assert!(outcome.fallback_reason.unwrap().contains("configuration is incomplete"));
    }
}
