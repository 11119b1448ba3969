//! AI cleanup of a timed transcript.
//!
//! Small transcripts go to the provider in one request. Large ones are chunked and sent
//! strictly one after another with a fixed pause between requests. Any failure returns the
//! raw transcript together with the reason; partial output is never returned.

use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::chunking::{ChunkOptions, ChunkingEngine, TextChunk, estimate_tokens};
use crate::error::{AppError, Result, retry_recoverable};
use crate::providers::{ChatMessage, LlmProvider, LlmRequest};
use crate::output::{format_timestamp, render_lines, render_timestamped};
use crate::{TranscriptSegment, VideoMetadata, join_segment_text};

const SYSTEM_PROMPT: &str = "You are a meticulous transcript editor. You turn raw auto-generated video \
captions into a clean, readable transcript without changing what was said.";

/// Longest description excerpt included in prompts
const MAX_DESCRIPTION_CHARS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancementSettings {
    /// Estimated tokens above which the transcript is chunked
    pub token_threshold: usize,
    /// Segment count above which the transcript is chunked
    pub line_threshold: usize,
    pub chunk_max_tokens: usize,
    pub chunk_overlap_chars: usize,
    pub preserve_context: bool,
    /// Pause between chunk requests
    pub chunk_delay_ms: u64,
    /// Extra attempts for recoverable provider errors
    pub max_retries: u32,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for EnhancementSettings {
    fn default() -> Self {
        Self {
            token_threshold: 6000,
            line_threshold: 400,
            chunk_max_tokens: 3000,
            chunk_overlap_chars: 200,
            preserve_context: true,
            chunk_delay_ms: 1000,
            max_retries: 0,
            model: None,
            temperature: Some(0.3),
            max_tokens: None,
        }
    }
}

impl EnhancementSettings {
    /// Chunks are cut without duplicated text; carried context is passed separately in the prompt
    pub fn chunk_options(&self) -> ChunkOptions {
        ChunkOptions {
            max_chunk_size: self.chunk_max_tokens,
            overlap_size: self.chunk_overlap_chars,
            preserve_context: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EnhancementMode {
    SingleShot,
    Chunked { chunks: usize },
}

/// Either the enhanced text, or the raw transcript plus the reason enhancement failed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhancementOutcome {
    pub text: String,
    pub mode: EnhancementMode,
    pub fallback_reason: Option<String>,
}

impl EnhancementOutcome {
    pub fn is_enhanced(&self) -> bool {
        self.fallback_reason.is_none()
    }
}

pub struct EnhancementOrchestrator {
    settings: EnhancementSettings,
    chunker: ChunkingEngine,
}

impl EnhancementOrchestrator {
    pub fn new(settings: EnhancementSettings) -> Self {
        let chunker = ChunkingEngine::new(settings.chunk_options());
        Self { settings, chunker }
    }

    /// Chunk when either the token estimate or the segment count is over its threshold
    pub fn needs_chunking(&self, segments: &[TranscriptSegment]) -> bool {
        let tokens = estimate_tokens(&join_segment_text(segments));
        let chunk = tokens > self.settings.token_threshold || segments.len() > self.settings.line_threshold;
        if chunk {
            debug!(
                "Chunked mode: ~{tokens} tokens, {} segments (thresholds {} / {})",
                segments.len(),
                self.settings.token_threshold,
                self.settings.line_threshold
            );
        }
        chunk
    }

    pub fn select_mode(&self, segments: &[TranscriptSegment]) -> EnhancementMode {
        if self.needs_chunking(segments) {
            EnhancementMode::Chunked { chunks: self.chunker.chunk_segments(&timestamped(segments)).len() }
        } else {
            EnhancementMode::SingleShot
        }
    }

    pub async fn enhance(
        &self,
        segments: &[TranscriptSegment],
        metadata: &VideoMetadata,
        provider: &dyn LlmProvider,
    ) -> EnhancementOutcome {
        let raw = render_lines(segments);
        if segments.is_empty() {
            return EnhancementOutcome {
                text: raw,
                mode: EnhancementMode::SingleShot,
                fallback_reason: Some("No transcript segments to enhance".to_string()),
            };
        }

        let (mode, result) = if self.needs_chunking(segments) {
            let chunks = self.chunker.chunk_segments(&timestamped(segments));
            let mode = EnhancementMode::Chunked { chunks: chunks.len() };
            (mode, self.chunked(&chunks, segments, metadata, provider).await)
        } else {
            (EnhancementMode::SingleShot, self.single_shot(segments, metadata, provider).await)
        };

        match result {
            Ok(text) => {
                info!("Enhanced transcript via {} ({mode:?})", provider.name());
                EnhancementOutcome { text, mode, fallback_reason: None }
            }
            Err(e) => {
                warn!("Enhancement via {} failed: {e} [{}]", provider.name(), e.code);
                EnhancementOutcome {
                    text: raw,
                    mode,
                    fallback_reason: Some(format!(
                        "AI enhancement failed, showing the original transcript. {}",
                        e.user_message()
                    )),
                }
            }
        }
    }

    async fn single_shot(
        &self,
        segments: &[TranscriptSegment],
        metadata: &VideoMetadata,
        provider: &dyn LlmProvider,
    ) -> Result<String> {
        let duration = duration_seconds(segments, metadata);
        let prompt = build_single_prompt(metadata, &render_timestamped(segments), duration);
        self.complete(provider, prompt).await
    }

    /// Strictly sequential; the first failing chunk aborts the run
    async fn chunked(
        &self,
        chunks: &[TextChunk],
        segments: &[TranscriptSegment],
        metadata: &VideoMetadata,
        provider: &dyn LlmProvider,
    ) -> Result<String> {
        let duration = duration_seconds(segments, metadata);
        let total = chunks.len();
        let delay = Duration::from_millis(self.settings.chunk_delay_ms);

        let mut outputs = Vec::with_capacity(total);
        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(delay).await;
            }
            let context = match (self.settings.preserve_context, i) {
                (true, 1..) => Some(crate::chunking::trailing_context(
                    &chunks[i - 1].text,
                    self.settings.chunk_overlap_chars,
                )),
                _ => None,
            };
            debug!("Enhancing chunk {}/{total}", i + 1);
            let prompt = build_chunk_prompt(metadata, chunk, total, duration, context);
            let text = self.complete(provider, prompt).await?;
            outputs.push(TextChunk { text, index: chunk.index, start_ms: chunk.start_ms, end_ms: chunk.end_ms });
        }

        Ok(self.chunker.merge(&outputs))
    }

    async fn complete(&self, provider: &dyn LlmProvider, prompt: String) -> Result<String> {
        let config = provider.config();
        let request = LlmRequest {
            model: self
                .settings
                .model
                .clone()
                .unwrap_or_else(|| config.default_model.clone()),
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens.or(config.max_tokens),
        };

        let response =
            retry_recoverable(self.settings.max_retries.saturating_add(1), || provider.chat_completion(&request)).await?;
        if response.content.trim().is_empty() {
            return Err(AppError::provider("enhance", "Provider returned an empty response").with_provider(provider.name()));
        }
        Ok(response.content.trim().to_string())
    }
}

fn timestamped(segments: &[TranscriptSegment]) -> Vec<TranscriptSegment> {
    segments
        .iter()
        .map(|s| TranscriptSegment {
            text: format!("[{}] {}", format_timestamp(s.offset_ms), s.text.trim()),
            ..s.clone()
        })
        .collect()
}

fn duration_seconds(segments: &[TranscriptSegment], metadata: &VideoMetadata) -> u64 {
    metadata
        .duration_seconds
        .unwrap_or_else(|| segments.iter().map(TranscriptSegment::end_ms).max().unwrap_or(0).div_ceil(1000))
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        format!("{}…", text.chars().take(max).collect::<String>())
    }
}

fn formatting_rules(duration: u64) -> String {
    format!(
        "Rules:\n\
         1. Preserve the exact spoken words. Do not summarize, paraphrase, translate, or remove content.\n\
         2. Only add punctuation, capitalization, and paragraph breaks. Fix obvious caption artifacts such as [Music] tags only when they interrupt a sentence.\n\
         3. Decide whether there is one speaker or several. For a single speaker write plain paragraphs. \
         For several speakers start each turn with a label such as **Speaker 1:**, using names only when they are stated.\n\
         4. Start each paragraph with the timestamp of its first line in the form [m:ss] or [h:mm:ss], taken from the input.\n\
         5. Never emit a timestamp later than {} (the video length).\n\
         6. Output only the transcript in Markdown, with no preamble or closing remarks.",
        format_timestamp(duration.saturating_mul(1000))
    )
}

fn video_context(metadata: &VideoMetadata, duration: u64, description: bool) -> String {
    let mut context = format!(
        "Video title: {}\nChannel: {}\nDuration: {}",
        metadata.title,
        metadata.channel,
        format_timestamp(duration.saturating_mul(1000))
    );
    if description {
        context.push_str(&format!(
            "\nDescription: {}",
            truncate_chars(metadata.description.trim(), MAX_DESCRIPTION_CHARS)
        ));
    }
    context
}

pub fn build_single_prompt(metadata: &VideoMetadata, transcript: &str, duration: u64) -> String {
    format!(
        "Clean up the following video transcript.\n\n{}\n\n{}\n\nTranscript:\n{}",
        video_context(metadata, duration, true),
        formatting_rules(duration),
        transcript
    )
}

pub fn build_chunk_prompt(
    metadata: &VideoMetadata,
    chunk: &TextChunk,
    total: usize,
    duration: u64,
    previous_context: Option<String>,
) -> String {
    let range = match (chunk.start_ms, chunk.end_ms) {
        (Some(start), Some(end)) => format!(" covering {} to {}", format_timestamp(start), format_timestamp(end)),
        _ => String::new(),
    };
    let mut prompt = format!(
        "Clean up part {} of {total} of a video transcript{range}.\n\n{}\n\n{}",
        chunk.index + 1,
        video_context(metadata, duration, chunk.index == 0),
        formatting_rules(duration)
    );
    if chunk.index > 0 {
        prompt.push_str("\n7. This continues an earlier part: do not add a title or introduction.");
    }
    if let Some(context) = previous_context.filter(|c| !c.is_empty()) {
        prompt.push_str(&format!(
            "\n\nEnd of the previous part, for context only (do not include it in your output):\n{context}"
        ));
    }
    prompt.push_str(&format!("\n\nTranscript part {}:\n{}", chunk.index + 1, chunk.text));
    prompt
}
