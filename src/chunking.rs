//! Token-bounded chunking of transcript text and timed segments.
//!
//! Token counts use the fixed `ceil(chars / 4)` estimate. Text is split at sentence
//! boundaries, segments are kept whole, and each new chunk may be seeded with whole trailing
//! units of the previous one (at most `overlap_size` characters).

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::TranscriptSegment;

/// Rough token estimate shared by chunking and the enhancement threshold
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

fn tokens_for_chars(chars: usize) -> usize {
    chars.div_ceil(4)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkOptions {
    /// Upper bound per chunk, in estimated tokens
    pub max_chunk_size: usize,
    /// Upper bound for the carried-over context, in characters
    pub overlap_size: usize,
    pub preserve_context: bool,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_chunk_size: 4000,
            overlap_size: 200,
            preserve_context: true,
        }
    }
}

/// A bounded slice of transcript; time bounds only exist for chunks built from segments
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    pub text: String,
    pub index: usize,
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
}

/// Chunking with a fixed set of options, injected into the orchestrator
#[derive(Debug, Clone, Default)]
pub struct ChunkingEngine {
    options: ChunkOptions,
}

impl ChunkingEngine {
    pub fn new(options: ChunkOptions) -> Self {
        Self { options }
    }

    pub fn chunk_text(&self, text: &str) -> Vec<TextChunk> {
        chunk_text(text, &self.options)
    }

    pub fn chunk_segments(&self, segments: &[TranscriptSegment]) -> Vec<TextChunk> {
        chunk_segments(segments, &self.options)
    }

    pub fn merge(&self, chunks: &[TextChunk]) -> String {
        merge_chunks(chunks)
    }
}

#[derive(Debug, Clone, Copy)]
struct Unit<'a> {
    text: &'a str,
    chars: usize,
    start_ms: Option<u64>,
    end_ms: Option<u64>,
}

impl<'a> Unit<'a> {
    fn plain(text: &'a str) -> Self {
        Self { text, chars: text.chars().count(), start_ms: None, end_ms: None }
    }
}

static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[.!?]+["')\]]*\s+"#).unwrap());

/// Split text after sentence-ending punctuation followed by whitespace
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut last = 0;
    for m in SENTENCE_END.find_iter(text) {
        let sentence = text[last..m.end()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        last = m.end();
    }
    let rest = text[last..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Break a sentence longer than the bound at word boundaries
fn split_oversized(sentence: &str, max_tokens: usize) -> Vec<&str> {
    if estimate_tokens(sentence) <= max_tokens {
        return vec![sentence];
    }

    let mut pieces = Vec::new();
    let mut start: Option<usize> = None;
    let mut end = 0;
    for (offset, word) in word_spans(sentence) {
        let piece_start = start.unwrap_or(offset);
        let candidate_end = offset + word.len();
        if start.is_some() && estimate_tokens(&sentence[piece_start..candidate_end]) > max_tokens {
            pieces.push(&sentence[piece_start..end]);
            start = Some(offset);
        } else if start.is_none() {
            start = Some(offset);
        }
        end = candidate_end;
    }
    if let Some(s) = start {
        pieces.push(&sentence[s..end]);
    }
    pieces
}

fn word_spans(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.split_whitespace()
        .map(move |w| (w.as_ptr() as usize - text.as_ptr() as usize, w))
}

/// Split plain text into chunks of at most `max_chunk_size` estimated tokens
pub fn chunk_text(text: &str, options: &ChunkOptions) -> Vec<TextChunk> {
    let text = text.trim();
    if estimate_tokens(text) <= options.max_chunk_size {
        return vec![TextChunk { text: text.to_string(), index: 0, start_ms: None, end_ms: None }];
    }

    let units: Vec<Unit> = split_sentences(text)
        .into_iter()
        .flat_map(|s| split_oversized(s, options.max_chunk_size))
        .map(Unit::plain)
        .collect();
    accumulate(&units, options)
}

/// Split timed segments into chunks, recording each chunk's start and end time
pub fn chunk_segments(segments: &[TranscriptSegment], options: &ChunkOptions) -> Vec<TextChunk> {
    let units: Vec<Unit> = segments
        .iter()
        .filter_map(|s| {
            let text = s.text.trim();
            if text.is_empty() {
                return None;
            }
            Some(Unit {
                text,
                chars: text.chars().count(),
                start_ms: Some(s.offset_ms),
                end_ms: Some(s.end_ms()),
            })
        })
        .collect();
    accumulate(&units, options)
}

fn accumulate(units: &[Unit], options: &ChunkOptions) -> Vec<TextChunk> {
    let mut chunks = Vec::new();
    let mut current: Vec<Unit> = Vec::new();
    let mut current_chars = 0;
    let mut fresh = 0;

    for unit in units {
        let joined = if current.is_empty() { unit.chars } else { current_chars + 1 + unit.chars };
        if fresh > 0 && tokens_for_chars(joined) > options.max_chunk_size {
            chunks.push(build_chunk(&current, chunks.len()));

            let mut seed = if options.preserve_context {
                overlap_tail(&current, options.overlap_size)
            } else {
                Vec::new()
            };
            while !seed.is_empty() && tokens_for_chars(joined_chars(&seed) + 1 + unit.chars) > options.max_chunk_size {
                seed.remove(0);
            }
            current = seed;
            current_chars = joined_chars(&current);
            fresh = 0;
        }

        current_chars = if current.is_empty() { unit.chars } else { current_chars + 1 + unit.chars };
        current.push(*unit);
        fresh += 1;
    }

    if fresh > 0 {
        chunks.push(build_chunk(&current, chunks.len()));
    }
    chunks
}

/// Whole trailing units whose joined length fits in `max_chars`
fn overlap_tail<'a>(units: &[Unit<'a>], max_chars: usize) -> Vec<Unit<'a>> {
    let mut taken = 0;
    let mut chars = 0;
    for unit in units.iter().rev() {
        let next = if taken == 0 { unit.chars } else { chars + 1 + unit.chars };
        if next > max_chars {
            break;
        }
        chars = next;
        taken += 1;
    }
    units[units.len() - taken..].to_vec()
}

/// Trailing whole sentences of `text` within `max_chars`, or whole words when no sentence fits
pub fn trailing_context(text: &str, max_chars: usize) -> String {
    let sentences: Vec<Unit> = split_sentences(text).into_iter().map(Unit::plain).collect();
    let mut tail = overlap_tail(&sentences, max_chars);
    if tail.is_empty() {
        let words: Vec<Unit> = text.split_whitespace().map(Unit::plain).collect();
        tail = overlap_tail(&words, max_chars);
    }
    tail.iter().map(|u| u.text).collect::<Vec<_>>().join(" ")
}

fn joined_chars(units: &[Unit]) -> usize {
    if units.is_empty() {
        0
    } else {
        units.iter().map(|u| u.chars).sum::<usize>() + units.len() - 1
    }
}

fn build_chunk(units: &[Unit], index: usize) -> TextChunk {
    TextChunk {
        text: units.iter().map(|u| u.text).collect::<Vec<_>>().join(" "),
        index,
        start_ms: units.first().and_then(|u| u.start_ms),
        end_ms: units.last().and_then(|u| u.end_ms),
    }
}

/// Reassemble chunks in index order separated by blank lines
pub fn merge_chunks(chunks: &[TextChunk]) -> String {
    let mut ordered: Vec<&TextChunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.index);
    ordered
        .iter()
        .map(|c| c.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collapse_whitespace;

    fn sentences(n: usize) -> String {
        (0..n)
            .map(|i| format!("Sentence number {i} talks about topic {}.", i * 7))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn opts(max: usize, overlap: usize, preserve: bool) -> ChunkOptions {
        ChunkOptions { max_chunk_size: max, overlap_size: overlap, preserve_context: preserve }
    }

    /// Length of the longest prefix of `cur` that is also a suffix of `prev`
    fn shared_overlap(prev: &str, cur: &str) -> usize {
        (1..=prev.len().min(cur.len()))
            .rev()
            .find(|&l| cur.is_char_boundary(l) && prev.is_char_boundary(prev.len() - l) && cur[..l] == prev[prev.len() - l..])
            .unwrap_or(0)
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("A short transcript. Nothing more.", &opts(100, 20, true));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "A short transcript. Nothing more.");
        assert!(chunks[0].start_ms.is_none());
    }

    #[test]
    fn test_split_sentences() {
        let parts = split_sentences("Hello there! How are you? I'm \"fine.\" And then\nno end");
        assert_eq!(parts, vec!["Hello there!", "How are you?", "I'm \"fine.\"", "And then\nno end"]);
    }

    #[test]
    fn test_chunks_respect_bound() {
        let text = sentences(80);
        let chunks = chunk_text(&text, &opts(50, 60, true));
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(estimate_tokens(&chunk.text) <= 50, "chunk {} too large", chunk.index);
        }
        let indexes: Vec<usize> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(indexes, (0..chunks.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_concatenation_without_overlap_reconstructs_text() {
        let text = sentences(60).replace(". ", ".\n  ");
        let chunks = chunk_text(&text, &opts(40, 0, false));
        assert!(chunks.len() > 1);
        let joined = chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join(" ");
        assert_eq!(collapse_whitespace(&joined), collapse_whitespace(&text));
    }

    #[test]
    fn test_overlap_is_bounded_suffix_of_previous_chunk() {
        let text = sentences(60);
        let overlap = 90;
        let chunks = chunk_text(&text, &opts(40, overlap, true));
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let shared = shared_overlap(&pair[0].text, &pair[1].text);
            assert!(shared > 0, "chunk {} has no carried context", pair[1].index);
            assert!(shared <= overlap, "overlap {shared} exceeds {overlap}");
            assert!(pair[1].text[..shared].ends_with('.'), "overlap is not sentence aligned");
        }
    }

    #[test]
    fn test_overlap_larger_than_sentence_is_skipped() {
        let text = sentences(40);
        let chunks = chunk_text(&text, &opts(30, 5, true));
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert_eq!(shared_overlap(&pair[0].text, &pair[1].text), 0);
        }
    }

    #[test]
    fn test_unpunctuated_text_is_split_at_words() {
        let text = "word ".repeat(500);
        let chunks = chunk_text(&text, &opts(25, 0, false));
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(estimate_tokens(&chunk.text) <= 25);
        }
        let words: usize = chunks.iter().map(|c| c.text.split_whitespace().count()).sum();
        assert_eq!(words, 500);
    }

    fn timed(n: usize) -> Vec<TranscriptSegment> {
        (0..n)
            .map(|i| TranscriptSegment {
                text: format!("segment {i} says something useful"),
                offset_ms: i as u64 * 2000,
                duration_ms: 1500,
            })
            .collect()
    }

    #[test]
    fn test_chunk_segments_records_time_bounds() {
        let segments = timed(50);
        let chunks = chunk_segments(&segments, &opts(60, 0, false));
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].start_ms, Some(0));
        let last = chunks.last().unwrap();
        assert_eq!(last.end_ms, Some(49 * 2000 + 1500));
        for pair in chunks.windows(2) {
            assert!(pair[0].end_ms.unwrap() <= pair[1].start_ms.unwrap());
        }
    }

    #[test]
    fn test_chunk_segments_reconstructs_joined_text() {
        let segments = timed(40);
        let chunks = chunk_segments(&segments, &opts(45, 0, false));
        let joined = chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join(" ");
        assert_eq!(joined, crate::join_segment_text(&segments));
    }

    #[test]
    fn test_chunk_segments_overlap_moves_start_back() {
        let segments = timed(40);
        let chunks = chunk_segments(&segments, &opts(45, 40, true));
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(pair[1].start_ms.unwrap() < pair[0].end_ms.unwrap());
            assert!(shared_overlap(&pair[0].text, &pair[1].text) <= 40);
        }
    }

    #[test]
    fn test_chunk_segments_single_chunk_and_empty() {
        let chunks = chunk_segments(&timed(2), &ChunkOptions::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_ms, Some(0));
        assert_eq!(chunks[0].end_ms, Some(3500));
        assert!(chunk_segments(&[], &ChunkOptions::default()).is_empty());
    }

    #[test]
    fn test_trailing_context() {
        let text = "First sentence here. Second one. Third and last.";
        assert_eq!(trailing_context(text, 30), "Second one. Third and last.");
        assert_eq!(trailing_context(text, 16), "Third and last.");
        assert_eq!(trailing_context("[0:01] no punctuation at all", 11), "at all");
        assert_eq!(trailing_context(text, 0), "");
    }

    #[test]
    fn test_merge_sorts_by_index() {
        let chunks = vec![
            TextChunk { text: "second".into(), index: 1, start_ms: None, end_ms: None },
            TextChunk { text: " first ".into(), index: 0, start_ms: None, end_ms: None },
            TextChunk { text: "third".into(), index: 2, start_ms: None, end_ms: None },
        ];
        assert_eq!(merge_chunks(&chunks), "first\n\nsecond\n\nthird");
    }

    #[test]
    fn test_merge_inverts_chunking_without_overlap() {
        let text = sentences(30);
        let engine = ChunkingEngine::new(opts(30, 0, false));
        let merged = engine.merge(&engine.chunk_text(&text));
        assert_eq!(collapse_whitespace(&merged), text);
    }
}
