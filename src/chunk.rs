//! Boundary-aware text chunker.
//!
//! Splits extracted text into [`TextChunk`]s that each fit a character
//! budget derived from `max_tokens`. Within a tolerance window before the
//! budget edge the split prefers, in order: a paragraph break, a sentence
//! end, a newline, any whitespace. If none exists the text is hard-split at
//! the budget edge on a UTF-8 character boundary.
//!
//! Chunks are raw slices of the input and carry their byte [`Span`]. With
//! overlap enabled each chunk starts up to `overlap` bytes before the end of
//! the previous one, so the sequence covers the whole input with no gaps.
//! Output depends only on the text and the configuration.

use crate::config::ChunkingConfig;
use crate::models::{Span, TextChunk};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_chars: usize,
    overlap: usize,
    window: usize,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        let max_chars = (config.max_tokens * CHARS_PER_TOKEN).max(1);
        let overlap = (max_chars as f64 * config.overlap).floor() as usize;
        let window = ((max_chars as f64 * config.boundary_window).floor() as usize).max(1);
        Self {
            max_chars,
            overlap: overlap.min(max_chars / 2),
            window,
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Split `text` into chunks with contiguous `seq` starting at 0.
    /// Empty text yields no chunks.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let bytes = text.as_bytes();
        let len = text.len();
        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < len {
            if len - start <= self.max_chars {
                chunks.push(slice(text, chunks.len(), start, len));
                break;
            }

            let mut hard = floor_char_boundary(text, start + self.max_chars);
            if hard <= start {
                // A single character wider than the budget.
                hard = start + text[start..].chars().next().map_or(1, char::len_utf8);
            }

            let lo = hard.saturating_sub(self.window).max(start + 1);
            let end = find_boundary(bytes, lo, hard).unwrap_or(hard);
            chunks.push(slice(text, chunks.len(), start, end));

            start = self.next_start(text, start, end);
        }

        chunks
    }

    fn next_start(&self, text: &str, prev_start: usize, end: usize) -> usize {
        if self.overlap == 0 {
            return end;
        }
        let bytes = text.as_bytes();
        let mut next = ceil_char_boundary(text, end.saturating_sub(self.overlap));
        if let Some(word) = (next..end).find(|&p| is_word_start(bytes, p)) {
            next = word;
        }
        if next <= prev_start {
            end
        } else {
            next
        }
    }
}

fn slice(text: &str, seq: usize, start: usize, end: usize) -> TextChunk {
    TextChunk {
        seq,
        text: text[start..end].to_string(),
        span: Span { start, end },
    }
}

/// Best split point in `(lo..=hi)`, returned as the exclusive end of the
/// chunk. All delimiters are ASCII, so every result is a char boundary.
fn find_boundary(bytes: &[u8], lo: usize, hi: usize) -> Option<usize> {
    if lo >= hi {
        return None;
    }
    let region = &bytes[lo..hi];

    // Paragraph break
    if let Some(i) = region.windows(2).rposition(|w| w == b"\n\n") {
        return Some(lo + i + 2);
    }
    // Sentence end followed by whitespace
    if let Some(i) = region
        .windows(2)
        .rposition(|w| matches!(w[0], b'.' | b'!' | b'?') && w[1].is_ascii_whitespace())
    {
        return Some(lo + i + 2);
    }
    // Line break
    if let Some(i) = region.iter().rposition(|&b| b == b'\n') {
        return Some(lo + i + 1);
    }
    // Any whitespace
    region
        .iter()
        .rposition(|b| b.is_ascii_whitespace())
        .map(|i| lo + i + 1)
}

fn is_word_start(bytes: &[u8], p: usize) -> bool {
    p > 0 && bytes[p - 1].is_ascii_whitespace() && !bytes[p].is_ascii_whitespace()
}

fn floor_char_boundary(text: &str, mut i: usize) -> usize {
    if i >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(text: &str, mut i: usize) -> usize {
    while i < text.len() && !text.is_char_boundary(i) {
        i += 1;
    }
    i.min(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max_tokens: usize, overlap: f64) -> Chunker {
        Chunker::new(&ChunkingConfig {
            max_tokens,
            overlap,
            boundary_window: 0.2,
        })
    }

    /// Rebuild the input from chunk spans, dropping the overlapping prefix.
    fn reconstruct(chunks: &[TextChunk]) -> String {
        let mut out = String::new();
        let mut covered = 0;
        for c in chunks {
            assert!(c.span.start <= covered, "gap before chunk {}", c.seq);
            out.push_str(&c.text[covered - c.span.start..]);
            covered = c.span.end;
        }
        out
    }

    fn sample_text() -> String {
        (0..40)
            .map(|i| {
                format!(
                    "Paragraph {i} talks about topic number {i}. It has two sentences!\n\
                     And a trailing line without punctuation"
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(chunker(10, 0.1).chunk("").is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunker(700, 0.1).chunk("Hello, world!");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].seq, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].span, Span { start: 0, end: 13 });
    }

    #[test]
    fn test_whitespace_only_text_is_one_chunk() {
        let chunks = chunker(10, 0.0).chunk("   \n  ");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "   \n  ");
    }

    #[test]
    fn test_coverage_without_overlap() {
        let text = sample_text();
        let chunks = chunker(20, 0.0).chunk(&text);
        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(&chunks), text);
        for w in chunks.windows(2) {
            assert_eq!(w[0].span.end, w[1].span.start);
        }
    }

    #[test]
    fn test_coverage_with_overlap() {
        let text = sample_text();
        let chunks = chunker(20, 0.25).chunk(&text);
        assert_eq!(reconstruct(&chunks), text);
        assert!(chunks.windows(2).any(|w| w[1].span.start < w[0].span.end));
    }

    #[test]
    fn test_chunks_within_budget_and_spans_match() {
        let text = sample_text();
        let c = chunker(15, 0.1);
        for chunk in c.chunk(&text) {
            assert!(chunk.text.len() <= c.max_chars());
            assert_eq!(chunk.text, &text[chunk.span.start..chunk.span.end]);
        }
    }

    #[test]
    fn test_seq_contiguous() {
        let chunks = chunker(10, 0.1).chunk(&sample_text());
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.seq, i, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_prefers_paragraph_break() {
        // max_chars = 40, window = 8
        let text = format!("{}\n\n{}", "a".repeat(34), "b".repeat(30));
        let chunks = chunker(10, 0.0).chunk(&text);
        assert_eq!(chunks[0].text, format!("{}\n\n", "a".repeat(34)));
    }

    #[test]
    fn test_prefers_sentence_over_space() {
        // max_chars = 40, window = 8: the sentence end sits inside the window.
        let text = "aaaa aaaa aaaa aaaa aaaa aaaa aa. bb bb bbbbbbbbbbbbbbbbbbbbbb";
        let chunks = chunker(10, 0.0).chunk(text);
        assert!(chunks[0].text.ends_with(". "));
    }

    #[test]
    fn test_hard_split_without_boundary() {
        let text = "x".repeat(100);
        let chunks = chunker(10, 0.0).chunk(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text.len(), 40);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_hard_split_respects_utf8() {
        let text = "é".repeat(50); // 100 bytes, no boundaries
        let chunks = chunker(3, 0.2).chunk(&text);
        for c in &chunks {
            assert!(c.text.chars().all(|ch| ch == 'é'));
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_overlap_starts_on_word() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";
        let chunks = chunker(5, 0.5).chunk(text);
        for c in chunks.iter().skip(1) {
            let prev = &text.as_bytes()[c.span.start - 1];
            assert!(prev.is_ascii_whitespace(), "chunk {} starts mid-word", c.seq);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = sample_text();
        let c = chunker(12, 0.2);
        assert_eq!(c.chunk(&text), c.chunk(&text));
    }
}
