//! Sentence-aware text splitting with overlap.

use crate::models::IndexingConfig;
use crate::utils::has_meaningful_content;

/// A slice of the source text with its character offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub text: String,
    /// Character offset of the first character
    pub start: usize,
    /// Character offset one past the last character
    pub end: usize,
}

/// Splits text into bounded, overlapping chunks that prefer natural break points.
#[derive(Debug, Clone)]
pub struct SentenceSplitter {
    /// Target chunk size in characters (approximate tokens * 4)
    chunk_size: usize,
    /// Overlap size in characters
    overlap: usize,
}

impl SentenceSplitter {
    pub fn new(config: &IndexingConfig) -> Self {
        Self::with_sizes(config.chunk_size as usize, config.chunk_overlap as usize)
    }

    /// `chunk_tokens` is the target size in tokens, `overlap_percent` the share repeated
    /// at the start of the next chunk.
    pub fn with_sizes(chunk_tokens: usize, overlap_percent: usize) -> Self {
        // 1 token ≈ 4 characters
        let chunk_size = chunk_tokens.max(1) * 4;
        let overlap = (chunk_size * overlap_percent.min(90)) / 100;
        Self {
            chunk_size,
            overlap,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&IndexingConfig::default())
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split text into spans; whitespace-only spans are dropped.
    pub fn split(&self, content: &str) -> Vec<TextSpan> {
        let chars: Vec<char> = content.chars().collect();
        let total_chars = chars.len();
        let mut spans = Vec::new();

        if total_chars <= self.chunk_size {
            if has_meaningful_content(content) {
                spans.push(TextSpan {
                    text: content.to_string(),
                    start: 0,
                    end: total_chars,
                });
            }
            return spans;
        }

        let mut start = 0;
        while start < total_chars {
            let end = (start + self.chunk_size).min(total_chars);
            let adjusted_end = self.find_break_point(&chars, start, end, total_chars);

            let text: String = chars[start..adjusted_end].iter().collect();
            if has_meaningful_content(&text) {
                spans.push(TextSpan {
                    text,
                    start,
                    end: adjusted_end,
                });
            }

            if adjusted_end >= total_chars {
                break;
            }

            // Step back by the overlap, but always make progress.
            let next = adjusted_end.saturating_sub(self.overlap);
            start = if next > start { next } else { adjusted_end };
            start = Self::skip_to_word_start(&chars, start, adjusted_end);
        }

        spans
    }

    /// Move forward to the next word boundary so overlaps don't begin mid-word.
    fn skip_to_word_start(chars: &[char], start: usize, limit: usize) -> usize {
        if start == 0 || chars[start - 1].is_whitespace() {
            return start;
        }
        chars[start..limit]
            .iter()
            .position(|c| c.is_whitespace())
            .map_or(start, |offset| start + offset + 1)
    }

    /// Find a natural break point near the target end position.
    fn find_break_point(&self, chars: &[char], start: usize, target_end: usize, total: usize) -> usize {
        if target_end >= total {
            return total;
        }

        // Look for a natural break point within the last 20% of the chunk
        let search_start = target_end.saturating_sub(self.chunk_size / 5).max(start + 1);
        let search_range = &chars[search_start..target_end];

        // Priority: double newline > sentence end > single newline > space.
        let mut best_break = None;
        let mut last_newline = None;
        let mut last_sentence = None;
        let mut last_space = None;

        for (i, c) in search_range.iter().enumerate() {
            let pos = search_start + i;
            match c {
                '\n' => {
                    if i > 0 && search_range.get(i - 1) == Some(&'\n') {
                        best_break = Some(pos + 1);
                    }
                    last_newline = Some(pos + 1);
                }
                '.' | '!' | '?' => {
                    if chars.get(pos + 1).is_some_and(|c| c.is_whitespace()) {
                        last_sentence = Some(pos + 1);
                    }
                }
                ' ' | '\t' => {
                    last_space = Some(pos + 1);
                }
                _ => {}
            }
        }

        best_break
            .or(last_sentence)
            .or(last_newline)
            .or(last_space)
            .unwrap_or(target_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_span() {
        let splitter = SentenceSplitter::with_defaults();
        let spans = splitter.split("Hello, world!");

        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "Hello, world!");
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans[0].end, 13);
    }

    #[test]
    fn test_empty_and_blank_text() {
        let splitter = SentenceSplitter::with_defaults();
        assert!(splitter.split("").is_empty());
        assert!(splitter.split("   \n\n  ").is_empty());
    }

    #[test]
    fn test_spans_overlap_and_cover_text() {
        // 50 tokens = 200 chars, 20% overlap = 40 chars
        let splitter = SentenceSplitter::with_sizes(50, 20);
        let content = "The quick brown fox jumps over the lazy dog. ".repeat(30);
        let spans = splitter.split(&content);

        assert!(spans.len() > 1);
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans.last().unwrap().end, content.chars().count());
        for pair in spans.windows(2) {
            assert!(pair[1].start < pair[0].end, "consecutive spans must overlap");
            assert!(pair[1].start > pair[0].start);
        }
        for span in &spans {
            assert!(span.text.chars().count() <= 200);
        }
    }

    #[test]
    fn test_prefers_sentence_break() {
        let splitter = SentenceSplitter::with_sizes(25, 0);
        let content = format!("{}. {}", "a".repeat(90), "b".repeat(60));
        let spans = splitter.split(&content);

        assert!(spans[0].text.ends_with('.'));
    }

    #[test]
    fn test_break_priority() {
        let splitter = SentenceSplitter::with_sizes(25, 0);
        let head = format!("{}. bbbbb", "a".repeat(85));

        let wrapped = format!("{}\n{}", head, "c".repeat(60));
        let spans = splitter.split(&wrapped);
        assert_eq!(spans[0].end, 86);
        assert!(spans[0].text.ends_with('.'));

        let paragraphs = format!("{}\n\n{}", head, "c".repeat(60));
        let spans = splitter.split(&paragraphs);
        assert_eq!(spans[0].end, 94);
        assert!(spans[0].text.ends_with("bbbbb\n\n"));
    }

    #[test]
    fn test_unbroken_text_still_progresses() {
        let splitter = SentenceSplitter::with_sizes(10, 50);
        let content = "x".repeat(500);
        let spans = splitter.split(&content);

        assert!(spans.len() > 1);
        assert_eq!(spans.last().unwrap().end, 500);
    }
}
