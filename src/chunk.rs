//! Splits plain text into overlapping chunks per strategy (C2).
//!
//! Three strategies are supported: [`ChunkStrategy::Fixed`] (sliding
//! character window with back-overlap), [`ChunkStrategy::Paragraph`]
//! (greedy merge of blank-line-delimited paragraphs, as the original
//! chunker did), and [`ChunkStrategy::Semantic`] (paragraph first, then
//! sentence-boundary split within any paragraph that still exceeds the
//! budget). All three guarantee at least one chunk and contiguous,
//! zero-based `chunk_index`es.

use std::str::FromStr;

use crate::models::ChunkWithoutVector;

/// Sentence terminators respected by [`ChunkStrategy::Semantic`]: ASCII and
/// full-width CJK forms, plus bare newlines.
const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '。', '！', '？', '\n'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    Fixed,
    Paragraph,
    Semantic,
}

impl FromStr for ChunkStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(ChunkStrategy::Fixed),
            "paragraph" => Ok(ChunkStrategy::Paragraph),
            "semantic" => Ok(ChunkStrategy::Semantic),
            other => anyhow::bail!("unknown chunk strategy: {other}"),
        }
    }
}

/// Chunking options. `max_chunk_chars` is normally overridden per-call by
/// the active embedding model's advertised token budget.
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    pub strategy: ChunkStrategy,
    pub max_chunk_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Paragraph,
            max_chunk_chars: 2000,
            overlap_chars: 200,
        }
    }
}

/// Split `text` into chunks per `opts.strategy`.
///
/// An empty input produces a single empty chunk with `chunk_index == 0`; a
/// document shorter than `max_chunk_chars` always produces exactly one
/// chunk regardless of strategy.
pub fn chunk(text: &str, opts: &ChunkOptions) -> Vec<ChunkWithoutVector> {
    if text.is_empty() {
        return vec![ChunkWithoutVector {
            chunk_index: 0,
            content: String::new(),
            start_offset: 0,
            end_offset: 0,
        }];
    }

    let spans = match opts.strategy {
        ChunkStrategy::Fixed => fixed_spans(text, opts.max_chunk_chars, opts.overlap_chars),
        ChunkStrategy::Paragraph => paragraph_spans(text, opts.max_chunk_chars, opts.overlap_chars),
        ChunkStrategy::Semantic => semantic_spans(text, opts.max_chunk_chars, opts.overlap_chars),
    };

    spans
        .into_iter()
        .enumerate()
        .map(|(i, (start, end))| ChunkWithoutVector {
            chunk_index: i,
            content: text[start..end].to_string(),
            start_offset: start,
            end_offset: end,
        })
        .collect()
}

/// Byte offsets of each produced chunk, as `(start, end)` spans on char
/// boundaries. `max_chars`/`overlap` are measured in chars so multi-byte
/// UTF-8 codepoints are never split.
fn fixed_spans(text: &str, max_chars: usize, overlap: usize) -> Vec<(usize, usize)> {
    let char_indices: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let char_count = char_indices.len();
    let text_len = text.len();
    let max_chars = max_chars.max(1);
    let overlap = overlap.min(max_chars.saturating_sub(1));

    let mut spans = Vec::new();
    let mut start_char = 0usize;

    while start_char < char_count {
        let end_char = (start_char + max_chars).min(char_count);
        let start_byte = char_indices[start_char];
        let end_byte = if end_char == char_count {
            text_len
        } else {
            char_indices[end_char]
        };
        spans.push((start_byte, end_byte));

        if end_char >= char_count {
            break;
        }
        start_char = end_char - overlap;
    }

    if spans.is_empty() {
        spans.push((0, text_len));
    }
    spans
}

/// Split on blank-line boundaries, merging adjacent paragraphs greedily
/// until the next addition would exceed `max_chars`. A single paragraph
/// larger than the budget falls back to [`fixed_spans`] on itself.
fn paragraph_spans(text: &str, max_chars: usize, overlap: usize) -> Vec<(usize, usize)> {
    let paragraphs = split_paragraphs(text);
    if paragraphs.is_empty() {
        return vec![(0, text.len())];
    }

    let mut spans = Vec::new();
    let mut cur_start: Option<usize> = None;
    let mut cur_end = 0usize;

    for (p_start, p_end) in paragraphs {
        let p_len_chars = text[p_start..p_end].chars().count();

        if p_len_chars > max_chars {
            if let Some(start) = cur_start.take() {
                spans.push((start, cur_end));
            }
            for (s, e) in fixed_spans(&text[p_start..p_end], max_chars, overlap) {
                spans.push((p_start + s, p_start + e));
            }
            continue;
        }

        match cur_start {
            None => {
                cur_start = Some(p_start);
                cur_end = p_end;
            }
            Some(start) => {
                let combined_chars = text[start..p_end].chars().count();
                if combined_chars > max_chars {
                    spans.push((start, cur_end));
                    cur_start = Some(p_start);
                    cur_end = p_end;
                } else {
                    cur_end = p_end;
                }
            }
        }
    }

    if let Some(start) = cur_start {
        spans.push((start, cur_end));
    }

    spans
}

/// Paragraph-first, then sentence-boundary split within any merged run
/// that still exceeds `max_chars`.
fn semantic_spans(text: &str, max_chars: usize, overlap: usize) -> Vec<(usize, usize)> {
    let coarse = paragraph_spans(text, max_chars, overlap);
    let mut spans = Vec::new();

    for (start, end) in coarse {
        let span_chars = text[start..end].chars().count();
        if span_chars <= max_chars {
            spans.push((start, end));
            continue;
        }
        spans.extend(sentence_split(text, start, end, max_chars));
    }

    spans
}

/// Greedily merge sentences (split at [`SENTENCE_TERMINATORS`]) within
/// `[start, end)` until the budget would be exceeded.
fn sentence_split(text: &str, start: usize, end: usize, max_chars: usize) -> Vec<(usize, usize)> {
    let slice = &text[start..end];
    let mut sentence_bounds = Vec::new();
    let mut seg_start = 0usize;

    for (i, c) in slice.char_indices() {
        if SENTENCE_TERMINATORS.contains(&c) {
            let seg_end = i + c.len_utf8();
            sentence_bounds.push((seg_start, seg_end));
            seg_start = seg_end;
        }
    }
    if seg_start < slice.len() {
        sentence_bounds.push((seg_start, slice.len()));
    }
    if sentence_bounds.is_empty() {
        return fixed_spans(slice, max_chars, 0)
            .into_iter()
            .map(|(s, e)| (start + s, start + e))
            .collect();
    }

    let mut spans = Vec::new();
    let mut cur_start = sentence_bounds[0].0;
    let mut cur_end = sentence_bounds[0].1;

    for &(s_start, s_end) in &sentence_bounds[1..] {
        let combined_chars = slice[cur_start..s_end].chars().count();
        if combined_chars > max_chars {
            spans.push((start + cur_start, start + cur_end));
            cur_start = s_start;
            cur_end = s_end;
        } else {
            cur_end = s_end;
        }
    }
    spans.push((start + cur_start, start + cur_end));

    // A single oversized sentence still needs a hard split.
    spans
        .into_iter()
        .flat_map(|(s, e)| {
            if text[s..e].chars().count() > max_chars {
                fixed_spans(&text[s..e], max_chars, 0)
                    .into_iter()
                    .map(|(a, b)| (s + a, s + b))
                    .collect::<Vec<_>>()
            } else {
                vec![(s, e)]
            }
        })
        .collect()
}

/// Byte spans of non-blank paragraphs, delimited by one or more blank lines.
fn split_paragraphs(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut para_start: Option<usize> = None;
    let mut last_non_blank_end = 0usize;
    let mut offset = 0usize;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        let line_start = offset;
        let line_end = offset + line.len();

        if trimmed.is_empty() {
            if let Some(start) = para_start.take() {
                spans.push((start, last_non_blank_end));
            }
        } else {
            if para_start.is_none() {
                para_start = Some(line_start);
            }
            last_non_blank_end = line_end;
        }

        offset = line_end;
    }

    if let Some(start) = para_start {
        spans.push((start, last_non_blank_end));
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(strategy: ChunkStrategy, max_chars: usize, overlap: usize) -> ChunkOptions {
        ChunkOptions {
            strategy,
            max_chunk_chars: max_chars,
            overlap_chars: overlap,
        }
    }

    #[test]
    fn empty_text_single_chunk() {
        let chunks = chunk("", &opts(ChunkStrategy::Paragraph, 100, 10));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].content, "");
    }

    #[test]
    fn short_text_is_one_chunk_with_index_zero() {
        let chunks = chunk("alpha beta gamma", &opts(ChunkStrategy::Paragraph, 100, 10));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].content, "alpha beta gamma");
    }

    #[test]
    fn fixed_strategy_respects_overlap_and_codepoint_boundaries() {
        let text = "héllo wörld this is ünïcode text";
        let chunks = chunk(text, &opts(ChunkStrategy::Fixed, 10, 3));
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(text.is_char_boundary(c.start_offset));
            assert!(text.is_char_boundary(c.end_offset));
        }
    }

    #[test]
    fn fixed_strategy_indices_are_contiguous() {
        let text = "a".repeat(55);
        let chunks = chunk(&text, &opts(ChunkStrategy::Fixed, 10, 2));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
        }
    }

    #[test]
    fn paragraph_strategy_merges_small_paragraphs() {
        let text = "one\n\ntwo\n\nthree";
        let chunks = chunk(text, &opts(ChunkStrategy::Paragraph, 100, 10));
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("one"));
        assert!(chunks[0].content.contains("three"));
    }

    #[test]
    fn paragraph_strategy_splits_when_exceeding_budget() {
        let text = format!("{}\n\n{}", "a".repeat(20), "b".repeat(20));
        let chunks = chunk(&text, &opts(ChunkStrategy::Paragraph, 25, 0));
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn paragraph_strategy_hard_splits_oversized_single_paragraph() {
        let text = "x".repeat(50);
        let chunks = chunk(&text, &opts(ChunkStrategy::Paragraph, 10, 0));
        assert!(chunks.len() >= 5);
    }

    #[test]
    fn semantic_strategy_splits_on_sentence_terminators() {
        let text = format!("{} {} {}", "a".repeat(15), "b".repeat(15), "c".repeat(15))
            .replace(' ', ". ");
        let chunks = chunk(&text, &opts(ChunkStrategy::Semantic, 20, 0));
        assert!(chunks.len() > 1);
    }

    #[test]
    fn semantic_strategy_handles_cjk_terminators() {
        let text = "这是第一句。这是第二句！这是第三句？".repeat(3);
        let chunks = chunk(&text, &opts(ChunkStrategy::Semantic, 15, 0));
        assert!(chunks.len() > 1);
    }

    #[test]
    fn deterministic_output_for_same_input() {
        let text = "alpha\n\nbeta\n\ngamma delta epsilon";
        let a = chunk(text, &opts(ChunkStrategy::Paragraph, 15, 2));
        let b = chunk(text, &opts(ChunkStrategy::Paragraph, 15, 2));
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.content, y.content);
        }
    }

    #[test]
    fn strategy_from_str() {
        assert_eq!(ChunkStrategy::from_str("fixed").unwrap(), ChunkStrategy::Fixed);
        assert_eq!(
            ChunkStrategy::from_str("paragraph").unwrap(),
            ChunkStrategy::Paragraph
        );
        assert_eq!(
            ChunkStrategy::from_str("semantic").unwrap(),
            ChunkStrategy::Semantic
        );
        assert!(ChunkStrategy::from_str("bogus").is_err());
    }
}
