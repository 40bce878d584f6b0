//! The recursive separator splitter.
//!
//! The shape of the algorithm: pick the coarsest separator that occurs more
//! than once, split into parts (each keeping its trailing separator), greedily
//! pack parts into chunks of at most `chunk_size` characters, and seed each
//! following chunk with an overlap tail of the previous one. A part too large
//! for one chunk is re-split with the remaining finer separators; a text no
//! separator splits falls back to a sliding character window.
//!
//! The recursion is driven by an explicit work stack, so a pathological input
//! (one multi-megabyte line) costs heap, not call stack.

use foundry_core::config::ChunkerConfig;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkerError {
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,
}

/// One emitted chunk: its text and the half-open character range it occupies
/// in the original input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
}

impl ChunkSpan {
    pub fn char_count(&self) -> usize {
        self.char_end - self.char_start
    }
}

/// Adaptive chunk size for a file of `file_size` characters.
///
/// Files at or below `min_chunk_size` are not chunked at all (the caller
/// records an empty chunk list and serves them whole). Beyond that the size
/// aims for `target_chunks` chunks, clamped into the configured bounds, so
/// file growth past `target_chunks × max_chunk_size` grows the chunk count
/// rather than the chunk size.
pub fn calculate_chunk_size(file_size: usize, config: &ChunkerConfig) -> usize {
    if file_size <= config.min_chunk_size {
        return file_size;
    }
    file_size
        .div_ceil(config.target_chunks)
        .clamp(config.min_chunk_size, config.max_chunk_size)
}

/// Chunk a whole file under the given configuration.
///
/// Returns an empty list for files at or below the minimum chunk size; such
/// files are referenced whole and never split.
pub fn chunk_file(text: &str, config: &ChunkerConfig) -> Result<Vec<ChunkSpan>, ChunkerError> {
    let total_chars = text.chars().count();
    if total_chars <= config.min_chunk_size {
        return Ok(Vec::new());
    }
    let chunk_size = calculate_chunk_size(total_chars, config);
    split_text(text, chunk_size, config.overlap, &config.separators)
}

/// Split `text` into chunks of at most roughly `chunk_size` characters.
///
/// `separators` is tried coarsest-first; an empty string entry engages the
/// character-level fallback. Offsets in the result are always relative to
/// `text` itself. Deterministic: equal inputs give equal output.
pub fn split_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    separators: &[String],
) -> Result<Vec<ChunkSpan>, ChunkerError> {
    if chunk_size == 0 {
        return Err(ChunkerError::ZeroChunkSize);
    }

    let index = CharIndex::new(text);
    let total = index.char_len();
    let mut out = Vec::new();
    if total == 0 {
        return Ok(out);
    }

    let mut stack = vec![Work::Split {
        start: 0,
        end: total,
        sep_idx: 0,
    }];

    while let Some(work) = stack.pop() {
        match work {
            Work::Split {
                start,
                end,
                sep_idx,
            } => {
                if end - start <= chunk_size {
                    index.emit(start, end, &mut out);
                    continue;
                }
                match pick_separator(&index, start, end, sep_idx, separators) {
                    Selected::None => {
                        // No finer separator left: truncate instead of looping.
                        index.emit(start, start + chunk_size, &mut out);
                    }
                    Selected::CharLevel => {
                        char_windows(&index, start, end, chunk_size, overlap, &mut out);
                    }
                    Selected::Separator(idx) => {
                        let parts = split_parts(&index, start, end, &separators[idx]);
                        push_segments(&mut stack, parts, chunk_size, idx + 1);
                    }
                }
            }
            Work::Pack { parts } => {
                pack_with_overlap(&index, &parts, chunk_size, overlap, &mut out);
            }
        }
    }

    Ok(out)
}

// ============================================================================
// Work items
// ============================================================================

enum Work {
    /// A slice still to be broken down with separators from `sep_idx` on.
    Split {
        start: usize,
        end: usize,
        sep_idx: usize,
    },
    /// A run of consecutive parts, each already within the chunk size, to be
    /// greedily packed with overlap seeding.
    Pack { parts: Vec<(usize, usize)> },
}

/// Group parts into segments and push them in reverse, so the stack pops them
/// in text order: runs of packable parts stay together, oversized parts
/// descend with the finer separators. Overlap never crosses a descent
/// boundary.
fn push_segments(stack: &mut Vec<Work>, parts: Vec<(usize, usize)>, chunk_size: usize, next_sep_idx: usize) {
    let mut segments = Vec::new();
    let mut run: Vec<(usize, usize)> = Vec::new();
    for part in parts {
        if part.1 - part.0 > chunk_size {
            if !run.is_empty() {
                segments.push(Work::Pack {
                    parts: std::mem::take(&mut run),
                });
            }
            segments.push(Work::Split {
                start: part.0,
                end: part.1,
                sep_idx: next_sep_idx,
            });
        } else {
            run.push(part);
        }
    }
    if !run.is_empty() {
        segments.push(Work::Pack { parts: run });
    }
    for segment in segments.into_iter().rev() {
        stack.push(segment);
    }
}

// ============================================================================
// Separator selection and splitting
// ============================================================================

enum Selected {
    /// Use the separator at this index in the priority list.
    Separator(usize),
    /// The empty-string entry was reached: sliding character window.
    CharLevel,
    /// The list is exhausted without the empty string.
    None,
}

/// First separator from `sep_idx` on that occurs more than once in the slice.
fn pick_separator(
    index: &CharIndex<'_>,
    start: usize,
    end: usize,
    sep_idx: usize,
    separators: &[String],
) -> Selected {
    let slice = index.slice(start, end);
    for (i, sep) in separators.iter().enumerate().skip(sep_idx) {
        if sep.is_empty() {
            return Selected::CharLevel;
        }
        if slice.matches(sep.as_str()).take(2).count() > 1 {
            return Selected::Separator(i);
        }
    }
    Selected::None
}

/// Split `[start, end)` on `sep`, re-suffixing every part with the separator
/// except the last. Parts are contiguous character ranges covering the slice
/// exactly.
fn split_parts(
    index: &CharIndex<'_>,
    start: usize,
    end: usize,
    sep: &str,
) -> Vec<(usize, usize)> {
    let slice = index.slice(start, end);
    let base_byte = index.byte_of(start);
    let sep_chars = sep.chars().count();

    let mut parts = Vec::new();
    let mut part_start = start;
    let mut search_from = 0usize;
    while let Some(found) = slice[search_from..].find(sep) {
        let sep_byte = search_from + found;
        let sep_char = index.char_of_byte(base_byte + sep_byte);
        let part_end = sep_char + sep_chars;
        parts.push((part_start, part_end));
        part_start = part_end;
        search_from = sep_byte + sep.len();
    }
    parts.push((part_start, end));
    parts
}

// ============================================================================
// Packing and emission
// ============================================================================

/// Greedily pack a run of parts (each within the chunk size) into chunks.
/// When the next part would overflow, the buffer is emitted and the next one
/// starts with the overlap tail of what was just emitted.
fn pack_with_overlap(
    index: &CharIndex<'_>,
    parts: &[(usize, usize)],
    chunk_size: usize,
    overlap: usize,
    out: &mut Vec<ChunkSpan>,
) {
    let Some(&(first_start, _)) = parts.first() else {
        return;
    };
    let mut buf_start = first_start;
    let mut buf_end = first_start;

    for &(part_start, part_end) in parts {
        let part_len = part_end - part_start;
        let buf_len = buf_end - buf_start;
        if buf_len > 0 && buf_len + part_len > chunk_size {
            index.emit(buf_start, buf_end, out);
            buf_start = overlap_tail_start(index, buf_start, buf_end, overlap);
        }
        buf_end = part_end;
    }
    index.emit(buf_start, buf_end, out);
}

/// Where the overlap tail of the emitted buffer `[buf_start, buf_end)`
/// begins: at most `overlap` characters from the end, trimmed to just after
/// the first space in the tail's first half so the next chunk does not open
/// mid-word.
fn overlap_tail_start(
    index: &CharIndex<'_>,
    buf_start: usize,
    buf_end: usize,
    overlap: usize,
) -> usize {
    let tail_len = overlap.min(buf_end - buf_start);
    if tail_len == 0 {
        return buf_end;
    }
    let mut tail_start = buf_end - tail_len;
    let half = tail_len / 2;
    let scan = index.slice(tail_start, tail_start + half);
    if let Some(space_byte) = scan.find(' ') {
        let space_char = index.char_of_byte(index.byte_of(tail_start) + space_byte);
        tail_start = space_char + 1;
    }
    tail_start
}

/// Character-level fallback: fixed windows of `chunk_size` advancing by
/// `chunk_size - overlap`. When overlap >= chunk_size the step is forced to
/// the full chunk size so progress is guaranteed; on that path no overlap is
/// applied. A trailing window shorter than `overlap` is dropped instead of
/// emitted; with an unforced step the previous window always reaches the end
/// first, so only the forced path can hit that guard.
fn char_windows(
    index: &CharIndex<'_>,
    start: usize,
    end: usize,
    chunk_size: usize,
    overlap: usize,
    out: &mut Vec<ChunkSpan>,
) {
    let step = if overlap >= chunk_size {
        chunk_size
    } else {
        chunk_size - overlap
    };

    let mut pos = start;
    loop {
        let window_end = (pos + chunk_size).min(end);
        if pos != start && window_end - pos < overlap {
            break;
        }
        index.emit(pos, window_end, out);
        if window_end == end {
            break;
        }
        pos += step;
    }
}

// ============================================================================
// Character indexing
// ============================================================================

/// Character offsets over a UTF-8 string. Built once per input; all splitter
/// arithmetic runs in character space and converts to bytes only to slice.
struct CharIndex<'a> {
    text: &'a str,
    // byte_of[i] is the byte offset of character i; a trailing sentinel holds
    // the total byte length.
    byte_of: Vec<usize>,
}

impl<'a> CharIndex<'a> {
    fn new(text: &'a str) -> Self {
        let mut byte_of: Vec<usize> = text.char_indices().map(|(byte, _)| byte).collect();
        byte_of.push(text.len());
        Self { text, byte_of }
    }

    fn char_len(&self) -> usize {
        self.byte_of.len() - 1
    }

    fn byte_of(&self, char_idx: usize) -> usize {
        self.byte_of[char_idx]
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.text[self.byte_of[start]..self.byte_of[end]]
    }

    /// Character index of a byte offset that lies on a character boundary.
    fn char_of_byte(&self, byte: usize) -> usize {
        match self.byte_of.binary_search(&byte) {
            Ok(i) => i,
            Err(i) => i,
        }
    }

    fn emit(&self, start: usize, end: usize, out: &mut Vec<ChunkSpan>) {
        if end > start {
            out.push(ChunkSpan {
                text: self.slice(start, end).to_string(),
                char_start: start,
                char_end: end,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_separators() -> Vec<String> {
        foundry_core::config::default_separators()
    }

    fn split(text: &str, chunk_size: usize, overlap: usize) -> Vec<ChunkSpan> {
        split_text(text, chunk_size, overlap, &default_separators()).unwrap()
    }

    /// Rebuild the original text from chunk ranges, taking only the
    /// not-yet-covered suffix of each chunk.
    fn reconstruct(text: &str, chunks: &[ChunkSpan]) -> String {
        let chars: Vec<char> = text.chars().collect();
        let mut covered = 0usize;
        let mut rebuilt = String::new();
        for chunk in chunks {
            assert!(
                chunk.char_start <= covered,
                "gap before chunk at {}..{} (covered to {})",
                chunk.char_start,
                chunk.char_end,
                covered
            );
            if chunk.char_end > covered {
                rebuilt.extend(&chars[covered..chunk.char_end]);
                covered = chunk.char_end;
            }
        }
        rebuilt
    }

    fn assert_invariants(text: &str, chunks: &[ChunkSpan], overlap: usize) {
        for chunk in chunks {
            assert_eq!(chunk.char_count(), chunk.char_end - chunk.char_start);
            assert_eq!(chunk.text.chars().count(), chunk.char_count());
            // Chunk text is the literal slice of the original.
            let expected: String = text
                .chars()
                .skip(chunk.char_start)
                .take(chunk.char_count())
                .collect();
            assert_eq!(chunk.text, expected);
        }
        for pair in chunks.windows(2) {
            assert!(pair[0].char_start <= pair[1].char_start, "starts must not decrease");
            if pair[0].char_end > pair[1].char_start {
                assert!(
                    pair[0].char_end - pair[1].char_start <= overlap,
                    "overlap {} exceeds configured {}",
                    pair[0].char_end - pair[1].char_start,
                    overlap
                );
            }
        }
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunks = split("short text", 100, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "short text");
        assert_eq!((chunks[0].char_start, chunks[0].char_end), (0, 10));
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(split("", 100, 10).is_empty());
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let err = split_text("abc", 0, 0, &default_separators()).unwrap_err();
        assert_eq!(err, ChunkerError::ZeroChunkSize);
    }

    #[test]
    fn test_splits_on_paragraphs_at_exact_boundaries() {
        let text = "Paragraph one.\n\nParagraph two is longer.\n\nParagraph three.";
        let chunks = split(text, 30, 0);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "Paragraph one.\n\n");
        assert_eq!(chunks[1].text, "Paragraph two is longer.\n\n");
        assert_eq!(chunks[2].text, "Paragraph three.");
        assert_eq!(chunks[0].char_end, chunks[1].char_start);
        assert_eq!(chunks[1].char_end, chunks[2].char_start);
        assert_invariants(text, &chunks, 0);
    }

    #[test]
    fn test_single_paragraph_break_falls_through_to_lines() {
        // "\n\n" occurs once, not more than once, so line breaks win.
        let text = "alpha line\nbeta line\n\ngamma line\ndelta line";
        let chunks = split(text, 24, 0);

        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(text, &chunks), text);
        for chunk in &chunks {
            assert!(chunk.char_count() <= 24, "chunk too large: {:?}", chunk);
        }
    }

    #[test]
    fn test_overlap_tail_carries_into_next_chunk() {
        // Sentences of 12 chars each; chunk size fits two of them.
        let text = "aaaa bbbb. cccc dddd. eeee ffff. gggg hhhh. iiii jjjj.";
        let chunks = split(text, 24, 8);

        assert!(chunks.len() >= 2);
        assert_eq!(reconstruct(text, &chunks), text);
        assert_invariants(text, &chunks, 8);
        // Every chunk after the first starts at or before the previous end.
        for pair in chunks.windows(2) {
            assert!(pair[1].char_start <= pair[0].char_end);
        }
    }

    #[test]
    fn test_overlap_tail_does_not_start_mid_word() {
        // Words of four letters split on spaces; an untrimmed tail of 6 would
        // open every chunk in the middle of a word.
        let text = "aaaa bbbb cccc dddd eeee ffff gggg hhhh";
        let chunks = split(text, 12, 6);

        assert!(chunks.len() >= 3);
        assert_eq!(reconstruct(text, &chunks), text);
        assert_invariants(text, &chunks, 6);
        let chars: Vec<char> = text.chars().collect();
        for chunk in &chunks[1..] {
            assert_eq!(
                chars[chunk.char_start - 1],
                ' ',
                "chunk at {} starts mid-word",
                chunk.char_start
            );
        }
    }

    #[test]
    fn test_oversized_part_descends_to_finer_separators() {
        // Two paragraphs; the second is far larger than the chunk size and
        // must be split by sentences, with offsets still in the original.
        let big = "Sentence aa. Sentence bb. Sentence cc. Sentence dd. Sentence ee. Sentence ff.";
        let text = format!("Intro.\n\nMiddle.\n\n{big}");
        let chunks = split(&text, 30, 0);

        assert!(chunks.len() > 2);
        assert_eq!(reconstruct(&text, &chunks), text);
        assert_invariants(&text, &chunks, 0);
        // The descent keeps absolute offsets: every chunk of the big part
        // starts at or after its absolute start position.
        let big_start = text.chars().count() - big.chars().count();
        let inside: Vec<_> = chunks.iter().filter(|c| c.char_start >= big_start).collect();
        assert!(inside.len() >= 2);
    }

    #[test]
    fn test_character_fallback_on_unbroken_text() {
        let text = "x".repeat(100);
        let chunks = split(&text, 30, 10);

        // Windows of 30 advancing by 20: 0..30, 20..50, 40..70, 60..90, 80..100.
        assert_eq!(chunks.len(), 5);
        assert_eq!((chunks[0].char_start, chunks[0].char_end), (0, 30));
        assert_eq!((chunks[1].char_start, chunks[1].char_end), (20, 50));
        assert_eq!((chunks[4].char_start, chunks[4].char_end), (80, 100));
        assert_eq!(reconstruct(&text, &chunks), text);
        assert_invariants(&text, &chunks, 10);
    }

    #[test]
    fn test_character_fallback_short_final_window_covers_the_tail() {
        // Windows of 30 step 20 over 87 chars: 0..30, 20..50, 40..70, then
        // the window at 60 is clamped to 60..87 and ends the walk. The short
        // final window still reaches the last character.
        let text = "y".repeat(87);
        let chunks = split(&text, 30, 10);
        assert_eq!(chunks.last().map(|c| (c.char_start, c.char_end)), Some((60, 87)));
        assert_eq!(reconstruct(&text, &chunks), text);
    }

    #[test]
    fn test_overlap_not_smaller_than_chunk_size_forces_full_step() {
        // The documented degenerate case: step is forced to the chunk size,
        // so windows touch without overlapping.
        let text = "z".repeat(100);
        let chunks = split(&text, 25, 25);

        assert_eq!(chunks.len(), 4);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].char_end, pair[1].char_start);
        }
        assert_invariants(&text, &chunks, 25);
    }

    #[test]
    fn test_forced_step_discards_trailing_window_shorter_than_overlap() {
        // Degenerate parameters, unreachable from a validated configuration:
        // the 10-char remainder after four full windows is below the overlap
        // and is dropped rather than emitted as a fragment.
        let text = "w".repeat(110);
        let chunks = split(&text, 25, 25);

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.last().map(|c| (c.char_start, c.char_end)), Some((75, 100)));
    }

    #[test]
    fn test_hard_truncate_without_finer_separators() {
        // A custom separator list with no character-level entry cannot make
        // progress on unbroken text; the splitter truncates instead of looping.
        let text = "q".repeat(50);
        let seps = vec!["\n\n".to_string()];
        let chunks = split_text(&text, 20, 0, &seps).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].char_start, chunks[0].char_end), (0, 20));
    }

    #[test]
    fn test_offsets_count_characters_not_bytes() {
        // Multi-byte characters: 'é' is two bytes, '日' is three.
        let text = "héllo wörld.\n\nsecond paré.\n\n日本語のテキスト、もっと長い文です。";
        let total_chars = text.chars().count();
        let chunks = split(text, 16, 4);

        assert_eq!(reconstruct(text, &chunks), text);
        assert_invariants(text, &chunks, 4);
        assert_eq!(chunks.last().unwrap().char_end, total_chars);
    }

    #[test]
    fn test_deterministic_output() {
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota kappa lambda.";
        let a = split(text, 25, 6);
        let b = split(text, 25, 6);
        assert_eq!(a, b);
    }

    // ------------------------------------------------------------------
    // Adaptive sizing
    // ------------------------------------------------------------------

    #[test]
    fn test_small_files_keep_their_size_and_skip_chunking() {
        let config = ChunkerConfig::default();
        assert_eq!(calculate_chunk_size(0, &config), 0);
        assert_eq!(calculate_chunk_size(999, &config), 999);
        assert_eq!(calculate_chunk_size(1000, &config), 1000);

        let text = "a".repeat(config.min_chunk_size);
        assert!(chunk_file(&text, &config).unwrap().is_empty());
    }

    #[test]
    fn test_chunk_size_clamps_to_bounds() {
        let config = ChunkerConfig::default();
        // 1001 chars / 50 target = 21, clamped up to the minimum.
        assert_eq!(calculate_chunk_size(1001, &config), 1000);
        // 100k / 50 = 2000, inside the bounds.
        assert_eq!(calculate_chunk_size(100_000, &config), 2000);
        // 1M / 50 = 20000, clamped down to the maximum.
        assert_eq!(calculate_chunk_size(1_000_000, &config), 10_000);
    }

    #[test]
    fn test_million_char_file_stays_near_hundred_chunks() {
        let config = ChunkerConfig::default();
        let sentence = "The quick brown fox jumps over the lazy dog near the river bank. ";
        let mut text = sentence.repeat(1_000_000 / sentence.len() + 1);
        text.truncate(1_000_000);
        assert_eq!(text.chars().count(), 1_000_000);

        let chunks = chunk_file(&text, &config).unwrap();
        // ceil(1_000_000 / 10_000) = 100, plus slack for overlap and
        // boundary effects. Never thousands.
        assert!(chunks.len() >= 95, "too few chunks: {}", chunks.len());
        assert!(chunks.len() <= 115, "too many chunks: {}", chunks.len());
        assert_eq!(reconstruct(&text, &chunks), text);
        assert_invariants(&text, &chunks, config.overlap);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn separators() -> Vec<String> {
        foundry_core::config::default_separators()
    }

    proptest! {
        #[test]
        fn prop_reconstruction_is_lossless(
            text in "[a-z ,.\n]{0,1500}",
            chunk_size in 8usize..80,
            overlap in 0usize..8,
        ) {
            let chunks = split_text(&text, chunk_size, overlap, &separators()).unwrap();

            let mut covered = 0usize;
            let chars: Vec<char> = text.chars().collect();
            let mut rebuilt = String::new();
            for chunk in &chunks {
                prop_assert!(chunk.char_start <= covered);
                if chunk.char_end > covered {
                    rebuilt.extend(&chars[covered..chunk.char_end]);
                    covered = chunk.char_end;
                }
            }
            prop_assert_eq!(rebuilt, text);
        }

        #[test]
        fn prop_counts_and_overlap_bounds_hold(
            text in "[a-z ,.\n]{0,1500}",
            chunk_size in 8usize..80,
            overlap in 0usize..8,
        ) {
            let chunks = split_text(&text, chunk_size, overlap, &separators()).unwrap();

            for chunk in &chunks {
                prop_assert_eq!(chunk.char_count(), chunk.char_end - chunk.char_start);
                prop_assert_eq!(chunk.text.chars().count(), chunk.char_count());
            }
            for pair in chunks.windows(2) {
                prop_assert!(pair[0].char_start <= pair[1].char_start);
                if pair[0].char_end > pair[1].char_start {
                    prop_assert!(pair[0].char_end - pair[1].char_start <= overlap);
                }
            }
        }
    }
}
