//! Splitting cleaned note text into overlapping, sentence-aligned segments.
//!
//! Each chunk is the unit of embedding. Windows prefer to end at a sentence
//! boundary when one falls in the back half of the window, and consecutive
//! windows overlap so context carries across chunk boundaries.

/// Default maximum chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Split text into chunks of at most `max_chunk_size` characters.
///
/// If the text fits in a single window it is returned as one chunk. Longer
/// text is cut at the last sentence-terminating period inside the window
/// when that period lies past the window midpoint, and at the hard window
/// boundary otherwise. The next window starts `overlap` characters before
/// the cut. Blank chunks are dropped. Counts are in characters, so
/// multi-byte input is handled correctly.
///
/// # Examples
///
/// ```
/// use notedex::chunker::chunk_text;
///
/// let chunks = chunk_text("Hello, world!", 500, 50);
/// assert_eq!(chunks, vec!["Hello, world!".to_string()]);
/// ```
pub fn chunk_text(
    text: &str,
    max_chunk_size: usize,
    overlap: usize,
) -> Vec<String> {
    let max_chunk_size = max_chunk_size.max(1);
    let char_count = text.chars().count();

    if char_count <= max_chunk_size {
        if text.trim().is_empty() {
            return Vec::new();
        }
        return vec![text.to_string()];
    }

    // Map char index -> byte index for O(1) slicing of multi-byte text.
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < char_count {
        let window_end = (start + max_chunk_size).min(char_count);
        let mut cut = window_end;

        if window_end < char_count {
            let window = &text[char_to_byte[start]..char_to_byte[window_end]];
            if let Some(period_byte) = window.rfind('.') {
                let period_char =
                    start + window[..period_byte].chars().count();
                if period_char > start + max_chunk_size / 2 {
                    cut = period_char + 1;
                }
            }
        }

        let piece = &text[char_to_byte[start]..char_to_byte[cut]];
        if !piece.trim().is_empty() {
            chunks.push(piece.to_string());
        }

        if cut >= char_count {
            break;
        }

        // `start` must strictly advance on every iteration, even when the
        // overlap reaches back past the window start.
        let mut next = cut.saturating_sub(overlap);
        if next <= start {
            next = cut;
        }
        start = next;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_single_chunk() {
        let chunks =
            chunk_text("Hello, world!", DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP);
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn blank_text_yields_nothing() {
        assert!(chunk_text("   \n\t  ", 500, 50).is_empty());
        assert!(chunk_text("", 500, 50).is_empty());
    }

    #[test]
    fn long_text_multiple_chunks() {
        let text = "word ".repeat(300); // 1500 chars
        let chunks = chunk_text(&text, 500, 50);
        assert!(chunks.len() >= 3);
    }

    #[test]
    fn cuts_at_sentence_boundary_past_midpoint() {
        // One period placed at char 400 of a 500-char window.
        let mut text = "a".repeat(399);
        text.push('.');
        text.push_str(&"b".repeat(400));

        let chunks = chunk_text(&text, 500, 50);
        assert!(chunks[0].ends_with('.'));
        assert_eq!(chunks[0].chars().count(), 400);
    }

    #[test]
    fn ignores_sentence_boundary_before_midpoint() {
        // Period at char 100 is before the midpoint of a 500-char window.
        let mut text = "a".repeat(99);
        text.push('.');
        text.push_str(&"b".repeat(700));

        let chunks = chunk_text(&text, 500, 50);
        assert_eq!(chunks[0].chars().count(), 500);
    }

    #[test]
    fn terminates_without_periods() {
        // Pathological input: 10x the window size, no sentence boundaries.
        let text = "a".repeat(5000);
        let chunks = chunk_text(&text, 500, 50);

        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 500 + 50);
        }
        let covered: usize = chunks.iter().map(|c| c.chars().count()).sum();
        assert!(covered >= 5000, "chunks must cover the whole text");
    }

    #[test]
    fn chunks_overlap() {
        let text = "word ".repeat(300);
        let chunks = chunk_text(&text, 500, 50);

        // Each successive chunk repeats the tail of its predecessor.
        for window in chunks.windows(2) {
            let prev_tail: String = window[0]
                .chars()
                .rev()
                .take(50)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            assert!(window[1].starts_with(&prev_tail));
        }
    }

    #[test]
    fn coverage_reconstructs_text() {
        let text = "The quick brown fox. Jumps over the lazy dog. ".repeat(30);
        let chunks = chunk_text(&text, 200, 20);

        // Dropping each chunk's leading overlap and concatenating must give
        // back the original text.
        let mut rebuilt = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 {
                rebuilt.push_str(chunk);
            } else {
                let skip = 20.min(chunk.chars().count());
                let byte_at: usize = chunk
                    .char_indices()
                    .nth(skip)
                    .map(|(b, _)| b)
                    .unwrap_or(chunk.len());
                rebuilt.push_str(&chunk[byte_at..]);
            }
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn handles_multibyte_characters() {
        let text = "café ☕ naïve 日本語 🎉 ".repeat(100);
        let chunks = chunk_text(&text, 100, 20);

        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 120);
        }
    }

    #[test]
    fn zero_overlap_still_advances() {
        let text = "a".repeat(1200);
        let chunks = chunk_text(&text, 500, 0);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn oversized_overlap_still_terminates() {
        let text = "a".repeat(2000);
        let chunks = chunk_text(&text, 100, 500);
        assert!(!chunks.is_empty());
        assert!(chunks.len() <= 40);
    }
}
