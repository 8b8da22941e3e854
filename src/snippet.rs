/// Default number of lines in a snippet when no match is found.
pub const DEFAULT_SNIPPET_LINES: usize = 3;

/// Maximum number of characters in a snippet before truncation.
pub const DEFAULT_SNIPPET_MAX_CHARS: usize = 300;

/// Extract a snippet around the first occurrence of a query term in `text`.
///
/// The first whitespace-separated query term found in the text (case
/// insensitive) anchors the snippet; without a match the head of the text
/// is returned. Empty text yields `None`.
pub fn extract_snippet(text: &str, query: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }

    let lower = text.to_lowercase();
    let mut anchor = None;
    for term in query.split_whitespace() {
        let term = term.to_lowercase();
        if term.is_empty() {
            continue;
        }
        if let Some(pos) = lower.find(&term) {
            anchor = Some(pos);
            break;
        }
    }

    let snippet = match anchor {
        Some(pos) => {
            let start = floor_char_boundary(
                text,
                pos.saturating_sub(DEFAULT_SNIPPET_MAX_CHARS / 4),
            );
            let end = ceil_char_boundary(
                text,
                (start + DEFAULT_SNIPPET_MAX_CHARS).min(text.len()),
            );
            let mut s = text[start..end].trim().to_string();
            if start > 0 {
                s.insert_str(0, "...");
            }
            if end < text.len() {
                s.push_str("...");
            }
            s
        }
        None => {
            let head: String = text
                .lines()
                .take(DEFAULT_SNIPPET_LINES)
                .collect::<Vec<_>>()
                .join(" ");
            let mut s = head.trim().to_string();
            if s.chars().count() > DEFAULT_SNIPPET_MAX_CHARS {
                s = s.chars().take(DEFAULT_SNIPPET_MAX_CHARS).collect();
                s.push_str("...");
            }
            s
        }
    };

    Some(snippet)
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// Prepend line numbers to each line of text.
///
/// `start_line` is the number to assign to the first line (1-indexed).
pub fn add_line_numbers(text: &str, start_line: usize) -> String {
    text.lines()
        .enumerate()
        .map(|(i, line)| format!("{}: {}", start_line + i, line))
        .collect::<Vec<_>>()
        .join("\n")
}
