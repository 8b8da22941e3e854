use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Maximum length of a first-line title before falling back to the file name.
const MAX_TITLE_CHARS: usize = 80;

/// The note flavor, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteKind {
    Markdown,
    Plain,
}

impl NoteKind {
    pub fn from_file_name(file_name: &str) -> Self {
        if file_name.to_lowercase().ends_with(".md") {
            Self::Markdown
        } else {
            Self::Plain
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Plain => "plain",
        }
    }
}

/// A normalized note produced from raw file bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub title: String,
    /// Cleaned body text with markup removed and whitespace collapsed.
    pub body: String,
    pub tags: Vec<String>,
    /// Targets of `[[...]]` wiki links found in the raw text.
    pub links: Vec<String>,
    pub word_count: usize,
    pub kind: NoteKind,
}

static FENCED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`[^`\n]*`").unwrap());
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,6}[ \t]+").unwrap());
static HRULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:-{3,}|\*{3,}|_{3,})[ \t]*$").unwrap()
});
static LIST_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:[-*+]|\d+\.)[ \t]+").unwrap()
});
static BLOCKQUOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:>[ \t]?)+").unwrap());
static IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());
static WIKILINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([^\[\]|]+)(?:\|[^\[\]]*)?\]\]").unwrap()
});
static BOLD_STAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
static BOLD_UNDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__([^_]+)__").unwrap());
static ITALIC_STAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*\n]+)\*").unwrap());
static ITALIC_UNDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)(^|[\s(])_([^_\n]+)_([\s).,;:!?]|$)").unwrap()
});
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)#([A-Za-z_][A-Za-z0-9_-]*)").unwrap()
});

/// Parse raw note bytes into a normalized record.
///
/// Fails with a parse error when the bytes are not valid UTF-8; the caller
/// skips the file and the rest of the scan proceeds.
pub fn parse(raw: &[u8], file_name: &str) -> Result<ParsedDocument> {
    let text = std::str::from_utf8(raw).map_err(|e| Error::Parse {
        path: file_name.to_string(),
        reason: format!("invalid UTF-8: {e}"),
    })?;

    let kind = NoteKind::from_file_name(file_name);
    let title = extract_title(text, file_name);

    let body = match kind {
        NoteKind::Markdown => clean_markdown(text),
        NoteKind::Plain => collapse_whitespace(text),
    };

    let tags = extract_tags(text);
    let links = extract_wiki_links(text);
    let word_count = body.split_whitespace().count();

    Ok(ParsedDocument {
        title,
        body,
        tags,
        links,
        word_count,
        kind,
    })
}

/// Extract a title from note content.
///
/// Looks for the first markdown heading (line starting with `# `), then the
/// first non-blank line if short enough, then the file name without its
/// extension.
fn extract_title(content: &str, file_name: &str) -> String {
    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix("# ") {
            let title = heading.trim();
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }

    for line in content.lines() {
        let cleaned = line.trim().trim_start_matches('#').trim();
        if cleaned.is_empty() {
            continue;
        }
        if cleaned.chars().count() <= MAX_TITLE_CHARS {
            return cleaned.to_string();
        }
        break;
    }

    file_stem(file_name)
}

fn file_stem(file_name: &str) -> String {
    std::path::Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string()
}

/// Strip markup, keeping the meaningful text.
///
/// Each step is a structural substitution; prefixes and wrappers go away,
/// their inner text stays. Images and code are dropped entirely.
fn clean_markdown(text: &str) -> String {
    let text = FENCED_CODE.replace_all(text, " ");
    let text = INLINE_CODE.replace_all(&text, " ");
    let text = HEADING.replace_all(&text, "");
    let text = HRULE.replace_all(&text, " ");
    let text = LIST_PREFIX.replace_all(&text, "");
    let text = BLOCKQUOTE.replace_all(&text, "");
    let text = IMAGE.replace_all(&text, " ");
    let text = LINK.replace_all(&text, "$1");
    let text = WIKILINK.replace_all(&text, "$1");
    let text = BOLD_STAR.replace_all(&text, "$1");
    let text = BOLD_UNDER.replace_all(&text, "$1");
    let text = ITALIC_STAR.replace_all(&text, "$1");
    let text = ITALIC_UNDER.replace_all(&text, "$1$2$3");
    collapse_whitespace(&text)
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

fn extract_tags(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut tags = Vec::new();
    for cap in TAG.captures_iter(text) {
        let tag = cap[1].to_string();
        if seen.insert(tag.clone()) {
            tags.push(tag);
        }
    }
    tags
}

fn extract_wiki_links(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();
    for cap in WIKILINK.captures_iter(text) {
        let target = cap[1].trim().to_string();
        if !target.is_empty() && seen.insert(target.clone()) {
            links.push(target);
        }
    }
    links
}
