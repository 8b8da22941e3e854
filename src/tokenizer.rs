//! WordPiece tokenization against a line-oriented vocabulary.
//!
//! The vocabulary is supplied externally as one token per line, with the
//! token id equal to the line number. Note text repeats vocabulary heavily,
//! so per-word segmentations are cached in a bounded least-recently-used
//! cache that is safe to share across parallel chunk tokenization.

use std::{collections::HashMap, path::Path, sync::Arc};

use parking_lot::Mutex;

use crate::error::{Error, Result};

pub const PAD_TOKEN: &str = "[PAD]";
pub const UNK_TOKEN: &str = "[UNK]";
pub const CLS_TOKEN: &str = "[CLS]";
pub const SEP_TOKEN: &str = "[SEP]";

/// Continuation marker for non-initial subword pieces.
const CONTINUATION: &str = "##";

/// Bounded size of the per-word segmentation cache.
const WORD_CACHE_CAPACITY: usize = 4096;

/// A token vocabulary where each token's id is its line number.
#[derive(Debug)]
pub struct Vocabulary {
    ids: HashMap<String, i64>,
    pad: i64,
    unk: i64,
    cls: i64,
    sep: i64,
}

impl Vocabulary {
    /// Build a vocabulary from line-oriented content.
    ///
    /// The sentinel tokens [PAD], [UNK], [CLS], and [SEP] must all be
    /// present; a vocabulary without them is rejected.
    pub fn from_lines<I, S>(lines: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ids = HashMap::new();
        for (index, line) in lines.into_iter().enumerate() {
            let token = line.as_ref().trim_end();
            if token.is_empty() {
                continue;
            }
            ids.entry(token.to_string()).or_insert(index as i64);
        }

        let sentinel = |name: &str| {
            ids.get(name).copied().ok_or_else(|| {
                Error::Config(format!(
                    "vocabulary is missing the {name} sentinel token"
                ))
            })
        };

        let pad = sentinel(PAD_TOKEN)?;
        let unk = sentinel(UNK_TOKEN)?;
        let cls = sentinel(CLS_TOKEN)?;
        let sep = sentinel(SEP_TOKEN)?;

        Ok(Self {
            ids,
            pad,
            unk,
            cls,
            sep,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_lines(content.lines())
    }

    pub fn id(&self, token: &str) -> Option<i64> {
        self.ids.get(token).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A fixed-length encoded sequence.
///
/// All three arrays are exactly as long as the `max_len` passed to
/// [`WordPieceTokenizer::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    pub ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub type_ids: Vec<i64>,
}

struct WordCache {
    entries: HashMap<String, (u64, Vec<i64>)>,
    tick: u64,
}

impl WordCache {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            tick: 0,
        }
    }

    fn get(&mut self, word: &str) -> Option<Vec<i64>> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(word).map(|entry| {
            entry.0 = tick;
            entry.1.clone()
        })
    }

    fn put(&mut self, word: String, pieces: Vec<i64>) {
        if self.entries.len() >= WORD_CACHE_CAPACITY {
            self.evict_oldest_half();
        }
        self.tick += 1;
        self.entries.insert(word, (self.tick, pieces));
    }

    fn evict_oldest_half(&mut self) {
        let mut stamps: Vec<u64> =
            self.entries.values().map(|(stamp, _)| *stamp).collect();
        stamps.sort_unstable();
        let cutoff = stamps[stamps.len() / 2];
        self.entries.retain(|_, (stamp, _)| *stamp > cutoff);
    }
}

/// Greedy longest-match WordPiece tokenizer.
pub struct WordPieceTokenizer {
    vocab: Arc<Vocabulary>,
    cache: Mutex<WordCache>,
}

impl WordPieceTokenizer {
    pub fn new(vocab: Arc<Vocabulary>) -> Self {
        Self {
            vocab,
            cache: Mutex::new(WordCache::new()),
        }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Encode text into exactly `max_len` token ids plus attention mask and
    /// type ids.
    ///
    /// The sequence is lower-cased, whitespace-split, segmented per word,
    /// wrapped in [CLS]/[SEP], truncated so at most `max_len - 1` tokens
    /// precede [SEP], and right-padded with [PAD]. The attention mask is 1
    /// for every non-pad position; type ids are all 0 (single segment).
    pub fn encode(&self, text: &str, max_len: usize) -> Encoding {
        let max_len = max_len.max(2);
        let budget = max_len - 1;

        let mut ids = Vec::with_capacity(max_len);
        ids.push(self.vocab.cls);

        let normalized = text.trim().to_lowercase();
        'words: for word in normalized.split_whitespace() {
            for piece in self.word_pieces(word) {
                if ids.len() >= budget {
                    break 'words;
                }
                ids.push(piece);
            }
        }

        ids.push(self.vocab.sep);
        let used = ids.len();
        ids.resize(max_len, self.vocab.pad);

        let attention_mask: Vec<i64> = (0..max_len)
            .map(|i| if i < used { 1 } else { 0 })
            .collect();
        let type_ids = vec![0i64; max_len];

        Encoding {
            ids,
            attention_mask,
            type_ids,
        }
    }

    /// Segment a single word into vocabulary piece ids.
    ///
    /// The first probe is the whole word; on miss, greedy longest-prefix
    /// matching runs left-to-right with `##`-prefixed continuations. A
    /// position with no matching prefix of any length emits [UNK] and
    /// advances one character, so segmentation always makes progress.
    fn word_pieces(&self, word: &str) -> Vec<i64> {
        if word.is_empty() {
            return Vec::new();
        }

        if let Some(pieces) = self.cache.lock().get(word) {
            return pieces;
        }

        let chars: Vec<char> = word.chars().collect();
        let mut pieces = Vec::new();
        let mut pos = 0;

        while pos < chars.len() {
            let mut matched = None;
            let mut end = chars.len();

            while end > pos {
                let mut candidate: String =
                    chars[pos..end].iter().collect();
                if pos > 0 {
                    candidate.insert_str(0, CONTINUATION);
                }
                if let Some(id) = self.vocab.id(&candidate) {
                    matched = Some((id, end));
                    break;
                }
                end -= 1;
            }

            match matched {
                Some((id, end)) => {
                    pieces.push(id);
                    pos = end;
                }
                None => {
                    pieces.push(self.vocab.unk);
                    pos += 1;
                }
            }
        }

        self.cache.lock().put(word.to_string(), pieces.clone());
        pieces
    }
}

impl std::fmt::Debug for WordPieceTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordPieceTokenizer").finish_non_exhaustive()
    }
}
