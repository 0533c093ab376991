use std::sync::OnceLock;

use regex::Regex;

use curator_core::tokens::TokenCounter;

/// Defaults tuned for feeding the context-assembly budget, not for
/// general-purpose retrieval.
#[derive(Clone, Copy, Debug)]
pub struct ChunkerConfig {
    pub max_tokens: u32,
    pub overlap_tokens: u32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            overlap_tokens: 80,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TextChunk {
    pub index: u32,
    pub text: String,
    pub token_count: u32,
}

/// Split free text into an ordered sequence of token-bounded chunks.
///
/// Paragraphs (blank-line boundaries) are greedily packed under
/// `max_tokens`; a paragraph that alone exceeds the budget is split on
/// sentence boundaries and packed the same way. A single sentence that
/// alone exceeds the budget becomes its own oversized chunk, the one
/// documented budget exception. With `overlap_tokens > 0` each new chunk
/// is seeded with a tail slice of the previous one to preserve local
/// continuity across boundaries.
pub fn chunk(
    text: &str,
    config: &ChunkerConfig,
    counter: &dyn TokenCounter,
    model: &str,
) -> Vec<TextChunk> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let trimmed = normalized.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut builder = ChunkBuilder {
        config,
        counter,
        model,
        chunks: Vec::new(),
        current: String::new(),
        seed_only: false,
    };

    for paragraph in split_paragraphs(trimmed) {
        if counter.count(paragraph, model) <= config.max_tokens {
            builder.push(paragraph, "\n\n");
        } else {
            for sentence in split_sentences(paragraph) {
                builder.push(sentence, " ");
            }
        }
    }
    builder.finish()
}

fn paragraph_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n[ \t]*\n").expect("static regex"))
}

fn sentence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]+(\s+|$)").expect("static regex"))
}

fn split_paragraphs(text: &str) -> Vec<&str> {
    paragraph_re()
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for boundary in sentence_re().find_iter(text) {
        let sentence = text[start..boundary.end()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = boundary.end();
    }
    if start < text.len() {
        let tail = text[start..].trim();
        if !tail.is_empty() {
            sentences.push(tail);
        }
    }
    sentences
}

/// Tail slice of `text` holding at least `overlap_tokens` tokens, found by
/// scanning backward word-by-word from the end. Falls back to the whole
/// text when it is smaller than the target.
fn overlap_tail<'t>(
    text: &'t str,
    overlap_tokens: u32,
    counter: &dyn TokenCounter,
    model: &str,
) -> &'t str {
    if overlap_tokens == 0 {
        return "";
    }
    let mut starts = Vec::new();
    let mut cursor = 0;
    for word in text.split_whitespace() {
        let pos = text[cursor..].find(word).unwrap_or(0) + cursor;
        starts.push(pos);
        cursor = pos + word.len();
    }
    for &start in starts.iter().rev() {
        let tail = &text[start..];
        if counter.count(tail, model) >= overlap_tokens {
            return tail;
        }
    }
    text
}

struct ChunkBuilder<'a> {
    config: &'a ChunkerConfig,
    counter: &'a dyn TokenCounter,
    model: &'a str,
    chunks: Vec<String>,
    current: String,
    /// True while `current` holds nothing but the overlap seed.
    seed_only: bool,
}

impl ChunkBuilder<'_> {
    fn count(&self, text: &str) -> u32 {
        self.counter.count(text, self.model)
    }

    fn push(&mut self, piece: &str, joiner: &str) {
        if !self.current.is_empty() {
            let candidate = format!("{}{joiner}{piece}", self.current);
            if self.count(&candidate) <= self.config.max_tokens {
                self.current = candidate;
                self.seed_only = false;
                return;
            }
            if !self.seed_only {
                self.close();
            }
        }

        if self.current.is_empty() {
            // An oversized atomic sentence lands here and becomes its own
            // chunk over budget.
            self.current = piece.to_string();
            self.seed_only = false;
            return;
        }

        // Seed plus piece overflows: shrink the seed from the front so the
        // tail stays a suffix of the previous chunk.
        let mut seed = std::mem::take(&mut self.current);
        loop {
            let candidate = if seed.is_empty() {
                piece.to_string()
            } else {
                format!("{seed}{joiner}{piece}")
            };
            if seed.is_empty() || self.count(&candidate) <= self.config.max_tokens {
                self.current = candidate;
                self.seed_only = false;
                return;
            }
            seed = match seed.split_once(char::is_whitespace) {
                Some((_, rest)) => rest.trim_start().to_string(),
                None => String::new(),
            };
        }
    }

    fn close(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let finished = std::mem::take(&mut self.current);
        let seed = overlap_tail(
            &finished,
            self.config.overlap_tokens,
            self.counter,
            self.model,
        )
        .to_string();
        self.chunks.push(finished);
        self.seed_only = !seed.is_empty();
        self.current = seed;
    }

    fn finish(mut self) -> Vec<TextChunk> {
        // A trailing seed-only buffer adds no new content.
        if !self.current.is_empty() && !self.seed_only {
            let last = std::mem::take(&mut self.current);
            self.chunks.push(last);
        }
        let counter = self.counter;
        let model = self.model;
        self.chunks
            .into_iter()
            .enumerate()
            .map(|(index, text)| TextChunk {
                index: index as u32,
                token_count: counter.count(&text, model),
                text,
            })
            .collect()
    }
}
