//! Sentence chunking for speech synthesis.
//!
//! Streaming reply text arrives in arbitrary increments. Synthesizing each
//! increment on its own gives choppy prosody, so text is regrouped into
//! sentences before it is spoken.

use futures::StreamExt;
use futures::stream::{self, BoxStream};

/// Chunker configuration
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Once the buffer grows past this many bytes without a sentence end, a
    /// chunk is forced out at the last word boundary that keeps it within the
    /// limit.
    pub max_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self { max_chars: 240 }
    }
}

/// Groups streamed text into speakable sentences.
#[derive(Debug, Default)]
pub struct SentenceChunker {
    config: ChunkerConfig,
    buffer: String,
}

impl SentenceChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
        }
    }

    /// Adds text and returns every sentence it completed.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);

        let mut chunks = Vec::new();
        while let Some(end) = self.boundary() {
            let rest = self.buffer.split_off(end);
            let chunk = std::mem::replace(&mut self.buffer, rest);
            let chunk = chunk.trim();
            if !chunk.is_empty() {
                chunks.push(chunk.to_string());
            }
        }
        chunks
    }

    /// Returns whatever text is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    /// Byte offset just past the first complete chunk in the buffer.
    fn boundary(&self) -> Option<usize> {
        let mut chars = self.buffer.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '\n' {
                return Some(i + 1);
            }
            if matches!(c, '.' | '!' | '?' | '…') {
                // A terminator only ends a sentence once whitespace follows it,
                // so "3.5" and "..." split correctly across increments.
                if let Some(&(j, next)) = chars.peek() {
                    if next.is_whitespace() {
                        return Some(j);
                    }
                }
            }
        }

        if self.buffer.len() > self.config.max_chars {
            let spaces = self
                .buffer
                .char_indices()
                .filter(|(i, c)| c.is_whitespace() && *i > 0)
                .map(|(i, _)| i);
            let mut within = None;
            for i in spaces {
                if i > self.config.max_chars {
                    // A single word longer than the limit goes out whole.
                    return within.or(Some(i));
                }
                within = Some(i);
            }
            return within.or(Some(self.buffer.len()));
        }
        None
    }
}

/// Regroups a stream of text increments into a stream of sentences.
pub fn sentences(text: BoxStream<'static, String>) -> BoxStream<'static, String> {
    let state = (text, SentenceChunker::default(), false);
    stream::unfold(state, |(mut text, mut chunker, done)| async move {
        if done {
            return None;
        }
        loop {
            match text.next().await {
                Some(increment) => {
                    let chunks = chunker.push(&increment);
                    if !chunks.is_empty() {
                        return Some((stream::iter(chunks), (text, chunker, false)));
                    }
                }
                None => {
                    let rest: Vec<String> = chunker.finish().into_iter().collect();
                    return Some((stream::iter(rest), (text, chunker, true)));
                }
            }
        }
    })
    .flatten()
    .boxed()
}
