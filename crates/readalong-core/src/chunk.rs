//! Turning a clicked word into the next span of speakable text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::index::{DocumentIndex, Word};
use crate::synth::MAX_SYNTHESIS_CHARS;
use crate::text::ends_sentence;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("no speakable word at or after index {index} (document has {total} words)")]
    OutOfRange { index: usize, total: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Target number of speakable words per chunk.
    pub chunk_size: usize,
    /// Extra speakable words allowed past `chunk_size` to reach a sentence
    /// or paragraph boundary.
    pub lookahead: usize,
    /// Hard cap on chunk text length in bytes. Never above what synthesis
    /// accepts.
    pub max_chars: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            lookahead: 15,
            max_chars: 10_000,
        }
    }
}

/// A contiguous span of global indices and the text to speak for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Global index the chunk was resolved from.
    pub start_index: usize,
    /// One past the last spoken word; the next chunk resolves from here.
    pub end_index: usize,
    pub text: String,
    /// Global index of the first spoken word. Differs from `start_index`
    /// when the click landed on filtered words.
    pub first_spoken: usize,
    pub spoken_words: usize,
    /// Filtered words skipped inside `start_index..end_index`.
    pub filtered_skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkResolver {
    config: ChunkConfig,
}

impl ChunkResolver {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Build the chunk that starts at `start_index`.
    ///
    /// With `filtering` on, words flagged as boilerplate are skipped; off,
    /// every word is spoken. Never drops a speakable word between
    /// `start_index` and the returned `end_index`.
    pub fn resolve_chunk(
        &self,
        document: &DocumentIndex,
        start_index: usize,
        filtering: bool,
    ) -> Result<Chunk, ChunkError> {
        let total = document.total_word_count();
        let out_of_range = ChunkError::OutOfRange {
            index: start_index,
            total,
        };
        let words = document.words().get(start_index..).ok_or(out_of_range.clone())?;
        let speakable = |w: &Word| !(filtering && w.is_filtered);
        let target = self.config.chunk_size.max(1);

        let mut spoken: Vec<&Word> = Vec::new();
        let mut chars = 0usize;
        let mut cursor = 0usize;
        let mut full = false;

        while cursor < words.len() {
            let word = &words[cursor];
            if speakable(word) {
                if !self.fits(chars, &spoken, word) {
                    full = true;
                    break;
                }
                chars += word.text.len() + usize::from(!spoken.is_empty());
                spoken.push(word);
                if spoken.len() == target {
                    cursor += 1;
                    full = true;
                    break;
                }
            }
            cursor += 1;
        }

        let Some(&last) = spoken.last() else {
            return Err(out_of_range);
        };

        // Stretch to the nearest boundary if one is close.
        if full && !is_boundary(last) {
            let mut extra: Vec<&Word> = Vec::new();
            let mut extra_chars = chars;
            let mut scan = cursor;
            while scan < words.len() && extra.len() < self.config.lookahead {
                let word = &words[scan];
                scan += 1;
                if !speakable(word) {
                    continue;
                }
                extra_chars += word.text.len() + 1;
                if extra_chars > self.char_cap() {
                    break;
                }
                extra.push(word);
                if is_boundary(word) {
                    spoken.extend(extra.drain(..));
                    break;
                }
            }
        }

        let first_spoken = spoken[0].global_index;
        let end_index = spoken[spoken.len() - 1].global_index + 1;
        let filtered_skipped = document.words()[start_index..end_index]
            .iter()
            .filter(|w| !speakable(w))
            .count();
        let mut text = spoken
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        // Only a lone oversize token can get here.
        if text.len() > self.char_cap() {
            tracing::warn!(
                global_index = first_spoken,
                bytes = text.len(),
                "oversize token cut to the synthesis limit"
            );
            truncate_to_boundary(&mut text, self.char_cap());
        }

        tracing::debug!(
            start_index,
            end_index,
            spoken = spoken.len(),
            filtered_skipped,
            "resolved chunk"
        );

        Ok(Chunk {
            start_index,
            end_index,
            text,
            first_spoken,
            spoken_words: spoken.len(),
            filtered_skipped,
        })
    }

    fn fits(&self, chars: usize, spoken: &[&Word], next: &Word) -> bool {
        // Always take the first word; an oversize one is cut afterwards so
        // the reader still moves past it.
        spoken.is_empty() || chars + 1 + next.text.len() <= self.char_cap()
    }

    fn char_cap(&self) -> usize {
        self.config.max_chars.clamp(1, MAX_SYNTHESIS_CHARS)
    }
}

fn truncate_to_boundary(text: &mut String, max_bytes: usize) {
    let mut cut = max_bytes.min(text.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

fn is_boundary(word: &Word) -> bool {
    word.paragraph_end || ends_sentence(&word.text)
}

/// Resolve a chunk with the default configuration.
pub fn resolve_chunk(
    document: &DocumentIndex,
    start_index: usize,
    filtering: bool,
) -> Result<Chunk, ChunkError> {
    ChunkResolver::default().resolve_chunk(document, start_index, filtering)
}
