//! Sentence segmentation and ordered TTS re-assembly.
//!
//! The splitter cuts the token stream at the first sentence-ending
//! character so synthesis can start while the model is still generating.
//! [`OrderedSynthesis`] re-orders the finished jobs: synthesis runs
//! concurrently and completes out of order, but audio must reach the
//! client in the order the sentences were produced.

use std::collections::HashMap;

use crate::audio::AudioPlayable;

/// Characters that end a sentence.
const SENTENCE_ENDINGS: [char; 3] = ['.', '!', '?'];

/// Byte index of the first sentence-ending character, if any.
///
/// A terminator only counts when followed by whitespace or the end of the
/// buffer, so decimal points and dotted amounts ("$5.50") don't split
/// mid-number.
fn find_sentence_end(text: &str) -> Option<usize> {
    for (i, c) in text.char_indices() {
        if SENTENCE_ENDINGS.contains(&c) {
            let rest = &text[i + c.len_utf8()..];
            if rest.is_empty() || rest.starts_with([' ', '\n']) {
                return Some(i);
            }
        }
    }
    None
}

/// Incremental sentence splitter over a token stream.
///
/// Indices start at zero and strictly increase for the lifetime of a turn;
/// whitespace-only fragments between terminators are dropped without
/// consuming an index.
#[derive(Debug, Default)]
pub(crate) struct SentenceSplitter {
    buffer: String,
    next_index: usize,
}

impl SentenceSplitter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a streamed fragment; returns the complete sentences it closed.
    pub(crate) fn push(&mut self, fragment: &str) -> Vec<(usize, String)> {
        self.buffer.push_str(fragment);
        let mut sentences = Vec::new();
        while let Some(pos) = find_sentence_end(&self.buffer) {
            // Sentence terminators are ASCII, so pos + 1 is a char boundary.
            let rest = self.buffer.split_off(pos + 1);
            let sentence = std::mem::replace(&mut self.buffer, rest);
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push((self.next_index, sentence.to_owned()));
                self.next_index += 1;
            }
        }
        sentences
    }

    /// Flush the trailing partial sentence when generation completes.
    pub(crate) fn flush(&mut self) -> Option<(usize, String)> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;
        Some((index, rest.to_owned()))
    }
}

/// Re-orders concurrently synthesized sentences into emission order.
///
/// A failed synthesis is recorded as `None`; its index is skipped so later
/// sentences still flow (the text already streamed, only the audio drops).
#[derive(Debug, Default)]
pub(crate) struct OrderedSynthesis {
    next_emit: usize,
    ready: HashMap<usize, Option<AudioPlayable>>,
    outstanding: usize,
}

impl OrderedSynthesis {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Note that a synthesis job for the next sentence has been spawned.
    pub(crate) fn job_started(&mut self) {
        self.outstanding += 1;
    }

    /// Number of jobs that have not reported back yet.
    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Record a finished job and return every playable now emittable, in
    /// sentence order.
    pub(crate) fn record(
        &mut self,
        index: usize,
        playable: Option<AudioPlayable>,
    ) -> Vec<AudioPlayable> {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.ready.insert(index, playable);
        let mut emittable = Vec::new();
        while let Some(entry) = self.ready.remove(&self.next_emit) {
            self.next_emit += 1;
            if let Some(playable) = entry {
                emittable.push(playable);
            }
        }
        emittable
    }
}
