//! Sentence segmentation of streaming token text
//!
//! Accumulates token fragments and emits a speakable sentence whenever the
//! buffer ends at a sentence boundary; `flush` releases whatever partial
//! sentence remains when the stream ends.

/// Characters that terminate a speakable sentence: Western terminal
/// punctuation, line breaks, and CJK terminal punctuation.
const SENTENCE_BOUNDARIES: &[char] = &['.', '!', '?', ':', '\n', '。', '！', '？', '；', '：'];

#[derive(Clone, Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one token fragment; returns a completed sentence when the
    /// buffer now ends at a boundary. Emitted sentences are trimmed and
    /// never empty.
    pub fn feed(&mut self, fragment: &str) -> Option<String> {
        self.buffer.push_str(fragment);
        if self.ends_at_boundary() {
            self.take()
        } else {
            None
        }
    }

    /// Emit any residual partial sentence at stream end.
    pub fn flush(&mut self) -> Option<String> {
        self.take()
    }

    /// Discard buffered residue. Called on session start and cancellation
    /// so an aborted generation never leaks into the next session.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn ends_at_boundary(&self) -> bool {
        for c in self.buffer.chars().rev() {
            if SENTENCE_BOUNDARIES.contains(&c) {
                return true;
            }
            if c.is_whitespace() {
                continue;
            }
            return false;
        }
        false
    }

    fn take(&mut self) -> Option<String> {
        let sentence = self.buffer.trim().to_string();
        self.buffer.clear();
        if sentence.is_empty() {
            None
        } else {
            Some(sentence)
        }
    }
}
