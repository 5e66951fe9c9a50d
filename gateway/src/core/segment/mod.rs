//! Streaming sentence segmentation
//!
//! Turns an arbitrarily chunked character stream into complete sentences for
//! synthesis. Cuts on hard terminators once the sentence reaches the minimum
//! length, and falls back to soft breaks (or a forced cut) when the buffer
//! would otherwise exceed the maximum length. All lengths count Unicode
//! scalar values, so CJK fullwidth punctuation is first-class.
//!
//! The segmenter is pure: no I/O, no clock, deterministic for a given input
//! regardless of how that input is chunked across `feed` calls.

/// Characters that end a sentence outright.
const HARD_TERMINATORS: [char; 9] = ['.', '!', '?', '。', '！', '？', '；', ';', '\n'];

/// Characters usable as cut points when a sentence grows past `max_len`.
const SOFT_BREAKS: [char; 5] = [',', '，', '、', ':', '：'];

/// Segmenter length bounds, in codepoints.
#[derive(Debug, Clone, Copy)]
pub struct SegmenterConfig {
    /// Minimum sentence length before a terminator may cut
    pub min_len: usize,
    /// Maximum buffered length before a soft/forced cut
    pub max_len: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_len: 5,
            max_len: 40,
        }
    }
}

/// Incremental sentence segmenter over a character stream.
pub struct SentenceSegmenter {
    buf: Vec<char>,
    min_len: usize,
    max_len: usize,
}

impl SentenceSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            buf: Vec::new(),
            min_len: config.min_len.max(1),
            max_len: config.max_len.max(config.min_len.max(1)),
        }
    }

    /// Append a chunk and return any complete sentences, in order.
    ///
    /// Never blocks, never fails.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buf.extend(chunk.chars());
        self.drain()
    }

    /// Return the residual buffer content (even below `min_len`) and clear it.
    ///
    /// Called on end-of-stream.
    pub fn flush(&mut self) -> Option<String> {
        let residual: String = self.buf.drain(..).collect();
        let trimmed = residual.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// Number of codepoints currently buffered.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    fn drain(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        loop {
            // A hard terminator past max_len would have been preceded by an
            // overflow cut had the characters arrived one by one; keeping that
            // order makes the output independent of chunk boundaries.
            match self.find_hard_cut() {
                Some(i) if i <= self.max_len => {
                    self.emit(i + 1, &mut out);
                    continue;
                }
                _ => {}
            }
            if self.buf.len() > self.max_len {
                let cut = self.find_soft_cut().unwrap_or(self.max_len);
                self.emit(cut, &mut out);
                continue;
            }
            break;
        }
        out
    }

    /// First hard terminator whose prefix satisfies `min_len` and is not
    /// suppressed by the acronym/decimal guard.
    fn find_hard_cut(&self) -> Option<usize> {
        for (i, &c) in self.buf.iter().enumerate() {
            if !HARD_TERMINATORS.contains(&c) {
                continue;
            }
            if i + 1 < self.min_len {
                continue;
            }
            if c == '.' && self.dot_guarded(i) {
                continue;
            }
            return Some(i);
        }
        None
    }

    /// Heuristic guard for `.` inside decimals (`3.14`) and abbreviations
    /// (`e.g.`). Decided from the characters available right now; a dot at
    /// the end of the buffer cuts immediately, so a guard split across feed
    /// chunks can false-positive. The next real terminator recovers.
    fn dot_guarded(&self, i: usize) -> bool {
        let digit_before = i > 0 && self.buf[i - 1].is_ascii_digit();
        let digit_after = self.buf.get(i + 1).is_some_and(|c| c.is_ascii_digit());
        if digit_before && digit_after {
            return true;
        }
        for &c in self.buf.iter().skip(i + 1).take(3) {
            if c.is_whitespace() {
                continue;
            }
            return c.is_alphabetic() && c.is_lowercase();
        }
        false
    }

    /// Latest soft break inside the first `max_len + 1` characters whose
    /// prefix satisfies `min_len`. Returns the cut length (break included).
    fn find_soft_cut(&self) -> Option<usize> {
        let window = (self.max_len + 1).min(self.buf.len());
        (0..window)
            .rev()
            .find(|&j| SOFT_BREAKS.contains(&self.buf[j]) && j + 1 >= self.min_len)
            .map(|j| j + 1)
    }

    fn emit(&mut self, cut: usize, out: &mut Vec<String>) {
        let rest = self.buf.split_off(cut);
        let sentence: String = std::mem::replace(&mut self.buf, rest).into_iter().collect();
        let trimmed = sentence.trim_start().trim_end();
        if !trimmed.is_empty() {
            out.push(trimmed.to_string());
        }
    }
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new(SegmenterConfig::default())
    }
}
