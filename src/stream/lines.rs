//! Incremental text-to-line splitter.
//!
//! Text chunks may split lines (and `\r\n` pairs) at arbitrary points; the
//! splitter buffers only the unterminated tail and discards any line that
//! grows past the configured limit.
use memchr::memchr_iter;

pub struct LineSplitter {
    buffer: String,
    read_offset: usize,
    scan_from: usize,
    max_line_bytes: usize,
    discarding: bool,
}

impl LineSplitter {
    #[must_use]
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            scan_from: 0,
            max_line_bytes,
            discarding: false,
        }
    }

    /// Feed raw text and append complete lines (without terminators) to `out`.
    ///
    /// Returns the number of overlong lines dropped while processing `chunk`.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<String>) -> usize {
        let mut dropped = 0;
        self.buffer.push_str(chunk);
        let mut line_start = self.read_offset;
        let bytes = self.buffer.as_bytes();
        let scan_start = self.scan_from;
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            if self.discarding {
                // Tail of a line already counted as dropped.
                self.discarding = false;
            } else {
                let mut line = &self.buffer[line_start..line_end];
                if let Some(stripped) = line.strip_suffix('\r') {
                    line = stripped;
                }
                if line.len() > self.max_line_bytes {
                    dropped += 1;
                } else {
                    out.push(line.to_string());
                }
            }
            line_start = line_end + 1;
        }

        self.read_offset = line_start;
        self.scan_from = self.buffer.len();

        if self.buffer.len() - self.read_offset > self.max_line_bytes {
            if !self.discarding {
                dropped += 1;
                self.discarding = true;
            }
            self.reset();
            return dropped;
        }

        if self.read_offset == self.buffer.len() {
            self.reset();
            return dropped;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.scan_from -= self.read_offset;
            self.read_offset = 0;
        }
        dropped
    }

    /// Flush the unterminated tail at end of input.
    pub fn finish(&mut self) -> Option<String> {
        let tail = if self.discarding {
            None
        } else {
            let line = &self.buffer[self.read_offset..];
            let line = line.strip_suffix('\r').unwrap_or(line);
            (!line.is_empty()).then(|| line.to_string())
        };
        self.reset();
        self.discarding = false;
        tail
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.read_offset = 0;
        self.scan_from = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_all(chunks: &[&str], max: usize) -> (Vec<String>, usize) {
        let mut splitter = LineSplitter::new(max);
        let mut lines = Vec::new();
        let mut dropped = 0;
        for chunk in chunks {
            dropped += splitter.feed_into(chunk, &mut lines);
        }
        lines.extend(splitter.finish());
        (lines, dropped)
    }

    #[test]
    fn test_splits_on_lf_and_crlf() {
        let (lines, dropped) = split_all(&["a\nb\r\n\nc\n"], 64);
        assert_eq!(lines, ["a", "b", "", "c"]);
        assert_eq!(dropped, 0);
    }

    #[test]
    fn test_lines_split_across_chunks() {
        let (lines, _) = split_all(&["data: hel", "lo\r", "\ndata: [DO", "NE]\n"], 64);
        assert_eq!(lines, ["data: hello", "data: [DONE]"]);
    }

    #[test]
    fn test_unterminated_tail_flushed() {
        let (lines, _) = split_all(&["first\nsecond"], 64);
        assert_eq!(lines, ["first", "second"]);
    }

    #[test]
    fn test_overlong_line_dropped_once() {
        let (lines, dropped) = split_all(&["ok\n", "xxxxxxxx", "xxxxxxxx", "xx\nafter\n"], 6);
        assert_eq!(lines, ["ok", "after"]);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_overlong_complete_line_dropped() {
        let (lines, dropped) = split_all(&["0123456789\nshort\n"], 6);
        assert_eq!(lines, ["short"]);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_compaction_keeps_partial_line() {
        let mut splitter = LineSplitter::new(1 << 20);
        let mut lines = Vec::new();
        let filler = "y".repeat(9000);
        splitter.feed_into(&format!("{filler}\npart"), &mut lines);
        splitter.feed_into("ial\n", &mut lines);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "partial");
    }
}
