//! Incremental extractor for bodies shaped `[ {..}, {..}, ... ]`.
//!
//! Only the element currently being read is buffered. Structural bytes are
//! all ASCII, so slicing the incoming `&str` at their offsets stays on char
//! boundaries.

/// One thing the scanner recognized in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayItem {
    /// Raw JSON text of one complete element.
    Element(String),
    /// An element that exceeded the size limit; its text was discarded.
    Oversized,
    /// A byte that cannot appear at this position.
    Unexpected(char),
    /// The closing `]` (or the end of a bare top-level object).
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    BeforeArray,
    BetweenElements,
    InElement,
    AfterArray,
}

pub struct JsonArrayScanner {
    state: ScanState,
    element: String,
    depth: usize,
    in_string: bool,
    escaped: bool,
    // The body was a single object rather than an array.
    bare_object: bool,
    discarding: bool,
    max_element_bytes: usize,
}

impl JsonArrayScanner {
    #[must_use]
    pub fn new(max_element_bytes: usize) -> Self {
        Self {
            state: ScanState::BeforeArray,
            element: String::new(),
            depth: 0,
            in_string: false,
            escaped: false,
            bare_object: false,
            discarding: false,
            max_element_bytes,
        }
    }

    /// Scan `chunk`, appending recognized items to `out`.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<ArrayItem>) {
        let bytes = chunk.as_bytes();
        let mut element_start = (self.state == ScanState::InElement).then_some(0);

        for (i, &b) in bytes.iter().enumerate() {
            match self.state {
                ScanState::BeforeArray => match b {
                    b' ' | b'\n' | b'\r' | b'\t' => {}
                    b'[' => self.state = ScanState::BetweenElements,
                    b'{' => {
                        self.bare_object = true;
                        self.begin_element();
                        element_start = Some(i);
                    }
                    _ => out.push(ArrayItem::Unexpected(char::from(b))),
                },
                ScanState::BetweenElements => match b {
                    b' ' | b'\n' | b'\r' | b'\t' | b',' => {}
                    b']' => {
                        self.state = ScanState::AfterArray;
                        out.push(ArrayItem::End);
                    }
                    b'{' | b'[' => {
                        self.begin_element();
                        element_start = Some(i);
                    }
                    _ => out.push(ArrayItem::Unexpected(char::from(b))),
                },
                ScanState::InElement => {
                    if self.in_string {
                        if self.escaped {
                            self.escaped = false;
                        } else if b == b'\\' {
                            self.escaped = true;
                        } else if b == b'"' {
                            self.in_string = false;
                        }
                        continue;
                    }
                    match b {
                        b'"' => self.in_string = true,
                        b'{' | b'[' => self.depth += 1,
                        b'}' | b']' => {
                            self.depth -= 1;
                            if self.depth == 0 {
                                let start = element_start.take().unwrap_or(0);
                                self.complete_element(&chunk[start..=i], out);
                            }
                        }
                        _ => {}
                    }
                }
                ScanState::AfterArray => {
                    if !b.is_ascii_whitespace() {
                        out.push(ArrayItem::Unexpected(char::from(b)));
                    }
                }
            }
        }

        if let Some(start) = element_start {
            self.buffer_partial(&chunk[start..]);
        }
    }

    /// Whether the closing bracket has been seen.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == ScanState::AfterArray
    }

    /// Whether any opening bracket or brace has been seen.
    #[must_use]
    pub fn has_started(&self) -> bool {
        self.state != ScanState::BeforeArray
    }

    fn begin_element(&mut self) {
        self.state = ScanState::InElement;
        self.depth = 1;
        self.in_string = false;
        self.escaped = false;
        self.discarding = false;
        self.element.clear();
    }

    fn buffer_partial(&mut self, text: &str) {
        if self.discarding {
            return;
        }
        if self.element.len() + text.len() > self.max_element_bytes {
            self.discarding = true;
            self.element = String::new();
            return;
        }
        self.element.push_str(text);
    }

    fn complete_element(&mut self, tail: &str, out: &mut Vec<ArrayItem>) {
        self.buffer_partial(tail);
        if self.discarding {
            out.push(ArrayItem::Oversized);
        } else {
            out.push(ArrayItem::Element(std::mem::take(&mut self.element)));
        }
        self.discarding = false;
        if self.bare_object {
            self.state = ScanState::AfterArray;
            out.push(ArrayItem::End);
        } else {
            self.state = ScanState::BetweenElements;
        }
    }
}
