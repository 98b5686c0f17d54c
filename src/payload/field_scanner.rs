//! Extracts the base64 characters of one JSON string field from raw body bytes.
//!
//! The scanner never parses the surrounding JSON. It looks for a literal
//! needle (`"<field>":`), skips whitespace up to the opening quote, then
//! emits the value's base64 characters until the closing quote:
//!
//! ```text
//!   Seek ──needle matched──▶ ToQuote ──'"'──▶ Value ──unescaped '"'──▶ Done
//!    ▲                         │
//!    └──── any non-space ──────┘
//! ```
//!
//! Inside the value a backslash escapes the next byte: escaped `n`, `r` and
//! `t` are line-wrapping artifacts and are dropped, escaped `"` and `\` are
//! emitted as-is, anything else escaped is dropped. Unescaped bytes outside
//! the base64 alphabet are dropped too.

/// Scanner position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Matching the needle; `matched` bytes of it seen so far.
    Seek { matched: usize },
    /// Needle matched, waiting for the opening quote.
    ToQuote,
    /// Inside the string value.
    Value { escaped: bool },
    /// Closing quote seen; further input is ignored.
    Done,
}

fn is_base64_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='
}

fn is_json_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

/// One transition of the scanner automaton: next state plus the byte to emit.
fn step(needle: &[u8], state: ScanState, b: u8) -> (ScanState, Option<u8>) {
    match state {
        ScanState::Seek { matched } => {
            let matched = if b == needle[matched] {
                matched + 1
            } else if b == needle[0] {
                1
            } else {
                0
            };
            if matched == needle.len() {
                (ScanState::ToQuote, None)
            } else {
                (ScanState::Seek { matched }, None)
            }
        }
        ScanState::ToQuote if is_json_space(b) => (ScanState::ToQuote, None),
        ScanState::ToQuote if b == b'"' => (ScanState::Value { escaped: false }, None),
        // e.g. `"field": null` -- not the value we want, look for the next occurrence
        ScanState::ToQuote => (ScanState::Seek { matched: 0 }, None),
        ScanState::Value { escaped: true } => {
            let emit = match b {
                b'"' | b'\\' => Some(b),
                _ => None,
            };
            (ScanState::Value { escaped: false }, emit)
        }
        ScanState::Value { escaped: false } => match b {
            b'\\' => (ScanState::Value { escaped: true }, None),
            b'"' => (ScanState::Done, None),
            b if is_base64_char(b) => (ScanState::Value { escaped: false }, Some(b)),
            _ => (ScanState::Value { escaped: false }, None),
        },
        ScanState::Done => (ScanState::Done, None),
    }
}

/// Incremental scanner for a single base64 string field.
#[derive(Debug, Clone)]
pub struct FieldScanner {
    needle: Vec<u8>,
    state: ScanState,
    emitted: u64,
}

impl FieldScanner {
    /// Scanner for `"<field_name>":`.
    pub fn new(field_name: &str) -> Self {
        Self::with_needle(format!("\"{}\":", field_name).into_bytes())
    }

    /// Scanner for an arbitrary literal needle.
    pub fn with_needle(needle: Vec<u8>) -> Self {
        assert!(!needle.is_empty(), "field needle must not be empty");
        Self {
            needle,
            state: ScanState::Seek { matched: 0 },
            emitted: 0,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Feed one byte; returns the base64 character it contributes, if any.
    pub fn push(&mut self, b: u8) -> Option<u8> {
        let (next, emit) = step(&self.needle, self.state, b);
        self.state = next;
        if emit.is_some() {
            self.emitted += 1;
        }
        emit
    }

    /// Feed a slice, appending extracted characters to `out`.
    pub fn scan(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &b in input {
            if self.state == ScanState::Done {
                break;
            }
            if let Some(c) = self.push(b) {
                out.push(c);
            }
        }
    }

    /// True once the needle and the opening quote have been seen.
    pub fn found(&self) -> bool {
        matches!(self.state, ScanState::Value { .. } | ScanState::Done)
    }

    /// True once the closing quote has been seen.
    pub fn is_done(&self) -> bool {
        self.state == ScanState::Done
    }

    /// Characters emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}
