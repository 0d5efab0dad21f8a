//! Inline metadata markers embedded in the generated text stream.
//!
//! The backend may append a token such as `[CONTENT_ID:3f9a2c1b]`, usually on
//! its own line, to the generated text. The extractor removes it (together
//! with one directly preceding newline) while the text is still streaming.
//!
//! Scanning is incremental with bounded lookahead: only a candidate that
//! could still become a marker is held back, and never for more than
//! `max_len` characters. Anything else is passed through untouched.

use serde::{Deserialize, Serialize};

/// Default upper bound for a marker token, brackets included, in characters.
pub const DEFAULT_MAX_MARKER_LEN: usize = 128;

/// Marker name used by the writing backend for the stored-content id.
pub const CONTENT_ID: &str = "CONTENT_ID";

/// A `[NAME:VALUE]` token extracted from the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub name: String,
    pub value: String,
}

/// Output of one extraction step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    /// Text safe to display.
    pub display: String,
    /// Markers completed in this step, in stream order.
    pub markers: Vec<Marker>,
}

#[derive(Debug, PartialEq, Eq)]
enum Scan {
    /// Complete marker spanning `len` bytes of the candidate.
    Marker { marker: Marker, len: usize },
    /// Could still become a marker; wait for more text.
    Partial,
    /// The `[` is plain text.
    NotMarker,
}

/// Streaming marker extractor. One per session.
#[derive(Debug)]
pub struct MarkerExtractor {
    lookahead: String,
    max_len: usize,
}

impl Default for MarkerExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MARKER_LEN)
    }
}

impl MarkerExtractor {
    pub fn new(max_len: usize) -> Self {
        Self {
            lookahead: String::new(),
            // "[A:b]" is the shortest possible marker, plus a held newline.
            max_len: max_len.max(6),
        }
    }

    /// Feeds one decoded fragment.
    pub fn process(&mut self, fragment: &str) -> Extracted {
        let mut buf = std::mem::take(&mut self.lookahead);
        buf.push_str(fragment);

        let mut out = Extracted::default();
        let mut rest = buf.as_str();
        loop {
            let Some(open) = rest.find('[') else {
                self.emit_holding_newline(&mut out.display, rest);
                break;
            };
            let (head, candidate) = rest.split_at(open);
            // A newline held in front of the candidate counts against the budget.
            let budget = self.max_len - usize::from(head.ends_with('\n'));
            match scan_candidate(candidate, budget) {
                Scan::Marker { marker, len } => {
                    out.display
                        .push_str(head.strip_suffix('\n').unwrap_or(head));
                    tracing::debug!(name = %marker.name, "extracted stream marker");
                    out.markers.push(marker);
                    rest = &candidate[len..];
                }
                Scan::Partial => {
                    self.emit_holding_newline(&mut out.display, head);
                    self.lookahead.push_str(candidate);
                    break;
                }
                Scan::NotMarker => {
                    out.display.push_str(head);
                    out.display.push('[');
                    rest = &candidate[1..];
                }
            }
        }
        out
    }

    /// Flushes held-back text verbatim at end of stream.
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.lookahead)
    }

    /// Characters currently held back.
    pub fn lookahead_len(&self) -> usize {
        self.lookahead.chars().count()
    }

    /// Emits `text`, keeping a trailing newline back since it may precede a marker.
    fn emit_holding_newline(&mut self, display: &mut String, text: &str) {
        match text.strip_suffix('\n') {
            Some(head) => {
                display.push_str(head);
                self.lookahead.push('\n');
            }
            None => display.push_str(text),
        }
    }
}

/// Extracts markers from a complete text in one pass.
pub fn extract_all(text: &str, max_len: usize) -> Extracted {
    let mut extractor = MarkerExtractor::new(max_len);
    let mut out = extractor.process(text);
    out.display.push_str(&extractor.finish());
    out
}

/// Classifies text starting at a `[`.
///
/// Grammar: `[` NAME `:` VALUE `]` where NAME is `[A-Z][A-Z0-9_]*` and VALUE
/// is non-empty without brackets or line breaks.
fn scan_candidate(candidate: &str, max_len: usize) -> Scan {
    let mut colon: Option<usize> = None;
    let mut count = 1usize;

    for (idx, ch) in candidate.char_indices().skip(1) {
        count += 1;
        if count > max_len {
            return Scan::NotMarker;
        }
        match colon {
            None => match ch {
                'A'..='Z' => {}
                '0'..='9' | '_' if idx > 1 => {}
                ':' if idx > 1 => colon = Some(idx),
                _ => return Scan::NotMarker,
            },
            Some(colon_idx) => match ch {
                ']' if idx > colon_idx + 1 => {
                    return Scan::Marker {
                        marker: Marker {
                            name: candidate[1..colon_idx].to_string(),
                            value: candidate[colon_idx + 1..idx].to_string(),
                        },
                        len: idx + 1,
                    };
                }
                '[' | ']' | '\n' | '\r' => return Scan::NotMarker,
                _ => {}
            },
        }
    }
    Scan::Partial
}
