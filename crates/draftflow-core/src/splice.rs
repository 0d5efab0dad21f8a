//! Selection-scoped expansion spliced into an existing document.
//!
//! While the expansion streams, the document reads
//! `before + begin_sentinel + generated`. On completion the end sentinel and
//! the untouched tail are appended; on cancel or failure the document is put
//! back exactly as it was.

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::watch;

use crate::error::{PreconditionError, StreamError, TransportError, TransportErrorKind};
use crate::marker::DEFAULT_MAX_MARKER_LEN;
use crate::request::{ExpandRequest, StreamRequest};
use crate::session::{CancelHandle, SessionOutcome, SessionSnapshot, StreamSession};
use crate::transport::Transport;

pub const DEFAULT_BEGIN_SENTINEL: &str = "【扩展内容开始】\n";
pub const DEFAULT_END_SENTINEL: &str = "\n【扩展内容结束】";
pub const MIN_SELECTION_CHARS: usize = 10;

/// Tunables for [`SpliceEditor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpliceSettings {
    pub min_selection_chars: usize,
    pub begin_sentinel: String,
    pub end_sentinel: String,
    /// Characters of surrounding text sent on each side of the selection; 0 sends none.
    pub context_chars: usize,
    pub max_marker_len: usize,
}

impl Default for SpliceSettings {
    fn default() -> Self {
        Self {
            min_selection_chars: MIN_SELECTION_CHARS,
            begin_sentinel: DEFAULT_BEGIN_SENTINEL.to_string(),
            end_sentinel: DEFAULT_END_SENTINEL.to_string(),
            context_chars: 0,
            max_marker_len: DEFAULT_MAX_MARKER_LEN,
        }
    }
}

/// The selected region, captured when the expansion was prepared.
///
/// `start` and `end` count characters, not bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionSpan {
    pub start: usize,
    pub end: usize,
    pub original_text: String,
    byte_start: usize,
    byte_end: usize,
}

impl SelectionSpan {
    /// Validates `start..end` against `document`.
    ///
    /// # Errors
    /// Returns `SelectionOutOfBounds` for reversed or out-of-range offsets and
    /// `SelectionTooShort` for spans under `min_chars` characters.
    pub fn capture(
        document: &str,
        start: usize,
        end: usize,
        min_chars: usize,
    ) -> Result<Self, PreconditionError> {
        let len = document.chars().count();
        if start > end || end > len {
            return Err(PreconditionError::SelectionOutOfBounds { start, end, len });
        }
        if end - start < min_chars {
            return Err(PreconditionError::SelectionTooShort {
                len: end - start,
                min: min_chars,
            });
        }
        let byte_start = byte_offset(document, start);
        let byte_end = byte_offset(document, end);
        Ok(Self {
            start,
            end,
            original_text: document[byte_start..byte_end].to_string(),
            byte_start,
            byte_end,
        })
    }

    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// Byte index of the `chars`-th character; `document.len()` past the end.
fn byte_offset(document: &str, chars: usize) -> usize {
    document
        .char_indices()
        .nth(chars)
        .map_or(document.len(), |(idx, _)| idx)
}

fn tail_chars(text: &str, count: usize) -> &str {
    let skip = text.chars().count().saturating_sub(count);
    &text[byte_offset(text, skip)..]
}

fn head_chars(text: &str, count: usize) -> &str {
    &text[..byte_offset(text, count)]
}

/// How an expansion ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpliceOutcome {
    /// The generated text now sits between the sentinels.
    Completed { inserted: String },
    /// Rolled back after a user cancel.
    Cancelled,
    /// Rolled back after a stream failure.
    Failed { error: StreamError },
}

impl SpliceOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SpliceOutcome::Completed { .. })
    }
}

/// Builds expansions over a document.
#[derive(Debug, Clone, Default)]
pub struct SpliceEditor {
    settings: SpliceSettings,
}

impl SpliceEditor {
    pub fn new(settings: SpliceSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SpliceSettings {
        &self.settings
    }

    /// Validates the selection and prepares an expansion without touching `document`.
    ///
    /// # Errors
    /// Returns a `PreconditionError` if the selection is out of bounds, too
    /// short, or blank.
    pub fn prepare<'a>(
        &self,
        document: &'a mut String,
        start: usize,
        end: usize,
    ) -> Result<Expansion<'a>, PreconditionError> {
        let span = SelectionSpan::capture(document, start, end, self.settings.min_selection_chars)?;

        let context = if self.settings.context_chars == 0 {
            String::new()
        } else {
            let n = self.settings.context_chars;
            format!(
                "{}{}{}",
                tail_chars(&document[..span.byte_start], n),
                span.original_text,
                head_chars(&document[span.byte_end..], n)
            )
        };
        let request = StreamRequest::from(ExpandRequest {
            selected_text: span.original_text.clone(),
            context,
        });
        request.validate()?;

        Ok(Expansion {
            document,
            span,
            request,
            session: StreamSession::new(self.settings.max_marker_len),
            begin_sentinel: self.settings.begin_sentinel.clone(),
            end_sentinel: self.settings.end_sentinel.clone(),
        })
    }
}

/// A prepared expansion holding exclusive access to the document.
#[derive(Debug)]
pub struct Expansion<'a> {
    document: &'a mut String,
    span: SelectionSpan,
    request: StreamRequest,
    session: StreamSession,
    begin_sentinel: String,
    end_sentinel: String,
}

impl Expansion<'_> {
    pub fn span(&self) -> &SelectionSpan {
        &self.span
    }

    pub fn request(&self) -> &StreamRequest {
        &self.request
    }

    /// Handle for cancelling the nested session from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.session.cancel_handle()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.session.subscribe()
    }

    /// Streams the expansion from `transport` into the document.
    ///
    /// `on_update` sees the whole document after every change.
    pub async fn run<T, F>(self, transport: &T, mut on_update: F) -> SpliceOutcome
    where
        T: Transport,
        F: FnMut(&str),
    {
        let Expansion {
            document,
            span,
            request,
            mut session,
            begin_sentinel,
            end_sentinel,
        } = self;
        let mut splice = Splice::open(document, span, &begin_sentinel, end_sentinel, &mut on_update);
        let result = session
            .start(transport, &request, |text| splice.show(text, &mut on_update))
            .await;
        splice.settle(result, &mut on_update)
    }

    /// Same as [`Expansion::run`] over an already-open chunk stream.
    pub async fn run_stream<S, F>(self, chunks: S, mut on_update: F) -> SpliceOutcome
    where
        S: Stream<Item = Result<Bytes, TransportError>>,
        F: FnMut(&str),
    {
        let Expansion {
            document,
            span,
            mut session,
            begin_sentinel,
            end_sentinel,
            ..
        } = self;
        let mut splice = Splice::open(document, span, &begin_sentinel, end_sentinel, &mut on_update);
        let result = session
            .run(chunks, |text| splice.show(text, &mut on_update))
            .await;
        splice.settle(result, &mut on_update)
    }
}

/// Document under edit: `before + begin_sentinel + generated`, with the tail set aside.
///
/// Dropping an unsettled splice (the run future was dropped mid-stream) puts
/// the original selection and tail back.
struct Splice<'a> {
    document: &'a mut String,
    span: SelectionSpan,
    after: String,
    before_len: usize,
    prefix_len: usize,
    end_sentinel: String,
    settled: bool,
}

impl<'a> Splice<'a> {
    fn open<F: FnMut(&str)>(
        document: &'a mut String,
        span: SelectionSpan,
        begin_sentinel: &str,
        end_sentinel: String,
        on_update: &mut F,
    ) -> Self {
        let after = document.split_off(span.byte_end);
        document.truncate(span.byte_start);
        let before_len = document.len();
        document.push_str(begin_sentinel);
        let prefix_len = document.len();
        on_update(document);
        Self {
            document,
            span,
            after,
            before_len,
            prefix_len,
            end_sentinel,
            settled: false,
        }
    }

    /// Appends whatever part of the accumulated `text` is not shown yet.
    fn show<F: FnMut(&str)>(&mut self, text: &str, on_update: &mut F) {
        let shown = self.document.len() - self.prefix_len;
        self.document.push_str(&text[shown..]);
        on_update(self.document.as_str());
    }

    fn rollback(&mut self) {
        restore(
            &mut *self.document,
            self.before_len,
            &self.span.original_text,
            &self.after,
        );
    }

    fn settle<F: FnMut(&str)>(
        mut self,
        result: Result<SessionOutcome, PreconditionError>,
        on_update: &mut F,
    ) -> SpliceOutcome {
        let outcome = match result {
            Ok(SessionOutcome::Completed { text }) => {
                self.document.truncate(self.prefix_len);
                self.document.push_str(&text);
                self.document.push_str(&self.end_sentinel);
                self.document.push_str(&self.after);
                SpliceOutcome::Completed { inserted: text }
            }
            Ok(SessionOutcome::Cancelled { .. }) => {
                self.rollback();
                SpliceOutcome::Cancelled
            }
            Ok(SessionOutcome::Failed { error, .. }) => {
                self.rollback();
                SpliceOutcome::Failed { error }
            }
            // Unreachable in practice: `prepare` validated the request and the session is fresh.
            Err(err) => {
                self.rollback();
                SpliceOutcome::Failed {
                    error: StreamError::Transport(TransportError::new(
                        TransportErrorKind::Body,
                        err.to_string(),
                    )),
                }
            }
        };
        self.settled = true;
        on_update(self.document.as_str());

        let span = &self.span;
        match &outcome {
            SpliceOutcome::Completed { inserted } => tracing::info!(
                start = span.start,
                end = span.end,
                inserted_chars = inserted.chars().count(),
                "expansion spliced"
            ),
            SpliceOutcome::Cancelled => {
                tracing::info!(start = span.start, end = span.end, "expansion cancelled; rolled back");
            }
            SpliceOutcome::Failed { error } => tracing::warn!(
                start = span.start,
                end = span.end,
                error = %error,
                "expansion failed; rolled back"
            ),
        }
        outcome
    }
}

impl Drop for Splice<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.rollback();
            tracing::info!(
                start = self.span.start,
                end = self.span.end,
                "expansion dropped before settling; rolled back"
            );
        }
    }
}

fn restore(document: &mut String, before_len: usize, original: &str, after: &str) {
    document.truncate(before_len);
    document.push_str(original);
    document.push_str(after);
}
