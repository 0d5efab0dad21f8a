//! One streaming generation request, end to end.
//!
//! A `StreamSession` owns the decode → extract pipeline and the accumulated
//! document text. Its state machine is
//!
//! ```text
//! Idle ──start/run──▶ Streaming ──▶ Completed | Cancelled | Failed
//!   └──────────cancel──────────────────────────▲
//! ```
//!
//! The state lives behind a mutex shared with every `CancelHandle`, so once
//! `cancel()` returns the session is `Cancelled` (or was already terminal).
//! The read loop applies each chunk while holding that lock: a chunk is
//! either fully processed before the cancel, or discarded after it.

use std::collections::BTreeMap;
use std::fmt;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::decode::ChunkDecoder;
use crate::error::{PreconditionError, StreamError, TransportError, TransportErrorKind};
use crate::marker::{CONTENT_ID, DEFAULT_MAX_MARKER_LEN, MarkerExtractor};
use crate::request::StreamRequest;
use crate::transport::Transport;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Streaming,
    Cancelled,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Cancelled | SessionState::Completed | SessionState::Failed
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Idle => "idle",
            SessionState::Streaming => "streaming",
            SessionState::Cancelled => "cancelled",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Opaque session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time view published to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub state: SessionState,
    pub text: String,
    pub markers: BTreeMap<String, String>,
}

/// Terminal result of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed {
        text: String,
    },
    /// Stopped by the user; `partial` is `None` when nothing was produced.
    Cancelled {
        partial: Option<String>,
    },
    /// Transport or decode failure; `partial` is `None` when nothing was produced.
    Failed {
        error: StreamError,
        partial: Option<String>,
    },
}

impl SessionOutcome {
    pub fn state(&self) -> SessionState {
        match self {
            SessionOutcome::Completed { .. } => SessionState::Completed,
            SessionOutcome::Cancelled { .. } => SessionState::Cancelled,
            SessionOutcome::Failed { .. } => SessionState::Failed,
        }
    }

    /// Final or partial text, if any was produced.
    pub fn text(&self) -> Option<&str> {
        match self {
            SessionOutcome::Completed { text } => Some(text),
            SessionOutcome::Cancelled { partial } | SessionOutcome::Failed { partial, .. } => {
                partial.as_deref()
            }
        }
    }
}

#[derive(Debug)]
struct Control {
    state: SessionState,
    cancel_requested: bool,
}

#[derive(Debug)]
struct Shared {
    control: Mutex<Control>,
    token: CancellationToken,
    updates: watch::Sender<SessionSnapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle that cancels a running session from any task.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    id: SessionId,
    shared: Arc<Shared>,
}

impl CancelHandle {
    /// Requests cancellation and returns the resulting state.
    ///
    /// A session that is idle or streaming becomes `Cancelled` before this
    /// returns; a terminal session is left untouched.
    pub fn cancel(&self) -> SessionState {
        let mut control = self.shared.lock();
        match control.state {
            SessionState::Idle | SessionState::Streaming => {
                control.cancel_requested = true;
                control.state = SessionState::Cancelled;
                drop(control);
                self.shared.token.cancel();
                self.shared
                    .updates
                    .send_modify(|snap| snap.state = SessionState::Cancelled);
                tracing::info!(session = %self.id, "session cancelled");
                SessionState::Cancelled
            }
            terminal => terminal,
        }
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.shared.lock().cancel_requested
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }
}

enum Begin {
    Proceed,
    AlreadyCancelled,
}

/// A single streaming generation.
#[derive(Debug)]
pub struct StreamSession {
    id: SessionId,
    shared: Arc<Shared>,
    decoder: ChunkDecoder,
    extractor: MarkerExtractor,
    text: String,
    markers: BTreeMap<String, String>,
    failure: Option<StreamError>,
    started: bool,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MARKER_LEN)
    }
}

impl StreamSession {
    /// Creates an idle session whose marker lookahead is capped at `max_marker_len`.
    pub fn new(max_marker_len: usize) -> Self {
        let id = SessionId::new();
        let (updates, _) = watch::channel(SessionSnapshot {
            id,
            state: SessionState::Idle,
            text: String::new(),
            markers: BTreeMap::new(),
        });
        Self {
            id,
            shared: Arc::new(Shared {
                control: Mutex::new(Control {
                    state: SessionState::Idle,
                    cancel_requested: false,
                }),
                token: CancellationToken::new(),
                updates,
            }),
            decoder: ChunkDecoder::new(),
            extractor: MarkerExtractor::new(max_marker_len),
            text: String::new(),
            markers: BTreeMap::new(),
            failure: None,
            started: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Visible text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn markers(&self) -> &BTreeMap<String, String> {
        &self.markers
    }

    pub fn marker(&self, name: &str) -> Option<&str> {
        self.markers.get(name).map(String::as_str)
    }

    /// The stored-content id announced by the backend, if any.
    pub fn content_id(&self) -> Option<&str> {
        self.marker(CONTENT_ID)
    }

    pub fn failure(&self) -> Option<&StreamError> {
        self.failure.as_ref()
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.shared.lock().cancel_requested
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            id: self.id,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Cancels this session; see [`CancelHandle::cancel`].
    pub fn cancel(&self) -> SessionState {
        self.cancel_handle().cancel()
    }

    /// Subscribes to state and text snapshots.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.updates.subscribe()
    }

    /// Opens `request` on `transport` and runs the read loop to a terminal state.
    ///
    /// `on_text` is called with the accumulated text whenever it grows.
    ///
    /// # Errors
    /// Returns a `PreconditionError` for an empty request or a session that
    /// was already started; the session is not modified in that case.
    pub async fn start<T, F>(
        &mut self,
        transport: &T,
        request: &StreamRequest,
        on_text: F,
    ) -> Result<SessionOutcome, PreconditionError>
    where
        T: Transport,
        F: FnMut(&str),
    {
        request.validate()?;
        if let Begin::AlreadyCancelled = self.begin()? {
            return Ok(self.outcome());
        }
        tracing::info!(session = %self.id, kind = request.kind(), "session started");

        let token = self.shared.token.clone();
        let opened = tokio::select! {
            biased;
            () = token.cancelled() => return Ok(self.outcome()),
            result = transport.open(request) => result,
        };
        match opened {
            Ok(chunks) => Ok(self.read_loop(chunks, on_text).await),
            Err(err) => {
                self.fail(err.into());
                Ok(self.outcome())
            }
        }
    }

    /// Runs the read loop over an already-open chunk stream.
    ///
    /// # Errors
    /// Returns `PreconditionError::SessionNotIdle` if the session was already started.
    pub async fn run<S, F>(
        &mut self,
        chunks: S,
        on_text: F,
    ) -> Result<SessionOutcome, PreconditionError>
    where
        S: Stream<Item = Result<Bytes, TransportError>>,
        F: FnMut(&str),
    {
        if let Begin::AlreadyCancelled = self.begin()? {
            return Ok(self.outcome());
        }
        tracing::info!(session = %self.id, "session started");
        Ok(self.read_loop(chunks, on_text).await)
    }

    fn begin(&mut self) -> Result<Begin, PreconditionError> {
        if self.started {
            return Err(PreconditionError::SessionNotIdle);
        }
        let mut control = self.shared.lock();
        match control.state {
            SessionState::Idle => {
                control.state = SessionState::Streaming;
                drop(control);
                self.started = true;
                self.publish(SessionState::Streaming);
                Ok(Begin::Proceed)
            }
            SessionState::Cancelled => {
                self.started = true;
                Ok(Begin::AlreadyCancelled)
            }
            _ => Err(PreconditionError::SessionNotIdle),
        }
    }

    async fn read_loop<S, F>(&mut self, chunks: S, mut on_text: F) -> SessionOutcome
    where
        S: Stream<Item = Result<Bytes, TransportError>>,
        F: FnMut(&str),
    {
        let mut chunks = pin!(chunks);
        let shared = Arc::clone(&self.shared);

        loop {
            let next = tokio::select! {
                biased;
                () = shared.token.cancelled() => break,
                next = chunks.next() => next,
            };

            let before = self.text.len();
            let state = {
                let mut control = shared.lock();
                if control.state != SessionState::Streaming {
                    break;
                }
                let step = match next {
                    Some(Ok(chunk)) => self.apply_chunk(&chunk),
                    Some(Err(err)) => Err(err.into()),
                    None => self.apply_end().map(|()| SessionState::Completed),
                };
                control.state = match step {
                    Ok(state) => state,
                    Err(err) => {
                        tracing::warn!(session = %self.id, error = %err, "session failed");
                        self.failure = Some(err);
                        SessionState::Failed
                    }
                };
                control.state
            };

            self.publish(state);
            if self.text.len() > before {
                on_text(&self.text);
            }
            if state.is_terminal() {
                break;
            }
        }

        let outcome = self.outcome();
        if outcome.state() == SessionState::Completed {
            tracing::info!(
                session = %self.id,
                chars = self.text.chars().count(),
                markers = self.markers.len(),
                "session completed"
            );
        }
        outcome
    }

    fn apply_chunk(&mut self, chunk: &[u8]) -> Result<SessionState, StreamError> {
        let fragment = self.decoder.decode(chunk)?;
        self.apply_fragment(&fragment);
        Ok(SessionState::Streaming)
    }

    fn apply_end(&mut self) -> Result<(), StreamError> {
        let fragment = self.decoder.finish()?;
        self.apply_fragment(&fragment);
        let tail = self.extractor.finish();
        self.text.push_str(&tail);
        Ok(())
    }

    fn apply_fragment(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        let extracted = self.extractor.process(fragment);
        self.text.push_str(&extracted.display);
        for marker in extracted.markers {
            if let Some(previous) = self.markers.get(&marker.name)
                && previous != &marker.value
            {
                tracing::warn!(
                    session = %self.id,
                    name = %marker.name,
                    previous = %previous,
                    "marker repeated; keeping the latest value"
                );
            }
            self.markers.insert(marker.name, marker.value);
        }
    }

    fn fail(&mut self, err: StreamError) {
        let mut control = self.shared.lock();
        if control.state != SessionState::Streaming {
            return;
        }
        tracing::warn!(session = %self.id, error = %err, "session failed");
        control.state = SessionState::Failed;
        drop(control);
        self.failure = Some(err);
        self.publish(SessionState::Failed);
    }

    fn publish(&self, state: SessionState) {
        self.shared.updates.send_modify(|snap| {
            // A concurrent cancel may already have published a terminal state.
            if !snap.state.is_terminal() {
                snap.state = state;
            }
            if snap.text.len() != self.text.len() {
                snap.text.clone_from(&self.text);
            }
            if snap.markers != self.markers {
                snap.markers.clone_from(&self.markers);
            }
        });
    }

    fn outcome(&self) -> SessionOutcome {
        let partial = (!self.text.is_empty()).then(|| self.text.clone());
        match self.state() {
            SessionState::Completed => SessionOutcome::Completed {
                text: self.text.clone(),
            },
            SessionState::Failed => SessionOutcome::Failed {
                error: self.failure.clone().unwrap_or_else(|| {
                    StreamError::Transport(TransportError::new(
                        TransportErrorKind::Body,
                        "stream failed",
                    ))
                }),
                partial,
            },
            // Idle and Streaming never reach here.
            _ => SessionOutcome::Cancelled { partial },
        }
    }
}
