//! Streaming text composition engine for the draftflow writing assistant.
//!
//! Raw chunks flow through [`decode::ChunkDecoder`] and
//! [`marker::MarkerExtractor`] into a [`session::StreamSession`], which owns
//! the accumulated document text and its cancellation handle.
//! [`splice::SpliceEditor`] reuses the same pipeline to expand a selection in
//! place.

pub mod backend;
pub mod config;
pub mod decode;
pub mod error;
pub mod marker;
pub mod request;
pub mod session;
pub mod splice;
pub mod telemetry;
pub mod transport;

pub use backend::HttpBackend;
pub use config::Config;
pub use error::{DecodeError, PreconditionError, StreamError, TransportError, TransportErrorKind};
pub use session::{CancelHandle, SessionOutcome, SessionSnapshot, SessionState, StreamSession};
pub use splice::{SpliceEditor, SpliceOutcome, SpliceSettings};
pub use transport::{ChunkStream, Transport};
