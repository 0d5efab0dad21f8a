//! Streaming transport seam.
//!
//! A transport turns a `StreamRequest` into an ordered stream of raw byte
//! chunks. Dropping the stream aborts the underlying request.

use std::future::Future;

use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::error::TransportError;
use crate::request::StreamRequest;

/// Boxed stream of raw chunks.
pub type ChunkStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Opens cancellable streaming channels to a generation backend.
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the response body as a chunk stream.
    fn open(
        &self,
        request: &StreamRequest,
    ) -> impl Future<Output = Result<ChunkStream, TransportError>> + Send;
}
