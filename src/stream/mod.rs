//! Inbound event stream decoding.
//!
//! The stream layer is split into:
//! - `frame`: blank-line delimited frame splitting over byte chunks
//! - `event`: frame payload to typed [`StreamEvent`] mapping
//!
//! [`EventReader`] ties both to a [`ChunkSource`], the seam between the HTTP
//! body and the decoding pipeline.

mod event;
mod frame;

pub use event::{parse_frame, StreamEvent};
pub use frame::FrameDecoder;

use crate::error::ApiError;
use async_trait::async_trait;
use std::collections::VecDeque;

/// Source of raw response body chunks.
///
/// Production code reads from a [`reqwest::Response`]; tests feed scripted
/// chunks without a network.
#[async_trait]
pub trait ChunkSource: Send {
    /// Next body chunk, or `None` once the body is exhausted.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ApiError>;
}

#[async_trait]
impl ChunkSource for reqwest::Response {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ApiError> {
        Ok(self.chunk().await?.map(|bytes| bytes.to_vec()))
    }
}

#[async_trait]
impl ChunkSource for Box<dyn ChunkSource> {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ApiError> {
        (**self).next_chunk().await
    }
}

/// Lazy, ordered reader of typed events over a chunk source.
pub struct EventReader<S> {
    source: S,
    decoder: FrameDecoder,
    ready: VecDeque<String>,
    exhausted: bool,
}

impl<S: ChunkSource> EventReader<S> {
    /// Wrap a chunk source.
    pub fn new(source: S) -> Self {
        Self {
            source,
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Next complete frame, or `None` at end of body.
    ///
    /// A trailing frame without its blank-line terminator is discarded.
    pub async fn next_frame(&mut self) -> Result<Option<String>, ApiError> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Some(frame));
            }
            if self.exhausted {
                return Ok(None);
            }
            match self.source.next_chunk().await? {
                Some(chunk) => self.ready.extend(self.decoder.push(&chunk)),
                None => {
                    self.exhausted = true;
                    let dropped = self.decoder.discard_partial();
                    if dropped > 0 {
                        tracing::debug!(bytes = dropped, "discarding incomplete trailing frame");
                    }
                }
            }
        }
    }

    /// Next typed event, skipping frames that do not parse.
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>, ApiError> {
        while let Some(frame) = self.next_frame().await? {
            if let Some(event) = parse_frame(&frame) {
                tracing::debug!(kind = event.kind(), "stream event");
                return Ok(Some(event));
            }
        }
        Ok(None)
    }
}
