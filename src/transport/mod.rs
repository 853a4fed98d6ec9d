//! Sources of firmware image chunks
//!
//! A [Transport] delivers an image as a lazy, finite, non-restartable
//! sequence of [Chunk]s. The last chunk of a transfer is flagged
//! [Chunk::is_final]; the declared total length is only authoritative on that
//! chunk.

use std::fmt;

pub use self::{
    dir::{DirTransport, DEFAULT_CHUNK_SIZE},
    scripted::ScriptedTransport,
};
use crate::error::ConnectionError;

mod dir;
mod scripted;

/// One delivery unit of image bytes
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    pub payload: Vec<u8>,
    pub is_final: bool,
    /// Total image length as reported by the server alongside this chunk
    pub declared_len: Option<u64>,
}

impl Chunk {
    pub fn new(payload: Vec<u8>, is_final: bool) -> Self {
        Chunk {
            payload,
            is_final,
            declared_len: None,
        }
    }

    pub fn with_declared_len(mut self, len: u64) -> Self {
        self.declared_len = Some(len);
        self
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("len", &self.payload.len())
            .field("is_final", &self.is_final)
            .field("declared_len", &self.declared_len)
            .finish()
    }
}

/// Operations for pulling an image from a server.
pub trait Transport {
    /// Issue the request for the image at `path`.
    fn request(&mut self, path: &str) -> Result<(), ConnectionError>;

    /// Block until the next chunk is available.
    ///
    /// Returns `Ok(None)` once the underlying stream has ended.
    fn next_chunk(&mut self) -> Result<Option<Chunk>, ConnectionError>;

    /// Tear down the connection. Calling this more than once is allowed.
    fn close(&mut self);

    /// Iterate over the chunks of the current response.
    fn chunks(&mut self) -> Chunks<'_, Self>
    where
        Self: Sized,
    {
        Chunks {
            transport: self,
            done: false,
        }
    }
}

/// Pull iterator over the chunks of a response
///
/// Stops after the final chunk, after the first error, or when the stream
/// ends.
pub struct Chunks<'a, T: Transport> {
    transport: &'a mut T,
    done: bool,
}

impl<T: Transport> Iterator for Chunks<'_, T> {
    type Item = Result<Chunk, ConnectionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let item = self.transport.next_chunk().transpose();
        self.done = match &item {
            Some(Ok(chunk)) => chunk.is_final,
            _ => true,
        };

        item
    }
}
