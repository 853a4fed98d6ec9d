use std::collections::VecDeque;

use crate::{
    error::ConnectionError,
    transport::{Chunk, Transport},
};

/// Replays a fixed sequence of chunks
///
/// Useful for replaying captured transfers and for exercising the download
/// path without a server. An optional error is raised once the scripted
/// chunks are exhausted.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    chunks: VecDeque<Chunk>,
    failure: Option<ConnectionError>,
    requested: Option<String>,
    closed: bool,
}

impl ScriptedTransport {
    pub fn new(chunks: impl IntoIterator<Item = Chunk>) -> Self {
        ScriptedTransport {
            chunks: chunks.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Split `image` into chunks of the given sizes, flagging the last one as
    /// final and declaring `declared_len` on every chunk.
    ///
    /// Sizes that run past the end of the image yield short or empty chunks.
    pub fn from_image(image: &[u8], sizes: &[usize], declared_len: u64) -> Self {
        let mut rest = image;
        let chunks = sizes.iter().enumerate().map(|(i, &size)| {
            let (head, tail) = rest.split_at(size.min(rest.len()));
            rest = tail;
            Chunk::new(head.to_vec(), i == sizes.len() - 1).with_declared_len(declared_len)
        });

        Self::new(chunks.collect::<Vec<_>>())
    }

    /// Raise `err` after the scripted chunks have been delivered.
    pub fn failing_with(mut self, err: ConnectionError) -> Self {
        self.failure = Some(err);
        self
    }

    /// Path passed to the most recent [Transport::request].
    pub fn requested(&self) -> Option<&str> {
        self.requested.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Transport for ScriptedTransport {
    fn request(&mut self, path: &str) -> Result<(), ConnectionError> {
        self.requested = Some(path.to_owned());
        self.closed = false;
        Ok(())
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk>, ConnectionError> {
        if self.requested.is_none() || self.closed {
            return Err(ConnectionError::NotRequested);
        }

        match self.chunks.pop_front() {
            Some(chunk) => Ok(Some(chunk)),
            None => match self.failure.take() {
                Some(err) => Err(err),
                None => Ok(None),
            },
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
