use std::{
    fs::File,
    io::{self, Read},
    path::{Component, Path, PathBuf},
};

use log::debug;

use crate::{
    error::ConnectionError,
    transport::{Chunk, Transport},
};

/// Default number of bytes delivered per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Serves images from a directory on the host
///
/// Each file below the root is an image; its size is advertised as the
/// declared length on every chunk. One chunk of look-ahead is kept so that
/// the last chunk carrying data is the one flagged final.
#[derive(Debug)]
pub struct DirTransport {
    root: PathBuf,
    chunk_size: usize,
    response: Option<Response>,
}

#[derive(Debug)]
struct Response {
    file: File,
    len: u64,
    lookahead: Vec<u8>,
    finished: bool,
}

impl DirTransport {
    pub fn new(root: impl Into<PathBuf>, chunk_size: usize) -> Self {
        DirTransport {
            root: root.into(),
            chunk_size: chunk_size.max(1),
            response: None,
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, ConnectionError> {
        let relative = Path::new(path.trim_start_matches('/'));

        let valid = relative.components().next().is_some()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));

        if valid {
            Ok(self.root.join(relative))
        } else {
            Err(ConnectionError::InvalidPath(path.to_owned()))
        }
    }
}

impl Transport for DirTransport {
    fn request(&mut self, path: &str) -> Result<(), ConnectionError> {
        let full_path = self.resolve(path)?;

        let mut file = File::open(&full_path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => ConnectionError::NotFound(path.to_owned()),
            _ => ConnectionError::from(err),
        })?;
        let len = file.metadata()?.len();

        debug!(
            "Serving '{}' ({}B) in chunks of {}B",
            full_path.display(),
            len,
            self.chunk_size
        );

        let lookahead = read_block(&mut file, self.chunk_size)?;
        self.response = Some(Response {
            file,
            len,
            lookahead,
            finished: false,
        });

        Ok(())
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk>, ConnectionError> {
        let chunk_size = self.chunk_size;
        let response = self
            .response
            .as_mut()
            .ok_or(ConnectionError::NotRequested)?;

        if response.finished {
            return Ok(None);
        }

        let next = read_block(&mut response.file, chunk_size)?;
        let payload = std::mem::replace(&mut response.lookahead, next);
        let is_final = response.lookahead.is_empty();
        response.finished = is_final;

        Ok(Some(Chunk {
            payload,
            is_final,
            declared_len: Some(response.len),
        }))
    }

    fn close(&mut self) {
        self.response = None;
    }
}

/// Read up to `size` bytes, returning fewer only at the end of the file
fn read_block(file: &mut File, size: usize) -> io::Result<Vec<u8>> {
    let mut block = Vec::with_capacity(size);
    file.by_ref().take(size as u64).read_to_end(&mut block)?;

    Ok(block)
}
