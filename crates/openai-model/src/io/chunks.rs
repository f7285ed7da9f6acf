#[cfg(test)]
use std::collections::VecDeque;

use bytes::Bytes;
use reqwest::Response;

use crate::Error;

enum Source {
    Http(Response),
    #[cfg(test)]
    Scripted(VecDeque<Bytes>),
}

/// The body of a streamed completion, read chunk by chunk.
///
/// Once the body is exhausted or failed, no more reads reach the source.
pub struct Chunks {
    source: Source,
    received: usize,
    done: bool,
}

impl Chunks {
    pub fn from_response(response: Response) -> Self {
        Self::new(Source::Http(response))
    }

    /// Replays the given chunks, for tests.
    #[cfg(test)]
    pub fn scripted<I: IntoIterator<Item = Bytes>>(chunks: I) -> Self {
        Self::new(Source::Scripted(chunks.into_iter().collect()))
    }

    fn new(source: Source) -> Self {
        Self {
            source,
            received: 0,
            done: false,
        }
    }

    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        if self.done {
            return Ok(None);
        }
        let chunk = match &mut self.source {
            Source::Http(response) => response.chunk().await.map_err(|err| {
                self.done = true;
                Error::from_reqwest(err)
            })?,
            #[cfg(test)]
            Source::Scripted(queue) => queue.pop_front(),
        };
        match &chunk {
            Some(bytes) => self.received += bytes.len(),
            None => {
                self.done = true;
                trace!(bytes = self.received, "body finished");
            }
        }
        Ok(chunk)
    }
}
