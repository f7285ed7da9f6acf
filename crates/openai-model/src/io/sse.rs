use super::Chunks;

#[derive(Debug)]
pub enum Error {
    Chunks(crate::Error),
    InvalidPayload,
}

/// A type for reading server-sent events from a chunk stream.
///
/// Only the `data` field is surfaced. Comments and the `event`, `id`
/// and `retry` fields are skipped, and blocks without data are dropped.
pub struct Sse {
    buf: Vec<u8>,
    chunks: Chunks,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: Vec::new(),
            chunks,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            // A previous chunk may already hold complete events.
            if let Some(event) = self.try_parse_event()? {
                return Ok(Some(event));
            }

            let Some(bytes) =
                self.chunks.next_chunk().await.map_err(Error::Chunks)?
            else {
                return Ok(None);
            };
            // Multi-byte characters may be split across chunks, so the
            // buffer is only decoded once a whole event is available.
            self.buf.extend_from_slice(&bytes);
        }
    }

    fn try_parse_event(&mut self) -> Result<Option<String>, Error> {
        while let Some(end) = self.find_event_end() {
            let block: Vec<u8> = self.buf.drain(..end).collect();
            let Ok(block) = str::from_utf8(&block) else {
                return Err(Error::InvalidPayload);
            };

            let mut data: Option<Vec<&str>> = None;
            for line in block.lines() {
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let Some((field, value)) = line.split_once(':') else {
                    return Err(Error::InvalidPayload);
                };
                let value = value.strip_prefix(' ').unwrap_or(value);
                match field {
                    "data" => data.get_or_insert_default().push(value),
                    "event" | "id" | "retry" => {}
                    _ => return Err(Error::InvalidPayload),
                }
            }
            if let Some(data) = data {
                return Ok(Some(data.join("\n")));
            }
        }
        Ok(None)
    }

    /// Returns the length of the first event block, including the blank
    /// line that terminates it.
    fn find_event_end(&self) -> Option<usize> {
        let mut line_start = 0;
        for (idx, byte) in self.buf.iter().enumerate() {
            if *byte != b'\n' {
                continue;
            }
            let line = &self.buf[line_start..idx];
            if line.is_empty() || line == b"\r" {
                return Some(idx + 1);
            }
            line_start = idx + 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn sse_from(parts: &[&'static [u8]]) -> Sse {
        let chunks =
            Chunks::scripted(parts.iter().copied().map(Bytes::from_static));
        Sse::new(chunks)
    }

    #[tokio::test]
    async fn test_normal_events() {
        let mut sse = sse_from(&[b"data: hello\n\n", b"data: bye\n\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "bye");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_events_in_one_chunk() {
        let mut sse = sse_from(&[b"data: one\n\ndata: two\n\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "one");
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "two");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_quirk_streaming() {
        let mut sse = sse_from(&[b"data:", b" hello\n", b"\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_split_utf8() {
        // "°" is encoded as 0xC2 0xB0.
        let mut sse = sse_from(&[b"data: 21\xC2", b"\xB0C\n\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "21°C");
    }

    #[tokio::test]
    async fn test_comments_and_crlf() {
        let mut sse = sse_from(&[
            b": OPENROUTER PROCESSING\r\n\r\n",
            b"event: chunk\r\ndata: {\"a\":1}\r\n\r\n",
        ]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), r#"{"a":1}"#);
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_data() {
        let mut sse = sse_from(&[b"xxxxxx\n\n"]);
        assert!(matches!(
            sse.next_event().await.unwrap_err(),
            Error::InvalidPayload
        ));

        let mut sse = sse_from(&[b"xxxxxx\n"]);
        assert_eq!(sse.next_event().await.unwrap(), None);

        let mut sse = sse_from(&[b"data: hello\n", b"data: bye\n"]);
        assert_eq!(sse.next_event().await.unwrap(), None);
    }
}
