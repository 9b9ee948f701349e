//! Continuous change feed consumption.

use crate::error::{CouchError, Result};
use crate::types::{ChangeRow, Seq};
use serde_json::Value;
use std::io::{self, BufRead, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Line-oriented reader over a raw response body.
pub(crate) struct LineReader<R: Read> {
    reader: BufReader<R>,
    buffer: String,
}

impl<R: Read> LineReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buffer: String::new(),
        }
    }

    /// Read the next line without its terminator; `None` at EOF.
    pub(crate) fn next_line(&mut self) -> io::Result<Option<&str>> {
        self.buffer.clear();
        let bytes_read = self.reader.read_line(&mut self.buffer)?;
        if bytes_read == 0 {
            return Ok(None);
        }
        Ok(Some(self.buffer.trim_end_matches(&['\r', '\n'][..])))
    }
}

/// One line of a continuous feed.
#[derive(Debug, PartialEq)]
pub(crate) enum FeedLine {
    /// Empty keep-alive line
    Heartbeat,
    Row(ChangeRow),
    /// Terminal `{"last_seq": ...}` object
    End(Seq),
}

pub(crate) fn parse_line(line: &str) -> Result<FeedLine> {
    if line.trim().is_empty() {
        return Ok(FeedLine::Heartbeat);
    }
    let mut value: Value = serde_json::from_str(line)?;
    if let Some(last_seq) = value.as_object_mut().and_then(|obj| obj.remove("last_seq")) {
        return Ok(FeedLine::End(Seq::new(last_seq)));
    }
    Ok(FeedLine::Row(serde_json::from_value(value)?))
}

/// Stops a [`ChangeStream`] from another place or thread.
#[derive(Clone, Debug)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Request the feed to stop.
    ///
    /// Takes effect once the read in progress returns; a read blocked on
    /// the network is not interrupted.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A continuous change feed, consumed by blocking pulls.
///
/// Call [`has_next`](Self::has_next) to wait for the next row, then
/// [`next_row`](Self::next_row) to take it. The stream ends on the server's
/// `last_seq` line, after [`stop`](Self::stop), or on the first read or
/// decode error. Input that ends before `last_seq` is an
/// `UnexpectedEof` error. Ending drops the underlying connection; after that
/// `has_next` returns `false` immediately.
///
/// The stream is also an `Iterator` over `Result<ChangeRow, CouchError>`.
pub struct ChangeStream {
    lines: Option<LineReader<Box<dyn Read + Send>>>,
    stopped: StopHandle,
    next_row: Option<ChangeRow>,
    last_seq: Option<Seq>,
}

impl std::fmt::Debug for ChangeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStream")
            .field("open", &self.lines.is_some())
            .field("stopped", &self.stopped.is_stopped())
            .field("last_seq", &self.last_seq)
            .finish()
    }
}

impl ChangeStream {
    pub(crate) fn new<R: Read + Send + 'static>(body: R) -> Self {
        let body: Box<dyn Read + Send> = Box::new(body);
        Self {
            lines: Some(LineReader::new(body)),
            stopped: StopHandle(Arc::new(AtomicBool::new(false))),
            next_row: None,
            last_seq: None,
        }
    }

    /// Block until a row is available.
    ///
    /// Returns `Ok(false)` once `last_seq` was read or the feed was stopped.
    /// Heartbeat lines are skipped. On error, including end of input before
    /// `last_seq`, the stream is closed before the error is returned.
    pub fn has_next(&mut self) -> Result<bool> {
        self.next_row = None;
        loop {
            if self.stopped.is_stopped() {
                self.terminate();
                return Ok(false);
            }
            let Some(lines) = self.lines.as_mut() else {
                return Ok(false);
            };

            let read = match lines.next_line() {
                Ok(Some(line)) => Some(parse_line(line)),
                Ok(None) => None,
                Err(e) => Some(Err(CouchError::from(e))),
            };

            match read {
                None => {
                    let e = CouchError::from(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "change feed ended without last_seq",
                    ));
                    tracing::error!(error = %e, "continuous feed truncated");
                    self.terminate();
                    return Err(e);
                }
                Some(Ok(FeedLine::Heartbeat)) => continue,
                Some(Ok(FeedLine::End(seq))) => {
                    tracing::debug!(last_seq = %seq, "continuous feed ended");
                    self.last_seq = Some(seq);
                    self.terminate();
                    return Ok(false);
                }
                Some(Ok(FeedLine::Row(row))) => {
                    if self.stopped.is_stopped() {
                        self.terminate();
                        return Ok(false);
                    }
                    self.next_row = Some(row);
                    return Ok(true);
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "error reading continuous feed");
                    self.terminate();
                    return Err(e);
                }
            }
        }
    }

    /// Take the row found by the last successful [`has_next`](Self::has_next).
    ///
    /// Returns `None` if there is no such row or it was already taken.
    pub fn next_row(&mut self) -> Option<ChangeRow> {
        self.next_row.take()
    }

    /// Request the feed to stop; see [`StopHandle::stop`].
    pub fn stop(&self) {
        self.stopped.stop();
    }

    /// A handle that can stop this feed while it is borrowed elsewhere.
    pub fn stop_handle(&self) -> StopHandle {
        self.stopped.clone()
    }

    /// Whether the underlying connection has been released.
    pub fn is_closed(&self) -> bool {
        self.lines.is_none()
    }

    /// Final sequence token, once the server has sent it.
    pub fn last_seq(&self) -> Option<&Seq> {
        self.last_seq.as_ref()
    }

    // Idempotent: the reader and response are dropped on the first call only.
    fn terminate(&mut self) {
        if self.lines.take().is_some() {
            tracing::info!("continuous feed closed");
        }
    }
}

impl Iterator for ChangeStream {
    type Item = Result<ChangeRow>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => self.next_row.take().map(Ok),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    const FEED: &str = concat!(
        r#"{"seq":"1-a","id":"doc1","changes":[{"rev":"1-x"}]}"#,
        "\n\n\n",
        r#"{"seq":"2-b","id":"doc2","changes":[{"rev":"2-y"}],"deleted":true}"#,
        "\n",
        r#"{"last_seq":"2-b"}"#,
        "\n",
    );

    fn stream(body: &str) -> ChangeStream {
        ChangeStream::new(Cursor::new(body.as_bytes().to_vec()))
    }

    #[test]
    fn test_line_reader_strips_terminators() {
        let mut reader = LineReader::new(Cursor::new("a\r\n\nb"));
        assert_eq!(reader.next_line().unwrap(), Some("a"));
        assert_eq!(reader.next_line().unwrap(), Some(""));
        assert_eq!(reader.next_line().unwrap(), Some("b"));
        assert_eq!(reader.next_line().unwrap(), None);
    }

    #[test]
    fn test_parse_sentinel_with_composite_seq() {
        let line = parse_line(r#"{"last_seq":[12,"g1A"],"pending":0}"#).unwrap();
        assert_eq!(line, FeedLine::End(Seq::new(json!([12, "g1A"]))));
    }

    #[test]
    fn test_parse_blank_is_heartbeat() {
        assert_eq!(parse_line("").unwrap(), FeedLine::Heartbeat);
        assert_eq!(parse_line("   ").unwrap(), FeedLine::Heartbeat);
    }

    #[test]
    fn test_rows_then_sentinel() {
        let mut feed = stream(FEED);

        assert!(feed.has_next().unwrap());
        let row = feed.next_row().unwrap();
        assert_eq!(row.id, "doc1");
        assert_eq!(row.seq, Some(Seq::from("1-a")));

        assert!(feed.has_next().unwrap());
        let row = feed.next_row().unwrap();
        assert_eq!(row.id, "doc2");
        assert!(row.deleted);

        assert!(!feed.has_next().unwrap());
        assert!(feed.is_closed());
        assert_eq!(feed.last_seq(), Some(&Seq::from("2-b")));
        assert!(!feed.has_next().unwrap());
    }

    #[test]
    fn test_next_row_without_has_next() {
        let mut feed = stream(FEED);
        assert!(feed.next_row().is_none());
        assert!(feed.has_next().unwrap());
        assert!(feed.next_row().is_some());
        assert!(feed.next_row().is_none());
    }

    #[test]
    fn test_stop_after_first_row() {
        let mut feed = stream(FEED);
        let mut seen = Vec::new();
        while feed.has_next().unwrap() {
            seen.push(feed.next_row().unwrap().id);
            feed.stop();
        }
        assert_eq!(seen, vec!["doc1"]);
        assert!(feed.is_closed());
        assert!(feed.last_seq().is_none());
        assert!(!feed.has_next().unwrap());
    }

    /// Sets the stop flag while the feed is blocked inside `read`.
    struct StopOnRead {
        inner: Cursor<Vec<u8>>,
        handle: Option<StopHandle>,
    }

    impl Read for StopOnRead {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if let Some(handle) = &self.handle {
                handle.stop();
            }
            self.inner.read(buf)
        }
    }

    #[test]
    fn test_stop_during_blocking_read() {
        let flag = Arc::new(AtomicBool::new(false));
        let body: Box<dyn Read + Send> = Box::new(StopOnRead {
            inner: Cursor::new(FEED.as_bytes().to_vec()),
            handle: Some(StopHandle(flag.clone())),
        });
        let mut feed = ChangeStream {
            lines: Some(LineReader::new(body)),
            stopped: StopHandle(flag),
            next_row: None,
            last_seq: None,
        };
        assert!(!feed.has_next().unwrap());
        assert!(feed.is_closed());
    }

    #[test]
    fn test_end_of_input_without_sentinel() {
        let mut feed = stream("{\"seq\":1,\"id\":\"a\",\"changes\":[]}\n");
        assert!(feed.has_next().unwrap());
        match feed.has_next().unwrap_err() {
            CouchError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected Io, got {other:?}"),
        }
        assert!(feed.is_closed());
        assert!(feed.last_seq().is_none());
        assert!(!feed.has_next().unwrap());
    }

    #[test]
    fn test_malformed_line_closes_stream() {
        let mut feed = stream("{\"seq\":1,\"id\":\"a\"\n{\"seq\":2,\"id\":\"b\"}\n");
        let err = feed.has_next().unwrap_err();
        assert!(matches!(err, CouchError::Json(_)));
        assert!(feed.is_closed());
        assert!(!feed.has_next().unwrap());
    }

    #[test]
    fn test_iterator() {
        let ids: Vec<String> = stream(FEED).map(|row| row.unwrap().id).collect();
        assert_eq!(ids, vec!["doc1", "doc2"]);
    }

    #[test]
    fn test_stop_handle_from_elsewhere() {
        let mut feed = stream(FEED);
        let handle = feed.stop_handle();
        let first = feed.next().unwrap().unwrap();
        assert_eq!(first.id, "doc1");
        handle.stop();
        assert!(feed.next().is_none());
        assert!(feed.is_closed());
    }
}
