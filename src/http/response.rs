use crate::http::types::{Headers, StatusCode, Version};
use std::fmt;
use std::path::PathBuf;

/// The response payload.
///
/// Exactly one variant is ever set. `Content-Length` and
/// `Transfer-Encoding` are derived from the variant at serialization time
/// and must not be set by handlers.
pub enum Body {
    /// A fully buffered payload.
    Bytes(Vec<u8>),
    /// A file slice streamed from disk without buffering the whole file.
    File {
        path: PathBuf,
        offset: u64,
        length: u64,
    },
    /// A chunk generator, written with chunked transfer framing.
    ///
    /// Each yielded `Vec<u8>` becomes one chunk; an empty vec is skipped
    /// (an empty chunk would terminate the framing early).
    Stream(Box<dyn Iterator<Item = Vec<u8>> + Send>),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(data) => f.debug_tuple("Bytes").field(&data.len()).finish(),
            Self::File {
                path,
                offset,
                length,
            } => f
                .debug_struct("File")
                .field("path", path)
                .field("offset", offset)
                .field("length", length)
                .finish(),
            Self::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

/// An HTTP response under construction.
///
/// Built by handlers and middleware with a fluent interface, consumed
/// exactly once by the connection loop (HTTP/1.1) or the HTTP/2 engine.
///
/// # Examples
/// ```
/// use relay_web::{Response, StatusCode};
///
/// let resp = Response::new(StatusCode::Created)
///     .with_header("content-type", "application/json")
///     .with_body(r#"{"id":7}"#);
/// assert_eq!(resp.status(), StatusCode::Created);
/// ```
///
/// `Connection` and `Keep-Alive` are owned by the connection loop; any
/// handler-set values for them are discarded before serialization.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
}

impl Response {
    #[inline]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::Bytes(Vec::new()),
        }
    }

    /// A `200 OK` plain-text response.
    ///
    /// # Examples
    /// ```
    /// use relay_web::Response;
    ///
    /// let resp = Response::text("world");
    /// assert_eq!(resp.headers().get("content-type"), Some("text/plain"));
    /// ```
    #[inline]
    pub fn text(body: impl Into<Vec<u8>>) -> Self {
        Self::new(StatusCode::Ok)
            .with_header("content-type", "text/plain")
            .with_body(body)
    }

    /// A `200 OK` HTML response.
    #[inline]
    pub fn html(body: impl Into<Vec<u8>>) -> Self {
        Self::new(StatusCode::Ok)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body(body)
    }

    /// A bodyless response carrying only a status code.
    #[inline]
    pub fn status_only(status: StatusCode) -> Self {
        Self::new(status)
    }

    #[inline]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Appends a header, preserving existing values with the same name.
    #[inline]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Sets a buffered body.
    #[inline]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Body::Bytes(body.into());
        self
    }

    /// Sets a file-slice body, streamed from disk at write time.
    #[inline]
    pub fn with_file(mut self, path: impl Into<PathBuf>, offset: u64, length: u64) -> Self {
        self.body = Body::File {
            path: path.into(),
            offset,
            length,
        };
        self
    }

    /// Sets a chunked stream body.
    ///
    /// # Examples
    /// ```
    /// use relay_web::{Response, StatusCode};
    ///
    /// let chunks = vec![b"hello ".to_vec(), b"world".to_vec()];
    /// let resp = Response::new(StatusCode::Ok).with_stream(chunks.into_iter());
    /// ```
    #[inline]
    pub fn with_stream<I>(mut self, chunks: I) -> Self
    where
        I: Iterator<Item = Vec<u8>> + Send + 'static,
    {
        self.body = Body::Stream(Box::new(chunks));
        self
    }

    #[inline(always)]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    #[inline(always)]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    #[inline(always)]
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    #[inline(always)]
    pub const fn body(&self) -> &Body {
        &self.body
    }

    #[inline(always)]
    pub(crate) fn take_body(&mut self) -> Body {
        std::mem::replace(&mut self.body, Body::Bytes(Vec::new()))
    }
}

// Serialization
impl Response {
    /// True when this response is written with chunked framing.
    ///
    /// HTTP/1.0 peers do not understand chunked transfer; their stream
    /// bodies are written raw and delimited by connection close.
    #[inline]
    pub(crate) fn uses_chunked(&self, version: Version) -> bool {
        matches!(self.body, Body::Stream(_)) && version != Version::Http10
    }

    /// Writes the status line and header block, including the automatic
    /// framing headers, into `out`.
    ///
    /// The caller is responsible for writing the body afterwards (and for
    /// suppressing it on HEAD responses).
    pub(crate) fn serialize_head(&self, version: Version, out: &mut Vec<u8>) {
        out.extend_from_slice(self.status.status_line(version));

        for (name, value) in self.headers.iter() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        // 1xx and 204 responses are bodyless by definition and carry no
        // framing headers.
        let bodyless = self.status.as_u16() < 200 || self.status == StatusCode::NoContent;

        match &self.body {
            Body::Bytes(data) => {
                if !bodyless && self.headers.get("content-length").is_none() {
                    write_header(out, "content-length", &data.len().to_string());
                }
            }
            Body::File { length, .. } => {
                if self.headers.get("content-length").is_none() {
                    write_header(out, "content-length", &length.to_string());
                }
            }
            Body::Stream(_) => {
                if self.uses_chunked(version) {
                    write_header(out, "transfer-encoding", "chunked");
                }
            }
        }

        out.extend_from_slice(b"\r\n");
    }

    /// Frames one chunk of a streamed body.
    #[inline]
    pub(crate) fn write_chunk(out: &mut Vec<u8>, chunk: &[u8]) {
        out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }

    /// The zero-size terminating chunk.
    #[inline(always)]
    pub(crate) const fn chunk_terminator() -> &'static [u8] {
        b"0\r\n\r\n"
    }
}

#[inline(always)]
fn write_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(resp: &Response, version: Version) -> String {
        let mut out = Vec::new();
        resp.serialize_head(version, &mut out);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn buffered_body_gets_content_length() {
        let resp = Response::text("world");

        assert_eq!(
            head(&resp, Version::Http11),
            "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 5\r\n\r\n"
        );
    }

    #[test]
    fn explicit_content_length_not_duplicated() {
        let resp = Response::new(StatusCode::Ok)
            .with_header("content-length", "5")
            .with_body("world");

        let serialized = head(&resp, Version::Http11);
        assert_eq!(serialized.matches("content-length").count(), 1);
    }

    #[test]
    fn headers_keep_insertion_order() {
        let resp = Response::new(StatusCode::Ok)
            .with_header("x-first", "1")
            .with_header("x-second", "2")
            .with_header("x-first", "3");

        let serialized = head(&resp, Version::Http11);
        let first = serialized.find("x-first: 1").unwrap();
        let second = serialized.find("x-second: 2").unwrap();
        let third = serialized.find("x-first: 3").unwrap();
        assert!(first < second && second < third);
    }

    #[test]
    fn stream_body_uses_chunked_on_http11() {
        let resp = Response::new(StatusCode::Ok).with_stream(std::iter::empty());

        assert!(resp.uses_chunked(Version::Http11));
        assert!(head(&resp, Version::Http11).contains("transfer-encoding: chunked"));
    }

    #[test]
    fn stream_body_is_raw_on_http10() {
        let resp = Response::new(StatusCode::Ok).with_stream(std::iter::empty());

        assert!(!resp.uses_chunked(Version::Http10));
        assert!(!head(&resp, Version::Http10).contains("transfer-encoding"));
    }

    #[test]
    fn file_body_advertises_slice_length() {
        let resp = Response::new(StatusCode::Ok).with_file("/var/data/blob", 128, 4096);

        assert!(head(&resp, Version::Http11).contains("content-length: 4096"));
    }

    #[test]
    fn chunk_framing() {
        let mut out = Vec::new();
        Response::write_chunk(&mut out, b"hello");
        Response::write_chunk(&mut out, &[0u8; 16]);
        out.extend_from_slice(Response::chunk_terminator());

        let mut expected = b"5\r\nhello\r\n10\r\n".to_vec();
        expected.extend_from_slice(&[0u8; 16]);
        expected.extend_from_slice(b"\r\n0\r\n\r\n");
        assert_eq!(out, expected);
    }

    #[test]
    fn http10_status_line() {
        let resp = Response::status_only(StatusCode::NotFound);
        assert!(head(&resp, Version::Http10).starts_with("HTTP/1.0 404 Not Found\r\n"));
    }
}
