use crate::{
    errors::HttpError,
    http::query::{decode_str, Query},
    http::request::Request,
    http::types::{Method, Version},
    limits::ReqLimits,
};
use memchr::memchr;

/// Outcome of feeding bytes to the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParseStatus {
    /// More input is required to finish the current request.
    NeedMore,
    /// A complete request is ready; take it with
    /// [`RequestParser::take_request`].
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    RequestLine,
    Header,
    SizedBody { remaining: usize },
    ChunkSize,
    ChunkData { remaining: usize },
    ChunkDataEnd,
    ChunkTrailer,
    Done,
}

/// Incremental HTTP/1.1 request parser.
///
/// Operates on a growing buffer: feed it whatever the socket produced and
/// it advances as far as the input allows. Pipelined bytes beyond the
/// current request stay buffered for the next one.
///
/// Limits enforced while parsing:
/// - request line + header block ≤ `header_block_size` (8 KiB default)
/// - request target ≤ `target_size`
/// - body ≤ `body_size` (10 MiB default), sized or chunked
#[derive(Debug)]
pub(crate) struct RequestParser {
    limits: ReqLimits,
    state: State,
    buffer: Vec<u8>,
    pos: usize,
    head_bytes: usize,

    method: Method,
    target: Vec<u8>,
    version: Version,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl RequestParser {
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Self::with_buffer(limits, Vec::with_capacity(limits.header_block_size))
    }

    /// Builds a parser around a recycled buffer from the server's pool.
    pub(crate) fn with_buffer(limits: &ReqLimits, buffer: Vec<u8>) -> Self {
        debug_assert!(buffer.is_empty());

        Self {
            limits: limits.clone(),
            state: State::RequestLine,
            buffer,
            pos: 0,
            head_bytes: 0,

            method: Method::Get,
            target: Vec::new(),
            version: Version::Http11,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Releases the internal buffer for return to the pool.
    pub(crate) fn into_buffer(mut self) -> Vec<u8> {
        self.buffer.clear();
        self.buffer
    }

    /// Appends socket input and advances the state machine.
    pub(crate) fn feed(&mut self, data: &[u8]) -> Result<ParseStatus, HttpError> {
        self.buffer.extend_from_slice(data);
        self.advance()
    }

    /// Advances over bytes already buffered (pipelined requests).
    pub(crate) fn resume(&mut self) -> Result<ParseStatus, HttpError> {
        self.advance()
    }

    /// True when no partial request sits in the buffer. Used by the
    /// connection loop to distinguish idle keep-alive close from a
    /// truncated request.
    pub(crate) fn is_idle(&self) -> bool {
        self.state == State::RequestLine && self.pos == self.buffer.len()
    }

    /// Builds the finished [`Request`] and resets for the next one.
    ///
    /// Must only be called after [`ParseStatus::Complete`].
    pub(crate) fn take_request(&mut self) -> Result<Request, HttpError> {
        debug_assert_eq!(self.state, State::Done, "no complete request buffered");

        let mut request = Request::new();
        request.method = self.method;
        request.version = self.version;
        request.body = std::mem::take(&mut self.body);

        for (name, value) in self.headers.drain(..) {
            request.headers.append(name, value);
        }

        // Path and query split on the first '?', both halves decoded.
        let target = std::mem::take(&mut self.target);
        let (raw_path, raw_query) = match memchr(b'?', &target) {
            Some(split) => (&target[..split], &target[split + 1..]),
            None => (&target[..], b"" as &[u8]),
        };

        request.path = decode_str(raw_path)
            .ok_or_else(|| HttpError::BadRequest("invalid path encoding".to_string()))?;
        request.raw_query = String::from_utf8_lossy(raw_query).into_owned();
        Query::parse_into(&mut request.query, raw_query);

        // Form bodies contribute to the query collection as well.
        let is_form = request
            .header("content-type")
            .map(|value| {
                value
                    .split(';')
                    .next()
                    .unwrap_or("")
                    .trim()
                    .eq_ignore_ascii_case("application/x-www-form-urlencoded")
            })
            .unwrap_or(false);
        if is_form && !request.body.is_empty() {
            let body = std::mem::take(&mut request.body);
            Query::parse_into(&mut request.query, &body);
            request.body = body;
        }

        // Retain pipelined leftovers, drop consumed bytes.
        self.buffer.drain(..self.pos);
        self.pos = 0;
        self.head_bytes = 0;
        self.state = State::RequestLine;

        Ok(request)
    }
}

// State machine
impl RequestParser {
    fn advance(&mut self) -> Result<ParseStatus, HttpError> {
        loop {
            match self.state {
                State::RequestLine => {
                    self.check_head_cap()?;
                    let Some(line) = self.take_line() else {
                        return Ok(ParseStatus::NeedMore);
                    };
                    self.parse_request_line(&line)?;
                    self.state = State::Header;
                }
                State::Header => {
                    self.check_head_cap()?;
                    let Some(line) = self.take_line() else {
                        return Ok(ParseStatus::NeedMore);
                    };
                    if line.is_empty() {
                        self.state = self.body_state()?;
                    } else {
                        self.parse_header_line(&line)?;
                    }
                }
                State::SizedBody { remaining } => {
                    let available = self.buffer.len() - self.pos;
                    let take = remaining.min(available);
                    self.body
                        .extend_from_slice(&self.buffer[self.pos..self.pos + take]);
                    self.pos += take;

                    if take == remaining {
                        self.state = State::Done;
                    } else {
                        self.state = State::SizedBody {
                            remaining: remaining - take,
                        };
                        return Ok(ParseStatus::NeedMore);
                    }
                }
                State::ChunkSize => {
                    let Some(line) = self.take_line() else {
                        return Ok(ParseStatus::NeedMore);
                    };
                    let size = parse_chunk_size(&line)
                        .ok_or_else(|| HttpError::BadRequest("invalid chunk size".to_string()))?;

                    if self.body.len() + size > self.limits.body_size {
                        return Err(HttpError::PayloadTooLarge);
                    }

                    self.state = match size {
                        0 => State::ChunkTrailer,
                        _ => State::ChunkData { remaining: size },
                    };
                }
                State::ChunkData { remaining } => {
                    let available = self.buffer.len() - self.pos;
                    let take = remaining.min(available);
                    self.body
                        .extend_from_slice(&self.buffer[self.pos..self.pos + take]);
                    self.pos += take;

                    if take == remaining {
                        self.state = State::ChunkDataEnd;
                    } else {
                        self.state = State::ChunkData {
                            remaining: remaining - take,
                        };
                        return Ok(ParseStatus::NeedMore);
                    }
                }
                State::ChunkDataEnd => {
                    let Some(line) = self.take_line() else {
                        return Ok(ParseStatus::NeedMore);
                    };
                    if !line.is_empty() {
                        return Err(HttpError::BadRequest("malformed chunk".to_string()));
                    }
                    self.state = State::ChunkSize;
                }
                State::ChunkTrailer => {
                    let Some(line) = self.take_line() else {
                        return Ok(ParseStatus::NeedMore);
                    };
                    if line.is_empty() {
                        self.state = State::Done;
                    }
                    // Trailer fields are consumed and ignored.
                }
                State::Done => return Ok(ParseStatus::Complete),
            }
        }
    }

    /// Takes one line ending in `\n` (with or without `\r`), advancing the
    /// read position past the terminator.
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = memchr(b'\n', &self.buffer[self.pos..])?;
        let mut line = &self.buffer[self.pos..self.pos + end];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }

        let owned = line.to_vec();
        self.head_bytes += end + 1;
        self.pos += end + 1;
        Some(owned)
    }

    fn check_head_cap(&self) -> Result<(), HttpError> {
        let pending = self.buffer.len() - self.pos;
        if self.head_bytes + pending > self.limits.header_block_size
            && memchr(b'\n', &self.buffer[self.pos..]).is_none()
        {
            return Err(HttpError::PayloadTooLarge);
        }
        if self.head_bytes > self.limits.header_block_size {
            return Err(HttpError::PayloadTooLarge);
        }
        Ok(())
    }

    fn parse_request_line(&mut self, line: &[u8]) -> Result<(), HttpError> {
        let mut parts = line.split(|&b| b == b' ');
        let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(m), Some(t), Some(v), None) => (m, t, v),
            _ => {
                return Err(HttpError::BadRequest(
                    "malformed request line".to_string(),
                ))
            }
        };

        self.method = Method::from_token(method)
            .ok_or_else(|| HttpError::BadRequest("unknown method".to_string()))?;

        if target.is_empty() || target[0] != b'/' {
            return Err(HttpError::BadRequest("invalid request target".to_string()));
        }
        if target.len() > self.limits.target_size {
            return Err(HttpError::UriTooLong);
        }
        self.target = target.to_vec();

        (self.version, _) = Version::from_bytes(version)
            .ok_or_else(|| HttpError::BadRequest("unsupported HTTP version".to_string()))?;

        Ok(())
    }

    fn parse_header_line(&mut self, line: &[u8]) -> Result<(), HttpError> {
        let split = memchr(b':', line)
            .ok_or_else(|| HttpError::BadRequest("header line without colon".to_string()))?;
        if split == 0 {
            return Err(HttpError::BadRequest("empty header name".to_string()));
        }

        let name = &line[..split];
        let mut value = &line[split + 1..];
        while let [b' ' | b'\t', rest @ ..] = value {
            value = rest;
        }

        let name = std::str::from_utf8(name)
            .map_err(|_| HttpError::BadRequest("invalid header name".to_string()))?;
        let value = String::from_utf8_lossy(value).into_owned();

        self.headers.push((name.to_owned(), value));
        Ok(())
    }

    /// Decides the body state from the collected headers.
    fn body_state(&mut self) -> Result<State, HttpError> {
        let chunked = self
            .header("transfer-encoding")
            .map(|value| {
                value
                    .split(',')
                    .any(|part| part.trim().eq_ignore_ascii_case("chunked"))
            })
            .unwrap_or(false);

        if chunked {
            // Transfer-Encoding takes precedence over Content-Length.
            return Ok(State::ChunkSize);
        }

        match self.header("content-length") {
            Some(value) => {
                let length = parse_usize_dec(value.as_bytes())
                    .ok_or_else(|| HttpError::BadRequest("invalid Content-Length".to_string()))?;
                if length > self.limits.body_size {
                    return Err(HttpError::PayloadTooLarge);
                }
                Ok(match length {
                    0 => State::Done,
                    _ => State::SizedBody { remaining: length },
                })
            }
            None => Ok(State::Done),
        }
    }

    #[inline]
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[inline]
fn parse_usize_dec(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: usize = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }
        result = result.checked_mul(10)?.checked_add((byte - b'0') as usize)?;
    }
    Some(result)
}

/// Chunk-size line: hex digits, optionally followed by `;extensions`.
#[inline]
fn parse_chunk_size(line: &[u8]) -> Option<usize> {
    let digits = match memchr(b';', line) {
        Some(split) => &line[..split],
        None => line,
    };
    if digits.is_empty() {
        return None;
    }

    let mut result: usize = 0;
    for &byte in digits {
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            _ => return None,
        };
        result = result.checked_mul(16)?.checked_add(digit as usize)?;
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Result<Request, HttpError> {
        let mut parser = RequestParser::new(&ReqLimits::default());
        match parser.feed(input.as_bytes())? {
            ParseStatus::Complete => parser.take_request(),
            ParseStatus::NeedMore => panic!("request incomplete"),
        }
    }

    fn parse_err(input: &str) -> HttpError {
        let mut parser = RequestParser::new(&ReqLimits::default());
        match parser.feed(input.as_bytes()) {
            Err(err) => err,
            Ok(ParseStatus::Complete) => parser.take_request().unwrap_err(),
            Ok(ParseStatus::NeedMore) => panic!("expected an error, parser wants more input"),
        }
    }

    #[test]
    fn minimal_get() {
        let req = parse("GET /hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").unwrap();

        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.path(), "/hello");
        assert_eq!(req.version(), Version::Http11);
        assert_eq!(req.header("host"), Some("x"));
        assert_eq!(req.header("connection"), Some("close"));
        assert!(req.body().is_empty());
    }

    #[test]
    fn sized_body() {
        let req = parse("POST /echo HTTP/1.1\r\nContent-Length: 13\r\n\r\nHello, World!").unwrap();

        assert_eq!(req.method(), Method::Post);
        assert_eq!(req.body(), b"Hello, World!");
    }

    #[test]
    fn chunked_body_concatenated() {
        let req = parse(
            "POST /u HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
             5\r\nHello\r\n8\r\n, World!\r\n0\r\n\r\n",
        )
        .unwrap();

        assert_eq!(req.body(), b"Hello, World!");
    }

    #[test]
    fn chunk_extensions_and_trailers() {
        let req = parse(
            "POST /u HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
             5;ext=1\r\nHello\r\n0\r\nTrailer: x\r\n\r\n",
        )
        .unwrap();

        assert_eq!(req.body(), b"Hello");
    }

    #[test]
    fn path_and_query_decoding() {
        let req = parse("GET /a%20b/c?name=jo%40hn&flag&x=a+b HTTP/1.1\r\n\r\n").unwrap();

        assert_eq!(req.path(), "/a b/c");
        assert_eq!(req.raw_query(), "name=jo%40hn&flag&x=a+b");
        assert_eq!(req.query("name"), Some("jo@hn"));
        assert_eq!(req.query("flag"), Some(""));
        assert_eq!(req.query("x"), Some("a b"));
    }

    #[test]
    fn form_body_feeds_query_pairs() {
        let req = parse(
            "POST /login HTTP/1.1\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: 24\r\n\r\n\
             user=alice&pass=s3cr%21t",
        )
        .unwrap();

        assert_eq!(req.query("user"), Some("alice"));
        assert_eq!(req.query("pass"), Some("s3cr!t"));
        assert_eq!(req.body(), b"user=alice&pass=s3cr%21t");
    }

    #[test]
    fn header_value_leading_whitespace_trimmed() {
        let req = parse("GET / HTTP/1.1\r\nX-Pad:    value  \r\n\r\n").unwrap();
        assert_eq!(req.header("x-pad"), Some("value  "));
    }

    #[test]
    fn duplicate_headers_preserved() {
        let req = parse("GET / HTTP/1.1\r\nX-Tag: a\r\nX-Tag: b\r\n\r\n").unwrap();
        let all: Vec<_> = req.headers().get_all("x-tag").collect();
        assert_eq!(all, ["a", "b"]);
    }

    #[test]
    fn bad_requests() {
        #[rustfmt::skip]
        let cases = [
            "BREW / HTTP/1.1\r\n\r\n",            // unknown method keyword
            "GET  / HTTP/1.1\r\n\r\n",            // three spaces
            "GET / HTTP/1.1 extra\r\n\r\n",       // trailing token
            "GET noslash HTTP/1.1\r\n\r\n",       // target must start with /
            "GET / HTTP/2.0\r\n\r\n",             // version keyword
            "GET / HTTP/1.1\r\nNoColonHere\r\n\r\n",
            "GET / HTTP/1.1\r\n: novalue\r\n\r\n",
            "POST / HTTP/1.1\r\nContent-Length: abc\r\n\r\n",
            "POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n\r\n",
        ];

        for case in cases {
            assert!(
                matches!(parse_err(case), HttpError::BadRequest(_)),
                "{case:?}"
            );
        }
    }

    #[test]
    fn oversized_header_block() {
        let huge = format!("GET / HTTP/1.1\r\nX-Fill: {}\r\n\r\n", "a".repeat(9000));
        assert_eq!(parse_err(&huge), HttpError::PayloadTooLarge);
    }

    #[test]
    fn unterminated_header_block_over_cap() {
        let mut parser = RequestParser::new(&ReqLimits::default());
        let garbage = "G".repeat(9000);
        assert_eq!(
            parser.feed(garbage.as_bytes()),
            Err(HttpError::PayloadTooLarge)
        );
    }

    #[test]
    fn oversized_sized_body() {
        let input = "POST / HTTP/1.1\r\nContent-Length: 10485761\r\n\r\n";
        assert_eq!(parse_err(input), HttpError::PayloadTooLarge);
    }

    #[test]
    fn oversized_chunked_body() {
        let input = "POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nA00001\r\n";
        assert_eq!(parse_err(input), HttpError::PayloadTooLarge);
    }

    #[test]
    fn uri_too_long() {
        let input = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(3000));
        assert_eq!(parse_err(&input), HttpError::UriTooLong);
    }

    #[test]
    fn incremental_feeding() {
        let mut parser = RequestParser::new(&ReqLimits::default());
        let input = b"POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";

        for chunk in input.chunks(7) {
            let _ = parser.feed(chunk).unwrap();
        }

        let req = parser.take_request().unwrap();
        assert_eq!(req.path(), "/echo");
        assert_eq!(req.body(), b"hello");
    }

    #[test]
    fn pipelined_requests_stay_buffered() {
        let mut parser = RequestParser::new(&ReqLimits::default());
        let status = parser
            .feed(b"GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\n\r\n")
            .unwrap();
        assert_eq!(status, ParseStatus::Complete);

        let first = parser.take_request().unwrap();
        assert_eq!(first.path(), "/one");
        assert!(!parser.is_idle());

        assert_eq!(parser.resume().unwrap(), ParseStatus::Complete);
        let second = parser.take_request().unwrap();
        assert_eq!(second.path(), "/two");
        assert!(parser.is_idle());
    }

    #[test]
    fn bare_lf_line_endings_accepted() {
        let req = parse("GET /lf HTTP/1.1\nHost: x\n\n").unwrap();
        assert_eq!(req.path(), "/lf");
        assert_eq!(req.header("host"), Some("x"));
    }

    #[test]
    fn http10_parses() {
        let req = parse("GET / HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(req.version(), Version::Http10);
    }
}
