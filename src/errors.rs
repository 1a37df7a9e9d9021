use crate::http::types::StatusCode;
use std::{error, fmt, io};

macro_rules! fmt_via_debug {
    ($($name:ident),*) => {$(
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:?}", self)
            }
        }
        impl error::Error for $name {}
    )*};
}

// I/O

/// Classification of an I/O failure, independent of the platform error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorKind {
    /// The peer closed the connection cleanly.
    EndOfStream,
    /// The peer reset the connection.
    ConnectionReset,
    /// A per-operation deadline expired.
    Timeout,
    /// The operation was cancelled through a [`CancelToken`](crate::CancelToken).
    Cancelled,
    /// The caller passed an argument the operation cannot act on.
    InvalidArgument,
    /// Any other platform-reported error.
    Platform,
}

/// An I/O failure returned as a value from an awaited operation.
///
/// The runtime never throws: every read, write, accept and timer completes
/// with a `Result`, and this is its error half.
#[derive(Debug)]
pub struct IoError {
    kind: IoErrorKind,
    source: Option<io::Error>,
}

impl IoError {
    #[inline(always)]
    pub(crate) const fn new(kind: IoErrorKind) -> Self {
        Self { kind, source: None }
    }

    #[inline(always)]
    pub const fn kind(&self) -> IoErrorKind {
        self.kind
    }

    /// True when the failure is the normal shutdown signal rather than a fault.
    #[inline(always)]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, IoErrorKind::Cancelled)
    }
}

// Two errors compare equal when their kinds match; the platform source is
// informational only.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl From<io::Error> for IoError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::UnexpectedEof => IoErrorKind::EndOfStream,
            io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => {
                IoErrorKind::ConnectionReset
            }
            io::ErrorKind::TimedOut => IoErrorKind::Timeout,
            io::ErrorKind::InvalidInput => IoErrorKind::InvalidArgument,
            _ => IoErrorKind::Platform,
        };

        Self {
            kind,
            source: Some(err),
        }
    }
}

impl error::Error for IoError {}
impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{:?}: {}", self.kind, source),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

// HTTP

/// An HTTP-level failure with a fixed status mapping.
///
/// Client-caused variants carry a message that is echoed in the response
/// body; server-caused variants always answer with a generic body so that
/// internal details never reach the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    BadRequest(String),
    PayloadTooLarge,
    LengthRequired,
    UriTooLong,
    NotFound,
    MethodNotAllowed,
    Internal(String),
}

impl HttpError {
    /// The status code this error maps to.
    #[inline]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BadRequest,
            Self::PayloadTooLarge => StatusCode::PayloadTooLarge,
            Self::LengthRequired => StatusCode::LengthRequired,
            Self::UriTooLong => StatusCode::UriTooLong,
            Self::NotFound => StatusCode::NotFound,
            Self::MethodNotAllowed => StatusCode::MethodNotAllowed,
            Self::Internal(_) => StatusCode::InternalServerError,
        }
    }

    /// The response body text: the carried message for client-caused errors,
    /// a fixed line for server-caused ones.
    #[inline]
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(msg) => msg,
            Self::PayloadTooLarge => "payload too large",
            Self::LengthRequired => "length required",
            Self::UriTooLong => "URI too long",
            Self::NotFound => "not found",
            Self::MethodNotAllowed => "method not allowed",
            Self::Internal(_) => "internal server error",
        }
    }
}

// HTTP/2

/// RFC 7540 error conditions the engine produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Http2Error {
    ProtocolError,
    FlowControlError,
    StreamClosed,
    CompressionError,
    FrameSizeError,
}

impl Http2Error {
    /// The 32-bit error code carried in RST_STREAM and GOAWAY frames.
    #[inline(always)]
    pub const fn code(&self) -> u32 {
        match self {
            Self::ProtocolError => 0x1,
            Self::FlowControlError => 0x3,
            Self::StreamClosed => 0x5,
            Self::FrameSizeError => 0x6,
            Self::CompressionError => 0x9,
        }
    }
}

// WebSocket

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsError {
    HandshakeFailed,
    InvalidFrame,
    MessageTooLarge,
}

fmt_via_debug! { HttpError, Http2Error, WsError }

// Connection loop composite

/// Everything that can end an HTTP/1.1 exchange early.
#[derive(Debug, PartialEq)]
pub(crate) enum ConnError {
    Io(IoError),
    Http(HttpError),
}

impl From<IoError> for ConnError {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}
impl From<HttpError> for ConnError {
    fn from(err: HttpError) -> Self {
        Self::Http(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kind_mapping() {
        #[rustfmt::skip]
        let cases = [
            (io::ErrorKind::UnexpectedEof,    IoErrorKind::EndOfStream),
            (io::ErrorKind::ConnectionReset,  IoErrorKind::ConnectionReset),
            (io::ErrorKind::BrokenPipe,       IoErrorKind::ConnectionReset),
            (io::ErrorKind::TimedOut,         IoErrorKind::Timeout),
            (io::ErrorKind::InvalidInput,     IoErrorKind::InvalidArgument),
            (io::ErrorKind::Other,            IoErrorKind::Platform),
            (io::ErrorKind::PermissionDenied, IoErrorKind::Platform),
        ];

        for (raw, kind) in cases {
            let err = IoError::from(io::Error::new(raw, "test"));
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn http_status_mapping() {
        #[rustfmt::skip]
        let cases = [
            (HttpError::BadRequest("x".into()), StatusCode::BadRequest),
            (HttpError::PayloadTooLarge,        StatusCode::PayloadTooLarge),
            (HttpError::LengthRequired,         StatusCode::LengthRequired),
            (HttpError::UriTooLong,             StatusCode::UriTooLong),
            (HttpError::NotFound,               StatusCode::NotFound),
            (HttpError::MethodNotAllowed,       StatusCode::MethodNotAllowed),
            (HttpError::Internal("x".into()),   StatusCode::InternalServerError),
        ];

        for (err, status) in cases {
            assert_eq!(err.status(), status);
        }
    }

    #[test]
    fn client_errors_keep_their_message() {
        let err = HttpError::BadRequest("malformed request line".into());
        assert_eq!(err.message(), "malformed request line");
    }

    #[test]
    fn server_errors_stay_generic() {
        let err = HttpError::Internal("db password leaked".into());
        assert_eq!(err.message(), "internal server error");
    }

    #[test]
    fn h2_error_codes() {
        assert_eq!(Http2Error::ProtocolError.code(), 0x1);
        assert_eq!(Http2Error::FlowControlError.code(), 0x3);
        assert_eq!(Http2Error::StreamClosed.code(), 0x5);
        assert_eq!(Http2Error::FrameSizeError.code(), 0x6);
        assert_eq!(Http2Error::CompressionError.code(), 0x9);
    }

    #[test]
    fn cancelled_is_not_a_fault() {
        assert!(IoError::new(IoErrorKind::Cancelled).is_cancelled());
        assert!(!IoError::new(IoErrorKind::Timeout).is_cancelled());
    }
}
