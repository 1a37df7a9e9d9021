use crate::http::types::{Headers, Method, Version};
use std::{any::Any, collections::HashMap, error, fmt, net::SocketAddr, str::FromStr};

/// A fully parsed, owned HTTP request.
///
/// Created by the HTTP/1.1 parser or the HTTP/2 engine, enriched with
/// route captures by the dispatcher, then handed to the handler pipeline.
/// All storage is owned; nothing borrows from connection buffers.
///
/// # Examples
/// ```
/// use relay_web::{Request, Method};
///
/// fn describe(req: &Request) -> String {
///     format!("{} {}", req.method().as_str(), req.path())
/// }
/// ```
#[derive(Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) raw_query: String,
    pub(crate) version: Version,
    pub(crate) headers: Headers,
    pub(crate) body: Vec<u8>,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) params: Vec<String>,
    pub(crate) attachments: HashMap<String, Box<dyn Any + Send + Sync>>,
    pub(crate) peer_addr: Option<SocketAddr>,
}

impl Request {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            method: Method::Get,
            path: String::new(),
            raw_query: String::new(),
            version: Version::Http11,
            headers: Headers::new(),
            body: Vec::new(),
            query: Vec::new(),
            params: Vec::new(),
            attachments: HashMap::new(),
            peer_addr: None,
        }
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// The percent-decoded request path, without the query string.
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string without the leading `?`, empty if absent.
    #[inline(always)]
    pub fn raw_query(&self) -> &str {
        &self.raw_query
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    #[inline(always)]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// First header value with case-insensitive name matching.
    #[inline(always)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Ordered percent-decoded query parameters. Form-encoded body pairs
    /// are appended here as well.
    #[inline(always)]
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// First query value for the given key.
    #[inline]
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Ordered, decoded route captures for the matched pattern.
    #[inline(always)]
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// A route capture converted to `T`.
    ///
    /// # Examples
    /// ```
    /// # use relay_web::Request;
    /// # fn handler(req: &Request) {
    /// // For route "/user/{id:number}" and request "/user/42":
    /// let id: u64 = req.param(0).unwrap();
    /// # }
    /// ```
    pub fn param<T: FromStr>(&self, index: usize) -> Result<T, ParamError> {
        let raw = self.params.get(index).ok_or(ParamError::Missing(index))?;
        raw.parse().map_err(|_| ParamError::Invalid(index))
    }

    /// Attaches a typed value under a string key for later pipeline stages.
    ///
    /// Middleware uses this to pass per-request context (an authenticated
    /// user, a trace id) down to the handler.
    #[inline]
    pub fn attach<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.attachments.insert(key.into(), Box::new(value));
    }

    /// Looks up an attachment, `None` when the key is absent or the type
    /// does not match.
    #[inline]
    pub fn attachment<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.attachments.get(key)?.downcast_ref()
    }

    #[inline(always)]
    pub const fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

/// Failure of a typed route-capture conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamError {
    /// No capture exists at this index.
    Missing(usize),
    /// The capture text does not parse as the requested type.
    Invalid(usize),
}

impl error::Error for ParamError {}
impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(index) => write!(f, "no route capture at index {}", index),
            Self::Invalid(index) => write!(f, "route capture {} failed conversion", index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_params(params: &[&str]) -> Request {
        let mut req = Request::new();
        req.params = params.iter().map(|p| p.to_string()).collect();
        req
    }

    #[test]
    fn typed_params() {
        let req = request_with_params(&["42", "7", "alice"]);

        assert_eq!(req.param::<u64>(0), Ok(42));
        assert_eq!(req.param::<i32>(1), Ok(7));
        assert_eq!(req.param::<String>(2), Ok("alice".to_string()));

        assert_eq!(req.param::<u64>(2), Err(ParamError::Invalid(2)));
        assert_eq!(req.param::<u64>(3), Err(ParamError::Missing(3)));
    }

    #[test]
    fn query_lookup_returns_first() {
        let mut req = Request::new();
        req.query = vec![
            ("a".into(), "1".into()),
            ("a".into(), "2".into()),
            ("flag".into(), "".into()),
        ];

        assert_eq!(req.query("a"), Some("1"));
        assert_eq!(req.query("flag"), Some(""));
        assert_eq!(req.query("missing"), None);
    }

    #[test]
    fn attachments_are_typed() {
        struct UserId(u64);

        let mut req = Request::new();
        req.attach("user", UserId(7));
        req.attach("name", "alice".to_string());

        assert_eq!(req.attachment::<UserId>("user").map(|u| u.0), Some(7));
        assert_eq!(req.attachment::<String>("name").map(String::as_str), Some("alice"));

        // Wrong type or key yields None, never a panic.
        assert!(req.attachment::<String>("user").is_none());
        assert!(req.attachment::<UserId>("missing").is_none());
    }
}
