//! Percent-decoding and URL query string parsing.

use memchr::memchr;

/// Percent-decodes a byte string.
///
/// - `%XX` with two hex digits decodes to the byte value
/// - `+` decodes to a space
/// - invalid escapes (`%`, `%Z1`, truncated `%4`) pass through byte-for-byte
///
/// # Examples
/// ```
/// use relay_web::query::decode;
///
/// assert_eq!(decode(b"%20"), b" ");
/// assert_eq!(decode(b"a+b"), b"a b");
/// assert_eq!(decode(b"%41%42c"), b"ABc");
/// assert_eq!(decode(b"100%"), b"100%");
/// ```
pub fn decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        match input[i] {
            b'%' => match (hex_digit(input.get(i + 1)), hex_digit(input.get(i + 2))) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }

    out
}

/// Percent-decodes into a `String`, rejecting byte sequences that do not
/// form valid UTF-8 after decoding.
pub(crate) fn decode_str(input: &[u8]) -> Option<String> {
    let bytes = decode(input);
    simdutf8::basic::from_utf8(&bytes).ok()?;
    // SAFETY: validated as UTF-8 just above.
    Some(unsafe { String::from_utf8_unchecked(bytes) })
}

#[inline(always)]
fn hex_digit(byte: Option<&u8>) -> Option<u8> {
    match byte? {
        b @ b'0'..=b'9' => Some(b - b'0'),
        b @ b'a'..=b'f' => Some(b - b'a' + 10),
        b @ b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// URL query string parser.
///
/// Splits `a=1&b=2` style strings into ordered, percent-decoded
/// `(key, value)` pairs. Also used for `application/x-www-form-urlencoded`
/// request bodies, which share the same syntax.
///
/// # Examples
/// ```
/// use relay_web::query::Query;
///
/// let params = Query::parse(b"name=john&age=25&debug");
/// assert_eq!(params.len(), 3);
/// assert_eq!(params[0], ("name".into(), "john".into()));
/// assert_eq!(params[2], ("debug".into(), "".into()));
/// ```
pub struct Query;

impl Query {
    /// Parses a query string into a fresh collection.
    ///
    /// A leading `?` is accepted and skipped, so `?a=1` and `a=1` are
    /// equivalent.
    #[inline]
    pub fn parse(query: &[u8]) -> Vec<(String, String)> {
        let mut result = Vec::new();
        Self::parse_into(&mut result, query);
        result
    }

    /// Parses a query string, appending pairs to an existing collection.
    ///
    /// Empty segments (`a=1&&b=2`) are skipped; a segment without `=`
    /// yields an empty value; a segment starting with `=` yields an empty
    /// key. Keys and values are percent-decoded with `+` as space.
    pub fn parse_into(result: &mut Vec<(String, String)>, query: &[u8]) {
        let data = match query.first() {
            Some(b'?') => &query[1..],
            _ => query,
        };

        let mut start = 0;
        while start < data.len() {
            let end = memchr(b'&', &data[start..])
                .map(|pos| start + pos)
                .unwrap_or(data.len());

            let segment = &data[start..end];
            start = end + 1;

            if segment.is_empty() {
                continue;
            }

            let split = memchr(b'=', segment).unwrap_or(segment.len());
            let key = &segment[..split];
            let value = match split < segment.len() {
                true => &segment[split + 1..],
                false => b"" as &[u8],
            };

            result.push((decode_lossy(key), decode_lossy(value)));
        }
    }
}

#[inline]
fn decode_lossy(input: &[u8]) -> String {
    let bytes = decode(input);
    match simdutf8::basic::from_utf8(&bytes) {
        // SAFETY: validated as UTF-8 just above.
        Ok(_) => unsafe { String::from_utf8_unchecked(bytes) },
        Err(_) => String::from_utf8_lossy(&bytes).into_owned(),
    }
}

#[cfg(test)]
mod decode_tests {
    use super::*;

    #[test]
    fn basic() {
        #[rustfmt::skip]
        let cases = [
            ("%20",      " "),
            ("+",        " "),
            ("%41",      "A"),
            ("%41%42c",  "ABc"),
            ("plain",    "plain"),
            ("a+b+c",    "a b c"),
            ("%2Fpath",  "/path"),
            ("%2fpath",  "/path"),
            ("",         ""),
        ];

        for (input, expected) in cases {
            assert_eq!(decode(input.as_bytes()), expected.as_bytes(), "{input}");
        }
    }

    #[test]
    fn invalid_escapes_pass_through() {
        #[rustfmt::skip]
        let cases = [
            ("%",    "%"),
            ("%Z1",  "%Z1"),
            ("%4",   "%4"),
            ("100%", "100%"),
            ("%%41", "%A"),
        ];

        for (input, expected) in cases {
            assert_eq!(decode(input.as_bytes()), expected.as_bytes(), "{input}");
        }
    }

    #[test]
    fn decode_str_rejects_invalid_utf8() {
        assert_eq!(decode_str(b"%41"), Some("A".to_string()));
        assert_eq!(decode_str(b"%FF%FE"), None);
    }
}

#[cfg(test)]
mod query_tests {
    use super::*;

    fn pairs(query: &str) -> Vec<(String, String)> {
        Query::parse(query.as_bytes())
    }

    #[test]
    fn basic() {
        for line in ["a=1&b=2", "?a=1&b=2"] {
            let params = pairs(line);
            assert_eq!(params.len(), 2);
            assert_eq!(params[0], ("a".into(), "1".into()));
            assert_eq!(params[1], ("b".into(), "2".into()));
        }
    }

    #[test]
    fn all_segment_shapes() {
        let params = pairs("flag&empty=&=val&&key=value");

        assert_eq!(params.len(), 4);
        assert_eq!(params[0], ("flag".into(), "".into()));
        assert_eq!(params[1], ("empty".into(), "".into()));
        assert_eq!(params[2], ("".into(), "val".into()));
        assert_eq!(params[3], ("key".into(), "value".into()));
    }

    #[test]
    fn duplicate_keys_kept_in_order() {
        let params = pairs("a=1&a=2&a=3");
        let values: Vec<_> = params.iter().map(|(_, v)| v.as_str()).collect();
        assert_eq!(values, ["1", "2", "3"]);
    }

    #[test]
    fn values_may_contain_equals() {
        let params = pairs("very=long=value=with=equals");
        assert_eq!(params[0], ("very".into(), "long=value=with=equals".into()));
    }

    #[test]
    fn pairs_are_decoded() {
        let params = pairs("email=user%40example.com&note=a+b");
        assert_eq!(params[0], ("email".into(), "user@example.com".into()));
        assert_eq!(params[1], ("note".into(), "a b".into()));
    }

    #[test]
    fn empty_input() {
        assert!(pairs("").is_empty());
        assert!(pairs("?").is_empty());
    }
}
