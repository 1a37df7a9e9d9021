//! HPACK header compression (RFC 7541).
//!
//! The decoder accepts the full wire format: indexed fields, literals
//! with and without indexing, dynamic table size updates, and
//! Huffman-coded strings. The encoder stays deliberately simple — every
//! header goes out as a literal without indexing, never Huffman-coded —
//! which keeps responses stateless and always valid for any peer.

use crate::errors::Http2Error;
use std::collections::VecDeque;
use std::sync::OnceLock;

/// Per-entry overhead in the dynamic table size accounting, RFC 7541 §4.1.
const ENTRY_OVERHEAD: usize = 32;

/// The static table, RFC 7541 Appendix A. Index 0 is unused on the wire.
#[rustfmt::skip]
const STATIC_TABLE: &[(&str, &str)] = &[
    ("", ""),
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Incremental header block decoder with a bounded dynamic table.
pub(crate) struct Decoder {
    /// Upper bound from SETTINGS_HEADER_TABLE_SIZE.
    settings_max: usize,
    /// Current bound, lowered by dynamic table size updates.
    max_size: usize,
    table: VecDeque<(String, String)>,
    table_size: usize,
}

impl Decoder {
    pub(crate) fn new(settings_max: usize) -> Self {
        Self {
            settings_max,
            max_size: settings_max,
            table: VecDeque::new(),
            table_size: 0,
        }
    }

    /// Decodes one complete header block into ordered (name, value) pairs.
    pub(crate) fn decode(&mut self, block: &[u8]) -> Result<Vec<(String, String)>, Http2Error> {
        let mut headers = Vec::new();
        let mut cursor = Cursor::new(block);

        while !cursor.is_empty() {
            let first = cursor.take_byte()?;

            if first & 0x80 != 0 {
                // Indexed field.
                let index = cursor.take_int(first, 7)?;
                headers.push(self.lookup(index)?);
            } else if first & 0x40 != 0 {
                // Literal with incremental indexing.
                let (name, value) = self.literal(&mut cursor, first, 6)?;
                self.insert(name.clone(), value.clone());
                headers.push((name, value));
            } else if first & 0x20 != 0 {
                // Dynamic table size update.
                let size = cursor.take_int(first, 5)? as usize;
                if size > self.settings_max {
                    return Err(Http2Error::CompressionError);
                }
                self.max_size = size;
                self.evict();
            } else {
                // Literal without indexing, or never-indexed.
                let (name, value) = self.literal(&mut cursor, first, 4)?;
                headers.push((name, value));
            }
        }

        Ok(headers)
    }

    fn literal(
        &self,
        cursor: &mut Cursor<'_>,
        first: u8,
        prefix: u8,
    ) -> Result<(String, String), Http2Error> {
        let index = cursor.take_int(first, prefix)?;
        let name = match index {
            0 => cursor.take_string()?,
            _ => self.lookup(index)?.0,
        };
        let value = cursor.take_string()?;
        Ok((name, value))
    }

    fn lookup(&self, index: u64) -> Result<(String, String), Http2Error> {
        if index == 0 {
            return Err(Http2Error::CompressionError);
        }
        if (index as usize) < STATIC_TABLE.len() {
            let (name, value) = STATIC_TABLE[index as usize];
            return Ok((name.to_owned(), value.to_owned()));
        }

        let dynamic = index as usize - STATIC_TABLE.len();
        self.table
            .get(dynamic)
            .cloned()
            .ok_or(Http2Error::CompressionError)
    }

    fn insert(&mut self, name: String, value: String) {
        let entry = name.len() + value.len() + ENTRY_OVERHEAD;

        while self.table_size + entry > self.max_size {
            match self.table.pop_back() {
                Some((n, v)) => self.table_size -= n.len() + v.len() + ENTRY_OVERHEAD,
                // An entry larger than the table empties it, RFC 7541 §4.4.
                None => return,
            }
        }

        self.table_size += entry;
        self.table.push_front((name, value));
    }

    fn evict(&mut self) {
        while self.table_size > self.max_size {
            let Some((n, v)) = self.table.pop_back() else {
                break;
            };
            self.table_size -= n.len() + v.len() + ENTRY_OVERHEAD;
        }
    }
}

/// Header block encoder for responses.
///
/// Emits every header as a literal without indexing with a raw (non
/// Huffman) string, names lowercased per RFC 7540 §8.1.2.
pub(crate) struct Encoder;

impl Encoder {
    pub(crate) fn encode(headers: &[(String, String)], out: &mut Vec<u8>) {
        for (name, value) in headers {
            out.push(0x00);
            Self::encode_string(&name.to_ascii_lowercase(), out);
            Self::encode_string(value, out);
        }
    }

    fn encode_string(text: &str, out: &mut Vec<u8>) {
        encode_int(text.len() as u64, 7, 0x00, out);
        out.extend_from_slice(text.as_bytes());
    }
}

/// Prefixed integer encoding, RFC 7541 §5.1.
fn encode_int(mut value: u64, prefix: u8, flags: u8, out: &mut Vec<u8>) {
    let max_prefix = (1u64 << prefix) - 1;

    if value < max_prefix {
        out.push(flags | value as u8);
        return;
    }

    out.push(flags | max_prefix as u8);
    value -= max_prefix;
    while value >= 0x80 {
        out.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take_byte(&mut self) -> Result<u8, Http2Error> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(Http2Error::CompressionError)?;
        self.pos += 1;
        Ok(byte)
    }

    /// Prefixed integer decoding, RFC 7541 §5.1.
    fn take_int(&mut self, first: u8, prefix: u8) -> Result<u64, Http2Error> {
        let max_prefix = (1u64 << prefix) - 1;
        let mut value = (first as u64) & max_prefix;
        if value < max_prefix {
            return Ok(value);
        }

        let mut shift = 0u32;
        loop {
            let byte = self.take_byte()?;
            value = value
                .checked_add(((byte & 0x7F) as u64) << shift)
                .ok_or(Http2Error::CompressionError)?;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(Http2Error::CompressionError);
            }
        }
    }

    /// Length-prefixed string, optionally Huffman-coded.
    fn take_string(&mut self) -> Result<String, Http2Error> {
        let first = self.take_byte()?;
        let huffman = first & 0x80 != 0;
        let length = self.take_int(first, 7)? as usize;

        if self.data.len() - self.pos < length {
            return Err(Http2Error::CompressionError);
        }
        let raw = &self.data[self.pos..self.pos + length];
        self.pos += length;

        let bytes = match huffman {
            true => huffman_decode(raw)?,
            false => raw.to_vec(),
        };
        String::from_utf8(bytes).map_err(|_| Http2Error::CompressionError)
    }
}

// Huffman coding, RFC 7541 Appendix B. `(code, bits)` per symbol;
// index 256 is EOS.
#[rustfmt::skip]
const HUFFMAN_TABLE: [(u32, u8); 257] = [
    (0x1ff8, 13), (0x7fffd8, 23), (0xfffffe2, 28), (0xfffffe3, 28),
    (0xfffffe4, 28), (0xfffffe5, 28), (0xfffffe6, 28), (0xfffffe7, 28),
    (0xfffffe8, 28), (0xffffea, 24), (0x3ffffffc, 30), (0xfffffe9, 28),
    (0xfffffea, 28), (0x3ffffffd, 30), (0xfffffeb, 28), (0xfffffec, 28),
    (0xfffffed, 28), (0xfffffee, 28), (0xfffffef, 28), (0xffffff0, 28),
    (0xffffff1, 28), (0xffffff2, 28), (0x3ffffffe, 30), (0xffffff3, 28),
    (0xffffff4, 28), (0xffffff5, 28), (0xffffff6, 28), (0xffffff7, 28),
    (0xffffff8, 28), (0xffffff9, 28), (0xffffffa, 28), (0xffffffb, 28),
    // 0x20 ' ' .. 0x2f '/'
    (0x14, 6), (0x3f8, 10), (0x3f9, 10), (0xffa, 12),
    (0x1ff9, 13), (0x15, 6), (0xf8, 8), (0x7fa, 11),
    (0x3fa, 10), (0x3fb, 10), (0xf9, 8), (0x7fb, 11),
    (0xfa, 8), (0x16, 6), (0x17, 6), (0x18, 6),
    // 0x30 '0' .. 0x3f '?'
    (0x0, 5), (0x1, 5), (0x2, 5), (0x19, 6),
    (0x1a, 6), (0x1b, 6), (0x1c, 6), (0x1d, 6),
    (0x1e, 6), (0x1f, 6), (0x5c, 7), (0xfb, 8),
    (0x7ffc, 15), (0x20, 6), (0xffb, 12), (0x3fc, 10),
    // 0x40 '@' .. 0x4f 'O'
    (0x1ffa, 13), (0x21, 6), (0x5d, 7), (0x5e, 7),
    (0x5f, 7), (0x60, 7), (0x61, 7), (0x62, 7),
    (0x63, 7), (0x64, 7), (0x65, 7), (0x66, 7),
    (0x67, 7), (0x68, 7), (0x69, 7), (0x6a, 7),
    // 0x50 'P' .. 0x5f '_'
    (0x6b, 7), (0x6c, 7), (0x6d, 7), (0x6e, 7),
    (0x6f, 7), (0x70, 7), (0x71, 7), (0x72, 7),
    (0xfc, 8), (0x73, 7), (0xfd, 8), (0x1ffb, 13),
    (0x7fff0, 19), (0x1ffc, 13), (0x3ffc, 14), (0x22, 6),
    // 0x60 '`' .. 0x6f 'o'
    (0x7ffd, 15), (0x3, 5), (0x23, 6), (0x4, 5),
    (0x24, 6), (0x5, 5), (0x25, 6), (0x26, 6),
    (0x27, 6), (0x6, 5), (0x74, 7), (0x75, 7),
    (0x28, 6), (0x29, 6), (0x2a, 6), (0x7, 5),
    // 0x70 'p' .. 0x7f
    (0x2b, 6), (0x76, 7), (0x2c, 6), (0x8, 5),
    (0x9, 5), (0x2d, 6), (0x77, 7), (0x78, 7),
    (0x79, 7), (0x7a, 7), (0x7b, 7), (0x7ffe, 15),
    (0x7fc, 11), (0x3ffd, 14), (0x1ffd, 13), (0xffffffc, 28),
    // 0x80 ..
    (0xfffe6, 20), (0x3fffd2, 22), (0xfffe7, 20), (0xfffe8, 20),
    (0x3fffd3, 22), (0x3fffd4, 22), (0x3fffd5, 22), (0x7fffd9, 23),
    (0x3fffd6, 22), (0x7fffda, 23), (0x7fffdb, 23), (0x7fffdc, 23),
    (0x7fffdd, 23), (0x7fffde, 23), (0xffffeb, 24), (0x7fffdf, 23),
    (0xffffec, 24), (0xffffed, 24), (0x3fffd7, 22), (0x7fffe0, 23),
    (0xffffee, 24), (0x7fffe1, 23), (0x7fffe2, 23), (0x7fffe3, 23),
    (0x7fffe4, 23), (0x1fffdc, 21), (0x3fffd8, 22), (0x7fffe5, 23),
    (0x3fffd9, 22), (0x7fffe6, 23), (0x7fffe7, 23), (0xffffef, 24),
    (0x3fffda, 22), (0x1fffdd, 21), (0xfffe9, 20), (0x3fffdb, 22),
    (0x3fffdc, 22), (0x7fffe8, 23), (0x7fffe9, 23), (0x1fffde, 21),
    (0x7fffea, 23), (0x3fffdd, 22), (0x3fffde, 22), (0xfffff0, 24),
    (0x1fffdf, 21), (0x3fffdf, 22), (0x7fffeb, 23), (0x7fffec, 23),
    (0x1fffe0, 21), (0x1fffe1, 21), (0x3fffe0, 22), (0x1fffe2, 21),
    (0x7fffed, 23), (0x3fffe1, 22), (0x7fffee, 23), (0x7fffef, 23),
    (0xfffea, 20), (0x3fffe2, 22), (0x3fffe3, 22), (0x3fffe4, 22),
    (0x7ffff0, 23), (0x3fffe5, 22), (0x3fffe6, 22), (0x7ffff1, 23),
    (0x3ffffe0, 26), (0x3ffffe1, 26), (0xfffeb, 20), (0x7fff1, 19),
    (0x3fffe7, 22), (0x7ffff2, 23), (0x3fffe8, 22), (0x1ffffec, 25),
    (0x3ffffe2, 26), (0x3ffffe3, 26), (0x3ffffe4, 26), (0x7ffffde, 27),
    (0x7ffffdf, 27), (0x3ffffe5, 26), (0xfffff1, 24), (0x1ffffed, 25),
    (0x7fff2, 19), (0x1fffe3, 21), (0x3ffffe6, 26), (0x7ffffe0, 27),
    (0x7ffffe1, 27), (0x3ffffe7, 26), (0x7ffffe2, 27), (0xfffff2, 24),
    (0x1fffe4, 21), (0x1fffe5, 21), (0x3ffffe8, 26), (0x3ffffe9, 26),
    (0xffffffd, 28), (0x7ffffe3, 27), (0x7ffffe4, 27), (0x7ffffe5, 27),
    (0xfffec, 20), (0xfffff3, 24), (0xfffed, 20), (0x1fffe6, 21),
    (0x3fffe9, 22), (0x1fffe7, 21), (0x1fffe8, 21), (0x7ffff3, 23),
    (0x3fffea, 22), (0x3fffeb, 22), (0x1ffffee, 25), (0x1ffffef, 25),
    (0xfffff4, 24), (0xfffff5, 24), (0x3ffffea, 26), (0x7ffff4, 23),
    (0x3ffffeb, 26), (0x7ffffe6, 27), (0x3ffffec, 26), (0x3ffffed, 26),
    (0x7ffffe7, 27), (0x7ffffe8, 27), (0x7ffffe9, 27), (0x7ffffea, 27),
    (0x7ffffeb, 27), (0xffffffe, 28), (0x7ffffec, 27), (0x7ffffed, 27),
    (0x7ffffee, 27), (0x7ffffef, 27), (0x7fffff0, 27), (0x3ffffee, 26),
    (0x3fffffff, 30),
];

const EOS: u16 = 256;

/// Flat binary trie over the code table: `nodes[i]` holds the child
/// indices for bits 0/1 and the symbol terminating at `i` (or -1).
struct HuffmanTrie {
    nodes: Vec<([i32; 2], i16)>,
}

impl HuffmanTrie {
    fn build() -> Self {
        let mut nodes = vec![([-1i32; 2], -1i16)];

        for (symbol, &(code, bits)) in HUFFMAN_TABLE.iter().enumerate() {
            let mut at = 0usize;
            for i in (0..bits).rev() {
                let bit = ((code >> i) & 1) as usize;
                if nodes[at].0[bit] < 0 {
                    nodes.push(([-1; 2], -1));
                    let next = nodes.len() as i32 - 1;
                    nodes[at].0[bit] = next;
                }
                at = nodes[at].0[bit] as usize;
            }
            nodes[at].1 = symbol as i16;
        }

        Self { nodes }
    }

    fn shared() -> &'static Self {
        static TRIE: OnceLock<HuffmanTrie> = OnceLock::new();
        TRIE.get_or_init(Self::build)
    }
}

fn huffman_decode(encoded: &[u8]) -> Result<Vec<u8>, Http2Error> {
    let trie = HuffmanTrie::shared();
    let mut out = Vec::with_capacity(encoded.len() * 2);

    let mut at = 0usize;
    let mut bits_since_symbol = 0u8;

    for &byte in encoded {
        for shift in (0..8).rev() {
            let bit = ((byte >> shift) & 1) as usize;
            let next = trie.nodes[at].0[bit];
            if next < 0 {
                return Err(Http2Error::CompressionError);
            }
            at = next as usize;
            bits_since_symbol += 1;

            let symbol = trie.nodes[at].1;
            if symbol >= 0 {
                if symbol as u16 == EOS {
                    return Err(Http2Error::CompressionError);
                }
                out.push(symbol as u8);
                at = 0;
                bits_since_symbol = 0;
            }
        }
    }

    // Up to 7 bits of all-ones padding are allowed, RFC 7541 §5.2.
    if bits_since_symbol > 7 {
        return Err(Http2Error::CompressionError);
    }
    if bits_since_symbol > 0 {
        let mask = (1u8 << bits_since_symbol) - 1;
        let last = encoded[encoded.len() - 1];
        if last & mask != mask {
            return Err(Http2Error::CompressionError);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        s.split_whitespace()
            .flat_map(|chunk| {
                chunk
                    .as_bytes()
                    .chunks(2)
                    .map(|pair| u8::from_str_radix(std::str::from_utf8(pair).unwrap(), 16).unwrap())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn indexed_static_field() {
        // RFC 7541 C.2.4: 0x82 = :method: GET
        let mut decoder = Decoder::new(4096);
        assert_eq!(
            decoder.decode(&[0x82]).unwrap(),
            pairs(&[(":method", "GET")])
        );
    }

    #[test]
    fn literal_without_indexing() {
        // RFC 7541 C.2.2.
        let mut decoder = Decoder::new(4096);
        let block = hex("040c 2f73 616d 706c 652f 7061 7468");
        assert_eq!(
            decoder.decode(&block).unwrap(),
            pairs(&[(":path", "/sample/path")])
        );
        assert_eq!(decoder.table_size, 0);
    }

    #[test]
    fn never_indexed_literal() {
        // RFC 7541 C.2.3.
        let mut decoder = Decoder::new(4096);
        let block = hex("1008 7061 7373 776f 7264 0673 6563 7265 74");
        assert_eq!(
            decoder.decode(&block).unwrap(),
            pairs(&[("password", "secret")])
        );
    }

    #[test]
    fn request_sequence_builds_dynamic_table() {
        // RFC 7541 C.3: three requests on one connection.
        let mut decoder = Decoder::new(4096);

        let first = hex("8286 8441 0f77 7777 2e65 7861 6d70 6c65 2e63 6f6d");
        assert_eq!(
            decoder.decode(&first).unwrap(),
            pairs(&[
                (":method", "GET"),
                (":scheme", "http"),
                (":path", "/"),
                (":authority", "www.example.com"),
            ])
        );

        let second = hex("8286 84be 5808 6e6f 2d63 6163 6865");
        assert_eq!(
            decoder.decode(&second).unwrap(),
            pairs(&[
                (":method", "GET"),
                (":scheme", "http"),
                (":path", "/"),
                (":authority", "www.example.com"),
                ("cache-control", "no-cache"),
            ])
        );

        let third = hex(
            "8287 85bf 400a 6375 7374 6f6d 2d6b 6579 0c63 7573 746f 6d2d 7661 6c75 65",
        );
        assert_eq!(
            decoder.decode(&third).unwrap(),
            pairs(&[
                (":method", "GET"),
                (":scheme", "https"),
                (":path", "/index.html"),
                (":authority", "www.example.com"),
                ("custom-key", "custom-value"),
            ])
        );
    }

    #[test]
    fn huffman_coded_request() {
        // RFC 7541 C.4.1: the C.3.1 request with Huffman-coded strings.
        let mut decoder = Decoder::new(4096);
        let block = hex("8286 8441 8cf1 e3c2 e5f2 3a6b a0ab 90f4 ff");
        assert_eq!(
            decoder.decode(&block).unwrap(),
            pairs(&[
                (":method", "GET"),
                (":scheme", "http"),
                (":path", "/"),
                (":authority", "www.example.com"),
            ])
        );
    }

    #[test]
    fn huffman_rejects_eos_and_bad_padding() {
        // A lone 0x00 byte is five bits of '0' code plus three 0-bits of
        // padding — padding must be all ones.
        assert!(huffman_decode(&[0x00]).is_err());
        // All-ones beyond 7 bits means the peer padded too much.
        assert!(huffman_decode(&[0xff, 0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn integer_prefix_boundaries() {
        // RFC 7541 C.1.2: 1337 with a 5-bit prefix = 1f 9a 0a.
        let mut cursor = Cursor::new(&[0x9a, 0x0a]);
        assert_eq!(cursor.take_int(0x1f, 5).unwrap(), 1337);

        let mut out = Vec::new();
        encode_int(1337, 5, 0x00, &mut out);
        assert_eq!(out, [0x1f, 0x9a, 0x0a]);

        let mut small = Vec::new();
        encode_int(10, 5, 0x00, &mut small);
        assert_eq!(small, [0x0a]);
    }

    #[test]
    fn decode_of_encode_round_trips() {
        let headers = pairs(&[
            (":status", "200"),
            ("content-type", "text/plain"),
            ("x-custom", "a=b; c=d"),
            ("set-cookie", "first"),
            ("set-cookie", "second"),
        ]);

        let mut block = Vec::new();
        Encoder::encode(&headers, &mut block);

        let mut decoder = Decoder::new(4096);
        assert_eq!(decoder.decode(&block).unwrap(), headers);
    }

    #[test]
    fn encoder_lowercases_names() {
        let mut block = Vec::new();
        Encoder::encode(&pairs(&[("Content-Type", "text/html")]), &mut block);

        let mut decoder = Decoder::new(4096);
        assert_eq!(
            decoder.decode(&block).unwrap(),
            pairs(&[("content-type", "text/html")])
        );
    }

    #[test]
    fn dynamic_table_eviction() {
        // Table sized to hold exactly one small entry.
        let mut decoder = Decoder::new(64);

        let mut block = Vec::new();
        // Literal with incremental indexing, new name: a -> 1
        block.push(0x40);
        block.push(0x01);
        block.push(b'a');
        block.push(0x01);
        block.push(b'1');
        decoder.decode(&block).unwrap();
        assert_eq!(decoder.table.len(), 1);

        // A second insert of the same shape evicts the first (2 * 34 > 64).
        let mut block2 = Vec::new();
        block2.push(0x40);
        block2.push(0x01);
        block2.push(b'b');
        block2.push(0x01);
        block2.push(b'2');
        decoder.decode(&block2).unwrap();
        assert_eq!(decoder.table.len(), 1);
        assert_eq!(decoder.table[0], ("b".to_string(), "2".to_string()));
    }

    #[test]
    fn table_size_update_above_settings_is_an_error() {
        let mut decoder = Decoder::new(256);
        // 0x3f + continuation encodes an update larger than the cap.
        let mut block = Vec::new();
        encode_int(1024, 5, 0x20, &mut block);
        assert_eq!(
            decoder.decode(&block),
            Err(Http2Error::CompressionError)
        );
    }

    #[test]
    fn truncated_blocks_are_compression_errors() {
        let mut decoder = Decoder::new(4096);
        #[rustfmt::skip]
        let cases: &[&[u8]] = &[
            &[0x40, 0x05, b'a'],     // string shorter than its length
            &[0x7f],                 // integer continuation missing
            &[0xc1],                 // indexed beyond both tables
        ];

        for case in cases {
            assert_eq!(
                decoder.decode(case),
                Err(Http2Error::CompressionError),
                "{case:?}"
            );
        }
    }
}
