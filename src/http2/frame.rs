//! HTTP/2 frame layer (RFC 7540 §4): the 9-byte frame header, settings
//! payloads, and helpers to emit the frame types the server sends.

use crate::errors::Http2Error;

pub(crate) const FRAME_HEADER_LEN: usize = 9;

/// The 24-byte client connection preface, RFC 7540 §3.5.
pub(crate) const PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

// Frame type codes.
pub(crate) const DATA: u8 = 0x0;
pub(crate) const HEADERS: u8 = 0x1;
pub(crate) const PRIORITY: u8 = 0x2;
pub(crate) const RST_STREAM: u8 = 0x3;
pub(crate) const SETTINGS: u8 = 0x4;
pub(crate) const PUSH_PROMISE: u8 = 0x5;
pub(crate) const PING: u8 = 0x6;
pub(crate) const GOAWAY: u8 = 0x7;
pub(crate) const WINDOW_UPDATE: u8 = 0x8;
pub(crate) const CONTINUATION: u8 = 0x9;

// Flag bits.
pub(crate) const FLAG_END_STREAM: u8 = 0x1;
pub(crate) const FLAG_ACK: u8 = 0x1;
pub(crate) const FLAG_END_HEADERS: u8 = 0x4;
pub(crate) const FLAG_PADDED: u8 = 0x8;
pub(crate) const FLAG_PRIORITY: u8 = 0x20;

/// A parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub(crate) length: u32,
    pub(crate) kind: u8,
    pub(crate) flags: u8,
    pub(crate) stream_id: u32,
}

impl FrameHeader {
    /// Parses the fixed 9-byte header. The reserved bit of the stream
    /// identifier is masked off, RFC 7540 §4.1.
    pub(crate) fn parse(raw: &[u8; FRAME_HEADER_LEN]) -> Self {
        Self {
            length: u32::from_be_bytes([0, raw[0], raw[1], raw[2]]),
            kind: raw[3],
            flags: raw[4],
            stream_id: u32::from_be_bytes([raw[5], raw[6], raw[7], raw[8]]) & 0x7FFF_FFFF,
        }
    }

    #[inline(always)]
    pub(crate) const fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// Appends a frame header to `out`.
pub(crate) fn write_header(out: &mut Vec<u8>, length: usize, kind: u8, flags: u8, stream_id: u32) {
    let len = (length as u32).to_be_bytes();
    out.extend_from_slice(&[len[1], len[2], len[3], kind, flags]);
    out.extend_from_slice(&stream_id.to_be_bytes());
}

/// Strips padding (and the HEADERS priority block) from a frame payload,
/// returning the useful slice.
pub(crate) fn strip_padding<'a>(
    header: &FrameHeader,
    payload: &'a [u8],
) -> Result<&'a [u8], Http2Error> {
    let mut body = payload;

    let pad_length = if header.has(FLAG_PADDED) {
        let (&first, rest) = body.split_first().ok_or(Http2Error::FrameSizeError)?;
        body = rest;
        first as usize
    } else {
        0
    };

    if header.kind == HEADERS && header.has(FLAG_PRIORITY) {
        if body.len() < 5 {
            return Err(Http2Error::FrameSizeError);
        }
        body = &body[5..];
    }

    if pad_length > body.len() {
        // Padding longer than the remaining payload, RFC 7540 §6.1.
        return Err(Http2Error::ProtocolError);
    }
    Ok(&body[..body.len() - pad_length])
}

/// The settings relevant to this server, RFC 7540 §6.5.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Settings {
    pub(crate) header_table_size: u32,
    pub(crate) enable_push: bool,
    pub(crate) max_concurrent_streams: Option<u32>,
    pub(crate) initial_window_size: u32,
    pub(crate) max_frame_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: 65_535,
            max_frame_size: 16_384,
        }
    }
}

impl Settings {
    /// Applies one SETTINGS payload. Unknown identifiers are ignored per
    /// RFC 7540 §6.5.2; out-of-range values are connection errors.
    pub(crate) fn apply(&mut self, payload: &[u8]) -> Result<(), Http2Error> {
        if payload.len() % 6 != 0 {
            return Err(Http2Error::FrameSizeError);
        }

        for entry in payload.chunks_exact(6) {
            let id = u16::from_be_bytes([entry[0], entry[1]]);
            let value = u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]);

            match id {
                0x1 => self.header_table_size = value,
                0x2 => match value {
                    0 => self.enable_push = false,
                    1 => self.enable_push = true,
                    _ => return Err(Http2Error::ProtocolError),
                },
                0x3 => self.max_concurrent_streams = Some(value),
                0x4 => {
                    if value > 0x7FFF_FFFF {
                        return Err(Http2Error::FlowControlError);
                    }
                    self.initial_window_size = value;
                }
                0x5 => {
                    if !(16_384..=16_777_215).contains(&value) {
                        return Err(Http2Error::ProtocolError);
                    }
                    self.max_frame_size = value;
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// The server's own SETTINGS frame, sent right after the preface.
pub(crate) fn server_settings(
    header_table_size: usize,
    max_concurrent_streams: u32,
    initial_window_size: u32,
    max_frame_size: u32,
) -> Vec<u8> {
    let entries: [(u16, u32); 5] = [
        (0x1, header_table_size as u32),
        (0x2, 0), // server push disabled
        (0x3, max_concurrent_streams),
        (0x4, initial_window_size),
        (0x5, max_frame_size),
    ];

    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + entries.len() * 6);
    write_header(&mut out, entries.len() * 6, SETTINGS, 0, 0);
    for (id, value) in entries {
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(&value.to_be_bytes());
    }
    out
}

pub(crate) fn settings_ack(out: &mut Vec<u8>) {
    write_header(out, 0, SETTINGS, FLAG_ACK, 0);
}

pub(crate) fn ping_reply(out: &mut Vec<u8>, payload: &[u8; 8]) {
    write_header(out, 8, PING, FLAG_ACK, 0);
    out.extend_from_slice(payload);
}

pub(crate) fn rst_stream(out: &mut Vec<u8>, stream_id: u32, error: Http2Error) {
    rst_stream_code(out, stream_id, error.code());
}

/// RST_STREAM with a raw code, for conditions outside the error enum
/// (REFUSED_STREAM when the concurrency cap is hit).
pub(crate) fn rst_stream_code(out: &mut Vec<u8>, stream_id: u32, code: u32) {
    write_header(out, 4, RST_STREAM, 0, stream_id);
    out.extend_from_slice(&code.to_be_bytes());
}

pub(crate) const REFUSED_STREAM: u32 = 0x7;
pub(crate) const NO_ERROR: u32 = 0x0;

pub(crate) fn goaway(out: &mut Vec<u8>, last_stream_id: u32, code: u32) {
    write_header(out, 8, GOAWAY, 0, 0);
    out.extend_from_slice(&last_stream_id.to_be_bytes());
    out.extend_from_slice(&code.to_be_bytes());
}

pub(crate) fn window_update(out: &mut Vec<u8>, stream_id: u32, increment: u32) {
    write_header(out, 4, WINDOW_UPDATE, 0, stream_id);
    out.extend_from_slice(&increment.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let mut raw = Vec::new();
        write_header(&mut raw, 0x4142, HEADERS, FLAG_END_HEADERS, 3);

        let parsed = FrameHeader::parse(raw[..9].try_into().unwrap());
        assert_eq!(
            parsed,
            FrameHeader {
                length: 0x4142,
                kind: HEADERS,
                flags: FLAG_END_HEADERS,
                stream_id: 3,
            }
        );
        assert!(parsed.has(FLAG_END_HEADERS));
        assert!(!parsed.has(FLAG_END_STREAM));
    }

    #[test]
    fn reserved_stream_bit_is_masked() {
        let raw = [0, 0, 0, DATA, 0, 0x80, 0, 0, 5];
        assert_eq!(FrameHeader::parse(&raw).stream_id, 5);
    }

    #[test]
    fn padding_is_stripped() {
        let header = FrameHeader {
            length: 8,
            kind: DATA,
            flags: FLAG_PADDED,
            stream_id: 1,
        };
        // pad length 3, then "data", then 3 pad bytes.
        let payload = [3, b'd', b'a', b't', b'a', 0, 0, 0];
        assert_eq!(strip_padding(&header, &payload).unwrap(), b"data");
    }

    #[test]
    fn excessive_padding_is_protocol_error() {
        let header = FrameHeader {
            length: 3,
            kind: DATA,
            flags: FLAG_PADDED,
            stream_id: 1,
        };
        let payload = [200, b'x', b'y'];
        assert_eq!(
            strip_padding(&header, &payload),
            Err(Http2Error::ProtocolError)
        );
    }

    #[test]
    fn headers_priority_block_is_skipped() {
        let header = FrameHeader {
            length: 7,
            kind: HEADERS,
            flags: FLAG_PRIORITY,
            stream_id: 1,
        };
        let payload = [0, 0, 0, 3, 16, 0x82, 0x87];
        assert_eq!(strip_padding(&header, &payload).unwrap(), [0x82, 0x87]);
    }

    #[test]
    fn settings_apply_and_validate() {
        let mut settings = Settings::default();

        let mut payload = Vec::new();
        for (id, value) in [(0x1u16, 8192u32), (0x3, 42), (0x4, 100_000), (0xFF, 7)] {
            payload.extend_from_slice(&id.to_be_bytes());
            payload.extend_from_slice(&value.to_be_bytes());
        }
        settings.apply(&payload).unwrap();

        assert_eq!(settings.header_table_size, 8192);
        assert_eq!(settings.max_concurrent_streams, Some(42));
        assert_eq!(settings.initial_window_size, 100_000);
        // Unknown id 0xFF ignored, frame size default untouched.
        assert_eq!(settings.max_frame_size, 16_384);
    }

    #[test]
    fn settings_errors() {
        let mut settings = Settings::default();

        // Length not a multiple of six.
        assert_eq!(settings.apply(&[0, 1, 0]), Err(Http2Error::FrameSizeError));

        // ENABLE_PUSH outside {0, 1}.
        let mut push = Vec::new();
        push.extend_from_slice(&2u16.to_be_bytes());
        push.extend_from_slice(&7u32.to_be_bytes());
        assert_eq!(settings.apply(&push), Err(Http2Error::ProtocolError));

        // Initial window above 2^31 - 1.
        let mut window = Vec::new();
        window.extend_from_slice(&4u16.to_be_bytes());
        window.extend_from_slice(&0x8000_0000u32.to_be_bytes());
        assert_eq!(settings.apply(&window), Err(Http2Error::FlowControlError));

        // Frame size below the floor.
        let mut frame = Vec::new();
        frame.extend_from_slice(&5u16.to_be_bytes());
        frame.extend_from_slice(&1024u32.to_be_bytes());
        assert_eq!(settings.apply(&frame), Err(Http2Error::ProtocolError));
    }

    #[test]
    fn server_settings_disable_push() {
        let frame = server_settings(4096, 128, 65_535, 16_384);
        let header = FrameHeader::parse(frame[..9].try_into().unwrap());

        assert_eq!(header.kind, SETTINGS);
        assert_eq!(header.length, 30);
        assert_eq!(header.stream_id, 0);

        // The ENABLE_PUSH entry carries 0.
        let body = &frame[9..];
        let push_entry = body.chunks_exact(6).find(|e| e[0] == 0 && e[1] == 2).unwrap();
        assert_eq!(&push_entry[2..], &[0, 0, 0, 0]);
    }

    #[test]
    fn control_frame_helpers() {
        let mut out = Vec::new();
        rst_stream(&mut out, 7, Http2Error::StreamClosed);
        let header = FrameHeader::parse(out[..9].try_into().unwrap());
        assert_eq!((header.kind, header.stream_id, header.length), (RST_STREAM, 7, 4));
        assert_eq!(&out[9..], &[0, 0, 0, 5]);

        let mut out = Vec::new();
        goaway(&mut out, 9, Http2Error::ProtocolError.code());
        assert_eq!(&out[9..13], &[0, 0, 0, 9]);
        assert_eq!(&out[13..], &[0, 0, 0, 1]);

        let mut out = Vec::new();
        window_update(&mut out, 3, 32_768);
        assert_eq!(&out[9..], &32_768u32.to_be_bytes());

        let mut out = Vec::new();
        ping_reply(&mut out, b"8bytepay");
        let header = FrameHeader::parse(out[..9].try_into().unwrap());
        assert!(header.has(FLAG_ACK));
        assert_eq!(&out[9..], b"8bytepay");
    }
}
