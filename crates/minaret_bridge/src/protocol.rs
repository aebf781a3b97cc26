//! RFC 6455 wire helpers: HTTP upgrade handshake and frame codec.
//!
//! Everything in this module is a pure function with no shared state, so it
//! can be called from any task. Only the subset the bridge needs is
//! supported:
//!
//! * Text, Close, Ping and Pong opcodes. Other opcodes are reported as
//!   [`Decoded::Unsupported`] and never surface as a [`Frame`].
//! * No fragmentation: every outgoing frame has FIN set.
//! * Payloads up to 65535 bytes. A client frame declaring the 64-bit length
//!   form decodes to a synthetic Close, and [`build_frame`] refuses larger
//!   payloads.

use base64::{prelude::BASE64_STANDARD, Engine};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const OPCODE_MASK: u8 = 0x0F;
const PAYLOAD_LEN_MASK: u8 = 0x7F;
const PAYLOAD_LEN_16BIT: u8 = 126;
const PAYLOAD_LEN_64BIT: u8 = 127;
const MASK_KEY_LENGTH: usize = 4;

/// Largest payload that fits the 16-bit extended length form.
pub const MAX_PAYLOAD_LEN: usize = 65535;

/// Upper bound on the size of the HTTP request head.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Realm announced in `WWW-Authenticate` on failed authentication.
pub const AUTH_REALM: &str = "Minaret WebSocket";

/// Body of the plaintext answer given to non-upgrade GET requests.
pub const INFORMATIONAL_BODY: &str = "WebSocket endpoint - use WebSocket client";

/// Errors raised while encoding frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Payload of {0} bytes exceeds the 65535 byte frame limit")]
    PayloadTooLarge(usize),
}

/// Frame opcodes handled by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Text,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    /// Maps the low nibble of a frame's first byte, `None` for opcodes the
    /// bridge does not handle.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x1 => Some(Opcode::Text),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    /// The wire value of this opcode.
    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Text => 0x1,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }
}

/// A decoded frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    pub fn close() -> Self {
        Self::new(Opcode::Close, Vec::new())
    }
}

/// Outcome of [`parse_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The buffer does not hold a whole frame yet; read more and retry.
    Incomplete,
    /// A complete frame, plus how many buffer bytes it occupied.
    Frame(Frame, usize),
    /// A complete frame with an opcode the bridge does not handle.
    Unsupported { opcode: u8, consumed: usize },
}

// ============================================================================
// HTTP handshake
// ============================================================================

/// Reads the HTTP request head of a freshly accepted socket.
///
/// Header names are folded to lower case and values are trimmed. Reading
/// stops at the first blank line.
///
/// # Returns
///
/// * `Ok(None)` if the stream ended before a request line or the request is
///   not a `GET`
/// * `Ok(Some(headers))` otherwise
/// * `Err` on I/O failure, or `InvalidData` if the head exceeds
///   [`MAX_HEADER_BYTES`]
pub async fn read_http_headers<R>(reader: &mut R) -> io::Result<Option<HashMap<String, String>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut limited = reader.take(MAX_HEADER_BYTES as u64);
    let mut line = String::new();

    if limited.read_line(&mut line).await? == 0 || !line.starts_with("GET") {
        return Ok(None);
    }

    let mut headers = HashMap::new();
    loop {
        line.clear();
        if limited.read_line(&mut line).await? == 0 {
            if limited.limit() == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "HTTP request head too large",
                ));
            }
            break;
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    Ok(Some(headers))
}

/// True iff the headers ask for a WebSocket upgrade.
pub fn is_websocket_upgrade(headers: &HashMap<String, String>) -> bool {
    let header_is = |name: &str, expected: &str| {
        headers
            .get(name)
            .is_some_and(|value| value.eq_ignore_ascii_case(expected))
    };
    header_is("upgrade", "websocket")
        && header_is("connection", "upgrade")
        && headers.contains_key("sec-websocket-key")
}

/// Computes `Sec-WebSocket-Accept` for a client's `Sec-WebSocket-Key`.
pub fn generate_accept_key(client_key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(client_key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Decodes an `Authorization: Basic <base64(user:pass)>` header value.
///
/// Returns `None` for any other scheme or a malformed value.
pub fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = BASE64_STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// The `101 Switching Protocols` response completing the upgrade.
pub fn switching_protocols(accept_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept_key}\r\n\
         \r\n"
    )
}

/// The `401 Unauthorized` response with a Basic challenge for [`AUTH_REALM`].
pub fn unauthorized() -> String {
    let body = "Unauthorized";
    format!(
        "HTTP/1.1 401 Unauthorized\r\n\
         WWW-Authenticate: Basic realm=\"{AUTH_REALM}\"\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {body}",
        body.len()
    )
}

/// The `200 OK` plain-text response for non-WebSocket requests.
pub fn informational() -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {INFORMATIONAL_BODY}",
        INFORMATIONAL_BODY.len()
    )
}

// ============================================================================
// Frames
// ============================================================================

/// Decodes the frame at the start of `data`.
///
/// Masked payloads are unmasked with `payload[i] ^= mask[i % 4]`. A frame
/// declaring the 64-bit length form is answered with a synthetic Close that
/// consumes the whole buffer, since the connection is about to end anyway.
pub fn parse_frame(data: &[u8]) -> Decoded {
    if data.len() < 2 {
        return Decoded::Incomplete;
    }

    let raw_opcode = data[0] & OPCODE_MASK;
    let masked = (data[1] & MASK_BIT) != 0;
    let base_len = data[1] & PAYLOAD_LEN_MASK;
    let mut offset = 2;

    let payload_len = match base_len {
        PAYLOAD_LEN_16BIT => {
            if data.len() < 4 {
                return Decoded::Incomplete;
            }
            offset = 4;
            usize::from(u16::from_be_bytes([data[2], data[3]]))
        }
        PAYLOAD_LEN_64BIT => return Decoded::Frame(Frame::close(), data.len()),
        len => usize::from(len),
    };

    let mask = if masked {
        if data.len() < offset + MASK_KEY_LENGTH {
            return Decoded::Incomplete;
        }
        let key = [data[offset], data[offset + 1], data[offset + 2], data[offset + 3]];
        offset += MASK_KEY_LENGTH;
        Some(key)
    } else {
        None
    };

    let end = offset + payload_len;
    if data.len() < end {
        return Decoded::Incomplete;
    }

    let Some(opcode) = Opcode::from_u8(raw_opcode) else {
        return Decoded::Unsupported {
            opcode: raw_opcode,
            consumed: end,
        };
    };

    let mut payload = data[offset..end].to_vec();
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }
    Decoded::Frame(Frame { opcode, payload }, end)
}

/// Builds an unmasked server-to-client frame.
pub fn build_frame(opcode: Opcode, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    encode(opcode, payload, None)
}

/// Builds a masked client-to-server frame.
pub fn build_client_frame(opcode: Opcode, payload: &[u8], mask: [u8; 4]) -> Result<Vec<u8>, ProtocolError> {
    encode(opcode, payload, Some(mask))
}

/// XORs `payload` in place with the cyclic 4-byte `mask`. Applying the same
/// mask twice restores the original bytes.
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % MASK_KEY_LENGTH];
    }
}

fn encode(opcode: Opcode, payload: &[u8], mask: Option<[u8; 4]>) -> Result<Vec<u8>, ProtocolError> {
    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.push(FIN_BIT | opcode.as_u8());

    match u16::try_from(payload.len()) {
        Ok(len) if len < u16::from(PAYLOAD_LEN_16BIT) => frame.push(mask_bit | len as u8),
        Ok(len) => {
            frame.push(mask_bit | PAYLOAD_LEN_16BIT);
            frame.extend_from_slice(&len.to_be_bytes());
        }
        Err(_) => return Err(ProtocolError::PayloadTooLarge(payload.len())),
    }

    match mask {
        Some(key) => {
            frame.extend_from_slice(&key);
            let start = frame.len();
            frame.extend_from_slice(payload);
            apply_mask(&mut frame[start..], key);
        }
        None => frame.extend_from_slice(payload),
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    #[test]
    fn test_accept_key_matches_rfc_example() {
        assert_eq!(
            generate_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_rfc_masked_hello() {
        // RFC 6455 section 5.7: a single-frame masked text message "Hello".
        let wire = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        assert_eq!(
            parse_frame(&wire),
            Decoded::Frame(Frame::new(Opcode::Text, "Hello"), wire.len())
        );
        assert_eq!(build_client_frame(Opcode::Text, b"Hello", MASK).unwrap(), wire);
    }

    #[test]
    fn test_server_frames_are_unmasked() {
        assert_eq!(
            build_frame(Opcode::Text, b"Hello").unwrap(),
            [0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]
        );
        assert_eq!(build_frame(Opcode::Close, &[]).unwrap(), [0x88, 0x00]);
    }

    #[test]
    fn test_frame_round_trip_across_length_forms() {
        for len in [0usize, 1, 125, 126, 127, 4096, MAX_PAYLOAD_LEN] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let wire = build_client_frame(Opcode::Text, &payload, MASK).unwrap();
            let expected_header = if len < 126 { 6 } else { 8 };
            assert_eq!(wire.len(), expected_header + len);
            assert_eq!(
                parse_frame(&wire),
                Decoded::Frame(Frame::new(Opcode::Text, payload), wire.len()),
                "length {len}"
            );
        }
    }

    #[test]
    fn test_unmasked_frames_decode() {
        let wire = build_frame(Opcode::Ping, b"abc").unwrap();
        assert_eq!(
            parse_frame(&wire),
            Decoded::Frame(Frame::new(Opcode::Ping, "abc"), 5)
        );
    }

    #[test]
    fn test_masking_twice_restores_payload() {
        let original = b"masking is its own inverse".to_vec();
        let mut payload = original.clone();
        apply_mask(&mut payload, MASK);
        assert_ne!(payload, original);
        apply_mask(&mut payload, MASK);
        assert_eq!(payload, original);
    }

    #[test]
    fn test_64bit_length_is_rejected_with_close() {
        let mut wire = vec![0x81, 0x80 | 127];
        wire.extend_from_slice(&70_000u64.to_be_bytes());
        wire.extend_from_slice(&MASK);
        assert_eq!(parse_frame(&wire), Decoded::Frame(Frame::close(), wire.len()));
        // Even the bare header is enough to reject.
        assert_eq!(parse_frame(&[0x81, 127]), Decoded::Frame(Frame::close(), 2));
    }

    #[test]
    fn test_truncated_frames_are_incomplete() {
        let wire = build_client_frame(Opcode::Text, &[7u8; 300], MASK).unwrap();
        for cut in [0, 1, 2, 3, 5, 7, 8, 100, wire.len() - 1] {
            assert_eq!(parse_frame(&wire[..cut]), Decoded::Incomplete, "cut at {cut}");
        }
    }

    #[test]
    fn test_trailing_bytes_are_left_for_next_frame() {
        let mut wire = build_client_frame(Opcode::Text, b"one", MASK).unwrap();
        let first_len = wire.len();
        wire.extend(build_client_frame(Opcode::Text, b"two", MASK).unwrap());
        let Decoded::Frame(first, consumed) = parse_frame(&wire) else {
            panic!("expected a frame");
        };
        assert_eq!(first.payload, b"one");
        assert_eq!(consumed, first_len);
        assert_eq!(
            parse_frame(&wire[consumed..]),
            Decoded::Frame(Frame::new(Opcode::Text, "two"), wire.len() - first_len)
        );
    }

    #[test]
    fn test_unsupported_opcode_is_reported() {
        // Binary frame (0x2) with a 3 byte masked payload.
        let mut wire = vec![0x82, 0x83];
        wire.extend_from_slice(&MASK);
        wire.extend_from_slice(&[1, 2, 3]);
        assert_eq!(
            parse_frame(&wire),
            Decoded::Unsupported {
                opcode: 0x2,
                consumed: 9
            }
        );
    }

    #[test]
    fn test_oversize_payload_cannot_be_built() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            build_frame(Opcode::Text, &payload),
            Err(ProtocolError::PayloadTooLarge(MAX_PAYLOAD_LEN + 1))
        );
    }

    #[tokio::test]
    async fn test_read_http_headers() {
        let request = b"GET /chat HTTP/1.1\r\n\
            Host: localhost:8765\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            X-Odd:no-space\r\n\
            \r\n\
            trailing frame bytes";
        let mut reader = &request[..];
        let headers = read_http_headers(&mut reader).await.unwrap().unwrap();
        assert_eq!(headers.get("host").map(String::as_str), Some("localhost:8765"));
        assert_eq!(headers.get("upgrade").map(String::as_str), Some("websocket"));
        assert_eq!(headers.get("x-odd").map(String::as_str), Some("no-space"));
        assert!(is_websocket_upgrade(&headers));
        assert_eq!(reader, b"trailing frame bytes");
    }

    #[tokio::test]
    async fn test_non_get_request_is_ignored() {
        let mut reader = &b"POST / HTTP/1.1\r\nHost: x\r\n\r\n"[..];
        assert!(read_http_headers(&mut reader).await.unwrap().is_none());
        let mut empty = &b""[..];
        assert!(read_http_headers(&mut empty).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_head_is_rejected() {
        let mut request = b"GET / HTTP/1.1\r\n".to_vec();
        while request.len() <= MAX_HEADER_BYTES {
            request.extend_from_slice(b"X-Filler: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n");
        }
        let mut reader = &request[..];
        let err = read_http_headers(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_upgrade_detection() {
        let mut headers: HashMap<String, String> = [
            ("upgrade", "WebSocket"),
            ("connection", "UPGRADE"),
            ("sec-websocket-key", "abc"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert!(is_websocket_upgrade(&headers));

        headers.insert("connection".to_string(), "keep-alive".to_string());
        assert!(!is_websocket_upgrade(&headers));

        headers.insert("connection".to_string(), "upgrade".to_string());
        headers.remove("sec-websocket-key");
        assert!(!is_websocket_upgrade(&headers));
    }

    #[test]
    fn test_parse_basic_auth() {
        // "admin:s3cr:et" - only the first colon separates the password.
        let header = format!("Basic {}", BASE64_STANDARD.encode("admin:s3cr:et"));
        assert_eq!(
            parse_basic_auth(&header),
            Some(("admin".to_string(), "s3cr:et".to_string()))
        );
        assert_eq!(parse_basic_auth("Bearer abc"), None);
        assert_eq!(parse_basic_auth("Basic !!!"), None);
        let no_colon = format!("Basic {}", BASE64_STANDARD.encode("admin"));
        assert_eq!(parse_basic_auth(&no_colon), None);
    }

    #[test]
    fn test_http_responses() {
        assert!(switching_protocols("xyz").contains("Sec-WebSocket-Accept: xyz\r\n\r\n"));
        let denied = unauthorized();
        assert!(denied.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(denied.contains("WWW-Authenticate: Basic realm=\"Minaret WebSocket\""));
        assert!(denied.ends_with("\r\n\r\nUnauthorized"));
        assert!(informational().contains("Content-Length: 41\r\n"));
    }
}
