//! Length-prefixed frame codec.
//!
//! Frame layout on the byte stream: a 4-byte little-endian unsigned
//! length `L`, followed by `L` bytes of UTF-8 JSON. Frames larger than
//! 16 MB, invalid UTF-8, malformed JSON, and structurally invalid
//! messages are all rejected as `bad_frame`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NetError;
use crate::message::WireMessage;

/// Maximum accepted frame body length: 16 MB.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encode a message into a complete frame (prefix + body).
///
/// # Errors
///
/// Returns [`NetError::Serialization`] if JSON encoding fails and
/// [`NetError::FrameTooLarge`] if the body exceeds [`MAX_FRAME_LEN`].
pub fn encode(message: &WireMessage) -> Result<Vec<u8>, NetError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(NetError::FrameTooLarge(body.len()));
    }
    let len = u32::try_from(body.len()).map_err(|_| NetError::FrameTooLarge(body.len()))?;
    let mut frame = Vec::with_capacity(body.len().saturating_add(4));
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode one complete frame (prefix + body) from a byte slice.
///
/// # Errors
///
/// Returns [`NetError::BadFrame`] for truncated input, oversized
/// lengths, invalid UTF-8, malformed JSON, or structurally invalid
/// messages.
pub fn decode(frame: &[u8]) -> Result<WireMessage, NetError> {
    let (prefix, body) = frame
        .split_at_checked(4)
        .ok_or_else(|| NetError::BadFrame(String::from("frame shorter than length prefix")))?;
    let mut len_bytes = [0_u8; 4];
    len_bytes.copy_from_slice(prefix);
    let len = usize::try_from(u32::from_le_bytes(len_bytes))
        .map_err(|_| NetError::BadFrame(String::from("length prefix overflow")))?;
    if len > MAX_FRAME_LEN {
        return Err(NetError::BadFrame(format!("frame length {len} exceeds cap")));
    }
    if body.len() != len {
        return Err(NetError::BadFrame(format!(
            "frame body is {} bytes, prefix says {len}",
            body.len()
        )));
    }
    parse_body(body)
}

/// Read one frame from an async stream.
///
/// Returns `Ok(None)` on a clean end-of-stream at a frame boundary.
///
/// # Errors
///
/// Returns [`NetError::BadFrame`] for protocol violations and
/// [`NetError::Io`] for socket failures.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<WireMessage>, NetError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32_le().await {
        Ok(len) => len,
        Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(error) => return Err(NetError::Io(error)),
    };

    let len = usize::try_from(len)
        .map_err(|_| NetError::BadFrame(String::from("length prefix overflow")))?;
    if len > MAX_FRAME_LEN {
        return Err(NetError::BadFrame(format!("frame length {len} exceeds cap")));
    }

    let mut body = vec![0_u8; len];
    reader.read_exact(&mut body).await?;
    parse_body(&body).map(Some)
}

/// Write one frame to an async stream.
///
/// # Errors
///
/// Returns [`NetError::Serialization`], [`NetError::FrameTooLarge`], or
/// [`NetError::Io`].
pub async fn write_frame<W>(writer: &mut W, message: &WireMessage) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Parse and validate a frame body.
fn parse_body(body: &[u8]) -> Result<WireMessage, NetError> {
    let text = core::str::from_utf8(body)
        .map_err(|error| NetError::BadFrame(format!("invalid UTF-8: {error}")))?;
    let message: WireMessage = serde_json::from_str(text)
        .map_err(|error| NetError::BadFrame(format!("malformed JSON: {error}")))?;
    if !message.is_structurally_valid() {
        return Err(NetError::BadFrame(String::from(
            "missing mandatory field for message kind",
        )));
    }
    Ok(message)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use crate::error::ErrorKind;

    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let messages = [
            WireMessage::heartbeat(),
            WireMessage::request("req-1", "get_status", None),
            WireMessage::response_ok(
                "req-1",
                "get_status",
                Some(serde_json::json!({"ai_status": []})),
            ),
            WireMessage::response_error("req-2", "ai_command", ErrorKind::NotFound, None),
            WireMessage::notification("battle_event", serde_json::json!({"damage": 77})),
        ];
        for message in messages {
            let frame = encode(&message).unwrap();
            assert_eq!(decode(&frame).unwrap(), message);
        }
    }

    #[test]
    fn prefix_is_little_endian() {
        let frame = encode(&WireMessage::heartbeat()).unwrap();
        let body_len = frame.len() - 4;
        let expected = u32::try_from(body_len).unwrap().to_le_bytes();
        assert_eq!(&frame[..4], &expected);
    }

    #[test]
    fn oversized_length_is_bad_frame() {
        let mut frame = Vec::new();
        let huge = u32::try_from(MAX_FRAME_LEN + 1).unwrap();
        frame.extend_from_slice(&huge.to_le_bytes());
        assert!(matches!(decode(&frame), Err(NetError::BadFrame(_))));
    }

    #[test]
    fn invalid_utf8_is_bad_frame() {
        let body = [0xFF_u8, 0xFE, 0xFD];
        let mut frame = Vec::new();
        frame.extend_from_slice(&3_u32.to_le_bytes());
        frame.extend_from_slice(&body);
        assert!(matches!(decode(&frame), Err(NetError::BadFrame(_))));
    }

    #[test]
    fn malformed_json_is_bad_frame() {
        let body = b"{not json";
        let mut frame = Vec::new();
        frame.extend_from_slice(&u32::try_from(body.len()).unwrap().to_le_bytes());
        frame.extend_from_slice(body);
        assert!(matches!(decode(&frame), Err(NetError::BadFrame(_))));
    }

    #[test]
    fn request_without_cmd_is_bad_frame() {
        let body = br#"{"kind":"request","request_id":"r1","timestamp":0}"#;
        let mut frame = Vec::new();
        frame.extend_from_slice(&u32::try_from(body.len()).unwrap().to_le_bytes());
        frame.extend_from_slice(body);
        assert!(matches!(decode(&frame), Err(NetError::BadFrame(_))));
    }

    #[test]
    fn truncated_body_is_bad_frame() {
        let good = encode(&WireMessage::heartbeat()).unwrap();
        let truncated = &good[..good.len() - 2];
        assert!(matches!(decode(truncated), Err(NetError::BadFrame(_))));
    }

    #[tokio::test]
    async fn async_read_write_roundtrip() {
        let message = WireMessage::request("req-7", "spawn_ai", Some(serde_json::json!({})));
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &message).await.unwrap();

        let mut cursor = std::io::Cursor::new(buffer);
        let back = read_frame(&mut cursor).await.unwrap();
        assert_eq!(back, Some(message));

        // A second read hits clean EOF.
        let eof = read_frame(&mut cursor).await.unwrap();
        assert_eq!(eof, None);
    }

    #[tokio::test]
    async fn async_read_rejects_oversized_frame() {
        let mut buffer = Vec::new();
        let huge = u32::try_from(MAX_FRAME_LEN + 1).unwrap();
        buffer.extend_from_slice(&huge.to_le_bytes());
        let mut cursor = std::io::Cursor::new(buffer);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(NetError::BadFrame(_))
        ));
    }
}
