//! Wire codec
//!
//! Frame layout on the wire, all integers little-endian:
//!
//! ```text
//! +----------------+-----------------+----------------------+
//! | length: u16    | message_id: u16 | payload: length - 2  |
//! +----------------+-----------------+----------------------+
//! ```
//!
//! `length` counts the message id and the payload, never itself.

use bytes::{BufMut, Bytes, BytesMut};

/// Size of the length prefix.
pub const LENGTH_FIELD_SIZE: usize = 2;
/// Size of the message id that follows the length prefix.
pub const MESSAGE_ID_SIZE: usize = 2;
/// Length prefix plus message id.
pub const FRAME_HEADER_SIZE: usize = LENGTH_FIELD_SIZE + MESSAGE_ID_SIZE;
/// Default ceiling for a whole frame, length prefix included.
pub const MAX_FRAME_TOTAL: usize = 4096;
/// Default ceiling for undecoded bytes buffered per connection.
pub const MAX_RECV_BUFFER: usize = 64 * 1024;
/// Largest whole frame a u16 length prefix can describe.
pub const WIRE_FRAME_LIMIT: usize = LENGTH_FIELD_SIZE + u16::MAX as usize;

pub type MessageId = u16;

/// Reads a little-endian u16 at `offset`. `None` when the slice is too short.
pub fn read_u16_le(src: &[u8], offset: usize) -> Option<u16> {
    let bytes = src.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Reads a little-endian u32 at `offset`. `None` when the slice is too short.
pub fn read_u32_le(src: &[u8], offset: usize) -> Option<u32> {
    let bytes = src.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn write_u16_le(dst: &mut BytesMut, value: u16) {
    dst.put_u16_le(value);
}

pub fn write_u32_le(dst: &mut BytesMut, value: u32) {
    dst.put_u32_le(value);
}

/// Total encoded size of a frame carrying `payload_len` bytes.
pub fn frame_size(payload_len: usize) -> usize {
    FRAME_HEADER_SIZE + payload_len
}

/// Appends one encoded frame to `dst`.
///
/// The caller guarantees `payload.len() + 2` fits in the u16 length prefix;
/// the session layer checks this against its configured frame ceiling before
/// it gets here.
pub fn put_frame(dst: &mut BytesMut, message_id: MessageId, payload: &[u8]) {
    debug_assert!(frame_size(payload.len()) <= WIRE_FRAME_LIMIT);
    let length = (MESSAGE_ID_SIZE + payload.len()) as u16;
    dst.reserve(frame_size(payload.len()));
    write_u16_le(dst, length);
    write_u16_le(dst, message_id);
    dst.put_slice(payload);
}

/// Encodes one frame into a freshly allocated buffer.
pub fn encode_frame(message_id: MessageId, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(frame_size(payload.len()));
    put_frame(&mut buf, message_id, payload);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_ping_frame() {
        let mut payload = BytesMut::new();
        write_u32_le(&mut payload, 123_456);
        let frame = encode_frame(1101, &payload);
        assert_eq!(
            &frame[..],
            &[0x06, 0x00, 0x4D, 0x04, 0x40, 0xE2, 0x01, 0x00]
        );
    }

    #[test]
    fn test_empty_payload_has_length_two() {
        let frame = encode_frame(0xABCD, &[]);
        assert_eq!(&frame[..], &[0x02, 0x00, 0xCD, 0xAB]);
    }

    #[test]
    fn test_read_primitives() {
        let src = [0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        assert_eq!(read_u16_le(&src, 0), Some(0x1234));
        assert_eq!(read_u32_le(&src, 2), Some(0x1234_5678));
        assert_eq!(read_u16_le(&src, 5), None);
        assert_eq!(read_u32_le(&src, 3), None);
    }

    #[test]
    fn test_put_frame_appends() {
        let mut buf = BytesMut::new();
        put_frame(&mut buf, 1, &[0xAA]);
        put_frame(&mut buf, 2, &[]);
        assert_eq!(&buf[..], &[0x03, 0x00, 0x01, 0x00, 0xAA, 0x02, 0x00, 0x02, 0x00]);
    }
}
