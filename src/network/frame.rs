use bytes::{Buf, Bytes, BytesMut};

use super::codec::{
    read_u16_le, MessageId, FRAME_HEADER_SIZE, LENGTH_FIELD_SIZE, MAX_FRAME_TOTAL,
    MAX_RECV_BUFFER, MESSAGE_ID_SIZE,
};

/// One decoded message. Lives only between the decoder and dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_id: MessageId,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame length {0} cannot hold a message id")]
    LengthTooSmall(u16),

    #[error("frame of {total} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { total: usize, limit: usize },

    #[error("receive buffer overflow: {buffered} buffered + {incoming} incoming > {limit}")]
    BufferOverflow {
        buffered: usize,
        incoming: usize,
        limit: usize,
    },
}

/// Streaming frame parser.
///
/// Bytes are accumulated with [`FrameDecoder::append`] and complete frames are
/// taken off the front with [`FrameDecoder::try_pop_frame`]. A partial frame is
/// never consumed, so reads may split or coalesce frames arbitrarily.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    last_error: Option<FrameError>,
    max_frame_total: usize,
    max_recv_buffer: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        FrameDecoder::new(MAX_FRAME_TOTAL, MAX_RECV_BUFFER)
    }
}

impl FrameDecoder {
    pub fn new(max_frame_total: usize, max_recv_buffer: usize) -> Self {
        FrameDecoder {
            buffer: BytesMut::with_capacity(max_frame_total.min(max_recv_buffer)),
            last_error: None,
            max_frame_total,
            max_recv_buffer,
        }
    }

    /// Appends received bytes. On overflow the buffer is left untouched and the
    /// connection is beyond recovery.
    pub fn append(&mut self, data: &[u8]) -> Result<(), FrameError> {
        if data.is_empty() {
            return Ok(());
        }
        if self.buffer.len() + data.len() > self.max_recv_buffer {
            return Err(self.fail(FrameError::BufferOverflow {
                buffered: self.buffer.len(),
                incoming: data.len(),
                limit: self.max_recv_buffer,
            }));
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Takes the next complete frame off the buffer.
    ///
    /// `Ok(None)` means more bytes are needed. Nothing is consumed unless a
    /// whole frame is returned.
    pub fn try_pop_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let Some(length) = read_u16_le(&self.buffer, 0) else {
            return Ok(None);
        };
        if (length as usize) < MESSAGE_ID_SIZE {
            return Err(self.fail(FrameError::LengthTooSmall(length)));
        }
        let total = LENGTH_FIELD_SIZE + length as usize;
        if total > self.max_frame_total {
            return Err(self.fail(FrameError::FrameTooLarge {
                total,
                limit: self.max_frame_total,
            }));
        }
        if self.buffer.len() < total {
            return Ok(None);
        }

        self.buffer.advance(LENGTH_FIELD_SIZE);
        let message_id = self.buffer.get_u16_le();
        let payload = self.buffer.split_to(total - FRAME_HEADER_SIZE).freeze();
        Ok(Some(Frame {
            message_id,
            payload,
        }))
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.last_error = None;
    }

    pub fn buffered_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn last_error(&self) -> Option<&FrameError> {
        self.last_error.as_ref()
    }

    fn fail(&mut self, err: FrameError) -> FrameError {
        self.last_error = Some(err.clone());
        err
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;
    use rstest::rstest;

    use super::*;
    use crate::network::codec::encode_frame;

    fn sample_frames() -> Vec<Frame> {
        vec![
            Frame {
                message_id: 1101,
                payload: Bytes::from_static(&[0x40, 0xE2, 0x01, 0x00]),
            },
            Frame {
                message_id: 7,
                payload: Bytes::new(),
            },
            Frame {
                message_id: 1200,
                payload: Bytes::from(vec![7u8; 300]),
            },
            Frame {
                message_id: u16::MAX,
                payload: Bytes::from(vec![0xEE; MAX_FRAME_TOTAL - FRAME_HEADER_SIZE]),
            },
        ]
    }

    fn concat(frames: &[Frame]) -> Vec<u8> {
        frames
            .iter()
            .flat_map(|f| encode_frame(f.message_id, &f.payload).to_vec())
            .collect()
    }

    fn drain(decoder: &mut FrameDecoder, out: &mut Vec<Frame>) {
        while let Some(frame) = decoder.try_pop_frame().expect("valid stream") {
            out.push(frame);
        }
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    #[case(5)]
    #[case(64)]
    #[case(4097)]
    #[case(usize::MAX)]
    fn test_fixed_chunk_sizes(#[case] chunk: usize) {
        let frames = sample_frames();
        let stream = concat(&frames);
        let mut decoder = FrameDecoder::default();
        let mut decoded = Vec::new();
        for piece in stream.chunks(chunk.min(stream.len())) {
            decoder.append(piece).unwrap();
            drain(&mut decoder, &mut decoded);
        }
        assert_eq!(decoded, frames);
        assert_eq!(decoder.buffered_size(), 0);
    }

    #[test]
    fn test_random_split_points() {
        let frames = sample_frames();
        let stream = concat(&frames);
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let mut decoder = FrameDecoder::default();
            let mut decoded = Vec::new();
            let mut offset = 0;
            while offset < stream.len() {
                let step = rng.gen_range(1..=(stream.len() - offset).min(700));
                decoder.append(&stream[offset..offset + step]).unwrap();
                drain(&mut decoder, &mut decoded);
                offset += step;
            }
            assert_eq!(decoded, frames);
        }
    }

    #[test]
    fn test_frame_split_across_appends() {
        let frame = encode_frame(1200, &[7, 7, 7, 7, 7]);
        let half = frame.len() / 2;
        let mut decoder = FrameDecoder::default();

        decoder.append(&frame[..half]).unwrap();
        assert_eq!(decoder.try_pop_frame(), Ok(None));
        assert_eq!(decoder.buffered_size(), half);

        decoder.append(&frame[half..]).unwrap();
        let popped = decoder.try_pop_frame().unwrap().unwrap();
        assert_eq!(popped.message_id, 1200);
        assert_eq!(&popped.payload[..], &[7, 7, 7, 7, 7]);
    }

    #[test]
    fn test_coalesced_frames_keep_trailing_bytes() {
        let mut bytes = concat(&sample_frames()[..2]);
        bytes.extend_from_slice(&[0x06, 0x00, 0x4D]);
        let mut decoder = FrameDecoder::default();
        decoder.append(&bytes).unwrap();

        assert_eq!(decoder.try_pop_frame().unwrap().unwrap().message_id, 1101);
        assert_eq!(decoder.try_pop_frame().unwrap().unwrap().message_id, 7);
        assert_eq!(decoder.try_pop_frame(), Ok(None));
        assert_eq!(decoder.buffered_size(), 3);
    }

    #[test]
    fn test_length_too_small() {
        let mut decoder = FrameDecoder::default();
        decoder.append(&[0x01, 0x00, 0xFF]).unwrap();
        assert_eq!(decoder.try_pop_frame(), Err(FrameError::LengthTooSmall(1)));
        assert_eq!(decoder.last_error(), Some(&FrameError::LengthTooSmall(1)));
        assert_eq!(decoder.buffered_size(), 3);
    }

    #[test]
    fn test_frame_too_large_consumes_nothing() {
        let mut decoder = FrameDecoder::default();
        // 2 + 4095 = 4097 > 4096
        decoder.append(&[0xFF, 0x0F, 0x01, 0x00]).unwrap();
        assert_eq!(
            decoder.try_pop_frame(),
            Err(FrameError::FrameTooLarge {
                total: 4097,
                limit: MAX_FRAME_TOTAL
            })
        );
        assert_eq!(decoder.buffered_size(), 4);
    }

    #[test]
    fn test_largest_frame_is_accepted() {
        let mut decoder = FrameDecoder::default();
        let frame = encode_frame(1, &vec![0u8; MAX_FRAME_TOTAL - FRAME_HEADER_SIZE]);
        assert_eq!(frame.len(), MAX_FRAME_TOTAL);
        decoder.append(&frame).unwrap();
        assert!(decoder.try_pop_frame().unwrap().is_some());
    }

    #[test]
    fn test_buffer_overflow_leaves_buffer_unchanged() {
        let mut decoder = FrameDecoder::default();
        let block = vec![0u8; MAX_RECV_BUFFER - 10];
        decoder.append(&block).unwrap();
        let err = decoder.append(&[0u8; 11]).unwrap_err();
        assert_eq!(
            err,
            FrameError::BufferOverflow {
                buffered: MAX_RECV_BUFFER - 10,
                incoming: 11,
                limit: MAX_RECV_BUFFER
            }
        );
        assert_eq!(decoder.buffered_size(), MAX_RECV_BUFFER - 10);
        decoder.append(&[0u8; 10]).unwrap();
        assert_eq!(decoder.buffered_size(), MAX_RECV_BUFFER);
    }

    #[test]
    fn test_clear_resets_state() {
        let mut decoder = FrameDecoder::default();
        decoder.append(&[0x01, 0x00, 0x05]).unwrap();
        assert!(decoder.try_pop_frame().is_err());
        decoder.clear();
        assert_eq!(decoder.buffered_size(), 0);
        assert_eq!(decoder.last_error(), None);
        assert_eq!(decoder.try_pop_frame(), Ok(None));
    }

    #[test]
    fn test_single_byte_needs_more() {
        let mut decoder = FrameDecoder::default();
        decoder.append(&[0x06]).unwrap();
        assert_eq!(decoder.try_pop_frame(), Ok(None));
        decoder.append(&[]).unwrap();
        assert_eq!(decoder.buffered_size(), 1);
    }
}
