// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Message dispatch.
//!
//! Every decoded [`Frame`] goes through a [`FrameHandler`]. A handler error
//! terminates the connection it came from, so an unknown message id or a
//! payload of the wrong shape never goes unnoticed.

use bytes::BytesMut;
use tracing::trace;

use super::codec::{read_u32_le, write_u32_le, MessageId};
use super::session::SessionContext;
use super::Frame;
use crate::{AppError, AppResult};

/// Client ping, payload is a u32 sequence number.
pub const C_PING: MessageId = 1101;
/// Server pong, echoes the ping's sequence number.
pub const S_PONG: MessageId = 1102;

pub trait FrameHandler: Send + Sync + 'static {
    /// Handles one frame received on `session`. Returning an error closes the
    /// connection.
    fn handle(&self, frame: Frame, session: &SessionContext) -> AppResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub seq: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    pub seq: u32,
}

impl Ping {
    pub const PAYLOAD_SIZE: usize = 4;

    pub fn decode(payload: &[u8]) -> AppResult<Ping> {
        if payload.len() != Self::PAYLOAD_SIZE {
            return Err(AppError::MalformedPayload(format!(
                "ping payload must be {} bytes, got {}",
                Self::PAYLOAD_SIZE,
                payload.len()
            )));
        }
        // length checked above
        let seq = read_u32_le(payload, 0).unwrap_or_default();
        Ok(Ping { seq })
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::PAYLOAD_SIZE);
        write_u32_le(&mut buf, self.seq);
        buf
    }
}

impl Pong {
    pub fn decode(payload: &[u8]) -> AppResult<Pong> {
        let Ping { seq } = Ping::decode(payload).map_err(|_| {
            AppError::MalformedPayload(format!(
                "pong payload must be 4 bytes, got {}",
                payload.len()
            ))
        })?;
        Ok(Pong { seq })
    }

    pub fn encode(&self) -> BytesMut {
        Ping { seq: self.seq }.encode()
    }
}

/// Default dispatch table: answers pings, rejects everything else.
#[derive(Debug, Default, Clone, Copy)]
pub struct PingPongHandler;

impl FrameHandler for PingPongHandler {
    fn handle(&self, frame: Frame, session: &SessionContext) -> AppResult<()> {
        match frame.message_id {
            C_PING => {
                let ping = Ping::decode(&frame.payload)?;
                trace!(session_id = session.id(), seq = ping.seq, "ping");
                session.send_frame(S_PONG, &Pong { seq: ping.seq }.encode())
            }
            unknown => Err(AppError::UnknownMessage(unknown)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_decode() {
        let ping = Ping::decode(&[0x40, 0xE2, 0x01, 0x00]).unwrap();
        assert_eq!(ping.seq, 123_456);
        assert_eq!(&ping.encode()[..], &[0x40, 0xE2, 0x01, 0x00]);
    }

    #[test]
    fn test_ping_wrong_length_is_malformed() {
        for payload in [&[][..], &[1, 2, 3][..], &[1, 2, 3, 4, 5][..]] {
            assert!(matches!(
                Ping::decode(payload),
                Err(AppError::MalformedPayload(_))
            ));
        }
    }

    #[test]
    fn test_pong_roundtrip_keeps_seq() {
        let pong = Pong { seq: u32::MAX };
        assert_eq!(Pong::decode(&pong.encode()).unwrap(), pong);
    }
}
