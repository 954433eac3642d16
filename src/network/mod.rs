//! Network Module Implementation
//!
//! Connection handling for the server: framing, per-connection sessions and
//! the registry that owns them.
//!
//! # Architecture
//!
//! Built on tokio's async I/O primitives:
//! - `codec`: little-endian primitives and frame encoding
//! - `FrameDecoder`: streaming parser tolerant of arbitrary TCP fragmentation
//! - `SessionHandle` / `SessionContext`: one connection, served by a receive
//!   task and a send task joined by a bounded outbound queue
//! - `SessionRegistry`: id allocation, membership and two-phase shutdown
//! - `FrameHandler`: dispatch extension point, `PingPongHandler` by default
//!
//! # Error policy
//!
//! Protocol violations and I/O failures end the affected session only; nothing
//! here is fatal to the process.

pub mod codec;
mod frame;
mod message;
mod registry;
mod session;

pub use codec::{
    encode_frame, MessageId, FRAME_HEADER_SIZE, MAX_FRAME_TOTAL, MAX_RECV_BUFFER,
    WIRE_FRAME_LIMIT,
};
pub use frame::{Frame, FrameDecoder, FrameError};
pub use message::{FrameHandler, Ping, PingPongHandler, Pong, C_PING, S_PONG};
pub use registry::SessionRegistry;
pub use session::{SessionContext, SessionHandle, SessionId};
