//! Wire-level data model shared by the courier client and daemon.
//!
//! A [`Request`] names a dispatch target and carries its arguments together
//! with the caller's correlation id and call-chain metadata. The daemon
//! answers each accepted request with exactly one [`Response`] that echoes
//! the correlation and chain fields. Failures travel as a [`Failure`] tagged
//! with a [`FailureKind`] so callers can tell a bad request from a service
//! that raised an error.
//!
//! Messages are framed as JSON Lines by the [`codec`] module: one object per
//! `\n`-terminated line.

pub mod chain;
pub mod codec;
mod request;
mod response;

pub use self::chain::{ChainContext, ChainScope};
pub use self::codec::{CodecError, FrameReader, MAX_FRAME_BYTES};
pub use self::request::{Request, RequestKind};
pub use self::response::{Failure, FailureKind, HEARTBEAT_REQUEST_ID, PING_RESULT, Response};
