//! th-protocol: Event protocol for termhost connections
//!
//! This crate defines the events exchanged between a peer (terminal front-end
//! or the `termhost` CLI) and the session orchestrator, and the
//! newline-delimited JSON codec used to frame them on a byte stream.

pub mod codec;
pub mod error;
pub mod event;

pub use codec::{
    ClientCodec, Frame, JsonLinesCodec, ServerCodec, CLIENT_MAX_FRAME_LENGTH,
    DEFAULT_MAX_FRAME_LENGTH,
};
pub use error::ProtocolError;
pub use event::{ClientEvent, ErrorKind, ServerEvent, ServerKind, ServerSummary, SessionInfo};
