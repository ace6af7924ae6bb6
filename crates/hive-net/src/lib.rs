//! Framed JSON wire protocol for the hive engine.
//!
//! The management console and the engine exchange length-prefixed JSON
//! frames over TCP: 4-byte little-endian length, then a UTF-8 JSON
//! object.
//!
//! # Modules
//!
//! - [`message`] -- the [`WireMessage`] structure and constructors
//! - [`frame`] -- the length-prefixed codec
//! - [`server`] -- accept loop, sessions, handler table, broadcast
//! - [`client`] -- state machine, outbox, pending-request tracking
//! - [`error`] -- the wire error vocabulary and transport errors

pub mod client;
pub mod error;
pub mod frame;
pub mod message;
pub mod server;

pub use client::{ClientConfig, ClientState, ProtocolClient};
pub use error::{ErrorKind, ErrorReply, NetError};
pub use frame::{MAX_FRAME_LEN, read_frame, write_frame};
pub use message::{MessageKind, Status, WireMessage, now_ms};
pub use server::{Handler, ProtocolServer, ServerConfig, handler};
