//! Wirecall Common Types and Framing
//!
//! This crate provides the protocol definitions, frame layer and body codecs
//! shared by the wirecall server, client and registry crates.
//!
//! # Wire protocol
//!
//! A connection starts with exactly one handshake frame carrying a
//! JSON-encoded [`ConnectOptions`] record. The handshake names the codec for
//! everything that follows; after it the stream carries zero or more
//! ([`Header`] frame, body frame) pairs in that codec:
//!
//! ```text
//! | ConnectOptions (JSON) | Header1 | Body1 | Header2 | Body2 | ...
//! ```
//!
//! Every frame is `[4-byte length prefix as u32 big-endian] + [data]`.
//!
//! # Components
//!
//! - [`protocol`] - Handshake and message envelope types
//! - [`wire`] - Length-prefixed frame reader/writer
//! - [`codec`] - Pluggable body codecs and their registry
//! - [`error`] - Error type shared by all wirecall crates

pub mod codec;
pub mod error;
pub mod protocol;
pub mod wire;

pub use codec::{BodyCodec, CodecRegistry, JSON_TYPE, POSTCARD_TYPE};
pub use error::{Result, WirecallError};
pub use protocol::{ConnectOptions, Header, MAGIC_NUMBER};
