//! Wirecall Registry
//!
//! A centralized, in-memory directory of live server addresses. Servers keep
//! themselves listed by sending periodic heartbeats; clients pull the alive
//! list into their discovery layer.
//!
//! The registry speaks a minimal header-based HTTP convention (see
//! [`http`]); the TTL bookkeeping itself lives in [`registry`].

pub mod http;
pub mod registry;

pub use http::{heartbeat, DEFAULT_PATH, SERVERS_HEADER, SERVER_HEADER};
pub use registry::{Registry, DEFAULT_TIMEOUT};
