//! Wirecall Client
//!
//! This crate provides the call side of wirecall: a single-connection
//! [`Client`], the [`Discovery`] layer that tracks candidate servers
//! (statically or from a registry), and the [`BalancedClient`] that picks a
//! server per call.
//!
//! # Example
//!
//! ```no_run
//! use serde::{Deserialize, Serialize};
//! use wirecall_client::Client;
//! use wirecall_common::protocol::ConnectOptions;
//!
//! #[derive(Serialize, Deserialize)]
//! struct SumArgs { a: i64, b: i64 }
//!
//! # #[tokio::main]
//! # async fn main() -> wirecall_common::Result<()> {
//! let client = Client::dial("127.0.0.1:7000", ConnectOptions::default()).await?;
//! let sum: i64 = client.call("Arith.Sum", &SumArgs { a: 3, b: 4 }).await?;
//! assert_eq!(sum, 7);
//! # Ok(())
//! # }
//! ```

pub mod balanced;
pub mod client;
pub mod discovery;

pub use balanced::BalancedClient;
pub use client::Client;
pub use discovery::{Discovery, RegistryDiscovery, SelectMode, StaticDiscovery};
