//! Wirecall Server
//!
//! This crate provides the service catalog and the connection engine: build
//! a [`Service`] from a receiver, register it with a [`Server`], and serve a
//! TCP listener.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde::{Deserialize, Serialize};
//! use wirecall_server::{Server, Service};
//!
//! #[derive(Serialize, Deserialize)]
//! struct SumArgs { a: i64, b: i64 }
//!
//! # #[tokio::main]
//! # async fn main() -> wirecall_common::Result<()> {
//! let server = Server::new();
//! server.register(
//!     Service::builder("Arith", ())
//!         .method("Sum", |_: &(), args: SumArgs, reply: &mut i64| {
//!             *reply = args.a + args.b;
//!             Ok(())
//!         })
//!         .build(),
//! )?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:7000").await?;
//! Arc::new(server).serve(listener).await
//! # }
//! ```

pub mod server;
pub mod service;

pub use server::Server;
pub use service::{MethodError, MethodResult, Service, ServiceBuilder};
