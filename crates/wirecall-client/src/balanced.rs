//! Load-balanced client.
//!
//! [`BalancedClient`] sits on top of a [`Discovery`]: each call selects an
//! address with the configured strategy, then reuses the cached connection
//! to that address or dials a fresh one. A connection that errors is dropped
//! from the cache so the next call redials.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use wirecall_common::error::{Result, WirecallError};
use wirecall_common::protocol::ConnectOptions;

use crate::client::Client;
use crate::discovery::{Discovery, SelectMode};

/// A client that spreads calls over the servers a [`Discovery`] knows about.
pub struct BalancedClient<D: Discovery> {
    discovery: D,
    mode: SelectMode,
    opts: ConnectOptions,
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

impl<D: Discovery> BalancedClient<D> {
    pub fn new(discovery: D, mode: SelectMode, opts: ConnectOptions) -> Self {
        Self {
            discovery,
            mode,
            opts,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying discovery, e.g. to `refresh` or `update` it.
    pub fn discovery(&self) -> &D {
        &self.discovery
    }

    /// Selects a server and invokes `Service.Method` on it.
    pub async fn call<Args, Reply>(&self, service_method: &str, args: &Args) -> Result<Reply>
    where
        Args: Serialize,
        Reply: DeserializeOwned,
    {
        let addr = self.discovery.get(self.mode)?;
        let client = self.client_for(&addr).await?;
        let result = client.call(service_method, args).await;

        if let Err(WirecallError::Connection(_) | WirecallError::Io(_)) = &result {
            // stale connection: forget it so the next call redials
            self.clients.lock().await.remove(&addr);
        }
        result
    }

    async fn client_for(&self, addr: &str) -> Result<Arc<Client>> {
        let mut clients = self.clients.lock().await;
        if let Some(existing) = clients.get(addr) {
            if !existing.is_closed() {
                return Ok(Arc::clone(existing));
            }
            clients.remove(addr);
        }

        let client = Arc::new(Client::dial(addr, self.opts.clone()).await?);
        clients.insert(addr.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Closes every cached connection.
    pub async fn close(&self) {
        for (_, client) in self.clients.lock().await.drain() {
            client.close().await;
        }
    }
}
