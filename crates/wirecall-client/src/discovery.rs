//! Service discovery and selection.
//!
//! A [`Discovery`] holds the candidate server addresses and picks one per
//! call. [`StaticDiscovery`] works from an explicit list; with
//! [`RegistryDiscovery`] the list is pulled from a registry endpoint on
//! `refresh`. Neither variant schedules refreshes on its own; callers
//! refresh periodically, or before selection when staleness matters.

use std::sync::{Mutex as StdMutex, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use wirecall_common::error::{Result, WirecallError};
use wirecall_common::protocol::REGISTRY_SERVERS_HEADER;

/// Load-balancing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// Uniform-random over the current list.
    Random,
    /// Cycle through the list in order.
    RoundRobin,
}

/// Holder of candidate server addresses plus a selection strategy.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Re-pulls the list from a remote registry; a no-op for static lists.
    async fn refresh(&self) -> Result<()>;

    /// Replaces the address list wholesale.
    fn update(&self, servers: Vec<String>);

    /// Selects one address. An empty list is a reportable error, never a
    /// panic.
    fn get(&self, mode: SelectMode) -> Result<String>;

    /// All current addresses, as a defensive copy.
    fn get_all(&self) -> Vec<String>;
}

struct ServerList {
    servers: Vec<String>,
    /// Round-robin cursor; always taken modulo the current length, so a
    /// shrinking list cannot index out of bounds.
    index: usize,
    rng: StdRng,
}

/// Discovery over an explicitly provided address list.
pub struct StaticDiscovery {
    inner: RwLock<ServerList>,
}

impl StaticDiscovery {
    pub fn new(servers: Vec<String>) -> Self {
        // time-derived seed: distinct instances walk distinct sequences
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let mut rng = StdRng::seed_from_u64(seed);
        // randomize the cursor so fresh instances don't all start at the
        // same address
        let index = rng.gen_range(0..u32::MAX as usize);
        Self {
            inner: RwLock::new(ServerList {
                servers,
                index,
                rng,
            }),
        }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    fn update(&self, servers: Vec<String>) {
        self.inner.write().unwrap().servers = servers;
    }

    fn get(&self, mode: SelectMode) -> Result<String> {
        let list = &mut *self.inner.write().unwrap();
        let n = list.servers.len();
        if n == 0 {
            return Err(WirecallError::NoAvailableServers);
        }
        match mode {
            SelectMode::Random => Ok(list.servers[list.rng.gen_range(0..n)].clone()),
            SelectMode::RoundRobin => {
                let server = list.servers[list.index % n].clone();
                list.index = (list.index + 1) % n;
                Ok(server)
            }
        }
    }

    fn get_all(&self) -> Vec<String> {
        self.inner.read().unwrap().servers.clone()
    }
}

/// How old the local list may get before [`RegistryDiscovery::ensure_fresh`]
/// pulls again.
pub const DEFAULT_UPDATE_WINDOW: Duration = Duration::from_secs(10);

/// Discovery backed by a registry endpoint.
pub struct RegistryDiscovery {
    servers: StaticDiscovery,
    registry_url: String,
    http: reqwest::Client,
    update_window: Duration,
    last_update: StdMutex<Option<Instant>>,
}

impl RegistryDiscovery {
    /// `registry_url` is the full registry endpoint, e.g.
    /// `http://127.0.0.1:9999/wirecall/registry`.
    pub fn new(registry_url: impl Into<String>, update_window: Option<Duration>) -> Self {
        Self {
            servers: StaticDiscovery::new(Vec::new()),
            registry_url: registry_url.into(),
            http: reqwest::Client::new(),
            update_window: update_window.unwrap_or(DEFAULT_UPDATE_WINDOW),
            last_update: StdMutex::new(None),
        }
    }

    /// Whether the local list is older than the update window.
    pub fn is_stale(&self) -> bool {
        match *self.last_update.lock().unwrap() {
            Some(at) => at.elapsed() > self.update_window,
            None => true,
        }
    }

    /// Refreshes only when the local list has gone stale.
    pub async fn ensure_fresh(&self) -> Result<()> {
        if self.is_stale() {
            self.refresh().await
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Discovery for RegistryDiscovery {
    async fn refresh(&self) -> Result<()> {
        let response = self
            .http
            .get(&self.registry_url)
            .send()
            .await
            .map_err(|e| WirecallError::Registry(format!("refresh error: {}", e)))?;

        let servers: Vec<String> = response
            .headers()
            .get(REGISTRY_SERVERS_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        self.update(servers);
        Ok(())
    }

    fn update(&self, servers: Vec<String>) {
        self.servers.update(servers);
        *self.last_update.lock().unwrap() = Some(Instant::now());
    }

    fn get(&self, mode: SelectMode) -> Result<String> {
        self.servers.get(mode)
    }

    fn get_all(&self) -> Vec<String> {
        self.servers.get_all()
    }
}
