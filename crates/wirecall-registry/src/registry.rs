//! Registry core: an in-memory directory of live server addresses.
//!
//! Servers push heartbeats; an address that stops sending them past the
//! registry's timeout window is dropped the next time liveness is queried.
//! Eviction happens inside the query, under the same lock as the liveness
//! check, so a query never returns an address it just considered dead.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Any registered server silent for longer than this is considered dead.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// One tracked server: its address and the time of its last heartbeat.
struct ServerItem {
    start: Instant,
}

/// Centralized directory of live server addresses with TTL-based expiry.
///
/// A `timeout` of zero disables expiry entirely.
pub struct Registry {
    timeout: Duration,
    servers: Mutex<HashMap<String, ServerItem>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Registry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// Adds a server or refreshes its liveness timestamp. Idempotent and
    /// safe under concurrent callers.
    pub fn record_heartbeat(&self, addr: &str) {
        let mut servers = self.servers.lock().unwrap();
        match servers.get_mut(addr) {
            Some(item) => item.start = Instant::now(),
            None => {
                servers.insert(
                    addr.to_string(),
                    ServerItem {
                        start: Instant::now(),
                    },
                );
            }
        }
    }

    /// Returns all live addresses, sorted, evicting expired entries as it
    /// goes. Repeated queries with no intervening changes return the same
    /// list.
    pub fn alive_servers(&self) -> Vec<String> {
        let mut servers = self.servers.lock().unwrap();
        let now = Instant::now();
        let timeout = self.timeout;
        servers.retain(|_, item| timeout.is_zero() || item.start + timeout > now);

        let mut alive: Vec<String> = servers.keys().cloned().collect();
        alive.sort();
        alive
    }
}
