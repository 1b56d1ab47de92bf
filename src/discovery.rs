//! Live set of reachable encode servers.
//!
//! [`ServerDiscovery`] owns the [`ServerSet`] behind its own mutex. Every
//! actual membership change is announced to subscribers over a channel;
//! the lock is never held across a network call.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{CodecSettings, RemoteEncoder};

pub const DEFAULT_SERVER_PORT: u16 = 6192;

const PROBE_TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerDescription {
    pub host: String,
    pub port: u16,
    /// Encoding threads the server advertises; 0 when unknown.
    pub threads: u32,
}

impl ServerDescription {
    pub fn new(host: impl Into<String>, port: u16, threads: u32) -> Self {
        Self {
            host: host.into(),
            port,
            threads,
        }
    }

    /// Accepts `host`, `host:port`, `[v6]` and `[v6]:port`.
    pub fn parse(spec: &str, default_port: u16) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            bail!("server address is empty");
        }
        let (host, port) = if let Some(rest) = spec.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .with_context(|| format!("unterminated IPv6 address in '{spec}'"))?;
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => bail!("unexpected '{tail}' after address in '{spec}'"),
            }
        } else {
            match spec.rsplit_once(':') {
                Some((host, port)) if !host.contains(':') => (host, Some(port)),
                _ => (spec, None),
            }
        };
        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .with_context(|| format!("invalid port in '{spec}'"))?,
            None => default_port,
        };
        if host.is_empty() {
            bail!("server address '{spec}' has no host");
        }
        Ok(Self::new(host, port, 0))
    }

    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ServerDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// Servers keyed by address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSet {
    servers: BTreeMap<String, ServerDescription>,
}

impl ServerSet {
    /// Returns whether the set changed.
    pub fn insert(&mut self, server: ServerDescription) -> bool {
        let address = server.address();
        if self.servers.get(&address) == Some(&server) {
            return false;
        }
        self.servers.insert(address, server);
        true
    }

    pub fn remove(&mut self, address: &str) -> Option<ServerDescription> {
        self.servers.remove(address)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.servers.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn to_vec(&self) -> Vec<ServerDescription> {
        self.servers.values().cloned().collect()
    }
}

/// Sent to subscribers after every membership change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSetChanged {
    pub servers: Vec<ServerDescription>,
}

#[derive(Default)]
struct Shared {
    set: Mutex<ServerSet>,
    subscribers: Mutex<Vec<Sender<ServerSetChanged>>>,
    prober: Mutex<Option<JoinHandle<()>>>,
    stop_probing: AtomicBool,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.stop_probing.store(true, Ordering::Release);
    }
}

/// Cloneable handle; clones share one set and one subscriber list.
#[derive(Clone, Default)]
pub struct ServerDiscovery {
    shared: Arc<Shared>,
}

impl ServerDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_servers(servers: impl IntoIterator<Item = ServerDescription>) -> Self {
        let discovery = Self::new();
        {
            let mut set = discovery.set();
            for server in servers {
                set.insert(server);
            }
        }
        discovery
    }

    fn set(&self) -> MutexGuard<'_, ServerSet> {
        self.shared.set.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read-copy of the current membership.
    pub fn servers(&self) -> Vec<ServerDescription> {
        self.set().to_vec()
    }

    pub fn subscribe(&self) -> Receiver<ServerSetChanged> {
        let (tx, rx) = mpsc::channel();
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn add(&self, server: ServerDescription) {
        let snapshot = {
            let mut set = self.set();
            if !set.insert(server.clone()) {
                return;
            }
            set.to_vec()
        };
        info!(server = %server, threads = server.threads, "Encode server available");
        self.notify(snapshot);
    }

    pub fn remove(&self, address: &str) -> Option<ServerDescription> {
        let (removed, snapshot) = {
            let mut set = self.set();
            let removed = set.remove(address)?;
            (removed, set.to_vec())
        };
        info!(server = %address, "Encode server removed");
        self.notify(snapshot);
        Some(removed)
    }

    /// Called by a worker that gave up on `address`. The prober re-adds the
    /// server once it answers again.
    pub fn mark_unreachable(&self, address: &str) {
        if self.remove(address).is_some() {
            warn!(server = %address, "Encode server marked unreachable");
        }
    }

    fn notify(&self, servers: Vec<ServerDescription>) {
        let message = ServerSetChanged { servers };
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(message.clone()).is_ok());
    }

    /// Pings every candidate once, adding those that answer and removing
    /// those that do not.
    pub fn probe_once(&self, candidates: &[ServerDescription], timeout: Duration) {
        for candidate in candidates {
            let encoder = RemoteEncoder::new(candidate.clone(), CodecSettings::default(), timeout);
            match encoder.ping() {
                Ok(pong) => {
                    let mut server = candidate.clone();
                    server.threads = pong.threads;
                    self.add(server);
                }
                Err(err) => {
                    debug!(server = %candidate, error = %err, "Probe failed");
                    self.remove(&candidate.address());
                }
            }
        }
    }

    /// Probes `candidates` every `interval` on a background thread until
    /// [`stop_probing`](Self::stop_probing) or the last handle is dropped.
    pub fn start_probing(
        &self,
        candidates: Vec<ServerDescription>,
        interval: Duration,
        timeout: Duration,
    ) -> Result<()> {
        let mut prober = self
            .shared
            .prober
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if prober.is_some() || candidates.is_empty() {
            return Ok(());
        }
        self.shared.stop_probing.store(false, Ordering::Release);
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let handle = thread::Builder::new()
            .name("server-probe".into())
            .spawn(move || probe_loop(weak, candidates, interval, timeout))
            .context("failed to spawn server probe thread")?;
        *prober = Some(handle);
        Ok(())
    }

    pub fn stop_probing(&self) {
        self.shared.stop_probing.store(true, Ordering::Release);
        let handle = self
            .shared
            .prober
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn probe_loop(
    shared: Weak<Shared>,
    candidates: Vec<ServerDescription>,
    interval: Duration,
    timeout: Duration,
) {
    loop {
        let round_started = Instant::now();
        {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            if shared.stop_probing.load(Ordering::Acquire) {
                return;
            }
            ServerDiscovery { shared }.probe_once(&candidates, timeout);
        }
        while round_started.elapsed() < interval {
            thread::sleep(PROBE_TICK);
            match shared.upgrade() {
                Some(shared) if !shared.stop_probing.load(Ordering::Acquire) => {}
                _ => return,
            }
        }
    }
}
