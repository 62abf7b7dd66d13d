//! Proxies: named `listen -> upstream` bridges, each backed by a
//! [`collection::ToxicCollection`].

pub mod collection;
pub mod link;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::io::split;
use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ProxyError;
use crate::stream::SharedRng;
use crate::toxics::{Stream, ToxicRegistry};
use collection::ToxicCollection;

/// One configured proxy: a listen address bridged to an upstream,
/// with its own toxic collection.
pub struct Proxy {
    pub name: String,
    pub listen: String,
    pub upstream: String,
    enabled: AtomicBool,
    pub toxics: Arc<ToxicCollection>,
    rng: SharedRng,
    accept_task: AsyncMutex<Option<JoinHandle<()>>>,
    /// Filled in once `listen()` has actually bound a socket; lets
    /// tests and `0`-port configs discover the real address.
    bound_addr: AsyncMutex<Option<SocketAddr>>,
}

impl Proxy {
    pub fn new(name: String, listen: String, upstream: String, enabled: bool, registry: Arc<ToxicRegistry>, seed: Option<u64>) -> Self {
        let rng: SharedRng = Arc::new(AsyncMutex::new(match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        }));
        Self {
            name,
            listen,
            upstream,
            enabled: AtomicBool::new(enabled),
            toxics: Arc::new(ToxicCollection::new(registry)),
            rng,
            accept_task: AsyncMutex::new(None),
            bound_addr: AsyncMutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// The address actually bound by `listen()`, once it has run. Useful
    /// when `listen` was configured with an ephemeral `:0` port.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock().await
    }

    /// Bind `listen` and accept connections until the returned task is
    /// aborted (proxy removal) or the listener errors out.
    pub async fn listen(self: &Arc<Self>) -> Result<(), ProxyError> {
        let listener = TcpListener::bind(&self.listen).await.map_err(|source| ProxyError::Bind {
            addr: self.listen.clone(),
            source,
        })?;
        let addr = listener.local_addr().map_err(|source| ProxyError::Bind {
            addr: self.listen.clone(),
            source,
        })?;
        *self.bound_addr.lock().await = Some(addr);
        info!(proxy = %self.name, addr = %addr, "proxy listening");

        let proxy = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, peer)) => {
                        if !proxy.is_enabled() {
                            continue;
                        }
                        let proxy = Arc::clone(&proxy);
                        tokio::spawn(async move {
                            if let Err(e) = proxy.bridge(socket, peer.to_string()).await {
                                warn!(proxy = %proxy.name, error = %e, "failed to bridge connection");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(proxy = %proxy.name, error = %e, "accept failed");
                        return;
                    }
                }
            }
        });
        *self.accept_task.lock().await = Some(task);
        Ok(())
    }

    /// Stop accepting new connections (existing links are left to run
    /// their course).
    pub async fn stop(&self) {
        if let Some(task) = self.accept_task.lock().await.take() {
            task.abort();
        }
    }

    async fn bridge(self: Arc<Self>, client: tokio::net::TcpStream, peer: String) -> Result<(), ProxyError> {
        let upstream = tokio::net::TcpStream::connect(&self.upstream).await.map_err(|source| ProxyError::Dial {
            addr: self.upstream.clone(),
            source,
        })?;
        info!(proxy = %self.name, peer = %peer, upstream = %self.upstream, "bridged connection");

        let id = Uuid::new_v4();
        let (client_read, client_write) = split(client);
        let (upstream_read, upstream_write) = split(upstream);

        self.toxics
            .start_link(
                format!("{id}-upstream"),
                Stream::Upstream,
                Box::new(client_read),
                Box::new(upstream_write),
                self.rng.clone(),
            )
            .await;
        self.toxics
            .start_link(
                format!("{id}-downstream"),
                Stream::Downstream,
                Box::new(upstream_read),
                Box::new(client_write),
                self.rng.clone(),
            )
            .await;
        Ok(())
    }
}

/// All proxies registered with this process.
///
/// A lock-free concurrent map is the right fit here: proxy creation,
/// lookup, and removal are single-key operations needing no
/// cross-entry atomicity (unlike `ToxicCollection`'s toxics-plus-links
/// pair, which does).
pub struct ProxyManager {
    registry: Arc<ToxicRegistry>,
    seed: Option<u64>,
    proxies: DashMap<String, Arc<Proxy>>,
}

impl ProxyManager {
    pub fn new(registry: Arc<ToxicRegistry>, seed: Option<u64>) -> Self {
        Self {
            registry,
            seed,
            proxies: DashMap::new(),
        }
    }

    pub async fn create(&self, name: String, listen: String, upstream: String, enabled: bool) -> Result<Arc<Proxy>, ProxyError> {
        if self.proxies.contains_key(&name) {
            return Err(ProxyError::AlreadyExists(name));
        }
        let proxy = Arc::new(Proxy::new(name.clone(), listen, upstream, enabled, Arc::clone(&self.registry), self.seed));
        if proxy.is_enabled() {
            proxy.listen().await?;
        }
        self.proxies.insert(name, Arc::clone(&proxy));
        Ok(proxy)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Proxy>> {
        self.proxies.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub async fn list(&self) -> Vec<Arc<Proxy>> {
        self.proxies.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub async fn remove(&self, name: &str) -> Result<(), ProxyError> {
        let (_, proxy) = self
            .proxies
            .remove(name)
            .ok_or_else(|| ProxyError::NotFound(name.to_string()))?;
        proxy.stop().await;
        Ok(())
    }
}
