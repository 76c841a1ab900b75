//! Gateway server implementation

use crate::bridge::ChannelBridge;
use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::gateway::handler::handle_connection;
use crate::session::SessionTuning;
use crate::store::ChannelStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};

/// Gateway server state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    /// Not started
    Stopped,
    /// Accepting connections
    Running,
    /// Draining after a stop request
    ShuttingDown,
}

/// Channel gateway server
///
/// One accept loop; every accepted socket gets its own task running
/// [`handle_connection`]. `stop()` flips a watch channel the accept
/// loop selects on, so shutdown needs no task handles.
pub struct Gateway {
    config: GatewayConfig,
    tuning: SessionTuning,
    bridge: Arc<ChannelBridge>,
    store: Arc<dyn ChannelStore>,
    state: Arc<RwLock<GatewayState>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Gateway {
    /// Create a gateway over the given store
    pub fn new(config: GatewayConfig, store: Arc<dyn ChannelStore>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let tuning = SessionTuning::from(&config);
        Self {
            config,
            tuning,
            bridge: Arc::new(ChannelBridge::new()),
            store,
            state: Arc::new(RwLock::new(GatewayState::Stopped)),
            shutdown_tx,
        }
    }

    /// Shared bridge, exposed for tests and embedding
    pub fn bridge(&self) -> Arc<ChannelBridge> {
        self.bridge.clone()
    }

    /// Get current state
    pub async fn state(&self) -> GatewayState {
        *self.state.read().await
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Gateway(format!("Failed to bind {}: {}", addr, e)))?;
        Ok(listener)
    }

    /// Run the accept loop until `stop()` is called. Consumes a bound
    /// listener so tests can bind an ephemeral port first.
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != GatewayState::Stopped {
                return Err(Error::Gateway("Gateway already running".to_string()));
            }
            *state = GatewayState::Running;
        }

        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::Gateway(format!("No local address: {}", e)))?;
        tracing::info!(%local_addr, "Gateway listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => self.spawn_session(socket, peer),
                        Err(e) => {
                            tracing::warn!("Accept failed: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        *self.state.write().await = GatewayState::Stopped;
        tracing::info!("Gateway stopped");
        Ok(())
    }

    /// Request shutdown of the accept loop
    pub async fn stop(&self) {
        {
            let mut state = self.state.write().await;
            if *state != GatewayState::Running {
                return;
            }
            *state = GatewayState::ShuttingDown;
        }
        tracing::info!("Stopping gateway");
        let _ = self.shutdown_tx.send(true);
    }

    fn spawn_session(&self, socket: tokio::net::TcpStream, peer: SocketAddr) {
        tracing::debug!(%peer, "Accepted connection");
        let bridge = self.bridge.clone();
        let store = self.store.clone();
        let tuning = self.tuning.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, bridge, store, tuning).await {
                tracing::debug!(%peer, "Connection ended with error: {}", e);
            }
        });
    }
}

/// Builder for [`Gateway`]
pub struct GatewayBuilder {
    config: GatewayConfig,
    store: Option<Arc<dyn ChannelStore>>,
}

impl GatewayBuilder {
    /// Create a new builder with default config
    pub fn new() -> Self {
        Self {
            config: GatewayConfig::default(),
            store: None,
        }
    }

    /// Set the configuration
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the listen host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the listen port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the backing store
    pub fn store(mut self, store: Arc<dyn ChannelStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the gateway. Falls back to an empty in-memory store.
    pub fn build(self) -> Gateway {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(crate::store::MemoryStore::new()));
        Gateway::new(self.config, store)
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}
