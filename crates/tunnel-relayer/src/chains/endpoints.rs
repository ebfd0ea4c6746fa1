// Multi-endpoint connection management and failover
//
// Every configured endpoint is tried concurrently and the one observing the
// greatest chain height wins. Selection is re-evaluated by a periodic
// liveliness task; reads of the selected client vastly outnumber writes, so
// the state sits behind a read/write lock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::error::RelayerError;

/// Opens a connection to a single endpoint and reports the chain height it
/// currently observes.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Client: Clone + Send + Sync + 'static;

    async fn connect(&self, endpoint: &str) -> Result<(Self::Client, u64), RelayerError>;
}

struct Selected<T> {
    endpoint: String,
    client: T,
    height: u64,
}

/// Tracks which of the configured endpoints a chain client should use
pub struct EndpointManager<C: Connector> {
    chain_name: String,
    endpoints: Vec<String>,
    connect_timeout: Duration,
    connector: Arc<C>,
    state: RwLock<Option<Selected<C::Client>>>,
}

impl<C: Connector> EndpointManager<C> {
    pub fn new(
        chain_name: &str,
        endpoints: Vec<String>,
        connect_timeout: Duration,
        connector: C,
    ) -> Self {
        Self {
            chain_name: chain_name.to_string(),
            endpoints,
            connect_timeout,
            connector: Arc::new(connector),
            state: RwLock::new(None),
        }
    }

    /// Race a connection attempt against every configured endpoint and select
    /// the live one observing the greatest height.
    ///
    /// All attempts are awaited (selection is best, not fastest). On equal
    /// height the currently selected endpoint is kept, to avoid churn. If no
    /// endpoint yields a live result the prior selection is left untouched and
    /// an error is returned.
    pub async fn connect(&self) -> Result<(), RelayerError> {
        let (tx, mut rx) = mpsc::channel(self.endpoints.len().max(1));
        for endpoint in &self.endpoints {
            let connector = Arc::clone(&self.connector);
            let timeout = self.connect_timeout;
            let endpoint = endpoint.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = match time::timeout(timeout, connector.connect(&endpoint)).await {
                    Ok(result) => result,
                    Err(_) => Err(RelayerError::Rpc(format!("connect to {endpoint} timed out"))),
                };
                let _ = tx.send((endpoint, result)).await;
            });
        }
        drop(tx);

        let current = {
            let state = self.state.read().await;
            state.as_ref().map(|s| s.endpoint.clone())
        };

        let mut best: Option<Selected<C::Client>> = None;
        while let Some((endpoint, result)) = rx.recv().await {
            match result {
                Ok((client, height)) => {
                    debug!(
                        chain = %self.chain_name,
                        endpoint, height, "endpoint responded"
                    );
                    let take = match &best {
                        None => true,
                        Some(b) => {
                            height > b.height
                                || (height == b.height
                                    && current.as_deref() == Some(endpoint.as_str()))
                        }
                    };
                    if take {
                        best = Some(Selected {
                            endpoint,
                            client,
                            height,
                        });
                    }
                }
                Err(err) => {
                    warn!(
                        chain = %self.chain_name,
                        endpoint, %err, "endpoint connection failed"
                    );
                }
            }
        }

        match best {
            Some(selected) => {
                if current.as_deref() != Some(selected.endpoint.as_str()) {
                    info!(
                        chain = %self.chain_name,
                        endpoint = %selected.endpoint,
                        height = selected.height,
                        "selected endpoint"
                    );
                }
                *self.state.write().await = Some(selected);
                Ok(())
            }
            None => Err(RelayerError::NoEndpointReachable(self.chain_name.clone())),
        }
    }

    /// Currently selected client, if connected
    pub async fn client(&self) -> Option<C::Client> {
        self.state.read().await.as_ref().map(|s| s.client.clone())
    }

    /// Currently selected endpoint, if connected
    pub async fn selected_endpoint(&self) -> Option<String> {
        self.state.read().await.as_ref().map(|s| s.endpoint.clone())
    }

    /// Fast-path guard run before every chain operation: reuse the live
    /// client if one exists, otherwise connect lazily.
    pub async fn check_and_connect(&self) -> Result<C::Client, RelayerError> {
        if let Some(client) = self.client().await {
            return Ok(client);
        }
        self.connect().await?;
        self.client()
            .await
            .ok_or_else(|| RelayerError::NoEndpointReachable(self.chain_name.clone()))
    }

    /// Periodically re-run endpoint selection until shutdown is signalled
    pub fn start_liveliness_check(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let manager = self;
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            // the immediate first tick duplicates init's connect
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = manager.connect().await {
                            warn!(
                                chain = %manager.chain_name,
                                %err,
                                "liveliness check failed"
                            );
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!(chain = %manager.chain_name, "liveliness check stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}
