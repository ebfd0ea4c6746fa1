// Per-tunnel relay loops and the scheduler that owns them

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::band::BandClient;
use crate::chains::ChainProvider;
use crate::error::RelayerError;
use crate::metrics::RelayerMetrics;

/// Control loop for one tunnel.
///
/// On each tick: poll the source chain for the tunnel's latest sequence,
/// relay every packet past the destination's consumed sequence, and track the
/// last relayed sequence locally. Failures are logged and retried on the next
/// tick; `relay_packet` already performs its own bounded retries.
pub struct TunnelRelayer {
    tunnel_id: u64,
    target_address: String,
    checking_packet_interval: Duration,
    /// Relay regardless of the destination-side active flag
    force_relay: bool,
    band: Arc<dyn BandClient>,
    provider: Arc<dyn ChainProvider>,
    metrics: Arc<RelayerMetrics>,
    latest_relayed_sequence: u64,
}

impl TunnelRelayer {
    pub fn new(
        tunnel_id: u64,
        target_address: &str,
        checking_packet_interval: Duration,
        force_relay: bool,
        band: Arc<dyn BandClient>,
        provider: Arc<dyn ChainProvider>,
        metrics: Arc<RelayerMetrics>,
    ) -> Self {
        Self {
            tunnel_id,
            target_address: target_address.to_string(),
            checking_packet_interval,
            force_relay,
            band,
            provider,
            metrics,
            latest_relayed_sequence: 0,
        }
    }

    pub fn tunnel_id(&self) -> u64 {
        self.tunnel_id
    }

    pub fn latest_relayed_sequence(&self) -> u64 {
        self.latest_relayed_sequence
    }

    /// One polling iteration. Returns the number of packets relayed.
    pub async fn check_and_relay(&mut self) -> Result<u64, RelayerError> {
        let tunnel = self.band.get_tunnel(self.tunnel_id).await?;
        let info = self
            .provider
            .query_tunnel_info(self.tunnel_id, &self.target_address)
            .await?;

        if !info.is_active && !self.force_relay {
            debug!(
                tunnel_id = self.tunnel_id,
                chain = self.provider.chain_name(),
                "tunnel inactive on destination, skipping"
            );
            return Ok(0);
        }

        // the destination's consumed sequence is authoritative; the local
        // counter only papers over destination-side query lag
        let mut relayed = info.latest_sequence.max(self.latest_relayed_sequence);
        if tunnel.latest_sequence <= relayed {
            return Ok(0);
        }

        let mut count = 0;
        while relayed < tunnel.latest_sequence {
            let sequence = relayed + 1;
            let packet = self.band.get_tunnel_packet(self.tunnel_id, sequence).await?;

            let timer = self.metrics.packet_relay_duration.start_timer();
            let outcome = self.provider.relay_packet(&packet).await;
            timer.observe_duration();

            match outcome {
                Ok(()) => {
                    self.metrics.packets_relayed.inc();
                    relayed = sequence;
                    self.latest_relayed_sequence = sequence;
                    count += 1;
                }
                Err(err) => {
                    self.metrics.packets_failed.inc();
                    return Err(err);
                }
            }
        }
        Ok(count)
    }

    /// Run the relay loop until shutdown is signalled
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tunnel_id = self.tunnel_id,
            chain = self.provider.chain_name(),
            "tunnel relayer started"
        );
        let mut ticker = time::interval(self.checking_packet_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.check_and_relay().await {
                        Ok(0) => {}
                        Ok(count) => {
                            info!(
                                tunnel_id = self.tunnel_id,
                                count,
                                latest_sequence = self.latest_relayed_sequence,
                                "relayed packets"
                            );
                        }
                        Err(err) => {
                            // wait for the next tick; relay_packet already
                            // performed its internal retries
                            self.metrics.tunnel_check_failures.inc();
                            warn!(tunnel_id = self.tunnel_id, %err, "relay iteration failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(tunnel_id = self.tunnel_id, "tunnel relayer stopped");
                        break;
                    }
                }
            }
        }
    }
}

/// Owns the complete set of tunnel relayers for the process.
///
/// `start` launches each relayer as an independent task and returns once all
/// are launched; `stop` signals shutdown and waits for every task to exit.
/// One tunnel's failures never terminate the scheduler or its siblings.
pub struct Scheduler {
    relayers: Vec<TunnelRelayer>,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(relayers: Vec<TunnelRelayer>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            relayers,
            shutdown,
            handles: Vec::new(),
        }
    }

    /// Shutdown signal shared with provider liveliness tasks
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn tunnel_count(&self) -> usize {
        self.relayers.len() + self.handles.len()
    }

    /// Launch every relayer's loop. Returns once all are launched; the loops
    /// run until [`Scheduler::stop`].
    pub fn start(&mut self) {
        let count = self.relayers.len();
        for relayer in self.relayers.drain(..) {
            let shutdown = self.shutdown.subscribe();
            self.handles.push(tokio::spawn(relayer.run(shutdown)));
        }
        info!(tunnels = count, "scheduler started");
    }

    /// Signal cancellation and wait for all relayer tasks to exit cleanly
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        let handles = std::mem::take(&mut self.handles);
        for result in join_all(handles).await {
            if let Err(err) = result {
                warn!(%err, "relayer task ended abnormally");
            }
        }
        info!("scheduler stopped");
    }
}
