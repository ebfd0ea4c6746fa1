// Integration tests for the per-tunnel relay loop and the scheduler

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use num_bigint::BigUint;
use tokio::sync::watch;

use tunnel_relayer::band::{BandClient, Packet, Signing, SigningStatus, Tunnel};
use tunnel_relayer::chains::{ChainProvider, TunnelInfo};
use tunnel_relayer::error::RelayerError;
use tunnel_relayer::metrics::RelayerMetrics;
use tunnel_relayer::relay::{Scheduler, TunnelRelayer};

struct MockBandClient {
    /// Latest sequence the source chain reports per tunnel
    latest_sequence: AtomicU64,
}

impl MockBandClient {
    fn new(latest_sequence: u64) -> Arc<Self> {
        Arc::new(Self {
            latest_sequence: AtomicU64::new(latest_sequence),
        })
    }
}

#[async_trait]
impl BandClient for MockBandClient {
    async fn get_tunnel(&self, tunnel_id: u64) -> Result<Tunnel, RelayerError> {
        Ok(Tunnel {
            id: tunnel_id,
            latest_sequence: self.latest_sequence.load(Ordering::SeqCst),
            target_address: "0xtarget".to_string(),
            target_chain_id: "evm-test".to_string(),
            is_active: true,
            creator: "band1creator".to_string(),
        })
    }

    async fn get_tunnel_packet(
        &self,
        tunnel_id: u64,
        sequence: u64,
    ) -> Result<Packet, RelayerError> {
        Ok(Packet {
            tunnel_id,
            sequence,
            signal_prices: vec![],
            current_group_signing: Some(Signing {
                id: sequence,
                message: vec![1],
                signature: vec![2],
                status: SigningStatus::Success,
            }),
            incoming_group_signing: None,
        })
    }

    async fn get_signing(&self, signing_id: u64) -> Result<Signing, RelayerError> {
        Ok(Signing {
            id: signing_id,
            message: vec![1],
            signature: vec![2],
            status: SigningStatus::Success,
        })
    }

    async fn get_tunnels_by_creator(&self, _creator: &str) -> Result<Vec<Tunnel>, RelayerError> {
        Ok(vec![])
    }
}

struct MockProvider {
    active: AtomicBool,
    destination_sequence: AtomicU64,
    fail_relays: AtomicBool,
    relayed: Mutex<Vec<(u64, u64)>>,
}

impl MockProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            active: AtomicBool::new(true),
            destination_sequence: AtomicU64::new(0),
            fail_relays: AtomicBool::new(false),
            relayed: Mutex::new(Vec::new()),
        })
    }

    fn relayed(&self) -> Vec<(u64, u64)> {
        self.relayed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainProvider for MockProvider {
    fn chain_name(&self) -> &str {
        "evm-test"
    }

    async fn init(&self, _shutdown: watch::Receiver<bool>) -> Result<(), RelayerError> {
        Ok(())
    }

    async fn query_tunnel_info(
        &self,
        tunnel_id: u64,
        target_address: &str,
    ) -> Result<TunnelInfo, RelayerError> {
        Ok(TunnelInfo {
            id: tunnel_id,
            target_address: target_address.to_string(),
            is_active: self.active.load(Ordering::SeqCst),
            latest_sequence: self.destination_sequence.load(Ordering::SeqCst),
        })
    }

    async fn relay_packet(&self, packet: &Packet) -> Result<(), RelayerError> {
        if self.fail_relays.load(Ordering::SeqCst) {
            return Err(RelayerError::MaxRetryExceeded {
                attempts: 3,
                last_error: "broadcast failed".to_string(),
            });
        }
        self.relayed
            .lock()
            .unwrap()
            .push((packet.tunnel_id, packet.sequence));
        Ok(())
    }

    async fn query_balance(&self, _key_name: &str) -> Result<BigUint, RelayerError> {
        Ok(BigUint::from(0u8))
    }
}

fn relayer(
    tunnel_id: u64,
    force: bool,
    band: Arc<MockBandClient>,
    provider: Arc<MockProvider>,
) -> TunnelRelayer {
    TunnelRelayer::new(
        tunnel_id,
        "0xtarget",
        Duration::from_millis(10),
        force,
        band,
        provider,
        Arc::new(RelayerMetrics::new().unwrap()),
    )
}

#[tokio::test]
async fn test_relays_all_pending_sequences_in_order() {
    let band = MockBandClient::new(3);
    let provider = MockProvider::new();
    let mut r = relayer(1, false, Arc::clone(&band), Arc::clone(&provider));

    let relayed = r.check_and_relay().await.unwrap();
    assert_eq!(relayed, 3);
    assert_eq!(provider.relayed(), vec![(1, 1), (1, 2), (1, 3)]);
    assert_eq!(r.latest_relayed_sequence(), 3);

    // caught up: the next iteration is a no-op
    assert_eq!(r.check_and_relay().await.unwrap(), 0);
    assert_eq!(provider.relayed().len(), 3);
}

#[tokio::test]
async fn test_destination_sequence_is_authoritative() {
    let band = MockBandClient::new(3);
    let provider = MockProvider::new();
    provider.destination_sequence.store(2, Ordering::SeqCst);
    let mut r = relayer(1, false, band, Arc::clone(&provider));

    assert_eq!(r.check_and_relay().await.unwrap(), 1);
    assert_eq!(provider.relayed(), vec![(1, 3)]);
}

#[tokio::test]
async fn test_inactive_tunnel_is_skipped_unless_forced() {
    let band = MockBandClient::new(2);
    let provider = MockProvider::new();
    provider.active.store(false, Ordering::SeqCst);

    let mut r = relayer(1, false, Arc::clone(&band), Arc::clone(&provider));
    assert_eq!(r.check_and_relay().await.unwrap(), 0);
    assert!(provider.relayed().is_empty());

    // force mode bypasses the destination-side active flag
    let mut forced = relayer(1, true, band, Arc::clone(&provider));
    assert_eq!(forced.check_and_relay().await.unwrap(), 2);
    assert_eq!(provider.relayed().len(), 2);
}

#[tokio::test]
async fn test_relay_failure_surfaces_and_sequence_does_not_advance() {
    let band = MockBandClient::new(1);
    let provider = MockProvider::new();
    provider.fail_relays.store(true, Ordering::SeqCst);
    let mut r = relayer(1, false, band, Arc::clone(&provider));

    let err = r.check_and_relay().await.unwrap_err();
    assert!(matches!(err, RelayerError::MaxRetryExceeded { .. }));
    assert_eq!(r.latest_relayed_sequence(), 0);

    // once the provider recovers, the same packet is retried next iteration
    provider.fail_relays.store(false, Ordering::SeqCst);
    assert_eq!(r.check_and_relay().await.unwrap(), 1);
    assert_eq!(provider.relayed(), vec![(1, 1)]);
}

#[tokio::test]
async fn test_scheduler_runs_relayers_until_stopped() {
    let band = MockBandClient::new(2);
    let provider_a = MockProvider::new();
    let provider_b = MockProvider::new();

    let mut scheduler = Scheduler::new(vec![
        relayer(1, false, Arc::clone(&band), Arc::clone(&provider_a)),
        relayer(2, false, Arc::clone(&band), Arc::clone(&provider_b)),
    ]);
    assert_eq!(scheduler.tunnel_count(), 2);

    scheduler.start();
    tokio::time::sleep(Duration::from_millis(60)).await;

    // bounded, clean shutdown
    tokio::time::timeout(Duration::from_secs(1), scheduler.stop())
        .await
        .expect("scheduler stop must complete promptly");

    assert_eq!(provider_a.relayed(), vec![(1, 1), (1, 2)]);
    assert_eq!(provider_b.relayed(), vec![(2, 1), (2, 2)]);
}

#[tokio::test]
async fn test_one_failing_tunnel_does_not_stall_others() {
    let band = MockBandClient::new(2);
    let failing = MockProvider::new();
    failing.fail_relays.store(true, Ordering::SeqCst);
    let healthy = MockProvider::new();

    let mut scheduler = Scheduler::new(vec![
        relayer(1, false, Arc::clone(&band), Arc::clone(&failing)),
        relayer(2, false, Arc::clone(&band), Arc::clone(&healthy)),
    ]);
    scheduler.start();
    tokio::time::sleep(Duration::from_millis(60)).await;
    scheduler.stop().await;

    assert!(failing.relayed().is_empty());
    assert_eq!(healthy.relayed(), vec![(2, 1), (2, 2)]);
}

#[tokio::test]
async fn test_relayer_picks_up_new_sequences_across_ticks() {
    let band = MockBandClient::new(1);
    let provider = MockProvider::new();

    let mut scheduler = Scheduler::new(vec![relayer(
        1,
        false,
        Arc::clone(&band),
        Arc::clone(&provider),
    )]);
    scheduler.start();
    tokio::time::sleep(Duration::from_millis(40)).await;

    // new packet appears on the source chain mid-run
    band.latest_sequence.store(2, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(40)).await;
    scheduler.stop().await;

    assert_eq!(provider.relayed(), vec![(1, 1), (1, 2)]);
}
