// Destination-chain providers
//
// Each chain family implements the same capability set behind one trait so
// the relay loop stays chain-agnostic.

use async_trait::async_trait;
use num_bigint::BigUint;
use tokio::sync::watch;

use crate::band::Packet;
use crate::error::RelayerError;

pub mod endpoints;
pub mod evm;
pub mod xrpl;

pub use endpoints::{Connector, EndpointManager};
pub use evm::EvmProvider;
pub use xrpl::XrplProvider;

/// On-chain tunnel state as seen by the destination chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelInfo {
    pub id: u64,
    pub target_address: String,
    /// Whether the destination contract/account accepts relayed packets
    pub is_active: bool,
    /// Latest packet sequence the destination has consumed
    pub latest_sequence: u64,
}

/// Uniform capability set for one destination chain
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Configured chain name this provider serves
    fn chain_name(&self) -> &str;

    /// Establish initial connectivity and start the background liveliness
    /// task. Fails only on total connectivity loss.
    async fn init(&self, shutdown: watch::Receiver<bool>) -> Result<(), RelayerError>;

    /// Read-only lookup of on-chain tunnel activation/sequence state
    async fn query_tunnel_info(
        &self,
        tunnel_id: u64,
        target_address: &str,
    ) -> Result<TunnelInfo, RelayerError>;

    /// Sign and broadcast one packet, retrying internally up to the
    /// configured bound. Returns a single terminal error after exhausting
    /// retries.
    async fn relay_packet(&self, packet: &Packet) -> Result<(), RelayerError>;

    /// Native balance of the named signer's account
    async fn query_balance(&self, key_name: &str) -> Result<BigUint, RelayerError>;
}
