// Tunnel Relayer Library
// This module structure exposes the relayer components for testing and external use

pub mod alert;
pub mod band;
pub mod chains;
pub mod config;
pub mod error;
pub mod metrics;
pub mod relay;
pub mod store;
pub mod wallet;

// Re-export commonly used types for convenience
pub use alert::{AlertSink, LogAlertSink, Topic};
pub use band::{BandClient, BandRpcClient, Packet, SignalPrice, Signing, SigningStatus, Tunnel};
pub use chains::{ChainProvider, Connector, EndpointManager, EvmProvider, TunnelInfo, XrplProvider};
pub use config::{BandConfig, ChainConfig, ChainSpecificConfig, GlobalConfig, RelayerConfig};
pub use error::RelayerError;
pub use metrics::RelayerMetrics;
pub use relay::{Scheduler, TunnelRelayer};
pub use store::{MemoryStore, TransactionRecord, TransactionStatus, TransactionStore};
pub use wallet::{LocalSigner, MemoryWallet, Signer, SignerGuard, SignerPool, Wallet};
