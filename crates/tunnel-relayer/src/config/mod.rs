use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerConfig {
    pub global: GlobalConfig,
    pub band: BandConfig,
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Log level for the relayer
    pub log_level: String,
    /// Interval between tunnel polling iterations, in seconds
    pub checking_packet_interval_secs: u64,
    /// Interval between endpoint liveliness checks, in seconds
    pub liveliness_check_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandConfig {
    /// BandChain LCD endpoint
    pub endpoint: String,
    /// Query timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// RPC endpoints, raced at connect time
    pub endpoints: Vec<String>,
    /// Maximum relay attempts per packet
    pub max_retry: u32,
    /// Delay between relay attempts, in milliseconds
    pub retry_delay_ms: u64,
    /// Timeout for read-only queries, in seconds
    pub query_timeout_secs: u64,
    /// Timeout for transaction submission, in seconds
    pub execute_timeout_secs: u64,
    /// Chain-family-specific configuration
    pub specific: ChainSpecificConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChainSpecificConfig {
    #[serde(rename = "evm")]
    Evm {
        /// EIP-155 chain ID
        chain_id_num: u64,
        /// Tunnel router contract address
        router_address: String,
        /// Gas limit for relay transactions
        gas_limit: u64,
        /// Multiplier applied to the node's suggested gas price
        gas_multiplier: f64,
    },
    #[serde(rename = "xrpl")]
    Xrpl {
        /// Decimal scale applied to relayed prices
        price_scale: u8,
        /// Fallback transaction fee in drops
        fee: u64,
        /// Ledgers until a submitted transaction expires
        sequence_interval: u64,
        /// Oracle document receiving price updates
        oracle_document_id: u64,
    },
}

impl RelayerConfig {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RelayerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get chain configuration by name
    pub fn get_chain(&self, chain_name: &str) -> Option<&ChainConfig> {
        self.chains.get(chain_name)
    }
}

impl Default for RelayerConfig {
    fn default() -> Self {
        let mut chains = HashMap::new();

        chains.insert(
            "evm-testnet".to_string(),
            ChainConfig {
                endpoints: vec![
                    "https://rpc.sepolia.org".to_string(),
                    "https://rpc2.sepolia.org".to_string(),
                ],
                max_retry: 3,
                retry_delay_ms: 3000,
                query_timeout_secs: 10,
                execute_timeout_secs: 30,
                specific: ChainSpecificConfig::Evm {
                    chain_id_num: 11155111,
                    router_address: "0x0000000000000000000000000000000000000000".to_string(),
                    gas_limit: 300_000,
                    gas_multiplier: 1.2,
                },
            },
        );

        chains.insert(
            "xrpl-testnet".to_string(),
            ChainConfig {
                endpoints: vec!["https://s.altnet.rippletest.net:51234".to_string()],
                max_retry: 3,
                retry_delay_ms: 3000,
                query_timeout_secs: 10,
                execute_timeout_secs: 30,
                specific: ChainSpecificConfig::Xrpl {
                    price_scale: 9,
                    fee: 10,
                    sequence_interval: 20,
                    oracle_document_id: 1,
                },
            },
        );

        Self {
            global: GlobalConfig {
                log_level: "info".to_string(),
                checking_packet_interval_secs: 10,
                liveliness_check_interval_secs: 60,
            },
            band: BandConfig {
                endpoint: "https://laozi-testnet6.bandchain.org/api".to_string(),
                timeout_secs: 10,
            },
            chains,
        }
    }
}
