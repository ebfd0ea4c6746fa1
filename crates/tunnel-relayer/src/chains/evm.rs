// EVM chain provider
//
// Talks JSON-RPC to the configured endpoints and relays packets as contract
// calls against the tunnel's target contract.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use num_bigint::BigUint;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::endpoints::{Connector, EndpointManager};
use super::{ChainProvider, TunnelInfo};
use crate::alert::{AlertSink, Topic, PACKET_RELAY_FAILURE, STORE_WRITE_FAILURE};
use crate::band::{Packet, Signing};
use crate::error::RelayerError;
use crate::store::{TransactionRecord, TransactionStatus, TransactionStore};
use crate::wallet::{Signer, SignerPool, Wallet};

/// Parameters specific to an EVM chain, from the chain's config block
#[derive(Debug, Clone)]
pub struct EvmParams {
    /// EIP-155 chain ID
    pub chain_id: u64,
    /// Tunnel router contract receiving relayed packets
    pub router_address: String,
    pub gas_limit: u64,
    /// Multiplier applied to the node's suggested gas price
    pub gas_multiplier: f64,
}

/// Unsigned relay transaction for an EVM chain
#[derive(Debug, Clone)]
pub struct EvmTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub to: String,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub data: Vec<u8>,
}

impl EvmTransaction {
    /// Byte payload handed to the signer. Full RLP encoding is owned by the
    /// chain client; this only needs to bind every field.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&self.chain_id.to_be_bytes());
        payload.extend_from_slice(&self.nonce.to_be_bytes());
        payload.extend_from_slice(&self.gas_limit.to_be_bytes());
        payload.extend_from_slice(&self.gas_price.to_be_bytes());
        payload.extend_from_slice(self.to.as_bytes());
        payload.extend_from_slice(&self.data);
        payload
    }
}

/// A relay transaction with its sender signature attached
#[derive(Debug, Clone)]
pub struct SignedEvmTransaction {
    pub tx: EvmTransaction,
    pub signature: Vec<u8>,
}

/// Selector for `relay(bytes message, bytes signature)` on the target contract
const RELAY_SELECTOR: [u8; 4] = [0xd6, 0x3c, 0xb1, 0x8a];

/// Build the contract-call data carrying the signed packet
pub fn relay_calldata(signing: &Signing) -> Vec<u8> {
    let mut data = RELAY_SELECTOR.to_vec();
    data.extend(encode_bytes(&signing.message));
    data.extend(encode_bytes(&signing.signature));
    data
}

// length word followed by 32-byte right-padded content words
fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 24];
    out.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
    out.extend_from_slice(bytes);
    let padding = (32 - bytes.len() % 32) % 32;
    out.extend(std::iter::repeat(0u8).take(padding));
    out
}

/// Narrow EVM node interface used by the provider
#[async_trait]
pub trait EvmClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, RelayerError>;

    /// Pending-state transaction count of an account
    async fn nonce(&self, address: &str) -> Result<u64, RelayerError>;

    async fn gas_price(&self) -> Result<u64, RelayerError>;

    async fn balance(&self, address: &str) -> Result<BigUint, RelayerError>;

    /// Activation flag and consumed sequence of a tunnel on the target contract
    async fn tunnel_info(
        &self,
        target_address: &str,
        tunnel_id: u64,
    ) -> Result<TunnelInfo, RelayerError>;

    /// Submit a signed transaction, returning its hash
    async fn broadcast(&self, tx: &SignedEvmTransaction) -> Result<String, RelayerError>;
}

/// JSON-RPC implementation of [`EvmClient`] over reqwest
pub struct EvmRpcClient {
    http: reqwest::Client,
    endpoint: String,
    /// Per-request timeout for transaction submission; queries use the
    /// client-wide timeout
    execute_timeout: Duration,
}

impl EvmRpcClient {
    pub fn new(
        endpoint: &str,
        timeout: Duration,
        execute_timeout: Duration,
    ) -> Result<Self, RelayerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayerError::Config(format!("evm http client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            execute_timeout,
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RelayerError> {
        self.request(method, params, None).await
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, RelayerError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response: Value = request
            .send()
            .await
            .map_err(|e| RelayerError::Rpc(e.to_string()))?
            .json()
            .await
            .map_err(|e| RelayerError::MalformedResponse(e.to_string()))?;
        if let Some(err) = response.get("error") {
            return Err(RelayerError::Rpc(err.to_string()));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| RelayerError::MalformedResponse("missing result".to_string()))
    }

    async fn call_quantity(&self, method: &str, params: Value) -> Result<u64, RelayerError> {
        let result = self.call(method, params).await?;
        parse_quantity(&result)
    }
}

fn parse_quantity(value: &Value) -> Result<u64, RelayerError> {
    let s = value
        .as_str()
        .ok_or_else(|| RelayerError::MalformedResponse(format!("expected quantity, got {value}")))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| RelayerError::MalformedResponse(format!("bad quantity {s}: {e}")))
}

#[async_trait]
impl EvmClient for EvmRpcClient {
    async fn block_number(&self) -> Result<u64, RelayerError> {
        self.call_quantity("eth_blockNumber", json!([])).await
    }

    async fn nonce(&self, address: &str) -> Result<u64, RelayerError> {
        self.call_quantity("eth_getTransactionCount", json!([address, "pending"]))
            .await
    }

    async fn gas_price(&self) -> Result<u64, RelayerError> {
        self.call_quantity("eth_gasPrice", json!([])).await
    }

    async fn balance(&self, address: &str) -> Result<BigUint, RelayerError> {
        let result = self.call("eth_getBalance", json!([address, "latest"])).await?;
        let s = result.as_str().ok_or_else(|| {
            RelayerError::MalformedResponse(format!("expected balance, got {result}"))
        })?;
        BigUint::parse_bytes(s.trim_start_matches("0x").as_bytes(), 16)
            .ok_or_else(|| RelayerError::MalformedResponse(format!("bad balance {s}")))
    }

    async fn tunnel_info(
        &self,
        target_address: &str,
        tunnel_id: u64,
    ) -> Result<TunnelInfo, RelayerError> {
        // tunnelInfo(uint64) -> (bool isActive, uint64 latestSequence)
        let mut data = vec![0x2d, 0x4f, 0x90, 0x1e];
        data.extend_from_slice(&[0u8; 24]);
        data.extend_from_slice(&tunnel_id.to_be_bytes());
        let result = self
            .call(
                "eth_call",
                json!([{ "to": target_address, "data": format!("0x{}", hex::encode(data)) }, "latest"]),
            )
            .await?;
        let s = result.as_str().ok_or_else(|| {
            RelayerError::MalformedResponse(format!("expected call data, got {result}"))
        })?;
        let raw = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| RelayerError::MalformedResponse(e.to_string()))?;
        if raw.len() < 64 {
            return Err(RelayerError::MalformedResponse(format!(
                "tunnel info call returned {} bytes, expected 64",
                raw.len()
            )));
        }
        let is_active = raw[..32].iter().any(|b| *b != 0);
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&raw[56..64]);
        Ok(TunnelInfo {
            id: tunnel_id,
            target_address: target_address.to_string(),
            is_active,
            latest_sequence: u64::from_be_bytes(seq),
        })
    }

    async fn broadcast(&self, tx: &SignedEvmTransaction) -> Result<String, RelayerError> {
        // wire encoding: signed fields followed by the sender signature
        let mut raw = tx.tx.signing_payload();
        raw.extend_from_slice(&tx.signature);
        let result = self
            .request(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
                Some(self.execute_timeout),
            )
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RelayerError::MalformedResponse(format!("expected tx hash, got {result}")))
    }
}

/// Connects [`EvmRpcClient`]s for the endpoint manager
pub struct EvmJsonRpcConnector {
    timeout: Duration,
    execute_timeout: Duration,
}

impl EvmJsonRpcConnector {
    pub fn new(timeout: Duration, execute_timeout: Duration) -> Self {
        Self {
            timeout,
            execute_timeout,
        }
    }
}

#[async_trait]
impl Connector for EvmJsonRpcConnector {
    type Client = Arc<dyn EvmClient>;

    async fn connect(&self, endpoint: &str) -> Result<(Self::Client, u64), RelayerError> {
        let client = EvmRpcClient::new(endpoint, self.timeout, self.execute_timeout)?;
        let height = client.block_number().await?;
        Ok((Arc::new(client), height))
    }
}

/// Chain provider for one EVM chain
pub struct EvmProvider<C: Connector<Client = Arc<dyn EvmClient>>> {
    chain_name: String,
    params: EvmParams,
    max_retry: u32,
    retry_delay: Duration,
    liveliness_interval: Duration,
    endpoints: Arc<EndpointManager<C>>,
    wallet: Arc<dyn Wallet>,
    pool: SignerPool,
    store: Arc<dyn TransactionStore>,
    alerts: Arc<dyn AlertSink>,
}

impl<C: Connector<Client = Arc<dyn EvmClient>>> EvmProvider<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain_name: &str,
        params: EvmParams,
        max_retry: u32,
        retry_delay: Duration,
        liveliness_interval: Duration,
        endpoints: EndpointManager<C>,
        wallet: Arc<dyn Wallet>,
        store: Arc<dyn TransactionStore>,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<Self, RelayerError> {
        let pool = SignerPool::load(wallet.as_ref())?;
        Ok(Self {
            chain_name: chain_name.to_string(),
            params,
            max_retry,
            retry_delay,
            liveliness_interval,
            endpoints: Arc::new(endpoints),
            wallet,
            pool,
            store,
            alerts,
        })
    }

    async fn try_relay(
        &self,
        signer: &dyn Signer,
        signing: &Signing,
        cached_nonce: &mut Option<u64>,
    ) -> Result<(String, u64), RelayerError> {
        let client = self.endpoints.check_and_connect().await?;

        let nonce = match *cached_nonce {
            Some(nonce) => nonce,
            None => {
                let nonce = client.nonce(signer.address()).await?;
                *cached_nonce = Some(nonce);
                nonce
            }
        };

        let gas_price = client.gas_price().await?;
        let gas_price = (gas_price as f64 * self.params.gas_multiplier) as u64;

        let tx = EvmTransaction {
            chain_id: self.params.chain_id,
            nonce,
            to: self.params.router_address.clone(),
            gas_limit: self.params.gas_limit,
            gas_price,
            data: relay_calldata(signing),
        };

        let signature = signer.sign(&tx.signing_payload())?;
        let signed = SignedEvmTransaction { tx, signature };

        let tx_hash = client.broadcast(&signed).await?;
        Ok((tx_hash, gas_price))
    }

    async fn persist_outcome(&self, record: TransactionRecord) {
        let tunnel_id = record.tunnel_id;
        if let Err(err) = self.store.add_or_update_transaction(record).await {
            warn!(chain = %self.chain_name, %err, "failed to persist transaction record");
            let topic = Topic::new(STORE_WRITE_FAILURE)
                .with_tunnel_id(tunnel_id)
                .with_chain_name(&self.chain_name);
            self.alerts.trigger(&topic, &err.to_string()).await;
        }
    }
}

#[async_trait]
impl<C: Connector<Client = Arc<dyn EvmClient>>> ChainProvider for EvmProvider<C> {
    fn chain_name(&self) -> &str {
        &self.chain_name
    }

    async fn init(&self, shutdown: watch::Receiver<bool>) -> Result<(), RelayerError> {
        self.endpoints.connect().await?;
        Arc::clone(&self.endpoints).start_liveliness_check(self.liveliness_interval, shutdown);
        info!(chain = %self.chain_name, "evm provider initialized");
        Ok(())
    }

    async fn query_tunnel_info(
        &self,
        tunnel_id: u64,
        target_address: &str,
    ) -> Result<TunnelInfo, RelayerError> {
        let client = self.endpoints.check_and_connect().await?;
        client.tunnel_info(target_address, tunnel_id).await
    }

    async fn relay_packet(&self, packet: &Packet) -> Result<(), RelayerError> {
        let signing = packet.relay_signing()?;
        let guard = self.pool.acquire().await?;
        let signer = guard.signer();

        let mut cached_nonce: Option<u64> = None;
        let mut last_error = String::new();

        for attempt in 1..=self.max_retry {
            match self
                .try_relay(signer, signing, &mut cached_nonce)
                .await
            {
                Ok((tx_hash, gas_price)) => {
                    info!(
                        chain = %self.chain_name,
                        tunnel_id = packet.tunnel_id,
                        sequence = packet.sequence,
                        tx_hash, attempt,
                        "packet relayed"
                    );
                    self.persist_outcome(TransactionRecord {
                        tx_hash,
                        tunnel_id: packet.tunnel_id,
                        sequence: packet.sequence,
                        chain_name: self.chain_name.clone(),
                        chain_type: "evm".to_string(),
                        source_address: signer.address().to_string(),
                        status: TransactionStatus::Success,
                        signal_values: packet.signal_prices.clone(),
                        fee: Some(gas_price.saturating_mul(self.params.gas_limit)),
                    })
                    .await;
                    let topic = Topic::new(PACKET_RELAY_FAILURE)
                        .with_tunnel_id(packet.tunnel_id)
                        .with_chain_name(&self.chain_name);
                    self.alerts.reset(&topic).await;
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        chain = %self.chain_name,
                        tunnel_id = packet.tunnel_id,
                        sequence = packet.sequence,
                        attempt, %err,
                        "relay attempt failed"
                    );
                    if err.is_sequence_conflict() {
                        // self-heal: refetch the nonce on the next attempt
                        cached_nonce = None;
                    }
                    last_error = err.to_string();
                    if attempt < self.max_retry {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        let topic = Topic::new(PACKET_RELAY_FAILURE)
            .with_tunnel_id(packet.tunnel_id)
            .with_chain_name(&self.chain_name);
        self.alerts.trigger(&topic, &last_error).await;
        Err(RelayerError::MaxRetryExceeded {
            attempts: self.max_retry,
            last_error,
        })
    }

    async fn query_balance(&self, key_name: &str) -> Result<BigUint, RelayerError> {
        let signer = self
            .wallet
            .get_signer(key_name)
            .ok_or_else(|| RelayerError::KeyNotFound(key_name.to_string()))?;
        let client = self.endpoints.check_and_connect().await?;
        debug!(chain = %self.chain_name, key_name, "querying balance");
        client.balance(signer.address()).await
    }
}
