// XRPL chain provider
//
// Relays packets as oracle price-update transactions submitted from the
// signer's own oracle account.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use num_bigint::BigUint;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{info, warn};

use super::endpoints::{Connector, EndpointManager};
use super::{ChainProvider, TunnelInfo};
use crate::alert::{AlertSink, Topic, PACKET_RELAY_FAILURE, STORE_WRITE_FAILURE};
use crate::band::{Packet, Signing};
use crate::error::RelayerError;
use crate::store::{TransactionRecord, TransactionStatus, TransactionStore};
use crate::wallet::{Signer, SignerPool, Wallet};

/// Parameters specific to an XRPL chain, from the chain's config block
#[derive(Debug, Clone)]
pub struct XrplParams {
    /// Decimal scale applied to relayed prices
    pub price_scale: u8,
    /// Transaction fee in drops
    pub fee: u64,
    /// Ledgers ahead of the current index after which the tx expires
    pub sequence_interval: u64,
    /// Oracle document the price updates are written to
    pub oracle_document_id: u64,
}

/// One price entry of an oracle update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XrplPriceEntry {
    pub base_asset: String,
    pub price: u64,
    pub scale: u8,
}

/// Unsigned oracle price-update transaction
#[derive(Debug, Clone)]
pub struct XrplOracleTx {
    pub account: String,
    pub sequence: u64,
    pub fee: u64,
    pub last_ledger_sequence: u64,
    pub oracle_document_id: u64,
    pub price_data: Vec<XrplPriceEntry>,
    /// TSS signature authorizing the update, carried as a memo
    pub attestation: Vec<u8>,
}

impl XrplOracleTx {
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(self.account.as_bytes());
        payload.extend_from_slice(&self.sequence.to_be_bytes());
        payload.extend_from_slice(&self.fee.to_be_bytes());
        payload.extend_from_slice(&self.last_ledger_sequence.to_be_bytes());
        payload.extend_from_slice(&self.oracle_document_id.to_be_bytes());
        for entry in &self.price_data {
            payload.extend_from_slice(entry.base_asset.as_bytes());
            payload.extend_from_slice(&entry.price.to_be_bytes());
            payload.push(entry.scale);
        }
        payload.extend_from_slice(&self.attestation);
        payload
    }
}

/// A signed oracle update ready for submission
#[derive(Debug, Clone)]
pub struct SignedXrplTx {
    pub tx: XrplOracleTx,
    pub signature: Vec<u8>,
}

/// Narrow XRPL node interface used by the provider
#[async_trait]
pub trait XrplClient: Send + Sync {
    /// Current (open) ledger index
    async fn ledger_index(&self) -> Result<u64, RelayerError>;

    /// Next transaction sequence of an account
    async fn account_sequence(&self, address: &str) -> Result<u64, RelayerError>;

    /// Base fee in drops
    async fn fee(&self) -> Result<u64, RelayerError>;

    /// XRP balance of an account, in drops
    async fn balance(&self, address: &str) -> Result<BigUint, RelayerError>;

    /// Oracle/tunnel state held by the target account
    async fn tunnel_info(
        &self,
        target_address: &str,
        tunnel_id: u64,
    ) -> Result<TunnelInfo, RelayerError>;

    /// Submit a signed transaction, returning its hash
    async fn submit(&self, tx: &SignedXrplTx) -> Result<String, RelayerError>;
}

/// JSON-RPC implementation of [`XrplClient`] over reqwest
pub struct XrplRpcClient {
    http: reqwest::Client,
    endpoint: String,
    /// Per-request timeout for transaction submission; queries use the
    /// client-wide timeout
    execute_timeout: Duration,
}

impl XrplRpcClient {
    pub fn new(
        endpoint: &str,
        timeout: Duration,
        execute_timeout: Duration,
    ) -> Result<Self, RelayerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayerError::Config(format!("xrpl http client: {e}")))?;
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
        let body = json!({ "method": method, "params": [params] });
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
        let result = response
            .get("result")
            .cloned()
            .ok_or_else(|| RelayerError::MalformedResponse("missing result".to_string()))?;
        if result.get("status").and_then(Value::as_str) == Some("error") {
            let message = result
                .get("error_message")
                .or_else(|| result.get("error"))
                .map(Value::to_string)
                .unwrap_or_else(|| "unknown xrpl error".to_string());
            return Err(RelayerError::Rpc(message));
        }
        Ok(result)
    }
}

fn field_u64(value: &Value, pointer: &str) -> Result<u64, RelayerError> {
    value
        .pointer(pointer)
        .and_then(Value::as_u64)
        .ok_or_else(|| RelayerError::MalformedResponse(format!("missing field {pointer}")))
}

#[async_trait]
impl XrplClient for XrplRpcClient {
    async fn ledger_index(&self) -> Result<u64, RelayerError> {
        let result = self.call("ledger_current", json!({})).await?;
        field_u64(&result, "/ledger_current_index")
    }

    async fn account_sequence(&self, address: &str) -> Result<u64, RelayerError> {
        let result = self
            .call(
                "account_info",
                json!({ "account": address, "ledger_index": "current" }),
            )
            .await?;
        field_u64(&result, "/account_data/Sequence")
    }

    async fn fee(&self) -> Result<u64, RelayerError> {
        let result = self.call("fee", json!({})).await?;
        let drops = result
            .pointer("/drops/base_fee")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayerError::MalformedResponse("missing base_fee".to_string()))?;
        drops
            .parse::<u64>()
            .map_err(|e| RelayerError::MalformedResponse(format!("bad base_fee {drops}: {e}")))
    }

    async fn balance(&self, address: &str) -> Result<BigUint, RelayerError> {
        let result = self
            .call(
                "account_info",
                json!({ "account": address, "ledger_index": "current" }),
            )
            .await?;
        let balance = result
            .pointer("/account_data/Balance")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayerError::MalformedResponse("missing Balance".to_string()))?;
        BigUint::parse_bytes(balance.as_bytes(), 10)
            .ok_or_else(|| RelayerError::MalformedResponse(format!("bad balance {balance}")))
    }

    async fn tunnel_info(
        &self,
        target_address: &str,
        tunnel_id: u64,
    ) -> Result<TunnelInfo, RelayerError> {
        // an existing, funded account is an active tunnel target; the
        // consumed sequence lives in the oracle entry's LatestSequence field
        match self
            .call(
                "account_objects",
                json!({ "account": target_address, "type": "oracle" }),
            )
            .await
        {
            Ok(result) => {
                let latest_sequence = result
                    .pointer("/account_objects/0/LatestSequence")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                Ok(TunnelInfo {
                    id: tunnel_id,
                    target_address: target_address.to_string(),
                    is_active: true,
                    latest_sequence,
                })
            }
            Err(RelayerError::Rpc(msg)) if msg.to_lowercase().contains("actnotfound") => {
                Ok(TunnelInfo {
                    id: tunnel_id,
                    target_address: target_address.to_string(),
                    is_active: false,
                    latest_sequence: 0,
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn submit(&self, tx: &SignedXrplTx) -> Result<String, RelayerError> {
        let mut blob = tx.tx.signing_payload();
        blob.extend_from_slice(&tx.signature);
        let result = self
            .request(
                "submit",
                json!({ "tx_blob": hex::encode(blob) }),
                Some(self.execute_timeout),
            )
            .await?;
        let engine_result = result
            .pointer("/engine_result")
            .and_then(Value::as_str)
            .unwrap_or("");
        if !engine_result.is_empty() && engine_result != "tesSUCCESS" {
            return Err(RelayerError::Rpc(engine_result.to_string()));
        }
        result
            .pointer("/tx_json/hash")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RelayerError::MalformedResponse("missing tx hash".to_string()))
    }
}

/// Connects [`XrplRpcClient`]s for the endpoint manager
pub struct XrplJsonRpcConnector {
    timeout: Duration,
    execute_timeout: Duration,
}

impl XrplJsonRpcConnector {
    pub fn new(timeout: Duration, execute_timeout: Duration) -> Self {
        Self {
            timeout,
            execute_timeout,
        }
    }
}

#[async_trait]
impl Connector for XrplJsonRpcConnector {
    type Client = Arc<dyn XrplClient>;

    async fn connect(&self, endpoint: &str) -> Result<(Self::Client, u64), RelayerError> {
        let client = XrplRpcClient::new(endpoint, self.timeout, self.execute_timeout)?;
        let height = client.ledger_index().await?;
        Ok((Arc::new(client), height))
    }
}

/// Build the oracle price entries for a packet
pub fn price_data(packet: &Packet, scale: u8) -> Vec<XrplPriceEntry> {
    packet
        .signal_prices
        .iter()
        .map(|sp| XrplPriceEntry {
            base_asset: sp.signal_id.clone(),
            price: sp.price,
            scale,
        })
        .collect()
}

/// Chain provider for one XRPL chain
pub struct XrplProvider<C: Connector<Client = Arc<dyn XrplClient>>> {
    chain_name: String,
    params: XrplParams,
    max_retry: u32,
    retry_delay: Duration,
    liveliness_interval: Duration,
    endpoints: Arc<EndpointManager<C>>,
    wallet: Arc<dyn Wallet>,
    pool: SignerPool,
    store: Arc<dyn TransactionStore>,
    alerts: Arc<dyn AlertSink>,
}

impl<C: Connector<Client = Arc<dyn XrplClient>>> XrplProvider<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain_name: &str,
        params: XrplParams,
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
        packet: &Packet,
        signing: &Signing,
        sequence: &mut u64,
    ) -> Result<(String, u64), RelayerError> {
        let client = self.endpoints.check_and_connect().await?;

        // sequence is fetched only while unset; broadcast-layer failures keep
        // the cached value and only a sequence conflict clears it
        if *sequence == 0 {
            *sequence = client.account_sequence(signer.address()).await?;
        }

        let fee = client.fee().await.unwrap_or(self.params.fee);
        let ledger_index = client.ledger_index().await?;

        let tx = XrplOracleTx {
            account: signer.address().to_string(),
            sequence: *sequence,
            fee,
            last_ledger_sequence: ledger_index + self.params.sequence_interval,
            oracle_document_id: self.params.oracle_document_id,
            price_data: price_data(packet, self.params.price_scale),
            attestation: signing.signature.clone(),
        };

        let signature = signer.sign(&tx.signing_payload())?;
        let signed = SignedXrplTx { tx, signature };

        let tx_hash = client.submit(&signed).await?;
        Ok((tx_hash, fee))
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
impl<C: Connector<Client = Arc<dyn XrplClient>>> ChainProvider for XrplProvider<C> {
    fn chain_name(&self) -> &str {
        &self.chain_name
    }

    async fn init(&self, shutdown: watch::Receiver<bool>) -> Result<(), RelayerError> {
        self.endpoints.connect().await?;
        Arc::clone(&self.endpoints).start_liveliness_check(self.liveliness_interval, shutdown);
        info!(chain = %self.chain_name, "xrpl provider initialized");
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

        let mut sequence: u64 = 0;
        let mut last_error = String::new();

        for attempt in 1..=self.max_retry {
            match self.try_relay(signer, packet, signing, &mut sequence).await {
                Ok((tx_hash, fee)) => {
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
                        chain_type: "xrpl".to_string(),
                        source_address: signer.address().to_string(),
                        status: TransactionStatus::Success,
                        signal_values: packet.signal_prices.clone(),
                        fee: Some(fee),
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
                        sequence = 0;
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
        client.balance(signer.address()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::{SignalPrice, SigningStatus};

    #[test]
    fn test_price_data_applies_configured_scale() {
        let packet = Packet {
            tunnel_id: 1,
            sequence: 1,
            signal_prices: vec![
                SignalPrice {
                    signal_id: "XRP".to_string(),
                    price: 52_000,
                },
                SignalPrice {
                    signal_id: "BTC".to_string(),
                    price: 97_000_000,
                },
            ],
            current_group_signing: None,
            incoming_group_signing: None,
        };
        let entries = price_data(&packet, 4);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].base_asset, "XRP");
        assert_eq!(entries[0].scale, 4);
        assert_eq!(entries[1].price, 97_000_000);
    }

    #[test]
    fn test_oracle_tx_payload_binds_sequence() {
        let tx = XrplOracleTx {
            account: "rRelayer".to_string(),
            sequence: 11,
            fee: 10,
            last_ledger_sequence: 500,
            oracle_document_id: 1,
            price_data: vec![],
            attestation: vec![0xaa],
        };
        let base = tx.signing_payload();
        let mut bumped = tx.clone();
        bumped.sequence = 12;
        assert_ne!(base, bumped.signing_payload());
    }

    #[test]
    fn test_signing_attestation_is_bound() {
        let signing = Signing {
            id: 1,
            message: vec![1],
            signature: vec![2, 3],
            status: SigningStatus::Success,
        };
        let tx = XrplOracleTx {
            account: "rRelayer".to_string(),
            sequence: 1,
            fee: 10,
            last_ledger_sequence: 500,
            oracle_document_id: 1,
            price_data: vec![],
            attestation: signing.signature.clone(),
        };
        assert!(tx
            .signing_payload()
            .windows(2)
            .any(|w| w == [2u8, 3u8].as_slice()));
    }

    #[tokio::test]
    async fn test_submit_uses_execute_timeout() {
        // accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                match listener.accept().await {
                    Ok((socket, _)) => held.push(socket),
                    Err(_) => break,
                }
            }
        });

        let client = XrplRpcClient::new(
            &format!("http://{addr}"),
            Duration::from_secs(30),
            Duration::from_millis(100),
        )
        .unwrap();
        let signed = SignedXrplTx {
            tx: XrplOracleTx {
                account: "rRelayer".to_string(),
                sequence: 1,
                fee: 10,
                last_ledger_sequence: 500,
                oracle_document_id: 1,
                price_data: vec![],
                attestation: vec![],
            },
            signature: vec![0u8; 64],
        };

        let start = std::time::Instant::now();
        let err = client.submit(&signed).await.unwrap_err();
        assert!(matches!(err, RelayerError::Rpc(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
