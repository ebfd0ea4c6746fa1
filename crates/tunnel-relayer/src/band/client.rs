// Query client for the BandChain tunnel module

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{Packet, Signing, Tunnel};
use crate::error::RelayerError;

/// Read-only view of the source chain's tunnel state.
///
/// All methods may fail with transient network errors; callers treat every
/// failure as retryable at relay-loop granularity.
#[async_trait]
pub trait BandClient: Send + Sync {
    /// Fetch a tunnel by ID
    async fn get_tunnel(&self, tunnel_id: u64) -> Result<Tunnel, RelayerError>;

    /// Fetch one packet of a tunnel by sequence
    async fn get_tunnel_packet(
        &self,
        tunnel_id: u64,
        sequence: u64,
    ) -> Result<Packet, RelayerError>;

    /// Fetch a threshold-signature signing by ID
    async fn get_signing(&self, signing_id: u64) -> Result<Signing, RelayerError>;

    /// List tunnels created by an address
    async fn get_tunnels_by_creator(&self, creator: &str) -> Result<Vec<Tunnel>, RelayerError>;
}

/// REST-backed implementation against a BandChain LCD endpoint
pub struct BandRpcClient {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct TunnelResponse {
    tunnel: Tunnel,
}

#[derive(Deserialize)]
struct TunnelsResponse {
    tunnels: Vec<Tunnel>,
}

#[derive(Deserialize)]
struct PacketResponse {
    packet: Packet,
}

#[derive(Deserialize)]
struct SigningResponse {
    signing: Signing,
}

impl BandRpcClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, RelayerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayerError::Config(format!("band http client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, RelayerError> {
        let url = format!("{}{}", self.endpoint, path);
        debug!(url, "querying bandchain");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| RelayerError::Rpc(e.to_string()))?
            .error_for_status()
            .map_err(|e| RelayerError::Rpc(e.to_string()))?;
        response
            .json::<T>()
            .await
            .map_err(|e| RelayerError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl BandClient for BandRpcClient {
    async fn get_tunnel(&self, tunnel_id: u64) -> Result<Tunnel, RelayerError> {
        let resp: TunnelResponse = self
            .get_json(&format!("/band/tunnel/v1beta1/tunnels/{tunnel_id}"))
            .await?;
        Ok(resp.tunnel)
    }

    async fn get_tunnel_packet(
        &self,
        tunnel_id: u64,
        sequence: u64,
    ) -> Result<Packet, RelayerError> {
        let resp: PacketResponse = self
            .get_json(&format!(
                "/band/tunnel/v1beta1/tunnels/{tunnel_id}/packets/{sequence}"
            ))
            .await?;
        Ok(resp.packet)
    }

    async fn get_signing(&self, signing_id: u64) -> Result<Signing, RelayerError> {
        let resp: SigningResponse = self
            .get_json(&format!("/band/bandtss/v1beta1/signings/{signing_id}"))
            .await?;
        Ok(resp.signing)
    }

    async fn get_tunnels_by_creator(&self, creator: &str) -> Result<Vec<Tunnel>, RelayerError> {
        let resp: TunnelsResponse = self
            .get_json(&format!("/band/tunnel/v1beta1/tunnels?creator={creator}"))
            .await?;
        Ok(resp.tunnels)
    }
}
