// BandChain-side types: tunnels, packets, and threshold-signature artifacts

use serde::{Deserialize, Serialize};

use crate::error::RelayerError;

pub mod client;

pub use client::{BandClient, BandRpcClient};

/// A configured relay route from BandChain to one destination chain/contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tunnel {
    /// Tunnel identifier on BandChain
    pub id: u64,
    /// Latest packet sequence produced by the source chain
    pub latest_sequence: u64,
    /// Destination contract/account address
    pub target_address: String,
    /// Destination chain identifier (matches a configured chain name)
    pub target_chain_id: String,
    /// Whether the tunnel is active on the source chain
    pub is_active: bool,
    /// Address that created the tunnel
    pub creator: String,
}

/// One signal value carried by a packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalPrice {
    pub signal_id: String,
    pub price: u64,
}

/// Status of a threshold-signature signing on BandChain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningStatus {
    Success,
    Waiting,
    Failed,
}

/// A threshold-signature artifact authorizing a packet's contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signing {
    pub id: u64,
    /// Message bytes signed by the TSS group
    #[serde(with = "hex_bytes")]
    pub message: Vec<u8>,
    /// Chain-specific signature encoding over `message`
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    pub status: SigningStatus,
}

/// One sequenced unit of signed data to relay for a tunnel.
///
/// Immutable once fetched; the source chain remains the durable record, so a
/// packet only lives for the duration of one relay attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    pub tunnel_id: u64,
    pub sequence: u64,
    pub signal_prices: Vec<SignalPrice>,
    /// Signature from the currently active TSS group, if it has signed
    pub current_group_signing: Option<Signing>,
    /// Signature from an in-rotation incoming TSS group, if it has signed
    pub incoming_group_signing: Option<Signing>,
}

impl Packet {
    /// Select the signing to relay with.
    ///
    /// During key-group rotation both groups may co-sign; the current
    /// (already-trusted) group is preferred so relaying never depends on a
    /// not-yet-activated key set.
    pub fn relay_signing(&self) -> Result<&Signing, RelayerError> {
        self.current_group_signing
            .as_ref()
            .or(self.incoming_group_signing.as_ref())
            .ok_or(RelayerError::MissingSigning)
    }
}

/// Hex serde helper for signature/message byte fields
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}
