// Wallet and signer abstractions
// Keystore file formats and passphrase handling live outside this crate; the
// wallet only needs to hand out loaded signers.

use std::collections::HashMap;
use std::sync::Arc;

use secp256k1::{Message, Secp256k1, SecretKey, SignOnly};
use sha2::{Digest, Sha256};

use crate::error::RelayerError;

pub mod pool;

pub use pool::{SignerGuard, SignerPool};

/// A wallet-held key capable of producing a chain-native signature
pub trait Signer: Send + Sync {
    /// Human-readable key name
    fn name(&self) -> &str;

    /// Chain-native account address
    fn address(&self) -> &str;

    /// Sign an arbitrary payload
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, RelayerError>;

    /// Export the raw private key as hex
    fn export_private_key(&self) -> Result<String, RelayerError>;
}

/// Supplies signers for one chain
pub trait Wallet: Send + Sync {
    /// All configured signers, in load order
    fn signers(&self) -> Vec<Arc<dyn Signer>>;

    /// Look up a signer by key name
    fn get_signer(&self, name: &str) -> Option<Arc<dyn Signer>>;
}

/// A secp256k1 signer held in process memory.
///
/// The account address is supplied at construction alongside the key, since
/// address derivation is chain-specific and owned by the keystore layer.
pub struct LocalSigner {
    name: String,
    address: String,
    secret: SecretKey,
    secp: Secp256k1<SignOnly>,
}

impl LocalSigner {
    pub fn new(name: &str, address: &str, private_key_hex: &str) -> Result<Self, RelayerError> {
        let raw = hex::decode(private_key_hex.trim_start_matches("0x"))
            .map_err(|e| RelayerError::Config(format!("invalid private key hex: {e}")))?;
        let secret = SecretKey::from_slice(&raw)
            .map_err(|e| RelayerError::Config(format!("invalid private key: {e}")))?;
        Ok(Self {
            name: name.to_string(),
            address: address.to_string(),
            secret,
            secp: Secp256k1::signing_only(),
        })
    }
}

impl Signer for LocalSigner {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, RelayerError> {
        let digest = Sha256::digest(payload);
        let message = Message::from_digest_slice(digest.as_slice())
            .map_err(|e| RelayerError::Signing(e.to_string()))?;
        let signature = self.secp.sign_ecdsa(&message, &self.secret);
        Ok(signature.serialize_compact().to_vec())
    }

    fn export_private_key(&self) -> Result<String, RelayerError> {
        Ok(hex::encode(self.secret.secret_bytes()))
    }
}

/// In-process wallet over a fixed set of signers
pub struct MemoryWallet {
    order: Vec<Arc<dyn Signer>>,
    by_name: HashMap<String, Arc<dyn Signer>>,
}

impl MemoryWallet {
    pub fn new(signers: Vec<Arc<dyn Signer>>) -> Self {
        let by_name = signers
            .iter()
            .map(|s| (s.name().to_string(), Arc::clone(s)))
            .collect();
        Self {
            order: signers,
            by_name,
        }
    }

    /// Parse a wallet from a `name:address:private_key_hex` list separated by
    /// commas, the format used by the `RELAYER_KEYS_<CHAIN>` environment
    /// variables.
    pub fn from_spec(spec: &str) -> Result<Self, RelayerError> {
        let mut signers: Vec<Arc<dyn Signer>> = Vec::new();
        for entry in spec.split(',').filter(|e| !e.trim().is_empty()) {
            let mut parts = entry.trim().splitn(3, ':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(name), Some(address), Some(key)) => {
                    signers.push(Arc::new(LocalSigner::new(name, address, key)?));
                }
                _ => {
                    return Err(RelayerError::Config(format!(
                        "malformed key entry {entry:?}, expected name:address:private_key"
                    )))
                }
            }
        }
        Ok(Self::new(signers))
    }
}

impl Wallet for MemoryWallet {
    fn signers(&self) -> Vec<Arc<dyn Signer>> {
        self.order.clone()
    }

    fn get_signer(&self, name: &str) -> Option<Arc<dyn Signer>> {
        self.by_name.get(name).cloned()
    }
}
