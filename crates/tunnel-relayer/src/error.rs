// Error types shared across the relayer

use thiserror::Error;

/// Errors produced by the relay engine and chain providers
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("packet has no signing to relay")]
    MissingSigning,

    #[error("no endpoint reachable for chain {0}")]
    NoEndpointReachable(String),

    #[error("signer pool is empty or not loaded")]
    SignerPoolClosed,

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("failed to relay packet after {attempts} attempts: {last_error}")]
    MaxRetryExceeded { attempts: u32, last_error: String },

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("malformed rpc response: {0}")]
    MalformedResponse(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl RelayerError {
    /// Whether the destination chain rejected our account sequence/nonce.
    /// Classified by message text since each chain client surfaces its own
    /// error strings.
    pub fn is_sequence_conflict(&self) -> bool {
        match self {
            RelayerError::Rpc(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("nonce too low")
                    || msg.contains("nonce too high")
                    || msg.contains("invalid nonce")
                    || msg.contains("tefpast_seq")
                    || msg.contains("terpre_seq")
                    || msg.contains("sequence mismatch")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_conflict_classification() {
        assert!(RelayerError::Rpc("nonce too low: got 4, expected 7".to_string())
            .is_sequence_conflict());
        assert!(RelayerError::Rpc("tefPAST_SEQ".to_string()).is_sequence_conflict());
        assert!(!RelayerError::Rpc("connection refused".to_string()).is_sequence_conflict());
        assert!(!RelayerError::MissingSigning.is_sequence_conflict());
    }
}
