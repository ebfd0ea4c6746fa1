// Bounded signer pool
//
// The pool is a fixed-capacity channel holding every idle signer for one
// chain. Relay attempts acquire a signer before touching the chain, so the
// degree of parallelism per chain is bounded by the signer count and a single
// signer's submissions are serialized without explicit locking.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use super::{Signer, Wallet};
use crate::error::RelayerError;

/// Bounded multiset of idle signers for one chain.
///
/// Invariant: a signer is either queued in the channel or checked out behind a
/// [`SignerGuard`], never both; dropping the guard returns it exactly once.
pub struct SignerPool {
    slots: mpsc::Sender<Arc<dyn Signer>>,
    idle: Mutex<mpsc::Receiver<Arc<dyn Signer>>>,
    capacity: usize,
}

impl SignerPool {
    /// Drain all configured signers of a wallet into a pool sized exactly to
    /// the signer count. The pool never grows.
    pub fn load(wallet: &dyn Wallet) -> Result<Self, RelayerError> {
        let signers = wallet.signers();
        if signers.is_empty() {
            return Err(RelayerError::SignerPoolClosed);
        }
        let capacity = signers.len();
        let (slots, idle) = mpsc::channel(capacity);
        for signer in signers {
            slots
                .try_send(signer)
                .map_err(|_| RelayerError::SignerPoolClosed)?;
        }
        Ok(Self {
            slots,
            idle: Mutex::new(idle),
            capacity,
        })
    }

    /// Check out a signer, suspending until one is idle.
    pub async fn acquire(&self) -> Result<SignerGuard, RelayerError> {
        let mut idle = self.idle.lock().await;
        let signer = idle.recv().await.ok_or(RelayerError::SignerPoolClosed)?;
        Ok(SignerGuard {
            signer,
            slots: self.slots.clone(),
        })
    }

    /// Total number of signers managed by the pool
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of signers currently idle in the pool
    pub fn idle_count(&self) -> usize {
        self.slots.max_capacity() - self.slots.capacity()
    }
}

/// A checked-out signer. Dropping the guard returns the signer to the pool
/// unconditionally, so a panic or early return during a relay attempt never
/// leaks a pool slot.
pub struct SignerGuard {
    signer: Arc<dyn Signer>,
    slots: mpsc::Sender<Arc<dyn Signer>>,
}

impl SignerGuard {
    pub fn signer(&self) -> &dyn Signer {
        self.signer.as_ref()
    }
}

impl Drop for SignerGuard {
    fn drop(&mut self) {
        // Cannot exceed capacity: exactly one guard exists per checked-out
        // signer, so a slot is always free for the return.
        let _ = self.slots.try_send(Arc::clone(&self.signer));
    }
}
