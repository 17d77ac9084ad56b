//! One-shot delivery receipts.
//!
//! Every asynchronous operation hands the caller a [`Receipt`] that
//! completes exactly once: with `Ok(())` when the terminal phase of the
//! exchange is reached, or with the failure that ended the session.

use crate::error::ClientError;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Caller-visible completion signal for Publish/Subscribe/Unsubscribe.
#[derive(Debug)]
pub struct Receipt {
    rx: oneshot::Receiver<Result<(), ClientError>>,
}

impl Receipt {
    /// Create a receipt and the handle that will complete it.
    pub fn pair() -> (Self, CompletionHandle) {
        let (tx, rx) = oneshot::channel();
        (Self { rx }, CompletionHandle { tx: Some(tx) })
    }

    /// Wait for the exchange to finish.
    ///
    /// A handle dropped without signaling means the client shut down before
    /// the exchange completed.
    pub async fn wait(self) -> Result<(), ClientError> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClientError::Transport("client shut down".into())),
        }
    }
}

/// Single-use producer side of a [`Receipt`].
#[derive(Debug)]
pub struct CompletionHandle {
    tx: Option<oneshot::Sender<Result<(), ClientError>>>,
}

impl CompletionHandle {
    pub fn complete(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Ok(()));
        }
    }

    pub fn fail(mut self, err: ClientError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(err));
        }
    }
}

/// Packet id → pending receipt for acknowledged exchanges.
///
/// Only the logic core touches the registry. Completing an unknown id is a
/// no-op: duplicate broker acks are expected under QoS retransmission.
#[derive(Debug, Default)]
pub struct ReceiptRegistry {
    pending: HashMap<u16, CompletionHandle>,
}

impl ReceiptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, packet_id: u16, handle: CompletionHandle) {
        self.pending.insert(packet_id, handle);
    }

    /// Complete and remove the receipt for `packet_id`, if one is pending.
    pub fn complete(&mut self, packet_id: u16) -> bool {
        match self.pending.remove(&packet_id) {
            Some(handle) => {
                handle.complete();
                true
            }
            None => false,
        }
    }

    /// Fail every pending receipt with the same error. Used on shutdown.
    pub fn cancel_all(&mut self, err: &ClientError) {
        for (_, handle) in self.pending.drain() {
            handle.fail(err.clone());
        }
    }

    pub fn contains(&self, packet_id: u16) -> bool {
        self.pending.contains_key(&packet_id)
    }

    pub fn pending_ids(&self) -> Vec<u16> {
        self.pending.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receipt_completes_once() {
        let (receipt, handle) = Receipt::pair();
        let mut registry = ReceiptRegistry::new();
        registry.register(5, handle);

        assert!(registry.complete(5));
        // Duplicate ack on the same id is tolerated.
        assert!(!registry.complete(5));
        assert!(receipt.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_all_fails_pending() {
        let (receipt_a, handle_a) = Receipt::pair();
        let (receipt_b, handle_b) = Receipt::pair();
        let mut registry = ReceiptRegistry::new();
        registry.register(1, handle_a);
        registry.register(2, handle_b);

        registry.cancel_all(&ClientError::KeepAliveLost);
        assert!(registry.is_empty());
        assert_eq!(receipt_a.wait().await, Err(ClientError::KeepAliveLost));
        assert_eq!(receipt_b.wait().await, Err(ClientError::KeepAliveLost));
    }

    #[tokio::test]
    async fn test_dropped_handle_surfaces_shutdown() {
        let (receipt, handle) = Receipt::pair();
        drop(handle);
        assert!(matches!(
            receipt.wait().await,
            Err(ClientError::Transport(_))
        ));
    }
}
