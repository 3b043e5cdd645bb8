//! Network announcement seam.
//!
//! Block and transaction propagation happens behind [`GossipSink`]. The
//! node announces committed blocks and accepted transactions through
//! it; a standalone deployment wires [`NullGossip`] and the chain runs
//! without a peer layer.

use async_trait::async_trait;
use signet_core::types::Height;
use signet_crypto::Hash;
use tracing::debug;

/// Outbound announcements to whatever peer layer is attached
#[async_trait]
pub trait GossipSink: Send + Sync {
    /// A block was committed locally
    async fn announce_block(&self, height: Height, hash: Hash);

    /// A transaction entered the local pool
    async fn announce_transaction(&self, hash: Hash);
}

/// Sink for nodes running without peers
#[derive(Debug, Clone, Default)]
pub struct NullGossip;

#[async_trait]
impl GossipSink for NullGossip {
    async fn announce_block(&self, height: Height, hash: Hash) {
        debug!(height, %hash, "block announcement dropped, no peer layer");
    }

    async fn announce_transaction(&self, hash: Hash) {
        debug!(%hash, "transaction announcement dropped, no peer layer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_gossip_accepts_announcements() {
        let sink = NullGossip;
        sink.announce_block(1, Hash::zero()).await;
        sink.announce_transaction(Hash::zero()).await;
    }
}
