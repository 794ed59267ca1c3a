//! Peer set (C10): the set of known "host:port" addresses, persisted to
//! the `peers` store bucket.
//!
//! Grounded on `original_source/lib/net/nodesnetwork.go`'s `NodeNetwork`
//! (a mutex-guarded `[]NodeAddr` with `AddNodeToKnown`/`RemoveNodeFromKnown`/
//! `CheckIsKnown`) and its `LoadInitialNodes` bootstrap flow, which fetches a
//! JSON document and only imports it if the document's genesis hash matches
//! the local one.

use demo_node_store::{Bucket, Store, StoreError};
use demo_node_types::Hash32;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("stored peer address is not valid utf-8")]
    Corrupted,
    #[error("bootstrap request failed: {0}")]
    Bootstrap(#[from] reqwest::Error),
}

#[derive(Deserialize)]
struct BootstrapDoc {
    nodes: Vec<String>,
    #[serde(default)]
    genesis: String,
}

pub struct PeerSet {
    store: Arc<Store>,
    cache: RwLock<HashSet<String>>,
}

impl PeerSet {
    pub async fn load(store: Arc<Store>) -> Result<Self, PeerError> {
        let mut set = HashSet::new();
        for (key, _) in store.iterate(Bucket::Peers).await? {
            set.insert(String::from_utf8(key).map_err(|_| PeerError::Corrupted)?);
        }
        Ok(PeerSet { store, cache: RwLock::new(set) })
    }

    /// Returns `true` if the address was newly added.
    pub async fn add(&self, addr: &str) -> Result<bool, PeerError> {
        let mut cache = self.cache.write().await;
        if cache.contains(addr) {
            return Ok(false);
        }
        self.store.put(Bucket::Peers, addr.as_bytes(), addr.as_bytes()).await?;
        cache.insert(addr.to_string());
        Ok(true)
    }

    pub async fn remove(&self, addr: &str) -> Result<(), PeerError> {
        self.store.delete(Bucket::Peers, addr.as_bytes()).await?;
        self.cache.write().await.remove(addr);
        Ok(())
    }

    pub async fn contains(&self, addr: &str) -> bool {
        self.cache.read().await.contains(addr)
    }

    pub async fn list(&self) -> Vec<String> {
        self.cache.read().await.iter().cloned().collect()
    }

    /// Fetches a `{nodes: [...], genesis: "<hex>"}` document from `url` and
    /// imports the listed addresses only if `genesis` is absent or matches
    /// `genesis_hash`. Returns the number of newly-added peers.
    pub async fn bootstrap(
        &self,
        client: &reqwest::Client,
        url: &str,
        genesis_hash: Hash32,
    ) -> Result<usize, PeerError> {
        let doc: BootstrapDoc = client
            .get(url)
            .timeout(Duration::from_secs(5))
            .send()
            .await?
            .json()
            .await?;

        if !doc.genesis.is_empty() && doc.genesis != hex::encode(genesis_hash) {
            tracing::warn!(url, "bootstrap document genesis mismatch, ignoring peer list");
            return Ok(0);
        }

        let mut added = 0;
        for node in doc.nodes {
            if self.add(&node).await? {
                added += 1;
            }
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn harness() -> PeerSet {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).await.unwrap());
        PeerSet::load(store).await.unwrap()
    }

    #[tokio::test]
    async fn add_persists_and_dedupes() {
        let peers = harness().await;
        assert!(peers.add("10.0.0.1:7000").await.unwrap());
        assert!(!peers.add("10.0.0.1:7000").await.unwrap());
        assert_eq!(peers.list().await, vec!["10.0.0.1:7000".to_string()]);
    }

    #[tokio::test]
    async fn remove_drops_from_cache_and_store() {
        let peers = harness().await;
        peers.add("10.0.0.1:7000").await.unwrap();
        peers.remove("10.0.0.1:7000").await.unwrap();
        assert!(!peers.contains("10.0.0.1:7000").await);
        assert!(peers.list().await.is_empty());
    }

    #[tokio::test]
    async fn reload_from_store_restores_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).await.unwrap());
        {
            let peers = PeerSet::load(Arc::clone(&store)).await.unwrap();
            peers.add("10.0.0.2:7000").await.unwrap();
        }
        let reloaded = PeerSet::load(store).await.unwrap();
        assert!(reloaded.contains("10.0.0.2:7000").await);
    }
}
