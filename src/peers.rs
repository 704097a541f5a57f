//! Membership table for discovered peers.
//!
//! The table is the only shared mutable state in the daemon. It maps a
//! peer's advertised instance name to its most recently resolved
//! addresses. The discovery loop writes it, the poll loop reads it;
//! both go through the lock for the shortest possible critical section
//! and never perform I/O while holding it.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

use log::info;
use tokio::sync::RwLock;

/// One discovered peer.
///
/// A later discovery of the same `instance_id` overwrites the entry
/// wholesale; address lists are never merged. `addresses` may be empty
/// when mDNS resolved the instance but supplied no IPv4 address, in
/// which case the peer is kept but cannot be polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub instance_id: String,
    pub addresses: Vec<Ipv4Addr>,
}

impl PeerEntry {
    pub fn new(instance_id: impl Into<String>, addresses: Vec<Ipv4Addr>) -> Self {
        Self {
            instance_id: instance_id.into(),
            addresses,
        }
    }

    /// The address metrics requests are sent to.
    pub fn primary_address(&self) -> Option<Ipv4Addr> {
        self.addresses.first().copied()
    }
}

/// Concurrency-safe store of the current peer set.
#[derive(Debug, Default)]
pub struct PeerTable {
    inner: RwLock<HashMap<String, PeerEntry>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry keyed by its instance id.
    ///
    /// Logs "peer joined" exactly once per transition into existence.
    pub async fn upsert(&self, entry: PeerEntry) {
        let mut table = self.inner.write().await;
        if !table.contains_key(&entry.instance_id) {
            info!("peer joined: {}", entry.instance_id);
        }
        table.insert(entry.instance_id.clone(), entry);
    }

    /// Drop every entry whose key is absent from `seen`.
    ///
    /// `seen` is the full set of instance ids observed in the current
    /// discovery cycle. Entries present in both sides are untouched;
    /// their content is refreshed by `upsert`, not here.
    pub async fn reconcile(&self, seen: &HashSet<String>) {
        let mut table = self.inner.write().await;
        table.retain(|instance_id, _| {
            let keep = seen.contains(instance_id);
            if !keep {
                info!("peer left: {}", instance_id);
            }
            keep
        });
    }

    /// Coherent copy of the current entries, safe to iterate without
    /// holding the table's lock.
    pub async fn snapshot(&self) -> Vec<PeerEntry> {
        self.inner.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(id: &str, addrs: &[&str]) -> PeerEntry {
        PeerEntry::new(id, addrs.iter().map(|a| a.parse().unwrap()).collect())
    }

    async fn key_set(table: &PeerTable) -> HashSet<String> {
        table
            .snapshot()
            .await
            .into_iter()
            .map(|e| e.instance_id)
            .collect()
    }

    #[tokio::test]
    async fn upsert_overwrites_without_duplicating() {
        let table = PeerTable::new();
        table.upsert(entry("node-a", &["10.0.0.2"])).await;
        table.upsert(entry("node-a", &["10.0.0.9"])).await;

        let snapshot = table.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].primary_address(), Some("10.0.0.9".parse().unwrap()));
    }

    #[tokio::test]
    async fn table_tracks_each_discovery_snapshot_exactly() {
        let table = PeerTable::new();

        // Cycle 1: a and b show up.
        for e in [entry("a", &["10.0.0.1"]), entry("b", &["10.0.0.2"])] {
            table.upsert(e).await;
        }
        let cycle1: HashSet<String> = ["a".into(), "b".into()].into();
        table.reconcile(&cycle1).await;
        assert_eq!(key_set(&table).await, cycle1);

        // Cycle 2: b disappears, c joins.
        for e in [entry("a", &["10.0.0.1"]), entry("c", &["10.0.0.3"])] {
            table.upsert(e).await;
        }
        let cycle2: HashSet<String> = ["a".into(), "c".into()].into();
        table.reconcile(&cycle2).await;
        assert_eq!(key_set(&table).await, cycle2);
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let table = PeerTable::new();
        table.upsert(entry("a", &["10.0.0.1"])).await;
        table.upsert(entry("b", &[])).await;

        let seen: HashSet<String> = ["a".into(), "b".into()].into();
        table.reconcile(&seen).await;
        let first = key_set(&table).await;
        table.reconcile(&seen).await;
        assert_eq!(key_set(&table).await, first);
        assert_eq!(first, seen);
    }

    #[tokio::test]
    async fn reconcile_leaves_surviving_entries_untouched() {
        let table = PeerTable::new();
        table.upsert(entry("a", &["10.0.0.1", "10.0.0.2"])).await;
        table.upsert(entry("b", &["10.0.0.3"])).await;

        let seen: HashSet<String> = ["a".into()].into();
        table.reconcile(&seen).await;

        let snapshot = table.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0], entry("a", &["10.0.0.1", "10.0.0.2"]));
    }

    #[tokio::test]
    async fn concurrent_upserts_lose_no_updates() {
        let table = Arc::new(PeerTable::new());
        let mut handles = Vec::new();

        for i in 0..32 {
            let table = Arc::clone(&table);
            handles.push(tokio::spawn(async move {
                table.upsert(entry(&format!("node-{i}"), &["10.0.0.1"])).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(table.len().await, 32);
        let keys = key_set(&table).await;
        for i in 0..32 {
            assert!(keys.contains(&format!("node-{i}")));
        }
    }
}
