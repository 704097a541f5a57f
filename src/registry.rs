//! Registry of metrics reports received from peers.
//!
//! The poll loop is fire-and-forget: it never correlates a request
//! with its response. Responses instead land here when the datagram
//! listener sees a `RES` message, keyed by the sending peer's instance
//! id with the newest report winning. Callers that want a peer's
//! metrics can read the latest report or await the next one instead of
//! grepping log output.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::{Notify, RwLock};
use tokio::time::{timeout, Duration};

/// One metrics payload as received from a peer, untouched.
#[derive(Debug, Clone)]
pub struct PeerReport {
    pub payload: String,
    pub received_at: Instant,
}

/// Bounded result cache: at most one report per known peer.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    reports: RwLock<HashMap<String, PeerReport>>,
    updated: Notify,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the newest report for `peer_id` and wake any waiters.
    pub async fn record(&self, peer_id: &str, payload: String) {
        let report = PeerReport {
            payload,
            received_at: Instant::now(),
        };
        self.reports
            .write()
            .await
            .insert(peer_id.to_string(), report);
        self.updated.notify_waiters();
    }

    /// The most recent report from `peer_id`, if any has arrived.
    pub async fn latest(&self, peer_id: &str) -> Option<PeerReport> {
        self.reports.read().await.get(peer_id).cloned()
    }

    /// Wait until a report from `peer_id` is available.
    ///
    /// Returns immediately if one is already cached; otherwise blocks
    /// until the listener records one or `wait` elapses.
    pub async fn wait_for(&self, peer_id: &str, wait: Duration) -> Option<PeerReport> {
        let deadline = Instant::now() + wait;
        loop {
            // Arm the notification before checking, so a record() that
            // lands between the check and the await is not missed.
            let notified = self.updated.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(report) = self.latest(peer_id).await {
                return Some(report);
            }

            let remaining = deadline.checked_duration_since(Instant::now())?;
            if timeout(remaining, notified).await.is_err() {
                return None;
            }
        }
    }
}
