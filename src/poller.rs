//! Periodic metrics poll fan-out.
//!
//! Polling is push-initiated and stateless: each cycle takes a table
//! snapshot and fires one request datagram per contactable peer, then
//! waits for every send of the cycle to finish before sleeping. The
//! poller never correlates requests with responses; replies come back
//! through the listener and land in the metrics registry.

use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Result;
use log::{debug, info, warn};
use tokio::sync::watch;

use crate::config::Config;
use crate::net::{self, Identity};
use crate::peers::PeerTable;
use crate::protocol::Message;

pub async fn run_poller(
    cfg: &Config,
    table: Arc<PeerTable>,
    identity: Identity,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut ticker = tokio::time::interval(cfg.poll_interval());
    // The first tick fires immediately; skip it so discovery has a
    // cycle to populate the table.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("metrics poller shutting down");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        let sent = poll_cycle(&table, &identity, cfg.port).await;
        debug!("metrics poll cycle complete, {} request(s) sent", sent);
    }
}

/// Run one fan-out over the current table snapshot.
///
/// Skips the local instance and peers without an IPv4 address; every
/// remaining peer gets its own send task addressed to the peer's first
/// address on the protocol port. Returns after all tasks of the cycle
/// finished, with the number of requests launched.
pub(crate) async fn poll_cycle(table: &PeerTable, identity: &Identity, port: u16) -> usize {
    let peers = table.snapshot().await;
    let mut sends = Vec::new();

    for peer in peers {
        if peer.instance_id == identity.instance {
            continue;
        }
        let Some(address) = peer.primary_address() else {
            info!("no IPv4 address for peer {}, skipping", peer.instance_id);
            continue;
        };

        let request = Message::metrics_request(&identity.instance, &identity.ip_string());
        sends.push(tokio::spawn(async move {
            if let Err(e) = net::send_datagram(&request, (IpAddr::V4(address), port)).await {
                warn!(
                    "failed to send metrics request to {} ({}): {}",
                    peer.instance_id, address, e
                );
            }
        }));
    }

    let launched = sends.len();
    for send in sends {
        // A panicked send task only loses that one request.
        let _ = send.await;
    }
    launched
}
