//! mDNS service advertisement and the discovery loop.
//!
//! The daemon advertises itself under the fleet's service type and
//! then alternates between two states forever: a bounded browse window
//! that feeds every resolved entry into the peer table, and an idle
//! pause. When a window closes, the table is reconciled against the
//! set of instance ids seen during that window, so a peer missing from
//! the newest snapshot is dropped in the same cycle.
//!
//! Failing to start the mDNS daemon or a browse is fatal: without
//! discovery the table would silently go stale, which is worse than a
//! crash for a fleet that relies on join/leave detection.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};

use crate::config::Config;
use crate::net::Identity;
use crate::peers::{PeerEntry, PeerTable};

pub async fn run_discovery(
    cfg: &Config,
    identity: Identity,
    table: Arc<PeerTable>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let daemon = ServiceDaemon::new().context("failed to start mDNS daemon")?;
    let service_type = cfg.full_service_type();

    advertise(&daemon, &service_type, &identity, cfg.port)?;

    loop {
        // BROWSING: collect entries until the window deadline.
        let receiver = daemon
            .browse(&service_type)
            .context("failed to start mDNS browse")?;
        let deadline = Instant::now() + cfg.browse_window();
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("discovery loop shutting down");
                    let _ = daemon.shutdown();
                    return Ok(());
                }
                _ = sleep_until(deadline) => break,
                event = receiver.recv_async() => match event {
                    Ok(ServiceEvent::ServiceResolved(resolved)) => {
                        let entry = peer_entry_from(&resolved, &service_type);
                        if entry.addresses.is_empty() {
                            warn!("peer {} resolved without an IPv4 address", entry.instance_id);
                        }
                        seen.insert(entry.instance_id.clone());
                        table.upsert(entry).await;
                    }
                    Ok(event) => debug!("ignoring mDNS event: {:?}", event),
                    Err(e) => {
                        let _ = daemon.shutdown();
                        return Err(e).context("mDNS event channel closed");
                    }
                }
            }
        }

        if let Err(e) = daemon.stop_browse(&service_type) {
            warn!("failed to stop mDNS browse: {}", e);
        }
        table.reconcile(&seen).await;
        debug!("discovery cycle complete, {} peer(s) known", table.len().await);

        // IDLE: pause before the next cycle.
        tokio::select! {
            _ = shutdown.changed() => {
                info!("discovery loop shutting down");
                let _ = daemon.shutdown();
                return Ok(());
            }
            _ = sleep(cfg.discovery_idle()) => {}
        }
    }
}

/// Register the local instance so peers can find it.
///
/// The advertised port is the protocol port itself; advertising any
/// other port would point peers at a socket nothing listens on.
fn advertise(
    daemon: &ServiceDaemon,
    service_type: &str,
    identity: &Identity,
    port: u16,
) -> Result<()> {
    let host_name = format!("{}.local.", identity.instance);
    let properties = [("version", env!("CARGO_PKG_VERSION"))];

    let service = ServiceInfo::new(
        service_type,
        &identity.instance,
        &host_name,
        "",
        port,
        &properties[..],
    )
    .context("failed to build mDNS service info")?
    .enable_addr_auto();

    daemon
        .register(service)
        .context("failed to register mDNS service")?;
    info!(
        "advertising {} under {} on port {}",
        identity.instance, service_type, port
    );
    Ok(())
}

fn peer_entry_from(resolved: &ServiceInfo, service_type: &str) -> PeerEntry {
    let instance_id = instance_from_fullname(resolved.get_fullname(), service_type);
    let mut addresses: Vec<_> = resolved
        .get_addresses()
        .iter()
        .filter_map(|address| match address {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(_) => None,
        })
        .collect();
    // Deterministic "first address" regardless of set iteration order.
    addresses.sort();

    PeerEntry::new(instance_id, addresses)
}

/// Extract the instance name from an mDNS fullname such as
/// `myhost._fleetbeat._udp.local.`.
fn instance_from_fullname(fullname: &str, service_type: &str) -> String {
    fullname
        .strip_suffix(service_type)
        .and_then(|prefix| prefix.strip_suffix('.'))
        .unwrap_or_else(|| fullname.split('.').next().unwrap_or(fullname))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_is_stripped_from_the_fullname() {
        assert_eq!(
            instance_from_fullname("myhost._fleetbeat._udp.local.", "_fleetbeat._udp.local."),
            "myhost"
        );
    }

    #[test]
    fn dots_inside_the_instance_name_survive() {
        assert_eq!(
            instance_from_fullname(
                "host.with.dots._fleetbeat._udp.local.",
                "_fleetbeat._udp.local."
            ),
            "host.with.dots"
        );
    }

    #[test]
    fn unexpected_fullnames_fall_back_to_the_first_label() {
        assert_eq!(
            instance_from_fullname("stray._other._udp.local.", "_fleetbeat._udp.local."),
            "stray"
        );
    }
}
