//! UDP datagram listener.
//!
//! One long-lived socket on the well-known protocol port serves both
//! inbound requests and inbound replies; there is no separate reply
//! port. Each received datagram is handled in its own task so a slow
//! metrics sample never stalls the receive loop.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::Duration;

use crate::config::Config;
use crate::metrics::MetricsSource;
use crate::net::{self, Identity};
use crate::protocol::{Message, MessageKind, METRICS_REQUEST};
use crate::registry::MetricsRegistry;

/// Everything a datagram handler needs besides the datagram itself.
pub struct ListenerContext {
    pub identity: Identity,
    /// Port replies are sent to, the same well-known port peers listen on.
    pub reply_port: u16,
    pub metrics: Arc<dyn MetricsSource>,
    pub registry: Arc<MetricsRegistry>,
}

/// Bind the protocol port and serve datagrams until shutdown.
///
/// A bind failure is fatal: without the socket the node cannot take
/// part in the protocol at all.
pub async fn run_listener(
    cfg: &Config,
    ctx: Arc<ListenerContext>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", cfg.port))
        .await
        .with_context(|| format!("failed to bind datagram listener on port {}", cfg.port))?;
    info!("listening for peer datagrams on {}", socket.local_addr()?);
    serve(socket, ctx, shutdown).await
}

pub(crate) async fn serve(
    socket: UdpSocket,
    ctx: Arc<ListenerContext>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut buf = vec![0u8; 1024];

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("datagram listener shutting down");
                return Ok(());
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, src)) => {
                    let datagram = buf[..len].to_vec();
                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(async move {
                        handle_datagram(datagram, src, ctx).await;
                    });
                }
                Err(e) => {
                    error!("failed to receive datagram: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn handle_datagram(datagram: Vec<u8>, src: SocketAddr, ctx: Arc<ListenerContext>) {
    let message = match Message::decode(&datagram) {
        Ok(message) => message,
        Err(e) => {
            warn!("dropping malformed datagram from {}: {}", src, e);
            return;
        }
    };

    debug!(
        "received {:?} from {} ({}): {}",
        message.kind, message.sender_id, src, message.payload
    );

    match message.kind {
        MessageKind::Request if message.payload == METRICS_REQUEST => {
            let snapshot = match ctx.metrics.sample().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    error!("failed to sample metrics for {}: {}", message.sender_id, e);
                    return;
                }
            };

            let reply = Message::metrics_response(
                &ctx.identity.instance,
                &ctx.identity.ip_string(),
                snapshot,
            );
            let target = (message.sender_ip.as_str(), ctx.reply_port);
            if let Err(e) = net::send_datagram(&reply, target).await {
                warn!("failed to reply to {}: {}", message.sender_id, e);
            }
        }
        MessageKind::Request => {
            warn!(
                "unknown request `{}` from {}",
                message.payload, message.sender_id
            );
        }
        MessageKind::Response => {
            info!(
                "metrics report from {}: {}",
                message.sender_id, message.payload
            );
            ctx.registry.record(&message.sender_id, message.payload).await;
        }
    }
}
