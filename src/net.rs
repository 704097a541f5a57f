//! Local node identity and one-shot datagram sends.

use std::ffi::CStr;
use std::net::Ipv4Addr;

use anyhow::{bail, Context, Result};
use log::warn;
use tokio::net::{ToSocketAddrs, UdpSocket};

use crate::protocol::Message;

/// How the local node presents itself on the wire: the instance name
/// it advertises over mDNS and the IPv4 address it stamps into the
/// `sender_ip` field of outgoing messages.
#[derive(Debug, Clone)]
pub struct Identity {
    pub instance: String,
    pub ip: Ipv4Addr,
}

impl Identity {
    /// Determine the local identity at startup.
    ///
    /// `instance_override` comes from configuration; without it the
    /// host name is used, matching what peers see in mDNS. If no
    /// outbound IPv4 address can be determined the loopback address is
    /// used so the daemon still starts, with a warning since peers
    /// will not be able to reply.
    pub fn detect(instance_override: Option<&str>) -> Result<Self> {
        let instance = match instance_override {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => local_hostname()?,
        };

        let ip = local_ipv4().unwrap_or_else(|| {
            warn!("could not determine an outbound IPv4 address, falling back to loopback");
            Ipv4Addr::LOCALHOST
        });

        Ok(Self { instance, ip })
    }

    pub fn ip_string(&self) -> String {
        self.ip.to_string()
    }
}

fn local_hostname() -> Result<String> {
    let mut buf = [0u8; 256];

    // SAFETY: gethostname writes a NUL-terminated name into the buffer
    // and returns 0 on success.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        bail!("gethostname failed");
    }

    let hostname = unsafe { CStr::from_ptr(buf.as_ptr() as *const libc::c_char) };
    Ok(hostname
        .to_str()
        .context("hostname is not valid UTF-8")?
        .to_string())
}

/// Find the IPv4 address the host would use for outbound traffic by
/// "connecting" a UDP socket to a public address. No packet is sent.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        std::net::IpAddr::V4(ip) => Some(ip),
        std::net::IpAddr::V6(_) => None,
    }
}

/// Send one encoded message to `target` over a fresh socket.
///
/// The socket lives only for this call, mirroring the fire-and-forget
/// nature of the protocol; it is released on every exit path.
pub async fn send_datagram(message: &Message, target: impl ToSocketAddrs) -> Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("failed to bind outbound socket")?;
    socket
        .send_to(&message.encode(), target)
        .await
        .context("failed to send datagram")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_prefers_the_configured_instance_name() {
        let identity = Identity::detect(Some("override-name")).unwrap();
        assert_eq!(identity.instance, "override-name");
    }

    #[test]
    fn detect_falls_back_to_the_hostname() {
        let identity = Identity::detect(None).unwrap();
        assert!(!identity.instance.is_empty());
    }

    #[tokio::test]
    async fn send_datagram_delivers_one_message() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();

        let message = Message::metrics_request("node-a", "127.0.0.1");
        send_datagram(&message, target).await.unwrap();

        let mut buf = [0u8; 1024];
        let (len, _src) = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            receiver.recv_from(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(Message::decode(&buf[..len]).unwrap(), message);
    }
}
