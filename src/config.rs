use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Instance name advertised over mDNS; defaults to the host name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    /// DNS-SD service type shared by the whole fleet.
    pub service_type: String,
    /// Discovery domain, normally the mDNS local domain.
    pub domain: String,
    /// UDP port for the heartbeat protocol. Also the advertised
    /// service port, so peers contact the port we actually listen on.
    pub port: u16,
    /// How long each discovery browse cycle collects entries.
    pub browse_window_secs: u64,
    /// Pause between discovery cycles.
    pub discovery_idle_secs: u64,
    /// Pause between metrics poll cycles.
    pub poll_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance_name: None,
            service_type: "_fleetbeat._udp".into(),
            domain: "local.".into(),
            port: 4256,
            browse_window_secs: 15,
            discovery_idle_secs: 10,
            poll_interval_secs: 10,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("fleetbeat.toml"))
            .merge(Json::file("fleetbeat.json"))
            .merge(Env::prefixed("FLEETBEAT_"))
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        Ok(config)
    }

    /// Fully-qualified service type handed to the mDNS daemon,
    /// e.g. `_fleetbeat._udp.local.`.
    pub fn full_service_type(&self) -> String {
        format!("{}.{}", self.service_type, self.domain)
    }

    pub fn browse_window(&self) -> Duration {
        Duration::from_secs(self.browse_window_secs)
    }

    pub fn discovery_idle(&self) -> Duration {
        Duration::from_secs(self.discovery_idle_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 4256);
        assert_eq!(cfg.full_service_type(), "_fleetbeat._udp.local.");
        assert_eq!(cfg.browse_window(), Duration::from_secs(15));
        assert_eq!(cfg.discovery_idle(), Duration::from_secs(10));
        assert_eq!(cfg.poll_interval(), Duration::from_secs(10));
    }
}
