//! Connection parameters and tunables for one run.
//!
//! Every section has working defaults for the reference stack, so a config
//! file only needs to carry overrides and secrets.

use crate::orchestrator::EngineError;
use crate::types::ServiceId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Services to check. Always run in canonical order regardless of listing.
    pub services: Vec<ServiceId>,
    pub proxy: ProxySettings,
    pub internal_dns: InternalDnsSettings,
    pub internal_web: InternalWebSettings,
    pub external_dns: ExternalDnsSettings,
    pub database: DatabaseSettings,
    pub probes: ProbeSettings,
    pub resolution: ResolutionSettings,
    pub containers: ContainerNaming,
    pub orchestrator: OrchestratorSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            services: ServiceId::ALL.to_vec(),
            proxy: ProxySettings::default(),
            internal_dns: InternalDnsSettings::default(),
            internal_web: InternalWebSettings::default(),
            external_dns: ExternalDnsSettings::default(),
            database: DatabaseSettings::default(),
            probes: ProbeSettings::default(),
            resolution: ResolutionSettings::default(),
            containers: ContainerNaming::default(),
            orchestrator: OrchestratorSettings::default(),
        }
    }
}

impl Settings {
    /// Reject settings that would make a run meaningless.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.services.is_empty() {
            return Err(EngineError::NoServices);
        }
        if self.orchestrator.max_concurrency == 0 {
            return Err(EngineError::InvalidSetting(
                "orchestrator.max_concurrency must be at least 1".into(),
            ));
        }
        if self.probes.timeout_ms == 0 || self.resolution.restart_timeout_ms == 0 {
            return Err(EngineError::InvalidSetting(
                "probe and restart timeouts must be non-zero".into(),
            ));
        }
        if self.internal_dns.nameservers.is_empty() || self.external_dns.nameservers.is_empty() {
            return Err(EngineError::InvalidSetting(
                "DNS probes need at least one nameserver".into(),
            ));
        }
        Ok(())
    }

    /// Configured services, deduplicated, in canonical order.
    pub fn ordered_services(&self) -> Vec<ServiceId> {
        ServiceId::ALL
            .into_iter()
            .filter(|id| self.services.contains(id))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub redirect_url: String,
    pub https_url: String,
    pub dashboard_url: String,
    pub dashboard_user: String,
    #[serde(skip_serializing)]
    pub dashboard_password: String,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            redirect_url: "http://www.terrerov.com".into(),
            https_url: "https://www.terrerov.com".into(),
            dashboard_url: "https://traefik.terrerov.com".into(),
            dashboard_user: "admin".into(),
            dashboard_password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InternalDnsSettings {
    pub nameservers: Vec<IpAddr>,
    pub hostname: String,
    pub subnet: Ipv4Subnet,
    pub reverse_ip: IpAddr,
    pub reverse_zone: String,
}

impl Default for InternalDnsSettings {
    fn default() -> Self {
        Self {
            nameservers: vec![IpAddr::V4(Ipv4Addr::new(172, 20, 0, 10))],
            hostname: "traefik.terrerov.com".into(),
            subnet: Ipv4Subnet::new(Ipv4Addr::new(172, 20, 0, 0), 16),
            reverse_ip: IpAddr::V4(Ipv4Addr::new(172, 20, 0, 10)),
            reverse_zone: "terrerov.com".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InternalWebSettings {
    pub url: String,
    pub host_header: String,
}

impl Default for InternalWebSettings {
    fn default() -> Self {
        Self {
            url: "http://nginx.terrerov.com:8080".into(),
            host_header: "nginx.terrerov.com".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalDnsSettings {
    pub nameservers: Vec<IpAddr>,
    pub hostname: String,
    pub admin_url: String,
}

impl Default for ExternalDnsSettings {
    fn default() -> Self {
        Self {
            nameservers: vec![IpAddr::V4(Ipv4Addr::new(172, 20, 0, 20))],
            hostname: "google.com".into(),
            admin_url: "http://172.20.0.20/admin/".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub query: String,
    pub expected: i64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "db.terrerov.com".into(),
            port: 5432,
            database: "postgres".into(),
            user: "postgres".into(),
            password: String::new(),
            query: "SELECT 1".into(),
            expected: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Applies to every connect, read, DNS query and DB round trip.
    pub timeout_ms: u64,
    pub extended_checks: bool,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            extended_checks: false,
        }
    }
}

impl ProbeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionSettings {
    pub enabled: bool,
    pub restart_timeout_ms: u64,
    /// Re-run the failed probe after a successful restart.
    pub verify_after_resolve: bool,
    pub verify_delay_ms: u64,
}

impl Default for ResolutionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            restart_timeout_ms: 30_000,
            verify_after_resolve: true,
            verify_delay_ms: 2_000,
        }
    }
}

impl ResolutionSettings {
    pub fn restart_timeout(&self) -> Duration {
        Duration::from_millis(self.restart_timeout_ms)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }
}

/// `{prefix}{service}_{instance}`, e.g. `terrerov_net_nginx_1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerNaming {
    pub prefix: String,
    pub instance: u32,
    /// Container CLI used for lookups and restarts (docker, podman).
    pub runtime_bin: String,
}

impl Default for ContainerNaming {
    fn default() -> Self {
        Self {
            prefix: "terrerov_net_".into(),
            instance: 1,
            runtime_bin: "docker".into(),
        }
    }
}

impl ContainerNaming {
    pub fn container_name(&self, service: ServiceId) -> String {
        format!("{}{}_{}", self.prefix, service.as_str(), self.instance)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub max_concurrency: usize,
    pub run_deadline_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            run_deadline_ms: 120_000,
        }
    }
}

impl OrchestratorSettings {
    pub fn run_deadline(&self) -> Duration {
        Duration::from_millis(self.run_deadline_ms)
    }
}

// ---------------------------------------------------------------------------
// IPv4 subnet
// ---------------------------------------------------------------------------

/// An IPv4 network in CIDR form, e.g. `172.20.0.0/16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Subnet {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Subnet {
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Self {
        let prefix_len = prefix_len.min(32);
        let masked = u32::from(network) & Self::mask(prefix_len);
        Self {
            network: Ipv4Addr::from(masked),
            prefix_len,
        }
    }

    fn mask(prefix_len: u8) -> u32 {
        if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix_len))
        }
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & Self::mask(self.prefix_len) == u32::from(self.network)
    }
}

impl fmt::Display for Ipv4Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for Ipv4Subnet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| format!("subnet must be in CIDR form: {}", s))?;
        let network: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|e| format!("invalid subnet address {}: {}", addr, e))?;
        let prefix_len: u8 = len
            .trim()
            .parse()
            .map_err(|e| format!("invalid prefix length {}: {}", len, e))?;
        if prefix_len > 32 {
            return Err(format!("prefix length out of range: {}", prefix_len));
        }
        Ok(Self::new(network, prefix_len))
    }
}

impl TryFrom<String> for Ipv4Subnet {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ipv4Subnet> for String {
    fn from(value: Ipv4Subnet) -> Self {
        value.to_string()
    }
}
