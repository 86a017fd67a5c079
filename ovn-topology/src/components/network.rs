use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use anyhow::bail;
use ipnetwork::{Ipv4Network, Ipv6Network};
use ovn_topology_schemas::topology_yaml::network::NetworkConfig;
use ovn_topology_schemas::topology_yaml::project::UplinkConfig;
use crate::error::ProvisionError;
use crate::ovn::configuration::dhcp::{subnet4, subnet6};

/// Prefix length SLAAC needs on the internal networks.
const SLAAC_PREFIX_LEN: u8 = 64;

fn parse_field<T: FromStr>(field: &str, value: &str, expected: &str) -> anyhow::Result<T> {
    value.trim().parse::<T>()
        .map_err(|_| ProvisionError::validation(format!("{field}: {value:?} is not {expected}")).into())
}

/// An internal project network with its addressing parsed. The gateways keep the router's own
/// address, the subnets are derived from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalNetwork {
    pub name: String,
    pub gateway4: Ipv4Network,
    pub gateway6: Ipv6Network,
    pub dns4: Ipv4Addr,
    pub dns6: Ipv6Addr,
}

impl LogicalNetwork {
    pub fn from_config(config: &NetworkConfig) -> anyhow::Result<Self> {
        let name = &config.name;
        let gateway4: Ipv4Network = parse_field(&format!("network {name} gateway4"), &config.gateway4, "an IPv4 address with prefix length")?;
        let gateway6: Ipv6Network = parse_field(&format!("network {name} gateway6"), &config.gateway6, "an IPv6 address with prefix length")?;
        let dns4 = parse_field(&format!("network {name} dns4"), &config.dns4, "an IPv4 address")?;
        let dns6 = parse_field(&format!("network {name} dns6"), &config.dns6, "an IPv6 address")?;

        if gateway4.prefix() > 30 {
            bail!(ProvisionError::validation(format!("network {name} gateway4 {gateway4} leaves no room for instances")));
        }
        if gateway4.ip() == gateway4.network() || gateway4.ip() == gateway4.broadcast() {
            bail!(ProvisionError::validation(format!("network {name} gateway4 {gateway4} is not a host address")));
        }
        if gateway6.prefix() != SLAAC_PREFIX_LEN {
            bail!(ProvisionError::validation(format!("network {name} gateway6 {gateway6} must be a /{SLAAC_PREFIX_LEN} for SLAAC")));
        }
        if gateway6.ip() == gateway6.network() {
            bail!(ProvisionError::validation(format!("network {name} gateway6 {gateway6} is not a host address")));
        }

        Ok(Self {
            name: name.clone(),
            gateway4,
            gateway6,
            dns4,
            dns6,
        })
    }

    pub fn subnet4(&self) -> Ipv4Network {
        subnet4(self.gateway4)
    }

    pub fn subnet6(&self) -> Ipv6Network {
        subnet6(self.gateway6)
    }

    /// Addresses in the IPv4 subnet that must never be handed out dynamically: the router and the
    /// DNS server when it sits on this network.
    pub fn exclude_ips(&self) -> Vec<Ipv4Addr> {
        let mut exclude = vec![self.gateway4.ip()];
        if self.dns4 != self.gateway4.ip() && self.subnet4().contains(self.dns4) {
            exclude.push(self.dns4);
        }
        exclude
    }

    pub fn overlaps(&self, other: &LogicalNetwork) -> bool {
        let (a4, b4) = (self.subnet4(), other.subnet4());
        let (a6, b6) = (self.subnet6(), other.subnet6());
        a4.contains(b4.network()) || b4.contains(a4.network())
            || a6.contains(b6.network()) || b6.contains(a6.network())
    }
}

/// The external side of a project router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalUplink {
    pub bridge: String,
    /// router's external address with prefix length
    pub ip4: Ipv4Network,
    pub ip6_prefix: Ipv6Network,
    pub gateway4: Ipv4Addr,
    pub gateway6: Ipv6Addr,
    pub ula_prefix: Option<Ipv6Network>,
}

impl LogicalUplink {
    pub fn from_config(config: &UplinkConfig) -> anyhow::Result<Self> {
        let ip4: Ipv4Network = parse_field("uplink ip4", &config.ip4, "an IPv4 address with prefix length")?;
        let ip6_prefix: Ipv6Network = parse_field("uplink ip6_prefix", &config.ip6_prefix, "an IPv6 prefix")?;
        let gateway4: Ipv4Addr = parse_field("uplink gateway4", &config.gateway4, "an IPv4 address")?;
        let gateway6: Ipv6Addr = parse_field("uplink gateway6", &config.gateway6, "an IPv6 address")?;
        let ula_prefix: Option<Ipv6Network> = match &config.ula_prefix {
            None => None,
            Some(ula) => Some(parse_field("uplink ula_prefix", ula, "an IPv6 prefix")?),
        };

        if !ip4.contains(gateway4) {
            bail!(ProvisionError::validation(format!("uplink gateway4 {gateway4} is not on the uplink network {ip4}")));
        }
        if ip4.ip() == gateway4 {
            bail!(ProvisionError::validation(format!("uplink ip4 {ip4} is the same address as gateway4")));
        }
        if !ip6_prefix.contains(gateway6) {
            bail!(ProvisionError::validation(format!("uplink gateway6 {gateway6} is not in the uplink prefix {ip6_prefix}")));
        }
        for prefix in std::iter::once(&ip6_prefix).chain(ula_prefix.iter()) {
            if prefix.prefix() > 64 {
                bail!(ProvisionError::validation(format!("uplink prefix {prefix} must be /64 or shorter for EUI-64 addresses")));
            }
        }

        Ok(Self {
            bridge: config.bridge.clone(),
            ip4,
            ip6_prefix: subnet6(ip6_prefix),
            gateway4,
            gateway6,
            ula_prefix: ula_prefix.map(subnet6),
        })
    }
}
