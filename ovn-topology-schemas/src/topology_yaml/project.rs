use serde::{Deserialize, Serialize};
use validator::Validate;
use crate::topology_yaml::network::NetworkConfig;

/// A tenant. Owns one logical router, one external switch and the internal networks listed.
#[derive(Deserialize, Serialize, Debug, Clone, Validate)]
#[serde(rename_all = "snake_case")]
pub struct ProjectConfig {
    #[validate(length(min = 1, max = 24))]
    pub name: String,
    #[serde(default)]
    pub isolation: Isolation,
    #[validate]
    pub uplink: UplinkConfig,
    #[validate]
    pub networks: Vec<NetworkConfig>,
    #[serde(default)]
    #[validate]
    pub instances: Vec<InstanceConfig>,
}

/// How the project's external switch reaches the outside world.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// localnet port straight onto a host bridge
    #[default]
    Bridge,
    /// through a dedicated network namespace that masquerades onto a host veth link
    Namespace,
}

/// External side of the project's logical router.
#[derive(Deserialize, Serialize, Debug, Clone, Validate)]
#[serde(rename_all = "snake_case")]
pub struct UplinkConfig {
    /// host bridge (bridge mapping name) used by the localnet port
    #[validate(length(min = 1, max = 15))]
    pub bridge: String,
    /// router's external IPv4 address with prefix length
    pub ip4: String,
    /// prefix the router's external IPv6 address is derived in (EUI-64)
    pub ip6_prefix: String,
    pub gateway4: String,
    pub gateway6: String,
    /// ULA prefix used for the namespace to host link, only needed with namespace isolation
    #[serde(default)]
    pub ula_prefix: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Validate)]
#[serde(rename_all = "snake_case")]
pub struct InstanceConfig {
    #[validate(length(min = 1, max = 24))]
    pub name: String,
    /// name of the project network the instance port is created on
    pub network: String,
    /// when set a workload is (re)created from this image and given the instance port
    #[serde(default)]
    pub image: Option<String>,
}
