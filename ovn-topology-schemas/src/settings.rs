use serde::{Deserialize, Serialize};
use validator::Validate;
use crate::OVN_TOPOLOGY_STATE_FOLDER;

/// These are the host wide settings that apply to every project provisioned in a run. Everything
/// has a default that works for a single host running the OVN northbound database locally, so the
/// whole section can be left out of the topology yaml.
#[derive(Deserialize, Serialize, Debug, Clone, Validate)]
#[serde(rename_all = "snake_case")]
pub struct Settings {
    /// connection string for the OVN northbound database i.e. `tcp:10.109.89.178:6643`, if not
    /// set then `ovn-nbctl` uses its own default (the local unix socket)
    #[serde(default)]
    pub ovn_nb_connection: Option<String>,
    /// the OVS bridge that `ovn-controller` maps logical ports from
    #[serde(default = "default_integration_bridge")]
    #[validate(length(min = 1, max = 15))]
    pub integration_bridge: String,
    /// domain handed out over DHCPv4 and as the DHCPv6/RA search domain
    #[serde(default = "default_dns_domain")]
    #[validate(length(min = 1))]
    pub dns_domain: String,
    #[serde(default = "default_dhcp_lease_time")]
    pub dhcp_lease_time: u32,
    #[serde(default = "default_ra_min_interval")]
    pub ra_min_interval: u32,
    #[serde(default = "default_ra_max_interval")]
    pub ra_max_interval: u32,
    /// every external command is cancelled if it runs longer than this
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// attempts for commands that failed with a transient error, 1 means no retry
    #[serde(default = "default_retry_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    #[validate(range(max = 60000))]
    pub retry_backoff_ms: u64,
    /// prefix every command with sudo, disable when already running as root
    #[serde(default = "default_use_sudo")]
    pub use_sudo: bool,
    /// file backing the link-local address reservations for namespace uplinks
    #[serde(default = "default_reservation_file")]
    pub reservation_file: String,
    #[serde(default = "default_link_local_base")]
    pub link_local_base: String,
    /// number of addresses that can be handed out, which bounds the number of namespace isolated
    /// projects on one host
    #[serde(default = "default_link_local_range")]
    pub link_local_range: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ovn_nb_connection: None,
            integration_bridge: default_integration_bridge(),
            dns_domain: default_dns_domain(),
            dhcp_lease_time: default_dhcp_lease_time(),
            ra_min_interval: default_ra_min_interval(),
            ra_max_interval: default_ra_max_interval(),
            command_timeout_secs: default_command_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            use_sudo: default_use_sudo(),
            reservation_file: default_reservation_file(),
            link_local_base: default_link_local_base(),
            link_local_range: default_link_local_range(),
        }
    }
}

fn default_integration_bridge() -> String {"br-int".to_string()}
fn default_dns_domain() -> String {"lxd".to_string()}
fn default_dhcp_lease_time() -> u32 {3600}
fn default_ra_min_interval() -> u32 {10}
fn default_ra_max_interval() -> u32 {15}
fn default_command_timeout_secs() -> u64 {30}
fn default_retry_attempts() -> u32 {3}
fn default_retry_backoff_ms() -> u64 {500}
fn default_use_sudo() -> bool {true}
fn default_reservation_file() -> String {format!("{OVN_TOPOLOGY_STATE_FOLDER}link-local.json")}
fn default_link_local_base() -> String {"169.254.0.0".to_string()}
fn default_link_local_range() -> u32 {250}

/// How the logical routers are tied to a chassis. Only one of these can be active, they are not
/// combined.
///
/// `Static` pins the router to this host's chassis. It is simple but the router is down whenever
/// the chassis is. `HaGroup` makes the external router port a member of an HA chassis group so
/// another chassis can take over, but IPv6 neighbour discovery is broken for NAT'd traffic when
/// the gateway is an HA group, which is why `Static` is the default.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChassisBindingMode {
    #[default]
    Static,
    HaGroup,
}

#[derive(Deserialize, Serialize, Debug, Clone, Validate)]
#[serde(rename_all = "snake_case")]
pub struct ChassisConfig {
    #[serde(default)]
    pub binding: ChassisBindingMode,
    #[serde(default = "default_ha_group")]
    #[validate(length(min = 1))]
    pub ha_group: String,
    /// the southbound database the local OVS should connect to i.e. `tcp:10.109.89.178:6642`, if
    /// not set the local OVS is assumed to already be connected
    #[serde(default)]
    pub ovn_sb_remote: Option<String>,
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u32,
    #[serde(default = "default_encap_type")]
    pub encap_type: String,
}

impl Default for ChassisConfig {
    fn default() -> Self {
        Self {
            binding: ChassisBindingMode::default(),
            ha_group: default_ha_group(),
            ovn_sb_remote: None,
            probe_interval_ms: default_probe_interval_ms(),
            encap_type: default_encap_type(),
        }
    }
}

fn default_ha_group() -> String {"group1".to_string()}
fn default_probe_interval_ms() -> u32 {10000}
fn default_encap_type() -> String {"geneve".to_string()}
