use std::net::Ipv4Addr;
use anyhow::bail;
use ovn_topology_schemas::settings::{ChassisBindingMode, ChassisConfig};
use crate::error::ProvisionError;
use crate::orchestration::{output_lines, CommandRunner, OrchestrationCommon};
use crate::ovn::components::ovs::OvsSystem;
use crate::vec_of_strings;

/// Address used to find the interface (and so the source address) of the default route.
const ROUTE_PROBE_ADDRESS: &str = "8.8.8.8";

/// This represents the local chassis in OVN, as seen from the host it runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChassisIdentity {
    pub system_id: String,
    pub encap_ip: Ipv4Addr,
}

impl ChassisIdentity {
    /// The source address the host uses for its default route, which is the address tunnels to
    /// this chassis are built to.
    pub async fn discover_encap_ip(runner: &dyn CommandRunner) -> anyhow::Result<Ipv4Addr> {
        let cmd = vec_of_strings!["ip", "route", "get", ROUTE_PROBE_ADDRESS];
        let out = runner.run(cmd.clone()).await?;
        parse_route_source(&out).ok_or_else(|| ProvisionError::UnexpectedOutput {
            command: cmd.join(" "),
            output: out.clone(),
        }.into())
    }

    pub async fn discover_system_id(runner: &dyn CommandRunner) -> anyhow::Result<String> {
        let cmd = vec_of_strings!["ovs-vsctl", "get", "open_vswitch", ".", "external_ids:system-id"];
        let out = runner.run(cmd.clone()).await?;
        let system_id = out.trim().replace('"', "");
        if system_id.is_empty() {
            bail!(ProvisionError::UnexpectedOutput { command: cmd.join(" "), output: out });
        }
        Ok(system_id)
    }

    /// Find out who this chassis is. When the config names a southbound remote the local OVS is
    /// pointed at it first, otherwise it is assumed to be connected already.
    pub async fn register(
        runner: &dyn CommandRunner,
        config: &ChassisConfig,
    ) -> anyhow::Result<Self> {
        let encap_ip = Self::discover_encap_ip(runner).await?;
        if let Some(remote) = &config.ovn_sb_remote {
            OvsSystem {
                ovn_remote: remote.clone(),
                probe_interval_ms: config.probe_interval_ms,
                ovn_encap_ip: encap_ip,
                ovn_encap_type: config.encap_type.clone(),
            }.connect(runner).await?;
        }
        let system_id = Self::discover_system_id(runner).await?;
        tracing::info!("local chassis {system_id} with encap ip {encap_ip}");
        Ok(Self { system_id, encap_ip })
    }

    /// HA priority of this chassis, the last octet of its encap address.
    pub fn priority(&self) -> u8 {
        self.encap_ip.octets()[3]
    }
}

/// `ip route get` prints `<dst> via <gw> dev <dev> src <addr> uid ..`, the address after `src` is
/// the one we want.
fn parse_route_source(output: &str) -> Option<Ipv4Addr> {
    let mut fields = output.split_whitespace();
    while let Some(field) = fields.next() {
        if field == "src" {
            return fields.next()?.parse().ok();
        }
    }
    None
}

/// How the project routers are tied to the local chassis. Exactly one variant is in effect for a
/// run, chosen from `ChassisConfig::binding`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChassisBinding {
    /// the router is pinned with `options:chassis`
    Static {
        chassis: String,
    },
    /// the router's external port is a member of an HA chassis group
    HaGroup {
        group: String,
        chassis: String,
        priority: u8,
    },
}

impl ChassisBinding {
    pub fn new(
        config: &ChassisConfig,
        identity: &ChassisIdentity,
    ) -> Self {
        match config.binding {
            ChassisBindingMode::Static => ChassisBinding::Static {
                chassis: identity.system_id.clone(),
            },
            ChassisBindingMode::HaGroup => ChassisBinding::HaGroup {
                group: config.ha_group.clone(),
                chassis: identity.system_id.clone(),
                priority: identity.priority(),
            },
        }
    }

    /// Make sure the HA group exists and this chassis is a member. Nothing to do when pinning.
    pub async fn register(
        &self,
        runner: &dyn CommandRunner,
        common: &OrchestrationCommon,
    ) -> anyhow::Result<()> {
        if let ChassisBinding::HaGroup { group, chassis, priority } = &self {
            tracing::info!("adding chassis {chassis} to HA chassis group {group} with priority {priority}");
            // no --may-exist for this command, it fails when the group is already there
            runner.run_allow_fail(common.nbctl(vec_of_strings!["ha-chassis-group-add", group])).await?;
            runner.run(common.nbctl(vec_of_strings!["ha-chassis-group-add-chassis", group, chassis, priority])).await?;
        }
        Ok(())
    }

    /// Router level part of the binding, run right after the router is created.
    pub async fn bind_router(
        &self,
        runner: &dyn CommandRunner,
        common: &OrchestrationCommon,
        router: &str,
    ) -> anyhow::Result<()> {
        if let ChassisBinding::Static { chassis } = &self {
            tracing::info!("pinning LR {router} to chassis {chassis}");
            runner.run(common.nbctl(vec_of_strings![
                "set", "logical_router", router, format!("options:chassis={chassis}")
            ])).await?;
        }
        Ok(())
    }

    /// Gateway port part of the binding, run right after the external router port is created.
    pub async fn bind_gateway_port(
        &self,
        runner: &dyn CommandRunner,
        common: &OrchestrationCommon,
        router_port: &str,
    ) -> anyhow::Result<()> {
        if let ChassisBinding::HaGroup { group, .. } = &self {
            let group_id = find_ha_chassis_group(runner, common, group).await?;
            tracing::info!("assigning LRP {router_port} to HA chassis group {group} ({group_id})");
            runner.run(common.nbctl(vec_of_strings![
                "set", "logical_router_port", router_port, format!("ha_chassis_group={group_id}")
            ])).await?;
        }
        Ok(())
    }
}

async fn find_ha_chassis_group(
    runner: &dyn CommandRunner,
    common: &OrchestrationCommon,
    group: &str,
) -> anyhow::Result<String> {
    let out = runner.run(common.nbctl(vec_of_strings![
        "--format=csv", "--no-headings", "--data=bare", "--columns=_uuid",
        "find", "ha_chassis_group", format!("name={group}")
    ])).await?;
    match output_lines(&out).into_iter().next() {
        Some(uuid) => Ok(uuid),
        None => bail!(ProvisionError::MissingState { what: format!("HA chassis group {group}") }),
    }
}
