use std::net::Ipv4Addr;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::orchestration::{output_lines, CommandRunner, OrchestrationCommon};
use crate::ovn::OvnCommand;
use crate::vec_of_strings;

/// This represents the OVS settings on an OVN chassis, applied to the `open_vswitch .` record so
/// that `ovn-controller` connects to the southbound database.
#[derive(Debug, Clone)]
pub struct OvsSystem {
    pub ovn_remote: String,
    pub probe_interval_ms: u32,
    pub ovn_encap_ip: Ipv4Addr,
    pub ovn_encap_type: String,
}

impl OvsSystem {
    pub async fn connect(&self, runner: &dyn CommandRunner) -> anyhow::Result<()> {
        tracing::info!("connecting local OVS to OVN at {} with encap ip {}", &self.ovn_remote, self.ovn_encap_ip);
        // the "." record is the single row of the open_vswitch table
        runner.run(vec_of_strings![
            "ovs-vsctl", "set", "open_vswitch", ".",
            format!("external_ids:ovn-remote={}", &self.ovn_remote),
            format!("external_ids:ovn-remote-probe-interval={}", self.probe_interval_ms),
            format!("external_ids:ovn-encap-ip={}", self.ovn_encap_ip),
            format!("external_ids:ovn-encap-type={}", &self.ovn_encap_type)
        ]).await?;
        Ok(())
    }
}

/// An OVS port on the integration bridge, the interface is tied to a specific logical switch port
/// via the `iface-id` external id metadata
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OvsPort {
    pub name: String,
    pub integration_bridge_name: String,
    pub lsp_name: String,
}

impl OvsPort {
    pub fn new(
        name: String,
        integration_bridge_name: String,
        lsp_name: String,
    ) -> Self {
        Self {
            name,
            integration_bridge_name,
            lsp_name,
        }
    }
}

#[async_trait]
impl OvnCommand for OvsPort {
    async fn create_command(&self, runner: &dyn CommandRunner, _common: &OrchestrationCommon) -> anyhow::Result<String> {
        tracing::info!("creating OVS port {} on {} for {}", &self.name, &self.integration_bridge_name, &self.lsp_name);
        let lsp_port = &self.lsp_name;
        runner.run(vec_of_strings![
            "ovs-vsctl", "--may-exist", "add-port", &self.integration_bridge_name, &self.name,
            "--", "set", "interface", &self.name, format!("external_ids:iface-id={lsp_port}")
        ]).await
    }

    async fn destroy_command(&self, runner: &dyn CommandRunner, _common: &OrchestrationCommon) -> anyhow::Result<String> {
        tracing::info!("destroying OVS port {} on {}", &self.name, &self.integration_bridge_name);
        runner.run(vec_of_strings!["ovs-vsctl", "--if-exists", "del-port", &self.integration_bridge_name, &self.name]).await
    }
}

/// Names of every OVS interface currently tagged with `iface_id`.
pub async fn find_bound_interfaces(
    runner: &dyn CommandRunner,
    iface_id: &str,
) -> anyhow::Result<Vec<String>> {
    let out = runner.run(vec_of_strings![
        "ovs-vsctl", "--format=csv", "--no-headings", "--data=bare", "--columns=name",
        "find", "interface", format!("external_ids:iface-id={iface_id}")
    ]).await?;
    Ok(output_lines(&out))
}

/// Remove every bridge port already bound to the logical port `iface_id` together with its host
/// link, so that a new binding never shares the logical port with a stale one. Returns the names
/// removed.
pub async fn clear_stale_binding(
    runner: &dyn CommandRunner,
    iface_id: &str,
) -> anyhow::Result<Vec<String>> {
    let stale = find_bound_interfaces(runner, iface_id).await?;
    for port in &stale {
        tracing::info!("removing stale OVS port {port} bound to {iface_id}");
        runner.run(vec_of_strings!["ovs-vsctl", "--if-exists", "del-port", port]).await?;
        // the link may already be gone with a deleted namespace
        runner.run_allow_fail(vec_of_strings!["ip", "link", "del", port]).await?;
    }
    Ok(stale)
}
