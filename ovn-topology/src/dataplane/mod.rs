pub mod namespace;

use anyhow::anyhow;
use crate::addressing::{random_device_name, MAX_DEVICE_NAME_LEN};
use crate::error::ProvisionError;
use crate::orchestration::{CommandRunner, OrchestrationCommon};
use crate::ovn::components::MacAddress;
use crate::ovn::components::ovs::{clear_stale_binding, OvsPort};
use crate::ovn::OvnCommand;
use crate::vec_of_strings;

pub const INSTANCE_HOST_PREFIX: &str = "insth";
pub const INSTANCE_PEER_PREFIX: &str = "instp";

/// A veth pair, `host` stays in the host namespace and `peer` is handed on to an instance or a
/// project namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VethPair {
    pub host: String,
    pub peer: String,
}

impl VethPair {
    pub fn random(
        host_prefix: &str,
        peer_prefix: &str,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            host: device_name(host_prefix)?,
            peer: device_name(peer_prefix)?,
        })
    }

    pub async fn create(&self, runner: &dyn CommandRunner) -> anyhow::Result<()> {
        tracing::info!("creating veth pair {} <-> {}", &self.host, &self.peer);
        runner.run(vec_of_strings![
            "ip", "link", "add", "dev", &self.host, "type", "veth", "peer", "name", &self.peer
        ]).await?;
        Ok(())
    }

    /// Deleting either end removes both, the peer may already have been moved somewhere else.
    pub async fn delete(&self, runner: &dyn CommandRunner) -> anyhow::Result<()> {
        tracing::info!("deleting veth pair {} <-> {}", &self.host, &self.peer);
        runner.run_allow_fail(vec_of_strings!["ip", "link", "del", "dev", &self.host]).await?;
        Ok(())
    }
}

fn device_name(prefix: &str) -> anyhow::Result<String> {
    random_device_name(prefix).ok_or_else(|| anyhow!(ProvisionError::InvalidName {
        name: prefix.to_string(),
        reason: format!("no room for a random suffix within {MAX_DEVICE_NAME_LEN} characters"),
    }))
}

pub async fn set_mac(
    runner: &dyn CommandRunner,
    device: &str,
    mac: &MacAddress,
) -> anyhow::Result<()> {
    runner.run(vec_of_strings!["ip", "link", "set", "dev", device, "address", mac]).await?;
    Ok(())
}

pub async fn set_up(
    runner: &dyn CommandRunner,
    device: &str,
) -> anyhow::Result<()> {
    runner.run(vec_of_strings!["ip", "link", "set", "dev", device, "up"]).await?;
    Ok(())
}

/// A bridge port only switches frames, it gets no IPv6 link-local or SLAAC address and never
/// routes.
pub async fn isolate_bridge_port(
    runner: &dyn CommandRunner,
    device: &str,
) -> anyhow::Result<()> {
    runner.run(vec_of_strings![
        "sysctl", "-w",
        format!("net.ipv6.conf.{device}.disable_ipv6=1"),
        format!("net.ipv4.conf.{device}.forwarding=0")
    ]).await?;
    Ok(())
}

/// Wires host interfaces to logical switch ports through the integration bridge. OVN picks up the
/// binding from the `iface-id` tag on the bridge port, so a port must only ever carry one of
/// those and any earlier one is removed first.
pub struct DataplaneBinder<'a> {
    runner: &'a dyn CommandRunner,
    common: &'a OrchestrationCommon,
}

impl<'a> DataplaneBinder<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        common: &'a OrchestrationCommon,
    ) -> Self {
        Self { runner, common }
    }

    /// Create a veth pair whose host end is bound to the logical port `lsp` and whose peer carries
    /// `peer_mac`, the address the logical port expects frames from. If anything after creating
    /// the pair fails the pair is removed again before the error is returned, so a failed run
    /// leaves no orphan links behind.
    pub async fn bind(
        &self,
        lsp: &str,
        host_prefix: &str,
        peer_prefix: &str,
        peer_mac: &MacAddress,
    ) -> anyhow::Result<VethPair> {
        clear_stale_binding(self.runner, lsp).await?;
        let veth = VethPair::random(host_prefix, peer_prefix)?;
        veth.create(self.runner).await?;
        if let Err(err) = self.wire(&veth, lsp, peer_mac).await {
            if let Err(cleanup) = veth.delete(self.runner).await {
                tracing::warn!("could not remove veth {} after failed bind: {cleanup:#}", &veth.host);
            }
            return Err(err);
        }
        Ok(veth)
    }

    async fn wire(
        &self,
        veth: &VethPair,
        lsp: &str,
        peer_mac: &MacAddress,
    ) -> anyhow::Result<()> {
        isolate_bridge_port(self.runner, &veth.host).await?;
        set_mac(self.runner, &veth.peer, peer_mac).await?;
        OvsPort::new(veth.host.clone(), self.common.integration_bridge.clone(), lsp.to_string())
            .create_command(self.runner, self.common).await?;
        set_up(self.runner, &veth.host).await
    }

    /// Veth for an instance port, the peer end is what the workload gets as its NIC.
    pub async fn bind_instance_port(
        &self,
        lsp: &str,
        mac: &MacAddress,
    ) -> anyhow::Result<VethPair> {
        self.bind(lsp, INSTANCE_HOST_PREFIX, INSTANCE_PEER_PREFIX, mac).await
    }
}
