use std::net::{IpAddr, Ipv4Addr};
use anyhow::Context;
use ipnetwork::Ipv4Network;
use crate::addressing::{eui64_address, random_mac};
use crate::components::LogicalProject;
use crate::dataplane::{set_mac, set_up, DataplaneBinder, VethPair};
use crate::error::ProvisionError;
use crate::naming;
use crate::orchestration::{CommandRunner, OrchestrationCommon};
use crate::ovn::components::ovs::clear_stale_binding;
use crate::vec_of_strings;

/// Name of the link towards the host inside a project namespace.
pub const NS_UPLINK_DEVICE: &str = "uplink0";
/// Name of the link towards the external logical switch inside a project namespace.
pub const NS_BRIDGE_DEVICE: &str = "ovn0";

const UPLINK_HOST_PREFIX: &str = "uplh";
const UPLINK_PEER_PREFIX: &str = "uplp";
const BRIDGE_HOST_PREFIX: &str = "brgh";
const BRIDGE_PEER_PREFIX: &str = "brgp";

/// Address every host end of a namespace uplink has, the first one of the link-local range.
/// Namespaces use it as their IPv4 default gateway.
pub fn host_link_address(base: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(base).saturating_add(1))
}

/// What was wired up for a namespace isolated project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceUplink {
    pub namespace: String,
    pub host_device: String,
    pub link_local: Ipv4Addr,
    pub bridge_device: String,
}

/// The network namespace of a project. It stands in for the physical uplink network: the
/// external logical switch reaches it through `ovn0` and it routes out to the host through
/// `uplink0`, masquerading everything behind its link-local address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectNamespace {
    pub name: String,
}

impl ProjectNamespace {
    pub fn new(project: &str) -> Self {
        Self { name: naming::namespace(project) }
    }

    /// `cmd` run inside the namespace.
    pub fn exec(&self, cmd: Vec<String>) -> Vec<String> {
        let mut wrapped = vec_of_strings!["ip", "netns", "exec", &self.name];
        wrapped.extend(cmd);
        wrapped
    }

    /// Start from an empty namespace. Deleting an old one takes the links inside it with it, and
    /// their veth peers on the host.
    pub async fn recreate(&self, runner: &dyn CommandRunner) -> anyhow::Result<()> {
        tracing::info!("creating network namespace {}", &self.name);
        runner.run_allow_fail(vec_of_strings!["ip", "netns", "del", &self.name]).await?;
        runner.run(vec_of_strings!["ip", "netns", "add", &self.name]).await?;
        runner.run(self.exec(vec_of_strings!["ip", "link", "set", "dev", "lo", "up"])).await?;
        Ok(())
    }

    pub async fn destroy(&self, runner: &dyn CommandRunner) -> anyhow::Result<()> {
        tracing::info!("deleting network namespace {}", &self.name);
        runner.run_allow_fail(vec_of_strings!["ip", "netns", "del", &self.name]).await?;
        Ok(())
    }

    /// Move `device` into the namespace and give it its fixed name there. A link can only be
    /// renamed while it is down, which it is after the move.
    pub async fn adopt_link(
        &self,
        runner: &dyn CommandRunner,
        device: &str,
        canonical: &str,
    ) -> anyhow::Result<()> {
        runner.run(vec_of_strings!["ip", "link", "set", "dev", device, "netns", &self.name]).await?;
        runner.run(self.exec(vec_of_strings!["ip", "link", "set", "dev", device, "name", canonical])).await?;
        runner.run(self.exec(vec_of_strings!["ip", "link", "set", "dev", canonical, "up"])).await?;
        Ok(())
    }

    async fn add_address(
        &self,
        runner: &dyn CommandRunner,
        device: &str,
        address: String,
        v6: bool,
    ) -> anyhow::Result<()> {
        let cmd = if v6 {
            vec_of_strings!["ip", "-6", "addr", "add", address, "dev", device]
        } else {
            vec_of_strings!["ip", "addr", "add", address, "dev", device]
        };
        runner.run(self.exec(cmd)).await?;
        Ok(())
    }

    /// Build the namespace of `project` from scratch and wire both of its links. `link_local` is
    /// the address claimed for this project, `link_local_base` the start of the range.
    pub async fn provision(
        &self,
        runner: &dyn CommandRunner,
        common: &OrchestrationCommon,
        project: &LogicalProject,
        link_local_base: Ipv4Addr,
        link_local: Ipv4Addr,
    ) -> anyhow::Result<NamespaceUplink> {
        self.recreate(runner).await?;

        let uplink = VethPair::random(UPLINK_HOST_PREFIX, UPLINK_PEER_PREFIX)?;
        uplink.create(runner).await?;
        if let Err(err) = self.wire_uplink(runner, project, &uplink, link_local_base, link_local).await {
            if let Err(cleanup) = uplink.delete(runner).await {
                tracing::warn!("could not remove uplink veth {}: {cleanup:#}", &uplink.host);
            }
            return Err(err);
        }

        let bridge = self.wire_bridge(runner, common, project).await?;
        self.enable_routing(runner).await?;

        Ok(NamespaceUplink {
            namespace: self.name.clone(),
            host_device: uplink.host,
            link_local,
            bridge_device: bridge.host,
        })
    }

    /// Host end gets the gateway address and a host route to the namespace, the peer becomes
    /// `uplink0` with the claimed address and default routes back through the host.
    async fn wire_uplink(
        &self,
        runner: &dyn CommandRunner,
        project: &LogicalProject,
        veth: &VethPair,
        link_local_base: Ipv4Addr,
        link_local: Ipv4Addr,
    ) -> anyhow::Result<()> {
        let ula = project.uplink.ula_prefix
            .ok_or_else(|| ProvisionError::validation(format!("project {} has no ula_prefix for its namespace uplink", &project.name)))?;
        let gateway = host_link_address(link_local_base);
        let host_mac = random_mac()?;
        let peer_mac = random_mac()?;
        let host_ula = eui64_address(&ula, &host_mac)?;
        let peer_ula = eui64_address(&ula, &peer_mac)?;
        let host_route = Ipv4Network::new(link_local, 32)?;
        tracing::info!("wiring namespace {} uplink {} with {link_local} via {gateway}", &self.name, &veth.host);

        set_mac(runner, &veth.host, &host_mac).await?;
        set_mac(runner, &veth.peer, &peer_mac).await?;
        runner.run(vec_of_strings!["ip", "addr", "add", format!("{gateway}/32"), "dev", &veth.host]).await?;
        runner.run(vec_of_strings!["ip", "-6", "addr", "add", host_ula, "dev", &veth.host]).await?;
        runner.run(vec_of_strings![
            "sysctl", "-w",
            format!("net.ipv4.conf.{}.forwarding=1", &veth.host),
            format!("net.ipv6.conf.{}.forwarding=1", &veth.host)
        ]).await?;
        set_up(runner, &veth.host).await?;
        runner.run(vec_of_strings!["ip", "route", "add", host_route, "dev", &veth.host]).await?;

        self.adopt_link(runner, &veth.peer, NS_UPLINK_DEVICE).await?;
        self.add_address(runner, NS_UPLINK_DEVICE, format!("{link_local}/32"), false).await?;
        self.add_address(runner, NS_UPLINK_DEVICE, peer_ula.to_string(), true).await?;
        runner.run(self.exec(vec_of_strings![
            "ip", "route", "add", "default", "via", gateway, "dev", NS_UPLINK_DEVICE, "onlink"
        ])).await?;
        runner.run(self.exec(vec_of_strings![
            "ip", "-6", "route", "add", "default", "via", IpAddr::V6(host_ula.ip()), "dev", NS_UPLINK_DEVICE
        ])).await?;
        Ok(())
    }

    /// The parent port of the external switch is bound to a host veth whose peer becomes `ovn0`,
    /// holding the uplink gateway addresses the router routes to.
    async fn wire_bridge(
        &self,
        runner: &dyn CommandRunner,
        common: &OrchestrationCommon,
        project: &LogicalProject,
    ) -> anyhow::Result<VethPair> {
        let parent_port = naming::external_switch_parent_port(&project.name);
        let mac = random_mac()?;
        let veth = DataplaneBinder::new(runner, common)
            .bind(&parent_port, BRIDGE_HOST_PREFIX, BRIDGE_PEER_PREFIX, &mac)
            .await
            .with_context(|| format!("binding {parent_port} for namespace {}", &self.name))?;

        self.adopt_link(runner, &veth.peer, NS_BRIDGE_DEVICE).await?;
        let uplink = &project.uplink;
        self.add_address(runner, NS_BRIDGE_DEVICE, format!("{}/{}", uplink.gateway4, uplink.ip4.prefix()), false).await?;
        self.add_address(runner, NS_BRIDGE_DEVICE, format!("{}/{}", uplink.gateway6, uplink.ip6_prefix.prefix()), true).await?;
        Ok(veth)
    }

    async fn enable_routing(&self, runner: &dyn CommandRunner) -> anyhow::Result<()> {
        runner.run(self.exec(vec_of_strings![
            "sysctl", "-w", "net.ipv4.ip_forward=1", "net.ipv6.conf.all.forwarding=1"
        ])).await?;
        for program in ["iptables", "ip6tables"] {
            runner.run(self.exec(vec_of_strings![
                program, "-t", "nat", "-A", "POSTROUTING", "-o", NS_UPLINK_DEVICE, "-j", "MASQUERADE"
            ])).await?;
        }
        Ok(())
    }

    /// Remove the namespace and the bridge port that was bound for it.
    pub async fn teardown(
        &self,
        runner: &dyn CommandRunner,
        project: &str,
    ) -> anyhow::Result<()> {
        self.destroy(runner).await?;
        clear_stale_binding(runner, &naming::external_switch_parent_port(project)).await?;
        Ok(())
    }
}
