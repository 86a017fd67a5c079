use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use anyhow::{bail, Context};
use ipnetwork::IpNetwork;
use serde::Serialize;
use ovn_topology_schemas::cli_models::SubCommand;
use ovn_topology_schemas::topology_yaml::project::Isolation;
use crate::addressing::{eui64_address, host_route_addresses, link_local_block, random_mac};
use crate::components::{LogicalProject, LogicalTopology};
use crate::dataplane::DataplaneBinder;
use crate::dataplane::namespace::ProjectNamespace;
use crate::error::ProvisionError;
use crate::naming;
use crate::orchestration::{CommandRunner, OrchestrationCommon};
use crate::orchestration::instance::{destroy_workload, Workload};
use crate::ovn::OvnCommand;
use crate::ovn::components::{MacAddress, OvnIpAddr};
use crate::ovn::components::chassis::{ChassisBinding, ChassisIdentity};
use crate::ovn::components::logical_router::LogicalRouter;
use crate::ovn::components::logical_router_port::LogicalRouterPort;
use crate::ovn::components::logical_switch::LogicalSwitch;
use crate::ovn::components::logical_switch_port::{LogicalSwitchPort, LogicalSwitchPortType};
use crate::ovn::components::ovs::clear_stale_binding;
use crate::ovn::configuration::dhcp::{purge_dhcp_options, DhcpOptionIds, DhcpOptionRecord, SwitchDhcpOptions};
use crate::ovn::configuration::nat::OvnNat;
use crate::ovn::configuration::route::OvnRoute;
use crate::ovn::configuration::router_advertisement::RouterAdvertisement;
use crate::reservation::LinkLocalReservations;

/// An instance port as it was wired up.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InstancePort {
    pub instance: String,
    pub port: String,
    pub mac: MacAddress,
    /// host end of the veth, on the integration bridge
    pub device: String,
    /// the end handed to the workload
    pub nic: String,
    pub workload: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProjectReport {
    pub project: String,
    pub router: String,
    pub networks: Vec<String>,
    pub instances: Vec<InstancePort>,
    pub link_local: Option<Ipv4Addr>,
}

impl ProjectReport {
    fn new(project: &LogicalProject) -> Self {
        Self {
            project: project.name.clone(),
            router: naming::router(&project.name),
            networks: project.networks.iter()
                .map(|n| naming::internal_switch(&project.name, &n.name))
                .collect(),
            instances: Vec::new(),
            link_local: None,
        }
    }
}

/// What a run did, one entry per project acted on.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ProvisionReport {
    pub projects: Vec<ProjectReport>,
}

/// Drives a whole run over the selected projects of a topology. Every object is created by
/// deleting whatever has its name and then creating it again, so a run converges the system to
/// the topology no matter what an earlier (maybe failed) run left behind. The first error ends the
/// run, nothing is rolled back.
pub struct TopologyOrchestrator<'a> {
    runner: &'a dyn CommandRunner,
    common: OrchestrationCommon,
    topology: LogicalTopology,
    reservations: LinkLocalReservations,
    link_local_base: Ipv4Addr,
}

impl<'a> TopologyOrchestrator<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        topology: LogicalTopology,
    ) -> anyhow::Result<Self> {
        let settings = &topology.settings;
        let link_local_base: Ipv4Addr = settings.link_local_base.parse()
            .map_err(|_| ProvisionError::validation(format!(
                "settings link_local_base {:?} is not an IPv4 address", &settings.link_local_base
            )))?;
        let block = link_local_block(link_local_base)?;
        // the range starts two past the base, the first address after it is the shared host end
        let last = u32::from(link_local_base).saturating_add(settings.link_local_range).saturating_add(1);
        if settings.link_local_range == 0 || !block.contains(Ipv4Addr::from(last)) || last == u32::from(block.broadcast()) {
            bail!(ProvisionError::validation(format!(
                "settings link_local_range {} does not fit in {block} from {link_local_base}", settings.link_local_range
            )));
        }
        let reservations = LinkLocalReservations::new(&settings.reservation_file, link_local_base, settings.link_local_range)
            .owned_by(topology.source.clone());
        Ok(Self {
            runner,
            common: OrchestrationCommon::from_settings(settings),
            topology,
            reservations,
            link_local_base,
        })
    }

    /// Same as `run` but the whole run is abandoned once `deadline` has passed. The command
    /// running at that point is killed with it.
    pub async fn run_with_deadline(
        &self,
        command: &SubCommand,
        deadline: Option<Duration>,
    ) -> anyhow::Result<ProvisionReport> {
        let Some(limit) = deadline else {
            return self.run(command).await;
        };
        match tokio::time::timeout(limit, self.run(command)).await {
            Ok(res) => res,
            Err(_) => bail!(ProvisionError::TimedOut {
                command: format!("ovn-topology {}", command.name()),
                timeout_secs: limit.as_secs(),
            }),
        }
    }

    pub async fn run(&self, command: &SubCommand) -> anyhow::Result<ProvisionReport> {
        let mut report = ProvisionReport::default();
        match command {
            SubCommand::Validate => {
                for project in &self.topology.projects {
                    tracing::info!(
                        "project {} is valid: {} networks, {} instances",
                        &project.name, project.networks.len(), project.instances.len()
                    );
                    report.projects.push(ProjectReport::new(project));
                }
            }
            SubCommand::Down => {
                for project in &self.topology.projects {
                    self.teardown(project).await
                        .with_context(|| format!("removing project {}", &project.name))?;
                    report.projects.push(ProjectReport::new(project));
                }
            }
            _ => {
                let binding = if command.provisions_network() {
                    let released = self.release_removed_link_local().await?;
                    if !released.is_empty() {
                        tracing::warn!(
                            "projects {released:?} were removed from the topology without being taken down, their namespaces are left as they are"
                        );
                    }
                    Some(self.register_chassis().await.context("registering the local chassis")?)
                } else {
                    None
                };
                for project in &self.topology.projects {
                    let mut project_report = ProjectReport::new(project);
                    if let Some(binding) = &binding {
                        project_report.link_local = self.provision_network(project, binding).await
                            .with_context(|| format!("provisioning network of project {}", &project.name))?;
                    }
                    if command.provisions_instances() {
                        project_report.instances = self.provision_instances(project).await
                            .with_context(|| format!("provisioning instances of project {}", &project.name))?;
                    }
                    report.projects.push(project_report);
                }
            }
        }
        Ok(report)
    }

    async fn register_chassis(&self) -> anyhow::Result<ChassisBinding> {
        let identity = ChassisIdentity::register(self.runner, &self.topology.chassis).await?;
        let binding = ChassisBinding::new(&self.topology.chassis, &identity);
        binding.register(self.runner, &self.common).await?;
        Ok(binding)
    }

    /// The link-local address of a namespace isolated project. Addresses already routed on the
    /// host are skipped, and the pick is recorded so no other run hands it out too.
    async fn claim_link_local(&self, project: &str) -> anyhow::Result<Ipv4Addr> {
        let block = link_local_block(self.link_local_base)?;
        let in_use = host_route_addresses(self.runner, &block).await?;
        let reservations = self.reservations.clone();
        let project = project.to_string();
        tokio::task::spawn_blocking(move || reservations.claim(&project, &in_use)).await?
    }

    async fn release_link_local(&self, project: &str) -> anyhow::Result<Option<Ipv4Addr>> {
        let reservations = self.reservations.clone();
        let project = project.to_string();
        tokio::task::spawn_blocking(move || reservations.release(&project)).await?
    }

    /// Give back the link-local addresses of projects that were dropped from the topology file.
    async fn release_removed_link_local(&self) -> anyhow::Result<Vec<String>> {
        let reservations = self.reservations.clone();
        let defined = self.topology.defined_projects.clone();
        tokio::task::spawn_blocking(move || reservations.release_removed(&defined)).await?
    }

    async fn provision_network(
        &self,
        project: &LogicalProject,
        binding: &ChassisBinding,
    ) -> anyhow::Result<Option<Ipv4Addr>> {
        let runner = self.runner;
        let common = &self.common;
        let name = &project.name;
        let uplink = &project.uplink;
        let router = naming::router(name);
        tracing::info!("provisioning network of project {name}");

        // (a) the namespace standing in for the uplink network
        let link_local = match project.isolation {
            Isolation::Namespace => {
                let addr = self.claim_link_local(name).await?;
                ProjectNamespace::new(name)
                    .provision(runner, common, project, self.link_local_base, addr)
                    .await?;
                Some(addr)
            }
            Isolation::Bridge => None,
        };

        // (b) router
        LogicalRouter::new(router.clone()).replace_command(runner, common).await?;
        binding.bind_router(runner, common, &router).await?;

        // (c) uplink port, default routes and snat
        let ext_port = naming::external_router_port(name);
        let ext_mac = random_mac()?;
        let ext_ip6 = eui64_address(&uplink.ip6_prefix, &ext_mac)?;
        LogicalRouterPort::new(
            ext_port.clone(),
            router.clone(),
            ext_mac,
            vec![
                OvnIpAddr::from(IpNetwork::V4(uplink.ip4)),
                OvnIpAddr::from(IpNetwork::V6(ext_ip6)),
            ],
        ).replace_command(runner, common).await?;
        binding.bind_gateway_port(runner, common, &ext_port).await?;

        OvnRoute::default_route(router.clone(), IpAddr::V4(uplink.gateway4))
            .replace_command(runner, common).await?;
        OvnRoute::default_route(router.clone(), IpAddr::V6(uplink.gateway6))
            .replace_command(runner, common).await?;
        for network in &project.networks {
            OvnNat::new_snat(router.clone(), IpAddr::V4(uplink.ip4.ip()), IpNetwork::V4(network.gateway4))
                .replace_command(runner, common).await?;
            OvnNat::new_snat(router.clone(), IpAddr::V6(ext_ip6.ip()), IpNetwork::V6(network.gateway6))
                .replace_command(runner, common).await?;
        }

        // (d) external switch
        let ext_switch = naming::external_switch(name);
        LogicalSwitch::new(ext_switch.clone()).replace_command(runner, common).await?;
        LogicalSwitchPort::new(
            naming::external_switch_router_port(name),
            ext_switch.clone(),
            LogicalSwitchPortType::new_router(ext_port.clone(), true),
        ).replace_command(runner, common).await?;
        let parent_type = match project.isolation {
            Isolation::Bridge => LogicalSwitchPortType::new_localnet(uplink.bridge.clone()),
            Isolation::Namespace => LogicalSwitchPortType::LocalPort,
        };
        LogicalSwitchPort::new(naming::external_switch_parent_port(name), ext_switch, parent_type)
            .replace_command(runner, common).await?;

        // (e) internal networks
        for network in &project.networks {
            let int_port = naming::internal_router_port(name, &network.name);
            let int_switch = naming::internal_switch(name, &network.name);
            let int_mac = random_mac()?;

            LogicalRouterPort::new(
                int_port.clone(),
                router.clone(),
                int_mac,
                vec![
                    OvnIpAddr::from(IpNetwork::V4(network.gateway4)),
                    OvnIpAddr::from(IpNetwork::V6(network.gateway6)),
                ],
            ).replace_command(runner, common).await?;
            RouterAdvertisement::new(int_port.clone(), network.dns6, common)
                .create_command(runner, common).await?;

            LogicalSwitch::with_dhcp(
                int_switch.clone(),
                SwitchDhcpOptions::new(network.gateway4, network.exclude_ips(), network.gateway6),
            ).replace_command(runner, common).await?;
            let dhcp = DhcpOptionIds::refresh(
                runner,
                common,
                &DhcpOptionRecord::new_v4(int_switch.clone(), network.gateway4, int_mac, network.dns4, common),
                &DhcpOptionRecord::new_v6(int_switch.clone(), network.gateway6, int_mac, network.dns6, common),
            ).await?;
            tracing::debug!("LS {int_switch} DHCP options v4 {} v6 {}", &dhcp.v4, &dhcp.v6);

            LogicalSwitchPort::new(
                naming::internal_switch_router_port(name, &network.name),
                int_switch,
                LogicalSwitchPortType::new_router(int_port, false),
            ).replace_command(runner, common).await?;
        }

        Ok(link_local)
    }

    async fn provision_instances(
        &self,
        project: &LogicalProject,
    ) -> anyhow::Result<Vec<InstancePort>> {
        let runner = self.runner;
        let common = &self.common;
        let binder = DataplaneBinder::new(runner, common);
        let mut ports = Vec::new();
        for instance in &project.instances {
            let network = project.network(&instance.network)?;
            let switch = naming::internal_switch(&project.name, &network.name);
            let dhcp = DhcpOptionIds::lookup(runner, common, &switch, network.subnet4(), network.subnet6()).await?;

            let port = naming::instance_port(&project.name, &network.name, &instance.name);
            let mac = random_mac()?;
            LogicalSwitchPort::new(
                port.clone(),
                switch,
                LogicalSwitchPortType::new_instance(mac, dhcp.v4, dhcp.v6),
            ).replace_command(runner, common).await?;
            let veth = binder.bind_instance_port(&port, &mac).await?;

            let workload = match &instance.image {
                Some(image) => {
                    let workload = Workload::new(
                        naming::workload(&project.name, &network.name, &instance.name),
                        image.clone(),
                        veth.peer.clone(),
                    );
                    workload.recreate(runner).await?;
                    Some(workload.name)
                }
                None => None,
            };
            tracing::info!("instance {} on LSP {port} with mac {mac} via {}", &instance.name, &veth.host);
            ports.push(InstancePort {
                instance: instance.name.clone(),
                port,
                mac,
                device: veth.host,
                nic: veth.peer,
                workload,
            });
        }
        Ok(ports)
    }

    /// Remove everything `up` creates for the project, in reverse. Anything already gone is
    /// skipped. The HA chassis group is shared between projects and stays.
    async fn teardown(&self, project: &LogicalProject) -> anyhow::Result<()> {
        let runner = self.runner;
        let common = &self.common;
        let name = &project.name;
        tracing::info!("removing project {name}");

        for instance in &project.instances {
            if instance.image.is_some() {
                destroy_workload(runner, &naming::workload(name, &instance.network, &instance.name)).await?;
            }
            clear_stale_binding(runner, &naming::instance_port(name, &instance.network, &instance.name)).await?;
        }
        for network in &project.networks {
            let int_switch = naming::internal_switch(name, &network.name);
            let removed = purge_dhcp_options(runner, common, &int_switch).await?;
            tracing::debug!("removed {removed} DHCP option records of LS {int_switch}");
            LogicalSwitch::new(int_switch).destroy_command(runner, common).await?;
        }
        LogicalSwitch::new(naming::external_switch(name)).destroy_command(runner, common).await?;
        LogicalRouter::new(naming::router(name)).destroy_command(runner, common).await?;

        if project.isolation == Isolation::Namespace {
            ProjectNamespace::new(name).teardown(runner, name).await?;
            self.release_link_local(name).await?;
        }
        Ok(())
    }
}
