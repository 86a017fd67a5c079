pub mod network;

use std::collections::HashSet;
use anyhow::{bail, Context};
use ovn_topology_schemas::settings::{ChassisConfig, Settings};
use ovn_topology_schemas::topology_yaml::project::{InstanceConfig, Isolation, ProjectConfig};
use ovn_topology_schemas::topology_yaml::TopologyConfig;
use crate::components::network::{LogicalNetwork, LogicalUplink};
use crate::error::ProvisionError;
use crate::naming;

// The logical topology is the yaml definition with every field parsed and cross checked, so that
// nothing is run against the host for a topology that would fail half way on bad input. It holds
// no state of its own beyond the file, everything provisioned is found again by name.

/// The selected projects of a topology file, ready to be provisioned.
#[derive(Debug, Clone)]
pub struct LogicalTopology {
    pub settings: Settings,
    pub chassis: ChassisConfig,
    pub projects: Vec<LogicalProject>,
    /// every project in the file, selected or not
    pub defined_projects: Vec<String>,
    /// the file this was loaded from, when it came from one
    pub source: Option<String>,
}

impl LogicalTopology {
    /// Validate the whole file (so a typo in another project is still reported) and keep the
    /// projects selected with `only`.
    pub fn from_config(
        config: &TopologyConfig,
        only: Option<&str>,
    ) -> anyhow::Result<Self> {
        let mut seen = HashSet::new();
        let mut projects = Vec::new();
        for project in &config.projects {
            if !seen.insert(project.name.as_str()) {
                bail!(ProvisionError::validation(format!("project {} is defined more than once", project.name)));
            }
            projects.push(LogicalProject::from_config(project)
                .with_context(|| format!("in project {}", project.name))?);
        }
        let defined_projects = projects.iter().map(|p| p.name.clone()).collect();
        let selected: Vec<&str> = config.selected_projects(only)?.iter().map(|p| p.name.as_str()).collect();
        projects.retain(|p| selected.contains(&p.name.as_str()));
        Ok(Self {
            settings: config.settings.clone(),
            chassis: config.chassis.clone(),
            projects,
            defined_projects,
            source: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalInstance {
    pub name: String,
    pub network: String,
    pub image: Option<String>,
}

/// A tenant with its router uplink, internal networks and instances.
#[derive(Debug, Clone)]
pub struct LogicalProject {
    pub name: String,
    pub isolation: Isolation,
    pub uplink: LogicalUplink,
    pub networks: Vec<LogicalNetwork>,
    pub instances: Vec<LogicalInstance>,
}

impl LogicalProject {
    pub fn from_config(config: &ProjectConfig) -> anyhow::Result<Self> {
        naming::validate_input_name("project", &config.name)?;
        let uplink = LogicalUplink::from_config(&config.uplink)?;
        if config.isolation == Isolation::Namespace && uplink.ula_prefix.is_none() {
            bail!(ProvisionError::validation("namespace isolation needs uplink ula_prefix for the host link"));
        }

        if config.networks.is_empty() {
            bail!(ProvisionError::validation("a project needs at least one network"));
        }
        let mut networks: Vec<LogicalNetwork> = Vec::new();
        for network_config in &config.networks {
            naming::validate_input_name("network", &network_config.name)?;
            let network = LogicalNetwork::from_config(network_config)?;
            for existing in &networks {
                if existing.name == network.name {
                    bail!(ProvisionError::validation(format!("network {} is defined more than once", network.name)));
                }
                if existing.overlaps(&network) {
                    bail!(ProvisionError::validation(format!(
                        "network {} overlaps network {}", network.name, existing.name
                    )));
                }
            }
            if network.subnet4().contains(uplink.ip4.network()) || uplink.ip4.contains(network.subnet4().network()) {
                bail!(ProvisionError::validation(format!(
                    "network {} overlaps the uplink network {}", network.name, uplink.ip4
                )));
            }
            networks.push(network);
        }

        let mut instances: Vec<LogicalInstance> = Vec::new();
        for instance in &config.instances {
            instances.push(Self::instance_from_config(instance, &networks, &instances)?);
        }

        let network_names: Vec<&str> = networks.iter().map(|n| n.name.as_str()).collect();
        let instance_pairs: Vec<(&str, &str)> = instances.iter().map(|i| (i.network.as_str(), i.name.as_str())).collect();
        for name in naming::ovn_object_names(&config.name, &network_names, &instance_pairs) {
            naming::validate_derived_name(&name)?;
        }
        for (network, instance) in &instance_pairs {
            naming::validate_derived_name(&naming::workload(&config.name, network, instance))?;
        }

        Ok(Self {
            name: config.name.clone(),
            isolation: config.isolation,
            uplink,
            networks,
            instances,
        })
    }

    fn instance_from_config(
        config: &InstanceConfig,
        networks: &[LogicalNetwork],
        existing: &[LogicalInstance],
    ) -> anyhow::Result<LogicalInstance> {
        naming::validate_input_name("instance", &config.name)?;
        if !networks.iter().any(|n| n.name == config.network) {
            bail!(ProvisionError::validation(format!(
                "instance {} is on network {} which is not defined", config.name, config.network
            )));
        }
        if existing.iter().any(|i| i.name == config.name && i.network == config.network) {
            bail!(ProvisionError::validation(format!(
                "instance {} is defined more than once on network {}", config.name, config.network
            )));
        }
        Ok(LogicalInstance {
            name: config.name.clone(),
            network: config.network.clone(),
            image: config.image.clone(),
        })
    }

    pub fn network(&self, name: &str) -> anyhow::Result<&LogicalNetwork> {
        self.networks.iter()
            .find(|n| n.name == name)
            .with_context(|| format!("network {name} is not in project {}", &self.name))
    }
}
