use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::orchestration::{CommandRunner, OrchestrationCommon};
use crate::ovn::components::MacAddress;
use crate::ovn::OvnCommand;
use crate::vec_of_strings;

/// This represents a logical switch port that has different variants, depending on what kind of
/// port it is providing in the network
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogicalSwitchPort {
    pub name: String,
    pub parent_switch: String,
    pub port_type: LogicalSwitchPortType,
}

impl LogicalSwitchPort {
    pub fn new(
        name: String,
        parent_switch: String,
        port_type: LogicalSwitchPortType,
    ) -> Self {
        Self {
            name,
            parent_switch,
            port_type,
        }
    }
}

/// This enum represents the different types of port, each type of port will require different data
/// to be fully functional in the network.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum LogicalSwitchPortType {
    /// connects the switch to a logical router port, `nat_addresses` makes the switch answer ARP
    /// for the router's NAT addresses which is needed on the external switch
    Router {
        router_port_name: String,
        nat_addresses: bool,
    },
    /// bridged onto a physical network through the bridge mapping `provider_network_name`
    LocalNet {
        provider_network_name: String,
    },
    /// bound to a local interface by iface-id, traffic never leaves this chassis
    LocalPort,
    /// an instance's port, addressed dynamically by OVN from the switch subnet
    Instance {
        mac_address: MacAddress,
        dhcpv4_options: String,
        dhcpv6_options: String,
    },
}

impl LogicalSwitchPortType {
    pub fn new_router(
        router_port_name: String,
        nat_addresses: bool,
    ) -> LogicalSwitchPortType {
        LogicalSwitchPortType::Router {
            router_port_name,
            nat_addresses,
        }
    }

    pub fn new_localnet(
        provider_network_name: String,
    ) -> LogicalSwitchPortType {
        LogicalSwitchPortType::LocalNet {
            provider_network_name,
        }
    }

    pub fn new_instance(
        mac_address: MacAddress,
        dhcpv4_options: String,
        dhcpv6_options: String,
    ) -> LogicalSwitchPortType {
        LogicalSwitchPortType::Instance {
            mac_address,
            dhcpv4_options,
            dhcpv6_options,
        }
    }

    fn kind(&self) -> &'static str {
        match &self {
            LogicalSwitchPortType::Router { .. } => "router",
            LogicalSwitchPortType::LocalNet { .. } => "localnet",
            LogicalSwitchPortType::LocalPort => "localport",
            LogicalSwitchPortType::Instance { .. } => "instance",
        }
    }

    /// Column settings for the `set logical_switch_port` part of the create command.
    fn columns(&self) -> Vec<String> {
        match &self {
            LogicalSwitchPortType::Router { router_port_name, nat_addresses } => {
                let mut columns = vec_of_strings![
                    "type=router",
                    "addresses=router",
                    format!("options:router-port={router_port_name}")
                ];
                if *nat_addresses {
                    columns.push("options:nat-addresses=router".to_string());
                }
                columns
            }
            LogicalSwitchPortType::LocalNet { provider_network_name } => vec_of_strings![
                "type=localnet",
                "addresses=unknown",
                format!("options:network_name={provider_network_name}")
            ],
            LogicalSwitchPortType::LocalPort => vec_of_strings![
                "type=localport",
                "addresses=unknown"
            ],
            LogicalSwitchPortType::Instance { mac_address, dhcpv4_options, dhcpv6_options } => vec_of_strings![
                format!("addresses=\"{mac_address} dynamic\""),
                format!("dhcpv4_options={dhcpv4_options}"),
                format!("dhcpv6_options={dhcpv6_options}")
            ],
        }
    }
}

#[async_trait]
impl OvnCommand for LogicalSwitchPort {
    async fn create_command(&self, runner: &dyn CommandRunner, common: &OrchestrationCommon) -> anyhow::Result<String> {
        tracing::info!("creating LSP type {} {} on LS {}", self.port_type.kind(), &self.name, &self.parent_switch);
        let mut cmd = vec_of_strings![
            "lsp-add", &self.parent_switch, &self.name,
            "--", "set", "logical_switch_port", &self.name
        ];
        cmd.extend(self.port_type.columns());
        runner.run(common.nbctl(cmd)).await
    }

    async fn destroy_command(&self, runner: &dyn CommandRunner, common: &OrchestrationCommon) -> anyhow::Result<String> {
        tracing::info!("destroying LSP type {} {} on LS {}", self.port_type.kind(), &self.name, &self.parent_switch);
        runner.run(common.nbctl(vec_of_strings!["--if-exists", "lsp-del", &self.name])).await
    }
}
