use std::net::IpAddr;
use async_trait::async_trait;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use crate::ovn::components::OvnIpAddr;
use crate::orchestration::{CommandRunner, OrchestrationCommon};
use crate::ovn::OvnCommand;
use crate::vec_of_strings;

/// This represents a source NAT rule on a logical router, traffic from `logical_ip` leaves with
/// `external_ip` as its source. One rule is needed per address family.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OvnNat {
    pub logical_router_name: String,
    pub external_ip: OvnIpAddr, // must be ip
    pub logical_ip: OvnIpAddr, // subnet with mask
}

impl OvnNat {
    /// The internal side is given as router address with prefix and written as its subnet.
    pub fn new_snat(
        logical_router_name: String,
        external_ip: IpAddr,
        internal: IpNetwork,
    ) -> Self {
        let subnet = IpNetwork::new(internal.network(), internal.prefix()).unwrap_or(internal);
        Self {
            logical_router_name,
            external_ip: OvnIpAddr::Ip(external_ip),
            logical_ip: OvnIpAddr::from(subnet),
        }
    }
}

#[async_trait]
impl OvnCommand for OvnNat {
    async fn create_command(&self, runner: &dyn CommandRunner, common: &OrchestrationCommon) -> anyhow::Result<String> {
        tracing::info!("creating snat rule ({}, {}) on LR {}", &self.external_ip, &self.logical_ip, &self.logical_router_name);
        runner.run(common.nbctl(vec_of_strings![
            "--may-exist", "lr-nat-add", &self.logical_router_name, "snat", &self.external_ip, &self.logical_ip
        ])).await
    }

    /// snat rules are keyed by their logical side
    async fn destroy_command(&self, runner: &dyn CommandRunner, common: &OrchestrationCommon) -> anyhow::Result<String> {
        tracing::info!("destroying snat rule ({}, {}) on LR {}", &self.external_ip, &self.logical_ip, &self.logical_router_name);
        runner.run(common.nbctl(vec_of_strings![
            "--if-exists", "lr-nat-del", &self.logical_router_name, "snat", &self.logical_ip
        ])).await
    }
}
