use std::net::IpAddr;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::orchestration::{CommandRunner, OrchestrationCommon};
use crate::ovn::components::OvnIpAddr;
use crate::ovn::OvnCommand;
use crate::vec_of_strings;

/// This represents a static route on a logical router
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OvnRoute {
    pub router_name: String,
    pub prefix: OvnIpAddr, // subnet with mask
    pub next_hop: OvnIpAddr, // must be ip
}

impl OvnRoute {
    /// `0.0.0.0/0` or `::/0` via `next_hop`, the family follows the next hop.
    pub fn default_route(
        router_name: String,
        next_hop: IpAddr,
    ) -> Self {
        let prefix = match next_hop {
            IpAddr::V4(_) => OvnIpAddr::Subnet { ip: IpAddr::from([0u8; 4]), mask: 0 },
            IpAddr::V6(_) => OvnIpAddr::Subnet { ip: IpAddr::from([0u8; 16]), mask: 0 },
        };
        Self {
            router_name,
            prefix,
            next_hop: OvnIpAddr::Ip(next_hop),
        }
    }
}

#[async_trait]
impl OvnCommand for OvnRoute {
    async fn create_command(&self, runner: &dyn CommandRunner, common: &OrchestrationCommon) -> anyhow::Result<String> {
        tracing::info!("creating route ({}, {}) on LR {}", &self.prefix, &self.next_hop, &self.router_name);
        runner.run(common.nbctl(vec_of_strings![
            "--may-exist", "lr-route-add", &self.router_name, &self.prefix, &self.next_hop
        ])).await
    }

    async fn destroy_command(&self, runner: &dyn CommandRunner, common: &OrchestrationCommon) -> anyhow::Result<String> {
        tracing::info!("destroying route ({}, {}) on LR {}", &self.prefix, &self.next_hop, &self.router_name);
        runner.run(common.nbctl(vec_of_strings![
            "--if-exists", "lr-route-del", &self.router_name, &self.prefix
        ])).await
    }
}
