use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::orchestration::{CommandRunner, OrchestrationCommon};
use crate::ovn::components::{MacAddress, OvnIpAddr};
use crate::ovn::OvnCommand;
use crate::vec_of_strings;

/// This represents an OVN logical router port, the networks must be addresses with a mask. A
/// port usually has one IPv4 and one IPv6 network.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogicalRouterPort {
    pub name: String,
    pub parent_router: String,
    pub mac_address: MacAddress,
    pub networks: Vec<OvnIpAddr>,
}

impl LogicalRouterPort {
    pub fn new(
        name: String,
        parent_router: String,
        mac_address: MacAddress,
        networks: Vec<OvnIpAddr>,
    ) -> Self {
        Self {
            name,
            parent_router,
            mac_address,
            networks,
        }
    }
}

#[async_trait]
impl OvnCommand for LogicalRouterPort {
    async fn create_command(&self, runner: &dyn CommandRunner, common: &OrchestrationCommon) -> anyhow::Result<String> {
        tracing::info!("creating LRP {}", &self.name);
        let mut cmd = vec_of_strings!["lrp-add", &self.parent_router, &self.name, self.mac_address];
        cmd.extend(self.networks.iter().map(|n| n.to_string()));
        runner.run(common.nbctl(cmd)).await
    }

    async fn destroy_command(&self, runner: &dyn CommandRunner, common: &OrchestrationCommon) -> anyhow::Result<String> {
        tracing::info!("destroying LRP {}", &self.name);
        runner.run(common.nbctl(vec_of_strings!["--if-exists", "lrp-del", &self.name])).await
    }
}
