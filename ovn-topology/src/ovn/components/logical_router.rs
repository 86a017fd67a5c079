use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::orchestration::{CommandRunner, OrchestrationCommon};
use crate::ovn::OvnCommand;
use crate::vec_of_strings;

/// This represents an OVN logical router. Routes, NAT and the chassis binding are configured on
/// it separately, the implementation for these are in the `configuration` folder and in
/// `chassis.rs`. Deleting the router removes its ports, routes and NAT rules with it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogicalRouter {
    pub name: String,
}

impl LogicalRouter {
    pub fn new(
        name: String,
    ) -> Self {
        Self { name }
    }
}

#[async_trait]
impl OvnCommand for LogicalRouter {
    async fn create_command(&self, runner: &dyn CommandRunner, common: &OrchestrationCommon) -> anyhow::Result<String> {
        tracing::info!("creating LR {}", &self.name);
        runner.run(common.nbctl(vec_of_strings!["lr-add", &self.name])).await
    }

    async fn destroy_command(&self, runner: &dyn CommandRunner, common: &OrchestrationCommon) -> anyhow::Result<String> {
        tracing::info!("destroying LR {}", &self.name);
        runner.run(common.nbctl(vec_of_strings!["--if-exists", "lr-del", &self.name])).await
    }
}
