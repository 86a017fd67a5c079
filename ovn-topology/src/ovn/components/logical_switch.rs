use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::orchestration::{CommandRunner, OrchestrationCommon};
use crate::ovn::configuration::dhcp::SwitchDhcpOptions;
use crate::ovn::OvnCommand;
use crate::vec_of_strings;

/// This represents an OVN logical switch. Internal switches carry the subnet config that OVN's
/// native DHCP allocates dynamic addresses from, the external switch has none.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogicalSwitch {
    pub name: String,
    pub dhcp: Option<SwitchDhcpOptions>,
}

impl LogicalSwitch {
    pub fn new(
        name: String,
    ) -> Self {
        Self {
            name,
            dhcp: None,
        }
    }

    pub fn with_dhcp(
        name: String,
        dhcp: SwitchDhcpOptions,
    ) -> Self {
        Self {
            name,
            dhcp: Some(dhcp),
        }
    }
}

#[async_trait]
impl OvnCommand for LogicalSwitch {
    async fn create_command(&self, runner: &dyn CommandRunner, common: &OrchestrationCommon) -> anyhow::Result<String> {
        tracing::info!("creating LS {}", &self.name);
        let mut cmd = vec_of_strings!["ls-add", &self.name];
        if let Some(dhcp) = &self.dhcp {
            tracing::info!("setting dynamic addressing subnet {} on LS {}", dhcp.subnet, &self.name);
            cmd.extend(vec_of_strings!["--", "set", "logical_switch", &self.name]);
            cmd.extend(dhcp.other_config());
        }
        runner.run(common.nbctl(cmd)).await
    }

    async fn destroy_command(&self, runner: &dyn CommandRunner, common: &OrchestrationCommon) -> anyhow::Result<String> {
        tracing::info!("destroying LS {}", &self.name);
        runner.run(common.nbctl(vec_of_strings!["--if-exists", "ls-del", &self.name])).await
    }
}
