use std::net::Ipv6Addr;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::orchestration::{CommandRunner, OrchestrationCommon};
use crate::ovn::OvnCommand;
use crate::vec_of_strings;

/// IPv6 router advertisement settings on an internal router port. Instances get their IPv6
/// address by SLAAC from these, DHCPv6 only hands out DNS settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterAdvertisement {
    pub router_port: String,
    pub min_interval: u32,
    pub max_interval: u32,
    pub rdnss: Ipv6Addr,
    pub dnssl: String,
}

impl RouterAdvertisement {
    pub fn new(
        router_port: String,
        rdnss: Ipv6Addr,
        common: &OrchestrationCommon,
    ) -> Self {
        Self {
            router_port,
            min_interval: common.ra_min_interval,
            max_interval: common.ra_max_interval,
            rdnss,
            dnssl: common.dns_domain.clone(),
        }
    }
}

#[async_trait]
impl OvnCommand for RouterAdvertisement {
    async fn create_command(&self, runner: &dyn CommandRunner, common: &OrchestrationCommon) -> anyhow::Result<String> {
        tracing::info!("configuring router advertisements on LRP {}", &self.router_port);
        runner.run(common.nbctl(vec_of_strings![
            "set", "logical_router_port", &self.router_port,
            "ipv6_ra_configs:send_periodic=true",
            "ipv6_ra_configs:address_mode=slaac",
            format!("ipv6_ra_configs:min_interval={}", self.min_interval),
            format!("ipv6_ra_configs:max_interval={}", self.max_interval),
            format!("ipv6_ra_configs:rdnss={}", self.rdnss),
            format!("ipv6_ra_configs:dnssl={}", &self.dnssl)
        ])).await
    }

    async fn destroy_command(&self, runner: &dyn CommandRunner, common: &OrchestrationCommon) -> anyhow::Result<String> {
        tracing::info!("clearing router advertisements on LRP {}", &self.router_port);
        runner.run(common.nbctl(vec_of_strings![
            "--if-exists", "clear", "logical_router_port", &self.router_port, "ipv6_ra_configs"
        ])).await
    }
}
