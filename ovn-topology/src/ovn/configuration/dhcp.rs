use std::net::{Ipv4Addr, Ipv6Addr};
use anyhow::bail;
use async_trait::async_trait;
use ipnetwork::{Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};
use crate::error::ProvisionError;
use crate::orchestration::{output_lines, CommandRunner, OrchestrationCommon};
use crate::ovn::components::MacAddress;
use crate::ovn::OvnCommand;
use crate::vec_of_strings;

/// External id key that ties a DHCP option record to the internal switch it was made for. This is
/// the only link between the two in the database, so lookups and cleanup all go through it.
pub const DHCP_OWNER_KEY: &str = "ovn_topology_switch";

/// This represents the subnet config on a logical switch that OVN's dynamic address assignment
/// works from. Addresses in `exclude_ips` are never handed out.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SwitchDhcpOptions {
    pub subnet: Ipv4Network,
    pub exclude_ips: Vec<Ipv4Addr>,
    pub ipv6_prefix: Ipv6Network,
}

impl SwitchDhcpOptions {
    /// The gateways are given as router address with prefix, the subnets are derived from them.
    pub fn new(
        gateway4: Ipv4Network,
        exclude_ips: Vec<Ipv4Addr>,
        gateway6: Ipv6Network,
    ) -> Self {
        Self {
            subnet: subnet4(gateway4),
            exclude_ips,
            ipv6_prefix: subnet6(gateway6),
        }
    }

    pub fn other_config(&self) -> Vec<String> {
        let exclude: Vec<String> = self.exclude_ips.iter().map(|ip| ip.to_string()).collect();
        vec_of_strings![
            format!("other_config:subnet={}", self.subnet),
            format!("other_config:exclude_ips=\"{}\"", exclude.join(" ")),
            format!("other_config:ipv6_prefix={}", self.ipv6_prefix)
        ]
    }
}

/// Network part of an address with prefix, `10.0.0.1/24` becomes `10.0.0.0/24`.
pub fn subnet4(net: Ipv4Network) -> Ipv4Network {
    Ipv4Network::new(net.network(), net.prefix()).unwrap_or(net)
}

pub fn subnet6(net: Ipv6Network) -> Ipv6Network {
    Ipv6Network::new(net.network(), net.prefix()).unwrap_or(net)
}

/// The cidr column match/set argument. The IPv4 value is written bare while the IPv6 value has to
/// be quoted, and lookups must use the same form the record was created with.
pub fn cidr4_arg(subnet: Ipv4Network) -> String {
    format!("cidr={}", subnet4(subnet))
}

pub fn cidr6_arg(subnet: Ipv6Network) -> String {
    format!("cidr=\"{}\"", subnet6(subnet))
}

fn owner_arg(switch: &str) -> String {
    format!("external_ids:{DHCP_OWNER_KEY}={switch}")
}

/// This represents a DHCP option record in OVN's `dhcp_options` table for one internal switch and
/// one address family. The UUID of the record is assigned to instance switch ports to enable DHCP
/// for them.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum DhcpOptionRecord {
    V4 {
        switch: String,
        cidr: Ipv4Network,
        router: Ipv4Addr,
        server_mac: MacAddress,
        lease_time: u32,
        dns_server: Ipv4Addr,
        domain_name: String,
    },
    V6 {
        switch: String,
        cidr: Ipv6Network,
        server_mac: MacAddress,
        dns_server: Ipv6Addr,
        domain_search: String,
    },
}

impl DhcpOptionRecord {
    /// The router port on the switch is both the default gateway and the DHCP server.
    pub fn new_v4(
        switch: String,
        gateway4: Ipv4Network,
        server_mac: MacAddress,
        dns_server: Ipv4Addr,
        common: &OrchestrationCommon,
    ) -> Self {
        DhcpOptionRecord::V4 {
            switch,
            cidr: subnet4(gateway4),
            router: gateway4.ip(),
            server_mac,
            lease_time: common.dhcp_lease_time,
            dns_server,
            domain_name: common.dns_domain.clone(),
        }
    }

    pub fn new_v6(
        switch: String,
        gateway6: Ipv6Network,
        server_mac: MacAddress,
        dns_server: Ipv6Addr,
        common: &OrchestrationCommon,
    ) -> Self {
        DhcpOptionRecord::V6 {
            switch,
            cidr: subnet6(gateway6),
            server_mac,
            dns_server,
            domain_search: common.dns_domain.clone(),
        }
    }

    pub fn switch(&self) -> &str {
        match &self {
            DhcpOptionRecord::V4 { switch, .. } => switch,
            DhcpOptionRecord::V6 { switch, .. } => switch,
        }
    }

    fn cidr_arg(&self) -> String {
        match &self {
            DhcpOptionRecord::V4 { cidr, .. } => cidr4_arg(*cidr),
            DhcpOptionRecord::V6 { cidr, .. } => cidr6_arg(*cidr),
        }
    }

    /// Options that go through `dhcp-options-set-options`, as that is the only way to get the
    /// string values (domain name, search list) escaped properly.
    fn options(&self) -> Vec<String> {
        match &self {
            DhcpOptionRecord::V4 { router, server_mac, lease_time, dns_server, domain_name, .. } => vec_of_strings![
                format!("server_id={router}"),
                format!("router={router}"),
                format!("server_mac={server_mac}"),
                format!("lease_time={lease_time}"),
                format!("dns_server={dns_server}"),
                format!("domain_name=\"{domain_name}\"")
            ],
            DhcpOptionRecord::V6 { server_mac, dns_server, domain_search, .. } => vec_of_strings![
                format!("server_id={server_mac}"),
                format!("domain_search=\"{domain_search}\""),
                format!("dns_server={dns_server}")
            ],
        }
    }
}

#[async_trait]
impl OvnCommand for DhcpOptionRecord {
    /// Returns the UUID of the new record.
    async fn create_command(&self, runner: &dyn CommandRunner, common: &OrchestrationCommon) -> anyhow::Result<String> {
        tracing::info!("creating DHCP options {} for LS {}", self.cidr_arg(), self.switch());
        let cmd = common.nbctl(vec_of_strings![
            "create", "dhcp_options", owner_arg(self.switch()), self.cidr_arg()
        ]);
        // every create is a new row, a timed out one must not be run again
        let out = runner.run_non_idempotent(cmd.clone()).await?;
        let uuid = out.trim().to_string();
        if uuid.is_empty() {
            bail!(ProvisionError::UnexpectedOutput { command: cmd.join(" "), output: out });
        }
        let mut set_options = vec_of_strings!["dhcp-options-set-options", &uuid];
        set_options.extend(self.options());
        runner.run(common.nbctl(set_options)).await?;
        Ok(uuid)
    }

    /// Destroys every record of this switch and family.
    async fn destroy_command(&self, runner: &dyn CommandRunner, common: &OrchestrationCommon) -> anyhow::Result<String> {
        let uuids = find_dhcp_options(runner, common, self.switch(), Some(&self.cidr_arg())).await?;
        for uuid in &uuids {
            destroy_dhcp_option(runner, common, uuid).await?;
        }
        Ok(uuids.join("\n"))
    }
}

/// UUIDs of the DHCP option records tagged with `switch`, optionally only those with a given cidr
/// (use `cidr4_arg`/`cidr6_arg` for the match).
pub async fn find_dhcp_options(
    runner: &dyn CommandRunner,
    common: &OrchestrationCommon,
    switch: &str,
    cidr_match: Option<&str>,
) -> anyhow::Result<Vec<String>> {
    let mut cmd = vec_of_strings![
        "--format=csv", "--no-headings", "--data=bare", "--columns=_uuid",
        "find", "dhcp_options", owner_arg(switch)
    ];
    if let Some(cidr) = cidr_match {
        cmd.push(cidr.to_string());
    }
    let out = runner.run(common.nbctl(cmd)).await?;
    Ok(output_lines(&out))
}

async fn destroy_dhcp_option(
    runner: &dyn CommandRunner,
    common: &OrchestrationCommon,
    uuid: &str,
) -> anyhow::Result<()> {
    tracing::info!("destroying DHCP options {uuid}");
    runner.run(common.nbctl(vec_of_strings!["destroy", "dhcp_options", uuid])).await?;
    Ok(())
}

/// Destroy every DHCP option record tagged with `switch`, returns how many were removed.
pub async fn purge_dhcp_options(
    runner: &dyn CommandRunner,
    common: &OrchestrationCommon,
    switch: &str,
) -> anyhow::Result<usize> {
    let existing = find_dhcp_options(runner, common, switch, None).await?;
    if existing.len() > 2 {
        tracing::warn!("found {} DHCP option records for LS {switch}, will delete all", existing.len());
    }
    for uuid in &existing {
        destroy_dhcp_option(runner, common, uuid).await?;
    }
    Ok(existing.len())
}

/// The pair of records instance ports on an internal switch are bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpOptionIds {
    pub v4: String,
    pub v6: String,
}

/// Times a refresh is started over when the switch does not end up with exactly its two records.
const REFRESH_ATTEMPTS: u32 = 2;

impl DhcpOptionIds {
    /// Replace whatever DHCP option records the switch has with exactly the two given. Records are
    /// never edited in place, a refresh always gives new UUIDs. The records are counted again
    /// afterwards and the refresh redone if anything else is tagged with the switch.
    pub async fn refresh(
        runner: &dyn CommandRunner,
        common: &OrchestrationCommon,
        v4: &DhcpOptionRecord,
        v6: &DhcpOptionRecord,
    ) -> anyhow::Result<Self> {
        if v4.switch() != v6.switch() {
            bail!(ProvisionError::validation(format!(
                "DHCP records for different switches {} and {}", v4.switch(), v6.switch()
            )));
        }
        let switch = v4.switch();
        let mut found = Vec::new();
        for attempt in 1..=REFRESH_ATTEMPTS {
            purge_dhcp_options(runner, common, switch).await?;
            let ids = Self {
                v4: v4.create_command(runner, common).await?,
                v6: v6.create_command(runner, common).await?,
            };
            found = find_dhcp_options(runner, common, switch, None).await?;
            found.sort();
            let mut expected = vec![ids.v4.clone(), ids.v6.clone()];
            expected.sort();
            if found == expected {
                return Ok(ids);
            }
            tracing::warn!(
                "LS {switch} has DHCP option records {found:?} after refresh {attempt}/{REFRESH_ATTEMPTS}, expected {expected:?}"
            );
        }
        bail!(ProvisionError::UnexpectedOutput {
            command: format!("find dhcp_options {}", owner_arg(switch)),
            output: found.join("\n"),
        })
    }

    /// Find the records a previous refresh created for the switch. Both must be there, an instance
    /// port is never created without them.
    pub async fn lookup(
        runner: &dyn CommandRunner,
        common: &OrchestrationCommon,
        switch: &str,
        subnet4: Ipv4Network,
        subnet6: Ipv6Network,
    ) -> anyhow::Result<Self> {
        let v4 = lookup_one(runner, common, switch, &cidr4_arg(subnet4)).await?;
        let v6 = lookup_one(runner, common, switch, &cidr6_arg(subnet6)).await?;
        Ok(Self { v4, v6 })
    }
}

async fn lookup_one(
    runner: &dyn CommandRunner,
    common: &OrchestrationCommon,
    switch: &str,
    cidr_match: &str,
) -> anyhow::Result<String> {
    let uuids = find_dhcp_options(runner, common, switch, Some(cidr_match)).await?;
    match uuids.as_slice() {
        [uuid] => Ok(uuid.clone()),
        [] => bail!(ProvisionError::MissingState {
            what: format!("DHCP options {cidr_match} for LS {switch}, provision the network first")
        }),
        // which one carries the options can't be told, a refresh sorts it out
        _ => bail!(ProvisionError::UnexpectedOutput {
            command: format!("find dhcp_options {} {cidr_match}", owner_arg(switch)),
            output: uuids.join("\n"),
        }),
    }
}
