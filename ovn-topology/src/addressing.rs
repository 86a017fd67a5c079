use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use anyhow::bail;
use ipnetwork::{Ipv4Network, Ipv6Network};
use rand::Rng;
use crate::error::ProvisionError;
use crate::orchestration::CommandRunner;
use crate::ovn::components::MacAddress;
use crate::vec_of_strings;

/// Longest interface name we generate. The kernel allows 15 but some dhclient versions break on
/// names longer than 13.
pub const MAX_DEVICE_NAME_LEN: usize = 13;

/// The first offsets of the link-local range are not handed out, `.1` is the host end of every
/// namespace uplink.
const FIRST_FREE_OFFSET: u32 = 2;

/// `prefix` followed by 8 random hex characters, or `None` when that would be longer than
/// `MAX_DEVICE_NAME_LEN`. Callers must treat `None` as an error, never truncate.
pub fn random_device_name(prefix: &str) -> Option<String> {
    let suffix: u32 = rand::thread_rng().gen();
    let name = format!("{prefix}{suffix:08x}");
    if name.len() > MAX_DEVICE_NAME_LEN {
        return None;
    }
    Some(name)
}

pub fn random_mac() -> anyhow::Result<MacAddress> {
    MacAddress::random()
}

/// Modified EUI-64 interface identifier: flip the universal/local bit of the first octet and put
/// `ff:fe` in the middle of the mac.
fn eui64_interface_id(mac: &MacAddress) -> [u8; 8] {
    let o = mac.octets();
    [o[0] ^ 0x02, o[1], o[2], 0xff, 0xfe, o[3], o[4], o[5]]
}

/// Address for `mac` inside `prefix`, keeping the prefix length. The prefix must be /64 or
/// shorter so there is room for the 64 bit interface identifier.
pub fn eui64_address(
    prefix: &Ipv6Network,
    mac: &MacAddress,
) -> anyhow::Result<Ipv6Network> {
    if prefix.prefix() > 64 {
        bail!(ProvisionError::validation(format!(
            "prefix {prefix} is longer than /64, no room for an EUI-64 address"
        )));
    }
    let mut octets = prefix.network().octets();
    octets[8..].copy_from_slice(&eui64_interface_id(mac));
    Ok(Ipv6Network::new(Ipv6Addr::from(octets), prefix.prefix())?)
}

/// First address from `base + 2` on, within `range_size` addresses, that is not in `in_use`.
pub fn first_free_ipv4(
    base: Ipv4Addr,
    range_size: u32,
    in_use: &HashSet<Ipv4Addr>,
) -> anyhow::Result<Ipv4Addr> {
    let start = u32::from(base);
    for offset in FIRST_FREE_OFFSET..FIRST_FREE_OFFSET.saturating_add(range_size) {
        let candidate = Ipv4Addr::from(start.saturating_add(offset));
        if !in_use.contains(&candidate) {
            return Ok(candidate);
        }
    }
    bail!(ProvisionError::Exhausted {
        range: format!("{base} + {FIRST_FREE_OFFSET}..{}", FIRST_FREE_OFFSET.saturating_add(range_size)),
    })
}

/// Addresses inside `within` that appear in the host's IPv4 route table, either as a destination
/// or as a preferred source.
pub fn route_table_addresses(
    output: &str,
    within: &Ipv4Network,
) -> HashSet<Ipv4Addr> {
    output.split_whitespace()
        .filter_map(|token| {
            let addr = token.split('/').next().unwrap_or(token);
            addr.parse::<Ipv4Addr>().ok()
        })
        .filter(|addr| within.contains(*addr))
        .collect()
}

pub async fn host_route_addresses(
    runner: &dyn CommandRunner,
    within: &Ipv4Network,
) -> anyhow::Result<HashSet<Ipv4Addr>> {
    let out = runner.run(vec_of_strings!["ip", "-4", "route", "show", "table", "all"]).await?;
    Ok(route_table_addresses(&out, within))
}

/// Scan the host route table for the first unused address in the /16 starting at `base`. This is
/// only a snapshot of the route table, use `reservation::LinkLocalReservations` when the address
/// is going to be claimed.
pub async fn find_free_link_local_ipv4(
    runner: &dyn CommandRunner,
    base: Ipv4Addr,
    range_size: u32,
) -> anyhow::Result<Ipv4Addr> {
    let block = link_local_block(base)?;
    let in_use = host_route_addresses(runner, &block).await?;
    first_free_ipv4(base, range_size, &in_use)
}

/// The /16 the link-local range lives in, the range itself has to fit inside it.
pub fn link_local_block(base: Ipv4Addr) -> anyhow::Result<Ipv4Network> {
    let block = Ipv4Network::new(base, 16)?;
    Ok(Ipv4Network::new(block.network(), 16)?)
}
