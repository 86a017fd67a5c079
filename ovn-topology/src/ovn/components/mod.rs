use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use anyhow::{bail, Context};
use ipnetwork::IpNetwork;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use crate::error::ProvisionError;

pub mod chassis;
pub mod ovs;
pub mod logical_switch;
pub mod logical_router;
pub mod logical_router_port;
pub mod logical_switch_port;

/// Helper macro to convert Vec<&str> to Vec<String> to avoid having to keep writing `.to_string()`
#[macro_export]
macro_rules! vec_of_strings {
    ($($x:expr),*) => (vec![$($x.to_string()),*]);
}

/// Struct to represent mac addresses, parsing validates the string to make sure it is a valid 48
/// bit mac address. Serialises as the usual colon separated lowercase hex.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Eq, PartialEq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress {
    octets: [u8; 6],
}

impl MacAddress {
    /// Locally administered prefix used for every generated address, the same one LXD uses.
    pub const GENERATED_PREFIX: [u8; 3] = [0x00, 0x16, 0x3e];

    pub fn new(
        address: &str,
    ) -> anyhow::Result<Self> {
        let split: Vec<_> = address.split(':').collect();
        // make sure the right number of colons
        if split.len() != 6 {
            bail!(ProvisionError::validation(format!("mac address not 48 bit format {address}")));
        }
        let mut octets = [0u8; 6];
        for (i, octet) in split.iter().enumerate() {
            if octet.len() != 2 {
                bail!(ProvisionError::validation(format!("octet {octet} in mac {address} is not correct")));
            }
            octets[i] = u8::from_str_radix(octet, 16)
                .map_err(|_| ProvisionError::validation(format!("octet {octet} in mac {address} is not hex")))?;
        }
        if octets == [0u8; 6] {
            bail!(ProvisionError::validation("cant have a mac address of 00:00:00:00:00:00"));
        }
        Ok(Self { octets })
    }

    /// Generate a mac address with the `GENERATED_PREFIX` and three octets from the operating
    /// system's secure random source. If the random source cannot be read this fails rather than
    /// falling back to something predictable.
    pub fn random() -> anyhow::Result<Self> {
        let mut tail = [0u8; 3];
        OsRng.try_fill_bytes(&mut tail)
            .with_context(|| "reading secure random source for mac address")?;
        let p = Self::GENERATED_PREFIX;
        Ok(Self { octets: [p[0], p[1], p[2], tail[0], tail[1], tail[2]] })
    }

    pub fn octets(&self) -> [u8; 6] {
        self.octets
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.octets;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", o[0], o[1], o[2], o[3], o[4], o[5])
    }
}

impl FromStr for MacAddress {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for MacAddress {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<MacAddress> for String {
    fn from(value: MacAddress) -> Self {
        value.to_string()
    }
}

/// Enum to represent the ip address a port or route can have, a plain v4 or v6 address or one with
/// its prefix length. `Subnet` keeps the host part of the address, so `10.0.0.1/24` is
/// the router's address on a /24 rather than the network.
#[derive(Debug, Clone, Deserialize, Serialize, Eq, PartialEq, Hash)]
pub enum OvnIpAddr {
    Ip(IpAddr),
    Subnet {
        ip: IpAddr,
        mask: u8,
    },
}

impl From<IpNetwork> for OvnIpAddr {
    fn from(value: IpNetwork) -> Self {
        OvnIpAddr::Subnet { ip: value.ip(), mask: value.prefix() }
    }
}

impl fmt::Display for OvnIpAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            OvnIpAddr::Ip(ip) => write!(f, "{ip}"),
            OvnIpAddr::Subnet { ip, mask } => write!(f, "{ip}/{mask}"),
        }
    }
}
