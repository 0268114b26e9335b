use std::net::IpAddr;
use std::str::FromStr;

use policyd_core_types::IpFamily;

use crate::errors::PolicyError;

/// A CIDR block or a single address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressRange {
    network: IpAddr,
    prefix: u8,
}

impl AddressRange {
    pub fn family(&self) -> IpFamily {
        IpFamily::of(&self.network)
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (self.network, addr.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(candidate)) => {
                let mask = mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(candidate) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(candidate)) => {
                let mask = mask_u128(self.prefix);
                u128::from(net) & mask == u128::from(candidate) & mask
            }
            _ => false,
        }
    }
}

fn mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn mask_u128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

impl FromStr for AddressRange {
    type Err = PolicyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let (addr_part, prefix_part) = match raw.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (raw, None),
        };
        let network = addr_part
            .parse::<IpAddr>()
            .map_err(|err| PolicyError::Invalid(format!("address range '{raw}': {err}")))?
            .to_canonical();
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = match prefix_part {
            None => max,
            Some(prefix) => prefix
                .parse::<u8>()
                .ok()
                .filter(|prefix| *prefix <= max)
                .ok_or_else(|| {
                    PolicyError::Invalid(format!("address range '{raw}': bad prefix length"))
                })?,
        };
        Ok(Self { network, prefix })
    }
}

/// Parses every range of a network, checking they belong to `family`.
pub fn parse_ranges(
    family: IpFamily,
    ranges: &[String],
) -> Result<Vec<AddressRange>, PolicyError> {
    ranges
        .iter()
        .map(|raw| {
            let range: AddressRange = raw.parse()?;
            if range.family() != family {
                return Err(PolicyError::Invalid(format!(
                    "address range '{raw}' is not {family}"
                )));
            }
            Ok(range)
        })
        .collect()
}
