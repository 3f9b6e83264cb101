//! Remote address filtering with exact, trailing-wildcard and CIDR patterns.

use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::error::{ip_error, Error, IpErrorKind};

/// One configured address pattern.
///
/// - `192.168.1.100` matches that address only (IPv4 or IPv6)
/// - `192.168.1.*` / `10.*` match every IPv4 address starting with the fixed octets
/// - `10.0.0.0/24` matches the IPv4 network under the prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpPattern {
    Exact(IpAddr),
    Wildcard { octets: Vec<u8> },
    Cidr { network: u32, prefix_len: u8 },
}

fn prefix_mask(prefix_len: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0)
}

impl FromStr for IpPattern {
    type Err = Error;

    fn from_str(pattern: &str) -> Result<Self, Self::Err> {
        let pattern = pattern.trim();
        let invalid = || ip_error(IpErrorKind::InvalidPattern, &format!("Invalid IP pattern: {pattern}"));

        if let Some((address, prefix_len)) = pattern.split_once('/') {
            let address = address.parse::<Ipv4Addr>().map_err(|_| invalid())?;
            let prefix_len = prefix_len.parse::<u8>().map_err(|_| invalid())?;
            if prefix_len > 32 {
                return Err(invalid());
            }
            return Ok(IpPattern::Cidr {
                network: u32::from(address) & prefix_mask(prefix_len),
                prefix_len,
            });
        }

        if pattern.contains('*') {
            let parts: Vec<&str> = pattern.split('.').collect();
            if parts.len() > 4 {
                return Err(invalid());
            }
            let fixed = parts.iter().take_while(|part| **part != "*").count();
            if parts[fixed..].iter().any(|part| *part != "*") {
                return Err(invalid());
            }
            let octets = parts[..fixed]
                .iter()
                .map(|part| part.parse::<u8>().map_err(|_| invalid()))
                .collect::<Result<Vec<u8>, Error>>()?;
            return Ok(IpPattern::Wildcard { octets });
        }

        pattern.parse::<IpAddr>().map(IpPattern::Exact).map_err(|_| invalid())
    }
}

impl IpPattern {
    pub fn matches(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        match self {
            IpPattern::Exact(address) => address.to_canonical() == ip,
            IpPattern::Wildcard { octets } => match ip {
                IpAddr::V4(v4) => v4.octets().starts_with(octets),
                IpAddr::V6(_) => false,
            },
            IpPattern::Cidr {
                network,
                prefix_len,
            } => match ip {
                IpAddr::V4(v4) => u32::from(v4) & prefix_mask(*prefix_len) == *network,
                IpAddr::V6(_) => false,
            },
        }
    }
}

/// Blacklist-then-whitelist address gate.
#[derive(Debug, Clone, Default)]
pub struct IpFilter {
    whitelist: Vec<IpPattern>,
    blacklist: Vec<IpPattern>,
}

impl IpFilter {
    pub fn new(whitelist: Vec<IpPattern>, blacklist: Vec<IpPattern>) -> Self {
        Self {
            whitelist,
            blacklist,
        }
    }

    /// Build a filter from configured pattern strings. Blank entries are ignored.
    pub fn from_patterns(whitelist: &[String], blacklist: &[String]) -> Result<Self, Error> {
        let parse = |patterns: &[String]| {
            patterns
                .iter()
                .filter(|pattern| !pattern.trim().is_empty())
                .map(|pattern| pattern.parse::<IpPattern>())
                .collect::<Result<Vec<_>, Error>>()
        };
        Ok(Self::new(parse(whitelist)?, parse(blacklist)?))
    }

    /// Any blacklist match rejects. A non-empty whitelist must then match.
    pub fn check(&self, ip: IpAddr) -> Result<(), Error> {
        if self.blacklist.iter().any(|pattern| pattern.matches(ip)) {
            return Err(ip_error(
                IpErrorKind::Blacklisted,
                &format!("Address {ip} is blacklisted"),
            ));
        }

        if self.whitelist.is_empty() || self.whitelist.iter().any(|pattern| pattern.matches(ip)) {
            Ok(())
        } else {
            Err(ip_error(
                IpErrorKind::NotWhitelisted,
                &format!("Address {ip} is not whitelisted"),
            ))
        }
    }
}
