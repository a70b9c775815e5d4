//! Single packet-filter rules
//!
//! Both rule kinds validate their chain and every address before they can
//! be rendered, so a malformed snapshot entry can never reach the loader
//! as rule text.

use std::fmt::{self, Display};

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

use crate::error::RuleError;

/// Chains a filter rule may append to
pub const FILTER_CHAINS: &[&str] = &[
    "OUTPUT",
    "INPUT",
    "PREROUTING",
    "POSTROUTING",
    "ssh_whitelist",
    "ec2_whitelist",
];

/// Chains a NAT rule may append to
pub const NAT_CHAINS: &[&str] = &["OUTPUT", "INPUT", "PREROUTING", "POSTROUTING"];

/// An address literal or CIDR is acceptable anywhere a rule matches on one
fn validate_address(address: &str) -> Result<(), RuleError> {
    if address.parse::<Ipv4Addr>().is_ok() || address.parse::<Ipv4Net>().is_ok() {
        Ok(())
    } else {
        Err(RuleError::InvalidAddress(address.to_string()))
    }
}

fn validate_chain(chain: &str, allowed: &[&str]) -> Result<(), RuleError> {
    if allowed.contains(&chain) {
        Ok(())
    } else {
        Err(RuleError::InvalidChain(chain.to_string()))
    }
}

/// An ACCEPT for one source address, optionally constrained to a TCP
/// destination port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    chain: String,
    source: String,
    dest_port: Option<u16>,
}

impl FilterRule {
    pub fn new(chain: &str, source: &str, dest_port: Option<u16>) -> Result<Self, RuleError> {
        validate_chain(chain, FILTER_CHAINS)?;
        validate_address(source)?;
        Ok(Self {
            chain: chain.to_string(),
            source: source.to_string(),
            dest_port,
        })
    }
}

impl Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dest_port {
            Some(port) => writeln!(
                f,
                "-A {} -s {} -p tcp --dport {} -j ACCEPT",
                self.chain, self.source, port
            ),
            None => writeln!(f, "-A {} -s {} -j ACCEPT", self.chain, self.source),
        }
    }
}

/// A DNAT rewriting traffic for one overlay address to the peer's
/// reachable real address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatRule {
    chain: String,
    destination: String,
    target: String,
}

impl NatRule {
    pub fn new(chain: &str, destination: &str, target: &str) -> Result<Self, RuleError> {
        validate_chain(chain, NAT_CHAINS)?;
        validate_address(destination)?;
        validate_address(target)?;
        Ok(Self {
            chain: chain.to_string(),
            destination: destination.to_string(),
            target: target.to_string(),
        })
    }
}

impl Display for NatRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "-A {} -d {} -j DNAT --to-destination {}",
            self.chain, self.destination, self.target
        )
    }
}
