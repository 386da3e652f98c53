//! Address allow-list applied to resolved addresses.

use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

use crate::error::{DirectorError, DirectorResult};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    net: IpNet,
    allow: bool,
}

/// Ordered network rules. First match wins; no match rejects.
///
/// Entries are CIDR networks or bare addresses, optionally prefixed with `!`
/// to reject a range carved out of a broader allowed one:
///
/// ```text
/// ["!10.1.0.0/16", "10.0.0.0/8", "2001:db8::/32"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    rules: Vec<Rule>,
}

impl AllowList {
    pub fn new<S: AsRef<str>>(entries: &[S]) -> DirectorResult<Self> {
        let rules = entries
            .iter()
            .map(|e| parse_rule(e.as_ref()))
            .collect::<DirectorResult<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn matches(&self, ip: IpAddr) -> bool {
        self.rules
            .iter()
            .find(|r| r.net.contains(&ip))
            .is_some_and(|r| r.allow)
    }
}

impl FromStr for AllowList {
    type Err = DirectorError;

    /// Comma separated entries.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let entries: Vec<&str> = s
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .collect();
        Self::new(&entries)
    }
}

fn parse_rule(entry: &str) -> DirectorResult<Rule> {
    let entry = entry.trim();
    let (allow, body) = match entry.strip_prefix('!') {
        Some(rest) => (false, rest.trim()),
        None => (true, entry),
    };
    let net = match body.parse::<IpNet>() {
        Ok(net) => net,
        Err(_) => body
            .parse::<IpAddr>()
            .ok()
            .and_then(|ip| IpNet::new(ip, if ip.is_ipv4() { 32 } else { 128 }).ok())
            .ok_or_else(|| DirectorError::InvalidNetwork(entry.to_string()))?,
    };
    Ok(Rule { net, allow })
}
