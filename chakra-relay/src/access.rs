//! Publishing-source access control

use chakra_core::HostPolicy;
use std::collections::HashSet;
use std::net::IpAddr;

/// Source addresses authorized to publish RTP into a stream
#[derive(Debug, Clone)]
pub struct AllowList {
    policy: HostPolicy,
    hosts: HashSet<IpAddr>,
}

impl AllowList {
    pub fn new(policy: HostPolicy, hosts: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            policy,
            hosts: hosts.into_iter().collect(),
        }
    }

    /// Exact-match check of a datagram's source address
    #[must_use]
    pub fn is_allowed(&self, source: IpAddr) -> bool {
        match self.policy {
            HostPolicy::Disabled => true,
            HostPolicy::Permissive if self.hosts.is_empty() => true,
            HostPolicy::Permissive | HostPolicy::Strict => self.hosts.contains(&source),
        }
    }

    #[must_use]
    pub fn hosts(&self) -> Vec<IpAddr> {
        let mut hosts: Vec<_> = self.hosts.iter().copied().collect();
        hosts.sort();
        hosts
    }

    #[must_use]
    pub const fn policy(&self) -> HostPolicy {
        self.policy
    }
}
