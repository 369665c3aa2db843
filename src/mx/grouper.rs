/// Groups request addresses by the MX host that owns them
use crate::{
    address::EmailAddress,
    error::{ServerError, ServerResult},
    mx::MxResolver,
};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::warn;

/// Addresses bound for one MX host
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressGroup {
    /// To be resolved by name (and attested by the host's notary)
    pub name_addresses: Vec<EmailAddress>,
    /// Key material requested by expected hash
    pub hash_addresses: Vec<EmailAddress>,
}

impl AddressGroup {
    pub fn is_empty(&self) -> bool {
        self.name_addresses.is_empty() && self.hash_addresses.is_empty()
    }

    /// Every address in the group, names first
    pub fn all(&self) -> impl Iterator<Item = &EmailAddress> {
        self.name_addresses.iter().chain(self.hash_addresses.iter())
    }
}

/// A request's addresses after MX resolution
#[derive(Debug, Clone, Default)]
pub struct GroupedAddresses {
    /// MX host -> addresses it owns
    pub groups: BTreeMap<String, AddressGroup>,
    /// Notaries asked to vouch for name resolutions
    pub notaries: Vec<EmailAddress>,
    /// Address domain -> resolved MX host
    pub domain_hosts: HashMap<String, String>,
}

impl GroupedAddresses {
    /// Whether `mx_host` is authoritative for addresses on `domain`
    pub fn is_owned_by(&self, domain: &str, mx_host: &str) -> bool {
        domain == mx_host
            || self
                .domain_hosts
                .get(domain)
                .map(|owner| owner == mx_host)
                .unwrap_or(false)
    }

    /// Whether `addr` was among the addresses grouped under `mx_host`
    pub fn was_requested_from(&self, mx_host: &str, addr: &EmailAddress) -> bool {
        self.groups
            .get(mx_host)
            .map(|group| {
                group
                    .all()
                    .any(|a| a.name == addr.name && a.host == addr.host)
            })
            .unwrap_or(false)
    }

    /// Hosts named by the notary list. Notary addresses name the mail host directly.
    pub fn notary_hosts(&self) -> BTreeSet<String> {
        self.notaries.iter().map(|n| n.host.clone()).collect()
    }

    /// Every MX host this request touches
    pub fn hosts(&self) -> BTreeSet<String> {
        let mut hosts: BTreeSet<String> = self.groups.keys().cloned().collect();
        hosts.extend(self.notary_hosts());
        hosts
    }
}

/// Resolve every domain once and group the addresses by MX host.
///
/// If any domain cannot be resolved the whole grouping fails, naming all of
/// the unresolvable domains. Nothing is partially processed.
pub async fn group_by_mx_host(
    resolver: &dyn MxResolver,
    name_addresses: Vec<EmailAddress>,
    hash_addresses: Vec<EmailAddress>,
    notaries: Vec<EmailAddress>,
) -> ServerResult<GroupedAddresses> {
    let domains: BTreeSet<String> = name_addresses
        .iter()
        .chain(hash_addresses.iter())
        .map(|a| a.host.clone())
        .collect();

    // Resolve all domains concurrently
    let lookups = join_all(domains.iter().map(|domain| async move {
        (domain.clone(), resolver.resolve_mx_host(domain).await)
    }))
    .await;

    let mut domain_hosts = HashMap::new();
    let mut failed = Vec::new();

    for (domain, result) in lookups {
        match result {
            Ok(mx_host) => {
                domain_hosts.insert(domain, mx_host);
            }
            Err(e) => {
                warn!("Could not resolve MX host for {}: {}", domain, e);
                failed.push(domain);
            }
        }
    }

    if !failed.is_empty() {
        return Err(ServerError::NoMxRecord(failed));
    }

    let mut groups: BTreeMap<String, AddressGroup> = BTreeMap::new();

    for addr in name_addresses {
        let host = domain_hosts[&addr.host].clone();
        groups.entry(host).or_default().name_addresses.push(addr);
    }
    for addr in hash_addresses {
        let host = domain_hosts[&addr.host].clone();
        groups.entry(host).or_default().hash_addresses.push(addr);
    }

    Ok(GroupedAddresses {
        groups,
        notaries,
        domain_hosts,
    })
}
