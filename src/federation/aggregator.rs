/// Single-writer merge of local and remote results
///
/// Owned by the request handler for the lifetime of one query. Nothing else
/// holds a reference to the response maps, so merging needs no locking.
use crate::{
    address::EmailAddress,
    federation::{dispatcher::PeerReply, local::LocalResolution, ResolutionResponse},
    mx::GroupedAddresses,
};
use tracing::{debug, warn};

pub struct ResponseAggregator<'a> {
    own_host: String,
    grouped: &'a GroupedAddresses,
    response: ResolutionResponse,
}

impl<'a> ResponseAggregator<'a> {
    pub fn new(own_host: impl Into<String>, grouped: &'a GroupedAddresses) -> Self {
        Self {
            own_host: own_host.into(),
            grouped,
            response: ResolutionResponse::default(),
        }
    }

    /// Merge this server's own answers
    pub fn merge_local(&mut self, local: LocalResolution) {
        if let Some(notary) = local.notary {
            let key = EmailAddress::notary_for(&self.own_host).to_string_no_hash();
            self.response.name_resolution.insert(key, notary);
        }

        for (key, result) in local.public_keys {
            self.response.public_keys.insert(key, result);
        }
    }

    /// Merge a completed dispatch task. Failed hosts contribute nothing.
    pub fn merge_reply(&mut self, reply: PeerReply) -> usize {
        match reply.result {
            Ok(remote) => self.merge_remote(&reply.host, remote),
            Err(e) => {
                warn!("Key query to {} failed: {}", reply.host, e);
                0
            }
        }
    }

    /// Merge one peer's response, keeping only addresses that peer is
    /// authoritative for and was asked about. Returns the number of key
    /// lookups accepted.
    pub fn merge_remote(&mut self, host: &str, mut remote: ResolutionResponse) -> usize {
        let notary_key = EmailAddress::notary_for(host).to_string_no_hash();

        if let Some(notary) = remote.name_resolution.remove(&notary_key) {
            self.response.name_resolution.insert(notary_key, notary);
        }
        for key in remote.name_resolution.keys() {
            warn!("Ignoring notary entry {} from {}", key, host);
        }

        let mut accepted = 0;

        for (key, result) in remote.public_keys {
            let addr = match EmailAddress::parse(&key) {
                Ok(addr) => addr,
                Err(_) => {
                    warn!("Ignoring unparsable address {:?} from {}", key, host);
                    continue;
                }
            };

            if !self.grouped.is_owned_by(&addr.host, host) {
                warn!(
                    "Trust boundary violation: {} returned a key for {}, which it does not serve",
                    host, key
                );
                continue;
            }

            if !self.grouped.was_requested_from(host, &addr) {
                warn!("Ignoring unrequested key for {} from {}", key, host);
                continue;
            }

            self.response.public_keys.insert(addr.to_string_no_hash(), result);
            accepted += 1;
        }

        debug!("Accepted {} key lookup(s) from {}", accepted, host);

        accepted
    }

    /// Current view of the aggregate
    pub fn response(&self) -> &ResolutionResponse {
        &self.response
    }

    pub fn finish(self) -> ResolutionResponse {
        self.response
    }
}
