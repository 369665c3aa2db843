/// Key query orchestration
///
/// Parse, group by MX host, check the caller's trust mode, fan out to peers,
/// answer for our own users, merge, and fill the gaps. The returned
/// [`InFlight`] carries any replies still owed after the deadline; the caller
/// releases it once the response has been written.
use crate::{
    address::{join_addresses, parse_address_list, EmailAddress},
    error::{ServerError, ServerResult},
    federation::{
        aggregator::ResponseAggregator,
        dispatcher::{DispatchTask, Dispatcher, InFlight},
        gaps::fill_gaps,
        local::LocalResolver,
        KeyQuery, ResolutionResponse,
    },
    mx::{group_by_mx_host, GroupedAddresses, MxResolver},
};
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

/// Who is asking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustMode {
    /// Signed-in browser client: any destination is fine
    Client,
    /// Unauthenticated federated peer: may only ask about our own users
    Peer,
}

#[derive(Clone)]
pub struct KeyQueryService {
    local: LocalResolver,
    mx: Arc<dyn MxResolver>,
    dispatcher: Dispatcher,
    own_host: String,
}

impl KeyQueryService {
    pub fn new(
        local: LocalResolver,
        mx: Arc<dyn MxResolver>,
        dispatcher: Dispatcher,
        own_host: impl Into<String>,
    ) -> Self {
        Self {
            local,
            mx,
            dispatcher,
            own_host: own_host.into(),
        }
    }

    pub fn own_host(&self) -> &str {
        &self.own_host
    }

    /// Answer a key query.
    ///
    /// Per-address failures are reported inside the response. Only malformed
    /// input, unresolvable domains, a misbehaving peer or a local storage
    /// failure produce an `Err`.
    pub async fn resolve(
        &self,
        query: &KeyQuery,
        mode: TrustMode,
    ) -> ServerResult<(ResolutionResponse, InFlight)> {
        let query_id = Uuid::new_v4();
        let span = info_span!("key_query", %query_id, ?mode);

        self.resolve_in_span(query, mode).instrument(span).await
    }

    async fn resolve_in_span(
        &self,
        query: &KeyQuery,
        mode: TrustMode,
    ) -> ServerResult<(ResolutionResponse, InFlight)> {
        let name_addresses = parse_address_list(&query.name_addresses)?;
        let hash_addresses = parse_address_list(&query.hash_addresses)?;
        let notaries = parse_address_list(&query.notaries)?;

        let grouped = group_by_mx_host(self.mx.as_ref(), name_addresses, hash_addresses, notaries).await?;

        if mode == TrustMode::Peer {
            self.check_peer_request(&grouped)?;
        }

        // Start every remote query before doing any local work. Peers only get
        // answers about our own users; their foreign addresses are gap filled.
        let tasks = match mode {
            TrustMode::Client => self.plan_dispatch(&grouped),
            TrustMode::Peer => Vec::new(),
        };
        info!("Dispatching key queries to {} peer(s)", tasks.len());
        let mut in_flight = self.dispatcher.dispatch(tasks);

        let mut aggregator = ResponseAggregator::new(self.own_host.clone(), &grouped);

        let own_group = grouped.groups.get(&self.own_host).cloned().unwrap_or_default();
        let attest = !own_group.name_addresses.is_empty()
            || grouped.notaries.iter().any(|n| n.host == self.own_host);

        if attest || !own_group.is_empty() {
            let timestamp = chrono::Utc::now().timestamp();
            match self.local.resolve(&own_group, attest, timestamp).await {
                Ok(local) => aggregator.merge_local(local),
                Err(e) => {
                    in_flight.release();
                    return Err(e);
                }
            }
        }

        // Merge peers in arrival order until all answer or the deadline passes
        while let Some(reply) = in_flight.next().await {
            aggregator.merge_reply(reply);
        }

        let mut response = aggregator.finish();
        fill_gaps(&mut response, &grouped, &self.own_host);

        debug!(
            "Key query answered with {} key(s), {} notary result(s), {} peer(s) outstanding",
            response.public_keys.len(),
            response.name_resolution.len(),
            in_flight.outstanding()
        );

        Ok((response, in_flight))
    }

    /// Federated peers may only ask for our own users and our own notary
    fn check_peer_request(&self, grouped: &GroupedAddresses) -> ServerResult<()> {
        for (host, group) in &grouped.groups {
            if !group.hash_addresses.is_empty() && *host != self.own_host {
                return Err(ServerError::ProtocolViolation(format!(
                    "Invalid host for server-to-server key query. Expected {}, got {}",
                    self.own_host, host
                )));
            }
        }

        if grouped.notaries.len() > 1 || grouped.notaries.iter().any(|n| n.host != self.own_host) {
            return Err(ServerError::ProtocolViolation(format!(
                "Expected 0 or 1 notary address @{}, got [{}]",
                self.own_host,
                join_addresses(&grouped.notaries)
            )));
        }

        Ok(())
    }

    /// One query per remote host with that host's addresses and its own notary
    fn plan_dispatch(&self, grouped: &GroupedAddresses) -> Vec<DispatchTask> {
        grouped
            .hosts()
            .into_iter()
            .filter(|host| *host != self.own_host)
            .map(|host| {
                let group = grouped.groups.get(&host).cloned().unwrap_or_default();
                let query = KeyQuery {
                    name_addresses: join_addresses(&group.name_addresses),
                    hash_addresses: join_addresses(&group.hash_addresses),
                    notaries: EmailAddress::notary_for(&host).to_string(),
                };
                DispatchTask { host, query }
            })
            .collect()
    }
}
