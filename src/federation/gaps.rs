/// Gap filling: every requested address gets an answer
use crate::{
    federation::{KeyLookupResult, NotaryResult, ResolutionResponse, FAILED_PUBLIC_KEY},
    mx::GroupedAddresses,
};
use tracing::debug;

/// Insert a failure entry for every remote address and every notary that
/// nobody answered for. Returns how many entries were filled.
pub fn fill_gaps(response: &mut ResolutionResponse, grouped: &GroupedAddresses, own_host: &str) -> usize {
    let mut filled = 0;

    for (host, group) in &grouped.groups {
        if host == own_host {
            continue;
        }

        for addr in group.all() {
            response
                .public_keys
                .entry(addr.to_string_no_hash())
                .or_insert_with(|| {
                    filled += 1;
                    KeyLookupResult::error(FAILED_PUBLIC_KEY)
                });
        }
    }

    for notary in &grouped.notaries {
        let key = notary.to_string_no_hash();
        if !response.name_resolution.contains_key(&key) {
            let error = NotaryResult::error(format!("failed to retrieve notary response from {}", key));
            response.name_resolution.insert(key, error);
            filled += 1;
        }
    }

    if filled > 0 {
        debug!("Filled {} unanswered entries", filled);
    }

    filled
}
