/// Federated public-key resolution
///
/// This module implements the server side of the key query protocol:
/// - Wire types shared by clients, this server and federated peers
/// - Concurrent dispatch of per-host queries under one deadline
/// - Single-writer aggregation with trust-boundary enforcement
/// - Gap filling so every requested address is answered

pub mod aggregator;
pub mod dispatcher;
pub mod gaps;
pub mod local;
pub mod query;

pub use aggregator::ResponseAggregator;
pub use dispatcher::{DispatchTask, Dispatcher, HttpPeerTransport, InFlight, PeerReply, PeerTransport};
pub use gaps::fill_gaps;
pub use local::LocalResolver;
pub use query::{KeyQueryService, TrustMode};

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Local part of the address a server's notary answers to
pub const NOTARY_NAME: &str = "notary";

/// Path peers serve the query endpoint on
pub const QUERY_PATH: &str = "/publickeys/query";

/// Error text for addresses no host ever answered for
pub const FAILED_PUBLIC_KEY: &str = "failed to retrieve public key";

/// Form-encoded query, as sent by browsers and by peers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyQuery {
    /// Addresses to resolve by name
    #[serde(default)]
    pub name_addresses: String,
    /// Addresses whose key material is wanted, with expected hash
    #[serde(default)]
    pub hash_addresses: String,
    /// Notaries asked to attest the name resolutions
    #[serde(default)]
    pub notaries: String,
}

/// A signed statement that an address mapped to a key-hash at `timestamp`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotaryAttestation {
    /// `None` (empty on the wire) means "no such user"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pub_hash: Option<String>,
    pub timestamp: i64,
    /// Hex-encoded signature by the responding server's notary key
    pub signature: String,
}

/// One notary's answer: attestations keyed by address, or an error
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotaryResult {
    #[serde(flatten)]
    pub attestations: BTreeMap<String, NotaryAttestation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NotaryResult {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            attestations: BTreeMap::new(),
            error: Some(message.into()),
        }
    }
}

/// Public key lookup outcome for one address
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyLookupResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pub_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pub_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl KeyLookupResult {
    pub fn found(pub_key: Option<String>, pub_hash: String) -> Self {
        Self {
            pub_key,
            pub_hash: Some(pub_hash),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            pub_key: None,
            pub_hash: None,
            error: Some(message.into()),
        }
    }
}

/// The aggregate answer to a key query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionResponse {
    /// Notary address -> that notary's result
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "deserialize_notary_results"
    )]
    pub name_resolution: BTreeMap<String, NotaryResult>,
    /// Address without hash -> key lookup result
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub public_keys: BTreeMap<String, KeyLookupResult>,
}

/// Accept `null` for the whole map and for individual notaries. A `null`
/// notary is treated as absent, so it is gap filled like any silent notary.
fn deserialize_notary_results<'de, D>(deserializer: D) -> Result<BTreeMap<String, NotaryResult>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Option<NotaryResult>>> = Option::deserialize(deserializer)?;

    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(notary, result)| result.map(|r| (notary, r)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_sections_are_omitted() {
        let response = ResolutionResponse::default();
        assert_eq!(serde_json::to_value(&response).unwrap(), json!({}));
    }

    #[test]
    fn test_notary_result_wire_shape() {
        let mut result = NotaryResult::default();
        result.attestations.insert(
            "alice@example.com".to_string(),
            NotaryAttestation {
                pub_hash: Some("abc".to_string()),
                timestamp: 12,
                signature: "00ff".to_string(),
            },
        );

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({"alice@example.com": {"pubHash": "abc", "timestamp": 12, "signature": "00ff"}})
        );

        let failed = serde_json::to_value(NotaryResult::error("boom")).unwrap();
        assert_eq!(failed, json!({"error": "boom"}));
    }

    #[test]
    fn test_parse_peer_response() {
        let body = r#"{
            "nameResolution": {
                "notary@mx.peer.test": {
                    "bob@peer.test": {"pubHash": "h2", "timestamp": 99, "signature": "aa"},
                    "ghost@peer.test": {"timestamp": 99, "signature": "bb"}
                },
                "notary@down.test": {"error": "nope"}
            },
            "publicKeys": {
                "bob@peer.test": {"pubKey": "KEY", "pubHash": "h2"}
            }
        }"#;

        let parsed: ResolutionResponse = serde_json::from_str(body).unwrap();

        let peer = &parsed.name_resolution["notary@mx.peer.test"];
        assert_eq!(peer.error, None);
        assert_eq!(peer.attestations.len(), 2);
        assert_eq!(peer.attestations["ghost@peer.test"].pub_hash, None);

        let down = &parsed.name_resolution["notary@down.test"];
        assert!(down.attestations.is_empty());
        assert_eq!(down.error.as_deref(), Some("nope"));

        assert_eq!(parsed.public_keys["bob@peer.test"].pub_key.as_deref(), Some("KEY"));
    }

    #[test]
    fn test_null_notary_entries_are_absent() {
        let body = r#"{
            "nameResolution": {"notary@mx.peer.test": null},
            "publicKeys": {"bob@peer.test": {"pubKey": "KEY", "pubHash": "h2"}}
        }"#;
        let parsed: ResolutionResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.name_resolution.is_empty());
        assert_eq!(parsed.public_keys["bob@peer.test"].pub_hash.as_deref(), Some("h2"));

        let parsed: ResolutionResponse = serde_json::from_str(r#"{"nameResolution": null}"#).unwrap();
        assert!(parsed.name_resolution.is_empty());
    }

    #[test]
    fn test_key_query_form_fields() {
        let query = KeyQuery {
            name_addresses: "a@x.test".to_string(),
            hash_addresses: String::new(),
            notaries: "notary@x.test".to_string(),
        };
        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(value["nameAddresses"], "a@x.test");
        assert_eq!(value["hashAddresses"], "");
        assert_eq!(value["notaries"], "notary@x.test");
    }
}
