/// Email address parsing for the key resolution protocol
///
/// Addresses travel in two string forms: `name@host#hash` when the client
/// states which key-hash it expects, and `name@host` for name resolution.
/// Lists are delimited by commas and/or whitespace.
use crate::error::{ServerError, ServerResult};
use std::fmt;
use std::str::FromStr;

/// A parsed address, optionally carrying the expected key-hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EmailAddress {
    pub name: String,
    pub host: String,
    pub hash: Option<String>,
}

impl EmailAddress {
    /// Build an address without an expected hash
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            hash: None,
        }
    }

    /// Parse a single address in either string form
    pub fn parse(input: &str) -> ServerResult<Self> {
        let input = input.trim();

        let (local, rest) = input
            .split_once('@')
            .ok_or_else(|| ServerError::Validation(format!("Invalid address '{}': missing '@'", input)))?;

        let (host, hash) = match rest.split_once('#') {
            Some((host, hash)) => (host, Some(hash)),
            None => (rest, None),
        };

        let name = local.to_lowercase();
        let host = host.to_lowercase();

        if name.is_empty() || !name.chars().all(is_name_char) {
            return Err(ServerError::Validation(format!("Invalid name in address '{}'", input)));
        }

        if host.is_empty() || host.starts_with('.') || !host.chars().all(is_host_char) {
            return Err(ServerError::Validation(format!("Invalid host in address '{}'", input)));
        }

        let hash = match hash {
            Some(h) if h.is_empty() || !h.chars().all(|c| c.is_ascii_alphanumeric()) => {
                return Err(ServerError::Validation(format!("Invalid hash in address '{}'", input)));
            }
            Some(h) => Some(h.to_string()),
            None => None,
        };

        Ok(Self { name, host, hash })
    }

    /// `name@host`, dropping any expected hash
    pub fn to_string_no_hash(&self) -> String {
        format!("{}@{}", self.name, self.host)
    }

    /// The notary address that speaks for a given mail host
    pub fn notary_for(host: &str) -> Self {
        Self::new(crate::federation::NOTARY_NAME, host)
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hash {
            Some(hash) => write!(f, "{}@{}#{}", self.name, self.host, hash),
            None => write!(f, "{}@{}", self.name, self.host),
        }
    }
}

impl FromStr for EmailAddress {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+')
}

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-')
}

/// Parse a delimited address list.
///
/// Empty input yields an empty list. Duplicates are dropped, first occurrence wins.
pub fn parse_address_list(input: &str) -> ServerResult<Vec<EmailAddress>> {
    let mut addresses: Vec<EmailAddress> = Vec::new();

    for token in input.split(|c: char| c == ',' || c.is_whitespace()) {
        if token.is_empty() {
            continue;
        }
        let address = EmailAddress::parse(token)?;
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }

    Ok(addresses)
}

/// Serialize an address list back to its comma-delimited wire form
pub fn join_addresses(addresses: &[EmailAddress]) -> String {
    addresses
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_hash() {
        let addr = EmailAddress::parse("Alice@Example.com#abc123").unwrap();
        assert_eq!(addr.name, "alice");
        assert_eq!(addr.host, "example.com");
        assert_eq!(addr.hash.as_deref(), Some("abc123"));
        assert_eq!(addr.to_string(), "alice@example.com#abc123");
        assert_eq!(addr.to_string_no_hash(), "alice@example.com");
    }

    #[test]
    fn test_parse_without_hash() {
        let addr: EmailAddress = "bob@mail.example.org".parse().unwrap();
        assert_eq!(addr.hash, None);
        assert_eq!(addr.to_string(), "bob@mail.example.org");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(EmailAddress::parse("no-at-sign").is_err());
        assert!(EmailAddress::parse("@example.com").is_err());
        assert!(EmailAddress::parse("alice@").is_err());
        assert!(EmailAddress::parse("alice@exa mple.com").is_err());
        assert!(EmailAddress::parse("alice@example.com#").is_err());
        assert!(EmailAddress::parse("alice@example.com#ab/cd").is_err());
        assert!(EmailAddress::parse("alice@bob@example.com").is_err());
    }

    #[test]
    fn test_parse_list_mixed_delimiters() {
        let list = parse_address_list(" alice@a.com, bob@b.com\ncarol@c.com#h1 ,, ").unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[2].hash.as_deref(), Some("h1"));
    }

    #[test]
    fn test_parse_list_empty_and_duplicates() {
        assert!(parse_address_list("").unwrap().is_empty());
        assert!(parse_address_list("  ,  ").unwrap().is_empty());

        let list = parse_address_list("alice@a.com,ALICE@A.COM").unwrap();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_parse_list_fails_on_any_bad_entry() {
        assert!(parse_address_list("alice@a.com,garbage").is_err());
    }

    #[test]
    fn test_join_keeps_hash_suffix() {
        let list = parse_address_list("alice@a.com#h1,bob@b.com").unwrap();
        assert_eq!(join_addresses(&list), "alice@a.com#h1,bob@b.com");
        assert_eq!(join_addresses(&[]), "");
    }

    #[test]
    fn test_notary_address() {
        assert_eq!(EmailAddress::notary_for("mx.example.com").to_string(), "notary@mx.example.com");
    }
}
