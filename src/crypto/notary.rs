/// Notary attestation signing
///
/// A notary statement binds `name@host` to a key-hash at a point in time.
/// Statements are signed with secp256k1 ECDSA (RFC 6979 deterministic nonces,
/// SHA-256 digest) so that clients can cross-check one server's claims
/// against another's.

use crate::{
    address::EmailAddress,
    error::{ServerError, ServerResult},
    federation::NotaryAttestation,
};
use k256::{
    ecdsa::{
        signature::{Signer, Verifier},
        Signature, SigningKey, VerifyingKey,
    },
    SecretKey,
};

/// The exact bytes covered by a notary signature.
///
/// An empty hash is a valid statement: "no such user here at this time".
pub fn notary_message(name: &str, host: &str, pub_hash: &str, timestamp: i64) -> String {
    format!("{}@{}={}@{}", name, host, pub_hash, timestamp)
}

/// Signs notary statements with this server's private notary key
pub struct NotarySigner {
    signing_key: SigningKey,
}

impl NotarySigner {
    /// Create a new signer from a private key (32 bytes)
    pub fn new(private_key: &[u8]) -> ServerResult<Self> {
        if private_key.len() != 32 {
            return Err(ServerError::Validation(
                "Private key must be exactly 32 bytes".to_string(),
            ));
        }

        let secret_key = SecretKey::from_slice(private_key)
            .map_err(|e| ServerError::Crypto(format!("Invalid private key: {}", e)))?;

        Ok(Self {
            signing_key: SigningKey::from(secret_key),
        })
    }

    /// Create a signer from hex-encoded private key
    pub fn from_hex(hex_key: &str) -> ServerResult<Self> {
        let key_bytes = hex::decode(hex_key.trim())
            .map_err(|e| ServerError::Validation(format!("Invalid hex private key: {}", e)))?;

        Self::new(&key_bytes)
    }

    /// Fresh random key, for development setups
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Sign `(name, host, pub_hash, timestamp)`, returning a hex signature
    pub fn sign(&self, name: &str, host: &str, pub_hash: &str, timestamp: i64) -> String {
        let message = notary_message(name, host, pub_hash, timestamp);
        let signature: Signature = self.signing_key.sign(message.as_bytes());
        hex::encode(signature.to_bytes())
    }

    /// Produce a signed attestation that `address` maps to `pub_hash`
    pub fn attest(
        &self,
        address: &EmailAddress,
        pub_hash: Option<String>,
        timestamp: i64,
    ) -> NotaryAttestation {
        let signature = self.sign(
            &address.name,
            &address.host,
            pub_hash.as_deref().unwrap_or(""),
            timestamp,
        );

        NotaryAttestation {
            pub_hash,
            timestamp,
            signature,
        }
    }

    /// Get the public key in compressed form (33 bytes, hex-encoded)
    pub fn public_key_hex(&self) -> String {
        let public_key = self.signing_key.verifying_key().to_encoded_point(true);
        hex::encode(public_key.as_bytes())
    }
}

/// Check a notary signature against a hex-encoded SEC1 public key
pub fn verify_signature(
    public_key_hex: &str,
    name: &str,
    host: &str,
    pub_hash: &str,
    timestamp: i64,
    signature_hex: &str,
) -> ServerResult<bool> {
    let key_bytes = hex::decode(public_key_hex)
        .map_err(|e| ServerError::Validation(format!("Invalid hex public key: {}", e)))?;
    let verifying_key = VerifyingKey::from_sec1_bytes(&key_bytes)
        .map_err(|e| ServerError::Crypto(format!("Invalid public key: {}", e)))?;

    let sig_bytes = hex::decode(signature_hex)
        .map_err(|e| ServerError::Validation(format!("Invalid hex signature: {}", e)))?;
    let signature = match Signature::from_slice(&sig_bytes) {
        Ok(sig) => sig,
        Err(_) => return Ok(false),
    };

    let message = notary_message(name, host, pub_hash, timestamp);
    Ok(verifying_key.verify(message.as_bytes(), &signature).is_ok())
}

/// Check an attestation for `address` against a notary public key
pub fn verify_attestation(
    public_key_hex: &str,
    address: &EmailAddress,
    attestation: &NotaryAttestation,
) -> ServerResult<bool> {
    verify_signature(
        public_key_hex,
        &address.name,
        &address.host,
        attestation.pub_hash.as_deref().unwrap_or(""),
        attestation.timestamp,
        &attestation.signature,
    )
}
