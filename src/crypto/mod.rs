/// Cryptography module for notary attestations
///
/// Handles secp256k1 signing and verification of name resolution statements

pub mod notary;

pub use notary::{notary_message, verify_attestation, verify_signature, NotarySigner};
