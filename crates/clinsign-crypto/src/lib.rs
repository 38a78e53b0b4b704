//! Cryptographic primitives for the certificate vault
//!
//! This crate handles the binary side of the signing subsystem:
//! - parsing password-protected PKCS#12 containers into usable key material
//! - envelope encryption for certificate payloads at rest
//! - one-way hashing of certificate passwords
//! - detached RSA-SHA256 signing and verification

pub mod container;
pub mod envelope;
pub mod error;
pub mod password;
pub mod signer;

pub use container::{extract_tax_id, holder_name, parse, ParsedCertificate, TaxId};
pub use envelope::MasterKey;
pub use error::CryptoError;
pub use password::{hash_password, verify_password};
pub use signer::{sign_detached, verify_detached};
