//! Detached RSA-SHA256 signatures
//!
//! Signs the canonical byte representation of a document with RSA
//! PKCS#1 v1.5 over SHA-256. The signature travels separately from the
//! document (stored base64 in the document row); verification needs
//! only the signer's public certificate.

use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::sign::{Signer, Verifier};
use openssl::x509::X509;

use crate::error::CryptoError;

/// Produce a detached signature over `payload`.
pub fn sign_detached(private_key: &PKey<Private>, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut signer = Signer::new(MessageDigest::sha256(), private_key)?;
    signer.update(payload)?;
    Ok(signer.sign_to_vec()?)
}

/// Verify a detached signature against the certificate's public key.
/// Any failure (bad key type, malformed signature, mismatch) reads as
/// an invalid signature.
pub fn verify_detached(certificate: &X509, payload: &[u8], signature: &[u8]) -> bool {
    let Ok(public_key) = certificate.public_key() else {
        return false;
    };
    let Ok(mut verifier) = Verifier::new(MessageDigest::sha256(), &public_key) else {
        return false;
    };
    if verifier.update(payload).is_err() {
        return false;
    }
    verifier.verify(signature).unwrap_or(false)
}
