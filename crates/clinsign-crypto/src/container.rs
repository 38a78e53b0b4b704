//! PKCS#12 container parsing
//!
//! A container is opaque bytes plus a password. Parsing yields the leaf
//! certificate, its chain, the private key and the metadata the vault
//! stores in queryable columns (fingerprint, subject, validity window).
//! Expiry is reported here but enforced by callers, since "expired at
//! upload" and "expired at signing time" are different checks.

use chrono::{DateTime, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::{X509, X509NameRef};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Fully parsed PKCS#12 container.
///
/// Holds live key material; instances must stay scoped to the single
/// operation that needed them and must never be logged or persisted.
pub struct ParsedCertificate {
    /// End-entity certificate.
    pub certificate: X509,
    /// Issuer chain as carried by the container, end-entity's issuer first.
    pub chain: Vec<X509>,
    pub private_key: PKey<Private>,
    /// Lowercase hex SHA-256 over the leaf's DER encoding.
    pub fingerprint: String,
    /// Rendered X.500 subject, e.g. `CN=FULANO DE TAL:12345678901, O=ICP-Brasil`.
    pub subject: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// Parse a PKCS#12 blob with its password.
pub fn parse(bytes: &[u8], password: &str) -> Result<ParsedCertificate, CryptoError> {
    let container =
        Pkcs12::from_der(bytes).map_err(|e| CryptoError::InvalidContainer(e.to_string()))?;

    let parsed = container.parse2(password).map_err(|e| {
        if is_mac_failure(&e) {
            CryptoError::AuthenticationFailed
        } else {
            CryptoError::InvalidContainer(e.to_string())
        }
    })?;

    let certificate = parsed
        .cert
        .ok_or_else(|| CryptoError::InvalidContainer("no certificate entry".to_string()))?;
    let private_key = parsed.pkey.ok_or(CryptoError::NoPrivateKey)?;
    let chain: Vec<X509> = parsed
        .ca
        .map(|stack| stack.iter().map(|c| c.to_owned()).collect())
        .unwrap_or_default();

    let der = certificate.to_der()?;
    let fingerprint = hex::encode(Sha256::digest(&der));
    let subject = render_name(certificate.subject_name());
    let not_before = parse_asn1_time(&certificate.not_before().to_string())?;
    let not_after = parse_asn1_time(&certificate.not_after().to_string())?;

    Ok(ParsedCertificate {
        certificate,
        chain,
        private_key,
        fingerprint,
        subject,
        not_before,
        not_after,
    })
}

/// A wrong container password surfaces as a MAC verification failure in
/// the underlying library; everything else is a malformed container.
fn is_mac_failure(stack: &openssl::error::ErrorStack) -> bool {
    stack.errors().iter().any(|e| {
        e.reason()
            .map(|r| {
                let r = r.to_ascii_lowercase();
                r.contains("mac") || r.contains("password")
            })
            .unwrap_or(false)
    })
}

fn render_name(name: &X509NameRef) -> String {
    let mut parts = Vec::new();
    for entry in name.entries() {
        let key = entry
            .object()
            .nid()
            .short_name()
            .unwrap_or("UNDEF")
            .to_string();
        if let Ok(value) = entry.data().as_utf8() {
            parts.push(format!("{}={}", key, value));
        }
    }
    parts.join(", ")
}

/// ASN.1 times render as e.g. `Jul 15 12:00:00 2027 GMT`.
fn parse_asn1_time(raw: &str) -> Result<DateTime<Utc>, CryptoError> {
    let naive = NaiveDateTime::parse_from_str(raw, "%b %e %H:%M:%S %Y GMT")
        .map_err(|e| CryptoError::InvalidContainer(format!("bad validity time {raw:?}: {e}")))?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

/// Brazilian tax id extracted from a certificate subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "number", rename_all = "snake_case")]
pub enum TaxId {
    /// 11-digit natural-person id.
    Cpf(String),
    /// 14-digit legal-entity id.
    Cnpj(String),
}

lazy_static! {
    static ref CNPJ_RUN: Regex = Regex::new(r"\d{14}").unwrap();
    static ref CPF_RUN: Regex = Regex::new(r"\d{11}").unwrap();
}

/// Scan a rendered subject DN for an ICP-Brasil style embedded tax id
/// (commonly `CN=NAME:12345678901`). Absence is not an error; the field
/// is informational metadata.
pub fn extract_tax_id(subject: &str) -> Option<TaxId> {
    if let Some(m) = CNPJ_RUN.find(subject) {
        return Some(TaxId::Cnpj(m.as_str().to_string()));
    }
    CPF_RUN
        .find(subject)
        .map(|m| TaxId::Cpf(m.as_str().to_string()))
}

/// Display name of the certificate holder: the CN value with any
/// `:tax-id` suffix stripped. Falls back to the whole subject when no
/// CN attribute is present.
pub fn holder_name(subject: &str) -> String {
    for part in subject.split(", ") {
        if let Some(cn) = part.strip_prefix("CN=") {
            return cn.split(':').next().unwrap_or(cn).trim().to_string();
        }
    }
    subject.to_string()
}
