//! Certificate vault and clinical document signing
//!
//! The service layer an HTTP frontend would mount:
//! - [`Vault`] keeps PKCS#12 certificates sealed at rest and exposes
//!   metadata only.
//! - [`Documents`] owns the Draft → Signed lifecycle of prescriptions
//!   and medical certificates.
//! - [`Engine`] signs: detached over arbitrary bytes, server-side over
//!   documents, client-asserted with verification, and CAdES-embedded
//!   into PDFs.
//! - [`Ledger`] answers unauthenticated hash lookups for third-party
//!   verification.

pub mod document;
pub mod error;
pub mod ledger;
pub mod models;
pub mod signing;
pub mod store;
pub mod vault;

pub use document::Documents;
pub use error::{Error, Result};
pub use ledger::{canonical_bytes, compute_hash, Ledger};
pub use models::{
    ContentItem, DocumentKind, HashValidation, SignableDocument, SignatureOrigin,
    SignatureRecord, StoredCertificate,
};
pub use signing::Engine;
pub use store::Store;
pub use vault::Vault;

pub use clinsign_crypto::{MasterKey, TaxId};
pub use clinsign_pdf::SignatureOptions;
