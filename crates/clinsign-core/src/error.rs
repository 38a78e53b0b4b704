//! Error taxonomy for the vault and signing services

use clinsign_crypto::CryptoError;
use clinsign_pdf::PdfError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Certificate is expired")]
    CertificateExpired,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Resource belongs to another owner")]
    Forbidden,

    #[error("Document is already signed")]
    AlreadySigned,

    #[error("Document content changed while the signature was being produced")]
    ContentChanged,

    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Pdf(#[from] PdfError),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True for the failures a caller should present as a credential
    /// problem rather than a server fault.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Crypto(CryptoError::AuthenticationFailed))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
