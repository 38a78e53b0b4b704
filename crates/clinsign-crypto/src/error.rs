use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid PKCS#12 container: {0}")]
    InvalidContainer(String),

    #[error("Certificate password is incorrect")]
    AuthenticationFailed,

    #[error("Container has no private key entry")]
    NoPrivateKey,

    #[error("Sealed payload is corrupt or was sealed under a different master key")]
    Envelope,

    #[error("Master key must be exactly 32 bytes")]
    BadMasterKey,

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Crypto backend error: {0}")]
    Backend(#[from] openssl::error::ErrorStack),
}
