//! CAdES signature embedding for PDF documents
//!
//! Takes a rendered PDF and a parsed certificate and produces a signed
//! PDF with an embedded CMS signature (ETSI.CAdES.detached). The output
//! validates in standard PDF readers given a trusted chain.

pub mod embed;

pub use embed::{sign_pdf, SignatureOptions};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("Malformed PDF: {0}")]
    Malformed(String),

    #[error("CMS signature of {0} bytes exceeds the reserved placeholder")]
    SignatureTooLarge(usize),

    #[error("Signed output is missing the {0} marker")]
    MissingMarker(&'static str),

    #[error("Crypto backend error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
}
