//! Signing engine
//!
//! Ties the vault, the document service and the ledger together. Key
//! material is pulled from the vault per operation and dropped when the
//! operation returns.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{SubsecRound, Utc};
use clinsign_crypto::{sign_detached, verify_detached, CryptoError};
use clinsign_pdf::SignatureOptions;

use crate::error::{Error, Result};
use crate::ledger;
use crate::models::{SignableDocument, SignatureOrigin};
use crate::vault::Vault;
use crate::Documents;

#[derive(Clone)]
pub struct Engine {
    vault: Vault,
    documents: Documents,
}

impl Engine {
    pub fn new(vault: Vault, documents: Documents) -> Self {
        Self { vault, documents }
    }

    /// Detached RSA-SHA256 signature over arbitrary content.
    pub async fn sign_detached(
        &self,
        cert_id: &str,
        password: &str,
        content: &[u8],
    ) -> Result<Vec<u8>> {
        let identity = self.vault.retrieve_for_signing(cert_id, password).await?;
        Ok(sign_detached(&identity.private_key, content)?)
    }

    /// Same as [`sign_detached`](Self::sign_detached), base64 for
    /// transport seams.
    pub async fn sign_detached_b64(
        &self,
        cert_id: &str,
        password: &str,
        content: &[u8],
    ) -> Result<String> {
        Ok(BASE64.encode(self.sign_detached(cert_id, password, content).await?))
    }

    /// Sign a Draft document server-side and move it to Signed.
    ///
    /// The item snapshot read here travels into the conditional update,
    /// so an edit that lands while the signature is being produced
    /// fails the transition instead of being silently attested.
    pub async fn sign_document(
        &self,
        doc_id: &str,
        cert_id: &str,
        password: &str,
    ) -> Result<SignableDocument> {
        let doc = self.documents.get(doc_id).await?;
        if doc.is_signed() {
            return Err(Error::AlreadySigned);
        }

        let canonical = ledger::canonical_bytes(&doc)?;
        let document_hash = ledger::compute_hash(&doc)?;
        let signed_items_json = serde_json::to_string(&doc.items)?;

        let identity = self.vault.retrieve_for_signing(cert_id, password).await?;
        let signature = sign_detached(&identity.private_key, &canonical)?;

        self.documents
            .mark_signed(
                doc_id,
                &signed_items_json,
                &signature,
                SignatureOrigin::ServerSigned,
                &identity.subject,
                &identity.fingerprint,
                Utc::now().trunc_subsecs(0),
                &document_hash,
            )
            .await
    }

    /// Record a signature produced on the professional's own device.
    ///
    /// The assertion is only trusted after it verifies against the
    /// document's canonical bytes with the vault certificate's public
    /// key; anything unverifiable is treated as a failed credential.
    pub async fn record_client_signature(
        &self,
        doc_id: &str,
        cert_id: &str,
        signature: &[u8],
    ) -> Result<SignableDocument> {
        let doc = self.documents.get(doc_id).await?;
        if doc.is_signed() {
            return Err(Error::AlreadySigned);
        }

        let canonical = ledger::canonical_bytes(&doc)?;
        let document_hash = ledger::compute_hash(&doc)?;
        let signed_items_json = serde_json::to_string(&doc.items)?;

        let (certificate, subject, fingerprint) = self.vault.public_certificate(cert_id).await?;
        if !verify_detached(&certificate, &canonical, signature) {
            tracing::warn!(
                document_id = %doc_id,
                certificate_id = %cert_id,
                "Rejected unverifiable client-asserted signature"
            );
            return Err(Error::Crypto(CryptoError::AuthenticationFailed));
        }

        self.documents
            .mark_signed(
                doc_id,
                &signed_items_json,
                signature,
                SignatureOrigin::ClientAsserted,
                &subject,
                &fingerprint,
                Utc::now().trunc_subsecs(0),
                &document_hash,
            )
            .await
    }

    /// Detached signature with an ad-hoc container that was never
    /// stored in the vault. Expiry is still enforced.
    pub fn sign_detached_with_container(
        container: &[u8],
        password: &str,
        content: &[u8],
    ) -> Result<Vec<u8>> {
        let identity = clinsign_crypto::parse(container, password)?;
        if identity.not_after <= Utc::now() {
            return Err(Error::CertificateExpired);
        }
        Ok(sign_detached(&identity.private_key, content)?)
    }

    /// PDF embedding with an ad-hoc container.
    pub fn sign_pdf_with_container(
        container: &[u8],
        password: &str,
        pdf_bytes: &[u8],
        options: &SignatureOptions,
    ) -> Result<Vec<u8>> {
        let identity = clinsign_crypto::parse(container, password)?;
        if identity.not_after <= Utc::now() {
            return Err(Error::CertificateExpired);
        }
        Ok(clinsign_pdf::sign_pdf(pdf_bytes, &identity, options)?)
    }

    /// Embed a CAdES signature into a rendered PDF using a vault
    /// certificate. The PDF bytes are not persisted here.
    pub async fn sign_pdf(
        &self,
        cert_id: &str,
        password: &str,
        pdf_bytes: &[u8],
        options: &SignatureOptions,
    ) -> Result<Vec<u8>> {
        let identity = self.vault.retrieve_for_signing(cert_id, password).await?;
        Ok(clinsign_pdf::sign_pdf(pdf_bytes, &identity, options)?)
    }
}
