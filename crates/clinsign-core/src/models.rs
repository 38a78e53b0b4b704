//! Data model for vault certificates and signable documents

use chrono::{DateTime, Utc};
use clinsign_crypto::TaxId;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{Error, Result};

/// Kind of clinical document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Prescription,
    MedicalCertificate,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Prescription => "prescription",
            DocumentKind::MedicalCertificate => "medical_certificate",
        }
    }

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "prescription" => Ok(DocumentKind::Prescription),
            "medical_certificate" => Ok(DocumentKind::MedicalCertificate),
            other => Err(Error::MalformedDocument(format!(
                "unknown document kind {other:?}"
            ))),
        }
    }
}

/// A single content entry of a document, stored as JSON in list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Medication {
        name: String,
        dosage: String,
        quantity: String,
        instructions: Option<String>,
    },
    BodyText {
        text: String,
    },
}

/// Who produced the signature bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureOrigin {
    /// Signed inside this service with vault key material.
    ServerSigned,
    /// Produced by the professional's own device and verified here
    /// against the vault certificate before being recorded.
    ClientAsserted,
}

impl SignatureOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureOrigin::ServerSigned => "server_signed",
            SignatureOrigin::ClientAsserted => "client_asserted",
        }
    }

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "server_signed" => Ok(SignatureOrigin::ServerSigned),
            "client_asserted" => Ok(SignatureOrigin::ClientAsserted),
            other => Err(Error::MalformedDocument(format!(
                "unknown signature origin {other:?}"
            ))),
        }
    }
}

/// Signature state of a signed document, absent while Draft.
#[derive(Debug, Clone, Serialize)]
pub struct SignatureRecord {
    #[serde(with = "signature_b64")]
    pub signature: Vec<u8>,
    pub origin: SignatureOrigin,
    pub certificate_subject: String,
    pub certificate_fingerprint: String,
    pub signed_at: DateTime<Utc>,
    pub document_hash: String,
}

mod signature_b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }
}

/// A prescription or medical certificate moving through Draft → Signed.
#[derive(Debug, Clone, Serialize)]
pub struct SignableDocument {
    pub id: String,
    pub kind: DocumentKind,
    pub consultation_id: String,
    pub professional_id: String,
    pub patient_id: String,
    pub items: Vec<ContentItem>,
    pub created_at: DateTime<Utc>,
    pub signature: Option<SignatureRecord>,
}

impl SignableDocument {
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}

/// Vault certificate metadata exposed to callers. The sealed payload
/// and password hash stay inside the crate.
#[derive(Debug, Clone, Serialize)]
pub struct StoredCertificate {
    pub id: String,
    pub owner_id: String,
    pub alias: String,
    pub holder_name: String,
    pub tax_id: Option<TaxId>,
    pub subject: String,
    pub fingerprint: String,
    pub not_after: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Derived: false once `not_after` has passed.
    pub is_valid: bool,
}

/// Outcome of an unauthenticated hash lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HashValidation {
    pub exists: bool,
    pub is_signed: bool,
}

/// Certificate row as persisted.
#[derive(Debug, FromRow)]
pub(crate) struct CertificateRow {
    pub id: String,
    pub owner_id: String,
    pub alias: String,
    pub holder_name: String,
    pub tax_id_json: Option<String>,
    pub subject: String,
    pub fingerprint: String,
    pub not_after: DateTime<Utc>,
    pub password_hash: String,
    pub certificate_der: Vec<u8>,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl CertificateRow {
    pub fn into_metadata(self, now: DateTime<Utc>) -> Result<StoredCertificate> {
        let tax_id = self
            .tax_id_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(StoredCertificate {
            is_valid: self.not_after > now,
            id: self.id,
            owner_id: self.owner_id,
            alias: self.alias,
            holder_name: self.holder_name,
            tax_id,
            subject: self.subject,
            fingerprint: self.fingerprint,
            not_after: self.not_after,
            created_at: self.created_at,
        })
    }
}

/// Document row as persisted. Signature columns are all null while the
/// document is Draft and all set once Signed.
#[derive(Debug, FromRow)]
pub(crate) struct DocumentRow {
    pub id: String,
    pub kind: String,
    pub consultation_id: String,
    pub professional_id: String,
    pub patient_id: String,
    pub items_json: String,
    pub created_at: DateTime<Utc>,
    pub signature: Option<Vec<u8>>,
    pub signature_origin: Option<String>,
    pub certificate_subject: Option<String>,
    pub certificate_fingerprint: Option<String>,
    pub signed_at: Option<DateTime<Utc>>,
    pub document_hash: Option<String>,
}

impl DocumentRow {
    pub fn into_document(self) -> Result<SignableDocument> {
        let items: Vec<ContentItem> = serde_json::from_str(&self.items_json)?;
        let signature = match (self.signature, self.signed_at) {
            (Some(signature), Some(signed_at)) => Some(SignatureRecord {
                signature,
                origin: SignatureOrigin::from_str(
                    self.signature_origin.as_deref().unwrap_or_default(),
                )?,
                certificate_subject: self.certificate_subject.unwrap_or_default(),
                certificate_fingerprint: self.certificate_fingerprint.unwrap_or_default(),
                signed_at,
                document_hash: self.document_hash.unwrap_or_default(),
            }),
            _ => None,
        };
        Ok(SignableDocument {
            id: self.id,
            kind: DocumentKind::from_str(&self.kind)?,
            consultation_id: self.consultation_id,
            professional_id: self.professional_id,
            patient_id: self.patient_id,
            items,
            created_at: self.created_at,
            signature,
        })
    }
}
