//! Document integrity ledger
//!
//! A signed document is anchored by the SHA-256 of its canonical byte
//! representation. Canonical form is a pipe-joined line of identity
//! fields followed by each content item's significant fields in list
//! order, so any reorder or edit yields a different hash.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::{ContentItem, HashValidation, SignableDocument};
use crate::store::Store;

/// Canonical byte representation of a document.
///
/// `id|consultation_id|professional_id|patient_id|created_at` then per
/// item `|name|dosage|quantity|instructions` or `|text`. Timestamps
/// render RFC 3339 in UTC. An empty item list has nothing to attest
/// and is rejected.
pub fn canonical_bytes(doc: &SignableDocument) -> Result<Vec<u8>> {
    if doc.items.is_empty() {
        return Err(Error::MalformedDocument(
            "document has no content items".to_string(),
        ));
    }

    let mut canonical = format!(
        "{}|{}|{}|{}|{}",
        doc.id,
        doc.consultation_id,
        doc.professional_id,
        doc.patient_id,
        doc.created_at.to_rfc3339(),
    );
    for item in &doc.items {
        match item {
            ContentItem::Medication {
                name,
                dosage,
                quantity,
                instructions,
            } => {
                canonical.push_str(&format!(
                    "|{}|{}|{}|{}",
                    name,
                    dosage,
                    quantity,
                    instructions.as_deref().unwrap_or("")
                ));
            }
            ContentItem::BodyText { text } => {
                canonical.push_str(&format!("|{}", text));
            }
        }
    }
    Ok(canonical.into_bytes())
}

/// Lowercase hex SHA-256 of the canonical bytes.
pub fn compute_hash(doc: &SignableDocument) -> Result<String> {
    Ok(hex::encode(Sha256::digest(canonical_bytes(doc)?)))
}

#[derive(Clone)]
pub struct Ledger {
    store: Store,
}

impl Ledger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Value lookup across all recorded hashes. Safe to expose without
    /// authentication: it reveals only existence and the signed flag,
    /// never document content.
    pub async fn validate_by_hash(&self, hash: &str) -> Result<HashValidation> {
        let signed_at: Option<Option<String>> = sqlx::query_scalar(
            "SELECT signed_at FROM documents WHERE document_hash = ? LIMIT 1",
        )
        .bind(hash)
        .fetch_optional(self.store.pool())
        .await?;

        Ok(match signed_at {
            None => HashValidation {
                exists: false,
                is_signed: false,
            },
            Some(signed_at) => HashValidation {
                exists: true,
                is_signed: signed_at.is_some(),
            },
        })
    }
}
