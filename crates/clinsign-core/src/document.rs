//! Signable documents and the Draft → Signed state machine
//!
//! A document is Draft until its signature columns are populated, then
//! Signed and immutable forever. Every mutating statement carries
//! `AND signed_at IS NULL`, so the transition is enforced by the
//! database row itself and exactly one concurrent signer can win.

use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ContentItem, DocumentKind, DocumentRow, SignableDocument, SignatureOrigin};
use crate::store::Store;

#[derive(Clone)]
pub struct Documents {
    store: Store,
}

impl Documents {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Create a Draft document.
    ///
    /// `created_at` is truncated to whole seconds so the canonical hash
    /// input survives the text round-trip through the database.
    pub async fn create(
        &self,
        kind: DocumentKind,
        consultation_id: &str,
        professional_id: &str,
        patient_id: &str,
        items: Vec<ContentItem>,
    ) -> Result<SignableDocument> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().trunc_subsecs(0);
        let items_json = serde_json::to_string(&items)?;

        sqlx::query(
            r#"
            INSERT INTO documents
                (id, kind, consultation_id, professional_id, patient_id,
                 items_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(kind.as_str())
        .bind(consultation_id)
        .bind(professional_id)
        .bind(patient_id)
        .bind(&items_json)
        .bind(created_at)
        .execute(self.store.pool())
        .await?;

        tracing::info!(document_id = %id, kind = kind.as_str(), "Document created");

        Ok(SignableDocument {
            id,
            kind,
            consultation_id: consultation_id.to_string(),
            professional_id: professional_id.to_string(),
            patient_id: patient_id.to_string(),
            items,
            created_at,
            signature: None,
        })
    }

    pub async fn get(&self, doc_id: &str) -> Result<SignableDocument> {
        self.fetch_row(doc_id).await?.into_document()
    }

    /// Append an item. Draft only.
    pub async fn add_item(&self, doc_id: &str, item: ContentItem) -> Result<SignableDocument> {
        self.mutate_items(doc_id, move |items| {
            items.push(item);
            Ok(())
        })
        .await
    }

    /// Remove the item at `index`. Draft only.
    pub async fn remove_item(&self, doc_id: &str, index: usize) -> Result<SignableDocument> {
        self.mutate_items(doc_id, move |items| {
            if index >= items.len() {
                return Err(Error::NotFound("content item"));
            }
            items.remove(index);
            Ok(())
        })
        .await
    }

    /// Replace the whole item list. Draft only.
    pub async fn replace_items(
        &self,
        doc_id: &str,
        new_items: Vec<ContentItem>,
    ) -> Result<SignableDocument> {
        self.mutate_items(doc_id, move |items| {
            *items = new_items;
            Ok(())
        })
        .await
    }

    /// Delete a Draft document. Signed documents are refused; deleting
    /// a signed clinical record would orphan its ledger hash. Returns
    /// `false` when the document never existed.
    pub async fn delete(&self, doc_id: &str) -> Result<bool> {
        let row: Option<DocumentRow> = sqlx::query_as("SELECT * FROM documents WHERE id = ?")
            .bind(doc_id)
            .fetch_optional(self.store.pool())
            .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        if row.signed_at.is_some() {
            return Err(Error::AlreadySigned);
        }

        let result = sqlx::query("DELETE FROM documents WHERE id = ? AND signed_at IS NULL")
            .bind(doc_id)
            .execute(self.store.pool())
            .await?;
        if result.rows_affected() == 0 {
            // Lost the race to a signer.
            return Err(Error::AlreadySigned);
        }

        tracing::info!(document_id = %doc_id, "Draft document deleted");
        Ok(true)
    }

    /// The one-way transition. The conditional update is keyed on
    /// `signed_at IS NULL` and on the exact item snapshot the signer
    /// hashed, so neither a second signer nor an edit that landed after
    /// the snapshot can produce a Signed row whose hash and signature
    /// cover different content than the row holds.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn mark_signed(
        &self,
        doc_id: &str,
        signed_items_json: &str,
        signature: &[u8],
        origin: SignatureOrigin,
        certificate_subject: &str,
        certificate_fingerprint: &str,
        signed_at: DateTime<Utc>,
        document_hash: &str,
    ) -> Result<SignableDocument> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET signature = ?, signature_origin = ?, certificate_subject = ?,
                certificate_fingerprint = ?, signed_at = ?, document_hash = ?
            WHERE id = ? AND signed_at IS NULL AND items_json = ?
            "#,
        )
        .bind(signature)
        .bind(origin.as_str())
        .bind(certificate_subject)
        .bind(certificate_fingerprint)
        .bind(signed_at)
        .bind(document_hash)
        .bind(doc_id)
        .bind(signed_items_json)
        .execute(self.store.pool())
        .await?;

        if result.rows_affected() == 0 {
            // Zero rows on a live Draft means the items moved under the
            // signer; on a signed row, someone else won.
            let row = self.fetch_row(doc_id).await?;
            if row.signed_at.is_some() {
                return Err(Error::AlreadySigned);
            }
            return Err(Error::ContentChanged);
        }

        tracing::info!(
            document_id = %doc_id,
            origin = origin.as_str(),
            document_hash = %document_hash,
            "Document signed"
        );
        self.get(doc_id).await
    }

    async fn mutate_items<F>(&self, doc_id: &str, mutate: F) -> Result<SignableDocument>
    where
        F: FnOnce(&mut Vec<ContentItem>) -> Result<()>,
    {
        let doc = self.get(doc_id).await?;
        if doc.is_signed() {
            return Err(Error::AlreadySigned);
        }

        let mut items = doc.items;
        mutate(&mut items)?;
        let items_json = serde_json::to_string(&items)?;

        let result =
            sqlx::query("UPDATE documents SET items_json = ? WHERE id = ? AND signed_at IS NULL")
                .bind(&items_json)
                .bind(doc_id)
                .execute(self.store.pool())
                .await?;
        if result.rows_affected() == 0 {
            return Err(Error::AlreadySigned);
        }

        self.get(doc_id).await
    }

    async fn fetch_row(&self, doc_id: &str) -> Result<DocumentRow> {
        let row: Option<DocumentRow> = sqlx::query_as("SELECT * FROM documents WHERE id = ?")
            .bind(doc_id)
            .fetch_optional(self.store.pool())
            .await?;
        row.ok_or(Error::NotFound("document"))
    }
}
