//! Certificate vault
//!
//! Stores PKCS#12 containers sealed under envelope encryption, keyed by
//! owner. Only metadata ever crosses the crate boundary; decrypted key
//! material exists solely inside `retrieve_for_signing` callers and is
//! dropped with the call.

use chrono::Utc;
use clinsign_crypto::{
    extract_tax_id, hash_password, holder_name, parse, verify_password, MasterKey,
    ParsedCertificate,
};
use openssl::x509::X509;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{CertificateRow, StoredCertificate};
use crate::store::Store;

#[derive(Clone)]
pub struct Vault {
    store: Store,
    master: MasterKey,
}

impl Vault {
    pub fn new(store: Store, master: MasterKey) -> Self {
        Self { store, master }
    }

    /// Parse, validate and seal a PKCS#12 container for `owner_id`.
    ///
    /// An already-expired certificate is rejected before anything is
    /// written. The plaintext password is hashed and discarded.
    pub async fn store(
        &self,
        owner_id: &str,
        bytes: &[u8],
        password: &str,
        alias: &str,
    ) -> Result<StoredCertificate> {
        let parsed = parse(bytes, password)?;

        let now = Utc::now();
        if parsed.not_after <= now {
            return Err(Error::CertificateExpired);
        }

        let id = Uuid::new_v4().to_string();
        let password_hash = hash_password(password)?;
        let payload = self.master.seal(bytes)?;
        let certificate_der = parsed
            .certificate
            .to_der()
            .map_err(clinsign_crypto::CryptoError::Backend)?;

        let holder = holder_name(&parsed.subject);
        let tax_id = extract_tax_id(&parsed.subject);
        let tax_id_json = tax_id.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO certificates
                (id, owner_id, alias, holder_name, tax_id_json, subject,
                 fingerprint, not_after, password_hash, certificate_der,
                 payload, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(owner_id)
        .bind(alias)
        .bind(&holder)
        .bind(&tax_id_json)
        .bind(&parsed.subject)
        .bind(&parsed.fingerprint)
        .bind(parsed.not_after)
        .bind(&password_hash)
        .bind(&certificate_der)
        .bind(&payload)
        .bind(now)
        .execute(self.store.pool())
        .await?;

        tracing::info!(
            certificate_id = %id,
            owner_id = %owner_id,
            fingerprint = %parsed.fingerprint,
            "Certificate stored in vault"
        );

        Ok(StoredCertificate {
            id,
            owner_id: owner_id.to_string(),
            alias: alias.to_string(),
            holder_name: holder,
            tax_id,
            subject: parsed.subject,
            fingerprint: parsed.fingerprint,
            not_after: parsed.not_after,
            created_at: now,
            is_valid: true,
        })
    }

    /// Certificates owned by `owner_id`, newest first.
    pub async fn list(&self, owner_id: &str) -> Result<Vec<StoredCertificate>> {
        let rows: Vec<CertificateRow> = sqlx::query_as(
            "SELECT * FROM certificates WHERE owner_id = ? ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(self.store.pool())
        .await?;

        let now = Utc::now();
        rows.into_iter().map(|r| r.into_metadata(now)).collect()
    }

    /// Ownership-checked single fetch.
    pub async fn get(&self, cert_id: &str, owner_id: &str) -> Result<StoredCertificate> {
        let row = self.fetch_row(cert_id).await?;
        if row.owner_id != owner_id {
            return Err(Error::Forbidden);
        }
        row.into_metadata(Utc::now())
    }

    /// Check a password against the stored hash. Fails closed on a
    /// missing row, an expired certificate or a mismatch. Only the
    /// hash and expiry columns are read; the sealed payload never
    /// leaves the database for this check.
    pub async fn validate_password(&self, cert_id: &str, password: &str) -> Result<bool> {
        let row: Option<(chrono::DateTime<Utc>, String)> = sqlx::query_as(
            "SELECT not_after, password_hash FROM certificates WHERE id = ?",
        )
        .bind(cert_id)
        .fetch_optional(self.store.pool())
        .await?;

        let Some((not_after, password_hash)) = row else {
            return Ok(false);
        };
        if not_after <= Utc::now() {
            return Ok(false);
        }
        Ok(verify_password(password, &password_hash))
    }

    /// Remove a certificate and its sealed payload. Returns `false`
    /// when nothing existed to delete.
    pub async fn delete(&self, cert_id: &str, owner_id: &str) -> Result<bool> {
        let row_owner: Option<String> =
            sqlx::query_scalar("SELECT owner_id FROM certificates WHERE id = ?")
                .bind(cert_id)
                .fetch_optional(self.store.pool())
                .await?;

        let Some(row_owner) = row_owner else {
            return Ok(false);
        };
        if row_owner != owner_id {
            return Err(Error::Forbidden);
        }

        sqlx::query("DELETE FROM certificates WHERE id = ?")
            .bind(cert_id)
            .execute(self.store.pool())
            .await?;

        tracing::info!(
            certificate_id = %cert_id,
            owner_id = %owner_id,
            "Certificate removed from vault"
        );
        Ok(true)
    }

    /// Unseal and re-parse a container for one signing operation.
    ///
    /// The password is checked against the stored hash first so a wrong
    /// password never reaches the decrypt path. Expiry is re-checked at
    /// use time; a certificate valid at upload may have lapsed since.
    pub(crate) async fn retrieve_for_signing(
        &self,
        cert_id: &str,
        password: &str,
    ) -> Result<ParsedCertificate> {
        let row = self.fetch_row(cert_id).await?;

        if !verify_password(password, &row.password_hash) {
            return Err(Error::Crypto(
                clinsign_crypto::CryptoError::AuthenticationFailed,
            ));
        }

        let container = self.master.open(&row.payload)?;
        let parsed = parse(&container, password)?;
        if parsed.not_after <= Utc::now() {
            return Err(Error::CertificateExpired);
        }
        Ok(parsed)
    }

    /// Public leaf certificate of a vault entry, for verifying
    /// client-asserted signatures. No password involved.
    pub(crate) async fn public_certificate(&self, cert_id: &str) -> Result<(X509, String, String)> {
        let row = self.fetch_row(cert_id).await?;
        if row.not_after <= Utc::now() {
            return Err(Error::CertificateExpired);
        }
        let certificate = X509::from_der(&row.certificate_der)
            .map_err(clinsign_crypto::CryptoError::Backend)?;
        Ok((certificate, row.subject, row.fingerprint))
    }

    async fn fetch_row(&self, cert_id: &str) -> Result<CertificateRow> {
        let row: Option<CertificateRow> =
            sqlx::query_as("SELECT * FROM certificates WHERE id = ?")
                .bind(cert_id)
                .fetch_optional(self.store.pool())
                .await?;
        row.ok_or(Error::NotFound("certificate"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::pkcs12::Pkcs12;
    use openssl::rsa::Rsa;
    use openssl::x509::{X509Builder, X509NameBuilder};

    fn container(password: &str) -> Vec<u8> {
        let rsa = Rsa::generate(2048).unwrap();
        let pkey = openssl::pkey::PKey::from_rsa(rsa).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, "FULANO DE TAL:12345678901")
            .unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&pkey).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder.sign(&pkey, MessageDigest::sha256()).unwrap();
        let cert = builder.build();

        Pkcs12::builder()
            .name("vault test")
            .pkey(&pkey)
            .cert(&cert)
            .build2(password)
            .unwrap()
            .to_der()
            .unwrap()
    }

    async fn vault() -> Vault {
        let store = crate::Store::connect_in_memory().await.unwrap();
        Vault::new(store, MasterKey::from_bytes(&[5u8; 32]).unwrap())
    }

    #[tokio::test]
    async fn validate_password_never_opens_the_payload() {
        let vault = vault().await;
        let stored = vault
            .store("prof-1", &container("abc123"), "abc123", "a")
            .await
            .unwrap();

        // Destroy the sealed payload. If the password check decrypted
        // it, the check would now fail; it must keep answering from the
        // hash column alone.
        sqlx::query("UPDATE certificates SET payload = ? WHERE id = ?")
            .bind(vec![0u8; 16])
            .bind(&stored.id)
            .execute(vault.store.pool())
            .await
            .unwrap();

        assert!(vault.validate_password(&stored.id, "abc123").await.unwrap());
        assert!(!vault.validate_password(&stored.id, "wrong").await.unwrap());

        // The payload is only opened on the signing path, which now
        // fails on the destroyed blob.
        assert!(matches!(
            vault.retrieve_for_signing(&stored.id, "abc123").await,
            Err(Error::Crypto(clinsign_crypto::CryptoError::Envelope))
        ));
    }

    #[tokio::test]
    async fn validate_password_fails_closed_on_expired_rows() {
        let vault = vault().await;

        // A lapsed certificate can no longer be uploaded, so age a row
        // in place.
        let stored = vault
            .store("prof-1", &container("abc123"), "abc123", "a")
            .await
            .unwrap();
        sqlx::query("UPDATE certificates SET not_after = ? WHERE id = ?")
            .bind(Utc::now() - Duration::days(1))
            .bind(&stored.id)
            .execute(vault.store.pool())
            .await
            .unwrap();

        assert!(!vault.validate_password(&stored.id, "abc123").await.unwrap());

        // Expiry is re-checked on the signing path as well.
        assert!(matches!(
            vault.retrieve_for_signing(&stored.id, "abc123").await,
            Err(Error::CertificateExpired)
        ));
    }
}
