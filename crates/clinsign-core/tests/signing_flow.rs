//! End-to-end flows: vault upload, password checks, document signing,
//! hash validation, client-asserted signatures and PDF embedding.

use chrono::Utc;
use clinsign_core::{
    canonical_bytes, ContentItem, DocumentKind, Documents, Engine, Error, Ledger, MasterKey,
    SignatureOptions, SignatureOrigin, Store, TaxId, Vault,
};
use clinsign_crypto::CryptoError;
use lopdf::{dictionary, Document, Object};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use pretty_assertions::assert_eq;

const PASSWORD: &str = "abc123";

fn identity(days_valid: i64) -> (X509, PKey<Private>) {
    let rsa = Rsa::generate(2048).unwrap();
    let pkey = PKey::from_rsa(rsa).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, "DR FULANO DE TAL:12345678901")
        .unwrap();
    name.append_entry_by_nid(Nid::ORGANIZATIONNAME, "ICP-Brasil Test")
        .unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&pkey).unwrap();

    let now = Utc::now().timestamp();
    let not_before = Asn1Time::from_unix(now - 86_400).unwrap();
    let not_after = Asn1Time::from_unix(now + days_valid * 86_400).unwrap();
    builder.set_not_before(&not_before).unwrap();
    builder.set_not_after(&not_after).unwrap();
    builder.sign(&pkey, MessageDigest::sha256()).unwrap();
    (builder.build(), pkey)
}

fn container(cert: &X509, pkey: &PKey<Private>, password: &str) -> Vec<u8> {
    Pkcs12::builder()
        .name("clinsign test")
        .pkey(pkey)
        .cert(cert)
        .build2(password)
        .unwrap()
        .to_der()
        .unwrap()
}

fn minimal_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

struct Services {
    vault: Vault,
    documents: Documents,
    engine: Engine,
    ledger: Ledger,
}

async fn services() -> Services {
    let store = Store::connect_in_memory().await.unwrap();
    let master = MasterKey::from_bytes(&[42u8; 32]).unwrap();
    let vault = Vault::new(store.clone(), master);
    let documents = Documents::new(store.clone());
    let engine = Engine::new(vault.clone(), documents.clone());
    let ledger = Ledger::new(store);
    Services {
        vault,
        documents,
        engine,
        ledger,
    }
}

fn medication(name: &str) -> ContentItem {
    ContentItem::Medication {
        name: name.to_string(),
        dosage: "500mg every 8h".to_string(),
        quantity: "21 capsules".to_string(),
        instructions: Some("take with food".to_string()),
    }
}

#[tokio::test]
async fn certificate_upload_happy_path() {
    let s = services().await;
    let (cert, pkey) = identity(365);
    let bytes = container(&cert, &pkey, PASSWORD);

    let stored = s
        .vault
        .store("prof-1", &bytes, PASSWORD, "my e-CPF")
        .await
        .unwrap();

    assert_eq!(stored.owner_id, "prof-1");
    assert_eq!(stored.alias, "my e-CPF");
    assert_eq!(stored.holder_name, "DR FULANO DE TAL");
    assert_eq!(stored.tax_id, Some(TaxId::Cpf("12345678901".to_string())));
    assert_eq!(stored.fingerprint.len(), 64);
    assert!(stored.is_valid);

    assert!(s.vault.validate_password(&stored.id, PASSWORD).await.unwrap());
    assert!(!s.vault.validate_password(&stored.id, "abc124").await.unwrap());
    assert!(!s.vault.validate_password("missing-id", PASSWORD).await.unwrap());

    let listed = s.vault.list("prof-1").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, stored.id);
    assert!(s.vault.list("prof-2").await.unwrap().is_empty());
}

#[tokio::test]
async fn expired_certificate_leaves_no_row() {
    let s = services().await;
    let (cert, pkey) = identity(-30);
    let bytes = container(&cert, &pkey, PASSWORD);

    let result = s.vault.store("prof-1", &bytes, PASSWORD, "stale").await;
    assert!(matches!(result, Err(Error::CertificateExpired)));
    assert!(s.vault.list("prof-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn wrong_upload_password_is_authentication_failure() {
    let s = services().await;
    let (cert, pkey) = identity(365);
    let bytes = container(&cert, &pkey, PASSWORD);

    let result = s.vault.store("prof-1", &bytes, "wrong", "alias").await;
    assert!(result.err().unwrap().is_authentication());
}

#[tokio::test]
async fn vault_access_is_ownership_checked() {
    let s = services().await;
    let (cert, pkey) = identity(365);
    let stored = s
        .vault
        .store("prof-1", &container(&cert, &pkey, PASSWORD), PASSWORD, "a")
        .await
        .unwrap();

    assert!(matches!(
        s.vault.get(&stored.id, "prof-2").await,
        Err(Error::Forbidden)
    ));
    assert!(matches!(
        s.vault.delete(&stored.id, "prof-2").await,
        Err(Error::Forbidden)
    ));

    assert!(s.vault.delete(&stored.id, "prof-1").await.unwrap());
    assert!(!s.vault.delete(&stored.id, "prof-1").await.unwrap());
}

#[tokio::test]
async fn document_signing_happy_path() {
    let s = services().await;
    let (cert, pkey) = identity(365);
    let stored = s
        .vault
        .store("prof-1", &container(&cert, &pkey, PASSWORD), PASSWORD, "a")
        .await
        .unwrap();

    let doc = s
        .documents
        .create(
            DocumentKind::Prescription,
            "cons-1",
            "prof-1",
            "pat-1",
            vec![medication("Amoxicillin"), medication("Dipyrone")],
        )
        .await
        .unwrap();

    let signed = s
        .engine
        .sign_document(&doc.id, &stored.id, PASSWORD)
        .await
        .unwrap();

    let record = signed.signature.as_ref().unwrap();
    assert_eq!(record.origin, SignatureOrigin::ServerSigned);
    assert_eq!(record.certificate_fingerprint, stored.fingerprint);
    assert_eq!(record.document_hash.len(), 64);

    // The recorded signature verifies against the certificate over the
    // canonical bytes.
    let canonical = canonical_bytes(&signed).unwrap();
    assert!(clinsign_crypto::verify_detached(
        &cert,
        &canonical,
        &record.signature
    ));

    // Signed documents are frozen.
    assert!(matches!(
        s.documents.add_item(&doc.id, medication("Late")).await,
        Err(Error::AlreadySigned)
    ));
    assert!(matches!(
        s.engine.sign_document(&doc.id, &stored.id, PASSWORD).await,
        Err(Error::AlreadySigned)
    ));
}

#[tokio::test]
async fn wrong_signing_password_leaves_document_draft() {
    let s = services().await;
    let (cert, pkey) = identity(365);
    let stored = s
        .vault
        .store("prof-1", &container(&cert, &pkey, PASSWORD), PASSWORD, "a")
        .await
        .unwrap();
    let doc = s
        .documents
        .create(DocumentKind::Prescription, "c", "prof-1", "pt", vec![medication("A")])
        .await
        .unwrap();

    let result = s.engine.sign_document(&doc.id, &stored.id, "wrong").await;
    assert!(result.err().unwrap().is_authentication());
    assert!(!s.documents.get(&doc.id).await.unwrap().is_signed());
}

#[tokio::test]
async fn empty_document_cannot_be_signed() {
    let s = services().await;
    let (cert, pkey) = identity(365);
    let stored = s
        .vault
        .store("prof-1", &container(&cert, &pkey, PASSWORD), PASSWORD, "a")
        .await
        .unwrap();
    let doc = s
        .documents
        .create(DocumentKind::MedicalCertificate, "c", "prof-1", "pt", vec![])
        .await
        .unwrap();

    assert!(matches!(
        s.engine.sign_document(&doc.id, &stored.id, PASSWORD).await,
        Err(Error::MalformedDocument(_))
    ));
}

#[tokio::test]
async fn hash_validation_sees_signed_documents() {
    let s = services().await;
    let (cert, pkey) = identity(365);
    let stored = s
        .vault
        .store("prof-1", &container(&cert, &pkey, PASSWORD), PASSWORD, "a")
        .await
        .unwrap();
    let doc = s
        .documents
        .create(DocumentKind::Prescription, "c", "prof-1", "pt", vec![medication("A")])
        .await
        .unwrap();
    let signed = s
        .engine
        .sign_document(&doc.id, &stored.id, PASSWORD)
        .await
        .unwrap();

    let hash = signed.signature.unwrap().document_hash;
    let hit = s.ledger.validate_by_hash(&hash).await.unwrap();
    assert!(hit.exists);
    assert!(hit.is_signed);

    let miss = s.ledger.validate_by_hash(&"0".repeat(64)).await.unwrap();
    assert!(!miss.exists);
    assert!(!miss.is_signed);
}

#[tokio::test]
async fn client_asserted_signature_is_verified_before_recording() {
    let s = services().await;
    let (cert, pkey) = identity(365);
    let stored = s
        .vault
        .store("prof-1", &container(&cert, &pkey, PASSWORD), PASSWORD, "a")
        .await
        .unwrap();
    let doc = s
        .documents
        .create(DocumentKind::Prescription, "c", "prof-1", "pt", vec![medication("A")])
        .await
        .unwrap();

    // A forged assertion is refused and the document stays Draft.
    let forged = vec![0u8; 256];
    let rejected = s
        .engine
        .record_client_signature(&doc.id, &stored.id, &forged)
        .await;
    assert!(matches!(
        rejected,
        Err(Error::Crypto(CryptoError::AuthenticationFailed))
    ));
    assert!(!s.documents.get(&doc.id).await.unwrap().is_signed());

    // A genuine device-side signature over the canonical bytes is
    // accepted and recorded with its origin.
    let canonical = canonical_bytes(&s.documents.get(&doc.id).await.unwrap()).unwrap();
    let signature = clinsign_crypto::sign_detached(&pkey, &canonical).unwrap();
    let signed = s
        .engine
        .record_client_signature(&doc.id, &stored.id, &signature)
        .await
        .unwrap();

    let record = signed.signature.unwrap();
    assert_eq!(record.origin, SignatureOrigin::ClientAsserted);
    assert_eq!(record.signature, signature);
}

#[tokio::test]
async fn detached_signing_round_trip() {
    let s = services().await;
    let (cert, pkey) = identity(365);
    let stored = s
        .vault
        .store("prof-1", &container(&cert, &pkey, PASSWORD), PASSWORD, "a")
        .await
        .unwrap();

    let content = b"laudo medico em texto livre";
    let signature = s
        .engine
        .sign_detached(&stored.id, PASSWORD, content)
        .await
        .unwrap();
    assert!(clinsign_crypto::verify_detached(&cert, content, &signature));
    assert!(!clinsign_crypto::verify_detached(&cert, b"tampered", &signature));

    let b64 = s
        .engine
        .sign_detached_b64(&stored.id, PASSWORD, content)
        .await
        .unwrap();
    assert!(!b64.is_empty());
}

#[tokio::test]
async fn pdf_signing_embeds_cades_signature() {
    let s = services().await;
    let (cert, pkey) = identity(365);
    let stored = s
        .vault
        .store("prof-1", &container(&cert, &pkey, PASSWORD), PASSWORD, "a")
        .await
        .unwrap();

    let options = SignatureOptions::new("DR FULANO DE TAL", "Prescription issuance")
        .with_location("Brasilia, BR");
    let signed = s
        .engine
        .sign_pdf(&stored.id, PASSWORD, &minimal_pdf(), &options)
        .await
        .unwrap();

    assert!(signed.starts_with(b"%PDF"));
    let text = String::from_utf8_lossy(&signed);
    assert!(text.contains("/ETSI.CAdES.detached"));
    assert!(!text.contains("9999999999"));
}

#[test]
fn ad_hoc_container_signs_without_vault_entry() {
    let (cert, pkey) = identity(365);
    let bytes = container(&cert, &pkey, PASSWORD);

    let content = b"one-off attestation";
    let signature = Engine::sign_detached_with_container(&bytes, PASSWORD, content).unwrap();
    assert!(clinsign_crypto::verify_detached(&cert, content, &signature));

    let (expired_cert, expired_key) = identity(-1);
    let expired = container(&expired_cert, &expired_key, PASSWORD);
    assert!(matches!(
        Engine::sign_detached_with_container(&expired, PASSWORD, content),
        Err(Error::CertificateExpired)
    ));

    let options = SignatureOptions::new("Ad hoc", "Attestation");
    let signed = Engine::sign_pdf_with_container(&bytes, PASSWORD, &minimal_pdf(), &options).unwrap();
    assert!(String::from_utf8_lossy(&signed).contains("/ETSI.CAdES.detached"));
}

#[tokio::test]
async fn missing_certificate_is_not_found() {
    let s = services().await;
    let doc = s
        .documents
        .create(DocumentKind::Prescription, "c", "prof-1", "pt", vec![medication("A")])
        .await
        .unwrap();

    assert!(matches!(
        s.engine.sign_document(&doc.id, "no-such-cert", PASSWORD).await,
        Err(Error::NotFound("certificate"))
    ));
}
