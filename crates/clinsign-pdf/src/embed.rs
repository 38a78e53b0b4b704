//! CMS signature injection
//!
//! The embedding dance: write a signature dictionary with a zero-filled
//! /Contents placeholder, serialize the document once to learn the byte
//! positions, patch /ByteRange in place, sign the covered bytes, then
//! overwrite the placeholder with the hex-encoded CMS blob. The
//! serialized length never changes after the first save, which is what
//! keeps the byte range honest.

use chrono::Utc;
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use openssl::cms::{CMSOptions, CmsContentInfo};
use openssl::stack::Stack;
use openssl::x509::X509;

use clinsign_crypto::ParsedCertificate;

use crate::PdfError;

/// Reserved space for the DER-encoded CMS structure. Hex encoding
/// doubles it in the file. Sized for an RSA-2048 signature plus a
/// three-deep certificate chain with slack.
const PLACEHOLDER_SIZE: usize = 12288;

/// Human-readable fields recorded in the signature dictionary.
#[derive(Debug, Clone)]
pub struct SignatureOptions {
    pub signer_name: String,
    pub reason: String,
    pub location: Option<String>,
    pub contact: Option<String>,
}

impl SignatureOptions {
    pub fn new(signer_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            signer_name: signer_name.into(),
            reason: reason.into(),
            location: None,
            contact: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = Some(contact.into());
        self
    }
}

/// Embed a CAdES signature into `pdf_bytes`.
///
/// The signature field is invisible; the document content is not
/// altered beyond the appended signature machinery.
pub fn sign_pdf(
    pdf_bytes: &[u8],
    identity: &ParsedCertificate,
    options: &SignatureOptions,
) -> Result<Vec<u8>, PdfError> {
    let mut doc =
        Document::load_mem(pdf_bytes).map_err(|e| PdfError::Malformed(e.to_string()))?;

    let sig_dict_id = add_signature_dictionary(&mut doc, options);
    let field_id = add_signature_field(&mut doc, sig_dict_id)?;
    register_in_acroform(&mut doc, field_id)?;
    attach_to_first_page(&mut doc, field_id)?;

    let mut output = Vec::new();
    doc.save_to(&mut output)
        .map_err(|e| PdfError::Malformed(e.to_string()))?;

    let (contents_open, contents_close) = locate_placeholder(&output)?;
    let byte_range = [
        0i64,
        contents_open as i64,
        (contents_close + 1) as i64,
        (output.len() - contents_close - 1) as i64,
    ];
    patch_byte_range(&mut output, &byte_range)?;

    let mut covered = Vec::with_capacity(output.len() - 2 * PLACEHOLDER_SIZE);
    covered.extend_from_slice(&output[..contents_open]);
    covered.extend_from_slice(&output[contents_close + 1..]);

    let cms = build_cms(identity, &covered)?;
    let cms_hex = hex::encode(&cms);
    if cms_hex.len() > 2 * PLACEHOLDER_SIZE {
        return Err(PdfError::SignatureTooLarge(cms.len()));
    }

    let slot = &mut output[contents_open + 1..contents_close];
    slot[..cms_hex.len()].copy_from_slice(cms_hex.as_bytes());
    for byte in slot[cms_hex.len()..].iter_mut() {
        *byte = b'0';
    }

    Ok(output)
}

fn add_signature_dictionary(doc: &mut Document, options: &SignatureOptions) -> ObjectId {
    let mut sig = Dictionary::new();
    sig.set("Type", Object::Name(b"Sig".to_vec()));
    sig.set("Filter", Object::Name(b"Adobe.PPKLite".to_vec()));
    sig.set("SubFilter", Object::Name(b"ETSI.CAdES.detached".to_vec()));
    sig.set(
        "Contents",
        Object::String(vec![0u8; PLACEHOLDER_SIZE], StringFormat::Hexadecimal),
    );
    // Placeholder values wide enough for any file this subsystem emits;
    // patched after the first save.
    sig.set(
        "ByteRange",
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(9_999_999_999),
            Object::Integer(9_999_999_999),
            Object::Integer(9_999_999_999),
        ]),
    );
    sig.set(
        "Name",
        Object::String(
            options.signer_name.as_bytes().to_vec(),
            StringFormat::Literal,
        ),
    );
    sig.set(
        "Reason",
        Object::String(options.reason.as_bytes().to_vec(), StringFormat::Literal),
    );
    if let Some(location) = &options.location {
        sig.set(
            "Location",
            Object::String(location.as_bytes().to_vec(), StringFormat::Literal),
        );
    }
    if let Some(contact) = &options.contact {
        sig.set(
            "ContactInfo",
            Object::String(contact.as_bytes().to_vec(), StringFormat::Literal),
        );
    }
    let stamp = format!("D:{}", Utc::now().format("%Y%m%d%H%M%S+00'00'"));
    sig.set("M", Object::String(stamp.into_bytes(), StringFormat::Literal));

    doc.add_object(Object::Dictionary(sig))
}

/// Invisible widget annotation carrying the signature value.
fn add_signature_field(doc: &mut Document, sig_dict_id: ObjectId) -> Result<ObjectId, PdfError> {
    let mut field = Dictionary::new();
    field.set("Type", Object::Name(b"Annot".to_vec()));
    field.set("Subtype", Object::Name(b"Widget".to_vec()));
    field.set("FT", Object::Name(b"Sig".to_vec()));
    field.set(
        "T",
        Object::String(b"Signature1".to_vec(), StringFormat::Literal),
    );
    field.set(
        "Rect",
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(0),
        ]),
    );
    // Print | Locked
    field.set("F", Object::Integer(132));
    field.set("V", Object::Reference(sig_dict_id));

    if let Some((_, page_id)) = doc.get_pages().into_iter().next() {
        field.set("P", Object::Reference(page_id));
    }

    Ok(doc.add_object(Object::Dictionary(field)))
}

fn register_in_acroform(doc: &mut Document, field_id: ObjectId) -> Result<(), PdfError> {
    let catalog = doc
        .catalog_mut()
        .map_err(|e| PdfError::Malformed(format!("no catalog: {e}")))?;

    let acroform_id = match catalog.get(b"AcroForm").and_then(|o| o.as_reference()) {
        Ok(id) => id,
        Err(_) => {
            let mut acroform = Dictionary::new();
            acroform.set("Fields", Object::Array(vec![]));
            let id = doc.add_object(Object::Dictionary(acroform));
            let catalog = doc
                .catalog_mut()
                .map_err(|e| PdfError::Malformed(format!("no catalog: {e}")))?;
            catalog.set("AcroForm", Object::Reference(id));
            id
        }
    };

    let acroform = doc
        .get_object_mut(acroform_id)
        .and_then(|o| o.as_dict_mut())
        .map_err(|e| PdfError::Malformed(format!("bad AcroForm: {e}")))?;

    let mut fields = acroform
        .get(b"Fields")
        .and_then(|o| o.as_array().cloned())
        .unwrap_or_default();
    fields.push(Object::Reference(field_id));
    acroform.set("Fields", Object::Array(fields));
    // SignaturesExist | AppendOnly
    acroform.set("SigFlags", Object::Integer(3));

    Ok(())
}

fn attach_to_first_page(doc: &mut Document, field_id: ObjectId) -> Result<(), PdfError> {
    let page_id = doc
        .get_pages()
        .into_iter()
        .next()
        .map(|(_, id)| id)
        .ok_or_else(|| PdfError::Malformed("document has no pages".to_string()))?;

    let annots_ref = doc
        .get_object(page_id)
        .and_then(|o| o.as_dict())
        .ok()
        .and_then(|page| page.get(b"Annots").ok().and_then(|o| o.as_reference().ok()));

    if let Some(annots_id) = annots_ref {
        let annots = doc
            .get_object_mut(annots_id)
            .and_then(|o| o.as_array_mut())
            .map_err(|e| PdfError::Malformed(format!("bad Annots: {e}")))?;
        annots.push(Object::Reference(field_id));
        return Ok(());
    }

    let page = doc
        .get_object_mut(page_id)
        .and_then(|o| o.as_dict_mut())
        .map_err(|e| PdfError::Malformed(format!("bad page: {e}")))?;
    let mut annots = page
        .get(b"Annots")
        .and_then(|o| o.as_array().cloned())
        .unwrap_or_default();
    annots.push(Object::Reference(field_id));
    page.set("Annots", Object::Array(annots));

    Ok(())
}

/// Positions of the `<` and `>` delimiting the hex placeholder of the
/// last /Contents entry in the serialized file.
fn locate_placeholder(bytes: &[u8]) -> Result<(usize, usize), PdfError> {
    let marker = find_last_occurrence(bytes, b"/Contents")
        .ok_or(PdfError::MissingMarker("/Contents"))?;
    let open = bytes[marker..]
        .iter()
        .position(|&b| b == b'<')
        .map(|p| marker + p)
        .ok_or(PdfError::MissingMarker("/Contents hex string"))?;
    let close = open + 1 + 2 * PLACEHOLDER_SIZE;
    if bytes.len() <= close || bytes[close] != b'>' {
        return Err(PdfError::MissingMarker("/Contents hex string"));
    }
    Ok((open, close))
}

/// Overwrite the /ByteRange placeholder array in place, padding the
/// remainder with spaces so the file length is untouched.
fn patch_byte_range(bytes: &mut [u8], byte_range: &[i64; 4]) -> Result<(), PdfError> {
    let marker = find_last_occurrence(bytes, b"/ByteRange")
        .ok_or(PdfError::MissingMarker("/ByteRange"))?;
    let open = bytes[marker..]
        .iter()
        .position(|&b| b == b'[')
        .map(|p| marker + p)
        .ok_or(PdfError::MissingMarker("/ByteRange array"))?;
    let close = bytes[open..]
        .iter()
        .position(|&b| b == b']')
        .map(|p| open + p)
        .ok_or(PdfError::MissingMarker("/ByteRange array"))?;

    let rendered = format!(
        "[{} {} {} {}]",
        byte_range[0], byte_range[1], byte_range[2], byte_range[3]
    );
    if rendered.len() > close - open + 1 {
        return Err(PdfError::Malformed(
            "byte range does not fit its placeholder".to_string(),
        ));
    }
    bytes[open..open + rendered.len()].copy_from_slice(rendered.as_bytes());
    for byte in bytes[open + rendered.len()..=close].iter_mut() {
        *byte = b' ';
    }
    Ok(())
}

fn build_cms(identity: &ParsedCertificate, covered: &[u8]) -> Result<Vec<u8>, PdfError> {
    let mut chain = Stack::<X509>::new()?;
    for cert in &identity.chain {
        chain.push(cert.clone())?;
    }

    let cms = CmsContentInfo::sign(
        Some(&identity.certificate),
        Some(&identity.private_key),
        Some(&chain),
        Some(covered),
        CMSOptions::DETACHED | CMSOptions::BINARY,
    )?;
    Ok(cms.to_der()?)
}

fn find_last_occurrence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    (0..=(haystack.len() - needle.len()))
        .rev()
        .find(|&i| &haystack[i..i + needle.len()] == needle)
}
