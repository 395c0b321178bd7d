//! Enveloped XML signatures (XML-DSig, RSA-SHA1)
//!
//! The signature block is appended as the last child of the document root.
//! A reference either names an element by its `ID` attribute (`URI="#ID"`)
//! or covers the whole document (`URI=""`, with the enveloped-signature
//! transform).

use rsa::traits::PublicKeyParts;
use tracing::debug;

use crate::c14n::{self, C14nMethod, NamespaceContext};
use crate::certificate::Certificate;
use crate::crypto;
use crate::error::{Error, Result};
use crate::xml::{Element, Node, XmlDocument};

pub const DSIG_NAMESPACE: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const RSA_SHA1_URI: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const SHA1_URI: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const ENVELOPED_SIGNATURE_URI: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

/// Contents of a `<Signature>` element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureBlock {
    pub canonicalization: C14nMethod,
    /// `#ID` or empty for the whole document
    pub reference_uri: String,
    /// Whether the reference carries the enveloped-signature transform
    pub enveloped: bool,
    pub digest_value: String,
    pub signature_value: String,
    pub modulus: Option<String>,
    pub exponent: Option<String>,
    /// Base64 DER of the signer certificate
    pub certificate: Option<String>,
}

impl SignatureBlock {
    fn signed_info(&self) -> Element {
        let mut reference = Element::new("Reference").with_attribute("URI", &self.reference_uri);
        if self.enveloped {
            reference.push(Element::new("Transforms").with_child(
                Element::new("Transform").with_attribute("Algorithm", ENVELOPED_SIGNATURE_URI),
            ));
        }
        reference.push(Element::new("DigestMethod").with_attribute("Algorithm", SHA1_URI));
        reference.push(Element::text_element("DigestValue", &self.digest_value));

        Element::new("SignedInfo")
            .with_child(
                Element::new("CanonicalizationMethod")
                    .with_attribute("Algorithm", self.canonicalization.algorithm()),
            )
            .with_child(Element::new("SignatureMethod").with_attribute("Algorithm", RSA_SHA1_URI))
            .with_child(reference)
    }

    fn shell() -> Element {
        Element::new("Signature").with_attribute("xmlns", DSIG_NAMESPACE)
    }

    /// Build the `<Signature>` element
    pub fn to_element(&self) -> Element {
        let mut signature = Self::shell();
        signature.push(self.signed_info());
        signature.push(Element::text_element("SignatureValue", &self.signature_value));

        let mut key_info = Element::new("KeyInfo");
        if let (Some(modulus), Some(exponent)) = (&self.modulus, &self.exponent) {
            key_info.push(
                Element::new("KeyValue").with_child(
                    Element::new("RSAKeyValue")
                        .with_child(Element::text_element("Modulus", modulus))
                        .with_child(Element::text_element("Exponent", exponent)),
                ),
            );
        }
        if let Some(certificate) = &self.certificate {
            key_info.push(
                Element::new("X509Data")
                    .with_child(Element::text_element("X509Certificate", certificate)),
            );
        }
        signature.push(key_info);
        signature
    }

    /// Read a `<Signature>` element
    pub fn from_element(signature: &Element) -> Result<Self> {
        let signed_info = signature
            .child("SignedInfo")
            .ok_or_else(|| missing("SignedInfo"))?;

        let c14n_uri = signed_info
            .child("CanonicalizationMethod")
            .and_then(|e| e.attribute("Algorithm"))
            .ok_or_else(|| missing("CanonicalizationMethod"))?;
        let canonicalization = C14nMethod::from_algorithm(c14n_uri).ok_or_else(|| {
            Error::MalformedDocument(format!("unsupported canonicalization {}", c14n_uri))
        })?;

        let signature_method = signed_info
            .child("SignatureMethod")
            .and_then(|e| e.attribute("Algorithm"))
            .ok_or_else(|| missing("SignatureMethod"))?;
        if signature_method != RSA_SHA1_URI {
            return Err(Error::MalformedDocument(format!(
                "unsupported signature method {}",
                signature_method
            )));
        }

        let reference = signed_info.child("Reference").ok_or_else(|| missing("Reference"))?;
        let digest_method = reference
            .child("DigestMethod")
            .and_then(|e| e.attribute("Algorithm"))
            .ok_or_else(|| missing("DigestMethod"))?;
        if digest_method != SHA1_URI {
            return Err(Error::MalformedDocument(format!(
                "unsupported digest method {}",
                digest_method
            )));
        }

        let enveloped = reference.child("Transforms").is_some_and(|transforms| {
            transforms
                .child_elements()
                .any(|t| t.attribute("Algorithm") == Some(ENVELOPED_SIGNATURE_URI))
        });

        let key_value = signature
            .child("KeyInfo")
            .and_then(|k| k.child("KeyValue"))
            .and_then(|k| k.child("RSAKeyValue"));

        Ok(Self {
            canonicalization,
            reference_uri: reference.attribute("URI").unwrap_or_default().to_string(),
            enveloped,
            digest_value: reference
                .child_text("DigestValue")
                .ok_or_else(|| missing("DigestValue"))?,
            signature_value: signature
                .child_text("SignatureValue")
                .ok_or_else(|| missing("SignatureValue"))?,
            modulus: key_value.and_then(|k| k.child_text("Modulus")),
            exponent: key_value.and_then(|k| k.child_text("Exponent")),
            certificate: signature
                .child("KeyInfo")
                .and_then(|k| k.child("X509Data"))
                .and_then(|x| x.child_text("X509Certificate")),
        })
    }

    /// Public key to check the signature with: certificate first, then key value
    fn public_key(&self) -> Result<rsa::RsaPublicKey> {
        if let Some(certificate) = &self.certificate {
            if let Ok(key) = crypto::public_key_from_der(&crypto::decode_base64(certificate)?) {
                return Ok(key);
            }
        }
        match (&self.modulus, &self.exponent) {
            (Some(modulus), Some(exponent)) => crypto::public_key_from_components(modulus, exponent),
            _ => Err(Error::MalformedDocument(
                "signature carries no usable public key".to_string(),
            )),
        }
    }
}

/// Outcome of a successful verification
#[derive(Debug, Clone)]
pub struct VerifiedSignature {
    pub block: SignatureBlock,
    /// Signer certificate (DER) when the block embeds one
    pub certificate_der: Option<Vec<u8>>,
}

/// Sign the element with `ID == reference_id`, or the whole document when `None`
///
/// On error the document is left untouched.
pub fn sign(
    document: &mut XmlDocument,
    reference_id: Option<&str>,
    certificate: &Certificate,
) -> Result<()> {
    let (target_path, reference_uri) = match reference_id {
        Some(id) => (
            document
                .root
                .path_where(|e| e.attribute("ID") == Some(id))
                .ok_or_else(|| Error::ReferenceNotFound(id.to_string()))?,
            format!("#{}", id),
        ),
        None => (Vec::new(), String::new()),
    };

    let method = C14nMethod::Exclusive;
    let referenced = c14n::canonicalize_path(&document.root, &target_path, method)?;
    let digest = crypto::sha1_digest(referenced.as_bytes());

    let public_key = certificate.public_key();
    let mut block = SignatureBlock {
        canonicalization: method,
        enveloped: reference_id.is_none(),
        reference_uri,
        digest_value: crypto::encode_base64(&digest),
        signature_value: String::new(),
        modulus: Some(crypto::encode_base64_wrapped(&public_key.n().to_bytes_be())),
        exponent: Some(crypto::encode_base64(&public_key.e().to_bytes_be())),
        certificate: Some(crypto::encode_base64_wrapped(certificate.der())),
    };

    let context = NamespaceContext::default()
        .with_declarations_of(&document.root)
        .with_declarations_of(&SignatureBlock::shell());
    let signed_info = c14n::canonicalize_with_context(&block.signed_info(), &context, method);
    let signature = crypto::sign_sha1(certificate.private_key(), signed_info.as_bytes())?;
    block.signature_value = crypto::encode_base64_wrapped(&signature);

    debug!(
        reference = %block.reference_uri,
        holder = %certificate.identity().holder_id,
        "document signed"
    );
    document.root.push(block.to_element());
    Ok(())
}

/// Parse, sign and serialize in one step
pub fn sign_xml(xml: &str, reference_id: Option<&str>, certificate: &Certificate) -> Result<String> {
    let mut document = XmlDocument::parse(xml)?;
    sign(&mut document, reference_id, certificate)?;
    Ok(document.to_xml_string())
}

/// True when the last signature (covering `reference_id`, if given) checks out
pub fn verify(document: &XmlDocument, reference_id: Option<&str>) -> bool {
    match verify_detailed(document, reference_id) {
        Ok(_) => true,
        Err(e) => {
            debug!(error = %e, "signature did not verify");
            false
        }
    }
}

/// Like [`verify`], reporting why verification failed
pub fn verify_detailed(
    document: &XmlDocument,
    reference_id: Option<&str>,
) -> Result<VerifiedSignature> {
    let root = &document.root;
    let wanted_uri = reference_id.map(|id| format!("#{}", id));

    let mut selected = None;
    for path in root.paths_where(is_signature_element) {
        let element = root
            .element_at(&path)
            .ok_or_else(|| Error::MalformedDocument("signature path vanished".to_string()))?;
        let block = SignatureBlock::from_element(element)?;
        if wanted_uri.as_ref().map_or(true, |uri| *uri == block.reference_uri) {
            selected = Some((path, block));
        }
    }
    let (signature_path, block) = selected.ok_or_else(|| match reference_id {
        Some(id) => Error::ReferenceNotFound(format!("no signature references #{}", id)),
        None => Error::MalformedDocument("document carries no signature".to_string()),
    })?;

    // Digest over the referenced content
    let referenced = if block.enveloped {
        let mut stripped = root.clone();
        stripped.remove_at(&signature_path);
        canonical_reference(&stripped, &block)?
    } else {
        canonical_reference(root, &block)?
    };
    let digest = crypto::sha1_digest(referenced.as_bytes());
    if crypto::decode_base64(&block.digest_value)? != digest {
        return Err(Error::SignatureVerificationFailed(format!(
            "digest mismatch for reference '{}'",
            block.reference_uri
        )));
    }

    // Signature over SignedInfo, canonicalized where it sits in the document
    let signature_element = root
        .element_at(&signature_path)
        .ok_or_else(|| Error::MalformedDocument("signature path vanished".to_string()))?;
    let signed_info_index = signature_element
        .children
        .iter()
        .position(|n| matches!(n, Node::Element(e) if e.local_name() == "SignedInfo"))
        .ok_or_else(|| missing("SignedInfo"))?;
    let mut signed_info_path = signature_path.clone();
    signed_info_path.push(signed_info_index);
    let signed_info = c14n::canonicalize_path(root, &signed_info_path, block.canonicalization)?;

    let public_key = block.public_key()?;
    let signature_value = crypto::decode_base64(&block.signature_value)?;
    crypto::verify_sha1(&public_key, signed_info.as_bytes(), &signature_value)?;

    let certificate_der = match &block.certificate {
        Some(certificate) => Some(crypto::decode_base64(certificate)?),
        None => None,
    };
    Ok(VerifiedSignature {
        block,
        certificate_der,
    })
}

fn canonical_reference(root: &Element, block: &SignatureBlock) -> Result<String> {
    let path = match block.reference_uri.strip_prefix('#') {
        Some(id) => root
            .path_where(|e| e.attribute("ID") == Some(id))
            .ok_or_else(|| Error::ReferenceNotFound(id.to_string()))?,
        None if block.reference_uri.is_empty() => Vec::new(),
        None => {
            return Err(Error::MalformedDocument(format!(
                "unsupported reference URI {}",
                block.reference_uri
            )))
        }
    };
    c14n::canonicalize_path(root, &path, block.canonicalization)
}

fn is_signature_element(e: &Element) -> bool {
    e.local_name() == "Signature" && e.child("SignedInfo").is_some()
}

fn missing(what: &str) -> Error {
    Error::MalformedDocument(format!("signature is missing {}", what))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CERT_PEM: &str = include_str!("../tests/fixtures/signer_cert.pem");
    const KEY_PEM: &str = include_str!("../tests/fixtures/signer_key.pem");

    const DTE: &str = r#"<DTE version="1.0"><Documento ID="F50T33"><Encabezado><IdDoc><TipoDTE>33</TipoDTE><Folio>50</Folio></IdDoc></Encabezado><Detalle><NmbItem>Servicio</NmbItem><MontoItem>1000</MontoItem></Detalle><Vacio/></Documento></DTE>"#;

    fn certificate() -> Certificate {
        Certificate::from_pem(CERT_PEM, KEY_PEM).unwrap()
    }

    #[test]
    fn test_sign_then_verify() {
        let mut doc = XmlDocument::parse(DTE).unwrap();
        sign(&mut doc, Some("F50T33"), &certificate()).unwrap();

        let last = doc.root.child_elements().last().unwrap();
        assert_eq!(last.local_name(), "Signature");
        assert!(verify(&doc, Some("F50T33")));
        assert!(verify(&doc, None));
    }

    #[test]
    fn test_verify_after_serialization_roundtrip() {
        let xml = sign_xml(DTE, Some("F50T33"), &certificate()).unwrap();
        assert!(xml.contains("<Vacio></Vacio>"));
        let reparsed = XmlDocument::parse(&xml).unwrap();
        assert!(verify(&reparsed, Some("F50T33")));

        let bytes = reparsed.to_bytes();
        let from_bytes = XmlDocument::from_bytes(&bytes).unwrap();
        assert!(verify(&from_bytes, Some("F50T33")));
    }

    #[test]
    fn test_carriage_return_text_verifies_after_serialization() {
        let mut doc = XmlDocument::parse(DTE).unwrap();
        let mut receiver = Element::new("DirRecep");
        receiver.push_text("Av. Siempre Viva 742\r\nDepto 5");
        match &mut doc.root.children[0] {
            Node::Element(documento) => documento.push(receiver),
            Node::Text(_) => panic!("expected Documento"),
        }

        sign(&mut doc, Some("F50T33"), &certificate()).unwrap();
        assert!(verify(&doc, Some("F50T33")));

        let reparsed = XmlDocument::from_bytes(&doc.to_bytes()).unwrap();
        assert_eq!(
            reparsed.root.find("DirRecep").unwrap().text(),
            "Av. Siempre Viva 742\r\nDepto 5"
        );
        assert!(verify(&reparsed, Some("F50T33")));
    }

    #[test]
    fn test_tampered_content_fails() {
        let xml = sign_xml(DTE, Some("F50T33"), &certificate()).unwrap();
        let tampered = xml.replace("<MontoItem>1000</MontoItem>", "<MontoItem>1001</MontoItem>");
        assert!(!verify(&XmlDocument::parse(&tampered).unwrap(), Some("F50T33")));
    }

    #[test]
    fn test_tampered_signed_info_fails() {
        let mut doc = XmlDocument::parse(DTE).unwrap();
        sign(&mut doc, Some("F50T33"), &certificate()).unwrap();
        let xml = doc.to_xml_string();
        let tampered = xml.replace(
            C14nMethod::Exclusive.algorithm(),
            C14nMethod::Inclusive.algorithm(),
        );
        let result = verify_detailed(&XmlDocument::parse(&tampered).unwrap(), Some("F50T33"));
        assert!(matches!(result, Err(Error::SignatureVerificationFailed(_))));
    }

    #[test]
    fn test_whole_document_enveloped_signature() {
        let mut doc = XmlDocument::parse("<getToken><item><Semilla>012345</Semilla></item></getToken>").unwrap();
        sign(&mut doc, None, &certificate()).unwrap();
        let xml = doc.to_xml_string();
        assert!(xml.contains(ENVELOPED_SIGNATURE_URI));
        assert!(xml.contains(r#"<Reference URI="">"#));
        assert!(verify(&XmlDocument::parse(&xml).unwrap(), None));

        let tampered = xml.replace("012345", "012346");
        assert!(!verify(&XmlDocument::parse(&tampered).unwrap(), None));
    }

    #[test]
    fn test_missing_reference_is_error() {
        let mut doc = XmlDocument::parse(DTE).unwrap();
        let before = doc.clone();
        let result = sign(&mut doc, Some("nope"), &certificate());
        assert!(matches!(result, Err(Error::ReferenceNotFound(_))));
        assert_eq!(doc, before);
    }

    #[test]
    fn test_sign_xml_parse_error() {
        assert!(matches!(
            sign_xml("<DTE>", None, &certificate()),
            Err(Error::XmlParse(_))
        ));
    }

    #[test]
    fn test_unsigned_document_does_not_verify() {
        let doc = XmlDocument::parse(DTE).unwrap();
        assert!(!verify(&doc, None));
        assert!(!verify(&doc, Some("F50T33")));
    }

    #[test]
    fn test_signature_block_roundtrip() {
        let mut doc = XmlDocument::parse(DTE).unwrap();
        sign(&mut doc, Some("F50T33"), &certificate()).unwrap();
        let element = doc.root.child_elements().last().unwrap();
        let block = SignatureBlock::from_element(element).unwrap();
        assert_eq!(block.reference_uri, "#F50T33");
        assert!(!block.enveloped);
        assert_eq!(block.exponent.as_deref(), Some("AQAB"));
        assert_eq!(&block.to_element(), element);
    }

    #[test]
    fn test_verify_inside_namespaced_envelope() {
        let cert = certificate();
        let mut dte = XmlDocument::parse(DTE).unwrap();
        sign(&mut dte, Some("F50T33"), &cert).unwrap();

        let mut envelope = Element::new("EnvioDTE")
            .with_attribute("xmlns", "http://www.sii.cl/SiiDte")
            .with_attribute("version", "1.0");
        envelope.push(
            Element::new("SetDTE")
                .with_attribute("ID", "SetDoc")
                .with_child(dte.root),
        );
        let mut envelope = XmlDocument::new(envelope);
        sign(&mut envelope, Some("SetDoc"), &cert).unwrap();

        let reparsed = XmlDocument::parse(&envelope.to_xml_string()).unwrap();
        assert!(verify(&reparsed, Some("SetDoc")));
        assert!(verify(&reparsed, None));
    }
}
