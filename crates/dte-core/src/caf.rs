//! Folio authorization files (CAF)
//!
//! A CAF grants a taxpayer a range of folios for one document type and
//! carries the RSA key pair used to stamp those documents. The grant data
//! (`DA`) is signed by the authority with one of its keys, selected by `IDK`.
//!
//! ```text
//! <AUTORIZACION>
//!   <CAF version="1.0">
//!     <DA><RE/><RS/><TD/><RNG><D/><H/></RNG><FA/><RSAPK><M/><E/></RSAPK><IDK/></DA>
//!     <FRMA algoritmo="SHA1withRSA"/>
//!   </CAF>
//!   <RSASK/>
//!   <RSAPUBK/>
//! </AUTORIZACION>
//! ```

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::{info, warn};

use crate::crypto;
use crate::error::{Error, Result};
use crate::expiry::CafExpiry;
use crate::types::Rut;
use crate::xml::{encode_latin1, Element, XmlDocument};
use crate::{CERTIFICATION_KEY_ID, FAKE_KEY_ID, PRODUCTION_KEY_ID};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Authority certificates compiled in from `certs/`, by key id
pub const BUNDLED_CERTIFICATES: &[(i64, &[u8])] =
    include!(concat!(env!("OUT_DIR"), "/bundled_certs.rs"));

/// Environment an authorization was issued for, derived from its key id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CafEnvironment {
    Certification,
    Production,
    /// Test grant carrying [`FAKE_KEY_ID`]
    Synthetic,
}

impl CafEnvironment {
    pub fn from_key_id(key_id: i64) -> Option<Self> {
        match key_id {
            CERTIFICATION_KEY_ID => Some(CafEnvironment::Certification),
            PRODUCTION_KEY_ID => Some(CafEnvironment::Production),
            FAKE_KEY_ID => Some(CafEnvironment::Synthetic),
            _ => None,
        }
    }
}

impl fmt::Display for CafEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CafEnvironment::Certification => "certification",
            CafEnvironment::Production => "production",
            CafEnvironment::Synthetic => "synthetic",
        })
    }
}

/// A loaded folio authorization; read-only once loaded
#[derive(Clone)]
pub struct FolioAuthorization {
    key_id: i64,
    issuer: Rut,
    company_name: String,
    document_type: u16,
    low: u64,
    high: u64,
    issued_on: NaiveDate,
    public_key: RsaPublicKey,
    private_key: RsaPrivateKey,
    authority_signature: String,
    data: Element,
    caf: Element,
}

impl fmt::Debug for FolioAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FolioAuthorization")
            .field("key_id", &self.key_id)
            .field("issuer", &self.issuer)
            .field("document_type", &self.document_type)
            .field("low", &self.low)
            .field("high", &self.high)
            .field("issued_on", &self.issued_on)
            .finish_non_exhaustive()
    }
}

impl FolioAuthorization {
    /// Parse a CAF file (UTF-8 or ISO-8859-1)
    pub fn load(xml: &[u8]) -> Result<Self> {
        let document = XmlDocument::from_bytes(xml).map_err(|e| Error::CafMalformed(e.to_string()))?;
        let root = document.root;
        if root.local_name() != "AUTORIZACION" {
            return Err(Error::CafMalformed(format!(
                "unexpected root element <{}>",
                root.name
            )));
        }
        let caf = root.child("CAF").ok_or_else(|| missing("CAF"))?.clone();
        let data = caf.child("DA").ok_or_else(|| missing("DA"))?.clone();
        let field = |parent: &Element, name: &str| {
            parent
                .child_text(name)
                .filter(|text| !text.is_empty())
                .ok_or_else(|| missing(name))
        };

        let issuer = field(&data, "RE")?
            .parse::<Rut>()
            .map_err(|e| Error::CafMalformed(e.to_string()))?;
        let company_name = field(&data, "RS")?;
        let document_type = parse_number(&field(&data, "TD")?, "TD")?;

        let range = data.child("RNG").ok_or_else(|| missing("RNG"))?;
        let low: u64 = parse_number(&field(range, "D")?, "D")?;
        let high: u64 = parse_number(&field(range, "H")?, "H")?;
        if low > high {
            return Err(Error::CafMalformed(format!(
                "empty folio range {}-{}",
                low, high
            )));
        }

        let issued_on = NaiveDate::parse_from_str(&field(&data, "FA")?, DATE_FORMAT)
            .map_err(|e| Error::CafMalformed(format!("FA: {}", e)))?;

        let rsapk = data.child("RSAPK").ok_or_else(|| missing("RSAPK"))?;
        let public_key = crypto::public_key_from_components(&field(rsapk, "M")?, &field(rsapk, "E")?)
            .map_err(|e| Error::CafMalformed(format!("RSAPK: {}", e)))?;
        let key_id = parse_number(&field(&data, "IDK")?, "IDK")?;

        let authority_signature = field(&caf, "FRMA")?;
        let private_key = crypto::private_key_from_pem(&field(&root, "RSASK")?)
            .map_err(|e| Error::CafMalformed(format!("RSASK: {}", e)))?;

        Ok(Self {
            key_id,
            issuer,
            company_name,
            document_type,
            low,
            high,
            issued_on,
            public_key,
            private_key,
            authority_signature,
            data,
            caf,
        })
    }

    /// Check the authority signature and the embedded key pair
    ///
    /// Grants carrying [`FAKE_KEY_ID`] skip the authority signature but still
    /// run the key-pair self-test.
    pub fn validate(&self, keyring: &AuthorityKeyring) -> Result<()> {
        if self.is_synthetic() {
            warn!(
                issuer = %self.issuer,
                document_type = self.document_type,
                "synthetic folio authorization, authority signature not checked"
            );
        } else {
            let authority_key = keyring
                .get(self.key_id)
                .ok_or(Error::UnknownAuthorityKey(self.key_id))?;
            let invalid = |_| Error::CafAuthoritySignatureInvalid {
                key_id: self.key_id,
            };
            let signature = crypto::decode_base64(&self.authority_signature).map_err(invalid)?;
            crypto::verify_sha1(authority_key, &encode_latin1(&self.data.flatten()), &signature)
                .map_err(invalid)?;
        }

        crypto::key_pair_self_test(&self.private_key, &self.public_key)
            .map_err(|e| Error::CafKeyPairCorrupted(e.to_string()))?;

        info!(
            issuer = %self.issuer,
            document_type = self.document_type,
            low = self.low,
            high = self.high,
            key_id = self.key_id,
            "folio authorization validated"
        );
        Ok(())
    }

    /// True iff `low <= folio <= high`
    pub fn in_range(&self, folio: u64) -> bool {
        self.low <= folio && folio <= self.high
    }

    /// Expiry check at `at`, defaulting to now
    pub fn is_currently_valid(&self, at: Option<DateTime<Utc>>) -> bool {
        !self.expiry().is_expired(at.unwrap_or_else(Utc::now))
    }

    /// Error if the grant has expired at `at`, defaulting to now
    pub fn check_valid(&self, at: Option<DateTime<Utc>>) -> Result<()> {
        let expiry = self.expiry();
        match expiry.expires_at {
            Some(expires_at) if expiry.is_expired(at.unwrap_or_else(Utc::now)) => {
                Err(Error::CafExpired(expires_at.format(DATE_FORMAT).to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Error unless this grant covers `folio` of `document_type`
    pub fn check_folio(&self, document_type: u16, folio: u64) -> Result<()> {
        if document_type != self.document_type {
            return Err(Error::DocumentTypeMismatch {
                requested: document_type,
                authorized: self.document_type,
            });
        }
        if !self.in_range(folio) {
            return Err(Error::FolioOutOfRange {
                folio,
                low: self.low,
                high: self.high,
            });
        }
        Ok(())
    }

    /// Base64 RSA-SHA1 signature over `data` with the grant's private key
    pub fn stamp(&self, data: &[u8]) -> Result<String> {
        Ok(crypto::encode_base64(&crypto::sign_sha1(&self.private_key, data)?))
    }

    pub fn expiry(&self) -> CafExpiry {
        CafExpiry::new(self.document_type, self.issued_on)
    }

    pub fn environment(&self) -> Option<CafEnvironment> {
        CafEnvironment::from_key_id(self.key_id)
    }

    pub fn is_synthetic(&self) -> bool {
        self.key_id == FAKE_KEY_ID
    }

    pub fn key_id(&self) -> i64 {
        self.key_id
    }

    pub fn issuer(&self) -> Rut {
        self.issuer
    }

    pub fn company_name(&self) -> &str {
        &self.company_name
    }

    pub fn document_type(&self) -> u16 {
        self.document_type
    }

    /// Authorized folio range, inclusive
    pub fn range(&self) -> (u64, u64) {
        (self.low, self.high)
    }

    pub fn issued_on(&self) -> NaiveDate {
        self.issued_on
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// The `<CAF>` element, embedded verbatim in every stamp
    pub fn caf_element(&self) -> &Element {
        &self.caf
    }
}

fn missing(name: &str) -> Error {
    Error::CafMalformed(format!("missing <{}>", name))
}

fn parse_number<T: std::str::FromStr>(text: &str, name: &str) -> Result<T> {
    text.parse()
        .map_err(|_| Error::CafMalformed(format!("<{}> is not a number: {}", name, text)))
}

/// Authority public keys by key id (`IDK`)
#[derive(Debug, Clone, Default)]
pub struct AuthorityKeyring {
    keys: HashMap<i64, RsaPublicKey>,
}

impl AuthorityKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keyring holding the certificates compiled into the crate
    pub fn bundled() -> Result<Self> {
        let mut keyring = Self::new();
        for (key_id, encoded) in BUNDLED_CERTIFICATES {
            keyring.insert_encoded(*key_id, encoded)?;
        }
        Ok(keyring)
    }

    pub fn insert(&mut self, key_id: i64, key: RsaPublicKey) {
        self.keys.insert(key_id, key);
    }

    /// Add a key from a PEM certificate, a PEM public key or a DER certificate
    pub fn insert_encoded(&mut self, key_id: i64, encoded: &[u8]) -> Result<()> {
        let key = match std::str::from_utf8(encoded).map(str::trim_start) {
            Ok(text) if text.starts_with("-----BEGIN CERTIFICATE") => {
                let (_, pem) = x509_parser::pem::parse_x509_pem(text.as_bytes())
                    .map_err(|e| Error::Certificate(format!("invalid PEM: {}", e)))?;
                crypto::public_key_from_der(&pem.contents)?
            }
            Ok(text) if text.starts_with("-----BEGIN") => crypto::public_key_from_pem(text)?,
            _ => crypto::public_key_from_der(encoded)?,
        };
        self.insert(key_id, key);
        Ok(())
    }

    pub fn get(&self, key_id: i64) -> Option<&RsaPublicKey> {
        self.keys.get(&key_id)
    }

    pub fn key_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.keys.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Writes CAF files, for certification and test setups
///
/// Without an authority key the grant gets a random `FRMA`, which only
/// validates when the key id is [`FAKE_KEY_ID`].
#[derive(Debug, Clone)]
pub struct CafBuilder {
    issuer: Rut,
    company_name: String,
    document_type: u16,
    low: u64,
    high: u64,
    issued_on: NaiveDate,
    key_id: i64,
    key_pair: Option<(RsaPrivateKey, RsaPublicKey)>,
}

impl CafBuilder {
    /// A grant under [`FAKE_KEY_ID`]
    pub fn synthetic(issuer: Rut, document_type: u16, low: u64, high: u64, issued_on: NaiveDate) -> Self {
        Self {
            issuer,
            company_name: "Empresa de Prueba".to_string(),
            document_type,
            low,
            high,
            issued_on,
            key_id: FAKE_KEY_ID,
            key_pair: None,
        }
    }

    pub fn key_id(mut self, key_id: i64) -> Self {
        self.key_id = key_id;
        self
    }

    pub fn company_name(mut self, name: impl Into<String>) -> Self {
        self.company_name = name.into();
        self
    }

    /// Embed this key pair instead of a freshly generated one
    ///
    /// The two halves are written as given, even if they do not match.
    pub fn key_pair(mut self, private_key: RsaPrivateKey, public_key: RsaPublicKey) -> Self {
        self.key_pair = Some((private_key, public_key));
        self
    }

    /// Serialize the grant as ISO-8859-1 XML, signed by `authority` if given
    pub fn build(&self, authority: Option<&RsaPrivateKey>) -> Result<Vec<u8>> {
        let (private_key, public_key) = match &self.key_pair {
            Some(pair) => pair.clone(),
            None => {
                let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024)?;
                let public_key = private_key.to_public_key();
                (private_key, public_key)
            }
        };

        let data = Element::new("DA")
            .with_child(Element::text_element("RE", self.issuer.to_string()))
            .with_child(Element::text_element("RS", &self.company_name))
            .with_child(Element::text_element("TD", self.document_type.to_string()))
            .with_child(
                Element::new("RNG")
                    .with_child(Element::text_element("D", self.low.to_string()))
                    .with_child(Element::text_element("H", self.high.to_string())),
            )
            .with_child(Element::text_element(
                "FA",
                self.issued_on.format(DATE_FORMAT).to_string(),
            ))
            .with_child(
                Element::new("RSAPK")
                    .with_child(Element::text_element(
                        "M",
                        crypto::encode_base64(&public_key.n().to_bytes_be()),
                    ))
                    .with_child(Element::text_element(
                        "E",
                        crypto::encode_base64(&public_key.e().to_bytes_be()),
                    )),
            )
            .with_child(Element::text_element("IDK", self.key_id.to_string()));

        let authority_signature = match authority {
            Some(key) => crypto::sign_sha1(key, &encode_latin1(&data.flatten()))?,
            None => {
                let mut filler = vec![0u8; public_key.size()];
                rand::thread_rng().fill(filler.as_mut_slice());
                filler
            }
        };

        let mut caf = Element::new("CAF").with_attribute("version", "1.0");
        caf.push_text("\n");
        caf.push(data);
        caf.push_text("\n");
        caf.push(
            Element::text_element("FRMA", crypto::encode_base64(&authority_signature))
                .with_attribute("algoritmo", "SHA1withRSA"),
        );
        caf.push_text("\n");

        let private_pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| Error::Key(e.to_string()))?;
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| Error::Key(e.to_string()))?;

        let mut root = Element::new("AUTORIZACION");
        root.push_text("\n");
        root.push(caf);
        root.push_text("\n");
        root.push(Element::text_element("RSASK", private_pem.as_str()));
        root.push_text("\n");
        root.push(Element::text_element("RSAPUBK", public_pem));
        root.push_text("\n");

        Ok(XmlDocument::new(root).to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use std::sync::OnceLock;

    fn issuer() -> Rut {
        "76192083-9".parse().unwrap()
    }

    fn issued_on() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn authority() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
    }

    fn synthetic_caf() -> FolioAuthorization {
        let xml = CafBuilder::synthetic(issuer(), 33, 1, 100, issued_on())
            .build(None)
            .unwrap();
        FolioAuthorization::load(&xml).unwrap()
    }

    fn keyring() -> AuthorityKeyring {
        let mut keyring = AuthorityKeyring::new();
        keyring.insert(CERTIFICATION_KEY_ID, authority().to_public_key());
        keyring
    }

    #[test]
    fn test_load_fields() {
        let caf = synthetic_caf();
        assert_eq!(caf.key_id(), FAKE_KEY_ID);
        assert_eq!(caf.issuer(), issuer());
        assert_eq!(caf.company_name(), "Empresa de Prueba");
        assert_eq!(caf.document_type(), 33);
        assert_eq!(caf.range(), (1, 100));
        assert_eq!(caf.issued_on(), issued_on());
        assert_eq!(caf.environment(), Some(CafEnvironment::Synthetic));
        assert_eq!(caf.caf_element().local_name(), "CAF");
    }

    #[test]
    fn test_synthetic_validates_without_keyring() {
        assert!(synthetic_caf().validate(&AuthorityKeyring::new()).is_ok());
    }

    #[test]
    fn test_authority_signed_grant_validates() {
        let xml = CafBuilder::synthetic(issuer(), 61, 10, 20, issued_on())
            .key_id(CERTIFICATION_KEY_ID)
            .build(Some(authority()))
            .unwrap();
        let caf = FolioAuthorization::load(&xml).unwrap();
        assert_eq!(caf.environment(), Some(CafEnvironment::Certification));
        assert!(caf.validate(&keyring()).is_ok());
    }

    #[test]
    fn test_tampered_grant_fails_signature_check() {
        let xml = CafBuilder::synthetic(issuer(), 33, 1, 100, issued_on())
            .key_id(CERTIFICATION_KEY_ID)
            .build(Some(authority()))
            .unwrap();
        let tampered = String::from_utf8_lossy(&xml).replace("<H>100</H>", "<H>900</H>");
        let caf = FolioAuthorization::load(tampered.as_bytes()).unwrap();
        assert!(matches!(
            caf.validate(&keyring()),
            Err(Error::CafAuthoritySignatureInvalid { key_id: CERTIFICATION_KEY_ID })
        ));
    }

    #[test]
    fn test_unsigned_grant_fails_signature_check() {
        let xml = CafBuilder::synthetic(issuer(), 33, 1, 100, issued_on())
            .key_id(CERTIFICATION_KEY_ID)
            .build(None)
            .unwrap();
        let caf = FolioAuthorization::load(&xml).unwrap();
        assert!(matches!(
            caf.validate(&keyring()),
            Err(Error::CafAuthoritySignatureInvalid { .. })
        ));
    }

    #[test]
    fn test_unknown_authority_key() {
        let xml = CafBuilder::synthetic(issuer(), 33, 1, 100, issued_on())
            .key_id(PRODUCTION_KEY_ID)
            .build(Some(authority()))
            .unwrap();
        let caf = FolioAuthorization::load(&xml).unwrap();
        assert!(matches!(
            caf.validate(&keyring()),
            Err(Error::UnknownAuthorityKey(PRODUCTION_KEY_ID))
        ));
    }

    #[test]
    fn test_corrupted_key_pair_detected_even_for_synthetic() {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let other = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let xml = CafBuilder::synthetic(issuer(), 33, 1, 100, issued_on())
            .key_pair(private_key, other.to_public_key())
            .build(None)
            .unwrap();
        let caf = FolioAuthorization::load(&xml).unwrap();
        assert!(matches!(
            caf.validate(&AuthorityKeyring::new()),
            Err(Error::CafKeyPairCorrupted(_))
        ));
    }

    #[test]
    fn test_corrupted_key_pair_with_valid_authority_signature() {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let other = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let xml = CafBuilder::synthetic(issuer(), 33, 1, 100, issued_on())
            .key_id(CERTIFICATION_KEY_ID)
            .key_pair(private_key, other.to_public_key())
            .build(Some(authority()))
            .unwrap();
        let caf = FolioAuthorization::load(&xml).unwrap();
        assert!(matches!(
            caf.validate(&keyring()),
            Err(Error::CafKeyPairCorrupted(_))
        ));
    }

    #[test]
    fn test_malformed_inputs() {
        let cases: [&[u8]; 4] = [
            b"not xml at all <",
            b"<OTHER/>",
            b"<AUTORIZACION><CAF version=\"1.0\"><DA><RE>76192083-9</RE></DA></CAF></AUTORIZACION>",
            b"<AUTORIZACION><RSASK>x</RSASK></AUTORIZACION>",
        ];
        for case in cases {
            assert!(matches!(
                FolioAuthorization::load(case),
                Err(Error::CafMalformed(_))
            ));
        }
    }

    #[test]
    fn test_inverted_range_is_malformed() {
        let xml = CafBuilder::synthetic(issuer(), 33, 1, 100, issued_on())
            .build(None)
            .unwrap();
        let broken = String::from_utf8_lossy(&xml).replace("<D>1</D>", "<D>500</D>");
        assert!(matches!(
            FolioAuthorization::load(broken.as_bytes()),
            Err(Error::CafMalformed(_))
        ));
    }

    #[test]
    fn test_stamp_verifies_with_grant_key() {
        let caf = synthetic_caf();
        let stamp = caf.stamp(b"<DD>payload</DD>").unwrap();
        let signature = crypto::decode_base64(&stamp).unwrap();
        assert!(crypto::verify_sha1(caf.public_key(), b"<DD>payload</DD>", &signature).is_ok());
    }

    #[test]
    fn test_check_folio() {
        let caf = synthetic_caf();
        assert!(caf.check_folio(33, 50).is_ok());
        assert!(matches!(
            caf.check_folio(33, 150),
            Err(Error::FolioOutOfRange { folio: 150, low: 1, high: 100 })
        ));
        assert!(matches!(
            caf.check_folio(61, 50),
            Err(Error::DocumentTypeMismatch { requested: 61, authorized: 33 })
        ));
    }

    #[test]
    fn test_currently_valid() {
        let caf = synthetic_caf();
        let issued_at = caf.expiry().issued_at;
        let deadline = issued_at + Duration::days(180);
        assert!(caf.is_currently_valid(Some(deadline - Duration::seconds(1))));
        assert!(!caf.is_currently_valid(Some(deadline + Duration::seconds(1))));
    }

    #[test]
    fn test_check_valid_reports_expiry_date() {
        let caf = synthetic_caf();
        let deadline = caf.expiry().issued_at + Duration::days(180);
        assert!(caf.check_valid(Some(deadline - Duration::seconds(1))).is_ok());
        match caf.check_valid(Some(deadline)) {
            Err(Error::CafExpired(date)) => assert_eq!(date, "2026-08-28"),
            other => panic!("expected expiry error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_expiring_type_always_valid() {
        let xml = CafBuilder::synthetic(issuer(), 39, 1, 10, issued_on())
            .build(None)
            .unwrap();
        let caf = FolioAuthorization::load(&xml).unwrap();
        assert!(caf.is_currently_valid(Some(caf.expiry().issued_at + Duration::days(5000))));
        assert!(caf.is_currently_valid(None));
    }

    #[test]
    fn test_keyring_insert_encoded() {
        let cert_pem = include_bytes!("../tests/fixtures/authority_cert.pem");
        let mut keyring = AuthorityKeyring::new();
        keyring.insert_encoded(CERTIFICATION_KEY_ID, cert_pem).unwrap();

        let public_pem = authority()
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        keyring
            .insert_encoded(PRODUCTION_KEY_ID, public_pem.as_bytes())
            .unwrap();

        assert_eq!(keyring.key_ids(), vec![CERTIFICATION_KEY_ID, PRODUCTION_KEY_ID]);
        assert!(keyring.insert_encoded(1, b"garbage").is_err());
    }

    #[test]
    fn test_bundled_keyring_holds_every_compiled_certificate() {
        let keyring = AuthorityKeyring::bundled().unwrap();
        let mut expected: Vec<i64> = BUNDLED_CERTIFICATES.iter().map(|(id, _)| *id).collect();
        expected.sort_unstable();
        expected.dedup();
        assert_eq!(keyring.key_ids(), expected);
    }

    proptest! {
        #[test]
        fn prop_in_range_matches_bounds(low in 1u64..1_000_000, span in 0u64..10_000, folio in 0u64..1_020_000) {
            let caf = synthetic_caf_cached();
            let high = low + span;
            let bounded = FolioAuthorization { low, high, ..caf.clone() };
            prop_assert_eq!(bounded.in_range(folio), low <= folio && folio <= high);
            prop_assert!(bounded.in_range(low));
            prop_assert!(bounded.in_range(high));
            prop_assert!(!bounded.in_range(low - 1));
            prop_assert!(!bounded.in_range(high + 1));
        }
    }

    fn synthetic_caf_cached() -> &'static FolioAuthorization {
        static CAF: OnceLock<FolioAuthorization> = OnceLock::new();
        CAF.get_or_init(synthetic_caf)
    }
}
