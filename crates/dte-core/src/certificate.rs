//! Signing certificate: RSA private key plus the X.509 certificate that binds
//! it to a taxpayer identity

use chrono::{DateTime, TimeZone, Utc};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::crypto;
use crate::error::{Error, Result};

/// OID of the X.520 `serialNumber` attribute, where the holder id is carried
const OID_SERIAL_NUMBER: &str = "2.5.4.5";

/// Identity attributes parsed from the certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateIdentity {
    /// Holder id (taxpayer id of the person the certificate was issued to)
    pub holder_id: String,
    pub holder_name: String,
    pub issuer: String,
    /// Certificate serial number, hex
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl CertificateIdentity {
    /// Identity of a DER certificate, e.g. one embedded in a signature
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Certificate(format!("invalid X.509 certificate: {}", e)))?;
        identity_from_x509(&cert)
    }

    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }
}

/// A loaded key pair and certificate; immutable after construction
#[derive(Clone)]
pub struct Certificate {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    der: Vec<u8>,
    identity: CertificateIdentity,
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Certificate {
    /// Load from a PEM certificate and a PEM private key
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes())
            .map_err(|e| Error::Certificate(format!("invalid PEM: {}", e)))?;
        let private_key = crypto::private_key_from_pem(key_pem)?;
        Self::from_der(pem.contents, private_key)
    }

    /// Load from a DER certificate and an already decoded private key
    pub fn from_der(der: Vec<u8>, private_key: RsaPrivateKey) -> Result<Self> {
        let identity = CertificateIdentity::from_der(&der)?;
        let public_key = crypto::public_key_from_der(&der)?;
        if public_key != private_key.to_public_key() {
            return Err(Error::Certificate(
                "certificate does not match the private key".to_string(),
            ));
        }
        Ok(Self {
            private_key,
            public_key,
            der,
            identity,
        })
    }

    /// Assemble from material an external loader already parsed
    pub fn from_parts(private_key: RsaPrivateKey, der: Vec<u8>, identity: CertificateIdentity) -> Self {
        let public_key = private_key.to_public_key();
        Self {
            private_key,
            public_key,
            der,
            identity,
        }
    }

    pub fn identity(&self) -> &CertificateIdentity {
        &self.identity
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// SHA-256 of the DER certificate, hex
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.der))
    }

    /// Key identifying this certificate in token caches
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.identity.holder_id, self.fingerprint())
    }
}

fn identity_from_x509(cert: &X509Certificate<'_>) -> Result<CertificateIdentity> {
    let subject = cert.subject();
    let holder_name = subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();
    let holder_id = subject
        .iter_attributes()
        .find(|attr| attr.attr_type().to_id_string() == OID_SERIAL_NUMBER)
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| holder_name.clone());

    let validity = cert.validity();
    Ok(CertificateIdentity {
        holder_id,
        holder_name,
        issuer: cert.issuer().to_string(),
        serial: cert.raw_serial_as_string().replace(':', ""),
        not_before: timestamp(validity.not_before.timestamp())?,
        not_after: timestamp(validity.not_after.timestamp())?,
    })
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| Error::Certificate(format!("validity timestamp out of range: {}", secs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CERT_PEM: &str = include_str!("../tests/fixtures/signer_cert.pem");
    const KEY_PEM: &str = include_str!("../tests/fixtures/signer_key.pem");
    const OTHER_KEY_PEM: &str = include_str!("../tests/fixtures/authority_key.pem");

    #[test]
    fn test_from_pem_parses_identity() {
        let cert = Certificate::from_pem(CERT_PEM, KEY_PEM).unwrap();
        let identity = cert.identity();
        assert_eq!(identity.holder_id, "11111111-1");
        assert_eq!(identity.holder_name, "Usuario de Prueba");
        assert!(identity.issuer.contains("Autoridad de Prueba"));
        assert!(identity.not_before < identity.not_after);
        assert!(identity.is_valid_at(identity.not_before));
        assert!(!identity.is_valid_at(identity.not_after + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_identity_from_embedded_der() {
        let cert = Certificate::from_pem(CERT_PEM, KEY_PEM).unwrap();
        let identity = CertificateIdentity::from_der(cert.der()).unwrap();
        assert_eq!(&identity, cert.identity());
        assert!(CertificateIdentity::from_der(b"not a certificate").is_err());
    }

    #[test]
    fn test_mismatched_key_rejected() {
        let result = Certificate::from_pem(CERT_PEM, OTHER_KEY_PEM);
        assert!(matches!(result, Err(Error::Certificate(_))));
    }

    #[test]
    fn test_cache_key_is_stable() {
        let a = Certificate::from_pem(CERT_PEM, KEY_PEM).unwrap();
        let b = Certificate::from_pem(CERT_PEM, KEY_PEM).unwrap();
        assert_eq!(a.cache_key(), b.cache_key());
        assert!(a.cache_key().starts_with("11111111-1:"));
    }

    #[test]
    fn test_debug_hides_key() {
        let cert = Certificate::from_pem(CERT_PEM, KEY_PEM).unwrap();
        let debug = format!("{:?}", cert);
        assert!(debug.contains("11111111-1"));
        assert!(!debug.contains("private_key"));
    }
}
