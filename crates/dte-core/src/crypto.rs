//! RSA / SHA-1 primitives
//!
//! The authority mandates SHA-1 digests and RSASSA-PKCS1-v1_5 signatures for
//! both XML signatures and fiscal stamps. These helpers are the only place the
//! algorithms are chosen.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature as RsaSignature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// SHA-1 digest of `data`
pub fn sha1_digest(data: &[u8]) -> [u8; 20] {
    Sha1::digest(data).into()
}

/// RSASSA-PKCS1-v1_5 with SHA-1
pub fn sign_sha1(key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>> {
    let signing_key = SigningKey::<Sha1>::new(key.clone());
    let signature = signing_key
        .try_sign(data)
        .map_err(|e| Error::Crypto(format!("RSA-SHA1 signing failed: {}", e)))?;
    Ok(signature.to_vec())
}

/// Verify an RSASSA-PKCS1-v1_5 / SHA-1 signature
pub fn verify_sha1(key: &RsaPublicKey, data: &[u8], signature: &[u8]) -> Result<()> {
    let verifying_key = VerifyingKey::<Sha1>::new(key.clone());
    let signature = RsaSignature::try_from(signature)
        .map_err(|e| Error::SignatureVerificationFailed(format!("bad signature bytes: {}", e)))?;
    verifying_key
        .verify(data, &signature)
        .map_err(|_| Error::SignatureVerificationFailed("RSA-SHA1 signature mismatch".to_string()))
}

/// Encrypt a random nonce with the private key and recover it with the public key
///
/// Detects a private/public pair that do not belong together.
pub fn key_pair_self_test(private_key: &RsaPrivateKey, public_key: &RsaPublicKey) -> Result<()> {
    let nonce = Zeroizing::new(rand::random::<[u8; 32]>());
    let sealed = private_key
        .sign(Pkcs1v15Sign::new_unprefixed(), nonce.as_slice())
        .map_err(|e| Error::Crypto(format!("private-key operation failed: {}", e)))?;
    public_key
        .verify(Pkcs1v15Sign::new_unprefixed(), nonce.as_slice(), &sealed)
        .map_err(|_| Error::Crypto("nonce did not survive the key-pair round trip".to_string()))
}

/// Private key from PEM, PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1 (`BEGIN RSA PRIVATE KEY`)
pub fn private_key_from_pem(pem: &str) -> Result<RsaPrivateKey> {
    let pem = pem.trim();
    if pem.contains("BEGIN RSA PRIVATE KEY") {
        RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| Error::Key(e.to_string()))
    } else {
        RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| Error::Key(e.to_string()))
    }
}

/// Public key from PEM, SPKI (`BEGIN PUBLIC KEY`) or PKCS#1 (`BEGIN RSA PUBLIC KEY`)
pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey> {
    let pem = pem.trim();
    if pem.contains("BEGIN RSA PUBLIC KEY") {
        RsaPublicKey::from_pkcs1_pem(pem).map_err(|e| Error::Key(e.to_string()))
    } else {
        RsaPublicKey::from_public_key_pem(pem).map_err(|e| Error::Key(e.to_string()))
    }
}

/// Public key from a DER certificate or a DER SubjectPublicKeyInfo
pub fn public_key_from_der(der: &[u8]) -> Result<RsaPublicKey> {
    let spki = match x509_parser::parse_x509_certificate(der) {
        Ok((_, cert)) => cert.tbs_certificate.subject_pki.raw.to_vec(),
        Err(_) => der.to_vec(),
    };
    RsaPublicKey::from_public_key_der(&spki).map_err(|e| Error::Key(e.to_string()))
}

/// Public key from base64 big-endian modulus and exponent
pub fn public_key_from_components(modulus_b64: &str, exponent_b64: &str) -> Result<RsaPublicKey> {
    let n = BigUint::from_bytes_be(&decode_base64(modulus_b64)?);
    let e = BigUint::from_bytes_be(&decode_base64(exponent_b64)?);
    RsaPublicKey::new(n, e).map_err(|e| Error::Key(e.to_string()))
}

/// Base64 big-endian (modulus, exponent)
pub fn public_key_components(key: &RsaPublicKey) -> (String, String) {
    (
        STANDARD.encode(key.n().to_bytes_be()),
        STANDARD.encode(key.e().to_bytes_be()),
    )
}

/// Decode base64 that may carry line breaks or padding whitespace
pub fn decode_base64(value: &str) -> Result<Vec<u8>> {
    let compact: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(STANDARD.decode(compact)?)
}

pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Base64 wrapped at 76 columns, as the authority's own documents are
pub fn encode_base64_wrapped(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 76);
    for (i, chunk) in encoded.as_bytes().chunks(76).enumerate() {
        if i > 0 {
            out.push('\n');
        }
        // base64 output is ASCII
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
    }
    out
}
