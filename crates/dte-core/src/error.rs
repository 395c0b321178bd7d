//! Error types for dte-core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The input is not well-formed XML
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// The XML is well-formed but does not have the expected shape
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    /// No element carries the requested `ID`
    #[error("Reference target not found: {0}")]
    ReferenceNotFound(String),

    #[error("Key error: {0}")]
    Key(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Signature verification failed: {0}")]
    SignatureVerificationFailed(String),

    /// The folio authorization file is structurally broken
    #[error("Malformed folio authorization: {0}")]
    CafMalformed(String),

    /// The authority signature over the grant does not verify
    #[error("Folio authorization signature is invalid (key id {key_id})")]
    CafAuthoritySignatureInvalid { key_id: i64 },

    /// The embedded key pair failed its round-trip self-test
    #[error("Folio authorization key pair is corrupted: {0}")]
    CafKeyPairCorrupted(String),

    /// No bundled authority certificate for this key id
    #[error("No authority certificate for key id {0}")]
    UnknownAuthorityKey(i64),

    #[error("Folio {folio} outside authorized range {low}-{high}")]
    FolioOutOfRange { folio: u64, low: u64, high: u64 },

    #[error("Document type {requested} does not match authorization for type {authorized}")]
    DocumentTypeMismatch { requested: u16, authorized: u16 },

    #[error("Folio authorization expired on {0}")]
    CafExpired(String),

    #[error("Invalid taxpayer id: {0}")]
    InvalidRut(String),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::XmlParse(e.to_string())
    }
}

impl From<rsa::Error> for Error {
    fn from(e: rsa::Error) -> Self {
        Error::Crypto(e.to_string())
    }
}
