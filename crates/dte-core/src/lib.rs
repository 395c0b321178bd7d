//! DTE Core - XML signing, folio authorizations and fiscal stamps
//!
//! This crate holds the I/O-free half of the electronic tax document
//! pipeline: the XML tree and canonicalizer, the XML-DSig signer/verifier,
//! the folio authorization (CAF) validator and the TED stamp builder.

pub mod c14n;
pub mod caf;
pub mod certificate;
pub mod crypto;
pub mod error;
pub mod expiry;
pub mod signature;
pub mod stamp;
pub mod types;
pub mod xml;

pub use c14n::{canonicalize, canonicalize_path, C14nMethod, NamespaceContext};
pub use caf::{AuthorityKeyring, CafBuilder, CafEnvironment, FolioAuthorization};
pub use certificate::{Certificate, CertificateIdentity};
pub use error::{Error, Result};
pub use expiry::CafExpiry;
pub use signature::{sign, sign_xml, verify, verify_detailed, SignatureBlock, VerifiedSignature};
pub use stamp::{build_stamp, document_id, verify_stamp, StampData};
pub use types::Rut;
pub use xml::{Element, Encoding, Node, XmlDocument};

/// Authority key id carried by synthetic test authorizations
pub const FAKE_KEY_ID: i64 = 9999;

/// Authority key id of the certification environment
pub const CERTIFICATION_KEY_ID: i64 = 100;

/// Authority key id of the production environment
pub const PRODUCTION_KEY_ID: i64 = 300;

/// Days an authorization for an expiring document type stays usable
pub const CAF_VALIDITY_DAYS: i64 = 180;

/// Document types whose authorizations expire
pub const EXPIRING_DOCUMENT_TYPES: [u16; 5] = [33, 43, 46, 56, 61];

/// Warning threshold in days before expiry
pub const EXPIRY_WARNING_DAYS: i64 = 30;

/// Maximum length of free-text fields copied into a stamp
pub const STAMP_TEXT_MAX_CHARS: usize = 40;
