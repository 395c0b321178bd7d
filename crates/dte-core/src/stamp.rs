//! Fiscal stamp (TED) construction and checking

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::caf::FolioAuthorization;
use crate::crypto;
use crate::error::{Error, Result};
use crate::types::Rut;
use crate::xml::{encode_latin1, Element};
use crate::STAMP_TEXT_MAX_CHARS;

/// Document fields copied into the stamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampData {
    pub issuer: Rut,
    pub document_type: u16,
    pub folio: u64,
    pub issue_date: NaiveDate,
    pub receiver: Rut,
    pub receiver_name: String,
    pub total_amount: u64,
    /// Description of the first detail line
    pub first_item: String,
}

/// `ID` given to a `<Documento>`, e.g. `F50T33`
pub fn document_id(document_type: u16, folio: u64) -> String {
    format!("F{}T{}", folio, document_type)
}

/// Build the `<TED>` element for a document
///
/// The folio and document type are checked against the authorization
/// before anything is signed.
pub fn build_stamp(
    caf: &FolioAuthorization,
    data: &StampData,
    timestamp: NaiveDateTime,
) -> Result<Element> {
    caf.check_folio(data.document_type, data.folio)?;
    caf.check_valid(Some(timestamp.and_utc()))?;

    let dd = Element::new("DD")
        .with_child(Element::text_element("RE", data.issuer.to_string()))
        .with_child(Element::text_element("TD", data.document_type.to_string()))
        .with_child(Element::text_element("F", data.folio.to_string()))
        .with_child(Element::text_element(
            "FE",
            data.issue_date.format("%Y-%m-%d").to_string(),
        ))
        .with_child(Element::text_element("RR", data.receiver.to_string()))
        .with_child(Element::text_element("RSR", truncate(&data.receiver_name)))
        .with_child(Element::text_element("MNT", data.total_amount.to_string()))
        .with_child(Element::text_element("IT1", truncate(&data.first_item)))
        .with_child(caf.caf_element().clone())
        .with_child(Element::text_element(
            "TSTED",
            timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
        ));

    let signature = caf.stamp(&encode_latin1(&dd.flatten()))?;
    debug!(
        document_type = data.document_type,
        folio = data.folio,
        "document stamped"
    );

    Ok(Element::new("TED")
        .with_attribute("version", "1.0")
        .with_child(dd)
        .with_child(Element::text_element("FRMT", signature).with_attribute("algoritmo", "SHA1withRSA")))
}

/// Check a `<TED>` against the public key of the CAF it embeds
pub fn verify_stamp(ted: &Element) -> Result<()> {
    let dd = ted
        .child("DD")
        .ok_or_else(|| Error::MalformedDocument("stamp is missing DD".to_string()))?;
    let rsapk = dd
        .child("CAF")
        .and_then(|caf| caf.child("DA"))
        .and_then(|da| da.child("RSAPK"))
        .ok_or_else(|| Error::MalformedDocument("stamp is missing CAF/DA/RSAPK".to_string()))?;
    let key = crypto::public_key_from_components(
        &rsapk.child_text("M").unwrap_or_default(),
        &rsapk.child_text("E").unwrap_or_default(),
    )?;
    let signature = crypto::decode_base64(
        &ted.child_text("FRMT")
            .ok_or_else(|| Error::MalformedDocument("stamp is missing FRMT".to_string()))?,
    )?;
    crypto::verify_sha1(&key, &encode_latin1(&dd.flatten()), &signature)
}

fn truncate(text: &str) -> String {
    text.chars().take(STAMP_TEXT_MAX_CHARS).collect()
}
