//! Upload receipt and submission status (`getEstUp`)

use dte_core::{Element, XmlDocument};

use super::codes::{header_status, taxonomy};
use super::{DocumentCounts, RemoteStatus, StatusKind};
use crate::error::{ClientError, Result};

/// `STATUS` of the upload receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptStatus {
    Ok,
    SenderWithoutPermission,
    FileSizeError,
    FileTruncated,
    NotAuthenticated,
    CompanyNotAuthorized,
    InvalidSchema,
    SignatureError,
    SystemLocked,
    Unknown(String),
}

impl ReceiptStatus {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "0" => ReceiptStatus::Ok,
            "1" => ReceiptStatus::SenderWithoutPermission,
            "2" => ReceiptStatus::FileSizeError,
            "3" => ReceiptStatus::FileTruncated,
            "5" => ReceiptStatus::NotAuthenticated,
            "6" => ReceiptStatus::CompanyNotAuthorized,
            "7" => ReceiptStatus::InvalidSchema,
            "8" => ReceiptStatus::SignatureError,
            "9" => ReceiptStatus::SystemLocked,
            other => ReceiptStatus::Unknown(other.to_string()),
        }
    }

    pub fn code(&self) -> String {
        match self {
            ReceiptStatus::Ok => "0",
            ReceiptStatus::SenderWithoutPermission => "1",
            ReceiptStatus::FileSizeError => "2",
            ReceiptStatus::FileTruncated => "3",
            ReceiptStatus::NotAuthenticated => "5",
            ReceiptStatus::CompanyNotAuthorized => "6",
            ReceiptStatus::InvalidSchema => "7",
            ReceiptStatus::SignatureError => "8",
            ReceiptStatus::SystemLocked => "9",
            ReceiptStatus::Unknown(code) => return code.clone(),
        }
        .to_string()
    }

    pub fn description(&self) -> String {
        match self {
            ReceiptStatus::Ok => "upload ok",
            ReceiptStatus::SenderWithoutPermission => "sender has no permission to send",
            ReceiptStatus::FileSizeError => "file size error",
            ReceiptStatus::FileTruncated => "file truncated",
            ReceiptStatus::NotAuthenticated => "not authenticated",
            ReceiptStatus::CompanyNotAuthorized => "company not authorized",
            ReceiptStatus::InvalidSchema => "invalid schema",
            ReceiptStatus::SignatureError => "document signature error",
            ReceiptStatus::SystemLocked => "system locked",
            ReceiptStatus::Unknown(code) => return super::codes::unknown_description(code),
        }
        .to_string()
    }

    pub fn is_error(&self) -> bool {
        *self != ReceiptStatus::Ok
    }
}

taxonomy! {
    /// State of an uploaded submission as reported by `getEstUp`
    pub enum SubmissionCode {
        Received = "REC" => "submission received", error: false, terminal: false;
        SchemaOk = "SOK" => "schema validated", error: false, terminal: false;
        CoverOk = "CRT" => "cover validated", error: false, terminal: false;
        SignatureOk = "FOK" => "submission signature validated", error: false, terminal: false;
        Processing = "PRD" => "submission being processed", error: false, terminal: false;
        ProcessingDocuments = "PDR" => "submission documents being processed", error: false, terminal: false;
        Processed = "EPR" => "submission processed", error: false, terminal: true;
        AcceptedWithObjections = "RPR" => "accepted with objections", error: false, terminal: true;
        AcceptedWithMinorObjections = "RLV" => "accepted with minor objections", error: false, terminal: true;
        Rejected = "RCH" => "rejected", error: true, terminal: true;
        RejectedCover = "RCT" => "rejected for cover error", error: true, terminal: true;
        RejectedSignature = "RFR" => "rejected for signature error", error: true, terminal: true;
        RejectedSchema = "RSC" => "rejected for schema error", error: true, terminal: true;
        RejectedConsistency = "RCO" => "rejected for consistency error", error: true, terminal: true;
        RejectedRepeated = "RPT" => "rejected as repeated", error: true, terminal: true;
    }
}

/// Parsed `RECEPCIONDTE` upload response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub status: ReceiptStatus,
    pub track_id: Option<String>,
    pub file: Option<String>,
    pub timestamp: Option<String>,
}

impl UploadReceipt {
    /// Numeric tracking id; present and all digits
    pub fn track_id(&self) -> Result<u64> {
        let raw = self.track_id.as_deref().map(str::trim).unwrap_or_default();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ClientError::InvalidTrackId(raw.to_string()));
        }
        raw.parse()
            .map_err(|_| ClientError::InvalidTrackId(raw.to_string()))
    }

    pub fn to_remote_status(&self) -> RemoteStatus {
        let mut status = RemoteStatus::new(StatusKind::Receipt(self.status.clone()));
        status.track_id = self.track_id.clone();
        status
    }
}

fn non_empty(element: &Element, name: &str) -> Option<String> {
    element
        .child_text(name)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn parse_document(xml: &str, what: &str) -> Result<XmlDocument> {
    XmlDocument::parse(xml.trim())
        .map_err(|e| ClientError::MalformedResponse(format!("{}: {}", what, e)))
}

/// Parse the body returned by the upload endpoint
pub fn parse_receipt(xml: &str) -> Result<UploadReceipt> {
    let document = parse_document(xml, "upload receipt")?;
    let root = document.root.find("RECEPCIONDTE").ok_or_else(|| {
        ClientError::MalformedResponse("upload receipt: missing RECEPCIONDTE".into())
    })?;
    let status = non_empty(root, "STATUS").ok_or_else(|| {
        ClientError::MalformedResponse("upload receipt: missing STATUS".into())
    })?;

    Ok(UploadReceipt {
        status: ReceiptStatus::from_code(&status),
        track_id: non_empty(root, "TRACKID"),
        file: non_empty(root, "FILE"),
        timestamp: non_empty(root, "TIMESTAMP"),
    })
}

fn count(value: &Element) -> u32 {
    value.text().trim().parse().unwrap_or(0)
}

/// Per-type counts in `RESP_BODY`
///
/// The body is a flat sequence; each `TIPO_DOCTO` opens a new group.
fn parse_counts(body: &Element) -> Vec<DocumentCounts> {
    let mut groups: Vec<DocumentCounts> = Vec::new();
    for field in body.child_elements() {
        let name = field.local_name();
        if name == "TIPO_DOCTO" {
            groups.push(DocumentCounts {
                document_type: field.text().trim().parse().ok(),
                ..Default::default()
            });
            continue;
        }
        if !matches!(name, "INFORMADOS" | "ACEPTADOS" | "RECHAZADOS" | "REPAROS") {
            continue;
        }
        if groups.is_empty() {
            groups.push(DocumentCounts::default());
        }
        let Some(group) = groups.last_mut() else {
            continue;
        };
        match name {
            "INFORMADOS" => group.reported = count(field),
            "ACEPTADOS" => group.accepted = count(field),
            "RECHAZADOS" => group.rejected = count(field),
            _ => group.flagged = count(field),
        }
    }
    groups
}

/// Parse a `getEstUp` payload
pub fn parse_submission_status(xml: &str) -> Result<RemoteStatus> {
    let document = parse_document(xml, "getEstUp")?;
    let header = document
        .root
        .find("RESP_HDR")
        .ok_or_else(|| ClientError::MalformedResponse("getEstUp: missing RESP_HDR".into()))?;
    let code = header_status(header);

    let mut status = RemoteStatus::new(StatusKind::Submission(SubmissionCode::from_code(
        &code,
        Some(header),
    )));
    status.remote_message = non_empty(header, "GLOSA");
    status.track_id = non_empty(header, "TRACKID");
    if let Some(body) = document.root.find("RESP_BODY") {
        status.counts = parse_counts(body);
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECEIPT: &str = r#"<?xml version="1.0"?>
<RECEPCIONDTE>
<RUTSENDER>11111111-1</RUTSENDER>
<RUTCOMPANY>76192083-9</RUTCOMPANY>
<FILE>dte-upload-a1b2.xml</FILE>
<TIMESTAMP>2026-10-19 10:20:30</TIMESTAMP>
<STATUS>0</STATUS>
<TRACKID>0123456789</TRACKID>
</RECEPCIONDTE>"#;

    #[test]
    fn test_receipt_ok() {
        let receipt = parse_receipt(RECEIPT).unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Ok);
        assert_eq!(receipt.track_id().unwrap(), 123456789);
        assert_eq!(receipt.file.as_deref(), Some("dte-upload-a1b2.xml"));
        assert!(!receipt.to_remote_status().is_error);
    }

    #[test]
    fn test_receipt_track_id_validation() {
        let mut receipt = parse_receipt(RECEIPT).unwrap();
        receipt.track_id = None;
        assert!(matches!(receipt.track_id(), Err(ClientError::InvalidTrackId(_))));
        receipt.track_id = Some("12AB".into());
        assert!(matches!(receipt.track_id(), Err(ClientError::InvalidTrackId(_))));
        receipt.track_id = Some("-5".into());
        assert!(matches!(receipt.track_id(), Err(ClientError::InvalidTrackId(_))));
    }

    #[test]
    fn test_receipt_statuses() {
        let xml = RECEIPT.replace("<STATUS>0</STATUS>", "<STATUS>7</STATUS>");
        let status = parse_receipt(&xml).unwrap().to_remote_status();
        assert_eq!(status.code, "7");
        assert_eq!(status.description, "invalid schema");
        assert!(status.is_error);

        let unknown = ReceiptStatus::from_code("4");
        assert_eq!(unknown.description(), "unknown error code #4");
        assert!(unknown.is_error());
    }

    #[test]
    fn test_receipt_malformed() {
        assert!(parse_receipt("<html/>").is_err());
        assert!(parse_receipt("<RECEPCIONDTE><TRACKID>1</TRACKID></RECEPCIONDTE>").is_err());
    }

    #[test]
    fn test_submission_code_classification() {
        let received = SubmissionCode::from_code("REC", None);
        assert!(!received.is_terminal());
        assert!(!received.is_error());

        let processed = SubmissionCode::from_code("EPR", None);
        assert!(processed.is_terminal());
        assert!(!processed.is_error());

        let rejected = SubmissionCode::from_code("RFR", None);
        assert!(rejected.is_terminal());
        assert!(rejected.is_error());

        let unknown = SubmissionCode::from_code("ZZZ", None);
        assert_eq!(unknown, SubmissionCode::Unknown("ZZZ".into()));
        assert_eq!(unknown.description(), "unknown error code #ZZZ");
        assert!(unknown.is_error());
    }

    #[test]
    fn test_parse_multi_type_body() {
        let xml = r#"<SII:RESPUESTA xmlns:SII="http://www.sii.cl/XMLSchema">
<SII:RESP_HDR><TRACKID>4321</TRACKID><ESTADO>EPR</ESTADO><GLOSA>Envio Procesado</GLOSA></SII:RESP_HDR>
<SII:RESP_BODY>
<TIPO_DOCTO>33</TIPO_DOCTO><INFORMADOS>4</INFORMADOS><ACEPTADOS>4</ACEPTADOS><RECHAZADOS>0</RECHAZADOS><REPAROS>0</REPAROS>
<TIPO_DOCTO>61</TIPO_DOCTO><INFORMADOS>2</INFORMADOS><ACEPTADOS>1</ACEPTADOS><RECHAZADOS>1</RECHAZADOS><REPAROS>0</REPAROS>
</SII:RESP_BODY>
</SII:RESPUESTA>"#;
        let status = parse_submission_status(xml).unwrap();
        assert_eq!(status.track_id.as_deref(), Some("4321"));
        assert_eq!(status.remote_message.as_deref(), Some("Envio Procesado"));
        assert_eq!(status.counts.len(), 2);
        assert_eq!(status.counts[1].document_type, Some(61));
        assert_eq!(status.counts[1].rejected, 1);
    }

    #[test]
    fn test_parse_header_without_estado() {
        let xml = r#"<SII:RESPUESTA xmlns:SII="http://www.sii.cl/XMLSchema">
<SII:RESP_HDR><TRACKID>4321</TRACKID><GLOSA>Sin estado</GLOSA></SII:RESP_HDR>
</SII:RESPUESTA>"#;
        let status = parse_submission_status(xml).unwrap();
        assert_eq!(status.code, "-1");
        assert_eq!(status.description, "status field missing from response");
        assert!(status.is_error);
        assert!(!status.description.starts_with("unknown error code"));
    }

    #[test]
    fn test_parse_missing_header() {
        assert!(matches!(
            parse_submission_status("<SII:RESPUESTA xmlns:SII=\"x\"/>"),
            Err(ClientError::MalformedResponse(_))
        ));
    }
}
