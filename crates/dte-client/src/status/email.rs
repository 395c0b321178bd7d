//! Status-by-email request (`reenvioCorreo`)

use dte_core::XmlDocument;

use super::codes::{header_status, taxonomy};
use super::{RemoteStatus, StatusKind};
use crate::error::{ClientError, Result};

taxonomy! {
    /// Answer to a request for the emailed submission report
    pub enum EmailRequestCode {
        Accepted = "0" => "request accepted, report will be emailed", error: false, terminal: true;
        UserNotAuthorized = "1" => "user not authorized for the company", error: true, terminal: true;
        TrackIdNotOwned = "2" => "tracking id does not belong to the company", error: true, terminal: true;
        TrackIdNotFound = "3" => "tracking id not found", error: true, terminal: true;
    }
}

pub fn parse_email_status(xml: &str) -> Result<RemoteStatus> {
    let document = XmlDocument::parse(xml.trim())
        .map_err(|e| ClientError::MalformedResponse(format!("reenvioCorreo: {}", e)))?;
    let header = document.root.find("RESP_HDR").ok_or_else(|| {
        ClientError::MalformedResponse("reenvioCorreo: missing RESP_HDR".into())
    })?;
    let code = header_status(header);

    let mut status = RemoteStatus::new(StatusKind::EmailRequest(EmailRequestCode::from_code(
        &code,
        Some(header),
    )));
    status.remote_message = header
        .child_text("GLOSA")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    Ok(status)
}
