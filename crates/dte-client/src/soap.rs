//! Minimal SOAP 1.1 envelopes for the authority's RPC endpoints
//!
//! Requests carry one element per operation with positional string
//! arguments. Responses wrap the actual payload, itself an XML document, as
//! escaped text inside `<{operation}Return>`.

use dte_core::{Element, Encoding, XmlDocument};

use crate::error::{ClientError, Result};

pub const SOAP_ENV_NAMESPACE: &str = "http://schemas.xmlsoap.org/soap/envelope/";

fn envelope(body_child: Element) -> String {
    let root = Element::new("soapenv:Envelope")
        .with_attribute("xmlns:soapenv", SOAP_ENV_NAMESPACE)
        .with_child(Element::new("soapenv:Body").with_child(body_child));
    let mut document = XmlDocument::new(root);
    document.encoding = Some(Encoding::Utf8);
    document.to_xml_string()
}

/// Request envelope for `operation(args…)`
pub fn build_request(operation: &str, args: &[(&str, String)]) -> String {
    let mut call = Element::new(operation);
    for (name, value) in args {
        call.push(Element::text_element(*name, value.as_str()));
    }
    envelope(call)
}

/// Response envelope wrapping `payload`, as the authority returns it
pub fn build_response(operation: &str, payload: &str) -> String {
    envelope(
        Element::new(format!("ns1:{}Response", operation))
            .with_attribute("xmlns:ns1", "http://DefaultNamespace")
            .with_child(Element::text_element(format!("{}Return", operation), payload)),
    )
}

/// Fault envelope
pub fn build_fault(code: &str, message: &str) -> String {
    envelope(
        Element::new("soapenv:Fault")
            .with_child(Element::text_element("faultcode", code))
            .with_child(Element::text_element("faultstring", message)),
    )
}

/// Operation name of a request envelope
pub fn request_operation(envelope: &str) -> Option<String> {
    let document = XmlDocument::parse(envelope).ok()?;
    let call = document.root.child("Body")?.child_elements().next()?;
    Some(call.local_name().to_string())
}

/// Payload of a response envelope
///
/// A SOAP fault is returned as [`ClientError::SoapFault`]; anything that is
/// not a recognizable envelope is [`ClientError::MalformedResponse`].
pub fn parse_response(raw: &str, operation: &str) -> Result<String> {
    let document = XmlDocument::parse(raw)
        .map_err(|e| ClientError::MalformedResponse(format!("{}: {}", operation, e)))?;
    if document.root.local_name() != "Envelope" {
        return Err(ClientError::MalformedResponse(format!(
            "{}: root element is <{}>",
            operation, document.root.name
        )));
    }
    let body = document
        .root
        .child("Body")
        .ok_or_else(|| ClientError::MalformedResponse(format!("{}: missing Body", operation)))?;

    if let Some(fault) = body.child("Fault") {
        return Err(ClientError::SoapFault {
            code: fault.child_text("faultcode").unwrap_or_default(),
            message: fault.child_text("faultstring").unwrap_or_default(),
        });
    }

    let response = body.child_elements().next().ok_or_else(|| {
        ClientError::MalformedResponse(format!("{}: empty Body", operation))
    })?;
    let payload = response
        .child_elements()
        .find(|e| e.local_name().ends_with("Return"))
        .ok_or_else(|| {
            ClientError::MalformedResponse(format!("{}: missing return value", operation))
        })?;
    Ok(payload.text())
}

/// Parse a payload returned by [`parse_response`]
pub fn parse_payload(payload: &str, operation: &str) -> Result<XmlDocument> {
    XmlDocument::parse(payload.trim())
        .map_err(|e| ClientError::MalformedResponse(format!("{} payload: {}", operation, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let envelope = build_request("getEstUp", &[("RutCompania", "76192083".into()), ("Token", "A&B".into())]);
        assert!(envelope.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(envelope.contains("<getEstUp><RutCompania>76192083</RutCompania><Token>A&amp;B</Token></getEstUp>"));
        assert_eq!(request_operation(&envelope).as_deref(), Some("getEstUp"));
    }

    #[test]
    fn test_response_payload_is_unescaped() {
        let payload = "<SII:RESPUESTA xmlns:SII=\"http://www.sii.cl/XMLSchema\"><SEMILLA>0123</SEMILLA></SII:RESPUESTA>";
        let envelope = build_response("getSeed", payload);
        assert!(envelope.contains("&lt;SEMILLA&gt;"));
        assert_eq!(parse_response(&envelope, "getSeed").unwrap(), payload);
    }

    #[test]
    fn test_fault() {
        let envelope = build_fault("soapenv:Server", "Token no valido");
        match parse_response(&envelope, "getEstUp") {
            Err(ClientError::SoapFault { code, message }) => {
                assert_eq!(code, "soapenv:Server");
                assert_eq!(message, "Token no valido");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_is_retryable() {
        for raw in ["<html>502 Bad Gateway</html>", "not xml <", "<soapenv:Envelope xmlns:soapenv=\"x\"><soapenv:Body/></soapenv:Envelope>"] {
            let err = parse_response(raw, "getSeed").unwrap_err();
            assert!(err.is_retryable(), "{:?}", err);
        }
    }
}
