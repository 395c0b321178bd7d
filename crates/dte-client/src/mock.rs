//! Scripted in-memory transport for tests
//!
//! Replies are queued per operation name (`getSeed`, `getEstUp`, …, and
//! `upload` for the multipart call). When an operation's queue is empty its
//! fallback reply, if any, is used. Every request is recorded.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{ClientError, Result};
use crate::soap;
use crate::transport::{Transport, UploadRequest};

/// Operation name recorded for multipart uploads
pub const UPLOAD_OPERATION: &str = "upload";

/// One scripted answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Raw response body
    Body(String),
    /// Connection-level failure
    Fail(String),
}

/// A request seen by the transport
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub operation: String,
    pub url: String,
    pub body: String,
}

/// An upload seen by the transport, with the file as it was on disk
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub request: UploadRequest,
    pub contents: Vec<u8>,
}

#[derive(Default)]
pub struct ScriptedTransport {
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    fallback: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<RecordedCall>>,
    uploads: Mutex<Vec<RecordedUpload>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next call of `operation`
    pub fn push(&self, operation: &str, reply: Reply) -> &Self {
        self.queued
            .lock()
            .entry(operation.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Reply used for `operation` whenever its queue is empty
    pub fn always(&self, operation: &str, reply: Reply) -> &Self {
        self.fallback.lock().insert(operation.to_string(), reply);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().clone()
    }

    /// Number of calls made to `operation`
    pub fn count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    fn next_reply(&self, operation: &str, url: &str, body: String) -> Result<String> {
        self.calls.lock().push(RecordedCall {
            operation: operation.to_string(),
            url: url.to_string(),
            body,
        });

        let queued = self
            .queued
            .lock()
            .get_mut(operation)
            .and_then(VecDeque::pop_front);
        let reply = queued.or_else(|| self.fallback.lock().get(operation).cloned());

        match reply {
            Some(Reply::Body(body)) => Ok(body),
            Some(Reply::Fail(message)) => Err(ClientError::Transport(message)),
            None => Err(ClientError::Transport(format!("no scripted reply for {}", operation))),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post_soap(&self, url: &str, envelope: &str) -> Result<String> {
        let operation = soap::request_operation(envelope).unwrap_or_default();
        self.next_reply(&operation, url, envelope.to_string())
    }

    async fn post_upload(&self, request: &UploadRequest) -> Result<String> {
        let contents = tokio::fs::read(&request.file_path).await?;
        self.uploads.lock().push(RecordedUpload {
            request: request.clone(),
            contents,
        });
        self.next_reply(UPLOAD_OPERATION, &request.url, String::new())
    }
}

/// Response bodies in the shapes the authority produces
pub mod responses {
    use crate::soap;

    const SII_NAMESPACE: &str = "http://www.sii.cl/XMLSchema";

    fn respuesta(header: &str, body: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><SII:RESPUESTA xmlns:SII=\"{}\"><SII:RESP_HDR>{}</SII:RESP_HDR>{}</SII:RESPUESTA>",
            SII_NAMESPACE, header, body
        )
    }

    pub fn seed(seed: &str) -> String {
        soap::build_response(
            "getSeed",
            &respuesta(
                "<ESTADO>00</ESTADO>",
                &format!("<SII:RESP_BODY><SEMILLA>{}</SEMILLA></SII:RESP_BODY>", seed),
            ),
        )
    }

    pub fn token(token: &str) -> String {
        soap::build_response(
            "getToken",
            &respuesta(
                "<ESTADO>00</ESTADO><GLOSA>Token Creado</GLOSA>",
                &format!("<SII:RESP_BODY><TOKEN>{}</TOKEN></SII:RESP_BODY>", token),
            ),
        )
    }

    pub fn token_refused(estado: &str, glosa: &str) -> String {
        soap::build_response(
            "getToken",
            &respuesta(&format!("<ESTADO>{}</ESTADO><GLOSA>{}</GLOSA>", estado, glosa), ""),
        )
    }

    pub fn upload_receipt(status: u8, track_id: Option<&str>) -> String {
        let track_id = track_id
            .map(|t| format!("<TRACKID>{}</TRACKID>", t))
            .unwrap_or_default();
        format!(
            "<?xml version=\"1.0\"?>\n<RECEPCIONDTE>\n<RUTSENDER>11111111-1</RUTSENDER>\n<RUTCOMPANY>76192083-9</RUTCOMPANY>\n<FILE>upload.xml</FILE>\n<TIMESTAMP>2026-10-19 10:20:30</TIMESTAMP>\n<STATUS>{}</STATUS>\n{}</RECEPCIONDTE>",
            status, track_id
        )
    }

    /// `getEstUp` answer; `counts` are (type, reported, accepted, rejected, flagged)
    pub fn submission_status(
        track_id: u64,
        estado: &str,
        extra_header: &str,
        counts: &[(u16, u32, u32, u32, u32)],
    ) -> String {
        let body: String = counts
            .iter()
            .map(|(td, reported, accepted, rejected, flagged)| {
                format!(
                    "<TIPO_DOCTO>{}</TIPO_DOCTO><INFORMADOS>{}</INFORMADOS><ACEPTADOS>{}</ACEPTADOS><RECHAZADOS>{}</RECHAZADOS><REPAROS>{}</REPAROS>",
                    td, reported, accepted, rejected, flagged
                )
            })
            .collect();
        let body = if body.is_empty() {
            String::new()
        } else {
            format!("<SII:RESP_BODY>{}</SII:RESP_BODY>", body)
        };
        soap::build_response(
            "getEstUp",
            &respuesta(
                &format!(
                    "<TRACKID>{}</TRACKID><ESTADO>{}</ESTADO>{}",
                    track_id, estado, extra_header
                ),
                &body,
            ),
        )
    }

    /// `getEstDte` or `getEstDteAv` answer
    pub fn document_status(operation: &str, estado: &str, glosa: &str) -> String {
        soap::build_response(
            operation,
            &respuesta(
                &format!(
                    "<ESTADO>{}</ESTADO><GLOSA_ESTADO>{}</GLOSA_ESTADO><ERR_CODE>0</ERR_CODE>",
                    estado, glosa
                ),
                "",
            ),
        )
    }

    pub fn email_status(estado: &str) -> String {
        soap::build_response(
            "reenvioCorreo",
            &respuesta(&format!("<SII:ESTADO>{}</SII:ESTADO>", estado), ""),
        )
    }
}
