use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use prost::Message;
use thiserror::Error;
use tonic::metadata::MetadataMap;
use tonic::Code;

use crate::proto::rpc;

pub type Result<T, E = Error> = std::result::Result<T, E>;

const SESSION_RESOURCE_TYPE: &str = "type.googleapis.com/google.spanner.v1.Session";
const SESSION_NOT_FOUND_TEXT: &str = "Session not found";

/// Finer classification than the status code, used by retry loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Other,
    SessionNotFound,
    InlineBeginFailed,
    RowNotFound,
    MalformedStream,
    TransactionClosed,
}

/// Structured error returned by every fallible operation of the client.
#[derive(Debug, Clone, Error)]
#[error("spanlake: code = {code:?}, desc = {message:?}{}", render_info(.additional_info))]
pub struct Error {
    code: Code,
    message: String,
    kind: ErrorKind,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    trailers: Option<MetadataMap>,
    additional_info: Option<String>,
    retry_delay: Option<Duration>,
}

fn render_info(info: &Option<String>) -> String {
    match info {
        Some(info) if !info.is_empty() => format!(", additional information = {info}"),
        _ => String::new(),
    }
}

impl Error {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            kind: ErrorKind::Other,
            source: None,
            trailers: None,
            additional_info: None,
            retry_delay: None,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub(crate) fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub(crate) fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    pub(crate) fn with_additional_info(mut self, info: impl Into<String>) -> Self {
        self.additional_info = Some(info.into());
        self
    }

    pub(crate) fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Response trailers of the failed RPC, kept for correlation with server traces.
    pub fn trailers(&self) -> Option<&MetadataMap> {
        self.trailers.as_ref()
    }

    pub fn additional_info(&self) -> Option<&str> {
        self.additional_info.as_deref()
    }

    /// Server-provided hint for how long to wait before retrying.
    pub fn retry_delay(&self) -> Option<Duration> {
        self.retry_delay
    }

    pub fn is_aborted(&self) -> bool {
        self.code == Code::Aborted
    }

    pub fn is_session_not_found(&self) -> bool {
        self.kind == ErrorKind::SessionNotFound
    }

    pub(crate) fn is_inline_begin_failed(&self) -> bool {
        self.kind == ErrorKind::InlineBeginFailed
    }

    pub(crate) fn session_not_found(name: &str) -> Self {
        Self::new(Code::NotFound, format!("{SESSION_NOT_FOUND_TEXT}: {name}"))
            .with_kind(ErrorKind::SessionNotFound)
    }

    pub(crate) fn inline_begin_failed() -> Self {
        Self::internal("failed inline begin transaction").with_kind(ErrorKind::InlineBeginFailed)
    }

    pub(crate) fn transaction_closed() -> Self {
        Self::invalid_argument("cannot use a closed transaction")
            .with_kind(ErrorKind::TransactionClosed)
    }

    pub(crate) fn row_not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message).with_kind(ErrorKind::RowNotFound)
    }

    pub(crate) fn malformed_stream(code: Code, message: impl Into<String>) -> Self {
        Self::new(code, message).with_kind(ErrorKind::MalformedStream)
    }

    pub(crate) fn nested_transaction() -> Self {
        Self::failed_precondition("spanlake does not support nested transactions")
    }

    /// Marks an error raised by a commit RPC; the outcome of such a commit is
    /// unknown when the code is `DeadlineExceeded` or `Cancelled`.
    pub(crate) fn during_commit(mut self) -> Self {
        if matches!(self.code, Code::DeadlineExceeded | Code::Cancelled) {
            self.additional_info
                .get_or_insert_with(String::new)
                .push_str("transaction outcome unknown");
        }
        self
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        let details = decode_details(status.details());
        let mut error = Error::new(status.code(), status.message());
        error.trailers = Some(status.metadata().clone());
        error.retry_delay = details.retry_delay;
        if status.code() == Code::NotFound
            && (details.session_resource || status.message().contains(SESSION_NOT_FOUND_TEXT))
        {
            error.kind = ErrorKind::SessionNotFound;
        }
        error.with_source(status)
    }
}

#[derive(Default)]
struct StatusDetails {
    retry_delay: Option<Duration>,
    session_resource: bool,
}

fn decode_details(raw: &[u8]) -> StatusDetails {
    let mut details = StatusDetails::default();
    if raw.is_empty() {
        return details;
    }
    let Ok(status) = rpc::Status::decode(raw) else {
        return details;
    };
    for any in status.details {
        match any.type_url.as_str() {
            rpc::RETRY_INFO_TYPE_URL => {
                if let Ok(info) = rpc::RetryInfo::decode(any.value.as_slice()) {
                    details.retry_delay = info.retry_delay.and_then(|d| {
                        let nanos = u32::try_from(d.nanos).ok()?;
                        let secs = u64::try_from(d.seconds).ok()?;
                        Some(Duration::new(secs, nanos))
                    });
                }
            }
            rpc::RESOURCE_INFO_TYPE_URL => {
                if let Ok(info) = rpc::ResourceInfo::decode(any.value.as_slice()) {
                    details.session_resource |= info.resource_type == SESSION_RESOURCE_TYPE;
                }
            }
            _ => {}
        }
    }
    details
}

/// Encodes a `google.rpc.Status` carrying a retry delay; the inverse of what
/// `From<tonic::Status>` reads. Useful for servers and test doubles that
/// want the client to honour a backoff hint.
pub fn status_with_retry_delay(code: Code, message: &str, delay: Duration) -> tonic::Status {
    let retry = rpc::RetryInfo {
        retry_delay: Some(prost_types::Duration {
            seconds: delay.as_secs() as i64,
            nanos: delay.subsec_nanos() as i32,
        }),
    };
    let status = rpc::Status {
        code: code as i32,
        message: message.to_string(),
        details: vec![prost_types::Any {
            type_url: rpc::RETRY_INFO_TYPE_URL.to_string(),
            value: retry.encode_to_vec(),
        }],
    };
    tonic::Status::with_details(code, message, status.encode_to_vec().into())
}

/// Human readable name for a status code, as used in metric attributes.
pub(crate) struct CodeName(pub Code);

impl fmt::Display for CodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            Code::Ok => "OK",
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::OutOfRange => "OUT_OF_RANGE",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
            Code::DataLoss => "DATA_LOSS",
            Code::Unauthenticated => "UNAUTHENTICATED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_conversion_keeps_code_message_and_trailers() {
        let mut status = tonic::Status::new(Code::Unavailable, "try again");
        status
            .metadata_mut()
            .insert("x-trace-id", "abc123".parse().unwrap());
        let err = Error::from(status);
        assert_eq!(err.code(), Code::Unavailable);
        assert_eq!(err.message(), "try again");
        let trailers = err.trailers().unwrap();
        assert_eq!(trailers.get("x-trace-id").unwrap().to_str().unwrap(), "abc123");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn retry_delay_is_decoded_from_status_details() {
        let status =
            status_with_retry_delay(Code::Aborted, "aborted", Duration::from_millis(250));
        let err = Error::from(status);
        assert!(err.is_aborted());
        assert_eq!(err.retry_delay(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn session_not_found_is_detected_from_message_and_resource_info() {
        let err = Error::from(tonic::Status::not_found(
            "Session not found: projects/p/instances/i/databases/d/sessions/s",
        ));
        assert!(err.is_session_not_found());

        let info = rpc::ResourceInfo {
            resource_type: SESSION_RESOURCE_TYPE.to_string(),
            resource_name: "sessions/s".to_string(),
            ..Default::default()
        };
        let details = rpc::Status {
            code: Code::NotFound as i32,
            message: "gone".to_string(),
            details: vec![prost_types::Any {
                type_url: rpc::RESOURCE_INFO_TYPE_URL.to_string(),
                value: info.encode_to_vec(),
            }],
        };
        let status =
            tonic::Status::with_details(Code::NotFound, "gone", details.encode_to_vec().into());
        assert!(Error::from(status).is_session_not_found());

        let table_missing = Error::from(tonic::Status::not_found("Table not found: Users"));
        assert!(!table_missing.is_session_not_found());
    }

    #[test]
    fn display_includes_additional_information() {
        let err = Error::new(Code::DeadlineExceeded, "deadline").during_commit();
        let text = err.to_string();
        assert!(text.starts_with("spanlake: code = DeadlineExceeded"));
        assert!(text.contains("transaction outcome unknown"));

        let plain = Error::invalid_argument("bad");
        assert_eq!(
            plain.to_string(),
            "spanlake: code = InvalidArgument, desc = \"bad\""
        );
    }

    #[test]
    fn code_names_match_wire_spelling() {
        assert_eq!(CodeName(Code::ResourceExhausted).to_string(), "RESOURCE_EXHAUSTED");
        assert_eq!(CodeName(Code::Ok).to_string(), "OK");
    }
}
