use std::sync::Arc;

use thiserror::Error;

use crate::types::{Headers, RequestType};

/// Whether a failure may be retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Recoverable,
    Critical,
}

/// Coarse origin of a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    /// Raised while talking to the network or by request/response filters.
    Network,
    /// Raised by the pipeline's own bookkeeping (aborts, retry budget).
    Player,
}

#[derive(Clone, Debug, Error)]
pub enum ErrorKind {
    #[error("no transport registered for scheme `{scheme}` ({uri})")]
    UnsupportedScheme { scheme: String, uri: String },
    #[error("HTTP {status} for {uri}")]
    BadHttpStatus {
        uri: String,
        status: u16,
        body: Option<String>,
        headers: Headers,
        request_type: RequestType,
    },
    #[error("HTTP request to {uri} failed: {message}")]
    Http {
        uri: String,
        message: String,
        request_type: RequestType,
    },
    #[error("request to {uri} timed out")]
    Timeout {
        uri: String,
        request_type: RequestType,
    },
    #[error("malformed URI: {uri}")]
    MalformedUri { uri: String },
    #[error("malformed data URI: {uri}")]
    MalformedDataUri { uri: String },
    #[error("unknown data URI encoding: {uri}")]
    UnknownDataUriEncoding { uri: String },
    #[error("request has no URIs")]
    MissingUris,
    #[error("request filter failed: {0}")]
    RequestFilter(#[source] Box<NetError>),
    #[error("response filter failed: {0}")]
    ResponseFilter(#[source] Box<NetError>),
    #[error("retry attempts exhausted")]
    AttemptsExhausted,
    #[error("operation aborted")]
    OperationAborted,
    /// The task driving an operation panicked or was torn down by its
    /// runtime before producing an outcome.
    #[error("operation task failed: {message}")]
    TaskFailed { message: String },
    /// Untyped error raised by application code (a filter or a custom
    /// transport).
    #[error(transparent)]
    Foreign(Arc<dyn std::error::Error + Send + Sync>),
}

/// Centralized error type for kithara-net.
#[derive(Clone, Debug, Error)]
#[error("{kind}")]
pub struct NetError {
    kind: ErrorKind,
    severity: Severity,
}

impl NetError {
    pub fn new(kind: ErrorKind, severity: Severity) -> Self {
        Self { kind, severity }
    }

    pub fn aborted() -> Self {
        Self::new(ErrorKind::OperationAborted, Severity::Critical)
    }

    pub fn attempts_exhausted() -> Self {
        Self::new(ErrorKind::AttemptsExhausted, Severity::Critical)
    }

    pub fn task_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::TaskFailed {
                message: message.into(),
            },
            Severity::Critical,
        )
    }

    pub fn missing_uris() -> Self {
        Self::new(ErrorKind::MissingUris, Severity::Critical)
    }

    pub fn unsupported_scheme(scheme: impl Into<String>, uri: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::UnsupportedScheme {
                scheme: scheme.into(),
                uri: uri.into(),
            },
            Severity::Critical,
        )
    }

    /// Non-success HTTP status. Authorization failures (401, 403) are
    /// critical; every other status is worth another attempt.
    pub fn bad_status(
        uri: impl Into<String>,
        status: u16,
        body: Option<String>,
        headers: Headers,
        request_type: RequestType,
    ) -> Self {
        let severity = if matches!(status, 401 | 403) {
            Severity::Critical
        } else {
            Severity::Recoverable
        };
        Self::new(
            ErrorKind::BadHttpStatus {
                uri: uri.into(),
                status,
                body,
                headers,
                request_type,
            },
            severity,
        )
    }

    pub fn http(
        uri: impl Into<String>,
        message: impl Into<String>,
        request_type: RequestType,
    ) -> Self {
        Self::new(
            ErrorKind::Http {
                uri: uri.into(),
                message: message.into(),
                request_type,
            },
            Severity::Recoverable,
        )
    }

    pub fn timeout(uri: impl Into<String>, request_type: RequestType) -> Self {
        Self::new(
            ErrorKind::Timeout {
                uri: uri.into(),
                request_type,
            },
            Severity::Recoverable,
        )
    }

    /// Maps a reqwest failure onto the transport taxonomy.
    pub fn from_reqwest(uri: &str, request_type: RequestType, error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::timeout(uri, request_type)
        } else {
            Self::http(uri, error.to_string(), request_type)
        }
    }

    pub fn malformed_uri(uri: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedUri { uri: uri.into() }, Severity::Critical)
    }

    pub fn malformed_data_uri(uri: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::MalformedDataUri { uri: uri.into() },
            Severity::Critical,
        )
    }

    pub fn unknown_data_uri_encoding(uri: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::UnknownDataUriEncoding { uri: uri.into() },
            Severity::Critical,
        )
    }

    pub fn request_filter(source: NetError) -> Self {
        Self::new(ErrorKind::RequestFilter(Box::new(source)), Severity::Critical)
    }

    /// Wraps a response filter failure, keeping the severity of typed
    /// failures.
    pub fn response_filter(source: NetError) -> Self {
        let severity = if source.is_foreign() {
            Severity::Critical
        } else {
            source.severity
        };
        Self::new(ErrorKind::ResponseFilter(Box::new(source)), severity)
    }

    pub fn foreign<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(ErrorKind::Foreign(Arc::new(error)), Severity::Critical)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn category(&self) -> Category {
        match self.kind {
            ErrorKind::AttemptsExhausted
            | ErrorKind::OperationAborted
            | ErrorKind::TaskFailed { .. } => Category::Player,
            _ => Category::Network,
        }
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Marks the error as no longer recoverable.
    #[must_use]
    pub fn into_critical(self) -> Self {
        self.with_severity(Severity::Critical)
    }

    pub fn is_recoverable(&self) -> bool {
        self.severity == Severity::Recoverable
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.kind, ErrorKind::OperationAborted)
    }

    pub fn is_attempts_exhausted(&self) -> bool {
        matches!(self.kind, ErrorKind::AttemptsExhausted)
    }

    pub fn is_foreign(&self) -> bool {
        matches!(self.kind, ErrorKind::Foreign(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout { .. })
    }

    /// HTTP status code, for bad-status failures.
    pub fn status_code(&self) -> Option<u16> {
        match &self.kind {
            ErrorKind::BadHttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// URI the failure is about, when there is one.
    pub fn uri(&self) -> Option<&str> {
        match &self.kind {
            ErrorKind::UnsupportedScheme { uri, .. }
            | ErrorKind::BadHttpStatus { uri, .. }
            | ErrorKind::Http { uri, .. }
            | ErrorKind::Timeout { uri, .. }
            | ErrorKind::MalformedUri { uri }
            | ErrorKind::MalformedDataUri { uri }
            | ErrorKind::UnknownDataUriEncoding { uri } => Some(uri),
            ErrorKind::RequestFilter(inner) | ErrorKind::ResponseFilter(inner) => inner.uri(),
            _ => None,
        }
    }

    /// The failure a filter error wraps.
    pub fn filter_source(&self) -> Option<&NetError> {
        match &self.kind {
            ErrorKind::RequestFilter(inner) | ErrorKind::ResponseFilter(inner) => Some(inner),
            _ => None,
        }
    }
}

pub type NetResult<T> = Result<T, NetError>;
