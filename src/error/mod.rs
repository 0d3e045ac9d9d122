//! Per-request errors: one tagged value carrying a status, message and payload.
//!
//! Handlers and middleware fail by returning an [`HttpError`]. Rather than one
//! type per status code, a single value records:
//!
//! - a [`ErrorKind`] telling the dispatcher where the failure came from,
//! - an optional declared [`StatusCode`] (absent means "unrecognized", mapped to 500),
//! - an optional structured JSON payload that becomes the response body,
//! - an optional source error kept for diagnostics.
//!
//! Instances are built through named factories, one per status:
//!
//! ```
//! use treeroute::error::HttpError;
//! use treeroute::http::StatusCode;
//!
//! let err = HttpError::conflict("email already registered");
//! assert_eq!(err.status(), StatusCode::Conflict);
//!
//! let err = HttpError::unprocessable_content(serde_json::json!({ "firstName": "Required" }));
//! assert_eq!(err.status().as_u16(), 422);
//! assert!(err.payload().is_some());
//! ```

use std::error::Error as StdError;
use std::fmt;

use serde_json::Value;

use crate::http::StatusCode;

pub mod mapper;

pub use mapper::{map, respond};

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Where a per-request failure originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No registered path pattern matched the request.
    NotFound,
    /// A pattern matched but the method is not registered for it.
    MethodNotAllowed,
    /// A non-empty request body was not valid JSON.
    BodyParse,
    /// Every middleware in the chain continued and none produced a response.
    EmptyChain,
    /// Raised by a middleware or handler.
    Handler,
}

/// A per-request failure, converted into a response by the error mapper.
#[derive(Debug)]
pub struct HttpError {
    kind: ErrorKind,
    status: Option<StatusCode>,
    message: String,
    payload: Option<Value>,
    source: Option<BoxError>,
}

impl HttpError {
    fn new(kind: ErrorKind, status: Option<StatusCode>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            payload: None,
            source: None,
        }
    }

    /// A handler error with an explicit status.
    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Handler, Some(status), message)
    }

    /// A handler error from a raw numeric code.
    ///
    /// Only known 4xx and 5xx codes are recognized; anything else is recorded
    /// without a status and maps to 500.
    pub fn from_code(code: u16, message: impl Into<String>) -> Self {
        let status = StatusCode::from_u16(code)
            .filter(|status| status.is_client_error() || status.is_server_error());
        Self::new(ErrorKind::Handler, status, message)
    }

    /// Wraps an arbitrary error. It carries no declared status, so it maps to 500.
    pub fn from_source<E>(source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::new(ErrorKind::Handler, None, source.to_string()).with_source(source)
    }

    /// 404, synthesized by the dispatcher when no pattern matches.
    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound, Some(StatusCode::NotFound), "")
    }

    /// 405, raised by the sentinel chain of a known pattern.
    pub fn method_not_allowed() -> Self {
        Self::new(
            ErrorKind::MethodNotAllowed,
            Some(StatusCode::MethodNotAllowed),
            "",
        )
    }

    /// 400 for a request body that failed to parse as JSON.
    pub fn body_parse(source: serde_json::Error) -> Self {
        Self::new(
            ErrorKind::BodyParse,
            Some(StatusCode::BadRequest),
            "request body is not valid JSON",
        )
        .with_source(source)
    }

    /// 500 for a chain in which no middleware responded.
    pub fn empty_chain() -> Self {
        Self::new(
            ErrorKind::EmptyChain,
            Some(StatusCode::InternalServerError),
            "no middleware in the chain produced a response",
        )
    }

    /// 415 for an unsupported request attribute, e.g. `content-type`.
    pub fn unsupported_media_type(subject: &str) -> Self {
        Self::with_status(
            StatusCode::UnsupportedMediaType,
            format!("Unsupported {subject}"),
        )
    }

    /// 422 whose payload (typically a list of field issues) becomes the body.
    pub fn unprocessable_content(payload: Value) -> Self {
        Self::with_status(StatusCode::UnprocessableContent, payload.to_string())
            .with_payload(payload)
    }

    /// Attaches a structured payload, serialized as the response body.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Attaches the underlying cause for logging.
    #[must_use]
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The status this error maps to: the declared one, or 500.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::InternalServerError)
    }

    /// The declared status, if the error carries a recognized one.
    pub fn declared_status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.status())
        } else {
            write!(f, "{}: {}", self.status(), self.message)
        }
    }
}

impl StdError for HttpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn StdError + 'static))
    }
}

impl From<serde_json::Error> for HttpError {
    fn from(err: serde_json::Error) -> Self {
        Self::from_source(err)
    }
}

impl From<std::io::Error> for HttpError {
    fn from(err: std::io::Error) -> Self {
        Self::from_source(err)
    }
}

macro_rules! status_factories {
    ($($name:ident => $status:ident,)*) => {
        impl HttpError {
            $(
                #[doc = concat!("A handler error with status [`StatusCode::", stringify!($status), "`].")]
                pub fn $name(message: impl Into<String>) -> Self {
                    Self::with_status(StatusCode::$status, message)
                }
            )*
        }
    };
}

status_factories! {
    bad_request => BadRequest,
    unauthorized => Unauthorized,
    payment_required => PaymentRequired,
    forbidden => Forbidden,
    not_acceptable => NotAcceptable,
    proxy_authentication_required => ProxyAuthenticationRequired,
    request_timeout => RequestTimeout,
    conflict => Conflict,
    gone => Gone,
    length_required => LengthRequired,
    precondition_failed => PreconditionFailed,
    payload_too_large => PayloadTooLarge,
    uri_too_long => UriTooLong,
    range_not_satisfiable => RangeNotSatisfiable,
    expectation_failed => ExpectationFailed,
    im_a_teapot => ImATeapot,
    misdirected_request => MisdirectedRequest,
    locked => Locked,
    failed_dependency => FailedDependency,
    too_early => TooEarly,
    upgrade_required => UpgradeRequired,
    precondition_required => PreconditionRequired,
    too_many_requests => TooManyRequests,
    request_header_fields_too_large => RequestHeaderFieldsTooLarge,
    unavailable_for_legal_reasons => UnavailableForLegalReasons,
    internal_server_error => InternalServerError,
    not_implemented => NotImplemented,
    bad_gateway => BadGateway,
    service_unavailable => ServiceUnavailable,
    gateway_timeout => GatewayTimeout,
    http_version_not_supported => HttpVersionNotSupported,
    variant_also_negotiates => VariantAlsoNegotiates,
    insufficient_storage => InsufficientStorage,
    loop_detected => LoopDetected,
    not_extended => NotExtended,
    network_authentication_required => NetworkAuthenticationRequired,
}
