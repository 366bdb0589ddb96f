use thiserror::Error;
use time::OffsetDateTime;

use crate::{problem::Problem, status::Status};

pub type Result<T, E = AcmeError> = std::result::Result<T, E>;

/// Errors raised while talking to an ACME provider.
///
/// The variants distinguish between local failures (malformed responses,
/// crypto errors), transport failures, and problems reported by the server
/// as [RFC 7807] documents.
///
/// [RFC 7807]: https://datatracker.ietf.org/doc/html/rfc7807
#[derive(Debug, Error)]
pub enum AcmeError {
    /// The server response violated the ACME protocol: unexpected content
    /// type, missing mandatory JSON fields, or otherwise malformed data.
    #[error("{0}")]
    Protocol(String),

    /// The HTTP transport failed before a response was received.
    #[error("network error: {0}")]
    Network(String),

    /// The server returned a problem document that is not recognized as one
    /// of the special cases below.
    #[error("server error: {problem}")]
    Server { problem: Problem },

    /// The server reported `urn:ietf:params:acme:error:rateLimited`.
    #[error("rate limited: {problem}")]
    RateLimited {
        problem: Problem,
        /// Earliest instant at which a retry may succeed, from the
        /// `Retry-After` header.
        retry_after: Option<OffsetDateTime>,
        /// Documentation URLs from `Link: rel="help"` headers.
        documents: Vec<String>,
    },

    /// The server reported `urn:ietf:params:acme:error:userActionRequired`.
    ///
    /// The user must visit the problem's `instance` URL and usually accept a
    /// new terms of service document.
    #[error("user action required: {problem}")]
    UserActionRequired {
        problem: Problem,
        /// Current terms of service, from `Link: rel="terms-of-service"`.
        terms_of_service: Option<String>,
    },

    /// The CA does not support the requested feature, e.g. the directory
    /// lacks an endpoint or a required challenge type was not offered.
    #[error("server does not support {0}")]
    NotSupported(String),

    /// A resource getter triggered a lazy fetch from the server, and that
    /// fetch failed.
    #[error("could not load {resource}")]
    LazyLoading {
        resource: &'static str,
        #[source]
        source: Box<AcmeError>,
    },

    /// A polling deadline expired while the server still signalled a
    /// non-terminal status.
    #[error("resource did not reach a terminal status, currently {status}")]
    RetryAfter {
        status: Status,
        /// The server's last `Retry-After` estimation, if any.
        retry_after: Option<OffsetDateTime>,
    },

    /// A local cryptographic operation failed (key handling, signing, CSR
    /// generation).
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl AcmeError {
    /// Protocol error for a JSON value at `path` that failed coercion.
    pub(crate) fn value(path: &str, reason: impl AsRef<str>) -> Self {
        AcmeError::Protocol(format!("{path}: {}", reason.as_ref()))
    }
}

impl From<serde_json::Error> for AcmeError {
    fn from(err: serde_json::Error) -> Self {
        AcmeError::Protocol(format!("invalid JSON: {err}"))
    }
}
