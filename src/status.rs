use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of an ACME resource.
///
/// Covers the status values of accounts, orders, authorizations and
/// challenges. See [RFC 8555 §7.1.6].
///
/// [RFC 8555 §7.1.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The server returned a status string this library does not know.
    Unknown,
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
    Revoked,
    Deactivated,
    Expired,
    Canceled,
}

impl Status {
    /// Parses a status string.
    ///
    /// Matching is case sensitive, as required by RFC 8555. Unrecognized
    /// values map to [`Status::Unknown`] instead of failing, so proprietary
    /// extensions do not break resource handling.
    pub fn parse(status: &str) -> Status {
        match status {
            "pending" => Status::Pending,
            "ready" => Status::Ready,
            "processing" => Status::Processing,
            "valid" => Status::Valid,
            "invalid" => Status::Invalid,
            "revoked" => Status::Revoked,
            "deactivated" => Status::Deactivated,
            "expired" => Status::Expired,
            "canceled" => Status::Canceled,
            _ => Status::Unknown,
        }
    }

    /// The wire representation of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Unknown => "unknown",
            Status::Pending => "pending",
            Status::Ready => "ready",
            Status::Processing => "processing",
            Status::Valid => "valid",
            Status::Invalid => "invalid",
            Status::Revoked => "revoked",
            Status::Deactivated => "deactivated",
            Status::Expired => "expired",
            Status::Canceled => "canceled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_values() {
        assert_eq!(Status::parse("pending"), Status::Pending);
        assert_eq!(Status::parse("ready"), Status::Ready);
        assert_eq!(Status::parse("processing"), Status::Processing);
        assert_eq!(Status::parse("valid"), Status::Valid);
        assert_eq!(Status::parse("invalid"), Status::Invalid);
        assert_eq!(Status::parse("revoked"), Status::Revoked);
        assert_eq!(Status::parse("deactivated"), Status::Deactivated);
        assert_eq!(Status::parse("expired"), Status::Expired);
        assert_eq!(Status::parse("canceled"), Status::Canceled);
    }

    #[test]
    fn unknown_values_fall_back() {
        assert_eq!(Status::parse("frobnicated"), Status::Unknown);
        // case sensitive per RFC 8555
        assert_eq!(Status::parse("Valid"), Status::Unknown);
        assert_eq!(Status::parse(""), Status::Unknown);
    }

    #[test]
    fn round_trips_as_str() {
        for status in [Status::Pending, Status::Valid, Status::Canceled] {
            assert_eq!(Status::parse(status.as_str()), status);
        }
    }
}
